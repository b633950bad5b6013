//! Monitor
//!
//! The long-lived service object behind the dashboard:
//! - Owns the aggregator, detector, CII calculator and escalation tracker
//! - Ingests feed batches and recomputes every derived view in one cycle
//! - Tracks per-source freshness and the start-up learning window
//!
//! Share it as [`SharedMonitor`]. Each `ingest` finishes its cycle before the
//! lock is released, so readers only ever see complete cycles.

use chrono::{DateTime, Duration, Utc};
use geowatch_core::{DataSourceId, NewsItem};
use geowatch_engine::{
    geo_convergence_to_signal, CiiCalculator, ConvergenceAlert, ConvergenceDetector, CountryCluster,
    CountryData, CountryInstabilityScore, DisplaySignal, EngineConfig, EngineError,
    EscalationTracker, HotspotEscalation, HotspotRegistry, IngestReport, RegionalConvergence,
    SignalAggregator, SignalBoard,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::feeds::{FeedBatch, FeedKind};
use crate::freshness::{FreshnessSummary, FreshnessTracker, IntelligenceGap};
use crate::scheduler::RefreshTask;

pub type SharedMonitor = Arc<Mutex<Monitor>>;

/// Views derived from the event store at the end of a cycle
#[derive(Debug, Clone, Default, Serialize)]
pub struct DerivedState {
    pub updated_at: Option<DateTime<Utc>>,
    pub clusters: Vec<CountryCluster>,
    pub regional: Vec<RegionalConvergence>,
    pub instability: Vec<CountryInstabilityScore>,
    pub alerts: Vec<ConvergenceAlert>,
}

/// What one cycle did
#[derive(Debug, Clone, Serialize)]
pub struct CycleSummary {
    pub at: DateTime<Utc>,
    pub feed: Option<FeedKind>,
    pub report: Option<IngestReport>,
    pub new_alerts: Vec<ConvergenceAlert>,
    pub clusters: usize,
    pub regional: usize,
    pub scored_countries: usize,
    pub baseline_committed: bool,
    pub learning: bool,
}

pub struct Monitor {
    config: EngineConfig,
    aggregator: SignalAggregator,
    detector: ConvergenceDetector,
    cii: CiiCalculator,
    escalation: EscalationTracker,
    board: SignalBoard,
    freshness: FreshnessTracker,
    seen_alerts: HashSet<String>,
    learning_since: Option<DateTime<Utc>>,
    headlines: Vec<NewsItem>,
    derived: DerivedState,
}

impl Monitor {
    pub fn new(config: EngineConfig, hotspots: HotspotRegistry) -> Result<Self, EngineError> {
        config.validate()?;
        let board = SignalBoard::new();
        let escalation = EscalationTracker::new(
            config.escalation.clone(),
            hotspots,
            Arc::new(board.clone()),
            Arc::new(board.clone()),
            Arc::new(board.clone()),
        );

        Ok(Self {
            aggregator: SignalAggregator::from_config(&config)?,
            detector: ConvergenceDetector::new(config.convergence.clone()),
            cii: CiiCalculator::new(config.cii.clone()),
            escalation,
            board,
            freshness: FreshnessTracker::new(),
            seen_alerts: HashSet::new(),
            learning_since: None,
            headlines: Vec::new(),
            derived: DerivedState::default(),
            config,
        })
    }

    pub fn shared(self) -> SharedMonitor {
        Arc::new(Mutex::new(self))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Hold back convergence alerts for the configured window from `now`
    pub fn start_learning(&mut self, now: DateTime<Utc>) {
        info!(
            "Learning mode for {} minutes; convergence alerts held back",
            self.config.learning.duration_minutes
        );
        self.learning_since = Some(now);
    }

    pub fn is_in_learning_mode(&self, now: DateTime<Utc>) -> bool {
        self.learning_since.is_some_and(|since| {
            now - since < Duration::minutes(self.config.learning.duration_minutes)
        })
    }

    /// Ingest one batch and run a full cycle. Freshness is credited only after
    /// the batch is in the store.
    pub fn ingest(&mut self, batch: &FeedBatch, now: DateTime<Utc>) -> CycleSummary {
        let agg = &mut self.aggregator;
        let report = match batch {
            FeedBatch::Protests(v) => Some(agg.ingest_protests(v, now)),
            FeedBatch::MilitaryFlights(v) => Some(agg.ingest_military_flights(v, now)),
            FeedBatch::MilitaryVessels(v) => Some(agg.ingest_military_vessels(v, now)),
            FeedBatch::Earthquakes(v) => Some(agg.ingest_earthquakes(v, now)),
            FeedBatch::Outages(v) => Some(agg.ingest_outages(v, now)),
            FeedBatch::NewsClusters(v) => Some(agg.ingest_news_clusters(v, now)),
            FeedBatch::Conflicts(v) => Some(agg.ingest_conflicts(v, now)),
            FeedBatch::Displacement(v) => Some(agg.ingest_displacement(v, now)),
            FeedBatch::Climate(v) => Some(agg.ingest_climate(v, now)),
            FeedBatch::Headlines(v) => {
                self.headlines = v.clone();
                None
            }
        };
        if let Some(r) = &report {
            debug!(
                "Ingested {}: {} located, {} country-only, {} dropped, {} evicted",
                r.kind, r.accepted, r.country_only, r.dropped, r.evicted
            );
        }

        self.freshness
            .record_update(batch.kind().source(), batch.len(), now);

        let mut summary = self.run_cycle(now, batch.kind() == FeedKind::Headlines);
        summary.feed = Some(batch.kind());
        summary.report = report;
        summary
    }

    /// Recompute derived state without new data
    pub fn refresh(&mut self, now: DateTime<Utc>) -> CycleSummary {
        self.run_cycle(now, false)
    }

    fn run_cycle(&mut self, now: DateTime<Utc>, update_escalation: bool) -> CycleSummary {
        self.aggregator.evict_expired(now);

        let tallies = self.aggregator.country_tallies(now);
        let clusters = self.aggregator.get_country_clusters(now);
        let regional = self.aggregator.get_regional_convergence(now);
        let instability = self.cii.calculate_cii(&tallies, now);

        let baseline_committed = self.cii.commit_due(now);
        if baseline_committed {
            self.cii.commit_cycle(&tallies, now);
        }
        self.cii.record_cycle(&instability);

        let learning = self.is_in_learning_mode(now);
        let new_alerts = self.detect_geo_convergence(now);

        self.board.publish_cii(
            instability
                .iter()
                .filter_map(|s| s.score.map(|score| (s.country_code.clone(), score))),
        );
        self.board
            .publish_military(self.aggregator.military_positions(now));

        if update_escalation {
            let updated = self.escalation.update_from_news(&self.headlines, now);
            debug!("Updated {} hotspot escalations from headlines", updated.len());
        }

        for alert in &new_alerts {
            info!(
                "Convergence at {} ({}): {} kinds, {} events, score {:.0}",
                alert.id,
                alert.countries.iter().cloned().collect::<Vec<_>>().join(","),
                alert.signal_kinds.len(),
                alert.event_count,
                alert.score
            );
        }

        let summary = CycleSummary {
            at: now,
            feed: None,
            report: None,
            new_alerts,
            clusters: clusters.len(),
            regional: regional.len(),
            scored_countries: instability.iter().filter(|s| !s.is_learning()).count(),
            baseline_committed,
            learning,
        };

        self.derived = DerivedState {
            updated_at: Some(now),
            clusters,
            regional,
            instability,
            alerts: self.detector.active_alerts().into_iter().cloned().collect(),
        };

        debug!(
            "Cycle complete: {} clusters, {} regional, {} active alerts",
            summary.clusters,
            summary.regional,
            self.derived.alerts.len()
        );
        summary
    }

    /// Producer failure: only freshness changes
    pub fn record_failure(&mut self, source: DataSourceId, error: impl fmt::Display) {
        self.freshness.record_error(source, error.to_string());
    }

    /// Decay hotspot escalation toward baseline
    pub fn decay_escalations(&mut self, now: DateTime<Utc>) {
        self.escalation.decay_tick(now);
    }

    pub fn derived(&self) -> &DerivedState {
        &self.derived
    }

    pub fn country_clusters(&self) -> &[CountryCluster] {
        &self.derived.clusters
    }

    pub fn regional_convergence(&self) -> &[RegionalConvergence] {
        &self.derived.regional
    }

    pub fn calculate_cii(&self) -> &[CountryInstabilityScore] {
        &self.derived.instability
    }

    pub fn country_data(&self, country_code: &str, now: DateTime<Utc>) -> Option<CountryData> {
        self.aggregator.get_country_data(country_code, now)
    }

    /// Run detection now with the session's seen set. Returns nothing while
    /// learning.
    pub fn detect_geo_convergence(&mut self, now: DateTime<Utc>) -> Vec<ConvergenceAlert> {
        if self.is_in_learning_mode(now) {
            debug!("Convergence detection skipped: learning");
            return Vec::new();
        }
        let fired = self.detector.detect_geo_convergence(
            self.aggregator.grid(),
            &mut self.seen_alerts,
            now,
        );
        self.board.publish_alerts(self.detector.active_alerts());
        fired
    }

    pub fn geo_convergence_to_signal(&self, alert: &ConvergenceAlert) -> DisplaySignal {
        geo_convergence_to_signal(alert)
    }

    pub fn active_alerts(&self) -> &[ConvergenceAlert] {
        &self.derived.alerts
    }

    pub fn hotspot_escalation(&self, hotspot_id: &str) -> Option<&HotspotEscalation> {
        self.escalation.get_hotspot_escalation(hotspot_id)
    }

    pub fn hotspot_escalations(&self) -> Vec<&HotspotEscalation> {
        self.escalation.all_escalations()
    }

    pub fn hotspots(&self) -> &HotspotRegistry {
        self.escalation.hotspots()
    }

    pub fn update_hotspot_escalation(
        &mut self,
        hotspot_id: &str,
        match_count: usize,
        has_breaking: bool,
        velocity: f64,
        now: DateTime<Utc>,
    ) -> Result<HotspotEscalation, EngineError> {
        self.escalation
            .update_hotspot_escalation(hotspot_id, match_count, has_breaking, velocity, now)
            .cloned()
    }

    pub fn freshness(&self) -> &FreshnessTracker {
        &self.freshness
    }

    pub fn freshness_mut(&mut self) -> &mut FreshnessTracker {
        &mut self.freshness
    }

    pub fn freshness_summary(&self, now: DateTime<Utc>) -> FreshnessSummary {
        self.freshness.summary(now)
    }

    pub fn intelligence_gaps(&self, now: DateTime<Utc>) -> Vec<IntelligenceGap> {
        self.freshness.intelligence_gaps(now)
    }
}

impl fmt::Debug for Monitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Monitor")
            .field("events", &self.aggregator.grid().len())
            .field("country_signals", &self.aggregator.country_signal_count())
            .field("active_alerts", &self.derived.alerts.len())
            .field("learning_since", &self.learning_since)
            .field("updated_at", &self.derived.updated_at)
            .finish()
    }
}

/// Refresh task that reloads `<dir>/<feed>.json` into a shared monitor
pub struct FeedFileRefresh {
    kind: FeedKind,
    path: PathBuf,
    monitor: SharedMonitor,
}

impl FeedFileRefresh {
    pub fn new(kind: FeedKind, path: PathBuf, monitor: SharedMonitor) -> Self {
        Self { kind, path, monitor }
    }

    async fn load(&self) -> anyhow::Result<FeedBatch> {
        let json = tokio::fs::read_to_string(&self.path).await?;
        Ok(self.kind.parse(&json)?)
    }
}

#[async_trait::async_trait]
impl RefreshTask for FeedFileRefresh {
    async fn run(&self) -> anyhow::Result<()> {
        let batch = match self.load().await {
            Ok(batch) => batch,
            Err(e) => {
                warn!("Feed {} unreadable: {:#}", self.kind, e);
                self.monitor.lock().record_failure(self.kind.source(), &e);
                return Err(e.context(format!("loading {}", self.path.display())));
            }
        };

        let summary = self.monitor.lock().ingest(&batch, Utc::now());
        if !summary.new_alerts.is_empty() {
            info!(
                "{} new convergence alert(s) after {} refresh",
                summary.new_alerts.len(),
                self.kind
            );
        }
        Ok(())
    }
}
