//! Signal Aggregator - per-country views over the spatial grid
//!
//! The aggregator owns the event store:
//! - One ingest method per producer, each normalizing into the grid
//! - Country-only signals (unlocated news) kept beside the grid
//! - Country clusters and regional convergence recomputed on every call
//! - Raw per-country tallies feeding the instability index

use chrono::{DateTime, Utc};
use geowatch_core::{
    country_by_code, country_signal, haversine_km, mean_point, normalize, ClimateAnomaly,
    ConflictEvent, CountrySignal, DisplacementFlow, Earthquake, GridConfig, InternetOutage,
    MilitaryFlight, MilitaryVessel, NewsCluster, NormalizedEvent, ProtestEvent, RawEvent,
    SignalKind, SpatialGrid,
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

use crate::config::{EngineConfig, RegionalConfig};
use crate::EngineError;

/// Outcome of ingesting one producer batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub kind: SignalKind,
    /// Located events stored in the grid
    pub accepted: usize,
    /// Unlocated records kept as country signals
    pub country_only: usize,
    /// Records that could not be used
    pub dropped: usize,
    /// Stale events of this kind evicted before the batch
    pub evicted: usize,
}

impl IngestReport {
    fn new(kind: SignalKind) -> Self {
        Self {
            kind,
            accepted: 0,
            country_only: 0,
            dropped: 0,
            evicted: 0,
        }
    }

    pub fn total(&self) -> usize {
        self.accepted + self.country_only + self.dropped
    }
}

/// Raw signal tallies for one country
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CountryData {
    pub country_code: String,
    pub counts: BTreeMap<SignalKind, usize>,
    pub severity_sums: BTreeMap<SignalKind, f64>,
    pub last_event_at: Option<DateTime<Utc>>,
}

impl CountryData {
    fn new(code: &str) -> Self {
        Self {
            country_code: code.to_string(),
            ..Default::default()
        }
    }

    fn record(&mut self, kind: SignalKind, severity: f64, at: DateTime<Utc>) {
        *self.counts.entry(kind).or_insert(0) += 1;
        *self.severity_sums.entry(kind).or_insert(0.0) += severity;
        self.last_event_at = Some(self.last_event_at.map_or(at, |t| t.max(at)));
    }

    pub fn count(&self, kind: SignalKind) -> usize {
        self.counts.get(&kind).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    /// Distinct kinds with at least one live signal
    pub fn kinds(&self) -> BTreeSet<SignalKind> {
        self.counts
            .iter()
            .filter(|(_, n)| **n > 0)
            .map(|(kind, _)| *kind)
            .collect()
    }
}

/// A country with two or more distinct live signal kinds
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountryCluster {
    pub country_code: String,
    pub country_name: String,
    pub signal_types: BTreeSet<SignalKind>,
    /// 0 - 100
    pub convergence_score: f64,
    pub contributing_event_ids: Vec<String>,
    pub center_lat: f64,
    pub center_lon: f64,
    pub event_count: usize,
}

/// Neighbouring country clusters grouped into one cross-border picture
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionalConvergence {
    pub countries: Vec<String>,
    pub description: String,
    pub center_lat: f64,
    pub center_lon: f64,
    pub signal_types: BTreeSet<SignalKind>,
}

/// Cluster convergence score: more kinds weigh most, volume is capped
pub fn cluster_score(kinds: usize, events: usize, mean_severity: f64) -> f64 {
    let volume = (events as f64 * 2.0).min(30.0);
    (kinds as f64 * 20.0 + volume + mean_severity * 20.0).min(100.0)
}

/// "a", "a and b", "a, b and c"
pub fn describe_kinds<'a, I>(kinds: I) -> String
where
    I: IntoIterator<Item = &'a SignalKind>,
{
    let labels: Vec<&str> = kinds.into_iter().map(|k| k.label()).collect();
    join_words(&labels)
}

fn join_words(words: &[&str]) -> String {
    match words {
        [] => String::new(),
        [only] => only.to_string(),
        [init @ .., last] => format!("{} and {}", init.join(", "), last),
    }
}

/// Contribution of one live signal to a country view
struct Contribution<'a> {
    id: &'a str,
    kind: SignalKind,
    severity: f64,
    timestamp: DateTime<Utc>,
    position: Option<(f64, f64)>,
}

/// The aggregator
#[derive(Debug, Clone)]
pub struct SignalAggregator {
    grid: SpatialGrid,

    /// Country-attributed signals with no coordinates (id -> signal)
    country_signals: HashMap<String, CountrySignal>,

    regional: RegionalConfig,
}

impl SignalAggregator {
    /// Create a new aggregator
    pub fn new(grid: GridConfig, regional: RegionalConfig) -> Result<Self, EngineError> {
        Ok(Self {
            grid: SpatialGrid::new(grid)?,
            country_signals: HashMap::new(),
            regional,
        })
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self, EngineError> {
        Self::new(config.grid.grid_config(), config.regional.clone())
    }

    /// The underlying grid (read-only)
    pub fn grid(&self) -> &SpatialGrid {
        &self.grid
    }

    pub fn ingest_protests(&mut self, events: &[ProtestEvent], now: DateTime<Utc>) -> IngestReport {
        self.ingest_batch(SignalKind::Protest, events.iter().map(RawEvent::Protest), now)
    }

    pub fn ingest_military_flights(
        &mut self,
        flights: &[MilitaryFlight],
        now: DateTime<Utc>,
    ) -> IngestReport {
        self.ingest_batch(
            SignalKind::MilitaryFlight,
            flights.iter().map(RawEvent::MilitaryFlight),
            now,
        )
    }

    pub fn ingest_military_vessels(
        &mut self,
        vessels: &[MilitaryVessel],
        now: DateTime<Utc>,
    ) -> IngestReport {
        self.ingest_batch(
            SignalKind::MilitaryVessel,
            vessels.iter().map(RawEvent::MilitaryVessel),
            now,
        )
    }

    pub fn ingest_earthquakes(&mut self, quakes: &[Earthquake], now: DateTime<Utc>) -> IngestReport {
        self.ingest_batch(SignalKind::Earthquake, quakes.iter().map(RawEvent::Earthquake), now)
    }

    pub fn ingest_outages(&mut self, outages: &[InternetOutage], now: DateTime<Utc>) -> IngestReport {
        self.ingest_batch(SignalKind::Outage, outages.iter().map(RawEvent::Outage), now)
    }

    pub fn ingest_news_clusters(
        &mut self,
        clusters: &[NewsCluster],
        now: DateTime<Utc>,
    ) -> IngestReport {
        self.ingest_batch(
            SignalKind::NewsCluster,
            clusters.iter().map(RawEvent::NewsCluster),
            now,
        )
    }

    pub fn ingest_conflicts(&mut self, events: &[ConflictEvent], now: DateTime<Utc>) -> IngestReport {
        self.ingest_batch(SignalKind::Conflict, events.iter().map(RawEvent::Conflict), now)
    }

    pub fn ingest_displacement(
        &mut self,
        flows: &[DisplacementFlow],
        now: DateTime<Utc>,
    ) -> IngestReport {
        self.ingest_batch(
            SignalKind::Displacement,
            flows.iter().map(RawEvent::Displacement),
            now,
        )
    }

    pub fn ingest_climate(&mut self, anomalies: &[ClimateAnomaly], now: DateTime<Utc>) -> IngestReport {
        self.ingest_batch(SignalKind::Climate, anomalies.iter().map(RawEvent::Climate), now)
    }

    fn ingest_batch<'a, I>(&mut self, kind: SignalKind, batch: I, now: DateTime<Utc>) -> IngestReport
    where
        I: IntoIterator<Item = RawEvent<'a>>,
    {
        let mut report = IngestReport::new(kind);
        report.evicted = if kind.is_military() {
            self.remove_kind(kind)
        } else {
            self.evict_kind(kind, now)
        };

        for raw in batch {
            if let Some(event) = normalize(&raw) {
                self.country_signals.remove(&event.id);
                self.grid.insert(event, now);
                report.accepted += 1;
            } else if let Some(signal) = country_signal(&raw) {
                self.grid.remove(&signal.id);
                self.country_signals.insert(signal.id.clone(), signal);
                report.country_only += 1;
            } else {
                report.dropped += 1;
            }
        }

        debug!(
            "Ingested {} batch: {} accepted, {} country-only, {} dropped, {} evicted",
            kind, report.accepted, report.country_only, report.dropped, report.evicted
        );
        report
    }

    /// Position feeds report every tracked asset on each refresh, so a new
    /// batch replaces the previous one
    fn remove_kind(&mut self, kind: SignalKind) -> usize {
        let before = self.country_signals.len();
        self.country_signals.retain(|_, s| s.kind != kind);
        let removed_signals = before - self.country_signals.len();
        self.grid.remove_kind(kind) + removed_signals
    }

    fn evict_kind(&mut self, kind: SignalKind, now: DateTime<Utc>) -> usize {
        let window = self.grid.retention().window(kind);
        let before = self.country_signals.len();
        self.country_signals
            .retain(|_, s| s.kind != kind || s.age(now) <= window);
        let evicted_signals = before - self.country_signals.len();
        self.grid.evict_older_than(kind, window, now) + evicted_signals
    }

    /// Evict every kind past its retention window. Returns the count.
    pub fn evict_expired(&mut self, now: DateTime<Utc>) -> usize {
        SignalKind::ALL
            .iter()
            .map(|kind| self.evict_kind(*kind, now))
            .sum()
    }

    /// Live grid events followed by live country-only signals
    fn contributions(&self, now: DateTime<Utc>) -> (Vec<Arc<NormalizedEvent>>, Vec<&CountrySignal>) {
        let events = self.grid.live_events(now);
        let retention = self.grid.retention();
        let mut signals: Vec<&CountrySignal> = self
            .country_signals
            .values()
            .filter(|s| s.age(now) <= retention.window(s.kind))
            .collect();
        signals.sort_by(|a, b| a.id.cmp(&b.id));
        (events, signals)
    }

    fn by_country<'a>(
        events: &'a [Arc<NormalizedEvent>],
        signals: &[&'a CountrySignal],
    ) -> BTreeMap<&'a str, Vec<Contribution<'a>>> {
        let mut grouped: BTreeMap<&str, Vec<Contribution<'_>>> = BTreeMap::new();
        for event in events {
            if let Some(code) = event.country_code.as_deref() {
                grouped.entry(code).or_default().push(Contribution {
                    id: &event.id,
                    kind: event.kind,
                    severity: event.severity,
                    timestamp: event.timestamp,
                    position: Some((event.lat, event.lon)),
                });
            }
        }
        for signal in signals {
            grouped
                .entry(signal.country_code.as_str())
                .or_default()
                .push(Contribution {
                    id: &signal.id,
                    kind: signal.kind,
                    severity: signal.severity,
                    timestamp: signal.timestamp,
                    position: None,
                });
        }
        grouped
    }

    /// Tallies for every country with at least one live signal
    pub fn country_tallies(&self, now: DateTime<Utc>) -> BTreeMap<String, CountryData> {
        let (events, signals) = self.contributions(now);
        Self::by_country(&events, &signals)
            .into_iter()
            .map(|(code, items)| {
                let mut data = CountryData::new(code);
                for item in &items {
                    data.record(item.kind, item.severity, item.timestamp);
                }
                (code.to_string(), data)
            })
            .collect()
    }

    /// Tallies for one country
    pub fn get_country_data(&self, country_code: &str, now: DateTime<Utc>) -> Option<CountryData> {
        let code = country_code.to_ascii_uppercase();
        self.country_tallies(now).remove(&code)
    }

    /// Countries with at least two distinct live kinds, highest score first
    pub fn get_country_clusters(&self, now: DateTime<Utc>) -> Vec<CountryCluster> {
        let (events, signals) = self.contributions(now);
        let mut clusters = Vec::new();

        for (code, items) in Self::by_country(&events, &signals) {
            let kinds: BTreeSet<SignalKind> = items.iter().map(|c| c.kind).collect();
            if kinds.len() < self.regional.min_kinds {
                continue;
            }

            let country = country_by_code(code);
            let center = mean_point(items.iter().filter_map(|c| c.position))
                .or_else(|| country.map(|c| c.centroid));
            let Some((center_lat, center_lon)) = center else {
                debug!("Skipping cluster for {}: no position", code);
                continue;
            };

            let mean_severity =
                items.iter().map(|c| c.severity).sum::<f64>() / items.len() as f64;
            let mut ids: Vec<String> = items.iter().map(|c| c.id.to_string()).collect();
            ids.sort();

            clusters.push(CountryCluster {
                country_code: code.to_string(),
                country_name: country.map_or_else(|| code.to_string(), |c| c.name.to_string()),
                convergence_score: cluster_score(kinds.len(), items.len(), mean_severity),
                signal_types: kinds,
                contributing_event_ids: ids,
                center_lat,
                center_lon,
                event_count: items.len(),
            });
        }

        clusters.sort_by(|a, b| {
            b.convergence_score
                .total_cmp(&a.convergence_score)
                .then_with(|| a.country_code.cmp(&b.country_code))
        });
        clusters
    }

    /// Group neighbouring clusters. Greedy single-linkage: the strongest
    /// unassigned cluster anchors a group and pulls in every unassigned
    /// cluster within the radius of any member.
    pub fn get_regional_convergence(&self, now: DateTime<Utc>) -> Vec<RegionalConvergence> {
        let clusters = self.get_country_clusters(now);
        let radius = self.regional.radius_km;
        let mut assigned = vec![false; clusters.len()];
        let mut regions = Vec::new();

        for anchor in 0..clusters.len() {
            if assigned[anchor] {
                continue;
            }
            assigned[anchor] = true;
            let mut group = vec![anchor];

            let mut grew = true;
            while grew {
                grew = false;
                for candidate in 0..clusters.len() {
                    if assigned[candidate] {
                        continue;
                    }
                    let c = &clusters[candidate];
                    let near = group.iter().any(|&m| {
                        let member = &clusters[m];
                        haversine_km(member.center_lat, member.center_lon, c.center_lat, c.center_lon)
                            <= radius
                    });
                    if near {
                        assigned[candidate] = true;
                        group.push(candidate);
                        grew = true;
                    }
                }
            }

            if group.len() < 2 {
                continue;
            }

            let members: Vec<&CountryCluster> = group.iter().map(|&i| &clusters[i]).collect();
            let signal_types: BTreeSet<SignalKind> = members
                .iter()
                .flat_map(|c| c.signal_types.iter().copied())
                .collect();
            let (center_lat, center_lon) =
                mean_point(members.iter().map(|c| (c.center_lat, c.center_lon)))
                    .unwrap_or((members[0].center_lat, members[0].center_lon));
            let names: Vec<&str> = members.iter().map(|c| c.country_name.as_str()).collect();

            regions.push(RegionalConvergence {
                countries: members.iter().map(|c| c.country_code.clone()).collect(),
                description: format!(
                    "Regional convergence: {} show {}",
                    join_words(&names),
                    describe_kinds(&signal_types)
                ),
                center_lat,
                center_lon,
                signal_types,
            });
        }

        regions
    }

    /// Coordinates of live military flights and vessels
    pub fn military_positions(&self, now: DateTime<Utc>) -> Vec<(f64, f64)> {
        self.grid
            .live_events(now)
            .iter()
            .filter(|e| e.kind.is_military())
            .map(|e| (e.lat, e.lon))
            .collect()
    }

    /// Count of stored country-only signals
    pub fn country_signal_count(&self) -> usize {
        self.country_signals.len()
    }

    /// Clear all state (for testing)
    pub fn clear(&mut self) {
        self.grid.clear();
        self.country_signals.clear();
    }
}

impl Default for SignalAggregator {
    fn default() -> Self {
        Self {
            grid: SpatialGrid::default(),
            country_signals: HashMap::new(),
            regional: RegionalConfig::default(),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_single_kind_is_not_a_cluster() {
        let mut agg = SignalAggregator::default();
        let protests: Vec<_> = (0..6)
            .map(|i| protest(&format!("p{i}"), "UA", 50.4, 30.5, t0()))
            .collect();
        agg.ingest_protests(&protests, t0());

        assert!(agg.get_country_clusters(t0()).is_empty());
        assert_eq!(agg.get_country_data("ua", t0()).unwrap().count(SignalKind::Protest), 6);
    }

    #[test]
    fn test_cluster_score_and_center() {
        let mut agg = SignalAggregator::default();
        agg.ingest_protests(&[protest("p1", "UA", 50.0, 30.0, t0())], t0());
        agg.ingest_conflicts(&[conflict("c1", "UA", 48.0, 36.0, t0())], t0());

        let clusters = agg.get_country_clusters(t0());
        assert_eq!(clusters.len(), 1);
        let ua = &clusters[0];
        assert_eq!(ua.country_code, "UA");
        assert_eq!(ua.event_count, 2);
        assert_eq!(ua.contributing_event_ids, vec!["c1", "p1"]);
        assert_eq!(ua.center_lat, 49.0);
        assert_eq!(ua.center_lon, 33.0);
        // 2 kinds * 20 + 2 events * 2 + mean(0.6, 0.5) * 20
        assert!((ua.convergence_score - 55.0).abs() < 1e-9);
    }

    #[test]
    fn test_cluster_score_caps() {
        assert_eq!(cluster_score(9, 100, 1.0), 100.0);
        assert_eq!(cluster_score(2, 50, 0.0), 70.0);
    }

    #[test]
    fn test_country_only_news_counts_toward_clusters() {
        let mut agg = SignalAggregator::default();
        agg.ingest_protests(&[protest("p1", "Iran", 35.7, 51.4, t0())], t0());
        let report = agg.ingest_news_clusters(
            &[headline("n1", "Iranian navy drills in the Gulf", t0())],
            t0(),
        );

        assert_eq!(report.country_only, 1);
        assert_eq!(agg.grid().len(), 1);
        let clusters = agg.get_country_clusters(t0());
        assert_eq!(clusters.len(), 1);
        // Located events decide the center
        assert_eq!((clusters[0].center_lat, clusters[0].center_lon), (35.7, 51.4));
    }

    #[test]
    fn test_malformed_records_do_not_block_batch() {
        let mut agg = SignalAggregator::default();
        let mut bad = protest("bad", "UA", 0.0, 0.0, t0());
        bad.lat = None;
        let report = agg.ingest_protests(
            &[protest("p1", "UA", 50.0, 30.0, t0()), bad, protest("p2", "UA", 50.0, 30.0, t0())],
            t0(),
        );

        assert_eq!(report.accepted, 2);
        assert_eq!(report.dropped, 1);
        assert_eq!(report.total(), 3);
    }

    #[test]
    fn test_regional_grouping() {
        let mut agg = SignalAggregator::default();
        agg.ingest_protests(
            &[
                protest("ua", "UA", 50.4, 30.5, t0()),
                protest("pl", "PL", 52.2, 21.0, t0()),
                protest("jp", "JP", 35.7, 139.7, t0()),
            ],
            t0(),
        );
        agg.ingest_conflicts(
            &[
                conflict("ua-c", "UA", 48.5, 37.5, t0()),
                conflict("jp-c", "JP", 35.0, 135.0, t0()),
            ],
            t0(),
        );
        agg.ingest_military_flights(&[flight("pl-f", 52.0, 20.0, t0())], t0());

        let regions = agg.get_regional_convergence(t0());
        assert_eq!(regions.len(), 1);
        let mut countries = regions[0].countries.clone();
        countries.sort();
        assert_eq!(countries, vec!["PL", "UA"]);
        assert!(regions[0].signal_types.contains(&SignalKind::MilitaryFlight));
        assert!(regions[0].description.contains("Ukraine"));
    }

    #[test]
    fn test_regional_grouping_chains_through_neighbours() {
        let mut agg = SignalAggregator::default();
        let sites = [
            ("FR", 48.0, 2.0, 3),
            ("DE", 50.0, 12.0, 2),
            ("UA", 50.0, 24.0, 1),
            ("JP", 35.7, 139.7, 4),
            ("KR", 37.5, 127.0, 1),
        ];
        for (code, lat, lon, protests) in sites {
            let batch: Vec<_> = (0..protests)
                .map(|i| protest(&format!("{code}-p{i}"), code, lat, lon, t0()))
                .collect();
            agg.ingest_protests(&batch, t0());
        }
        let conflicts: Vec<_> = sites
            .iter()
            .map(|(code, lat, lon, _)| conflict(&format!("{code}-c"), code, *lat, *lon, t0()))
            .collect();
        agg.ingest_conflicts(&conflicts, t0());

        // FR-DE and DE-UA are under 1500 km apart, FR-UA is not
        let regions = agg.get_regional_convergence(t0());
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].countries, vec!["JP", "KR"]);
        assert_eq!(regions[1].countries, vec!["FR", "DE", "UA"]);
        assert!(regions[1]
            .description
            .starts_with("Regional convergence: France, Germany and Ukraine"));
    }

    #[test]
    fn test_clusters_are_deterministic() {
        let mut agg = SignalAggregator::default();
        agg.ingest_protests(&[protest("p1", "SY", 33.5, 36.3, t0())], t0());
        agg.ingest_conflicts(&[conflict("c1", "SY", 35.0, 38.0, t0())], t0());
        agg.ingest_earthquakes(&[quake("q1", 36.0, 37.0, t0())], t0());

        assert_eq!(agg.get_country_clusters(t0()), agg.get_country_clusters(t0()));
        assert_eq!(agg.country_tallies(t0()), agg.country_tallies(t0()));
    }

    #[test]
    fn test_expired_signals_leave_tallies() {
        let mut agg = SignalAggregator::default();
        agg.ingest_military_flights(&[flight("f1", 50.4, 30.5, t0())], t0());
        assert_eq!(agg.military_positions(t0()).len(), 1);

        let later = t0() + Duration::hours(3);
        assert!(agg.military_positions(later).is_empty());
        assert!(agg.get_country_data("UA", later).is_none());
        assert_eq!(agg.evict_expired(later), 1);
        assert!(agg.grid().is_empty());
    }

    #[test]
    fn test_position_batch_replaces_previous_positions() {
        let mut agg = SignalAggregator::default();
        agg.ingest_military_flights(
            &[flight("f1", 50.4, 30.5, t0()), flight("f2", 35.7, 51.4, t0())],
            t0(),
        );
        assert_eq!(agg.military_positions(t0()).len(), 2);

        let next = t0() + Duration::minutes(5);
        let report = agg.ingest_military_flights(&[flight("f2", 35.8, 51.5, next)], next);
        assert_eq!(report.evicted, 2);
        assert_eq!(report.accepted, 1);
        assert_eq!(agg.military_positions(next), vec![(35.8, 51.5)]);
        assert!(agg.grid().get("f1").is_none());

        // Other kinds keep accumulating until they age out
        agg.ingest_protests(&[protest("p1", "UA", 50.4, 30.5, t0())], t0());
        agg.ingest_protests(&[protest("p2", "UA", 50.4, 30.5, next)], next);
        assert_eq!(agg.get_country_data("UA", next).unwrap().count(SignalKind::Protest), 2);
    }

    #[test]
    fn test_describe_kinds() {
        let kinds = [SignalKind::Protest, SignalKind::Earthquake, SignalKind::Outage];
        assert_eq!(describe_kinds(&kinds), "protests, earthquakes and internet outages");
        assert_eq!(describe_kinds(&kinds[..1]), "protests");
    }
}
