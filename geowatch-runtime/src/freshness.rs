//! Data Freshness Tracker
//!
//! Remembers when each upstream source last delivered, so a quiet map is
//! never mistaken for a calm world:
//! - fresh under 15 minutes, stale under 2 hours, very stale under 6 hours
//! - anything older counts as no data
//! - sources the risk picture depends on turn gaps critical

use chrono::{DateTime, Duration, Utc};
use geowatch_core::{DataSourceId, DATA_SOURCES};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::warn;

/// Freshness of one source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FreshnessStatus {
    Fresh,
    Stale,
    VeryStale,
    NoData,
    Disabled,
    Error,
}

impl FreshnessStatus {
    /// Delivering data, however old
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            FreshnessStatus::Fresh | FreshnessStatus::Stale | FreshnessStatus::VeryStale
        )
    }
}

/// Overall verdict on whether risk scores can be trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Coverage {
    Sufficient,
    Limited,
    Insufficient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GapSeverity {
    Critical,
    Warning,
}

/// A source whose absence hides a class of events
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntelligenceGap {
    pub source: DataSourceId,
    pub message: &'static str,
    pub severity: GapSeverity,
}

/// Snapshot of one source
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceState {
    pub id: DataSourceId,
    pub last_update: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Items received since start
    pub item_count: usize,
    pub enabled: bool,
    pub required_for_risk: bool,
    pub status: FreshnessStatus,
}

/// Summary across all sources
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FreshnessSummary {
    pub total_sources: usize,
    pub active_sources: usize,
    pub stale_sources: usize,
    pub disabled_sources: usize,
    pub error_sources: usize,
    pub overall: Coverage,
    /// Active share of risk-critical sources, 0 - 100
    pub coverage_percent: u32,
    pub oldest_update: Option<DateTime<Utc>>,
    pub newest_update: Option<DateTime<Utc>>,
}

/// Active risk sources needed for a sufficient picture
const CORE_SOURCES: usize = 2;

/// Coverage needed on top of that
const SUFFICIENT_COVERAGE: u32 = 66;

#[derive(Debug, Clone)]
struct Entry {
    last_update: Option<DateTime<Utc>>,
    last_error: Option<String>,
    item_count: usize,
    enabled: bool,
}

/// The tracker
#[derive(Debug, Clone)]
pub struct FreshnessTracker {
    sources: BTreeMap<DataSourceId, Entry>,
}

impl FreshnessTracker {
    /// Every known source, enabled, with no data yet
    pub fn new() -> Self {
        let sources = DATA_SOURCES
            .iter()
            .map(|s| {
                (
                    s.id,
                    Entry {
                        last_update: None,
                        last_error: None,
                        item_count: 0,
                        enabled: true,
                    },
                )
            })
            .collect();
        Self { sources }
    }

    /// A source delivered `count` items
    pub fn record_update(&mut self, source: DataSourceId, count: usize, now: DateTime<Utc>) {
        if let Some(entry) = self.sources.get_mut(&source) {
            entry.last_update = Some(now);
            entry.item_count += count;
            entry.last_error = None;
        }
    }

    /// A source failed
    pub fn record_error(&mut self, source: DataSourceId, error: impl Into<String>) {
        if let Some(entry) = self.sources.get_mut(&source) {
            let error = error.into();
            warn!("Data source {} failed: {}", source, error);
            entry.last_error = Some(error);
        }
    }

    pub fn set_enabled(&mut self, source: DataSourceId, enabled: bool) {
        if let Some(entry) = self.sources.get_mut(&source) {
            entry.enabled = enabled;
        }
    }

    fn status_of(entry: &Entry, now: DateTime<Utc>) -> FreshnessStatus {
        if !entry.enabled {
            return FreshnessStatus::Disabled;
        }
        if entry.last_error.is_some() {
            return FreshnessStatus::Error;
        }
        let Some(last) = entry.last_update else {
            return FreshnessStatus::NoData;
        };
        let age = now - last;
        if age < Duration::minutes(15) {
            FreshnessStatus::Fresh
        } else if age < Duration::hours(2) {
            FreshnessStatus::Stale
        } else if age < Duration::hours(6) {
            FreshnessStatus::VeryStale
        } else {
            FreshnessStatus::NoData
        }
    }

    pub fn status(&self, source: DataSourceId, now: DateTime<Utc>) -> FreshnessStatus {
        self.sources
            .get(&source)
            .map_or(FreshnessStatus::NoData, |e| Self::status_of(e, now))
    }

    /// Every source, in registry order
    pub fn sources(&self, now: DateTime<Utc>) -> Vec<SourceState> {
        self.sources
            .iter()
            .map(|(id, entry)| SourceState {
                id: *id,
                last_update: entry.last_update,
                last_error: entry.last_error.clone(),
                item_count: entry.item_count,
                enabled: entry.enabled,
                required_for_risk: id.metadata().required_for_risk,
                status: Self::status_of(entry, now),
            })
            .collect()
    }

    pub fn summary(&self, now: DateTime<Utc>) -> FreshnessSummary {
        let sources = self.sources(now);
        let risk: Vec<&SourceState> = sources.iter().filter(|s| s.required_for_risk).collect();
        let active_risk = risk.iter().filter(|s| s.status.is_active()).count();

        let coverage_percent = if risk.is_empty() {
            0
        } else {
            (active_risk as f64 / risk.len() as f64 * 100.0).round() as u32
        };
        let overall = if active_risk >= CORE_SOURCES && coverage_percent >= SUFFICIENT_COVERAGE {
            Coverage::Sufficient
        } else if active_risk >= 1 {
            Coverage::Limited
        } else {
            Coverage::Insufficient
        };

        let count = |f: fn(&FreshnessStatus) -> bool| sources.iter().filter(|s| f(&s.status)).count();
        let updates = sources.iter().filter_map(|s| s.last_update);

        FreshnessSummary {
            total_sources: sources.len(),
            active_sources: count(FreshnessStatus::is_active),
            stale_sources: count(|s| matches!(s, FreshnessStatus::Stale | FreshnessStatus::VeryStale)),
            disabled_sources: count(|s| *s == FreshnessStatus::Disabled),
            error_sources: count(|s| *s == FreshnessStatus::Error),
            overall,
            coverage_percent,
            oldest_update: updates.clone().min(),
            newest_update: updates.max(),
        }
    }

    /// Sources with no usable data, critical ones first
    pub fn intelligence_gaps(&self, now: DateTime<Utc>) -> Vec<IntelligenceGap> {
        let mut gaps: Vec<IntelligenceGap> = self
            .sources(now)
            .into_iter()
            .filter(|s| {
                matches!(
                    s.status,
                    FreshnessStatus::NoData | FreshnessStatus::VeryStale | FreshnessStatus::Error
                )
            })
            .map(|s| IntelligenceGap {
                source: s.id,
                message: s.id.metadata().gap_message,
                severity: if s.required_for_risk || s.status == FreshnessStatus::Error {
                    GapSeverity::Critical
                } else {
                    GapSeverity::Warning
                },
            })
            .collect();
        // Stable: registry order within each severity
        gaps.sort_by_key(|g| g.severity);
        gaps
    }

    /// "just now", "5m ago", "3h ago", "2d ago" or "never"
    pub fn time_since(&self, source: DataSourceId, now: DateTime<Utc>) -> String {
        let Some(last) = self.sources.get(&source).and_then(|e| e.last_update) else {
            return "never".to_string();
        };
        let age = now - last;
        if age < Duration::minutes(1) {
            "just now".to_string()
        } else if age < Duration::hours(1) {
            format!("{}m ago", age.num_minutes())
        } else if age < Duration::days(1) {
            format!("{}h ago", age.num_hours())
        } else {
            format!("{}d ago", age.num_days())
        }
    }
}

impl Default for FreshnessTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_status_thresholds() {
        let mut tracker = FreshnessTracker::new();
        assert_eq!(tracker.status(DataSourceId::Usgs, t0()), FreshnessStatus::NoData);

        tracker.record_update(DataSourceId::Usgs, 12, t0());
        let at = |m: i64| tracker.status(DataSourceId::Usgs, t0() + Duration::minutes(m));
        assert_eq!(at(14), FreshnessStatus::Fresh);
        assert_eq!(at(15), FreshnessStatus::Stale);
        assert_eq!(at(119), FreshnessStatus::Stale);
        assert_eq!(at(120), FreshnessStatus::VeryStale);
        assert_eq!(at(359), FreshnessStatus::VeryStale);
        assert_eq!(at(360), FreshnessStatus::NoData);
    }

    #[test]
    fn test_error_and_disabled() {
        let mut tracker = FreshnessTracker::new();
        tracker.record_update(DataSourceId::Ais, 3, t0());
        tracker.record_error(DataSourceId::Ais, "timeout");
        assert_eq!(tracker.status(DataSourceId::Ais, t0()), FreshnessStatus::Error);

        tracker.record_update(DataSourceId::Ais, 1, t0());
        assert_eq!(tracker.status(DataSourceId::Ais, t0()), FreshnessStatus::Fresh);

        tracker.set_enabled(DataSourceId::Ais, false);
        assert_eq!(tracker.status(DataSourceId::Ais, t0()), FreshnessStatus::Disabled);
        let ais = tracker
            .sources(t0())
            .into_iter()
            .find(|s| s.id == DataSourceId::Ais)
            .unwrap();
        assert_eq!(ais.item_count, 4);
    }

    #[test]
    fn test_summary_coverage() {
        let mut tracker = FreshnessTracker::new();
        assert_eq!(tracker.summary(t0()).overall, Coverage::Insufficient);

        tracker.record_update(DataSourceId::Gdelt, 10, t0());
        let summary = tracker.summary(t0());
        assert_eq!(summary.overall, Coverage::Limited);
        assert_eq!(summary.coverage_percent, 50);

        tracker.record_update(DataSourceId::Rss, 40, t0() + Duration::minutes(1));
        let summary = tracker.summary(t0() + Duration::minutes(1));
        assert_eq!(summary.overall, Coverage::Sufficient);
        assert_eq!(summary.coverage_percent, 100);
        assert_eq!(summary.active_sources, 2);
        assert_eq!(summary.oldest_update, Some(t0()));
        assert_eq!(summary.newest_update, Some(t0() + Duration::minutes(1)));
    }

    #[test]
    fn test_gaps_critical_first() {
        let mut tracker = FreshnessTracker::new();
        tracker.record_update(DataSourceId::Gdelt, 5, t0());
        tracker.record_update(DataSourceId::Opensky, 5, t0());
        tracker.record_error(DataSourceId::Usgs, "HTTP 503");

        let gaps = tracker.intelligence_gaps(t0());
        let critical: Vec<_> = gaps
            .iter()
            .take_while(|g| g.severity == GapSeverity::Critical)
            .map(|g| g.source)
            .collect();
        assert_eq!(critical, vec![DataSourceId::Usgs, DataSourceId::Rss]);
        assert!(gaps.iter().all(|g| g.source != DataSourceId::Gdelt));
        assert!(gaps.iter().all(|g| g.source != DataSourceId::Opensky));
        assert!(gaps[2..].iter().all(|g| g.severity == GapSeverity::Warning));
    }

    #[test]
    fn test_time_since() {
        let mut tracker = FreshnessTracker::new();
        assert_eq!(tracker.time_since(DataSourceId::Rss, t0()), "never");
        tracker.record_update(DataSourceId::Rss, 1, t0());
        assert_eq!(tracker.time_since(DataSourceId::Rss, t0() + Duration::seconds(30)), "just now");
        assert_eq!(tracker.time_since(DataSourceId::Rss, t0() + Duration::minutes(5)), "5m ago");
        assert_eq!(tracker.time_since(DataSourceId::Rss, t0() + Duration::hours(3)), "3h ago");
    }
}
