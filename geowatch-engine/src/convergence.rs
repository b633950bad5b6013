//! Geo-Convergence Detector
//!
//! Watches grid cells for several distinct signal kinds happening in the same
//! place. Each cell runs a small state machine:
//! - quiet: nothing tracked
//! - alerting: the cell just crossed the threshold and one alert went out
//! - cooldown: the cell is tracked but may not re-fire until the cooldown ends
//!
//! After the cooldown a cell that still qualifies alerts again. A cell whose
//! contributing events have all aged out is dropped back to quiet and its key
//! removed from the caller's seen set.

use chrono::{DateTime, Duration, Utc};
use geowatch_core::{haversine_km, mean_point, CellKey, NormalizedEvent, SignalKind, SpatialGrid};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::aggregator::describe_kinds;
use crate::config::{hours, ConvergenceConfig};

/// A multi-kind convergence in one grid cell
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConvergenceAlert {
    /// Dedup key, "geo:<lat_bucket>:<lon_bucket>"
    pub id: String,
    pub cell_key: CellKey,
    pub signal_kinds: BTreeSet<SignalKind>,
    pub first_seen_at: DateTime<Utc>,
    pub last_alerted_at: DateTime<Utc>,
    pub center_lat: f64,
    pub center_lon: f64,
    pub event_count: usize,
    /// 0 - 100
    pub score: f64,
    pub countries: BTreeSet<String>,
    pub contributing_event_ids: Vec<String>,
}

/// Alert score: kinds dominate, volume adds at most 25
pub fn alert_score(kinds: usize, events: usize) -> f64 {
    (kinds as f64 * 25.0 + (events as f64 * 2.0).min(25.0)).min(100.0)
}

/// Dedup key for a cell
pub fn alert_key(cell: CellKey) -> String {
    format!("geo:{cell}")
}

/// What a cell looks like right now
struct CellView {
    kinds: BTreeSet<SignalKind>,
    events: Vec<Arc<NormalizedEvent>>,
}

impl CellView {
    fn alert(&self, cell: CellKey, first_seen_at: DateTime<Utc>, now: DateTime<Utc>) -> ConvergenceAlert {
        let (center_lat, center_lon) =
            mean_point(self.events.iter().map(|e| (e.lat, e.lon))).unwrap_or_default();
        let mut ids: Vec<String> = self.events.iter().map(|e| e.id.clone()).collect();
        ids.sort();

        ConvergenceAlert {
            id: alert_key(cell),
            cell_key: cell,
            signal_kinds: self.kinds.clone(),
            first_seen_at,
            last_alerted_at: now,
            center_lat,
            center_lon,
            event_count: self.events.len(),
            score: alert_score(self.kinds.len(), self.events.len()),
            countries: self
                .events
                .iter()
                .filter_map(|e| e.country_code.clone())
                .collect(),
            contributing_event_ids: ids,
        }
    }
}

/// A tracked (alerting or cooling down) cell
#[derive(Debug, Clone)]
struct CellState {
    alert: ConvergenceAlert,
    cooldown_until: DateTime<Utc>,
    /// Whether the cell met `min_kinds` on the latest scan
    qualifying: bool,
}

/// The detector. Holds per-cell state between calls.
#[derive(Debug, Clone)]
pub struct ConvergenceDetector {
    config: ConvergenceConfig,
    cells: BTreeMap<CellKey, CellState>,
}

impl ConvergenceDetector {
    pub fn new(config: ConvergenceConfig) -> Self {
        Self {
            config,
            cells: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &ConvergenceConfig {
        &self.config
    }

    fn window(&self) -> Duration {
        hours(self.config.window_hours)
    }

    fn cooldown(&self) -> Duration {
        hours(self.config.cooldown_hours)
    }

    fn view(&self, grid: &SpatialGrid, cell: CellKey, now: DateTime<Utc>) -> CellView {
        let window = self.window();
        let events: Vec<_> = grid
            .query_cell(cell, self.config.neighbor_radius, now)
            .into_iter()
            .filter(|e| e.is_within(window, now))
            .collect();
        CellView {
            kinds: events.iter().map(|e| e.kind).collect(),
            events,
        }
    }

    /// Scan the grid and return newly fired alerts, in cell order
    pub fn detect_geo_convergence(
        &mut self,
        grid: &SpatialGrid,
        seen_alerts: &mut HashSet<String>,
        now: DateTime<Utc>,
    ) -> Vec<ConvergenceAlert> {
        let cooldown = self.cooldown();
        let mut qualifying = BTreeSet::new();
        let mut fired = Vec::new();

        for cell in grid.occupied_cells() {
            let view = self.view(grid, cell, now);
            if view.kinds.len() < self.config.min_kinds {
                continue;
            }
            qualifying.insert(cell);
            let key = alert_key(cell);

            match self.cells.get_mut(&cell) {
                Some(state) if now < state.cooldown_until => {
                    state.qualifying = true;
                    debug!("Cell {} in cooldown until {}", cell, state.cooldown_until);
                }
                Some(state) => {
                    state.qualifying = true;
                    state.alert = view.alert(cell, state.alert.first_seen_at, now);
                    state.cooldown_until = now + cooldown;
                    seen_alerts.insert(key);
                    info!(
                        "Convergence re-alert at {}: {}",
                        cell,
                        describe_kinds(&state.alert.signal_kinds)
                    );
                    fired.push(state.alert.clone());
                }
                None => {
                    let alert = view.alert(cell, now, now);
                    if seen_alerts.contains(&key) {
                        debug!("Cell {} already alerted this session", cell);
                    } else {
                        seen_alerts.insert(key);
                        info!(
                            "Convergence alert at {}: {} ({} events, score {:.0})",
                            cell,
                            describe_kinds(&alert.signal_kinds),
                            alert.event_count,
                            alert.score
                        );
                        fired.push(alert.clone());
                    }
                    self.cells.insert(
                        cell,
                        CellState {
                            alert,
                            cooldown_until: now + cooldown,
                            qualifying: true,
                        },
                    );
                }
            }
        }

        let window = self.window();
        let retention = grid.retention();
        self.cells.retain(|cell, state| {
            if qualifying.contains(cell) {
                return true;
            }
            state.qualifying = false;
            if now < state.cooldown_until {
                return true;
            }
            let still_live = state.alert.contributing_event_ids.iter().any(|id| {
                grid.get(id)
                    .is_some_and(|e| retention.is_live(e, now) && e.is_within(window, now))
            });
            if !still_live {
                debug!("Cell {} back to quiet", cell);
                seen_alerts.remove(&alert_key(*cell));
            }
            still_live
        });

        fired
    }

    /// Alerts whose cells still qualify, highest score first. Cells cooling
    /// down after their kinds dropped below `min_kinds` stay tracked but are
    /// not listed.
    pub fn active_alerts(&self) -> Vec<&ConvergenceAlert> {
        let mut alerts: Vec<_> = self
            .cells
            .values()
            .filter(|s| s.qualifying)
            .map(|s| &s.alert)
            .collect();
        alerts.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        alerts
    }

    /// Active alerts centered within `radius_km` of a point
    pub fn alerts_near(&self, lat: f64, lon: f64, radius_km: f64) -> Vec<&ConvergenceAlert> {
        self.active_alerts()
            .into_iter()
            .filter(|a| haversine_km(lat, lon, a.center_lat, a.center_lon) <= radius_km)
            .collect()
    }

    /// Whether a cell is currently tracked
    pub fn is_tracked(&self, cell: CellKey) -> bool {
        self.cells.contains_key(&cell)
    }

    /// Forget all state (for testing)
    pub fn clear(&mut self) {
        self.cells.clear();
    }
}

impl Default for ConvergenceDetector {
    fn default() -> Self {
        Self::new(ConvergenceConfig::default())
    }
}

/// Alert record in the shape the alert panel consumes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplaySignal {
    pub id: String,
    pub signal_type: String,
    pub title: String,
    pub description: String,
    /// 0.0 - 1.0
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

/// Convert an alert for display. Pure: the id is derived from the cell and
/// alert time.
pub fn geo_convergence_to_signal(alert: &ConvergenceAlert) -> DisplaySignal {
    let name = format!("{}@{}", alert.id, alert.last_alerted_at.to_rfc3339());
    let id = Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes());

    let ns = if alert.center_lat >= 0.0 { 'N' } else { 'S' };
    let ew = if alert.center_lon >= 0.0 { 'E' } else { 'W' };
    let location = format!(
        "{:.1}°{}, {:.1}°{}",
        alert.center_lat.abs(),
        ns,
        alert.center_lon.abs(),
        ew
    );
    let countries: Vec<&str> = alert.countries.iter().map(String::as_str).collect();
    let place = if countries.is_empty() {
        location.clone()
    } else {
        format!("{} ({})", location, countries.join(", "))
    };

    DisplaySignal {
        id: id.to_string(),
        signal_type: "geo_convergence".to_string(),
        title: format!("Geographic Convergence ({} types)", alert.signal_kinds.len()),
        description: format!(
            "{} reported near {}: {} events in the last day",
            capitalize(&describe_kinds(&alert.signal_kinds)),
            place,
            alert.event_count
        ),
        confidence: (alert.score / 100.0).clamp(0.0, 1.0),
        timestamp: alert.last_alerted_at,
        data: serde_json::json!({
            "cellKey": alert.cell_key.to_string(),
            "signalTypes": alert.signal_kinds,
            "eventCount": alert.event_count,
            "centerLat": alert.center_lat,
            "centerLon": alert.center_lon,
            "countries": alert.countries,
            "firstSeenAt": alert.first_seen_at,
        }),
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn event(id: &str, kind: SignalKind, lat: f64, lon: f64, at: DateTime<Utc>) -> NormalizedEvent {
        NormalizedEvent::builder(kind, lat, lon)
            .id(id)
            .timestamp(at)
            .country(Some("UA"))
            .build()
    }

    /// 5 protests and 4 military flights inside the 50..52 / 30..32 cell
    fn scenario_a() -> SpatialGrid {
        let mut grid = SpatialGrid::default();
        for i in 0..5 {
            grid.insert(
                event(&format!("p{i}"), SignalKind::Protest, 50.2 + i as f64 * 0.1, 30.3, t0()),
                t0(),
            );
        }
        for i in 0..4 {
            grid.insert(
                event(&format!("f{i}"), SignalKind::MilitaryFlight, 51.0, 30.5 + i as f64 * 0.2, t0()),
                t0(),
            );
        }
        grid
    }

    fn scenario_b() -> SpatialGrid {
        let mut grid = scenario_a();
        grid.insert(event("q1", SignalKind::Earthquake, 51.5, 31.5, t0()), t0());
        grid
    }

    #[test]
    fn test_two_kinds_do_not_alert() {
        let mut detector = ConvergenceDetector::default();
        let mut seen = HashSet::new();
        let alerts = detector.detect_geo_convergence(&scenario_a(), &mut seen, t0());

        assert!(alerts.is_empty());
        assert!(seen.is_empty());
    }

    #[test]
    fn test_third_kind_alerts_once() {
        let mut detector = ConvergenceDetector::default();
        let mut seen = HashSet::new();
        let alerts = detector.detect_geo_convergence(&scenario_b(), &mut seen, t0());

        assert_eq!(alerts.len(), 1);
        let alert = &alerts[0];
        assert_eq!(
            alert.signal_kinds,
            BTreeSet::from([SignalKind::Protest, SignalKind::MilitaryFlight, SignalKind::Earthquake])
        );
        assert_eq!(alert.cell_key, CellKey { lat: 25, lon: 15 });
        assert_eq!(alert.event_count, 10);
        // 3 * 25 + min(25, 20)
        assert_eq!(alert.score, 95.0);
        assert!(seen.contains("geo:25:15"));
    }

    #[test]
    fn test_immediate_repeat_is_deduplicated() {
        let grid = scenario_b();
        let mut detector = ConvergenceDetector::default();
        let mut seen = HashSet::new();

        assert_eq!(detector.detect_geo_convergence(&grid, &mut seen, t0()).len(), 1);
        assert!(detector.detect_geo_convergence(&grid, &mut seen, t0()).is_empty());

        // A fresh detector sharing the session's seen set stays quiet too
        let mut other = ConvergenceDetector::default();
        assert!(other.detect_geo_convergence(&grid, &mut seen, t0()).is_empty());
        assert!(other.is_tracked(CellKey { lat: 25, lon: 15 }));
    }

    #[test]
    fn test_detection_is_deterministic() {
        let grid = scenario_b();
        let run = || {
            let mut detector = ConvergenceDetector::default();
            let mut seen = HashSet::new();
            detector.detect_geo_convergence(&grid, &mut seen, t0())
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_sustained_convergence_realerts_after_cooldown() {
        let mut grid = scenario_b();
        let mut detector = ConvergenceDetector::default();
        let mut seen = HashSet::new();
        detector.detect_geo_convergence(&grid, &mut seen, t0());

        let during = t0() + Duration::hours(5);
        assert!(detector.detect_geo_convergence(&grid, &mut seen, during).is_empty());

        // Fresh flights keep the convergence alive past the 2h flight retention
        let after = t0() + Duration::hours(7);
        grid.insert(event("f9", SignalKind::MilitaryFlight, 51.0, 31.0, after), after);
        let alerts = detector.detect_geo_convergence(&grid, &mut seen, after);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].first_seen_at, t0());
        assert_eq!(alerts[0].last_alerted_at, after);
    }

    #[test]
    fn test_aged_out_cell_returns_to_quiet() {
        let grid = scenario_b();
        let mut detector = ConvergenceDetector::default();
        let mut seen = HashSet::new();
        detector.detect_geo_convergence(&grid, &mut seen, t0());

        // Past cooldown, flights have expired; protests and the quake remain
        let later = t0() + Duration::hours(7);
        assert!(detector.detect_geo_convergence(&grid, &mut seen, later).is_empty());
        assert!(detector.is_tracked(CellKey { lat: 25, lon: 15 }));

        // Past the 24h convergence window nothing contributes any more
        let much_later = t0() + Duration::hours(25);
        assert!(detector.detect_geo_convergence(&grid, &mut seen, much_later).is_empty());
        assert!(!detector.is_tracked(CellKey { lat: 25, lon: 15 }));
        assert!(seen.is_empty());
    }

    #[test]
    fn test_neighbor_radius_widens_the_check() {
        let mut grid = SpatialGrid::default();
        grid.insert(event("p", SignalKind::Protest, 50.5, 30.5, t0()), t0());
        grid.insert(event("f", SignalKind::MilitaryFlight, 52.5, 30.5, t0()), t0());
        grid.insert(event("q", SignalKind::Earthquake, 50.5, 32.5, t0()), t0());

        let mut seen = HashSet::new();
        assert!(ConvergenceDetector::default()
            .detect_geo_convergence(&grid, &mut seen, t0())
            .is_empty());

        let config = ConvergenceConfig {
            neighbor_radius: 1,
            ..Default::default()
        };
        let alerts = ConvergenceDetector::new(config).detect_geo_convergence(&grid, &mut seen, t0());
        assert!(!alerts.is_empty());
    }

    #[test]
    fn test_alerts_near() {
        let mut detector = ConvergenceDetector::default();
        let mut seen = HashSet::new();
        detector.detect_geo_convergence(&scenario_b(), &mut seen, t0());

        assert_eq!(detector.alerts_near(50.45, 30.52, 300.0).len(), 1);
        assert!(detector.alerts_near(35.7, 139.7, 300.0).is_empty());
    }

    #[test]
    fn test_cooling_cell_that_stops_qualifying_is_not_active() {
        let grid = scenario_b();
        let mut detector = ConvergenceDetector::default();
        let mut seen = HashSet::new();
        detector.detect_geo_convergence(&grid, &mut seen, t0());
        assert_eq!(detector.active_alerts().len(), 1);

        // Flights expire after 2h, leaving two kinds while the cooldown runs
        let later = t0() + Duration::hours(3);
        assert!(detector.detect_geo_convergence(&grid, &mut seen, later).is_empty());
        assert!(detector.is_tracked(CellKey { lat: 25, lon: 15 }));
        assert!(detector.active_alerts().is_empty());
        assert!(detector.alerts_near(50.45, 30.52, 300.0).is_empty());

        // A fresh flight brings the cell back without a new alert
        let mut grid = grid;
        grid.insert(event("f9", SignalKind::MilitaryFlight, 51.0, 31.0, later), later);
        assert!(detector.detect_geo_convergence(&grid, &mut seen, later).is_empty());
        assert_eq!(detector.active_alerts().len(), 1);
    }

    #[test]
    fn test_display_signal_is_pure() {
        let mut detector = ConvergenceDetector::default();
        let mut seen = HashSet::new();
        let alert = detector
            .detect_geo_convergence(&scenario_b(), &mut seen, t0())
            .remove(0);

        let a = geo_convergence_to_signal(&alert);
        let b = geo_convergence_to_signal(&alert);
        assert_eq!(a, b);
        assert_eq!(a.signal_type, "geo_convergence");
        assert_eq!(a.confidence, 0.95);
        assert_eq!(a.title, "Geographic Convergence (3 types)");
        assert!(a.description.starts_with("Protests, military flights and earthquakes"));
        assert_eq!(a.data["cellKey"], "25:15");
    }
}
