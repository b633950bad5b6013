//! Signal board - shared snapshot of derived signals
//!
//! The monitor republishes instability scores, active convergence alerts and
//! military positions here after every cycle. The escalation tracker reads
//! them back through the capability traits, so it never holds a reference to
//! the monitor itself.

use geowatch_core::haversine_km;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::convergence::ConvergenceAlert;
use crate::{CiiSource, ConvergenceSource, MilitarySource};

#[derive(Debug, Default)]
struct BoardState {
    cii: HashMap<String, f64>,
    alerts: Vec<(f64, f64)>,
    military: Vec<(f64, f64)>,
}

/// Cheaply clonable handle to the shared snapshot
#[derive(Debug, Clone, Default)]
pub struct SignalBoard {
    inner: Arc<RwLock<BoardState>>,
}

impl SignalBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the instability scores
    pub fn publish_cii<I>(&self, scores: I)
    where
        I: IntoIterator<Item = (String, f64)>,
    {
        self.inner.write().cii = scores
            .into_iter()
            .map(|(code, score)| (code.to_ascii_uppercase(), score))
            .collect();
    }

    /// Replace the active alert positions
    pub fn publish_alerts<'a, I>(&self, alerts: I)
    where
        I: IntoIterator<Item = &'a ConvergenceAlert>,
    {
        self.inner.write().alerts = alerts
            .into_iter()
            .map(|a| (a.center_lat, a.center_lon))
            .collect();
    }

    /// Replace the military positions
    pub fn publish_military(&self, positions: Vec<(f64, f64)>) {
        self.inner.write().military = positions;
    }

    fn count_near(points: &[(f64, f64)], lat: f64, lon: f64, radius_km: f64) -> usize {
        points
            .iter()
            .filter(|(p_lat, p_lon)| haversine_km(lat, lon, *p_lat, *p_lon) <= radius_km)
            .count()
    }
}

impl CiiSource for SignalBoard {
    fn country_score(&self, country_code: &str) -> Option<f64> {
        self.inner
            .read()
            .cii
            .get(&country_code.to_ascii_uppercase())
            .copied()
    }
}

impl ConvergenceSource for SignalBoard {
    fn alerts_near(&self, lat: f64, lon: f64, radius_km: f64) -> usize {
        Self::count_near(&self.inner.read().alerts, lat, lon, radius_km)
    }
}

impl MilitarySource for SignalBoard {
    fn military_near(&self, lat: f64, lon: f64, radius_km: f64) -> usize {
        Self::count_near(&self.inner.read().military, lat, lon, radius_km)
    }
}
