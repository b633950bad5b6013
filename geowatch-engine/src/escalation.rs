//! Hotspot Escalation Tracker
//!
//! Keeps one escalation score per hotspot. Each update decays the previous
//! excess over baseline, then adds fresh pressure:
//! - headline matches, breaking news and match velocity
//! - the instability of the hotspot's countries
//! - nearby convergence alerts and military activity (both capped)
//!
//! Between updates `decay_tick` pulls every score back toward baseline.

use chrono::{DateTime, Utc};
use geowatch_core::NewsItem;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{hours, EscalationConfig};
use crate::hotspots::{Hotspot, HotspotRegistry};
use crate::instability::Trend;
use crate::{CiiSource, ConvergenceSource, EngineError, MilitarySource};

/// Scores closer than this to baseline snap to it
const SNAP_EPSILON: f64 = 0.01;

/// Score change below which the trend is stable
const TREND_EPSILON: f64 = 0.1;

/// Escalation level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationLevel {
    Low,
    Elevated,
    High,
}

impl EscalationLevel {
    pub fn from_score(score: f64, config: &EscalationConfig) -> Self {
        if score >= config.high_threshold {
            EscalationLevel::High
        } else if score >= config.elevated_threshold {
            EscalationLevel::Elevated
        } else {
            EscalationLevel::Low
        }
    }
}

impl fmt::Display for EscalationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EscalationLevel::Low => "low",
            EscalationLevel::Elevated => "elevated",
            EscalationLevel::High => "high",
        };
        f.write_str(s)
    }
}

/// What contributed to the last update
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct EscalationFactors {
    pub carried: f64,
    pub news: f64,
    pub instability: f64,
    pub convergence: f64,
    pub military: f64,
}

/// Escalation state of one hotspot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HotspotEscalation {
    pub hotspot_id: String,
    pub score: f64,
    pub level: EscalationLevel,
    pub last_match_count: usize,
    pub velocity: f64,
    pub has_breaking: bool,
    pub trend: Trend,
    pub factors: EscalationFactors,
    /// `None` until the first update
    pub updated_at: Option<DateTime<Utc>>,
}

impl HotspotEscalation {
    fn at_baseline(id: &str, config: &EscalationConfig) -> Self {
        Self {
            hotspot_id: id.to_string(),
            score: config.baseline,
            level: EscalationLevel::from_score(config.baseline, config),
            last_match_count: 0,
            velocity: 0.0,
            has_breaking: false,
            trend: Trend::Stable,
            factors: EscalationFactors::default(),
            updated_at: None,
        }
    }
}

/// The tracker
pub struct EscalationTracker {
    config: EscalationConfig,
    hotspots: HotspotRegistry,
    state: BTreeMap<String, HotspotEscalation>,
    cii: Arc<dyn CiiSource>,
    convergence: Arc<dyn ConvergenceSource>,
    military: Arc<dyn MilitarySource>,
}

impl EscalationTracker {
    pub fn new(
        config: EscalationConfig,
        hotspots: HotspotRegistry,
        cii: Arc<dyn CiiSource>,
        convergence: Arc<dyn ConvergenceSource>,
        military: Arc<dyn MilitarySource>,
    ) -> Self {
        let state = hotspots
            .iter()
            .map(|h| (h.id.clone(), HotspotEscalation::at_baseline(&h.id, &config)))
            .collect();
        Self {
            config,
            hotspots,
            state,
            cii,
            convergence,
            military,
        }
    }

    pub fn hotspots(&self) -> &HotspotRegistry {
        &self.hotspots
    }

    /// Highest CII among the hotspot's countries, 0 when none is scored
    fn instability_for(&self, hotspot: &Hotspot) -> f64 {
        hotspot
            .countries
            .iter()
            .filter_map(|code| self.cii.country_score(code))
            .filter(|s| s.is_finite())
            .fold(0.0, f64::max)
            .clamp(0.0, 100.0)
    }

    /// Recompute one hotspot's score
    pub fn update_hotspot_escalation(
        &mut self,
        hotspot_id: &str,
        match_count: usize,
        has_breaking: bool,
        velocity: f64,
        now: DateTime<Utc>,
    ) -> Result<&HotspotEscalation, EngineError> {
        let hotspot = self
            .hotspots
            .get(hotspot_id)
            .ok_or_else(|| EngineError::UnknownHotspot(hotspot_id.to_string()))?;
        let c = &self.config;

        let velocity = if velocity.is_finite() { velocity.max(0.0) } else { 0.0 };
        let previous = self
            .state
            .get(hotspot_id)
            .map_or(c.baseline, |s| s.score);

        let factors = EscalationFactors {
            carried: (previous - c.baseline) * c.decay,
            news: match_count as f64 * c.match_weight
                + if has_breaking { c.breaking_bonus } else { 0.0 }
                + velocity * c.velocity_weight,
            instability: c.cii_weight * self.instability_for(hotspot) / 100.0,
            convergence: (self
                .convergence
                .alerts_near(hotspot.lat, hotspot.lon, c.proximity_km) as f64
                * c.convergence_bonus)
                .min(c.convergence_cap),
            military: (self
                .military
                .military_near(hotspot.lat, hotspot.lon, c.proximity_km) as f64
                * c.military_weight)
                .min(c.military_cap),
        };
        let score = c.baseline
            + factors.carried
            + factors.news
            + factors.instability
            + factors.convergence
            + factors.military;

        let escalation = HotspotEscalation {
            hotspot_id: hotspot_id.to_string(),
            score,
            level: EscalationLevel::from_score(score, c),
            last_match_count: match_count,
            velocity,
            has_breaking,
            trend: Trend::from_delta(score - previous, TREND_EPSILON),
            factors,
            updated_at: Some(now),
        };

        if let Some(old) = self.state.get(hotspot_id) {
            if old.level != escalation.level {
                info!(
                    "Hotspot {} escalation {} -> {} (score {:.2})",
                    hotspot_id, old.level, escalation.level, score
                );
            }
        }

        let slot = self
            .state
            .entry(hotspot_id.to_string())
            .or_insert_with(|| HotspotEscalation::at_baseline(hotspot_id, &self.config));
        *slot = escalation;
        Ok(slot)
    }

    /// Match headlines against every hotspot and update each one. A hotspot
    /// that fails to update keeps its previous state.
    pub fn update_from_news(
        &mut self,
        items: &[NewsItem],
        now: DateTime<Utc>,
    ) -> Vec<HotspotEscalation> {
        let window = hours(self.config.news_window_hours);
        let activity = self.hotspots.match_news(items, window, now);

        let mut updated = Vec::with_capacity(activity.len());
        for a in activity {
            match self.update_hotspot_escalation(
                &a.hotspot_id,
                a.match_count,
                a.has_breaking,
                a.velocity,
                now,
            ) {
                Ok(escalation) => updated.push(escalation.clone()),
                Err(e) => warn!("Skipping escalation update for {}: {}", a.hotspot_id, e),
            }
        }
        updated
    }

    /// Decay every score toward baseline. Never raises a score.
    pub fn decay_tick(&mut self, now: DateTime<Utc>) {
        let c = &self.config;
        let mut decayed = 0;
        for escalation in self.state.values_mut() {
            if escalation.score <= c.baseline {
                escalation.trend = Trend::Stable;
                continue;
            }
            let mut score = c.baseline + (escalation.score - c.baseline) * c.decay;
            if score - c.baseline < SNAP_EPSILON {
                score = c.baseline;
            }
            escalation.trend = Trend::from_delta(score - escalation.score, TREND_EPSILON);
            escalation.score = score;
            escalation.level = EscalationLevel::from_score(score, c);
            escalation.updated_at = Some(now);
            decayed += 1;
        }
        debug!("Decayed {} hotspot escalations", decayed);
    }

    pub fn get_hotspot_escalation(&self, hotspot_id: &str) -> Option<&HotspotEscalation> {
        self.state.get(hotspot_id)
    }

    /// Every hotspot, highest score first
    pub fn all_escalations(&self) -> Vec<&HotspotEscalation> {
        let mut all: Vec<_> = self.state.values().collect();
        all.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.hotspot_id.cmp(&b.hotspot_id))
        });
        all
    }
}

impl fmt::Debug for EscalationTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EscalationTracker")
            .field("config", &self.config)
            .field("hotspots", &self.hotspots.len())
            .field("state", &self.state)
            .finish()
    }
}
