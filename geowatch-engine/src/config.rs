//! Engine configuration
//!
//! Every tunable lives here with its default. The thresholds (bucket size,
//! kind threshold, cooldown) are product tuning choices, so they are exposed
//! rather than hard-coded. Loaded from TOML; any omitted field keeps its
//! default.

use chrono::Duration;
use geowatch_core::{GridConfig, RetentionPolicy, SignalKind};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::EngineError;

/// Convert fractional hours to a chrono duration
pub fn hours(h: f64) -> Duration {
    Duration::milliseconds((h * 3_600_000.0).round() as i64)
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub grid: GridSettings,
    pub convergence: ConvergenceConfig,
    pub regional: RegionalConfig,
    pub cii: CiiConfig,
    pub escalation: EscalationConfig,
    pub learning: LearningConfig,
}

impl EngineConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self, EngineError> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| EngineError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        fn check(ok: bool, msg: &str) -> Result<(), EngineError> {
            if ok {
                Ok(())
            } else {
                Err(EngineError::InvalidConfig(msg.to_string()))
            }
        }

        check(
            self.grid.bucket_degrees > 0.0 && self.grid.bucket_degrees <= 90.0,
            "grid.bucket_degrees must be in (0, 90]",
        )?;
        check(self.grid.cell_capacity > 0, "grid.cell_capacity must be positive")?;
        check(self.convergence.min_kinds >= 2, "convergence.min_kinds must be at least 2")?;
        check(self.convergence.window_hours > 0.0, "convergence.window_hours must be positive")?;
        check(self.convergence.cooldown_hours >= 0.0, "convergence.cooldown_hours must not be negative")?;
        check(self.regional.radius_km > 0.0, "regional.radius_km must be positive")?;
        check(self.regional.min_kinds >= 1, "regional.min_kinds must be at least 1")?;
        check(self.cii.min_samples >= 1, "cii.min_samples must be at least 1")?;
        check(self.cii.baseline_window >= 2, "cii.baseline_window must be at least 2")?;
        check(self.cii.min_stddev > 0.0, "cii.min_stddev must be positive")?;
        check(
            (0.0..1.0).contains(&self.cii.quiet_decay),
            "cii.quiet_decay must be in [0, 1)",
        )?;
        check(self.cii.history_capacity >= 2, "cii.history_capacity must be at least 2")?;
        check(self.cii.weights.total() > 0.0, "cii.weights must not all be zero")?;
        check(
            self.escalation.decay > 0.0 && self.escalation.decay < 1.0,
            "escalation.decay must be in (0, 1)",
        )?;
        check(
            self.escalation.high_threshold > self.escalation.elevated_threshold,
            "escalation.high_threshold must exceed elevated_threshold",
        )?;
        Ok(())
    }
}

/// Spatial grid settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GridSettings {
    pub bucket_degrees: f64,
    pub cell_capacity: usize,
    pub retention_hours: RetentionHours,
}

impl Default for GridSettings {
    fn default() -> Self {
        Self {
            bucket_degrees: geowatch_core::DEFAULT_BUCKET_DEGREES,
            cell_capacity: geowatch_core::DEFAULT_CELL_CAPACITY,
            retention_hours: RetentionHours::default(),
        }
    }
}

impl GridSettings {
    pub fn grid_config(&self) -> GridConfig {
        GridConfig {
            bucket_degrees: self.bucket_degrees,
            cell_capacity: self.cell_capacity,
            retention: self.retention_hours.policy(),
        }
    }
}

/// Per-kind retention windows in hours
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionHours {
    pub protest: f64,
    pub military_flight: f64,
    pub military_vessel: f64,
    pub earthquake: f64,
    pub outage: f64,
    pub news_cluster: f64,
    pub conflict: f64,
    pub displacement: f64,
    pub climate: f64,
}

impl Default for RetentionHours {
    fn default() -> Self {
        let h = |kind: SignalKind| kind.default_retention().num_minutes() as f64 / 60.0;
        Self {
            protest: h(SignalKind::Protest),
            military_flight: h(SignalKind::MilitaryFlight),
            military_vessel: h(SignalKind::MilitaryVessel),
            earthquake: h(SignalKind::Earthquake),
            outage: h(SignalKind::Outage),
            news_cluster: h(SignalKind::NewsCluster),
            conflict: h(SignalKind::Conflict),
            displacement: h(SignalKind::Displacement),
            climate: h(SignalKind::Climate),
        }
    }
}

impl RetentionHours {
    pub fn get(&self, kind: SignalKind) -> f64 {
        match kind {
            SignalKind::Protest => self.protest,
            SignalKind::MilitaryFlight => self.military_flight,
            SignalKind::MilitaryVessel => self.military_vessel,
            SignalKind::Earthquake => self.earthquake,
            SignalKind::Outage => self.outage,
            SignalKind::NewsCluster => self.news_cluster,
            SignalKind::Conflict => self.conflict,
            SignalKind::Displacement => self.displacement,
            SignalKind::Climate => self.climate,
        }
    }

    pub fn policy(&self) -> RetentionPolicy {
        SignalKind::ALL
            .iter()
            .fold(RetentionPolicy::new(), |policy, kind| {
                policy.with_window(*kind, hours(self.get(*kind)))
            })
    }
}

/// Geo-convergence detector settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvergenceConfig {
    /// Distinct kinds needed in one place. Fewer is noisy, more misses
    /// real multi-domain incidents.
    pub min_kinds: usize,
    /// Only events this recent count toward convergence
    pub window_hours: f64,
    /// Quiet period after an alert before the same cell may fire again
    pub cooldown_hours: f64,
    /// Neighbouring cells (Chebyshev distance) folded into a cell's check
    pub neighbor_radius: u32,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            min_kinds: 3,
            window_hours: 24.0,
            cooldown_hours: 6.0,
            neighbor_radius: 0,
        }
    }
}

/// Country cluster / regional grouping settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionalConfig {
    /// Distinct kinds a country needs to count as a cluster
    pub min_kinds: usize,
    /// Neighbourhood radius for cross-border grouping
    pub radius_km: f64,
}

impl Default for RegionalConfig {
    fn default() -> Self {
        Self {
            min_kinds: 2,
            radius_km: 1500.0,
        }
    }
}

/// Relative weight of each CII component
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComponentWeights {
    pub protests: f64,
    pub military: f64,
    pub outages: f64,
    pub conflict: f64,
    pub displacement: f64,
    pub climate: f64,
    pub news: f64,
}

impl Default for ComponentWeights {
    fn default() -> Self {
        Self {
            protests: 0.15,
            military: 0.20,
            outages: 0.10,
            conflict: 0.25,
            displacement: 0.10,
            climate: 0.05,
            news: 0.15,
        }
    }
}

impl ComponentWeights {
    pub fn total(&self) -> f64 {
        self.protests
            + self.military
            + self.outages
            + self.conflict
            + self.displacement
            + self.climate
            + self.news
    }
}

/// Country Instability Index settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CiiConfig {
    /// Committed cycles a country needs before it is scored
    pub min_samples: u32,
    /// Minimum spacing between baseline samples
    pub sample_interval_minutes: i64,
    /// Effective length of the rolling baseline, in samples
    pub baseline_window: u32,
    /// Score of a country sitting exactly on its baseline
    pub neutral_score: f64,
    /// Points per standard deviation
    pub z_scale: f64,
    /// Floor on the baseline standard deviation
    pub min_stddev: f64,
    /// Per-cycle decay toward neutral for countries with no live signals
    pub quiet_decay: f64,
    /// Score delta separating rising/falling from stable
    pub trend_threshold: f64,
    /// Score history ring buffer length
    pub history_capacity: usize,
    pub history_interval_minutes: i64,
    pub weights: ComponentWeights,
}

impl Default for CiiConfig {
    fn default() -> Self {
        Self {
            // 48 samples at 30 minutes: a day of learning
            min_samples: 48,
            sample_interval_minutes: 30,
            baseline_window: 96,
            neutral_score: 25.0,
            z_scale: 20.0,
            min_stddev: 1.0,
            quiet_decay: 0.85,
            trend_threshold: 2.0,
            history_capacity: 25,
            history_interval_minutes: 60,
            weights: ComponentWeights::default(),
        }
    }
}

/// Hotspot escalation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    pub baseline: f64,
    /// Fraction of the excess over baseline kept each cycle
    pub decay: f64,
    pub match_weight: f64,
    pub breaking_bonus: f64,
    pub velocity_weight: f64,
    /// Points added at CII 100
    pub cii_weight: f64,
    pub convergence_bonus: f64,
    pub convergence_cap: f64,
    pub military_weight: f64,
    pub military_cap: f64,
    pub proximity_km: f64,
    pub elevated_threshold: f64,
    pub high_threshold: f64,
    /// How far back headlines count toward keyword matches
    pub news_window_hours: f64,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            baseline: 1.0,
            decay: 0.7,
            match_weight: 0.3,
            breaking_bonus: 1.0,
            velocity_weight: 0.1,
            cii_weight: 1.5,
            convergence_bonus: 1.0,
            convergence_cap: 2.0,
            military_weight: 0.1,
            military_cap: 1.0,
            proximity_km: 300.0,
            elevated_threshold: 2.0,
            high_threshold: 4.0,
            news_window_hours: 2.0,
        }
    }
}

/// Global learning window after start-up
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    /// Convergence alerts are held back this long after start
    pub duration_minutes: i64,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self { duration_minutes: 15 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert!((config.cii.weights.total() - 1.0).abs() < 1e-9);
        assert_eq!(config.grid.retention_hours.military_flight, 2.0);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            [convergence]
            min_kinds = 4
            cooldown_hours = 12

            [grid.retention_hours]
            military_flight = 1.5
            "#,
        )
        .unwrap();

        assert_eq!(config.convergence.min_kinds, 4);
        assert_eq!(config.convergence.cooldown_hours, 12.0);
        assert_eq!(config.convergence.window_hours, 24.0);
        assert_eq!(
            config.grid.grid_config().retention.window(SignalKind::MilitaryFlight),
            Duration::minutes(90)
        );
        assert_eq!(config.grid.bucket_degrees, 2.0);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = EngineConfig::from_toml_str("[convergence]\nmin_kinds = 1\n").unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfig(_)));

        let err = EngineConfig::from_toml_str("[escalation]\ndecay = 1.5\n").unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfig(_)));

        assert!(matches!(
            EngineConfig::from_toml_str("grid = 3").unwrap_err(),
            EngineError::Parse(_)
        ));
    }

    #[test]
    fn test_missing_file() {
        let err = EngineConfig::load("/nonexistent/geowatch.toml").unwrap_err();
        assert!(matches!(err, EngineError::Io { .. }));
    }
}
