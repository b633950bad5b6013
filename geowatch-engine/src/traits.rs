//! Engine errors and the capabilities the escalation tracker depends on

use geowatch_core::CoreError;
use thiserror::Error;

/// Errors from engine operations
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Unknown hotspot: {0}")]
    UnknownHotspot(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid keyword for hotspot {0}: {1}")]
    Keyword(String, String),

    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Read access to current country instability scores
pub trait CiiSource: Send + Sync {
    /// Last scored CII value for a country, if it has one
    fn country_score(&self, country_code: &str) -> Option<f64>;
}

/// Read access to active convergence alerts
pub trait ConvergenceSource: Send + Sync {
    /// Number of active alerts within `radius_km` of a point
    fn alerts_near(&self, lat: f64, lon: f64, radius_km: f64) -> usize;
}

/// Read access to live military positions
pub trait MilitarySource: Send + Sync {
    /// Number of military flights/vessels within `radius_km` of a point
    fn military_near(&self, lat: f64, lon: f64, radius_km: f64) -> usize;
}

impl<F> CiiSource for F
where
    F: Fn(&str) -> Option<f64> + Send + Sync,
{
    fn country_score(&self, country_code: &str) -> Option<f64> {
        self(country_code)
    }
}

impl<F> ConvergenceSource for F
where
    F: Fn(f64, f64, f64) -> usize + Send + Sync,
{
    fn alerts_near(&self, lat: f64, lon: f64, radius_km: f64) -> usize {
        self(lat, lon, radius_km)
    }
}

impl<F> MilitarySource for F
where
    F: Fn(f64, f64, f64) -> usize + Send + Sync,
{
    fn military_near(&self, lat: f64, lon: f64, radius_km: f64) -> usize {
        self(lat, lon, radius_km)
    }
}

/// A source that never reports anything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSignals;

impl CiiSource for NoSignals {
    fn country_score(&self, _country_code: &str) -> Option<f64> {
        None
    }
}

impl ConvergenceSource for NoSignals {
    fn alerts_near(&self, _lat: f64, _lon: f64, _radius_km: f64) -> usize {
        0
    }
}

impl MilitarySource for NoSignals {
    fn military_near(&self, _lat: f64, _lon: f64, _radius_km: f64) -> usize {
        0
    }
}
