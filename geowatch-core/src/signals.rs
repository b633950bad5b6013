//! Signal kinds and normalized events
//!
//! Every producer payload ends up as a `NormalizedEvent`:
//! - Fixed coordinates and timestamp
//! - A kind with its own retention window
//! - A kind-specific severity in 0.0 - 1.0
//! - An optional country attribution

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;

/// Kinds of signal the engine understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Protest,
    MilitaryFlight,
    MilitaryVessel,
    Earthquake,
    Outage,
    NewsCluster,
    Conflict,
    Displacement,
    Climate,
}

impl SignalKind {
    /// All kinds, in a stable order
    pub const ALL: [SignalKind; 9] = [
        SignalKind::Protest,
        SignalKind::MilitaryFlight,
        SignalKind::MilitaryVessel,
        SignalKind::Earthquake,
        SignalKind::Outage,
        SignalKind::NewsCluster,
        SignalKind::Conflict,
        SignalKind::Displacement,
        SignalKind::Climate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Protest => "protest",
            SignalKind::MilitaryFlight => "military_flight",
            SignalKind::MilitaryVessel => "military_vessel",
            SignalKind::Earthquake => "earthquake",
            SignalKind::Outage => "outage",
            SignalKind::NewsCluster => "news_cluster",
            SignalKind::Conflict => "conflict",
            SignalKind::Displacement => "displacement",
            SignalKind::Climate => "climate",
        }
    }

    /// Human-readable label for alert text
    pub fn label(&self) -> &'static str {
        match self {
            SignalKind::Protest => "protests",
            SignalKind::MilitaryFlight => "military flights",
            SignalKind::MilitaryVessel => "naval vessels",
            SignalKind::Earthquake => "earthquakes",
            SignalKind::Outage => "internet outages",
            SignalKind::NewsCluster => "news activity",
            SignalKind::Conflict => "armed conflict",
            SignalKind::Displacement => "displacement",
            SignalKind::Climate => "climate anomalies",
        }
    }

    /// Default retention window. Position data ages fast, slow-moving
    /// crises are kept for weeks.
    pub fn default_retention(&self) -> Duration {
        match self {
            SignalKind::Protest => Duration::days(14),
            SignalKind::MilitaryFlight => Duration::hours(2),
            SignalKind::MilitaryVessel => Duration::hours(6),
            SignalKind::Earthquake => Duration::days(7),
            SignalKind::Outage => Duration::hours(24),
            SignalKind::NewsCluster => Duration::hours(24),
            SignalKind::Conflict => Duration::days(14),
            SignalKind::Displacement => Duration::days(30),
            SignalKind::Climate => Duration::days(7),
        }
    }

    pub fn is_military(&self) -> bool {
        matches!(self, SignalKind::MilitaryFlight | SignalKind::MilitaryVessel)
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-kind retention windows
#[derive(Debug, Clone, PartialEq)]
pub struct RetentionPolicy {
    windows: HashMap<SignalKind, Duration>,
}

impl RetentionPolicy {
    pub fn new() -> Self {
        let windows = SignalKind::ALL
            .iter()
            .map(|kind| (*kind, kind.default_retention()))
            .collect();
        Self { windows }
    }

    pub fn with_window(mut self, kind: SignalKind, window: Duration) -> Self {
        self.windows.insert(kind, window);
        self
    }

    pub fn set(&mut self, kind: SignalKind, window: Duration) {
        self.windows.insert(kind, window);
    }

    pub fn window(&self, kind: SignalKind) -> Duration {
        self.windows
            .get(&kind)
            .copied()
            .unwrap_or_else(|| kind.default_retention())
    }

    /// An event is live while its age is within its kind's window
    pub fn is_live(&self, event: &NormalizedEvent, now: DateTime<Utc>) -> bool {
        event.age(now) <= self.window(event.kind)
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// A producer event reduced to the common internal shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    /// Producer id (or a stable hash when the producer has none)
    pub id: String,

    pub lat: f64,

    pub lon: f64,

    /// When the event happened (or was last observed)
    pub timestamp: DateTime<Utc>,

    pub kind: SignalKind,

    /// Kind-specific severity (0.0 - 1.0)
    pub severity: f64,

    /// ISO 3166-1 alpha-2 code, when attributable
    pub country_code: Option<String>,
}

impl NormalizedEvent {
    /// Create a new event builder
    pub fn builder(kind: SignalKind, lat: f64, lon: f64) -> EventBuilder {
        EventBuilder::new(kind, lat, lon)
    }

    /// Age relative to `now`; events from the future count as brand new
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.timestamp).max(Duration::zero())
    }

    pub fn is_within(&self, window: Duration, now: DateTime<Utc>) -> bool {
        self.age(now) <= window
    }
}

/// A signal attributable to a country but not to coordinates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountrySignal {
    pub id: String,
    pub kind: SignalKind,
    pub severity: f64,
    pub timestamp: DateTime<Utc>,
    pub country_code: String,
}

impl CountrySignal {
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.timestamp).max(Duration::zero())
    }
}

/// Builder for normalized events
pub struct EventBuilder {
    id: Option<String>,
    kind: SignalKind,
    lat: f64,
    lon: f64,
    timestamp: DateTime<Utc>,
    severity: f64,
    country_code: Option<String>,
}

impl EventBuilder {
    pub fn new(kind: SignalKind, lat: f64, lon: f64) -> Self {
        Self {
            id: None,
            kind,
            lat,
            lon,
            timestamp: Utc::now(),
            severity: 0.5,
            country_code: None,
        }
    }

    pub fn id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn severity(mut self, severity: f64) -> Self {
        self.severity = if severity.is_finite() {
            severity.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }

    pub fn country(mut self, code: Option<&str>) -> Self {
        self.country_code = code.map(|c| c.to_ascii_uppercase());
        self
    }

    pub fn build(self) -> NormalizedEvent {
        let id = self.id.unwrap_or_else(|| {
            stable_event_id(
                self.kind,
                &[
                    &format!("{:.4}", self.lat),
                    &format!("{:.4}", self.lon),
                    &self.timestamp.to_rfc3339(),
                    self.country_code.as_deref().unwrap_or(""),
                ],
            )
        });

        NormalizedEvent {
            id,
            lat: self.lat,
            lon: self.lon,
            timestamp: self.timestamp,
            kind: self.kind,
            severity: self.severity,
            country_code: self.country_code,
        }
    }
}

/// Content-derived id for producers that do not supply one
pub fn stable_event_id(kind: SignalKind, parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_str().as_bytes());
    for part in parts {
        hasher.update(b"|");
        hasher.update(part.as_bytes());
    }
    format!("{}-{}", kind.as_str(), &format!("{:x}", hasher.finalize())[..16])
}
