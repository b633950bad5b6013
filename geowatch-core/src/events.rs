//! Producer payloads
//!
//! These mirror what the feed adapters hand over after fetching and
//! parsing. Coordinates are optional because several upstream sources only
//! know a country or a place name; the normalizer decides what to keep.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::SignalKind;

/// Protest intensity as reported upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtestSeverity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtestEvent {
    pub id: String,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
    pub time: DateTime<Utc>,
    pub country: String,
    pub severity: ProtestSeverity,
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MilitaryFlight {
    pub id: String,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
    pub last_seen: DateTime<Utc>,
    #[serde(default)]
    pub operator_country: String,
    #[serde(default)]
    pub is_interesting: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MilitaryVessel {
    pub id: String,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
    pub last_ais_update: DateTime<Utc>,
    #[serde(default)]
    pub operator_country: String,
    #[serde(default)]
    pub is_interesting: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Earthquake {
    pub id: String,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
    pub magnitude: f64,
    #[serde(default)]
    pub place: String,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutageSeverity {
    Partial,
    Major,
    Total,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InternetOutage {
    #[serde(default)]
    pub id: Option<String>,
    pub country: String,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub severity: Option<OutageSeverity>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreatLevel {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatAssessment {
    pub level: ThreatLevel,
}

/// A cluster of related headlines from the upstream clustering stage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsCluster {
    pub id: String,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
    pub primary_title: String,
    pub threat: ThreatAssessment,
    pub last_updated: DateTime<Utc>,
}

/// Armed conflict event (battles, explosions, violence against civilians)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictEvent {
    pub id: String,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
    pub time: DateTime<Utc>,
    pub country: String,
    #[serde(default)]
    pub fatalities: u32,
}

/// Refugee / IDP flow observation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplacementFlow {
    pub id: String,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
    pub time: DateTime<Utc>,
    pub country: String,
    pub persons: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalySeverity {
    Mild,
    Moderate,
    Severe,
    Extreme,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClimateAnomaly {
    pub id: String,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub country: Option<String>,
    pub severity: AnomalySeverity,
}

/// A single headline, used for hotspot keyword matching
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsItem {
    pub title: String,
    pub pub_date: DateTime<Utc>,
    /// Flagged as breaking by the feed
    #[serde(default)]
    pub is_alert: bool,
}

/// Borrowed view over any producer payload
#[derive(Debug, Clone, Copy)]
pub enum RawEvent<'a> {
    Protest(&'a ProtestEvent),
    MilitaryFlight(&'a MilitaryFlight),
    MilitaryVessel(&'a MilitaryVessel),
    Earthquake(&'a Earthquake),
    Outage(&'a InternetOutage),
    NewsCluster(&'a NewsCluster),
    Conflict(&'a ConflictEvent),
    Displacement(&'a DisplacementFlow),
    Climate(&'a ClimateAnomaly),
}

impl RawEvent<'_> {
    pub fn kind(&self) -> SignalKind {
        match self {
            RawEvent::Protest(_) => SignalKind::Protest,
            RawEvent::MilitaryFlight(_) => SignalKind::MilitaryFlight,
            RawEvent::MilitaryVessel(_) => SignalKind::MilitaryVessel,
            RawEvent::Earthquake(_) => SignalKind::Earthquake,
            RawEvent::Outage(_) => SignalKind::Outage,
            RawEvent::NewsCluster(_) => SignalKind::NewsCluster,
            RawEvent::Conflict(_) => SignalKind::Conflict,
            RawEvent::Displacement(_) => SignalKind::Displacement,
            RawEvent::Climate(_) => SignalKind::Climate,
        }
    }

    /// Raw (unvalidated) coordinates
    pub fn coordinates(&self) -> (Option<f64>, Option<f64>) {
        match self {
            RawEvent::Protest(e) => (e.lat, e.lon),
            RawEvent::MilitaryFlight(e) => (e.lat, e.lon),
            RawEvent::MilitaryVessel(e) => (e.lat, e.lon),
            RawEvent::Earthquake(e) => (e.lat, e.lon),
            RawEvent::Outage(e) => (e.lat, e.lon),
            RawEvent::NewsCluster(e) => (e.lat, e.lon),
            RawEvent::Conflict(e) => (e.lat, e.lon),
            RawEvent::Displacement(e) => (e.lat, e.lon),
            RawEvent::Climate(e) => (e.lat, e.lon),
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            RawEvent::Protest(e) => e.time,
            RawEvent::MilitaryFlight(e) => e.last_seen,
            RawEvent::MilitaryVessel(e) => e.last_ais_update,
            RawEvent::Earthquake(e) => e.time,
            RawEvent::Outage(e) => e.time,
            RawEvent::NewsCluster(e) => e.last_updated,
            RawEvent::Conflict(e) => e.time,
            RawEvent::Displacement(e) => e.time,
            RawEvent::Climate(e) => e.time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_news_cluster_from_wire_json() {
        let json = r#"{
            "id": "c-17",
            "primaryTitle": "Strikes reported near Kharkiv",
            "threat": { "level": "high" },
            "lastUpdated": "2026-03-01T10:00:00Z"
        }"#;

        let cluster: NewsCluster = serde_json::from_str(json).unwrap();
        assert_eq!(cluster.threat.level, ThreatLevel::High);
        assert!(cluster.lat.is_none());
        assert_eq!(RawEvent::NewsCluster(&cluster).kind(), SignalKind::NewsCluster);
    }

    #[test]
    fn test_outage_without_id() {
        let json = r#"{
            "country": "IR",
            "lat": 35.7,
            "lon": 51.4,
            "time": "2026-03-01T10:00:00Z"
        }"#;

        let outage: InternetOutage = serde_json::from_str(json).unwrap();
        assert!(outage.id.is_none());
        assert!(outage.severity.is_none());
    }
}
