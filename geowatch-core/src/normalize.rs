//! Event normalizer
//!
//! Turns producer payloads into `NormalizedEvent`s. Pure: no state, no I/O.
//! A record whose position cannot be resolved is dropped (`None`) with a
//! debug log, never an error, so one bad record cannot stall a batch.
//!
//! Severity per kind:
//! - protest: low 0.3, medium 0.6, high 0.9
//! - military flight: interesting 0.8, routine 0.4
//! - military vessel: interesting 0.7, routine 0.35
//! - earthquake: magnitude / 8, clamped
//! - outage: total 1.0, major 0.7, partial 0.4 (major when unreported)
//! - news cluster: critical 1.0, high 0.8, medium 0.5, low 0.3, info 0.1
//! - conflict: 0.4 + fatalities / 50, clamped
//! - displacement: log10(persons) / 6, clamped
//! - climate: extreme 0.9, severe 0.7, moderate 0.5, mild 0.2

use tracing::debug;

use crate::{
    country_mentioned_in, locate_country, resolve_country, valid_coordinates, AnomalySeverity,
    CountrySignal, NormalizedEvent, OutageSeverity, ProtestSeverity, RawEvent, SignalKind,
    ThreatLevel,
};

/// Severity for a protest report
pub fn protest_severity(severity: ProtestSeverity) -> f64 {
    match severity {
        ProtestSeverity::Low => 0.3,
        ProtestSeverity::Medium => 0.6,
        ProtestSeverity::High => 0.9,
    }
}

pub fn earthquake_severity(magnitude: f64) -> f64 {
    if magnitude.is_finite() {
        (magnitude / 8.0).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

pub fn outage_severity(severity: Option<OutageSeverity>) -> f64 {
    match severity.unwrap_or(OutageSeverity::Major) {
        OutageSeverity::Partial => 0.4,
        OutageSeverity::Major => 0.7,
        OutageSeverity::Total => 1.0,
    }
}

pub fn threat_severity(level: ThreatLevel) -> f64 {
    match level {
        ThreatLevel::Critical => 1.0,
        ThreatLevel::High => 0.8,
        ThreatLevel::Medium => 0.5,
        ThreatLevel::Low => 0.3,
        ThreatLevel::Info => 0.1,
    }
}

pub fn conflict_severity(fatalities: u32) -> f64 {
    (0.4 + fatalities as f64 / 50.0).clamp(0.0, 1.0)
}

pub fn displacement_severity(persons: u64) -> f64 {
    if persons == 0 {
        return 0.0;
    }
    ((persons as f64).log10() / 6.0).clamp(0.0, 1.0)
}

pub fn anomaly_severity(severity: AnomalySeverity) -> f64 {
    match severity {
        AnomalySeverity::Mild => 0.2,
        AnomalySeverity::Moderate => 0.5,
        AnomalySeverity::Severe => 0.7,
        AnomalySeverity::Extreme => 0.9,
    }
}

fn severity_of(raw: &RawEvent<'_>) -> f64 {
    match raw {
        RawEvent::Protest(e) => protest_severity(e.severity),
        RawEvent::MilitaryFlight(e) => {
            if e.is_interesting {
                0.8
            } else {
                0.4
            }
        }
        RawEvent::MilitaryVessel(e) => {
            if e.is_interesting {
                0.7
            } else {
                0.35
            }
        }
        RawEvent::Earthquake(e) => earthquake_severity(e.magnitude),
        RawEvent::Outage(e) => outage_severity(e.severity),
        RawEvent::NewsCluster(e) => threat_severity(e.threat.level),
        RawEvent::Conflict(e) => conflict_severity(e.fatalities),
        RawEvent::Displacement(e) => displacement_severity(e.persons),
        RawEvent::Climate(e) => anomaly_severity(e.severity),
    }
}

/// Explicit country field carried by the payload, if any
fn declared_country<'a>(raw: &RawEvent<'a>) -> Option<&'a str> {
    match raw {
        RawEvent::Protest(e) => Some(e.country.as_str()),
        RawEvent::Outage(e) => Some(e.country.as_str()),
        RawEvent::Conflict(e) => Some(e.country.as_str()),
        RawEvent::Displacement(e) => Some(e.country.as_str()),
        RawEvent::Climate(e) => e.country.as_deref(),
        // Military positions are attributed to where they are, not the operator
        RawEvent::MilitaryFlight(_) | RawEvent::MilitaryVessel(_) => None,
        RawEvent::Earthquake(_) | RawEvent::NewsCluster(_) => None,
    }
}

fn producer_id<'a>(raw: &RawEvent<'a>) -> Option<&'a str> {
    let id = match raw {
        RawEvent::Protest(e) => Some(e.id.as_str()),
        RawEvent::MilitaryFlight(e) => Some(e.id.as_str()),
        RawEvent::MilitaryVessel(e) => Some(e.id.as_str()),
        RawEvent::Earthquake(e) => Some(e.id.as_str()),
        RawEvent::Outage(e) => e.id.as_deref(),
        RawEvent::NewsCluster(e) => Some(e.id.as_str()),
        RawEvent::Conflict(e) => Some(e.id.as_str()),
        RawEvent::Displacement(e) => Some(e.id.as_str()),
        RawEvent::Climate(e) => Some(e.id.as_str()),
    };
    id.filter(|id| !id.is_empty())
}

/// Attribute a located event to a country
fn country_for(raw: &RawEvent<'_>, lat: f64, lon: f64) -> Option<&'static str> {
    if let Some(country) = declared_country(raw).and_then(resolve_country) {
        return Some(country.code);
    }
    if let RawEvent::NewsCluster(cluster) = raw {
        if let Some(country) = country_mentioned_in(&cluster.primary_title) {
            return Some(country.code);
        }
    }
    locate_country(lat, lon).map(|c| c.code)
}

/// Normalize a producer payload. `None` when it has no usable position.
pub fn normalize(raw: &RawEvent<'_>) -> Option<NormalizedEvent> {
    let kind = raw.kind();
    let (lat, lon) = match raw.coordinates() {
        (Some(lat), Some(lon)) if valid_coordinates(lat, lon) => (lat, lon),
        (lat, lon) => {
            debug!(
                "Dropping {} event {:?}: unusable coordinates ({:?}, {:?})",
                kind,
                producer_id(raw),
                lat,
                lon
            );
            return None;
        }
    };

    let country = country_for(raw, lat, lon);
    let mut builder = NormalizedEvent::builder(kind, lat, lon)
        .timestamp(raw.timestamp())
        .severity(severity_of(raw))
        .country(country);

    if let Some(id) = producer_id(raw) {
        builder = builder.id(id);
    }

    Some(builder.build())
}

/// Country-level signal for a news cluster that has no coordinates but
/// names a known country. Located clusters go through `normalize` instead.
pub fn country_signal(raw: &RawEvent<'_>) -> Option<CountrySignal> {
    let RawEvent::NewsCluster(cluster) = raw else {
        return None;
    };
    if cluster.lat.is_some() && cluster.lon.is_some() {
        return None;
    }

    let country = country_mentioned_in(&cluster.primary_title)?;
    Some(CountrySignal {
        id: cluster.id.clone(),
        kind: SignalKind::NewsCluster,
        severity: threat_severity(cluster.threat.level),
        timestamp: cluster.last_updated,
        country_code: country.code.to_string(),
    })
}
