//! Data source registry
//!
//! Lists the upstream feeds that produce signals, whether each one is needed
//! for a meaningful risk picture, and what an analyst loses when it is down.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::SignalKind;

/// Upstream data sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSourceId {
    Acled,
    Opensky,
    Ais,
    Usgs,
    Gdelt,
    Rss,
    Outages,
    AcledConflict,
    Unhcr,
    Climate,
}

impl DataSourceId {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSourceId::Acled => "acled",
            DataSourceId::Opensky => "opensky",
            DataSourceId::Ais => "ais",
            DataSourceId::Usgs => "usgs",
            DataSourceId::Gdelt => "gdelt",
            DataSourceId::Rss => "rss",
            DataSourceId::Outages => "outages",
            DataSourceId::AcledConflict => "acled_conflict",
            DataSourceId::Unhcr => "unhcr",
            DataSourceId::Climate => "climate",
        }
    }

    /// Source feeding a given signal kind
    pub fn for_kind(kind: SignalKind) -> Self {
        match kind {
            SignalKind::Protest => DataSourceId::Acled,
            SignalKind::MilitaryFlight => DataSourceId::Opensky,
            SignalKind::MilitaryVessel => DataSourceId::Ais,
            SignalKind::Earthquake => DataSourceId::Usgs,
            SignalKind::Outage => DataSourceId::Outages,
            SignalKind::NewsCluster => DataSourceId::Gdelt,
            SignalKind::Conflict => DataSourceId::AcledConflict,
            SignalKind::Displacement => DataSourceId::Unhcr,
            SignalKind::Climate => DataSourceId::Climate,
        }
    }

    pub fn metadata(&self) -> &'static DataSource {
        DATA_SOURCES
            .iter()
            .find(|s| s.id == *self)
            .unwrap_or(&DATA_SOURCES[0])
    }
}

impl fmt::Display for DataSourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static description of a data source
#[derive(Debug, Clone, Serialize)]
pub struct DataSource {
    pub id: DataSourceId,
    /// Human-readable name
    pub name: &'static str,
    /// Whether risk assessment is meaningless without it
    pub required_for_risk: bool,
    /// What goes unseen while the source is down
    pub gap_message: &'static str,
}

/// All known data sources
pub static DATA_SOURCES: &[DataSource] = &[
    DataSource {
        id: DataSourceId::Acled,
        name: "Protests & Conflicts",
        required_for_risk: false,
        gap_message: "Protest/conflict events may be missed: ACLED data unavailable",
    },
    DataSource {
        id: DataSourceId::Opensky,
        name: "Military Flights",
        required_for_risk: false,
        gap_message: "Military aircraft positions unknown: flight tracking offline",
    },
    DataSource {
        id: DataSourceId::Ais,
        name: "Vessel Tracking",
        required_for_risk: false,
        gap_message: "Vessel positions outdated: dark shipping may go undetected",
    },
    DataSource {
        id: DataSourceId::Usgs,
        name: "Earthquakes",
        required_for_risk: false,
        gap_message: "Recent earthquakes may not be shown: seismic data unavailable",
    },
    DataSource {
        id: DataSourceId::Gdelt,
        name: "News Intelligence",
        required_for_risk: true,
        gap_message: "News event velocity unknown: GDELT intelligence feed offline",
    },
    DataSource {
        id: DataSourceId::Rss,
        name: "Live News Feeds",
        required_for_risk: true,
        gap_message: "Breaking news may be missed: RSS feeds not updating",
    },
    DataSource {
        id: DataSourceId::Outages,
        name: "Internet Outages",
        required_for_risk: false,
        gap_message: "Internet disruptions may be unreported: outage monitoring offline",
    },
    DataSource {
        id: DataSourceId::AcledConflict,
        name: "Armed Conflicts",
        required_for_risk: false,
        gap_message: "Armed conflict events may be missed: conflict data unavailable",
    },
    DataSource {
        id: DataSourceId::Unhcr,
        name: "UNHCR Displacement",
        required_for_risk: false,
        gap_message: "Displacement data unavailable: refugee flows unknown",
    },
    DataSource {
        id: DataSourceId::Climate,
        name: "Climate Anomalies",
        required_for_risk: false,
        gap_message: "Climate anomaly data unavailable: extreme weather patterns undetected",
    },
];

/// Sources needed for a meaningful risk picture
pub fn risk_sources() -> impl Iterator<Item = &'static DataSource> {
    DATA_SOURCES.iter().filter(|s| s.required_for_risk)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_source_has_metadata() {
        for source in DATA_SOURCES {
            assert_eq!(source.id.metadata().id, source.id);
        }
    }

    #[test]
    fn test_every_kind_maps_to_a_source() {
        for kind in SignalKind::ALL {
            let source = DataSourceId::for_kind(kind);
            assert!(DATA_SOURCES.iter().any(|s| s.id == source));
        }
    }

    #[test]
    fn test_risk_sources() {
        let ids: Vec<_> = risk_sources().map(|s| s.id).collect();
        assert_eq!(ids, vec![DataSourceId::Gdelt, DataSourceId::Rss]);
    }
}
