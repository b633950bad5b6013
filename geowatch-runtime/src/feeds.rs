//! Feed batches
//!
//! A batch is one refresh worth of records from a single upstream feed. The
//! monitor consumes batches; the CLI reads them from JSON fixtures or from a
//! directory of `<feed>.json` files.

use chrono::{DateTime, Utc};
use geowatch_core::{
    ClimateAnomaly, ConflictEvent, DataSourceId, DisplacementFlow, Earthquake, InternetOutage,
    MilitaryFlight, MilitaryVessel, NewsCluster, NewsItem, ProtestEvent,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// The feeds a monitor can consume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedKind {
    Protests,
    MilitaryFlights,
    MilitaryVessels,
    Earthquakes,
    Outages,
    NewsClusters,
    Conflicts,
    Displacement,
    Climate,
    Headlines,
}

impl FeedKind {
    pub const ALL: [FeedKind; 10] = [
        FeedKind::Protests,
        FeedKind::MilitaryFlights,
        FeedKind::MilitaryVessels,
        FeedKind::Earthquakes,
        FeedKind::Outages,
        FeedKind::NewsClusters,
        FeedKind::Conflicts,
        FeedKind::Displacement,
        FeedKind::Climate,
        FeedKind::Headlines,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FeedKind::Protests => "protests",
            FeedKind::MilitaryFlights => "military_flights",
            FeedKind::MilitaryVessels => "military_vessels",
            FeedKind::Earthquakes => "earthquakes",
            FeedKind::Outages => "outages",
            FeedKind::NewsClusters => "news_clusters",
            FeedKind::Conflicts => "conflicts",
            FeedKind::Displacement => "displacement",
            FeedKind::Climate => "climate",
            FeedKind::Headlines => "headlines",
        }
    }

    /// Upstream source credited for this feed's freshness
    pub fn source(&self) -> DataSourceId {
        match self {
            FeedKind::Protests => DataSourceId::Acled,
            FeedKind::MilitaryFlights => DataSourceId::Opensky,
            FeedKind::MilitaryVessels => DataSourceId::Ais,
            FeedKind::Earthquakes => DataSourceId::Usgs,
            FeedKind::Outages => DataSourceId::Outages,
            FeedKind::NewsClusters => DataSourceId::Gdelt,
            FeedKind::Conflicts => DataSourceId::AcledConflict,
            FeedKind::Displacement => DataSourceId::Unhcr,
            FeedKind::Climate => DataSourceId::Climate,
            FeedKind::Headlines => DataSourceId::Rss,
        }
    }

    /// `<dir>/<feed>.json`
    pub fn path_in(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}.json", self.as_str()))
    }

    /// Parse a JSON array of this feed's records
    pub fn parse(&self, json: &str) -> Result<FeedBatch, serde_json::Error> {
        Ok(match self {
            FeedKind::Protests => FeedBatch::Protests(serde_json::from_str(json)?),
            FeedKind::MilitaryFlights => FeedBatch::MilitaryFlights(serde_json::from_str(json)?),
            FeedKind::MilitaryVessels => FeedBatch::MilitaryVessels(serde_json::from_str(json)?),
            FeedKind::Earthquakes => FeedBatch::Earthquakes(serde_json::from_str(json)?),
            FeedKind::Outages => FeedBatch::Outages(serde_json::from_str(json)?),
            FeedKind::NewsClusters => FeedBatch::NewsClusters(serde_json::from_str(json)?),
            FeedKind::Conflicts => FeedBatch::Conflicts(serde_json::from_str(json)?),
            FeedKind::Displacement => FeedBatch::Displacement(serde_json::from_str(json)?),
            FeedKind::Climate => FeedBatch::Climate(serde_json::from_str(json)?),
            FeedKind::Headlines => FeedBatch::Headlines(serde_json::from_str(json)?),
        })
    }
}

impl fmt::Display for FeedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One refresh worth of records
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "feed", content = "items", rename_all = "snake_case")]
pub enum FeedBatch {
    Protests(Vec<ProtestEvent>),
    MilitaryFlights(Vec<MilitaryFlight>),
    MilitaryVessels(Vec<MilitaryVessel>),
    Earthquakes(Vec<Earthquake>),
    Outages(Vec<InternetOutage>),
    NewsClusters(Vec<NewsCluster>),
    Conflicts(Vec<ConflictEvent>),
    Displacement(Vec<DisplacementFlow>),
    Climate(Vec<ClimateAnomaly>),
    Headlines(Vec<NewsItem>),
}

impl FeedBatch {
    pub fn kind(&self) -> FeedKind {
        match self {
            FeedBatch::Protests(_) => FeedKind::Protests,
            FeedBatch::MilitaryFlights(_) => FeedKind::MilitaryFlights,
            FeedBatch::MilitaryVessels(_) => FeedKind::MilitaryVessels,
            FeedBatch::Earthquakes(_) => FeedKind::Earthquakes,
            FeedBatch::Outages(_) => FeedKind::Outages,
            FeedBatch::NewsClusters(_) => FeedKind::NewsClusters,
            FeedBatch::Conflicts(_) => FeedKind::Conflicts,
            FeedBatch::Displacement(_) => FeedKind::Displacement,
            FeedBatch::Climate(_) => FeedKind::Climate,
            FeedBatch::Headlines(_) => FeedKind::Headlines,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            FeedBatch::Protests(v) => v.len(),
            FeedBatch::MilitaryFlights(v) => v.len(),
            FeedBatch::MilitaryVessels(v) => v.len(),
            FeedBatch::Earthquakes(v) => v.len(),
            FeedBatch::Outages(v) => v.len(),
            FeedBatch::NewsClusters(v) => v.len(),
            FeedBatch::Conflicts(v) => v.len(),
            FeedBatch::Displacement(v) => v.len(),
            FeedBatch::Climate(v) => v.len(),
            FeedBatch::Headlines(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A replay step: batches delivered together at one instant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayStep {
    pub at: DateTime<Utc>,
    #[serde(default)]
    pub batches: Vec<FeedBatch>,
}

/// A recorded session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Replay {
    pub steps: Vec<ReplayStep>,
}

impl Replay {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let mut replay: Replay = serde_json::from_str(json)?;
        replay.steps.sort_by_key(|s| s.at);
        Ok(replay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_wire_format() {
        let json = r#"{
            "feed": "earthquakes",
            "items": [
                {"id": "us7000", "lat": 50.1, "lon": 30.1, "magnitude": 5.4,
                 "place": "near Kyiv", "time": "2026-03-01T12:00:00Z"}
            ]
        }"#;
        let batch: FeedBatch = serde_json::from_str(json).unwrap();
        assert_eq!(batch.kind(), FeedKind::Earthquakes);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.kind().source(), DataSourceId::Usgs);
    }

    #[test]
    fn test_parse_by_kind() {
        let batch = FeedKind::Headlines
            .parse(r#"[{"title": "Strikes reported near Sanaa", "pubDate": "2026-03-01T12:00:00Z"}]"#)
            .unwrap();
        assert!(matches!(batch, FeedBatch::Headlines(ref items) if !items[0].is_alert));
        assert!(FeedKind::Protests.parse("{not json").is_err());
    }

    #[test]
    fn test_replay_steps_sorted() {
        let json = r#"{"steps": [
            {"at": "2026-03-01T13:00:00Z"},
            {"at": "2026-03-01T12:00:00Z", "batches": [{"feed": "protests", "items": []}]}
        ]}"#;
        let replay = Replay::from_json(json).unwrap();
        assert_eq!(replay.steps.len(), 2);
        assert!(replay.steps[0].at < replay.steps[1].at);
        assert!(replay.steps[0].batches[0].is_empty());
    }

    #[test]
    fn test_feed_paths() {
        let path = FeedKind::MilitaryFlights.path_in(Path::new("/tmp/feeds"));
        assert_eq!(path, PathBuf::from("/tmp/feeds/military_flights.json"));
    }
}
