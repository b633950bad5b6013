//! Hotspot registry
//!
//! Named places worth watching, loaded from TOML files so analysts can add
//! their own without a rebuild. Each hotspot carries headline keywords that
//! drive its escalation score.

use chrono::{DateTime, Duration, Utc};
use geowatch_core::NewsItem;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

use crate::EngineError;

/// Keywords shorter than this match too much to be useful
const MIN_KEYWORD_LEN: usize = 3;

/// A watched location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hotspot {
    pub id: String,
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Countries whose instability feeds this hotspot
    #[serde(default)]
    pub countries: Vec<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct HotspotFile {
    #[serde(default, rename = "hotspot")]
    hotspots: Vec<Hotspot>,
}

/// Keyword activity for one hotspot over the news window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HotspotActivity {
    pub hotspot_id: String,
    pub match_count: usize,
    pub has_breaking: bool,
    /// Matches per hour
    pub velocity: f64,
}

#[derive(Debug, Clone)]
struct Entry {
    hotspot: Hotspot,
    /// `None` when the hotspot has no usable keywords
    pattern: Option<Regex>,
}

fn keyword_pattern(hotspot: &Hotspot) -> Result<Option<Regex>, EngineError> {
    let keywords: Vec<String> = hotspot
        .keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| k.chars().count() >= MIN_KEYWORD_LEN)
        .map(|k| regex::escape(&k))
        .collect();
    if keywords.is_empty() {
        return Ok(None);
    }

    Regex::new(&format!(r"(?i)\b(?:{})\b", keywords.join("|")))
        .map(Some)
        .map_err(|e| EngineError::Keyword(hotspot.id.clone(), e.to_string()))
}

/// Registry of all loaded hotspots
#[derive(Debug, Clone, Default)]
pub struct HotspotRegistry {
    hotspots: BTreeMap<String, Entry>,
}

impl HotspotRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the built-in hotspot set
    pub fn load_embedded() -> Self {
        let mut registry = Self::new();
        if let Err(e) = registry.load_str(include_str!("../hotspots/default.toml")) {
            warn!("Embedded hotspots failed to load: {}", e);
        }
        registry
    }

    /// Parse a TOML document into a new registry
    pub fn from_toml_str(content: &str) -> Result<Self, EngineError> {
        let mut registry = Self::new();
        registry.load_str(content)?;
        Ok(registry)
    }

    /// Load every `.toml` file in a directory. Unreadable or invalid files
    /// are skipped with a warning.
    pub fn load_from_dir<P: AsRef<Path>>(dir: P) -> Result<Self, EngineError> {
        let mut registry = Self::new();
        registry.extend_from_dir(dir)?;
        Ok(registry)
    }

    /// Add hotspots from a directory, replacing any with the same id
    pub fn extend_from_dir<P: AsRef<Path>>(&mut self, dir: P) -> Result<usize, EngineError> {
        let dir = dir.as_ref();
        let io_err = |source| EngineError::Io {
            path: dir.display().to_string(),
            source,
        };

        let mut loaded = 0;
        for entry in std::fs::read_dir(dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            if !path.extension().is_some_and(|ext| ext == "toml") {
                continue;
            }
            let result = std::fs::read_to_string(&path)
                .map_err(|source| EngineError::Io {
                    path: path.display().to_string(),
                    source,
                })
                .and_then(|content| self.load_str(&content));
            match result {
                Ok(n) => loaded += n,
                Err(e) => warn!("Skipping hotspot file {}: {}", path.display(), e),
            }
        }
        Ok(loaded)
    }

    fn load_str(&mut self, content: &str) -> Result<usize, EngineError> {
        let file: HotspotFile = toml::from_str(content)?;
        let mut loaded = 0;
        for hotspot in file.hotspots.into_iter().filter(|h| h.enabled) {
            self.register(hotspot)?;
            loaded += 1;
        }
        Ok(loaded)
    }

    /// Register a hotspot
    pub fn register(&mut self, hotspot: Hotspot) -> Result<(), EngineError> {
        let pattern = keyword_pattern(&hotspot)?;
        if pattern.is_none() {
            debug!("Hotspot {} has no usable keywords", hotspot.id);
        }
        self.hotspots
            .insert(hotspot.id.clone(), Entry { hotspot, pattern });
        Ok(())
    }

    /// Get a hotspot by ID
    pub fn get(&self, id: &str) -> Option<&Hotspot> {
        self.hotspots.get(id).map(|e| &e.hotspot)
    }

    /// All hotspots in id order
    pub fn iter(&self) -> impl Iterator<Item = &Hotspot> {
        self.hotspots.values().map(|e| &e.hotspot)
    }

    pub fn len(&self) -> usize {
        self.hotspots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hotspots.is_empty()
    }

    /// Whether a headline mentions one of the hotspot's keywords
    pub fn mentions(&self, id: &str, title: &str) -> bool {
        self.hotspots
            .get(id)
            .and_then(|e| e.pattern.as_ref())
            .is_some_and(|p| p.is_match(title))
    }

    /// Keyword activity for every hotspot from headlines published within
    /// `window` of `now`
    pub fn match_news(
        &self,
        items: &[NewsItem],
        window: Duration,
        now: DateTime<Utc>,
    ) -> Vec<HotspotActivity> {
        let recent: Vec<&NewsItem> = items
            .iter()
            .filter(|item| item.pub_date <= now && now - item.pub_date <= window)
            .collect();
        let window_hours = (window.num_seconds() as f64 / 3600.0).max(1.0 / 60.0);

        self.hotspots
            .values()
            .map(|entry| {
                let matched: Vec<&&NewsItem> = match &entry.pattern {
                    Some(pattern) => recent.iter().filter(|i| pattern.is_match(&i.title)).collect(),
                    None => Vec::new(),
                };
                HotspotActivity {
                    hotspot_id: entry.hotspot.id.clone(),
                    match_count: matched.len(),
                    has_breaking: matched.iter().any(|i| i.is_alert),
                    velocity: matched.len() as f64 / window_hours,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn item(title: &str, minutes_ago: i64, is_alert: bool) -> NewsItem {
        NewsItem {
            title: title.into(),
            pub_date: t0() - Duration::minutes(minutes_ago),
            is_alert,
        }
    }

    #[test]
    fn test_load_embedded_hotspots() {
        let registry = HotspotRegistry::load_embedded();
        assert!(registry.len() >= 10, "Should load the default hotspot set");
        let kyiv = registry.get("kyiv").unwrap();
        assert_eq!(kyiv.countries, vec!["UA"]);
    }

    #[test]
    fn test_embedded_hotspot_file_parses() {
        let registry = HotspotRegistry::from_toml_str(include_str!("../hotspots/default.toml"))
            .expect("default.toml must parse");
        assert_eq!(registry.len(), 13);
        assert_eq!(registry.len(), HotspotRegistry::load_embedded().len());
        assert!(registry.iter().all(|h| !h.keywords.is_empty()));
    }

    #[test]
    fn test_disabled_hotspots_are_skipped() {
        let registry = HotspotRegistry::from_toml_str(
            r#"
            [[hotspot]]
            id = "a"
            name = "A"
            lat = 1.0
            lon = 2.0
            keywords = ["alpha"]

            [[hotspot]]
            id = "b"
            name = "B"
            lat = 1.0
            lon = 2.0
            enabled = false
            "#,
        )
        .unwrap();

        assert_eq!(registry.len(), 1);
        assert!(registry.get("b").is_none());
    }

    #[test]
    fn test_keywords_match_on_word_boundaries() {
        let mut registry = HotspotRegistry::new();
        registry
            .register(Hotspot {
                id: "tehran".into(),
                name: "Tehran".into(),
                lat: 35.69,
                lon: 51.39,
                keywords: vec!["Iran".into(), "ir".into()],
                countries: vec!["IR".into()],
                enabled: true,
            })
            .unwrap();

        assert!(registry.mentions("tehran", "IRAN warns of response"));
        assert!(!registry.mentions("tehran", "Iranian tanker seized"));
        // Two-letter keywords are ignored
        assert!(!registry.mentions("tehran", "IR spectrum study"));
    }

    #[test]
    fn test_match_news_counts_recent_titles() {
        let registry = HotspotRegistry::load_embedded();
        let items = vec![
            item("Explosions heard in Kyiv", 10, true),
            item("Kyiv metro closes", 90, false),
            item("Kyiv marks anniversary", 200, false),
            item("Markets close higher", 5, false),
        ];

        let activity = registry.match_news(&items, Duration::hours(2), t0());
        let kyiv = activity.iter().find(|a| a.hotspot_id == "kyiv").unwrap();
        assert_eq!(kyiv.match_count, 2);
        assert!(kyiv.has_breaking);
        assert_eq!(kyiv.velocity, 1.0);

        let gaza = activity.iter().find(|a| a.hotspot_id == "gaza").unwrap();
        assert_eq!(gaza.match_count, 0);
        assert!(!gaza.has_breaking);
    }

    #[test]
    fn test_invalid_toml() {
        assert!(matches!(
            HotspotRegistry::from_toml_str("[[hotspot]]\nid = 3").unwrap_err(),
            EngineError::Parse(_)
        ));
    }

    #[test]
    fn test_missing_dir() {
        assert!(HotspotRegistry::load_from_dir("/nonexistent/hotspots").is_err());
    }
}
