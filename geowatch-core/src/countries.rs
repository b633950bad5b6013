//! Country registry
//!
//! A small table of the countries the dashboard tracks, with approximate
//! centroids and bounding boxes. Used to attribute events to countries from
//! explicit country fields, coordinates, or headline text.

use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

/// A tracked country
#[derive(Debug, Clone, Serialize)]
pub struct Country {
    /// ISO 3166-1 alpha-2 code
    pub code: &'static str,
    pub name: &'static str,
    /// Lowercase names, demonyms and capitals that identify the country in text
    pub aliases: &'static [&'static str],
    pub centroid: (f64, f64),
    /// (min_lat, min_lon, max_lat, max_lon)
    pub bbox: (f64, f64, f64, f64),
}

impl Country {
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        let (min_lat, min_lon, max_lat, max_lon) = self.bbox;
        lat >= min_lat && lat <= max_lat && lon >= min_lon && lon <= max_lon
    }

    fn bbox_area(&self) -> f64 {
        let (min_lat, min_lon, max_lat, max_lon) = self.bbox;
        (max_lat - min_lat) * (max_lon - min_lon)
    }
}

macro_rules! country {
    ($code:expr, $name:expr, [$($alias:expr),*], ($clat:expr, $clon:expr), ($a:expr, $b:expr, $c:expr, $d:expr)) => {
        Country {
            code: $code,
            name: $name,
            aliases: &[$($alias),*],
            centroid: ($clat, $clon),
            bbox: ($a, $b, $c, $d),
        }
    };
}

/// Default country table
pub static COUNTRIES: &[Country] = &[
    country!("US", "United States", ["united states", "usa", "america", "washington"], (39.8, -98.6), (24.5, -125.0, 49.4, -66.9)),
    country!("RU", "Russia", ["russia", "russian", "moscow", "kremlin"], (61.5, 105.3), (41.2, 19.6, 81.9, 180.0)),
    country!("UA", "Ukraine", ["ukraine", "ukrainian", "kyiv", "kiev", "kharkiv", "odesa"], (48.4, 31.2), (44.4, 22.1, 52.4, 40.2)),
    country!("BY", "Belarus", ["belarus", "belarusian", "minsk"], (53.7, 27.9), (51.3, 23.2, 56.2, 32.8)),
    country!("PL", "Poland", ["poland", "polish", "warsaw"], (51.9, 19.1), (49.0, 14.1, 54.8, 24.1)),
    country!("DE", "Germany", ["germany", "german", "berlin"], (51.2, 10.5), (47.3, 5.9, 55.1, 15.0)),
    country!("FR", "France", ["france", "french", "paris"], (46.2, 2.2), (41.3, -5.1, 51.1, 9.6)),
    country!("GB", "United Kingdom", ["united kingdom", "britain", "british", "uk", "london"], (55.4, -3.4), (49.9, -8.6, 60.9, 1.8)),
    country!("RS", "Serbia", ["serbia", "serbian", "belgrade"], (44.0, 21.0), (42.2, 18.8, 46.2, 23.0)),
    country!("TR", "Turkey", ["turkey", "turkish", "türkiye", "ankara", "istanbul"], (39.0, 35.2), (35.8, 26.0, 42.1, 44.8)),
    country!("AM", "Armenia", ["armenia", "armenian", "yerevan"], (40.1, 45.0), (38.8, 43.4, 41.3, 46.6)),
    country!("AZ", "Azerbaijan", ["azerbaijan", "azerbaijani", "baku"], (40.1, 47.6), (38.4, 44.8, 41.9, 50.4)),
    country!("IL", "Israel", ["israel", "israeli", "jerusalem", "tel aviv", "gaza", "idf"], (31.0, 34.9), (29.5, 34.3, 33.3, 35.9)),
    country!("LB", "Lebanon", ["lebanon", "lebanese", "beirut", "hezbollah"], (33.9, 35.9), (33.05, 35.1, 34.7, 36.6)),
    country!("SY", "Syria", ["syria", "syrian", "damascus", "aleppo"], (34.8, 38.9), (32.3, 35.7, 37.3, 42.4)),
    country!("IQ", "Iraq", ["iraq", "iraqi", "baghdad", "erbil"], (33.2, 43.7), (29.1, 38.8, 37.4, 48.6)),
    country!("IR", "Iran", ["iran", "iranian", "tehran", "irgc"], (32.4, 53.7), (25.1, 44.0, 39.8, 63.3)),
    country!("SA", "Saudi Arabia", ["saudi arabia", "saudi", "riyadh"], (23.9, 45.1), (16.3, 34.5, 32.2, 55.7)),
    country!("YE", "Yemen", ["yemen", "yemeni", "houthi", "houthis", "sanaa", "aden"], (15.6, 48.5), (12.1, 42.5, 19.0, 54.5)),
    country!("EG", "Egypt", ["egypt", "egyptian", "cairo"], (26.8, 30.8), (22.0, 24.7, 31.7, 36.9)),
    country!("LY", "Libya", ["libya", "libyan", "tripoli", "benghazi"], (26.3, 17.2), (19.5, 9.3, 33.2, 25.2)),
    country!("SD", "Sudan", ["sudan", "sudanese", "khartoum", "darfur"], (12.9, 30.2), (8.7, 21.8, 22.2, 38.6)),
    country!("ET", "Ethiopia", ["ethiopia", "ethiopian", "addis ababa", "tigray", "amhara"], (9.1, 40.5), (3.4, 33.0, 14.9, 48.0)),
    country!("SO", "Somalia", ["somalia", "somali", "mogadishu", "al-shabaab"], (5.2, 46.2), (-1.7, 40.9, 12.0, 51.4)),
    country!("NG", "Nigeria", ["nigeria", "nigerian", "abuja", "lagos"], (9.1, 8.7), (4.2, 2.7, 13.9, 14.7)),
    country!("ML", "Mali", ["mali", "malian", "bamako"], (17.6, -4.0), (10.1, -12.3, 25.0, 4.3)),
    country!("CD", "DR Congo", ["congo", "congolese", "kinshasa", "goma"], (-4.0, 21.8), (-13.5, 12.2, 5.4, 31.3)),
    country!("AF", "Afghanistan", ["afghanistan", "afghan", "kabul", "taliban"], (33.9, 67.7), (29.4, 60.5, 38.5, 74.9)),
    country!("PK", "Pakistan", ["pakistan", "pakistani", "islamabad", "karachi"], (30.4, 69.3), (23.7, 60.9, 37.1, 77.8)),
    country!("IN", "India", ["india", "indian", "new delhi", "kashmir"], (20.6, 79.0), (6.7, 68.1, 35.5, 97.4)),
    country!("MM", "Myanmar", ["myanmar", "burma", "burmese", "naypyidaw", "yangon"], (21.9, 95.9), (9.8, 92.2, 28.5, 101.2)),
    country!("CN", "China", ["china", "chinese", "beijing", "pla"], (35.9, 104.2), (18.2, 73.5, 53.6, 134.8)),
    country!("TW", "Taiwan", ["taiwan", "taiwanese", "taipei"], (23.7, 121.0), (21.9, 120.0, 25.3, 122.0)),
    country!("KP", "North Korea", ["north korea", "north korean", "pyongyang", "dprk"], (40.3, 127.5), (37.7, 124.2, 43.0, 130.7)),
    country!("KR", "South Korea", ["south korea", "south korean", "seoul"], (35.9, 127.8), (33.1, 124.6, 38.6, 131.9)),
    country!("JP", "Japan", ["japan", "japanese", "tokyo"], (36.2, 138.3), (24.0, 122.9, 45.6, 146.0)),
    country!("PH", "Philippines", ["philippines", "philippine", "filipino", "manila"], (12.9, 121.8), (4.6, 116.9, 21.1, 126.6)),
    country!("MX", "Mexico", ["mexico", "mexican"], (23.6, -102.6), (14.5, -118.4, 32.7, -86.7)),
    country!("HT", "Haiti", ["haiti", "haitian", "port-au-prince"], (19.0, -72.3), (18.0, -74.5, 20.1, -71.6)),
    country!("VE", "Venezuela", ["venezuela", "venezuelan", "caracas"], (6.4, -66.6), (0.6, -73.4, 12.2, -59.8)),
    country!("BR", "Brazil", ["brazil", "brazilian", "brasilia"], (-14.2, -51.9), (-33.8, -74.0, 5.3, -34.8)),
];

static MENTION_PATTERNS: LazyLock<Vec<(usize, Regex)>> = LazyLock::new(|| {
    COUNTRIES
        .iter()
        .enumerate()
        .filter_map(|(idx, country)| {
            let alternatives = country
                .aliases
                .iter()
                .map(|alias| regex::escape(alias))
                .collect::<Vec<_>>()
                .join("|");
            Regex::new(&format!(r"(?i)\b(?:{})\b", alternatives))
                .ok()
                .map(|re| (idx, re))
        })
        .collect()
});

/// Look up a country by ISO code (case-insensitive)
pub fn country_by_code(code: &str) -> Option<&'static Country> {
    COUNTRIES.iter().find(|c| c.code.eq_ignore_ascii_case(code))
}

/// Resolve a free-form country field: ISO code, name or alias
pub fn resolve_country(value: &str) -> Option<&'static Country> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Some(country) = country_by_code(value) {
        return Some(country);
    }

    let lowered = value.to_lowercase();
    COUNTRIES
        .iter()
        .find(|c| c.name.eq_ignore_ascii_case(value) || c.aliases.contains(&lowered.as_str()))
}

/// Country whose bounding box contains the point; the smallest box wins
/// where boxes overlap
pub fn locate_country(lat: f64, lon: f64) -> Option<&'static Country> {
    COUNTRIES
        .iter()
        .filter(|c| c.contains(lat, lon))
        .min_by(|a, b| a.bbox_area().total_cmp(&b.bbox_area()))
}

/// Country mentioned earliest in `text`
pub fn country_mentioned_in(text: &str) -> Option<&'static Country> {
    MENTION_PATTERNS
        .iter()
        .filter_map(|(idx, re)| re.find(text).map(|m| (m.start(), *idx)))
        .min()
        .map(|(_, idx)| &COUNTRIES[idx])
}
