//! Country Instability Index
//!
//! Scores each country against its own history rather than a global scale:
//! - Every committed cycle folds the country's signal counts into a rolling
//!   mean/variance per component
//! - Until a country has enough samples it is reported as insufficient data,
//!   never as calm
//! - Once scored, each component is a z-score mapped onto 0 - 100 and the
//!   components are blended by weight
//!
//! `calculate_cii` is pure. `commit_cycle` folds a cycle into the baselines;
//! `record_cycle` only remembers the cycle's scores for the next trend.

use chrono::{DateTime, Duration, Utc};
use geowatch_core::{country_by_code, SignalKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fmt;
use tracing::debug;

use crate::aggregator::CountryData;
use crate::config::{CiiConfig, ComponentWeights};

/// Instability level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstabilityLevel {
    Low,
    Elevated,
    High,
    Critical,
    /// Still learning the country's baseline
    InsufficientData,
}

impl InstabilityLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            InstabilityLevel::Critical
        } else if score >= 60.0 {
            InstabilityLevel::High
        } else if score >= 40.0 {
            InstabilityLevel::Elevated
        } else {
            InstabilityLevel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InstabilityLevel::Low => "low",
            InstabilityLevel::Elevated => "elevated",
            InstabilityLevel::High => "high",
            InstabilityLevel::Critical => "critical",
            InstabilityLevel::InsufficientData => "insufficient_data",
        }
    }
}

impl fmt::Display for InstabilityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a score between cycles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Rising,
    Falling,
    Stable,
}

impl Trend {
    pub fn from_delta(delta: f64, threshold: f64) -> Self {
        if delta > threshold {
            Trend::Rising
        } else if delta < -threshold {
            Trend::Falling
        } else {
            Trend::Stable
        }
    }
}

/// CII components
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Protests,
    Military,
    Outages,
    Conflict,
    Displacement,
    Climate,
    News,
}

impl Component {
    pub const ALL: [Component; 7] = [
        Component::Protests,
        Component::Military,
        Component::Outages,
        Component::Conflict,
        Component::Displacement,
        Component::Climate,
        Component::News,
    ];

    /// Component a signal kind feeds
    pub fn for_kind(kind: SignalKind) -> Self {
        match kind {
            SignalKind::Protest => Component::Protests,
            SignalKind::MilitaryFlight | SignalKind::MilitaryVessel => Component::Military,
            SignalKind::Outage => Component::Outages,
            SignalKind::Conflict => Component::Conflict,
            SignalKind::Displacement => Component::Displacement,
            SignalKind::Climate | SignalKind::Earthquake => Component::Climate,
            SignalKind::NewsCluster => Component::News,
        }
    }

    fn index(self) -> usize {
        self as usize
    }

    pub fn weight(self, weights: &ComponentWeights) -> f64 {
        match self {
            Component::Protests => weights.protests,
            Component::Military => weights.military,
            Component::Outages => weights.outages,
            Component::Conflict => weights.conflict,
            Component::Displacement => weights.displacement,
            Component::Climate => weights.climate,
            Component::News => weights.news,
        }
    }
}

/// Per-component scores, each 0 - 100
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentScores {
    pub protests: f64,
    pub military: f64,
    pub outages: f64,
    pub conflict: f64,
    pub displacement: f64,
    pub climate: f64,
    pub news: f64,
}

impl ComponentScores {
    pub fn get(&self, component: Component) -> f64 {
        match component {
            Component::Protests => self.protests,
            Component::Military => self.military,
            Component::Outages => self.outages,
            Component::Conflict => self.conflict,
            Component::Displacement => self.displacement,
            Component::Climate => self.climate,
            Component::News => self.news,
        }
    }

    fn set(&mut self, component: Component, value: f64) {
        let slot = match component {
            Component::Protests => &mut self.protests,
            Component::Military => &mut self.military,
            Component::Outages => &mut self.outages,
            Component::Conflict => &mut self.conflict,
            Component::Displacement => &mut self.displacement,
            Component::Climate => &mut self.climate,
            Component::News => &mut self.news,
        };
        *slot = value;
    }
}

/// Signal counts per component for one cycle
fn component_counts(data: Option<&CountryData>) -> [f64; 7] {
    let mut counts = [0.0; 7];
    if let Some(data) = data {
        for (kind, n) in &data.counts {
            counts[Component::for_kind(*kind).index()] += *n as f64;
        }
    }
    counts
}

/// Running mean and population variance. Exact (Welford) until `window`
/// samples, exponentially weighted with alpha = 1 / window after.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningStat {
    count: u32,
    mean: f64,
    variance: f64,
}

impl RunningStat {
    pub fn push(&mut self, x: f64, window: u32) {
        if self.count < window {
            self.count += 1;
            let delta = x - self.mean;
            self.mean += delta / self.count as f64;
            self.variance += (delta * (x - self.mean) - self.variance) / self.count as f64;
        } else {
            let alpha = 1.0 / window as f64;
            let diff = x - self.mean;
            let incr = alpha * diff;
            self.mean += incr;
            self.variance = (1.0 - alpha) * (self.variance + diff * incr);
            self.count = self.count.saturating_add(1);
        }
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn stddev(&self) -> f64 {
        self.variance.max(0.0).sqrt()
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

/// A committed score at a point in time
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreSample {
    pub at: DateTime<Utc>,
    pub score: f64,
}

/// Everything the calculator remembers about one country
#[derive(Debug, Clone, Default)]
struct CountryBaseline {
    /// Committed cycles
    samples: u32,
    stats: [RunningStat; 7],
    /// Score of the last committed cycle
    last_score: Option<f64>,
    /// Score seen in the previous refresh cycle
    cycle_score: Option<f64>,
    history: VecDeque<ScoreSample>,
}

/// Instability score for one country
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountryInstabilityScore {
    pub country_code: String,
    pub country_name: String,
    /// `None` while learning
    pub score: Option<f64>,
    pub level: InstabilityLevel,
    pub trend: Trend,
    pub components: ComponentScores,
    pub change_24h: f64,
    /// Committed cycles behind the baseline
    pub samples: u32,
    /// Live signals this cycle
    pub signal_count: usize,
}

impl CountryInstabilityScore {
    pub fn is_learning(&self) -> bool {
        self.level == InstabilityLevel::InsufficientData
    }
}

/// The calculator and its baseline store
#[derive(Debug, Clone)]
pub struct CiiCalculator {
    config: CiiConfig,
    baselines: HashMap<String, CountryBaseline>,
    last_commit_at: Option<DateTime<Utc>>,
}

impl CiiCalculator {
    pub fn new(config: CiiConfig) -> Self {
        Self {
            config,
            baselines: HashMap::new(),
            last_commit_at: None,
        }
    }

    pub fn config(&self) -> &CiiConfig {
        &self.config
    }

    /// Score every country with live signals or a baseline. Highest score
    /// first; learning countries last.
    pub fn calculate_cii(
        &self,
        tallies: &BTreeMap<String, CountryData>,
        now: DateTime<Utc>,
    ) -> Vec<CountryInstabilityScore> {
        let codes: BTreeSet<&str> = tallies
            .keys()
            .map(String::as_str)
            .chain(self.baselines.keys().map(String::as_str))
            .collect();

        let mut scores: Vec<_> = codes
            .into_iter()
            .map(|code| self.score_country(code, tallies.get(code), now))
            .collect();

        scores.sort_by(|a, b| match (a.score, b.score) {
            (Some(x), Some(y)) => y.total_cmp(&x).then_with(|| a.country_code.cmp(&b.country_code)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.country_code.cmp(&b.country_code),
        });
        scores
    }

    fn score_country(
        &self,
        code: &str,
        data: Option<&CountryData>,
        now: DateTime<Utc>,
    ) -> CountryInstabilityScore {
        let baseline = self.baselines.get(code);
        let samples = baseline.map_or(0, |b| b.samples);
        let signal_count = data.map_or(0, |d| d.total());
        let country_name = country_by_code(code).map_or_else(|| code.to_string(), |c| c.name.to_string());

        let Some(baseline) = baseline.filter(|b| b.samples >= self.config.min_samples) else {
            return CountryInstabilityScore {
                country_code: code.to_string(),
                country_name,
                score: None,
                level: InstabilityLevel::InsufficientData,
                trend: Trend::Stable,
                components: ComponentScores::default(),
                change_24h: 0.0,
                samples,
                signal_count,
            };
        };

        let counts = component_counts(data);
        let mut components = ComponentScores::default();
        let mut weighted = 0.0;
        let total_weight = self.config.weights.total();
        for component in Component::ALL {
            let stat = &baseline.stats[component.index()];
            let z = (counts[component.index()] - stat.mean()) / stat.stddev().max(self.config.min_stddev);
            let value = (self.config.neutral_score + self.config.z_scale * z).clamp(0.0, 100.0);
            components.set(component, value);
            weighted += component.weight(&self.config.weights) * value;
        }

        let neutral = self.config.neutral_score;
        let blended = (weighted / total_weight).clamp(0.0, 100.0);
        let (score, trend) = match baseline.cycle_score.or(baseline.last_score) {
            // Quiet countries drift back toward neutral instead of dropping to
            // zero; any drift counts as a direction
            Some(prior) if signal_count == 0 => {
                let score = (neutral + (prior - neutral) * self.config.quiet_decay).clamp(0.0, 100.0);
                (score, Trend::from_delta(score - prior, 0.0))
            }
            Some(prior) => (
                blended,
                Trend::from_delta(blended - prior, self.config.trend_threshold),
            ),
            None => (blended, Trend::Stable),
        };

        CountryInstabilityScore {
            country_code: code.to_string(),
            country_name,
            score: Some(score),
            level: InstabilityLevel::from_score(score),
            trend,
            components,
            change_24h: change_since(&baseline.history, score, now - Duration::hours(24)),
            samples,
            signal_count,
        }
    }

    /// Whether enough time has passed since the last commit
    pub fn commit_due(&self, now: DateTime<Utc>) -> bool {
        self.last_commit_at.map_or(true, |last| {
            now - last >= Duration::minutes(self.config.sample_interval_minutes)
        })
    }

    /// Fold this cycle into the baselines. Scores are taken against the
    /// baseline as it was before the fold.
    pub fn commit_cycle(&mut self, tallies: &BTreeMap<String, CountryData>, now: DateTime<Utc>) {
        let scores = self.calculate_cii(tallies, now);
        let history_interval = Duration::minutes(self.config.history_interval_minutes);
        let window = self.config.baseline_window;
        let capacity = self.config.history_capacity;

        for scored in scores {
            let counts = component_counts(tallies.get(&scored.country_code));
            let baseline = self.baselines.entry(scored.country_code).or_default();

            for component in Component::ALL {
                baseline.stats[component.index()].push(counts[component.index()], window);
            }
            baseline.samples = baseline.samples.saturating_add(1);

            if let Some(score) = scored.score {
                baseline.last_score = Some(score);
                baseline.cycle_score = Some(score);
                let due = baseline
                    .history
                    .back()
                    .map_or(true, |last| now - last.at >= history_interval);
                if due {
                    baseline.history.push_back(ScoreSample { at: now, score });
                    while baseline.history.len() > capacity {
                        baseline.history.pop_front();
                    }
                }
            }
        }

        self.last_commit_at = Some(now);
        debug!("Committed CII cycle for {} countries", self.baselines.len());
    }

    /// Remember this refresh cycle's scores as the reference for the next
    /// cycle's trend and quiet decay. Baselines are left untouched.
    pub fn record_cycle(&mut self, scores: &[CountryInstabilityScore]) {
        for scored in scores {
            let Some(score) = scored.score else { continue };
            if let Some(baseline) = self.baselines.get_mut(&scored.country_code) {
                baseline.cycle_score = Some(score);
            }
        }
    }

    /// Last committed score for a country
    pub fn country_score(&self, country_code: &str) -> Option<f64> {
        self.baselines
            .get(&country_code.to_ascii_uppercase())
            .and_then(|b| b.last_score)
    }

    pub fn samples(&self, country_code: &str) -> u32 {
        self.baselines
            .get(&country_code.to_ascii_uppercase())
            .map_or(0, |b| b.samples)
    }

    /// Committed score history, oldest first
    pub fn history(&self, country_code: &str) -> Vec<ScoreSample> {
        self.baselines
            .get(&country_code.to_ascii_uppercase())
            .map(|b| b.history.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn last_commit_at(&self) -> Option<DateTime<Utc>> {
        self.last_commit_at
    }
}

impl Default for CiiCalculator {
    fn default() -> Self {
        Self::new(CiiConfig::default())
    }
}

/// Score minus the history sample closest to `target`
fn change_since(history: &VecDeque<ScoreSample>, score: f64, target: DateTime<Utc>) -> f64 {
    history
        .iter()
        .min_by_key(|s| (s.at - target).num_seconds().abs())
        .map_or(0.0, |s| score - s.score)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap()
    }

    fn tallies(code: &str, counts: &[(SignalKind, usize)]) -> BTreeMap<String, CountryData> {
        let mut data = CountryData {
            country_code: code.to_string(),
            ..Default::default()
        };
        for (kind, n) in counts {
            data.counts.insert(*kind, *n);
            data.severity_sums.insert(*kind, *n as f64 * 0.5);
        }
        BTreeMap::from([(code.to_string(), data)])
    }

    fn calculator_with_steady_protests(cycles: u32) -> (CiiCalculator, DateTime<Utc>) {
        let mut calc = CiiCalculator::default();
        let mut now = t0();
        for i in 0..cycles {
            let n = if i % 2 == 0 { 2 } else { 4 };
            calc.commit_cycle(&tallies("UA", &[(SignalKind::Protest, n)]), now);
            now += Duration::minutes(30);
        }
        (calc, now)
    }

    #[test]
    fn test_learning_mode_is_flagged() {
        let (calc, now) = calculator_with_steady_protests(3);
        let scores = calc.calculate_cii(&tallies("UA", &[(SignalKind::Protest, 40)]), now);

        assert_eq!(scores.len(), 1);
        let ua = &scores[0];
        assert_eq!(ua.score, None);
        assert_eq!(ua.level, InstabilityLevel::InsufficientData);
        assert_ne!(ua.level, InstabilityLevel::Low);
        assert!(ua.is_learning());
        assert_eq!(ua.samples, 3);
    }

    #[test]
    fn test_spike_scores_above_baseline() {
        let (mut calc, now) = calculator_with_steady_protests(48);
        calc.commit_cycle(&tallies("UA", &[(SignalKind::Protest, 3)]), now);
        let steady = calc.country_score("UA").unwrap();
        assert!((steady - 25.0).abs() < 0.5);

        let later = now + Duration::minutes(30);
        let scores = calc.calculate_cii(&tallies("UA", &[(SignalKind::Protest, 10)]), later);
        let ua = &scores[0];
        let score = ua.score.unwrap();

        assert_eq!(ua.components.protests, 100.0);
        assert!((ua.components.conflict - 25.0).abs() < 1e-9);
        assert!((score - 36.25).abs() < 0.1);
        assert_eq!(ua.trend, Trend::Rising);
        assert_eq!(ua.level, InstabilityLevel::Low);
    }

    #[test]
    fn test_calculate_is_pure() {
        let (calc, now) = calculator_with_steady_protests(50);
        let input = tallies("UA", &[(SignalKind::Protest, 7), (SignalKind::MilitaryFlight, 3)]);

        let first = calc.calculate_cii(&input, now);
        let second = calc.calculate_cii(&input, now);
        assert_eq!(first, second);
        assert_eq!(calc.samples("UA"), 50);
    }

    #[test]
    fn test_quiet_country_decays_toward_neutral() {
        let (mut calc, mut now) = calculator_with_steady_protests(60);
        for _ in 0..3 {
            calc.commit_cycle(&tallies("UA", &[(SignalKind::Protest, 12)]), now);
            now += Duration::minutes(30);
        }
        let mut prior = calc.country_score("UA").unwrap();
        assert!(prior > 35.0);

        // Each quiet step moves less than the trend threshold but still reads as falling
        for _ in 0..8 {
            let scores = calc.calculate_cii(&BTreeMap::new(), now);
            let ua = &scores[0];
            let score = ua.score.unwrap();

            assert_eq!(ua.signal_count, 0);
            assert!((score - (25.0 + (prior - 25.0) * 0.85)).abs() < 1e-9);
            assert!(score > 25.0 && score < prior);
            assert_eq!(ua.trend, Trend::Falling);
            assert_eq!(ua.level, InstabilityLevel::Low);

            calc.commit_cycle(&BTreeMap::new(), now);
            prior = score;
            now += Duration::minutes(30);
        }
    }

    #[test]
    fn test_trend_follows_previous_refresh_cycle() {
        let (mut calc, now) = calculator_with_steady_protests(48);
        calc.commit_cycle(&tallies("UA", &[(SignalKind::Protest, 3)]), now);
        let committed = calc.country_score("UA").unwrap();

        let later = now + Duration::minutes(5);
        let spike = tallies("UA", &[(SignalKind::Protest, 10)]);
        let first = calc.calculate_cii(&spike, later);
        assert_eq!(first[0].trend, Trend::Rising);

        // Between commits the same picture is no longer a change
        calc.record_cycle(&first);
        let second = calc.calculate_cii(&spike, later + Duration::minutes(5));
        assert_eq!(second[0].trend, Trend::Stable);
        assert_eq!(second[0].score, first[0].score);
        assert_eq!(calc.country_score("UA"), Some(committed));
        assert_eq!(calc.samples("UA"), 49);

        // Going quiet decays from the last refresh, not the last commit
        let quiet = calc.calculate_cii(&BTreeMap::new(), later + Duration::minutes(10));
        let expected = 25.0 + (first[0].score.unwrap() - 25.0) * 0.85;
        assert!((quiet[0].score.unwrap() - expected).abs() < 1e-9);
        assert_eq!(quiet[0].trend, Trend::Falling);
    }

    #[test]
    fn test_learning_sorts_last() {
        let mut calc = CiiCalculator::default();
        calc.baselines.insert(
            "SY".to_string(),
            CountryBaseline {
                samples: 60,
                last_score: Some(40.0),
                ..Default::default()
            },
        );
        let scores = calc.calculate_cii(&tallies("AF", &[(SignalKind::Conflict, 2)]), t0());

        assert_eq!(scores[0].country_code, "SY");
        assert_eq!(scores[1].country_code, "AF");
        assert_eq!(scores[1].level, InstabilityLevel::InsufficientData);
    }

    #[test]
    fn test_history_is_hourly_and_bounded() {
        let (calc, _) = calculator_with_steady_protests(48 + 80);
        let history = calc.history("UA");

        assert_eq!(history.len(), 25);
        for pair in history.windows(2) {
            assert!(pair[1].at - pair[0].at >= Duration::hours(1));
        }
    }

    #[test]
    fn test_change_24h_uses_closest_sample() {
        let history = VecDeque::from([
            ScoreSample { at: t0() - Duration::hours(25), score: 30.0 },
            ScoreSample { at: t0() - Duration::hours(20), score: 40.0 },
        ]);
        assert_eq!(change_since(&history, 50.0, t0() - Duration::hours(24)), 20.0);
        assert_eq!(change_since(&VecDeque::new(), 50.0, t0()), 0.0);
    }

    #[test]
    fn test_commit_due() {
        let mut calc = CiiCalculator::default();
        assert!(calc.commit_due(t0()));
        calc.commit_cycle(&BTreeMap::new(), t0());
        assert!(!calc.commit_due(t0() + Duration::minutes(29)));
        assert!(calc.commit_due(t0() + Duration::minutes(30)));
    }

    #[test]
    fn test_running_stat_switches_to_ewma() {
        let mut stat = RunningStat::default();
        for x in [2.0, 4.0, 2.0, 4.0] {
            stat.push(x, 4);
        }
        assert!((stat.mean() - 3.0).abs() < 1e-9);
        assert!((stat.stddev() - 1.0).abs() < 1e-9);

        stat.push(7.0, 4);
        assert!((stat.mean() - 4.0).abs() < 1e-9);
        assert_eq!(stat.count(), 5);
    }

    #[test]
    fn test_levels() {
        assert_eq!(InstabilityLevel::from_score(80.0), InstabilityLevel::Critical);
        assert_eq!(InstabilityLevel::from_score(79.9), InstabilityLevel::High);
        assert_eq!(InstabilityLevel::from_score(40.0), InstabilityLevel::Elevated);
        assert_eq!(InstabilityLevel::from_score(39.9), InstabilityLevel::Low);
        assert_eq!(Trend::from_delta(2.0, 2.0), Trend::Stable);
        assert_eq!(Trend::from_delta(-2.1, 2.0), Trend::Falling);
    }
}
