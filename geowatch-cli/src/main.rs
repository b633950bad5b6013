//! geowatch CLI
//!
//! Replay recorded feeds through the engine, or watch a directory of feed
//! files and refresh them on jittered timers.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use geowatch_core::DATA_SOURCES;
use geowatch_engine::{EngineConfig, EscalationLevel, HotspotRegistry};
use geowatch_runtime::{FeedFileRefresh, FeedKind, Monitor, RefreshScheduler, Replay};

/// Escalation scores decay on this cadence while watching
const DECAY_INTERVAL_SECS: u64 = 300;

#[derive(Parser)]
#[command(name = "geowatch")]
#[command(author, version, about = "geowatch: signal convergence and escalation engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Engine configuration (TOML)
    #[arg(short, long, global = true, env = "GEOWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Directory of extra hotspot TOML files
    #[arg(long, global = true, env = "GEOWATCH_HOTSPOTS")]
    hotspots: Option<PathBuf>,

    /// Verbosity level (0-3)
    #[arg(short, long, global = true, default_value = "1")]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a recorded session (JSON) and print the final picture
    Replay {
        /// Replay file: {"steps": [{"at": ..., "batches": [...]}]}
        file: PathBuf,

        /// Hold back convergence alerts during the start-up learning window
        #[arg(long)]
        learning: bool,

        /// Print the derived state as JSON
        #[arg(long)]
        json: bool,
    },

    /// Watch a directory of <feed>.json files
    Watch {
        /// Directory holding the feed files
        dir: PathBuf,

        /// Refresh interval in seconds
        #[arg(short, long, default_value = "300")]
        interval: u64,

        /// Skip the start-up learning window
        #[arg(long)]
        no_learning: bool,
    },

    /// List configured hotspots
    Hotspots,

    /// List data sources
    Sources,

    /// Print the effective engine configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = match cli.verbose {
        0 => Level::ERROR,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Replay { file, learning, json } => {
            let hotspots = load_hotspots(cli.hotspots.as_deref())?;
            run_replay(&file, config, hotspots, learning, json)?;
        }
        Commands::Watch {
            dir,
            interval,
            no_learning,
        } => {
            let hotspots = load_hotspots(cli.hotspots.as_deref())?;
            run_watch(&dir, interval, config, hotspots, !no_learning).await?;
        }
        Commands::Hotspots => {
            let hotspots = load_hotspots(cli.hotspots.as_deref())?;
            list_hotspots(&hotspots);
        }
        Commands::Sources => list_sources(),
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => {
            let config = EngineConfig::load(path)?;
            info!("Loaded config from {}", path.display());
            Ok(config)
        }
        None => Ok(EngineConfig::default()),
    }
}

fn load_hotspots(dir: Option<&Path>) -> Result<HotspotRegistry> {
    let mut registry = HotspotRegistry::load_embedded();
    if let Some(dir) = dir {
        let added = registry
            .extend_from_dir(dir)
            .with_context(|| format!("loading hotspots from {}", dir.display()))?;
        info!("Loaded {} hotspots from {}", added, dir.display());
    }
    Ok(registry)
}

fn run_replay(
    file: &Path,
    config: EngineConfig,
    hotspots: HotspotRegistry,
    learning: bool,
    json: bool,
) -> Result<()> {
    let content =
        fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    let replay = Replay::from_json(&content)?;

    let Some(first) = replay.steps.first() else {
        println!("Replay {} has no steps", file.display());
        return Ok(());
    };

    let mut monitor = Monitor::new(config, hotspots)?;
    if learning {
        monitor.start_learning(first.at);
    }

    let mut fired = Vec::new();
    let mut end = first.at;
    for step in &replay.steps {
        debug!("Replaying {} batches at {}", step.batches.len(), step.at);
        for batch in &step.batches {
            let summary = monitor.ingest(batch, step.at);
            fired.extend(summary.new_alerts);
        }
        end = step.at;
    }
    monitor.refresh(end);

    if json {
        let signals: Vec<_> = fired
            .iter()
            .map(|a| monitor.geo_convergence_to_signal(a))
            .collect();
        let output = serde_json::json!({
            "at": end,
            "derived": monitor.derived(),
            "signals": signals,
            "escalations": monitor.hotspot_escalations(),
            "freshness": monitor.freshness_summary(end),
            "gaps": monitor.intelligence_gaps(end),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("📼 Replayed {} steps from {}\n", replay.steps.len(), file.display());
    if fired.is_empty() {
        println!("No convergence alerts fired.");
    } else {
        println!("🚨 Convergence alerts fired: {}", fired.len());
        for alert in &fired {
            let signal = monitor.geo_convergence_to_signal(alert);
            println!("   {} | {}", signal.title, signal.description);
        }
    }
    println!();
    print_status(&monitor, end);
    Ok(())
}

async fn run_watch(
    dir: &Path,
    interval_secs: u64,
    config: EngineConfig,
    hotspots: HotspotRegistry,
    learning: bool,
) -> Result<()> {
    if !dir.is_dir() {
        anyhow::bail!("Feed directory not found: {}", dir.display());
    }

    let monitor = Monitor::new(config, hotspots)?.shared();
    if learning {
        monitor.lock().start_learning(Utc::now());
    }

    let scheduler = RefreshScheduler::default();
    let interval = Duration::from_secs(interval_secs.max(1));

    let mut feeds = 0;
    for kind in FeedKind::ALL {
        let path = kind.path_in(dir);
        if !path.is_file() {
            debug!("No {} feed at {}", kind, path.display());
            monitor.lock().freshness_mut().set_enabled(kind.source(), false);
            continue;
        }
        let task = FeedFileRefresh::new(kind, path, Arc::clone(&monitor));
        scheduler.schedule(kind.as_str(), Arc::new(task), interval, None);
        feeds += 1;
    }
    if feeds == 0 {
        anyhow::bail!("No feed files found in {}", dir.display());
    }

    let decay_monitor = Arc::clone(&monitor);
    scheduler.schedule(
        "escalation-decay",
        Arc::new(move || {
            let monitor = Arc::clone(&decay_monitor);
            async move {
                monitor.lock().decay_escalations(Utc::now());
                anyhow::Ok(())
            }
        }),
        Duration::from_secs(DECAY_INTERVAL_SECS),
        None,
    );

    println!("👁️  Watching {} feeds in {} every {}s", feeds, dir.display(), interval_secs);
    for (name, result) in scheduler.trigger_all().await {
        if let Err(e) = result {
            warn!("Initial load of {} failed: {}", name, e);
        }
    }
    print_status(&monitor.lock(), Utc::now());

    tokio::signal::ctrl_c().await?;
    scheduler.shutdown();

    println!("\n⏹️  Stopped");
    print_status(&monitor.lock(), Utc::now());
    Ok(())
}

fn print_status(monitor: &Monitor, now: DateTime<Utc>) {
    let derived = monitor.derived();

    println!("📍 Active convergence alerts: {}", derived.alerts.len());
    for alert in &derived.alerts {
        let kinds: Vec<_> = alert.signal_kinds.iter().map(|k| k.label()).collect();
        println!(
            "   {} score {:.0}: {} ({} events)",
            alert.id,
            alert.score,
            kinds.join(", "),
            alert.event_count
        );
    }

    println!("🌍 Country clusters: {}", derived.clusters.len());
    for cluster in derived.clusters.iter().take(10) {
        println!(
            "   {} ({}) score {:.0}, {} kinds, {} events",
            cluster.country_name,
            cluster.country_code,
            cluster.convergence_score,
            cluster.signal_types.len(),
            cluster.event_count
        );
    }
    for region in &derived.regional {
        println!("   ↔ {}", region.description);
    }

    println!("📈 Instability:");
    for score in derived.instability.iter().take(15) {
        match score.score {
            Some(value) => println!(
                "   {:<3} {:>5.1} {:<9} {:?} ({:+.1} 24h)",
                score.country_code, value, score.level.as_str(), score.trend, score.change_24h
            ),
            None => println!(
                "   {:<3}   --  learning ({} samples)",
                score.country_code, score.samples
            ),
        }
    }

    let escalated: Vec<_> = monitor
        .hotspot_escalations()
        .into_iter()
        .filter(|e| e.level != EscalationLevel::Low)
        .collect();
    if !escalated.is_empty() {
        println!("🔥 Escalated hotspots:");
        for e in escalated {
            let name = monitor
                .hotspots()
                .get(&e.hotspot_id)
                .map_or(e.hotspot_id.as_str(), |h| h.name.as_str());
            println!("   {} {:.2} {} {:?}", name, e.score, e.level, e.trend);
        }
    }

    let summary = monitor.freshness_summary(now);
    println!(
        "📡 Sources: {}/{} active, coverage {}% ({:?})",
        summary.active_sources, summary.total_sources, summary.coverage_percent, summary.overall
    );
    for gap in monitor.intelligence_gaps(now) {
        println!("   ⚠️  [{:?}] {}", gap.severity, gap.message);
    }
}

fn list_hotspots(registry: &HotspotRegistry) {
    println!("{} hotspots:\n", registry.len());
    for hotspot in registry.iter() {
        let state = if hotspot.enabled { "" } else { " (disabled)" };
        println!(
            "  {:<10} {}{} @ {:.2}, {:.2}",
            hotspot.id, hotspot.name, state, hotspot.lat, hotspot.lon
        );
        println!("             countries: {}", hotspot.countries.join(", "));
        println!("             keywords:  {}", hotspot.keywords.join(", "));
    }
}

fn list_sources() {
    println!("{} data sources:\n", DATA_SOURCES.len());
    for source in DATA_SOURCES {
        let marker = if source.required_for_risk { "★" } else { " " };
        println!("  {} {:<15} {}", marker, source.id.as_str(), source.name);
    }
    println!("\n★ required for risk assessment");
}
