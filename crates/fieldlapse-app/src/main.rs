use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use fieldlapse_app::settings::load_settings;
use fieldlapse_app::sinks::{PngDirectorySink, PngStreamSink};
use fieldlapse_core::{ReplayDriver, ReplaySummary, WorldSim};
use fieldlapse_feed::{FeedConfig, Ingester};
use fieldlapse_storage::HistoryStore;
use owo_colors::OwoColorize;
use serde_json::Value as JsonValue;
use std::{
    fs,
    path::{Path, PathBuf},
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "fieldlapse",
    version,
    about = "Reconstruct and replay territorial history from an activity feed"
)]
struct AppCli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Walk the activity feed backwards and persist normalized history.
    Ingest {
        /// Feed endpoint URL answering plext page requests.
        #[arg(long, env = "FIELDLAPSE_FEED_URL")]
        endpoint: String,
        /// JSON file holding the opaque base request payload captured from
        /// a prior request.
        #[arg(long, value_name = "FILE", env = "FIELDLAPSE_BASE_PAYLOAD")]
        payload: PathBuf,
        /// History database path.
        #[arg(long, default_value = "fieldlapse.duckdb", env = "FIELDLAPSE_DB")]
        db: PathBuf,
        /// Lookback window in hours from now.
        #[arg(long, default_value_t = 24.0)]
        hours: f64,
        /// Replay configuration layers; when given, the lookback floor is
        /// derived from their recording window and history context instead
        /// of --hours.
        #[arg(
            long = "config",
            value_name = "FILE",
            action = ArgAction::Append,
            env = "FIELDLAPSE_CONFIG",
            value_delimiter = ';'
        )]
        config_layers: Vec<PathBuf>,
        /// Delay between page fetches in milliseconds.
        #[arg(long, default_value_t = 1_500)]
        page_delay_ms: u64,
    },
    /// Replay stored history into PNG frames.
    Replay {
        /// History database path.
        #[arg(long, default_value = "fieldlapse.duckdb", env = "FIELDLAPSE_DB")]
        db: PathBuf,
        /// Layered configuration files (TOML or RON) applied in order.
        #[arg(
            long = "config",
            value_name = "FILE",
            action = ArgAction::Append,
            env = "FIELDLAPSE_CONFIG",
            value_delimiter = ';'
        )]
        config_layers: Vec<PathBuf>,
        /// Output directory for numbered frames; "-" streams PNGs to stdout.
        #[arg(long, default_value = "frames")]
        out: PathBuf,
        /// Emit one frame per visible change instead of fixed time steps.
        #[arg(long)]
        per_action: bool,
        /// Override the time step in seconds for stepped replay.
        #[arg(long, value_name = "SECONDS")]
        step_seconds: Option<u32>,
    },
    /// Summarize a history database.
    Stats {
        /// History database path.
        #[arg(long, default_value = "fieldlapse.duckdb", env = "FIELDLAPSE_DB")]
        db: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = AppCli::parse();
    match cli.command {
        Command::Ingest {
            endpoint,
            payload,
            db,
            hours,
            config_layers,
            page_delay_ms,
        } => run_ingest(endpoint, &payload, &db, hours, &config_layers, page_delay_ms).await,
        Command::Replay {
            db,
            config_layers,
            out,
            per_action,
            step_seconds,
        } => run_replay(&db, &config_layers, &out, per_action, step_seconds),
        Command::Stats { db } => run_stats(&db),
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn now_ms() -> Result<i64> {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock before epoch")?;
    Ok(elapsed.as_millis() as i64)
}

async fn run_ingest(
    endpoint: String,
    payload_path: &Path,
    db: &Path,
    hours: f64,
    config_layers: &[PathBuf],
    page_delay_ms: u64,
) -> Result<()> {
    let payload_text = fs::read_to_string(payload_path)
        .with_context(|| format!("failed to read base payload {}", payload_path.display()))?;
    let base_payload: JsonValue = serde_json::from_str(&payload_text)
        .with_context(|| format!("base payload {} is not JSON", payload_path.display()))?;

    let mut config = FeedConfig::new(endpoint, base_payload);
    config.page_delay = Duration::from_millis(page_delay_ms);

    let start_ms = now_ms()?;
    let stop_before_ms = if config_layers.is_empty() {
        start_ms - (hours * 3_600_000.0) as i64
    } else {
        let settings = load_settings(config_layers)?;
        settings.replay.ingest_floor_ms()
    };
    info!(
        start_ms,
        stop_before_ms, hours, "walking feed back to lookback floor"
    );

    let mut store = HistoryStore::open(db)
        .with_context(|| format!("failed to open history database {}", db.display()))?;
    let ingester = Ingester::new(config)?;

    let stop = ingester.stop_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; finishing current page");
            stop.store(true, std::sync::atomic::Ordering::Relaxed);
        }
    });

    let summary = ingester.run(&mut store, start_ms, stop_before_ms).await?;
    println!(
        "{} pages={} records={} dropped={} actions={} portals={}",
        "ingest complete".bold().green(),
        summary.pages,
        summary.records_seen,
        summary.records_dropped,
        summary.actions_stored,
        summary.portals_stored,
    );
    if let Some(oldest) = summary.oldest_reached_ms {
        println!("{} {}", "oldest timestamp reached".bold().cyan(), oldest);
    }
    Ok(())
}

fn run_replay(
    db: &Path,
    config_layers: &[PathBuf],
    out: &Path,
    per_action: bool,
    step_seconds: Option<u32>,
) -> Result<()> {
    let mut settings = load_settings(config_layers)?;
    if per_action {
        settings.replay.per_action = true;
    }
    if let Some(step) = step_seconds {
        settings.replay.step_seconds = step;
    }

    let mut store = HistoryStore::open(db)
        .with_context(|| format!("failed to open history database {}", db.display()))?;
    let portals = store.load_portals()?;
    let actions = store.load_actions()?;
    info!(
        portals = portals.len(),
        actions = actions.len(),
        "loaded history for replay"
    );

    let mut sim = WorldSim::new(portals);
    let driver = ReplayDriver::new(settings.replay.clone())?;

    let halt = driver.halt_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; halting replay");
            halt.store(true, std::sync::atomic::Ordering::Relaxed);
        }
    });

    let (summary, written, failures) = if out == Path::new("-") {
        let stdout = std::io::stdout();
        let mut sink = PngStreamSink::new(stdout.lock(), settings.render)?;
        let summary = driver.run(&mut sim, &actions, &mut sink);
        (summary, sink.frames_written(), sink.failures())
    } else {
        let mut sink = PngDirectorySink::new(out.to_path_buf(), settings.render)?;
        let summary = driver.run(&mut sim, &actions, &mut sink);
        (summary, sink.frames_written(), sink.failures())
    };

    print_replay_summary(&summary, written, failures);
    if failures > 0 {
        anyhow::bail!("{failures} frames failed to render or write");
    }
    Ok(())
}

fn print_replay_summary(summary: &ReplaySummary, written: usize, failures: usize) {
    let headline = if summary.halted {
        "replay halted".bold().yellow().to_string()
    } else {
        "replay complete".bold().green().to_string()
    };
    println!(
        "{headline} actions={} visible={} frames={} written={} failures={}",
        summary.actions_applied,
        summary.visible_changes,
        summary.frames_emitted,
        written,
        failures,
    );
    if let Some(ts) = summary.last_timestamp_ms {
        println!("{} {}", "last action timestamp".bold().cyan(), ts);
    }
}

fn run_stats(db: &Path) -> Result<()> {
    let mut store = HistoryStore::open(db)
        .with_context(|| format!("failed to open history database {}", db.display()))?;
    let portals = store.portal_count()?;
    let actions = store.action_count()?;
    println!("{} {}", "portals".bold().cyan(), portals);
    println!("{} {}", "actions".bold().cyan(), actions);
    match store.time_bounds()? {
        Some(bounds) => {
            let span_hours = (bounds.newest_ms - bounds.oldest_ms) as f64 / 3_600_000.0;
            println!(
                "{} {} .. {} ({span_hours:.1} h)",
                "time range".bold().cyan(),
                bounds.oldest_ms,
                bounds.newest_ms,
            );
        }
        None => println!("{}", "no actions stored yet".yellow()),
    }
    Ok(())
}
