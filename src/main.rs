//! VALR order book recorder entry point.

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use orderbook_recorder::config::Config;
use orderbook_recorder::metrics;
use orderbook_recorder::store::{parse_time_bound, Bound, SnapshotQuery, SnapshotStore};
use orderbook_recorder::supervisor;
use orderbook_recorder::utils::{format_duration, shutdown_signal};

/// VALR order book recorder.
#[derive(Parser, Debug)]
#[command(name = "orderbook-recorder")]
#[command(about = "Record VALR order book snapshots to SQLite for later analysis")]
#[command(version)]
struct Args {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record order books for the configured pairs (default).
    Record(RecordArgs),

    /// Show database statistics.
    Stats {
        /// Trading pair (e.g. BTC-ZAR).
        #[arg(long, required_unless_present = "all", conflicts_with = "all")]
        pair: Option<String>,

        /// Show every configured pair with a database.
        #[arg(long)]
        all: bool,
    },

    /// Export snapshots to CSV.
    Export {
        /// Trading pair (e.g. BTC-ZAR).
        #[arg(long)]
        pair: String,

        /// Output CSV file.
        #[arg(short, long)]
        output: PathBuf,

        /// Start time (YYYY-MM-DD or RFC 3339).
        #[arg(long)]
        start: Option<String>,

        /// End time (YYYY-MM-DD or RFC 3339).
        #[arg(long)]
        end: Option<String>,

        /// Keep ladders as JSON columns instead of flattening them.
        #[arg(long)]
        raw: bool,
    },

    /// Print recent snapshots.
    Query {
        /// Trading pair (e.g. BTC-ZAR).
        #[arg(long)]
        pair: String,

        /// Maximum number of snapshots.
        #[arg(short, long, default_value = "10")]
        limit: usize,

        /// Start time (YYYY-MM-DD or RFC 3339).
        #[arg(long)]
        start: Option<String>,

        /// End time (YYYY-MM-DD or RFC 3339).
        #[arg(long)]
        end: Option<String>,
    },

    /// Check configuration validity.
    CheckConfig,
}

#[derive(ClapArgs, Debug, Default)]
struct RecordArgs {
    /// Trading pairs to record (overrides TRADING_PAIRS).
    #[arg(long, num_args = 1..)]
    pairs: Option<Vec<String>>,

    /// Ladder levels per side (overrides DEPTH_LEVELS).
    #[arg(long)]
    depth: Option<usize>,

    /// Recording duration in days (overrides DURATION_DAYS).
    #[arg(long)]
    days: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Load configuration before logging so RUST_LOG from .env applies
    let config = Config::load();

    // Initialize logging
    let filter = if args.verbose {
        EnvFilter::new("orderbook_recorder=debug,info")
    } else {
        let level = config.as_ref().map(|c| c.rust_log.as_str()).unwrap_or("info");
        EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let config = config.map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    // Handle subcommands
    match args.command {
        Some(Command::CheckConfig) => cmd_check_config(&config),
        Some(Command::Stats { pair, all }) => cmd_stats(&config, pair, all),
        Some(Command::Export {
            pair,
            output,
            start,
            end,
            raw,
        }) => cmd_export(&config, &pair, output, start, end, raw),
        Some(Command::Query {
            pair,
            limit,
            start,
            end,
        }) => cmd_query(&config, &pair, limit, start, end),
        Some(Command::Record(record)) => cmd_record(config, record).await,
        None => cmd_record(config, RecordArgs::default()).await,
    }
}

/// Record all configured pairs until the duration elapses or a signal arrives.
async fn cmd_record(mut config: Config, args: RecordArgs) -> anyhow::Result<()> {
    // Override with CLI args if provided
    if let Some(pairs) = args.pairs {
        config.trading_pairs = pairs;
    }
    if let Some(depth) = args.depth {
        config.depth_levels = depth;
    }
    if let Some(days) = args.days {
        config.duration_days = days;
    }

    // Validate configuration
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return Err(anyhow::anyhow!("Configuration validation failed: {}", e));
    }

    metrics::init_metrics();
    if let Some(port) = config.metrics_port {
        metrics::install_prometheus(port)?;
    }

    info!("========================================");
    info!("VALR ORDER BOOK RECORDER STARTED");
    info!("========================================");
    info!("Pairs: {}", config.trading_pairs.join(", "));
    info!("Depth: {} levels", config.depth_levels);
    info!("Duration: {} days", config.duration_days);
    info!("Data dir: {}", config.data_dir.display());
    info!("========================================");

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_cancel.cancel();
    });

    let pairs = config.trading_pairs.clone();
    let outcomes = supervisor::run_all(&config, &pairs, cancel).await;

    let mut failed = 0;
    for outcome in &outcomes {
        match &outcome.result {
            Ok(summary) => info!(
                "{}: {} snapshots in {} ({})",
                summary.trading_pair,
                summary.snapshots,
                format_duration(summary.elapsed.as_secs()),
                summary.stop_reason
            ),
            Err(e) => {
                failed += 1;
                error!("{}: {}", outcome.trading_pair, e);
            }
        }
    }

    if failed > 0 {
        return Err(anyhow::anyhow!("{} of {} collectors failed", failed, outcomes.len()));
    }
    Ok(())
}

/// Check configuration validity.
fn cmd_check_config(config: &Config) -> anyhow::Result<()> {
    println!("======================================================================");
    println!("VALR ORDER BOOK RECORDER - CONFIGURATION CHECK");
    println!("======================================================================");

    print!("Validating configuration... ");
    match config.validate() {
        Ok(()) => println!("OK"),
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Configuration validation failed"));
        }
    }

    println!("----------------------------------------------------------------------");
    println!("Configuration Summary:");
    println!("  Trading Pairs: {}", config.trading_pairs.join(", "));
    println!("  Depth Levels: {}", config.depth_levels);
    println!("  Duration: {} days", config.duration_days);
    println!("  Data Dir: {}", config.data_dir.display());
    println!("  WebSocket: {}", config.valr_ws_url);
    println!("  Reconnect Delay: {}s", config.reconnect_delay_secs);
    println!("  Progress Interval: {}s", config.progress_interval_secs);
    match config.metrics_port {
        Some(port) => println!("  Metrics: port {}", port),
        None => println!("  Metrics: Disabled"),
    }
    println!("======================================================================");
    println!("CONFIGURATION CHECK PASSED");
    println!("======================================================================");

    Ok(())
}

/// Print statistics for one pair or every configured pair.
fn cmd_stats(config: &Config, pair: Option<String>, all: bool) -> anyhow::Result<()> {
    let pairs = match pair {
        Some(pair) if !all => vec![pair],
        _ => config.trading_pairs.clone(),
    };

    println!("======================================================================");
    println!("VALR ORDER BOOK RECORDER - DATABASE STATISTICS");
    println!("======================================================================");

    let mut shown = 0;
    for pair in &pairs {
        let path = config.db_path(pair);
        if !path.exists() {
            if all {
                continue;
            }
            return Err(anyhow::anyhow!("No database found for {} at {}", pair, path.display()));
        }

        let store = SnapshotStore::open(&path)?;
        let count = store.count(Some(pair))?;
        let size_mb = store.size_on_disk_mb()?;
        let sessions = store.sessions()?;

        println!("{}", pair);
        println!("  Database: {}", path.display());
        println!("  Snapshots: {}", count);
        println!("  Size: {:.2} MB", size_mb);
        println!("  Sessions: {}", sessions.len());
        if let Some((first, last)) = store.time_coverage(Some(pair))? {
            let span = (last - first).num_seconds().max(0) as u64;
            println!("  First: {}", first.to_rfc3339());
            println!("  Last: {}", last.to_rfc3339());
            println!("  Span: {}", format_duration(span));
        }
        println!("----------------------------------------------------------------------");
        shown += 1;
    }

    if shown == 0 {
        warn!("No databases found in {}", config.data_dir.display());
    }
    Ok(())
}

/// Export one pair's snapshots to CSV.
fn cmd_export(
    config: &Config,
    pair: &str,
    output: PathBuf,
    start: Option<String>,
    end: Option<String>,
    raw: bool,
) -> anyhow::Result<()> {
    let store = open_existing(config, pair)?;
    let start = start.map(|s| parse_time_bound(&s, Bound::Start)).transpose()?;
    let end = end.map(|s| parse_time_bound(&s, Bound::End)).transpose()?;

    let rows = store.export_csv(&output, start, end, !raw)?;
    println!("Exported {} snapshots to {}", rows, output.display());
    Ok(())
}

/// Print the earliest snapshots in a time range.
fn cmd_query(
    config: &Config,
    pair: &str,
    limit: usize,
    start: Option<String>,
    end: Option<String>,
) -> anyhow::Result<()> {
    let store = open_existing(config, pair)?;
    let start = start.map(|s| parse_time_bound(&s, Bound::Start)).transpose()?;
    let end = end.map(|s| parse_time_bound(&s, Bound::End)).transpose()?;

    let query = SnapshotQuery::all().pair(pair).between(start, end).limit(limit);
    let rows = store.query(&query)?;

    println!("Found {} snapshots", rows.len());
    for row in &rows {
        let s = &row.snapshot;
        println!(
            "[{}] mid={} spread={} bids={} asks={}",
            s.timestamp.to_rfc3339(),
            s.mid_price.map(|d| d.to_string()).unwrap_or_else(|| "-".to_string()),
            s.spread.map(|d| d.to_string()).unwrap_or_else(|| "-".to_string()),
            s.bids.len(),
            s.asks.len()
        );
    }
    Ok(())
}

fn open_existing(config: &Config, pair: &str) -> anyhow::Result<SnapshotStore> {
    let path = config.db_path(pair);
    if !path.exists() {
        return Err(anyhow::anyhow!("No database found for {} at {}", pair, path.display()));
    }
    Ok(SnapshotStore::open(&path)?)
}
