//! zonetrack-sync - Sensor reading sync service
//!
//! Mirrors the reading table of a legacy `.mdb` container into the SQLite
//! reading store and keeps it current while the container is being appended
//! to.
//!
//! **Commands:**
//! - `watch` (default): initial sync, then debounced resync on file changes
//! - `sync`: one sync cycle, report printed as JSON
//! - `inspect`: raw source records next to their normalization outcome
//! - `stats`: combined zone statistics for a time range

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde_json::json;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use zonetrack_common::config::{
    default_config_path, load_toml_config, resolve_database_path, resolve_logging, CompiledDefaults,
    ConfigOverrides, LoggingConfig, SyncConfig,
};
use zonetrack_common::{ReadingStore, ReadingTime};
use zonetrack_sync::normalize::normalize;
use zonetrack_sync::source::{MdbJsonReader, SourceReader};
use zonetrack_sync::watch::run_watch_loop;
use zonetrack_sync::{CycleOutcome, SyncOrchestrator};

/// Command-line arguments for zonetrack-sync
#[derive(Parser, Debug)]
#[command(name = "zonetrack-sync")]
#[command(about = "Incremental sync of sensor readings from an .mdb container into SQLite")]
#[command(version)]
struct Args {
    /// TOML config file (default: <config dir>/zonetrack/config.toml)
    #[arg(short, long, env = "ZONETRACK_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Source .mdb container
    #[arg(short, long, env = "MDB_FILE_PATH", global = true)]
    source: Option<PathBuf>,

    /// SQLite reading store
    #[arg(short, long, env = "ZONETRACK_DATABASE", global = true)]
    database: Option<PathBuf>,

    /// Readings per insert transaction
    #[arg(long, env = "ZONETRACK_BATCH_SIZE", global = true)]
    batch_size: Option<usize>,

    /// Quiet interval in milliseconds before a change triggers a resync
    #[arg(long, env = "ZONETRACK_DEBOUNCE_MS", global = true)]
    debounce_ms: Option<u64>,

    /// Reading table inside the container
    #[arg(long, global = true)]
    table: Option<String>,

    /// Exporter program printing table rows as JSON lines
    #[arg(long, global = true)]
    exporter: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Initial sync, then watch the source and resync on change
    Watch,
    /// Run one sync cycle and print its report
    Sync,
    /// Print raw source records and how they normalize
    Inspect {
        /// Number of records to show
        #[arg(short, long, default_value_t = 5)]
        limit: usize,
    },
    /// Print zone statistics for a time range
    Stats {
        /// Range start (`YYYY-MM-DD` or `YYYY-MM-DDTHH:MM:SS`)
        #[arg(long)]
        start: String,
        /// Range end, inclusive (`YYYY-MM-DD` covers the whole day)
        #[arg(long)]
        end: String,
    },
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            source_path: self.source.clone(),
            database_path: self.database.clone(),
            table: self.table.clone(),
            batch_size: self.batch_size,
            debounce_ms: self.debounce_ms,
            exporter: self.exporter.clone(),
            log_level: self.log_level.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let overrides = args.overrides();
    let toml = load_toml_config(args.config.as_deref()).context("Failed to load configuration")?;
    let defaults = CompiledDefaults::for_current_platform();

    init_tracing(&resolve_logging(&overrides, &toml))?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git = env!("GIT_HASH"),
        built = env!("BUILD_TIMESTAMP"),
        profile = env!("BUILD_PROFILE"),
        "Starting zonetrack-sync"
    );
    log_config_origin(args.config.as_deref());

    let database = resolve_database_path(&overrides, &toml, &defaults);
    let resolve = move || SyncConfig::resolve(overrides, toml, &defaults).context("Invalid configuration");

    match args.command.unwrap_or(Command::Watch) {
        Command::Watch => run_watch(resolve()?).await,
        Command::Sync => run_sync(resolve()?).await,
        Command::Inspect { limit } => run_inspect(resolve()?, limit).await,
        Command::Stats { start, end } => run_stats(&database, &start, &end).await,
    }
}

// ============================================================================
// Commands
// ============================================================================

async fn run_watch(config: SyncConfig) -> Result<()> {
    let orchestrator = Arc::new(open_orchestrator(&config).await?);

    let outcome = orchestrator.startup().await.context("Initial sync failed")?;
    log_outcome(&outcome);

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_cancel.cancel();
    });

    run_watch_loop(orchestrator, &config.source_path, config.debounce, cancel)
        .await
        .context("Watch loop failed")?;

    info!("Sync service stopped");
    Ok(())
}

async fn run_sync(config: SyncConfig) -> Result<()> {
    let orchestrator = open_orchestrator(&config).await?;
    let outcome = orchestrator.startup().await.context("Sync failed")?;
    log_outcome(&outcome);

    if let CycleOutcome::Synced(report) = outcome {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}

async fn run_inspect(config: SyncConfig, limit: usize) -> Result<()> {
    ensure_source_exists(&config.source_path)?;
    let reader = MdbJsonReader::new(&config.source_path, &config.table, &config.exporter);
    let records = reader.read().await.context("Failed to read source")?;
    info!(total = records.len(), "Read source records");

    let samples: Vec<_> = records
        .iter()
        .take(limit)
        .map(|record| match normalize(record) {
            Ok(reading) => json!({ "original": record, "processed": reading }),
            Err(reason) => json!({
                "original": record,
                "skipped": reason.label(),
                "reason": reason.to_string(),
            }),
        })
        .collect();

    println!("{}", serde_json::to_string_pretty(&samples)?);
    Ok(())
}

async fn run_stats(database: &Path, start: &str, end: &str) -> Result<()> {
    let start = parse_range_bound(start, false)?;
    let end = parse_range_bound(end, true)?;
    if start > end {
        bail!("Range start {} is after range end {}", start, end);
    }

    let store = ReadingStore::open(database)
        .await
        .with_context(|| format!("Failed to open reading store {}", database.display()))?;
    let stats = store.get_statistics(start, end).await?;
    let rows = store.get_readings(start, end, 0, 0).await?.total;

    let output = json!({
        "start": start,
        "end": end,
        "rows": rows,
        "statistics": stats,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

async fn open_orchestrator(config: &SyncConfig) -> Result<SyncOrchestrator<MdbJsonReader>> {
    ensure_source_exists(&config.source_path)?;
    info!("Source: {} (table {})", config.source_path.display(), config.table);
    info!("Database: {}", config.database_path.display());

    let store = ReadingStore::open(&config.database_path)
        .await
        .with_context(|| format!("Failed to open reading store {}", config.database_path.display()))?;

    let reader = MdbJsonReader::new(&config.source_path, &config.table, &config.exporter);
    Ok(SyncOrchestrator::new(
        reader,
        store,
        &config.source_path,
        config.batch_size,
    ))
}

fn ensure_source_exists(path: &Path) -> Result<()> {
    if !path.is_file() {
        bail!("Source file not found: {}", path.display());
    }
    Ok(())
}

fn parse_range_bound(text: &str, end: bool) -> Result<ReadingTime> {
    if let Ok(ts) = ReadingTime::parse(text) {
        return Ok(ts);
    }
    let date = NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d")
        .with_context(|| format!("'{}' is neither YYYY-MM-DD nor YYYY-MM-DDTHH:MM:SS", text))?;
    let bound = if end {
        ReadingTime::end_of_day(date)
    } else {
        ReadingTime::start_of_day(date)
    };
    bound.with_context(|| format!("'{}' is out of the supported range", text))
}

fn log_outcome(outcome: &CycleOutcome) {
    match outcome {
        CycleOutcome::Synced(report) => info!(
            scanned = report.scanned,
            skipped = report.skipped,
            new = report.new_readings,
            rows = report.rows_written,
            watermark = ?report.watermark,
            "Sync complete"
        ),
        CycleOutcome::Unchanged => info!("Source unchanged"),
        CycleOutcome::AlreadyRunning => info!("Sync already running"),
    }
}

fn log_config_origin(explicit: Option<&Path>) {
    match explicit {
        Some(path) => info!("Config file: {}", path.display()),
        None => match default_config_path() {
            Some(path) if path.exists() => info!("Config file: {}", path.display()),
            Some(path) => warn!("No config file at {}, using defaults", path.display()),
            None => warn!("Could not determine config directory, using defaults"),
        },
    }
}

/// Install the global subscriber
///
/// `RUST_LOG` wins over the configured level. With `logging.file` set, output
/// is appended to that file without ANSI colors.
fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .with_context(|| format!("Invalid log level '{}'", logging.level))?;

    let registry = tracing_subscriber::registry().with(filter);

    match &logging.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            registry
                .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
                .init();
        }
        None => {
            registry.with(fmt::layer().with_writer(std::io::stderr)).init();
        }
    }

    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
