//! Log Harvester
//!
//! Polls configured game servers for new kill-CSV and text-log lines and
//! appends the parsed events to per-server JSON-lines files.
//!
//! # Usage
//!
//! ```bash
//! # Harvest every configured server until Ctrl+C
//! harvester run
//!
//! # Re-read a server's CSV stream from the first line
//! harvester reset-cursor --server 7020 --kind csv
//!
//! # Recompute and print prey/nemesis for a server
//! harvester rivalries --server 7020
//!
//! # Connect, discover files and estimate the unread backlog
//! harvester inspect --server 7020
//!
//! # Parse a local file offline and print events as JSON lines
//! harvester parse --kind csv ./2025.05.01-00.00.00.csv
//! ```
//!
//! # Environment Variables
//!
//! - `HARVESTER_CONFIG`: Path to the TOML configuration (default: ./harvester.toml)
//! - `RUST_LOG`: Logging level (default: info)

use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use log_harvester::config::{self, HarvestConfig};
use log_harvester::parsing::parsers_from_config;
use log_harvester::pipeline::{
    batch_to_jsonl, build_harvester, recompute_rivalries, run_rivalries, run_server, EventSink, JsonlSink,
    MemorySink, TallyingSink,
};
use log_harvester::storage::{CursorStore, HarvestStore, TallyStore};
use log_harvester::transport::connector_for;
use log_harvester::types::{EventBatch, FileKind};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "harvester")]
#[command(about = "Remote game-server log harvester")]
#[command(version)]
struct CliArgs {
    /// Path to the TOML configuration (overrides HARVESTER_CONFIG)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON objects instead of text
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<SubCommand>,
}

#[derive(clap::Subcommand, Debug)]
enum SubCommand {
    /// Harvest all configured servers until interrupted (default)
    Run,

    /// Delete the cursor of one stream so it is read again from line 0
    ResetCursor {
        #[arg(long)]
        server: String,
        /// csv or log
        #[arg(long)]
        kind: FileKind,
    },

    /// Recompute prey/nemesis for a server and print them
    Rivalries {
        #[arg(long)]
        server: String,
    },

    /// Connect to a server, locate both files and estimate the unread backlog
    Inspect {
        #[arg(long)]
        server: String,
    },

    /// Parse a local file and print the events as JSON lines
    Parse {
        /// csv or log
        #[arg(long)]
        kind: FileKind,
        file: PathBuf,
    },
}

/// Supervised task identifiers.
#[derive(Debug)]
enum TaskName {
    Harvest(String),
    Rivalry,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskName::Harvest(id) => write!(f, "Harvest:{}", id),
            TaskName::Rivalry => write!(f, "Rivalry"),
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<HarvestConfig> {
    match path {
        Some(p) => HarvestConfig::load_from_file(p).with_context(|| format!("Failed to load {}", p.display())),
        None => Ok(HarvestConfig::load()),
    }
}

// ============================================================================
// Harvest
// ============================================================================

async fn run_harvest(cancel_token: CancellationToken) -> Result<()> {
    let cfg = config::get();
    if cfg.servers.is_empty() {
        return Err(anyhow::anyhow!("No [[servers]] configured, nothing to harvest"));
    }

    let store = HarvestStore::open(&cfg.storage.data_dir).context("Failed to open harvest database")?;
    let cursors: Arc<dyn CursorStore> = Arc::new(store.cursors()?);
    let tallies: Arc<dyn TallyStore> = Arc::new(store.tallies()?);
    let sink: Arc<dyn EventSink> = Arc::new(TallyingSink::new(
        Arc::new(JsonlSink::new(&cfg.sink.output_dir)),
        Arc::clone(&tallies),
    ));
    info!(
        "Storage: {} cursors, sink {} -> {}",
        cursors.backend_name(),
        sink.sink_name(),
        cfg.sink.output_dir.display()
    );

    info!("[Supervisor] Initializing task monitoring");
    let mut task_set: JoinSet<Result<TaskName>> = JoinSet::new();
    let mut server_ids = Vec::new();

    for server in &cfg.servers {
        let connector = match connector_for(server, &cfg.transport) {
            Ok(c) => c,
            Err(e) => {
                error!("Server {} skipped: {}", server.label(), e);
                continue;
            }
        };
        let harvester = build_harvester(cfg, server.clone(), connector, Arc::clone(&cursors), Arc::clone(&sink))
            .context("Invalid game event pattern")?;
        server_ids.push(server.server_id.clone());

        let settings = cfg.harvest.clone();
        let cancel = cancel_token.clone();
        task_set.spawn(async move {
            let summary = run_server(harvester, settings, cancel).await;
            Ok(TaskName::Harvest(summary.server_id))
        });
    }

    if server_ids.is_empty() {
        return Err(anyhow::anyhow!("No configured server has a usable backend"));
    }

    let rivalry_tallies = Arc::clone(&tallies);
    let rivalry_settings = cfg.rivalry.clone();
    let rivalry_cancel = cancel_token.clone();
    task_set.spawn(async move {
        run_rivalries(rivalry_tallies, server_ids, rivalry_settings, rivalry_cancel).await;
        Ok(TaskName::Rivalry)
    });

    let result = run_supervisor(&mut task_set, cancel_token).await;
    while let Some(joined) = task_set.join_next().await {
        if let Ok(Ok(task_name)) = joined {
            info!("[Supervisor] Task {} stopped", task_name);
        }
    }
    store.flush()?;
    result
}

/// Monitor tasks until shutdown or the first task failure.
async fn run_supervisor(
    task_set: &mut JoinSet<Result<TaskName>>,
    cancel_token: CancellationToken,
) -> Result<()> {
    info!("[Supervisor] All tasks spawned, monitoring...");

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                info!("[Supervisor] Shutdown signal received");
                break;
            }
            result = task_set.join_next() => {
                match result {
                    Some(Ok(Ok(task_name))) => {
                        info!("[Supervisor] Task {} completed normally", task_name);
                    }
                    Some(Ok(Err(e))) => {
                        error!("[Supervisor] Task failed with error: {}", e);
                        cancel_token.cancel();
                        return Err(e);
                    }
                    Some(Err(e)) => {
                        error!("[Supervisor] Task panicked: {}", e);
                        cancel_token.cancel();
                        return Err(anyhow::anyhow!("Task panicked: {}", e));
                    }
                    None => {
                        info!("[Supervisor] All tasks completed");
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}

// ============================================================================
// Operator subcommands
// ============================================================================

fn reset_cursor(server: &str, kind: FileKind) -> Result<()> {
    let cfg = config::get();
    if cfg.server(server).is_none() {
        warn!("Server {} is not in the configuration", server);
    }
    let store = HarvestStore::open(&cfg.storage.data_dir)?;
    let cursors = store.cursors()?;
    if let Some(cursor) = cursors.load(server, kind)? {
        info!(
            "Current {} cursor for {}: line {} of {}",
            kind,
            server,
            cursor.last_line_index,
            cursor.file_path.as_deref().unwrap_or("<none>")
        );
    }
    if cursors.reset(server, kind)? {
        info!("Cursor reset; next {} cycle starts at line 0", kind);
    } else {
        info!("No {} cursor stored for {}", kind, server);
    }
    Ok(())
}

fn print_rivalries(server: &str) -> Result<()> {
    let cfg = config::get();
    let store = HarvestStore::open(&cfg.storage.data_dir)?;
    let tallies = store.tallies()?;
    let results = recompute_rivalries(&tallies, server, cfg.rivalry.min_kills)?;

    let mut out = std::io::stdout().lock();
    for result in &results {
        if result.prey.is_some() || result.nemesis.is_some() {
            serde_json::to_writer(&mut out, result)?;
            writeln!(out)?;
        }
    }
    info!("{} players tallied on {}", results.len(), server);
    Ok(())
}

async fn inspect(server_id: &str) -> Result<()> {
    let cfg = config::get();
    let server = cfg
        .server(server_id)
        .with_context(|| format!("Server {} is not in the configuration", server_id))?
        .clone();
    let store = HarvestStore::open(&cfg.storage.data_dir)?;
    let cursors: Arc<dyn CursorStore> = Arc::new(store.cursors()?);
    let connector = connector_for(&server, &cfg.transport)?;
    let mut harvester = build_harvester(cfg, server, connector, cursors, Arc::new(MemorySink::new()))?;

    let mut out = std::io::stdout().lock();
    for kind in [FileKind::Csv, FileKind::Log] {
        match harvester.backlog(kind).await {
            Ok(backlog) => {
                serde_json::to_writer_pretty(&mut out, &backlog)?;
                writeln!(out)?;
            }
            Err(e) => warn!("{} backlog unavailable: {}", kind, e),
        }
    }
    serde_json::to_writer_pretty(&mut out, &harvester.session().stats())?;
    writeln!(out)?;
    harvester.session_mut().disconnect().await;
    Ok(())
}

fn parse_file(kind: FileKind, file: &PathBuf) -> Result<()> {
    let cfg = config::get();
    let (kills, log) = parsers_from_config(cfg)?;
    let bytes = std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let text = String::from_utf8_lossy(&bytes);

    let (batch, failures) = match kind {
        FileKind::Csv => {
            let parsed = kills.parse_batch(text.lines());
            (EventBatch::Csv { kills: parsed.events }, parsed.failures)
        }
        FileKind::Log => {
            let (game_events, connections) = log.parse_batch(text.lines());
            (EventBatch::Log { game_events, connections }, 0)
        }
    };

    std::io::stdout().lock().write_all(&batch_to_jsonl(&batch)?)?;
    info!("{}: {} events, {} malformed lines", file.display(), batch.len(), failures);
    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    // Initialize logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if args.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    config::init(load_config(args.config.as_ref())?);

    match args.command.unwrap_or(SubCommand::Run) {
        SubCommand::Run => {
            info!("Log Harvester starting ({} servers)", config::get().servers.len());

            // Graceful shutdown via Ctrl+C
            let cancel_token = CancellationToken::new();
            let shutdown_token = cancel_token.clone();
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                info!("Received Ctrl+C, initiating shutdown...");
                shutdown_token.cancel();
            });

            run_harvest(cancel_token).await?;
            info!("Log Harvester shutdown complete");
        }
        SubCommand::ResetCursor { server, kind } => reset_cursor(&server, kind)?,
        SubCommand::Rivalries { server } => print_rivalries(&server)?,
        SubCommand::Inspect { server } => inspect(&server).await?,
        SubCommand::Parse { kind, file } => parse_file(kind, &file)?,
    }

    Ok(())
}
