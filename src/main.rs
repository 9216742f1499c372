//! CLI entry point for birch.
//!
//! ```bash
//! birch validate --config config/birch.toml
//! birch run --config config/birch.toml --mode parallel --output results.json
//! birch inspect queue.json
//! ```

use anyhow::{Context, Result};
use birch::config::{BirchConfig, DEFAULT_CONFIG_PATH};
use birch::{describe_snapshot, logging, Session};
use birch_queue::{ExecutionMode, LogQuery, ScanQueue, StartOutcome};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "birch")]
#[command(about = "Scan queue scheduler for laboratory instruments", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the configured scans, run them and print the queue status
    Run {
        /// Configuration file (TOML)
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Execution mode (serial or parallel); overrides the config
        #[arg(long)]
        mode: Option<ExecutionMode>,

        /// Write recorded data as JSON
        #[arg(long)]
        output: Option<PathBuf>,

        /// Write the final queue snapshot as JSON
        #[arg(long)]
        snapshot: Option<PathBuf>,

        /// Continue the scans of a saved snapshot from their saved cursors instead of `[[scans]]`
        #[arg(long)]
        resume_from: Option<PathBuf>,

        /// Give up after this many seconds and abort the queue
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Print a summary of a saved queue snapshot
    Inspect {
        /// Snapshot file (JSON)
        snapshot: PathBuf,
    },

    /// Load and validate a configuration file
    Validate {
        /// Configuration file (TOML)
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            mode,
            output,
            snapshot,
            resume_from,
            timeout,
        } => {
            let config = load(&config)?;
            logging::init_from_config(&config)?;
            run(&config, mode, output, snapshot, resume_from, timeout).await
        }
        Commands::Inspect { snapshot } => {
            let loaded = ScanQueue::load_snapshot(&snapshot)
                .with_context(|| format!("Failed to read snapshot {}", snapshot.display()))?;
            print!("{}", describe_snapshot(&loaded));
            Ok(())
        }
        Commands::Validate { config } => {
            let config = load(&config)?;
            config.validate()?;
            println!(
                "Configuration OK: {} instruments ({} enabled), {} scans",
                config.instruments.len(),
                config.enabled_instruments().len(),
                config.scans.len()
            );
            Ok(())
        }
    }
}

fn load(path: &Path) -> Result<BirchConfig> {
    BirchConfig::load_from(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))
}

async fn run(
    config: &BirchConfig,
    mode: Option<ExecutionMode>,
    output: Option<PathBuf>,
    snapshot: Option<PathBuf>,
    resume_from: Option<PathBuf>,
    timeout: Option<u64>,
) -> Result<()> {
    let session = match resume_from {
        Some(path) => {
            let saved = ScanQueue::load_snapshot(&path)
                .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
            Session::from_snapshot(config, &saved)?
        }
        None => Session::from_config(config)?,
    };
    let queue = session.queue();

    queue.add_log_callback(|entry| println!("{entry}"));

    match queue.start(None, mode).await? {
        StartOutcome::NothingQueued => {
            warn!("Nothing to run");
            return Ok(());
        }
        StartOutcome::Started { scans } => info!(scans, "Queue started"),
    }

    let limit = timeout.map(Duration::from_secs);
    tokio::select! {
        finished = queue.wait_for_completion(limit) => {
            if !finished {
                warn!("Timed out, aborting queue");
                queue.abort();
                queue.wait_for_completion(None).await;
            }
        }
        _ = signal::ctrl_c() => {
            warn!("Interrupted, aborting queue");
            queue.abort();
            queue.wait_for_completion(None).await;
        }
    }

    let status = queue.status();
    println!("{}", serde_json::to_string_pretty(&status)?);

    if let Some(path) = output {
        session.write_results(&path)?;
    }
    if let Some(path) = snapshot {
        queue.save(&path)?;
    }

    let errors = queue.logs(&LogQuery::new().level(birch_queue::LogLevel::Error));
    if !errors.is_empty() {
        warn!(count = errors.len(), "Run finished with errors");
    }
    Ok(())
}
