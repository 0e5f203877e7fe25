//! DUR Ingest - mixture contraindication ingestion tool

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use dur_common::logging::{init_logging, LogConfig, LogLevel};
use dur_ingest::orchestrator::{load_snapshot, normalize_all};
use dur_ingest::snapshot::{read_snapshot, write_snapshot};
use dur_ingest::store::{self, MixtureStore};
use dur_ingest::{IngestConfig, Orchestrator, RecordNormalizer, RunOptions, StoreConfig};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "dur-ingest")]
#[command(author, version, about = "DUR mixture contraindication ingestion tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Parser, Debug)]
enum Command {
    /// Collect, normalize and upsert every record
    Run {
        /// Also save the raw records to this file
        #[arg(long, env = "MIXTURE_SAVE_RAW")]
        save_raw: Option<PathBuf>,

        /// Ignore any checkpoint from an earlier run
        #[arg(long)]
        fresh: bool,

        /// Write into an in-memory store instead of the configured one
        #[arg(long)]
        dry_run: bool,

        /// Checkpoint file
        #[arg(long)]
        checkpoint: Option<PathBuf>,
    },

    /// Collect the raw records into a snapshot file
    Fetch {
        #[arg(short, long, default_value = "data/raw/mixture_raw.json")]
        output: PathBuf,
    },

    /// Normalize a raw snapshot into a JSON array of rows
    Normalize {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,
    },

    /// Normalize a raw snapshot and upsert it
    Load {
        #[arg(short, long)]
        input: PathBuf,

        /// Write into an in-memory store instead of the configured one
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over the defaults set here
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("dur-ingest")
        .build()
        .merge_env()?;

    let _guard = init_logging(&log_config)?;

    match cli.command {
        Command::Run {
            save_raw,
            fresh,
            dry_run,
            checkpoint,
        } => {
            let mut config = IngestConfig::from_env()?;
            if let Some(path) = save_raw {
                config = config.with_snapshot_path(path);
            }
            if let Some(path) = checkpoint {
                config = config.with_checkpoint_path(path);
            }
            if dry_run {
                config = config.with_store(StoreConfig::Memory);
            }
            config.validate_upstream()?;

            let store = open_store(&config).await?;
            let report = Orchestrator::from_config(config)?
                .with_store(store)
                .run(RunOptions { fresh })
                .await?;
            info!("{}", report.summary());
        },
        Command::Fetch { output } => {
            let config = IngestConfig::from_env()?;
            let count = Orchestrator::from_config(config)?.fetch_only(&output).await?;
            info!(records = count, output = %output.display(), "Fetch complete");
        },
        Command::Normalize { input, output } => {
            normalize_file(&input, &output)?;
        },
        Command::Load { input, dry_run } => {
            let mut config = IngestConfig::from_env()?;
            if dry_run {
                config = config.with_store(StoreConfig::Memory);
            }

            let store = open_store(&config).await?;
            let stats = load_snapshot(&config, store, &input).await?;
            info!(batches = stats.batches, rows = stats.rows, "Load complete");
        },
    }

    Ok(())
}

async fn open_store(config: &IngestConfig) -> Result<Arc<dyn MixtureStore>> {
    let store_config = config.validate_write_settings()?;
    let store = store::connect(store_config, &config.table, config.request_timeout)
        .await
        .context("Failed to open destination store")?;
    info!(store = store.kind(), table = %config.table, "Destination store ready");
    Ok(store)
}

fn normalize_file(input: &Path, output: &Path) -> Result<()> {
    let raw = read_snapshot(input)
        .with_context(|| format!("Failed to read raw snapshot {}", input.display()))?;
    let records = normalize_all(&RecordNormalizer::new(), &raw);
    let written = write_snapshot(output, &records)?;
    info!(records = written, output = %output.display(), "Normalization complete");
    Ok(())
}
