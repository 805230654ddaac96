//! canonseq - resolve gene names and pick canonical transcripts.
//!
//! Every command prints JSON on stdout; logs go to stderr.

mod commands;

use anyhow::{Context, Result};
use canonseq::config::{default_settings_path, Settings};
use canonseq::CancellationToken;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "canonseq")]
#[command(about = "Gene name resolution and canonical transcript selection")]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Settings file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Bypass the result cache
    #[arg(long, global = true)]
    no_cache: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve a gene name to its official identity
    Resolve { query: String },

    /// Resolve a gene and select its canonical transcript
    Select {
        query: String,

        /// Preferred transcript accession (with or without version)
        #[arg(long)]
        prefer: Option<String>,
    },

    /// Process a file of gene names, one per line
    Run {
        file: PathBuf,

        /// Number of genes processed at once
        #[arg(short, long)]
        concurrency: Option<usize>,

        /// Checkpoint id (generated when omitted)
        #[arg(long)]
        batch_id: Option<String>,
    },

    /// Continue an interrupted batch
    Resume {
        batch_id: String,

        #[arg(short, long)]
        concurrency: Option<usize>,
    },

    /// Rerun the failed genes of a batch
    Retry {
        batch_id: String,

        #[arg(short, long)]
        concurrency: Option<usize>,
    },

    /// List saved checkpoints
    Checkpoints {
        /// Delete checkpoints older than the retention period instead
        #[arg(long)]
        cleanup: bool,
    },

    /// Inspect or maintain the result cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum CacheAction {
    /// Show entry counts and hit/miss counters
    Stats,
    /// Remove expired entries
    Cleanup,
    /// Remove every entry
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy();
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    let settings_path = args.config.clone().unwrap_or_else(default_settings_path);
    let mut settings = Settings::load(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
    settings.merge_env()?;
    if args.no_cache {
        settings.cache.enabled = false;
    }
    debug!("Settings loaded from {}", settings_path.display());

    let cancel = CancellationToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        eprintln!("Interrupt received, finishing in-flight genes");
        handler_token.cancel();
    })
    .context("Failed to install Ctrl-C handler")?;

    let output = match args.command {
        Command::Resolve { query } => commands::resolve(settings, &query).await?,
        Command::Select { query, prefer } => {
            commands::select(settings, &query, prefer.as_deref()).await?
        }
        Command::Run {
            file,
            concurrency,
            batch_id,
        } => commands::run(settings, &file, concurrency, batch_id, cancel).await?,
        Command::Resume {
            batch_id,
            concurrency,
        } => commands::resume(settings, &batch_id, concurrency, cancel).await?,
        Command::Retry {
            batch_id,
            concurrency,
        } => commands::retry(settings, &batch_id, concurrency, cancel).await?,
        Command::Checkpoints { cleanup } => commands::checkpoints(&settings, cleanup)?,
        Command::Cache { action } => commands::cache(&settings, action)?,
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
