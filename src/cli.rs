//! Command-line interface for the DEX event indexer.
//!
//! # Commands
//!
//! - `run`: Continuously harvest and replay on a fixed interval
//! - `sync`: Run exactly one update cycle, then exit
//! - `status`: Show stream cursors and database health
//!
//! # Example
//!
//! ```bash
//! # Continuous indexing
//! dex-event-indexer run
//!
//! # One-shot catch-up
//! dex-event-indexer sync
//!
//! # Inspect cursors
//! dex-event-indexer status
//! ```

use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use crate::config::Config;
use crate::db;
use crate::db::repository::Repository;
use crate::deployment::Deployment;
use crate::error::IndexerResult;
use crate::rpc::{create_provider, AlloyChainClient, ChainClient};
use crate::scheduler::Scheduler;

/// DEX event harvesting and state-reconstruction engine
#[derive(Parser, Debug)]
#[command(name = "dex-event-indexer")]
#[command(about = "Event harvester and state-reconstruction engine for a DEX protocol", long_about = None)]
#[command(version)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
enum Commands {
    /// Continuously harvest events and replay state on a fixed interval
    Run {
        /// Polling interval in seconds (overrides POLL_INTERVAL_SECS)
        #[arg(short, long)]
        interval: Option<u64>,
    },

    /// Run one update cycle and exit
    Sync,

    /// Show stream cursors and database health
    Status,
}

/// Parse arguments and dispatch to the selected command.
///
/// # Errors
///
/// Propagates configuration, database, and indexing errors to `main`.
pub async fn run() -> IndexerResult<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { interval } => run_scheduler(interval).await,
        Commands::Sync => run_sync().await,
        Commands::Status => show_status().await,
    }
}

/// Shared startup: config, database, chain client, deployment.
async fn build_context() -> IndexerResult<(Config, Arc<Repository>, Arc<dyn ChainClient>, Deployment)>
{
    let config = Config::from_env()?;

    let pool = db::create_pool(config.database_url()).await?;
    let repo = Arc::new(Repository::new(pool));

    let provider = create_provider(config.rpc_url()).await?;
    let chain: Arc<dyn ChainClient> = Arc::new(AlloyChainClient::new(provider));

    let deployment = Deployment::from_config(&config);

    Ok((config, repo, chain, deployment))
}

/// Execute the run command (continuous indexing).
async fn run_scheduler(interval: Option<u64>) -> IndexerResult<()> {
    let (config, repo, chain, deployment) = build_context().await?;
    let interval = interval.unwrap_or_else(|| config.poll_interval_secs());

    info!(
        deployment = %deployment.key(),
        interval, "Starting continuous indexing"
    );

    let scheduler = Scheduler::new(chain, repo, deployment, config.lock_ttl_secs());
    scheduler.run(interval).await
}

/// Execute the sync command (one cycle).
async fn run_sync() -> IndexerResult<()> {
    let (config, repo, chain, deployment) = build_context().await?;

    println!(
        "{}",
        format!("Syncing deployment {}...", deployment.key())
            .cyan()
            .bold()
    );

    let mut scheduler = Scheduler::new(chain, repo, deployment, config.lock_ttl_secs());
    scheduler.run_cycle().await?;

    println!("{}", "Sync complete".green().bold());
    Ok(())
}

/// Execute the status command.
async fn show_status() -> IndexerResult<()> {
    let config = Config::from_env()?;

    let pool = db::create_pool(config.database_url()).await?;
    let repo = Repository::new(pool);

    match repo.health_check().await {
        Ok(()) => println!("{} database reachable", "ok:".green().bold()),
        Err(e) => println!("{} {e}", "error:".red().bold()),
    }

    let cursors = repo.list_cursors().await?;
    if cursors.is_empty() {
        println!("No streams have been processed yet");
        return Ok(());
    }

    println!();
    println!("{}", "Stream cursors".bold());
    for (stream_key, block) in cursors {
        println!("  {} {}", stream_key.cyan(), block.to_string().yellow());
    }

    Ok(())
}
