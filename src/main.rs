//! CLI entry point for the DEX event indexer.
//!
//! # Architecture Flow
//!
//! This binary delegates to the CLI module, which orchestrates all layers:
//!
//! ```text
//! main.rs (Runtime Initialization)
//!     ↓
//! CLI Layer (src/cli.rs)
//!     ↓
//! 1. Config Layer (src/config.rs)       → Load environment variables
//! 2. RPC Layer (src/rpc.rs)             → Create chain client
//! 3. Scheduler (src/scheduler.rs)       → Lock, dictionaries, cycle driving
//! 4. Harvester (src/harvester/)         → Fetch, map, persist event streams
//! 5. Referral replay (src/referral/)    → Rebuild trader snapshots
//! 6. CLI Layer (output)                 → Display formatted results
//! ```
//!
//! All errors bubble up with context via `IndexerResult<T>`.

use dex_event_indexer::{cli, observability};
use tracing::error;

/// Entry point for the DEX event indexer.
///
/// Initializes:
/// - Tokio async runtime (via `#[tokio::main]`)
/// - Production-grade structured logging with tracing
/// - Environment-based filtering (RUST_LOG, LOG_JSON, LOG_FILE)
///
/// Then delegates to the CLI module for all business logic.
#[tokio::main]
async fn main() {
    // Initialize structured logging FIRST (before any other operations)
    // Configuration can be controlled via environment variables:
    // - RUST_LOG: Set log level (e.g., "debug", "info", "trace")
    // - LOG_JSON: Enable JSON output for production ("true" or "false")
    // - LOG_FILE: Write logs to file with daily rotation
    let log_level = std::env::var("RUST_LOG").ok();
    let log_file = std::env::var("LOG_FILE").ok().map(std::path::PathBuf::from);
    let json_output = std::env::var("LOG_JSON")
        .unwrap_or_else(|_| "false".to_string())
        .parse::<bool>()
        .unwrap_or(false);

    if let Err(e) = observability::init_tracing(log_level, log_file, json_output) {
        eprintln!("Failed to initialize tracing: {e}");
        std::process::exit(1);
    }

    if let Err(e) = cli::run().await {
        error!(error = %e, "Application error");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
