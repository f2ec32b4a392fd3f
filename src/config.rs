//! Configuration management for the DEX event indexer.
//!
//! This module handles loading and validating configuration from environment
//! variables using the `dotenvy` crate. All operations return
//! [`IndexerResult`] for comprehensive error handling.
//!
//! ## Environment Variables
//!
//! Required:
//! - `RPC_URL`: HTTP(S) endpoint of the chain RPC node
//!
//! Optional (with defaults):
//! - `DATABASE_URL`: SQLite database URL (default: "sqlite:./indexer.db")
//! - `BLOCKCHAIN_TYPE`: Logical chain family key (default: "ethereum")
//! - `EXCHANGE_ID`: Logical exchange deployment key (default: "ethereum")
//! - `START_BLOCK`: First block of the deployment (default: 17087000)
//! - `BATCH_SIZE`: Blocks per event query sub-range (default: 2000)
//! - `CONCURRENCY`: Max in-flight RPC fetches per stream (default: 10)
//! - `POLL_INTERVAL_SECS`: Scheduler tick interval (default: 30)
//! - `LOCK_TTL_SECS`: Cross-process deployment lock TTL (default: 120)
//! - `RUST_LOG`: Logging level (default: "info")
//!
//! ## Example
//!
//! ```no_run
//! use dex_event_indexer::config::Config;
//! use dex_event_indexer::error::IndexerResult;
//!
//! # fn main() -> IndexerResult<()> {
//! let config = Config::from_env()?;
//! println!("RPC URL: {}", config.rpc_url());
//! # Ok(())
//! # }
//! ```

use crate::error::{IndexerError, IndexerResult};
use std::env;

/// Main configuration struct for the indexer.
///
/// Contains all runtime configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Chain RPC URL
    rpc_url: String,

    /// SQLite database URL
    database_url: String,

    /// Logical chain family key (scopes all persisted rows)
    blockchain_type: String,

    /// Logical exchange deployment key (scopes all persisted rows)
    exchange_id: String,

    /// First block of the deployment
    start_block: u64,

    /// Blocks per event query sub-range
    batch_size: u64,

    /// Max in-flight RPC fetches per stream
    concurrency: usize,

    /// Scheduler tick interval in seconds
    poll_interval_secs: u64,

    /// Cross-process deployment lock TTL in seconds
    lock_ttl_secs: i64,
}

fn parse_var<T: std::str::FromStr>(name: &str, default: &str) -> IndexerResult<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse::<T>()
        .map_err(|e| {
            IndexerError::config(format!("{name} must be a valid number"), Some(Box::new(e)))
        })
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// This function:
    /// 1. Loads `.env` file using `dotenvy` (if present)
    /// 2. Reads and validates all environment variables
    /// 3. Applies defaults for optional variables
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `RPC_URL` is missing or not an http(s) URL
    /// - A numeric variable fails to parse
    /// - `BATCH_SIZE` or `CONCURRENCY` is zero
    pub fn from_env() -> IndexerResult<Self> {
        // Load .env file if present (ignore error if file doesn't exist)
        dotenvy::dotenv().ok();

        // Required: chain RPC URL
        let rpc_url = env::var("RPC_URL").map_err(|e| {
            IndexerError::config(
                "RPC_URL environment variable is required",
                Some(Box::new(e)),
            )
        })?;

        if !rpc_url.starts_with("http") {
            return Err(IndexerError::config(
                format!("RPC_URL must be an http(s) endpoint, got: {rpc_url}"),
                None,
            ));
        }

        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:./indexer.db".to_string());

        let blockchain_type =
            env::var("BLOCKCHAIN_TYPE").unwrap_or_else(|_| "ethereum".to_string());
        let exchange_id = env::var("EXCHANGE_ID").unwrap_or_else(|_| "ethereum".to_string());

        let start_block = parse_var::<u64>("START_BLOCK", "17087000")?;
        let batch_size = parse_var::<u64>("BATCH_SIZE", "2000")?;
        let concurrency = parse_var::<usize>("CONCURRENCY", "10")?;
        let poll_interval_secs = parse_var::<u64>("POLL_INTERVAL_SECS", "30")?;
        let lock_ttl_secs = parse_var::<i64>("LOCK_TTL_SECS", "120")?;

        if batch_size == 0 {
            return Err(IndexerError::config("BATCH_SIZE must be at least 1", None));
        }
        if concurrency == 0 {
            return Err(IndexerError::config("CONCURRENCY must be at least 1", None));
        }

        Ok(Self {
            rpc_url,
            database_url,
            blockchain_type,
            exchange_id,
            start_block,
            batch_size,
            concurrency,
            poll_interval_secs,
            lock_ttl_secs,
        })
    }

    /// Get the chain RPC URL.
    #[must_use]
    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    /// Get the database URL.
    #[must_use]
    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    /// Get the logical chain family key.
    #[must_use]
    pub fn blockchain_type(&self) -> &str {
        &self.blockchain_type
    }

    /// Get the logical exchange deployment key.
    #[must_use]
    pub fn exchange_id(&self) -> &str {
        &self.exchange_id
    }

    /// Get the deployment start block.
    #[must_use]
    pub const fn start_block(&self) -> u64 {
        self.start_block
    }

    /// Get the batch size (blocks per event query sub-range).
    #[must_use]
    pub const fn batch_size(&self) -> u64 {
        self.batch_size
    }

    /// Get the per-stream fetch concurrency.
    #[must_use]
    pub const fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Get the scheduler polling interval in seconds.
    #[must_use]
    pub const fn poll_interval_secs(&self) -> u64 {
        self.poll_interval_secs
    }

    /// Get the deployment lock TTL in seconds.
    #[must_use]
    pub const fn lock_ttl_secs(&self) -> i64 {
        self.lock_ttl_secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-global; serialize these tests so
    // they don't race each other's setup.
    static ENV_GUARD: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for key in [
            "RPC_URL",
            "DATABASE_URL",
            "BLOCKCHAIN_TYPE",
            "EXCHANGE_ID",
            "START_BLOCK",
            "BATCH_SIZE",
            "CONCURRENCY",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    fn test_config_missing_rpc_url() {
        let _guard = ENV_GUARD.lock();
        clear_env();

        let result = Config::from_env();
        assert!(result.is_err());
    }

    #[test]
    fn test_config_rejects_non_http_rpc_url() {
        let _guard = ENV_GUARD.lock();
        clear_env();
        env::set_var("RPC_URL", "wss://mainnet.example/ws");

        let result = Config::from_env();
        assert!(result.is_err());

        clear_env();
    }

    #[test]
    fn test_config_defaults() {
        let _guard = ENV_GUARD.lock();
        clear_env();
        env::set_var("RPC_URL", "https://mainnet.example/v2/key");

        let config = Config::from_env();
        assert!(config.is_ok());

        if let Ok(config) = config {
            assert_eq!(config.database_url(), "sqlite:./indexer.db");
            assert_eq!(config.blockchain_type(), "ethereum");
            assert_eq!(config.batch_size(), 2000);
            assert_eq!(config.concurrency(), 10);
        }

        clear_env();
    }

    #[test]
    fn test_config_rejects_zero_batch_size() {
        let _guard = ENV_GUARD.lock();
        clear_env();
        env::set_var("RPC_URL", "https://mainnet.example/v2/key");
        env::set_var("BATCH_SIZE", "0");

        let result = Config::from_env();
        assert!(result.is_err());

        clear_env();
    }
}
