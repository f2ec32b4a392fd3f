//! Database module for persistent storage of decoded events, cursors,
//! referral snapshots, and replay checkpoints.
//!
//! # Architecture
//!
//! - `models`: Data structures that map to database tables
//! - `repository`: CRUD operations grouped by concern (cursors, event rows,
//!   referral state, deployment locks)
//! - Connection pooling with SQLite WAL mode for concurrency
//! - Migration system for schema versioning

use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::error::IndexerError;

pub mod models;
pub mod repository;

/// Creates a SQLite connection pool with optimized settings.
///
/// # Configuration
///
/// - **WAL mode**: Enables concurrent readers during writes
/// - **Busy timeout**: 30 seconds to handle lock contention
/// - **Max connections**: 5 (suitable for single-machine indexer)
/// - **Min connections**: 1 (keep one connection warm)
///
/// # Example
///
/// ```no_run
/// use dex_event_indexer::db::create_pool;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let pool = create_pool("sqlite:./indexer.db").await?;
///     // Use pool for queries
///     Ok(())
/// }
/// ```
pub async fn create_pool(database_url: &str) -> Result<SqlitePool, IndexerError> {
    info!(database_url, "Connecting to database");

    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| {
            IndexerError::database(
                format!("Failed to parse database URL: {database_url}"),
                Some(Box::new(e)),
            )
        })?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(30));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(5))
        .connect_with(options)
        .await
        .map_err(|e| {
            IndexerError::database(
                format!("Failed to connect to database at {database_url}"),
                Some(Box::new(e)),
            )
        })?;

    // Enable foreign keys
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await
        .map_err(|e| {
            IndexerError::database(
                "Failed to enable foreign keys".to_string(),
                Some(Box::new(e)),
            )
        })?;

    info!("Running database migrations");
    run_migrations(&pool).await?;
    info!("Database migrations complete");

    Ok(pool)
}

/// Runs database migrations to ensure schema is up-to-date.
///
/// This function applies all pending migrations from the `migrations/`
/// directory. Migrations are applied in order and are idempotent (safe to
/// run multiple times).
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), IndexerError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| {
            IndexerError::database(
                "Failed to run database migrations".to_string(),
                Some(Box::new(e)),
            )
        })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_pool_and_migrations() {
        let pool = create_pool("sqlite::memory:")
            .await
            .expect("Failed to create pool");

        let result: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM sqlite_master WHERE type='table'")
                .fetch_one(&pool)
                .await
                .expect("Failed to query tables");

        // 5 domain tables + migration history table
        assert!(result.0 >= 5, "Expected at least 5 tables, got {}", result.0);
    }

    #[tokio::test]
    async fn test_foreign_keys_enabled() {
        let pool = create_pool("sqlite::memory:")
            .await
            .expect("Failed to create pool");

        let result: (i64,) = sqlx::query_as("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await
            .expect("Failed to query foreign keys");

        assert_eq!(result.0, 1, "Foreign keys should be enabled");
    }
}
