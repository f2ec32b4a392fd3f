//! Repository pattern for database operations.
//!
//! Provides high-level operations for stream cursors, decoded event rows,
//! referral snapshots, replay checkpoints, and deployment locks. Handles
//! chunked transactional inserts, duplicate-key recovery, and the
//! pre-clear-before-reprocess paths.

use sqlx::SqlitePool;
use tracing::{debug, info, instrument, warn};

use super::models::{CheckpointRecord, DecodedEventRow, ReferralStateRecord};
use crate::error::{IndexerError, IndexerResult};

/// Repository for database operations.
///
/// Wraps a SQLite connection pool and provides type-safe methods
/// for all database interactions.
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Creates a new repository with the given connection pool.
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // ==================== CURSOR OPERATIONS ====================

    /// Gets the cursor for a stream, if one exists.
    pub async fn get_cursor(&self, stream_key: &str) -> IndexerResult<Option<u64>> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT last_block FROM stream_cursors WHERE stream_key = ?")
                .bind(stream_key)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    IndexerError::database(
                        format!("Failed to query cursor for {stream_key}"),
                        Some(Box::new(e)),
                    )
                })?;

        Ok(row.map(|(block,)| u64::try_from(block).unwrap_or(0)))
    }

    /// Gets the cursor for a stream, creating it at `start_block` on first
    /// use.
    pub async fn get_or_init_cursor(
        &self,
        stream_key: &str,
        start_block: u64,
    ) -> IndexerResult<u64> {
        if let Some(block) = self.get_cursor(stream_key).await? {
            return Ok(block);
        }

        debug!(stream_key, start_block, "Initializing cursor");

        sqlx::query(
            r#"
            INSERT INTO stream_cursors (stream_key, last_block, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT (stream_key) DO NOTHING
            "#,
        )
        .bind(stream_key)
        .bind(i64::try_from(start_block).unwrap_or(i64::MAX))
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            IndexerError::database(
                format!("Failed to initialize cursor for {stream_key}"),
                Some(Box::new(e)),
            )
        })?;

        // Re-read in case another task initialized it concurrently.
        Ok(self.get_cursor(stream_key).await?.unwrap_or(start_block))
    }

    /// Advances the cursor for a stream.
    ///
    /// Cursors are monotonically non-decreasing: the stored value is
    /// `max(previous, block)`.
    pub async fn set_cursor(&self, stream_key: &str, block: u64) -> IndexerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO stream_cursors (stream_key, last_block, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT (stream_key) DO UPDATE SET
                last_block = MAX(stream_cursors.last_block, excluded.last_block),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(stream_key)
        .bind(i64::try_from(block).unwrap_or(i64::MAX))
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            IndexerError::database(
                format!("Failed to update cursor for {stream_key}"),
                Some(Box::new(e)),
            )
        })?;

        Ok(())
    }

    /// Lists all cursors (for the status command).
    pub async fn list_cursors(&self) -> IndexerResult<Vec<(String, u64)>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT stream_key, last_block FROM stream_cursors ORDER BY stream_key")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| {
                    IndexerError::database("Failed to list cursors".to_string(), Some(Box::new(e)))
                })?;

        Ok(rows
            .into_iter()
            .map(|(key, block)| (key, u64::try_from(block).unwrap_or(0)))
            .collect())
    }

    // ==================== EVENT ROW OPERATIONS ====================

    /// Saves decoded event rows in fixed-size chunks.
    ///
    /// Each chunk is inserted inside one transaction. A duplicate-key
    /// violation downgrades that chunk to a row-by-row merge upsert: the
    /// existing row's mapped fields are overwritten with the new values
    /// rather than failing the whole batch.
    #[instrument(skip(self, rows), fields(count = rows.len()))]
    pub async fn save_event_rows(
        &self,
        rows: &[DecodedEventRow],
        chunk_size: usize,
    ) -> IndexerResult<()> {
        if rows.is_empty() {
            debug!("Empty event row batch, skipping");
            return Ok(());
        }

        let chunk_size = chunk_size.max(1);
        for chunk in rows.chunks(chunk_size) {
            match self.insert_event_chunk(chunk).await {
                Ok(()) => {}
                Err(e) if e.is_duplicate_key() => {
                    warn!(
                        chunk_len = chunk.len(),
                        "Duplicate key in event chunk, retrying row-by-row with merge"
                    );
                    for row in chunk {
                        self.upsert_event_row(row).await?;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        info!(count = rows.len(), "Saved decoded event rows");
        Ok(())
    }

    /// Inserts one chunk of event rows inside a transaction.
    async fn insert_event_chunk(&self, chunk: &[DecodedEventRow]) -> IndexerResult<()> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            IndexerError::database("Failed to start transaction".to_string(), Some(Box::new(e)))
        })?;

        for row in chunk {
            sqlx::query(
                r#"
                INSERT INTO decoded_events (
                    blockchain_type, exchange_id, stream_key, block_number,
                    transaction_index, transaction_hash, log_index,
                    block_timestamp, fields, created_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&row.blockchain_type)
            .bind(&row.exchange_id)
            .bind(&row.stream_key)
            .bind(row.block_number)
            .bind(row.transaction_index)
            .bind(&row.transaction_hash)
            .bind(row.log_index)
            .bind(row.block_timestamp)
            .bind(&row.fields)
            .bind(row.created_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                IndexerError::database(
                    format!("Failed to insert event row at block {}", row.block_number),
                    Some(Box::new(e)),
                )
            })?;
        }

        tx.commit().await.map_err(|e| {
            IndexerError::database(
                "Failed to commit transaction".to_string(),
                Some(Box::new(e)),
            )
        })?;

        Ok(())
    }

    /// Inserts or merges a single event row.
    async fn upsert_event_row(&self, row: &DecodedEventRow) -> IndexerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO decoded_events (
                blockchain_type, exchange_id, stream_key, block_number,
                transaction_index, transaction_hash, log_index,
                block_timestamp, fields, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (stream_key, transaction_index, transaction_hash, log_index)
            DO UPDATE SET
                block_number = excluded.block_number,
                block_timestamp = excluded.block_timestamp,
                fields = excluded.fields
            "#,
        )
        .bind(&row.blockchain_type)
        .bind(&row.exchange_id)
        .bind(&row.stream_key)
        .bind(row.block_number)
        .bind(row.transaction_index)
        .bind(&row.transaction_hash)
        .bind(row.log_index)
        .bind(row.block_timestamp)
        .bind(&row.fields)
        .bind(row.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            IndexerError::database(
                format!("Failed to upsert event row at block {}", row.block_number),
                Some(Box::new(e)),
            )
        })?;

        Ok(())
    }

    /// Deletes rows of one stream above a block (pre-clear before
    /// reprocessing a range).
    pub async fn delete_event_rows_above(
        &self,
        stream_key: &str,
        block: u64,
    ) -> IndexerResult<u64> {
        let result =
            sqlx::query("DELETE FROM decoded_events WHERE stream_key = ? AND block_number > ?")
                .bind(stream_key)
                .bind(i64::try_from(block).unwrap_or(i64::MAX))
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    IndexerError::database(
                        format!("Failed to pre-clear rows for {stream_key}"),
                        Some(Box::new(e)),
                    )
                })?;

        Ok(result.rows_affected())
    }

    /// Fetches one stream's rows within a block range, in chronological
    /// order.
    pub async fn get_event_rows_in_range(
        &self,
        stream_key: &str,
        from_block: u64,
        to_block: u64,
    ) -> IndexerResult<Vec<DecodedEventRow>> {
        let rows = sqlx::query_as::<_, DecodedEventRow>(
            r#"
            SELECT * FROM decoded_events
            WHERE stream_key = ? AND block_number >= ? AND block_number <= ?
            ORDER BY block_number ASC, transaction_index ASC, log_index ASC
            "#,
        )
        .bind(stream_key)
        .bind(i64::try_from(from_block).unwrap_or(0))
        .bind(i64::try_from(to_block).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            IndexerError::database(
                format!("Failed to query rows for {stream_key}"),
                Some(Box::new(e)),
            )
        })?;

        Ok(rows)
    }

    /// Counts one stream's persisted rows.
    pub async fn count_event_rows(&self, stream_key: &str) -> IndexerResult<u64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM decoded_events WHERE stream_key = ?")
                .bind(stream_key)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| {
                    IndexerError::database(
                        format!("Failed to count rows for {stream_key}"),
                        Some(Box::new(e)),
                    )
                })?;

        Ok(u64::try_from(count).unwrap_or(0))
    }

    // ==================== REFERRAL STATE OPERATIONS ====================

    /// Saves referral snapshot rows in fixed-size chunks.
    #[instrument(skip(self, rows), fields(count = rows.len()))]
    pub async fn save_referral_states(
        &self,
        rows: &[ReferralStateRecord],
        chunk_size: usize,
    ) -> IndexerResult<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let chunk_size = chunk_size.max(1);
        for chunk in rows.chunks(chunk_size) {
            let mut tx = self.pool.begin().await.map_err(|e| {
                IndexerError::database(
                    "Failed to start transaction".to_string(),
                    Some(Box::new(e)),
                )
            })?;

            for row in chunk {
                sqlx::query(
                    r#"
                    INSERT INTO referral_states (
                        blockchain_type, exchange_id, trader, code, owner,
                        tier_id, total_rebate, discount_share,
                        block_number, last_processed_block, created_at
                    )
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&row.blockchain_type)
                .bind(&row.exchange_id)
                .bind(&row.trader)
                .bind(&row.code)
                .bind(&row.owner)
                .bind(row.tier_id)
                .bind(&row.total_rebate)
                .bind(&row.discount_share)
                .bind(row.block_number)
                .bind(row.last_processed_block)
                .bind(row.created_at)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    IndexerError::database(
                        format!("Failed to insert referral row for {}", row.trader),
                        Some(Box::new(e)),
                    )
                })?;
            }

            tx.commit().await.map_err(|e| {
                IndexerError::database(
                    "Failed to commit transaction".to_string(),
                    Some(Box::new(e)),
                )
            })?;
        }

        info!(count = rows.len(), "Saved referral snapshot rows");
        Ok(())
    }

    /// Deletes referral rows written by batches at or beyond a cursor
    /// (pre-clear before reprocessing a replay range).
    pub async fn delete_referral_states_from(
        &self,
        blockchain_type: &str,
        exchange_id: &str,
        cursor: u64,
    ) -> IndexerResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM referral_states
            WHERE blockchain_type = ? AND exchange_id = ? AND last_processed_block >= ?
            "#,
        )
        .bind(blockchain_type)
        .bind(exchange_id)
        .bind(i64::try_from(cursor).unwrap_or(i64::MAX))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            IndexerError::database(
                "Failed to pre-clear referral rows".to_string(),
                Some(Box::new(e)),
            )
        })?;

        Ok(result.rows_affected())
    }

    /// Latest referral snapshot for one trader.
    pub async fn latest_referral_for_trader(
        &self,
        blockchain_type: &str,
        exchange_id: &str,
        trader: &str,
    ) -> IndexerResult<Option<ReferralStateRecord>> {
        let row = sqlx::query_as::<_, ReferralStateRecord>(
            r#"
            SELECT * FROM referral_states
            WHERE blockchain_type = ? AND exchange_id = ? AND trader = ?
            ORDER BY last_processed_block DESC, block_number DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(blockchain_type)
        .bind(exchange_id)
        .bind(trader)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            IndexerError::database(
                format!("Failed to query referral for trader {trader}"),
                Some(Box::new(e)),
            )
        })?;

        Ok(row)
    }

    /// Latest referral snapshot per trader, filtered to one code owner.
    pub async fn referrals_by_owner(
        &self,
        blockchain_type: &str,
        exchange_id: &str,
        owner: &str,
    ) -> IndexerResult<Vec<ReferralStateRecord>> {
        let rows = sqlx::query_as::<_, ReferralStateRecord>(
            r#"
            SELECT r.* FROM referral_states r
            JOIN (
                SELECT trader, MAX(id) AS max_id
                FROM referral_states
                WHERE blockchain_type = ? AND exchange_id = ?
                GROUP BY trader
            ) latest ON r.id = latest.max_id
            WHERE r.owner = ?
            ORDER BY r.trader
            "#,
        )
        .bind(blockchain_type)
        .bind(exchange_id)
        .bind(owner)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            IndexerError::database(
                format!("Failed to query referrals for owner {owner}"),
                Some(Box::new(e)),
            )
        })?;

        Ok(rows)
    }

    // ==================== REPLAY CHECKPOINT OPERATIONS ====================

    /// Saves replay checkpoints for one batch end.
    pub async fn save_checkpoints(&self, rows: &[CheckpointRecord]) -> IndexerResult<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(|e| {
            IndexerError::database("Failed to start transaction".to_string(), Some(Box::new(e)))
        })?;

        for row in rows {
            sqlx::query(
                r#"
                INSERT INTO replay_checkpoints (
                    blockchain_type, exchange_id, kind, entity, payload,
                    last_processed_block, created_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (blockchain_type, exchange_id, kind, entity, last_processed_block)
                DO UPDATE SET payload = excluded.payload
                "#,
            )
            .bind(&row.blockchain_type)
            .bind(&row.exchange_id)
            .bind(&row.kind)
            .bind(&row.entity)
            .bind(&row.payload)
            .bind(row.last_processed_block)
            .bind(row.created_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                IndexerError::database(
                    format!("Failed to insert checkpoint {}/{}", row.kind, row.entity),
                    Some(Box::new(e)),
                )
            })?;
        }

        tx.commit().await.map_err(|e| {
            IndexerError::database(
                "Failed to commit transaction".to_string(),
                Some(Box::new(e)),
            )
        })?;

        Ok(())
    }

    /// Deletes checkpoints written by batches at or beyond a cursor.
    pub async fn delete_checkpoints_from(
        &self,
        blockchain_type: &str,
        exchange_id: &str,
        cursor: u64,
    ) -> IndexerResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM replay_checkpoints
            WHERE blockchain_type = ? AND exchange_id = ? AND last_processed_block >= ?
            "#,
        )
        .bind(blockchain_type)
        .bind(exchange_id)
        .bind(i64::try_from(cursor).unwrap_or(i64::MAX))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            IndexerError::database(
                "Failed to pre-clear checkpoints".to_string(),
                Some(Box::new(e)),
            )
        })?;

        Ok(result.rows_affected())
    }

    /// Latest checkpoint payload per entity, for one map kind, at or below a
    /// block.
    pub async fn latest_checkpoints(
        &self,
        blockchain_type: &str,
        exchange_id: &str,
        kind: &str,
        at_or_below: u64,
    ) -> IndexerResult<Vec<(String, String)>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT c.entity, c.payload FROM replay_checkpoints c
            JOIN (
                SELECT entity, MAX(last_processed_block) AS max_block
                FROM replay_checkpoints
                WHERE blockchain_type = ? AND exchange_id = ? AND kind = ?
                  AND last_processed_block <= ?
                GROUP BY entity
            ) latest
              ON c.entity = latest.entity AND c.last_processed_block = latest.max_block
            WHERE c.blockchain_type = ? AND c.exchange_id = ? AND c.kind = ?
            "#,
        )
        .bind(blockchain_type)
        .bind(exchange_id)
        .bind(kind)
        .bind(i64::try_from(at_or_below).unwrap_or(i64::MAX))
        .bind(blockchain_type)
        .bind(exchange_id)
        .bind(kind)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            IndexerError::database(
                format!("Failed to query {kind} checkpoints"),
                Some(Box::new(e)),
            )
        })?;

        Ok(rows)
    }

    // ==================== DEPLOYMENT LOCK OPERATIONS ====================

    /// Tries to acquire (or refresh) the TTL lock for a deployment.
    ///
    /// The lock is best-effort: it is taken when no row exists, when the
    /// existing lock has expired, or when this holder already owns it. It is
    /// never released explicitly; a crashed holder's lock simply expires.
    pub async fn try_acquire_lock(
        &self,
        deployment_key: &str,
        holder: &str,
        ttl_secs: i64,
    ) -> IndexerResult<bool> {
        let now = chrono::Utc::now().timestamp();
        let expires_at = now + ttl_secs;

        let result = sqlx::query(
            r#"
            INSERT INTO deployment_locks (deployment_key, holder, expires_at)
            VALUES (?, ?, ?)
            ON CONFLICT (deployment_key) DO UPDATE SET
                holder = excluded.holder,
                expires_at = excluded.expires_at
            WHERE deployment_locks.expires_at < ?
               OR deployment_locks.holder = excluded.holder
            "#,
        )
        .bind(deployment_key)
        .bind(holder)
        .bind(expires_at)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            IndexerError::database(
                format!("Failed to acquire lock for {deployment_key}"),
                Some(Box::new(e)),
            )
        })?;

        Ok(result.rows_affected() > 0)
    }

    /// Health check for database connectivity.
    pub async fn health_check(&self) -> IndexerResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                IndexerError::database(
                    "Database health check failed".to_string(),
                    Some(Box::new(e)),
                )
            })?;

        Ok(())
    }
}
