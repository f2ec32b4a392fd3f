//! Database models that map to SQL tables.
//!
//! These structures represent rows in the database and provide conversions
//! between chain-level types and their persisted representations. Big
//! integers are stored as TEXT to preserve full 256-bit precision; event
//! field maps are stored as JSON.

use std::collections::BTreeMap;

use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::error::{IndexerError, IndexerResult};
use crate::events::{FieldValue, RawEvent};

/// A decoded, persisted event row.
///
/// Maps to the `decoded_events` table: one generic row store for every
/// stream, scoped by `(blockchain_type, exchange_id, stream_key)` with a
/// `(stream_key, transaction_index, transaction_hash, log_index)` uniqueness
/// constraint.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DecodedEventRow {
    /// Database-assigned unique identifier
    pub id: i64,
    /// Chain family scope key
    pub blockchain_type: String,
    /// Exchange scope key
    pub exchange_id: String,
    /// Stream this row belongs to
    pub stream_key: String,
    /// Block number where the event occurred
    pub block_number: i64,
    /// Transaction position within the block
    pub transaction_index: i64,
    /// Transaction hash (hex string with 0x prefix)
    pub transaction_hash: String,
    /// Log position within the block
    pub log_index: i64,
    /// Optional resolved block timestamp (unix seconds)
    pub block_timestamp: Option<i64>,
    /// Mapped event fields as a JSON object
    pub fields: String,
    /// Unix timestamp when record was created
    pub created_at: i64,
}

impl DecodedEventRow {
    /// Creates a row from a raw event and an already-mapped field set.
    ///
    /// # Errors
    ///
    /// Returns a decoding error if the field map cannot be serialized.
    pub fn new(
        blockchain_type: &str,
        exchange_id: &str,
        stream_key: &str,
        raw: &RawEvent,
        block_timestamp: Option<i64>,
        fields: &BTreeMap<String, FieldValue>,
    ) -> IndexerResult<Self> {
        let fields_json = serde_json::to_string(fields).map_err(|e| {
            IndexerError::decoding("Failed to serialize event fields", Some(Box::new(e)))
        })?;

        Ok(Self {
            id: 0, // Will be set by database
            blockchain_type: blockchain_type.to_string(),
            exchange_id: exchange_id.to_string(),
            stream_key: stream_key.to_string(),
            block_number: i64::try_from(raw.block_number).unwrap_or(i64::MAX),
            transaction_index: i64::try_from(raw.transaction_index).unwrap_or(i64::MAX),
            transaction_hash: raw.transaction_hash.clone(),
            log_index: i64::try_from(raw.log_index).unwrap_or(i64::MAX),
            block_timestamp,
            fields: fields_json,
            created_at: chrono::Utc::now().timestamp(),
        })
    }

    /// Deserializes the JSON field map back into typed values.
    ///
    /// # Errors
    ///
    /// Returns a decoding error if the stored JSON is malformed.
    pub fn field_map(&self) -> IndexerResult<BTreeMap<String, FieldValue>> {
        serde_json::from_str(&self.fields).map_err(|e| {
            IndexerError::decoding(
                format!("Failed to parse stored fields for row {}", self.id),
                Some(Box::new(e)),
            )
        })
    }
}

/// A persisted referral snapshot: one row per trader binding, tagged with
/// the replay batch that produced it.
///
/// Maps to the `referral_states` table. The latest row per
/// `(blockchain_type, exchange_id, trader)` is the steady-state answer;
/// older rows are kept as replay history and removed only by the
/// pre-clear-and-reprocess path.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ReferralStateRecord {
    /// Database-assigned unique identifier
    pub id: i64,
    /// Chain family scope key
    pub blockchain_type: String,
    /// Exchange scope key
    pub exchange_id: String,
    /// Trader address (hex string with 0x prefix)
    pub trader: String,
    /// Affiliate code the trader bound to (hex string)
    pub code: String,
    /// Code owner address at binding time (hex string)
    pub owner: String,
    /// Tier id carried by the code
    pub tier_id: i64,
    /// Tier total rebate (TEXT for U256 precision)
    pub total_rebate: String,
    /// Tier discount share (TEXT for U256 precision)
    pub discount_share: String,
    /// Block of the binding event
    pub block_number: i64,
    /// End block of the replay batch that wrote this row
    pub last_processed_block: i64,
    /// Unix timestamp when record was created
    pub created_at: i64,
}

impl ReferralStateRecord {
    /// Creates a referral snapshot row.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        blockchain_type: &str,
        exchange_id: &str,
        trader: Address,
        code: &str,
        owner: Address,
        tier_id: u64,
        total_rebate: U256,
        discount_share: U256,
        block_number: u64,
        last_processed_block: u64,
    ) -> Self {
        Self {
            id: 0, // Will be set by database
            blockchain_type: blockchain_type.to_string(),
            exchange_id: exchange_id.to_string(),
            trader: format!("{trader:?}"),
            code: code.to_string(),
            owner: format!("{owner:?}"),
            tier_id: i64::try_from(tier_id).unwrap_or(i64::MAX),
            total_rebate: total_rebate.to_string(),
            discount_share: discount_share.to_string(),
            block_number: i64::try_from(block_number).unwrap_or(i64::MAX),
            last_processed_block: i64::try_from(last_processed_block).unwrap_or(i64::MAX),
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    /// Parses `total_rebate` back to U256.
    pub fn total_rebate_u256(&self) -> IndexerResult<U256> {
        U256::from_str_radix(&self.total_rebate, 10).map_err(|e| {
            IndexerError::decoding(
                format!("Failed to parse total_rebate: {}", self.total_rebate),
                Some(Box::new(e)),
            )
        })
    }

    /// Parses `discount_share` back to U256.
    pub fn discount_share_u256(&self) -> IndexerResult<U256> {
        U256::from_str_radix(&self.discount_share, 10).map_err(|e| {
            IndexerError::decoding(
                format!("Failed to parse discount_share: {}", self.discount_share),
                Some(Box::new(e)),
            )
        })
    }
}

/// A replay state checkpoint written at the end of every replay batch.
///
/// Maps to the `replay_checkpoints` table. `kind` distinguishes the three
/// checkpointed maps (tier definitions, referrer tier assignments, code
/// states); `entity` is the map key and `payload` a JSON snapshot of the
/// value. Loading "latest per entity at or below a block" restores the
/// replay state at any batch boundary.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CheckpointRecord {
    /// Database-assigned unique identifier
    pub id: i64,
    /// Chain family scope key
    pub blockchain_type: String,
    /// Exchange scope key
    pub exchange_id: String,
    /// Checkpoint map discriminator: "tier", "referrer", or "code"
    pub kind: String,
    /// Map key (tier id, referrer address, or code)
    pub entity: String,
    /// JSON snapshot of the map value
    pub payload: String,
    /// End block of the replay batch that wrote this checkpoint
    pub last_processed_block: i64,
    /// Unix timestamp when record was created
    pub created_at: i64,
}

impl CheckpointRecord {
    /// Creates a checkpoint row.
    pub fn new(
        blockchain_type: &str,
        exchange_id: &str,
        kind: &str,
        entity: &str,
        payload: String,
        last_processed_block: u64,
    ) -> Self {
        Self {
            id: 0, // Will be set by database
            blockchain_type: blockchain_type.to_string(),
            exchange_id: exchange_id.to_string(),
            kind: kind.to_string(),
            entity: entity.to_string(),
            payload,
            last_processed_block: i64::try_from(last_processed_block).unwrap_or(i64::MAX),
            created_at: chrono::Utc::now().timestamp(),
        }
    }
}
