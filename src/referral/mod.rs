//! Referral state machine: chronological replay of referral events into
//! point-in-time trader snapshots.
//!
//! The machine consumes four event kinds (sourced through the harvester's
//! persisted rows) merged into one `(block, transaction index, log index)`
//! ordered sequence:
//!
//! - `RegisterCode` upserts a code's live state (owner plus the owner's
//!   current tier); it emits no row, since ownership alone has no trader to
//!   snapshot against.
//! - `SetTraderReferralCode` emits a snapshot row for the trader carrying
//!   the code's current owner/tier/rebate/discount share.
//! - `SetReferrerTier` and `SetTier` update live state AND every
//!   not-yet-persisted binding referencing an affected code, so a row
//!   emitted earlier in the same batch reflects tier changes that land later
//!   in that batch.
//!
//! Replay runs in fixed-size block batches (default 300 000 blocks) to bound
//! memory and transaction size. At every batch start the three state maps
//! (tier definitions, referrer tier assignments, code states) are rebuilt
//! from persisted checkpoints at or below the batch boundary; at batch end
//! new checkpoints are written and the replay cursor advances even when zero
//! rows were emitted. Replaying the same log therefore produces the same
//! final mapping for any choice of batch boundaries.

use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::db::models::{CheckpointRecord, DecodedEventRow, ReferralStateRecord};
use crate::db::repository::Repository;
use crate::deployment::Deployment;
use crate::error::{IndexerError, IndexerResult};
use crate::events::FieldValue;
use crate::harvester::streams::stream_key;

/// Default replay batch stride in blocks.
pub const REPLAY_BATCH_BLOCKS: u64 = 300_000;

/// Rows per insert transaction when persisting snapshots.
pub const REPLAY_SAVE_CHUNK: usize = 500;

/// Cursor slug for the replay stream.
const REPLAY_CURSOR_SLUG: &str = "referral-replay";

/// Checkpoint map discriminators.
const KIND_TIER: &str = "tier";
const KIND_REFERRER: &str = "referrer";
const KIND_CODE: &str = "code";

/// One referral event, decoded from a persisted harvester row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferralEvent {
    /// An affiliate code was registered to an owner.
    RegisterCode {
        /// The code (hex string)
        code: String,
        /// The owning account
        owner: Address,
    },
    /// A trader bound to a code.
    SetTraderCode {
        /// The trader account
        trader: Address,
        /// The code (hex string)
        code: String,
    },
    /// A referrer was assigned a tier.
    SetReferrerTier {
        /// The referrer account
        referrer: Address,
        /// The assigned tier id
        tier_id: u64,
    },
    /// A tier's parameters changed.
    SetTier {
        /// The tier id
        tier_id: u64,
        /// New total rebate
        total_rebate: U256,
        /// New discount share
        discount_share: U256,
    },
}

/// A referral event with its chain position for chronological merging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderedReferralEvent {
    /// `(block, transaction index, log index)` position
    pub position: (u64, u64, u64),
    /// The decoded event
    pub event: ReferralEvent,
}

/// Rebate/discount parameters of one tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TierParams {
    /// Total rebate granted to referred trades
    pub total_rebate: U256,
    /// Share of the rebate passed to the trader as a discount
    pub discount_share: U256,
}

/// Live state of one code during replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeState {
    /// Owning account
    pub owner: Address,
    /// Effective tier id
    pub tier_id: u64,
    /// Tier total rebate as of the last state transition
    pub total_rebate: U256,
    /// Tier discount share as of the last state transition
    pub discount_share: U256,
}

/// The three state maps rebuilt at every batch boundary.
#[derive(Debug, Clone, Default)]
pub struct ReplayState {
    /// Tier definitions
    pub tiers: HashMap<u64, TierParams>,
    /// Referrer tier assignments
    pub referrer_tiers: HashMap<Address, u64>,
    /// Live code states
    pub codes: HashMap<String, CodeState>,
}

/// A trader binding awaiting persistence at batch end.
///
/// Later tier events within the batch patch these in place; nothing already
/// persisted is ever rewritten inside a batch.
#[derive(Debug, Clone)]
struct PendingBinding {
    trader: Address,
    code: String,
    owner: Address,
    tier_id: u64,
    total_rebate: U256,
    discount_share: U256,
    position: (u64, u64, u64),
}

/// Steady-state answer for one trader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraderReferralInfo {
    /// The code the trader bound to
    pub code: String,
    /// Code owner at binding time
    pub owner: Address,
    /// Effective tier id
    pub tier_id: u64,
    /// Tier total rebate
    pub total_rebate: U256,
    /// Tier discount share
    pub discount_share: U256,
}

#[derive(Debug, Serialize, Deserialize)]
struct TierPayload {
    total_rebate: String,
    discount_share: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ReferrerPayload {
    tier_id: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct CodePayload {
    owner: String,
    tier_id: u64,
    total_rebate: String,
    discount_share: String,
}

/// Apply one event to the live state and the pending bindings.
fn apply_event(
    state: &mut ReplayState,
    pending: &mut HashMap<Address, PendingBinding>,
    ordered: &OrderedReferralEvent,
) {
    match &ordered.event {
        ReferralEvent::RegisterCode { code, owner } => {
            // A (re-)registration resolves the owner's current tier; earlier
            // pending bindings keep their snapshot until a tier event
            // touches the code again.
            let tier_id = state.referrer_tiers.get(owner).copied().unwrap_or(0);
            let params = state.tiers.get(&tier_id).copied().unwrap_or_default();
            state.codes.insert(
                code.clone(),
                CodeState {
                    owner: *owner,
                    tier_id,
                    total_rebate: params.total_rebate,
                    discount_share: params.discount_share,
                },
            );
        }
        ReferralEvent::SetTraderCode { trader, code } => {
            if let Some(code_state) = state.codes.get(code) {
                // Last binding per trader wins within a batch.
                pending.insert(
                    *trader,
                    PendingBinding {
                        trader: *trader,
                        code: code.clone(),
                        owner: code_state.owner,
                        tier_id: code_state.tier_id,
                        total_rebate: code_state.total_rebate,
                        discount_share: code_state.discount_share,
                        position: ordered.position,
                    },
                );
            } else {
                debug!(code, "Trader bound to unregistered code, no snapshot emitted");
            }
        }
        ReferralEvent::SetReferrerTier { referrer, tier_id } => {
            state.referrer_tiers.insert(*referrer, *tier_id);
            let params = state.tiers.get(tier_id).copied().unwrap_or_default();

            let mut affected = Vec::new();
            for (code, code_state) in &mut state.codes {
                if code_state.owner == *referrer {
                    code_state.tier_id = *tier_id;
                    code_state.total_rebate = params.total_rebate;
                    code_state.discount_share = params.discount_share;
                    affected.push(code.clone());
                }
            }

            for binding in pending.values_mut() {
                if affected.contains(&binding.code) {
                    binding.tier_id = *tier_id;
                    binding.total_rebate = params.total_rebate;
                    binding.discount_share = params.discount_share;
                }
            }
        }
        ReferralEvent::SetTier {
            tier_id,
            total_rebate,
            discount_share,
        } => {
            state.tiers.insert(
                *tier_id,
                TierParams {
                    total_rebate: *total_rebate,
                    discount_share: *discount_share,
                },
            );

            let mut affected = Vec::new();
            for (code, code_state) in &mut state.codes {
                if code_state.tier_id == *tier_id {
                    code_state.total_rebate = *total_rebate;
                    code_state.discount_share = *discount_share;
                    affected.push(code.clone());
                }
            }

            for binding in pending.values_mut() {
                if affected.contains(&binding.code) {
                    binding.total_rebate = *total_rebate;
                    binding.discount_share = *discount_share;
                }
            }
        }
    }
}

/// Scan an ordered batch of events, mutating the live state and returning
/// the bindings to persist, in chronological order.
fn scan_batch(
    state: &mut ReplayState,
    events: &[OrderedReferralEvent],
) -> Vec<PendingBinding> {
    let mut pending: HashMap<Address, PendingBinding> = HashMap::new();

    for ordered in events {
        apply_event(state, &mut pending, ordered);
    }

    let mut bindings: Vec<PendingBinding> = pending.into_values().collect();
    bindings.sort_by_key(|binding| binding.position);
    bindings
}

/// The checkpoint-driven replay engine for one deployment.
pub struct ReferralReplayer {
    repo: Arc<Repository>,
    deployment: Deployment,
}

impl ReferralReplayer {
    /// Creates a replayer over the deployment's repository.
    #[must_use]
    pub const fn new(repo: Arc<Repository>, deployment: Deployment) -> Self {
        Self { repo, deployment }
    }

    fn replay_cursor_key(&self) -> String {
        stream_key(&self.deployment, REPLAY_CURSOR_SLUG)
    }

    /// Replay the full history up to `end_block`, in batches of
    /// [`REPLAY_BATCH_BLOCKS`], resuming from the replay cursor.
    #[instrument(skip(self), fields(deployment = %self.deployment.key()))]
    pub async fn run_to(&self, end_block: u64) -> IndexerResult<()> {
        let cursor_key = self.replay_cursor_key();
        let cursor = self
            .repo
            .get_or_init_cursor(&cursor_key, self.deployment.start_block)
            .await?;

        if cursor >= end_block {
            debug!(cursor, end_block, "Replay already caught up");
            return Ok(());
        }

        // Pre-clear anything written by batches beyond the committed
        // cursor (crash recovery, same trust model as the harvester).
        let cleared_rows = self
            .repo
            .delete_referral_states_from(
                &self.deployment.blockchain_type,
                &self.deployment.exchange_id,
                cursor + 1,
            )
            .await?;
        let cleared_checkpoints = self
            .repo
            .delete_checkpoints_from(
                &self.deployment.blockchain_type,
                &self.deployment.exchange_id,
                cursor + 1,
            )
            .await?;
        if cleared_rows > 0 || cleared_checkpoints > 0 {
            warn!(
                cleared_rows,
                cleared_checkpoints, "Pre-cleared replay output above cursor"
            );
        }

        let mut batch_start = cursor + 1;
        while batch_start <= end_block {
            let batch_end = batch_start
                .saturating_add(REPLAY_BATCH_BLOCKS - 1)
                .min(end_block);

            self.replay(batch_start, batch_end).await?;

            batch_start = batch_end + 1;
        }

        Ok(())
    }

    /// Replay one batch `[batch_start ..= batch_end]` and persist its
    /// snapshots and checkpoints.
    ///
    /// The cursor advances to `batch_end` regardless of how many rows were
    /// emitted; zero rows is a valid outcome.
    #[instrument(skip(self), fields(deployment = %self.deployment.key()))]
    pub async fn replay(&self, batch_start: u64, batch_end: u64) -> IndexerResult<()> {
        let mut state = self.load_state_at(batch_start).await?;
        let events = self.load_events(batch_start, batch_end).await?;

        let bindings = scan_batch(&mut state, &events);

        let rows: Vec<ReferralStateRecord> = bindings
            .iter()
            .map(|binding| {
                ReferralStateRecord::new(
                    &self.deployment.blockchain_type,
                    &self.deployment.exchange_id,
                    binding.trader,
                    &binding.code,
                    binding.owner,
                    binding.tier_id,
                    binding.total_rebate,
                    binding.discount_share,
                    binding.position.0,
                    batch_end,
                )
            })
            .collect();

        self.repo
            .save_referral_states(&rows, REPLAY_SAVE_CHUNK)
            .await?;
        self.save_checkpoints(&state, batch_end).await?;

        self.repo
            .set_cursor(&self.replay_cursor_key(), batch_end)
            .await?;

        info!(
            batch_start,
            batch_end,
            events = events.len(),
            snapshots = rows.len(),
            "Replay batch committed"
        );

        Ok(())
    }

    /// Latest snapshot for one trader.
    pub async fn get_trader_referral_info(
        &self,
        trader: Address,
    ) -> IndexerResult<Option<TraderReferralInfo>> {
        let record = self
            .repo
            .latest_referral_for_trader(
                &self.deployment.blockchain_type,
                &self.deployment.exchange_id,
                &format!("{trader:?}"),
            )
            .await?;

        record.map(|record| record_to_info(&record)).transpose()
    }

    /// Latest snapshot per trader for one code owner.
    pub async fn get_referrals_by_owner(
        &self,
        owner: Address,
    ) -> IndexerResult<Vec<(Address, TraderReferralInfo)>> {
        let records = self
            .repo
            .referrals_by_owner(
                &self.deployment.blockchain_type,
                &self.deployment.exchange_id,
                &format!("{owner:?}"),
            )
            .await?;

        records
            .iter()
            .map(|record| {
                let trader = parse_address(&record.trader)?;
                Ok((trader, record_to_info(record)?))
            })
            .collect()
    }

    /// Rebuild the three state maps from checkpoints at or below a batch
    /// boundary.
    async fn load_state_at(&self, batch_start: u64) -> IndexerResult<ReplayState> {
        let mut state = ReplayState::default();

        for (entity, payload) in self
            .repo
            .latest_checkpoints(
                &self.deployment.blockchain_type,
                &self.deployment.exchange_id,
                KIND_TIER,
                batch_start,
            )
            .await?
        {
            let tier_id = entity.parse::<u64>().map_err(|e| {
                IndexerError::state(
                    format!("invalid tier checkpoint entity '{entity}'"),
                    Some(Box::new(e)),
                )
            })?;
            let parsed: TierPayload = parse_payload(&payload)?;
            state.tiers.insert(
                tier_id,
                TierParams {
                    total_rebate: parse_u256(&parsed.total_rebate)?,
                    discount_share: parse_u256(&parsed.discount_share)?,
                },
            );
        }

        for (entity, payload) in self
            .repo
            .latest_checkpoints(
                &self.deployment.blockchain_type,
                &self.deployment.exchange_id,
                KIND_REFERRER,
                batch_start,
            )
            .await?
        {
            let referrer = parse_address(&entity)?;
            let parsed: ReferrerPayload = parse_payload(&payload)?;
            state.referrer_tiers.insert(referrer, parsed.tier_id);
        }

        for (entity, payload) in self
            .repo
            .latest_checkpoints(
                &self.deployment.blockchain_type,
                &self.deployment.exchange_id,
                KIND_CODE,
                batch_start,
            )
            .await?
        {
            let parsed: CodePayload = parse_payload(&payload)?;
            state.codes.insert(
                entity,
                CodeState {
                    owner: parse_address(&parsed.owner)?,
                    tier_id: parsed.tier_id,
                    total_rebate: parse_u256(&parsed.total_rebate)?,
                    discount_share: parse_u256(&parsed.discount_share)?,
                },
            );
        }

        Ok(state)
    }

    /// Write end-of-batch checkpoints for every known map entry.
    async fn save_checkpoints(&self, state: &ReplayState, batch_end: u64) -> IndexerResult<()> {
        let mut records = Vec::new();

        for (tier_id, params) in &state.tiers {
            let payload = serde_json::to_string(&TierPayload {
                total_rebate: params.total_rebate.to_string(),
                discount_share: params.discount_share.to_string(),
            })
            .map_err(|e| {
                IndexerError::state("failed to serialize tier checkpoint", Some(Box::new(e)))
            })?;
            records.push(CheckpointRecord::new(
                &self.deployment.blockchain_type,
                &self.deployment.exchange_id,
                KIND_TIER,
                &tier_id.to_string(),
                payload,
                batch_end,
            ));
        }

        for (referrer, tier_id) in &state.referrer_tiers {
            let payload = serde_json::to_string(&ReferrerPayload { tier_id: *tier_id })
                .map_err(|e| {
                    IndexerError::state(
                        "failed to serialize referrer checkpoint",
                        Some(Box::new(e)),
                    )
                })?;
            records.push(CheckpointRecord::new(
                &self.deployment.blockchain_type,
                &self.deployment.exchange_id,
                KIND_REFERRER,
                &format!("{referrer:?}"),
                payload,
                batch_end,
            ));
        }

        for (code, code_state) in &state.codes {
            let payload = serde_json::to_string(&CodePayload {
                owner: format!("{:?}", code_state.owner),
                tier_id: code_state.tier_id,
                total_rebate: code_state.total_rebate.to_string(),
                discount_share: code_state.discount_share.to_string(),
            })
            .map_err(|e| {
                IndexerError::state("failed to serialize code checkpoint", Some(Box::new(e)))
            })?;
            records.push(CheckpointRecord::new(
                &self.deployment.blockchain_type,
                &self.deployment.exchange_id,
                KIND_CODE,
                code,
                payload,
                batch_end,
            ));
        }

        self.repo.save_checkpoints(&records).await
    }

    /// Load and merge the four referral streams' rows for one batch into one
    /// chronological sequence.
    async fn load_events(
        &self,
        batch_start: u64,
        batch_end: u64,
    ) -> IndexerResult<Vec<OrderedReferralEvent>> {
        let mut events = Vec::new();

        for slug in crate::harvester::streams::REFERRAL_SLUGS {
            let key = stream_key(&self.deployment, slug);
            let rows = self
                .repo
                .get_event_rows_in_range(&key, batch_start, batch_end)
                .await?;
            for row in rows {
                events.push(row_to_event(slug, &row)?);
            }
        }

        // Order matters: later events can rewrite earlier pending bindings
        // within the same batch.
        events.sort_by_key(|event| event.position);
        Ok(events)
    }
}

fn record_to_info(record: &ReferralStateRecord) -> IndexerResult<TraderReferralInfo> {
    Ok(TraderReferralInfo {
        code: record.code.clone(),
        owner: parse_address(&record.owner)?,
        tier_id: u64::try_from(record.tier_id).unwrap_or(0),
        total_rebate: record.total_rebate_u256()?,
        discount_share: record.discount_share_u256()?,
    })
}

fn parse_address(text: &str) -> IndexerResult<Address> {
    text.parse::<Address>().map_err(|e| {
        IndexerError::decoding(format!("invalid address '{text}'"), Some(Box::new(e)))
    })
}

fn parse_u256(text: &str) -> IndexerResult<U256> {
    U256::from_str_radix(text, 10).map_err(|e| {
        IndexerError::decoding(format!("invalid integer '{text}'"), Some(Box::new(e)))
    })
}

fn parse_payload<T: for<'de> Deserialize<'de>>(payload: &str) -> IndexerResult<T> {
    serde_json::from_str(payload).map_err(|e| {
        IndexerError::state(
            format!("malformed checkpoint payload '{payload}'"),
            Some(Box::new(e)),
        )
    })
}

/// Decode one persisted harvester row into a referral event.
fn row_to_event(slug: &str, row: &DecodedEventRow) -> IndexerResult<OrderedReferralEvent> {
    let fields = row.field_map()?;

    let get_address_field = |name: &str| -> IndexerResult<Address> {
        fields
            .get(name)
            .and_then(FieldValue::as_address)
            .ok_or_else(|| {
                IndexerError::decoding(
                    format!("referral row {} missing address field '{name}'", row.id),
                    None,
                )
            })
    };
    let get_string_field = |name: &str| -> IndexerResult<String> {
        fields
            .get(name)
            .and_then(FieldValue::as_str)
            .map(ToString::to_string)
            .ok_or_else(|| {
                IndexerError::decoding(
                    format!("referral row {} missing string field '{name}'", row.id),
                    None,
                )
            })
    };
    let get_uint_field = |name: &str| -> IndexerResult<u64> {
        fields.get(name).and_then(FieldValue::as_uint).ok_or_else(|| {
            IndexerError::decoding(
                format!("referral row {} missing uint field '{name}'", row.id),
                None,
            )
        })
    };
    let get_biguint_field = |name: &str| -> IndexerResult<U256> {
        fields
            .get(name)
            .and_then(FieldValue::as_biguint)
            .ok_or_else(|| {
                IndexerError::decoding(
                    format!("referral row {} missing biguint field '{name}'", row.id),
                    None,
                )
            })
    };

    let event = match slug {
        "register-code" => ReferralEvent::RegisterCode {
            code: get_string_field("code")?,
            owner: get_address_field("account")?,
        },
        "set-trader-referral-code" => ReferralEvent::SetTraderCode {
            trader: get_address_field("account")?,
            code: get_string_field("code")?,
        },
        "set-referrer-tier" => ReferralEvent::SetReferrerTier {
            referrer: get_address_field("referrer")?,
            tier_id: get_uint_field("tierId")?,
        },
        "set-tier" => ReferralEvent::SetTier {
            tier_id: get_uint_field("tierId")?,
            total_rebate: get_biguint_field("totalRebate")?,
            discount_share: get_biguint_field("discountShare")?,
        },
        other => {
            return Err(IndexerError::state(
                format!("unknown referral stream slug '{other}'"),
                None,
            ))
        }
    };

    Ok(OrderedReferralEvent {
        position: (
            u64::try_from(row.block_number).unwrap_or(0),
            u64::try_from(row.transaction_index).unwrap_or(0),
            u64::try_from(row.log_index).unwrap_or(0),
        ),
        event,
    })
}
