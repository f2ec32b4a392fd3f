//! Stream specifications for every event the indexer harvests.
//!
//! Each builder pairs an event descriptor with its cursor key, mapping
//! rules, and transform stages for one deployment. The scheduler assembles
//! these once per cycle with the current head block as `end_block`.

use crate::deployment::Deployment;
use crate::error::IndexerResult;
use crate::events::{
    FieldValue, RawEvent, PAIR_CREATED, REGISTER_CODE, SET_REFERRER_TIER, SET_TIER,
    SET_TRADER_REFERRAL_CODE, STRATEGY_CREATED, STRATEGY_DELETED, STRATEGY_UPDATED,
    TOKENS_TRADED, TRADING_FEE_UPDATED,
};
use crate::harvester::mapping::{MapContext, MappingRule};
use crate::harvester::StreamSpec;
use std::collections::BTreeMap;

/// Cursor key for one event slug within a deployment, e.g.
/// `"ethereum-ethereum-strategy-created-events"`.
#[must_use]
pub fn stream_key(deployment: &Deployment, slug: &str) -> String {
    format!("{}-{slug}-events", deployment.key())
}

fn order_rules(prefix: &'static str) -> Vec<MappingRule> {
    // The four packed fields of one order, flattened by the decoder.
    match prefix {
        "order0" => vec![
            MappingRule::CopyBigUint { field: "order0_y" },
            MappingRule::CopyBigUint { field: "order0_z" },
            MappingRule::CopyBigUint { field: "order0_A" },
            MappingRule::CopyBigUint { field: "order0_B" },
        ],
        _ => vec![
            MappingRule::CopyBigUint { field: "order1_y" },
            MappingRule::CopyBigUint { field: "order1_z" },
            MappingRule::CopyBigUint { field: "order1_A" },
            MappingRule::CopyBigUint { field: "order1_B" },
        ],
    }
}

/// Tag the trade row with the id of the token the fee was charged in.
///
/// When the trade was quoted by target amount the fee rides the source
/// token; otherwise it rides the target token.
fn tag_fee_token(
    mut row: BTreeMap<String, FieldValue>,
    _raw: &RawEvent,
    _ctx: &MapContext<'_>,
) -> IndexerResult<BTreeMap<String, FieldValue>> {
    let by_target = row
        .get("byTargetAmount")
        .and_then(FieldValue::as_bool)
        .unwrap_or(false);

    let fee_token = if by_target {
        row.get("source_token_id").cloned()
    } else {
        row.get("target_token_id").cloned()
    };

    if let Some(token_id) = fee_token {
        row.insert("fee_token_id".to_string(), token_id);
    }

    Ok(row)
}

/// Strategy creation stream: ids, owner, tokens, both packed orders.
#[must_use]
pub fn strategy_created(deployment: &Deployment, end_block: u64) -> StreamSpec {
    let mut rules = vec![
        MappingRule::CopyBigUint { field: "id" },
        MappingRule::CopyAddress { field: "owner" },
        MappingRule::CopyAddress { field: "token0" },
        MappingRule::CopyAddress { field: "token1" },
        MappingRule::PairRelation {
            token0_field: "token0",
            token1_field: "token1",
            column: "pair_id",
        },
    ];
    rules.extend(order_rules("order0"));
    rules.extend(order_rules("order1"));

    StreamSpec {
        stream_key: stream_key(deployment, "strategy-created"),
        contract: "controller".to_string(),
        event: &STRATEGY_CREATED,
        end_block,
        keep_stale_rows: false,
        tag_timestamps: true,
        rules,
        transforms: Vec::new(),
    }
}

/// Strategy update stream (orders after a trade or an owner edit).
#[must_use]
pub fn strategy_updated(deployment: &Deployment, end_block: u64) -> StreamSpec {
    let mut rules = vec![
        MappingRule::CopyBigUint { field: "id" },
        MappingRule::CopyAddress { field: "token0" },
        MappingRule::CopyAddress { field: "token1" },
        MappingRule::CopyUint { field: "reason" },
    ];
    rules.extend(order_rules("order0"));
    rules.extend(order_rules("order1"));

    StreamSpec {
        stream_key: stream_key(deployment, "strategy-updated"),
        contract: "controller".to_string(),
        event: &STRATEGY_UPDATED,
        end_block,
        keep_stale_rows: false,
        tag_timestamps: false,
        rules,
        transforms: Vec::new(),
    }
}

/// Strategy deletion stream.
#[must_use]
pub fn strategy_deleted(deployment: &Deployment, end_block: u64) -> StreamSpec {
    let mut rules = vec![
        MappingRule::CopyBigUint { field: "id" },
        MappingRule::CopyAddress { field: "owner" },
        MappingRule::CopyAddress { field: "token0" },
        MappingRule::CopyAddress { field: "token1" },
    ];
    rules.extend(order_rules("order0"));
    rules.extend(order_rules("order1"));

    StreamSpec {
        stream_key: stream_key(deployment, "strategy-deleted"),
        contract: "controller".to_string(),
        event: &STRATEGY_DELETED,
        end_block,
        keep_stale_rows: false,
        tag_timestamps: false,
        rules,
        transforms: Vec::new(),
    }
}

/// Trade stream with token relation lookups and fee-token tagging.
#[must_use]
pub fn tokens_traded(deployment: &Deployment, end_block: u64) -> StreamSpec {
    StreamSpec {
        stream_key: stream_key(deployment, "tokens-traded"),
        contract: "controller".to_string(),
        event: &TOKENS_TRADED,
        end_block,
        keep_stale_rows: false,
        tag_timestamps: true,
        rules: vec![
            MappingRule::CopyAddress { field: "trader" },
            MappingRule::CopyAddress { field: "sourceToken" },
            MappingRule::CopyAddress { field: "targetToken" },
            MappingRule::TokenRelation {
                field: "sourceToken",
                column: "source_token_id",
            },
            MappingRule::TokenRelation {
                field: "targetToken",
                column: "target_token_id",
            },
            MappingRule::CopyBigUint {
                field: "sourceAmount",
            },
            MappingRule::CopyBigUint {
                field: "targetAmount",
            },
            MappingRule::CopyBigUint {
                field: "tradingFeeAmount",
            },
            MappingRule::CopyBool {
                field: "byTargetAmount",
            },
        ],
        transforms: vec![tag_fee_token],
    }
}

/// Pair creation stream.
#[must_use]
pub fn pair_created(deployment: &Deployment, end_block: u64) -> StreamSpec {
    StreamSpec {
        stream_key: stream_key(deployment, "pair-created"),
        contract: "controller".to_string(),
        event: &PAIR_CREATED,
        end_block,
        keep_stale_rows: false,
        tag_timestamps: false,
        rules: vec![
            MappingRule::CopyBigUint { field: "pairId" },
            MappingRule::CopyAddress { field: "token0" },
            MappingRule::CopyAddress { field: "token1" },
        ],
        transforms: Vec::new(),
    }
}

/// Protocol trading-fee change stream.
#[must_use]
pub fn trading_fee_updated(deployment: &Deployment, end_block: u64) -> StreamSpec {
    StreamSpec {
        stream_key: stream_key(deployment, "trading-fee-updated"),
        contract: "controller".to_string(),
        event: &TRADING_FEE_UPDATED,
        end_block,
        keep_stale_rows: false,
        tag_timestamps: false,
        rules: vec![
            MappingRule::CopyUint { field: "prevFeePPM" },
            MappingRule::CopyUint { field: "newFeePPM" },
        ],
        transforms: Vec::new(),
    }
}

/// Slugs of the four referral streams, in replay merge order.
pub const REFERRAL_SLUGS: [&str; 4] = [
    "register-code",
    "set-trader-referral-code",
    "set-referrer-tier",
    "set-tier",
];

/// The four referral streams consumed by the replay state machine.
#[must_use]
pub fn referral_streams(deployment: &Deployment, end_block: u64) -> Vec<StreamSpec> {
    vec![
        StreamSpec {
            stream_key: stream_key(deployment, "register-code"),
            contract: "referral_storage".to_string(),
            event: &REGISTER_CODE,
            end_block,
            keep_stale_rows: false,
            tag_timestamps: false,
            rules: vec![
                MappingRule::CopyAddress { field: "account" },
                MappingRule::CopyString { field: "code" },
            ],
            transforms: Vec::new(),
        },
        StreamSpec {
            stream_key: stream_key(deployment, "set-trader-referral-code"),
            contract: "referral_storage".to_string(),
            event: &SET_TRADER_REFERRAL_CODE,
            end_block,
            keep_stale_rows: false,
            tag_timestamps: false,
            rules: vec![
                MappingRule::CopyAddress { field: "account" },
                MappingRule::CopyString { field: "code" },
            ],
            transforms: Vec::new(),
        },
        StreamSpec {
            stream_key: stream_key(deployment, "set-referrer-tier"),
            contract: "referral_storage".to_string(),
            event: &SET_REFERRER_TIER,
            end_block,
            keep_stale_rows: false,
            tag_timestamps: false,
            rules: vec![
                MappingRule::CopyAddress { field: "referrer" },
                MappingRule::CopyUint { field: "tierId" },
            ],
            transforms: Vec::new(),
        },
        StreamSpec {
            stream_key: stream_key(deployment, "set-tier"),
            contract: "referral_storage".to_string(),
            event: &SET_TIER,
            end_block,
            keep_stale_rows: false,
            tag_timestamps: false,
            rules: vec![
                MappingRule::CopyUint { field: "tierId" },
                MappingRule::CopyBigUint { field: "totalRebate" },
                MappingRule::CopyBigUint {
                    field: "discountShare",
                },
            ],
            transforms: Vec::new(),
        },
    ]
}

/// All harvest streams for one deployment, referral streams included.
#[must_use]
pub fn all_streams(deployment: &Deployment, end_block: u64) -> Vec<StreamSpec> {
    let mut specs = vec![
        strategy_created(deployment, end_block),
        strategy_updated(deployment, end_block),
        strategy_deleted(deployment, end_block),
        tokens_traded(deployment, end_block),
        pair_created(deployment, end_block),
        trading_fee_updated(deployment, end_block),
    ];
    specs.extend(referral_streams(deployment, end_block));
    specs
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn deployment() -> Deployment {
        Deployment::new("testchain", "testdex", 0, 100, 4, HashMap::new())
    }

    #[test]
    fn test_stream_keys_are_scoped_and_unique() {
        let deployment = deployment();
        let specs = all_streams(&deployment, 1_000);

        let mut keys: Vec<&str> = specs.iter().map(|s| s.stream_key.as_str()).collect();
        keys.sort_unstable();
        let len_before = keys.len();
        keys.dedup();
        assert_eq!(keys.len(), len_before);

        for spec in &specs {
            assert!(spec.stream_key.starts_with("testchain-testdex-"));
            assert!(spec.stream_key.ends_with("-events"));
        }
    }

    #[test]
    fn test_tag_fee_token_selects_side() {
        let mapping_ctx_dictionaries = crate::harvester::mapping::Dictionaries::default();
        let timestamps = HashMap::new();
        let ctx = MapContext {
            dictionaries: &mapping_ctx_dictionaries,
            block_timestamps: &timestamps,
        };
        let raw = RawEvent {
            block_number: 1,
            transaction_index: 0,
            transaction_hash: "0x0".to_string(),
            log_index: 0,
            fields: BTreeMap::new(),
        };

        let mut row = BTreeMap::new();
        row.insert("source_token_id".to_string(), FieldValue::Uint(1));
        row.insert("target_token_id".to_string(), FieldValue::Uint(2));
        row.insert("byTargetAmount".to_string(), FieldValue::Bool(true));

        let tagged = tag_fee_token(row.clone(), &raw, &ctx).unwrap();
        assert_eq!(tagged.get("fee_token_id"), Some(&FieldValue::Uint(1)));

        row.insert("byTargetAmount".to_string(), FieldValue::Bool(false));
        let tagged = tag_fee_token(row, &raw, &ctx).unwrap();
        assert_eq!(tagged.get("fee_token_id"), Some(&FieldValue::Uint(2)));
    }
}
