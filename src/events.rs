//! Typed contract events for the DEX protocol, decoded with compile-time
//! type safety.
//!
//! This module uses Alloy's `sol!` macro to generate type-safe event
//! structures directly from Solidity signatures, and turns every decoded log
//! into a uniform [`RawEvent`] whose `fields` map feeds the harvester's
//! mapping pipeline.
//!
//! Three families of events are defined:
//!
//! - **Strategy events** (`StrategyCreated` / `StrategyUpdated` /
//!   `StrategyDeleted`) carrying two packed [`Order`] structs each
//! - **Trade and pair events** (`TokensTraded`, `PairCreated`,
//!   `TradingFeePPMUpdated`)
//! - **Referral events** (`RegisterCode`, `SetTraderReferralCode`,
//!   `SetReferrerTier`, `SetTier`) consumed by the replay state machine
//!
//! Every event has a static [`EventDescriptor`] bundling its name, signature
//! hash, and decoder function. Stream specifications reference descriptors so
//! the harvester never needs to know concrete event types.
//!
//! ## Example
//!
//! ```no_run
//! use dex_event_indexer::events::{create_event_filter, STRATEGY_CREATED};
//! use alloy::primitives::address;
//!
//! let filter = create_event_filter(
//!     address!("C537e898CD774e2dCBa3B14Ea6f34C93d5eA45e1"),
//!     STRATEGY_CREATED.signature_hash,
//!     19_000_000,
//!     19_001_000,
//! );
//! ```

use std::collections::BTreeMap;

use alloy::primitives::{Address, LogData, B256, U256};
use alloy::rpc::types::{Filter, Log};
use alloy::sol;
use alloy::sol_types::SolEvent;
use serde::{Deserialize, Serialize};

use crate::error::{IndexerError, IndexerResult};

sol! {
    /// A packed liquidity order. `y`/`z` are linear liquidity and capacity;
    /// `A`/`B` are 48-bit-mantissa packed floats (see the codec module).
    #[derive(Debug)]
    struct Order {
        uint128 y;
        uint128 z;
        uint64 A;
        uint64 B;
    }

    /// Emitted when a strategy is created with its two orders.
    #[derive(Debug)]
    event StrategyCreated(
        uint256 id,
        address indexed owner,
        address indexed token0,
        address indexed token1,
        Order order0,
        Order order1
    );

    /// Emitted when a strategy's orders change (trade or owner edit).
    #[derive(Debug)]
    event StrategyUpdated(
        uint256 indexed id,
        address indexed token0,
        address indexed token1,
        Order order0,
        Order order1,
        uint8 reason
    );

    /// Emitted when a strategy is deleted.
    #[derive(Debug)]
    event StrategyDeleted(
        uint256 id,
        address indexed owner,
        address indexed token0,
        address indexed token1,
        Order order0,
        Order order1
    );

    /// Emitted once per trade with the aggregate amounts and fee.
    #[derive(Debug)]
    event TokensTraded(
        address indexed trader,
        address indexed sourceToken,
        address indexed targetToken,
        uint256 sourceAmount,
        uint256 targetAmount,
        uint128 tradingFeeAmount,
        bool byTargetAmount
    );

    /// Emitted when a trading pair is enabled.
    #[derive(Debug)]
    event PairCreated(
        uint128 indexed pairId,
        address indexed token0,
        address indexed token1
    );

    /// Emitted when the protocol-wide trading fee changes.
    #[derive(Debug)]
    event TradingFeePPMUpdated(uint32 prevFeePPM, uint32 newFeePPM);

    /// Emitted when an affiliate code is registered to an owner.
    #[derive(Debug)]
    event RegisterCode(address account, bytes32 code);

    /// Emitted when a trader binds to an affiliate code.
    #[derive(Debug)]
    event SetTraderReferralCode(address account, bytes32 code);

    /// Emitted when a referrer is assigned a tier.
    #[derive(Debug)]
    event SetReferrerTier(address referrer, uint256 tierId);

    /// Emitted when a tier's rebate/discount parameters change.
    #[derive(Debug)]
    event SetTier(uint256 tierId, uint256 totalRebate, uint256 discountShare);
}

/// A single decoded value from an event's data, keyed by field name in
/// [`RawEvent::fields`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldValue {
    /// A string (hex-encoded `bytes32` codes, symbols)
    Str(String),
    /// A small unsigned integer (fees, reasons, tier ids)
    Uint(u64),
    /// A 256-bit unsigned integer (amounts, packed orders)
    BigUint(U256),
    /// A boolean flag
    Bool(bool),
    /// An account or contract address
    Addr(Address),
}

impl FieldValue {
    /// The contained string, if any.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The contained small integer, if any.
    #[must_use]
    pub const fn as_uint(&self) -> Option<u64> {
        match self {
            Self::Uint(v) => Some(*v),
            _ => None,
        }
    }

    /// The contained 256-bit integer, if any.
    #[must_use]
    pub const fn as_biguint(&self) -> Option<U256> {
        match self {
            Self::BigUint(v) => Some(*v),
            _ => None,
        }
    }

    /// The contained boolean, if any.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// The contained address, if any.
    #[must_use]
    pub const fn as_address(&self) -> Option<Address> {
        match self {
            Self::Addr(v) => Some(*v),
            _ => None,
        }
    }
}

/// A chain event in uniform shape, produced by the chain client.
///
/// Total order is defined by `(block_number, transaction_index, log_index)`;
/// [`RawEvent::chain_position`] exposes that tuple for sorting and
/// tie-breaking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Block the event was emitted in
    pub block_number: u64,
    /// Position of the transaction within the block
    pub transaction_index: u64,
    /// Transaction hash (hex string with 0x prefix)
    pub transaction_hash: String,
    /// Position of the log within the block
    pub log_index: u64,
    /// Decoded event fields, keyed by Solidity parameter name
    pub fields: BTreeMap<String, FieldValue>,
}

impl RawEvent {
    /// The `(block, transaction index, log index)` ordering tuple.
    #[must_use]
    pub const fn chain_position(&self) -> (u64, u64, u64) {
        (self.block_number, self.transaction_index, self.log_index)
    }
}

/// Sort events into canonical chronological order.
///
/// Events within the same block are ordered by transaction index, then by
/// log index, so any shuffled same-block input replays to one canonical
/// sequence.
pub fn sort_chronologically(events: &mut [RawEvent]) {
    events.sort_by_key(RawEvent::chain_position);
}

/// A named, decodable contract event.
///
/// Descriptors are `static`s so stream specifications can reference them
/// without owning decoder state.
pub struct EventDescriptor {
    /// Solidity event name
    pub name: &'static str,
    /// keccak hash of the event signature (topic0)
    pub signature_hash: B256,
    /// Decoder from a raw log into named fields
    pub decode: fn(&Log) -> IndexerResult<BTreeMap<String, FieldValue>>,
}

impl std::fmt::Debug for EventDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDescriptor")
            .field("name", &self.name)
            .field("signature_hash", &self.signature_hash)
            .finish()
    }
}

/// Descriptor for [`StrategyCreated`].
pub static STRATEGY_CREATED: EventDescriptor = EventDescriptor {
    name: "StrategyCreated",
    signature_hash: StrategyCreated::SIGNATURE_HASH,
    decode: decode_strategy_created,
};

/// Descriptor for [`StrategyUpdated`].
pub static STRATEGY_UPDATED: EventDescriptor = EventDescriptor {
    name: "StrategyUpdated",
    signature_hash: StrategyUpdated::SIGNATURE_HASH,
    decode: decode_strategy_updated,
};

/// Descriptor for [`StrategyDeleted`].
pub static STRATEGY_DELETED: EventDescriptor = EventDescriptor {
    name: "StrategyDeleted",
    signature_hash: StrategyDeleted::SIGNATURE_HASH,
    decode: decode_strategy_deleted,
};

/// Descriptor for [`TokensTraded`].
pub static TOKENS_TRADED: EventDescriptor = EventDescriptor {
    name: "TokensTraded",
    signature_hash: TokensTraded::SIGNATURE_HASH,
    decode: decode_tokens_traded,
};

/// Descriptor for [`PairCreated`].
pub static PAIR_CREATED: EventDescriptor = EventDescriptor {
    name: "PairCreated",
    signature_hash: PairCreated::SIGNATURE_HASH,
    decode: decode_pair_created,
};

/// Descriptor for [`TradingFeePPMUpdated`].
pub static TRADING_FEE_UPDATED: EventDescriptor = EventDescriptor {
    name: "TradingFeePPMUpdated",
    signature_hash: TradingFeePPMUpdated::SIGNATURE_HASH,
    decode: decode_trading_fee_updated,
};

/// Descriptor for [`RegisterCode`].
pub static REGISTER_CODE: EventDescriptor = EventDescriptor {
    name: "RegisterCode",
    signature_hash: RegisterCode::SIGNATURE_HASH,
    decode: decode_register_code,
};

/// Descriptor for [`SetTraderReferralCode`].
pub static SET_TRADER_REFERRAL_CODE: EventDescriptor = EventDescriptor {
    name: "SetTraderReferralCode",
    signature_hash: SetTraderReferralCode::SIGNATURE_HASH,
    decode: decode_set_trader_referral_code,
};

/// Descriptor for [`SetReferrerTier`].
pub static SET_REFERRER_TIER: EventDescriptor = EventDescriptor {
    name: "SetReferrerTier",
    signature_hash: SetReferrerTier::SIGNATURE_HASH,
    decode: decode_set_referrer_tier,
};

/// Descriptor for [`SetTier`].
pub static SET_TIER: EventDescriptor = EventDescriptor {
    name: "SetTier",
    signature_hash: SetTier::SIGNATURE_HASH,
    decode: decode_set_tier,
};

/// Create a typed filter for one event signature on one contract address.
#[must_use]
pub fn create_event_filter(
    contract: Address,
    signature_hash: B256,
    from_block: u64,
    to_block: u64,
) -> Filter {
    Filter::new()
        .address(contract)
        .event_signature(signature_hash)
        .from_block(from_block)
        .to_block(to_block)
}

fn decode_log<E: SolEvent>(log: &Log) -> IndexerResult<E> {
    let log_data = LogData::new_unchecked(log.topics().to_vec(), log.data().data.clone());
    E::decode_log_data(&log_data, true).map_err(|e| {
        IndexerError::decoding(
            format!("Failed to decode {} log", E::SIGNATURE),
            Some(Box::new(e)),
        )
    })
}

fn insert_order(fields: &mut BTreeMap<String, FieldValue>, prefix: &str, order: &Order) {
    fields.insert(format!("{prefix}_y"), FieldValue::BigUint(U256::from(order.y)));
    fields.insert(format!("{prefix}_z"), FieldValue::BigUint(U256::from(order.z)));
    fields.insert(format!("{prefix}_A"), FieldValue::BigUint(U256::from(order.A)));
    fields.insert(format!("{prefix}_B"), FieldValue::BigUint(U256::from(order.B)));
}

fn decode_strategy_created(log: &Log) -> IndexerResult<BTreeMap<String, FieldValue>> {
    let event: StrategyCreated = decode_log(log)?;
    let mut fields = BTreeMap::new();
    fields.insert("id".to_string(), FieldValue::BigUint(event.id));
    fields.insert("owner".to_string(), FieldValue::Addr(event.owner));
    fields.insert("token0".to_string(), FieldValue::Addr(event.token0));
    fields.insert("token1".to_string(), FieldValue::Addr(event.token1));
    insert_order(&mut fields, "order0", &event.order0);
    insert_order(&mut fields, "order1", &event.order1);
    Ok(fields)
}

fn decode_strategy_updated(log: &Log) -> IndexerResult<BTreeMap<String, FieldValue>> {
    let event: StrategyUpdated = decode_log(log)?;
    let mut fields = BTreeMap::new();
    fields.insert("id".to_string(), FieldValue::BigUint(event.id));
    fields.insert("token0".to_string(), FieldValue::Addr(event.token0));
    fields.insert("token1".to_string(), FieldValue::Addr(event.token1));
    insert_order(&mut fields, "order0", &event.order0);
    insert_order(&mut fields, "order1", &event.order1);
    fields.insert("reason".to_string(), FieldValue::Uint(u64::from(event.reason)));
    Ok(fields)
}

fn decode_strategy_deleted(log: &Log) -> IndexerResult<BTreeMap<String, FieldValue>> {
    let event: StrategyDeleted = decode_log(log)?;
    let mut fields = BTreeMap::new();
    fields.insert("id".to_string(), FieldValue::BigUint(event.id));
    fields.insert("owner".to_string(), FieldValue::Addr(event.owner));
    fields.insert("token0".to_string(), FieldValue::Addr(event.token0));
    fields.insert("token1".to_string(), FieldValue::Addr(event.token1));
    insert_order(&mut fields, "order0", &event.order0);
    insert_order(&mut fields, "order1", &event.order1);
    Ok(fields)
}

fn decode_tokens_traded(log: &Log) -> IndexerResult<BTreeMap<String, FieldValue>> {
    let event: TokensTraded = decode_log(log)?;
    let mut fields = BTreeMap::new();
    fields.insert("trader".to_string(), FieldValue::Addr(event.trader));
    fields.insert("sourceToken".to_string(), FieldValue::Addr(event.sourceToken));
    fields.insert("targetToken".to_string(), FieldValue::Addr(event.targetToken));
    fields.insert(
        "sourceAmount".to_string(),
        FieldValue::BigUint(event.sourceAmount),
    );
    fields.insert(
        "targetAmount".to_string(),
        FieldValue::BigUint(event.targetAmount),
    );
    fields.insert(
        "tradingFeeAmount".to_string(),
        FieldValue::BigUint(U256::from(event.tradingFeeAmount)),
    );
    fields.insert(
        "byTargetAmount".to_string(),
        FieldValue::Bool(event.byTargetAmount),
    );
    Ok(fields)
}

fn decode_pair_created(log: &Log) -> IndexerResult<BTreeMap<String, FieldValue>> {
    let event: PairCreated = decode_log(log)?;
    let mut fields = BTreeMap::new();
    fields.insert(
        "pairId".to_string(),
        FieldValue::BigUint(U256::from(event.pairId)),
    );
    fields.insert("token0".to_string(), FieldValue::Addr(event.token0));
    fields.insert("token1".to_string(), FieldValue::Addr(event.token1));
    Ok(fields)
}

fn decode_trading_fee_updated(log: &Log) -> IndexerResult<BTreeMap<String, FieldValue>> {
    let event: TradingFeePPMUpdated = decode_log(log)?;
    let mut fields = BTreeMap::new();
    fields.insert(
        "prevFeePPM".to_string(),
        FieldValue::Uint(u64::from(event.prevFeePPM)),
    );
    fields.insert(
        "newFeePPM".to_string(),
        FieldValue::Uint(u64::from(event.newFeePPM)),
    );
    Ok(fields)
}

fn decode_register_code(log: &Log) -> IndexerResult<BTreeMap<String, FieldValue>> {
    let event: RegisterCode = decode_log(log)?;
    let mut fields = BTreeMap::new();
    fields.insert("account".to_string(), FieldValue::Addr(event.account));
    fields.insert("code".to_string(), FieldValue::Str(format!("{:?}", event.code)));
    Ok(fields)
}

fn decode_set_trader_referral_code(log: &Log) -> IndexerResult<BTreeMap<String, FieldValue>> {
    let event: SetTraderReferralCode = decode_log(log)?;
    let mut fields = BTreeMap::new();
    fields.insert("account".to_string(), FieldValue::Addr(event.account));
    fields.insert("code".to_string(), FieldValue::Str(format!("{:?}", event.code)));
    Ok(fields)
}

fn decode_set_referrer_tier(log: &Log) -> IndexerResult<BTreeMap<String, FieldValue>> {
    let event: SetReferrerTier = decode_log(log)?;
    let mut fields = BTreeMap::new();
    fields.insert("referrer".to_string(), FieldValue::Addr(event.referrer));
    fields.insert(
        "tierId".to_string(),
        FieldValue::Uint(u64::try_from(event.tierId).unwrap_or(u64::MAX)),
    );
    Ok(fields)
}

fn decode_set_tier(log: &Log) -> IndexerResult<BTreeMap<String, FieldValue>> {
    let event: SetTier = decode_log(log)?;
    let mut fields = BTreeMap::new();
    fields.insert(
        "tierId".to_string(),
        FieldValue::Uint(u64::try_from(event.tierId).unwrap_or(u64::MAX)),
    );
    fields.insert(
        "totalRebate".to_string(),
        FieldValue::BigUint(event.totalRebate),
    );
    fields.insert(
        "discountShare".to_string(),
        FieldValue::BigUint(event.discountShare),
    );
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_signatures_are_distinct() {
        let hashes = [
            STRATEGY_CREATED.signature_hash,
            STRATEGY_UPDATED.signature_hash,
            STRATEGY_DELETED.signature_hash,
            TOKENS_TRADED.signature_hash,
            PAIR_CREATED.signature_hash,
            TRADING_FEE_UPDATED.signature_hash,
            REGISTER_CODE.signature_hash,
            SET_TRADER_REFERRAL_CODE.signature_hash,
            SET_REFERRER_TIER.signature_hash,
            SET_TIER.signature_hash,
        ];

        for (i, a) in hashes.iter().enumerate() {
            assert_eq!(a.len(), 32);
            for b in hashes.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_filter_creation() {
        let filter = create_event_filter(
            Address::ZERO,
            STRATEGY_CREATED.signature_hash,
            1_000,
            2_000,
        );
        let _ = filter;
    }

    #[test]
    fn test_chronological_sort_canonical_order() {
        fn raw(block: u64, tx: u64, log: u64) -> RawEvent {
            RawEvent {
                block_number: block,
                transaction_index: tx,
                transaction_hash: format!("0x{block:02x}{tx:02x}{log:02x}"),
                log_index: log,
                fields: BTreeMap::new(),
            }
        }

        // Same-block events shuffled three different ways must sort identically.
        let canonical = vec![raw(5, 0, 1), raw(5, 0, 2), raw(5, 1, 0), raw(5, 2, 7)];

        let shuffles: Vec<Vec<RawEvent>> = vec![
            vec![raw(5, 2, 7), raw(5, 0, 2), raw(5, 1, 0), raw(5, 0, 1)],
            vec![raw(5, 1, 0), raw(5, 0, 1), raw(5, 2, 7), raw(5, 0, 2)],
            vec![raw(5, 0, 2), raw(5, 2, 7), raw(5, 0, 1), raw(5, 1, 0)],
        ];

        for mut shuffled in shuffles {
            sort_chronologically(&mut shuffled);
            assert_eq!(shuffled, canonical);
        }
    }

    fn wrap_log(data: LogData, block: u64, tx_index: u64, log_index: u64) -> Log {
        Log {
            inner: alloy::primitives::Log {
                address: Address::ZERO,
                data,
            },
            block_hash: None,
            block_number: Some(block),
            block_timestamp: None,
            transaction_hash: None,
            transaction_index: Some(tx_index),
            log_index: Some(log_index),
            removed: false,
        }
    }

    #[test]
    fn test_tokens_traded_decoder_round_trip() {
        let event = TokensTraded {
            trader: Address::repeat_byte(0x01),
            sourceToken: Address::repeat_byte(0x02),
            targetToken: Address::repeat_byte(0x03),
            sourceAmount: U256::from(1_000u64),
            targetAmount: U256::from(500u64),
            tradingFeeAmount: 10,
            byTargetAmount: true,
        };

        let log = wrap_log(event.encode_log_data(), 19_000_000, 3, 7);
        let fields = (TOKENS_TRADED.decode)(&log).unwrap();

        assert_eq!(
            fields.get("trader"),
            Some(&FieldValue::Addr(Address::repeat_byte(0x01)))
        );
        assert_eq!(
            fields.get("sourceAmount"),
            Some(&FieldValue::BigUint(U256::from(1_000u64)))
        );
        assert_eq!(
            fields.get("tradingFeeAmount"),
            Some(&FieldValue::BigUint(U256::from(10u64)))
        );
        assert_eq!(fields.get("byTargetAmount"), Some(&FieldValue::Bool(true)));
    }

    #[test]
    fn test_register_code_decoder_round_trip() {
        let code = alloy::primitives::B256::repeat_byte(0xBE);
        let event = RegisterCode {
            account: Address::repeat_byte(0x0A),
            code,
        };

        let log = wrap_log(event.encode_log_data(), 100, 0, 0);
        let fields = (REGISTER_CODE.decode)(&log).unwrap();

        assert_eq!(
            fields.get("account"),
            Some(&FieldValue::Addr(Address::repeat_byte(0x0A)))
        );
        assert_eq!(
            fields.get("code"),
            Some(&FieldValue::Str(format!("{code:?}")))
        );
    }

    #[test]
    fn test_strategy_created_decoder_flattens_orders() {
        let event = StrategyCreated {
            id: U256::from(42u64),
            owner: Address::repeat_byte(0x0A),
            token0: Address::repeat_byte(0x01),
            token1: Address::repeat_byte(0x02),
            order0: Order {
                y: 100,
                z: 200,
                A: 3,
                B: 4,
            },
            order1: Order {
                y: 500,
                z: 600,
                A: 7,
                B: 8,
            },
        };

        let log = wrap_log(event.encode_log_data(), 100, 0, 0);
        let fields = (STRATEGY_CREATED.decode)(&log).unwrap();

        assert_eq!(
            fields.get("order0_y"),
            Some(&FieldValue::BigUint(U256::from(100u64)))
        );
        assert_eq!(
            fields.get("order1_B"),
            Some(&FieldValue::BigUint(U256::from(8u64)))
        );
        assert_eq!(fields.get("id"), Some(&FieldValue::BigUint(U256::from(42u64))));
    }

    #[test]
    fn test_field_value_accessors() {
        assert_eq!(FieldValue::Uint(7).as_uint(), Some(7));
        assert_eq!(FieldValue::Bool(true).as_bool(), Some(true));
        assert_eq!(
            FieldValue::BigUint(U256::from(42u64)).as_biguint(),
            Some(U256::from(42u64))
        );
        assert_eq!(FieldValue::Str("abc".to_string()).as_str(), Some("abc"));
        assert!(FieldValue::Uint(7).as_bool().is_none());
    }
}
