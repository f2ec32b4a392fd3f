//! Field mapping pipeline: raw event fields to persisted row fields.
//!
//! Each stream declares an ordered list of [`MappingRule`]s (typed copies,
//! constant injection, token/pair relation lookups) followed by optional
//! [`TransformStage`]s. Stages are pure functions over the accumulating row
//! map; they run in declared order and receive the raw event plus a typed
//! [`MapContext`] carrying the deployment's dictionaries and the stride's
//! resolved block timestamps.
//!
//! A relation lookup that misses its dictionary raises
//! [`IndexerError::MissingReference`]; the harvester logs and skips that row
//! instead of aborting the batch.

use std::collections::{BTreeMap, HashMap};

use alloy::primitives::Address;

use crate::error::{IndexerError, IndexerResult};
use crate::events::{FieldValue, RawEvent};

/// A token known to the deployment, keyed by contract address.
#[derive(Debug, Clone)]
pub struct TokenRef {
    /// Internal token id used in persisted rows
    pub id: u64,
    /// Ticker symbol
    pub symbol: String,
    /// Decimal places
    pub decimals: u8,
}

/// In-memory dictionaries resolved once per deployment and shared by all
/// streams.
#[derive(Debug, Clone, Default)]
pub struct Dictionaries {
    /// Known tokens by address
    pub tokens: HashMap<Address, TokenRef>,
    /// Known pairs by normalized (lower address first) token address pair
    pub pairs: HashMap<(Address, Address), u64>,
}

impl Dictionaries {
    /// Look up a pair id regardless of token order.
    #[must_use]
    pub fn pair_id(&self, token0: Address, token1: Address) -> Option<u64> {
        let key = if token0 <= token1 {
            (token0, token1)
        } else {
            (token1, token0)
        };
        self.pairs.get(&key).copied()
    }
}

/// Context available to mapping rules and transform stages.
pub struct MapContext<'a> {
    /// Token/pair dictionaries for relation lookups
    pub dictionaries: &'a Dictionaries,
    /// Block timestamps resolved for the current stride
    pub block_timestamps: &'a HashMap<u64, i64>,
}

/// A custom transform stage: `(row, raw event, context) -> row`.
///
/// Stages are plain function pointers so stream specifications stay `Send +
/// Sync` without boxing.
pub type TransformStage = fn(
    BTreeMap<String, FieldValue>,
    &RawEvent,
    &MapContext<'_>,
) -> IndexerResult<BTreeMap<String, FieldValue>>;

/// A declarative mapping rule applied before any transform stage.
#[derive(Debug, Clone)]
pub enum MappingRule {
    /// Copy a string field verbatim.
    CopyString {
        /// Source and destination field name
        field: &'static str,
    },
    /// Copy a small unsigned integer field.
    CopyUint {
        /// Source and destination field name
        field: &'static str,
    },
    /// Copy a 256-bit integer field.
    CopyBigUint {
        /// Source and destination field name
        field: &'static str,
    },
    /// Copy a boolean field.
    CopyBool {
        /// Source and destination field name
        field: &'static str,
    },
    /// Copy an address field.
    CopyAddress {
        /// Source and destination field name
        field: &'static str,
    },
    /// Inject a constant value under a column name.
    Constant {
        /// Destination column
        column: &'static str,
        /// Value to inject
        value: FieldValue,
    },
    /// Resolve an address field against the token dictionary and store the
    /// token id.
    TokenRelation {
        /// Source address field
        field: &'static str,
        /// Destination column for the token id
        column: &'static str,
    },
    /// Resolve two address fields against the pair dictionary and store the
    /// pair id.
    PairRelation {
        /// First token address field
        token0_field: &'static str,
        /// Second token address field
        token1_field: &'static str,
        /// Destination column for the pair id
        column: &'static str,
    },
}

fn get_field<'a>(raw: &'a RawEvent, field: &str) -> IndexerResult<&'a FieldValue> {
    raw.fields.get(field).ok_or_else(|| {
        IndexerError::decoding(
            format!(
                "event at block {} missing field '{field}'",
                raw.block_number
            ),
            None,
        )
    })
}

fn get_address(raw: &RawEvent, field: &str) -> IndexerResult<Address> {
    get_field(raw, field)?.as_address().ok_or_else(|| {
        IndexerError::decoding(
            format!(
                "field '{field}' at block {} is not an address",
                raw.block_number
            ),
            None,
        )
    })
}

/// Apply one rule to the accumulating row.
fn apply_rule(
    row: &mut BTreeMap<String, FieldValue>,
    rule: &MappingRule,
    raw: &RawEvent,
    ctx: &MapContext<'_>,
) -> IndexerResult<()> {
    match rule {
        MappingRule::CopyString { field }
        | MappingRule::CopyUint { field }
        | MappingRule::CopyBigUint { field }
        | MappingRule::CopyBool { field }
        | MappingRule::CopyAddress { field } => {
            let value = get_field(raw, field)?;
            let type_ok = match rule {
                MappingRule::CopyString { .. } => matches!(value, FieldValue::Str(_)),
                MappingRule::CopyUint { .. } => matches!(value, FieldValue::Uint(_)),
                MappingRule::CopyBigUint { .. } => matches!(value, FieldValue::BigUint(_)),
                MappingRule::CopyBool { .. } => matches!(value, FieldValue::Bool(_)),
                MappingRule::CopyAddress { .. } => matches!(value, FieldValue::Addr(_)),
                _ => false,
            };
            if !type_ok {
                return Err(IndexerError::decoding(
                    format!(
                        "field '{field}' at block {} has unexpected type",
                        raw.block_number
                    ),
                    None,
                ));
            }
            row.insert((*field).to_string(), value.clone());
        }
        MappingRule::Constant { column, value } => {
            row.insert((*column).to_string(), value.clone());
        }
        MappingRule::TokenRelation { field, column } => {
            let address = get_address(raw, field)?;
            let token = ctx.dictionaries.tokens.get(&address).ok_or_else(|| {
                IndexerError::missing_reference(format!(
                    "unknown token {address} in field '{field}' at block {}",
                    raw.block_number
                ))
            })?;
            row.insert((*column).to_string(), FieldValue::Uint(token.id));
        }
        MappingRule::PairRelation {
            token0_field,
            token1_field,
            column,
        } => {
            let token0 = get_address(raw, token0_field)?;
            let token1 = get_address(raw, token1_field)?;
            let pair_id = ctx.dictionaries.pair_id(token0, token1).ok_or_else(|| {
                IndexerError::missing_reference(format!(
                    "unknown pair ({token0}, {token1}) at block {}",
                    raw.block_number
                ))
            })?;
            row.insert((*column).to_string(), FieldValue::Uint(pair_id));
        }
    }

    Ok(())
}

/// Map one raw event into its persisted field set.
///
/// Rules run first, in declared order, then transform stages, in declared
/// order, each receiving and returning the accumulating row.
///
/// # Errors
///
/// Returns [`IndexerError::MissingReference`] for dictionary misses (the
/// caller skips the row) and a decoding error for absent or mistyped fields
/// (fatal for the stream).
pub fn map_event(
    raw: &RawEvent,
    rules: &[MappingRule],
    transforms: &[TransformStage],
    ctx: &MapContext<'_>,
) -> IndexerResult<BTreeMap<String, FieldValue>> {
    let mut row = BTreeMap::new();

    for rule in rules {
        apply_rule(&mut row, rule, raw, ctx)?;
    }

    for transform in transforms {
        row = transform(row, raw, ctx)?;
    }

    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::U256;

    fn raw_with(fields: Vec<(&str, FieldValue)>) -> RawEvent {
        RawEvent {
            block_number: 100,
            transaction_index: 0,
            transaction_hash: "0xabc".to_string(),
            log_index: 0,
            fields: fields
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        }
    }

    fn token_dictionaries() -> Dictionaries {
        let mut dictionaries = Dictionaries::default();
        dictionaries.tokens.insert(
            Address::repeat_byte(0x11),
            TokenRef {
                id: 7,
                symbol: "AAA".to_string(),
                decimals: 18,
            },
        );
        dictionaries.tokens.insert(
            Address::repeat_byte(0x22),
            TokenRef {
                id: 8,
                symbol: "BBB".to_string(),
                decimals: 6,
            },
        );
        dictionaries.pairs.insert(
            (Address::repeat_byte(0x11), Address::repeat_byte(0x22)),
            42,
        );
        dictionaries
    }

    #[test]
    fn test_copy_rules_and_constant() {
        let raw = raw_with(vec![
            ("amount", FieldValue::BigUint(U256::from(5u64))),
            ("flag", FieldValue::Bool(true)),
        ]);
        let dictionaries = Dictionaries::default();
        let timestamps = HashMap::new();
        let ctx = MapContext {
            dictionaries: &dictionaries,
            block_timestamps: &timestamps,
        };

        let rules = vec![
            MappingRule::CopyBigUint { field: "amount" },
            MappingRule::CopyBool { field: "flag" },
            MappingRule::Constant {
                column: "exchange",
                value: FieldValue::Str("testdex".to_string()),
            },
        ];

        let row = map_event(&raw, &rules, &[], &ctx).unwrap();
        assert_eq!(row.get("amount"), Some(&FieldValue::BigUint(U256::from(5u64))));
        assert_eq!(row.get("flag"), Some(&FieldValue::Bool(true)));
        assert_eq!(
            row.get("exchange"),
            Some(&FieldValue::Str("testdex".to_string()))
        );
    }

    #[test]
    fn test_copy_rule_type_mismatch_is_fatal() {
        let raw = raw_with(vec![("amount", FieldValue::Bool(true))]);
        let dictionaries = Dictionaries::default();
        let timestamps = HashMap::new();
        let ctx = MapContext {
            dictionaries: &dictionaries,
            block_timestamps: &timestamps,
        };

        let rules = vec![MappingRule::CopyBigUint { field: "amount" }];
        let result = map_event(&raw, &rules, &[], &ctx);
        assert!(matches!(result, Err(IndexerError::DecodingError { .. })));
    }

    #[test]
    fn test_token_relation_resolves_id() {
        let raw = raw_with(vec![(
            "sourceToken",
            FieldValue::Addr(Address::repeat_byte(0x11)),
        )]);
        let dictionaries = token_dictionaries();
        let timestamps = HashMap::new();
        let ctx = MapContext {
            dictionaries: &dictionaries,
            block_timestamps: &timestamps,
        };

        let rules = vec![MappingRule::TokenRelation {
            field: "sourceToken",
            column: "source_token_id",
        }];

        let row = map_event(&raw, &rules, &[], &ctx).unwrap();
        assert_eq!(row.get("source_token_id"), Some(&FieldValue::Uint(7)));
    }

    #[test]
    fn test_unknown_token_is_missing_reference() {
        let raw = raw_with(vec![(
            "sourceToken",
            FieldValue::Addr(Address::repeat_byte(0x99)),
        )]);
        let dictionaries = token_dictionaries();
        let timestamps = HashMap::new();
        let ctx = MapContext {
            dictionaries: &dictionaries,
            block_timestamps: &timestamps,
        };

        let rules = vec![MappingRule::TokenRelation {
            field: "sourceToken",
            column: "source_token_id",
        }];

        let result = map_event(&raw, &rules, &[], &ctx);
        assert!(matches!(result, Err(IndexerError::MissingReference { .. })));
    }

    #[test]
    fn test_pair_relation_is_order_insensitive() {
        let dictionaries = token_dictionaries();
        let timestamps = HashMap::new();
        let ctx = MapContext {
            dictionaries: &dictionaries,
            block_timestamps: &timestamps,
        };

        let rules = vec![MappingRule::PairRelation {
            token0_field: "token0",
            token1_field: "token1",
            column: "pair_id",
        }];

        // Reversed token order must resolve to the same pair.
        let reversed = raw_with(vec![
            ("token0", FieldValue::Addr(Address::repeat_byte(0x22))),
            ("token1", FieldValue::Addr(Address::repeat_byte(0x11))),
        ]);
        let row = map_event(&reversed, &rules, &[], &ctx).unwrap();
        assert_eq!(row.get("pair_id"), Some(&FieldValue::Uint(42)));
    }

    #[test]
    fn test_transform_stages_run_in_declared_order() {
        let raw = raw_with(vec![("amount", FieldValue::Uint(1))]);
        let dictionaries = Dictionaries::default();
        let timestamps = HashMap::new();
        let ctx = MapContext {
            dictionaries: &dictionaries,
            block_timestamps: &timestamps,
        };

        fn double(
            mut row: BTreeMap<String, FieldValue>,
            _raw: &RawEvent,
            _ctx: &MapContext<'_>,
        ) -> IndexerResult<BTreeMap<String, FieldValue>> {
            let value = row.get("amount").and_then(FieldValue::as_uint).unwrap_or(0);
            row.insert("amount".to_string(), FieldValue::Uint(value * 2));
            Ok(row)
        }

        fn add_one(
            mut row: BTreeMap<String, FieldValue>,
            _raw: &RawEvent,
            _ctx: &MapContext<'_>,
        ) -> IndexerResult<BTreeMap<String, FieldValue>> {
            let value = row.get("amount").and_then(FieldValue::as_uint).unwrap_or(0);
            row.insert("amount".to_string(), FieldValue::Uint(value + 1));
            Ok(row)
        }

        let rules = vec![MappingRule::CopyUint { field: "amount" }];

        // (1 * 2) + 1 = 3 with double first; (1 + 1) * 2 = 4 with add first.
        let row = map_event(&raw, &rules, &[double, add_one], &ctx).unwrap();
        assert_eq!(row.get("amount"), Some(&FieldValue::Uint(3)));

        let row = map_event(&raw, &rules, &[add_one, double], &ctx).unwrap();
        assert_eq!(row.get("amount"), Some(&FieldValue::Uint(4)));
    }
}
