//! Codec for the protocol's packed order encoding.
//!
//! On-chain orders store four integers `{y, z, A, B}`. `y` and `z` are plain
//! token amounts (liquidity and capacity). `A` and `B` are *packed floats*: a
//! 48-bit mantissa and an exponent packed into one integer, giving the
//! protocol a wide dynamic range of prices in a fixed-width word.
//!
//! # Packed float decoding
//!
//! For a packed value `V`:
//!
//! ```text
//! real(V) = (V mod 2^48) * 2^floor(V / 2^48)
//! ```
//!
//! # Rates
//!
//! With `one = 2^48`:
//!
//! ```text
//! lowest   = (B / one)^2
//! highest  = ((B + A) / one)^2
//! marginal = ((B + A * y / z) / one)^2     (B + A when y == z)
//! ```
//!
//! The marginal rate linearly interpolates between lowest and highest in
//! proportion to how much of the order's capacity still has liquidity.
//! Results are scaled by `10^(decimals_other - decimals_self)` to express a
//! rate in opposite-token terms; the sell side reports reciprocals because
//! the two sides of an order face opposite directions. A rate that computes
//! to exactly zero stays zero instead of being inverted.
//!
//! All functions here are pure and deterministic.
//!
//! # Example
//!
//! ```
//! use alloy::primitives::U256;
//! use dex_event_indexer::codec::decode_float;
//! use rust_decimal::Decimal;
//!
//! // mantissa 3, exponent 2 -> 3 * 2^2 = 12
//! let packed = U256::from(3u64) + (U256::from(2u64) << 48);
//! assert_eq!(decode_float(packed).unwrap(), Decimal::from(12));
//! ```

use alloy::primitives::U256;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

use crate::error::{IndexerError, IndexerResult};

/// Number of mantissa bits in a packed float.
const MANTISSA_BITS: u32 = 48;

/// An order as read from chain events, before decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodedOrder {
    /// Current liquidity (token amount)
    pub y: U256,
    /// Capacity (token amount); `y <= z` for a well-formed order
    pub z: U256,
    /// Packed float controlling the price range width
    pub a: U256,
    /// Packed float anchoring the lowest price
    pub b: U256,
}

/// Which side of a strategy an order represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSide {
    /// Buy side: rates are reported as computed.
    Buy,
    /// Sell side: rates are reported as reciprocals of the computed values.
    Sell,
}

/// A decoded order with human-meaningful values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedOrder {
    /// Liquidity normalized by the order token's decimals
    pub liquidity: Decimal,
    /// Lowest price of the order's range
    pub lowest_rate: Decimal,
    /// Highest price of the order's range
    pub highest_rate: Decimal,
    /// Price at the boundary between filled and remaining capacity
    pub marginal_rate: Decimal,
}

/// Aggregate amounts of one trade, used for fee attribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeAmounts {
    /// Total source-token amount moved by the trade
    pub source_amount: Decimal,
    /// Total target-token amount moved by the trade
    pub target_amount: Decimal,
    /// Fee charged for the trade
    pub trading_fee: Decimal,
    /// When set, the trade was quoted by target amount and the fee is
    /// charged in the source token; otherwise the fee is charged in the
    /// target token
    pub by_target_amount: bool,
}

/// Convert a `U256` amount into a `Decimal`.
///
/// # Errors
///
/// Returns a math error when the value exceeds the decimal range.
pub fn u256_to_decimal(value: U256) -> IndexerResult<Decimal> {
    let as_u128 = u128::try_from(value).map_err(|e| {
        IndexerError::math(
            format!("value {value} exceeds 128 bits"),
            Some(Box::new(e)),
        )
    })?;
    Decimal::from_u128(as_u128)
        .ok_or_else(|| IndexerError::math(format!("value {value} exceeds decimal range"), None))
}

/// `2^exponent` as a `Decimal`, with overflow checking.
fn pow2(exponent: u32) -> IndexerResult<Decimal> {
    let two = Decimal::from(2);
    let mut result = Decimal::ONE;
    for _ in 0..exponent {
        result = result.checked_mul(two).ok_or_else(|| {
            IndexerError::math(format!("2^{exponent} exceeds decimal range"), None)
        })?;
    }
    Ok(result)
}

/// `10^exponent` as a `Decimal` for a signed exponent.
fn pow10(exponent: i32) -> IndexerResult<Decimal> {
    if exponent >= 0 {
        let ten = Decimal::from(10);
        let mut result = Decimal::ONE;
        for _ in 0..exponent {
            result = result.checked_mul(ten).ok_or_else(|| {
                IndexerError::math(format!("10^{exponent} exceeds decimal range"), None)
            })?;
        }
        Ok(result)
    } else {
        let scale = u32::try_from(-exponent).map_err(|e| {
            IndexerError::math(format!("invalid exponent {exponent}"), Some(Box::new(e)))
        })?;
        if scale > 28 {
            return Err(IndexerError::math(
                format!("10^{exponent} below decimal resolution"),
                None,
            ));
        }
        Ok(Decimal::new(1, scale))
    }
}

/// Decode a packed float: `(V mod 2^48) * 2^floor(V / 2^48)`.
///
/// The result is exact for any value that fits a `Decimal`; a mantissa with
/// an exponent large enough to overflow 28 significant digits errors rather
/// than truncating.
///
/// # Errors
///
/// Returns a math error when the expanded value exceeds the decimal range.
///
/// # Example
///
/// ```
/// use alloy::primitives::U256;
/// use dex_event_indexer::codec::decode_float;
/// use rust_decimal::Decimal;
///
/// assert_eq!(decode_float(U256::from(12u64)).unwrap(), Decimal::from(12));
/// ```
pub fn decode_float(value: U256) -> IndexerResult<Decimal> {
    let mantissa_mask = (U256::from(1u64) << MANTISSA_BITS) - U256::from(1u64);
    let mantissa = (value & mantissa_mask).to::<u64>();
    let exponent_word = value >> MANTISSA_BITS;

    let exponent = u32::try_from(exponent_word).map_err(|e| {
        IndexerError::math(
            format!("packed exponent {exponent_word} out of range"),
            Some(Box::new(e)),
        )
    })?;

    Decimal::from(mantissa)
        .checked_mul(pow2(exponent)?)
        .ok_or_else(|| {
            IndexerError::math(
                format!("packed value {mantissa} * 2^{exponent} exceeds decimal range"),
                None,
            )
        })
}

/// Square a rate, returning zero untouched.
fn squared(value: Decimal) -> IndexerResult<Decimal> {
    value
        .checked_mul(value)
        .ok_or_else(|| IndexerError::math("rate square exceeds decimal range", None))
}

/// Report a rate for the requested side: raw for buy, reciprocal for sell.
///
/// A rate of exactly zero yields `0` rather than a division by zero.
fn oriented(rate: Decimal, side: OrderSide) -> Decimal {
    match side {
        OrderSide::Buy => rate,
        OrderSide::Sell => {
            if rate.is_zero() {
                Decimal::ZERO
            } else {
                Decimal::ONE / rate
            }
        }
    }
}

/// Decode an order into normalized liquidity and its three rates.
///
/// `own_decimals` are the decimals of the token the order holds (`y`/`z`
/// units); `other_decimals` are the opposite token's decimals, used for
/// cross-token scaling.
///
/// # Errors
///
/// Returns a math error when any intermediate value exceeds the decimal
/// range.
///
/// # Example
///
/// ```
/// use alloy::primitives::U256;
/// use dex_event_indexer::codec::{decode_order, EncodedOrder, OrderSide};
///
/// let order = EncodedOrder {
///     y: U256::from(500_000u64),
///     z: U256::from(1_000_000u64),
///     a: U256::ZERO,
///     b: U256::ZERO,
/// };
/// let decoded = decode_order(&order, 6, 6, OrderSide::Buy).unwrap();
/// assert_eq!(decoded.liquidity.to_string(), "0.5");
/// ```
pub fn decode_order(
    order: &EncodedOrder,
    own_decimals: u32,
    other_decimals: u32,
    side: OrderSide,
) -> IndexerResult<DecodedOrder> {
    let one = pow2(MANTISSA_BITS)?;

    let own_scale = pow10(i32::try_from(own_decimals).unwrap_or(i32::MAX))?;
    let liquidity = u256_to_decimal(order.y)? / own_scale;
    let capacity = u256_to_decimal(order.z)? / own_scale;

    let a_real = decode_float(order.a)?;
    let b_real = decode_float(order.b)?;

    let lowest_base = b_real / one;
    let highest_base = (b_real + a_real) / one;

    // Fully-used orders (and empty-capacity ones) sit at the top of their
    // range; partially-used orders interpolate by the remaining fraction.
    let marginal_base = if order.y == order.z || order.z.is_zero() {
        highest_base
    } else {
        (b_real + a_real * liquidity / capacity) / one
    };

    let other_diff = i32::try_from(other_decimals).unwrap_or(i32::MAX)
        - i32::try_from(own_decimals).unwrap_or(0);
    let scaling = pow10(other_diff)?;

    let lowest_rate = oriented(squared(lowest_base)?.checked_mul(scaling).ok_or_else(
        || IndexerError::math("lowest rate exceeds decimal range", None),
    )?, side);
    let highest_rate = oriented(squared(highest_base)?.checked_mul(scaling).ok_or_else(
        || IndexerError::math("highest rate exceeds decimal range", None),
    )?, side);
    let marginal_rate = oriented(squared(marginal_base)?.checked_mul(scaling).ok_or_else(
        || IndexerError::math("marginal rate exceeds decimal range", None),
    )?, side);

    Ok(DecodedOrder {
        liquidity,
        lowest_rate,
        highest_rate,
        marginal_rate,
    })
}

/// A strategy's proportional share of a multi-strategy trade's fee.
///
/// The share is `trading_fee * |strategy_delta| / divisor` where the divisor
/// is the trade total in the fee token: the fee-inclusive source amount when
/// the trade was quoted by target amount, the fee-exclusive target amount
/// otherwise. A zero divisor yields a zero share.
///
/// # Errors
///
/// Returns a math error when the product exceeds the decimal range.
pub fn attribute_fee(trade: &TradeAmounts, strategy_delta: Decimal) -> IndexerResult<Decimal> {
    let divisor = if trade.by_target_amount {
        trade.source_amount
    } else {
        trade.target_amount
    };

    if divisor.is_zero() {
        return Ok(Decimal::ZERO);
    }

    trade
        .trading_fee
        .checked_mul(strategy_delta.abs() / divisor.abs())
        .ok_or_else(|| IndexerError::math("fee share exceeds decimal range", None))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packed(mantissa: u64, exponent: u64) -> U256 {
        U256::from(mantissa) + (U256::from(exponent) << 48)
    }

    #[test]
    fn test_decode_float_exact_at_boundaries() {
        let max_mantissa = (1u64 << 48) - 1;

        for exponent in [0u64, 1, 10, 40] {
            for mantissa in [0u64, max_mantissa] {
                let decoded = decode_float(packed(mantissa, exponent)).unwrap();

                let mut expected = Decimal::from(mantissa);
                for _ in 0..exponent {
                    expected *= Decimal::from(2);
                }
                assert_eq!(
                    decoded, expected,
                    "mantissa {mantissa} exponent {exponent}"
                );
            }
        }
    }

    #[test]
    fn test_decode_float_plain_integer() {
        // Exponent zero: the packed value IS the mantissa.
        assert_eq!(decode_float(U256::from(1u64)).unwrap(), Decimal::ONE);
        assert_eq!(decode_float(U256::ZERO).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn test_decode_float_overflow_errors() {
        // An exponent of 2^20 cannot be expanded into a Decimal.
        let result = decode_float(packed(1, 1 << 20));
        assert!(result.is_err());
    }

    fn simple_order(y: u64, z: u64, a: U256, b: U256) -> EncodedOrder {
        EncodedOrder {
            y: U256::from(y),
            z: U256::from(z),
            a,
            b,
        }
    }

    #[test]
    fn test_marginal_equals_highest_when_full() {
        let order = simple_order(1_000, 1_000, packed(1 << 24, 0), packed(1 << 24, 0));
        let decoded = decode_order(&order, 18, 18, OrderSide::Buy).unwrap();

        assert_eq!(decoded.marginal_rate, decoded.highest_rate);
        assert!(decoded.highest_rate > decoded.lowest_rate);
    }

    #[test]
    fn test_marginal_equals_lowest_when_empty() {
        let order = simple_order(0, 1_000, packed(1 << 24, 0), packed(1 << 24, 0));
        let decoded = decode_order(&order, 18, 18, OrderSide::Buy).unwrap();

        assert_eq!(decoded.marginal_rate, decoded.lowest_rate);
    }

    #[test]
    fn test_marginal_between_bounds_when_partial() {
        let order = simple_order(400, 1_000, packed(1 << 24, 0), packed(1 << 24, 0));
        let decoded = decode_order(&order, 18, 18, OrderSide::Buy).unwrap();

        assert!(decoded.marginal_rate > decoded.lowest_rate);
        assert!(decoded.marginal_rate < decoded.highest_rate);
    }

    #[test]
    fn test_zero_rate_not_inverted_on_sell_side() {
        let order = simple_order(0, 0, U256::ZERO, U256::ZERO);
        let decoded = decode_order(&order, 18, 18, OrderSide::Sell).unwrap();

        assert_eq!(decoded.lowest_rate, Decimal::ZERO);
        assert_eq!(decoded.highest_rate, Decimal::ZERO);
        assert_eq!(decoded.marginal_rate, Decimal::ZERO);
    }

    #[test]
    fn test_sell_side_is_reciprocal_of_buy_side() {
        let order = simple_order(1_000, 1_000, packed(1 << 20, 0), packed(1 << 30, 0));
        let buy = decode_order(&order, 18, 18, OrderSide::Buy).unwrap();
        let sell = decode_order(&order, 18, 18, OrderSide::Sell).unwrap();

        let product = buy.highest_rate * sell.highest_rate;
        assert!((product - Decimal::ONE).abs() < Decimal::new(1, 12));
    }

    #[test]
    fn test_liquidity_normalized_by_decimals() {
        let order = simple_order(1_500_000, 3_000_000, U256::ZERO, U256::ZERO);
        let decoded = decode_order(&order, 6, 6, OrderSide::Buy).unwrap();

        assert_eq!(decoded.liquidity.to_string(), "1.5");
    }

    #[test]
    fn test_cross_token_scaling() {
        // b decodes to 2^48 -> b/one = 1 -> raw rate 1; scaled by 10^(6-18).
        let order = simple_order(1, 1, U256::ZERO, packed(1 << 40, 8));
        let decoded = decode_order(&order, 18, 6, OrderSide::Buy).unwrap();

        assert_eq!(decoded.lowest_rate, Decimal::new(1, 12));
    }

    #[test]
    fn test_attribute_fee_by_target_amount() {
        // Fee rides the source token: divisor is the fee-inclusive source total.
        let trade = TradeAmounts {
            source_amount: Decimal::from(1_000),
            target_amount: Decimal::from(500),
            trading_fee: Decimal::from(10),
            by_target_amount: true,
        };

        let share = attribute_fee(&trade, Decimal::from(250)).unwrap();
        assert_eq!(share, Decimal::new(25, 1)); // 10 * 250/1000 = 2.5
    }

    #[test]
    fn test_attribute_fee_by_source_amount() {
        // Fee rides the target token: divisor is the fee-exclusive target total.
        let trade = TradeAmounts {
            source_amount: Decimal::from(1_000),
            target_amount: Decimal::from(500),
            trading_fee: Decimal::from(10),
            by_target_amount: false,
        };

        let share = attribute_fee(&trade, Decimal::from(250)).unwrap();
        assert_eq!(share, Decimal::from(5)); // 10 * 250/500
    }

    #[test]
    fn test_attribute_fee_zero_divisor() {
        let trade = TradeAmounts {
            source_amount: Decimal::ZERO,
            target_amount: Decimal::ZERO,
            trading_fee: Decimal::from(10),
            by_target_amount: true,
        };

        assert_eq!(
            attribute_fee(&trade, Decimal::from(250)).unwrap(),
            Decimal::ZERO
        );
    }

    #[test]
    fn test_u256_to_decimal_overflow() {
        assert!(u256_to_decimal(U256::MAX).is_err());
    }
}
