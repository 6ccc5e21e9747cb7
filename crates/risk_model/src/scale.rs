//! Fixed-point scaling between decimal bases
//!
//! Token amounts, feed answers and USD values each carry their own decimal base
//! (6 for USDC, 8 for most feeds, 18 for WETH and for USD values). Every conversion
//! in the workspace goes through this module and names both the source and the target
//! decimals. USD values and protocol factors are carried as [`Wad`] (18 decimals).

use alloy_primitives::U256;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Decimal count of a [`Wad`]
pub const WAD_DECIMALS: u8 = 18;

/// Largest decimal count [`pow10`] accepts (10^76 < 2^256)
pub const MAX_DECIMALS: u8 = 76;

const WAD_RAW: U256 = U256::from_limbs([1_000_000_000_000_000_000, 0, 0, 0]);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScaleError {
    #[error("fixed-point overflow in {0}")]
    Overflow(&'static str),

    #[error("division by zero in {0}")]
    DivisionByZero(&'static str),

    #[error("unsupported decimal count {0}")]
    Decimals(u8),

    #[error("invalid decimal literal {0:?}")]
    Parse(String),

    #[error("value {0} does not fit the target integer type")]
    Truncation(String),
}

/// 10^decimals
pub fn pow10(decimals: u8) -> Result<U256, ScaleError> {
    if decimals > MAX_DECIMALS {
        return Err(ScaleError::Decimals(decimals));
    }

    let ten = U256::from(10u64);
    let mut out = U256::from(1u64);
    for _ in 0..decimals {
        out = out.checked_mul(ten).ok_or(ScaleError::Overflow("pow10"))?;
    }
    Ok(out)
}

/// `a * b / denominator`, truncating
pub fn mul_div(a: U256, b: U256, denominator: U256) -> Result<U256, ScaleError> {
    if denominator.is_zero() {
        return Err(ScaleError::DivisionByZero("mul_div"));
    }
    let product = a.checked_mul(b).ok_or(ScaleError::Overflow("mul_div"))?;
    Ok(product / denominator)
}

/// Convert `amount` from `from` decimals to `to` decimals. Narrowing truncates.
pub fn rescale(amount: U256, from: u8, to: u8) -> Result<U256, ScaleError> {
    match from.cmp(&to) {
        Ordering::Equal => Ok(amount),
        Ordering::Less => amount
            .checked_mul(pow10(to - from)?)
            .ok_or(ScaleError::Overflow("rescale")),
        Ordering::Greater => Ok(amount / pow10(from - to)?),
    }
}

fn combined_decimals(token_decimals: u8, feed_decimals: u8) -> Result<u8, ScaleError> {
    token_decimals
        .checked_add(feed_decimals)
        .ok_or(ScaleError::Decimals(u8::MAX))
}

/// 18-decimal fixed-point number (1.0 == 1e18)
///
/// Serialized as a plain decimal string ("0.98"), which keeps configuration
/// files and JSON reports readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Wad(U256);

impl Wad {
    pub const ZERO: Wad = Wad(U256::ZERO);
    pub const ONE: Wad = Wad(WAD_RAW);

    pub const fn from_raw(raw: U256) -> Self {
        Wad(raw)
    }

    pub const fn raw(self) -> U256 {
        self.0
    }

    /// Whole units, e.g. `Wad::from_units(800)` is 800.0
    pub fn from_units(units: u64) -> Self {
        Wad(U256::from(units) * WAD_RAW)
    }

    /// Lift a token amount with `decimals` decimals to 18 decimals
    pub fn from_amount(amount: U256, decimals: u8) -> Result<Self, ScaleError> {
        rescale(amount, decimals, WAD_DECIMALS).map(Wad)
    }

    /// Lower to a token amount with `decimals` decimals (truncating)
    pub fn to_amount(self, decimals: u8) -> Result<U256, ScaleError> {
        rescale(self.0, WAD_DECIMALS, decimals)
    }

    pub fn parse(literal: &str) -> Result<Self, ScaleError> {
        parse_units(literal, WAD_DECIMALS).map(Wad)
    }

    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }

    pub fn checked_add(self, other: Wad) -> Result<Wad, ScaleError> {
        self.0
            .checked_add(other.0)
            .map(Wad)
            .ok_or(ScaleError::Overflow("wad add"))
    }

    pub fn saturating_sub(self, other: Wad) -> Wad {
        Wad(self.0.saturating_sub(other.0))
    }

    /// `self * other / 1e18`
    pub fn mul_wad(self, other: Wad) -> Result<Wad, ScaleError> {
        mul_div(self.0, other.0, WAD_RAW).map(Wad)
    }

    /// `self * 1e18 / other`
    pub fn div_wad(self, other: Wad) -> Result<Wad, ScaleError> {
        mul_div(self.0, WAD_RAW, other.0).map(Wad)
    }

    /// Multiply by a plain integer (e.g. seconds)
    pub fn mul_int(self, n: u64) -> Result<Wad, ScaleError> {
        self.0
            .checked_mul(U256::from(n))
            .map(Wad)
            .ok_or(ScaleError::Overflow("wad mul_int"))
    }

    /// Divide by a plain integer (e.g. seconds)
    pub fn div_int(self, n: u64) -> Result<Wad, ScaleError> {
        if n == 0 {
            return Err(ScaleError::DivisionByZero("wad div_int"));
        }
        Ok(Wad(self.0 / U256::from(n)))
    }
}

impl fmt::Display for Wad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_units(self.0, WAD_DECIMALS))
    }
}

impl FromStr for Wad {
    type Err = ScaleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Wad::parse(s)
    }
}

impl Serialize for Wad {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Wad {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Wad::parse(&text).map_err(de::Error::custom)
    }
}

/// `base^exp` by repeated squaring, each product truncated to 18 decimals
pub fn wad_pow(base: Wad, exp: u32) -> Result<Wad, ScaleError> {
    let mut result = Wad::ONE;
    let mut square = base;
    let mut remaining = exp;

    while remaining > 0 {
        if remaining & 1 == 1 {
            result = result.mul_wad(square)?;
        }
        remaining >>= 1;
        if remaining > 0 {
            square = square.mul_wad(square)?;
        }
    }

    Ok(result)
}

/// `amount * factor`, keeping the decimals of `amount`
pub fn scale_by_wad(amount: U256, factor: Wad) -> Result<U256, ScaleError> {
    mul_div(amount, factor.raw(), WAD_RAW)
}

/// USD value (18 decimals) of `amount` (token decimals) at `answer` (feed decimals)
pub fn value_usd(
    amount: U256,
    token_decimals: u8,
    answer: U256,
    feed_decimals: u8,
) -> Result<Wad, ScaleError> {
    let denominator = pow10(combined_decimals(token_decimals, feed_decimals)?)?;
    let product = amount
        .checked_mul(answer)
        .ok_or(ScaleError::Overflow("value_usd"))?;
    mul_div(product, WAD_RAW, denominator).map(Wad)
}

/// Token amount (token decimals) worth `value` at `answer` (feed decimals)
pub fn amount_for_value(
    value: Wad,
    token_decimals: u8,
    answer: U256,
    feed_decimals: u8,
) -> Result<U256, ScaleError> {
    if answer.is_zero() {
        return Err(ScaleError::DivisionByZero("amount_for_value"));
    }
    let numerator_scale = pow10(combined_decimals(token_decimals, feed_decimals)?)?;
    let denominator = answer
        .checked_mul(WAD_RAW)
        .ok_or(ScaleError::Overflow("amount_for_value"))?;
    mul_div(value.raw(), numerator_scale, denominator)
}

/// Feed answer (feed decimals) implied by `value` for `amount` (token decimals)
pub fn price_for_value(
    value: Wad,
    amount: U256,
    token_decimals: u8,
    feed_decimals: u8,
) -> Result<U256, ScaleError> {
    if amount.is_zero() {
        return Err(ScaleError::DivisionByZero("price_for_value"));
    }
    let numerator_scale = pow10(combined_decimals(token_decimals, feed_decimals)?)?;
    let denominator = amount
        .checked_mul(WAD_RAW)
        .ok_or(ScaleError::Overflow("price_for_value"))?;
    mul_div(value.raw(), numerator_scale, denominator)
}

/// Borrowed over supplied, clamped to [0, 1e18]; zero for an empty market
pub fn utilization(total_supply: U256, total_borrow: U256) -> Wad {
    if total_supply.is_zero() {
        return Wad::ZERO;
    }
    let capped = total_borrow.min(total_supply);
    Wad(capped.saturating_mul(WAD_RAW) / total_supply)
}

/// Parse a human decimal literal ("1000", "0.98", "2_450.5") into `decimals` units
pub fn parse_units(literal: &str, decimals: u8) -> Result<U256, ScaleError> {
    let text = literal.trim().replace('_', "");
    let invalid = || ScaleError::Parse(literal.to_string());

    let (whole, frac) = match text.split_once('.') {
        Some((whole, frac)) => (whole, frac),
        None => (text.as_str(), ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return Err(invalid());
    }
    let all_digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    if !all_digits(whole) || !all_digits(frac) {
        return Err(invalid());
    }
    if frac.len() > decimals as usize {
        return Err(invalid());
    }

    let whole_value = if whole.is_empty() {
        U256::ZERO
    } else {
        U256::from_str(whole).map_err(|_| invalid())?
    };

    let mut frac_digits = frac.to_string();
    while frac_digits.len() < decimals as usize {
        frac_digits.push('0');
    }
    let frac_value = if frac_digits.is_empty() {
        U256::ZERO
    } else {
        U256::from_str(&frac_digits).map_err(|_| invalid())?
    };

    whole_value
        .checked_mul(pow10(decimals)?)
        .and_then(|w| w.checked_add(frac_value))
        .ok_or(ScaleError::Overflow("parse_units"))
}

/// Render `value` (in `decimals` units) as a decimal string, e.g. "1000.0"
pub fn format_units(value: U256, decimals: u8) -> String {
    let digits = value.to_string();
    if decimals == 0 {
        return digits;
    }

    let width = decimals as usize;
    let padded = if digits.len() <= width {
        format!("{}{}", "0".repeat(width + 1 - digits.len()), digits)
    } else {
        digits
    };

    let (whole, frac) = padded.split_at(padded.len() - width);
    let frac = frac.trim_end_matches('0');
    if frac.is_empty() {
        format!("{whole}.0")
    } else {
        format!("{whole}.{frac}")
    }
}

/// Signed variant of [`format_units`]
pub fn format_signed(value: i128, decimals: u8) -> String {
    let magnitude = format_units(U256::from(value.unsigned_abs()), decimals);
    if value < 0 {
        format!("-{magnitude}")
    } else {
        magnitude
    }
}

/// Narrow to u128
pub fn to_u128(value: U256) -> Result<u128, ScaleError> {
    let limbs = value.as_limbs();
    if limbs[2] != 0 || limbs[3] != 0 {
        return Err(ScaleError::Truncation(value.to_string()));
    }
    Ok(((limbs[1] as u128) << 64) | limbs[0] as u128)
}

/// Narrow to i128
pub fn to_i128(value: U256) -> Result<i128, ScaleError> {
    let wide = to_u128(value)?;
    i128::try_from(wide).map_err(|_| ScaleError::Truncation(value.to_string()))
}

/// Decimal count for a `10^n` scale as markets report it
pub fn decimals_from_scale(scale: U256) -> Result<u8, ScaleError> {
    let ten = U256::from(10u64);
    let mut probe = U256::from(1u64);
    for decimals in 0..=MAX_DECIMALS {
        if probe == scale {
            return Ok(decimals);
        }
        probe = match probe.checked_mul(ten) {
            Some(next) => next,
            None => break,
        };
    }
    Err(ScaleError::Parse(format!("scale {scale} is not a power of ten")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn units(literal: &str, decimals: u8) -> U256 {
        parse_units(literal, decimals).unwrap()
    }

    #[test]
    fn test_parse_units() {
        assert_eq!(units("1000", 6), U256::from(1_000_000_000u64));
        assert_eq!(units("0.98", 18), U256::from(980_000_000_000_000_000u64));
        assert_eq!(units("2_450.5", 8), U256::from(245_050_000_000u64));
        assert_eq!(units(".5", 2), U256::from(50u64));
    }

    #[test]
    fn test_parse_units_rejects_garbage() {
        assert!(parse_units("", 6).is_err());
        assert!(parse_units("1.2.3", 6).is_err());
        assert!(parse_units("-5", 6).is_err());
        assert!(parse_units("1e6", 6).is_err());
        // More fractional digits than the target base holds
        assert!(parse_units("0.1234567", 6).is_err());
    }

    #[test]
    fn test_format_units() {
        assert_eq!(format_units(U256::from(1_000_000_000u64), 6), "1000.0");
        assert_eq!(format_units(U256::from(1_500_000u64), 6), "1.5");
        assert_eq!(format_units(U256::from(5u64), 6), "0.000005");
        assert_eq!(format_units(U256::from(42u64), 0), "42");
        assert_eq!(format_signed(-760_000_000, 6), "-760.0");
    }

    #[test]
    fn test_rescale_between_bases() {
        // 1 USDC (6) -> 18 decimals and back
        let one_usdc = U256::from(1_000_000u64);
        let wide = rescale(one_usdc, 6, 18).unwrap();
        assert_eq!(wide, Wad::ONE.raw());
        assert_eq!(rescale(wide, 18, 6).unwrap(), one_usdc);

        // Narrowing truncates
        assert_eq!(rescale(U256::from(1_999u64), 3, 0).unwrap(), U256::from(1u64));
    }

    #[test]
    fn test_value_usd_mixed_decimals() {
        // 1 WETH (18) at $2450 from an 8-decimal feed
        let value = value_usd(units("1", 18), 18, units("2450", 8), 8).unwrap();
        assert_eq!(value, Wad::from_units(2450));

        // 1000 USDT (6) at $0.99 from an 8-decimal feed
        let value = value_usd(units("1000", 6), 6, units("0.99", 8), 8).unwrap();
        assert_eq!(value, Wad::from_units(990));
    }

    #[test]
    fn test_amount_for_value() {
        // $760 of USDC at $1.00 (8-decimal feed) is 760 USDC
        let amount = amount_for_value(Wad::from_units(760), 6, units("1", 8), 8).unwrap();
        assert_eq!(amount, units("760", 6));

        assert_eq!(
            amount_for_value(Wad::ONE, 6, U256::ZERO, 8),
            Err(ScaleError::DivisionByZero("amount_for_value"))
        );
    }

    #[test]
    fn test_wad_pow() {
        let decay = Wad::parse("0.98").unwrap();
        assert_eq!(wad_pow(decay, 0).unwrap(), Wad::ONE);
        assert_eq!(wad_pow(decay, 1).unwrap(), decay);
        assert_eq!(wad_pow(decay, 2).unwrap(), Wad::parse("0.9604").unwrap());

        // 0.98^15 = 0.738569102645403913...
        let p15 = wad_pow(decay, 15).unwrap();
        let expected = Wad::parse("0.738569102645403913").unwrap();
        let diff = if p15 > expected { p15.saturating_sub(expected) } else { expected.saturating_sub(p15) };
        assert!(diff.raw() <= U256::from(100u64), "0.98^15 drifted: {p15}");
    }

    #[test]
    fn test_utilization_clamped() {
        assert_eq!(utilization(U256::ZERO, U256::from(5u64)), Wad::ZERO);
        assert_eq!(utilization(U256::from(100u64), U256::from(50u64)), Wad::parse("0.5").unwrap());
        // Borrow can never exceed supply in the reported figure
        assert_eq!(utilization(U256::from(100u64), U256::from(150u64)), Wad::ONE);
    }

    #[test]
    fn test_narrowing() {
        assert_eq!(to_u128(U256::from(u128::MAX)).unwrap(), u128::MAX);
        assert!(to_i128(U256::from(u128::MAX)).is_err());
        assert_eq!(to_i128(U256::from(760u64)).unwrap(), 760);
        assert_eq!(decimals_from_scale(units("1", 18)).unwrap(), 18);
        assert!(decimals_from_scale(U256::from(12u64)).is_err());
    }

    proptest! {
        #[test]
        fn prop_value_price_round_trip(
            whole in 1u64..1_000_000,
            answer in 1u64..10_000_000_000_000,
            token_decimals in prop::sample::select(vec![6u8, 8, 18]),
            feed_decimals in prop::sample::select(vec![6u8, 8, 18]),
        ) {
            let amount = U256::from(whole) * pow10(token_decimals).unwrap();
            let answer = U256::from(answer);

            let value = value_usd(amount, token_decimals, answer, feed_decimals).unwrap();
            let recovered = price_for_value(value, amount, token_decimals, feed_decimals).unwrap();

            // Truncation can only lose, and by at most one unit of the feed
            prop_assert!(recovered <= answer);
            prop_assert!(answer - recovered <= U256::from(1u64));
        }
    }
}
