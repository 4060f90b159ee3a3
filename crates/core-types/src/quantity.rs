//! Decoding of JSON-RPC "quantity" values (`0x`-prefixed, no leading zeros)
//! and conversion of wei amounts into human units.

use crate::error::CoreError;
use rust_decimal::Decimal;

const GWEI_SCALE: u32 = 9;

/// Parses a hex quantity such as `"0x1b4"` into a `u64`.
pub fn parse_quantity(value: &str) -> Result<u64, CoreError> {
    let digits = strip_prefix(value)?;
    u64::from_str_radix(digits, 16)
        .map_err(|e| CoreError::InvalidInput(value.to_string(), e.to_string()))
}

/// Parses a hex quantity into a `u128`. Used for wei amounts.
pub fn parse_quantity_u128(value: &str) -> Result<u128, CoreError> {
    let digits = strip_prefix(value)?;
    u128::from_str_radix(digits, 16)
        .map_err(|e| CoreError::InvalidInput(value.to_string(), e.to_string()))
}

fn strip_prefix(value: &str) -> Result<&str, CoreError> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .ok_or_else(|| CoreError::InvalidInput(value.to_string(), "missing 0x prefix".to_string()))?;
    if digits.is_empty() {
        return Err(CoreError::InvalidInput(value.to_string(), "empty quantity".to_string()));
    }
    Ok(digits)
}

/// Converts a wei amount into gwei.
///
/// The conversion is exact. Amounts beyond the 96-bit range of `Decimal`
/// saturate to `Decimal::MAX`; no real gas price gets near that bound.
pub fn wei_to_gwei(wei: u128) -> Decimal {
    i128::try_from(wei)
        .ok()
        .and_then(|w| Decimal::try_from_i128_with_scale(w, GWEI_SCALE).ok())
        .map(|d| d.normalize())
        .unwrap_or(Decimal::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn parses_hex_quantities() {
        assert_eq!(parse_quantity("0x0").unwrap(), 0);
        assert_eq!(parse_quantity("0x1b4").unwrap(), 436);
        assert_eq!(parse_quantity("0X10").unwrap(), 16);
        assert_eq!(parse_quantity_u128("0x3b9aca00").unwrap(), 1_000_000_000);
    }

    #[test]
    fn rejects_malformed_quantities() {
        assert!(parse_quantity("1b4").is_err());
        assert!(parse_quantity("0x").is_err());
        assert!(parse_quantity("0xzz").is_err());
        assert!(parse_quantity("0x1ffffffffffffffff").is_err());
    }

    #[test]
    fn converts_wei_to_gwei_exactly() {
        assert_eq!(wei_to_gwei(1_000_000_000), dec!(1));
        assert_eq!(wei_to_gwei(12_345_678_901), dec!(12.345678901));
        assert_eq!(wei_to_gwei(1), dec!(0.000000001));
        assert_eq!(wei_to_gwei(0), Decimal::ZERO);
    }

    #[test]
    fn saturates_absurd_amounts() {
        assert_eq!(wei_to_gwei(u128::MAX), Decimal::MAX);
    }
}
