//! Token Amount Conversion
//!
//! Decimal-string to smallest-unit conversion and back. Raw amounts are
//! always `U256`; they are derived once from the declared decimals and
//! never renormalized afterwards.
//!
//! Author: AI-Generated
//! Created: 2026-02-03

use crate::errors::{EngineError, EngineResult};
use alloy::primitives::U256;

/// Parse a human decimal string ("10", "0.5", "3.000001") into the token's
/// smallest unit. Rejects empty input, signs, non-digit characters, and
/// fractional digits beyond the token's declared precision.
pub fn parse_units(amount: &str, decimals: u8) -> EngineResult<U256> {
    let amount = amount.trim();
    if amount.is_empty() {
        return Err(EngineError::InvalidArgument("amount is empty".into()));
    }

    let (int_part, frac_part) = match amount.split_once('.') {
        Some((i, f)) => (i, f),
        None => (amount, ""),
    };

    if int_part.is_empty() && frac_part.is_empty() {
        return Err(EngineError::InvalidArgument(format!("invalid amount: {amount}")));
    }
    if !int_part.chars().all(|c| c.is_ascii_digit()) || !frac_part.chars().all(|c| c.is_ascii_digit()) {
        return Err(EngineError::InvalidArgument(format!("invalid amount: {amount}")));
    }
    if frac_part.len() > decimals as usize {
        return Err(EngineError::InvalidArgument(format!(
            "amount {amount} has more than {decimals} fractional digits"
        )));
    }

    // int_part * 10^decimals + frac_part padded to `decimals` digits
    let mut digits = String::with_capacity(int_part.len() + decimals as usize);
    digits.push_str(if int_part.is_empty() { "0" } else { int_part });
    digits.push_str(frac_part);
    for _ in 0..(decimals as usize - frac_part.len()) {
        digits.push('0');
    }

    U256::from_str_radix(&digits, 10)
        .map_err(|_| EngineError::InvalidArgument(format!("amount {amount} out of range")))
}

/// Format a raw smallest-unit amount as a human decimal string.
/// Trailing fractional zeros are trimmed ("1.500000" -> "1.5").
pub fn format_units(raw: U256, decimals: u8) -> String {
    let s = raw.to_string();
    if decimals == 0 {
        return s;
    }

    let d = decimals as usize;
    let (int_part, frac_part) = if s.len() > d {
        let (i, f) = s.split_at(s.len() - d);
        (i.to_string(), f.to_string())
    } else {
        ("0".to_string(), format!("{:0>width$}", s, width = d))
    };

    let frac_trimmed = frac_part.trim_end_matches('0');
    if frac_trimmed.is_empty() {
        int_part
    } else {
        format!("{int_part}.{frac_trimmed}")
    }
}

/// Lossy f64 view of a raw amount, for price math and log lines only.
/// Never feeds back into on-chain amounts.
pub fn to_f64(raw: U256, decimals: u8) -> f64 {
    format_units(raw, decimals).parse::<f64>().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_whole_amounts() {
        assert_eq!(parse_units("10", 6).unwrap(), U256::from(10_000_000u64));
        assert_eq!(parse_units("3", 18).unwrap(), U256::from(3u64) * U256::from(10u64).pow(U256::from(18u64)));
        assert_eq!(parse_units("0", 6).unwrap(), U256::ZERO);
        assert_eq!(parse_units("7", 0).unwrap(), U256::from(7u64));
    }

    #[test]
    fn test_parse_fractional_amounts() {
        assert_eq!(parse_units("0.5", 6).unwrap(), U256::from(500_000u64));
        assert_eq!(parse_units("1.000001", 6).unwrap(), U256::from(1_000_001u64));
        assert_eq!(parse_units(".25", 2).unwrap(), U256::from(25u64));
        assert_eq!(parse_units("10.", 2).unwrap(), U256::from(1000u64));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_units("", 6).is_err());
        assert!(parse_units(".", 6).is_err());
        assert!(parse_units("-1", 6).is_err());
        assert!(parse_units("+1", 6).is_err());
        assert!(parse_units("1,5", 6).is_err());
        assert!(parse_units("1e18", 6).is_err());
        assert!(parse_units("abc", 6).is_err());
        assert!(parse_units("1.2.3", 6).is_err());
    }

    #[test]
    fn test_parse_rejects_excess_precision() {
        assert!(parse_units("1.1234567", 6).is_err());
        assert!(parse_units("0.1", 0).is_err());
    }

    #[test]
    fn test_format_round_trip() {
        for (s, d) in [("10", 6u8), ("0.5", 6), ("1.000001", 6), ("3", 18), ("0", 6)] {
            let raw = parse_units(s, d).unwrap();
            let formatted = format_units(raw, d);
            assert_eq!(parse_units(&formatted, d).unwrap(), raw, "round trip failed for {s}");
        }
    }

    #[test]
    fn test_format_pads_small_values() {
        assert_eq!(format_units(U256::from(1u64), 6), "0.000001");
        assert_eq!(format_units(U256::from(1_500_000u64), 6), "1.5");
        assert_eq!(format_units(U256::from(42u64), 0), "42");
    }

    #[test]
    fn test_to_f64() {
        let raw = parse_units("2.5", 6).unwrap();
        assert!((to_f64(raw, 6) - 2.5).abs() < 1e-12);
    }
}
