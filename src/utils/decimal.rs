//! Decimal helpers for broker payloads.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::str::FromStr;

/// Parse a decimal from the textual forms the broker emits.
///
/// Accepts plain (`"12.5"`) and scientific (`"1.25E1"`) notation. Returns
/// `None` for anything else, including `"NaN"` and `"Infinity"`.
pub fn parse_decimal(raw: &str) -> Option<Decimal> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.contains(['e', 'E']) {
        return Decimal::from_scientific(trimmed).ok();
    }
    Decimal::from_str(trimmed).ok()
}

/// Midpoint of a bid/ask pair, or `None` if the sum overflows.
pub fn midpoint(bid: Decimal, ask: Decimal) -> Option<Decimal> {
    bid.checked_add(ask)?.checked_div(dec!(2))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_decimal() {
        assert_eq!(parse_decimal("12.5"), Some(dec!(12.5)));
        assert_eq!(parse_decimal(" 100 "), Some(dec!(100)));
        assert_eq!(parse_decimal("1.25E1"), Some(dec!(12.5)));
        assert_eq!(parse_decimal("-0.05"), Some(dec!(-0.05)));
        assert_eq!(parse_decimal("NaN"), None);
        assert_eq!(parse_decimal("Infinity"), None);
        assert_eq!(parse_decimal(""), None);
    }

    #[test]
    fn test_midpoint() {
        assert_eq!(midpoint(dec!(10.0), dec!(10.2)), Some(dec!(10.1)));
        assert_eq!(midpoint(dec!(0), dec!(0.05)), Some(dec!(0.025)));
        assert_eq!(midpoint(Decimal::MAX, Decimal::MAX), None);
        assert_eq!(midpoint(Decimal::MIN, Decimal::MAX), Some(Decimal::ZERO));
    }
}
