//! Money rounding.
//!
//! Unit costs and quantities are fixed-point decimals. Monetary totals are
//! rounded to a configurable precision at the point a value is reported or
//! persisted, never inside an intermediate computation.

use rust_decimal::{Decimal, RoundingStrategy};

/// Default number of decimal places for monetary amounts.
pub const DEFAULT_MONEY_PRECISION: u32 = 2;

/// Round a monetary amount to `precision` decimal places.
///
/// Uses midpoint-away-from-zero, the conventional commercial rounding rule.
pub fn round_money(amount: Decimal, precision: u32) -> Decimal {
    amount.round_dp_with_strategy(precision, RoundingStrategy::MidpointAwayFromZero)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn rounds_midpoint_away_from_zero() {
        assert_eq!(round_money(dec!(2.345), 2), dec!(2.35));
        assert_eq!(round_money(dec!(-2.345), 2), dec!(-2.35));
        assert_eq!(round_money(dec!(2.344), 2), dec!(2.34));
    }

    #[test]
    fn leaves_exact_amounts_untouched() {
        assert_eq!(round_money(dec!(85.00), 2), dec!(85.00));
    }
}
