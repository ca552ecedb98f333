//! Fixed-point money arithmetic.
//!
//! Ledger amounts are decimals with two fractional digits; rates and ratios
//! carry six. Rounding is banker's (`MidpointNearestEven`) everywhere so
//! repeated fee computations do not drift.

use rust_decimal::{Decimal, RoundingStrategy};

/// Fractional digits kept on any amount that is persisted or returned.
pub const MONEY_SCALE: u32 = 2;

/// Fractional digits kept on rates, ratios and percentages.
pub const RATE_SCALE: u32 = 6;

/// Rounds a monetary amount to [`MONEY_SCALE`] using banker's rounding.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointNearestEven)
}

/// Rounds a rate or ratio to [`RATE_SCALE`] using banker's rounding.
pub fn round_rate(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(RATE_SCALE, RoundingStrategy::MidpointNearestEven)
}

/// `value × rate / 100`, rounded to a monetary amount.
///
/// This is the single code path for every percentage-of-amount computation
/// (fees, reserve floors, exposure ceilings).
pub fn percent_of(value: Decimal, rate: Decimal) -> Decimal {
    round_money(value * rate / Decimal::ONE_HUNDRED)
}

/// `part / whole × 100` as a rate, zero when `whole` is zero.
pub fn ratio_percent(part: Decimal, whole: Decimal) -> Decimal {
    if whole.is_zero() {
        return Decimal::ZERO;
    }
    round_rate(part / whole * Decimal::ONE_HUNDRED)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn money_rounds_half_to_even() {
        // 2.5% of 1001 = 25.025 -> rounds to the even cent
        assert_eq!(percent_of(Decimal::from(1001), Decimal::new(25, 1)), Decimal::new(2502, 2));
        assert_eq!(round_money(Decimal::new(12345, 3)), Decimal::new(1234, 2));
        assert_eq!(round_money(Decimal::new(12355, 3)), Decimal::new(1236, 2));
    }

    #[test]
    fn percent_of_exact_fee_table_values() {
        // The documented fee table must come out exact for round amounts.
        let amount = Decimal::from(50_000);
        assert_eq!(percent_of(amount, Decimal::new(20, 1)), Decimal::from(1000));
        assert_eq!(percent_of(amount, Decimal::new(35, 1)), Decimal::from(1750));
    }

    #[test]
    fn ratio_percent_handles_zero_denominator() {
        assert_eq!(ratio_percent(Decimal::from(10), Decimal::ZERO), Decimal::ZERO);
        assert_eq!(
            ratio_percent(Decimal::from(15), Decimal::from(100)),
            Decimal::from(15)
        );
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn rounding_is_idempotent_and_bounded(cents in -1_000_000_000_000i64..=1_000_000_000_000) {
                let amount = Decimal::new(cents, 2);
                prop_assert_eq!(round_money(amount), amount);
                prop_assert!(round_money(amount).scale() <= MONEY_SCALE);
            }

            #[test]
            fn fees_never_exceed_their_rate_share(
                units in 1i64..=10_000_000,
                rate_bp in 0i64..=10_000,
            ) {
                // rate in basis points, two decimal places
                let amount = Decimal::from(units);
                let rate = Decimal::new(rate_bp, 2);
                let fee = percent_of(amount, rate);
                prop_assert!(fee >= Decimal::ZERO);
                prop_assert!(fee.scale() <= MONEY_SCALE);
                // off by at most half a cent from the exact product
                let exact = amount * rate / Decimal::ONE_HUNDRED;
                prop_assert!((fee - exact).abs() <= Decimal::new(5, 3));
            }
        }
    }
}
