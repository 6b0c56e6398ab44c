//! Monetary arithmetic helpers.
//!
//! All amounts are `rust_decimal::Decimal` in soles; the card gateway is
//! paid in integer céntimos. Floating point is never used for money.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::errors::ServiceError;

/// Scale used when persisting line totals.
pub const LINE_SCALE: u32 = 4;

/// Converts a decimal sol amount to integer céntimos, rounding half-up.
///
/// `23.60` → `2360`. Fails on amounts that do not fit an `i64` or are
/// negative (an order total can never be negative).
pub fn to_centimos(amount: Decimal) -> Result<i64, ServiceError> {
    if amount.is_sign_negative() {
        return Err(ServiceError::ValidationError(format!(
            "negative amount: {amount}"
        )));
    }
    let scaled = (amount * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    scaled.to_i64().ok_or_else(|| {
        ServiceError::ValidationError(format!("amount out of range: {amount}"))
    })
}

/// Line total: `unit_price × (1 + tax_rate) × quantity`, rounded to
/// [`LINE_SCALE`] decimal places half-up.
pub fn line_total(unit_price: Decimal, tax_rate: Decimal, quantity: i32) -> Decimal {
    (unit_price * (Decimal::ONE + tax_rate) * Decimal::from(quantity))
        .round_dp_with_strategy(LINE_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Checks the order total invariant `total = subtotal + tax_amount`.
pub fn totals_consistent(subtotal: Decimal, tax_amount: Decimal, total: Decimal) -> bool {
    subtotal + tax_amount == total
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    #[test]
    fn soles_to_centimos() {
        assert_eq!(to_centimos(dec!(23.60)).unwrap(), 2360);
        assert_eq!(to_centimos(dec!(0)).unwrap(), 0);
        assert_eq!(to_centimos(dec!(0.01)).unwrap(), 1);
        assert_eq!(to_centimos(dec!(199.99)).unwrap(), 19999);
    }

    #[test]
    fn half_up_rounding() {
        // sub-céntimo fractions round half-up
        assert_eq!(to_centimos(dec!(0.005)).unwrap(), 1);
        assert_eq!(to_centimos(dec!(0.004)).unwrap(), 0);
        assert_eq!(to_centimos(dec!(10.125)).unwrap(), 1013);
    }

    #[test]
    fn negative_amounts_rejected() {
        assert!(to_centimos(dec!(-1.00)).is_err());
    }

    #[test]
    fn line_total_applies_tax_and_quantity() {
        // 10.00 * 1.18 * 2 = 23.60
        assert_eq!(line_total(dec!(10.00), dec!(0.18), 2), dec!(23.6000));
        // rounding at the fourth decimal
        assert_eq!(line_total(dec!(0.3333), dec!(0.18), 3), dec!(1.1799));
    }

    #[test]
    fn totals_invariant() {
        assert!(totals_consistent(dec!(20.00), dec!(3.60), dec!(23.60)));
        assert!(!totals_consistent(dec!(20.00), dec!(3.60), dec!(23.61)));
    }

    proptest! {
        #[test]
        fn centimos_monotone_in_amount(a in 0u64..1_000_000, b in 0u64..1_000_000) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            let lo = Decimal::from(lo) / Decimal::ONE_HUNDRED;
            let hi = Decimal::from(hi) / Decimal::ONE_HUNDRED;
            prop_assert!(to_centimos(lo).unwrap() <= to_centimos(hi).unwrap());
        }

        #[test]
        fn centimos_round_trips_exact_amounts(c in 0i64..100_000_000) {
            let amount = Decimal::from(c) / Decimal::ONE_HUNDRED;
            prop_assert_eq!(to_centimos(amount).unwrap(), c);
        }
    }
}
