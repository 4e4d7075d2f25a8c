//! Numeric value types: fixed-point money and integer stock quantities.
//!
//! Financial amounts are `rust_decimal::Decimal`, never floating point, so
//! thousands of ledger entries cannot accumulate rounding drift. Stock is
//! counted in whole units.

use core::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Whole-unit stock quantity (signed: ledger deltas can be negative).
pub type Quantity = i64;

/// Fixed-point monetary amount.
///
/// Value object: compared by value, no currency dimension (the engine operates
/// within a single tenant-configured currency; conversion is a caller concern).
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);

    pub fn new(amount: Decimal) -> Self {
        Self(amount)
    }

    /// Construct from whole currency units (convenience for literals).
    pub fn from_major(units: i64) -> Self {
        Self(Decimal::from(units))
    }

    /// Construct from minor units and a scale, e.g. `from_minor(4800, 2)` == 48.00.
    pub fn from_minor(minor: i64, scale: u32) -> Self {
        Self(Decimal::new(minor, scale))
    }

    pub fn amount(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }

    pub fn is_positive(&self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    /// `pct` percent of this amount, e.g. `Money::from_major(200).percent(dec(10))` == 20.
    pub fn percent(&self, pct: Decimal) -> Money {
        Money(self.0 * pct / Decimal::ONE_HUNDRED)
    }

    /// Multiply by a whole-unit quantity (line subtotals).
    pub fn times(&self, quantity: Quantity) -> Money {
        Money(self.0 * Decimal::from(quantity))
    }
}

impl From<Decimal> for Money {
    fn from(value: Decimal) -> Self {
        Self(value)
    }
}

impl From<Money> for Decimal {
    fn from(value: Money) -> Self {
        value.0
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl Neg for Money {
    type Output = Money;

    fn neg(self) -> Money {
        Money(-self.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, rhs: Money) {
        self.0 -= rhs.0;
    }
}

impl core::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, Add::add)
    }
}

impl core::fmt::Display for Money {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_is_exact() {
        let subtotal = Money::from_minor(19999, 2); // 199.99
        let ten_pct = subtotal.percent(Decimal::from(10));
        assert_eq!(ten_pct, Money::from_minor(199990, 4)); // 19.9990
        assert_eq!(subtotal - ten_pct, Money::from_minor(1799910, 4));
    }

    #[test]
    fn times_scales_by_quantity() {
        let unit = Money::from_minor(250, 2); // 2.50
        assert_eq!(unit.times(4), Money::from_major(10));
    }

    #[test]
    fn sum_of_many_small_amounts_has_no_drift() {
        // 0.01 added ten thousand times is exactly 100.00.
        let cent = Money::from_minor(1, 2);
        let total: Money = std::iter::repeat(cent).take(10_000).sum();
        assert_eq!(total, Money::from_major(100));
    }

    #[test]
    fn sign_predicates() {
        assert!(Money::from_major(-3).is_negative());
        assert!(Money::from_major(3).is_positive());
        assert!(!Money::ZERO.is_negative());
        assert!(!Money::ZERO.is_positive());
    }
}
