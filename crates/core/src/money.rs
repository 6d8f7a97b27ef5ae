//! Money amounts and the fixed tax rule.
//!
//! Amounts are integer counts of minor units (cents), which gives exact
//! two-place decimal arithmetic: "paid in full" is an equality check, no
//! floating-point tolerance needed.

use core::iter::Sum;
use core::ops::{Add, Sub};

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::value_object::ValueObject;

/// Tax rate applied to every subtotal, in basis points (19.00%).
pub const TAX_RATE_BPS: i64 = 1_900;

/// A monetary amount in minor units.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl ValueObject for Money {}

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    pub const fn cents(self) -> i64 {
        self.0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// `self × quantity`, rejecting overflow.
    pub fn times(self, quantity: u32) -> DomainResult<Money> {
        self.0
            .checked_mul(i64::from(quantity))
            .map(Money)
            .ok_or_else(|| DomainError::invariant("money amount overflow"))
    }

    pub fn checked_add(self, other: Money) -> DomainResult<Money> {
        self.0
            .checked_add(other.0)
            .map(Money)
            .ok_or_else(|| DomainError::invariant("money amount overflow"))
    }

    /// Portion of `self` at `bps` basis points, rounded half-up to the cent.
    pub fn basis_points(self, bps: i64) -> Money {
        let scaled = i128::from(self.0) * i128::from(bps);
        let rounded = if scaled >= 0 {
            (scaled + 5_000) / 10_000
        } else {
            (scaled - 5_000) / 10_000
        };
        Money(rounded as i64)
    }

    /// Non-negative amount check used by command validation.
    pub fn ensure_non_negative(self, field: &str) -> DomainResult<()> {
        if self.is_negative() {
            return Err(DomainError::validation(format!("{field} must not be negative")));
        }
        Ok(())
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

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, Add::add)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Money {
        iter.copied().sum()
    }
}

impl core::fmt::Display for Money {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

/// Subtotal, tax and total derived from a subtotal with the fixed tax rate.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxedTotals {
    pub subtotal: Money,
    pub tax: Money,
    pub total: Money,
}

impl ValueObject for TaxedTotals {}

impl TaxedTotals {
    pub fn from_subtotal(subtotal: Money) -> Self {
        let tax = subtotal.basis_points(TAX_RATE_BPS);
        Self {
            subtotal,
            tax,
            total: subtotal + tax,
        }
    }
}
