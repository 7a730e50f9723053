//! Monetary amounts in minor currency units.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;

/// An amount of money in minor currency units (cents).
///
/// Amounts are unsigned, so a balance can never be represented below zero.
/// The upper bound is `i64::MAX` so every amount fits a SQL `BIGINT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct Amount(u64);

impl Amount {
    /// Zero amount.
    pub const ZERO: Amount = Amount(0);

    /// Largest representable amount.
    pub const MAX: Amount = Amount(i64::MAX as u64);

    /// Create a new amount. Every `u32` fits; wider values go through
    /// `Amount::try_from`.
    pub const fn new(minor_units: u32) -> Self {
        Self(minor_units as u64)
    }

    /// Create from a signed storage value. Negative values are rejected.
    pub fn from_i64(value: i64) -> Option<Self> {
        u64::try_from(value).ok().map(Self)
    }

    /// Get the amount in minor units.
    pub const fn minor_units(&self) -> u64 {
        self.0
    }

    /// Get the amount as a signed storage value.
    pub const fn as_i64(&self) -> i64 {
        // Bounded by Amount::MAX
        self.0 as i64
    }

    /// Check if the amount is positive.
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Check if the amount is zero.
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Add, returning `None` past [`Amount::MAX`].
    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0
            .checked_add(other.0)
            .filter(|sum| *sum <= Self::MAX.0)
            .map(Amount)
    }

    /// Subtract, returning `None` if the result would be negative.
    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for Amount {
    fn from(value: u32) -> Self {
        Self::new(value)
    }
}

impl From<Amount> for u64 {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl TryFrom<u64> for Amount {
    type Error = crate::LedgerError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value > Self::MAX.0 {
            Err(crate::LedgerError::BalanceOverflow)
        } else {
            Ok(Self(value))
        }
    }
}

impl Sum for Amount {
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Self {
        iter.fold(Amount::ZERO, |acc, a| {
            Amount(acc.0.saturating_add(a.0).min(Amount::MAX.0))
        })
    }
}
