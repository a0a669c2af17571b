//! Money as integer cents.
//!
//! Fees and balances are decimal amounts with at most two fractional digits,
//! so they are represented exactly as signed cents. Signed, because the
//! late-return settlement is allowed to drive a wallet balance negative up to
//! the capped fee; every other debit path rejects overdrafts before an event
//! is emitted.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error type for parsing decimal amounts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid money amount: {0}")]
pub struct ParseMoneyError(String);

/// A decimal amount in cents.
///
/// # Examples
///
/// ```
/// use circulate_core::money::Money;
///
/// let fee: Money = "0.2".parse().unwrap();
/// assert_eq!(fee.cents(), 20);
///
/// let three_days = fee.times(3);
/// assert_eq!(three_days.to_one_decimal_string(), "0.6");
/// ```
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    /// Zero.
    pub const ZERO: Self = Self(0);

    /// Create an amount from cents.
    #[must_use]
    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// Create an amount from whole units (e.g. `3` → `3.00`).
    #[must_use]
    pub const fn from_units(units: i64) -> Self {
        Self(units * 100)
    }

    /// The amount in cents.
    #[must_use]
    pub const fn cents(self) -> i64 {
        self.0
    }

    /// Whether this amount is zero.
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Whether this amount is below zero.
    #[must_use]
    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Multiply by a count (e.g. per-day fee × days late).
    ///
    /// Fees and day counts are tiny relative to the i64 range.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub const fn times(self, n: u64) -> Self {
        Self(self.0 * n as i64)
    }

    /// The smaller of two amounts.
    #[must_use]
    pub fn min(self, other: Self) -> Self {
        if self.0 <= other.0 { self } else { other }
    }

    /// Render with exactly one decimal digit, truncating the second
    /// (fee schedules here are multiples of ten cents, so nothing is lost).
    /// Used for the `late_fee_applied` wire field.
    #[must_use]
    pub fn to_one_decimal_string(self) -> String {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.abs();
        format!("{sign}{}.{}", abs / 100, (abs % 100) / 10)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl FromStr for Money {
    type Err = ParseMoneyError;

    /// Parse a decimal string with at most two fractional digits
    /// (`"3"`, `"0.2"`, `"27.0"`, `"-1.25"`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(ParseMoneyError("empty amount".to_string()));
        }

        let (sign, digits) = match trimmed.strip_prefix('-') {
            Some(rest) => (-1_i64, rest),
            None => (1, trimmed),
        };

        let (whole, frac) = match digits.split_once('.') {
            Some((w, f)) => (w, f),
            None => (digits, ""),
        };
        if whole.is_empty() || frac.len() > 2 {
            return Err(ParseMoneyError(s.to_string()));
        }

        let units: i64 = whole.parse().map_err(|_| ParseMoneyError(s.to_string()))?;
        let cents = match frac.len() {
            0 => 0,
            n => {
                let parsed: i64 = frac.parse().map_err(|_| ParseMoneyError(s.to_string()))?;
                if n == 1 { parsed * 10 } else { parsed }
            }
        };

        Ok(Self(sign * (units * 100 + cents)))
    }
}

impl std::ops::Add for Money {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Money {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl std::ops::Neg for Money {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Self(-self.0)
    }
}
