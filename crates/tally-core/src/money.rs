//! # Money Module
//!
//! Provides the `Money` type for handling monetary values safely.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │  THE FLOATING POINT PROBLEM                                         │
//! │                                                                     │
//! │  In floating point:                                                 │
//! │    0.1 + 0.2 = 0.30000000000000004  ❌ WRONG!                        │
//! │                                                                     │
//! │  OUR SOLUTION: Integer Cents                                        │
//! │    Every rate, cost and total in a stock record is an i64 cents     │
//! │    value. Only the UI converts to a display string.                 │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use tally_core::money::Money;
//!
//! let rate = Money::from_cents(1099); // $10.99
//! let total = rate.checked_mul(3).unwrap();
//! assert_eq!(total.cents(), 3297);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in the smallest currency unit (cents).
///
/// ## Design Decisions
/// - **i64 (signed)**: allows negative values for returns and corrections
/// - **Transparent serde**: serializes as a bare integer, so record payloads
///   round-trip through the remote API without a wrapper object
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from cents (the smallest currency unit).
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Returns the value in cents.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Zero amount.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    /// Checks if the amount is zero.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checks if the amount is negative.
    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Overflow-checked addition.
    #[inline]
    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    /// Overflow-checked subtraction.
    #[inline]
    pub fn checked_sub(self, other: Money) -> Option<Money> {
        self.0.checked_sub(other.0).map(Money)
    }

    /// Overflow-checked multiplication by a quantity.
    #[inline]
    pub fn checked_mul(self, quantity: i64) -> Option<Money> {
        self.0.checked_mul(quantity).map(Money)
    }
}

impl fmt::Display for Money {
    /// Formats as a decimal amount, e.g. `10.99` or `-5.50`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_cents() {
        let m = Money::from_cents(1099);
        assert_eq!(m.cents(), 1099);
        assert!(!m.is_zero());
        assert!(!m.is_negative());
    }

    #[test]
    fn test_checked_arithmetic() {
        let rate = Money::from_cents(250);
        assert_eq!(rate.checked_mul(4).unwrap().cents(), 1000);
        assert_eq!(
            rate.checked_add(Money::from_cents(50)).unwrap().cents(),
            300
        );
        assert!(Money::from_cents(i64::MAX).checked_mul(2).is_none());
    }

    #[test]
    fn test_display() {
        assert_eq!(Money::from_cents(1099).to_string(), "10.99");
        assert_eq!(Money::from_cents(-550).to_string(), "-5.50");
        assert_eq!(Money::from_cents(5).to_string(), "0.05");
    }

    #[test]
    fn test_serde_transparent() {
        let m = Money::from_cents(1234);
        assert_eq!(serde_json::to_string(&m).unwrap(), "1234");
        let back: Money = serde_json::from_str("1234").unwrap();
        assert_eq!(back, m);
    }
}
