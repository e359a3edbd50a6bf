//! # Money
//!
//! Integer minor-unit amounts with an ISO-4217 currency code.
//!
//! Providers commonly report rates as decimal strings in major units
//! (`"12.34"`); [`Money::from_major`] converts those with `rust_decimal` so
//! no floating point ever touches an amount.
//!
//! # Examples
//!
//! ```
//! use rust_decimal::Decimal;
//! use ship_quote::domain::value_objects::money::Money;
//! use std::str::FromStr;
//!
//! let m = Money::from_major(Decimal::from_str("12.34").unwrap(), "usd").unwrap();
//! assert_eq!(m.minor_units(), 1234);
//! assert_eq!(m.currency(), "USD");
//! ```

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors produced while building a [`Money`] value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoneyError {
    /// Currency code is not three ASCII letters.
    #[error("invalid currency code: {0:?}")]
    InvalidCurrency(String),

    /// Amount is negative or does not fit in minor units.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
}

/// Amount in minor currency units (cents, pence) plus currency code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    minor_units: i64,
    currency: String,
}

impl Money {
    /// Creates a money value from minor units.
    ///
    /// # Errors
    ///
    /// Returns [`MoneyError`] for negative amounts or malformed currency codes.
    pub fn new(minor_units: i64, currency: &str) -> Result<Self, MoneyError> {
        if minor_units < 0 {
            return Err(MoneyError::InvalidAmount(minor_units.to_string()));
        }
        Ok(Self {
            minor_units,
            currency: normalize_currency(currency)?,
        })
    }

    /// Creates a money value from a decimal amount in major units, assuming
    /// two minor digits. Sub-cent fractions round half away from zero.
    ///
    /// # Errors
    ///
    /// Returns [`MoneyError`] for negative or overflowing amounts and
    /// malformed currency codes.
    pub fn from_major(amount: Decimal, currency: &str) -> Result<Self, MoneyError> {
        let minor = (amount * Decimal::ONE_HUNDRED)
            .round_dp_with_strategy(0, rust_decimal::RoundingStrategy::MidpointAwayFromZero)
            .to_i64()
            .ok_or_else(|| MoneyError::InvalidAmount(amount.to_string()))?;
        Self::new(minor, currency)
    }

    /// Returns the amount in minor units.
    #[inline]
    #[must_use]
    pub fn minor_units(&self) -> i64 {
        self.minor_units
    }

    /// Returns the upper-case currency code.
    #[inline]
    #[must_use]
    pub fn currency(&self) -> &str {
        &self.currency
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let major = self.minor_units / 100;
        let minor = self.minor_units % 100;
        write!(f, "{}.{:02} {}", major, minor, self.currency)
    }
}

/// Validates and upper-cases an ISO-4217 style currency code.
pub(crate) fn normalize_currency(code: &str) -> Result<String, MoneyError> {
    let trimmed = code.trim();
    if trimmed.len() == 3 && trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
        Ok(trimmed.to_ascii_uppercase())
    } else {
        Err(MoneyError::InvalidCurrency(code.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn from_major_rounds_half_away_from_zero() {
        let m = Money::from_major(Decimal::from_str("7.125").unwrap(), "EUR").unwrap();
        assert_eq!(m.minor_units(), 713);
    }

    #[test]
    fn rejects_negative_amounts() {
        assert!(matches!(
            Money::new(-1, "USD"),
            Err(MoneyError::InvalidAmount(_))
        ));
    }

    #[test]
    fn rejects_bad_currency() {
        assert!(Money::new(100, "US").is_err());
        assert!(Money::new(100, "U5D").is_err());
    }

    #[test]
    fn display() {
        let m = Money::new(1205, "gbp").unwrap();
        assert_eq!(m.to_string(), "12.05 GBP");
    }
}
