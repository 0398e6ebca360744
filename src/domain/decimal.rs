//! Lossless decimal numeric type backed by rust_decimal.
//!
//! Prices and indicator levels round-trip through SQLite as canonical strings,
//! so the wrapper pins down one parse/format pair for the whole crate.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal as RustDecimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lossless decimal for prices, channel bounds and ATR values.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Decimal(#[serde(with = "rust_decimal::serde::float")] RustDecimal);

impl Decimal {
    /// Parse from a string losslessly.
    ///
    /// # Errors
    /// Returns an error if the string is not a valid decimal number.
    pub fn from_str_canonical(s: &str) -> Result<Self, rust_decimal::Error> {
        RustDecimal::from_str(s).map(Decimal)
    }

    /// Format as a canonical string: no exponent notation, no trailing zeros.
    pub fn to_canonical_string(&self) -> String {
        format!("{}", self.0.normalize())
    }

    /// The additive identity (0).
    pub fn zero() -> Self {
        Decimal(RustDecimal::ZERO)
    }

    /// Returns true if the value is exactly zero.
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Returns true if the value is > 0.
    pub fn is_positive(&self) -> bool {
        !self.is_zero() && self.0.is_sign_positive()
    }

    /// Absolute value.
    pub fn abs(&self) -> Self {
        Decimal(self.0.abs())
    }

    /// Largest integer ≤ self, as i64. None if out of i64 range.
    pub fn floor_i64(&self) -> Option<i64> {
        self.0.floor().to_i64()
    }

    /// Get the underlying rust_decimal value.
    pub fn inner(&self) -> RustDecimal {
        self.0
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_canonical_string())
    }
}

impl FromStr for Decimal {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_canonical(s)
    }
}

impl From<RustDecimal> for Decimal {
    fn from(value: RustDecimal) -> Self {
        Decimal(value)
    }
}

impl From<i64> for Decimal {
    fn from(value: i64) -> Self {
        Decimal(RustDecimal::from(value))
    }
}

impl std::ops::Add for Decimal {
    type Output = Decimal;

    fn add(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Decimal {
    type Output = Decimal;

    fn sub(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 - rhs.0)
    }
}

impl std::ops::Mul for Decimal {
    type Output = Decimal;

    fn mul(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 * rhs.0)
    }
}

impl std::ops::Div for Decimal {
    type Output = Decimal;

    fn div(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 / rhs.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_round_trip() {
        let d = Decimal::from_str_canonical("101.2500").unwrap();
        assert_eq!(d.to_canonical_string(), "101.25");
        let back = Decimal::from_str_canonical(&d.to_canonical_string()).unwrap();
        assert_eq!(back, d);
    }

    #[test]
    fn test_arithmetic() {
        let a = Decimal::from_str_canonical("10.5").unwrap();
        let b = Decimal::from_str_canonical("0.5").unwrap();
        assert_eq!((a + b).to_canonical_string(), "11");
        assert_eq!((a - b).to_canonical_string(), "10");
        assert_eq!((a * b).to_canonical_string(), "5.25");
        assert_eq!((a / b).to_canonical_string(), "21");
    }

    #[test]
    fn test_floor_i64() {
        assert_eq!(
            Decimal::from_str_canonical("3.99").unwrap().floor_i64(),
            Some(3)
        );
        assert_eq!(
            Decimal::from_str_canonical("-0.1").unwrap().floor_i64(),
            Some(-1)
        );
    }

    #[test]
    fn test_sign_helpers() {
        assert!(Decimal::from_str_canonical("0.001").unwrap().is_positive());
        assert!(Decimal::zero().is_zero());
        assert!(!Decimal::from_str_canonical("-2").unwrap().is_positive());
    }
}
