//! Monetary amounts stored as integer cents.

use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Largest magnitude (in major units) representable without overflowing cents.
const MAX_MAJOR: f64 = 90_071_992_547_409.0;

/// Amount in cents.
///
/// The remote API sends decimal numbers (`149.9`); they are rounded to the
/// nearest cent once, at the edge, and handled as integers afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Self = Self(0);

    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    pub const fn cents(self) -> i64 {
        self.0
    }

    /// Convert a decimal amount in major units, rejecting NaN, infinities and
    /// values too large to fit.
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_major(major: f64) -> Option<Self> {
        if !major.is_finite() || major.abs() > MAX_MAJOR {
            return None;
        }
        Some(Self((major * 100.0).round() as i64))
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn as_major(self) -> f64 {
        self.0 as f64 / 100.0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl Serialize for Money {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_major())
    }
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let major = f64::deserialize(deserializer)?;
        Self::from_major(major)
            .ok_or_else(|| D::Error::custom(format!("amount out of range: {major}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_to_nearest_cent() {
        assert_eq!(Money::from_major(149.9).unwrap().cents(), 14_990);
        assert_eq!(Money::from_major(19.999).unwrap().cents(), 2_000);
        assert_eq!(Money::from_major(-2.5).unwrap().cents(), -250);
    }

    #[test]
    fn rejects_non_finite_amounts() {
        assert!(Money::from_major(f64::NAN).is_none());
        assert!(Money::from_major(f64::INFINITY).is_none());
        assert!(Money::from_major(1e20).is_none());
    }

    #[test]
    fn deserializes_from_json_number() {
        let money: Money = serde_json::from_str("1250.75").unwrap();
        assert_eq!(money, Money::from_cents(125_075));
        assert!(serde_json::from_str::<Money>("\"12\"").is_err());
    }

    #[test]
    fn displays_two_decimals() {
        assert_eq!(Money::from_cents(5).to_string(), "0.05");
        assert_eq!(Money::from_cents(-123_456).to_string(), "-1234.56");
    }
}
