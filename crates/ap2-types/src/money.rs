//! Money amounts in integer minor units.
//!
//! AP2 mandates are hashed over their canonical JSON form, so the money
//! representation must round-trip byte-exactly. Amounts are therefore integer
//! minor units (e.g. yen for JPY) paired with an ISO 4217 currency code, and
//! serialized as decimal digit strings. Fractional or exponent-form values are
//! rejected at the boundary rather than coerced.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// An amount of money in integer minor units of its currency.
///
/// Serialized as `{"currency":"JPY","value":"9300"}`. The `value` string is
/// strictly decimal digits; anything else fails deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoneyAmount {
    pub currency: CurrencyCode,
    pub value: MinorUnits,
}

impl MoneyAmount {
    pub fn new(currency: CurrencyCode, value: u64) -> Self {
        Self {
            currency,
            value: MinorUnits(value),
        }
    }

    /// Convenience constructor for Japanese yen, the demo catalog currency.
    pub fn jpy(value: u64) -> Self {
        Self::new(CurrencyCode::jpy(), value)
    }
}

impl Display for MoneyAmount {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value.0, self.currency)
    }
}

/// Integer minor units, serialized as a stringified non-negative integer to
/// avoid floating-point loss in JSON. `9300` becomes `"9300"` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct MinorUnits(pub u64);

impl MinorUnits {
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for MinorUnits {
    fn from(value: u64) -> Self {
        MinorUnits(value)
    }
}

impl Display for MinorUnits {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for MinorUnits {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for MinorUnits {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(serde::de::Error::custom(
                "amount must be a non-negative integer in minor units",
            ));
        }
        let value = s
            .parse::<u64>()
            .map_err(|_| serde::de::Error::custom("amount out of range"))?;
        Ok(MinorUnits(value))
    }
}

/// An ISO 4217 alphabetic currency code.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CurrencyCode(String);

impl CurrencyCode {
    pub fn jpy() -> Self {
        CurrencyCode("JPY".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CurrencyCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid ISO 4217 currency code: {0}")]
pub struct CurrencyCodeError(String);

impl FromStr for CurrencyCode {
    type Err = CurrencyCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() == 3 && s.bytes().all(|b| b.is_ascii_uppercase()) {
            Ok(CurrencyCode(s.to_string()))
        } else {
            Err(CurrencyCodeError(s.to_string()))
        }
    }
}

impl Serialize for CurrencyCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for CurrencyCode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_money_amount_serializes_value_as_string() {
        let amount = MoneyAmount::jpy(9300);
        let json = serde_json::to_string(&amount).unwrap();
        assert_eq!(json, r#"{"currency":"JPY","value":"9300"}"#);
    }

    #[test]
    fn test_money_amount_roundtrip() {
        let amount = MoneyAmount::jpy(8000);
        let json = serde_json::to_string(&amount).unwrap();
        let back: MoneyAmount = serde_json::from_str(&json).unwrap();
        assert_eq!(amount, back);
    }

    #[test]
    fn test_fractional_value_rejected() {
        let result = serde_json::from_str::<MoneyAmount>(r#"{"currency":"JPY","value":"93.00"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_numeric_value_rejected() {
        // Amounts must arrive as strings so the canonical form is unambiguous.
        let result = serde_json::from_str::<MoneyAmount>(r#"{"currency":"JPY","value":9300}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_currency_code_validation() {
        assert!("JPY".parse::<CurrencyCode>().is_ok());
        assert!("USD".parse::<CurrencyCode>().is_ok());
        assert!("jpy".parse::<CurrencyCode>().is_err());
        assert!("YEN4".parse::<CurrencyCode>().is_err());
    }
}
