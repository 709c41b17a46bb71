//! ISO-4217 style currency codes. Any three ASCII letters are accepted since the
//! FX provider publishes rates for far more currencies than we enumerate.

use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_CURRENCY: &str = "USD";

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    pub fn usd() -> Self {
        Currency(DEFAULT_CURRENCY.to_string())
    }

    /// Normalizes to upper case. `None` unless the input is exactly three letters.
    pub fn from_str(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.len() == 3 && s.chars().all(|c| c.is_ascii_alphabetic()) {
            Some(Currency(s.to_ascii_uppercase()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl TryFrom<String> for Currency {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Currency::from_str(&value).ok_or_else(|| format!("invalid currency code: {:?}", value))
    }
}

impl From<Currency> for String {
    fn from(c: Currency) -> Self {
        c.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_case() {
        assert_eq!(Currency::from_str("eur").unwrap().as_str(), "EUR");
        assert_eq!(Currency::from_str(" usd ").unwrap().as_str(), "USD");
    }

    #[test]
    fn rejects_malformed_codes() {
        assert!(Currency::from_str("EURO").is_none());
        assert!(Currency::from_str("U5D").is_none());
        assert!(Currency::from_str("").is_none());
    }

    #[test]
    fn deserializes_through_validation() {
        let c: Currency = serde_json::from_str("\"gbp\"").unwrap();
        assert_eq!(c.as_str(), "GBP");
        assert!(serde_json::from_str::<Currency>("\"pounds\"").is_err());
    }
}
