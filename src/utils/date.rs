//! Serde helpers for chrono date types.

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

const DATE_FORMAT: &str = "%Y-%m-%d";

pub fn parse(s: &str) -> Result<NaiveDate, chrono::ParseError> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT)
}

/// Serialize NaiveDate as "YYYY-MM-DD". Used with #[serde(with = "crate::utils::date")].
pub fn serialize<S>(date: &NaiveDate, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    date.format(DATE_FORMAT).to_string().serialize(serializer)
}

/// Deserialize NaiveDate from "YYYY-MM-DD" string.
pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDate, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse(&s).map_err(serde::de::Error::custom)
}

/// Deserialize Option<NaiveDate> from null or "YYYY-MM-DD" string.
/// Pair with `#[serde(default, deserialize_with = "crate::utils::date::deserialize_opt")]`.
pub fn deserialize_opt<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    match opt {
        None => Ok(None),
        Some(s) if s.is_empty() => Ok(None),
        Some(s) => parse(&s).map(Some).map_err(serde::de::Error::custom),
    }
}
