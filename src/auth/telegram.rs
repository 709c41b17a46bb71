//! Telegram WebApp `initData` validation.
//!
//! The data-check-string is every field except `hash`, sorted by key and
//! joined as `key=value` lines. The signing key is
//! `HMAC_SHA256(key = "WebAppData", msg = bot_token)`.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::BTreeMap;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

const WEB_APP_KEY: &[u8] = b"WebAppData";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TelegramError {
    #[error("init data is not a valid query string")]
    Malformed,
    #[error("init data has no hash")]
    MissingHash,
    #[error("init data hash mismatch")]
    HashMismatch,
    #[error("init data has no valid auth_date")]
    MissingAuthDate,
    #[error("init data is older than {0:?}")]
    Expired(Duration),
    #[error("init data has no valid user")]
    MissingUser,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub photo_url: Option<String>,
    #[serde(default)]
    pub language_code: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ValidatedInitData {
    pub user: TelegramUser,
    pub auth_date: DateTime<Utc>,
}

fn secret_key(bot_token: &str) -> Result<Vec<u8>, TelegramError> {
    let mut mac = HmacSha256::new_from_slice(WEB_APP_KEY).map_err(|_| TelegramError::Malformed)?;
    mac.update(bot_token.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

fn data_check_string(fields: &BTreeMap<String, String>) -> String {
    fields
        .iter()
        .filter(|(k, _)| k.as_str() != "hash")
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("\n")
}

fn mac_for(fields: &BTreeMap<String, String>, bot_token: &str) -> Result<HmacSha256, TelegramError> {
    let key = secret_key(bot_token)?;
    let mut mac = HmacSha256::new_from_slice(&key).map_err(|_| TelegramError::Malformed)?;
    mac.update(data_check_string(fields).as_bytes());
    Ok(mac)
}

/// Checks the signature and, when `max_age` is set, the freshness of `auth_date`.
pub fn validate_init_data(
    init_data: &str,
    bot_token: &str,
    max_age: Option<Duration>,
    now: DateTime<Utc>,
) -> Result<ValidatedInitData, TelegramError> {
    let pairs: Vec<(String, String)> =
        serde_urlencoded::from_str(init_data).map_err(|_| TelegramError::Malformed)?;
    let fields: BTreeMap<String, String> = pairs.into_iter().collect();

    let hash = fields.get("hash").ok_or(TelegramError::MissingHash)?;
    let expected = hex::decode(hash).map_err(|_| TelegramError::HashMismatch)?;

    // verify_slice compares in constant time.
    mac_for(&fields, bot_token)?
        .verify_slice(&expected)
        .map_err(|_| TelegramError::HashMismatch)?;

    let auth_date = fields
        .get("auth_date")
        .and_then(|v| v.parse::<i64>().ok())
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .ok_or(TelegramError::MissingAuthDate)?;

    if let Some(max_age) = max_age {
        let age = now.signed_duration_since(auth_date);
        if age.num_seconds() > max_age.as_secs() as i64 {
            return Err(TelegramError::Expired(max_age));
        }
    }

    let user: TelegramUser = fields
        .get("user")
        .and_then(|raw| serde_json::from_str(raw).ok())
        .ok_or(TelegramError::MissingUser)?;

    Ok(ValidatedInitData { user, auth_date })
}

/// Produces a signed `initData` query string. Used by tests and local tooling.
pub fn sign_init_data(fields: &[(&str, &str)], bot_token: &str) -> Result<String, TelegramError> {
    let map: BTreeMap<String, String> = fields
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let hash = hex::encode(mac_for(&map, bot_token)?.finalize().into_bytes());

    let mut pairs: Vec<(&str, &str)> = fields.to_vec();
    pairs.push(("hash", &hash));
    serde_urlencoded::to_string(&pairs).map_err(|_| TelegramError::Malformed)
}
