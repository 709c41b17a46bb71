use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One row of `price_cache`, also the L1 cache payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PriceData {
    pub symbol: String,
    pub asset_class: String,
    pub price: f64,
    pub currency: String,
    pub change_24h: Option<f64>,
    pub change_percent_24h: Option<f64>,
    pub high_24h: Option<f64>,
    pub low_24h: Option<f64>,
    pub volume_24h: Option<f64>,
    pub market_cap: Option<f64>,
    pub source: String,
    pub updated_at: DateTime<Utc>,
}

impl PriceData {
    pub fn new(symbol: &str, asset_class: &str, price: f64, currency: &str, source: &str) -> Self {
        Self {
            symbol: symbol.to_uppercase(),
            asset_class: asset_class.to_string(),
            price,
            currency: currency.to_uppercase(),
            change_24h: None,
            change_percent_24h: None,
            high_24h: None,
            low_24h: None,
            volume_24h: None,
            market_cap: None,
            source: source.to_string(),
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct HistoryPoint {
    #[serde(with = "crate::utils::date")]
    pub date: NaiveDate,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: f64,
    pub volume: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub symbol: String,
    pub name: String,
    pub asset_class: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exchange: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    /// Provider-side identifier when it differs from the symbol (CoinGecko ids).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
}

/// Outcome of a multi-symbol lookup. Partial success is still success.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchPrices {
    pub prices: HashMap<String, PriceData>,
    pub failed_symbols: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefreshOutcome {
    pub updated: u64,
    pub failed_symbols: Vec<String>,
}
