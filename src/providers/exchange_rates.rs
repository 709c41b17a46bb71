//! exchangeratesapi.io: `/latest` and `/{YYYY-MM-DD}`.
//!
//! The free plan only quotes against EUR. In that mode every table is fetched
//! EUR-based and re-anchored locally: `rate(base→X) = rate(EUR→X) / rate(EUR→base)`.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use super::{send_json, PriceProvider, ProviderError, ProviderKind, RateLimit, RateProvider};
use crate::models::{HistoryPoint, PriceData, RateTable, SearchResult};

const BASE_URL: &str = "https://api.exchangeratesapi.io/v1";
const PROVIDER: &str = "exchangeratesapi";
const PROVIDER_BASE: &str = "EUR";
/// Longest history range served one request per day.
const MAX_HISTORY_DAYS: i64 = 31;

/// Codes offered by symbol search.
const KNOWN_CURRENCIES: &[(&str, &str)] = &[
    ("USD", "US Dollar"),
    ("EUR", "Euro"),
    ("GBP", "British Pound"),
    ("JPY", "Japanese Yen"),
    ("CHF", "Swiss Franc"),
    ("CAD", "Canadian Dollar"),
    ("AUD", "Australian Dollar"),
    ("CNY", "Chinese Yuan"),
    ("RUB", "Russian Ruble"),
    ("UAH", "Ukrainian Hryvnia"),
    ("KZT", "Kazakhstani Tenge"),
    ("TRY", "Turkish Lira"),
    ("INR", "Indian Rupee"),
    ("BRL", "Brazilian Real"),
];

#[derive(Debug, Deserialize)]
struct RatesResponse {
    #[serde(default = "default_true")]
    success: bool,
    #[serde(default)]
    timestamp: Option<i64>,
    #[serde(default)]
    base: Option<String>,
    #[serde(default)]
    rates: HashMap<String, f64>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: Option<serde_json::Value>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    info: Option<String>,
}

fn default_true() -> bool {
    true
}

pub struct ExchangeRatesProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    eur_only: bool,
    /// Quote currency for `PriceProvider` lookups of a single code.
    quote_currency: String,
}

impl ExchangeRatesProvider {
    pub fn new(api_key: &str, eur_only: bool) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            api_key: api_key.to_string(),
            base_url: BASE_URL.to_string(),
            eur_only,
            quote_currency: "USD".to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_quote_currency(mut self, currency: &str) -> Self {
        self.quote_currency = currency.to_uppercase();
        self
    }

    async fn fetch(&self, path: &str, base: &str) -> Result<RateTable, ProviderError> {
        let base = base.to_uppercase();
        let request_base = if self.eur_only { PROVIDER_BASE } else { base.as_str() };

        let mut params = vec![("access_key", self.api_key.as_str())];
        if request_base != PROVIDER_BASE {
            params.push(("base", request_base));
        }
        let response: RatesResponse = send_json(
            PROVIDER,
            self.client
                .get(format!("{}/{}", self.base_url, path))
                .query(&params),
        )
        .await?;

        if !response.success {
            return Err(api_error(response.error));
        }

        let updated_at = response
            .timestamp
            .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
            .unwrap_or_else(Utc::now);
        let table_base = response.base.unwrap_or_else(|| request_base.to_string());
        let table = RateTable::new(&table_base, response.rates, updated_at);

        if table.base == base {
            return Ok(table);
        }
        table
            .rebase(&base)
            .ok_or_else(|| ProviderError::NotFound(format!("no {} rate to re-anchor on", base)))
    }

    /// `EURUSD` → (EUR, USD); `EUR` → (EUR, quote currency).
    fn split_pair(&self, symbol: &str) -> Result<(String, String), ProviderError> {
        let symbol = symbol.trim().to_uppercase().replace(['/', '-'], "");
        match symbol.len() {
            3 => Ok((symbol, self.quote_currency.clone())),
            6 => Ok((symbol[..3].to_string(), symbol[3..].to_string())),
            _ => Err(ProviderError::Unsupported(format!("not a currency pair: {}", symbol))),
        }
    }
}

fn api_error(error: Option<ApiError>) -> ProviderError {
    let Some(error) = error else {
        return ProviderError::Http {
            provider: PROVIDER,
            message: "request was not successful".to_string(),
        };
    };
    let kind = error.kind.unwrap_or_default();
    let message = error
        .info
        .unwrap_or_else(|| format!("{} ({:?})", kind, error.code));
    if kind.contains("rate_limit") || kind.contains("usage_limit") {
        ProviderError::RateLimited { provider: PROVIDER }
    } else if kind.contains("invalid_currency") || kind.contains("invalid_base") {
        ProviderError::NotFound(message)
    } else {
        ProviderError::Http {
            provider: PROVIDER,
            message,
        }
    }
}

#[async_trait]
impl RateProvider for ExchangeRatesProvider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn latest(&self, base: &str) -> Result<RateTable, ProviderError> {
        self.fetch("latest", base).await
    }

    async fn historical(&self, base: &str, date: NaiveDate) -> Result<RateTable, ProviderError> {
        self.fetch(&date.format("%Y-%m-%d").to_string(), base).await
    }
}

#[async_trait]
impl PriceProvider for ExchangeRatesProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Fiat
    }

    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn rate_limit(&self) -> RateLimit {
        RateLimit {
            max_concurrency: 2,
            min_interval: Duration::ZERO,
        }
    }

    async fn get_price(&self, symbol: &str) -> Result<PriceData, ProviderError> {
        let (from, to) = self.split_pair(symbol)?;
        let rate = self.pair(&from, &to).await?;
        Ok(PriceData::new(symbol.trim(), "fiat", rate, &to, PROVIDER))
    }

    async fn get_history(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<HistoryPoint>, ProviderError> {
        let (base, quote) = self.split_pair(symbol)?;
        if (to - from).num_days() > MAX_HISTORY_DAYS {
            return Err(ProviderError::Unsupported(format!(
                "fiat history is limited to {} days",
                MAX_HISTORY_DAYS
            )));
        }

        let mut points = Vec::new();
        for date in from.iter_days().take_while(|d| *d <= to) {
            let table = self.historical(&base, date).await?;
            if let Some(rate) = table.rate(&quote) {
                points.push(HistoryPoint {
                    date,
                    open: None,
                    high: None,
                    low: None,
                    close: rate,
                    volume: None,
                });
            }
        }
        Ok(points)
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>, ProviderError> {
        let needle = query.trim().to_lowercase();
        Ok(KNOWN_CURRENCIES
            .iter()
            .filter(|(code, name)| {
                code.to_lowercase().contains(&needle) || name.to_lowercase().contains(&needle)
            })
            .take(limit)
            .map(|(code, name)| SearchResult {
                symbol: code.to_string(),
                name: name.to_string(),
                asset_class: "fiat".to_string(),
                exchange: None,
                currency: Some(code.to_string()),
                provider_id: None,
            })
            .collect())
    }
}
