//! Alpha Vantage equities: `GLOBAL_QUOTE`, `TIME_SERIES_DAILY`, `SYMBOL_SEARCH`.
//!
//! The free tier allows 5 calls per minute, so requests are spaced 12s apart
//! and never run concurrently.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use super::{parse_number, send_json, Pacer, PriceProvider, ProviderError, ProviderKind, RateLimit};
use crate::models::{HistoryPoint, PriceData, SearchResult};

const BASE_URL: &str = "https://www.alphavantage.co/query";
const PROVIDER: &str = "alpha_vantage";
/// `outputsize=compact` covers roughly this many trading days.
const COMPACT_DAYS: i64 = 100;

#[derive(Debug, Deserialize)]
struct ApiMessages {
    #[serde(rename = "Error Message")]
    error_message: Option<String>,
    #[serde(rename = "Note")]
    note: Option<String>,
    #[serde(rename = "Information")]
    information: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GlobalQuoteResponse {
    #[serde(rename = "Global Quote")]
    quote: Option<HashMap<String, String>>,
    #[serde(flatten)]
    messages: ApiMessages,
}

#[derive(Debug, Deserialize)]
struct TimeSeriesResponse {
    #[serde(rename = "Time Series (Daily)")]
    series: Option<HashMap<String, HashMap<String, String>>>,
    #[serde(flatten)]
    messages: ApiMessages,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(rename = "bestMatches", default)]
    best_matches: Vec<HashMap<String, String>>,
    #[serde(flatten)]
    messages: ApiMessages,
}

pub struct AlphaVantageProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    rate_limit: RateLimit,
    pacer: Pacer,
}

impl AlphaVantageProvider {
    pub fn new(api_key: &str, premium: bool) -> Self {
        let rate_limit = if premium {
            RateLimit {
                max_concurrency: 5,
                min_interval: Duration::from_millis(800),
            }
        } else {
            RateLimit {
                max_concurrency: 1,
                min_interval: Duration::from_secs(12),
            }
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            api_key: api_key.to_string(),
            base_url: BASE_URL.to_string(),
            pacer: Pacer::new(rate_limit.min_interval),
            rate_limit,
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.to_string();
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimit) -> Self {
        self.pacer = Pacer::new(rate_limit.min_interval);
        self.rate_limit = rate_limit;
        self
    }

    async fn query<T: serde::de::DeserializeOwned>(&self, params: &[(&str, &str)]) -> Result<T, ProviderError> {
        let mut all: Vec<(&str, &str)> = params.to_vec();
        all.push(("apikey", &self.api_key));

        let url = reqwest::Url::parse_with_params(&self.base_url, &all).map_err(|e| ProviderError::Http {
            provider: PROVIDER,
            message: format!("failed to build URL: {}", e),
        })?;
        if self.api_key.is_empty() {
            debug!("Alpha Vantage request: {}", url);
        } else {
            debug!("Alpha Vantage request: {}", url.as_str().replace(&self.api_key, "***"));
        }

        self.pacer.wait().await;
        send_json(PROVIDER, self.client.get(url)).await
    }

    fn check_api_error(messages: &ApiMessages, symbol: &str) -> Result<(), ProviderError> {
        if let Some(msg) = &messages.error_message {
            if msg.contains("Invalid API call") || msg.contains("not found") {
                return Err(ProviderError::NotFound(symbol.to_string()));
            }
            return Err(ProviderError::Http {
                provider: PROVIDER,
                message: msg.clone(),
            });
        }
        for msg in [&messages.note, &messages.information].into_iter().flatten() {
            if msg.contains("call frequency") || msg.contains("rate limit") {
                return Err(ProviderError::RateLimited { provider: PROVIDER });
            }
            warn!("Alpha Vantage notice: {}", msg);
        }
        Ok(())
    }
}

fn field<'a>(map: &'a HashMap<String, String>, suffix: &str) -> Option<&'a str> {
    map.iter()
        .find(|(k, _)| k.ends_with(suffix))
        .map(|(_, v)| v.as_str())
}

#[async_trait]
impl PriceProvider for AlphaVantageProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Stock
    }

    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn rate_limit(&self) -> RateLimit {
        self.rate_limit
    }

    async fn get_price(&self, symbol: &str) -> Result<PriceData, ProviderError> {
        let symbol = symbol.trim().to_uppercase();
        let response: GlobalQuoteResponse = self
            .query(&[("function", "GLOBAL_QUOTE"), ("symbol", &symbol)])
            .await?;
        Self::check_api_error(&response.messages, &symbol)?;

        // Unknown symbols come back as an empty "Global Quote" object.
        let quote = response
            .quote
            .filter(|q| !q.is_empty())
            .ok_or_else(|| ProviderError::NotFound(symbol.clone()))?;

        let price = field(&quote, "price")
            .and_then(parse_number)
            .ok_or_else(|| ProviderError::Parse {
                provider: PROVIDER,
                message: format!("no price for {}", symbol),
            })?;

        let mut data = PriceData::new(&symbol, "stocks", price, "USD", PROVIDER);
        data.change_24h = field(&quote, "change").and_then(parse_number);
        data.change_percent_24h = field(&quote, "change percent").and_then(parse_number);
        data.high_24h = field(&quote, "high").and_then(parse_number);
        data.low_24h = field(&quote, "low").and_then(parse_number);
        data.volume_24h = field(&quote, "volume").and_then(parse_number);
        data.updated_at = Utc::now();
        Ok(data)
    }

    async fn get_history(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<HistoryPoint>, ProviderError> {
        let symbol = symbol.trim().to_uppercase();
        let days_back = (Utc::now().date_naive() - from).num_days();
        let output_size = if days_back > COMPACT_DAYS { "full" } else { "compact" };

        let response: TimeSeriesResponse = self
            .query(&[
                ("function", "TIME_SERIES_DAILY"),
                ("symbol", &symbol),
                ("outputsize", output_size),
            ])
            .await?;
        Self::check_api_error(&response.messages, &symbol)?;
        let series = response
            .series
            .ok_or_else(|| ProviderError::NotFound(symbol.clone()))?;

        let mut points: Vec<HistoryPoint> = series
            .iter()
            .filter_map(|(day, values)| {
                let date = NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()?;
                if date < from || date > to {
                    return None;
                }
                Some(HistoryPoint {
                    date,
                    open: field(values, "open").and_then(parse_number),
                    high: field(values, "high").and_then(parse_number),
                    low: field(values, "low").and_then(parse_number),
                    close: field(values, "close").and_then(parse_number)?,
                    volume: field(values, "volume").and_then(parse_number),
                })
            })
            .collect();
        points.sort_by_key(|p| p.date);
        Ok(points)
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>, ProviderError> {
        let response: SearchResponse = self
            .query(&[("function", "SYMBOL_SEARCH"), ("keywords", query)])
            .await?;
        Self::check_api_error(&response.messages, query)?;

        Ok(response
            .best_matches
            .iter()
            .filter_map(|m| {
                let symbol = field(m, "symbol")?.to_string();
                let asset_class = match field(m, "type") {
                    Some(t) if t.eq_ignore_ascii_case("ETF") => "etf",
                    _ => "stocks",
                };
                Some(SearchResult {
                    symbol,
                    name: field(m, "name").unwrap_or_default().to_string(),
                    asset_class: asset_class.to_string(),
                    exchange: field(m, "region").map(str::to_string),
                    currency: field(m, "currency").map(str::to_string),
                    provider_id: None,
                })
            })
            .take(limit)
            .collect())
    }
}
