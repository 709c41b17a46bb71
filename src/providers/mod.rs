//! Upstream market-data adapters.
//!
//! Routing is a closed set: stocks and ETFs go to the equity provider, crypto
//! to the crypto provider, fiat pairs to the FX provider.

pub mod alpha_vantage;
pub mod coingecko;
pub mod exchange_rates;

pub use alpha_vantage::AlphaVantageProvider;
pub use coingecko::CoinGeckoProvider;
pub use exchange_rates::ExchangeRatesProvider;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::models::{HistoryPoint, PriceData, RateTable, SearchResult};
use crate::resilience::Classify;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Stock,
    Crypto,
    Fiat,
}

impl ProviderKind {
    /// `None` means "unknown class": callers try stock, then crypto.
    pub fn for_class(asset_class: &str) -> Option<ProviderKind> {
        match asset_class.trim().to_lowercase().as_str() {
            "stock" | "stocks" | "etf" => Some(ProviderKind::Stock),
            "crypto" => Some(ProviderKind::Crypto),
            "fiat" | "currency" => Some(ProviderKind::Fiat),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("symbol not found: {0}")]
    NotFound(String),
    #[error("{provider} rate limit reached")]
    RateLimited { provider: &'static str },
    #[error("{provider} request timed out")]
    Timeout { provider: &'static str },
    #[error("{provider} request failed: {message}")]
    Http {
        provider: &'static str,
        message: String,
    },
    #[error("{provider} returned an unexpected payload: {message}")]
    Parse {
        provider: &'static str,
        message: String,
    },
    #[error("{0}")]
    Unsupported(String),
}

impl Classify for ProviderError {
    fn counts_as_failure(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited { .. } | ProviderError::Timeout { .. } | ProviderError::Http { .. }
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimit {
    pub max_concurrency: usize,
    /// Minimum spacing between two requests to the provider.
    pub min_interval: Duration,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            max_concurrency: 5,
            min_interval: Duration::ZERO,
        }
    }
}

/// Spaces requests `interval` apart across all callers of one adapter.
pub struct Pacer {
    interval: Duration,
    next: Mutex<Option<Instant>>,
}

impl Pacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: Mutex::new(None),
        }
    }

    pub async fn wait(&self) {
        if self.interval.is_zero() {
            return;
        }
        let mut next = self.next.lock().await;
        if let Some(at) = *next {
            if at > Instant::now() {
                tokio::time::sleep_until(at).await;
            }
        }
        *next = Some(Instant::now() + self.interval);
    }
}

#[async_trait]
pub trait PriceProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn name(&self) -> &'static str;

    fn rate_limit(&self) -> RateLimit;

    async fn get_price(&self, symbol: &str) -> Result<PriceData, ProviderError>;

    /// Prices keyed by upper-case symbol. Symbols the provider could not
    /// price are simply absent.
    async fn get_batch(&self, symbols: &[String]) -> Result<HashMap<String, PriceData>, ProviderError> {
        let mut prices = HashMap::new();
        for symbol in symbols {
            match self.get_price(symbol).await {
                Ok(price) => {
                    prices.insert(symbol.to_uppercase(), price);
                }
                Err(e) => debug!("{} could not price {}: {}", self.name(), symbol, e),
            }
        }
        Ok(prices)
    }

    async fn get_history(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<HistoryPoint>, ProviderError>;

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>, ProviderError>;
}

/// Fiat rates against a single base.
#[async_trait]
pub trait RateProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn latest(&self, base: &str) -> Result<RateTable, ProviderError>;

    async fn historical(&self, base: &str, date: NaiveDate) -> Result<RateTable, ProviderError>;

    async fn pair(&self, from: &str, to: &str) -> Result<f64, ProviderError> {
        let table = self.latest(from).await?;
        table
            .rate(to)
            .ok_or_else(|| ProviderError::NotFound(format!("{}/{}", from, to)))
    }
}

/// Sends a GET and decodes the JSON body, mapping transport and status failures.
pub(crate) async fn send_json<T: DeserializeOwned>(
    provider: &'static str,
    request: reqwest::RequestBuilder,
) -> Result<T, ProviderError> {
    let response = request.send().await.map_err(|e| transport_error(provider, e))?;

    let status = response.status();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(ProviderError::RateLimited { provider });
    }
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(ProviderError::NotFound(format!("{} returned 404", provider)));
    }
    if !status.is_success() {
        return Err(ProviderError::Http {
            provider,
            message: format!("HTTP {}", status),
        });
    }

    let body = response.text().await.map_err(|e| transport_error(provider, e))?;
    serde_json::from_str(&body).map_err(|e| ProviderError::Parse {
        provider,
        message: e.to_string(),
    })
}

fn transport_error(provider: &'static str, err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout { provider }
    } else {
        ProviderError::Http {
            provider,
            message: err.to_string(),
        }
    }
}

/// Lenient float parsing for providers that send numbers as strings.
pub(crate) fn parse_number(raw: &str) -> Option<f64> {
    raw.trim().trim_end_matches('%').parse::<f64>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_classes_to_providers() {
        assert_eq!(ProviderKind::for_class("stocks"), Some(ProviderKind::Stock));
        assert_eq!(ProviderKind::for_class("ETF"), Some(ProviderKind::Stock));
        assert_eq!(ProviderKind::for_class("crypto"), Some(ProviderKind::Crypto));
        assert_eq!(ProviderKind::for_class("bonds"), None);
    }

    #[test]
    fn only_infrastructure_errors_trip_breakers() {
        assert!(ProviderError::Timeout { provider: "x" }.counts_as_failure());
        assert!(ProviderError::RateLimited { provider: "x" }.counts_as_failure());
        assert!(!ProviderError::NotFound("AAPL".into()).counts_as_failure());
    }

    #[test]
    fn parses_percent_strings() {
        assert_eq!(parse_number("1.25%"), Some(1.25));
        assert_eq!(parse_number(" 42 "), Some(42.0));
        assert_eq!(parse_number("n/a"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn pacer_spaces_requests() {
        let pacer = Pacer::new(Duration::from_secs(12));
        let start = Instant::now();
        pacer.wait().await;
        pacer.wait().await;
        assert!(start.elapsed() >= Duration::from_secs(12));
    }
}
