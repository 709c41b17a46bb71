use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

use super::{send_json, PriceProvider, ProviderError, ProviderKind, RateLimit};
use crate::models::{HistoryPoint, PriceData, SearchResult};

const PROVIDER: &str = "coingecko";
const VS_CURRENCY: &str = "usd";

/// Well-known tickers whose CoinGecko id is not discoverable by symbol
/// search alone (several coins share a ticker).
const ALIASES: &[(&str, &str)] = &[
    ("BTC", "bitcoin"),
    ("ETH", "ethereum"),
    ("USDT", "tether"),
    ("USDC", "usd-coin"),
    ("BNB", "binancecoin"),
    ("SOL", "solana"),
    ("XRP", "ripple"),
    ("ADA", "cardano"),
    ("DOGE", "dogecoin"),
    ("TRX", "tron"),
    ("TON", "the-open-network"),
    ("DOT", "polkadot"),
    ("MATIC", "matic-network"),
    ("LTC", "litecoin"),
    ("AVAX", "avalanche-2"),
    ("LINK", "chainlink"),
    ("XLM", "stellar"),
    ("ATOM", "cosmos"),
    ("SHIB", "shiba-inu"),
    ("BCH", "bitcoin-cash"),
];

#[derive(Debug, Deserialize)]
struct MarketEntry {
    id: String,
    symbol: String,
    current_price: Option<f64>,
    market_cap: Option<f64>,
    total_volume: Option<f64>,
    high_24h: Option<f64>,
    low_24h: Option<f64>,
    price_change_24h: Option<f64>,
    price_change_percentage_24h: Option<f64>,
    last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct MarketChart {
    #[serde(default)]
    prices: Vec<(f64, f64)>,
    #[serde(default)]
    total_volumes: Vec<(f64, f64)>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    coins: Vec<SearchCoin>,
}

#[derive(Debug, Deserialize)]
struct SearchCoin {
    id: String,
    name: String,
    symbol: String,
    #[serde(default)]
    market_cap_rank: Option<u32>,
}

pub struct CoinGeckoProvider {
    client: reqwest::Client,
    base_url: String,
    /// Symbol → id, seeded from the alias table and filled by search.
    ids: RwLock<HashMap<String, String>>,
}

impl CoinGeckoProvider {
    pub fn new(base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        let ids = ALIASES
            .iter()
            .map(|(symbol, id)| (symbol.to_string(), id.to_string()))
            .collect();

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            ids: RwLock::new(ids),
        }
    }

    pub fn alias(symbol: &str) -> Option<&'static str> {
        let symbol = symbol.trim().to_uppercase();
        ALIASES.iter().find(|(s, _)| *s == symbol).map(|(_, id)| *id)
    }

    async fn resolve_id(&self, symbol: &str) -> Result<String, ProviderError> {
        let symbol = symbol.trim().to_uppercase();
        if let Some(id) = self.ids.read().await.get(&symbol) {
            return Ok(id.clone());
        }

        let found = self.search_coins(&symbol).await?;
        // Best-ranked coin with an exact ticker match.
        let id = found
            .into_iter()
            .filter(|c| c.symbol.eq_ignore_ascii_case(&symbol))
            .min_by_key(|c| c.market_cap_rank.unwrap_or(u32::MAX))
            .map(|c| c.id)
            .ok_or_else(|| ProviderError::NotFound(symbol.clone()))?;

        debug!("Resolved CoinGecko id {} for {}", id, symbol);
        self.ids.write().await.insert(symbol, id.clone());
        Ok(id)
    }

    async fn search_coins(&self, query: &str) -> Result<Vec<SearchCoin>, ProviderError> {
        let response: SearchResponse = send_json(
            PROVIDER,
            self.client
                .get(format!("{}/search", self.base_url))
                .query(&[("query", query)]),
        )
        .await?;
        Ok(response.coins)
    }

    fn to_price(symbol: &str, entry: &MarketEntry) -> Option<PriceData> {
        let mut data = PriceData::new(symbol, "crypto", entry.current_price?, "USD", PROVIDER);
        data.change_24h = entry.price_change_24h;
        data.change_percent_24h = entry.price_change_percentage_24h;
        data.high_24h = entry.high_24h;
        data.low_24h = entry.low_24h;
        data.volume_24h = entry.total_volume;
        data.market_cap = entry.market_cap;
        if let Some(at) = entry.last_updated {
            data.updated_at = at;
        }
        Some(data)
    }
}

/// Buckets intraday samples into one OHLC point per UTC day.
fn daily_points(chart: &MarketChart, from: NaiveDate, to: NaiveDate) -> Vec<HistoryPoint> {
    let day_of = |ms: f64| DateTime::<Utc>::from_timestamp_millis(ms as i64).map(|t| t.date_naive());

    let mut volumes: HashMap<NaiveDate, f64> = HashMap::new();
    for (ms, volume) in &chart.total_volumes {
        if let Some(day) = day_of(*ms) {
            volumes.insert(day, *volume);
        }
    }

    let mut days: BTreeMap<NaiveDate, HistoryPoint> = BTreeMap::new();
    for (ms, price) in &chart.prices {
        let Some(day) = day_of(*ms) else { continue };
        if day < from || day > to {
            continue;
        }
        days.entry(day)
            .and_modify(|p| {
                p.high = p.high.map(|h| h.max(*price));
                p.low = p.low.map(|l| l.min(*price));
                p.close = *price;
            })
            .or_insert(HistoryPoint {
                date: day,
                open: Some(*price),
                high: Some(*price),
                low: Some(*price),
                close: *price,
                volume: None,
            });
    }

    days.into_values()
        .map(|mut p| {
            p.volume = volumes.get(&p.date).copied();
            p
        })
        .collect()
}

#[async_trait]
impl PriceProvider for CoinGeckoProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Crypto
    }

    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn rate_limit(&self) -> RateLimit {
        RateLimit {
            max_concurrency: 1,
            min_interval: Duration::ZERO,
        }
    }

    async fn get_price(&self, symbol: &str) -> Result<PriceData, ProviderError> {
        let key = symbol.trim().to_uppercase();
        self.get_batch(std::slice::from_ref(&key))
            .await?
            .remove(&key)
            .ok_or(ProviderError::NotFound(key))
    }

    /// One `/coins/markets` call for every resolvable symbol.
    async fn get_batch(&self, symbols: &[String]) -> Result<HashMap<String, PriceData>, ProviderError> {
        let mut by_id: HashMap<String, String> = HashMap::new();
        for symbol in symbols {
            match self.resolve_id(symbol).await {
                Ok(id) => {
                    by_id.insert(id, symbol.trim().to_uppercase());
                }
                Err(ProviderError::NotFound(_)) => debug!("No CoinGecko id for {}", symbol),
                Err(e) => return Err(e),
            }
        }
        if by_id.is_empty() {
            return Ok(HashMap::new());
        }

        let ids = by_id.keys().cloned().collect::<Vec<_>>().join(",");
        let entries: Vec<MarketEntry> = send_json(
            PROVIDER,
            self.client
                .get(format!("{}/coins/markets", self.base_url))
                .query(&[("vs_currency", VS_CURRENCY), ("ids", ids.as_str())]),
        )
        .await?;

        Ok(entries
            .iter()
            .filter_map(|entry| {
                let symbol = by_id
                    .get(&entry.id)
                    .cloned()
                    .unwrap_or_else(|| entry.symbol.to_uppercase());
                Self::to_price(&symbol, entry).map(|p| (symbol, p))
            })
            .collect())
    }

    async fn get_history(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<HistoryPoint>, ProviderError> {
        let id = self.resolve_id(symbol).await?;
        let start = from.and_hms_opt(0, 0, 0).map(|t| t.and_utc().timestamp()).unwrap_or_default();
        let end = to
            .and_hms_opt(23, 59, 59)
            .map(|t| t.and_utc().timestamp())
            .unwrap_or_default();

        let chart: MarketChart = send_json(
            PROVIDER,
            self.client
                .get(format!("{}/coins/{}/market_chart/range", self.base_url, id))
                .query(&[
                    ("vs_currency", VS_CURRENCY.to_string()),
                    ("from", start.to_string()),
                    ("to", end.to_string()),
                ]),
        )
        .await?;

        Ok(daily_points(&chart, from, to))
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>, ProviderError> {
        Ok(self
            .search_coins(query)
            .await?
            .into_iter()
            .take(limit)
            .map(|c| SearchResult {
                symbol: c.symbol.to_uppercase(),
                name: c.name,
                asset_class: "crypto".to_string(),
                exchange: None,
                currency: Some("USD".to_string()),
                provider_id: Some(c.id),
            })
            .collect())
    }
}
