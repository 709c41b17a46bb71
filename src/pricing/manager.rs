use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::store::PriceStore;
use crate::cache::{self, SharedCache};
use crate::database::StoreError;
use crate::models::{BatchPrices, HistoryPoint, PriceData, RefreshOutcome, SearchResult};
use crate::providers::{PriceProvider, ProviderError, ProviderKind};

pub const DEFAULT_SEARCH_LIMIT: usize = 10;
pub const MAX_SEARCH_LIMIT: usize = 50;
const MAX_STOCK_WORKERS: usize = 5;
/// Upper bound on one batch's provider work. Keep it under the RPC deadline
/// so a partial result can still be returned.
pub const DEFAULT_BATCH_DEADLINE: Duration = Duration::from_secs(4);

#[derive(Debug, thiserror::Error)]
pub enum PriceError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("price not found for {0}")]
    NotFound(String),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub fn cache_key(symbol: &str) -> String {
    format!("asset:price:{}", symbol.trim().to_uppercase())
}

/// Canonical `price_cache.asset_class` for a provider route.
fn stored_class(kind: ProviderKind) -> &'static str {
    match kind {
        ProviderKind::Stock => "stocks",
        ProviderKind::Crypto => "crypto",
        ProviderKind::Fiat => "fiat",
    }
}

/// Provider routes to try, in order.
fn routes(asset_class: &str) -> Vec<ProviderKind> {
    match ProviderKind::for_class(asset_class) {
        Some(kind) => vec![kind],
        None => vec![ProviderKind::Stock, ProviderKind::Crypto],
    }
}

fn class_matches(entry: &PriceData, asset_class: &str) -> bool {
    match ProviderKind::for_class(asset_class) {
        Some(kind) => ProviderKind::for_class(&entry.asset_class) == Some(kind),
        None => true,
    }
}

/// Pull-through price lookup: shared cache, then `price_cache`, then the
/// provider for the asset class.
pub struct PriceManager {
    cache: Arc<dyn SharedCache>,
    store: Arc<dyn PriceStore>,
    stock: Arc<dyn PriceProvider>,
    crypto: Arc<dyn PriceProvider>,
    fiat: Option<Arc<dyn PriceProvider>>,
    ttl: Duration,
    batch_deadline: Duration,
}

impl PriceManager {
    pub fn new(
        cache: Arc<dyn SharedCache>,
        store: Arc<dyn PriceStore>,
        stock: Arc<dyn PriceProvider>,
        crypto: Arc<dyn PriceProvider>,
        ttl: Duration,
    ) -> Self {
        Self {
            cache,
            store,
            stock,
            crypto,
            fiat: None,
            ttl,
            batch_deadline: DEFAULT_BATCH_DEADLINE,
        }
    }

    pub fn with_batch_deadline(mut self, deadline: Duration) -> Self {
        self.batch_deadline = deadline;
        self
    }

    pub fn with_fiat(mut self, fiat: Arc<dyn PriceProvider>) -> Self {
        self.fiat = Some(fiat);
        self
    }

    fn provider(&self, kind: ProviderKind) -> Option<&Arc<dyn PriceProvider>> {
        match kind {
            ProviderKind::Stock => Some(&self.stock),
            ProviderKind::Crypto => Some(&self.crypto),
            ProviderKind::Fiat => self.fiat.as_ref(),
        }
    }

    fn is_fresh(&self, entry: &PriceData) -> bool {
        let age = Utc::now().signed_duration_since(entry.updated_at);
        age.to_std().map(|a| a < self.ttl).unwrap_or(true)
    }

    async fn remember(&self, prices: &[PriceData]) {
        if let Err(e) = self.store.upsert_prices(prices).await {
            warn!("Failed to persist {} prices: {}", prices.len(), e);
        }
        for p in prices {
            cache::set_json(self.cache.as_ref(), &cache_key(&p.symbol), p, self.ttl).await;
        }
    }

    pub async fn get_price(&self, symbol: &str, asset_class: &str) -> Result<PriceData, PriceError> {
        let symbol = symbol.trim().to_uppercase();
        if symbol.is_empty() {
            return Err(PriceError::InvalidInput("symbol is required".to_string()));
        }

        let key = cache_key(&symbol);
        if let Some(hit) = cache::get_json::<PriceData>(self.cache.as_ref(), &key).await {
            if class_matches(&hit, asset_class) {
                debug!("Price cache hit for {}", symbol);
                return Ok(hit);
            }
        }

        let mut stale = None;
        for kind in routes(asset_class) {
            match self.store.get_cached(&symbol, stored_class(kind)).await {
                Ok(Some(entry)) if self.is_fresh(&entry) => {
                    cache::set_json(self.cache.as_ref(), &key, &entry, self.ttl).await;
                    return Ok(entry);
                }
                Ok(Some(entry)) => {
                    stale.get_or_insert(entry);
                }
                Ok(None) => {}
                Err(e) => warn!("Price store read failed for {}: {}", symbol, e),
            }
        }

        let mut last_err = None;
        for kind in routes(asset_class) {
            let Some(provider) = self.provider(kind) else { continue };
            match provider.get_price(&symbol).await {
                Ok(price) => {
                    self.remember(std::slice::from_ref(&price)).await;
                    return Ok(price);
                }
                Err(e) => {
                    debug!("{} failed for {}: {}", provider.name(), symbol, e);
                    last_err = Some(e);
                }
            }
        }

        if let Some(entry) = stale {
            warn!("Serving stale price for {} from {}", symbol, entry.updated_at);
            return Ok(entry);
        }
        match last_err {
            Some(ProviderError::NotFound(_)) | None => Err(PriceError::NotFound(symbol)),
            Some(e) => Err(PriceError::Provider(e)),
        }
    }

    /// Partial success is success; anything unpriced lands in `failed_symbols`,
    /// including symbols still waiting on the provider when the batch deadline passes.
    pub async fn get_prices(&self, symbols: &HashMap<String, String>) -> BatchPrices {
        self.fetch_batch(symbols, true).await
    }

    async fn fetch_batch(&self, symbols: &HashMap<String, String>, use_cache: bool) -> BatchPrices {
        let deadline = Instant::now() + self.batch_deadline;
        let mut result = BatchPrices::default();
        let mut pending: BTreeMap<String, String> = BTreeMap::new();

        for (symbol, class) in symbols {
            let symbol = symbol.trim().to_uppercase();
            if symbol.is_empty() {
                continue;
            }
            if use_cache {
                if let Some(hit) = cache::get_json::<PriceData>(self.cache.as_ref(), &cache_key(&symbol)).await {
                    if class_matches(&hit, class) {
                        result.prices.insert(symbol, hit);
                        continue;
                    }
                }
            }
            pending.insert(symbol, class.clone());
        }

        let mut crypto = Vec::new();
        let mut stocks = Vec::new();
        let mut fiat = Vec::new();
        let mut unrouted = Vec::new();
        for (symbol, class) in &pending {
            match ProviderKind::for_class(class) {
                Some(ProviderKind::Crypto) => crypto.push(symbol.clone()),
                Some(ProviderKind::Stock) => stocks.push(symbol.clone()),
                Some(ProviderKind::Fiat) => fiat.push(symbol.clone()),
                None => unrouted.push(symbol.clone()),
            }
        }

        let (crypto_prices, stock_prices, fiat_prices) = tokio::join!(
            self.batch_from(ProviderKind::Crypto, &crypto, deadline),
            self.fan_out(&stocks, deadline),
            self.batch_from(ProviderKind::Fiat, &fiat, deadline),
        );
        let mut fetched: Vec<PriceData> = Vec::new();
        fetched.extend(crypto_prices.into_values());
        fetched.extend(stock_prices.into_values());
        fetched.extend(fiat_prices.into_values());

        // Unknown classes take the single-symbol route (stock, then crypto).
        for symbol in &unrouted {
            let class = pending.get(symbol).map(String::as_str).unwrap_or_default();
            match timeout_at(deadline, self.get_price(symbol, class)).await {
                Ok(Ok(price)) => {
                    result.prices.insert(symbol.clone(), price);
                }
                Ok(Err(e)) => debug!("Could not price {}: {}", symbol, e),
                Err(_) => debug!("Batch deadline passed before {} was priced", symbol),
            }
        }

        self.remember(&fetched).await;
        for price in fetched {
            result.prices.insert(price.symbol.clone(), price);
        }

        result.failed_symbols = pending
            .keys()
            .filter(|s| !result.prices.contains_key(*s))
            .cloned()
            .collect();
        if !result.failed_symbols.is_empty() {
            warn!("Failed to price {:?}", result.failed_symbols);
        }
        result
    }

    /// One batched provider call; a failed or late call prices nothing.
    async fn batch_from(&self, kind: ProviderKind, symbols: &[String], deadline: Instant) -> HashMap<String, PriceData> {
        if symbols.is_empty() {
            return HashMap::new();
        }
        let Some(provider) = self.provider(kind) else {
            return HashMap::new();
        };
        match timeout_at(deadline, provider.get_batch(symbols)).await {
            Ok(Ok(prices)) => prices,
            Ok(Err(e)) => {
                warn!("{} batch of {} symbols failed: {}", provider.name(), symbols.len(), e);
                HashMap::new()
            }
            Err(_) => {
                warn!("{} batch of {} symbols missed the deadline", provider.name(), symbols.len());
                HashMap::new()
            }
        }
    }

    /// Stock quotes are single-symbol upstream, so fan out within the
    /// provider's concurrency limit. The adapter paces each request, so a
    /// slow tier keeps whatever finished by `deadline` and drops the rest.
    async fn fan_out(&self, symbols: &[String], deadline: Instant) -> HashMap<String, PriceData> {
        if symbols.is_empty() {
            return HashMap::new();
        }
        let workers = self.stock.rate_limit().max_concurrency.clamp(1, MAX_STOCK_WORKERS);
        let stock = self.stock.clone();

        let mut quotes = stream::iter(symbols.iter().cloned())
            .map(|symbol| {
                let stock = stock.clone();
                async move {
                    match stock.get_price(&symbol).await {
                        Ok(price) => Some((symbol, price)),
                        Err(e) => {
                            debug!("{} failed for {}: {}", stock.name(), symbol, e);
                            None
                        }
                    }
                }
            })
            .buffer_unordered(workers);

        let mut prices = HashMap::new();
        loop {
            match timeout_at(deadline, quotes.next()).await {
                Ok(Some(Some((symbol, price)))) => {
                    prices.insert(symbol, price);
                }
                Ok(Some(None)) => {}
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        "{} priced {} of {} symbols before the batch deadline",
                        self.stock.name(),
                        prices.len(),
                        symbols.len()
                    );
                    break;
                }
            }
        }
        prices
    }

    /// Re-prices the user's assets and their derived P/L, bypassing the shared cache.
    pub async fn refresh_user(&self, user_id: Uuid, asset_ids: Option<&[Uuid]>) -> Result<RefreshOutcome, PriceError> {
        let mut assets = self.store.user_assets(user_id, asset_ids).await?;
        if assets.is_empty() {
            return Ok(RefreshOutcome::default());
        }

        let wanted: HashMap<String, String> = assets
            .iter()
            .map(|a| (a.symbol.trim().to_uppercase(), a.asset_class.clone()))
            .collect();
        let batch = self.fetch_batch(&wanted, false).await;

        let now = Utc::now();
        assets.retain_mut(|asset| match batch.prices.get(&asset.symbol.trim().to_uppercase()) {
            Some(price) => {
                asset.apply_price(price.price, now);
                true
            }
            None => false,
        });
        let updated = self.store.update_asset_prices(&assets).await?;

        info!(
            "Refreshed {} assets for user {} ({} symbols failed)",
            updated,
            user_id,
            batch.failed_symbols.len()
        );
        Ok(RefreshOutcome {
            updated,
            failed_symbols: batch.failed_symbols,
        })
    }

    /// Stored history when it reaches the end of the range, otherwise the provider.
    pub async fn get_history(
        &self,
        symbol: &str,
        asset_class: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<HistoryPoint>, PriceError> {
        let symbol = symbol.trim().to_uppercase();
        if from > to {
            return Err(PriceError::InvalidInput("from must not be after to".to_string()));
        }

        let route = routes(asset_class)[0];
        let class = stored_class(route);
        let stored = self
            .store
            .get_history(&symbol, class, from, to)
            .await
            .unwrap_or_else(|e| {
                warn!("Price history read failed for {}: {}", symbol, e);
                Vec::new()
            });

        let last_expected = to.min(Utc::now().date_naive() - ChronoDuration::days(1));
        if stored.last().map(|p| p.date >= last_expected).unwrap_or(false) {
            return Ok(stored);
        }

        let provider = self
            .provider(route)
            .ok_or_else(|| PriceError::InvalidInput(format!("no provider for {}", asset_class)))?;
        match provider.get_history(&symbol, from, to).await {
            Ok(points) => {
                if let Err(e) = self.store.upsert_history(&symbol, class, &points).await {
                    warn!("Failed to persist history for {}: {}", symbol, e);
                }
                Ok(points)
            }
            Err(e) if !stored.is_empty() => {
                warn!("History refresh for {} failed, serving stored points: {}", symbol, e);
                Ok(stored)
            }
            Err(ProviderError::NotFound(_)) => Err(PriceError::NotFound(symbol)),
            Err(e) => Err(e.into()),
        }
    }

    /// Searches one provider for a known class, or stocks and crypto together.
    pub async fn search(
        &self,
        query: &str,
        asset_class: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<SearchResult>, PriceError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(PriceError::InvalidInput("query is required".to_string()));
        }
        let limit = limit.unwrap_or(DEFAULT_SEARCH_LIMIT).clamp(1, MAX_SEARCH_LIMIT);

        if let Some(kind) = asset_class.and_then(ProviderKind::for_class) {
            let provider = self
                .provider(kind)
                .ok_or_else(|| PriceError::InvalidInput(format!("no provider for {:?}", kind)))?;
            return Ok(provider.search(query, limit).await?);
        }

        let (stocks, crypto) = tokio::join!(self.stock.search(query, limit), self.crypto.search(query, limit));
        let mut results = Vec::new();
        let mut last_err = None;
        for outcome in [stocks, crypto] {
            match outcome {
                Ok(found) => results.extend(found),
                Err(e) => {
                    warn!("Search for {:?} failed: {}", query, e);
                    last_err = Some(e);
                }
            }
        }
        if results.is_empty() {
            if let Some(e) = last_err {
                return Err(e.into());
            }
        }
        results.truncate(limit);
        Ok(results)
    }
}
