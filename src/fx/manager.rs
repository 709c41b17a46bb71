use async_trait::async_trait;
use once_cell::sync::OnceCell;
use std::collections::HashSet;
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::store::RateStore;
use crate::cache::{self, SharedCache};
use crate::database::StoreError;
use crate::models::{Conversion, Currency, RateTable};
use crate::providers::{ProviderError, RateProvider};

#[derive(Debug, thiserror::Error)]
pub enum FxError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("no exchange rate for {0}")]
    NotFound(String),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub fn rates_key(base: &str) -> String {
    format!("fx:rates:{}", base.to_uppercase())
}

/// Anything that can turn one currency into another.
#[async_trait]
pub trait CurrencyConverter: Send + Sync {
    /// Units of `to` per unit of `from`.
    async fn rate(&self, from: &str, to: &str) -> Result<f64, FxError>;
}

/// Notified after a refreshed table becomes visible.
#[async_trait]
pub trait RatesListener: Send + Sync {
    async fn rates_refreshed(&self, table: &RateTable);
}

/// Single-base rate table. Readers see either the previous or the new table,
/// never a partial one; refreshes are serialized.
pub struct FxManager {
    base: String,
    provider: Arc<dyn RateProvider>,
    store: Arc<dyn RateStore>,
    cache: Arc<dyn SharedCache>,
    cache_ttl: Duration,
    table: RwLock<Option<Arc<RateTable>>>,
    /// Cross pairs with no stored direct row, forgotten on every publish.
    direct_misses: RwLock<HashSet<(String, String)>>,
    refresh_lock: Mutex<()>,
    listener: OnceCell<Weak<dyn RatesListener>>,
}

impl FxManager {
    pub fn new(
        base: &str,
        provider: Arc<dyn RateProvider>,
        store: Arc<dyn RateStore>,
        cache: Arc<dyn SharedCache>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            base: base.to_uppercase(),
            provider,
            store,
            cache,
            cache_ttl,
            table: RwLock::new(None),
            direct_misses: RwLock::new(HashSet::new()),
            refresh_lock: Mutex::new(()),
            listener: OnceCell::new(),
        }
    }

    /// The listener usually converts through this manager, so only a weak
    /// handle is kept. A second call is ignored.
    pub fn set_listener(&self, listener: &Arc<dyn RatesListener>) {
        if self.listener.set(Arc::downgrade(listener)).is_err() {
            warn!("Rates listener already set for {}", self.base);
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    fn current(&self) -> Option<Arc<RateTable>> {
        self.table.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn publish(&self, table: Arc<RateTable>) {
        *self.table.write().unwrap_or_else(|p| p.into_inner()) = Some(table);
        self.direct_misses.write().unwrap_or_else(|p| p.into_inner()).clear();
    }

    /// A stored row for a pair not involving the base. Misses are remembered
    /// until the next publish.
    async fn direct_rate(&self, from: &str, to: &str) -> Option<f64> {
        let pair = (from.to_string(), to.to_string());
        if self.direct_misses.read().unwrap_or_else(|p| p.into_inner()).contains(&pair) {
            return None;
        }
        match self.store.direct_rate(from, to).await {
            Ok(Some(rate)) if rate.is_finite() && rate > 0.0 => return Some(rate),
            Ok(_) => {}
            Err(e) => {
                warn!("Direct rate lookup {}/{} failed: {}", from, to, e);
                return None;
            }
        }
        self.direct_misses.write().unwrap_or_else(|p| p.into_inner()).insert(pair);
        None
    }

    /// The base table from memory, the shared cache, the store, or a
    /// provider refresh, in that order.
    async fn base_table(&self) -> Result<Arc<RateTable>, FxError> {
        if let Some(table) = self.current() {
            return Ok(table);
        }

        let key = rates_key(&self.base);
        if let Some(table) = cache::get_json::<RateTable>(self.cache.as_ref(), &key).await {
            let table = Arc::new(table);
            self.publish(table.clone());
            return Ok(table);
        }

        match self.store.load_rates(&self.base).await {
            Ok(Some(table)) => {
                cache::set_json(self.cache.as_ref(), &key, &table, self.cache_ttl).await;
                let table = Arc::new(table);
                self.publish(table.clone());
                return Ok(table);
            }
            Ok(None) => debug!("No stored {} rates, refreshing", self.base),
            Err(e) => warn!("Rate store read failed: {}", e),
        }

        self.refresh_rates().await
    }

    /// Rates relative to `base`, derived from the configured base table.
    pub async fn get_rates(&self, base: &str) -> Result<RateTable, FxError> {
        let base = parse_currency(base)?;
        let table = self.base_table().await?;
        if table.base == base {
            return Ok((*table).clone());
        }
        table
            .rebase(&base)
            .ok_or_else(|| FxError::NotFound(format!("{}/{}", self.base, base)))
    }

    pub async fn get_rate(&self, from: &str, to: &str) -> Result<f64, FxError> {
        let from = parse_currency(from)?;
        let to = parse_currency(to)?;
        if from == to {
            return Ok(1.0);
        }

        // Stored rows against the base are the table itself
        let table = self.base_table().await?;
        if from != table.base && to != table.base {
            if let Some(rate) = self.direct_rate(&from, &to).await {
                return Ok(rate);
            }
        }

        table
            .cross_rate(&from, &to)
            .ok_or_else(|| FxError::NotFound(format!("{}/{}", from, to)))
    }

    pub async fn convert(&self, amount: f64, from: &str, to: &str) -> Result<Conversion, FxError> {
        if !amount.is_finite() {
            return Err(FxError::InvalidInput("amount must be a finite number".to_string()));
        }
        let rate = self.get_rate(from, to).await?;
        Ok(Conversion {
            amount,
            from: from.to_uppercase(),
            to: to.to_uppercase(),
            rate,
            converted: amount * rate,
        })
    }

    /// Fetches, persists and publishes a fresh base table.
    pub async fn refresh_rates(&self) -> Result<Arc<RateTable>, FxError> {
        let _guard = self.refresh_lock.lock().await;

        let table = self.provider.latest(&self.base).await?;
        let written = self.store.save_rates(&table).await?;

        let key = rates_key(&self.base);
        if let Err(e) = self.cache.delete(&key).await {
            warn!("Failed to invalidate {}: {}", key, e);
        }
        cache::set_json(self.cache.as_ref(), &key, &table, self.cache_ttl).await;

        let table = Arc::new(table);
        self.publish(table.clone());
        info!("Refreshed {} {} exchange rates from {}", written, self.base, self.provider.name());

        if let Some(listener) = self.listener.get().and_then(Weak::upgrade) {
            listener.rates_refreshed(&table).await;
        }
        Ok(table)
    }

    /// Refreshes immediately, then every `interval`, until `shutdown` flips.
    pub fn spawn_refresh_loop(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.refresh_rates().await {
                            warn!("Exchange rate refresh failed: {}", e);
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("Exchange rate refresh loop stopped");
                            break;
                        }
                    }
                }
            }
        })
    }
}

#[async_trait]
impl CurrencyConverter for FxManager {
    async fn rate(&self, from: &str, to: &str) -> Result<f64, FxError> {
        self.get_rate(from, to).await
    }
}

fn parse_currency(code: &str) -> Result<String, FxError> {
    Currency::from_str(code)
        .map(Currency::into_string)
        .ok_or_else(|| FxError::InvalidInput(format!("invalid currency code: {}", code)))
}
