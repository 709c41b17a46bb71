//! Shared cache seam. Redis in deployment, an in-process map in front of it
//! (and alone in tests).

mod memory;
mod redis_cache;
mod tiered;

pub use memory::MemoryCache;
pub use redis_cache::RedisCache;
pub use tiered::TieredCache;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(#[from] redis::RedisError),
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait SharedCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Increments `key` and (re)arms its expiry to `window`. Returns the new count.
    async fn incr_window(&self, key: &str, window: Duration) -> Result<u64, CacheError>;
}

/// Best-effort typed read: backend failures and undecodable payloads are misses.
pub async fn get_json<T: DeserializeOwned>(cache: &dyn SharedCache, key: &str) -> Option<T> {
    match cache.get(key).await {
        Ok(Some(raw)) => match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Discarding undecodable cache entry {}: {}", key, e);
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            warn!("Cache read failed for {}: {}", key, e);
            None
        }
    }
}

/// Best-effort typed write; failures are logged and swallowed.
pub async fn set_json<T: Serialize>(cache: &dyn SharedCache, key: &str, value: &T, ttl: Duration) {
    let raw = match serde_json::to_string(value) {
        Ok(raw) => raw,
        Err(e) => {
            warn!("Failed to encode cache entry {}: {}", key, e);
            return;
        }
    };
    if let Err(e) = cache.set(key, &raw, ttl).await {
        warn!("Cache write failed for {}: {}", key, e);
    }
}
