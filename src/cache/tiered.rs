use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{CacheError, MemoryCache, SharedCache};

/// Process-local map in front of a shared cache. Local entries live at most
/// `local_ttl`; counters always go to the shared tier so limits hold across replicas.
pub struct TieredCache {
    local: MemoryCache,
    shared: Arc<dyn SharedCache>,
    local_ttl: Duration,
}

impl TieredCache {
    pub fn new(shared: Arc<dyn SharedCache>, local_ttl: Duration) -> Self {
        Self {
            local: MemoryCache::new(),
            shared,
            local_ttl,
        }
    }
}

#[async_trait]
impl SharedCache for TieredCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        if let Some(hit) = self.local.get(key).await? {
            return Ok(Some(hit));
        }
        let value = self.shared.get(key).await?;
        if let Some(ref v) = value {
            debug!("Promoting {} to local cache", key);
            self.local.set(key, v, self.local_ttl).await?;
        }
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        self.local.set(key, value, ttl.min(self.local_ttl)).await?;
        self.shared.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.local.delete(key).await?;
        self.shared.delete(key).await
    }

    async fn incr_window(&self, key: &str, window: Duration) -> Result<u64, CacheError> {
        self.shared.incr_window(key, window).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn shared_hits_are_promoted() {
        let shared = Arc::new(MemoryCache::new());
        shared.set("k", "v", Duration::from_secs(60)).await.unwrap();
        let tiered = TieredCache::new(shared.clone(), Duration::from_secs(5));

        assert_eq!(tiered.get("k").await.unwrap().as_deref(), Some("v"));
        shared.delete("k").await.unwrap();
        // still served locally
        assert_eq!(tiered.get("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn delete_clears_both_tiers() {
        let shared = Arc::new(MemoryCache::new());
        let tiered = TieredCache::new(shared.clone(), Duration::from_secs(5));
        tiered.set("k", "v", Duration::from_secs(60)).await.unwrap();
        tiered.delete("k").await.unwrap();
        assert_eq!(tiered.get("k").await.unwrap(), None);
        assert_eq!(shared.get("k").await.unwrap(), None);
    }
}
