use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::time::Duration;

use super::{CacheError, SharedCache};

/// Redis-backed cache. `ConnectionManager` reconnects on its own and is cheap to clone.
#[derive(Clone)]
pub struct RedisCache {
    con: ConnectionManager,
}

impl RedisCache {
    pub async fn connect(redis_url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(redis_url)?;
        let con = ConnectionManager::new(client).await?;
        tracing::info!("Connected to Redis");
        Ok(Self { con })
    }
}

#[async_trait]
impl SharedCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut con = self.con.clone();
        let value = redis::cmd("GET")
            .arg(key)
            .query_async::<_, Option<String>>(&mut con)
            .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut con = self.con.clone();
        let millis = ttl.as_millis().max(1) as u64;
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(millis)
            .query_async::<_, ()>(&mut con)
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut con = self.con.clone();
        redis::cmd("DEL").arg(key).query_async::<_, ()>(&mut con).await?;
        Ok(())
    }

    async fn incr_window(&self, key: &str, window: Duration) -> Result<u64, CacheError> {
        let mut con = self.con.clone();
        let (count,): (u64,) = redis::pipe()
            .atomic()
            .cmd("INCR")
            .arg(key)
            .cmd("PEXPIRE")
            .arg(key)
            .arg(window.as_millis() as u64)
            .ignore()
            .query_async(&mut con)
            .await?;
        Ok(count)
    }
}
