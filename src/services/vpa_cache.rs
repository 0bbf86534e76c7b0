//! Short-TTL read-through cache for VPA resolutions. Never authoritative.

use async_trait::async_trait;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::domain::ResolvedVpa;

const VPA_PREFIX: &str = "vpa:";

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Cache encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

#[async_trait]
pub trait VpaCache: Send + Sync {
    async fn get(&self, vpa: &str) -> Result<Option<ResolvedVpa>, CacheError>;

    async fn set(&self, vpa: &str, value: &ResolvedVpa, ttl: Duration) -> Result<(), CacheError>;

    async fn invalidate(&self, vpa: &str) -> Result<(), CacheError>;
}

#[derive(Clone)]
pub struct RedisVpaCache {
    redis_client: redis::Client,
}

impl RedisVpaCache {
    pub fn new(redis_url: &str) -> Result<Self, CacheError> {
        let redis_client = redis::Client::open(redis_url)?;
        Ok(Self { redis_client })
    }

    pub fn client(&self) -> &redis::Client {
        &self.redis_client
    }

    fn key(vpa: &str) -> String {
        format!("{}{}", VPA_PREFIX, vpa)
    }
}

#[async_trait]
impl VpaCache for RedisVpaCache {
    async fn get(&self, vpa: &str) -> Result<Option<ResolvedVpa>, CacheError> {
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let cached: Option<String> = conn.get(Self::key(vpa)).await?;
        match cached {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, vpa: &str, value: &ResolvedVpa, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let serialized = serde_json::to_string(value)?;
        let _: () = conn
            .set_ex(Self::key(vpa), serialized, ttl.as_secs().max(1))
            .await?;
        Ok(())
    }

    async fn invalidate(&self, vpa: &str) -> Result<(), CacheError> {
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let _: () = conn.del(Self::key(vpa)).await?;
        Ok(())
    }
}

/// Process-local fallback used when no Redis is configured.
#[derive(Default)]
pub struct InMemoryVpaCache {
    entries: RwLock<HashMap<String, (ResolvedVpa, Instant)>>,
}

impl InMemoryVpaCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VpaCache for InMemoryVpaCache {
    async fn get(&self, vpa: &str) -> Result<Option<ResolvedVpa>, CacheError> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(vpa)
            .filter(|(_, expires)| *expires > Instant::now())
            .map(|(value, _)| value.clone()))
    }

    async fn set(&self, vpa: &str, value: &ResolvedVpa, ttl: Duration) -> Result<(), CacheError> {
        let mut entries = self.entries.write().await;
        entries.retain(|_, (_, expires)| *expires > Instant::now());
        entries.insert(vpa.to_string(), (value.clone(), Instant::now() + ttl));
        Ok(())
    }

    async fn invalidate(&self, vpa: &str) -> Result<(), CacheError> {
        self.entries.write().await.remove(vpa);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved() -> ResolvedVpa {
        ResolvedVpa {
            vpa: "alice@bank1".into(),
            bank_code: "BANK1".into(),
            account_number: "000111".into(),
            holder_name: "Alice".into(),
            is_active: true,
        }
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let cache = InMemoryVpaCache::new();
        cache.set("alice@bank1", &resolved(), Duration::from_millis(20)).await.unwrap();
        assert!(cache.get("alice@bank1").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cache.get("alice@bank1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn invalidate_removes_entry() {
        let cache = InMemoryVpaCache::new();
        cache.set("alice@bank1", &resolved(), Duration::from_secs(60)).await.unwrap();
        cache.invalidate("alice@bank1").await.unwrap();
        assert!(cache.get("alice@bank1").await.unwrap().is_none());
    }
}
