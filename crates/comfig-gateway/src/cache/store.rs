//! Durable cache tier: Redis with an in-memory fallback.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use deadpool_redis::Pool;
use redis::AsyncCommands;
use thiserror::Error;

use crate::config::RedisConfig;
use crate::metrics;
use crate::resource::VersionedKey;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("redis connection unavailable: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    #[error("redis command failed: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Key-value persistence with per-entry TTL, keyed by versioned key.
///
/// Values are raw strings; entries are only ever overwritten or left to
/// expire.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Returns `None` if the entry doesn't exist or has expired.
    async fn get(&self, key: &VersionedKey) -> Result<Option<String>, CacheError>;

    /// Store a value, replacing any previous one, expiring after `ttl`.
    async fn put(&self, key: &VersionedKey, value: &str, ttl: Duration) -> Result<(), CacheError>;

    /// Short label for logs and health output.
    fn mode(&self) -> &'static str;
}

/// A cached value with its write time and lifetime.
#[derive(Clone, Debug)]
pub struct CachedEntry {
    pub data: Arc<str>,
    pub cached_at: Instant,
    pub ttl: Duration,
}

impl CachedEntry {
    pub fn new(data: &str, ttl: Duration) -> Self {
        Self {
            data: Arc::from(data),
            cached_at: Instant::now(),
            ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.cached_at.elapsed() > self.ttl
    }
}

/// Single-instance store backed by a `DashMap`.
///
/// Used when Redis is disabled or unreachable; contents do not survive a
/// restart.
#[derive(Clone, Default)]
pub struct MemoryCacheStore {
    entries: Arc<DashMap<String, CachedEntry>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &VersionedKey) -> Result<Option<String>, CacheError> {
        if let Some(entry) = self.entries.get(key.as_str()) {
            if !entry.is_expired() {
                metrics::record_cache_hit("durable");
                return Ok(Some(entry.data.to_string()));
            }
            drop(entry);
            self.entries.remove(key.as_str());
        }
        metrics::record_cache_miss("durable");
        Ok(None)
    }

    async fn put(&self, key: &VersionedKey, value: &str, ttl: Duration) -> Result<(), CacheError> {
        self.entries
            .insert(key.as_str().to_string(), CachedEntry::new(value, ttl));
        tracing::debug!(key = %key, ttl_secs = ttl.as_secs(), "cache set (memory)");
        Ok(())
    }

    fn mode(&self) -> &'static str {
        "memory"
    }
}

/// Shared store backed by Redis `GET` / `SET EX`.
#[derive(Clone)]
pub struct RedisCacheStore {
    pool: Pool,
}

impl RedisCacheStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get(&self, key: &VersionedKey) -> Result<Option<String>, CacheError> {
        let mut conn = self.pool.get().await?;
        let value: Option<String> = conn.get(key.as_str()).await?;
        if value.is_some() {
            tracing::debug!(key = %key, "cache hit (redis)");
            metrics::record_cache_hit("durable");
        } else {
            tracing::debug!(key = %key, "cache miss (redis)");
            metrics::record_cache_miss("durable");
        }
        Ok(value)
    }

    async fn put(&self, key: &VersionedKey, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.pool.get().await?;
        // SET EX rejects a zero expiry
        let ttl_secs = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(key.as_str(), value, ttl_secs)
            .await?;
        tracing::debug!(key = %key, ttl_secs, "cache set (redis)");
        Ok(())
    }

    fn mode(&self) -> &'static str {
        "redis"
    }
}

/// Create the durable store based on configuration.
///
/// If Redis is disabled, or the pool cannot be created or reached, the
/// gateway falls back to the in-memory store so it can still start.
pub async fn create_cache_store(config: &RedisConfig) -> Arc<dyn CacheStore> {
    if !config.enabled {
        tracing::info!("Redis disabled, using in-memory durable cache");
        return Arc::new(MemoryCacheStore::new());
    }

    tracing::info!(url = %config.url, "Connecting to Redis");

    let mut redis_config = deadpool_redis::Config::from_url(&config.url);
    let timeout = Duration::from_millis(config.timeout_ms);
    let pool_config = redis_config
        .pool
        .get_or_insert_with(|| deadpool_redis::PoolConfig::new(config.pool_size));
    pool_config.max_size = config.pool_size;
    pool_config.timeouts.wait = Some(timeout);
    pool_config.timeouts.create = Some(timeout);
    pool_config.timeouts.recycle = Some(timeout);

    let pool = match redis_config.create_pool(Some(deadpool_redis::Runtime::Tokio1)) {
        Ok(pool) => pool,
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Failed to create Redis pool. Falling back to in-memory cache."
            );
            return Arc::new(MemoryCacheStore::new());
        }
    };

    match pool.get().await {
        Ok(_) => {
            tracing::info!("Connected to Redis");
            Arc::new(RedisCacheStore::new(pool))
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Failed to connect to Redis. Falling back to in-memory cache."
            );
            Arc::new(MemoryCacheStore::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::LogicalResource;

    #[tokio::test]
    async fn memory_store_get_put() {
        let store = MemoryCacheStore::new();
        let key = LogicalResource::Modules.key(2);

        assert_eq!(store.get(&key).await.unwrap(), None);
        store
            .put(&key, r#"{"a":1}"#, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.get(&key).await.unwrap().as_deref(), Some(r#"{"a":1}"#));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn memory_store_overwrites() {
        let store = MemoryCacheStore::new();
        let key = LogicalResource::ReleaseVersions.key(2);

        store.put(&key, "[\"1.0\"]", Duration::from_secs(60)).await.unwrap();
        store.put(&key, "[\"2.0\"]", Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.get(&key).await.unwrap().as_deref(), Some("[\"2.0\"]"));
    }

    #[tokio::test]
    async fn memory_store_expiration() {
        let store = MemoryCacheStore::new();
        let key = LogicalResource::PresetModules.key(2);

        store
            .put(&key, "{}", Duration::from_millis(50))
            .await
            .unwrap();
        assert!(store.get(&key).await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(store.get(&key).await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn protocol_versions_do_not_collide() {
        let store = MemoryCacheStore::new();
        store
            .put(&LogicalResource::Modules.key(1), "{\"old\":true}", Duration::from_secs(60))
            .await
            .unwrap();

        assert!(store.get(&LogicalResource::Modules.key(2)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn disabled_redis_uses_memory() {
        let store = create_cache_store(&RedisConfig::default()).await;
        assert_eq!(store.mode(), "memory");
    }
}
