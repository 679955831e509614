//! In-process TTL store

use crate::error::CacheResult;
use crate::traits::{CacheEntry, CacheStore};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::trace;

/// In-memory cache with a default time-to-live.
///
/// Expiry is checked lazily on read. [`purge_expired`](Self::purge_expired)
/// reclaims memory from stale entries but never changes what a read returns.
///
/// ```rust
/// use httpx_cache::{CacheStore, MemoryCache};
/// use std::time::Duration;
///
/// # async fn example() -> httpx_cache::CacheResult<()> {
/// let cache: MemoryCache<String> = MemoryCache::new(Duration::from_secs(60));
/// cache.set("user:1", "alice".to_string(), None).await?;
///
/// let entry = cache.get("user:1").await?.unwrap();
/// assert_eq!(entry.value, "alice");
/// # Ok(())
/// # }
/// ```
pub struct MemoryCache<V> {
    data: Arc<RwLock<HashMap<String, CacheEntry<V>>>>,
    default_ttl: Option<Duration>,
}

impl<V> MemoryCache<V> {
    /// Create a cache whose entries live for `default_ttl` unless told otherwise
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
            default_ttl: Some(default_ttl),
        }
    }

    /// Create a cache whose entries only expire when given an explicit TTL
    pub fn without_expiry() -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
            default_ttl: None,
        }
    }

    /// Get the default TTL
    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl
    }

    /// Number of stored entries, expired or not
    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    /// Whether nothing is stored
    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }

    /// Remove expired entries, returning how many were dropped
    pub async fn purge_expired(&self) -> usize {
        let mut data = self.data.write().await;
        let now = Instant::now();
        let before = data.len();
        data.retain(|_, entry| !entry.is_expired_at(now));
        before - data.len()
    }
}

impl<V> Clone for MemoryCache<V> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            default_ttl: self.default_ttl,
        }
    }
}

impl<V> Default for MemoryCache<V> {
    fn default() -> Self {
        Self::without_expiry()
    }
}

impl<V> std::fmt::Debug for MemoryCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCache")
            .field("default_ttl", &self.default_ttl)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<V> CacheStore<V> for MemoryCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> CacheResult<Option<CacheEntry<V>>> {
        let data = self.data.read().await;
        match data.get(key) {
            Some(entry) if !entry.is_expired() => Ok(Some(entry.clone())),
            Some(_) => {
                trace!(key = %key, "Cache entry expired");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: V, ttl: Option<Duration>) -> CacheResult<()> {
        let entry = CacheEntry::new(key, value, ttl.or(self.default_ttl));
        self.data.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.data.write().await.remove(key);
        Ok(())
    }

    async fn clear(&self) -> CacheResult<()> {
        self.data.write().await.clear();
        Ok(())
    }
}
