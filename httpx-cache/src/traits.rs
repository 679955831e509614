//! Cache store trait definition.

use crate::error::CacheResult;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// A stored value together with its key and expiry.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<V> {
    /// The cache key
    pub key: String,
    /// The stored value
    pub value: V,
    /// When the entry stops being served; `None` never expires
    pub expires_at: Option<Instant>,
}

impl<V> CacheEntry<V> {
    /// Create an entry expiring `ttl` from now
    pub fn new(key: impl Into<String>, value: V, ttl: Option<Duration>) -> Self {
        Self {
            key: key.into(),
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    /// Whether the entry has expired at `now`
    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }

    /// Whether the entry has expired
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    /// Time left before expiry, `None` for entries that never expire
    pub fn remaining_ttl(&self) -> Option<Duration> {
        self.expires_at
            .map(|exp| exp.saturating_duration_since(Instant::now()))
    }
}

/// Cache store trait for different cache backends.
///
/// Implementations check expiry on read: an expired entry is never returned,
/// whether or not it has been physically removed yet.
#[async_trait]
pub trait CacheStore<V>: Send + Sync
where
    V: Clone + Send + Sync + 'static,
{
    /// Get an entry from the cache.
    ///
    /// # Returns
    ///
    /// Returns `Ok(Some(entry))` if the key exists and has not expired,
    /// `Ok(None)` otherwise, or an error if the operation fails.
    async fn get(&self, key: &str) -> CacheResult<Option<CacheEntry<V>>>;

    /// Set a value in the cache.
    ///
    /// # Arguments
    ///
    /// * `key` - The cache key
    /// * `value` - The value to store
    /// * `ttl` - Time-to-live; `None` uses the store's own default
    async fn set(&self, key: &str, value: V, ttl: Option<Duration>) -> CacheResult<()>;

    /// Delete a key from the cache.
    async fn delete(&self, key: &str) -> CacheResult<()>;

    /// Clear all keys from the cache.
    async fn clear(&self) -> CacheResult<()>;

    /// Check if a key exists in the cache.
    async fn exists(&self, key: &str) -> CacheResult<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Get the time left before `key` expires.
    ///
    /// Returns `Ok(None)` if the key has no expiration or doesn't exist.
    async fn ttl(&self, key: &str) -> CacheResult<Option<Duration>> {
        Ok(self.get(key).await?.and_then(|entry| entry.remaining_ttl()))
    }

    /// Get multiple keys concurrently, in input order.
    async fn get_many(&self, keys: &[&str]) -> CacheResult<Vec<Option<CacheEntry<V>>>> {
        use futures::future::try_join_all;

        let futures = keys.iter().map(|key| self.get(key));
        try_join_all(futures).await
    }

    /// Delete multiple keys concurrently.
    async fn delete_many(&self, keys: &[&str]) -> CacheResult<()> {
        use futures::future::try_join_all;

        let futures = keys.iter().map(|key| self.delete(key));
        try_join_all(futures).await?;
        Ok(())
    }
}

#[async_trait]
impl<V, S> CacheStore<V> for Arc<S>
where
    V: Clone + Send + Sync + 'static,
    S: CacheStore<V> + ?Sized,
{
    async fn get(&self, key: &str) -> CacheResult<Option<CacheEntry<V>>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: V, ttl: Option<Duration>) -> CacheResult<()> {
        (**self).set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        (**self).delete(key).await
    }

    async fn clear(&self) -> CacheResult<()> {
        (**self).clear().await
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        (**self).exists(key).await
    }

    async fn ttl(&self, key: &str) -> CacheResult<Option<Duration>> {
        (**self).ttl(key).await
    }
}

/// A store that never holds anything.
///
/// Useful to switch caching off without removing the stage from a pipeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCache;

#[async_trait]
impl<V> CacheStore<V> for NoopCache
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, _key: &str) -> CacheResult<Option<CacheEntry<V>>> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: V, _ttl: Option<Duration>) -> CacheResult<()> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> CacheResult<()> {
        Ok(())
    }

    async fn clear(&self) -> CacheResult<()> {
        Ok(())
    }
}
