//! Multi-tier caching (L1/L2 cache layers)

use crate::error::CacheResult;
use crate::traits::{CacheEntry, CacheStore};
use async_trait::async_trait;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Multi-tier cache with a fast L1 layer in front of a slower L2 layer.
///
/// A read that misses L1 but hits L2 back-fills L1 before returning. The
/// back-filled entry lives for L1's own default TTL, not whatever is left of
/// the L2 entry.
pub struct TieredCache<V, L1, L2> {
    /// L1 cache (fast, short-lived)
    l1: Arc<L1>,

    /// L2 cache (slower, long-lived)
    l2: Arc<L2>,

    /// Configuration
    config: TieredCacheConfig,

    stats: Arc<TierCounters>,

    _value: PhantomData<fn() -> V>,
}

/// Tiered cache configuration
#[derive(Debug, Clone)]
pub struct TieredCacheConfig {
    /// Enable L1 cache
    pub enable_l1: bool,

    /// Enable L2 cache
    pub enable_l2: bool,

    /// Write to L1 as well as L2 on set
    pub write_through: bool,

    /// Back-fill L1 on L2 hits
    pub promote_to_l1: bool,
}

impl Default for TieredCacheConfig {
    fn default() -> Self {
        Self {
            enable_l1: true,
            enable_l2: true,
            write_through: true,
            promote_to_l1: true,
        }
    }
}

#[derive(Debug, Default)]
struct TierCounters {
    l1_hits: AtomicU64,
    l2_hits: AtomicU64,
    misses: AtomicU64,
}

impl<V, L1, L2> TieredCache<V, L1, L2>
where
    V: Clone + Send + Sync + 'static,
    L1: CacheStore<V>,
    L2: CacheStore<V>,
{
    /// Create new tiered cache
    ///
    /// # Examples
    ///
    /// ```rust
    /// use httpx_cache::{MemoryCache, TieredCache};
    /// use std::sync::Arc;
    /// use std::time::Duration;
    ///
    /// let l1 = Arc::new(MemoryCache::<String>::new(Duration::from_secs(30)));
    /// let l2 = Arc::new(MemoryCache::<String>::new(Duration::from_secs(300)));
    /// let cache: TieredCache<String, _, _> = TieredCache::new(l1, l2);
    /// ```
    pub fn new(l1: Arc<L1>, l2: Arc<L2>) -> Self {
        Self::with_config(l1, l2, TieredCacheConfig::default())
    }

    /// Create with custom configuration
    pub fn with_config(l1: Arc<L1>, l2: Arc<L2>, config: TieredCacheConfig) -> Self {
        Self {
            l1,
            l2,
            config,
            stats: Arc::new(TierCounters::default()),
            _value: PhantomData,
        }
    }

    /// Get the L1 tier
    pub fn l1(&self) -> &Arc<L1> {
        &self.l1
    }

    /// Get the L2 tier
    pub fn l2(&self) -> &Arc<L2> {
        &self.l2
    }

    /// Get the configuration
    pub fn config(&self) -> &TieredCacheConfig {
        &self.config
    }

    /// Get hit/miss statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            l1_hits: self.stats.l1_hits.load(Ordering::Relaxed),
            l2_hits: self.stats.l2_hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl<V, L1, L2> CacheStore<V> for TieredCache<V, L1, L2>
where
    V: Clone + Send + Sync + 'static,
    L1: CacheStore<V>,
    L2: CacheStore<V>,
{
    /// Get value from cache (checks L1 then L2)
    async fn get(&self, key: &str) -> CacheResult<Option<CacheEntry<V>>> {
        // Try L1 first
        if self.config.enable_l1
            && let Some(entry) = self.l1.get(key).await?
        {
            self.stats.l1_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(entry));
        }

        // Try L2
        if self.config.enable_l2
            && let Some(entry) = self.l2.get(key).await?
        {
            self.stats.l2_hits.fetch_add(1, Ordering::Relaxed);

            if self.config.enable_l1 && self.config.promote_to_l1 {
                debug!(key = %key, "Back-filling L1 from L2");
                if let Err(e) = self.l1.set(key, entry.value.clone(), None).await {
                    warn!(key = %key, error = %e, "Failed to back-fill L1");
                }
            }
            return Ok(Some(entry));
        }

        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }

    /// Set value in cache (writes to L2, then L1 with its own TTL)
    async fn set(&self, key: &str, value: V, ttl: Option<Duration>) -> CacheResult<()> {
        // Write to L2 first (source of truth)
        if self.config.enable_l2 {
            self.l2.set(key, value.clone(), ttl).await?;
        }

        if self.config.enable_l1 && (self.config.write_through || !self.config.enable_l2) {
            self.l1.set(key, value, None).await?;
        }

        Ok(())
    }

    /// Delete from both L1 and L2
    async fn delete(&self, key: &str) -> CacheResult<()> {
        if self.config.enable_l1 {
            self.l1.delete(key).await?;
        }
        if self.config.enable_l2 {
            self.l2.delete(key).await?;
        }
        Ok(())
    }

    /// Clear both L1 and L2
    async fn clear(&self) -> CacheResult<()> {
        if self.config.enable_l1 {
            self.l1.clear().await?;
        }
        if self.config.enable_l2 {
            self.l2.clear().await?;
        }
        Ok(())
    }
}

impl<V, L1, L2> Clone for TieredCache<V, L1, L2> {
    fn clone(&self) -> Self {
        Self {
            l1: self.l1.clone(),
            l2: self.l2.clone(),
            config: self.config.clone(),
            stats: self.stats.clone(),
            _value: PhantomData,
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub l1_hits: u64,
    pub l2_hits: u64,
    pub misses: u64,
}

#[cfg(test)]
mod tests_tiered {
    use super::*;
    use crate::memory::MemoryCache;

    fn tiers() -> (Arc<MemoryCache<String>>, Arc<MemoryCache<String>>) {
        (
            Arc::new(MemoryCache::new(Duration::from_secs(30))),
            Arc::new(MemoryCache::new(Duration::from_secs(300))),
        )
    }

    #[tokio::test]
    async fn test_tiered_cache() {
        let (l1, l2) = tiers();
        let cache = TieredCache::new(l1.clone(), l2.clone());

        // Set value
        cache.set("test", "value".to_string(), None).await.unwrap();

        // Written to both tiers
        assert!(l1.get("test").await.unwrap().is_some());
        assert!(l2.get("test").await.unwrap().is_some());

        // Get from tiered cache
        let entry = cache.get("test").await.unwrap().unwrap();
        assert_eq!(entry.value, "value");

        // Delete
        cache.delete("test").await.unwrap();
        assert!(cache.get("test").await.unwrap().is_none());
        assert!(l2.get("test").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_l2_backfill_uses_l1_ttl() {
        let (l1, l2) = tiers();
        let cache = TieredCache::new(l1.clone(), l2.clone());

        cache.set("key", "value".to_string(), None).await.unwrap();
        l1.delete("key").await.unwrap();

        tokio::time::advance(Duration::from_secs(100)).await;

        // L1 miss, L2 hit: value comes back and L1 is re-populated
        let entry = cache.get("key").await.unwrap().unwrap();
        assert_eq!(entry.value, "value");

        let backfilled = l1.get("key").await.unwrap().unwrap();
        assert_eq!(backfilled.value, "value");
        assert_eq!(backfilled.remaining_ttl(), Some(Duration::from_secs(30)));

        assert_eq!(
            cache.stats(),
            CacheStats {
                l1_hits: 0,
                l2_hits: 1,
                misses: 0
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_l1_expiry_falls_back_to_l2() {
        let (l1, l2) = tiers();
        let cache = TieredCache::new(l1.clone(), l2);

        cache.set("key", "value".to_string(), None).await.unwrap();
        tokio::time::advance(Duration::from_secs(31)).await;

        assert!(l1.get("key").await.unwrap().is_none());
        assert!(cache.get("key").await.unwrap().is_some());
        assert!(l1.get("key").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_no_promotion_when_disabled() {
        let (l1, l2) = tiers();
        let config = TieredCacheConfig {
            promote_to_l1: false,
            ..Default::default()
        };
        let cache: TieredCache<String, _, _> = TieredCache::with_config(l1.clone(), l2.clone(), config);

        l2.set("key", "value".to_string(), None).await.unwrap();
        assert!(cache.get("key").await.unwrap().is_some());
        assert!(l1.get("key").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_miss_in_both_tiers() {
        let (l1, l2) = tiers();
        let cache: TieredCache<String, _, _> = TieredCache::new(l1, l2);

        assert!(cache.get("missing").await.unwrap().is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test]
    async fn test_clear_both_tiers() {
        let (l1, l2) = tiers();
        let cache = TieredCache::new(l1.clone(), l2.clone());

        cache.set("a", "1".to_string(), None).await.unwrap();
        cache.clear().await.unwrap();

        assert!(l1.is_empty().await);
        assert!(l2.is_empty().await);
    }
}
