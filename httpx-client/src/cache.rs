//! Response caching stage.

use crate::middleware::{Middleware, Next};
use crate::{Request, Response, Result};
use async_trait::async_trait;
use http::Method;
use httpx_cache::CacheStore;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Shared response store used by the cache stage.
pub type ResponseCache = Arc<dyn CacheStore<Response>>;

/// Serves GET requests from a [`CacheStore`].
///
/// The key is the fully resolved URL. Only 2xx responses are stored. Other
/// methods pass straight through without reading or writing the store. A
/// failing store is logged and treated as a miss.
#[derive(Clone)]
pub struct CacheMiddleware {
    store: ResponseCache,
    ttl: Option<Duration>,
}

impl CacheMiddleware {
    /// Cache responses in `store` using the store's default TTL.
    pub fn new(store: ResponseCache) -> Self {
        Self { store, ttl: None }
    }

    /// Override the TTL passed to the store.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Get the store.
    pub fn store(&self) -> &ResponseCache {
        &self.store
    }

    /// The cache key for `request`.
    pub fn key_for(request: &Request) -> String {
        request.url().as_str().to_string()
    }
}

impl fmt::Debug for CacheMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheMiddleware")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Middleware for CacheMiddleware {
    async fn handle(&self, request: Request, next: Next) -> Result<Response> {
        if request.method() != Method::GET {
            return next.run(request).await;
        }

        let key = Self::key_for(&request);
        match self.store.get(&key).await {
            Ok(Some(entry)) => {
                debug!(key = %key, "Cache hit");
                return Ok(entry.value);
            }
            Ok(None) => debug!(key = %key, "Cache miss"),
            Err(e) => warn!(key = %key, error = %e, "Cache read failed, treating as miss"),
        }

        let response = next.run(request).await?;

        if response.is_success()
            && let Err(e) = self.store.set(&key, response.clone(), self.ttl).await
        {
            warn!(key = %key, error = %e, "Cache write failed");
        }

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::MiddlewareChain;
    use crate::mock::{MockResponse, MockTransport};
    use httpx_cache::{CacheEntry, CacheError, CacheResult, MemoryCache, TieredCache};

    fn chain(mock: &Arc<MockTransport>, store: ResponseCache) -> MiddlewareChain {
        MiddlewareChain::from_transport(mock.clone()).with_middleware(CacheMiddleware::new(store))
    }

    fn request(method: Method, path: &str) -> Request {
        Request::parse(method, &format!("http://api.test{path}")).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_hit_within_ttl_and_expiry() {
        let mock = Arc::new(MockTransport::new());
        mock.on_get("/users", MockResponse::new(200).with_body("[]"));
        let store: MemoryCache<Response> = MemoryCache::new(Duration::from_secs(60));
        let chain = chain(&mock, Arc::new(store));

        let first = chain.execute(request(Method::GET, "/users")).await.unwrap();
        let second = chain.execute(request(Method::GET, "/users")).await.unwrap();
        assert_eq!(mock.call_count(), 1);
        assert_eq!(first.bytes(), second.bytes());

        tokio::time::advance(Duration::from_secs(61)).await;
        chain.execute(request(Method::GET, "/users")).await.unwrap();
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn test_delete_forces_refetch() {
        let mock = Arc::new(MockTransport::new());
        let store = Arc::new(MemoryCache::<Response>::without_expiry());
        let chain = chain(&mock, store.clone());

        chain.execute(request(Method::GET, "/a?x=1")).await.unwrap();
        chain.execute(request(Method::GET, "/a?x=1")).await.unwrap();
        assert_eq!(mock.call_count(), 1);

        store.delete("http://api.test/a?x=1").await.unwrap();
        chain.execute(request(Method::GET, "/a?x=1")).await.unwrap();
        assert_eq!(mock.call_count(), 2);

        // Query string is part of the key
        chain.execute(request(Method::GET, "/a?x=2")).await.unwrap();
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn test_post_bypasses_cache() {
        let mock = Arc::new(MockTransport::new());
        mock.on_post("/users", MockResponse::new(201));
        let store = Arc::new(MemoryCache::<Response>::without_expiry());
        let chain = chain(&mock, store.clone());

        chain.execute(request(Method::POST, "/users")).await.unwrap();
        chain.execute(request(Method::POST, "/users")).await.unwrap();

        assert_eq!(mock.call_count(), 2);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let mock = Arc::new(MockTransport::new());
        mock.on_get("/flaky", MockResponse::new(503));
        let chain = chain(&mock, Arc::new(MemoryCache::<Response>::without_expiry()));

        chain.execute(request(Method::GET, "/flaky")).await.unwrap();
        chain.execute(request(Method::GET, "/flaky")).await.unwrap();
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn test_tiered_backfill_from_l2() {
        let mock = Arc::new(MockTransport::new());
        mock.on_get("/config", MockResponse::new(200).with_body("v1"));

        let l1 = Arc::new(MemoryCache::<Response>::new(Duration::from_secs(5)));
        let l2 = Arc::new(MemoryCache::<Response>::new(Duration::from_secs(300)));
        let tiered: TieredCache<Response, _, _> = TieredCache::new(l1.clone(), l2.clone());
        let chain = chain(&mock, Arc::new(tiered));

        chain.execute(request(Method::GET, "/config")).await.unwrap();
        assert_eq!(mock.call_count(), 1);

        l1.delete("http://api.test/config").await.unwrap();
        let response = chain.execute(request(Method::GET, "/config")).await.unwrap();

        assert_eq!(mock.call_count(), 1);
        assert_eq!(response.text().unwrap(), "v1");
        assert!(l1.exists("http://api.test/config").await.unwrap());
    }

    struct BrokenStore;

    #[async_trait]
    impl CacheStore<Response> for BrokenStore {
        async fn get(&self, _key: &str) -> CacheResult<Option<CacheEntry<Response>>> {
            Err(CacheError::Connection("unreachable".into()))
        }

        async fn set(&self, _key: &str, _value: Response, _ttl: Option<Duration>) -> CacheResult<()> {
            Err(CacheError::Connection("unreachable".into()))
        }

        async fn delete(&self, _key: &str) -> CacheResult<()> {
            Ok(())
        }

        async fn clear(&self) -> CacheResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_store_errors_are_misses() {
        let mock = Arc::new(MockTransport::new());
        let chain = chain(&mock, Arc::new(BrokenStore));

        assert!(chain.execute(request(Method::GET, "/")).await.is_ok());
        assert!(chain.execute(request(Method::GET, "/")).await.is_ok());
        assert_eq!(mock.call_count(), 2);
    }
}
