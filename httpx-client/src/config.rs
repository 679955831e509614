//! HTTP client configuration.

use crate::cache::ResponseCache;
use crate::circuit_breaker::CircuitBreaker;
use crate::hooks::{AfterResponseHook, BeforeRequestHook, LogHook};
use crate::middleware::Middleware;
use crate::retry::RetryPolicy;
use crate::transport::Transport;
use crate::{Request, Response, Result};
use httpx_cache::CacheStore;
use httpx_ratelimit::RateLimiter;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// HTTP client configuration.
#[derive(Clone)]
pub struct HttpClientConfig {
    /// Base URL for all requests.
    pub base_url: Option<String>,
    /// Default request timeout.
    pub timeout: Duration,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Retry policy.
    pub retry: Option<RetryPolicy>,
    /// Circuit breaker shared by every request, keyed by host.
    pub circuit_breaker: Option<Arc<CircuitBreaker>>,
    /// Rate limiter, keyed by host.
    pub rate_limiter: Option<Arc<dyn RateLimiter>>,
    /// Response cache for GET requests.
    pub cache: Option<ResponseCache>,
    /// TTL for cached responses; `None` uses the store's default.
    pub cache_ttl: Option<Duration>,
    /// Coalesce concurrent identical GET requests.
    pub singleflight: bool,
    /// User middlewares, outermost first.
    pub middlewares: Vec<Arc<dyn Middleware>>,
    /// Hooks run before each call.
    pub before_request: Vec<BeforeRequestHook>,
    /// Hooks run after each call.
    pub after_response: Vec<AfterResponseHook>,
    /// Receives one event per call.
    pub log_hook: Option<Arc<dyn LogHook>>,
    /// Transport at the end of the pipeline; `None` builds a reqwest client.
    pub transport: Option<Arc<dyn Transport>>,
    /// Connection pool idle timeout.
    pub pool_idle_timeout: Duration,
    /// Maximum idle connections per host.
    pub pool_max_idle_per_host: usize,
    /// Default headers for all requests.
    pub default_headers: Vec<(String, String)>,
    /// User agent string.
    pub user_agent: String,
    /// Enable gzip compression.
    pub gzip: bool,
    /// Enable brotli compression.
    pub brotli: bool,
    /// Follow redirects.
    pub follow_redirects: bool,
    /// Maximum redirects to follow.
    pub max_redirects: usize,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            retry: None,
            circuit_breaker: None,
            rate_limiter: None,
            cache: None,
            cache_ttl: None,
            singleflight: false,
            middlewares: Vec::new(),
            before_request: Vec::new(),
            after_response: Vec::new(),
            log_hook: None,
            transport: None,
            pool_idle_timeout: Duration::from_secs(90),
            pool_max_idle_per_host: 32,
            default_headers: Vec::new(),
            user_agent: format!("httpx/{}", env!("CARGO_PKG_VERSION")),
            gzip: true,
            brotli: true,
            follow_redirects: true,
            max_redirects: 10,
        }
    }
}

impl HttpClientConfig {
    /// Create a new configuration builder.
    pub fn builder() -> HttpClientConfigBuilder {
        HttpClientConfigBuilder::default()
    }
}

impl fmt::Debug for HttpClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClientConfig")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("retry", &self.retry)
            .field("circuit_breaker", &self.circuit_breaker)
            .field("rate_limiter", &self.rate_limiter.is_some())
            .field("cache", &self.cache.is_some())
            .field("cache_ttl", &self.cache_ttl)
            .field("singleflight", &self.singleflight)
            .field("middlewares", &self.middlewares.len())
            .field("before_request", &self.before_request.len())
            .field("after_response", &self.after_response.len())
            .field("log_hook", &self.log_hook.is_some())
            .field("custom_transport", &self.transport.is_some())
            .field("default_headers", &self.default_headers)
            .field("user_agent", &self.user_agent)
            .finish_non_exhaustive()
    }
}

/// Builder for HTTP client configuration.
#[derive(Debug, Default)]
pub struct HttpClientConfigBuilder {
    config: HttpClientConfig,
}

impl HttpClientConfigBuilder {
    /// Set the base URL for all requests.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = Some(url.into());
        self
    }

    /// Set the default request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the retry policy.
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = Some(policy);
        self
    }

    /// Guard requests with a circuit breaker.
    pub fn circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.config.circuit_breaker = Some(breaker);
        self
    }

    /// Throttle requests with a rate limiter.
    pub fn rate_limiter<L: RateLimiter + 'static>(mut self, limiter: L) -> Self {
        self.config.rate_limiter = Some(Arc::new(limiter));
        self
    }

    /// Cache GET responses in `store`.
    pub fn cache<S: CacheStore<Response> + 'static>(mut self, store: S) -> Self {
        self.config.cache = Some(Arc::new(store));
        self
    }

    /// Override the TTL of cached responses.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.config.cache_ttl = Some(ttl);
        self
    }

    /// Enable or disable coalescing of concurrent identical GET requests.
    pub fn singleflight(mut self, enable: bool) -> Self {
        self.config.singleflight = enable;
        self
    }

    /// Add a middleware. Middlewares run in registration order.
    pub fn middleware<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.config.middlewares.push(Arc::new(middleware));
        self
    }

    /// Run `hook` before each call.
    pub fn before_request<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut Request) -> Result<()> + Send + Sync + 'static,
    {
        self.config.before_request.push(Arc::new(hook));
        self
    }

    /// Run `hook` after each call.
    pub fn after_response<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Request, &Result<Response>) + Send + Sync + 'static,
    {
        self.config.after_response.push(Arc::new(hook));
        self
    }

    /// Receive one [`LogEvent`](crate::LogEvent) per call.
    pub fn log_hook<H: LogHook + 'static>(mut self, hook: H) -> Self {
        self.config.log_hook = Some(Arc::new(hook));
        self
    }

    /// Send requests through `transport` instead of the network.
    pub fn transport<T: Transport + 'static>(mut self, transport: T) -> Self {
        self.config.transport = Some(Arc::new(transport));
        self
    }

    /// Set the connection pool idle timeout.
    pub fn pool_idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.pool_idle_timeout = timeout;
        self
    }

    /// Set the maximum idle connections per host.
    pub fn pool_max_idle_per_host(mut self, max: usize) -> Self {
        self.config.pool_max_idle_per_host = max;
        self
    }

    /// Add a default header for all requests.
    pub fn default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.default_headers.push((name.into(), value.into()));
        self
    }

    /// Set the user agent string.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Enable or disable gzip compression.
    pub fn gzip(mut self, enable: bool) -> Self {
        self.config.gzip = enable;
        self
    }

    /// Enable or disable brotli compression.
    pub fn brotli(mut self, enable: bool) -> Self {
        self.config.brotli = enable;
        self
    }

    /// Enable or disable following redirects.
    pub fn follow_redirects(mut self, enable: bool) -> Self {
        self.config.follow_redirects = enable;
        self
    }

    /// Set the maximum number of redirects to follow.
    pub fn max_redirects(mut self, max: usize) -> Self {
        self.config.max_redirects = max;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> HttpClientConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitBreakerConfig;
    use crate::mock::MockTransport;
    use httpx_cache::MemoryCache;
    use httpx_ratelimit::GlobalRateLimiter;

    #[test]
    fn test_defaults() {
        let config = HttpClientConfig::default();
        assert!(config.base_url.is_none());
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert!(config.retry.is_none());
        assert!(!config.singleflight);
        assert!(config.user_agent.starts_with("httpx/"));
    }

    #[test]
    fn test_builder_sets_every_stage() {
        let config = HttpClientConfig::builder()
            .base_url("http://api.test")
            .timeout(Duration::from_secs(5))
            .retry(RetryPolicy::default())
            .circuit_breaker(Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default())))
            .rate_limiter(GlobalRateLimiter::new(10.0, 5))
            .cache(MemoryCache::<Response>::new(Duration::from_secs(60)))
            .cache_ttl(Duration::from_secs(10))
            .singleflight(true)
            .middleware(crate::middleware::CorrelationId::new())
            .before_request(|_| Ok(()))
            .after_response(|_, _| {})
            .log_hook(crate::hooks::TracingLogHook)
            .transport(MockTransport::new())
            .default_header("X-Api-Version", "2")
            .build();

        assert_eq!(config.base_url.as_deref(), Some("http://api.test"));
        assert!(config.retry.is_some());
        assert!(config.circuit_breaker.is_some());
        assert!(config.rate_limiter.is_some());
        assert!(config.cache.is_some());
        assert_eq!(config.cache_ttl, Some(Duration::from_secs(10)));
        assert!(config.singleflight);
        assert_eq!(config.middlewares.len(), 1);
        assert_eq!(config.before_request.len(), 1);
        assert_eq!(config.after_response.len(), 1);
        assert!(config.log_hook.is_some());
        assert!(config.transport.is_some());
        assert_eq!(config.default_headers.len(), 1);

        // Debug must not require the trait objects to be Debug
        assert!(format!("{config:?}").contains("api.test"));
    }
}
