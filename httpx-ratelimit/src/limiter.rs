//! Keyed rate limiters built on [`TokenBucket`]

use crate::bucket::TokenBucket;
use crate::error::RateLimitResult;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::debug;

/// Admission control for outbound requests.
///
/// `key` identifies the destination (usually the request host). Limiters that
/// do not distinguish destinations ignore it.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Wait until a request for `key` may proceed.
    ///
    /// Fails with [`RateLimitError::DeadlineExceeded`](crate::RateLimitError::DeadlineExceeded)
    /// without waiting when the token would arrive after `deadline`.
    async fn wait(&self, key: &str, deadline: Option<Instant>) -> RateLimitResult<()>;
}

#[async_trait]
impl<T: RateLimiter + ?Sized> RateLimiter for Arc<T> {
    async fn wait(&self, key: &str, deadline: Option<Instant>) -> RateLimitResult<()> {
        (**self).wait(key, deadline).await
    }
}

/// A single bucket shared by every destination.
#[derive(Debug)]
pub struct GlobalRateLimiter {
    bucket: TokenBucket,
}

impl GlobalRateLimiter {
    /// Create a limiter admitting `rate` requests per second with `burst` headroom.
    ///
    /// # Panics
    ///
    /// Panics if `rate` is not a positive, finite number
    pub fn new(rate: f64, burst: u32) -> Self {
        Self {
            bucket: TokenBucket::new(rate, burst),
        }
    }

    /// Get the underlying bucket
    pub fn bucket(&self) -> &TokenBucket {
        &self.bucket
    }
}

#[async_trait]
impl RateLimiter for GlobalRateLimiter {
    async fn wait(&self, _key: &str, deadline: Option<Instant>) -> RateLimitResult<()> {
        self.bucket.acquire(deadline).await
    }
}

/// Rate and burst for one bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketConfig {
    /// Tokens per second
    pub rate: f64,
    /// Maximum burst
    pub burst: u32,
}

impl BucketConfig {
    /// Create a bucket configuration
    pub fn new(rate: f64, burst: u32) -> Self {
        Self { rate, burst }
    }
}

/// One bucket per host.
///
/// Hosts listed in the overrides get their own configuration. Every other
/// host lazily gets a bucket with the default configuration.
///
/// ```rust
/// use httpx_ratelimit::{BucketConfig, PerHostRateLimiter};
///
/// let limiter = PerHostRateLimiter::new(10.0, 5)
///     .with_override("api.slow.example", BucketConfig::new(1.0, 1));
///
/// assert_eq!(limiter.config_for("api.slow.example").rate, 1.0);
/// assert_eq!(limiter.config_for("other.example").rate, 10.0);
/// ```
#[derive(Debug)]
pub struct PerHostRateLimiter {
    default: BucketConfig,
    overrides: HashMap<String, BucketConfig>,
    buckets: DashMap<String, Arc<TokenBucket>>,
}

impl PerHostRateLimiter {
    /// Create a limiter whose hosts each get `rate`/`burst` unless overridden.
    ///
    /// # Panics
    ///
    /// Panics if `rate` is not a positive, finite number
    pub fn new(rate: f64, burst: u32) -> Self {
        assert!(
            rate.is_finite() && rate > 0.0,
            "Rate must be a positive, finite number"
        );
        Self {
            default: BucketConfig::new(rate, burst),
            overrides: HashMap::new(),
            buckets: DashMap::new(),
        }
    }

    /// Give `host` its own rate and burst.
    ///
    /// # Panics
    ///
    /// Panics if the override rate is not a positive, finite number
    pub fn with_override(mut self, host: impl Into<String>, config: BucketConfig) -> Self {
        assert!(
            config.rate.is_finite() && config.rate > 0.0,
            "Rate must be a positive, finite number"
        );
        let host = host.into();
        self.buckets.remove(&host);
        self.overrides.insert(host, config);
        self
    }

    /// Add several overrides at once
    pub fn with_overrides<I, S>(self, overrides: I) -> Self
    where
        I: IntoIterator<Item = (S, BucketConfig)>,
        S: Into<String>,
    {
        overrides
            .into_iter()
            .fold(self, |limiter, (host, config)| limiter.with_override(host, config))
    }

    /// Configuration that applies to `host`
    pub fn config_for(&self, host: &str) -> BucketConfig {
        self.overrides.get(host).copied().unwrap_or(self.default)
    }

    /// Number of hosts with a live bucket
    pub fn tracked_hosts(&self) -> usize {
        self.buckets.len()
    }

    fn bucket_for(&self, host: &str) -> Arc<TokenBucket> {
        if let Some(bucket) = self.buckets.get(host) {
            return bucket.clone();
        }

        self.buckets
            .entry(host.to_string())
            .or_insert_with(|| {
                let config = self.config_for(host);
                debug!(host = %host, rate = config.rate, burst = config.burst, "Creating rate limit bucket");
                Arc::new(TokenBucket::new(config.rate, config.burst))
            })
            .clone()
    }
}

#[async_trait]
impl RateLimiter for PerHostRateLimiter {
    async fn wait(&self, key: &str, deadline: Option<Instant>) -> RateLimitResult<()> {
        let bucket = self.bucket_for(key);
        bucket.acquire(deadline).await
    }
}
