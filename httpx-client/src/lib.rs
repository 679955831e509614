//! # httpx client
//!
//! An HTTP client whose requests flow through a composable pipeline of
//! resilience stages in front of a transport.
//!
//! ## Features
//!
//! - **Pipeline**: Middlewares wrap a [`Transport`] in registration order
//! - **Retry with Backoff**: Constant, linear, exponential and full-jitter backoff
//! - **Circuit Breaker**: Per-host breaker with lazy half-open probing
//! - **Rate Limiting**: Global or per-host token buckets
//! - **Caching**: TTL and tiered response caches for GET requests
//! - **Singleflight**: Concurrent identical GETs share one call
//! - **Auth**: Bearer, Basic, HMAC and OAuth 1.0a signing, idempotency keys
//! - **Tracing**: A span per attempt with W3C `traceparent` propagation
//! - **Deadlines**: Every wait honours the request's deadline and cancellation
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use httpx_client::{HttpClient, HttpClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = HttpClient::new(HttpClientConfig::default())?;
//!
//!     let response = client
//!         .get("https://api.example.com/users")
//!         .send()
//!         .await?;
//!
//!     println!("Status: {}", response.status());
//!     Ok(())
//! }
//! ```
//!
//! ## With Retry, Circuit Breaker and Rate Limiting
//!
//! ```rust,no_run
//! use httpx_client::{CircuitBreaker, CircuitBreakerConfig, HttpClient, HttpClientConfig, RetryPolicy};
//! use httpx_ratelimit::PerHostRateLimiter;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = HttpClientConfig::builder()
//!         .base_url("https://api.example.com")
//!         .retry(RetryPolicy::exponential(3, Duration::from_millis(100)).only_idempotent(true))
//!         .circuit_breaker(Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default())))
//!         .rate_limiter(PerHostRateLimiter::new(50.0, 10))
//!         .build();
//!
//!     let client = HttpClient::new(config)?;
//!
//!     let response = client
//!         .post("/orders")
//!         .json(&serde_json::json!({"item": "widget", "quantity": 5}))
//!         .timeout(Duration::from_secs(5))
//!         .send()
//!         .await?;
//!
//!     response.ensure_success()?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod cache;
pub mod circuit_breaker;
mod client;
mod config;
mod context;
mod error;
pub mod hooks;
pub mod middleware;
pub mod mock;
pub mod multipart;
pub mod rate_limit;
mod request;
mod response;
pub mod retry;
pub mod singleflight;
pub mod trace;
pub mod transport;

pub use auth::{BasicAuth, BearerAuth, HmacSigner, IdempotencyKey, OAuth1Signer, StaticTokenSource, TokenSource};
pub use cache::{CacheMiddleware, ResponseCache};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMiddleware, CircuitState,
};
pub use client::HttpClient;
pub use config::{HttpClientConfig, HttpClientConfigBuilder};
pub use context::RequestContext;
pub use error::{HttpClientError, Result};
pub use hooks::{LogEvent, LogHook, TracingLogHook};
pub use middleware::{
    CorrelationId, HeaderInjector, Middleware, MiddlewareChain, Next, TimeoutMiddleware, compose,
    middleware_fn,
};
pub use rate_limit::RateLimitMiddleware;
pub use request::{Body, Request, RequestBuilder, is_idempotent};
pub use response::Response;
pub use retry::{BackoffStrategy, RetryMiddleware, RetryPolicy};
pub use singleflight::SingleflightMiddleware;
pub use trace::TracingMiddleware;
pub use transport::{ReqwestTransport, Transport, transport_fn};

// Re-export common types
pub use bytes::Bytes;
pub use http::{HeaderMap, HeaderValue, Method, StatusCode, header};
pub use url::Url;

/// Prelude for common imports.
///
/// ```
/// use httpx_client::prelude::*;
/// ```
pub mod prelude {
    pub use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
    pub use crate::client::HttpClient;
    pub use crate::config::{HttpClientConfig, HttpClientConfigBuilder};
    pub use crate::context::RequestContext;
    pub use crate::error::{HttpClientError, Result};
    pub use crate::middleware::{Middleware, MiddlewareChain, Next};
    pub use crate::request::{Body, Request, RequestBuilder};
    pub use crate::response::Response;
    pub use crate::retry::{BackoffStrategy, RetryPolicy};
    pub use crate::transport::Transport;
    pub use http::{HeaderMap, HeaderValue, Method, StatusCode, header};
}
