//! HTTP client implementation.

use crate::cache::CacheMiddleware;
use crate::circuit_breaker::CircuitBreakerMiddleware;
use crate::hooks::LogEvent;
use crate::middleware::{Middleware, MiddlewareChain, compose};
use crate::rate_limit::RateLimitMiddleware;
use crate::retry::RetryMiddleware;
use crate::singleflight::SingleflightMiddleware;
use crate::transport::{ReqwestTransport, Transport};
use crate::{HttpClientConfig, HttpClientError, Request, RequestBuilder, Response, Result};
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::debug;

/// HTTP client running every request through a configurable pipeline.
///
/// The pipeline is assembled once, outermost stage first:
///
/// ```text
/// cache -> singleflight -> circuit breaker -> retry -> rate limiter
///       -> user middlewares -> transport
/// ```
///
/// Stages that are not configured are left out. Before/after hooks and the
/// log hook wrap the whole pipeline and run once per call.
#[derive(Clone)]
pub struct HttpClient {
    pipeline: MiddlewareChain,
    config: Arc<HttpClientConfig>,
    default_headers: Arc<HeaderMap>,
}

impl HttpClient {
    /// Create a new HTTP client with the given configuration.
    ///
    /// Fails if a default header is invalid or the network client cannot be built.
    pub fn new(config: HttpClientConfig) -> Result<Self> {
        let default_headers = parse_headers(&config.default_headers)?;

        let transport: Arc<dyn Transport> = match &config.transport {
            Some(transport) => transport.clone(),
            None => Arc::new(ReqwestTransport::from_config(&config)?),
        };

        let mut stages: Vec<Arc<dyn Middleware>> = Vec::new();

        if let Some(store) = &config.cache {
            let mut cache = CacheMiddleware::new(store.clone());
            if let Some(ttl) = config.cache_ttl {
                cache = cache.with_ttl(ttl);
            }
            stages.push(Arc::new(cache));
        }
        if config.singleflight {
            stages.push(Arc::new(SingleflightMiddleware::new()));
        }
        if let Some(breaker) = &config.circuit_breaker {
            stages.push(Arc::new(CircuitBreakerMiddleware::new(breaker.clone())));
        }
        if let Some(policy) = &config.retry {
            stages.push(Arc::new(RetryMiddleware::new(policy.clone())));
        }
        if let Some(limiter) = &config.rate_limiter {
            stages.push(Arc::new(RateLimitMiddleware::new(limiter.clone())));
        }
        stages.extend(config.middlewares.iter().cloned());

        debug!(stages = stages.len(), "Building HTTP client pipeline");

        Ok(Self {
            pipeline: compose(stages, transport),
            config: Arc::new(config),
            default_headers: Arc::new(default_headers),
        })
    }

    /// Create a new HTTP client with default configuration.
    pub fn default_client() -> Result<Self> {
        Self::new(HttpClientConfig::default())
    }

    /// Get the client configuration.
    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }

    /// Headers added to every request.
    pub fn default_headers(&self) -> &HeaderMap {
        &self.default_headers
    }

    /// The assembled pipeline.
    pub fn pipeline(&self) -> &MiddlewareChain {
        &self.pipeline
    }

    /// Create a GET request builder.
    pub fn get(&self, url: impl Into<String>) -> RequestBuilder<'_> {
        RequestBuilder::new(self, Method::GET, url.into())
    }

    /// Create a POST request builder.
    pub fn post(&self, url: impl Into<String>) -> RequestBuilder<'_> {
        RequestBuilder::new(self, Method::POST, url.into())
    }

    /// Create a PUT request builder.
    pub fn put(&self, url: impl Into<String>) -> RequestBuilder<'_> {
        RequestBuilder::new(self, Method::PUT, url.into())
    }

    /// Create a PATCH request builder.
    pub fn patch(&self, url: impl Into<String>) -> RequestBuilder<'_> {
        RequestBuilder::new(self, Method::PATCH, url.into())
    }

    /// Create a DELETE request builder.
    pub fn delete(&self, url: impl Into<String>) -> RequestBuilder<'_> {
        RequestBuilder::new(self, Method::DELETE, url.into())
    }

    /// Create a HEAD request builder.
    pub fn head(&self, url: impl Into<String>) -> RequestBuilder<'_> {
        RequestBuilder::new(self, Method::HEAD, url.into())
    }

    /// Create a request builder with a custom method.
    pub fn request(&self, method: Method, url: impl Into<String>) -> RequestBuilder<'_> {
        RequestBuilder::new(self, method, url.into())
    }

    /// Send a built request through the hooks and the pipeline.
    ///
    /// Non-2xx responses are returned as responses, not errors. A request
    /// whose context is already cancelled or expired is never sent.
    pub async fn execute(&self, mut request: Request) -> Result<Response> {
        for hook in &self.config.before_request {
            hook(&mut request)?;
        }
        request.context().check()?;

        let start = Instant::now();
        let outcome = self.pipeline.execute(request.clone()).await;
        let elapsed = start.elapsed();

        for hook in &self.config.after_response {
            hook(&request, &outcome);
        }
        if let Some(log) = &self.config.log_hook {
            log.log(&LogEvent::new(&request, &outcome, elapsed));
        }

        outcome
    }

    /// GET `url` and parse a successful JSON response.
    pub async fn get_json<T: DeserializeOwned>(&self, url: impl Into<String>) -> Result<T> {
        self.get(url)
            .accept("application/json")
            .send()
            .await?
            .error_for_status()?
            .json()
    }

    /// POST `body` as JSON and parse a successful JSON response.
    pub async fn post_json<B, T>(&self, url: impl Into<String>, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.post(url)
            .accept("application/json")
            .json(body)
            .send()
            .await?
            .error_for_status()?
            .json()
    }

    /// PUT `body` as JSON and parse a successful JSON response.
    pub async fn put_json<B, T>(&self, url: impl Into<String>, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.put(url)
            .accept("application/json")
            .json(body)
            .send()
            .await?
            .error_for_status()?
            .json()
    }
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("config", &self.config)
            .field("stages", &self.pipeline.len())
            .finish()
    }
}

fn parse_headers(pairs: &[(String, String)]) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        let name = HeaderName::try_from(name.as_str())
            .map_err(|e| HttpClientError::RequestBuild(e.to_string()))?;
        let value = HeaderValue::try_from(value.as_str())
            .map_err(|e| HttpClientError::RequestBuild(e.to_string()))?;
        headers.append(name, value);
    }
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::IdempotencyKey;
    use crate::hooks::LogEvent;
    use crate::mock::{MockResponse, MockTransport};
    use crate::retry::{RetryPolicy, retry_on_status_5xx};
    use parking_lot::Mutex;
    use serde::Deserialize;
    use std::time::Duration;

    fn mock_client(mock: &Arc<MockTransport>) -> HttpClientConfig {
        HttpClientConfig::builder()
            .base_url("http://api.test/v1/")
            .transport(mock.clone())
            .build()
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct User {
        id: u64,
        name: String,
    }

    #[test]
    fn test_client_creation() {
        let client = HttpClient::default_client().unwrap();
        assert!(client.config().gzip);
        assert!(client.config().brotli);
        assert!(client.pipeline().is_empty());
    }

    #[test]
    fn test_client_with_config() {
        let config = HttpClientConfig::builder()
            .timeout(Duration::from_secs(60))
            .base_url("https://api.example.com")
            .default_header("X-Api-Version", "2")
            .build();

        let client = HttpClient::new(config).unwrap();
        assert_eq!(client.config().timeout, Duration::from_secs(60));
        assert_eq!(
            client.config().base_url.as_deref(),
            Some("https://api.example.com")
        );
        assert_eq!(client.default_headers()["x-api-version"], "2");
    }

    #[test]
    fn test_invalid_default_header() {
        let config = HttpClientConfig::builder()
            .default_header("bad header", "x")
            .build();
        assert!(matches!(
            HttpClient::new(config),
            Err(HttpClientError::RequestBuild(_))
        ));
    }

    #[tokio::test]
    async fn test_builder_sends_through_pipeline() {
        let mock = Arc::new(MockTransport::new());
        let client = HttpClient::new(
            HttpClientConfig::builder()
                .base_url("http://api.test/v1/")
                .default_header("X-Client", "httpx")
                .transport(mock.clone())
                .build(),
        )
        .unwrap();

        let response = client
            .get("/users")
            .query("page", "2")
            .header("X-Client", "override")
            .bearer_token("t0k")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status_code(), 404);

        let sent = &mock.requests()[0];
        assert_eq!(sent.url().as_str(), "http://api.test/v1/users?page=2");
        assert_eq!(sent.header("x-client"), Some("override"));
        assert_eq!(sent.header("authorization"), Some("Bearer t0k"));
    }

    #[tokio::test]
    async fn test_json_helpers() {
        let mock = Arc::new(MockTransport::new());
        mock.on_get(
            "/v1/users/1",
            MockResponse::json(200, &User { id: 1, name: "Ada".into() }),
        )
        .on_fn(Method::POST, "/v1/users", |request| {
            let mut user: User = serde_json::from_slice(request.body().as_bytes().unwrap())?;
            user.id = 7;
            Ok(MockResponse::json(201, &user))
        })
        .on_put("/v1/users/7", MockResponse::new(409).with_body("version conflict"));
        let client = HttpClient::new(mock_client(&mock)).unwrap();

        let user: User = client.get_json("users/1").await.unwrap();
        assert_eq!(user.name, "Ada");

        let created: User = client
            .post_json("users", &User { id: 0, name: "Grace".into() })
            .await
            .unwrap();
        assert_eq!(created.id, 7);
        assert_eq!(
            mock.requests()[1].header("content-type"),
            Some("application/json")
        );

        let err = client
            .put_json::<_, User>("users/7", &created)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), Some(409));
        assert!(err.to_string().contains("version conflict"));
    }

    #[tokio::test]
    async fn test_hooks_run_once_per_call() {
        let mock = Arc::new(MockTransport::new());
        mock.on_sequence(
            Method::GET,
            "/flaky",
            [Ok(MockResponse::new(503)), Ok(MockResponse::new(200))],
        );

        let events = Arc::new(Mutex::new(Vec::new()));
        let before = events.clone();
        let after = events.clone();
        let logged = events.clone();

        let client = HttpClient::new(
            HttpClientConfig::builder()
                .base_url("http://api.test")
                .transport(mock.clone())
                .retry(RetryPolicy::new(3).with_condition(retry_on_status_5xx()))
                .before_request(move |request| {
                    before.lock().push(format!("before {}", request.url().path()));
                    Ok(())
                })
                .after_response(move |_, outcome| {
                    let status = outcome.as_ref().map(|r| r.status_code()).unwrap_or(0);
                    after.lock().push(format!("after {status}"));
                })
                .log_hook(move |event: &LogEvent| {
                    logged.lock().push(format!("log {} {:?}", event.method, event.status));
                })
                .build(),
        )
        .unwrap();

        client.get("/flaky").send().await.unwrap();

        assert_eq!(mock.call_count(), 2);
        assert_eq!(
            *events.lock(),
            vec!["before /flaky", "after 200", "log GET Some(200)"]
        );
    }

    #[tokio::test]
    async fn test_before_hook_error_aborts() {
        let mock = Arc::new(MockTransport::new());
        let client = HttpClient::new(
            HttpClientConfig::builder()
                .base_url("http://api.test")
                .transport(mock.clone())
                .before_request(|_| Err(HttpClientError::Auth("no credentials".into())))
                .build(),
        )
        .unwrap();

        let err = client.get("/").send().await.unwrap_err();
        assert!(matches!(err, HttpClientError::Auth(_)));
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn test_idempotency_key_hook_is_stable_across_retries() {
        let mock = Arc::new(MockTransport::new());
        mock.on_sequence(
            Method::PUT,
            "/payments/1",
            [Ok(MockResponse::new(503)), Ok(MockResponse::new(200))],
        );

        let keys = IdempotencyKey::new();
        let client = HttpClient::new(
            HttpClientConfig::builder()
                .base_url("http://api.test")
                .transport(mock.clone())
                .retry(RetryPolicy::new(2).with_condition(retry_on_status_5xx()))
                .before_request(move |request| keys.apply(request))
                .build(),
        )
        .unwrap();

        client.put("/payments/1").json(&serde_json::json!({"amount": 100})).send().await.unwrap();

        let sent = mock.requests();
        assert_eq!(sent.len(), 2);
        assert_eq!(
            sent[0].header("idempotency-key"),
            sent[1].header("idempotency-key")
        );
        assert!(sent[0].header("idempotency-key").is_some());
    }
}
