//! Middleware chain for HTTP client.
//!
//! Middlewares run in registration order on the way in and in reverse order
//! on the way out. The chain as a whole is itself a [`Transport`], so chains
//! nest.

use crate::transport::Transport;
use crate::{HttpClientError, Request, Response, Result};
use async_trait::async_trait;
use http::{HeaderMap, HeaderName, HeaderValue};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Middleware trait for processing requests and responses.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Process the request and call the next stage.
    async fn handle(&self, request: Request, next: Next) -> Result<Response>;
}

#[async_trait]
impl<M: Middleware + ?Sized> Middleware for Arc<M> {
    async fn handle(&self, request: Request, next: Next) -> Result<Response> {
        (**self).handle(request, next).await
    }
}

/// The rest of the chain after the current middleware.
///
/// `Next` is owned and `'static`, so a middleware may move it into a spawned
/// task or call it more than once (as retry does).
#[derive(Clone)]
pub struct Next {
    middlewares: Arc<Vec<Arc<dyn Middleware>>>,
    transport: Arc<dyn Transport>,
    index: usize,
}

impl Next {
    /// Continue to the next middleware, or the transport at the end of the chain.
    pub async fn run(self, request: Request) -> Result<Response> {
        match self.middlewares.get(self.index).cloned() {
            Some(middleware) => {
                let next = Next {
                    index: self.index + 1,
                    ..self
                };
                middleware.handle(request, next).await
            }
            None => self.transport.round_trip(request).await,
        }
    }
}

impl std::fmt::Debug for Next {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Next")
            .field("index", &self.index)
            .field("remaining", &self.middlewares.len().saturating_sub(self.index))
            .finish()
    }
}

/// Chain of middleware handlers in front of a transport.
#[derive(Clone)]
pub struct MiddlewareChain {
    middlewares: Arc<Vec<Arc<dyn Middleware>>>,
    transport: Arc<dyn Transport>,
}

impl MiddlewareChain {
    /// Create a new middleware chain ending in `transport`.
    pub fn new<T: Transport + 'static>(transport: T) -> Self {
        Self::from_transport(Arc::new(transport))
    }

    /// Create a chain ending in a shared transport.
    pub fn from_transport(transport: Arc<dyn Transport>) -> Self {
        Self {
            middlewares: Arc::new(Vec::new()),
            transport,
        }
    }

    /// Add a middleware to the chain.
    pub fn with_middleware<M: Middleware + 'static>(self, middleware: M) -> Self {
        self.with_arc(Arc::new(middleware))
    }

    /// Add a shared middleware to the chain.
    pub fn with_arc(mut self, middleware: Arc<dyn Middleware>) -> Self {
        Arc::make_mut(&mut self.middlewares).push(middleware);
        self
    }

    /// Number of middlewares, not counting the transport.
    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    /// Whether the chain is just the transport.
    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Execute the request through the middleware chain.
    pub async fn execute(&self, request: Request) -> Result<Response> {
        self.start().run(request).await
    }

    fn start(&self) -> Next {
        Next {
            middlewares: self.middlewares.clone(),
            transport: self.transport.clone(),
            index: 0,
        }
    }
}

#[async_trait]
impl Transport for MiddlewareChain {
    async fn round_trip(&self, request: Request) -> Result<Response> {
        self.execute(request).await
    }
}

/// Fold `middlewares` (outermost first) around `transport` into one transport.
pub fn compose<I>(middlewares: I, transport: Arc<dyn Transport>) -> MiddlewareChain
where
    I: IntoIterator<Item = Arc<dyn Middleware>>,
{
    middlewares
        .into_iter()
        .fold(MiddlewareChain::from_transport(transport), |chain, middleware| {
            chain.with_arc(middleware)
        })
}

/// A middleware built from a closure.
pub struct FnMiddleware<F> {
    f: F,
}

/// Create a [`Middleware`] from an async closure taking the request and the rest of the chain.
///
/// ```rust
/// use httpx_client::middleware_fn;
///
/// let log = middleware_fn(|request, next| async move {
///     println!("-> {} {}", request.method(), request.url());
///     let result = next.run(request).await;
///     println!("<- {:?}", result.as_ref().map(|r| r.status()));
///     result
/// });
/// ```
pub fn middleware_fn<F, Fut>(f: F) -> FnMiddleware<F>
where
    F: Fn(Request, Next) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response>> + Send,
{
    FnMiddleware { f }
}

#[async_trait]
impl<F, Fut> Middleware for FnMiddleware<F>
where
    F: Fn(Request, Next) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response>> + Send,
{
    async fn handle(&self, request: Request, next: Next) -> Result<Response> {
        (self.f)(request, next).await
    }
}

/// Timeout middleware.
///
/// Bounds everything after it in the chain, and fails with
/// [`HttpClientError::Timeout`] when the bound is hit.
pub struct TimeoutMiddleware {
    timeout: Duration,
}

impl TimeoutMiddleware {
    /// Create a new timeout middleware.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Middleware for TimeoutMiddleware {
    async fn handle(&self, request: Request, next: Next) -> Result<Response> {
        match tokio::time::timeout(self.timeout, next.run(request)).await {
            Ok(result) => result,
            Err(_) => Err(HttpClientError::Timeout(self.timeout)),
        }
    }
}

/// Adds fixed headers to every request.
///
/// Headers already on the request are replaced.
#[derive(Debug, Clone)]
pub struct HeaderInjector {
    headers: HeaderMap,
}

impl HeaderInjector {
    /// Inject `headers` into every request.
    pub fn new(headers: HeaderMap) -> Self {
        Self { headers }
    }

    /// Build from string pairs, rejecting invalid names or values.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            let name = HeaderName::try_from(name.as_ref())
                .map_err(|e| HttpClientError::RequestBuild(e.to_string()))?;
            let value = HeaderValue::try_from(value.as_ref())
                .map_err(|e| HttpClientError::RequestBuild(e.to_string()))?;
            headers.insert(name, value);
        }
        Ok(Self::new(headers))
    }
}

#[async_trait]
impl Middleware for HeaderInjector {
    async fn handle(&self, mut request: Request, next: Next) -> Result<Response> {
        for (name, value) in &self.headers {
            request.headers_mut().insert(name.clone(), value.clone());
        }
        next.run(request).await
    }
}

/// Generates correlation ids.
pub type IdGenerator = Arc<dyn Fn() -> String + Send + Sync>;

/// Gives every request a unique id header.
///
/// A request that already carries the header keeps its id.
pub struct CorrelationId {
    header: HeaderName,
    generate: IdGenerator,
}

impl CorrelationId {
    /// Use `X-Request-ID` with UUID v4 ids.
    pub fn new() -> Self {
        Self {
            header: HeaderName::from_static("x-request-id"),
            generate: Arc::new(|| uuid::Uuid::new_v4().to_string()),
        }
    }

    /// Use a custom header name.
    pub fn with_header(mut self, header: HeaderName) -> Self {
        self.header = header;
        self
    }

    /// Use a custom id generator.
    pub fn with_generator<F>(mut self, generate: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.generate = Arc::new(generate);
        self
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Middleware for CorrelationId {
    async fn handle(&self, mut request: Request, next: Next) -> Result<Response> {
        if !request.headers().contains_key(&self.header) {
            let id = (self.generate)();
            let value = HeaderValue::try_from(id)
                .map_err(|e| HttpClientError::Middleware(e.to_string()))?;
            request.headers_mut().insert(self.header.clone(), value);
        }
        next.run(request).await
    }
}
