//! The transport stage: one request in, one response or error out.

use crate::config::HttpClientConfig;
use crate::{HttpClientError, Request, Response, Result};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tracing::trace;

/// Performs exactly one request/response exchange.
///
/// Every pipeline stage both consumes and, through
/// [`MiddlewareChain`](crate::MiddlewareChain), produces this interface.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `request` and wait for its response.
    async fn round_trip(&self, request: Request) -> Result<Response>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn round_trip(&self, request: Request) -> Result<Response> {
        (**self).round_trip(request).await
    }
}

/// Network transport backed by a `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Wrap an existing reqwest client.
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Build a reqwest client from the connection settings in `config`.
    pub fn from_config(config: &HttpClientConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(config.pool_idle_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .user_agent(&config.user_agent)
            .gzip(config.gzip)
            .brotli(config.brotli);

        if config.follow_redirects {
            builder = builder.redirect(reqwest::redirect::Policy::limited(config.max_redirects));
        } else {
            builder = builder.redirect(reqwest::redirect::Policy::none());
        }

        let client = builder
            .build()
            .map_err(|e| HttpClientError::RequestBuild(e.to_string()))?;
        Ok(Self::new(client))
    }

    /// Get the underlying reqwest client.
    pub fn inner(&self) -> &reqwest::Client {
        &self.client
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn round_trip(&self, request: Request) -> Result<Response> {
        let body = request.body().materialize()?;
        let method = request.method().clone();

        let mut outgoing = reqwest::Request::new(method.clone(), request.url().clone());
        *outgoing.headers_mut() = request.headers().clone();
        if !body.is_empty() {
            *outgoing.body_mut() = Some(body.into());
        }

        trace!(method = %method, url = %request.url(), "Sending request");

        request
            .context()
            .run(async {
                let response = self.client.execute(outgoing).await?;
                Response::from_reqwest(response, method).await
            })
            .await
    }
}

/// A transport built from a closure.
///
/// ```rust
/// use httpx_client::{transport_fn, Response, StatusCode, HeaderMap, Bytes};
///
/// let transport = transport_fn(|request| async move {
///     Ok(Response::new(
///         StatusCode::OK,
///         HeaderMap::new(),
///         Bytes::from_static(b"hello"),
///         request.method().clone(),
///         request.url().clone(),
///     ))
/// });
/// ```
pub struct TransportFn<F> {
    f: F,
}

/// Create a [`Transport`] from an async closure.
pub fn transport_fn<F, Fut>(f: F) -> TransportFn<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response>> + Send,
{
    TransportFn { f }
}

#[async_trait]
impl<F, Fut> Transport for TransportFn<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response>> + Send,
{
    async fn round_trip(&self, request: Request) -> Result<Response> {
        (self.f)(request).await
    }
}
