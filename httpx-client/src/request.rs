//! Request model and builder.

use crate::context::RequestContext;
use crate::multipart::Multipart;
use crate::{HttpClient, HttpClientError, Response, Result};
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, header};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Produces the request body afresh for every attempt.
pub type BodyFactory = Arc<dyn Fn() -> std::io::Result<Bytes> + Send + Sync>;

/// Request body.
///
/// Bodies are replayable: `Bytes` is shared between attempts and a
/// `Factory` is invoked again for each attempt.
#[derive(Clone, Default)]
pub enum Body {
    /// No body.
    #[default]
    Empty,
    /// An immutable buffer.
    Bytes(Bytes),
    /// A closure that re-materializes the body.
    Factory(BodyFactory),
}

impl Body {
    /// Create a body from a factory closure.
    pub fn from_factory<F>(factory: F) -> Self
    where
        F: Fn() -> std::io::Result<Bytes> + Send + Sync + 'static,
    {
        Self::Factory(Arc::new(factory))
    }

    /// Produce the body bytes for one attempt.
    pub fn materialize(&self) -> Result<Bytes> {
        match self {
            Self::Empty => Ok(Bytes::new()),
            Self::Bytes(bytes) => Ok(bytes.clone()),
            Self::Factory(factory) => {
                factory().map_err(|e| HttpClientError::BodyReplay(e.to_string()))
            }
        }
    }

    /// The buffered bytes, if the body is already materialized.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Whether there is no body.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Bytes(bytes) => bytes.is_empty(),
            Self::Factory(_) => false,
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            Self::Factory(_) => f.write_str("Factory"),
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes.into())
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Self::Bytes(text.into())
    }
}

impl From<&'static str> for Body {
    fn from(text: &'static str) -> Self {
        Self::Bytes(Bytes::from_static(text.as_bytes()))
    }
}

/// An outbound HTTP request.
///
/// Stages that change a request work on their own copy; cloning is cheap
/// because the body is either shared bytes or a factory.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Body,
    context: RequestContext,
}

impl Request {
    /// Create a request with no headers, body or deadline.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: Body::Empty,
            context: RequestContext::default(),
        }
    }

    /// Parse `url` and create a request.
    pub fn parse(method: Method, url: &str) -> Result<Self> {
        let url = Url::parse(url).map_err(|e| HttpClientError::InvalidUrl(e.to_string()))?;
        Ok(Self::new(method, url))
    }

    /// Get the method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Get the URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Get a mutable reference to the URL.
    pub fn url_mut(&mut self) -> &mut Url {
        &mut self.url
    }

    /// Get the headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Get a mutable reference to the headers.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Get a header value as a string.
    pub fn header(&self, name: impl AsRef<str>) -> Option<&str> {
        self.headers
            .get(name.as_ref())
            .and_then(|v| v.to_str().ok())
    }

    /// Get the body.
    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Replace the body.
    pub fn set_body(&mut self, body: impl Into<Body>) {
        self.body = body.into();
    }

    /// Get the deadline/cancellation context.
    pub fn context(&self) -> &RequestContext {
        &self.context
    }

    /// Get a mutable reference to the context.
    pub fn context_mut(&mut self) -> &mut RequestContext {
        &mut self.context
    }

    /// Replace the context.
    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }

    /// A copy of this request with no deadline or cancellation attached.
    pub fn detached(&self) -> Self {
        self.clone().with_context(RequestContext::default())
    }

    /// A copy whose body has been materialized for a fresh attempt.
    ///
    /// Fails with [`HttpClientError::BodyReplay`] if a body factory fails.
    pub fn replay(&self) -> Result<Self> {
        let mut request = self.clone();
        if let Body::Factory(_) = &self.body {
            request.body = Body::Bytes(self.body.materialize()?);
        }
        Ok(request)
    }

    /// `host:port` of the target, used to key per-destination state.
    pub fn host_key(&self) -> String {
        let host = self.url.host_str().unwrap_or_default();
        match self.url.port_or_known_default() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        }
    }

    /// Whether repeating the request has no additional side effects.
    pub fn is_idempotent(&self) -> bool {
        is_idempotent(&self.method)
    }
}

/// GET, HEAD, PUT, DELETE and OPTIONS are safe to repeat.
pub fn is_idempotent(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::PUT | Method::DELETE | Method::OPTIONS
    )
}

/// Join a request path onto the client's base URL.
///
/// Absolute URLs are used as given.
pub(crate) fn resolve_url(base: Option<&str>, target: &str) -> Result<Url> {
    if let Ok(url) = Url::parse(target) {
        return Ok(url);
    }

    let base = base.ok_or_else(|| {
        HttpClientError::InvalidUrl(format!("relative URL {target:?} without a base URL"))
    })?;
    let joined = if target.is_empty() {
        base.to_string()
    } else {
        format!(
            "{}/{}",
            base.trim_end_matches('/'),
            target.trim_start_matches('/')
        )
    };
    Url::parse(&joined).map_err(|e| HttpClientError::InvalidUrl(e.to_string()))
}

/// HTTP request builder.
pub struct RequestBuilder<'a> {
    client: &'a HttpClient,
    method: Method,
    url: String,
    headers: HeaderMap,
    query: Vec<(String, String)>,
    body: Body,
    context: RequestContext,
    error: Option<HttpClientError>,
}

impl<'a> RequestBuilder<'a> {
    /// Create a new request builder.
    pub(crate) fn new(client: &'a HttpClient, method: Method, url: String) -> Self {
        Self {
            client,
            method,
            url,
            headers: HeaderMap::new(),
            query: Vec::new(),
            body: Body::Empty,
            context: RequestContext::default(),
            error: None,
        }
    }

    fn fail(&mut self, err: HttpClientError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    /// Add a header to the request.
    ///
    /// An invalid name or value is reported by [`build`](Self::build).
    pub fn header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        let name = HeaderName::try_from(name.as_ref());
        let value = HeaderValue::try_from(value.as_ref());
        match (name, value) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            (Err(e), _) => self.fail(HttpClientError::RequestBuild(e.to_string())),
            (_, Err(e)) => self.fail(HttpClientError::RequestBuild(e.to_string())),
        }
        self
    }

    /// Add multiple headers to the request.
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Add a query parameter.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Add multiple query parameters.
    pub fn queries<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in params {
            self.query.push((k.into(), v.into()));
        }
        self
    }

    /// Set the `Accept` header.
    pub fn accept(self, content_type: impl AsRef<str>) -> Self {
        self.header(header::ACCEPT, content_type)
    }

    /// Set the request body as raw bytes.
    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }

    /// Set a body produced afresh for every attempt.
    pub fn body_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> std::io::Result<Bytes> + Send + Sync + 'static,
    {
        self.body = Body::from_factory(factory);
        self
    }

    /// Set the request body as text.
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        self.body = Body::from(text.into());
        self
    }

    /// Set the request body as JSON.
    pub fn json<T: Serialize + ?Sized>(mut self, json: &T) -> Self {
        match serde_json::to_vec(json) {
            Ok(bytes) => {
                self.headers.insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("application/json"),
                );
                self.body = Body::from(bytes);
            }
            Err(e) => self.fail(e.into()),
        }
        self
    }

    /// Set the request body as form data.
    pub fn form<T: Serialize + ?Sized>(mut self, form: &T) -> Self {
        match serde_urlencoded::to_string(form) {
            Ok(encoded) => {
                self.headers.insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("application/x-www-form-urlencoded"),
                );
                self.body = Body::from(encoded);
            }
            Err(e) => self.fail(HttpClientError::RequestBuild(e.to_string())),
        }
        self
    }

    /// Set the request body as `multipart/form-data`.
    ///
    /// The form is encoded once; retries resend the same bytes.
    pub fn multipart(mut self, form: Multipart) -> Self {
        match HeaderValue::from_str(&form.content_type()) {
            Ok(content_type) => {
                self.headers.insert(header::CONTENT_TYPE, content_type);
                self.body = Body::Bytes(form.encode());
            }
            Err(e) => self.fail(HttpClientError::RequestBuild(format!(
                "invalid multipart boundary: {e}"
            ))),
        }
        self
    }

    /// Give the request a deadline `timeout` from now.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.context = self.context.with_timeout(timeout);
        self
    }

    /// Give the request an absolute deadline.
    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.context = self.context.with_deadline(deadline);
        self
    }

    /// Cancel the request when `token` is cancelled.
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.context = self.context.with_cancellation(token);
        self
    }

    /// Set bearer authentication.
    pub fn bearer_token(self, token: impl AsRef<str>) -> Self {
        let value = format!("Bearer {}", token.as_ref());
        self.header(header::AUTHORIZATION, value)
    }

    /// Set basic authentication.
    pub fn basic_auth(self, username: impl AsRef<str>, password: Option<&str>) -> Self {
        let value = crate::auth::basic_header_value(username.as_ref(), password);
        self.header(header::AUTHORIZATION, value)
    }

    /// Build the URL with query parameters.
    fn build_url(&self) -> Result<Url> {
        let mut url = resolve_url(self.client.config().base_url.as_deref(), &self.url)?;

        // Add query parameters
        if !self.query.is_empty() {
            let mut query_pairs = url.query_pairs_mut();
            for (key, value) in &self.query {
                query_pairs.append_pair(key, value);
            }
        }

        Ok(url)
    }

    /// Build the request without sending it.
    ///
    /// The client's default headers are applied first, so per-request headers
    /// override them.
    pub fn build(self) -> Result<Request> {
        if let Some(err) = self.error {
            return Err(err);
        }

        let url = self.build_url()?;
        let mut headers = self.client.default_headers().clone();
        headers.extend(self.headers);

        Ok(Request {
            method: self.method,
            url,
            headers,
            body: self.body,
            context: self.context,
        })
    }

    /// Send the request.
    pub async fn send(self) -> Result<Response> {
        let client = self.client;
        let request = self.build()?;
        client.execute(request).await
    }
}
