//! In-process transport for tests.
//!
//! ```rust
//! use httpx_client::mock::{MockResponse, MockTransport};
//! use httpx_client::{HttpClient, HttpClientConfig};
//! use std::sync::Arc;
//!
//! # async fn example() -> httpx_client::Result<()> {
//! let mock = Arc::new(MockTransport::new());
//! mock.on_get("/users", MockResponse::json(200, &serde_json::json!([{"id": 1}])));
//!
//! let client = HttpClient::new(
//!     HttpClientConfig::builder()
//!         .base_url("http://api.test")
//!         .transport(mock.clone())
//!         .build(),
//! )?;
//!
//! let users: serde_json::Value = client.get_json("/users").await?;
//! assert_eq!(mock.call_count(), 1);
//! # Ok(())
//! # }
//! ```

use crate::transport::Transport;
use crate::{HttpClientError, Request, Response, Result};
use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Computes the mock outcome for a request.
pub type MockHandler = Arc<dyn Fn(&Request) -> Result<MockResponse> + Send + Sync>;

/// A canned response.
#[derive(Debug, Clone)]
pub struct MockResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    delay: Option<Duration>,
}

impl MockResponse {
    /// An empty response with `status`.
    ///
    /// Unknown status codes fall back to 500.
    pub fn new(status: u16) -> Self {
        Self {
            status: StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            headers: HeaderMap::new(),
            body: Bytes::new(),
            delay: None,
        }
    }

    /// A JSON response. A value that fails to serialize yields an empty body.
    pub fn json<T: Serialize + ?Sized>(status: u16, value: &T) -> Self {
        let body = serde_json::to_vec(value).unwrap_or_default();
        Self::new(status)
            .with_header(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .with_body(body)
    }

    /// Set the body.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Add a header.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Delay the response, as a slow server would.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn into_response(self, request: &Request) -> Response {
        Response::new(
            self.status,
            self.headers,
            self.body,
            request.method().clone(),
            request.url().clone(),
        )
    }
}

struct Route {
    method: Method,
    path: String,
    handler: MockHandler,
}

/// Transport that answers from registered routes instead of the network.
///
/// Routes match on method and URL path. Unmatched requests go to the default
/// handler, or get a 404 when there is none.
#[derive(Default)]
pub struct MockTransport {
    routes: RwLock<Vec<Route>>,
    default: RwLock<Option<MockHandler>>,
    calls: AtomicUsize,
    requests: Mutex<Vec<Request>>,
}

impl MockTransport {
    /// Create an empty mock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `method path` with a handler.
    pub fn on_fn<F>(&self, method: Method, path: impl Into<String>, handler: F) -> &Self
    where
        F: Fn(&Request) -> Result<MockResponse> + Send + Sync + 'static,
    {
        self.routes.write().push(Route {
            method,
            path: path.into(),
            handler: Arc::new(handler),
        });
        self
    }

    /// Answer `method path` with a fixed response.
    pub fn on(&self, method: Method, path: impl Into<String>, response: MockResponse) -> &Self {
        self.on_fn(method, path, move |_| Ok(response.clone()))
    }

    /// Answer `method path` with each response in turn, repeating the last one.
    pub fn on_sequence(
        &self,
        method: Method,
        path: impl Into<String>,
        responses: impl IntoIterator<Item = Result<MockResponse>>,
    ) -> &Self {
        let queue = Mutex::new(responses.into_iter().collect::<VecDeque<_>>());
        self.on_fn(method, path, move |_| {
            let mut queue = queue.lock();
            let next = if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().map(clone_outcome)
            };
            next.unwrap_or_else(|| Ok(MockResponse::new(404)))
        })
    }

    /// Answer `GET path`.
    pub fn on_get(&self, path: impl Into<String>, response: MockResponse) -> &Self {
        self.on(Method::GET, path, response)
    }

    /// Answer `POST path`.
    pub fn on_post(&self, path: impl Into<String>, response: MockResponse) -> &Self {
        self.on(Method::POST, path, response)
    }

    /// Answer `PUT path`.
    pub fn on_put(&self, path: impl Into<String>, response: MockResponse) -> &Self {
        self.on(Method::PUT, path, response)
    }

    /// Answer `PATCH path`.
    pub fn on_patch(&self, path: impl Into<String>, response: MockResponse) -> &Self {
        self.on(Method::PATCH, path, response)
    }

    /// Answer `DELETE path`.
    pub fn on_delete(&self, path: impl Into<String>, response: MockResponse) -> &Self {
        self.on(Method::DELETE, path, response)
    }

    /// Handle every request no route matches.
    pub fn default_fn<F>(&self, handler: F) -> &Self
    where
        F: Fn(&Request) -> Result<MockResponse> + Send + Sync + 'static,
    {
        *self.default.write() = Some(Arc::new(handler));
        self
    }

    /// Total requests received.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests received for `path`, any method.
    pub fn call_count_for(&self, path: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|request| request.url().path() == path)
            .count()
    }

    /// Every request received, in arrival order.
    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().clone()
    }

    /// Forget recorded requests.
    pub fn reset(&self) {
        self.calls.store(0, Ordering::SeqCst);
        self.requests.lock().clear();
    }

    fn handler_for(&self, request: &Request) -> Option<MockHandler> {
        let routes = self.routes.read();
        routes
            .iter()
            .find(|route| route.method == request.method() && route.path == request.url().path())
            .map(|route| route.handler.clone())
            .or_else(|| self.default.read().clone())
    }
}

fn clone_outcome(outcome: &Result<MockResponse>) -> Result<MockResponse> {
    match outcome {
        Ok(response) => Ok(response.clone()),
        Err(err) => Err(HttpClientError::Connection(err.to_string())),
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn round_trip(&self, request: Request) -> Result<Response> {
        let request = request.replay()?;
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());

        let outcome = match self.handler_for(&request) {
            Some(handler) => handler(&request),
            None => Ok(MockResponse::new(404).with_body(format!(
                "no mock route for {} {}",
                request.method(),
                request.url().path()
            ))),
        };
        let mock = outcome?;

        if let Some(delay) = mock.delay {
            request.context().sleep(delay).await?;
        }
        Ok(mock.into_response(&request))
    }
}
