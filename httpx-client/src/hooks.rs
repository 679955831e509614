//! Request lifecycle hooks.
//!
//! Hooks run once per logical call made through [`HttpClient`](crate::HttpClient),
//! around the whole pipeline: retries, cache hits and coalesced calls are
//! not seen individually.

use crate::{Request, Response, Result};
use http::Method;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Runs before a request enters the pipeline and may modify it.
///
/// Returning an error fails the call without sending anything.
pub type BeforeRequestHook = Arc<dyn Fn(&mut Request) -> Result<()> + Send + Sync>;

/// Runs after the pipeline produced an outcome.
pub type AfterResponseHook = Arc<dyn Fn(&Request, &Result<Response>) + Send + Sync>;

/// One completed call.
#[derive(Debug, Clone)]
pub struct LogEvent {
    /// Request method.
    pub method: Method,
    /// Resolved request URL.
    pub url: Url,
    /// Response status, absent when the call failed.
    pub status: Option<u16>,
    /// Time spent in the pipeline.
    pub duration: Duration,
    /// Error message when the call failed.
    pub error: Option<String>,
}

impl LogEvent {
    /// Describe the outcome of `request`.
    pub fn new(request: &Request, outcome: &Result<Response>, duration: Duration) -> Self {
        let (status, error) = match outcome {
            Ok(response) => (Some(response.status_code()), None),
            Err(e) => (None, Some(e.to_string())),
        };
        Self {
            method: request.method().clone(),
            url: request.url().clone(),
            status,
            duration,
            error,
        }
    }

    /// Whether the call failed or returned a 5xx.
    pub fn is_failure(&self) -> bool {
        self.error.is_some() || self.status.is_some_and(|s| s >= 500)
    }
}

impl fmt::Display for LogEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ", self.method, self.url)?;
        match (&self.status, &self.error) {
            (Some(status), _) => write!(f, "-> {status}")?,
            (None, Some(error)) => write!(f, "-> error: {error}")?,
            (None, None) => write!(f, "-> ?")?,
        }
        write!(f, " ({:?})", self.duration)
    }
}

/// Receives a [`LogEvent`] per call.
pub trait LogHook: Send + Sync {
    /// Handle one event.
    fn log(&self, event: &LogEvent);
}

impl<F> LogHook for F
where
    F: Fn(&LogEvent) + Send + Sync,
{
    fn log(&self, event: &LogEvent) {
        self(event)
    }
}

/// Logs calls through `tracing`: failures at `warn`, everything else at `debug`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogHook;

impl LogHook for TracingLogHook {
    fn log(&self, event: &LogEvent) {
        if event.is_failure() {
            warn!(
                method = %event.method,
                url = %event.url,
                status = ?event.status,
                duration = ?event.duration,
                error = ?event.error,
                "HTTP request failed"
            );
        } else {
            debug!(
                method = %event.method,
                url = %event.url,
                status = ?event.status,
                duration = ?event.duration,
                "HTTP request completed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HttpClientError;
    use bytes::Bytes;
    use http::{HeaderMap, StatusCode};
    use parking_lot::Mutex;

    fn request() -> Request {
        Request::parse(Method::GET, "http://api.test/ping").unwrap()
    }

    #[test]
    fn test_log_event_from_response() {
        let req = request();
        let outcome = Ok(Response::new(
            StatusCode::OK,
            HeaderMap::new(),
            Bytes::new(),
            Method::GET,
            req.url().clone(),
        ));
        let event = LogEvent::new(&req, &outcome, Duration::from_millis(12));

        assert_eq!(event.status, Some(200));
        assert!(!event.is_failure());
        assert_eq!(event.to_string(), "GET http://api.test/ping -> 200 (12ms)");
    }

    #[test]
    fn test_log_event_from_error() {
        let req = request();
        let outcome: Result<Response> = Err(HttpClientError::Cancelled);
        let event = LogEvent::new(&req, &outcome, Duration::ZERO);

        assert_eq!(event.status, None);
        assert!(event.is_failure());
        assert!(event.to_string().contains("Request cancelled"));
    }

    #[test]
    fn test_closure_log_hook() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let hook = move |event: &LogEvent| sink.lock().push(event.url.path().to_string());

        let req = request();
        let outcome: Result<Response> = Err(HttpClientError::Cancelled);
        hook.log(&LogEvent::new(&req, &outcome, Duration::ZERO));
        TracingLogHook.log(&LogEvent::new(&req, &outcome, Duration::ZERO));

        assert_eq!(*seen.lock(), vec!["/ping"]);
    }
}
