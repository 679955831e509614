//! HTTP Client error types.

use httpx_ratelimit::RateLimitError;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Result type for HTTP client operations.
pub type Result<T> = std::result::Result<T, HttpClientError>;

/// HTTP client errors.
///
/// Non-2xx responses are not errors: they come back as a [`Response`](crate::Response)
/// and only turn into [`HttpClientError::Response`] through
/// [`Response::ensure_success`](crate::Response::ensure_success).
#[derive(Debug, Error)]
pub enum HttpClientError {
    /// Underlying HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Connection error.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Request timed out.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The caller's deadline passed.
    #[error("Request deadline exceeded")]
    DeadlineExceeded,

    /// The caller cancelled the request.
    #[error("Request cancelled")]
    Cancelled,

    /// Circuit breaker is open, rejecting requests.
    #[error("Circuit breaker is open for {key}, request rejected")]
    CircuitOpen {
        /// The breaker key that rejected the request.
        key: String,
    },

    /// Rate limiter refused to wait for a token.
    #[error("Rate limit: {0}")]
    RateLimit(#[from] RateLimitError),

    /// Response error.
    #[error("Response error: {status} - {message}")]
    Response {
        /// HTTP status code.
        status: u16,
        /// Error message.
        message: String,
    },

    /// Invalid URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Request building error.
    #[error("Failed to build request: {0}")]
    RequestBuild(String),

    /// The request body could not be produced again for another attempt.
    #[error("Request body cannot be replayed: {0}")]
    BodyReplay(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(String),

    /// Credentials could not be obtained or applied.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Middleware error.
    #[error("Middleware error: {0}")]
    Middleware(String),

    /// URL parsing error.
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An outcome shared by several coalesced callers.
    #[error("{0}")]
    Shared(Arc<HttpClientError>),
}

impl HttpClientError {
    /// Get the underlying error, looking through [`HttpClientError::Shared`].
    pub fn inner(&self) -> &HttpClientError {
        match self {
            Self::Shared(inner) => inner.inner(),
            other => other,
        }
    }

    /// Check if this is a timeout error.
    ///
    /// Deadline expiry counts as a timeout, including a rate limiter refusing
    /// to wait past the deadline.
    pub fn is_timeout(&self) -> bool {
        match self.inner() {
            Self::Timeout(_) | Self::DeadlineExceeded => true,
            Self::RateLimit(e) => e.is_deadline_exceeded(),
            Self::Http(e) => e.is_timeout(),
            _ => false,
        }
    }

    /// Check if the caller cancelled the request.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.inner(), Self::Cancelled)
    }

    /// Check if this is a connection error.
    pub fn is_connection(&self) -> bool {
        match self.inner() {
            Self::Connection(_) => true,
            Self::Http(e) => e.is_connect(),
            _ => false,
        }
    }

    /// Check if the transport failed before producing any response.
    ///
    /// Cancellation and deadline expiry are not network errors.
    pub fn is_network(&self) -> bool {
        match self.inner() {
            Self::Http(e) => !e.is_status() && !e.is_builder() && !e.is_decode(),
            Self::Connection(_) | Self::Timeout(_) | Self::Io(_) => true,
            _ => false,
        }
    }

    /// Check if a circuit breaker rejected the request.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self.inner(), Self::CircuitOpen { .. })
    }

    /// Check if the rate limiter refused the request.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self.inner(), Self::RateLimit(_))
    }

    /// Get the HTTP status code if this is a response error.
    pub fn status_code(&self) -> Option<u16> {
        match self.inner() {
            Self::Response { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for HttpClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

impl From<Arc<HttpClientError>> for HttpClientError {
    fn from(err: Arc<HttpClientError>) -> Self {
        Self::Shared(err)
    }
}
