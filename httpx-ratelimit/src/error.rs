//! Error types for rate limiting

use std::time::Duration;
use thiserror::Error;

/// Result type for rate limiting operations
pub type RateLimitResult<T> = Result<T, RateLimitError>;

/// Rate limiting errors
#[derive(Debug, Clone, Error)]
pub enum RateLimitError {
    /// The caller's deadline would pass before a token becomes available.
    ///
    /// Nothing is consumed from the bucket when this is returned.
    #[error("Rate limit wait of {wait:?} would exceed the caller's deadline")]
    DeadlineExceeded {
        /// How long the caller would have had to wait for a token
        wait: Duration,
    },

    /// Invalid limiter configuration
    #[error("Invalid rate limiter configuration: {0}")]
    InvalidConfig(String),
}

impl RateLimitError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Check if the caller's deadline ran out while waiting for a token
    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self, Self::DeadlineExceeded { .. })
    }

    /// Get the wait that was refused, if this is a deadline error
    pub fn wait(&self) -> Option<Duration> {
        match self {
            Self::DeadlineExceeded { wait } => Some(*wait),
            _ => None,
        }
    }
}
