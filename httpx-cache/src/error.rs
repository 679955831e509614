//! Error types for cache operations.

use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Cache-specific errors.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// The backing store could not be reached
    #[error("Connection error: {0}")]
    Connection(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Operation timeout
    #[error("Operation timeout")]
    Timeout,

    /// Generic error
    #[error("Cache error: {0}")]
    Other(String),
}

impl CacheError {
    /// Create a generic error
    pub fn other<S: Into<String>>(msg: S) -> Self {
        Self::Other(msg.into())
    }

    /// Whether the error came from the store being unavailable rather than bad input
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout)
    }
}
