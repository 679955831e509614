//! # httpx Rate Limiting
//!
//! Token-bucket admission control for outbound HTTP requests.
//!
//! ## Features
//!
//! - **Token Bucket**: Steady refill with burst headroom
//! - **Deadline Aware**: A wait that cannot finish before the caller's
//!   deadline fails immediately instead of sleeping
//! - **Cancellation Safe**: Dropping a pending wait returns its token
//! - **Global or Per-host**: One shared bucket, or a bucket per destination
//!   with per-host overrides
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use httpx_ratelimit::{GlobalRateLimiter, RateLimiter};
//! use std::time::Duration;
//! use tokio::time::Instant;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // 5 requests per second, bursts of 2
//! let limiter = GlobalRateLimiter::new(5.0, 2);
//!
//! let deadline = Instant::now() + Duration::from_secs(1);
//! limiter.wait("api.example.com", Some(deadline)).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Per-host Limits
//!
//! ```rust
//! use httpx_ratelimit::{BucketConfig, PerHostRateLimiter};
//!
//! let limiter = PerHostRateLimiter::new(10.0, 10)
//!     .with_override("search.example.com", BucketConfig::new(1.0, 1));
//! ```

pub mod bucket;
pub mod error;
pub mod limiter;

pub use bucket::TokenBucket;
pub use error::{RateLimitError, RateLimitResult};
pub use limiter::{BucketConfig, GlobalRateLimiter, PerHostRateLimiter, RateLimiter};

/// Prelude for common imports.
///
/// ```
/// use httpx_ratelimit::prelude::*;
/// ```
pub mod prelude {
    pub use crate::bucket::TokenBucket;
    pub use crate::error::{RateLimitError, RateLimitResult};
    pub use crate::limiter::{BucketConfig, GlobalRateLimiter, PerHostRateLimiter, RateLimiter};
}
