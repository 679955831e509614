//! Response stores for the httpx client.
//!
//! Provides a keyed, TTL-bounded store interface with an in-memory
//! implementation and a two-tier composition of any two stores.
//!
//! # Features
//!
//! - **Generic values** - Stores hold any `Clone` value, typically a response snapshot
//! - **Lazy expiry** - Entries are checked on read; no background sweeper is needed
//! - **Multi-tier caching** - Fast L1 in front of a slower L2, with L1 back-fill
//!
//! # Examples
//!
//! ## Memory Cache
//!
//! ```no_run
//! use httpx_cache::*;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), CacheError> {
//!     let cache = MemoryCache::new(Duration::from_secs(60));
//!
//!     cache.set("key", "value".to_string(), None).await?;
//!     let entry = cache.get("key").await?;
//!     assert!(entry.is_some());
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Multi-tier Caching
//!
//! ```no_run
//! use httpx_cache::*;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), CacheError> {
//! let l1 = Arc::new(MemoryCache::new(Duration::from_secs(30)));
//! let l2 = Arc::new(MemoryCache::new(Duration::from_secs(300)));
//!
//! let tiered = TieredCache::new(l1, l2);
//!
//! // Automatically uses L1 (fast) and falls back to L2
//! tiered.set("key", "value".to_string(), None).await?;
//! let entry = tiered.get("key").await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod memory;
pub mod tiered;
pub mod traits;

pub use error::{CacheError, CacheResult};
pub use memory::MemoryCache;
pub use tiered::{CacheStats, TieredCache, TieredCacheConfig};
pub use traits::{CacheEntry, CacheStore, NoopCache};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::error::{CacheError, CacheResult};
    pub use crate::memory::MemoryCache;
    pub use crate::tiered::{TieredCache, TieredCacheConfig};
    pub use crate::traits::{CacheEntry, CacheStore, NoopCache};
}
