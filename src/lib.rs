// httpx - A resilient HTTP client for Rust
//
// This library sends requests through a composable middleware pipeline with
// retry, circuit breaking, rate limiting, caching and request coalescing.

// Re-export the client
pub use httpx_client::*;

// Re-export optional crates
#[cfg(feature = "cache")]
pub use httpx_cache;

#[cfg(feature = "ratelimit")]
pub use httpx_ratelimit;
