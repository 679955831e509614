//! Token Bucket Algorithm
//!
//! The token bucket allows smooth rate limiting with burst capacity.
//! Tokens are added at a constant rate and consumed on each request.
//!
//! ## How It Works
//!
//! 1. A bucket starts full with `burst` tokens
//! 2. Each admitted request consumes one token
//! 3. Tokens are added at `rate` per second, never beyond `burst`
//! 4. A waiter that finds the bucket empty reserves the next token and
//!    sleeps until it has been refilled
//!
//! A burst of 0 is treated as a burst of 1: the first token is available
//! immediately and later tokens arrive at `rate`.
//!
//! ## Example
//!
//! ```rust
//! use httpx_ratelimit::TokenBucket;
//!
//! let bucket = TokenBucket::new(1.0, 10); // 1 token/sec, burst of 10
//!
//! // First 10 requests succeed (burst)
//! for _ in 0..10 {
//!     assert!(bucket.try_acquire());
//! }
//!
//! // 11th request fails (bucket empty)
//! assert!(!bucket.try_acquire());
//! ```

use crate::error::{RateLimitError, RateLimitResult};
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

/// Token bucket state
#[derive(Debug, Clone)]
struct BucketState {
    /// Current number of tokens; negative while waiters hold reservations
    tokens: f64,
    /// Last time tokens were added
    last_refill: Instant,
}

/// Token bucket rate limiter
#[derive(Debug)]
pub struct TokenBucket {
    /// Tokens added per second
    rate: f64,
    /// Configured burst capacity
    burst: u32,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a new token bucket
    ///
    /// # Arguments
    ///
    /// * `rate` - Tokens added per second
    /// * `burst` - Maximum tokens held at once (0 behaves as 1)
    ///
    /// # Panics
    ///
    /// Panics if `rate` is not a positive, finite number
    pub fn new(rate: f64, burst: u32) -> Self {
        assert!(
            rate.is_finite() && rate > 0.0,
            "Rate must be a positive, finite number"
        );
        Self::build(rate, burst)
    }

    /// Create a new token bucket, rejecting an invalid rate instead of panicking
    pub fn try_new(rate: f64, burst: u32) -> RateLimitResult<Self> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(RateLimitError::config(format!(
                "rate must be a positive, finite number, got {rate}"
            )));
        }
        Ok(Self::build(rate, burst))
    }

    fn build(rate: f64, burst: u32) -> Self {
        let capacity = burst.max(1) as f64;
        Self {
            rate,
            burst,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    fn capacity(&self) -> f64 {
        self.burst.max(1) as f64
    }

    /// Refill tokens based on elapsed time
    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate).min(self.capacity());
        state.last_refill = now;
    }

    /// Try to consume a token without waiting
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        self.refill(&mut state, Instant::now());

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Wait until a token is available and consume it.
    ///
    /// If `deadline` would pass before the token can be refilled, this fails
    /// immediately with [`RateLimitError::DeadlineExceeded`] and consumes
    /// nothing. Dropping the returned future while it sleeps hands the
    /// reserved token back to the bucket.
    pub async fn acquire(&self, deadline: Option<Instant>) -> RateLimitResult<()> {
        let now = Instant::now();
        let wait = {
            let mut state = self.state.lock();
            self.refill(&mut state, now);

            if state.tokens >= 1.0 {
                state.tokens -= 1.0;
                return Ok(());
            }

            let wait = Duration::from_secs_f64((1.0 - state.tokens) / self.rate);
            if let Some(deadline) = deadline
                && now + wait > deadline
            {
                return Err(RateLimitError::DeadlineExceeded { wait });
            }

            state.tokens -= 1.0;
            wait
        };

        trace!(wait = ?wait, "Waiting for rate limit token");

        let reservation = Reservation {
            bucket: self,
            armed: true,
        };
        tokio::time::sleep_until(now + wait).await;
        reservation.commit();
        Ok(())
    }

    /// Tokens currently available, after refilling
    pub fn available(&self) -> f64 {
        let mut state = self.state.lock();
        self.refill(&mut state, Instant::now());
        state.tokens.max(0.0)
    }

    /// Get the refill rate in tokens per second
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Get the configured burst
    pub fn burst(&self) -> u32 {
        self.burst
    }

    /// Refill the bucket to capacity
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.tokens = self.capacity();
        state.last_refill = Instant::now();
    }
}

/// A token taken ahead of time by a sleeping waiter.
struct Reservation<'a> {
    bucket: &'a TokenBucket,
    armed: bool,
}

impl Reservation<'_> {
    fn commit(mut self) {
        self.armed = false;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.bucket.state.lock();
            state.tokens = (state.tokens + 1.0).min(self.bucket.capacity());
            trace!("Rate limit wait abandoned, token returned");
        }
    }
}
