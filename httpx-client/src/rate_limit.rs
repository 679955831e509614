//! Rate limiting stage.

use crate::middleware::{Middleware, Next};
use crate::{Request, Response, Result};
use async_trait::async_trait;
use httpx_ratelimit::RateLimiter;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Waits for a token from a [`RateLimiter`] before each attempt.
///
/// The limiter is keyed by the request's `host:port`. The wait honours the
/// request's deadline and cancellation; a cancelled wait consumes no token.
#[derive(Clone)]
pub struct RateLimitMiddleware {
    limiter: Arc<dyn RateLimiter>,
}

impl RateLimitMiddleware {
    /// Create a rate limit stage.
    pub fn new(limiter: Arc<dyn RateLimiter>) -> Self {
        Self { limiter }
    }
}

impl fmt::Debug for RateLimitMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitMiddleware").finish_non_exhaustive()
    }
}

#[async_trait]
impl Middleware for RateLimitMiddleware {
    async fn handle(&self, request: Request, next: Next) -> Result<Response> {
        let key = request.host_key();
        let ctx = request.context().clone();

        trace!(key = %key, "Waiting for rate limit token");
        ctx.run(async {
            self.limiter.wait(&key, ctx.deadline()).await?;
            Ok(())
        })
        .await?;

        next.run(request).await
    }
}
