//! Per-request deadline and cancellation.

use crate::{HttpClientError, Result};
use std::future::{Future, pending};
use std::time::Duration;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

/// Deadline and cancellation signal carried by a [`Request`](crate::Request).
///
/// Every stage that suspends (retry backoff, rate limit waits, waiting on a
/// coalesced peer, the network exchange itself) races its work against this
/// context, so an expired deadline or a cancelled token unblocks the caller
/// promptly.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    deadline: Option<Instant>,
    token: Option<CancellationToken>,
}

impl RequestContext {
    /// A context with no deadline and no cancellation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an absolute deadline. An earlier existing deadline is kept.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    /// Set a deadline `timeout` from now. An earlier existing deadline is kept.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Attach a cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    /// The deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The cancellation token, if any.
    pub fn cancellation(&self) -> Option<&CancellationToken> {
        self.token.as_ref()
    }

    /// Time left before the deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Whether the token has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.token.as_ref().is_some_and(|t| t.is_cancelled())
    }

    /// Fail if the context is already cancelled or past its deadline.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(HttpClientError::Cancelled);
        }
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(HttpClientError::DeadlineExceeded);
        }
        Ok(())
    }

    /// Drive `fut` until it completes, the token is cancelled or the deadline passes.
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check()?;

        let cancelled = async {
            match &self.token {
                Some(token) => token.cancelled().await,
                None => pending().await,
            }
        };
        let expired = async {
            match self.deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancelled => Err(HttpClientError::Cancelled),
            _ = expired => Err(HttpClientError::DeadlineExceeded),
            out = fut => out,
        }
    }

    /// Sleep for `duration` unless the context ends first.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        self.run(async {
            tokio::time::sleep(duration).await;
            Ok(())
        })
        .await
    }
}
