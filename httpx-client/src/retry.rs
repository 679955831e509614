//! Retry policy, backoff strategies and the retry stage.

use crate::middleware::{Middleware, Next};
use crate::{HttpClientError, Request, Response, Result};
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Decides whether an attempt's outcome should be retried.
pub type RetryCondition = Arc<dyn Fn(&Result<Response>) -> bool + Send + Sync>;

/// Observes each retry before its backoff: attempt index, request, outcome.
pub type RetryObserver = Arc<dyn Fn(u32, &Request, &Result<Response>) + Send + Sync>;

/// Custom backoff function from attempt index to delay.
pub type BackoffFn = Arc<dyn Fn(u32) -> Duration + Send + Sync>;

/// Backoff strategy for retries.
#[derive(Clone)]
pub enum BackoffStrategy {
    /// No delay between retries.
    None,
    /// Constant delay between retries.
    Constant(Duration),
    /// Linear backoff: `base + increment * attempt`.
    Linear {
        /// Delay before the first retry.
        base: Duration,
        /// Added per attempt.
        increment: Duration,
    },
    /// Exponential backoff: `base * 2^attempt`, capped, randomized by `jitter`.
    ///
    /// A jitter of 0.1 spreads each delay uniformly over ±10%.
    Exponential {
        /// Initial delay.
        base: Duration,
        /// Maximum delay.
        cap: Duration,
        /// Jitter factor in `[0, 1]`.
        jitter: f64,
    },
    /// Uniformly random delay in `[0, min(cap, base * 2^attempt))`.
    FullJitter {
        /// Initial delay.
        base: Duration,
        /// Maximum delay.
        cap: Duration,
    },
    /// Caller supplied function.
    Custom(BackoffFn),
}

impl BackoffStrategy {
    /// Build a custom strategy.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(u32) -> Duration + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    /// Calculate delay for a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self {
            Self::None => Duration::ZERO,
            Self::Constant(d) => *d,
            Self::Linear { base, increment } => base.saturating_add(increment.saturating_mul(attempt)),
            Self::Exponential { base, cap, jitter } => {
                let delay = exponential(*base, *cap, attempt);
                let jitter = jitter.clamp(0.0, 1.0);
                if jitter == 0.0 {
                    return delay;
                }
                let spread = 1.0 + jitter * (2.0 * rand::random::<f64>() - 1.0);
                delay.mul_f64(spread).min(*cap)
            }
            Self::FullJitter { base, cap } => {
                exponential(*base, *cap, attempt).mul_f64(rand::random::<f64>())
            }
            Self::Custom(f) => f(attempt),
        }
    }
}

fn exponential(base: Duration, cap: Duration, attempt: u32) -> Duration {
    let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(cap)
}

impl fmt::Debug for BackoffStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Constant(d) => f.debug_tuple("Constant").field(d).finish(),
            Self::Linear { base, increment } => f
                .debug_struct("Linear")
                .field("base", base)
                .field("increment", increment)
                .finish(),
            Self::Exponential { base, cap, jitter } => f
                .debug_struct("Exponential")
                .field("base", base)
                .field("cap", cap)
                .field("jitter", jitter)
                .finish(),
            Self::FullJitter { base, cap } => f
                .debug_struct("FullJitter")
                .field("base", base)
                .field("cap", cap)
                .finish(),
            Self::Custom(_) => f.write_str("Custom"),
        }
    }
}

/// Retry when the transport failed without producing a response.
pub fn retry_on_network_error() -> RetryCondition {
    Arc::new(|outcome| matches!(outcome, Err(e) if e.is_network()))
}

/// Retry on any 5xx response.
pub fn retry_on_status_5xx() -> RetryCondition {
    Arc::new(|outcome| matches!(outcome, Ok(r) if r.is_server_error()))
}

/// Retry on 429 Too Many Requests.
pub fn retry_on_status_429() -> RetryCondition {
    retry_on_statuses(&[429])
}

/// Retry on any of the exact `statuses`.
pub fn retry_on_statuses(statuses: &[u16]) -> RetryCondition {
    let statuses = statuses.to_vec();
    Arc::new(move |outcome| matches!(outcome, Ok(r) if statuses.contains(&r.status_code())))
}

/// Retry on errors matching `predicate`.
pub fn retry_on_error<F>(predicate: F) -> RetryCondition
where
    F: Fn(&HttpClientError) -> bool + Send + Sync + 'static,
{
    Arc::new(move |outcome| matches!(outcome, Err(e) if predicate(e)))
}

/// Retry policy.
///
/// Conditions are OR-ed: an outcome is retried if any condition matches.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first (at least 1).
    pub max_attempts: u32,
    /// Retry conditions.
    pub conditions: Vec<RetryCondition>,
    /// Backoff strategy.
    pub backoff: BackoffStrategy,
    /// Only retry GET, HEAD, PUT, DELETE and OPTIONS.
    pub retry_only_idempotent: bool,
    /// Called before each retry.
    pub on_retry: Option<RetryObserver>,
}

impl Default for RetryPolicy {
    /// Three attempts on network errors, 5xx and 429 with exponential backoff.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            conditions: vec![
                retry_on_network_error(),
                retry_on_status_5xx(),
                retry_on_status_429(),
            ],
            backoff: BackoffStrategy::Exponential {
                base: Duration::from_millis(100),
                cap: Duration::from_secs(5),
                jitter: 0.1,
            },
            retry_only_idempotent: false,
            on_retry: None,
        }
    }
}

impl RetryPolicy {
    /// A policy with `max_attempts`, no conditions and no backoff.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            conditions: Vec::new(),
            backoff: BackoffStrategy::None,
            retry_only_idempotent: false,
            on_retry: None,
        }
    }

    /// Create a retry policy with exponential backoff on the default conditions.
    pub fn exponential(max_attempts: u32, base: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: BackoffStrategy::Exponential {
                base,
                cap: Duration::from_secs(30),
                jitter: 0.0,
            },
            ..Default::default()
        }
    }

    /// Create a retry policy with constant delay on the default conditions.
    pub fn constant(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: BackoffStrategy::Constant(delay),
            ..Default::default()
        }
    }

    /// Set the backoff strategy.
    pub fn with_backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Add a retry condition.
    pub fn with_condition(mut self, condition: RetryCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Add a retry condition from a closure.
    pub fn retry_if<F>(self, condition: F) -> Self
    where
        F: Fn(&Result<Response>) -> bool + Send + Sync + 'static,
    {
        self.with_condition(Arc::new(condition))
    }

    /// Only retry idempotent methods.
    pub fn only_idempotent(mut self, enabled: bool) -> Self {
        self.retry_only_idempotent = enabled;
        self
    }

    /// Observe each retry.
    pub fn on_retry<F>(mut self, observer: F) -> Self
    where
        F: Fn(u32, &Request, &Result<Response>) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(observer));
        self
    }

    /// Whether any condition matches `outcome`.
    pub fn should_retry(&self, outcome: &Result<Response>) -> bool {
        self.conditions.iter().any(|condition| condition(outcome))
    }

    /// Calculate delay for a given attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.backoff.delay_for_attempt(attempt)
    }

    /// Run `send` until its outcome matches no condition or attempts run out.
    ///
    /// Each attempt gets a fresh copy of `request` with its body
    /// re-materialized. The last outcome is returned unchanged; the only
    /// errors this adds are a body that cannot be replayed and the request's
    /// own deadline or cancellation firing during a backoff.
    pub async fn execute<F, Fut>(&self, request: Request, mut send: F) -> Result<Response>
    where
        F: FnMut(Request) -> Fut,
        Fut: Future<Output = Result<Response>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            let outcome = send(request.replay()?).await;

            if !self.should_retry(&outcome) {
                return outcome;
            }
            if attempt + 1 >= max_attempts {
                debug!(attempts = attempt + 1, "Retry attempts exhausted");
                return outcome;
            }
            if self.retry_only_idempotent && !request.is_idempotent() {
                debug!(method = %request.method(), "Not retrying non-idempotent request");
                return outcome;
            }

            if let Some(observer) = &self.on_retry {
                observer(attempt, &request, &outcome);
            }

            let delay = self.delay_for_attempt(attempt);
            match &outcome {
                Ok(response) => debug!(
                    attempt = attempt + 1,
                    status = %response.status(),
                    delay = ?delay,
                    "Retrying request due to status code"
                ),
                Err(e) => debug!(
                    attempt = attempt + 1,
                    error = %e,
                    delay = ?delay,
                    "Retrying request due to error"
                ),
            }

            request.context().sleep(delay).await?;
            attempt += 1;
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("conditions", &self.conditions.len())
            .field("backoff", &self.backoff)
            .field("retry_only_idempotent", &self.retry_only_idempotent)
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

/// Pipeline stage that re-invokes the rest of the chain per a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryMiddleware {
    policy: Arc<RetryPolicy>,
}

impl RetryMiddleware {
    /// Create a retry stage.
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy: Arc::new(policy),
        }
    }

    /// Get the policy.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl Middleware for RetryMiddleware {
    async fn handle(&self, request: Request, next: Next) -> Result<Response> {
        self.policy
            .execute(request, |attempt| next.clone().run(attempt))
            .await
    }
}
