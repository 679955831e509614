//! Keyed circuit breaker.
//!
//! One [`CircuitBreaker`] tracks an independent state machine per key
//! (usually `host:port`), so a single instance protects many downstream
//! services.
//!
//! ## States
//!
//! - **Closed**: requests pass through; consecutive failures are counted
//! - **Open**: requests are rejected with [`HttpClientError::CircuitOpen`]
//! - **Half-Open**: a limited number of trial requests test for recovery
//!
//! The Open to Half-Open transition happens on the first [`allow`](CircuitBreaker::allow)
//! call after the reset timeout; there is no background timer.

use crate::middleware::{Middleware, Next};
use crate::{HttpClientError, Request, Response, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, requests are allowed.
    Closed,
    /// Circuit is open, requests are rejected.
    Open,
    /// Circuit is half-open, limited requests are allowed for testing.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "Closed"),
            Self::Open => write!(f, "Open"),
            Self::HalfOpen => write!(f, "HalfOpen"),
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures to open the circuit.
    pub failure_threshold: u32,
    /// Number of consecutive half-open successes to close the circuit.
    pub success_threshold: u32,
    /// Time to wait in Open before admitting a trial request.
    pub reset_timeout: Duration,
    /// Trial requests allowed in flight while half-open.
    ///
    /// `None` uses the success threshold.
    pub half_open_max_requests: Option<u32>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            reset_timeout: Duration::from_secs(30),
            half_open_max_requests: None,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new circuit breaker config.
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            reset_timeout,
            ..Default::default()
        }
    }

    /// Set the success threshold to close the circuit.
    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    /// Set the number of concurrent half-open trial requests.
    pub fn with_half_open_requests(mut self, count: u32) -> Self {
        self.half_open_max_requests = Some(count);
        self
    }

    fn failure_threshold(&self) -> u32 {
        self.failure_threshold.max(1)
    }

    fn success_threshold(&self) -> u32 {
        self.success_threshold.max(1)
    }

    fn half_open_limit(&self) -> u32 {
        self.half_open_max_requests
            .unwrap_or(self.success_threshold)
            .max(1)
    }
}

/// Called on every state transition with the key, old state and new state.
pub type StateObserver = Arc<dyn Fn(&str, CircuitState, CircuitState) + Send + Sync>;

#[derive(Debug)]
struct Circuit {
    state: CircuitState,
    failures: u32,
    successes: u32,
    half_open_in_flight: u32,
    opened_at: Option<Instant>,
}

impl Circuit {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failures: 0,
            successes: 0,
            half_open_in_flight: 0,
            opened_at: None,
        }
    }

    fn transition(&mut self, to: CircuitState) -> Option<(CircuitState, CircuitState)> {
        let from = self.state;
        if from == to {
            return None;
        }

        self.state = to;
        self.failures = 0;
        self.successes = 0;
        self.half_open_in_flight = 0;
        self.opened_at = (to == CircuitState::Open).then(Instant::now);
        Some((from, to))
    }
}

/// Per-key circuit breaker.
///
/// Each operation is an atomic check-and-update on the key's state.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    circuits: DashMap<String, Circuit>,
    rejections: AtomicU64,
    observer: Option<StateObserver>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            circuits: DashMap::new(),
            rejections: AtomicU64::new(0),
            observer: None,
        }
    }

    /// Observe state transitions.
    pub fn on_state_change<F>(mut self, observer: F) -> Self
    where
        F: Fn(&str, CircuitState, CircuitState) + Send + Sync + 'static,
    {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Get the configuration.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Check whether a request for `key` may proceed.
    ///
    /// An Open circuit whose reset timeout has elapsed moves to Half-Open and
    /// admits this call as a trial.
    pub fn allow(&self, key: &str) -> Result<()> {
        let (allowed, changed) = {
            let mut circuit = self
                .circuits
                .entry(key.to_string())
                .or_insert_with(Circuit::new);

            let mut changed = None;
            if circuit.state == CircuitState::Open
                && circuit
                    .opened_at
                    .is_some_and(|opened| opened.elapsed() >= self.config.reset_timeout)
            {
                changed = circuit.transition(CircuitState::HalfOpen);
            }

            let allowed = match circuit.state {
                CircuitState::Closed => true,
                CircuitState::Open => false,
                CircuitState::HalfOpen => {
                    if circuit.half_open_in_flight < self.config.half_open_limit() {
                        circuit.half_open_in_flight += 1;
                        true
                    } else {
                        false
                    }
                }
            };
            (allowed, changed)
        };

        self.notify(key, changed);

        if allowed {
            Ok(())
        } else {
            self.rejections.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "Circuit breaker rejected request");
            Err(HttpClientError::CircuitOpen {
                key: key.to_string(),
            })
        }
    }

    /// Record a successful request for `key`.
    pub fn record_success(&self, key: &str) {
        let changed = {
            let mut circuit = self
                .circuits
                .entry(key.to_string())
                .or_insert_with(Circuit::new);

            match circuit.state {
                CircuitState::Closed => {
                    circuit.failures = 0;
                    None
                }
                CircuitState::HalfOpen => {
                    circuit.half_open_in_flight = circuit.half_open_in_flight.saturating_sub(1);
                    circuit.successes += 1;
                    if circuit.successes >= self.config.success_threshold() {
                        circuit.transition(CircuitState::Closed)
                    } else {
                        None
                    }
                }
                CircuitState::Open => {
                    debug!(key = %key, "Success recorded while circuit open, ignoring");
                    None
                }
            }
        };

        self.notify(key, changed);
    }

    /// Record a failed request for `key`.
    pub fn record_failure(&self, key: &str) {
        let changed = {
            let mut circuit = self
                .circuits
                .entry(key.to_string())
                .or_insert_with(Circuit::new);

            match circuit.state {
                CircuitState::Closed => {
                    circuit.failures += 1;
                    if circuit.failures >= self.config.failure_threshold() {
                        circuit.transition(CircuitState::Open)
                    } else {
                        None
                    }
                }
                // Any failure in half-open state reopens the circuit
                CircuitState::HalfOpen => circuit.transition(CircuitState::Open),
                CircuitState::Open => None,
            }
        };

        self.notify(key, changed);
    }

    /// Give back a half-open trial slot for an attempt that never completed.
    pub fn release(&self, key: &str) {
        if let Some(mut circuit) = self.circuits.get_mut(key)
            && circuit.state == CircuitState::HalfOpen
        {
            circuit.half_open_in_flight = circuit.half_open_in_flight.saturating_sub(1);
        }
    }

    /// Record an attempt's outcome using [`is_failure`].
    ///
    /// Errors raised on this side of the wire (cancellation, deadlines,
    /// rate limiting, body or auth problems) say nothing about the host and
    /// only release the attempt's trial slot.
    pub fn record(&self, key: &str, outcome: &Result<Response>) {
        match outcome {
            Ok(response) if response.is_server_error() => self.record_failure(key),
            Ok(_) => self.record_success(key),
            Err(e) => self.record_error(key, e),
        }
    }

    fn record_error(&self, key: &str, error: &HttpClientError) {
        if is_failure_error(error) {
            self.record_failure(key);
        } else if error.status_code().is_some() {
            self.record_success(key);
        } else {
            self.release(key);
        }
    }

    /// Run `f` under the breaker for `key`, recording its outcome.
    pub async fn execute<F, Fut>(&self, key: &str, f: F) -> Result<Response>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Response>>,
    {
        self.allow(key)?;
        let mut slot = TrialSlot::new(self, key);
        let outcome = f().await;
        slot.disarm();
        self.record(key, &outcome);
        outcome
    }

    /// Run an arbitrary fallible operation under the breaker for `key`.
    ///
    /// Errors are classified as in [`record`](Self::record).
    pub async fn call<F, Fut, T>(&self, key: &str, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.allow(key)?;
        let mut slot = TrialSlot::new(self, key);
        let outcome = f().await;
        slot.disarm();
        match &outcome {
            Ok(_) => self.record_success(key),
            Err(e) => self.record_error(key, e),
        }
        outcome
    }

    /// Get the state for `key`. Unknown keys are Closed.
    pub fn state(&self, key: &str) -> CircuitState {
        self.circuits
            .get(key)
            .map(|circuit| circuit.state)
            .unwrap_or(CircuitState::Closed)
    }

    /// Get the consecutive failure count for `key`.
    pub fn failure_count(&self, key: &str) -> u32 {
        self.circuits
            .get(key)
            .map(|circuit| circuit.failures)
            .unwrap_or(0)
    }

    /// Reset `key` to the closed state.
    pub fn reset(&self, key: &str) {
        let changed = self
            .circuits
            .get_mut(key)
            .and_then(|mut circuit| circuit.transition(CircuitState::Closed));
        self.notify(key, changed);
    }

    /// Forget every key.
    pub fn reset_all(&self) {
        self.circuits.clear();
    }

    /// Keys with tracked state.
    pub fn keys(&self) -> Vec<String> {
        self.circuits.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Total requests rejected across all keys.
    pub fn total_rejections(&self) -> u64 {
        self.rejections.load(Ordering::Relaxed)
    }

    fn notify(&self, key: &str, changed: Option<(CircuitState, CircuitState)>) {
        let Some((from, to)) = changed else {
            return;
        };

        match to {
            CircuitState::Open => warn!(key = %key, from = %from, "Circuit breaker opening"),
            CircuitState::Closed => info!(key = %key, from = %from, "Circuit breaker closing"),
            CircuitState::HalfOpen => {
                debug!(key = %key, "Circuit breaker transitioning to half-open")
            }
        }

        if let Some(observer) = &self.observer {
            observer(key, from, to);
        }
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("keys", &self.circuits.len())
            .field("rejections", &self.total_rejections())
            .finish()
    }
}

/// Whether an attempt's outcome counts against the breaker.
///
/// 5xx responses and network errors are failures, matching the retry
/// stage's `retry_on_status_5xx` and `retry_on_network_error` conditions.
/// 4xx responses, including 429, are not.
pub fn is_failure(outcome: &Result<Response>) -> bool {
    match outcome {
        Ok(response) => response.is_server_error(),
        Err(e) => is_failure_error(e),
    }
}

fn is_failure_error(error: &HttpClientError) -> bool {
    error.is_network() || error.status_code().is_some_and(|status| status >= 500)
}

/// Releases a half-open trial slot if the attempt is dropped before completing.
struct TrialSlot<'a> {
    breaker: &'a CircuitBreaker,
    key: &'a str,
    armed: bool,
}

impl<'a> TrialSlot<'a> {
    fn new(breaker: &'a CircuitBreaker, key: &'a str) -> Self {
        Self {
            breaker,
            key,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TrialSlot<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.release(self.key);
        }
    }
}

/// Pipeline stage guarding each destination host with a [`CircuitBreaker`].
#[derive(Debug, Clone)]
pub struct CircuitBreakerMiddleware {
    breaker: Arc<CircuitBreaker>,
}

impl CircuitBreakerMiddleware {
    /// Guard requests with `breaker`, keyed by `host:port`.
    pub fn new(breaker: Arc<CircuitBreaker>) -> Self {
        Self { breaker }
    }

    /// Get the breaker.
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }
}

#[async_trait]
impl Middleware for CircuitBreakerMiddleware {
    async fn handle(&self, request: Request, next: Next) -> Result<Response> {
        let key = request.host_key();
        self.breaker.execute(&key, || next.run(request)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::MiddlewareChain;
    use crate::mock::{MockResponse, MockTransport};
    use http::Method;
    use parking_lot::Mutex;

    fn breaker(failures: u32, successes: u32, reset: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            CircuitBreakerConfig::new(failures, reset).with_success_threshold(successes),
        )
    }

    #[test]
    fn test_circuit_breaker_opens_after_failures() {
        let cb = breaker(3, 2, Duration::from_secs(30));

        assert_eq!(cb.state("api:443"), CircuitState::Closed);
        assert!(cb.allow("api:443").is_ok());

        cb.record_failure("api:443");
        cb.record_failure("api:443");
        assert_eq!(cb.state("api:443"), CircuitState::Closed);

        cb.record_failure("api:443");
        assert_eq!(cb.state("api:443"), CircuitState::Open);

        let err = cb.allow("api:443").unwrap_err();
        assert!(err.is_circuit_open());
        assert_eq!(cb.total_rejections(), 1);
    }

    #[test]
    fn test_success_resets_failures() {
        let cb = breaker(3, 2, Duration::from_secs(30));

        cb.record_failure("k");
        cb.record_failure("k");
        cb.record_success("k");

        assert_eq!(cb.failure_count("k"), 0);
        assert_eq!(cb.state("k"), CircuitState::Closed);
    }

    #[test]
    fn test_keys_are_independent() {
        let cb = breaker(1, 1, Duration::from_secs(30));

        cb.record_failure("a:80");
        assert!(cb.allow("a:80").is_err());
        assert!(cb.allow("b:80").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_recovery() {
        let cb = breaker(2, 2, Duration::from_secs(10));

        cb.record_failure("k");
        cb.record_failure("k");
        assert!(cb.allow("k").is_err());

        tokio::time::advance(Duration::from_secs(10)).await;

        // Lazily moves to half-open on the checking call
        assert_eq!(cb.state("k"), CircuitState::Open);
        assert!(cb.allow("k").is_ok());
        assert_eq!(cb.state("k"), CircuitState::HalfOpen);

        cb.record_success("k");
        assert_eq!(cb.state("k"), CircuitState::HalfOpen);
        assert!(cb.allow("k").is_ok());
        cb.record_success("k");
        assert_eq!(cb.state("k"), CircuitState::Closed);

        for _ in 0..100 {
            assert!(cb.allow("k").is_ok());
            cb.record_success("k");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let cb = breaker(1, 3, Duration::from_secs(5));

        cb.record_failure("k");
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(cb.allow("k").is_ok());

        cb.record_failure("k");
        assert_eq!(cb.state("k"), CircuitState::Open);
        assert!(cb.allow("k").is_err());

        // New open timestamp
        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(cb.allow("k").is_err());
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cb.allow("k").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_limits_trials() {
        let cb = CircuitBreaker::new(
            CircuitBreakerConfig::new(1, Duration::from_secs(1))
                .with_success_threshold(3)
                .with_half_open_requests(1),
        );

        cb.record_failure("k");
        tokio::time::advance(Duration::from_secs(1)).await;

        assert!(cb.allow("k").is_ok());
        assert!(cb.allow("k").is_err());

        cb.record_success("k");
        assert!(cb.allow("k").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_observer_and_reset() {
        let transitions = Arc::new(Mutex::new(Vec::new()));
        let seen = transitions.clone();
        let cb = breaker(1, 1, Duration::from_secs(1)).on_state_change(move |key, from, to| {
            seen.lock().push((key.to_string(), from, to));
        });

        cb.record_failure("k");
        tokio::time::advance(Duration::from_secs(1)).await;
        cb.allow("k").unwrap();
        cb.record_success("k");
        cb.record_failure("k");
        cb.record_failure("k");
        cb.reset("k");

        assert_eq!(
            *transitions.lock(),
            vec![
                ("k".to_string(), CircuitState::Closed, CircuitState::Open),
                ("k".to_string(), CircuitState::Open, CircuitState::HalfOpen),
                ("k".to_string(), CircuitState::HalfOpen, CircuitState::Closed),
                ("k".to_string(), CircuitState::Closed, CircuitState::Open),
                ("k".to_string(), CircuitState::Open, CircuitState::Closed),
            ]
        );
        assert_eq!(cb.state("k"), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_call_counts_errors() {
        let cb = breaker(2, 1, Duration::from_secs(30));

        for _ in 0..2 {
            let result: Result<()> = cb
                .call("db", || async { Err(HttpClientError::Connection("down".into())) })
                .await;
            assert!(result.is_err());
        }

        let result = cb.call("db", || async { Ok(1) }).await;
        assert!(result.unwrap_err().is_circuit_open());
    }

    #[tokio::test]
    async fn test_cancellation_is_not_a_failure() {
        let cb = breaker(1, 1, Duration::from_secs(30));

        let result: Result<()> = cb.call("k", || async { Err(HttpClientError::Cancelled) }).await;
        assert!(result.unwrap_err().is_cancelled());
        assert_eq!(cb.state("k"), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_middleware_classification() {
        let mock = Arc::new(MockTransport::new());
        mock.on_get("/missing", MockResponse::new(404))
            .on_get("/busy", MockResponse::new(429))
            .on_get("/broken", MockResponse::new(500));

        let cb = Arc::new(breaker(2, 1, Duration::from_secs(30)));
        let chain = MiddlewareChain::from_transport(mock.clone())
            .with_middleware(CircuitBreakerMiddleware::new(cb.clone()));
        let get = |path: &str| Request::parse(Method::GET, &format!("http://svc.local{path}")).unwrap();

        for _ in 0..5 {
            chain.execute(get("/missing")).await.unwrap();
            chain.execute(get("/busy")).await.unwrap();
        }
        assert_eq!(cb.state("svc.local:80"), CircuitState::Closed);

        chain.execute(get("/broken")).await.unwrap();
        chain.execute(get("/broken")).await.unwrap();
        assert_eq!(cb.state("svc.local:80"), CircuitState::Open);

        let calls = mock.call_count();
        let err = chain.execute(get("/missing")).await.unwrap_err();
        assert!(matches!(err, HttpClientError::CircuitOpen { ref key } if key == "svc.local:80"));
        assert_eq!(mock.call_count(), calls);
    }

    #[test]
    fn test_is_failure() {
        let err: Result<Response> = Err(HttpClientError::Connection("refused".into()));
        assert!(is_failure(&err));

        let cancelled: Result<Response> = Err(HttpClientError::Cancelled);
        assert!(!is_failure(&cancelled));

        let deadline: Result<Response> = Err(HttpClientError::DeadlineExceeded);
        assert!(!is_failure(&deadline));

        let replay: Result<Response> = Err(HttpClientError::BodyReplay("gone".into()));
        assert!(!is_failure(&replay));

        let unavailable: Result<Response> = Err(HttpClientError::Response {
            status: 503,
            message: "unavailable".into(),
        });
        assert!(is_failure(&unavailable));
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_errors_release_half_open_slot() {
        let cb = CircuitBreaker::new(
            CircuitBreakerConfig::new(1, Duration::from_secs(1)).with_half_open_requests(1),
        );

        let failed: Result<()> = cb
            .call("k", || async { Err(HttpClientError::Connection("down".into())) })
            .await;
        assert!(failed.is_err());
        tokio::time::advance(Duration::from_secs(1)).await;

        let result: Result<()> = cb
            .call("k", || async { Err(HttpClientError::Auth("no token".into())) })
            .await;
        assert!(result.is_err());

        // The trial slot came back and the circuit neither reopened nor closed
        assert_eq!(cb.state("k"), CircuitState::HalfOpen);
        assert!(cb.allow("k").is_ok());
    }
}
