//! Request coalescing (singleflight).
//!
//! Concurrent GET requests for the same method and URL share one downstream
//! call. Every caller gets its own clone of the outcome. The group ends when
//! that call completes, so a request arriving afterwards starts a fresh call;
//! completed results are the cache stage's job.
//!
//! ```text
//! Request A ──→ downstream
//! Request B ──┐
//! Request C ──┤ wait for A
//! Request D ──┘
//! (1 downstream call, 4 responses)
//! ```

use crate::middleware::{Middleware, Next};
use crate::{HttpClientError, Request, Response, Result};
use async_trait::async_trait;
use http::Method;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

type SharedOutcome = Option<std::result::Result<Response, Arc<HttpClientError>>>;

type Groups = Arc<Mutex<HashMap<String, Group>>>;

/// How long the shared call may run: until the latest deadline among the
/// callers that joined it, or without limit once any of them has none.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bound {
    Until(Instant),
    Unbounded,
}

impl Bound {
    fn from_deadline(deadline: Option<Instant>) -> Self {
        deadline.map_or(Self::Unbounded, Self::Until)
    }

    fn extend(&mut self, deadline: Option<Instant>) {
        *self = match (*self, deadline) {
            (Self::Until(current), Some(deadline)) => Self::Until(current.max(deadline)),
            _ => Self::Unbounded,
        };
    }
}

#[derive(Debug)]
struct Group {
    outcome: watch::Receiver<SharedOutcome>,
    bound: watch::Sender<Bound>,
}

/// Coalesces concurrent identical GET requests.
///
/// The shared call runs in its own task without any caller's cancellation,
/// so one caller giving up never fails the others. Each caller waits for the
/// shared outcome under its own context. The shared call itself is abandoned
/// with [`HttpClientError::DeadlineExceeded`] once the latest deadline among
/// its callers has passed; if any caller has no deadline, only the transport's
/// own timeout bounds it.
#[derive(Debug, Clone, Default)]
pub struct SingleflightMiddleware {
    groups: Groups,
}

impl SingleflightMiddleware {
    /// Create a coalescing stage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys with a call in flight.
    pub fn in_flight(&self) -> usize {
        self.groups.lock().len()
    }

    /// The coalescing key for `request`.
    pub fn key_for(request: &Request) -> String {
        format!("{} {}", request.method(), request.url())
    }
}

/// Removes a group from the map when its call finishes, even by panicking.
struct GroupGuard {
    groups: Groups,
    key: String,
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        self.groups.lock().remove(&self.key);
    }
}

#[async_trait]
impl Middleware for SingleflightMiddleware {
    async fn handle(&self, request: Request, next: Next) -> Result<Response> {
        if request.method() != Method::GET {
            return next.run(request).await;
        }

        let key = Self::key_for(&request);
        let deadline = request.context().deadline();
        let (mut rx, leader) = {
            let mut groups = self.groups.lock();
            match groups.get(&key) {
                Some(group) => {
                    group.bound.send_modify(|bound| bound.extend(deadline));
                    (group.outcome.clone(), None)
                }
                None => {
                    let (tx, rx) = watch::channel(None);
                    let (bound_tx, bound_rx) = watch::channel(Bound::from_deadline(deadline));
                    groups.insert(
                        key.clone(),
                        Group {
                            outcome: rx.clone(),
                            bound: bound_tx,
                        },
                    );
                    (rx, Some((tx, bound_rx)))
                }
            }
        };

        match leader {
            Some((tx, bound)) => {
                debug!(key = %key, "Starting shared request");
                let guard = GroupGuard {
                    groups: self.groups.clone(),
                    key: key.clone(),
                };
                let shared = request.detached();
                tokio::spawn(async move {
                    let outcome = run_bounded(next.run(shared), bound)
                        .await
                        .map_err(Arc::new);
                    // New arrivals must start a fresh call once the outcome is out
                    drop(guard);
                    let _ = tx.send(Some(outcome));
                });
            }
            None => debug!(key = %key, "Joining in-flight request"),
        }

        request
            .context()
            .run(async {
                let outcome = rx.wait_for(Option::is_some).await.map_err(|_| {
                    HttpClientError::Middleware("shared request was abandoned".to_string())
                })?;
                match &*outcome {
                    Some(Ok(response)) => Ok(response.clone()),
                    Some(Err(e)) => Err(HttpClientError::Shared(e.clone())),
                    None => Err(HttpClientError::Middleware(
                        "shared request produced no outcome".to_string(),
                    )),
                }
            })
            .await
    }
}

/// Drive `call` until it completes or the group's bound passes.
async fn run_bounded<F>(call: F, mut bound: watch::Receiver<Bound>) -> Result<Response>
where
    F: Future<Output = Result<Response>>,
{
    tokio::pin!(call);
    loop {
        let current = *bound.borrow_and_update();
        let expiry = async {
            match current {
                Bound::Until(deadline) => tokio::time::sleep_until(deadline).await,
                Bound::Unbounded => std::future::pending().await,
            }
        };

        tokio::select! {
            outcome = &mut call => return outcome,
            changed = bound.changed() => {
                if changed.is_err() {
                    return (&mut call).await;
                }
            }
            _ = expiry => {
                if *bound.borrow() == current {
                    debug!("Every coalesced caller's deadline has passed, abandoning shared request");
                    return Err(HttpClientError::DeadlineExceeded);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RequestContext;
    use crate::middleware::MiddlewareChain;
    use crate::mock::{MockResponse, MockTransport};
    use futures::future::join_all;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn setup() -> (Arc<MockTransport>, MiddlewareChain, SingleflightMiddleware) {
        let mock = Arc::new(MockTransport::new());
        let stage = SingleflightMiddleware::new();
        let chain = MiddlewareChain::from_transport(mock.clone()).with_middleware(stage.clone());
        (mock, chain, stage)
    }

    fn request(method: Method, path: &str) -> Request {
        Request::parse(method, &format!("http://api.test{path}")).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_gets_share_one_call() {
        let (mock, chain, stage) = setup();
        let counter = Arc::new(AtomicUsize::new(0));
        let hits = counter.clone();
        mock.on_fn(Method::GET, "/report", move |_| {
            let n = hits.fetch_add(1, Ordering::SeqCst);
            Ok(MockResponse::new(200)
                .with_body(format!("report #{n}"))
                .with_delay(Duration::from_millis(100)))
        });

        let responses = join_all((0..8).map(|_| chain.execute(request(Method::GET, "/report")))).await;

        assert_eq!(mock.call_count(), 1);
        for response in responses {
            assert_eq!(response.unwrap().text().unwrap(), "report #0");
        }
        assert_eq!(stage.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_posts_are_never_coalesced() {
        let (mock, chain, _) = setup();
        mock.on_post(
            "/orders",
            MockResponse::new(201).with_delay(Duration::from_millis(100)),
        );

        let responses = join_all((0..5).map(|_| chain.execute(request(Method::POST, "/orders")))).await;

        assert!(responses.iter().all(|r| r.is_ok()));
        assert_eq!(mock.call_count(), 5);
    }

    #[tokio::test]
    async fn test_sequential_gets_start_fresh_calls() {
        let (mock, chain, _) = setup();

        chain.execute(request(Method::GET, "/a")).await.unwrap();
        chain.execute(request(Method::GET, "/a")).await.unwrap();

        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_are_shared() {
        let (mock, chain, _) = setup();
        mock.on_fn(Method::GET, "/down", |_| {
            Err(HttpClientError::Connection("connection refused".to_string()))
        });

        let results = join_all((0..3).map(|_| chain.execute(request(Method::GET, "/down")))).await;

        for result in results {
            let err = result.unwrap_err();
            assert!(matches!(err, HttpClientError::Shared(_)));
            assert!(err.is_network());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_caller_timing_out_does_not_affect_others() {
        let (mock, chain, _) = setup();
        mock.on_get(
            "/slow",
            MockResponse::new(200)
                .with_body("done")
                .with_delay(Duration::from_millis(200)),
        );

        let impatient = request(Method::GET, "/slow")
            .with_context(RequestContext::new().with_timeout(Duration::from_millis(50)));

        let (first, second, third) = tokio::join!(
            chain.execute(impatient),
            chain.execute(request(Method::GET, "/slow")),
            chain.execute(request(Method::GET, "/slow")),
        );

        assert!(first.unwrap_err().is_timeout());
        assert_eq!(second.unwrap().text().unwrap(), "done");
        assert_eq!(third.unwrap().text().unwrap(), "done");
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_call_is_abandoned_after_latest_deadline() {
        let (mock, chain, stage) = setup();
        mock.on_get(
            "/hung",
            MockResponse::new(200).with_delay(Duration::from_secs(3600)),
        );

        let with_timeout = |timeout| {
            request(Method::GET, "/hung").with_context(RequestContext::new().with_timeout(timeout))
        };

        let start = tokio::time::Instant::now();
        let (first, second) = tokio::join!(
            chain.execute(with_timeout(Duration::from_secs(1))),
            chain.execute(with_timeout(Duration::from_secs(3))),
        );

        assert!(first.unwrap_err().is_timeout());
        assert!(second.unwrap_err().is_timeout());
        assert_eq!(start.elapsed(), Duration::from_secs(3));

        // The shared call gives up with the last caller, so the group is gone
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(stage.in_flight(), 0);

        let fresh = chain.execute(with_timeout(Duration::from_secs(1))).await;
        assert!(fresh.unwrap_err().is_timeout());
        assert_eq!(mock.call_count(), 2);
    }

    #[test]
    fn test_bound_extends_to_latest_deadline() {
        let now = Instant::now();
        let mut bound = Bound::from_deadline(Some(now));

        bound.extend(Some(now + Duration::from_secs(2)));
        bound.extend(Some(now + Duration::from_secs(1)));
        assert_eq!(bound, Bound::Until(now + Duration::from_secs(2)));

        bound.extend(None);
        assert_eq!(bound, Bound::Unbounded);
        bound.extend(Some(now));
        assert_eq!(bound, Bound::Unbounded);
    }
}
