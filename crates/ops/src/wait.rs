//! Bounded read-back polling after a mutating call.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::{counter, histogram};
use steward_core::{ConvergenceError, LocalId, Mismatch, ObjectStore, RemoteObject};
use tracing::{debug, warn};

use crate::Error;

/// Time source for the poller.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    async fn sleep(&self, d: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, d: Duration) {
        tokio::time::sleep(d).await;
    }
}

/// Virtual clock: `sleep` returns at once and moves time forward.
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    state: Mutex<ManualState>,
}

#[derive(Debug, Default)]
struct ManualState {
    offset: Duration,
    sleeps: Vec<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self { base: Instant::now(), state: Mutex::default() }
    }

    pub fn advance(&self, d: Duration) {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).offset += d;
    }

    /// Virtual time since the clock was created.
    pub fn elapsed(&self) -> Duration {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).offset
    }

    /// Every sleep requested so far, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).sleeps.clone()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + self.elapsed()
    }

    async fn sleep(&self, d: Duration) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.offset += d;
        state.sleeps.push(d);
    }
}

#[async_trait]
impl<C: Clock + ?Sized> Clock for std::sync::Arc<C> {
    fn now(&self) -> Instant {
        (**self).now()
    }

    async fn sleep(&self, d: Duration) {
        (**self).sleep(d).await
    }
}

/// Floor for the sleep between reads; a zero interval would never back off.
pub const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Longest wait honoured; larger timeouts are capped.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(7 * 24 * 3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    pub timeout: Duration,
    /// First sleep; doubled after every failed check. Never below `MIN_INTERVAL`.
    pub interval: Duration,
    pub max_interval: Duration,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(10),
        }
    }
}

/// Predicate over the latest read; `None` while the object is not visible.
pub trait Condition: Send + Sync {
    fn check(&self, obj: Option<&RemoteObject>) -> Result<(), Mismatch>;
}

impl<F> Condition for F
where
    F: Fn(Option<&RemoteObject>) -> Result<(), Mismatch> + Send + Sync,
{
    fn check(&self, obj: Option<&RemoteObject>) -> Result<(), Mismatch> {
        self(obj)
    }
}

/// Read `id` until `cond` holds or `opts.timeout` passes.
///
/// The first read is immediate. Sleeps are clipped to the deadline and no read
/// is issued after it. Store errors abort at once; only mismatches retry.
pub async fn await_condition<S, C>(
    store: &S,
    id: &LocalId,
    cond: impl Condition,
    opts: &PollOptions,
    clock: &C,
) -> Result<Option<RemoteObject>, Error>
where
    S: ObjectStore + ?Sized,
    C: Clock + ?Sized,
{
    let start = clock.now();
    let deadline = start.checked_add(opts.timeout.min(MAX_TIMEOUT)).unwrap_or(start);
    let max_interval = opts.max_interval.max(MIN_INTERVAL);
    let mut interval = opts.interval.clamp(MIN_INTERVAL, max_interval);
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        counter!("converge_attempts_total", 1u64);
        let obj = store.get(id).await?;
        let mismatch = match cond.check(obj.as_ref()) {
            Ok(()) => {
                let elapsed = clock.now().saturating_duration_since(start);
                histogram!("converge_latency_ms", elapsed.as_secs_f64() * 1000.0);
                debug!(%id, attempts, ?elapsed, "converged");
                return Ok(obj);
            }
            Err(m) => m,
        };
        let now = clock.now();
        if now >= deadline {
            let elapsed = now.saturating_duration_since(start);
            counter!("converge_timeouts_total", 1u64);
            warn!(%id, attempts, ?elapsed, %mismatch, "gave up waiting for convergence");
            return Err(ConvergenceError {
                id: id.clone(),
                expected: mismatch.expected,
                observed: mismatch.observed,
                attempts,
                elapsed,
            }
            .into());
        }
        let nap = interval.min(deadline - now);
        debug!(%id, attempts, %mismatch, ?nap, "not converged yet");
        clock.sleep(nap).await;
        interval = interval.saturating_mul(2).min(max_interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use steward_core::StoreError;
    use steward_store::{MemoryStore, StoreOp};

    fn value_is(want: i64) -> impl Condition {
        move |obj: Option<&RemoteObject>| match obj.and_then(|o| o.as_json()["value"].as_i64()) {
            Some(v) if v == want => Ok(()),
            Some(v) => Err(Mismatch::new(format!("value={want}"), format!("value={v}"))),
            None => Err(Mismatch::new(format!("value={want}"), "not found")),
        }
    }

    async fn seeded(lag: u32) -> (MemoryStore, LocalId) {
        let store = MemoryStore::new().with_read_lag(lag);
        let obj = RemoteObject::from_json(json!({"metadata": {"name": "high"}, "value": 7}));
        store.create(&obj).await.unwrap();
        (store, LocalId::cluster("high"))
    }

    #[tokio::test]
    async fn first_read_is_immediate() {
        let (store, id) = seeded(0).await;
        let clock = ManualClock::new();
        let got = await_condition(&store, &id, value_is(7), &PollOptions::default(), &clock).await.unwrap();
        assert!(got.is_some());
        assert!(clock.sleeps().is_empty());
        assert_eq!(store.calls(StoreOp::Get), 1);
    }

    #[tokio::test]
    async fn backs_off_through_lagging_reads() {
        let (store, id) = seeded(3).await;
        let clock = ManualClock::new();
        await_condition(&store, &id, value_is(7), &PollOptions::default(), &clock).await.unwrap();
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_millis(500), Duration::from_millis(1000), Duration::from_millis(2000)]
        );
        assert_eq!(store.calls(StoreOp::Get), 4);
    }

    #[tokio::test]
    async fn timeout_is_bounded_by_the_deadline() {
        let (store, id) = seeded(0).await;
        let clock = ManualClock::new();
        let err = await_condition(&store, &id, value_is(8), &PollOptions::default(), &clock).await.unwrap_err();
        let c = match err {
            Error::Convergence(c) => c,
            other => panic!("expected convergence error, got {other}"),
        };
        assert_eq!(c.expected, "value=8");
        assert_eq!(c.observed, "value=7");
        assert_eq!(c.elapsed, Duration::from_secs(60));
        assert_eq!(c.attempts, 11);
        assert_eq!(clock.sleeps().last(), Some(&Duration::from_millis(4500)));
        assert!(clock.sleeps().iter().all(|d| *d <= Duration::from_secs(10)));
    }

    #[tokio::test]
    async fn store_errors_abort_without_retry() {
        let (store, id) = seeded(0).await;
        store.fail_next(StoreOp::Get, StoreError::Forbidden("denied".into()));
        let clock = ManualClock::new();
        let err = await_condition(&store, &id, value_is(7), &PollOptions::default(), &clock).await.unwrap_err();
        assert!(matches!(err, Error::Store(StoreError::Forbidden(_))));
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn zero_interval_still_backs_off_and_times_out() {
        let (store, id) = seeded(0).await;
        let clock = ManualClock::new();
        let opts = PollOptions {
            timeout: Duration::from_secs(1),
            interval: Duration::ZERO,
            max_interval: Duration::ZERO,
        };
        let err = await_condition(&store, &id, value_is(8), &opts, &clock).await.unwrap_err();
        assert!(matches!(err, Error::Convergence(_)), "{err}");
        assert_eq!(clock.elapsed(), Duration::from_secs(1));
        assert!(clock.sleeps().iter().all(|d| *d > Duration::ZERO));
        assert_eq!(clock.sleeps().len(), 100);
    }

    #[tokio::test]
    async fn huge_timeout_is_capped() {
        let (store, id) = seeded(1).await;
        let clock = ManualClock::new();
        let opts = PollOptions { timeout: Duration::MAX, ..PollOptions::default() };
        let got = await_condition(&store, &id, value_is(7), &opts, &clock).await.unwrap();
        assert!(got.is_some());
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(500)]);

        let never = await_condition(&store, &id, value_is(8), &PollOptions { timeout: Duration::MAX, ..opts }, &clock)
            .await
            .unwrap_err();
        match never {
            Error::Convergence(c) => assert_eq!(c.elapsed, MAX_TIMEOUT),
            other => panic!("expected convergence error, got {other}"),
        }
    }

    #[tokio::test]
    async fn zero_timeout_reads_once() {
        let (store, id) = seeded(0).await;
        let clock = ManualClock::new();
        let opts = PollOptions { timeout: Duration::ZERO, ..PollOptions::default() };
        let err = await_condition(&store, &id, value_is(1), &opts, &clock).await.unwrap_err();
        assert!(matches!(err, Error::Convergence(ConvergenceError { attempts: 1, .. })));
    }
}
