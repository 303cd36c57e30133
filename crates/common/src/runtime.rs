//! A small seam around "what time is it," "sleep," and "get randomness,"
//! so every worker loop can be driven by a deterministic fake clock/rng in
//! tests instead of real wall time. This is deliberately much smaller than
//! a full deterministic-simulation framework: it covers exactly the calls
//! the ETL/backfill/archival/query workers make, not a whole-system
//! simulation harness.

use std::{
    future::Future,
    time::Duration,
};

use chrono::{
    DateTime,
    Utc,
};
use rand::{
    rngs::StdRng,
    Rng,
    SeedableRng,
};

use crate::types::TimestampSecs;

pub trait Runtime: Clone + Send + Sync + 'static {
    /// Current wall-clock time.
    fn now(&self) -> DateTime<Utc>;

    /// Current wall-clock time as whole seconds since epoch.
    fn now_secs(&self) -> TimestampSecs {
        self.now().timestamp()
    }

    /// Suspend the calling task for `duration`. Every worker tick loop
    /// suspends here between iterations, and every retry loop suspends
    /// here for its backoff delay -- these are the suspension points the
    /// concurrency model requires I/O-bound workers to yield at.
    fn wait(&self, duration: Duration) -> impl Future<Output = ()> + Send;

    /// Run `f` against this runtime's randomness source. Takes a closure
    /// rather than exposing the RNG type directly so production and test
    /// runtimes can use different RNG implementations transparently.
    fn with_rng<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut dyn rand::RngCore) -> R;

    /// Spawn a task that runs concurrently with the caller.
    fn spawn<F>(&self, future: F) -> tokio::task::JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static;
}

/// Production `Runtime`: real wall time, real `tokio::time::sleep`, a
/// thread-local CSPRNG reseeded per call (cheap and adequate for jitter --
/// this is not used for anything security-sensitive).
#[derive(Clone, Copy, Debug, Default)]
pub struct ProdRuntime;

impl Runtime for ProdRuntime {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn wait(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn with_rng<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut dyn rand::RngCore) -> R,
    {
        let mut rng = rand::rng();
        f(&mut rng)
    }

    fn spawn<F>(&self, future: F) -> tokio::task::JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        tokio::spawn(future)
    }
}

/// Test `Runtime`: a fake clock that only advances when `wait` is awaited
/// (so tests run in microseconds of real time regardless of simulated
/// durations) and a seeded `StdRng` for reproducible jitter.
#[derive(Clone)]
pub struct TestRuntime {
    inner: std::sync::Arc<std::sync::Mutex<TestRuntimeInner>>,
}

struct TestRuntimeInner {
    now: DateTime<Utc>,
    rng: StdRng,
}

impl TestRuntime {
    pub fn new(start: DateTime<Utc>, seed: u64) -> Self {
        Self {
            inner: std::sync::Arc::new(std::sync::Mutex::new(TestRuntimeInner {
                now: start,
                rng: StdRng::seed_from_u64(seed),
            })),
        }
    }
}

impl Runtime for TestRuntime {
    fn now(&self) -> DateTime<Utc> {
        self.inner.lock().unwrap().now
    }

    async fn wait(&self, duration: Duration) {
        let mut inner = self.inner.lock().unwrap();
        inner.now += chrono::Duration::from_std(duration).unwrap_or_default();
    }

    fn with_rng<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut dyn rand::RngCore) -> R,
    {
        let mut inner = self.inner.lock().unwrap();
        f(&mut inner.rng)
    }

    fn spawn<F>(&self, future: F) -> tokio::task::JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        tokio::spawn(future)
    }
}
