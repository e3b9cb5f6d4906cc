//! Test cases
//!
//! A [`TestContext`] is created at the start of each test case and handed
//! to the test body. Threads started through it share the case's failure
//! slot, so an assertion that fails on any of them fails the case even
//! though it was raised off the main thread.
//!
//! The lifecycle is `set_up`, the body, then [`TestContext::tear_down`];
//! [`run_case`] drives all three and folds the outcome into a
//! [`CaseResult`].

use std::any::Any;
use std::fmt::Debug;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread as std_thread;
use std::time::{Duration, Instant};

use log::{debug, error, warn};
use serde::Serialize;

use crate::config::Config;
use crate::diagnostics;
use crate::error::{Failure, FailureKind, Interrupted, TaskError};
use crate::interrupt::{self, InterruptHandle};
use crate::pool::{PoolCleaner, TaskHandle, ThreadPool, WorkerPool};
use crate::slot::FailureSlot;
use crate::sync::Latch;
use crate::thread::{TestThread, ThreadState};
use crate::timing::{self, Delays};

/// Work item accepted by [`TestContext::test_in_parallel`]
pub type Action = Box<dyn FnOnce() + Send + 'static>;

struct Inner {
    name: String,
    config: Arc<Config>,
    delays: Delays,
    slot: FailureSlot,
    main: InterruptHandle,
    threads: AtomicUsize,
    pools: spin::Mutex<Vec<Arc<ThreadPool>>>,
}

/// Per-case handle shared by the test body and every thread it starts
#[derive(Clone)]
pub struct TestContext {
    inner: Arc<Inner>,
}

impl TestContext {
    /// Start a test case on the calling thread
    ///
    /// The calling thread becomes the case's main thread; its interrupt
    /// flag is cleared here and checked at teardown.
    pub fn set_up(name: impl Into<String>, config: Arc<Config>) -> Self {
        let name = name.into();
        let delays = Delays::compute(config.delay_factor);
        let main = interrupt::current();
        if main.clear() {
            warn!("{}: cleared stale interrupt on main thread", name);
        }
        debug!("{}: set up with {:?}", name, delays);
        Self {
            inner: Arc::new(Inner {
                name,
                config,
                delays,
                slot: FailureSlot::new(),
                main,
                threads: AtomicUsize::new(0),
                pools: spin::Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn delays(&self) -> Delays {
        self.inner.delays
    }

    /// Record a failure raised on any thread of this case
    ///
    /// Every call is logged together with a thread dump; only the first
    /// failure of the case is kept.
    pub fn record_failure(&self, failure: Failure) {
        error!("{}: {}", self.inner.name, failure);
        diagnostics::dump_test_threads();
        self.inner.slot.record(failure);
    }

    fn fail_with(&self, failure: Failure) -> ! {
        self.record_failure(failure.clone());
        failure.raise()
    }

    #[track_caller]
    pub fn thread_assert(&self, condition: bool) {
        if !condition {
            self.fail_with(Failure::assertion("expected true but was false"));
        }
    }

    #[track_caller]
    pub fn thread_assert_false(&self, condition: bool) {
        if condition {
            self.fail_with(Failure::assertion("expected false but was true"));
        }
    }

    #[track_caller]
    pub fn thread_assert_eq<T: PartialEq + Debug>(&self, expected: T, actual: T) {
        if expected != actual {
            self.fail_with(Failure::assertion(format!(
                "expected:<{:?}> but was:<{:?}>",
                expected, actual
            )));
        }
    }

    #[track_caller]
    pub fn thread_assert_none<T: Debug>(&self, value: Option<T>) {
        if let Some(value) = value {
            self.fail_with(Failure::assertion(format!(
                "expected none but was:<{:?}>",
                value
            )));
        }
    }

    /// Assert both references point at the same object
    #[track_caller]
    pub fn thread_assert_same<T: ?Sized>(&self, expected: &T, actual: &T) {
        if !std::ptr::eq(expected, actual) {
            self.fail_with(Failure::assertion(format!(
                "expected same:<{:p}> was not:<{:p}>",
                expected as *const T, actual as *const T
            )));
        }
    }

    #[track_caller]
    pub fn thread_fail(&self, reason: impl Into<String>) -> ! {
        self.fail_with(Failure::assertion(reason))
    }

    /// Fail because an operation that should have panicked returned
    #[track_caller]
    pub fn thread_should_panic(&self, expected: &str) -> ! {
        self.fail_with(Failure::assertion(format!("should have failed with {}", expected)))
    }

    /// Fail because of a panic or error nobody expected
    #[track_caller]
    pub fn thread_unexpected(&self, cause: Failure) -> ! {
        self.fail_with(
            Failure::unexpected(format!("unexpected failure: {}", cause.message())).with_cause(cause),
        )
    }

    #[track_caller]
    fn thread_unexpected_panic(&self, payload: Box<dyn Any + Send>) -> ! {
        self.thread_unexpected(Failure::from_panic(payload))
    }

    /// Wrap `body` so any panic it raises is recorded, then rethrown
    pub fn checked<F>(&self, body: F) -> impl FnOnce() + Send + 'static
    where
        F: FnOnce() + Send + 'static,
    {
        let ctx = self.clone();
        move || {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(body)) {
                let failure = Failure::from_panic(payload);
                ctx.record_failure(failure.clone());
                panic::resume_unwind(Box::new(failure));
            }
        }
    }

    /// Wrap a body that is expected to be interrupted
    ///
    /// The body must return `Err(Interrupted)`, and the interrupt flag must
    /// be clear afterwards. Returning `Ok` fails the case.
    pub fn checked_interrupted<F>(&self, body: F) -> impl FnOnce() + Send + 'static
    where
        F: FnOnce() -> Result<(), Interrupted> + Send + 'static,
    {
        let ctx = self.clone();
        self.checked(move || match body() {
            Ok(()) => ctx.thread_should_panic("Interrupted"),
            Err(Interrupted) => ctx.thread_assert_false(interrupt::interrupted()),
        })
    }

    /// Start a checked thread running `body`
    pub fn new_started_thread<F>(&self, body: F) -> TestThread
    where
        F: FnOnce() + Send + 'static,
    {
        let n = self.inner.threads.fetch_add(1, Ordering::Relaxed);
        self.new_started_thread_named(format!("{}-{}", self.inner.name, n), body)
    }

    #[track_caller]
    pub fn new_started_thread_named<F>(&self, name: impl Into<String>, body: F) -> TestThread
    where
        F: FnOnce() + Send + 'static,
    {
        let name = name.into();
        match TestThread::spawn(name.clone(), self.checked(body)) {
            Ok(thread) => thread,
            Err(e) => self.fail_with(Failure::unexpected(format!(
                "failed to spawn thread {}: {}",
                name, e
            ))),
        }
    }

    /// Spin until `thread` is blocked, then until `condition` holds
    ///
    /// The condition is only evaluated while the thread is blocked. Fails
    /// if the thread terminates or `timeout` elapses first.
    #[track_caller]
    pub fn wait_for_wait_state_until<C>(&self, thread: &TestThread, timeout: Duration, mut condition: C)
    where
        C: FnMut() -> bool,
    {
        let mut start: Option<Instant> = None;
        loop {
            match thread.state() {
                ThreadState::Waiting => {
                    match panic::catch_unwind(AssertUnwindSafe(&mut condition)) {
                        Ok(true) => return,
                        Ok(false) => {}
                        Err(payload) => self.thread_unexpected_panic(payload),
                    }
                }
                ThreadState::Terminated => self.thread_fail("Unexpected thread termination"),
                ThreadState::Runnable => {}
            }
            match start {
                None => start = Some(Instant::now()),
                Some(start) if start.elapsed() > timeout => {
                    self.thread_assert(thread.is_alive());
                    let state = thread.state();
                    if state == ThreadState::Runnable {
                        self.thread_fail("timed out waiting for thread to enter wait state");
                    }
                    self.thread_fail(format!(
                        "timed out waiting for condition, thread state={:?}",
                        state
                    ));
                }
                Some(_) => {}
            }
            std_thread::yield_now();
        }
    }

    #[track_caller]
    pub fn wait_for_wait_state(&self, thread: &TestThread, timeout: Duration) {
        self.wait_for_wait_state_until(thread, timeout, || true);
    }

    /// [`Self::wait_for_wait_state`] bounded by the long delay
    #[track_caller]
    pub fn wait_for_wait_state_default(&self, thread: &TestThread) {
        self.wait_for_wait_state(thread, self.inner.delays.long);
    }

    /// Wait for `thread` to finish
    ///
    /// On timeout the thread is interrupted, to help it finish before the
    /// next test, and the case fails.
    #[track_caller]
    pub fn await_termination(&self, thread: &TestThread, timeout: Duration) {
        if !thread.join_timeout(timeout) {
            let detail = format!(
                "timed out waiting for thread to terminate, thread={}, state={:?}",
                thread.name(),
                thread.state()
            );
            thread.interrupt();
            self.thread_fail(detail);
        }
    }

    #[track_caller]
    pub fn await_termination_default(&self, thread: &TestThread) {
        self.await_termination(thread, self.inner.delays.long);
    }

    /// Check `thread` is still alive after the short timeout
    #[track_caller]
    pub fn assert_thread_stays_alive(&self, thread: &TestThread) {
        self.assert_thread_stays_alive_for(thread, self.inner.delays.timeout());
    }

    #[track_caller]
    pub fn assert_thread_stays_alive_for(&self, thread: &TestThread, duration: Duration) {
        if timing::delay(duration).is_err() {
            self.fail_with(Failure::interrupted("Unexpected interrupt while checking liveness"));
        }
        self.thread_assert(thread.is_alive());
    }

    #[track_caller]
    pub fn assert_threads_stay_alive(&self, threads: &[&TestThread]) {
        if timing::delay(self.inner.delays.timeout()).is_err() {
            self.fail_with(Failure::interrupted("Unexpected interrupt while checking liveness"));
        }
        for thread in threads {
            self.thread_assert(thread.is_alive());
        }
    }

    /// Guard that joins `pool` when dropped
    pub fn cleaner<'a>(&'a self, pool: &'a dyn WorkerPool) -> PoolCleaner<'a> {
        PoolCleaner::new(self, pool)
    }

    /// Guard that runs `releaser`, then joins `pool`, when dropped
    pub fn cleaner_with_releaser<'a>(
        &'a self,
        pool: &'a dyn WorkerPool,
        releaser: impl FnOnce() + 'a,
    ) -> PoolCleaner<'a> {
        PoolCleaner::with_releaser(self, pool, releaser)
    }

    /// Run `body` with `pool`, then join the pool on every exit path
    pub fn with_pool<P, R>(&self, pool: P, body: impl FnOnce(&P) -> R) -> R
    where
        P: WorkerPool,
    {
        let _cleaner = PoolCleaner::new(self, &pool);
        body(&pool)
    }

    pub fn with_pool_releasing<P, R>(
        &self,
        pool: P,
        releaser: impl FnOnce(),
        body: impl FnOnce(&P) -> R,
    ) -> R
    where
        P: WorkerPool,
    {
        let _cleaner = PoolCleaner::with_releaser(self, &pool, releaser);
        body(&pool)
    }

    /// Create a pool that teardown checks for leaked workers
    #[track_caller]
    pub fn new_fixed_pool(&self, threads: usize) -> Arc<ThreadPool> {
        match ThreadPool::new(threads) {
            Ok(pool) => {
                let pool = Arc::new(pool);
                self.inner.pools.lock().push(pool.clone());
                pool
            }
            Err(e) => self.fail_with(Failure::unexpected(format!("failed to start pool: {}", e))),
        }
    }

    /// Run every action on its own pool thread and wait for all of them
    #[track_caller]
    pub fn test_in_parallel(&self, actions: Vec<Action>) {
        let pool = match ThreadPool::new(actions.len().max(1)) {
            Ok(pool) => pool,
            Err(e) => self.fail_with(Failure::unexpected(format!("failed to start pool: {}", e))),
        };
        let _cleaner = self.cleaner(&pool);
        let mut handles = Vec::with_capacity(actions.len());
        for action in actions {
            match pool.submit(self.checked(action)) {
                Ok(handle) => handles.push(handle),
                Err(e) => self.fail_with(Failure::unexpected(e.to_string())),
            }
        }
        for handle in handles {
            match handle.get_timeout(self.inner.delays.long) {
                Ok(()) => {}
                Err(TaskError::Panicked(failure)) => self.thread_unexpected(failure),
                Err(e) => self.thread_unexpected(Failure::unexpected(e.to_string())),
            }
        }
    }

    /// Check that `handle` yields `expected` well within `timeout`
    #[track_caller]
    pub fn check_timed_get<T>(&self, handle: &TaskHandle<T>, expected: T, timeout: Duration)
    where
        T: PartialEq + Debug,
    {
        let start = Instant::now();
        match handle.get_timeout(timeout) {
            Ok(value) => self.thread_assert_eq(expected, value),
            Err(TaskError::Panicked(failure)) => self.thread_unexpected(failure),
            Err(e) => self.thread_unexpected(Failure::unexpected(e.to_string())),
        }
        if start.elapsed() > timeout / 2 {
            self.thread_fail("timed get did not return promptly");
        }
    }

    /// Check that waiting on `handle` times out after at least `timeout`
    #[track_caller]
    pub fn assert_task_times_out<T>(&self, handle: &TaskHandle<T>, timeout: Duration) {
        let start = Instant::now();
        match handle.get_timeout(timeout) {
            Err(TaskError::Timeout) => {}
            Ok(_) => self.thread_should_panic("Timeout"),
            Err(TaskError::Panicked(failure)) => self.thread_unexpected(failure),
            Err(e) => self.thread_unexpected(Failure::unexpected(e.to_string())),
        }
        self.thread_assert(start.elapsed() >= timeout);
        self.thread_assert_false(handle.is_done());
    }

    /// Wait for `latch` to open within `timeout`
    #[track_caller]
    pub fn await_latch(&self, latch: &Latch, timeout: Duration) {
        if !latch.await_timeout(timeout) {
            self.thread_fail("timed out waiting for latch");
        }
    }

    #[track_caller]
    pub fn await_latch_default(&self, latch: &Latch) {
        self.await_latch(latch, self.inner.delays.long);
    }

    /// Check the case left nothing behind
    ///
    /// Takes the recorded worker failure, checks the main thread's
    /// interrupt flag, then checks every pool from
    /// [`Self::new_fixed_pool`] for surviving workers. All checks run;
    /// the first failure found is returned.
    pub fn tear_down(&self) -> Result<(), Failure> {
        let mut failures = Vec::new();

        if let Some(failure) = self.inner.slot.take() {
            failures.push(failure);
        }
        if self.inner.main.clear() {
            failures.push(Failure::new(
                FailureKind::Teardown,
                "interrupt status set in main thread",
            ));
        }
        let pools: Vec<Arc<ThreadPool>> = self.inner.pools.lock().drain(..).collect();
        for pool in pools {
            if let Err(leak) = self.check_pool_leak(&pool) {
                failures.push(leak);
            }
        }

        let mut failures = failures.into_iter();
        match failures.next() {
            None => Ok(()),
            Some(first) => {
                for other in failures {
                    warn!("{}: additional teardown failure: {}", self.inner.name, other);
                }
                Err(first)
            }
        }
    }

    fn check_pool_leak(&self, pool: &ThreadPool) -> Result<(), Failure> {
        if pool.is_terminated() || wait_terminated(pool, self.inner.delays.long) {
            return Ok(());
        }
        let live = pool.live_workers();
        warn!("{}: {} has {} live workers at teardown", self.inner.name, pool.describe(), live);
        if pool.shutdown_now().is_ok() && !wait_terminated(pool, self.inner.delays.medium) {
            warn!("{} still running after shutdown_now", pool.describe());
        }
        Err(Failure::new(
            FailureKind::Leak,
            format!("Found {} leaked thread(s) in {}", live, pool.describe()),
        ))
    }
}

fn wait_terminated(pool: &ThreadPool, timeout: Duration) -> bool {
    matches!(pool.await_termination(timeout), Ok(true))
}

impl Debug for TestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestContext")
            .field("name", &self.inner.name)
            .field("delays", &self.inner.delays)
            .finish_non_exhaustive()
    }
}

/// Outcome of one test case
#[derive(Debug, Clone, Serialize)]
pub struct CaseResult {
    pub name: String,
    pub elapsed: Duration,
    pub failure: Option<Failure>,
}

impl CaseResult {
    pub fn passed(&self) -> bool {
        self.failure.is_none()
    }
}

/// Run one test case on the calling thread
///
/// A panic in `body` is the primary failure; teardown still runs and any
/// failure it finds is only logged. Otherwise the teardown result decides.
pub fn run_case<F>(name: impl Into<String>, config: Arc<Config>, body: F) -> CaseResult
where
    F: FnOnce(&TestContext),
{
    let ctx = TestContext::set_up(name, config);
    let start = Instant::now();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| body(&ctx)));
    let teardown = ctx.tear_down();
    let elapsed = start.elapsed();

    let failure = match (outcome, teardown) {
        (Err(payload), teardown) => {
            if let Err(secondary) = teardown {
                error!("{}: teardown failed after test failure: {}", ctx.name(), secondary);
            }
            Some(Failure::from_panic(payload))
        }
        (Ok(()), Err(failure)) => Some(failure),
        (Ok(()), Ok(())) => None,
    };
    match &failure {
        None => debug!("{}: PASS in {:?}", ctx.name(), elapsed),
        Some(failure) => error!("{}: FAIL in {:?}: {}", ctx.name(), elapsed, failure),
    }
    CaseResult {
        name: ctx.name().to_string(),
        elapsed,
        failure,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigBuilder;

    fn fast_config() -> Arc<Config> {
        Arc::new(ConfigBuilder::new().delay_factor(0.1).build().unwrap())
    }

    #[test]
    fn test_passing_case() {
        let result = run_case("passes", fast_config(), |ctx| {
            let t = ctx.new_started_thread(|| {});
            ctx.await_termination_default(&t);
        });
        assert!(result.passed(), "{:?}", result.failure);
    }

    #[test]
    fn test_worker_assertion_fails_case() {
        let result = run_case("worker_assert", fast_config(), |ctx| {
            let worker = ctx.clone();
            let t = ctx.new_started_thread(move || worker.thread_assert_eq(1, 2));
            ctx.await_termination_default(&t);
        });
        let failure = result.failure.unwrap();
        assert_eq!(failure.kind(), FailureKind::Assertion);
        assert_eq!(failure.message(), "expected:<1> but was:<2>");
        assert!(failure.location().unwrap().contains("case/mod.rs"));
    }

    #[test]
    fn test_main_thread_interrupt_fails_teardown() {
        let result = run_case("left_interrupted", fast_config(), |_| {
            interrupt::current().interrupt();
        });
        let failure = result.failure.unwrap();
        assert_eq!(failure.kind(), FailureKind::Teardown);
        assert!(!interrupt::is_interrupted());
    }

    #[test]
    fn test_checked_interrupted_requires_interrupt() {
        let result = run_case("not_interrupted", fast_config(), |ctx| {
            let t = ctx.new_started_thread(ctx.checked_interrupted(|| Ok(())));
            ctx.await_termination_default(&t);
        });
        let failure = result.failure.unwrap();
        assert!(failure.message().contains("should have failed with Interrupted"));
    }

    #[test]
    fn test_thread_assert_same_compares_identity() {
        let result = run_case("same", fast_config(), |ctx| {
            let a = String::from("x");
            let b = a.clone();
            ctx.thread_assert_same(&a, &a);
            ctx.thread_assert_same(&a, &b);
        });
        assert!(result.failure.unwrap().message().starts_with("expected same:"));
    }
}
