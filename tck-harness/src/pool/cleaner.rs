//! Scoped pool cleanup
//!
//! A [`PoolCleaner`] guarantees that a pool is shut down and waited for on
//! every exit path from a scope, including unwinding out of a failed test
//! body.

use std::panic::{self, AssertUnwindSafe};
use std::thread;

use log::{debug, warn};

use super::WorkerPool;
use crate::case::TestContext;
use crate::error::{Failure, PoolError};
use crate::timing::Delays;

/// Shut down `pool` and wait for it to terminate
///
/// Waits `2 × long` after a graceful shutdown. If that is not enough the
/// pool is forcibly stopped and given `medium` more, for the benefit of the
/// tests that follow, and a timeout failure is returned. A
/// [`PoolError::Denied`] at any step means the environment does not allow
/// the operation; it is logged and treated as success.
pub fn join_pool(pool: &dyn WorkerPool, delays: &Delays) -> Result<(), Failure> {
    match pool.shutdown() {
        Ok(()) => {}
        Err(PoolError::Denied(reason)) => {
            warn!("shutdown of {} denied, leaving it running: {}", pool.describe(), reason);
            return Ok(());
        }
        Err(e) => {
            return Err(Failure::unexpected(format!(
                "shutdown of {} failed: {}",
                pool.describe(),
                e
            )));
        }
    }

    match pool.await_termination(delays.long * 2) {
        Ok(true) => {
            debug!("{} terminated", pool.describe());
            Ok(())
        }
        Ok(false) => {
            let failure = Failure::timeout(format!(
                "{} did not terminate in a timely manner",
                pool.describe()
            ));
            if let Err(e) = pool.shutdown_now() {
                warn!("shutdown_now of {} failed: {}", pool.describe(), e);
            }
            if !matches!(pool.await_termination(delays.medium), Ok(true)) {
                warn!("{} still running after shutdown_now", pool.describe());
            }
            Err(failure)
        }
        Err(PoolError::Denied(reason)) => {
            warn!("awaiting {} denied: {}", pool.describe(), reason);
            Ok(())
        }
        Err(PoolError::Interrupted) => Err(Failure::interrupted(format!(
            "Unexpected interrupt while awaiting termination of {}",
            pool.describe()
        ))),
        Err(e) => Err(Failure::unexpected(format!(
            "awaiting termination of {} failed: {}",
            pool.describe(),
            e
        ))),
    }
}

type Releaser<'a> = Box<dyn FnOnce() + 'a>;

/// Drop guard that joins a pool when it goes out of scope
///
/// The optional releaser runs first, so workers blocked on something the
/// test controls get unblocked before the shutdown wait. The pool is joined
/// even if the releaser panics.
///
/// A join failure is recorded in the test case's failure slot. When the
/// scope is being left normally it is also raised, failing the test right
/// away; when the scope is already unwinding it is only recorded.
pub struct PoolCleaner<'a> {
    ctx: &'a TestContext,
    pool: &'a dyn WorkerPool,
    releaser: Option<Releaser<'a>>,
}

impl<'a> PoolCleaner<'a> {
    pub fn new(ctx: &'a TestContext, pool: &'a dyn WorkerPool) -> Self {
        Self {
            ctx,
            pool,
            releaser: None,
        }
    }

    pub fn with_releaser(
        ctx: &'a TestContext,
        pool: &'a dyn WorkerPool,
        releaser: impl FnOnce() + 'a,
    ) -> Self {
        Self {
            ctx,
            pool,
            releaser: Some(Box::new(releaser)),
        }
    }
}

impl Drop for PoolCleaner<'_> {
    fn drop(&mut self) {
        let released = self
            .releaser
            .take()
            .map(|releaser| panic::catch_unwind(AssertUnwindSafe(releaser)));
        let joined = join_pool(self.pool, &self.ctx.delays());

        let failure = match (released, joined) {
            (Some(Err(payload)), joined) => {
                if let Err(join_failure) = joined {
                    self.ctx.record_failure(join_failure);
                }
                Some(Failure::from_panic(payload))
            }
            (_, Err(join_failure)) => Some(join_failure),
            _ => None,
        };
        if let Some(failure) = failure {
            self.ctx.record_failure(failure.clone());
            if !thread::panicking() {
                failure.raise();
            }
        }
    }
}

/// Ready-made releasers
pub mod releaser {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use crate::sync::Latch;

    /// Releaser that raises `flag`
    pub fn flag(flag: Arc<AtomicBool>) -> impl FnOnce() {
        move || flag.store(true, Ordering::SeqCst)
    }

    /// Releaser that counts `latch` all the way down
    pub fn latch(latch: Arc<Latch>) -> impl FnOnce() {
        move || {
            while latch.count() > 0 {
                latch.count_down();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::MockWorkerPool;
    use crate::sync::Latch;
    use mockall::Sequence;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn delays() -> Delays {
        Delays::compute(0.01)
    }

    #[test]
    fn test_join_pool_graceful() {
        let mut pool = MockWorkerPool::new();
        let mut seq = Sequence::new();
        pool.expect_shutdown()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));
        pool.expect_await_termination()
            .withf(|timeout| *timeout == Duration::from_millis(400))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(true));
        pool.expect_describe().returning(|| "mock pool".to_string());
        pool.expect_shutdown_now().never();

        assert!(join_pool(&pool, &delays()).is_ok());
    }

    #[test]
    fn test_join_pool_timeout_forces_shutdown() {
        let mut pool = MockWorkerPool::new();
        let mut seq = Sequence::new();
        pool.expect_describe().returning(|| "stuck pool".to_string());
        pool.expect_shutdown()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));
        pool.expect_await_termination()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(false));
        pool.expect_shutdown_now()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(2));
        pool.expect_await_termination()
            .withf(|timeout| *timeout == Duration::from_millis(10))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(true));

        let failure = join_pool(&pool, &delays()).unwrap_err();
        assert_eq!(failure.kind(), crate::error::FailureKind::Timeout);
        assert!(failure.message().contains("stuck pool did not terminate"));
    }

    #[test]
    fn test_join_pool_swallows_denied_shutdown() {
        let mut pool = MockWorkerPool::new();
        pool.expect_describe().returning(|| "sandboxed pool".to_string());
        pool.expect_shutdown()
            .times(1)
            .returning(|| Err(PoolError::Denied("no modifyThread privilege".into())));
        pool.expect_await_termination().never();
        pool.expect_shutdown_now().never();

        assert!(join_pool(&pool, &delays()).is_ok());
    }

    #[test]
    fn test_join_pool_reports_interrupt() {
        let mut pool = MockWorkerPool::new();
        pool.expect_describe().returning(|| "mock pool".to_string());
        pool.expect_shutdown().returning(|| Ok(()));
        pool.expect_await_termination()
            .returning(|_| Err(PoolError::Interrupted));

        let failure = join_pool(&pool, &delays()).unwrap_err();
        assert_eq!(failure.kind(), crate::error::FailureKind::Interrupted);
    }

    #[test]
    fn test_releasers() {
        let flag = Arc::new(AtomicBool::new(false));
        releaser::flag(flag.clone())();
        assert!(flag.load(Ordering::SeqCst));

        let latch = Arc::new(Latch::new(3));
        releaser::latch(latch.clone())();
        assert_eq!(latch.count(), 0);
    }
}
