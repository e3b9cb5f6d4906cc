//! Worker pools
//!
//! [`WorkerPool`] is the seam the cleanup helpers work against; any pool
//! under test can implement it. [`ThreadPool`] is the harness's own fixed
//! size pool, used by tests that need background workers and by
//! [`crate::case::TestContext::test_in_parallel`].

pub mod cleaner;

use std::collections::VecDeque;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use log::{debug, error};

use crate::error::{Failure, PoolError, TaskError};
use crate::interrupt::{self, InterruptHandle};
use crate::thread::TestThread;

pub use cleaner::{PoolCleaner, join_pool, releaser};

/// Lifecycle operations the harness needs from a pool
#[cfg_attr(test, mockall::automock)]
pub trait WorkerPool: Send + Sync {
    /// Human readable identity used in failure messages
    fn describe(&self) -> String;

    /// Stop accepting work; queued work still runs
    fn shutdown(&self) -> Result<(), PoolError>;

    /// Stop accepting work, drop queued work and interrupt workers
    ///
    /// # Returns
    /// * `usize` - number of queued tasks that never ran
    fn shutdown_now(&self) -> Result<usize, PoolError>;

    /// Wait up to `timeout` for every worker to exit after shutdown
    fn await_termination(&self, timeout: Duration) -> Result<bool, PoolError>;

    fn is_terminated(&self) -> bool;
}

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum RunState {
    Running,
    Shutdown,
    Stop,
}

struct PoolState {
    jobs: VecDeque<Job>,
    run_state: RunState,
    live: usize,
}

struct Shared {
    state: Mutex<PoolState>,
    work: Condvar,
    terminated: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

static NEXT_POOL_ID: AtomicUsize = AtomicUsize::new(1);

/// Fixed-size pool of harness threads with a FIFO queue
pub struct ThreadPool {
    id: usize,
    shared: Arc<Shared>,
    workers: spin::Mutex<Vec<TestThread>>,
}

impl ThreadPool {
    /// Start a pool with `threads` workers
    ///
    /// A pool without workers could never run anything, so zero threads is
    /// an `InvalidInput` error.
    pub fn new(threads: usize) -> io::Result<Self> {
        if threads == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "a pool needs at least one worker",
            ));
        }
        let id = NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::new(Shared {
            state: Mutex::new(PoolState {
                jobs: VecDeque::new(),
                run_state: RunState::Running,
                live: threads,
            }),
            work: Condvar::new(),
            terminated: Condvar::new(),
        });
        let pool = ThreadPool {
            id,
            shared,
            workers: spin::Mutex::new(Vec::with_capacity(threads)),
        };
        for n in 0..threads {
            let shared = pool.shared.clone();
            match TestThread::spawn(format!("tck-pool-{}-{}", id, n), move || worker_loop(shared)) {
                Ok(worker) => pool.workers.lock().push(worker),
                Err(e) => {
                    // Account for the workers that will never start.
                    let mut state = pool.shared.lock();
                    state.live -= threads - n;
                    drop(state);
                    pool.shutdown_now_inner();
                    return Err(e);
                }
            }
        }
        debug!("started pool tck-pool-{} with {} workers", id, threads);
        Ok(pool)
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Queue a task whose result can be waited for
    pub fn submit<T, F>(&self, f: F) -> Result<TaskHandle<T>, PoolError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let task = Arc::new(TaskState::new());
        let runner = task.clone();
        self.enqueue(Box::new(move || runner.run(f)))?;
        Ok(TaskHandle { state: task })
    }

    /// Queue a task without a handle
    ///
    /// A panic in the task is logged and does not kill the worker.
    pub fn execute<F>(&self, f: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.enqueue(Box::new(f))
    }

    /// Number of worker threads that have not exited yet
    pub fn live_workers(&self) -> usize {
        self.shared.lock().live
    }

    /// Number of tasks waiting for a worker
    pub fn queued(&self) -> usize {
        self.shared.lock().jobs.len()
    }

    fn enqueue(&self, job: Job) -> Result<(), PoolError> {
        let mut state = self.shared.lock();
        if state.run_state != RunState::Running {
            return Err(PoolError::Rejected(format!("{} is shut down", self.describe())));
        }
        state.jobs.push_back(job);
        self.shared.work.notify_one();
        Ok(())
    }

    fn shutdown_now_inner(&self) -> usize {
        let dropped = {
            let mut state = self.shared.lock();
            state.run_state = RunState::Stop;
            let dropped = state.jobs.len();
            state.jobs.clear();
            self.shared.work.notify_all();
            if state.live == 0 {
                self.shared.terminated.notify_all();
            }
            dropped
        };
        for worker in self.workers.lock().iter() {
            worker.interrupt();
        }
        dropped
    }
}

impl WorkerPool for ThreadPool {
    fn describe(&self) -> String {
        format!("ThreadPool tck-pool-{}", self.id)
    }

    fn shutdown(&self) -> Result<(), PoolError> {
        let mut state = self.shared.lock();
        if state.run_state == RunState::Running {
            state.run_state = RunState::Shutdown;
        }
        self.shared.work.notify_all();
        if state.live == 0 {
            self.shared.terminated.notify_all();
        }
        Ok(())
    }

    fn shutdown_now(&self) -> Result<usize, PoolError> {
        Ok(self.shutdown_now_inner())
    }

    fn await_termination(&self, timeout: Duration) -> Result<bool, PoolError> {
        if interrupt::interrupted() {
            return Err(PoolError::Interrupted);
        }
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.lock();
        while state.run_state == RunState::Running || state.live > 0 {
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            state = self
                .shared
                .terminated
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        Ok(true)
    }

    fn is_terminated(&self) -> bool {
        let state = self.shared.lock();
        state.run_state != RunState::Running && state.live == 0
    }
}

impl<P: WorkerPool + ?Sized> WorkerPool for Arc<P> {
    fn describe(&self) -> String {
        (**self).describe()
    }

    fn shutdown(&self) -> Result<(), PoolError> {
        (**self).shutdown()
    }

    fn shutdown_now(&self) -> Result<usize, PoolError> {
        (**self).shutdown_now()
    }

    fn await_termination(&self, timeout: Duration) -> Result<bool, PoolError> {
        (**self).await_termination(timeout)
    }

    fn is_terminated(&self) -> bool {
        (**self).is_terminated()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

struct LiveGuard(Arc<Shared>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        let mut state = self.0.lock();
        state.live -= 1;
        if state.live == 0 {
            self.0.terminated.notify_all();
        }
    }
}

fn worker_loop(shared: Arc<Shared>) {
    let _live = LiveGuard(shared.clone());
    loop {
        let job = {
            let mut state = shared.lock();
            loop {
                if state.run_state == RunState::Stop {
                    break None;
                }
                if let Some(job) = state.jobs.pop_front() {
                    // An interrupt aimed at the previous task must not leak
                    // into this one. Cleared under the lock so a concurrent
                    // shutdown_now still reaches the new task.
                    interrupt::interrupted();
                    break Some(job);
                }
                if state.run_state == RunState::Shutdown {
                    break None;
                }
                state = shared.work.wait(state).unwrap_or_else(PoisonError::into_inner);
            }
        };
        let Some(job) = job else { break };
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
            error!("pool task panicked: {}", Failure::from_panic(payload));
        }
    }
}

enum TaskSlot<T> {
    Pending,
    Running(InterruptHandle),
    Done(Result<T, Failure>),
    Taken,
    Cancelled,
}

struct TaskState<T> {
    slot: Mutex<TaskSlot<T>>,
    ready: Condvar,
}

impl<T> TaskState<T> {
    fn new() -> Self {
        Self {
            slot: Mutex::new(TaskSlot::Pending),
            ready: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TaskSlot<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn run<F: FnOnce() -> T>(&self, f: F) {
        {
            let mut slot = self.lock();
            if matches!(*slot, TaskSlot::Cancelled) {
                return;
            }
            *slot = TaskSlot::Running(interrupt::current());
        }
        let result = panic::catch_unwind(AssertUnwindSafe(f)).map_err(Failure::from_panic);
        let mut slot = self.lock();
        if !matches!(*slot, TaskSlot::Cancelled) {
            *slot = TaskSlot::Done(result);
        }
        self.ready.notify_all();
    }
}

/// Handle to the result of a submitted task
pub struct TaskHandle<T> {
    state: Arc<TaskState<T>>,
}

impl<T> TaskHandle<T> {
    /// Wait up to `timeout` for the task's result
    pub fn get_timeout(&self, timeout: Duration) -> Result<T, TaskError> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.state.lock();
        loop {
            match std::mem::replace(&mut *slot, TaskSlot::Taken) {
                TaskSlot::Done(Ok(value)) => return Ok(value),
                TaskSlot::Done(Err(failure)) => {
                    *slot = TaskSlot::Done(Err(failure.clone()));
                    return Err(TaskError::Panicked(failure));
                }
                TaskSlot::Taken => return Err(TaskError::AlreadyTaken),
                TaskSlot::Cancelled => {
                    *slot = TaskSlot::Cancelled;
                    return Err(TaskError::Cancelled);
                }
                pending => *slot = pending,
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(TaskError::Timeout);
            }
            slot = self
                .state
                .ready
                .wait_timeout(slot, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Cancel the task if it has not completed
    ///
    /// A running task is interrupted when `may_interrupt` is set; its
    /// result is discarded either way.
    ///
    /// # Returns
    /// * `bool` - true if this call cancelled the task
    pub fn cancel(&self, may_interrupt: bool) -> bool {
        let mut slot = self.state.lock();
        let cancelled = match &*slot {
            TaskSlot::Pending => true,
            TaskSlot::Running(handle) => {
                if may_interrupt {
                    handle.interrupt();
                }
                true
            }
            TaskSlot::Done(_) | TaskSlot::Taken | TaskSlot::Cancelled => false,
        };
        if cancelled {
            *slot = TaskSlot::Cancelled;
            self.state.ready.notify_all();
        }
        cancelled
    }

    pub fn is_done(&self) -> bool {
        !matches!(&*self.state.lock(), TaskSlot::Pending | TaskSlot::Running(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(&*self.state.lock(), TaskSlot::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing;

    #[test]
    fn test_submit_returns_value() {
        let pool = ThreadPool::new(2).unwrap();
        let handle = pool.submit(|| 6 * 7).unwrap();
        assert_eq!(handle.get_timeout(Duration::from_secs(10)), Ok(42));
        assert!(handle.is_done());
        assert_eq!(handle.get_timeout(Duration::from_secs(1)), Err(TaskError::AlreadyTaken));
        pool.shutdown().unwrap();
        assert!(pool.await_termination(Duration::from_secs(10)).unwrap());
        assert!(pool.is_terminated());
        assert_eq!(pool.live_workers(), 0);
    }

    #[test]
    fn test_panicking_task_reports_failure_and_worker_survives() {
        let pool = ThreadPool::new(1).unwrap();
        let bad = pool.submit(|| -> u32 { panic!("task exploded") }).unwrap();
        match bad.get_timeout(Duration::from_secs(10)) {
            Err(TaskError::Panicked(failure)) => assert_eq!(failure.message(), "task exploded"),
            other => panic!("unexpected result {:?}", other.map(|_| ())),
        }
        let good = pool.submit(|| 1).unwrap();
        assert_eq!(good.get_timeout(Duration::from_secs(10)), Ok(1));
        pool.shutdown().unwrap();
        assert!(pool.await_termination(Duration::from_secs(10)).unwrap());
    }

    #[test]
    fn test_submit_after_shutdown_is_rejected() {
        let pool = ThreadPool::new(1).unwrap();
        pool.shutdown().unwrap();
        assert!(matches!(pool.execute(|| {}), Err(PoolError::Rejected(_))));
        assert!(pool.await_termination(Duration::from_secs(10)).unwrap());
    }

    #[test]
    fn test_shutdown_now_drops_queue_and_interrupts() {
        let pool = ThreadPool::new(1).unwrap();
        let running = pool
            .submit(|| timing::delay(Duration::from_secs(30)).is_err())
            .unwrap();
        for _ in 0..3 {
            pool.execute(|| {}).unwrap();
        }
        // Wait for the long task to start before stopping the pool.
        let deadline = Instant::now() + Duration::from_secs(10);
        while pool.queued() != 3 {
            assert!(Instant::now() < deadline);
            std::thread::yield_now();
        }
        assert_eq!(pool.shutdown_now().unwrap(), 3);
        assert_eq!(running.get_timeout(Duration::from_secs(10)), Ok(true));
        assert!(pool.await_termination(Duration::from_secs(10)).unwrap());
    }

    #[test]
    fn test_cancel_pending_task() {
        let pool = ThreadPool::new(1).unwrap();
        let blocker = pool
            .submit(|| {
                let _ = timing::delay(Duration::from_secs(30));
            })
            .unwrap();
        let pending = pool.submit(|| 5).unwrap();
        assert!(pending.cancel(false));
        assert!(pending.is_cancelled());
        assert_eq!(pending.get_timeout(Duration::from_secs(1)), Err(TaskError::Cancelled));
        assert!(blocker.cancel(true));
        assert!(!blocker.cancel(true));
        pool.shutdown().unwrap();
        assert!(pool.await_termination(Duration::from_secs(10)).unwrap());
    }

    #[test]
    fn test_get_timeout_expires() {
        let pool = ThreadPool::new(1).unwrap();
        let slow = pool
            .submit(|| {
                let _ = timing::delay(Duration::from_secs(30));
            })
            .unwrap();
        assert_eq!(slow.get_timeout(Duration::from_millis(10)), Err(TaskError::Timeout));
        pool.shutdown_now().unwrap();
        assert!(pool.await_termination(Duration::from_secs(10)).unwrap());
    }
}
