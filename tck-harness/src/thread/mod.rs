//! Test threads
//!
//! This module provides [`TestThread`], an OS thread spawned by a test with
//! an interrupt flag the spawner can set and a probe the spawner can use to
//! observe whether the thread is running, blocked or finished.
//!
//! Blocked is judged two ways: on Linux the kernel's scheduler state for
//! the task is consulted, and on every platform a thread that is inside
//! [`blocking`] counts as waiting. The second form is what makes spin-based
//! primitives observable, since a spinning thread never sleeps in the
//! kernel.

pub mod procfs;

use std::cell::RefCell;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::trace;

use crate::interrupt::{self, InterruptHandle};

/// Coarse lifecycle state of a test thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadState {
    /// Started and not known to be blocked
    Runnable,
    /// Blocked, sleeping or parked
    Waiting,
    /// The thread body has returned or unwound
    Terminated,
}

impl ThreadState {
    pub fn is_waiting(self) -> bool {
        self == ThreadState::Waiting
    }
}

#[derive(Debug)]
struct Probe {
    tid: spin::Once<Option<u32>>,
    blocking: AtomicUsize,
    finished: Mutex<bool>,
    done: Condvar,
}

impl Probe {
    fn new() -> Self {
        Self {
            tid: spin::Once::new(),
            blocking: AtomicUsize::new(0),
            finished: Mutex::new(false),
            done: Condvar::new(),
        }
    }

    fn mark_finished(&self) {
        *self.finished.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.done.notify_all();
    }

    fn is_finished(&self) -> bool {
        *self.finished.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_finished(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut finished = self.finished.lock().unwrap_or_else(PoisonError::into_inner);
        while !*finished {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            finished = self
                .done
                .wait_timeout(finished, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }
}

thread_local! {
    static CURRENT_PROBE: RefCell<Option<Arc<Probe>>> = const { RefCell::new(None) };
}

struct FinishGuard(Arc<Probe>);

impl Drop for FinishGuard {
    fn drop(&mut self) {
        CURRENT_PROBE.with(|current| current.borrow_mut().take());
        self.0.mark_finished();
    }
}

/// An OS thread started by a test
#[derive(Debug)]
pub struct TestThread {
    name: String,
    handle: spin::Mutex<Option<JoinHandle<()>>>,
    interrupt: InterruptHandle,
    probe: Arc<Probe>,
}

impl TestThread {
    /// Spawn a named thread running `body`
    ///
    /// The body runs with its interrupt flag installed, so
    /// [`TestThread::interrupt`] reaches interruptible waits inside it.
    pub fn spawn<F>(name: impl Into<String>, body: F) -> io::Result<TestThread>
    where
        F: FnOnce() + Send + 'static,
    {
        let name = name.into();
        let flag = Arc::new(AtomicBool::new(false));
        let probe = Arc::new(Probe::new());
        let (child_flag, child_probe) = (flag.clone(), probe.clone());

        let handle = thread::Builder::new().name(name.clone()).spawn(move || {
            interrupt::install(child_flag);
            child_probe.tid.call_once(procfs::current_tid);
            CURRENT_PROBE.with(|current| *current.borrow_mut() = Some(child_probe.clone()));
            let _finish = FinishGuard(child_probe);
            body();
        })?;
        trace!("spawned test thread {}", name);

        let interrupt = InterruptHandle::new(flag, handle.thread().clone());
        Ok(TestThread {
            name,
            handle: spin::Mutex::new(Some(handle)),
            interrupt,
            probe,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state
    pub fn state(&self) -> ThreadState {
        if self.probe.is_finished() {
            return ThreadState::Terminated;
        }
        if self.probe.blocking.load(Ordering::SeqCst) > 0 {
            return ThreadState::Waiting;
        }
        let kernel_state = self
            .probe
            .tid
            .get()
            .copied()
            .flatten()
            .and_then(procfs::task_state);
        match kernel_state {
            Some(state) if procfs::is_waiting_state(state) => ThreadState::Waiting,
            Some(state) if procfs::is_dead_state(state) => ThreadState::Terminated,
            _ => ThreadState::Runnable,
        }
    }

    pub fn is_alive(&self) -> bool {
        !self.probe.is_finished()
    }

    /// Set the thread's interrupt flag and unpark it
    pub fn interrupt(&self) {
        self.interrupt.interrupt();
    }

    pub fn interrupt_handle(&self) -> &InterruptHandle {
        &self.interrupt
    }

    /// Wait up to `timeout` for the thread to finish
    ///
    /// # Returns
    /// * `bool` - true if the thread finished in time
    pub fn join_timeout(&self, timeout: Duration) -> bool {
        if !self.probe.wait_finished(timeout) {
            return false;
        }
        // The body is done; reap the OS thread. Its outcome was already
        // observed through the probe.
        let _ = self.join();
        true
    }

    /// Wait for the thread to finish
    ///
    /// Returns the panic payload if the body unwound. Joining an already
    /// joined thread returns `Ok(())`.
    pub fn join(&self) -> thread::Result<()> {
        let handle = self.handle.lock().take();
        match handle {
            Some(handle) => handle.join(),
            None => Ok(()),
        }
    }
}

struct BlockingGuard(Option<Arc<Probe>>);

impl Drop for BlockingGuard {
    fn drop(&mut self) {
        if let Some(probe) = &self.0 {
            probe.blocking.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Run `f`, reporting the calling test thread as waiting meanwhile
///
/// Wrap calls that block without sleeping in the kernel (spin locks,
/// busy-wait loops) so wait-state polling can observe them. Outside a
/// [`TestThread`] this just runs `f`.
pub fn blocking<R>(f: impl FnOnce() -> R) -> R {
    let probe = CURRENT_PROBE.with(|current| current.borrow().clone());
    if let Some(probe) = &probe {
        probe.blocking.fetch_add(1, Ordering::SeqCst);
    }
    let _guard = BlockingGuard(probe);
    f()
}
