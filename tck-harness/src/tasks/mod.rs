//! Tracked tasks
//!
//! A [`TrackedTask`] records whether its body ran to completion, so tests
//! can tell a task that finished from one that was dropped or interrupted.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::timing;

#[derive(Debug, Clone)]
pub struct TrackedTask {
    delay: Duration,
    done: Arc<AtomicBool>,
}

impl TrackedTask {
    /// Task that completes immediately
    pub fn no_op() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    /// Task that completes after sleeping for `delay`
    ///
    /// An interrupt during the sleep ends the task without marking it done.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            done: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    /// Run the task on the calling thread
    ///
    /// # Returns
    /// * `bool` - true if the task completed, false if it was interrupted
    pub fn run(&self) -> bool {
        if timing::delay(self.delay).is_err() {
            return false;
        }
        self.done.store(true, Ordering::SeqCst);
        true
    }

    /// A closure that runs the task, for handing to a thread or pool
    pub fn runnable(&self) -> impl FnOnce() + Send + 'static {
        let task = self.clone();
        move || {
            task.run();
        }
    }
}
