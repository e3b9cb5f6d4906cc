//! Thread interruption
//!
//! Interruption is the only cancellation signal the harness uses. Every
//! thread has an interrupt flag; interrupting sets the flag and unparks the
//! thread so that interruptible waits (see [`crate::timing::delay`]) notice.

use std::cell::RefCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, Thread};

/// Handle to one thread's interrupt flag
#[derive(Debug, Clone)]
pub struct InterruptHandle {
    flag: Arc<AtomicBool>,
    thread: Thread,
}

impl InterruptHandle {
    pub(crate) fn new(flag: Arc<AtomicBool>, thread: Thread) -> Self {
        Self { flag, thread }
    }

    /// Set the interrupt flag and wake the thread if it is parked
    pub fn interrupt(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.thread.unpark();
    }

    pub fn is_interrupted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Clear the flag, returning whether it was set
    pub fn clear(&self) -> bool {
        self.flag.swap(false, Ordering::SeqCst)
    }

    /// The thread this handle interrupts
    pub fn thread(&self) -> &Thread {
        &self.thread
    }
}

thread_local! {
    static CURRENT: RefCell<Option<InterruptHandle>> = const { RefCell::new(None) };
}

/// Install `flag` as the current thread's interrupt flag
///
/// Called first thing on harness-spawned threads, so the spawner can hold
/// the flag before the thread starts running.
pub(crate) fn install(flag: Arc<AtomicBool>) {
    CURRENT.with(|current| {
        *current.borrow_mut() = Some(InterruptHandle::new(flag, thread::current()));
    });
}

/// Interrupt handle of the calling thread
pub fn current() -> InterruptHandle {
    CURRENT.with(|current| {
        current
            .borrow_mut()
            .get_or_insert_with(|| {
                InterruptHandle::new(Arc::new(AtomicBool::new(false)), thread::current())
            })
            .clone()
    })
}

/// Test and clear the calling thread's interrupt flag
pub fn interrupted() -> bool {
    current().clear()
}

/// Whether the calling thread's interrupt flag is set, without clearing it
pub fn is_interrupted() -> bool {
    current().is_interrupted()
}
