//! Synchronization helpers for writing tests
//!
//! Test tooling, not a primitive under test.

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Count-down latch
///
/// Waiters block until the count reaches zero. Counting down past zero has
/// no effect.
#[derive(Debug)]
pub struct Latch {
    count: Mutex<usize>,
    zero: Condvar,
}

impl Latch {
    pub fn new(count: usize) -> Self {
        Self {
            count: Mutex::new(count),
            zero: Condvar::new(),
        }
    }

    pub fn count_down(&self) {
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        if *count > 0 {
            *count -= 1;
            if *count == 0 {
                self.zero.notify_all();
            }
        }
    }

    pub fn count(&self) -> usize {
        *self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait up to `timeout` for the count to reach zero
    ///
    /// # Returns
    /// * `bool` - true if the latch opened in time
    pub fn await_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        while *count > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            count = self
                .zero
                .wait_timeout(count, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_latch_opens_at_zero() {
        let latch = Arc::new(Latch::new(2));
        assert!(!latch.await_timeout(Duration::from_millis(5)));

        let remote = latch.clone();
        let t = thread::spawn(move || {
            remote.count_down();
            remote.count_down();
            remote.count_down();
        });
        assert!(latch.await_timeout(Duration::from_secs(10)));
        assert_eq!(latch.count(), 0);
        t.join().unwrap();
    }
}
