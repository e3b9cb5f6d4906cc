//! First-wins failure slot
//!
//! Holds the first failure recorded by any thread of a test case. The slot
//! is a single pointer: `record` publishes a boxed failure with one
//! compare-and-set from null, `take` swaps null back in. Neither operation
//! waits on another thread.

use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

use static_assertions::assert_impl_all;

use crate::error::Failure;

assert_impl_all!(Failure: Send, Sync);

/// Single-assignment holder for the earliest failure
#[derive(Debug, Default)]
pub struct FailureSlot {
    failure: AtomicPtr<Failure>,
}

impl FailureSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `failure` unless a failure was already recorded
    ///
    /// # Returns
    /// * `bool` - true if this call's failure was stored
    pub fn record(&self, failure: Failure) -> bool {
        let boxed = Box::into_raw(Box::new(failure));
        match self.failure.compare_exchange(
            ptr::null_mut(),
            boxed,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => true,
            Err(_) => {
                // SAFETY: the exchange failed, so `boxed` was never published.
                drop(unsafe { Box::from_raw(boxed) });
                false
            }
        }
    }

    /// Read and clear the slot, re-arming it for the next test case
    pub fn take(&self) -> Option<Failure> {
        let taken = self.failure.swap(ptr::null_mut(), Ordering::AcqRel);
        if taken.is_null() {
            return None;
        }
        // SAFETY: a non-null pointer came from `record`, and the swap hands
        // it to exactly one caller.
        Some(*unsafe { Box::from_raw(taken) })
    }

    /// The stored failure, leaving it in place
    ///
    /// Needs exclusive access, so no `take` can free it while borrowed.
    pub fn peek(&mut self) -> Option<&Failure> {
        // SAFETY: `&mut self` excludes concurrent `take`; the pointer is
        // either null or owned by the slot.
        unsafe { self.failure.get_mut().as_ref() }
    }

    pub fn is_empty(&self) -> bool {
        self.failure.load(Ordering::Acquire).is_null()
    }
}

impl Drop for FailureSlot {
    fn drop(&mut self) {
        let _ = self.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_take_clears_and_rearms() {
        let mut slot = FailureSlot::new();
        assert!(slot.is_empty());
        assert!(slot.take().is_none());

        assert!(slot.record(Failure::assertion("first")));
        assert!(!slot.is_empty());
        assert_eq!(slot.take().unwrap().message(), "first");
        assert!(slot.is_empty());

        assert!(slot.record(Failure::assertion("again")));
        assert_eq!(slot.peek().unwrap().message(), "again");
    }

    #[test]
    fn test_concurrent_writers_store_exactly_one() {
        let slot = Arc::new(FailureSlot::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let slot = slot.clone();
                thread::spawn(move || slot.record(Failure::unexpected(format!("worker {}", i))))
            })
            .collect();
        let stored = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|stored| *stored)
            .count();
        assert_eq!(stored, 1);
        assert!(slot.take().unwrap().message().starts_with("worker "));
        assert!(slot.take().is_none());
    }

    proptest! {
        #[test]
        fn only_first_record_is_retained(messages in proptest::collection::vec("[a-z]{1,12}", 1..20)) {
            let slot = FailureSlot::new();
            for (i, message) in messages.iter().enumerate() {
                prop_assert_eq!(slot.record(Failure::assertion(message.clone())), i == 0);
            }
            let kept = slot.take().unwrap();
            prop_assert_eq!(kept.message(), messages[0].as_str());
        }
    }

    #[test]
    fn test_take_racing_writers_loses_no_failure() {
        for _ in 0..50 {
            let slot = Arc::new(FailureSlot::new());
            let writers: Vec<_> = (0..4)
                .map(|i| {
                    let slot = slot.clone();
                    thread::spawn(move || slot.record(Failure::unexpected(format!("w{}", i))))
                })
                .collect();
            let mut taken = 0;
            while taken == 0 {
                taken += usize::from(slot.take().is_some());
                thread::yield_now();
            }
            let stored = writers
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|stored| *stored)
                .count();
            // Writers after the take may win the re-armed slot.
            while slot.take().is_some() {
                taken += 1;
            }
            assert_eq!(taken, stored);
        }
    }

    #[test]
    fn test_dropping_full_slot_releases_failure() {
        let slot = FailureSlot::new();
        assert!(slot.record(Failure::assertion("left behind")));
        drop(slot);
    }
}
