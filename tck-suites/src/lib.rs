//! TCK Suites
//!
//! Conformance suites for the concurrency primitives of `std::sync` and
//! the `spin` crate, written against `tck-harness`.
//!
//! # Suites
//!
//! - **Atomics**: counting, compare-and-set and update loops across threads
//! - **Locks**: `Mutex`, `RwLock` and `spin::Mutex` blocking and poisoning
//! - **Condvar**: timed waits and notification
//! - **Barrier**: leader election and release
//! - **Channels**: `mpsc` ordering, blocking and disconnection
//! - **Executors**: the harness thread pool

use tck_harness::Suite;

pub mod atomics;
pub mod barrier;
pub mod channels;
pub mod condvar;
pub mod executors;
pub mod locks;

/// Every suite, in run order
pub fn all_suites() -> Vec<Suite> {
    vec![
        atomics::suite(),
        locks::suite(),
        condvar::suite(),
        barrier::suite(),
        channels::suite(),
        executors::suite(),
    ]
}
