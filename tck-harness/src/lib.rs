//! TCK Harness
//!
//! This crate provides a harness for conformance tests of concurrency
//! primitives. Tests start real OS threads that block, time out and get
//! interrupted, and the harness makes sure any failure on any of those
//! threads fails the test case that started them.
//!
//! # Architecture
//!
//! The harness is organized into several functional domains:
//!
//! - **Case**: per-test context, thread assertions and teardown checks
//! - **Slot**: first-wins storage for the failure of a test case
//! - **Timing**: calibrated delays and interruptible sleeping
//! - **Interrupt**: per-thread interrupt flags
//! - **Thread**: test threads with observable blocked state
//! - **Pool**: worker pools and scoped pool cleanup
//! - **Runner / Report**: suites, gating, repetition and run reports
//!
//! # Usage
//!
//! ```rust
//! use tck_harness::check;
//!
//! check("worker_asserts", |ctx| {
//!     let worker = ctx.clone();
//!     let t = ctx.new_started_thread(move || worker.thread_assert_eq(4, 2 + 2));
//!     ctx.await_termination_default(&t);
//! });
//! ```

use std::sync::Arc;

use log::warn;

pub mod case;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod interrupt;
pub mod pool;
pub mod report;
pub mod runner;
pub mod slot;
pub mod sync;
pub mod tasks;
pub mod thread;
pub mod timing;

// Re-export commonly used items
pub use case::{Action, CaseResult, TestContext, run_case};
pub use config::{Config, ConfigBuilder};
pub use error::{ConfigError, Failure, FailureKind, Interrupted, PoolError, Result, TaskError};
pub use pool::{PoolCleaner, TaskHandle, ThreadPool, WorkerPool, join_pool, releaser};
pub use report::{RunReport, SuiteReport, TestStatus, TestSummary};
pub use runner::{Gate, Runner, Suite};
pub use slot::FailureSlot;
pub use sync::Latch;
pub use tasks::TrackedTask;
pub use thread::{TestThread, ThreadState, blocking};
pub use timing::{Delays, delay, millis_elapsed_since, sleep};

static SUITE_CONFIG: spin::Once<Arc<Config>> = spin::Once::new();

/// Process-wide configuration, read from the environment on first use
///
/// A malformed environment is logged and the defaults are used instead.
pub fn suite_config() -> Arc<Config> {
    SUITE_CONFIG
        .call_once(|| match Config::from_env() {
            Ok(config) => Arc::new(config),
            Err(e) => {
                warn!("ignoring harness configuration: {}", e);
                Arc::new(Config::default())
            }
        })
        .clone()
}

/// Run `body` as a test case with the process-wide configuration
///
/// Panics with the case's failure if it fails, so it can be the whole of a
/// `#[test]` function.
pub fn check<F>(name: &str, body: F)
where
    F: FnOnce(&TestContext),
{
    let result = run_case(name, suite_config(), body);
    if let Some(failure) = result.failure {
        panic!("{} failed: {}", name, failure);
    }
}
