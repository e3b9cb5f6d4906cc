//! Runs the conformance suites under `cargo test`
//!
//! Each suite runs as one test so a failure names the suite; the report
//! printed on failure names the individual tests.

use tck_harness::{Suite, check, suite_config};
use tck_suites::{atomics, barrier, channels, condvar, executors, locks};

fn assert_suite_passes(suite: Suite) {
    let report = suite.run(&suite_config());
    assert!(
        report.all_passed(),
        "{} failed: {:?}",
        report.suite,
        report
            .results
            .iter()
            .filter_map(|r| r.failure.as_ref().map(|f| format!("{}: {}", r.id, f)))
            .collect::<Vec<_>>()
    );
}

#[test]
fn test_atomics_suite() {
    assert_suite_passes(atomics::suite());
}

#[test]
fn test_locks_suite() {
    assert_suite_passes(locks::suite());
}

#[test]
fn test_condvar_suite() {
    assert_suite_passes(condvar::suite());
}

#[test]
fn test_barrier_suite() {
    assert_suite_passes(barrier::suite());
}

#[test]
fn test_channels_suite() {
    assert_suite_passes(channels::suite());
}

#[test]
fn test_executors_suite() {
    assert_suite_passes(executors::suite());
}

#[test]
fn test_two_counters_decrement_exactly_total() {
    check(
        "test_counting_in_multiple_threads(AtomicsTest)",
        atomics::test_counting_in_multiple_threads,
    );
}

#[test]
fn test_every_suite_has_unique_ids() {
    let mut ids: Vec<String> = tck_suites::all_suites()
        .iter()
        .flat_map(Suite::test_ids)
        .collect();
    let total = ids.len();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), total);
    assert!(total >= 30);
}
