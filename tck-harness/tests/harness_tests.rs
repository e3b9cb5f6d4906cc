//! Test-case lifecycle tests
//!
//! These run whole cases through `run_case` and check that failures on
//! worker threads, stray interrupts and slow threads decide the outcome.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tck_harness::{
    Config, ConfigBuilder, FailureKind, Interrupted, Latch, TestContext, ThreadState, blocking,
    check, delay, run_case,
};

fn fast_config() -> Arc<Config> {
    Arc::new(ConfigBuilder::new().delay_factor(0.1).build().unwrap())
}

#[test]
fn test_worker_assert_equals_fails_case() {
    // The body returns normally; only the worker fails.
    let result = run_case("thread_assert_eq_on_worker", fast_config(), |ctx| {
        let worker = ctx.clone();
        let t = ctx.new_started_thread(move || worker.thread_assert_eq(1, 2));
        ctx.await_termination_default(&t);
    });
    assert!(!result.passed());
    let failure = result.failure.unwrap();
    assert_eq!(failure.kind(), FailureKind::Assertion);
    assert!(failure.message().contains("expected:<1> but was:<2>"));
}

#[test]
fn test_plain_panic_on_worker_fails_case() {
    let result = run_case("panic_on_worker", fast_config(), |ctx| {
        let t = ctx.new_started_thread(|| panic!("worker blew up"));
        ctx.await_termination_default(&t);
    });
    let failure = result.failure.unwrap();
    assert_eq!(failure.kind(), FailureKind::Unexpected);
    assert_eq!(failure.message(), "worker blew up");
}

#[test]
fn test_first_worker_failure_wins() {
    let result = run_case("two_failing_workers", fast_config(), |ctx| {
        let first = ctx.clone();
        let t1 = ctx.new_started_thread(move || first.thread_fail("first"));
        ctx.await_termination_default(&t1);
        let second = ctx.clone();
        let t2 = ctx.new_started_thread(move || second.thread_fail("second"));
        ctx.await_termination_default(&t2);
    });
    assert_eq!(result.failure.unwrap().message(), "first");
}

#[test]
fn test_await_termination_passes_for_prompt_thread() {
    let result = run_case("prompt_thread", fast_config(), |ctx| {
        let t = ctx.new_started_thread(|| {
            let _ = delay(Duration::from_millis(5));
        });
        ctx.await_termination(&t, ctx.delays().long);
        assert_eq!(t.state(), ThreadState::Terminated);
    });
    assert!(result.passed(), "{:?}", result.failure);
}

#[test]
fn test_await_termination_interrupts_and_fails_slow_thread() {
    let interrupted = Arc::new(AtomicBool::new(false));
    let seen = interrupted.clone();
    let result = run_case("slow_thread", fast_config(), move |ctx| {
        let t = ctx.new_started_thread(move || {
            if delay(Duration::from_secs(60)).is_err() {
                seen.store(true, Ordering::SeqCst);
            }
        });
        ctx.await_termination(&t, Duration::from_millis(20));
    });
    let failure = result.failure.unwrap();
    assert!(failure.message().contains("timed out waiting for thread to terminate"));

    let deadline = Instant::now() + Duration::from_secs(10);
    while !interrupted.load(Ordering::SeqCst) {
        assert!(Instant::now() < deadline, "slow thread was never interrupted");
        std::thread::yield_now();
    }
}

#[test]
fn test_wait_for_wait_state_sees_blocked_thread() {
    check("blocked_on_latch", |ctx| {
        let latch = Arc::new(Latch::new(1));
        let waiter = ctx.clone();
        let remote = latch.clone();
        let t = ctx.new_started_thread(move || waiter.await_latch_default(&remote));
        ctx.wait_for_wait_state_default(&t);
        ctx.assert_thread_stays_alive(&t);
        latch.count_down();
        ctx.await_termination_default(&t);
    });
}

#[test]
fn test_wait_for_wait_state_honours_condition() {
    check("blocked_with_condition", |ctx| {
        let release = Arc::new(AtomicBool::new(false));
        let polls = Arc::new(AtomicUsize::new(0));
        let flag = release.clone();
        let t = ctx.new_started_thread(move || {
            blocking(|| {
                while !flag.load(Ordering::SeqCst) {
                    std::hint::spin_loop();
                }
            })
        });
        let counter = polls.clone();
        ctx.wait_for_wait_state_until(&t, ctx.delays().long, || {
            counter.fetch_add(1, Ordering::SeqCst) >= 3
        });
        assert!(polls.load(Ordering::SeqCst) >= 4);
        release.store(true, Ordering::SeqCst);
        ctx.await_termination_default(&t);
    });
}

#[test]
fn test_wait_for_wait_state_fails_on_termination() {
    let result = run_case("terminated_before_wait", fast_config(), |ctx| {
        let t = ctx.new_started_thread(|| {});
        t.join_timeout(Duration::from_secs(10));
        ctx.wait_for_wait_state_default(&t);
    });
    assert_eq!(result.failure.unwrap().message(), "Unexpected thread termination");
}

#[test]
fn test_interrupted_worker_passes_checked_interrupted() {
    check("interrupt_expected", |ctx| {
        let started = Arc::new(Latch::new(1));
        let signal = started.clone();
        let t = ctx.new_started_thread(ctx.checked_interrupted(move || {
            signal.count_down();
            delay(Duration::from_secs(60))
        }));
        ctx.await_latch_default(&started);
        t.interrupt();
        ctx.await_termination_default(&t);
    });
}

#[test]
fn test_checked_interrupted_rejects_uninterrupted_body() {
    let result = run_case("interrupt_missing", fast_config(), |ctx| {
        let t = ctx.new_started_thread(ctx.checked_interrupted(|| Ok::<(), Interrupted>(())));
        ctx.await_termination_default(&t);
    });
    assert!(result.failure.unwrap().message().contains("Interrupted"));
}

#[test]
fn test_stray_main_interrupt_fails_teardown() {
    let result = run_case("stray_interrupt", fast_config(), |_| {
        tck_harness::interrupt::current().interrupt();
    });
    assert_eq!(result.failure.unwrap().kind(), FailureKind::Teardown);
}

#[test]
fn test_main_panic_is_primary_failure() {
    let result = run_case("main_panics", fast_config(), |ctx| {
        let worker = ctx.clone();
        let t = ctx.new_started_thread(move || worker.thread_fail("worker failure"));
        ctx.await_termination_default(&t);
        ctx.thread_fail("main failure");
    });
    // The main failure was recorded after the worker's, but it is the one
    // the body unwound with.
    assert_eq!(result.failure.unwrap().message(), "main failure");
}

#[test]
fn test_context_is_usable_in_order() {
    let ctx = TestContext::set_up("manual", fast_config());
    assert_eq!(ctx.name(), "manual");
    assert_eq!(ctx.delays().short, Duration::from_millis(5));
    assert!(ctx.tear_down().is_ok());
}
