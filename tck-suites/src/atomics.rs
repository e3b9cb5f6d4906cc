//! Atomic integer and boolean conformance

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, AtomicUsize, Ordering};

use tck_harness::{Action, Gate, Suite, TestContext};

/// Number of counters in the shared array
pub const SIZE: usize = 20;
/// Starting value of every counter
pub const COUNTDOWN: i32 = 10_000;

pub fn suite() -> Suite {
    Suite::new("AtomicsTest")
        .test("test_counting_in_multiple_threads", test_counting_in_multiple_threads)
        .test("test_compare_and_set_in_multiple_threads", test_compare_and_set_in_multiple_threads)
        .test("test_weak_compare_and_set", test_weak_compare_and_set)
        .test("test_get_and_set_visibility", test_get_and_set_visibility)
        .test("test_fetch_update_in_parallel", test_fetch_update_in_parallel)
        .gated(
            "test_counting_with_many_threads",
            Gate::EXPENSIVE,
            test_counting_with_many_threads,
        )
}

fn new_counters(countdown: i32) -> Arc<Vec<AtomicI32>> {
    Arc::new((0..SIZE).map(|_| AtomicI32::new(countdown)).collect())
}

/// Decrement every counter to zero, racing with other counters
///
/// Returns the number of successful decrements made by this caller.
fn count_down(ctx: &TestContext, counters: &[AtomicI32]) -> usize {
    let mut decs = 0;
    loop {
        let mut done = true;
        for counter in counters {
            let v = counter.load(Ordering::SeqCst);
            ctx.thread_assert(v >= 0);
            if v != 0 {
                done = false;
                if counter
                    .compare_exchange(v, v - 1, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    decs += 1;
                }
            }
        }
        if done {
            return decs;
        }
    }
}

fn run_counters(ctx: &TestContext, threads: usize) {
    let counters = new_counters(COUNTDOWN);
    let total = Arc::new(AtomicUsize::new(0));
    let workers: Vec<_> = (0..threads)
        .map(|_| {
            let (ctx2, counters, total) = (ctx.clone(), counters.clone(), total.clone());
            ctx.new_started_thread(move || {
                let decs = count_down(&ctx2, &counters);
                total.fetch_add(decs, Ordering::SeqCst);
            })
        })
        .collect();
    for worker in &workers {
        ctx.await_termination_default(worker);
    }
    assert_eq!(total.load(Ordering::SeqCst), SIZE * COUNTDOWN as usize);
}

/// Two threads sharing the counters perform exactly `SIZE * COUNTDOWN`
/// decrements between them
pub fn test_counting_in_multiple_threads(ctx: &TestContext) {
    run_counters(ctx, 2);
}

fn test_counting_with_many_threads(ctx: &TestContext) {
    run_counters(ctx, 8);
}

/// A thread spinning on compare-and-set succeeds once another thread makes
/// the expected value current
fn test_compare_and_set_in_multiple_threads(ctx: &TestContext) {
    let a = Arc::new(AtomicI32::new(1));
    let remote = a.clone();
    let t = ctx.new_started_thread(move || {
        while remote
            .compare_exchange(2, 3, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            std::thread::yield_now();
        }
    });
    assert!(a.compare_exchange(1, 2, Ordering::SeqCst, Ordering::SeqCst).is_ok());
    ctx.await_termination_default(&t);
    assert_eq!(a.load(Ordering::SeqCst), 3);
}

/// Repeated weak compare-and-set eventually succeeds for a matching value
fn test_weak_compare_and_set(_ctx: &TestContext) {
    let counters = new_counters(0);
    for counter in counters.iter() {
        counter.store(1, Ordering::SeqCst);
        while counter
            .compare_exchange_weak(1, 2, Ordering::SeqCst, Ordering::Relaxed)
            .is_err()
        {}
        while counter
            .compare_exchange_weak(2, -4, Ordering::SeqCst, Ordering::Relaxed)
            .is_err()
        {}
        assert_eq!(counter.load(Ordering::SeqCst), -4);
        assert_eq!(
            counter.compare_exchange_weak(2, 7, Ordering::SeqCst, Ordering::Relaxed),
            Err(-4)
        );
    }
}

/// A value published with `swap` is seen by a thread waiting for it, and
/// the old value is handed back exactly once
fn test_get_and_set_visibility(ctx: &TestContext) {
    let flag = Arc::new(AtomicBool::new(false));
    let winners = Arc::new(AtomicUsize::new(0));
    let racers: Vec<_> = (0..4)
        .map(|_| {
            let (flag, winners) = (flag.clone(), winners.clone());
            ctx.new_started_thread(move || {
                if !flag.swap(true, Ordering::SeqCst) {
                    winners.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();
    for racer in &racers {
        ctx.await_termination_default(racer);
    }
    assert!(flag.load(Ordering::SeqCst));
    assert_eq!(winners.load(Ordering::SeqCst), 1);
}

/// Concurrent `fetch_update` increments are never lost
fn test_fetch_update_in_parallel(ctx: &TestContext) {
    const PER_ACTION: i64 = 1_000;
    let value = Arc::new(AtomicI64::new(0));
    let actions: Vec<Action> = (0..4)
        .map(|_| {
            let (ctx, value) = (ctx.clone(), value.clone());
            Box::new(move || {
                for _ in 0..PER_ACTION {
                    let prev = value.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| Some(v + 1));
                    ctx.thread_assert(prev.is_ok());
                }
            }) as Action
        })
        .collect();
    ctx.test_in_parallel(actions);
    assert_eq!(value.load(Ordering::SeqCst), 4 * PER_ACTION);
}
