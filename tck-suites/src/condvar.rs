//! Condition variable conformance

use std::sync::{Arc, Condvar, Mutex};
use std::time::Instant;

use tck_harness::{Interrupted, Latch, Suite, TestContext, interrupt};

pub fn suite() -> Suite {
    Suite::new("CondvarTest")
        .test("test_wait_timeout_times_out", test_wait_timeout_times_out)
        .test("test_wait_while_timeout_times_out", test_wait_while_timeout_times_out)
        .test("test_notified_waiter_wakes", test_notified_waiter_wakes)
        .test("test_notify_all_wakes_every_waiter", test_notify_all_wakes_every_waiter)
        .test("test_interrupted_waiter_gives_up", test_interrupted_waiter_gives_up)
}

type Shared = Arc<(Mutex<bool>, Condvar)>;

fn new_shared() -> Shared {
    Arc::new((Mutex::new(false), Condvar::new()))
}

/// A timed wait without a notification times out, and not early
fn test_wait_timeout_times_out(ctx: &TestContext) {
    let timeout = ctx.delays().timeout();
    let shared = new_shared();
    let (lock, cv) = &*shared;
    let guard = lock.lock().unwrap();
    let start = Instant::now();
    let (_guard, result) = cv.wait_timeout(guard, timeout).unwrap();
    // Spurious wakeups are allowed, so only a timeout implies the wait ran out.
    if result.timed_out() {
        assert!(start.elapsed() >= timeout);
    }
}

/// `wait_timeout_while` keeps waiting through spurious wakeups
fn test_wait_while_timeout_times_out(ctx: &TestContext) {
    let timeout = ctx.delays().timeout();
    let shared = new_shared();
    let (lock, cv) = &*shared;
    let start = Instant::now();
    let (ready, result) = cv
        .wait_timeout_while(lock.lock().unwrap(), timeout, |ready| !*ready)
        .unwrap();
    assert!(result.timed_out());
    assert!(!*ready);
    assert!(start.elapsed() >= timeout);
}

/// A waiter wakes when signalled, and only after the signaller releases
/// the lock
fn test_notified_waiter_wakes(ctx: &TestContext) {
    let shared = new_shared();
    let locked = Arc::new(Latch::new(1));
    let (remote, signal) = (shared.clone(), locked.clone());
    let t = ctx.new_started_thread(move || {
        let (lock, cv) = &*remote;
        let mut ready = lock.lock().unwrap();
        signal.count_down();
        while !*ready {
            ready = cv.wait(ready).unwrap();
        }
    });

    ctx.await_latch_default(&locked);
    let (lock, cv) = &*shared;
    let mut ready = lock.lock().unwrap();
    *ready = true;
    cv.notify_one();
    assert!(t.is_alive());
    drop(ready);
    ctx.await_termination_default(&t);
}

fn test_notify_all_wakes_every_waiter(ctx: &TestContext) {
    const WAITERS: usize = 3;
    let shared = new_shared();
    let locked = Arc::new(Latch::new(WAITERS));
    let waiters: Vec<_> = (0..WAITERS)
        .map(|_| {
            let (remote, signal) = (shared.clone(), locked.clone());
            ctx.new_started_thread(move || {
                let (lock, cv) = &*remote;
                let mut ready = lock.lock().unwrap();
                signal.count_down();
                while !*ready {
                    ready = cv.wait(ready).unwrap();
                }
            })
        })
        .collect();

    ctx.await_latch_default(&locked);
    for waiter in &waiters {
        ctx.wait_for_wait_state_default(waiter);
    }
    let (lock, cv) = &*shared;
    *lock.lock().unwrap() = true;
    cv.notify_all();
    for waiter in &waiters {
        ctx.await_termination_default(waiter);
    }
}

/// Wait on `cv` in short slices, giving up when interrupted
fn wait_interruptibly(ctx: &TestContext, shared: &Shared) -> Result<(), Interrupted> {
    let (lock, cv) = &**shared;
    let mut ready = lock.lock().unwrap();
    while !*ready {
        if interrupt::interrupted() {
            return Err(Interrupted);
        }
        ready = cv.wait_timeout(ready, ctx.delays().short).unwrap().0;
    }
    Ok(())
}

/// A waiter that polls its interrupt flag leaves the wait when interrupted
fn test_interrupted_waiter_gives_up(ctx: &TestContext) {
    let shared = new_shared();
    let (worker, remote) = (ctx.clone(), shared.clone());
    let t = ctx.new_started_thread(ctx.checked_interrupted(move || {
        wait_interruptibly(&worker, &remote)
    }));
    ctx.wait_for_wait_state_default(&t);
    t.interrupt();
    ctx.await_termination_default(&t);
    assert!(!*shared.0.lock().unwrap());
}
