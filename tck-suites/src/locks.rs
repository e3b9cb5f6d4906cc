//! Mutual exclusion conformance
//!
//! Covers `std::sync::Mutex`, `std::sync::RwLock` and `spin::Mutex`. The
//! spin lock never sleeps in the kernel, so its waiters are made visible
//! with [`tck_harness::blocking`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, TryLockError};

use tck_harness::{Gate, Suite, TestContext, TestThread, blocking};

pub fn suite() -> Suite {
    Suite::new("LocksTest")
        .test("test_lock_blocks_second_thread", test_lock_blocks_second_thread)
        .test("test_try_lock_when_locked", test_try_lock_when_locked)
        .test("test_poisoned_after_panicking_holder", test_poisoned_after_panicking_holder)
        .test("test_readers_share_rwlock", test_readers_share_rwlock)
        .test("test_writer_excludes_readers", test_writer_excludes_readers)
        .test("test_spin_lock_blocks_second_thread", test_spin_lock_blocks_second_thread)
        .gated(
            "test_spin_lock_is_not_poisoned",
            Gate::IMPLEMENTATION_DETAILS,
            test_spin_lock_is_not_poisoned,
        )
}

/// A thread calling `lock` on a held mutex blocks until it is released
fn test_lock_blocks_second_thread(ctx: &TestContext) {
    let lock = Arc::new(Mutex::new(0));
    let acquired = Arc::new(AtomicBool::new(false));
    let guard = lock.lock().unwrap();

    let (remote, flag, worker) = (lock.clone(), acquired.clone(), ctx.clone());
    let t = ctx.new_started_thread(move || {
        let mut value = remote.lock().unwrap();
        *value += 1;
        flag.store(true, Ordering::SeqCst);
        worker.thread_assert_eq(1, *value);
    });

    ctx.wait_for_wait_state_default(&t);
    ctx.assert_thread_stays_alive(&t);
    assert!(!acquired.load(Ordering::SeqCst));
    drop(guard);
    ctx.await_termination_default(&t);
    assert!(acquired.load(Ordering::SeqCst));
    assert_eq!(*lock.lock().unwrap(), 1);
}

/// `try_lock` on a held mutex fails without blocking
fn test_try_lock_when_locked(ctx: &TestContext) {
    let lock = Arc::new(Mutex::new(()));
    let guard = lock.lock().unwrap();
    let (remote, worker) = (lock.clone(), ctx.clone());
    let t = ctx.new_started_thread(move || {
        worker.thread_assert(matches!(remote.try_lock(), Err(TryLockError::WouldBlock)));
    });
    ctx.await_termination_default(&t);
    drop(guard);
}

/// A holder that panics leaves the mutex poisoned, with its data intact
fn test_poisoned_after_panicking_holder(ctx: &TestContext) {
    let lock = Arc::new(Mutex::new(7));
    let remote = lock.clone();
    // Deliberately unchecked: this thread is meant to panic.
    let t = match TestThread::spawn("poisoner", move || {
        let _guard = remote.lock().unwrap();
        panic!("holder panics");
    }) {
        Ok(t) => t,
        Err(e) => ctx.thread_fail(format!("spawn failed: {}", e)),
    };
    assert!(t.join().is_err());

    assert!(lock.is_poisoned());
    match lock.lock() {
        Ok(_) => ctx.thread_should_panic("PoisonError"),
        Err(poisoned) => assert_eq!(*poisoned.into_inner(), 7),
    }
    lock.clear_poison();
    assert!(!lock.is_poisoned());
}

/// Readers do not block each other
fn test_readers_share_rwlock(ctx: &TestContext) {
    let lock = Arc::new(RwLock::new(5));
    let held = lock.read().unwrap();
    let (remote, worker) = (lock.clone(), ctx.clone());
    let t = ctx.new_started_thread(move || {
        let value = remote.read().unwrap();
        worker.thread_assert_eq(5, *value);
    });
    ctx.await_termination_default(&t);
    assert_eq!(*held, 5);
}

/// A writer waits for readers to leave, and holds readers off meanwhile
fn test_writer_excludes_readers(ctx: &TestContext) {
    let lock = Arc::new(RwLock::new(0));
    let held = lock.read().unwrap();

    let remote = lock.clone();
    let writer = ctx.new_started_thread(move || {
        *remote.write().unwrap() = 42;
    });
    ctx.wait_for_wait_state_default(&writer);
    ctx.assert_thread_stays_alive(&writer);
    assert_eq!(*held, 0);
    drop(held);
    ctx.await_termination_default(&writer);
    assert_eq!(*lock.read().unwrap(), 42);
}

/// A thread spinning for a held spin lock reads as waiting and proceeds
/// once the lock is released
fn test_spin_lock_blocks_second_thread(ctx: &TestContext) {
    let lock = Arc::new(spin::Mutex::new(0u32));
    let guard = lock.lock();
    let remote = lock.clone();
    let t = ctx.new_started_thread(move || {
        let mut value = blocking(|| remote.lock());
        *value += 1;
    });
    ctx.wait_for_wait_state_default(&t);
    ctx.assert_thread_stays_alive(&t);
    drop(guard);
    ctx.await_termination_default(&t);
    assert_eq!(*lock.lock(), 1);
}

/// Unlike `std::sync::Mutex`, a spin lock released by unwinding stays
/// usable
fn test_spin_lock_is_not_poisoned(ctx: &TestContext) {
    let lock = Arc::new(spin::Mutex::new(3));
    let remote = lock.clone();
    let t = match TestThread::spawn("spin-poisoner", move || {
        let mut guard = remote.lock();
        *guard += 1;
        panic!("holder panics");
    }) {
        Ok(t) => t,
        Err(e) => ctx.thread_fail(format!("spawn failed: {}", e)),
    };
    assert!(t.join().is_err());
    assert_eq!(*lock.lock(), 4);
}
