//! Barrier conformance

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};

use tck_harness::{Suite, TestContext};

pub fn suite() -> Suite {
    Suite::new("BarrierTest")
        .test("test_one_leader_per_generation", test_one_leader_per_generation)
        .test("test_last_arrival_releases_waiters", test_last_arrival_releases_waiters)
        .test("test_barrier_is_reusable", test_barrier_is_reusable)
}

fn run_parties(ctx: &TestContext, barrier: &Arc<Barrier>, parties: usize, leaders: &Arc<AtomicUsize>) {
    let threads: Vec<_> = (0..parties)
        .map(|_| {
            let (barrier, leaders) = (barrier.clone(), leaders.clone());
            ctx.new_started_thread(move || {
                if barrier.wait().is_leader() {
                    leaders.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();
    for t in &threads {
        ctx.await_termination_default(t);
    }
}

/// Exactly one of the parties released together is the leader
fn test_one_leader_per_generation(ctx: &TestContext) {
    const PARTIES: usize = 4;
    let barrier = Arc::new(Barrier::new(PARTIES));
    let leaders = Arc::new(AtomicUsize::new(0));
    run_parties(ctx, &barrier, PARTIES, &leaders);
    assert_eq!(leaders.load(Ordering::SeqCst), 1);
}

/// Early arrivals block until the last party arrives
fn test_last_arrival_releases_waiters(ctx: &TestContext) {
    let barrier = Arc::new(Barrier::new(2));
    let remote = barrier.clone();
    let t = ctx.new_started_thread(move || {
        remote.wait();
    });
    ctx.wait_for_wait_state_default(&t);
    ctx.assert_thread_stays_alive(&t);
    barrier.wait();
    ctx.await_termination_default(&t);
}

/// A barrier can be passed again once a generation is released
fn test_barrier_is_reusable(ctx: &TestContext) {
    const PARTIES: usize = 3;
    let barrier = Arc::new(Barrier::new(PARTIES));
    let leaders = Arc::new(AtomicUsize::new(0));
    for _ in 0..3 {
        run_parties(ctx, &barrier, PARTIES, &leaders);
    }
    assert_eq!(leaders.load(Ordering::SeqCst), 3);
}
