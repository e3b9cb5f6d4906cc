//! Thread pool conformance
//!
//! Exercises [`ThreadPool`] through the same cleanup paths tests of other
//! pools would use.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tck_harness::{
    Action, Latch, PoolError, TaskError, ThreadPool, TrackedTask, Suite, TestContext, WorkerPool,
    delay, releaser,
};

pub fn suite() -> Suite {
    Suite::new("ExecutorsTest")
        .test("test_fixed_pool_executes_tasks", test_fixed_pool_executes_tasks)
        .test("test_zero_threads_is_invalid", test_zero_threads_is_invalid)
        .test("test_timed_get_returns_value", test_timed_get_returns_value)
        .test("test_panicking_task_reports_failure", test_panicking_task_reports_failure)
        .test("test_submit_after_shutdown_is_rejected", test_submit_after_shutdown_is_rejected)
        .test("test_shutdown_now_interrupts_running_task", test_shutdown_now_interrupts_running_task)
        .test("test_cancel_interrupts_running_task", test_cancel_interrupts_running_task)
        .test("test_blocked_workers_released_by_cleaner", test_blocked_workers_released_by_cleaner)
        .test("test_in_parallel_runs_actions", test_in_parallel_runs_actions)
}

/// A fixed pool runs every task it accepts
fn test_fixed_pool_executes_tasks(ctx: &TestContext) {
    let tasks: Vec<TrackedTask> = (0..3).map(|_| TrackedTask::no_op()).collect();
    ctx.with_pool(ctx.new_fixed_pool(2), |pool| {
        for task in &tasks {
            pool.execute(task.runnable()).unwrap();
        }
    });
    assert!(tasks.iter().all(TrackedTask::is_done));
}

fn test_zero_threads_is_invalid(_ctx: &TestContext) {
    match ThreadPool::new(0) {
        Ok(_) => panic!("pool without workers was created"),
        Err(e) => assert_eq!(e.kind(), io::ErrorKind::InvalidInput),
    }
}

fn test_timed_get_returns_value(ctx: &TestContext) {
    ctx.with_pool(ctx.new_fixed_pool(1), |pool| {
        let handle = pool.submit(|| "result").unwrap();
        ctx.check_timed_get(&handle, "result", ctx.delays().long);
        assert!(handle.is_done());
    });
}

fn test_panicking_task_reports_failure(ctx: &TestContext) {
    ctx.with_pool(ctx.new_fixed_pool(1), |pool| {
        let handle = pool.submit(|| -> u8 { panic!("task failed") }).unwrap();
        match handle.get_timeout(ctx.delays().long) {
            Err(TaskError::Panicked(failure)) => assert_eq!(failure.message(), "task failed"),
            other => ctx.thread_fail(format!("expected a panicked task, got {:?}", other)),
        }
        // The worker survives the panic.
        let next = pool.submit(|| 1u8).unwrap();
        ctx.check_timed_get(&next, 1, ctx.delays().long);
    });
}

fn test_submit_after_shutdown_is_rejected(ctx: &TestContext) {
    let pool = ctx.new_fixed_pool(1);
    pool.shutdown().unwrap();
    assert!(matches!(pool.execute(|| {}), Err(PoolError::Rejected(_))));
    assert!(matches!(pool.submit(|| 1), Err(PoolError::Rejected(_))));
    assert_eq!(pool.await_termination(ctx.delays().long), Ok(true));
}

/// `shutdown_now` interrupts the running task and drops queued ones
fn test_shutdown_now_interrupts_running_task(ctx: &TestContext) {
    let pool = ctx.new_fixed_pool(1);
    let started = Arc::new(Latch::new(1));
    let signal = started.clone();
    let longer = ctx.delays().longer;
    pool.execute(ctx.checked_interrupted(move || {
        signal.count_down();
        delay(longer)
    }))
    .unwrap();
    let queued = TrackedTask::no_op();
    pool.execute(queued.runnable()).unwrap();

    ctx.await_latch_default(&started);
    assert_eq!(pool.shutdown_now(), Ok(1));
    assert_eq!(pool.await_termination(ctx.delays().long), Ok(true));
    assert!(!queued.is_done());
}

fn test_cancel_interrupts_running_task(ctx: &TestContext) {
    ctx.with_pool(ctx.new_fixed_pool(1), |pool| {
        let started = Arc::new(Latch::new(1));
        let signal = started.clone();
        let task = TrackedTask::with_delay(ctx.delays().longer);
        let runner = task.clone();
        let handle = pool
            .submit(move || {
                signal.count_down();
                runner.run()
            })
            .unwrap();
        ctx.await_latch_default(&started);
        ctx.assert_task_times_out(&handle, ctx.delays().timeout());
        assert!(handle.cancel(true));
        assert!(handle.is_cancelled());
        assert_eq!(handle.get_timeout(ctx.delays().short), Err(TaskError::Cancelled));
        assert!(!task.is_done());
    });
}

/// Workers blocked on a latch the test controls are released before the
/// pool is joined
fn test_blocked_workers_released_by_cleaner(ctx: &TestContext) {
    let latch = Arc::new(Latch::new(1));
    let finished = Arc::new(AtomicUsize::new(0));
    {
        let pool = ctx.new_fixed_pool(2);
        let _cleaner = ctx.cleaner_with_releaser(&pool, releaser::latch(latch.clone()));
        for _ in 0..2 {
            let (latch, finished, worker) = (latch.clone(), finished.clone(), ctx.clone());
            pool.execute(ctx.checked(move || {
                worker.await_latch_default(&latch);
                finished.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        }
    }
    assert_eq!(finished.load(Ordering::SeqCst), 2);
}

fn test_in_parallel_runs_actions(ctx: &TestContext) {
    let hits = Arc::new(AtomicUsize::new(0));
    let actions: Vec<Action> = (0..3)
        .map(|_| {
            let hits = hits.clone();
            Box::new(move || {
                hits.fetch_add(1, Ordering::SeqCst);
            }) as Action
        })
        .collect();
    ctx.test_in_parallel(actions);
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}
