//! `std::sync::mpsc` conformance

use std::sync::mpsc::{self, RecvError, RecvTimeoutError, TryRecvError};
use std::time::Instant;

use tck_harness::{Suite, TestContext};

pub fn suite() -> Suite {
    Suite::new("ChannelsTest")
        .test("test_fifo_order", test_fifo_order)
        .test("test_blocked_receiver_wakes_on_send", test_blocked_receiver_wakes_on_send)
        .test("test_disconnect_wakes_receiver", test_disconnect_wakes_receiver)
        .test("test_recv_timeout_times_out", test_recv_timeout_times_out)
        .test("test_try_recv_on_empty_channel", test_try_recv_on_empty_channel)
        .test("test_rendezvous_send_blocks", test_rendezvous_send_blocks)
}

/// Values from one sender arrive in the order they were sent
fn test_fifo_order(ctx: &TestContext) {
    const COUNT: u32 = 100;
    let (tx, rx) = mpsc::channel();
    let worker = ctx.clone();
    let t = ctx.new_started_thread(move || {
        for expected in 0..COUNT {
            worker.thread_assert_eq(Ok(expected), rx.recv());
        }
    });
    for i in 0..COUNT {
        tx.send(i).unwrap();
    }
    ctx.await_termination_default(&t);
}

fn test_blocked_receiver_wakes_on_send(ctx: &TestContext) {
    let (tx, rx) = mpsc::channel();
    let worker = ctx.clone();
    let t = ctx.new_started_thread(move || worker.thread_assert_eq(Ok("hello"), rx.recv()));
    ctx.wait_for_wait_state_default(&t);
    ctx.assert_thread_stays_alive(&t);
    tx.send("hello").unwrap();
    ctx.await_termination_default(&t);
}

/// Dropping the last sender releases a blocked receiver with an error
fn test_disconnect_wakes_receiver(ctx: &TestContext) {
    let (tx, rx) = mpsc::channel::<u8>();
    let worker = ctx.clone();
    let t = ctx.new_started_thread(move || worker.thread_assert_eq(Err(RecvError), rx.recv()));
    ctx.wait_for_wait_state_default(&t);
    drop(tx);
    ctx.await_termination_default(&t);
}

fn test_recv_timeout_times_out(ctx: &TestContext) {
    let timeout = ctx.delays().timeout();
    let (_tx, rx) = mpsc::channel::<u8>();
    let start = Instant::now();
    assert_eq!(rx.recv_timeout(timeout), Err(RecvTimeoutError::Timeout));
    assert!(start.elapsed() >= timeout);
}

fn test_try_recv_on_empty_channel(_ctx: &TestContext) {
    let (tx, rx) = mpsc::channel::<u8>();
    assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    tx.send(1).unwrap();
    assert_eq!(rx.try_recv(), Ok(1));
    drop(tx);
    assert_eq!(rx.try_recv(), Err(TryRecvError::Disconnected));
}

/// On a zero-capacity channel `send` blocks until a receiver takes the value
fn test_rendezvous_send_blocks(ctx: &TestContext) {
    let (tx, rx) = mpsc::sync_channel(0);
    let worker = ctx.clone();
    let t = ctx.new_started_thread(move || worker.thread_assert(tx.send(9).is_ok()));
    ctx.wait_for_wait_state_default(&t);
    ctx.assert_thread_stays_alive(&t);
    assert_eq!(rx.recv(), Ok(9));
    ctx.await_termination_default(&t);
}
