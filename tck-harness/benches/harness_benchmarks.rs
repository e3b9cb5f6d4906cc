//! Harness overhead benchmarks
//!
//! - Failure slot recording under contention
//! - Checked thread spawn and join
//! - Delay computation

use std::hint::black_box;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use tck_harness::{ConfigBuilder, Delays, Failure, FailureSlot, TestContext};

fn bench_slot_contention(c: &mut Criterion) {
    let mut group = c.benchmark_group("failure_slot_record");
    for writers in [1usize, 2, 4, 8] {
        group.bench_with_input(BenchmarkId::from_parameter(writers), &writers, |b, &writers| {
            b.iter(|| {
                let slot = Arc::new(FailureSlot::new());
                let handles: Vec<_> = (0..writers)
                    .map(|i| {
                        let slot = slot.clone();
                        thread::spawn(move || slot.record(Failure::assertion(format!("writer {}", i))))
                    })
                    .collect();
                for handle in handles {
                    black_box(handle.join().ok());
                }
                black_box(slot.take())
            })
        });
    }
    group.finish();
}

fn bench_checked_thread(c: &mut Criterion) {
    let config = Arc::new(ConfigBuilder::new().build().unwrap());
    let ctx = TestContext::set_up("bench_checked_thread", config);
    c.bench_function("checked_thread_spawn_join", |b| {
        b.iter(|| {
            let t = ctx.new_started_thread(|| {
                black_box(1 + 1);
            });
            ctx.await_termination(&t, Duration::from_secs(10));
        })
    });
    ctx.tear_down().unwrap();
}

fn bench_delay_compute(c: &mut Criterion) {
    c.bench_function("delays_compute", |b| b.iter(|| Delays::compute(black_box(2.5))));
}

criterion_group!(
    harness_benchmarks,
    bench_slot_contention,
    bench_checked_thread,
    bench_delay_compute
);

criterion_main!(harness_benchmarks);
