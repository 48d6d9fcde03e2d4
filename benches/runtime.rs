//! Benchmarks for frametask.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use frametask::{Continuation, LoopTiming, TaskRuntime, WaitOptions};
use std::thread;

fn bench_wait_until(c: &mut Criterion) {
    let runtime = TaskRuntime::with_defaults();

    let mut group = c.benchmark_group("wait_until");

    // Pooled after the first iteration
    group.bench_function("create_tick_read", |b| {
        b.iter(|| {
            let task = runtime.wait_until(|| true, WaitOptions::new()).unwrap();
            runtime.advance_phase(LoopTiming::Update);
            black_box(task.get_result().unwrap());
        })
    });

    for count in [10usize, 100, 1000] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("churn", count), &count, |b, &count| {
            let mut tasks = Vec::with_capacity(count);
            b.iter(|| {
                for _ in 0..count {
                    tasks.push(runtime.wait_until(|| true, WaitOptions::new()).unwrap());
                }
                runtime.advance_phase(LoopTiming::Update);
                for task in tasks.drain(..) {
                    black_box(task.get_result().unwrap());
                }
            })
        });
    }

    group.finish();
}

fn bench_completion_source(c: &mut Criterion) {
    let runtime = TaskRuntime::with_defaults();

    let mut group = c.benchmark_group("completion_source");

    group.bench_function("pooled_set_read", |b| {
        b.iter(|| {
            let source = runtime.completion_source::<u64>();
            let task = source.task();
            source.try_set_result(42);
            drop(source);
            black_box(task.get_result().unwrap());
        })
    });

    group.bench_function("yield_drain", |b| {
        b.iter(|| {
            let task = runtime.yield_now(LoopTiming::Update).unwrap();
            runtime.drain_phase(LoopTiming::Update);
            black_box(task.get_result().unwrap());
        })
    });

    group.finish();
}

fn bench_queue_drain(c: &mut Criterion) {
    let runtime = TaskRuntime::with_defaults();

    let mut group = c.benchmark_group("continuation_queue");

    group.throughput(Throughput::Elements(1000));
    group.bench_function("enqueue_drain_1000", |b| {
        b.iter(|| {
            for i in 0..1000u64 {
                runtime
                    .add_continuation(
                        LoopTiming::Update,
                        Continuation::new(move || {
                            black_box(i);
                        }),
                    )
                    .unwrap();
            }
            runtime.drain_phase(LoopTiming::Update);
        })
    });

    group.bench_function("enqueue_4_threads_drain_4000", |b| {
        b.iter(|| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let runtime = runtime.clone();
                    thread::spawn(move || {
                        for i in 0..1000u64 {
                            runtime
                                .add_continuation(
                                    LoopTiming::Update,
                                    Continuation::new(move || {
                                        black_box(i);
                                    }),
                                )
                                .unwrap();
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }
            runtime.drain_phase(LoopTiming::Update);
        })
    });

    group.finish();
}

fn bench_tick(c: &mut Criterion) {
    let runtime = TaskRuntime::with_defaults();
    let parked: Vec<_> = (0..256)
        .map(|_| runtime.wait_until(|| false, WaitOptions::new()).unwrap())
        .collect();

    c.bench_function("tick_256_pending_waits", |b| {
        b.iter(|| runtime.tick())
    });

    drop(parked);
}

criterion_group!(
    benches,
    bench_wait_until,
    bench_completion_source,
    bench_queue_drain,
    bench_tick,
);
criterion_main!(benches);
