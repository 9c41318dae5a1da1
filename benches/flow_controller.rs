//! # Flow Controller Benchmarks
//!
//! Admission-path benchmarks: estimator queries and controller submissions.
//!
//! Run with: `cargo bench`

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use flowgate::{
    ControllerConfig, EstimatorConfig, ExecutionBackend, FlowController, FlowError,
    MemoryOrdering, NullEstimator, RateEstimator, Task, TokenBucket, WorkerPool,
};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Backend that accepts and drops everything.
struct DiscardBackend;

impl ExecutionBackend<u64> for DiscardBackend {
    fn submit_now(&self, _task: Task<u64>, _payload: u64) -> Result<(), FlowError> {
        Ok(())
    }

    fn submit_after(
        &self,
        _task: Task<u64>,
        _payload: u64,
        _delay: Duration,
    ) -> Result<(), FlowError> {
        Ok(())
    }

    fn stop(&self) {}
}

/// Benchmark single-threaded estimator queries
fn bench_next_available(c: &mut Criterion) {
    let mut group = c.benchmark_group("next_available");
    group.throughput(Throughput::Elements(1));

    group.bench_function("null", |b| {
        let estimator = NullEstimator::new();
        b.iter(|| std::hint::black_box(estimator.next_available()));
    });

    group.bench_function("token_bucket_unlimited", |b| {
        let bucket = TokenBucket::new(EstimatorConfig::unlimited());
        b.iter(|| std::hint::black_box(bucket.next_available()));
    });

    group.bench_function("token_bucket_throttling", |b| {
        let bucket = TokenBucket::per_second(1_000.0, 10);
        b.iter(|| std::hint::black_box(bucket.next_available()));
    });

    group.finish();
}

/// Benchmark different memory orderings
fn bench_memory_orderings(c: &mut Criterion) {
    let mut group = c.benchmark_group("memory_orderings");

    let orderings = [
        ("Relaxed", MemoryOrdering::Relaxed),
        ("AcquireRelease", MemoryOrdering::AcquireRelease),
        ("Sequential", MemoryOrdering::Sequential),
    ];

    for (name, ordering) in orderings {
        group.bench_function(name, |b| {
            let config = EstimatorConfig::new()
                .with_rate(1e9)
                .with_burst(1_000)
                .with_ordering(ordering);
            let bucket = TokenBucket::new(config);

            b.iter(|| std::hint::black_box(bucket.next_available()));
        });
    }

    group.finish();
}

/// Benchmark concurrent reservations on one bucket
fn bench_concurrent_reservations(c: &mut Criterion) {
    let mut group = c.benchmark_group("concurrent_reservations");

    for num_threads in [2, 4, 8, 16] {
        group.throughput(Throughput::Elements(num_threads as u64 * 1000));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}_threads", num_threads)),
            &num_threads,
            |b, &num_threads| {
                let bucket = Arc::new(TokenBucket::per_second(1_000_000.0, 1_000));

                b.iter_custom(|iters| {
                    let mut total_duration = Duration::ZERO;

                    for _ in 0..iters {
                        bucket.reset();
                        let start = std::time::Instant::now();

                        let handles: Vec<_> = (0..num_threads)
                            .map(|_| {
                                let bucket = bucket.clone();
                                thread::spawn(move || {
                                    for _ in 0..1000 {
                                        std::hint::black_box(bucket.next_available());
                                    }
                                })
                            })
                            .collect();

                        for handle in handles {
                            handle.join().unwrap();
                        }

                        total_duration += start.elapsed();
                    }

                    total_duration
                });
            },
        );
    }

    group.finish();
}

/// Benchmark the controller's submit path without execution cost
fn bench_submit(c: &mut Criterion) {
    let mut group = c.benchmark_group("submit");
    group.throughput(Throughput::Elements(1));

    group.bench_function("unthrottled", |b| {
        let controller = FlowController::new(Arc::new(DiscardBackend), None);
        b.iter(|| controller.submit(|_| Ok(()), std::hint::black_box(1)));
    });

    group.bench_function("delayed", |b| {
        // Burst of one at 1/s: every submission after the first is delayed.
        let config = ControllerConfig::new()
            .with_estimator(Arc::new(TokenBucket::per_second(1.0, 1)));
        let controller = FlowController::new(Arc::new(DiscardBackend), config);
        b.iter(|| controller.submit(|_| Ok(()), std::hint::black_box(1)));
    });

    group.finish();
}

/// Benchmark end-to-end hand-off into the worker pool
fn bench_worker_pool(c: &mut Criterion) {
    let mut group = c.benchmark_group("worker_pool");
    group.sample_size(20);

    for batch in [100u64, 1_000] {
        group.throughput(Throughput::Elements(batch));
        group.bench_with_input(BenchmarkId::from_parameter(batch), &batch, |b, &batch| {
            b.iter(|| {
                let pool = Arc::new(WorkerPool::<u64>::with_defaults().unwrap());
                let controller = FlowController::new(pool.clone(), None);
                for n in 0..batch {
                    controller.submit(|_| Ok(()), n).unwrap();
                }
                controller.stop();
                pool.join();
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_next_available,
    bench_memory_orderings,
    bench_concurrent_reservations,
    bench_submit,
    bench_worker_pool,
);

criterion_main!(benches);
