use core::hint::black_box;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use ferropool::{Handlers, Pool, Task, TaskFailure, blocking_fn, from_fn};
use futures::StreamExt;
use std::{sync::Arc, time::Instant};
use tokio::runtime::{Builder, Runtime};

// Number of inputs per benchmark iteration.
const TOTAL_INPUTS: usize = 4096;

// Worker counts to compare.
const POOL_SIZES: [usize; 3] = [1, 4, 16];

/// A task that yields once before answering, so every input crosses the
/// scheduler at least once.
struct YieldingSquare;

impl Task for YieldingSquare {
    type Input = u64;
    type Output = u64;

    async fn run(&self, input: &u64) -> Result<u64, TaskFailure> {
        tokio::task::yield_now().await;
        Ok(input.wrapping_mul(*input))
    }
}

fn runtime() -> Runtime {
    Builder::new_multi_thread()
        .enable_all()
        .worker_threads(4)
        .build()
        .unwrap()
}

/// Benchmarks each consumption discipline against the same task.
fn bench_disciplines<T>(c: &mut Criterion, group_name: &str, task: impl Fn() -> T + Copy)
where
    T: Task<Input = u64, Output = u64>,
{
    let mut group = c.benchmark_group(group_name);
    group.throughput(Throughput::Elements(TOTAL_INPUTS as u64));

    for pool_size in POOL_SIZES {
        let rt = runtime();
        let pool = {
            let _guard = rt.enter();
            Pool::new(pool_size).unwrap()
        };
        let pool = &pool;

        group.bench_function(format!("map/workers/{pool_size}"), |b| {
            b.to_async(&rt).iter_custom(|iters| async move {
                let start = Instant::now();
                for _ in 0..iters {
                    let results = pool
                        .map(0..TOTAL_INPUTS as u64, task(), Handlers::default())
                        .await
                        .unwrap();
                    black_box(results);
                }
                start.elapsed()
            });
        });

        group.bench_function(format!("imap/workers/{pool_size}"), |b| {
            b.to_async(&rt).iter_custom(|iters| async move {
                let start = Instant::now();
                for _ in 0..iters {
                    let mut stream = pool
                        .imap(0..TOTAL_INPUTS as u64, task(), Handlers::default())
                        .unwrap();
                    while let Some(item) = stream.next().await {
                        black_box(item.unwrap());
                    }
                }
                start.elapsed()
            });
        });

        group.bench_function(format!("imap_unordered/workers/{pool_size}"), |b| {
            b.to_async(&rt).iter_custom(|iters| async move {
                let start = Instant::now();
                for _ in 0..iters {
                    let mut stream = pool
                        .imap_unordered(0..TOTAL_INPUTS as u64, task(), Handlers::default())
                        .unwrap();
                    while let Some(item) = stream.next().await {
                        black_box(item.unwrap());
                    }
                }
                start.elapsed()
            });
        });

        group.bench_function(format!("imap_unordered_extended/workers/{pool_size}"), |b| {
            b.to_async(&rt).iter_custom(|iters| async move {
                let start = Instant::now();
                for _ in 0..iters {
                    let mut stream = pool
                        .imap_unordered_extended(
                            0..TOTAL_INPUTS as u64,
                            task(),
                            Handlers::default(),
                        )
                        .unwrap();
                    while let Some(item) = stream.next().await {
                        black_box(item.unwrap());
                    }
                }
                start.elapsed()
            });
        });

        pool.close();
    }

    group.finish();
}

/// Synchronous closure executed inline on the worker.
fn benchmark_fn_task(c: &mut Criterion) {
    let task = Arc::new(from_fn("square", |x: &u64| Ok::<_, String>(x.wrapping_mul(*x))));
    bench_disciplines(c, "fn_task", || Arc::clone(&task));
}

/// Async task that yields to the scheduler once per input.
fn benchmark_async_task(c: &mut Criterion) {
    bench_disciplines(c, "async_task", || YieldingSquare);
}

/// Synchronous closure executed on the blocking pool.
fn benchmark_blocking_task(c: &mut Criterion) {
    let task = Arc::new(blocking_fn("square", |x: &u64| {
        Ok::<_, String>(x.wrapping_mul(*x))
    }));
    bench_disciplines(c, "blocking_task", || Arc::clone(&task));
}

criterion_group!(
    benches,
    benchmark_fn_task,
    benchmark_async_task,
    benchmark_blocking_task,
);
criterion_main!(benches);
