use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use seqflow_benches::drain;
use seqflow_core::{BoxError, Executor};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn benchmark_sequential_throughput(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("sequential_throughput");
    group.measurement_time(Duration::from_secs(10));

    for actions in [100u64, 1_000, 10_000] {
        group.throughput(Throughput::Elements(actions));

        group.bench_with_input(BenchmarkId::new("ungrouped", actions), &actions, |b, &n| {
            b.to_async(&runtime)
                .iter(|| drain(Executor::new(None, Duration::ZERO), n, false))
        });

        group.bench_with_input(BenchmarkId::new("grouped_zero_window", actions), &actions, |b, &n| {
            b.to_async(&runtime)
                .iter(|| drain(Executor::new(None, Duration::ZERO), n, true))
        });

        group.bench_with_input(BenchmarkId::new("grouped_batched", actions), &actions, |b, &n| {
            b.to_async(&runtime)
                .iter(|| drain(Executor::new(None, Duration::from_millis(1)), n, true))
        });
    }

    group.finish();
}

fn benchmark_producers(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("concurrent_producers");

    for producers in [1usize, 4, 16] {
        group.bench_with_input(BenchmarkId::from_parameter(producers), &producers, |b, &p| {
            b.to_async(&runtime).iter(|| async move {
                let executor = Executor::new(None, Duration::ZERO);
                let worker = executor.spawn(CancellationToken::new());
                let handles = (0..p).map(|_| {
                    let executor = executor.clone();
                    tokio::spawn(async move {
                        for _ in 0..250 {
                            executor
                                .add_async(|| Ok::<(), BoxError>(()), &CancellationToken::new())
                                .await
                                .unwrap();
                        }
                    })
                });
                for result in futures::future::join_all(handles).await {
                    result.unwrap();
                }
                executor.shutdown().await;
                worker.await.unwrap().unwrap();
            })
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_sequential_throughput, benchmark_producers);
criterion_main!(benches);
