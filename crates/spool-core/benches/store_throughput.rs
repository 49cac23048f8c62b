//! Throughput benchmarks for the store backends and the worker pool.

use std::{
    hint::black_box,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use spool_core::{MemoryStore, Payload, SqliteStore, Store, StoreError, WorkerPool};
use spool_testing::TempStores;
use tokio::runtime::Runtime;

/// Enqueue-then-dequeue cycles against each backend.
fn bench_store_round_trip(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("store");
    group.throughput(Throughput::Elements(1));

    for payload_size in [64, 4096] {
        let payload = vec![0xA5; payload_size];

        group.bench_with_input(BenchmarkId::new("memory", payload_size), &payload, |b, payload| {
            let store = MemoryStore::new();
            b.to_async(&rt).iter(|| async {
                store.enqueue(payload.clone()).await.unwrap();
                black_box(store.dequeue().await.unwrap());
            });
        });

        group.bench_with_input(
            BenchmarkId::new("sqlite_memory", payload_size),
            &payload,
            |b, payload| {
                let store = rt.block_on(SqliteStore::in_memory()).unwrap();
                b.to_async(&rt).iter(|| async {
                    store.enqueue(payload.clone()).await.unwrap();
                    black_box(store.dequeue().await.unwrap());
                });
            },
        );

        group.bench_with_input(
            BenchmarkId::new("sqlite_file", payload_size),
            &payload,
            |b, payload| {
                let stores = TempStores::new().unwrap();
                let store = rt.block_on(stores.create()).unwrap();
                b.to_async(&rt).iter(|| async {
                    store.enqueue(payload.clone()).await.unwrap();
                    black_box(store.dequeue().await.unwrap());
                });
            },
        );
    }

    group.finish();
}

/// Time for a pool to drain a burst of enqueued items.
fn bench_pool_drain(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("pool_drain");
    group.measurement_time(Duration::from_secs(10));

    for workers in [1, 4, 16] {
        group.bench_with_input(BenchmarkId::new("workers", workers), &workers, |b, &workers| {
            b.iter_custom(|iters| {
                rt.block_on(async {
                    let handled = Arc::new(AtomicU64::new(0));
                    let counter = handled.clone();
                    let pool = WorkerPool::new(
                        Arc::new(MemoryStore::new()),
                        move |item: Result<Payload, StoreError>| {
                            let counter = counter.clone();
                            async move {
                                black_box(item?);
                                counter.fetch_add(1, Ordering::Relaxed);
                                Ok::<(), anyhow::Error>(())
                            }
                        },
                        workers,
                    )
                    .unwrap();

                    let start = Instant::now();
                    for _ in 0..iters {
                        pool.enqueue(vec![0; 128]).await.unwrap();
                    }
                    while handled.load(Ordering::Relaxed) < iters {
                        tokio::task::yield_now().await;
                    }
                    let elapsed = start.elapsed();

                    pool.close().await.unwrap();
                    elapsed
                })
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_store_round_trip, bench_pool_drain);
criterion_main!(benches);
