//! Performance benchmarks for the kvpool connection pool
//!
//! This benchmark suite measures the overhead the pool adds around each
//! command: borrowing and returning connections, validation on checkout,
//! and contention when callers outnumber connections.
//!
//! All benchmarks run against the in-memory server so they measure the
//! pool rather than the network.
//!
//! Run benchmarks with:
//! ```bash
//! cargo bench
//! ```

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use futures::future::join_all;
use kvpool::{MemoryServer, Pool, PoolConfig};

/// Builds a pool on the given runtime
fn pool(rt: &tokio::runtime::Runtime, config: PoolConfig) -> Arc<Pool> {
    rt.block_on(async { Arc::new(Pool::connect(config).await.unwrap()) })
}

/// Benchmark for a bare acquire/release cycle
///
/// This benchmark measures bookkeeping cost with and without the
/// liveness check on checkout.
fn bench_acquire_release(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("acquire_release");

    for validate in [false, true] {
        let config = PoolConfig::new(MemoryServer::new()).with_validate_on_acquire(validate);
        let pool = pool(&rt, config);

        group.bench_with_input(BenchmarkId::new("validate", validate), &pool, |b, pool| {
            b.to_async(&rt).iter(|| async {
                let conn = pool.core().acquire().await.unwrap();
                pool.core().release(black_box(conn)).unwrap();
            });
        });

        rt.block_on(pool.shutdown());
    }

    group.finish();
}

/// Benchmark for writes and reads through the facade
fn bench_set_get(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let pool = pool(&rt, PoolConfig::new(MemoryServer::new()));
    let value = vec![0u8; 256];

    c.bench_function("set_256b", |b| {
        b.to_async(&rt).iter(|| async {
            pool.set("bench:key", black_box(value.clone()), None)
                .await
                .unwrap();
        });
    });

    c.bench_function("get_256b", |b| {
        b.to_async(&rt).iter(|| async {
            black_box(pool.get("bench:key").await.unwrap());
        });
    });

    rt.block_on(pool.shutdown());
}

/// Benchmark for contention on a small pool
///
/// This benchmark measures the cost of queuing when the number of
/// concurrent callers exceeds the number of connections.
fn bench_contention(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("contention");

    for callers in [4usize, 16, 64] {
        let config = PoolConfig::new(MemoryServer::new()).with_max_connections(4);
        let pool = pool(&rt, config);

        group.bench_with_input(BenchmarkId::from_parameter(callers), &callers, |b, &callers| {
            b.to_async(&rt).iter(|| async {
                let results = join_all((0..callers).map(|_| pool.incr("bench:counter"))).await;
                black_box(results);
            });
        });

        rt.block_on(pool.shutdown());
    }

    group.finish();
}

criterion_group!(benches, bench_acquire_release, bench_set_get, bench_contention);
criterion_main!(benches);
