//! Tiered cache benchmarks
//!
//! L1 hit path, L2 promotion path, fan-out writes and the memoization key
//! digest.

use bytes::Bytes;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;
use strata_cache::memoize::argument_digest;
use strata_cache::{
    CacheManager, CompressionConfig, LocalCache, LocalCacheConfig, MemoryBackend,
    RemoteCache, RemoteCacheConfig,
};
use tokio::runtime::Runtime;

fn two_tier(compression: bool) -> (Arc<CacheManager>, Arc<LocalCache>) {
    let local = Arc::new(LocalCache::new(LocalCacheConfig::default()).unwrap());
    let remote_config = RemoteCacheConfig {
        compression: CompressionConfig {
            enabled: compression,
            ..Default::default()
        },
        ..Default::default()
    };
    let remote =
        Arc::new(RemoteCache::new(Arc::new(MemoryBackend::new()), &remote_config).unwrap());
    let manager = CacheManager::builder()
        .tier(local.clone())
        .tier(remote)
        .operation_log_capacity(0)
        .build()
        .unwrap();
    (Arc::new(manager), local)
}

/// Benchmark: L1 get/put without the manager
fn bench_local(c: &mut Criterion) {
    let mut group = c.benchmark_group("local");
    let cache = LocalCache::new(LocalCacheConfig::default()).unwrap();
    for i in 0..1000 {
        cache.put(&format!("key:{}", i), Bytes::from_static(b"value"), None);
    }

    group.bench_function("get_hit", |b| {
        b.iter(|| cache.get_entry(black_box("key:500")))
    });

    group.bench_function("get_miss", |b| {
        b.iter(|| cache.get_entry(black_box("absent")))
    });

    let mut i = 0u64;
    group.bench_function("put_with_eviction", |b| {
        let small = LocalCache::new(LocalCacheConfig {
            max_entries: 128,
            ..Default::default()
        })
        .unwrap();
        b.iter(|| {
            i += 1;
            small.put(&format!("k{}", i), Bytes::from_static(b"value"), None);
        })
    });

    group.finish();
}

/// Benchmark: manager read paths
fn bench_manager_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("manager_get");
    let rt = Runtime::new().unwrap();
    let (manager, local) = two_tier(false);

    rt.block_on(async {
        manager.set("hot", Bytes::from_static(b"value"), None).await;
    });

    group.bench_function("l1_hit", |b| {
        b.to_async(&rt).iter(|| async {
            manager.get(black_box("hot")).await;
        });
    });

    group.bench_function("l2_promotion", |b| {
        b.to_async(&rt).iter(|| async {
            local.remove("hot");
            manager.get(black_box("hot")).await;
        });
    });

    group.bench_function("miss", |b| {
        b.to_async(&rt).iter(|| async {
            manager.get(black_box("cold")).await;
        });
    });

    group.finish();
}

/// Benchmark: fan-out writes by payload size, with and without compression
fn bench_manager_set(c: &mut Criterion) {
    let mut group = c.benchmark_group("manager_set");
    let rt = Runtime::new().unwrap();

    for size in [256usize, 4 * 1024, 64 * 1024] {
        let payload = Bytes::from("cache payload ".repeat(size / 14 + 1)[..size].to_string());
        group.throughput(Throughput::Bytes(size as u64));

        for compression in [false, true] {
            let (manager, _) = two_tier(compression);
            let label = if compression { "lz4" } else { "plain" };
            group.bench_with_input(BenchmarkId::new(label, size), &payload, |b, payload| {
                b.to_async(&rt).iter(|| async {
                    manager.set("k", payload.clone(), None).await;
                });
            });
        }
    }

    group.finish();
}

/// Benchmark: memo key digest
fn bench_digest(c: &mut Criterion) {
    let args = serde_json::json!({
        "user_id": 12345,
        "filters": {"region": "eu", "active": true},
        "page": 3
    });

    c.bench_function("argument_digest", |b| {
        b.iter(|| argument_digest(black_box(&args)).unwrap())
    });
}

/// Stats snapshot cost
fn bench_stats(c: &mut Criterion) {
    let (manager, local) = two_tier(false);
    for i in 0..100 {
        local.put(&format!("k{}", i), Bytes::from_static(b"v"), None);
    }
    c.bench_function("manager_stats", |b| {
        b.iter(|| black_box(manager.stats()))
    });
}

criterion_group!(
    benches,
    bench_local,
    bench_manager_get,
    bench_manager_set,
    bench_digest,
    bench_stats
);
criterion_main!(benches);
