//! Instance cache throughput benchmark.
//!
//! Measures TtlCache get/set latency at several fill levels, including the
//! eviction path when the cache is full.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::time::Duration;
use toolhost_core::cache::TtlCache;

const TTL: Duration = Duration::from_secs(3600);

fn filled(size: usize, max: usize) -> TtlCache<String, u64> {
    let mut cache = TtlCache::new(TTL, max);
    for i in 0..size {
        cache.set(format!("tenant-{}", i), i as u64, None);
    }
    cache
}

fn bench_get_hit(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let _guard = rt.enter();

    let mut group = c.benchmark_group("get_hit");
    for &size in &[100usize, 1_000, 10_000] {
        let mut cache = filled(size, size);
        let key = format!("tenant-{}", size / 2);
        group.bench_with_input(BenchmarkId::from_parameter(size), &key, |b, k| {
            b.iter(|| black_box(cache.get(black_box(k)).copied()));
        });
    }
    group.finish();
}

fn bench_set_with_eviction(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let _guard = rt.enter();

    let mut group = c.benchmark_group("set_evicting");
    for &size in &[100usize, 1_000, 10_000] {
        let mut cache = filled(size, size);
        let mut next = size as u64;
        group.bench_function(BenchmarkId::from_parameter(size), |b| {
            b.iter(|| {
                next += 1;
                cache.set(format!("tenant-{}", next), black_box(next), None);
            });
        });
    }
    group.finish();
}

fn bench_overwrite(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let _guard = rt.enter();

    let mut cache = filled(1_000, 1_000);
    c.bench_function("overwrite_existing", |b| {
        b.iter(|| cache.set("tenant-500".to_string(), black_box(7), None));
    });
}

criterion_group!(benches, bench_get_hit, bench_set_with_eviction, bench_overwrite);
criterion_main!(benches);
