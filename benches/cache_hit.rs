//! Cache hit path benchmarks.
//!
//! Measures lookups that are answered from a `Success` entry without fetching.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use reelcache::{FetchError, ResourceCache};
use tokio::runtime::Runtime;

fn warm_cache(rt: &Runtime, entries: u64) -> ResourceCache<u64, String> {
    let cache = ResourceCache::new("bench");
    rt.block_on(async {
        for key in 0..entries {
            cache
                .request(key, |k| async move { Ok(format!("value-{k}")) }, false)
                .await;
        }
    });
    cache
}

fn bench_request_hit(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("cache/request_hit");

    for entries in [1u64, 1_000, 100_000] {
        let cache = warm_cache(&rt, entries);
        group.bench_with_input(BenchmarkId::from_parameter(entries), &entries, |b, &n| {
            let mut key = 0;
            b.iter(|| {
                key = (key + 1) % n;
                let phase = rt.block_on(cache.request(
                    key,
                    |_| async { Err(FetchError::Network("warm cache fetched".into())) },
                    false,
                ));
                black_box(phase);
            });
        });
    }

    group.finish();
}

fn bench_peek(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let cache = warm_cache(&rt, 1_000);

    c.bench_function("cache/peek", |b| {
        let mut key = 0;
        b.iter(|| {
            key = (key + 1) % 1_000;
            black_box(cache.peek(&key));
        });
    });
}

criterion_group!(benches, bench_request_hit, bench_peek);
criterion_main!(benches);
