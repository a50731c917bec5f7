//! Benchmarks for tables keyed by precomputed 64-bit hashes

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use tessera_core::alloc::{HashMap, HashMap64};

/// Spread keys the way name hashes are spread.
fn keys(size: u64) -> Vec<u64> {
    (0..size)
        .map(|i| i.wrapping_mul(0x9e37_79b9_7f4a_7c15))
        .collect()
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("hash_table_insert");

    for size in [100u64, 1000, 10000] {
        let keys = keys(size);
        group.throughput(Throughput::Elements(size));

        group.bench_with_input(BenchmarkId::new("ahash", size), &keys, |b, keys| {
            b.iter(|| {
                let mut map = HashMap::new();
                for &key in keys {
                    map.insert(black_box(key), key);
                }
                map
            });
        });

        group.bench_with_input(BenchmarkId::new("identity", size), &keys, |b, keys| {
            b.iter(|| {
                let mut map = HashMap64::default();
                for &key in keys {
                    map.insert(black_box(key), key);
                }
                map
            });
        });
    }

    group.finish();
}

fn bench_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("hash_table_lookup");

    for size in [100u64, 1000, 10000] {
        let keys = keys(size);
        let ahash_map: HashMap<u64, u64> = keys.iter().map(|&k| (k, k)).collect();
        let identity_map: HashMap64<u64> = keys.iter().map(|&k| (k, k)).collect();
        group.throughput(Throughput::Elements(size));

        group.bench_with_input(BenchmarkId::new("ahash", size), &keys, |b, keys| {
            b.iter(|| {
                let mut sum = 0u64;
                for key in keys {
                    if let Some(&val) = ahash_map.get(black_box(key)) {
                        sum = sum.wrapping_add(val);
                    }
                }
                sum
            });
        });

        group.bench_with_input(BenchmarkId::new("identity", size), &keys, |b, keys| {
            b.iter(|| {
                let mut sum = 0u64;
                for key in keys {
                    if let Some(&val) = identity_map.get(black_box(key)) {
                        sum = sum.wrapping_add(val);
                    }
                }
                sum
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_insert, bench_lookup);
criterion_main!(benches);
