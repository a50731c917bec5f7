//! Benchmarks for archive lookup and reads

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use tessera_resource::{ArchiveBuilder, ArchiveIndex, EntryOptions, hash_path};

fn build_index(size: usize, options: EntryOptions<'_>) -> (ArchiveIndex, Vec<u64>) {
    let mut builder = ArchiveBuilder::new();
    let mut hashes = Vec::with_capacity(size);
    for i in 0..size {
        let path = format!("content/asset_{i}.bin");
        let payload = format!("payload for {path} ").repeat(8);
        builder.add_path(&path, payload.as_bytes(), options).unwrap();
        hashes.push(hash_path(&path));
    }
    let index = ArchiveIndex::from_memory([builder.to_bytes()]).unwrap();
    (index, hashes)
}

fn bench_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("archive_lookup");

    for size in [100, 1000, 10000] {
        let (index, hashes) = build_index(size, EntryOptions::default());
        group.throughput(Throughput::Elements(hashes.len() as u64));

        group.bench_with_input(BenchmarkId::from_parameter(size), &hashes, |b, hashes| {
            b.iter(|| {
                for &hash in hashes {
                    black_box(index.lookup(black_box(hash)));
                }
            });
        });
    }

    group.finish();
}

fn bench_lookup_miss(c: &mut Criterion) {
    let (index, _) = build_index(10000, EntryOptions::default());

    c.bench_function("archive_lookup_miss", |b| {
        b.iter(|| black_box(index.lookup(black_box(hash_path("missing/asset.bin")))));
    });
}

fn bench_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("archive_read");

    let (plain, hashes) = build_index(1000, EntryOptions::default());
    group.bench_function("plain", |b| {
        b.iter(|| {
            for &hash in &hashes {
                let entry = plain.lookup(hash).unwrap();
                black_box(plain.read(&entry, None).unwrap());
            }
        });
    });

    let (compressed, hashes) = build_index(1000, EntryOptions::compressed());
    group.bench_function("lz4", |b| {
        b.iter(|| {
            for &hash in &hashes {
                let entry = compressed.lookup(hash).unwrap();
                black_box(compressed.read(&entry, None).unwrap());
            }
        });
    });

    group.finish();
}

criterion_group!(benches, bench_lookup, bench_lookup_miss, bench_read);
criterion_main!(benches);
