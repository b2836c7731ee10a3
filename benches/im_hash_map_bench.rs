//! Benchmark for ImHashMap vs standard HashMap.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use immap::persistent::ImHashMap;
use std::collections::HashMap;
use std::hint::black_box;

fn keys(size: usize) -> Vec<String> {
    (0..size).map(|index| format!("key-{index}")).collect()
}

// =============================================================================
// add_or_update Benchmark
// =============================================================================

fn benchmark_add_or_update(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("hash_add_or_update");

    for size in [100, 1000, 10000] {
        let keys = keys(size);

        group.bench_with_input(BenchmarkId::new("ImHashMap", size), &size, |bencher, _| {
            bencher.iter(|| {
                let mut map = ImHashMap::new();
                for (index, key) in keys.iter().enumerate() {
                    map = map.add_or_update(black_box(key.as_str()), black_box(index));
                }
                black_box(map)
            });
        });

        group.bench_with_input(BenchmarkId::new("HashMap", size), &size, |bencher, _| {
            bencher.iter(|| {
                let mut map = HashMap::new();
                for (index, key) in keys.iter().enumerate() {
                    map.insert(black_box(key.as_str()), black_box(index));
                }
                black_box(map)
            });
        });
    }

    group.finish();
}

// =============================================================================
// try_find Benchmark
// =============================================================================

fn benchmark_try_find(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("hash_try_find");

    for size in [100, 1000, 10000] {
        let keys = keys(size);
        let im_map: ImHashMap<String, usize> =
            keys.iter().cloned().enumerate().map(|(index, key)| (key, index)).collect();
        let hashes: Vec<u64> = keys.iter().map(|key| im_map.hash_key(key.as_str())).collect();

        group.bench_with_input(BenchmarkId::new("try_find", size), &size, |bencher, _| {
            bencher.iter(|| {
                for key in &keys {
                    black_box(im_map.try_find(black_box(key.as_str())));
                }
            });
        });

        group.bench_with_input(
            BenchmarkId::new("try_find_with_hash", size),
            &size,
            |bencher, _| {
                bencher.iter(|| {
                    for (key, &hash) in keys.iter().zip(&hashes) {
                        black_box(im_map.try_find_with_hash(hash, black_box(key.as_str())));
                    }
                });
            },
        );
    }

    group.finish();
}

// =============================================================================
// remove / traversal Benchmark
// =============================================================================

fn benchmark_remove_and_fold(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("hash_remove_fold");

    for size in [1000, 10000] {
        let im_map: ImHashMap<usize, usize> = (0..size).map(|index| (index, index)).collect();

        group.bench_with_input(BenchmarkId::new("remove_half", size), &size, |bencher, &size| {
            bencher.iter(|| {
                let mut map = im_map.clone();
                for index in (0..size).step_by(2) {
                    map = map.remove(&black_box(index));
                }
                black_box(map)
            });
        });

        group.bench_with_input(BenchmarkId::new("to_keys_and_values", size), &size, |bencher, _| {
            bencher.iter(|| black_box(im_map.to_keys_and_values()));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_add_or_update,
    benchmark_try_find,
    benchmark_remove_and_fold
);

criterion_main!(benches);
