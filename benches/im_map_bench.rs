//! Benchmark for ImMap vs standard BTreeMap.
//!
//! Compares path-copying inserts, lookups and iteration of ImMap against
//! Rust's standard BTreeMap.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use immap::persistent::{ImMap, ParentStack};
use std::collections::BTreeMap;
use std::hint::black_box;

// =============================================================================
// add_or_update Benchmark
// =============================================================================

fn benchmark_add_or_update(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("add_or_update");

    for size in [100, 1000, 10000] {
        group.bench_with_input(BenchmarkId::new("ImMap", size), &size, |bencher, &size| {
            bencher.iter(|| {
                let mut map = ImMap::new();
                for index in 0..size {
                    map = map.add_or_update(black_box(index), black_box(index * 2));
                }
                black_box(map)
            });
        });

        group.bench_with_input(BenchmarkId::new("BTreeMap", size), &size, |bencher, &size| {
            bencher.iter(|| {
                let mut map = BTreeMap::new();
                for index in 0..size {
                    map.insert(black_box(index), black_box(index * 2));
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
    let mut group = criterion.benchmark_group("try_find");

    for size in [100, 1000, 10000] {
        let im_map: ImMap<i32> = (0..size).map(|index| (index, index)).collect();
        let btree_map: BTreeMap<i32, i32> = (0..size).map(|index| (index, index)).collect();

        group.bench_with_input(BenchmarkId::new("ImMap", size), &size, |bencher, &size| {
            bencher.iter(|| {
                for index in 0..size {
                    black_box(im_map.try_find(black_box(index)));
                }
            });
        });

        group.bench_with_input(BenchmarkId::new("BTreeMap", size), &size, |bencher, &size| {
            bencher.iter(|| {
                for index in 0..size {
                    black_box(btree_map.get(&black_box(index)));
                }
            });
        });
    }

    group.finish();
}

// =============================================================================
// remove Benchmark
// =============================================================================

fn benchmark_remove(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("remove");

    for size in [100, 1000, 10000] {
        let im_map: ImMap<i32> = (0..size).map(|index| (index, index)).collect();

        group.bench_with_input(BenchmarkId::new("ImMap", size), &size, |bencher, &size| {
            bencher.iter(|| {
                let mut map = im_map.clone();
                for index in 0..size {
                    map = map.remove(black_box(index));
                }
                black_box(map)
            });
        });
    }

    group.finish();
}

// =============================================================================
// fold Benchmark
// =============================================================================

fn benchmark_fold(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("fold");

    for size in [100, 1000, 10000] {
        let im_map: ImMap<i64> = (0..size).map(|index| (index, i64::from(index))).collect();

        group.bench_with_input(BenchmarkId::new("fold", size), &size, |bencher, _| {
            bencher.iter(|| black_box(im_map.fold(0, |sum, entry| sum + entry.value())));
        });

        group.bench_with_input(
            BenchmarkId::new("fold_with_stack", size),
            &size,
            |bencher, _| {
                let mut stack = ParentStack::new();
                bencher.iter(|| {
                    black_box(im_map.fold_with_stack(0, &mut stack, |sum, entry| {
                        sum + entry.value()
                    }))
                });
            },
        );

        group.bench_with_input(BenchmarkId::new("iter", size), &size, |bencher, _| {
            bencher.iter(|| black_box(im_map.values().sum::<i64>()));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_add_or_update,
    benchmark_try_find,
    benchmark_remove,
    benchmark_fold
);

criterion_main!(benches);
