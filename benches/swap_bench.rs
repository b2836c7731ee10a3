//! Benchmark for contended updates through a single `Ref` vs sharded slots.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use immap::atomic::{ImMapSlots, Ref};
use immap::persistent::ImMap;
use std::hint::black_box;
use std::sync::Arc;
use std::thread;

const KEYS_PER_THREAD: i32 = 1000;

fn run_threads<S: Send + Sync + 'static>(
    shared: &Arc<S>,
    threads: i32,
    write: fn(&S, i32),
) {
    let handles: Vec<_> = (0..threads)
        .map(|thread_id| {
            let shared = Arc::clone(shared);
            thread::spawn(move || {
                for key in (thread_id * KEYS_PER_THREAD)..((thread_id + 1) * KEYS_PER_THREAD) {
                    write(&shared, black_box(key));
                }
            })
        })
        .collect();
    for handle in handles {
        let _ = handle.join();
    }
}

// =============================================================================
// Contended Write Benchmark
// =============================================================================

fn benchmark_contended_writes(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("contended_writes");
    group.sample_size(20);

    for threads in [1, 2, 4, 8] {
        group.bench_with_input(BenchmarkId::new("Ref", threads), &threads, |bencher, &threads| {
            bencher.iter(|| {
                let shared = Arc::new(Ref::with_retry_budget(ImMap::new(), usize::MAX));
                run_threads(&shared, threads, |cell, key| {
                    let _ = cell.swap(|map| map.add_or_update(key, key));
                });
                black_box(shared)
            });
        });

        group.bench_with_input(
            BenchmarkId::new("ImMapSlots", threads),
            &threads,
            |bencher, &threads| {
                bencher.iter(|| {
                    let slots = Arc::new(ImMapSlots::new());
                    run_threads(&slots, threads, |slots, key| {
                        let _ = slots.add_or_update(key, key);
                    });
                    black_box(slots)
                });
            },
        );
    }

    group.finish();
}

// =============================================================================
// Uncontended Read Benchmark
// =============================================================================

fn benchmark_reads(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("reads");
    let map: ImMap<i32> = (0..10_000).map(|key| (key, key)).collect();
    let shared = Ref::new(map.clone());
    let slots = ImMapSlots::new();
    for key in 0..10_000 {
        let _ = slots.add_or_update(key, key);
    }

    group.bench_function("Ref::with_value", |bencher| {
        bencher.iter(|| shared.with_value(|map| black_box(map.try_find(black_box(4242)).copied())));
    });
    group.bench_function("Ref::value", |bencher| {
        bencher.iter(|| black_box(shared.value()));
    });
    group.bench_function("ImMapSlots::try_find", |bencher| {
        bencher.iter(|| black_box(slots.try_find(black_box(4242))));
    });

    group.finish();
}

criterion_group!(benches, benchmark_contended_writes, benchmark_reads);

criterion_main!(benches);
