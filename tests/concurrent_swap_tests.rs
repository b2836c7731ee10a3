//! Integration tests for concurrent updates through `Ref` and the slots.
//!
//! Every test runs writers on plain threads and checks that no update is
//! lost once all of them have joined.

#![cfg(feature = "atomic")]
#![allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap, clippy::cast_sign_loss)]

use immap::atomic::{ImHashMapSlots, ImMapSlots, Ref, SwapError};
use immap::persistent::{ImHashMap, ImMap};
use rstest::rstest;
use std::sync::{Arc, Barrier};
use std::thread;

const THREADS: i32 = 8;
const KEYS_PER_THREAD: i32 = 200;

/// Spawns `THREADS` writers that start together and each call `write` with
/// their disjoint keys.
fn run_writers<S, F>(shared: &Arc<S>, write: F)
where
    S: Send + Sync + 'static,
    F: Fn(&S, i32) + Send + Sync + Copy + 'static,
{
    let barrier = Arc::new(Barrier::new(THREADS as usize));
    let handles: Vec<_> = (0..THREADS)
        .map(|thread_id| {
            let shared = Arc::clone(shared);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for key in (thread_id * KEYS_PER_THREAD)..((thread_id + 1) * KEYS_PER_THREAD) {
                    write(&shared, key);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}

// =============================================================================
// Ref Integration Tests
// =============================================================================

#[rstest]
fn test_ref_im_map_concurrent_convergence() {
    // Large budget: one shared root is contended by every writer.
    let shared = Arc::new(Ref::with_retry_budget(ImMap::new(), 10_000));
    run_writers(&shared, |cell: &Ref<ImMap<i32>>, key| {
        cell.swap(|map| map.add_or_update(key, key * 2)).unwrap();
    });

    let map = shared.value();
    assert_eq!(map.count(), (THREADS * KEYS_PER_THREAD) as usize);
    for key in 0..THREADS * KEYS_PER_THREAD {
        assert_eq!(map.try_find(key), Some(&(key * 2)));
    }
}

#[rstest]
fn test_ref_im_hash_map_concurrent_convergence() {
    let shared = Arc::new(Ref::with_retry_budget(ImHashMap::new(), 10_000));
    run_writers(&shared, |cell: &Ref<ImHashMap<String, i32>>, key| {
        cell.swap(|map| map.add_or_update(key.to_string(), key)).unwrap();
    });

    let map = shared.value();
    assert_eq!(map.count(), (THREADS * KEYS_PER_THREAD) as usize);
    assert_eq!(map.try_find("1234"), Some(&1234));
}

#[rstest]
fn test_readers_see_complete_snapshots() {
    let shared = Arc::new(Ref::new(ImMap::new()));
    let writer = {
        let shared = Arc::clone(&shared);
        thread::spawn(move || {
            for key in 0..500 {
                shared.swap(|map| map.add_or_update(key, key)).unwrap();
            }
        })
    };
    let reader = {
        let shared = Arc::clone(&shared);
        thread::spawn(move || {
            for _ in 0..500 {
                let snapshot = shared.value();
                // Keys are added in order, so a snapshot is always a prefix.
                let count = snapshot.count();
                let keys: Vec<i32> = snapshot.keys().collect();
                assert_eq!(keys, (0..count as i32).collect::<Vec<_>>());
            }
        })
    };
    writer.join().unwrap();
    reader.join().unwrap();
    assert_eq!(shared.value().count(), 500);
}

#[rstest]
fn test_budget_exhaustion_surfaces_as_error() {
    let cell = Ref::with_retry_budget(ImMap::new(), 2);
    let result = cell.swap(|map| {
        cell.exchange(map.add_or_update(0, 0));
        map.add_or_update(1, 1)
    });
    assert_eq!(result.err(), Some(SwapError::RetryBudgetExceeded { attempts: 2 }));
    assert!(!cell.value().contains_key(1));
}

// =============================================================================
// Slots Integration Tests
// =============================================================================

#[rstest]
fn test_im_map_slots_concurrent_convergence() {
    let slots = Arc::new(ImMapSlots::new());
    run_writers(&slots, |slots: &ImMapSlots<i32>, key| {
        slots.add_or_update(key, -key).unwrap();
    });

    assert_eq!(slots.count(), (THREADS * KEYS_PER_THREAD) as usize);
    for key in 0..THREADS * KEYS_PER_THREAD {
        assert_eq!(slots.try_find(key), Some(-key));
    }
}

#[rstest]
fn test_im_hash_map_slots_concurrent_convergence() {
    let slots = Arc::new(ImHashMapSlots::with_shard_count(4));
    run_writers(&slots, |slots: &ImHashMapSlots<i32, i32>, key| {
        slots.add_or_update(key, key).unwrap();
        slots.add_or_update_with(key, 1, |_, old, new| old + new).unwrap();
    });

    assert_eq!(slots.count(), (THREADS * KEYS_PER_THREAD) as usize);
    let (keys, values) = slots.to_keys_and_values();
    for (key, value) in keys.iter().zip(&values) {
        assert_eq!(*value, key + 1);
    }
}

#[rstest]
fn test_slots_concurrent_removal() {
    let slots = Arc::new(ImMapSlots::with_shard_count(4));
    for key in 0..THREADS * KEYS_PER_THREAD {
        slots.add_or_update(key, ()).unwrap();
    }
    run_writers(&slots, |slots: &ImMapSlots<()>, key| {
        if key % 2 == 0 {
            slots.remove(key).unwrap();
        }
    });
    assert_eq!(slots.count(), (THREADS * KEYS_PER_THREAD / 2) as usize);
    assert!(slots.contains_key(1));
    assert!(!slots.contains_key(2));
}
