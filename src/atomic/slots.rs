//! Sharded map roots for reduced write contention.
//!
//! A slots value keeps a fixed, power-of-two number of independent map
//! roots, each in its own [`Ref`]. The shard of a key is selected by masking
//! the low bits of its hash, so writers touching different shards never
//! race each other.
//!
//! Writes first make one plain compare-and-swap attempt. Only if that
//! attempt loses do they enter the retrying [`Ref::swap`] loop.
//!
//! Reads see each shard at its own linearization point; a traversal over all
//! shards is not an atomic snapshot of the whole collection.
//!
//! # Examples
//!
//! ```rust
//! use immap::atomic::ImHashMapSlots;
//!
//! let slots = ImHashMapSlots::new();
//! slots.add_or_update("apple", 3).unwrap();
//! slots.add_or_update("pear", 5).unwrap();
//!
//! assert_eq!(slots.try_find("apple"), Some(3));
//! assert_eq!(slots.fold(0, |sum, entry| sum + entry.value()), 8);
//! ```

use std::borrow::Borrow;
use std::fmt;
use std::hash::{BuildHasher, Hash};

use super::cell::{Ref, SwapError};
use crate::persistent::entry::{Policy, Proposal};
use crate::persistent::{
    DefaultHashBuilder, ImHashMap, ImHashMapEntry, ImMap, ImMapEntry, ParentStack,
    ReferenceCounter,
};

/// Number of shards used by `new`.
pub const DEFAULT_SHARD_COUNT: usize = 32;

fn build_shards<M>(shard_count: usize, mut empty: impl FnMut() -> M) -> Box<[Ref<M>]> {
    assert!(
        shard_count.is_power_of_two(),
        "shard count must be a non-zero power of two, got {shard_count}"
    );
    (0..shard_count).map(|_| Ref::new(empty())).collect()
}

/// One inline attempt, then the retrying loop.
///
/// A shard with retry budget `n` is tried at most `n + 1` times, and a
/// failure reports every one of those attempts.
fn commit<M, F>(shard: &Ref<M>, mut update: F) -> Result<(), SwapError>
where
    M: Clone + Send + 'static,
    F: FnMut(&M) -> M,
{
    if shard.compare_and_swap_once(&mut update).is_some() {
        return Ok(());
    }
    shard
        .swap(update)
        .map(drop)
        .map_err(|SwapError::RetryBudgetExceeded { attempts }| {
            SwapError::RetryBudgetExceeded {
                attempts: attempts + 1,
            }
        })
}

// =============================================================================
// ImMapSlots
// =============================================================================

/// Sharded, concurrently updatable [`ImMap`].
///
/// # Examples
///
/// ```rust
/// use immap::atomic::ImMapSlots;
/// use std::sync::Arc;
/// use std::thread;
///
/// let slots = Arc::new(ImMapSlots::new());
/// let writers: Vec<_> = (0..4)
///     .map(|thread_id| {
///         let slots = Arc::clone(&slots);
///         thread::spawn(move || {
///             for key in (thread_id * 100)..(thread_id * 100 + 100) {
///                 slots.add_or_update(key, key * 2).unwrap();
///             }
///         })
///     })
///     .collect();
/// for writer in writers {
///     writer.join().unwrap();
/// }
///
/// assert_eq!(slots.count(), 400);
/// assert_eq!(slots.try_find(150), Some(300));
/// ```
pub struct ImMapSlots<V> {
    shards: Box<[Ref<ImMap<V>>]>,
    mask: usize,
}

impl<V: Send + Sync + 'static> ImMapSlots<V> {
    /// Creates [`DEFAULT_SHARD_COUNT`] empty shards.
    #[must_use]
    pub fn new() -> Self {
        Self::with_shard_count(DEFAULT_SHARD_COUNT)
    }

    /// Creates `shard_count` empty shards.
    ///
    /// # Panics
    ///
    /// Panics if `shard_count` is not a non-zero power of two.
    #[must_use]
    pub fn with_shard_count(shard_count: usize) -> Self {
        Self {
            shards: build_shards(shard_count, ImMap::new),
            mask: shard_count - 1,
        }
    }

    /// Returns the number of shards.
    #[inline]
    #[must_use]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Returns the index of the shard that owns `key`.
    #[inline]
    #[must_use]
    pub const fn shard_index(&self, key: i32) -> usize {
        key.cast_unsigned() as usize & self.mask
    }

    fn shard_of(&self, key: i32) -> &Ref<ImMap<V>> {
        &self.shards[self.shard_index(key)]
    }

    /// Inserts `value` under `key`, replacing any existing value.
    ///
    /// # Errors
    ///
    /// Returns [`SwapError`] if the owning shard stays contended past its
    /// retry budget. One inline attempt precedes the budgeted retries, so
    /// the reported count is the budget plus one.
    pub fn add_or_update(&self, key: i32, value: V) -> Result<(), SwapError> {
        self.propose(ImMapEntry::new(key, value), Policy::AddOrUpdate)
    }

    /// Inserts `value` under `key` only if the key is absent.
    ///
    /// # Errors
    ///
    /// Returns [`SwapError`] if the owning shard stays contended past its
    /// retry budget. One inline attempt precedes the budgeted retries, so
    /// the reported count is the budget plus one.
    pub fn add_or_keep(&self, key: i32, value: V) -> Result<(), SwapError> {
        self.propose(ImMapEntry::new(key, value), Policy::AddOrKeep)
    }

    /// Replaces the value under `key` only if the key is present.
    ///
    /// # Errors
    ///
    /// Returns [`SwapError`] if the owning shard stays contended past its
    /// retry budget. One inline attempt precedes the budgeted retries, so
    /// the reported count is the budget plus one.
    pub fn update(&self, key: i32, value: V) -> Result<(), SwapError> {
        self.propose(ImMapEntry::new(key, value), Policy::Update)
    }

    /// Removes `key`.
    ///
    /// # Errors
    ///
    /// Returns [`SwapError`] if the owning shard stays contended past its
    /// retry budget. One inline attempt precedes the budgeted retries, so
    /// the reported count is the budget plus one.
    pub fn remove(&self, key: i32) -> Result<(), SwapError> {
        commit(self.shard_of(key), |map| map.remove(key))
    }

    fn propose(&self, entry: ImMapEntry<V>, policy: Policy) -> Result<(), SwapError> {
        let key = entry.key();
        let proposal = Proposal::new(ReferenceCounter::new(entry), policy);
        commit(self.shard_of(key), |map| map.resolve(proposal.clone()))
    }

    /// Returns a clone of the value stored under `key`.
    #[must_use]
    pub fn try_find(&self, key: i32) -> Option<V>
    where
        V: Clone,
    {
        self.shard_of(key)
            .with_value(|map| map.try_find(key).cloned())
    }

    /// Returns `true` if some shard contains `key`.
    #[must_use]
    pub fn contains_key(&self, key: i32) -> bool {
        self.shard_of(key).with_value(|map| map.contains_key(key))
    }

    /// Returns the current map of the shard at `index`.
    #[must_use]
    pub fn shard(&self, index: usize) -> Option<ImMap<V>> {
        self.shards.get(index).map(Ref::value)
    }

    /// Returns the current map of every shard, in shard order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ImMap<V>> {
        self.shards.iter().map(Ref::value).collect()
    }

    /// Folds the entries of all shards, shard by shard.
    pub fn fold<B, F>(&self, init: B, mut function: F) -> B
    where
        F: FnMut(B, &ImMapEntry<V>) -> B,
    {
        let maps = self.snapshot();
        let mut stack = ParentStack::new();
        let mut accumulator = init;
        for map in &maps {
            accumulator = map.fold_with_stack(accumulator, &mut stack, &mut function);
        }
        accumulator
    }

    /// Calls `visitor` for the entries of all shards, shard by shard.
    pub fn visit<F>(&self, mut visitor: F)
    where
        F: FnMut(&ImMapEntry<V>),
    {
        self.fold((), |(), entry| visitor(entry));
    }

    /// Counts the entries of all shards.
    #[must_use]
    pub fn count(&self) -> usize {
        self.fold(0, |count, _| count + 1)
    }

    /// Copies all keys and values into two parallel vectors.
    #[must_use]
    pub fn to_keys_and_values(&self) -> (Vec<i32>, Vec<V>)
    where
        V: Clone,
    {
        self.fold((Vec::new(), Vec::new()), |(mut keys, mut values), entry| {
            keys.push(entry.key());
            values.push(entry.value().clone());
            (keys, values)
        })
    }

    /// Folds every shard on the rayon thread pool and combines the results.
    ///
    /// `init` creates the starting accumulator of each shard; `reduce`
    /// combines two accumulators and must be associative.
    #[cfg(feature = "rayon")]
    pub fn par_fold<B, I, F, R>(&self, init: I, function: F, reduce: R) -> B
    where
        B: Send,
        I: Fn() -> B + Sync + Send,
        F: Fn(B, &ImMapEntry<V>) -> B + Sync + Send,
        R: Fn(B, B) -> B + Sync + Send,
    {
        use rayon::prelude::*;
        self.snapshot()
            .par_iter()
            .map(|map| map.fold(init(), &function))
            .reduce(&init, reduce)
    }
}

impl<V: Send + Sync + 'static> Default for ImMapSlots<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> fmt::Debug for ImMapSlots<V> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ImMapSlots")
            .field("shard_count", &self.shards.len())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// ImHashMapSlots
// =============================================================================

/// Sharded, concurrently updatable [`ImHashMap`].
///
/// Every shard hashes with a clone of the same `BuildHasher`, and the shard
/// index comes from the low bits of that hash.
pub struct ImHashMapSlots<K, V, S = DefaultHashBuilder> {
    shards: Box<[Ref<ImHashMap<K, V, S>>]>,
    hasher: S,
    mask: usize,
}

impl<K, V> ImHashMapSlots<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Creates [`DEFAULT_SHARD_COUNT`] empty shards with the default hasher.
    #[must_use]
    pub fn new() -> Self {
        Self::with_shard_count_and_hasher(DEFAULT_SHARD_COUNT, DefaultHashBuilder::default())
    }

    /// Creates `shard_count` empty shards with the default hasher.
    ///
    /// # Panics
    ///
    /// Panics if `shard_count` is not a non-zero power of two.
    #[must_use]
    pub fn with_shard_count(shard_count: usize) -> Self {
        Self::with_shard_count_and_hasher(shard_count, DefaultHashBuilder::default())
    }
}

impl<K, V, S> ImHashMapSlots<K, V, S>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Send + Sync + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    /// Creates `shard_count` empty shards that hash with `hasher`.
    ///
    /// # Panics
    ///
    /// Panics if `shard_count` is not a non-zero power of two.
    #[must_use]
    pub fn with_shard_count_and_hasher(shard_count: usize, hasher: S) -> Self {
        Self {
            shards: build_shards(shard_count, || ImHashMap::with_hasher(hasher.clone())),
            hasher,
            mask: shard_count - 1,
        }
    }

    /// Returns the number of shards.
    #[inline]
    #[must_use]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Hashes `key` the way every shard does.
    #[inline]
    pub fn hash_key<Q: Hash + ?Sized>(&self, key: &Q) -> u64 {
        self.hasher.hash_one(key)
    }

    /// Returns the index of the shard that owns keys with `hash`.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn shard_index(&self, hash: u64) -> usize {
        hash as usize & self.mask
    }

    fn shard_of(&self, hash: u64) -> &Ref<ImHashMap<K, V, S>> {
        &self.shards[self.shard_index(hash)]
    }

    /// Inserts `value` under `key`, replacing any existing value.
    ///
    /// # Errors
    ///
    /// Returns [`SwapError`] if the owning shard stays contended past its
    /// retry budget. One inline attempt precedes the budgeted retries, so
    /// the reported count is the budget plus one.
    pub fn add_or_update(&self, key: K, value: V) -> Result<(), SwapError> {
        self.propose(key, value, Policy::AddOrUpdate)
    }

    /// Inserts `value` under `key` only if the key is absent.
    ///
    /// # Errors
    ///
    /// Returns [`SwapError`] if the owning shard stays contended past its
    /// retry budget. One inline attempt precedes the budgeted retries, so
    /// the reported count is the budget plus one.
    pub fn add_or_keep(&self, key: K, value: V) -> Result<(), SwapError> {
        self.propose(key, value, Policy::AddOrKeep)
    }

    /// Replaces the value under `key` only if the key is present.
    ///
    /// # Errors
    ///
    /// Returns [`SwapError`] if the owning shard stays contended past its
    /// retry budget. One inline attempt precedes the budgeted retries, so
    /// the reported count is the budget plus one.
    pub fn update(&self, key: K, value: V) -> Result<(), SwapError> {
        self.propose(key, value, Policy::Update)
    }

    /// Inserts `value` under `key`, or combines it with the existing value.
    ///
    /// `merge` may run more than once if the shard is contended, so it
    /// receives clones of `key` and `value` on every attempt.
    ///
    /// # Errors
    ///
    /// Returns [`SwapError`] if the owning shard stays contended past its
    /// retry budget. One inline attempt precedes the budgeted retries, so
    /// the reported count is the budget plus one.
    pub fn add_or_update_with<F>(&self, key: K, value: V, merge: F) -> Result<(), SwapError>
    where
        K: Clone,
        V: Clone,
        F: Fn(&K, &V, V) -> V,
    {
        let hash = self.hash_key(&key);
        commit(self.shard_of(hash), |map| {
            map.add_or_update_with(key.clone(), value.clone(), &merge)
        })
    }

    /// Removes `key`.
    ///
    /// # Errors
    ///
    /// Returns [`SwapError`] if the owning shard stays contended past its
    /// retry budget. One inline attempt precedes the budgeted retries, so
    /// the reported count is the budget plus one.
    pub fn remove<Q>(&self, key: &Q) -> Result<(), SwapError>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = self.hash_key(key);
        commit(self.shard_of(hash), |map| map.remove_with_hash(hash, key))
    }

    fn propose(&self, key: K, value: V, policy: Policy) -> Result<(), SwapError> {
        let hash = self.hash_key(&key);
        let proposal = Proposal::new(
            ReferenceCounter::new(ImHashMapEntry::new(hash, key, value)),
            policy,
        );
        commit(self.shard_of(hash), |map| map.resolve(hash, proposal.clone()))
    }

    /// Returns a clone of the value stored under `key`.
    #[must_use]
    pub fn try_find<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        let hash = self.hash_key(key);
        self.shard_of(hash)
            .with_value(|map| map.try_find_with_hash(hash, key).cloned())
    }

    /// Returns `true` if some shard contains `key`.
    #[must_use]
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = self.hash_key(key);
        self.shard_of(hash)
            .with_value(|map| map.find_entry_with_hash(hash, key).is_some())
    }

    /// Returns the current map of the shard at `index`.
    #[must_use]
    pub fn shard(&self, index: usize) -> Option<ImHashMap<K, V, S>> {
        self.shards.get(index).map(Ref::value)
    }

    /// Returns the current map of every shard, in shard order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ImHashMap<K, V, S>> {
        self.shards.iter().map(Ref::value).collect()
    }

    /// Folds the entries of all shards, shard by shard.
    pub fn fold<B, F>(&self, init: B, mut function: F) -> B
    where
        F: FnMut(B, &ImHashMapEntry<K, V>) -> B,
    {
        let maps = self.snapshot();
        let mut stack = ParentStack::new();
        let mut accumulator = init;
        for map in &maps {
            accumulator = map.fold_with_stack(accumulator, &mut stack, &mut function);
        }
        accumulator
    }

    /// Calls `visitor` for the entries of all shards, shard by shard.
    pub fn visit<F>(&self, mut visitor: F)
    where
        F: FnMut(&ImHashMapEntry<K, V>),
    {
        self.fold((), |(), entry| visitor(entry));
    }

    /// Counts the entries of all shards.
    #[must_use]
    pub fn count(&self) -> usize {
        self.fold(0, |count, _| count + 1)
    }

    /// Copies all keys and values into two parallel vectors.
    #[must_use]
    pub fn to_keys_and_values(&self) -> (Vec<K>, Vec<V>)
    where
        K: Clone,
        V: Clone,
    {
        self.fold((Vec::new(), Vec::new()), |(mut keys, mut values), entry| {
            keys.push(entry.key().clone());
            values.push(entry.value().clone());
            (keys, values)
        })
    }

    /// Folds every shard on the rayon thread pool and combines the results.
    ///
    /// `init` creates the starting accumulator of each shard; `reduce`
    /// combines two accumulators and must be associative.
    #[cfg(feature = "rayon")]
    pub fn par_fold<B, I, F, R>(&self, init: I, function: F, reduce: R) -> B
    where
        B: Send,
        I: Fn() -> B + Sync + Send,
        F: Fn(B, &ImHashMapEntry<K, V>) -> B + Sync + Send,
        R: Fn(B, B) -> B + Sync + Send,
    {
        use rayon::prelude::*;
        self.snapshot()
            .par_iter()
            .map(|map| map.fold(init(), &function))
            .reduce(&init, reduce)
    }
}

impl<K, V> Default for ImHashMapSlots<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S> fmt::Debug for ImHashMapSlots<K, V, S> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ImHashMapSlots")
            .field("shard_count", &self.shards.len())
            .finish_non_exhaustive()
    }
}

static_assertions::assert_impl_all!(ImMapSlots<String>: Send, Sync);
static_assertions::assert_impl_all!(ImHashMapSlots<String, Vec<u8>>: Send, Sync);

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1)]
    #[case(2)]
    #[case(5)]
    fn test_commit_reports_inline_attempt(#[case] retry_budget: usize) {
        let cell = Ref::with_retry_budget(0_i32, retry_budget);
        let mut calls = 0_usize;
        let result = commit(&cell, |value: &i32| {
            calls += 1;
            cell.exchange(*value + 100);
            *value + 1
        });
        assert_eq!(
            result,
            Err(SwapError::RetryBudgetExceeded {
                attempts: retry_budget + 1
            })
        );
        assert_eq!(calls, retry_budget + 1);
    }

    #[rstest]
    #[case(-1, 31)]
    #[case(0, 0)]
    #[case(33, 1)]
    #[case(i32::MIN, 0)]
    fn test_int_shard_index_masks_low_bits(#[case] key: i32, #[case] expected: usize) {
        let slots: ImMapSlots<()> = ImMapSlots::new();
        assert_eq!(slots.shard_count(), DEFAULT_SHARD_COUNT);
        assert_eq!(slots.shard_index(key), expected);
    }

    #[rstest]
    #[case(0)]
    #[case(3)]
    #[case(12)]
    #[should_panic(expected = "power of two")]
    fn test_invalid_shard_count_panics(#[case] shard_count: usize) {
        let _ = ImMapSlots::<i32>::with_shard_count(shard_count);
    }

    #[rstest]
    fn test_int_slots_writes_land_in_owning_shard() {
        let slots = ImMapSlots::with_shard_count(4);
        for key in 0..20 {
            slots.add_or_update(key, key * 10).unwrap();
        }
        for index in 0..4 {
            let shard = slots.shard(index).unwrap();
            assert_eq!(shard.count(), 5);
            assert!(shard.keys().all(|key| slots.shard_index(key) == index));
        }
        assert_eq!(slots.shard(4).map(|map| map.count()), None);
        assert_eq!(slots.count(), 20);
        assert_eq!(slots.try_find(7), Some(70));
    }

    #[rstest]
    fn test_int_slots_policies_and_remove() {
        let slots = ImMapSlots::new();
        slots.add_or_update(1, "one").unwrap();
        slots.add_or_keep(1, "uno").unwrap();
        slots.update(2, "two").unwrap();
        assert_eq!(slots.try_find(1), Some("one"));
        assert!(!slots.contains_key(2));

        slots.update(1, "eins").unwrap();
        assert_eq!(slots.try_find(1), Some("eins"));

        slots.remove(1).unwrap();
        assert_eq!(slots.try_find(1), None);
        assert_eq!(slots.count(), 0);
    }

    #[rstest]
    fn test_int_slots_traversal() {
        let slots = ImMapSlots::with_shard_count(8);
        for key in -10..10 {
            slots.add_or_update(key, i64::from(key)).unwrap();
        }
        assert_eq!(slots.fold(0, |sum, entry| sum + entry.value()), -10);

        let mut visited = Vec::new();
        slots.visit(|entry| visited.push(entry.key()));
        visited.sort_unstable();
        assert_eq!(visited, (-10..10).collect::<Vec<_>>());

        let (keys, values) = slots.to_keys_and_values();
        assert_eq!(keys.len(), 20);
        assert!(keys.iter().zip(&values).all(|(key, value)| i64::from(*key) == *value));
        assert_eq!(slots.snapshot().len(), 8);
    }

    #[rstest]
    fn test_hash_slots_operations() {
        let slots = ImHashMapSlots::with_shard_count(4);
        slots.add_or_update(String::from("a"), 1).unwrap();
        slots.add_or_update(String::from("b"), 2).unwrap();
        slots.add_or_keep(String::from("a"), 100).unwrap();
        slots
            .add_or_update_with(String::from("b"), 40, |_, old, new| old + new)
            .unwrap();
        slots.update(String::from("c"), 3).unwrap();

        assert_eq!(slots.try_find("a"), Some(1));
        assert_eq!(slots.try_find("b"), Some(42));
        assert!(!slots.contains_key("c"));
        assert_eq!(slots.count(), 2);

        slots.remove("a").unwrap();
        assert_eq!(slots.try_find("a"), None);
        assert_eq!(slots.fold(0, |sum, entry| sum + entry.value()), 42);
    }

    #[rstest]
    fn test_hash_slots_shards_agree_with_hash() {
        let slots = ImHashMapSlots::new();
        for key in 0..200_u32 {
            slots.add_or_update(key, key).unwrap();
        }
        for (index, shard) in slots.snapshot().iter().enumerate() {
            assert!(shard
                .iter()
                .all(|entry| slots.shard_index(entry.hash()) == index));
        }
        let (mut keys, _) = slots.to_keys_and_values();
        keys.sort_unstable();
        assert_eq!(keys, (0..200).collect::<Vec<_>>());
    }

    #[cfg(feature = "rayon")]
    #[rstest]
    fn test_par_fold_matches_fold() {
        let slots = ImMapSlots::new();
        for key in 0..1000 {
            slots.add_or_update(key, u64::from(key.cast_unsigned())).unwrap();
        }
        let total = slots.par_fold(|| 0, |sum, entry| sum + entry.value(), |left, right| left + right);
        assert_eq!(total, slots.fold(0, |sum, entry| sum + entry.value()));
    }
}
