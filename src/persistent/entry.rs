//! Entries stored in the persistent maps and the upsert policies applied to them.
//!
//! Entries are shared between map versions behind a reference counter, so
//! path copying and rebalancing only copy node pointers. An entry is never
//! mutated after it is created: replacing a value always allocates a new
//! entry.

use std::fmt;

use super::ReferenceCounter;

// =============================================================================
// Entry Definitions
// =============================================================================

/// A key-value entry of an [`ImMap`](super::ImMap).
///
/// The key doubles as the hash, so there is no separate hash field.
///
/// # Examples
///
/// ```rust
/// use immap::persistent::{ImMap, ImMapEntry};
///
/// let map = ImMap::new().add_or_update(7, "seven");
/// let entry: &ImMapEntry<&str> = map.find_entry(7).unwrap();
/// assert_eq!(entry.key(), 7);
/// assert_eq!(entry.value(), &"seven");
/// ```
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ImMapEntry<V> {
    key: i32,
    value: V,
}

impl<V> ImMapEntry<V> {
    /// Creates a new entry.
    #[inline]
    #[must_use]
    pub const fn new(key: i32, value: V) -> Self {
        Self { key, value }
    }

    /// Returns the key of the entry.
    #[inline]
    #[must_use]
    pub const fn key(&self) -> i32 {
        self.key
    }

    /// Returns a reference to the value of the entry.
    #[inline]
    #[must_use]
    pub const fn value(&self) -> &V {
        &self.value
    }

    /// Consumes the entry and returns its value.
    #[inline]
    pub fn into_value(self) -> V {
        self.value
    }
}

impl<V: fmt::Debug> fmt::Debug for ImMapEntry<V> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}: {:?}", self.key, self.value)
    }
}

/// A hashed key-value entry of an [`ImHashMap`](super::ImHashMap).
///
/// The hash is computed once, when the entry is created, and is never
/// recomputed from the key afterwards.
///
/// # Examples
///
/// ```rust
/// use immap::persistent::{ImHashMap, ImHashMapEntry};
///
/// let map: ImHashMap<&str, i32> = ImHashMap::new();
/// let entry = ImHashMapEntry::new(map.hash_key("answer"), "answer", 42);
/// let map = map.add_or_update_entry(entry);
/// assert_eq!(map.try_find("answer"), Some(&42));
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct ImHashMapEntry<K, V> {
    hash: u64,
    key: K,
    value: V,
}

impl<K, V> ImHashMapEntry<K, V> {
    /// Creates a new entry with a precomputed hash.
    ///
    /// The hash must be the one the target map computes for `key`
    /// (see [`ImHashMap::hash_key`](super::ImHashMap::hash_key)), otherwise
    /// lookups by key will not find the entry.
    #[inline]
    #[must_use]
    pub const fn new(hash: u64, key: K, value: V) -> Self {
        Self { hash, key, value }
    }

    /// Returns the stored hash of the key.
    #[inline]
    #[must_use]
    pub const fn hash(&self) -> u64 {
        self.hash
    }

    /// Returns a reference to the key.
    #[inline]
    #[must_use]
    pub const fn key(&self) -> &K {
        &self.key
    }

    /// Returns a reference to the value.
    #[inline]
    #[must_use]
    pub const fn value(&self) -> &V {
        &self.value
    }

    /// Consumes the entry and returns the key and the value.
    #[inline]
    pub fn into_key_value(self) -> (K, V) {
        (self.key, self.value)
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for ImHashMapEntry<K, V> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{:?}: {:?}", self.key, self.value)
    }
}

// =============================================================================
// Keyed Entries
// =============================================================================

/// Access to the key an entry is matched by.
pub(crate) trait KeyedEntry {
    type Key;

    fn entry_key(&self) -> &Self::Key;
}

impl<V> KeyedEntry for ImMapEntry<V> {
    type Key = i32;

    #[inline]
    fn entry_key(&self) -> &i32 {
        &self.key
    }
}

impl<K, V> KeyedEntry for ImHashMapEntry<K, V> {
    type Key = K;

    #[inline]
    fn entry_key(&self) -> &K {
        &self.key
    }
}

// =============================================================================
// Upsert Resolution
// =============================================================================

/// Decides the outcome of an upsert once the target position is found.
///
/// The resolver travels down the single search path by value and is consumed
/// exactly once, either by `absent` or by `present`. Returning `None` from
/// either means "leave the map as it is", which lets the caller hand back the
/// original root unchanged.
pub(crate) trait Resolve<E: KeyedEntry> {
    /// The key being searched for.
    fn key(&self) -> &E::Key;

    /// Called when no entry with the key exists.
    fn absent(self) -> Option<ReferenceCounter<E>>;

    /// Called with the entry currently stored under the key.
    fn present(self, existing: &ReferenceCounter<E>) -> Option<ReferenceCounter<E>>;
}

/// How a [`Proposal`] treats absent and present keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Policy {
    /// Insert when absent, replace when present.
    AddOrUpdate,
    /// Insert when absent, keep the existing entry when present.
    AddOrKeep,
    /// Leave absent keys alone, replace when present.
    Update,
}

/// A prebuilt shared entry together with the policy to apply.
///
/// Cloning a proposal only bumps the reference count of the entry, so the
/// same proposal can be replayed cheaply by a retrying CAS loop.
pub(crate) struct Proposal<E> {
    entry: ReferenceCounter<E>,
    policy: Policy,
}

impl<E> Proposal<E> {
    #[inline]
    pub(crate) const fn new(entry: ReferenceCounter<E>, policy: Policy) -> Self {
        Self { entry, policy }
    }
}

impl<E> Clone for Proposal<E> {
    fn clone(&self) -> Self {
        Self {
            entry: self.entry.clone(),
            policy: self.policy,
        }
    }
}

impl<E: KeyedEntry> Resolve<E> for Proposal<E> {
    #[inline]
    fn key(&self) -> &E::Key {
        self.entry.entry_key()
    }

    fn absent(self) -> Option<ReferenceCounter<E>> {
        match self.policy {
            Policy::AddOrUpdate | Policy::AddOrKeep => Some(self.entry),
            Policy::Update => None,
        }
    }

    fn present(self, existing: &ReferenceCounter<E>) -> Option<ReferenceCounter<E>> {
        match self.policy {
            Policy::AddOrKeep => None,
            // Re-adding the very entry that is already stored is a no-op.
            Policy::AddOrUpdate | Policy::Update
                if ReferenceCounter::ptr_eq(existing, &self.entry) =>
            {
                None
            }
            Policy::AddOrUpdate | Policy::Update => Some(self.entry),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn proposal(key: i32, value: &'static str, policy: Policy) -> Proposal<ImMapEntry<&'static str>> {
        Proposal::new(ReferenceCounter::new(ImMapEntry::new(key, value)), policy)
    }

    #[rstest]
    #[case(Policy::AddOrUpdate, true)]
    #[case(Policy::AddOrKeep, true)]
    #[case(Policy::Update, false)]
    fn test_absent_inserts_unless_update_only(#[case] policy: Policy, #[case] inserts: bool) {
        let resolved = proposal(1, "one", policy).absent();
        assert_eq!(resolved.is_some(), inserts);
    }

    #[rstest]
    #[case(Policy::AddOrUpdate, true)]
    #[case(Policy::AddOrKeep, false)]
    #[case(Policy::Update, true)]
    fn test_present_replaces_unless_keep(#[case] policy: Policy, #[case] replaces: bool) {
        let existing = ReferenceCounter::new(ImMapEntry::new(1, "old"));
        let resolved = proposal(1, "new", policy).present(&existing);
        assert_eq!(resolved.is_some(), replaces);
    }

    #[rstest]
    fn test_present_with_same_entry_is_noop() {
        let existing = ReferenceCounter::new(ImMapEntry::new(1, "one"));
        let same = Proposal::new(existing.clone(), Policy::AddOrUpdate);
        assert!(same.present(&existing).is_none());
    }

    #[rstest]
    fn test_hash_entry_accessors() {
        let entry = ImHashMapEntry::new(99, "key", 5);
        assert_eq!(entry.hash(), 99);
        assert_eq!(entry.key(), &"key");
        assert_eq!(entry.value(), &5);
        assert_eq!(entry.into_key_value(), ("key", 5));
    }

    #[rstest]
    fn test_debug_format() {
        assert_eq!(format!("{:?}", ImMapEntry::new(3, "c")), "3: \"c\"");
        assert_eq!(format!("{:?}", ImHashMapEntry::new(0, 'k', 1)), "'k': 1");
    }
}
