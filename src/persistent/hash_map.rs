//! Persistent (immutable) hash map based on an AVL tree keyed by hash.
//!
//! This module provides [`ImHashMap`], an immutable map for arbitrary
//! `Hash + Eq` keys. Entries are ordered in the tree by the hash of their
//! key; keys whose hashes collide share one tree position in a conflict
//! bucket.
//!
//! # Overview
//!
//! - O(log N + c) `try_find`, where c is the size of the local conflict bucket
//! - O(log N + c) `add_or_update` / `add_or_keep` / `update`
//! - O(log N + c) `remove`
//! - O(N) traversal in hash order without recursion
//!
//! All operations return new maps without modifying the original. An
//! operation that does not change the content returns the original root,
//! observable through [`ImHashMap::ptr_eq`].
//!
//! # Examples
//!
//! ```rust
//! use immap::persistent::ImHashMap;
//!
//! let map = ImHashMap::new()
//!     .add_or_update("one".to_string(), 1)
//!     .add_or_update("two".to_string(), 2)
//!     .add_or_update("three".to_string(), 3);
//!
//! assert_eq!(map.try_find("one"), Some(&1));
//! assert_eq!(map.try_find("four"), None);
//!
//! let removed = map.remove("two");
//! assert_eq!(removed.count(), 2);
//! assert_eq!(map.count(), 3); // Original unchanged
//! ```
//!
//! # Internal Structure
//!
//! Every non-empty node carries a hash, a slot, two subtrees (either may be
//! empty) and a cached height. The slot is either a single entry or a
//! bucket of two or more entries whose keys share the node's hash.

use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::iter::{FromIterator, FusedIterator};

use super::ReferenceCounter;
use super::entry::{ImHashMapEntry, Policy, Proposal, Resolve};
use super::hashing::DefaultHashBuilder;
use super::stack::ParentStack;

type EntryRef<K, V> = ReferenceCounter<ImHashMapEntry<K, V>>;

// =============================================================================
// Node Definition
// =============================================================================

enum Node<K, V> {
    Empty,
    Tree(ReferenceCounter<HashTree<K, V>>),
}

/// Non-empty node of an [`ImHashMap`].
pub struct HashTree<K, V> {
    hash: u64,
    slot: Slot<K, V>,
    left: Node<K, V>,
    right: Node<K, V>,
    height: u32,
}

/// The entries stored at one hash.
enum Slot<K, V> {
    Entry(EntryRef<K, V>),
    /// Two or more entries with distinct keys and the same hash, unordered.
    Conflicts(ReferenceCounter<[EntryRef<K, V>]>),
}

/// Outcome of removing a key from a slot.
enum SlotRemoval<K, V> {
    Absent,
    Emptied,
    Shrunk(Slot<K, V>),
}

impl<K, V> Clone for Node<K, V> {
    fn clone(&self) -> Self {
        match self {
            Self::Empty => Self::Empty,
            Self::Tree(tree) => Self::Tree(tree.clone()),
        }
    }
}

impl<K, V> Clone for Slot<K, V> {
    fn clone(&self) -> Self {
        match self {
            Self::Entry(entry) => Self::Entry(entry.clone()),
            Self::Conflicts(bucket) => Self::Conflicts(bucket.clone()),
        }
    }
}

impl<K, V> Slot<K, V> {
    fn find<Q>(&self, key: &Q) -> Option<&EntryRef<K, V>>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        match self {
            Self::Entry(entry) => key.eq(entry.key().borrow()).then_some(entry),
            Self::Conflicts(bucket) => bucket.iter().find(|entry| key.eq(entry.key().borrow())),
        }
    }

    /// Returns `None` when the resolver leaves the slot unchanged.
    fn upsert<R>(&self, resolver: R) -> Option<Self>
    where
        K: Eq,
        R: Resolve<ImHashMapEntry<K, V>>,
    {
        match self {
            Self::Entry(existing) => {
                if existing.key() == resolver.key() {
                    resolver.present(existing).map(Self::Entry)
                } else {
                    let added = resolver.absent()?;
                    Some(Self::Conflicts(ReferenceCounter::from(vec![
                        existing.clone(),
                        added,
                    ])))
                }
            }
            Self::Conflicts(bucket) => {
                let position = bucket
                    .iter()
                    .position(|entry| entry.key() == resolver.key());
                let mut copy = match position {
                    Some(index) => {
                        let replaced = resolver.present(&bucket[index])?;
                        let mut copy = bucket.to_vec();
                        copy[index] = replaced;
                        copy
                    }
                    None => {
                        let added = resolver.absent()?;
                        let mut copy = Vec::with_capacity(bucket.len() + 1);
                        copy.extend(bucket.iter().cloned());
                        copy.push(added);
                        copy
                    }
                };
                copy.shrink_to_fit();
                Some(Self::Conflicts(ReferenceCounter::from(copy)))
            }
        }
    }

    fn remove<Q>(&self, key: &Q) -> SlotRemoval<K, V>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        match self {
            Self::Entry(entry) if key.eq(entry.key().borrow()) => SlotRemoval::Emptied,
            Self::Entry(_) => SlotRemoval::Absent,
            Self::Conflicts(bucket) => {
                let Some(index) = bucket.iter().position(|entry| key.eq(entry.key().borrow()))
                else {
                    return SlotRemoval::Absent;
                };
                let mut rest: Vec<EntryRef<K, V>> = bucket
                    .iter()
                    .enumerate()
                    .filter(|&(position, _)| position != index)
                    .map(|(_, entry)| entry.clone())
                    .collect();
                if rest.len() == 1 {
                    if let Some(single) = rest.pop() {
                        return SlotRemoval::Shrunk(Self::Entry(single));
                    }
                }
                SlotRemoval::Shrunk(Self::Conflicts(ReferenceCounter::from(rest)))
            }
        }
    }
}

impl<K, V> Node<K, V> {
    fn height(&self) -> u32 {
        match self {
            Self::Empty => 0,
            Self::Tree(tree) => tree.height,
        }
    }

    fn ptr_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Empty, Self::Empty) => true,
            (Self::Tree(this), Self::Tree(that)) => ReferenceCounter::ptr_eq(this, that),
            _ => false,
        }
    }

    fn tree(hash: u64, slot: Slot<K, V>, left: Self, right: Self) -> Self {
        let height = 1 + left.height().max(right.height());
        Self::Tree(ReferenceCounter::new(HashTree {
            hash,
            slot,
            left,
            right,
            height,
        }))
    }

    /// Builds a node whose subtrees differ in height by at most two,
    /// rotating when they differ by exactly two.
    fn balance(hash: u64, slot: Slot<K, V>, left: Self, right: Self) -> Self {
        let left_height = left.height();
        let right_height = right.height();
        if left_height > right_height + 1 {
            Self::balance_new_left(hash, slot, &left, right)
        } else if right_height > left_height + 1 {
            Self::balance_new_right(hash, slot, left, &right)
        } else {
            Self::tree(hash, slot, left, right)
        }
    }

    /// Rotates right around a left subtree that is two levels taller.
    fn balance_new_left(hash: u64, slot: Slot<K, V>, left: &Self, right: Self) -> Self {
        let Self::Tree(left) = left else {
            unreachable!("a taller subtree is never empty");
        };
        if left.right.height() > left.left.height() {
            let Self::Tree(pivot) = &left.right else {
                unreachable!("a taller subtree is never empty");
            };
            Self::tree(
                pivot.hash,
                pivot.slot.clone(),
                Self::tree(left.hash, left.slot.clone(), left.left.clone(), pivot.left.clone()),
                Self::tree(hash, slot, pivot.right.clone(), right),
            )
        } else {
            Self::tree(
                left.hash,
                left.slot.clone(),
                left.left.clone(),
                Self::tree(hash, slot, left.right.clone(), right),
            )
        }
    }

    /// Rotates left around a right subtree that is two levels taller.
    fn balance_new_right(hash: u64, slot: Slot<K, V>, left: Self, right: &Self) -> Self {
        let Self::Tree(right) = right else {
            unreachable!("a taller subtree is never empty");
        };
        if right.left.height() > right.right.height() {
            let Self::Tree(pivot) = &right.left else {
                unreachable!("a taller subtree is never empty");
            };
            Self::tree(
                pivot.hash,
                pivot.slot.clone(),
                Self::tree(hash, slot, left, pivot.left.clone()),
                Self::tree(right.hash, right.slot.clone(), pivot.right.clone(), right.right.clone()),
            )
        } else {
            Self::tree(
                right.hash,
                right.slot.clone(),
                Self::tree(hash, slot, left, right.left.clone()),
                right.right.clone(),
            )
        }
    }

    fn find<Q>(&self, hash: u64, key: &Q) -> Option<&EntryRef<K, V>>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        let mut node = self;
        while let Self::Tree(tree) = node {
            match hash.cmp(&tree.hash) {
                Ordering::Less => node = &tree.left,
                Ordering::Greater => node = &tree.right,
                Ordering::Equal => return tree.slot.find(key),
            }
        }
        None
    }

    /// Returns `None` when the resolver leaves the tree unchanged.
    fn upsert<R>(&self, hash: u64, resolver: R) -> Option<Self>
    where
        K: Eq,
        R: Resolve<ImHashMapEntry<K, V>>,
    {
        let Self::Tree(tree) = self else {
            return resolver
                .absent()
                .map(|added| Self::tree(hash, Slot::Entry(added), Self::Empty, Self::Empty));
        };
        match hash.cmp(&tree.hash) {
            Ordering::Equal => tree.slot.upsert(resolver).map(|slot| {
                Self::Tree(ReferenceCounter::new(HashTree {
                    hash,
                    slot,
                    left: tree.left.clone(),
                    right: tree.right.clone(),
                    height: tree.height,
                }))
            }),
            Ordering::Less => {
                let left = tree.left.upsert(hash, resolver)?;
                Some(Self::balance(tree.hash, tree.slot.clone(), left, tree.right.clone()))
            }
            Ordering::Greater => {
                let right = tree.right.upsert(hash, resolver)?;
                Some(Self::balance(tree.hash, tree.slot.clone(), tree.left.clone(), right))
            }
        }
    }

    /// Returns `None` when `key` is absent.
    fn remove<Q>(&self, hash: u64, key: &Q) -> Option<Self>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        let Self::Tree(tree) = self else {
            return None;
        };
        match hash.cmp(&tree.hash) {
            Ordering::Less => {
                let left = tree.left.remove(hash, key)?;
                Some(Self::balance(tree.hash, tree.slot.clone(), left, tree.right.clone()))
            }
            Ordering::Greater => {
                let right = tree.right.remove(hash, key)?;
                Some(Self::balance(tree.hash, tree.slot.clone(), tree.left.clone(), right))
            }
            Ordering::Equal => match tree.slot.remove(key) {
                SlotRemoval::Absent => None,
                SlotRemoval::Shrunk(slot) => Some(Self::Tree(ReferenceCounter::new(HashTree {
                    hash,
                    slot,
                    left: tree.left.clone(),
                    right: tree.right.clone(),
                    height: tree.height,
                }))),
                SlotRemoval::Emptied => Some(Self::unlink(tree)),
            },
        }
    }

    /// Replaces `tree` by the join of its subtrees.
    ///
    /// With two children, the leftmost node of the right subtree takes the
    /// place of `tree` and is then deleted from the right subtree.
    fn unlink(tree: &HashTree<K, V>) -> Self {
        match (&tree.left, &tree.right) {
            (Self::Empty, right) => right.clone(),
            (left, Self::Empty) => left.clone(),
            (left, right) => {
                let successor = right.leftmost();
                let rest = right.remove_hash(successor.hash);
                Self::balance(successor.hash, successor.slot.clone(), left.clone(), rest)
            }
        }
    }

    fn leftmost(&self) -> &HashTree<K, V> {
        let Self::Tree(root) = self else {
            unreachable!("an empty subtree has no leftmost node");
        };
        let mut tree: &HashTree<K, V> = root;
        while let Self::Tree(left) = &tree.left {
            tree = left;
        }
        tree
    }

    /// Removes the whole node stored at `hash`, which must be present.
    fn remove_hash(&self, hash: u64) -> Self {
        let Self::Tree(tree) = self else {
            return Self::Empty;
        };
        match hash.cmp(&tree.hash) {
            Ordering::Less => Self::balance(
                tree.hash,
                tree.slot.clone(),
                tree.left.remove_hash(hash),
                tree.right.clone(),
            ),
            Ordering::Greater => Self::balance(
                tree.hash,
                tree.slot.clone(),
                tree.left.clone(),
                tree.right.remove_hash(hash),
            ),
            Ordering::Equal => Self::unlink(tree),
        }
    }
}

// =============================================================================
// Resolvers
// =============================================================================

/// Combines the stored value with the new one when the key is present.
struct Merge<K, V, F> {
    hash: u64,
    key: K,
    value: V,
    merge: F,
}

impl<K, V, F> Resolve<ImHashMapEntry<K, V>> for Merge<K, V, F>
where
    F: FnOnce(&K, &V, V) -> V,
{
    fn key(&self) -> &K {
        &self.key
    }

    fn absent(self) -> Option<EntryRef<K, V>> {
        Some(ReferenceCounter::new(ImHashMapEntry::new(
            self.hash, self.key, self.value,
        )))
    }

    fn present(self, existing: &EntryRef<K, V>) -> Option<EntryRef<K, V>> {
        let value = (self.merge)(&self.key, existing.value(), self.value);
        Some(ReferenceCounter::new(ImHashMapEntry::new(
            self.hash, self.key, value,
        )))
    }
}

/// Resets a present value to `V::default()`.
struct ToDefault<K> {
    hash: u64,
    key: K,
}

impl<K, V: Default> Resolve<ImHashMapEntry<K, V>> for ToDefault<K> {
    fn key(&self) -> &K {
        &self.key
    }

    fn absent(self) -> Option<EntryRef<K, V>> {
        None
    }

    fn present(self, _existing: &EntryRef<K, V>) -> Option<EntryRef<K, V>> {
        Some(ReferenceCounter::new(ImHashMapEntry::new(
            self.hash,
            self.key,
            V::default(),
        )))
    }
}

// =============================================================================
// ImHashMap Definition
// =============================================================================

/// A persistent (immutable) hash map based on an AVL tree ordered by hash.
///
/// Keys are hashed once with the map's `BuildHasher`; the hash is stored in
/// the entry and drives all navigation. Keys with equal hashes are told
/// apart with `Eq` inside a conflict bucket.
///
/// Every hashing operation has a `*_with_hash` twin that takes a
/// precomputed hash instead. Callers using those must hash consistently;
/// mixing hashes from different sources makes keys unreachable.
///
/// # Time Complexity
///
/// | Operation       | Complexity   |
/// |-----------------|--------------|
/// | `new`           | O(1)         |
/// | `try_find`      | O(log N + c) |
/// | `add_or_update` | O(log N + c) |
/// | `remove`        | O(log N + c) |
/// | `iter`/`fold`   | O(N)         |
/// | `count`         | O(N)         |
/// | `is_empty`      | O(1)         |
///
/// where c is the number of keys sharing the searched hash.
///
/// # Examples
///
/// ```rust
/// use immap::persistent::ImHashMap;
///
/// let map = ImHashMap::new().add_or_update("answer", 42);
/// assert_eq!(map.try_find("answer"), Some(&42));
///
/// // Keeping an existing key returns the very same root
/// assert!(map.add_or_keep("answer", 0).ptr_eq(&map));
/// ```
pub struct ImHashMap<K, V, S = DefaultHashBuilder> {
    root: Node<K, V>,
    hasher: S,
}

impl<K, V, S: Clone> Clone for ImHashMap<K, V, S> {
    fn clone(&self) -> Self {
        Self {
            root: self.root.clone(),
            hasher: self.hasher.clone(),
        }
    }
}

impl<K, V> ImHashMap<K, V> {
    /// Creates a new empty map with the default hasher.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use immap::persistent::ImHashMap;
    ///
    /// let map: ImHashMap<String, i32> = ImHashMap::new();
    /// assert!(map.is_empty());
    /// ```
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::with_hasher(DefaultHashBuilder::default())
    }
}

impl<K, V, S> ImHashMap<K, V, S> {
    /// Creates a new empty map that hashes keys with `hasher`.
    ///
    /// The hasher must be deterministic for the lifetime of the map and all
    /// of its versions.
    #[inline]
    #[must_use]
    pub const fn with_hasher(hasher: S) -> Self {
        Self {
            root: Node::Empty,
            hasher,
        }
    }

    /// Returns the hasher of the map.
    #[inline]
    pub const fn hasher(&self) -> &S {
        &self.hasher
    }

    /// Returns `true` if the map contains no entries.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        matches!(self.root, Node::Empty)
    }

    /// Returns the height of the underlying tree.
    #[inline]
    #[must_use]
    pub fn height(&self) -> u32 {
        self.root.height()
    }

    /// Returns `true` if both maps share the same root.
    #[inline]
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.root.ptr_eq(&other.root)
    }

    /// Counts the entries by walking the tree.
    #[must_use]
    pub fn count(&self) -> usize {
        self.iter().count()
    }

    /// Returns the value stored under `key`, using a precomputed `hash`.
    #[must_use]
    pub fn try_find_with_hash<Q>(&self, hash: u64, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        self.find_entry_with_hash(hash, key).map(ImHashMapEntry::value)
    }

    /// Returns `true` if the map contains `key`, using a precomputed `hash`.
    #[must_use]
    pub fn contains_key_with_hash<Q>(&self, hash: u64, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        self.find_entry_with_hash(hash, key).is_some()
    }

    /// Returns the entry stored under `key`, using a precomputed `hash`.
    #[must_use]
    pub fn find_entry_with_hash<Q>(&self, hash: u64, key: &Q) -> Option<&ImHashMapEntry<K, V>>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        self.root.find(hash, key).map(|entry| &**entry)
    }

    /// Returns the first entry in traversal order that satisfies `predicate`.
    pub fn find_first<P>(&self, mut predicate: P) -> Option<&ImHashMapEntry<K, V>>
    where
        P: FnMut(&ImHashMapEntry<K, V>) -> bool,
    {
        self.iter().find(|entry| predicate(entry))
    }

    /// Removes `key` using a precomputed `hash`.
    #[must_use]
    pub fn remove_with_hash<Q>(&self, hash: u64, key: &Q) -> Self
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
        S: Clone,
    {
        self.root
            .remove(hash, key)
            .map_or_else(|| self.clone(), |root| self.with_root(root))
    }

    fn with_root(&self, root: Node<K, V>) -> Self
    where
        S: Clone,
    {
        Self {
            root,
            hasher: self.hasher.clone(),
        }
    }

    pub(crate) fn resolve<R>(&self, hash: u64, resolver: R) -> Self
    where
        K: Eq,
        S: Clone,
        R: Resolve<ImHashMapEntry<K, V>>,
    {
        self.root
            .upsert(hash, resolver)
            .map_or_else(|| self.clone(), |root| self.with_root(root))
    }

    /// Returns an iterator over the entries in hash order.
    ///
    /// Entries of one conflict bucket are yielded together, in bucket order.
    #[must_use]
    pub fn iter(&self) -> ImHashMapIterator<'_, K, V> {
        ImHashMapIterator {
            walker: Walker::new(&self.root),
            parents: ParentStack::new(),
        }
    }

    /// Returns an iterator over the keys in hash order.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.iter().map(ImHashMapEntry::key)
    }

    /// Returns an iterator over the values in hash order.
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.iter().map(ImHashMapEntry::value)
    }

    /// Folds the entries in hash order.
    pub fn fold<B, F>(&self, init: B, function: F) -> B
    where
        F: FnMut(B, &ImHashMapEntry<K, V>) -> B,
    {
        self.fold_with_stack(init, &mut ParentStack::new(), function)
    }

    /// Folds the entries in hash order using `stack` for the traversal.
    pub fn fold_with_stack<'a, B, F>(
        &'a self,
        init: B,
        stack: &mut ParentStack<'a, HashTree<K, V>>,
        mut function: F,
    ) -> B
    where
        F: FnMut(B, &'a ImHashMapEntry<K, V>) -> B,
    {
        stack.clear();
        let mut walker = Walker::new(&self.root);
        let mut accumulator = init;
        while let Some(entry) = walker.step(stack) {
            accumulator = function(accumulator, entry);
        }
        accumulator
    }

    /// Calls `visitor` for every entry in hash order.
    pub fn visit<F>(&self, visitor: F)
    where
        F: FnMut(&ImHashMapEntry<K, V>),
    {
        self.visit_with_stack(&mut ParentStack::new(), visitor);
    }

    /// Calls `visitor` for every entry in hash order using `stack` for the
    /// traversal.
    pub fn visit_with_stack<'a, F>(
        &'a self,
        stack: &mut ParentStack<'a, HashTree<K, V>>,
        mut visitor: F,
    ) where
        F: FnMut(&'a ImHashMapEntry<K, V>),
    {
        self.fold_with_stack((), stack, |(), entry| visitor(entry));
    }

    /// Copies the keys and the values into two parallel vectors.
    ///
    /// `keys[i]` and `values[i]` belong to the same entry. This avoids
    /// building a pair per entry for bulk consumers.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use immap::persistent::ImHashMap;
    ///
    /// let map: ImHashMap<&str, i32> = [("a", 1), ("b", 2)].into_iter().collect();
    /// let (keys, values) = map.to_keys_and_values();
    ///
    /// assert_eq!(keys.len(), 2);
    /// for (key, value) in keys.iter().zip(&values) {
    ///     assert_eq!(map.try_find(key), Some(value));
    /// }
    /// ```
    #[must_use]
    pub fn to_keys_and_values(&self) -> (Vec<K>, Vec<V>)
    where
        K: Clone,
        V: Clone,
    {
        let mut keys = Vec::new();
        let mut values = Vec::new();
        self.visit(|entry| {
            keys.push(entry.key().clone());
            values.push(entry.value().clone());
        });
        (keys, values)
    }
}

impl<K, V, S> ImHashMap<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher + Clone,
{
    /// Hashes `key` the way this map does.
    #[inline]
    pub fn hash_key<Q>(&self, key: &Q) -> u64
    where
        Q: Hash + ?Sized,
    {
        self.hasher.hash_one(key)
    }

    /// Returns a reference to the value stored under `key`.
    ///
    /// The key may be any borrowed form of the map's key type, but `Hash`
    /// and `Eq` on the borrowed form must match those of the key type.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use immap::persistent::ImHashMap;
    ///
    /// let map = ImHashMap::new().add_or_update("hello".to_string(), 42);
    ///
    /// // Can use &str to look up String keys
    /// assert_eq!(map.try_find("hello"), Some(&42));
    /// assert_eq!(map.try_find("world"), None);
    /// ```
    #[must_use]
    pub fn try_find<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.try_find_with_hash(self.hash_key(key), key)
    }

    /// Returns the entry stored under `key`.
    #[must_use]
    pub fn find_entry<Q>(&self, key: &Q) -> Option<&ImHashMapEntry<K, V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.find_entry_with_hash(self.hash_key(key), key)
    }

    /// Returns `true` if the map contains `key`.
    #[must_use]
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.contains_key_with_hash(self.hash_key(key), key)
    }

    /// Returns a clone of the value under `key`, or `V::default()` on a miss.
    #[must_use]
    pub fn get_value_or_default<Q>(&self, key: &Q) -> V
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone + Default,
    {
        self.try_find(key).cloned().unwrap_or_default()
    }

    /// Inserts `value` under `key`, replacing any existing value.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use immap::persistent::ImHashMap;
    ///
    /// let first = ImHashMap::new().add_or_update("key", 1);
    /// let second = first.add_or_update("key", 2);
    ///
    /// assert_eq!(first.try_find("key"), Some(&1)); // Original unchanged
    /// assert_eq!(second.try_find("key"), Some(&2));
    /// ```
    #[must_use]
    pub fn add_or_update(&self, key: K, value: V) -> Self {
        let hash = self.hash_key(&key);
        self.add_or_update_with_hash(hash, key, value)
    }

    /// Inserts `value` under `key` with a precomputed `hash`.
    #[must_use]
    pub fn add_or_update_with_hash(&self, hash: u64, key: K, value: V) -> Self {
        self.add_or_update_entry(ImHashMapEntry::new(hash, key, value))
    }

    /// Inserts `entry`, replacing any entry with the same key.
    #[must_use]
    pub fn add_or_update_entry(&self, entry: ImHashMapEntry<K, V>) -> Self {
        let hash = entry.hash();
        self.resolve(
            hash,
            Proposal::new(ReferenceCounter::new(entry), Policy::AddOrUpdate),
        )
    }

    /// Inserts `value` under `key`, or combines it with the existing value.
    ///
    /// When `key` is present the stored value becomes
    /// `merge(&key, &old_value, value)`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use immap::persistent::ImHashMap;
    ///
    /// let append = |_key: &&str, old: &Vec<i32>, new: Vec<i32>| [old.as_slice(), new.as_slice()].concat();
    /// let map = ImHashMap::new()
    ///     .add_or_update_with("list", vec![1], append)
    ///     .add_or_update_with("list", vec![2, 3], append);
    /// assert_eq!(map.try_find("list"), Some(&vec![1, 2, 3]));
    /// ```
    #[must_use]
    pub fn add_or_update_with<F>(&self, key: K, value: V, merge: F) -> Self
    where
        F: FnOnce(&K, &V, V) -> V,
    {
        let hash = self.hash_key(&key);
        self.add_or_update_with_merge_and_hash(hash, key, value, merge)
    }

    /// Inserts `value` under `key` with a precomputed `hash`, or combines it
    /// with the existing value as [`ImHashMap::add_or_update_with`] does.
    #[must_use]
    pub fn add_or_update_with_merge_and_hash<F>(&self, hash: u64, key: K, value: V, merge: F) -> Self
    where
        F: FnOnce(&K, &V, V) -> V,
    {
        self.resolve(
            hash,
            Merge {
                hash,
                key,
                value,
                merge,
            },
        )
    }

    /// Inserts `value` under `key` only if the key is absent.
    ///
    /// Returns a map sharing the same root if `key` is already present.
    #[must_use]
    pub fn add_or_keep(&self, key: K, value: V) -> Self {
        let hash = self.hash_key(&key);
        self.add_or_keep_with_hash(hash, key, value)
    }

    /// Inserts `value` under `key` with a precomputed `hash`, only if the key
    /// is absent.
    #[must_use]
    pub fn add_or_keep_with_hash(&self, hash: u64, key: K, value: V) -> Self {
        self.add_or_keep_entry(ImHashMapEntry::new(hash, key, value))
    }

    /// Inserts `entry` only if its key is absent.
    #[must_use]
    pub fn add_or_keep_entry(&self, entry: ImHashMapEntry<K, V>) -> Self {
        let hash = entry.hash();
        self.resolve(
            hash,
            Proposal::new(ReferenceCounter::new(entry), Policy::AddOrKeep),
        )
    }

    /// Replaces the value under `key` only if the key is present.
    ///
    /// Returns a map sharing the same root if `key` is absent.
    #[must_use]
    pub fn update(&self, key: K, value: V) -> Self {
        let hash = self.hash_key(&key);
        self.update_with_hash(hash, key, value)
    }

    /// Replaces the value under `key` with a precomputed `hash`, only if the
    /// key is present.
    #[must_use]
    pub fn update_with_hash(&self, hash: u64, key: K, value: V) -> Self {
        self.update_entry(ImHashMapEntry::new(hash, key, value))
    }

    /// Replaces the entry with the key of `entry` only if that key is present.
    #[must_use]
    pub fn update_entry(&self, entry: ImHashMapEntry<K, V>) -> Self {
        let hash = entry.hash();
        self.resolve(
            hash,
            Proposal::new(ReferenceCounter::new(entry), Policy::Update),
        )
    }

    /// Resets the value under `key` to `V::default()` if the key is present.
    #[must_use]
    pub fn update_to_default(&self, key: K) -> Self
    where
        V: Default,
    {
        let hash = self.hash_key(&key);
        self.update_to_default_with_hash(hash, key)
    }

    /// Resets the value under `key` to `V::default()` using a precomputed
    /// `hash`.
    #[must_use]
    pub fn update_to_default_with_hash(&self, hash: u64, key: K) -> Self
    where
        V: Default,
    {
        self.resolve(hash, ToDefault { hash, key })
    }

    /// Removes `key` from the map.
    ///
    /// Returns a map sharing the same root if `key` is absent.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use immap::persistent::ImHashMap;
    ///
    /// let map = ImHashMap::new().add_or_update("a", 1).add_or_update("b", 2);
    /// let removed = map.remove("a");
    ///
    /// assert_eq!(removed.try_find("a"), None);
    /// assert_eq!(removed.try_find("b"), Some(&2));
    /// assert!(removed.remove("a").ptr_eq(&removed));
    /// ```
    #[must_use]
    pub fn remove<Q>(&self, key: &Q) -> Self
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.remove_with_hash(self.hash_key(key), key)
    }
}

// =============================================================================
// Traversal
// =============================================================================

/// In-order traversal state; the ancestors live in a separate `ParentStack`.
struct Walker<'a, K, V> {
    next: Option<&'a Node<K, V>>,
    pending: std::slice::Iter<'a, EntryRef<K, V>>,
}

impl<'a, K, V> Walker<'a, K, V> {
    fn new(root: &'a Node<K, V>) -> Self {
        Self {
            next: Some(root),
            pending: std::slice::Iter::default(),
        }
    }

    fn step(
        &mut self,
        parents: &mut ParentStack<'a, HashTree<K, V>>,
    ) -> Option<&'a ImHashMapEntry<K, V>> {
        if let Some(entry) = self.pending.next() {
            return Some(entry.as_ref());
        }
        loop {
            match self.next.take() {
                Some(Node::Tree(tree)) => {
                    parents.push(tree.as_ref());
                    self.next = Some(&tree.left);
                }
                Some(Node::Empty) | None => {
                    let tree = parents.pop()?;
                    self.next = Some(&tree.right);
                    match &tree.slot {
                        Slot::Entry(entry) => return Some(entry.as_ref()),
                        Slot::Conflicts(bucket) => {
                            self.pending = bucket.iter();
                            if let Some(entry) = self.pending.next() {
                                return Some(entry.as_ref());
                            }
                        }
                    }
                }
            }
        }
    }
}

/// An iterator over the entries of an [`ImHashMap`] in hash order.
pub struct ImHashMapIterator<'a, K, V> {
    walker: Walker<'a, K, V>,
    parents: ParentStack<'a, HashTree<K, V>>,
}

impl<'a, K, V> Iterator for ImHashMapIterator<'a, K, V> {
    type Item = &'a ImHashMapEntry<K, V>;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.walker.step(&mut self.parents)
    }
}

impl<K, V> FusedIterator for ImHashMapIterator<'_, K, V> {}

// =============================================================================
// Standard Trait Implementations
// =============================================================================

impl<K, V, S: Default> Default for ImHashMap<K, V, S> {
    #[inline]
    fn default() -> Self {
        Self::with_hasher(S::default())
    }
}

impl<K, V, S> FromIterator<(K, V)> for ImHashMap<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher + Clone + Default,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Self::default(), |map, (key, value)| {
                map.add_or_update(key, value)
            })
    }
}

impl<'a, K, V, S> IntoIterator for &'a ImHashMap<K, V, S> {
    type Item = &'a ImHashMapEntry<K, V>;
    type IntoIter = ImHashMapIterator<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Two maps are equal when they hold the same keys with equal values,
/// regardless of bucket order.
///
/// Lookups use the hash stored in each entry, so maps built with
/// `*_with_hash` compare by the hashes they were given.
impl<K, V, S> PartialEq for ImHashMap<K, V, S>
where
    K: Eq,
    V: PartialEq,
{
    fn eq(&self, other: &Self) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        self.count() == other.count()
            && self.iter().all(|entry| {
                other.try_find_with_hash(entry.hash(), entry.key()) == Some(entry.value())
            })
    }
}

impl<K, V, S> Eq for ImHashMap<K, V, S>
where
    K: Eq,
    V: Eq,
{
}

impl<K: fmt::Debug, V: fmt::Debug, S> fmt::Debug for ImHashMap<K, V, S> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_map()
            .entries(self.iter().map(|entry| (entry.key(), entry.value())))
            .finish()
    }
}

// =============================================================================
// Serde Support
// =============================================================================

#[cfg(feature = "serde")]
impl<K, V, S> serde::Serialize for ImHashMap<K, V, S>
where
    K: serde::Serialize,
    V: serde::Serialize,
{
    fn serialize<Ser>(&self, serializer: Ser) -> Result<Ser::Ok, Ser::Error>
    where
        Ser: serde::Serializer,
    {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(None)?;
        for entry in self {
            map.serialize_entry(entry.key(), entry.value())?;
        }
        map.end()
    }
}

#[cfg(feature = "serde")]
struct ImHashMapVisitor<K, V, S> {
    marker: std::marker::PhantomData<(K, V, S)>,
}

#[cfg(feature = "serde")]
impl<'de, K, V, S> serde::de::Visitor<'de> for ImHashMapVisitor<K, V, S>
where
    K: serde::Deserialize<'de> + Hash + Eq,
    V: serde::Deserialize<'de>,
    S: BuildHasher + Clone + Default,
{
    type Value = ImHashMap<K, V, S>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a map")
    }

    fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
    where
        A: serde::de::MapAccess<'de>,
    {
        let mut map = ImHashMap::default();
        while let Some((key, value)) = access.next_entry()? {
            map = map.add_or_update(key, value);
        }
        Ok(map)
    }
}

#[cfg(feature = "serde")]
impl<'de, K, V, S> serde::Deserialize<'de> for ImHashMap<K, V, S>
where
    K: serde::Deserialize<'de> + Hash + Eq,
    V: serde::Deserialize<'de>,
    S: BuildHasher + Clone + Default,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_map(ImHashMapVisitor {
            marker: std::marker::PhantomData,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
