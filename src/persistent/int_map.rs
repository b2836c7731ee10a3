//! Persistent (immutable) integer-keyed map based on an AVL tree.
//!
//! This module provides [`ImMap`], an immutable map keyed directly by an
//! `i32` (typically a precomputed hash code) that uses path copying for
//! efficient updates.
//!
//! # Overview
//!
//! - O(log N) `try_find`
//! - O(log N) `add_or_update` / `add_or_keep` / `update`
//! - O(log N) `remove`
//! - O(N) in-order traversal without recursion
//!
//! All operations return new maps without modifying the original. An
//! operation that does not change the content returns the original root,
//! observable through [`ImMap::ptr_eq`].
//!
//! # Examples
//!
//! ```rust
//! use immap::persistent::ImMap;
//!
//! let map = ImMap::new()
//!     .add_or_update(5, "a")
//!     .add_or_update(3, "b")
//!     .add_or_update(8, "c");
//!
//! assert_eq!(map.try_find(5), Some(&"a"));
//! assert_eq!(map.keys().collect::<Vec<_>>(), vec![3, 5, 8]);
//! ```
//!
//! # Internal Structure
//!
//! Nodes come in four shapes:
//! 1. `Empty`: the empty tree, height 0
//! 2. `Leaf`: a single entry, height 1
//! 3. `Branch`: two entries sorted by key with no child pointers, height 2
//! 4. `Tree`: an entry with two non-empty subtrees and a cached height
//!
//! `Leaf` and `Branch` avoid allocating empty children for the small
//! subtrees that make up the bottom of every tree. For every `Tree` node the
//! heights of the two subtrees differ by at most one.

use std::cmp::Ordering;
use std::fmt;
use std::iter::{FromIterator, FusedIterator};

use super::ReferenceCounter;
use super::entry::{ImMapEntry, Policy, Proposal, Resolve};
use super::stack::ParentStack;

type EntryRef<V> = ReferenceCounter<ImMapEntry<V>>;

// =============================================================================
// Node Definition
// =============================================================================

enum Node<V> {
    Empty,
    Leaf(EntryRef<V>),
    /// Two entries, `lower.key() < upper.key()`, forming a subtree of height 2.
    Branch(EntryRef<V>, EntryRef<V>),
    Tree(ReferenceCounter<IntTree<V>>),
}

/// Interior node of an [`ImMap`] with two non-empty subtrees.
pub struct IntTree<V> {
    entry: EntryRef<V>,
    left: Node<V>,
    right: Node<V>,
    height: u32,
}

impl<V> Clone for Node<V> {
    fn clone(&self) -> Self {
        match self {
            Self::Empty => Self::Empty,
            Self::Leaf(entry) => Self::Leaf(entry.clone()),
            Self::Branch(lower, upper) => Self::Branch(lower.clone(), upper.clone()),
            Self::Tree(tree) => Self::Tree(tree.clone()),
        }
    }
}

impl<V> Node<V> {
    fn height(&self) -> u32 {
        match self {
            Self::Empty => 0,
            Self::Leaf(_) => 1,
            Self::Branch(..) => 2,
            Self::Tree(tree) => tree.height,
        }
    }

    fn ptr_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Empty, Self::Empty) => true,
            (Self::Leaf(this), Self::Leaf(that)) => ReferenceCounter::ptr_eq(this, that),
            (Self::Branch(this_lower, this_upper), Self::Branch(that_lower, that_upper)) => {
                ReferenceCounter::ptr_eq(this_lower, that_lower)
                    && ReferenceCounter::ptr_eq(this_upper, that_upper)
            }
            (Self::Tree(this), Self::Tree(that)) => ReferenceCounter::ptr_eq(this, that),
            _ => false,
        }
    }

    /// Builds the node for `entry` over two balanced subtrees, picking the
    /// most compact shape.
    fn join(entry: EntryRef<V>, left: Self, right: Self) -> Self {
        match (left, right) {
            (Self::Empty, Self::Empty) => Self::Leaf(entry),
            (Self::Empty, Self::Leaf(upper)) => Self::Branch(entry, upper),
            (Self::Leaf(lower), Self::Empty) => Self::Branch(lower, entry),
            (left, right) => {
                let height = 1 + left.height().max(right.height());
                Self::Tree(ReferenceCounter::new(IntTree {
                    entry,
                    left,
                    right,
                    height,
                }))
            }
        }
    }

    /// A height-2 tree of three entries given in key order.
    fn three(lower: EntryRef<V>, middle: EntryRef<V>, upper: EntryRef<V>) -> Self {
        Self::Tree(ReferenceCounter::new(IntTree {
            entry: middle,
            left: Self::Leaf(lower),
            right: Self::Leaf(upper),
            height: 2,
        }))
    }

    /// Splits a non-empty node into its root entry and subtrees.
    ///
    /// A `Branch` is viewed as its lower entry with the upper entry as the
    /// right child, which is how rotations pass through it.
    fn split(&self) -> (EntryRef<V>, Self, Self) {
        match self {
            Self::Leaf(entry) => (entry.clone(), Self::Empty, Self::Empty),
            Self::Branch(lower, upper) => (lower.clone(), Self::Empty, Self::Leaf(upper.clone())),
            Self::Tree(tree) => (tree.entry.clone(), tree.left.clone(), tree.right.clone()),
            Self::Empty => unreachable!("rotation through an empty subtree"),
        }
    }

    /// Joins `entry` with subtrees whose heights differ by at most two,
    /// rotating when they differ by exactly two.
    fn balance(entry: EntryRef<V>, left: Self, right: Self) -> Self {
        let left_height = left.height();
        let right_height = right.height();

        if left_height > right_height + 1 {
            let (left_entry, left_left, left_right) = left.split();
            if left_left.height() >= left_right.height() {
                Self::join(left_entry, left_left, Self::join(entry, left_right, right))
            } else {
                let (pivot, pivot_left, pivot_right) = left_right.split();
                Self::join(
                    pivot,
                    Self::join(left_entry, left_left, pivot_left),
                    Self::join(entry, pivot_right, right),
                )
            }
        } else if right_height > left_height + 1 {
            let (right_entry, right_left, right_right) = right.split();
            if right_right.height() >= right_left.height() {
                Self::join(right_entry, Self::join(entry, left, right_left), right_right)
            } else {
                let (pivot, pivot_left, pivot_right) = right_left.split();
                Self::join(
                    pivot,
                    Self::join(entry, left, pivot_left),
                    Self::join(right_entry, pivot_right, right_right),
                )
            }
        } else {
            Self::join(entry, left, right)
        }
    }

    fn find(&self, key: i32) -> Option<&EntryRef<V>> {
        let mut node = self;
        loop {
            match node {
                Self::Empty => return None,
                Self::Leaf(entry) => return (entry.key() == key).then_some(entry),
                Self::Branch(lower, upper) => {
                    return if lower.key() == key {
                        Some(lower)
                    } else if upper.key() == key {
                        Some(upper)
                    } else {
                        None
                    };
                }
                Self::Tree(tree) => match key.cmp(&tree.entry.key()) {
                    Ordering::Less => node = &tree.left,
                    Ordering::Greater => node = &tree.right,
                    Ordering::Equal => return Some(&tree.entry),
                },
            }
        }
    }

    /// Applies `resolver` at the position of its key.
    ///
    /// Returns `None` when the resolver leaves the tree unchanged.
    fn upsert<R>(&self, resolver: R) -> Option<Self>
    where
        R: Resolve<ImMapEntry<V>>,
    {
        let key = *resolver.key();
        match self {
            Self::Empty => resolver.absent().map(Self::Leaf),
            Self::Leaf(entry) => match key.cmp(&entry.key()) {
                Ordering::Equal => resolver.present(entry).map(Self::Leaf),
                Ordering::Less => resolver
                    .absent()
                    .map(|added| Self::Branch(added, entry.clone())),
                Ordering::Greater => resolver
                    .absent()
                    .map(|added| Self::Branch(entry.clone(), added)),
            },
            Self::Branch(lower, upper) => {
                if key == lower.key() {
                    return resolver
                        .present(lower)
                        .map(|replaced| Self::Branch(replaced, upper.clone()));
                }
                if key == upper.key() {
                    return resolver
                        .present(upper)
                        .map(|replaced| Self::Branch(lower.clone(), replaced));
                }
                let added = resolver.absent()?;
                Some(if key < lower.key() {
                    Self::three(added, lower.clone(), upper.clone())
                } else if key < upper.key() {
                    Self::three(lower.clone(), added, upper.clone())
                } else {
                    Self::three(lower.clone(), upper.clone(), added)
                })
            }
            Self::Tree(tree) => match key.cmp(&tree.entry.key()) {
                // Same position, same children, same height: only the entry changes.
                Ordering::Equal => resolver.present(&tree.entry).map(|replaced| {
                    Self::Tree(ReferenceCounter::new(IntTree {
                        entry: replaced,
                        left: tree.left.clone(),
                        right: tree.right.clone(),
                        height: tree.height,
                    }))
                }),
                Ordering::Less => {
                    let left = tree.left.upsert(resolver)?;
                    Some(Self::balance(tree.entry.clone(), left, tree.right.clone()))
                }
                Ordering::Greater => {
                    let right = tree.right.upsert(resolver)?;
                    Some(Self::balance(tree.entry.clone(), tree.left.clone(), right))
                }
            },
        }
    }

    /// Returns `None` when `key` is absent.
    fn remove(&self, key: i32) -> Option<Self> {
        match self {
            Self::Empty => None,
            Self::Leaf(entry) => (entry.key() == key).then_some(Self::Empty),
            Self::Branch(lower, upper) => {
                if lower.key() == key {
                    Some(Self::Leaf(upper.clone()))
                } else if upper.key() == key {
                    Some(Self::Leaf(lower.clone()))
                } else {
                    None
                }
            }
            Self::Tree(tree) => match key.cmp(&tree.entry.key()) {
                Ordering::Less => {
                    let left = tree.left.remove(key)?;
                    Some(Self::balance(tree.entry.clone(), left, tree.right.clone()))
                }
                Ordering::Greater => {
                    let right = tree.right.remove(key)?;
                    Some(Self::balance(tree.entry.clone(), tree.left.clone(), right))
                }
                Ordering::Equal => {
                    let (successor, right) = tree.right.pop_first();
                    Some(Self::balance(successor, tree.left.clone(), right))
                }
            },
        }
    }

    /// Detaches the entry with the smallest key from a non-empty node.
    fn pop_first(&self) -> (EntryRef<V>, Self) {
        match self {
            Self::Leaf(entry) => (entry.clone(), Self::Empty),
            Self::Branch(lower, upper) => (lower.clone(), Self::Leaf(upper.clone())),
            Self::Tree(tree) => {
                let (first, left) = tree.left.pop_first();
                (
                    first,
                    Self::balance(tree.entry.clone(), left, tree.right.clone()),
                )
            }
            Self::Empty => unreachable!("pop from an empty subtree"),
        }
    }
}

// =============================================================================
// Resolvers
// =============================================================================

/// Combines the stored value with the new one when the key is present.
struct Merge<V, F> {
    key: i32,
    value: V,
    merge: F,
}

impl<V, F> Resolve<ImMapEntry<V>> for Merge<V, F>
where
    F: FnOnce(i32, &V, V) -> V,
{
    fn key(&self) -> &i32 {
        &self.key
    }

    fn absent(self) -> Option<EntryRef<V>> {
        Some(ReferenceCounter::new(ImMapEntry::new(self.key, self.value)))
    }

    fn present(self, existing: &EntryRef<V>) -> Option<EntryRef<V>> {
        let value = (self.merge)(self.key, existing.value(), self.value);
        Some(ReferenceCounter::new(ImMapEntry::new(self.key, value)))
    }
}

/// Resets a present value to `V::default()`.
struct ToDefault {
    key: i32,
}

impl<V: Default> Resolve<ImMapEntry<V>> for ToDefault {
    fn key(&self) -> &i32 {
        &self.key
    }

    fn absent(self) -> Option<EntryRef<V>> {
        None
    }

    fn present(self, _existing: &EntryRef<V>) -> Option<EntryRef<V>> {
        Some(ReferenceCounter::new(ImMapEntry::new(self.key, V::default())))
    }
}

// =============================================================================
// ImMap Definition
// =============================================================================

/// A persistent (immutable) map keyed by `i32`, based on an AVL tree.
///
/// `ImMap` never mutates a node that is reachable from a published root;
/// each update copies only the path from the root to the changed position.
/// Clones are cheap and share the whole tree.
///
/// # Time Complexity
///
/// | Operation       | Complexity |
/// |-----------------|------------|
/// | `new`           | O(1)       |
/// | `try_find`      | O(log N)   |
/// | `add_or_update` | O(log N)   |
/// | `add_or_keep`   | O(log N)   |
/// | `update`        | O(log N)   |
/// | `remove`        | O(log N)   |
/// | `iter`/`fold`   | O(N)       |
/// | `count`         | O(N)       |
/// | `is_empty`      | O(1)       |
///
/// # Examples
///
/// ```rust
/// use immap::persistent::ImMap;
///
/// let map = ImMap::new().add_or_update(42, "answer");
/// assert_eq!(map.try_find(42), Some(&"answer"));
/// assert_eq!(map.try_find(7), None);
///
/// // Update is a no-op for absent keys
/// let same = map.update(7, "seven");
/// assert!(same.ptr_eq(&map));
/// ```
pub struct ImMap<V> {
    root: Node<V>,
}

impl<V> Clone for ImMap<V> {
    fn clone(&self) -> Self {
        Self {
            root: self.root.clone(),
        }
    }
}

impl<V> ImMap<V> {
    /// Creates a new empty map. No allocation is performed.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use immap::persistent::ImMap;
    ///
    /// let map: ImMap<String> = ImMap::new();
    /// assert!(map.is_empty());
    /// ```
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self { root: Node::Empty }
    }

    /// Returns `true` if the map contains no entries.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        matches!(self.root, Node::Empty)
    }

    /// Returns the height of the underlying tree.
    ///
    /// An empty map has height 0, a single entry height 1.
    #[inline]
    #[must_use]
    pub fn height(&self) -> u32 {
        self.root.height()
    }

    /// Returns `true` if both maps share the same root.
    ///
    /// This is how callers detect that an operation was a no-op.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use immap::persistent::ImMap;
    ///
    /// let map = ImMap::new().add_or_update(1, 10);
    /// assert!(map.add_or_keep(1, 20).ptr_eq(&map));
    /// assert!(!map.add_or_update(1, 20).ptr_eq(&map));
    /// ```
    #[inline]
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.root.ptr_eq(&other.root)
    }

    /// Counts the entries by walking the tree.
    ///
    /// # Complexity
    ///
    /// O(N)
    #[must_use]
    pub fn count(&self) -> usize {
        self.iter().count()
    }

    /// Returns a reference to the value stored under `key`.
    ///
    /// # Complexity
    ///
    /// O(log N)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use immap::persistent::ImMap;
    ///
    /// let map = ImMap::new().add_or_update(3, "three");
    /// assert_eq!(map.try_find(3), Some(&"three"));
    /// assert_eq!(map.try_find(4), None);
    /// ```
    #[must_use]
    pub fn try_find(&self, key: i32) -> Option<&V> {
        self.find_entry(key).map(ImMapEntry::value)
    }

    /// Returns the entry stored under `key`.
    #[must_use]
    pub fn find_entry(&self, key: i32) -> Option<&ImMapEntry<V>> {
        self.root.find(key).map(|entry| &**entry)
    }

    /// Returns `true` if the map contains `key`.
    #[must_use]
    pub fn contains_key(&self, key: i32) -> bool {
        self.root.find(key).is_some()
    }

    /// Returns a clone of the value under `key`, or `V::default()` on a miss.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use immap::persistent::ImMap;
    ///
    /// let map = ImMap::new().add_or_update(1, 100);
    /// assert_eq!(map.get_value_or_default(1), 100);
    /// assert_eq!(map.get_value_or_default(2), 0);
    /// ```
    #[must_use]
    pub fn get_value_or_default(&self, key: i32) -> V
    where
        V: Clone + Default,
    {
        self.try_find(key).cloned().unwrap_or_default()
    }

    /// Returns the first entry in key order that satisfies `predicate`.
    pub fn find_first<P>(&self, mut predicate: P) -> Option<&ImMapEntry<V>>
    where
        P: FnMut(&ImMapEntry<V>) -> bool,
    {
        self.iter().find(|entry| predicate(entry))
    }

    /// Inserts `value` under `key`, replacing any existing value.
    ///
    /// Replacing a value never changes the shape of the tree.
    ///
    /// # Complexity
    ///
    /// O(log N)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use immap::persistent::ImMap;
    ///
    /// let first = ImMap::new().add_or_update(1, "one");
    /// let second = first.add_or_update(1, "ONE");
    ///
    /// assert_eq!(first.try_find(1), Some(&"one")); // Original unchanged
    /// assert_eq!(second.try_find(1), Some(&"ONE"));
    /// ```
    #[must_use]
    pub fn add_or_update(&self, key: i32, value: V) -> Self {
        self.add_or_update_entry(ImMapEntry::new(key, value))
    }

    /// Inserts `entry`, replacing any entry with the same key.
    #[must_use]
    pub fn add_or_update_entry(&self, entry: ImMapEntry<V>) -> Self {
        self.resolve(Proposal::new(
            ReferenceCounter::new(entry),
            Policy::AddOrUpdate,
        ))
    }

    /// Inserts `value` under `key`, or combines it with the existing value.
    ///
    /// When `key` is present the stored value becomes
    /// `merge(key, &old_value, value)`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use immap::persistent::ImMap;
    ///
    /// let add = |_key: i32, old: &i32, new: i32| old + new;
    /// let map = ImMap::new()
    ///     .add_or_update_with(1, 10, add)
    ///     .add_or_update_with(1, 5, add);
    /// assert_eq!(map.try_find(1), Some(&15));
    /// ```
    #[must_use]
    pub fn add_or_update_with<F>(&self, key: i32, value: V, merge: F) -> Self
    where
        F: FnOnce(i32, &V, V) -> V,
    {
        self.resolve(Merge { key, value, merge })
    }

    /// Inserts `value` under `key` only if the key is absent.
    ///
    /// Returns a map sharing the same root if `key` is already present.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use immap::persistent::ImMap;
    ///
    /// let map = ImMap::new().add_or_keep(1, "first");
    /// let kept = map.add_or_keep(1, "second");
    ///
    /// assert_eq!(kept.try_find(1), Some(&"first"));
    /// assert!(kept.ptr_eq(&map));
    /// ```
    #[must_use]
    pub fn add_or_keep(&self, key: i32, value: V) -> Self {
        self.add_or_keep_entry(ImMapEntry::new(key, value))
    }

    /// Inserts `entry` only if its key is absent.
    #[must_use]
    pub fn add_or_keep_entry(&self, entry: ImMapEntry<V>) -> Self {
        self.resolve(Proposal::new(ReferenceCounter::new(entry), Policy::AddOrKeep))
    }

    /// Replaces the value under `key` only if the key is present.
    ///
    /// Returns a map sharing the same root if `key` is absent.
    #[must_use]
    pub fn update(&self, key: i32, value: V) -> Self {
        self.update_entry(ImMapEntry::new(key, value))
    }

    /// Replaces the entry with the key of `entry` only if that key is present.
    #[must_use]
    pub fn update_entry(&self, entry: ImMapEntry<V>) -> Self {
        self.resolve(Proposal::new(ReferenceCounter::new(entry), Policy::Update))
    }

    /// Resets the value under `key` to `V::default()` if the key is present.
    #[must_use]
    pub fn update_to_default(&self, key: i32) -> Self
    where
        V: Default,
    {
        self.resolve(ToDefault { key })
    }

    /// Removes `key` from the map.
    ///
    /// Returns a map sharing the same root if `key` is absent.
    ///
    /// # Complexity
    ///
    /// O(log N)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use immap::persistent::ImMap;
    ///
    /// let map = ImMap::new().add_or_update(1, "one").add_or_update(2, "two");
    /// let removed = map.remove(1);
    ///
    /// assert!(!removed.contains_key(1));
    /// assert!(map.contains_key(1)); // Original unchanged
    /// assert!(removed.remove(1).ptr_eq(&removed));
    /// ```
    #[must_use]
    pub fn remove(&self, key: i32) -> Self {
        self.root
            .remove(key)
            .map_or_else(|| self.clone(), |root| Self { root })
    }

    pub(crate) fn resolve<R>(&self, resolver: R) -> Self
    where
        R: Resolve<ImMapEntry<V>>,
    {
        self.root
            .upsert(resolver)
            .map_or_else(|| self.clone(), |root| Self { root })
    }

    /// Returns an iterator over the entries in ascending key order.
    ///
    /// The iterator keeps its ancestors in a [`ParentStack`] instead of
    /// recursing.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use immap::persistent::ImMap;
    ///
    /// let map: ImMap<&str> = [(2, "b"), (1, "a"), (3, "c")].into_iter().collect();
    /// let pairs: Vec<(i32, &str)> = map.iter().map(|entry| (entry.key(), *entry.value())).collect();
    /// assert_eq!(pairs, vec![(1, "a"), (2, "b"), (3, "c")]);
    /// ```
    #[must_use]
    pub fn iter(&self) -> ImMapIterator<'_, V> {
        ImMapIterator {
            walker: Walker::new(&self.root),
            parents: ParentStack::new(),
        }
    }

    /// Returns an iterator over the keys in ascending order.
    pub fn keys(&self) -> impl Iterator<Item = i32> + '_ {
        self.iter().map(ImMapEntry::key)
    }

    /// Returns an iterator over the values in ascending key order.
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.iter().map(ImMapEntry::value)
    }

    /// Folds the entries in ascending key order.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use immap::persistent::ImMap;
    ///
    /// let map: ImMap<i32> = (1..=4).map(|key| (key, key * 10)).collect();
    /// let sum = map.fold(0, |sum, entry| sum + entry.value());
    /// assert_eq!(sum, 100);
    /// ```
    pub fn fold<B, F>(&self, init: B, function: F) -> B
    where
        F: FnMut(B, &ImMapEntry<V>) -> B,
    {
        self.fold_with_stack(init, &mut ParentStack::new(), function)
    }

    /// Folds the entries in ascending key order using `stack` for the
    /// traversal, so that one buffer can serve many folds.
    pub fn fold_with_stack<'a, B, F>(
        &'a self,
        init: B,
        stack: &mut ParentStack<'a, IntTree<V>>,
        mut function: F,
    ) -> B
    where
        F: FnMut(B, &'a ImMapEntry<V>) -> B,
    {
        stack.clear();
        let mut walker = Walker::new(&self.root);
        let mut accumulator = init;
        while let Some(entry) = walker.step(stack) {
            accumulator = function(accumulator, entry);
        }
        accumulator
    }

    /// Calls `visitor` for every entry in ascending key order.
    pub fn visit<F>(&self, visitor: F)
    where
        F: FnMut(&ImMapEntry<V>),
    {
        self.visit_with_stack(&mut ParentStack::new(), visitor);
    }

    /// Calls `visitor` for every entry in ascending key order using `stack`
    /// for the traversal.
    pub fn visit_with_stack<'a, F>(&'a self, stack: &mut ParentStack<'a, IntTree<V>>, mut visitor: F)
    where
        F: FnMut(&'a ImMapEntry<V>),
    {
        self.fold_with_stack((), stack, |(), entry| visitor(entry));
    }
}

// =============================================================================
// Traversal
// =============================================================================

/// In-order traversal state; the ancestors live in a separate `ParentStack`
/// so that the stack can be borrowed from the caller.
struct Walker<'a, V> {
    next: Option<&'a Node<V>>,
    pending: Option<&'a ImMapEntry<V>>,
}

impl<'a, V> Walker<'a, V> {
    const fn new(root: &'a Node<V>) -> Self {
        Self {
            next: Some(root),
            pending: None,
        }
    }

    fn step(&mut self, parents: &mut ParentStack<'a, IntTree<V>>) -> Option<&'a ImMapEntry<V>> {
        if let Some(entry) = self.pending.take() {
            return Some(entry);
        }
        loop {
            match self.next.take() {
                Some(Node::Tree(tree)) => {
                    parents.push(tree.as_ref());
                    self.next = Some(&tree.left);
                }
                Some(Node::Leaf(entry)) => return Some(entry.as_ref()),
                Some(Node::Branch(lower, upper)) => {
                    self.pending = Some(upper.as_ref());
                    return Some(lower.as_ref());
                }
                Some(Node::Empty) | None => {
                    let tree = parents.pop()?;
                    self.next = Some(&tree.right);
                    return Some(tree.entry.as_ref());
                }
            }
        }
    }
}

/// An iterator over the entries of an [`ImMap`] in ascending key order.
pub struct ImMapIterator<'a, V> {
    walker: Walker<'a, V>,
    parents: ParentStack<'a, IntTree<V>>,
}

impl<'a, V> Iterator for ImMapIterator<'a, V> {
    type Item = &'a ImMapEntry<V>;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.walker.step(&mut self.parents)
    }
}

impl<V> FusedIterator for ImMapIterator<'_, V> {}

// =============================================================================
// Standard Trait Implementations
// =============================================================================

impl<V> Default for ImMap<V> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<V> FromIterator<(i32, V)> for ImMap<V> {
    fn from_iter<I: IntoIterator<Item = (i32, V)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Self::new(), |map, (key, value)| map.add_or_update(key, value))
    }
}

impl<'a, V> IntoIterator for &'a ImMap<V> {
    type Item = &'a ImMapEntry<V>;
    type IntoIter = ImMapIterator<'a, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<V: PartialEq> PartialEq for ImMap<V> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.iter().eq(other.iter())
    }
}

impl<V: Eq> Eq for ImMap<V> {}

impl<V: fmt::Debug> fmt::Debug for ImMap<V> {
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
impl<V> serde::Serialize for ImMap<V>
where
    V: serde::Serialize,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(None)?;
        for entry in self {
            map.serialize_entry(&entry.key(), entry.value())?;
        }
        map.end()
    }
}

#[cfg(feature = "serde")]
struct ImMapVisitor<V> {
    value_marker: std::marker::PhantomData<V>,
}

#[cfg(feature = "serde")]
impl<'de, V> serde::de::Visitor<'de> for ImMapVisitor<V>
where
    V: serde::Deserialize<'de>,
{
    type Value = ImMap<V>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a map with i32 keys")
    }

    fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
    where
        A: serde::de::MapAccess<'de>,
    {
        let mut map = ImMap::new();
        while let Some((key, value)) = access.next_entry::<i32, V>()? {
            map = map.add_or_update(key, value);
        }
        Ok(map)
    }
}

#[cfg(feature = "serde")]
impl<'de, V> serde::Deserialize<'de> for ImMap<V>
where
    V: serde::Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_map(ImMapVisitor {
            value_marker: std::marker::PhantomData,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
