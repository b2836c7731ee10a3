//! Reusable parent stack for in-order traversal.
//!
//! Traversal of both maps walks the tree iteratively, remembering the
//! ancestors whose right subtree is still pending. The stack lives in a
//! `SmallVec` with room for [`INLINE_DEPTH`] parents, which covers AVL trees
//! of far more entries than fit in memory, so a traversal normally performs
//! no heap allocation at all.
//!
//! Passing the same `ParentStack` to several `fold_with_stack` or
//! `visit_with_stack` calls reuses one buffer across all of them.

use smallvec::SmallVec;

/// Number of parents stored inline before spilling to the heap.
///
/// An AVL tree of height 48 holds more than 2^32 entries.
pub(crate) const INLINE_DEPTH: usize = 48;

/// Buffer of tree ancestors used by the iterative traversals.
///
/// The node type is internal to each map; callers create a stack with
/// [`ParentStack::new`] and let type inference pick the right one.
///
/// # Examples
///
/// ```rust
/// use immap::persistent::{ImMap, ParentStack};
///
/// let first: ImMap<i32> = (0..10).map(|key| (key, key)).collect();
/// let second: ImMap<i32> = (10..20).map(|key| (key, key)).collect();
///
/// let mut stack = ParentStack::new();
/// let sum = first.fold_with_stack(0, &mut stack, |sum, entry| sum + entry.value());
/// let sum = second.fold_with_stack(sum, &mut stack, |sum, entry| sum + entry.value());
/// assert_eq!(sum, (0..20).sum());
/// ```
pub struct ParentStack<'a, N> {
    parents: SmallVec<[&'a N; INLINE_DEPTH]>,
}

impl<'a, N> ParentStack<'a, N> {
    /// Creates an empty stack.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            parents: SmallVec::new(),
        }
    }

    /// Returns the number of parents currently held.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.parents.len()
    }

    /// Returns `true` if no parents are held.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }

    /// Returns `true` if the stack has outgrown its inline storage.
    #[inline]
    #[must_use]
    pub fn spilled(&self) -> bool {
        self.parents.spilled()
    }

    #[inline]
    pub(crate) fn push(&mut self, parent: &'a N) {
        self.parents.push(parent);
    }

    #[inline]
    pub(crate) fn pop(&mut self) -> Option<&'a N> {
        self.parents.pop()
    }

    #[inline]
    pub(crate) fn clear(&mut self) {
        self.parents.clear();
    }
}

impl<N> Default for ParentStack<'_, N> {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
