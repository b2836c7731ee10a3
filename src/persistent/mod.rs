//! Persistent (immutable) AVL maps.
//!
//! This module provides two balanced-tree maps that never mutate a node once
//! it is reachable from a published root. Every update copies the path from
//! the root to the changed position and shares everything else:
//!
//! - [`ImMap`]: Integer-keyed map with `Leaf`/`Branch`/`Tree` node shapes
//! - [`ImHashMap`]: Hash-keyed map with conflict buckets for colliding keys
//!
//! # Structural Sharing
//!
//! Updating a map creates `O(log N)` new nodes; the old version remains
//! valid and unaffected. When an operation would not change the logical
//! content (for example [`ImMap::add_or_keep`] on a present key) the same
//! root is returned, which callers can detect with `ptr_eq`.
//!
//! # Examples
//!
//! ## `ImMap`
//!
//! ```rust
//! use immap::persistent::ImMap;
//!
//! let map = ImMap::new().add_or_update(1, "one").add_or_update(2, "two");
//! assert_eq!(map.try_find(1), Some(&"one"));
//!
//! // Structural sharing: the original map is preserved
//! let updated = map.add_or_update(1, "ONE");
//! assert_eq!(map.try_find(1), Some(&"one"));
//! assert_eq!(updated.try_find(1), Some(&"ONE"));
//!
//! // Keeping an existing key returns the very same root
//! let kept = map.add_or_keep(1, "uno");
//! assert!(kept.ptr_eq(&map));
//! ```
//!
//! ## `ImHashMap`
//!
//! ```rust
//! use immap::persistent::ImHashMap;
//!
//! let map = ImHashMap::new()
//!     .add_or_update("one".to_string(), 1)
//!     .add_or_update("two".to_string(), 2);
//! assert_eq!(map.try_find("one"), Some(&1));
//!
//! let removed = map.remove("one");
//! assert!(!removed.contains_key("one"));
//! assert!(map.contains_key("one")); // Original unchanged
//! ```

// =============================================================================
// Reference Counter Type Alias
// =============================================================================

/// Reference-counted smart pointer type.
///
/// When the `arc` feature is enabled, this is `std::sync::Arc`,
/// which is thread-safe and required by the `atomic` module.
///
/// When the `arc` feature is disabled, this is `std::rc::Rc`,
/// which is faster but not thread-safe.
#[cfg(feature = "arc")]
pub(crate) type ReferenceCounter<T> = std::sync::Arc<T>;

#[cfg(not(feature = "arc"))]
pub(crate) type ReferenceCounter<T> = std::rc::Rc<T>;

pub(crate) mod entry;
mod hash_map;
mod hashing;
mod int_map;
mod stack;

pub use entry::ImHashMapEntry;
pub use entry::ImMapEntry;
pub use hash_map::ImHashMap;
pub use hash_map::ImHashMapIterator;
pub use hashing::DefaultHashBuilder;
pub use int_map::ImMap;
pub use int_map::ImMapIterator;
pub use stack::ParentStack;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod sharing_tests {
    use super::{ImHashMap, ImMap};
    use rstest::rstest;

    #[rstest]
    fn test_int_map_clone_shares_root() {
        let map = ImMap::new().add_or_update(1, "one").add_or_update(2, "two");
        let cloned = map.clone();
        assert!(cloned.ptr_eq(&map));

        let updated = cloned.add_or_update(3, "three");
        assert!(!updated.ptr_eq(&map));
        assert!(cloned.ptr_eq(&map));
        assert_eq!(map.try_find(3), None);
    }

    #[rstest]
    fn test_hash_map_clone_shares_root() {
        let map = ImHashMap::new().add_or_update("a", 1).add_or_update("b", 2);
        let cloned = map.clone();
        assert!(cloned.ptr_eq(&map));

        let updated = cloned.add_or_update("c", 3);
        assert!(!updated.ptr_eq(&map));
        assert!(cloned.ptr_eq(&map));
        assert_eq!(map.try_find("c"), None);
        assert_eq!(map.count(), 2);
    }
}
