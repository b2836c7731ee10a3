//! # immap
//!
//! Lock-free persistent maps built on path-copying AVL trees.
//!
//! ## Overview
//!
//! This library provides immutable maps whose every update returns a new
//! root while older roots stay valid, plus the plumbing that makes a single
//! shared root safely updatable from many threads without locks:
//!
//! - **Integer-keyed map**: [`ImMap`](persistent::ImMap), an AVL tree keyed
//!   by `i32` with compact `Leaf`/`Branch`/`Tree` node shapes
//! - **Hash-keyed map**: [`ImHashMap`](persistent::ImHashMap), an AVL tree
//!   keyed by the hash of an arbitrary key with conflict buckets for clashes
//! - **CAS cell**: [`Ref`](atomic::Ref), an optimistic read-modify-write
//!   slot with a bounded retry budget
//! - **Sharded slots**: [`ImMapSlots`](atomic::ImMapSlots) and
//!   [`ImHashMapSlots`](atomic::ImHashMapSlots), arrays of independent
//!   CAS-fronted roots selected by the low bits of the hash
//!
//! ## Feature Flags
//!
//! - `persistent`: The persistent maps
//! - `atomic`: The CAS cell and sharded slots (implies `arc`)
//! - `arc`: Share nodes through `Arc` instead of `Rc`
//! - `serde`: Serialization support for the maps
//! - `rayon`: Parallel folds over sharded slots
//! - `fxhash` / `ahash`: Faster default hashers for [`ImHashMap`](persistent::ImHashMap)
//! - `full`: Enable all features except the hasher overrides
//!
//! ## Example
//!
//! ```rust
//! use immap::prelude::*;
//!
//! let map = ImMap::new()
//!     .add_or_update(5, "a")
//!     .add_or_update(3, "b")
//!     .add_or_update(8, "c");
//!
//! let keys: Vec<i32> = map.keys().collect();
//! assert_eq!(keys, vec![3, 5, 8]);
//!
//! let shared = Ref::new(map);
//! shared.swap(|current| current.add_or_update(13, "d")).unwrap();
//! assert_eq!(shared.value().try_find(13), Some(&"d"));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Prelude module for convenient imports.
///
/// Re-exports the map types, the CAS cell and the sharded slots.
///
/// # Usage
///
/// ```rust
/// use immap::prelude::*;
/// ```
pub mod prelude {

    #[cfg(feature = "persistent")]
    pub use crate::persistent::*;

    #[cfg(feature = "atomic")]
    pub use crate::atomic::*;
}

#[cfg(feature = "persistent")]
pub mod persistent;

#[cfg(feature = "atomic")]
pub mod atomic;
