//! Lock-free, shared access to persistent maps.
//!
//! Persistent maps never change once built, so sharing one between threads
//! only needs a way to swap the root. This module provides that:
//!
//! - [`Ref`]: one atomically replaceable value with an optimistic,
//!   bounded-retry update loop
//! - [`ImMapSlots`] / [`ImHashMapSlots`]: a power-of-two number of
//!   independent `Ref`-fronted map roots, picked by the low bits of the hash
//!
//! There are no locks anywhere. A writer builds its complete new root before
//! publishing it with a single compare-and-swap, so a reader only ever sees
//! whole maps.
//!
//! # Examples
//!
//! ```rust
//! use immap::atomic::{ImMapSlots, Ref};
//! use immap::persistent::ImMap;
//!
//! let shared = Ref::new(ImMap::new());
//! shared.swap(|map| map.add_or_update(1, 'a')).unwrap();
//! assert_eq!(shared.value().try_find(1), Some(&'a'));
//!
//! let slots = ImMapSlots::new();
//! slots.add_or_update(1, 'a').unwrap();
//! assert_eq!(slots.try_find(1), Some('a'));
//! ```

mod cell;
mod slots;

pub use cell::{DEFAULT_RETRY_BUDGET, Ref, SwapError};
pub use slots::{DEFAULT_SHARD_COUNT, ImHashMapSlots, ImMapSlots};
