//! Default hasher selection for [`ImHashMap`](super::ImHashMap).
//!
//! Hashes are stored in the tree and compared across map versions, so the
//! default builder must produce the same hash for the same key within one
//! process. Each choice below meets that:
//!
//! - default: `std`'s `DefaultHasher` (SipHash with fixed keys)
//! - `fxhash`: `rustc_hash::FxHasher`, seedless
//! - `ahash`: `ahash::AHasher::default()`, whose keys are drawn at random
//!   once per process and then reused
//!
//! Only the first two give the same hash across processes. Hashes taken
//! from an `ahash` map must not be persisted or sent to another process.
//!
//! When both `fxhash` and `ahash` are enabled, `fxhash` wins.

/// The `BuildHasher` an [`ImHashMap`](super::ImHashMap) uses unless told otherwise.
#[cfg(feature = "fxhash")]
pub type DefaultHashBuilder = rustc_hash::FxBuildHasher;

/// The `BuildHasher` an [`ImHashMap`](super::ImHashMap) uses unless told otherwise.
#[cfg(all(feature = "ahash", not(feature = "fxhash")))]
pub type DefaultHashBuilder = std::hash::BuildHasherDefault<ahash::AHasher>;

/// The `BuildHasher` an [`ImHashMap`](super::ImHashMap) uses unless told otherwise.
#[cfg(not(any(feature = "fxhash", feature = "ahash")))]
pub type DefaultHashBuilder = std::hash::BuildHasherDefault<std::collections::hash_map::DefaultHasher>;

#[cfg(test)]
mod tests {
    use super::DefaultHashBuilder;
    use rstest::rstest;
    use std::hash::BuildHasher;

    #[rstest]
    fn test_same_key_same_hash_across_builders() {
        let first = DefaultHashBuilder::default();
        let second = DefaultHashBuilder::default();
        assert_eq!(first.hash_one("key"), second.hash_one("key"));
        assert_eq!(first.hash_one(42_u64), second.hash_one(42_u64));
    }
}
