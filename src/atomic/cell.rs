#![allow(unsafe_code)]
//! Lock-free compare-and-swap cell for persistent values.
//!
//! This module provides [`Ref<T>`], a single atomically replaceable slot.
//! Writers read the current value, build a replacement from it, and publish
//! the replacement with one compare-and-swap. A writer that loses the race
//! rereads and tries again, up to a fixed retry budget.
//!
//! # Memory reclamation
//!
//! Readers may still look at a value after a writer replaced it. Replaced
//! values are therefore handed to `crossbeam_epoch` and destroyed once every
//! thread that could have observed them has unpinned.
//!
//! # Examples
//!
//! ```rust
//! use immap::atomic::Ref;
//! use immap::persistent::ImMap;
//!
//! let shared = Ref::new(ImMap::new());
//! shared.swap(|map| map.add_or_update(1, "one")).unwrap();
//! shared.swap(|map| map.add_or_update(2, "two")).unwrap();
//!
//! assert_eq!(shared.value().count(), 2);
//! ```

use std::fmt;
use std::mem::ManuallyDrop;
use std::sync::atomic::Ordering;

use crossbeam_epoch::{self as epoch, Atomic, Owned};

/// Number of attempts [`Ref::swap`] makes before giving up.
pub const DEFAULT_RETRY_BUDGET: usize = 50;

// =============================================================================
// Error Type
// =============================================================================

/// Error returned when [`Ref::swap`] cannot publish its update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapError {
    /// Every attempt lost the race against a concurrent writer.
    ///
    /// Sustained failure usually means pathological contention or an update
    /// function that writes to the same cell it is updating.
    RetryBudgetExceeded {
        /// Number of compare-and-swap attempts made.
        attempts: usize,
    },
}

impl fmt::Display for SwapError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RetryBudgetExceeded { attempts } => write!(
                formatter,
                "Ref: update not published after {attempts} compare-and-swap attempts"
            ),
        }
    }
}

impl std::error::Error for SwapError {}

// =============================================================================
// Ref Definition
// =============================================================================

/// A lock-free cell holding one value that is replaced as a whole.
///
/// `Ref` is meant for cheap-to-clone persistent values such as
/// [`ImMap`](crate::persistent::ImMap) and
/// [`ImHashMap`](crate::persistent::ImHashMap): an update builds a complete
/// new value before publishing it, so readers always see a consistent value.
///
/// Each successful compare-and-swap is a linearization point.
///
/// # Examples
///
/// ```rust
/// use immap::atomic::Ref;
/// use immap::persistent::ImHashMap;
/// use std::sync::Arc;
/// use std::thread;
///
/// let shared = Arc::new(Ref::new(ImHashMap::new()));
/// let handles: Vec<_> = (0..4)
///     .map(|thread_id| {
///         let shared = Arc::clone(&shared);
///         thread::spawn(move || {
///             for index in 0..10 {
///                 let key = thread_id * 10 + index;
///                 shared.swap(|map| map.add_or_update(key, index)).unwrap();
///             }
///         })
///     })
///     .collect();
/// for handle in handles {
///     handle.join().unwrap();
/// }
/// assert_eq!(shared.value().count(), 40);
/// ```
pub struct Ref<T> {
    value: Atomic<T>,
    retry_budget: usize,
}

impl<T> Ref<T> {
    /// Creates a cell holding `value` with [`DEFAULT_RETRY_BUDGET`].
    #[must_use]
    pub fn new(value: T) -> Self {
        Self::with_retry_budget(value, DEFAULT_RETRY_BUDGET)
    }

    /// Creates a cell holding `value` whose [`swap`](Self::swap) makes at
    /// most `retry_budget` attempts.
    ///
    /// # Panics
    ///
    /// Panics if `retry_budget` is zero.
    #[must_use]
    pub fn with_retry_budget(value: T, retry_budget: usize) -> Self {
        assert!(retry_budget > 0, "Ref: retry budget must be at least 1");
        Self {
            value: Atomic::new(value),
            retry_budget,
        }
    }

    /// Returns the maximum number of attempts of [`swap`](Self::swap).
    #[inline]
    #[must_use]
    pub const fn retry_budget(&self) -> usize {
        self.retry_budget
    }

    /// Returns a clone of the current value.
    #[must_use]
    pub fn value(&self) -> T
    where
        T: Clone,
    {
        self.with_value(T::clone)
    }

    /// Calls `reader` with the current value and returns its result.
    ///
    /// Unlike [`value`](Self::value) this does not clone the value. Writers
    /// are never blocked by a running reader.
    pub fn with_value<R, F>(&self, reader: F) -> R
    where
        F: FnOnce(&T) -> R,
    {
        let guard = epoch::pin();
        let current = self.value.load(Ordering::Acquire, &guard);
        // SAFETY: the slot is initialized in the constructor and only ever
        // replaced by non-null pointers. The guard keeps the pointee alive
        // until it is dropped at the end of this function.
        reader(unsafe { current.deref() })
    }

    /// Consumes the cell and returns its value.
    #[must_use]
    pub fn into_inner(self) -> T {
        let this = ManuallyDrop::new(self);
        // SAFETY: `self` is owned, so no other thread can access the slot.
        // `ManuallyDrop` prevents the destructor from freeing the value a
        // second time.
        unsafe {
            let current = this.value.load(Ordering::Relaxed, epoch::unprotected());
            *current.into_owned().into_box()
        }
    }
}

impl<T: Send + 'static> Ref<T> {
    /// Replaces the value with `update(current)`, retrying on contention.
    ///
    /// `update` may run several times and must not have side effects beyond
    /// computing the replacement. Returns the value that was replaced.
    ///
    /// # Errors
    ///
    /// Returns [`SwapError::RetryBudgetExceeded`] when every one of
    /// [`retry_budget`](Self::retry_budget) attempts lost the race. The cell
    /// then still holds a value written by some other writer.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use immap::atomic::Ref;
    ///
    /// let counter = Ref::new(1);
    /// let previous = counter.swap(|value| value + 1).unwrap();
    /// assert_eq!(previous, 1);
    /// assert_eq!(counter.value(), 2);
    /// ```
    pub fn swap<F>(&self, mut update: F) -> Result<T, SwapError>
    where
        F: FnMut(&T) -> T,
        T: Clone,
    {
        let guard = epoch::pin();
        let mut current = self.value.load(Ordering::Acquire, &guard);
        for attempt in 1..=self.retry_budget {
            // SAFETY: non-null, and protected by `guard` (see `with_value`).
            let value = unsafe { current.deref() };
            let candidate = Owned::new(update(value));
            match self.value.compare_exchange(
                current,
                candidate,
                Ordering::AcqRel,
                Ordering::Acquire,
                &guard,
            ) {
                Ok(_) => {
                    let previous = value.clone();
                    // SAFETY: `current` is no longer reachable from the slot.
                    // Threads that loaded it before the exchange are pinned,
                    // so destruction waits for them.
                    unsafe { guard.defer_destroy(current) };
                    return Ok(previous);
                }
                Err(lost) => {
                    log::trace!(
                        "Ref::swap attempt {attempt}/{} lost the race, retrying",
                        self.retry_budget
                    );
                    current = lost.current;
                }
            }
        }
        log::warn!(
            "Ref::swap gave up after {} attempts under contention",
            self.retry_budget
        );
        Err(SwapError::RetryBudgetExceeded {
            attempts: self.retry_budget,
        })
    }

    /// Makes a single attempt to replace the value with `update(current)`.
    ///
    /// Returns the replaced value on success and `None` if another writer
    /// got in first. Never retries.
    pub fn compare_and_swap_once<F>(&self, update: F) -> Option<T>
    where
        F: FnOnce(&T) -> T,
        T: Clone,
    {
        let guard = epoch::pin();
        let current = self.value.load(Ordering::Acquire, &guard);
        // SAFETY: non-null, and protected by `guard` (see `with_value`).
        let value = unsafe { current.deref() };
        let candidate = Owned::new(update(value));
        self.value
            .compare_exchange(
                current,
                candidate,
                Ordering::AcqRel,
                Ordering::Acquire,
                &guard,
            )
            .ok()
            .map(|_| {
                let previous = value.clone();
                // SAFETY: same reasoning as in `swap`.
                unsafe { guard.defer_destroy(current) };
                previous
            })
    }

    /// Unconditionally replaces the value and returns the previous one.
    pub fn exchange(&self, value: T) -> T
    where
        T: Clone,
    {
        let guard = epoch::pin();
        let previous = self
            .value
            .swap(Owned::new(value), Ordering::AcqRel, &guard);
        // SAFETY: the slot never holds null, and `previous` was just
        // unlinked while `guard` is pinned.
        unsafe {
            let result = previous.deref().clone();
            guard.defer_destroy(previous);
            result
        }
    }
}

impl<T> Drop for Ref<T> {
    fn drop(&mut self) {
        // SAFETY: `&mut self` rules out concurrent access, and values
        // replaced earlier were handed to the collector, so the current
        // value is owned by this cell alone.
        unsafe {
            let current = self.value.load(Ordering::Relaxed, epoch::unprotected());
            drop(current.into_owned());
        }
    }
}

impl<T: Default> Default for Ref<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: fmt::Debug> fmt::Debug for Ref<T> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.with_value(|value| {
            formatter
                .debug_struct("Ref")
                .field("value", value)
                .field("retry_budget", &self.retry_budget)
                .finish()
        })
    }
}

static_assertions::assert_impl_all!(Ref<crate::persistent::ImMap<String>>: Send, Sync);
static_assertions::assert_not_impl_any!(Ref<std::rc::Rc<i32>>: Send, Sync);

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::cell::Cell;
    use std::sync::Arc;

    #[rstest]
    fn test_value_and_default_budget() {
        let cell = Ref::new(7);
        assert_eq!(cell.value(), 7);
        assert_eq!(cell.retry_budget(), DEFAULT_RETRY_BUDGET);
        assert_eq!(cell.with_value(|value| value * 2), 14);
    }

    #[rstest]
    fn test_swap_returns_previous_value() {
        let cell = Ref::new(String::from("a"));
        let previous = cell.swap(|value| format!("{value}b"));
        assert_eq!(previous, Ok(String::from("a")));
        assert_eq!(cell.value(), "ab");
    }

    #[rstest]
    fn test_swap_fails_past_budget_when_update_races_itself() {
        let cell = Ref::with_retry_budget(0, 3);
        let calls = Cell::new(0);
        let result = cell.swap(|value| {
            calls.set(calls.get() + 1);
            // Writing to the same cell invalidates the value being updated.
            cell.exchange(value + 100);
            value + 1
        });
        assert_eq!(result, Err(SwapError::RetryBudgetExceeded { attempts: 3 }));
        assert_eq!(calls.get(), 3);
        assert_eq!(cell.value(), 300);
    }

    #[rstest]
    fn test_swap_succeeds_after_losing_once() {
        let cell = Ref::new(0);
        let raced = Cell::new(false);
        let result = cell.swap(|value| {
            if !raced.replace(true) {
                cell.exchange(10);
            }
            value + 1
        });
        assert_eq!(result, Ok(10));
        assert_eq!(cell.value(), 11);
    }

    #[rstest]
    fn test_compare_and_swap_once() {
        let cell = Ref::new(1);
        assert_eq!(cell.compare_and_swap_once(|value| value + 1), Some(1));
        assert_eq!(cell.value(), 2);

        let lost = cell.compare_and_swap_once(|value| {
            cell.exchange(50);
            value + 1
        });
        assert_eq!(lost, None);
        assert_eq!(cell.value(), 50);
    }

    #[rstest]
    fn test_exchange_and_into_inner() {
        let cell = Ref::new(vec![1]);
        assert_eq!(cell.exchange(vec![2, 3]), vec![1]);
        assert_eq!(cell.into_inner(), vec![2, 3]);
    }

    #[rstest]
    fn test_drop_releases_current_value() {
        let tracked = Arc::new(());
        let cell = Ref::new(Arc::clone(&tracked));
        assert_eq!(Arc::strong_count(&tracked), 2);
        drop(cell);
        assert_eq!(Arc::strong_count(&tracked), 1);
    }

    #[rstest]
    #[should_panic(expected = "retry budget")]
    fn test_zero_budget_panics() {
        let _ = Ref::with_retry_budget(0, 0);
    }

    #[rstest]
    fn test_error_display() {
        let error = SwapError::RetryBudgetExceeded { attempts: 50 };
        assert_eq!(
            error.to_string(),
            "Ref: update not published after 50 compare-and-swap attempts"
        );
    }
}
