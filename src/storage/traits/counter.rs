//! Counter store trait.

use crate::models::{ClassId, CounterSnapshot, LikeAction};
use crate::{Error, Result};
use std::time::Instant;

/// Trait for like-counter backends.
///
/// Counter stores are the authoritative source of truth for like counts.
/// Every implementation must make [`mutate`](Self::mutate) atomic per class:
/// two concurrent calls for the same class may never both observe the same
/// starting value and overwrite each other's result.
///
/// Calls are synchronous and may block on I/O. Async callers should run them
/// on a blocking thread pool.
pub trait CounterStore: Send + Sync {
    /// Returns every known class and its count.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read. Corrupt data that the
    /// backend can repair on its own is not an error.
    fn get_all(&self) -> Result<CounterSnapshot>;

    /// Applies `action` to the counter of `class_id` and returns the new count.
    ///
    /// Unknown classes start at zero. `Unlike` never takes a counter below zero.
    ///
    /// # Errors
    ///
    /// Returns an error if the change could not be persisted. An error means
    /// the caller must not assume the change took effect.
    fn mutate(&self, class_id: &ClassId, action: LikeAction) -> Result<u64>;

    /// Like [`mutate`](Self::mutate), but never starts a write after `deadline`.
    ///
    /// Backends whose mutations can wait (on a lock, on retries) check the
    /// deadline again right before their final write. A write that has
    /// started may still complete after the deadline, bounded by the
    /// backend's own call timeout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeadlineExceeded`] if the deadline passed before the
    /// write began, which guarantees the change was not and will not be
    /// applied. Otherwise as [`mutate`](Self::mutate).
    fn mutate_before(
        &self,
        class_id: &ClassId,
        action: LikeAction,
        deadline: Instant,
    ) -> Result<u64> {
        check_deadline("mutate", deadline)?;
        self.mutate(class_id, action)
    }

    /// Copies counters from an older storage layout, if the backend has one.
    ///
    /// Returns the number of counters copied. Must never drop existing data.
    ///
    /// # Errors
    ///
    /// Returns an error if the legacy data exists but cannot be copied.
    fn migrate(&self) -> Result<usize> {
        Ok(0)
    }

    /// Short name used in logs and metrics.
    fn backend_name(&self) -> &'static str;
}

/// Fails with [`Error::DeadlineExceeded`] once `deadline` has passed.
///
/// # Errors
///
/// Returns [`Error::DeadlineExceeded`] when `Instant::now() >= deadline`.
pub fn check_deadline(operation: &str, deadline: Instant) -> Result<()> {
    if Instant::now() >= deadline {
        Err(Error::deadline_exceeded(operation))
    } else {
        Ok(())
    }
}
