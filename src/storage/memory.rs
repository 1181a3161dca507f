//! In-process counter store.
//!
//! Counts live in a mutex-guarded map and vanish when the process exits.
//! Meant for local development and tests, never for a deployment where
//! visitors expect their likes to stick.

use super::traits::CounterStore;
use crate::Result;
use crate::models::{ClassId, CounterSnapshot, LikeAction};
use std::sync::{Mutex, PoisonError};

/// Non-durable counter store backed by a `Mutex`.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    counters: Mutex<CounterSnapshot>,
}

impl MemoryCounterStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with `snapshot`.
    #[must_use]
    pub const fn with_snapshot(snapshot: CounterSnapshot) -> Self {
        Self {
            counters: Mutex::new(snapshot),
        }
    }
}

impl CounterStore for MemoryCounterStore {
    fn get_all(&self) -> Result<CounterSnapshot> {
        let counters = self
            .counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(counters.clone())
    }

    fn mutate(&self, class_id: &ClassId, action: LikeAction) -> Result<u64> {
        let mut counters = self
            .counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(counters.apply(class_id, action))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
