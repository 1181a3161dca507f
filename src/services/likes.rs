//! Likes request handling.
//!
//! A request moves through `Received -> Validated -> Delegated -> Responded`.
//! Validation failures end the request before the store is touched; store
//! failures still produce an outcome, flagged `success: false` and carrying
//! the best count the service knows.

use crate::models::{CounterSnapshot, LikeOutcome, LikeRequest};
use crate::storage::{CachedCounterStore, CounterStore};
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Instant;

/// Message returned to clients when a mutation could not be persisted.
pub const MUTATION_FAILED_MESSAGE: &str = "Failed to update like";

/// Stateless likes handler over a cached counter store.
#[derive(Clone)]
pub struct LikesService {
    store: Arc<CachedCounterStore<dyn CounterStore>>,
}

impl LikesService {
    /// Creates a service, wrapping `store` in a snapshot cache.
    #[must_use]
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self {
            store: Arc::new(CachedCounterStore::new(store)),
        }
    }

    /// Creates a service over an existing cached store.
    #[must_use]
    pub const fn with_cached_store(store: Arc<CachedCounterStore<dyn CounterStore>>) -> Self {
        Self { store }
    }

    /// Returns the cached store.
    #[must_use]
    pub const fn store(&self) -> &Arc<CachedCounterStore<dyn CounterStore>> {
        &self.store
    }

    /// Name of the backend behind the cache.
    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }

    /// Returns every count.
    ///
    /// Never fails: when the backend cannot be read this is the last known
    /// snapshot, or an empty one.
    #[must_use]
    pub fn snapshot(&self) -> CounterSnapshot {
        self.store.snapshot_or_fallback()
    }

    /// Validates and applies a like or unlike.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidInput`] if the request is malformed.
    /// Store failures are not errors; they yield an outcome with
    /// `success == false`.
    pub fn apply(&self, request: &LikeRequest) -> Result<LikeOutcome> {
        self.apply_with(request, None)
    }

    /// Like [`apply`](Self::apply), but the store never starts the write
    /// after `deadline`. A mutation abandoned that way is reported with the
    /// cached count and is guaranteed not to land later.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidInput`] if the request is malformed.
    pub fn apply_before(&self, request: &LikeRequest, deadline: Instant) -> Result<LikeOutcome> {
        self.apply_with(request, Some(deadline))
    }

    fn apply_with(&self, request: &LikeRequest, deadline: Option<Instant>) -> Result<LikeOutcome> {
        let (class_id, action) = request.validate()?;

        let result = match deadline {
            Some(deadline) => self.store.mutate_before(&class_id, action, deadline),
            None => self.store.mutate(&class_id, action),
        };

        match result {
            Ok(count) => {
                tracing::debug!(class_id = %class_id, %action, count, "Applied like action");
                Ok(LikeOutcome::applied(count))
            },
            Err(e) => {
                // Past the deadline only the cache is consulted.
                let count = if matches!(e, Error::DeadlineExceeded { .. }) {
                    self.store.cache().count(&class_id).unwrap_or(0)
                } else {
                    self.store.best_known_count(&class_id)
                };
                tracing::warn!(
                    class_id = %class_id,
                    %action,
                    backend = self.backend_name(),
                    error = %e,
                    retryable = e.is_retryable(),
                    best_known = count,
                    "Failed to apply like action"
                );
                Ok(LikeOutcome::failed(count, MUTATION_FAILED_MESSAGE))
            },
        }
    }
}
