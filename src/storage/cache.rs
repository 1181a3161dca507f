//! Non-authoritative snapshot cache.
//!
//! [`CachedCounterStore`] wraps any backend and remembers the last snapshot
//! it saw, either from a successful read or patched by a successful mutation.
//! When the backend cannot be read, the wrapper serves that remembered
//! snapshot instead of failing, or an empty one if nothing was ever read.
//!
//! The cache is advisory only. It is never consulted for a mutation, never
//! written back to a backend, and may lag behind writes made by other
//! processes. Counts served from it are "last known", not "current".
//!
//! ```text
//! get_all ──► backend ok ──► remember ──► fresh snapshot
//!                │
//!                └─ error ──► warn ──► last known snapshot (or {})
//! ```

use super::traits::CounterStore;
use crate::Result;
use crate::models::{ClassId, CounterSnapshot, LikeAction};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

#[derive(Debug)]
struct CachedSnapshot {
    snapshot: CounterSnapshot,
    refreshed_at: Instant,
}

/// Last-known counts, shared by all requests of a process.
#[derive(Debug, Default)]
pub struct SnapshotCache {
    last: RwLock<Option<CachedSnapshot>>,
}

impl SnapshotCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the cached snapshot with one freshly read from a backend.
    pub fn remember(&self, snapshot: &CounterSnapshot) {
        let mut last = self.last.write().unwrap_or_else(PoisonError::into_inner);
        *last = Some(CachedSnapshot {
            snapshot: snapshot.clone(),
            refreshed_at: Instant::now(),
        });
    }

    /// Patches one class after a backend confirmed its new count.
    pub fn record(&self, class_id: &ClassId, count: u64) {
        let mut last = self.last.write().unwrap_or_else(PoisonError::into_inner);
        match last.as_mut() {
            Some(cached) => cached.snapshot.set(class_id.as_str(), count),
            None => {
                let mut snapshot = CounterSnapshot::new();
                snapshot.set(class_id.as_str(), count);
                *last = Some(CachedSnapshot {
                    snapshot,
                    refreshed_at: Instant::now(),
                });
            },
        }
    }

    /// Returns the last known snapshot, if any.
    #[must_use]
    pub fn last_known(&self) -> Option<CounterSnapshot> {
        let last = self.last.read().unwrap_or_else(PoisonError::into_inner);
        last.as_ref().map(|cached| cached.snapshot.clone())
    }

    /// Returns the last known count of one class, if any.
    #[must_use]
    pub fn count(&self, class_id: &ClassId) -> Option<u64> {
        let last = self.last.read().unwrap_or_else(PoisonError::into_inner);
        last.as_ref()
            .and_then(|cached| cached.snapshot.get(class_id.as_str()))
    }

    /// Time since the last full refresh from a backend.
    #[must_use]
    pub fn age(&self) -> Option<Duration> {
        let last = self.last.read().unwrap_or_else(PoisonError::into_inner);
        last.as_ref().map(|cached| cached.refreshed_at.elapsed())
    }
}

/// Counter store wrapper that absorbs read failures.
pub struct CachedCounterStore<S: CounterStore + ?Sized> {
    inner: Arc<S>,
    cache: SnapshotCache,
}

impl<S: CounterStore + ?Sized> CachedCounterStore<S> {
    /// Wraps a backend.
    #[must_use]
    pub fn new(inner: Arc<S>) -> Self {
        Self {
            inner,
            cache: SnapshotCache::new(),
        }
    }

    /// Returns the wrapped backend.
    #[must_use]
    pub const fn inner(&self) -> &Arc<S> {
        &self.inner
    }

    /// Returns the cache.
    #[must_use]
    pub const fn cache(&self) -> &SnapshotCache {
        &self.cache
    }

    /// Reads every counter, falling back to the cache on failure.
    ///
    /// Never fails. Backend errors are logged and counted.
    pub fn snapshot_or_fallback(&self) -> CounterSnapshot {
        let backend = self.inner.backend_name();
        match self.inner.get_all() {
            Ok(snapshot) => {
                self.cache.remember(&snapshot);
                record_metrics(backend, "get_all", "success");
                snapshot
            },
            Err(e) => {
                record_metrics(backend, "get_all", "error");
                let fallback = self.cache.last_known();
                tracing::warn!(
                    backend,
                    error = %e,
                    cached = fallback.is_some(),
                    cache_age_secs = self.cache.age().map(|age| age.as_secs()),
                    "Failed to read likes, serving last known counts"
                );
                fallback.unwrap_or_default()
            },
        }
    }

    /// Best count known for one class without touching the backend's write path.
    ///
    /// Tries a fresh read first and falls back to the cache, then to zero.
    pub fn best_known_count(&self, class_id: &ClassId) -> u64 {
        match self.inner.get_all() {
            Ok(snapshot) => {
                self.cache.remember(&snapshot);
                snapshot.count(class_id.as_str())
            },
            Err(e) => {
                tracing::debug!(error = %e, class_id = %class_id, "Using cached count");
                self.cache.count(class_id).unwrap_or(0)
            },
        }
    }
}

impl<S: CounterStore + ?Sized> CounterStore for CachedCounterStore<S> {
    fn get_all(&self) -> Result<CounterSnapshot> {
        Ok(self.snapshot_or_fallback())
    }

    fn mutate(&self, class_id: &ClassId, action: LikeAction) -> Result<u64> {
        self.record_mutation(class_id, action, self.inner.mutate(class_id, action))
    }

    fn mutate_before(
        &self,
        class_id: &ClassId,
        action: LikeAction,
        deadline: Instant,
    ) -> Result<u64> {
        let result = self.inner.mutate_before(class_id, action, deadline);
        self.record_mutation(class_id, action, result)
    }

    fn migrate(&self) -> Result<usize> {
        self.inner.migrate()
    }

    fn backend_name(&self) -> &'static str {
        self.inner.backend_name()
    }
}

impl<S: CounterStore + ?Sized> CachedCounterStore<S> {
    fn record_mutation(
        &self,
        class_id: &ClassId,
        action: LikeAction,
        result: Result<u64>,
    ) -> Result<u64> {
        let backend = self.inner.backend_name();
        match result {
            Ok(count) => {
                self.cache.record(class_id, count);
                record_metrics(backend, "mutate", "success");
                metrics::counter!("likes_mutations_total", "action" => action.as_str())
                    .increment(1);
                Ok(count)
            },
            Err(e) => {
                record_metrics(backend, "mutate", "error");
                Err(e)
            },
        }
    }
}

fn record_metrics(backend: &'static str, operation: &'static str, status: &'static str) {
    metrics::counter!(
        "likes_store_requests_total",
        "backend" => backend,
        "operation" => operation,
        "status" => status
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::storage::MemoryCounterStore;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Backend that can be switched into a failing state.
    struct FlakyStore {
        inner: MemoryCounterStore,
        down: AtomicBool,
    }

    impl FlakyStore {
        fn new() -> Self {
            Self {
                inner: MemoryCounterStore::new(),
                down: AtomicBool::new(false),
            }
        }

        fn check(&self) -> Result<()> {
            if self.down.load(Ordering::SeqCst) {
                Err(Error::operation("flaky", "connection refused"))
            } else {
                Ok(())
            }
        }
    }

    impl CounterStore for FlakyStore {
        fn get_all(&self) -> Result<CounterSnapshot> {
            self.check()?;
            self.inner.get_all()
        }

        fn mutate(&self, class_id: &ClassId, action: LikeAction) -> Result<u64> {
            self.check()?;
            self.inner.mutate(class_id, action)
        }

        fn backend_name(&self) -> &'static str {
            "flaky"
        }
    }

    #[test]
    fn test_read_failure_without_cache_returns_empty() {
        let backend = Arc::new(FlakyStore::new());
        backend.down.store(true, Ordering::SeqCst);
        let store = CachedCounterStore::new(backend);

        assert!(store.get_all().unwrap().is_empty());
    }

    #[test]
    fn test_read_failure_serves_last_known_snapshot() {
        let backend = Arc::new(FlakyStore::new());
        let store = CachedCounterStore::new(Arc::clone(&backend));
        let id = ClassId::new("2");

        store.mutate(&id, LikeAction::Like).unwrap();
        store.mutate(&id, LikeAction::Like).unwrap();
        assert_eq!(store.get_all().unwrap().count("2"), 2);

        backend.down.store(true, Ordering::SeqCst);
        assert_eq!(store.get_all().unwrap().count("2"), 2);
        assert_eq!(store.best_known_count(&id), 2);
    }

    #[test]
    fn test_mutation_failure_propagates_and_leaves_cache_alone() {
        let backend = Arc::new(FlakyStore::new());
        let store = CachedCounterStore::new(Arc::clone(&backend));
        let id = ClassId::new("2");
        store.mutate(&id, LikeAction::Like).unwrap();

        backend.down.store(true, Ordering::SeqCst);
        assert!(store.mutate(&id, LikeAction::Like).is_err());
        assert_eq!(store.cache().count(&id), Some(1));
    }

    #[test]
    fn test_expired_deadline_passes_through_and_leaves_cache_alone() {
        let backend = Arc::new(FlakyStore::new());
        let store = CachedCounterStore::new(Arc::clone(&backend));
        let id = ClassId::new("2");
        store.mutate(&id, LikeAction::Like).unwrap();

        let err = store
            .mutate_before(&id, LikeAction::Like, Instant::now())
            .unwrap_err();
        assert!(matches!(err, Error::DeadlineExceeded { .. }));
        assert_eq!(store.cache().count(&id), Some(1));
        assert_eq!(backend.inner.get_all().unwrap().count("2"), 1);
    }

    #[test]
    fn test_record_without_prior_snapshot() {
        let cache = SnapshotCache::new();
        assert!(cache.last_known().is_none());
        assert!(cache.age().is_none());

        cache.record(&ClassId::new("5"), 3);
        assert_eq!(cache.count(&ClassId::new("5")), Some(3));
        assert_eq!(cache.last_known().unwrap().len(), 1);
    }
}
