//! Versioned document counter store.
//!
//! For stores that hold the whole snapshot as one document and offer no
//! atomic increment, only a conditional write keyed on a version tag
//! (an HTTP `ETag`, for example). Each mutation runs an optimistic loop:
//!
//! 1. read the document and its version
//! 2. apply the delta to the freshly read count
//! 3. write back on the condition that the version did not change
//! 4. on a conflict or a transient failure, back off and start over
//!
//! The loop is bounded by [`RetryPolicy::max_attempts`]. When attempts run
//! out the mutation fails with [`Error::Conflict`] or the last transient
//! error; a lost write is never reported as applied.
//!
//! [`CounterStore::mutate_before`] also bounds it in time: the deadline is
//! checked before each fetch and again before each conditional write, and
//! backoff sleeps never run past it.

mod http;

pub use http::HttpDocumentClient;

use super::traits::{CounterStore, check_deadline};
use crate::models::{ClassId, CounterSnapshot, LikeAction};
use crate::{Error, Result};
use std::time::{Duration, Instant};

/// A snapshot together with the version it was read at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionedDocument {
    /// Counts held by the document.
    pub snapshot: CounterSnapshot,
    /// Version tag; `None` when the document does not exist yet.
    pub version: Option<String>,
}

/// Result of a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The document was replaced.
    Written,
    /// The document changed since it was read.
    Conflict,
}

/// Transport for a versioned document.
pub trait DocumentClient: Send + Sync {
    /// Reads the document. A missing document is an empty snapshot with no
    /// version.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be fetched.
    fn fetch(&self) -> Result<VersionedDocument>;

    /// Replaces the document if it is still at `expected_version`.
    ///
    /// `None` means "only if the document does not exist".
    ///
    /// # Errors
    ///
    /// Returns an error for failures other than a version conflict.
    fn store(
        &self,
        snapshot: &CounterSnapshot,
        expected_version: Option<&str>,
    ) -> Result<WriteOutcome>;

    /// Client name for logs.
    fn name(&self) -> &'static str;
}

/// Bounds for the optimistic write loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Backoff unit; attempt `n` waits `n * backoff` before retrying.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Duration::from_millis(25),
        }
    }
}

impl RetryPolicy {
    /// Sets the attempt bound (at least one).
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = if max_attempts == 0 { 1 } else { max_attempts };
        self
    }

    /// Sets the backoff unit.
    #[must_use]
    pub const fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    fn delay(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(attempt)
    }
}

/// Counter store over a versioned document.
pub struct DocumentCounterStore<C: DocumentClient> {
    client: C,
    policy: RetryPolicy,
}

impl<C: DocumentClient> DocumentCounterStore<C> {
    /// Creates a store with the default retry policy.
    #[must_use]
    pub fn new(client: C) -> Self {
        Self::with_policy(client, RetryPolicy::default())
    }

    /// Creates a store with a custom retry policy.
    #[must_use]
    pub const fn with_policy(client: C, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    /// Returns the underlying client.
    #[must_use]
    pub const fn client(&self) -> &C {
        &self.client
    }

    /// Returns the retry policy.
    #[must_use]
    pub const fn policy(&self) -> RetryPolicy {
        self.policy
    }

    fn attempt(
        &self,
        class_id: &ClassId,
        action: LikeAction,
        deadline: Option<Instant>,
    ) -> Result<Option<u64>> {
        let VersionedDocument {
            mut snapshot,
            version,
        } = self.client.fetch()?;
        let next = snapshot.apply(class_id, action);

        if let Some(deadline) = deadline {
            check_deadline("document_store", deadline)?;
        }

        match self.client.store(&snapshot, version.as_deref()) {
            Ok(WriteOutcome::Written) => Ok(Some(next)),
            Ok(WriteOutcome::Conflict) => Ok(None),
            // A timed out write may have landed; repeating it could apply the
            // delta twice.
            Err(Error::Timeout {
                operation,
                timeout_ms,
            }) => Err(Error::operation(
                operation,
                format!("write outcome unknown after {timeout_ms}ms"),
            )),
            Err(e) => Err(e),
        }
    }

    fn run(&self, class_id: &ClassId, action: LikeAction, deadline: Option<Instant>) -> Result<u64> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            if let Some(deadline) = deadline {
                check_deadline("document_fetch", deadline)?;
            }

            match self.attempt(class_id, action, deadline) {
                Ok(Some(count)) => {
                    if attempt > 1 {
                        tracing::debug!(
                            class_id = %class_id,
                            attempt,
                            "Conditional write succeeded after retry"
                        );
                    }
                    return Ok(count);
                },
                Ok(None) => {
                    last_error = Some(Error::Conflict {
                        class_id: class_id.to_string(),
                        attempts: attempt,
                    });
                },
                Err(e) if e.is_retryable() => last_error = Some(e),
                Err(e) => return Err(e),
            }

            metrics::counter!(
                "likes_store_retries_total",
                "backend" => self.client.name()
            )
            .increment(1);

            if attempt < max_attempts {
                let mut delay = self.policy.delay(attempt);
                if let Some(deadline) = deadline {
                    delay = delay.min(deadline.saturating_duration_since(Instant::now()));
                }
                tracing::debug!(
                    class_id = %class_id,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Retrying conditional write"
                );
                std::thread::sleep(delay);
            }
        }

        let err = last_error.unwrap_or(Error::Conflict {
            class_id: class_id.to_string(),
            attempts: max_attempts,
        });
        tracing::warn!(
            class_id = %class_id,
            attempts = max_attempts,
            error = %err,
            "Giving up on conditional write"
        );
        Err(err)
    }
}

impl<C: DocumentClient> CounterStore for DocumentCounterStore<C> {
    fn get_all(&self) -> Result<CounterSnapshot> {
        self.client.fetch().map(|document| document.snapshot)
    }

    fn mutate(&self, class_id: &ClassId, action: LikeAction) -> Result<u64> {
        self.run(class_id, action, None)
    }

    fn mutate_before(
        &self,
        class_id: &ClassId,
        action: LikeAction,
        deadline: Instant,
    ) -> Result<u64> {
        self.run(class_id, action, Some(deadline))
    }

    fn backend_name(&self) -> &'static str {
        self.client.name()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
    use std::sync::{Arc, Mutex};
    use std::thread;

    /// In-memory document with a numeric version counter.
    #[derive(Default)]
    pub(crate) struct FakeDocumentClient {
        state: Mutex<(CounterSnapshot, u64)>,
        /// Writes an unrelated update before this many upcoming stores.
        pub(crate) interfere: AtomicU32,
        /// Fails this many upcoming fetches with a transient error.
        pub(crate) flaky_fetches: AtomicU32,
        /// Delay added to every fetch.
        pub(crate) fetch_delay_ms: AtomicU64,
        pub(crate) stores: AtomicU32,
    }

    impl FakeDocumentClient {
        pub(crate) fn with_counts(entries: &[(&str, u64)]) -> Self {
            let snapshot = entries
                .iter()
                .map(|(id, count)| ((*id).to_string(), *count))
                .collect();
            Self {
                state: Mutex::new((snapshot, 1)),
                ..Self::default()
            }
        }

        fn version_tag(version: u64) -> Option<String> {
            (version > 0).then(|| format!("v{version}"))
        }

        fn take(counter: &AtomicU32) -> bool {
            counter
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        }
    }

    impl DocumentClient for FakeDocumentClient {
        fn fetch(&self) -> Result<VersionedDocument> {
            let delay = self.fetch_delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                thread::sleep(Duration::from_millis(delay));
            }
            if Self::take(&self.flaky_fetches) {
                return Err(Error::operation("fake_fetch", "unexpected status 503"));
            }
            let state = self.state.lock().unwrap();
            Ok(VersionedDocument {
                snapshot: state.0.clone(),
                version: Self::version_tag(state.1),
            })
        }

        fn store(
            &self,
            snapshot: &CounterSnapshot,
            expected_version: Option<&str>,
        ) -> Result<WriteOutcome> {
            self.stores.fetch_add(1, Ordering::SeqCst);
            let mut state = self.state.lock().unwrap();
            if Self::take(&self.interfere) {
                state.0.apply(&ClassId::new("1"), LikeAction::Like);
                state.1 += 1;
            }
            if Self::version_tag(state.1).as_deref() != expected_version {
                return Ok(WriteOutcome::Conflict);
            }
            state.0 = snapshot.clone();
            state.1 += 1;
            Ok(WriteOutcome::Written)
        }

        fn name(&self) -> &'static str {
            "fake-document"
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::default().with_backoff(Duration::from_millis(1))
    }

    #[test]
    fn test_mutate_creates_missing_document() {
        let store = DocumentCounterStore::with_policy(FakeDocumentClient::default(), fast_policy());
        assert_eq!(store.mutate(&"5".into(), LikeAction::Like).unwrap(), 1);
        assert_eq!(store.get_all().unwrap().count("5"), 1);
    }

    #[test]
    fn test_conflict_retry_applies_delta_to_fresh_value() {
        let client = FakeDocumentClient::with_counts(&[("1", 10)]);
        client.interfere.store(1, Ordering::SeqCst);
        let store = DocumentCounterStore::with_policy(client, fast_policy());

        // The interfering writer moved 10 to 11; the retry must build on 11.
        assert_eq!(store.mutate(&"1".into(), LikeAction::Like).unwrap(), 12);
        assert_eq!(store.get_all().unwrap().count("1"), 12);
        assert_eq!(store.client().stores.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_exhausted_retries_return_conflict() {
        let client = FakeDocumentClient::with_counts(&[("1", 3)]);
        client.interfere.store(u32::MAX, Ordering::SeqCst);
        let policy = fast_policy().with_max_attempts(3);
        let store = DocumentCounterStore::with_policy(client, policy);

        let err = store.mutate(&"2".into(), LikeAction::Like).unwrap_err();
        assert!(matches!(err, Error::Conflict { attempts: 3, .. }));
        assert_eq!(store.client().stores.load(Ordering::SeqCst), 3);
        assert_eq!(store.get_all().unwrap().get("2"), None);
    }

    #[test]
    fn test_transient_fetch_failure_is_retried() {
        let client = FakeDocumentClient::default();
        client.flaky_fetches.store(2, Ordering::SeqCst);
        let store = DocumentCounterStore::with_policy(client, fast_policy());

        assert_eq!(store.mutate(&"1".into(), LikeAction::Like).unwrap(), 1);
    }

    #[test]
    fn test_unlike_clamps_at_zero() {
        let store = DocumentCounterStore::with_policy(
            FakeDocumentClient::with_counts(&[("1", 0)]),
            fast_policy(),
        );
        assert_eq!(store.mutate(&"1".into(), LikeAction::Unlike).unwrap(), 0);
    }

    #[test]
    fn test_concurrent_likes_are_not_lost() {
        let policy = RetryPolicy::default()
            .with_max_attempts(500)
            .with_backoff(Duration::from_micros(50));
        let store = Arc::new(DocumentCounterStore::with_policy(
            FakeDocumentClient::default(),
            policy,
        ));

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || store.mutate(&ClassId::new("x"), LikeAction::Like))
            })
            .collect();

        for handle in handles {
            handle.join().unwrap().unwrap();
        }
        assert_eq!(store.get_all().unwrap().count("x"), 50);
    }

    #[test]
    fn test_mutate_before_with_time_left_applies() {
        let store = DocumentCounterStore::with_policy(
            FakeDocumentClient::with_counts(&[("1", 4)]),
            fast_policy(),
        );
        let deadline = Instant::now() + Duration::from_secs(5);

        assert_eq!(
            store
                .mutate_before(&"1".into(), LikeAction::Like, deadline)
                .unwrap(),
            5
        );
    }

    #[test]
    fn test_deadline_passing_during_fetch_skips_the_write() {
        let client = FakeDocumentClient::with_counts(&[("1", 4)]);
        client.fetch_delay_ms.store(60, Ordering::SeqCst);
        let store = DocumentCounterStore::with_policy(client, fast_policy());
        let deadline = Instant::now() + Duration::from_millis(20);

        let err = store
            .mutate_before(&"1".into(), LikeAction::Like, deadline)
            .unwrap_err();

        assert!(matches!(err, Error::DeadlineExceeded { .. }));
        assert_eq!(store.client().stores.load(Ordering::SeqCst), 0);
        store.client().fetch_delay_ms.store(0, Ordering::SeqCst);
        assert_eq!(store.get_all().unwrap().count("1"), 4);
    }

    #[test]
    fn test_deadline_stops_conflict_retries() {
        let client = FakeDocumentClient::with_counts(&[("1", 3)]);
        client.interfere.store(u32::MAX, Ordering::SeqCst);
        let policy = RetryPolicy::default()
            .with_max_attempts(10_000)
            .with_backoff(Duration::from_millis(5));
        let store = DocumentCounterStore::with_policy(client, policy);
        let started = Instant::now();

        let err = store
            .mutate_before(
                &"2".into(),
                LikeAction::Like,
                started + Duration::from_millis(40),
            )
            .unwrap_err();

        assert!(matches!(err, Error::DeadlineExceeded { .. }));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(store.client().stores.load(Ordering::SeqCst) < 10_000);
        assert_eq!(store.get_all().unwrap().get("2"), None);
    }

    #[test]
    fn test_policy_never_drops_below_one_attempt() {
        assert_eq!(RetryPolicy::default().with_max_attempts(0).max_attempts, 1);
    }
}
