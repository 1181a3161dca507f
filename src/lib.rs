//! # class-likes
//!
//! Shared like counters for a weekly class schedule.
//!
//! Visitors of the schedule page like or unlike individual class sessions.
//! Counts are shared by every visitor, survive restarts and deployments, and
//! stay consistent while many anonymous clients write at the same time.
//!
//! ## Layers
//!
//! - **Storage**: the [`CounterStore`] trait with interchangeable backends
//!   (in-memory, JSON file, atomic Redis hash, versioned HTTP document)
//! - **Services**: request validation and backend selection
//! - **Server**: the axum HTTP surface (`GET /likes`, `POST /likes`)
//!
//! ## Example
//!
//! ```rust
//! use class_likes::{CounterStore, LikeAction, MemoryCounterStore};
//!
//! let store = MemoryCounterStore::new();
//! store.mutate(&"42".into(), LikeAction::Like)?;
//! assert_eq!(store.get_all()?.count("42"), 1);
//! # Ok::<(), class_likes::Error>(())
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

pub mod config;
pub mod models;
pub mod observability;
pub mod server;
pub mod services;
pub mod storage;

pub use config::{BackendKind, LikesConfig};
pub use models::{ClassId, CounterSnapshot, LikeAction, LikeOutcome, LikeRequest};
pub use services::{BackendFactory, LikesService};
pub use storage::{
    CachedCounterStore, CounterStore, DocumentCounterStore, FileCounterStore, HashCounterStore,
    MemoryCounterStore,
};

/// Error type for like-counter operations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `InvalidInput` | Missing `classId`/`action`, unknown action, malformed JSON body |
/// | `OperationFailed` | File I/O errors, remote store errors, malformed remote replies |
/// | `Conflict` | Optimistic writes kept losing against concurrent writers |
/// | `Timeout` | A store call exceeded its deadline |
/// | `DeadlineExceeded` | A mutation was not started because the request deadline passed |
/// | `FeatureNotEnabled` | Selecting a backend whose Cargo feature is off |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An operation failed.
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// A conditional write was rejected on every attempt.
    #[error("write conflict on '{class_id}' persisted after {attempts} attempts")]
    Conflict {
        /// Class whose counter could not be written.
        class_id: String,
        /// Number of attempts made.
        attempts: u32,
    },

    /// A store call did not finish in time.
    #[error("operation '{operation}' timed out after {timeout_ms}ms")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The deadline that elapsed.
        timeout_ms: u64,
    },

    /// The caller's deadline passed before the store began writing.
    ///
    /// Nothing was written, and nothing will be.
    #[error("operation '{operation}' not started: request deadline passed")]
    DeadlineExceeded {
        /// The operation that was abandoned.
        operation: String,
    },

    /// Feature not enabled (requires feature flag).
    #[error("feature not enabled: {0} (compile with --features {0})")]
    FeatureNotEnabled(String),
}

impl Error {
    /// Shorthand for [`Error::OperationFailed`].
    pub fn operation(operation: impl Into<String>, cause: impl ToString) -> Self {
        Self::OperationFailed {
            operation: operation.into(),
            cause: cause.to_string(),
        }
    }

    /// Shorthand for [`Error::DeadlineExceeded`].
    pub fn deadline_exceeded(operation: impl Into<String>) -> Self {
        Self::DeadlineExceeded {
            operation: operation.into(),
        }
    }

    /// Returns true if repeating the call against fresh data may succeed.
    ///
    /// Conflicts and timeouts always qualify. Other operation failures
    /// qualify when the cause looks like a transient transport problem.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Conflict { .. } | Self::Timeout { .. } => true,
            Self::OperationFailed { cause, .. } => {
                let cause = cause.to_lowercase();
                [
                    "timed out",
                    "timeout",
                    "connection",
                    "temporarily unavailable",
                    "status 5",
                ]
                .iter()
                .any(|needle| cause.contains(needle))
            },
            Self::InvalidInput(_) | Self::DeadlineExceeded { .. } | Self::FeatureNotEnabled(_) => {
                false
            },
        }
    }
}

/// Result type alias for like-counter operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidInput("Missing classId or action".to_string());
        assert_eq!(err.to_string(), "invalid input: Missing classId or action");

        let err = Error::operation("read_likes_file", "permission denied");
        assert_eq!(
            err.to_string(),
            "operation 'read_likes_file' failed: permission denied"
        );

        let err = Error::Conflict {
            class_id: "7".to_string(),
            attempts: 5,
        };
        assert_eq!(
            err.to_string(),
            "write conflict on '7' persisted after 5 attempts"
        );
    }

    #[test]
    fn test_error_retryable() {
        assert!(
            Error::Conflict {
                class_id: "1".to_string(),
                attempts: 1
            }
            .is_retryable()
        );
        assert!(
            Error::Timeout {
                operation: "get".to_string(),
                timeout_ms: 10
            }
            .is_retryable()
        );
        assert!(Error::operation("document_fetch", "unexpected status 503").is_retryable());
        assert!(Error::operation("document_fetch", "connection refused").is_retryable());
        assert!(!Error::operation("document_fetch", "unexpected status 401").is_retryable());
        assert!(!Error::InvalidInput("x".to_string()).is_retryable());
        assert!(!Error::deadline_exceeded("mutate").is_retryable());
        assert!(!Error::FeatureNotEnabled("redis".to_string()).is_retryable());
    }
}
