//! Request and response bodies for like mutations.

use super::{ClassId, LikeAction};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Body of `POST /likes`.
///
/// Both fields are optional at the deserialisation level so that missing
/// fields surface as validation errors with a readable message rather than a
/// generic parse failure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeRequest {
    /// Target class.
    pub class_id: Option<String>,
    /// `"like"` or `"unlike"`.
    pub action: Option<String>,
}

impl LikeRequest {
    /// Creates a request from its parts.
    #[must_use]
    pub fn new(class_id: impl Into<String>, action: LikeAction) -> Self {
        Self {
            class_id: Some(class_id.into()),
            action: Some(action.as_str().to_string()),
        }
    }

    /// Validates the request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] when `classId` is missing or empty,
    /// when `action` is missing, or when `action` is not exactly `like` or
    /// `unlike`.
    pub fn validate(&self) -> Result<(ClassId, LikeAction)> {
        let (Some(class_id), Some(action)) = (
            self.class_id.as_deref().filter(|id| !id.is_empty()),
            self.action.as_deref().filter(|a| !a.is_empty()),
        ) else {
            return Err(Error::InvalidInput("Missing classId or action".to_string()));
        };

        let action = LikeAction::parse(action)
            .ok_or_else(|| Error::InvalidInput("Invalid action".to_string()))?;

        Ok((ClassId::new(class_id), action))
    }
}

/// Result of a like mutation as reported to the caller.
///
/// `count` is always present. When `success` is false it carries the best
/// count known to the server so the page can settle on a real number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LikeOutcome {
    /// Whether the mutation was persisted.
    pub success: bool,
    /// Count after the mutation, or the best known count on failure.
    pub count: u64,
    /// Failure description, omitted on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LikeOutcome {
    /// A persisted mutation.
    #[must_use]
    pub const fn applied(count: u64) -> Self {
        Self {
            success: true,
            count,
            error: None,
        }
    }

    /// A mutation that could not be persisted.
    #[must_use]
    pub fn failed(count: u64, error: impl Into<String>) -> Self {
        Self {
            success: false,
            count,
            error: Some(error.into()),
        }
    }
}
