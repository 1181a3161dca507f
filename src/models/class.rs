//! Class identifiers and like actions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a class session.
///
/// Opaque to the backend: ids are not checked against the schedule, so any
/// non-empty string the page sends gets its own counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassId(String);

impl ClassId {
    /// Creates a new class ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ClassId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ClassId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A change requested by a visitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LikeAction {
    /// Adds one to the counter.
    Like,
    /// Removes one from the counter, never going below zero.
    Unlike,
}

impl LikeAction {
    /// Parses the wire form. Only the exact strings `like` and `unlike` are accepted.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "like" => Some(Self::Like),
            "unlike" => Some(Self::Unlike),
            _ => None,
        }
    }

    /// Returns the wire form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Unlike => "unlike",
        }
    }

    /// Signed delta sent to backends with a native increment.
    #[must_use]
    pub const fn delta(self) -> i64 {
        match self {
            Self::Like => 1,
            Self::Unlike => -1,
        }
    }

    /// Applies the action to a current count, clamping at zero.
    #[must_use]
    pub const fn apply(self, current: u64) -> u64 {
        match self {
            Self::Like => current.saturating_add(1),
            Self::Unlike => current.saturating_sub(1),
        }
    }
}

impl fmt::Display for LikeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
