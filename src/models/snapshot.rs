//! Point-in-time view of every known counter.

use super::{ClassId, LikeAction};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Mapping of every known class to its like count.
///
/// Serialises as a plain JSON object (`{"12": 3, "14": 0}`), which is both
/// the `likes` field of `GET /likes` and the on-disk layout of the file
/// backend. Classes that are absent read as zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CounterSnapshot(BTreeMap<String, u64>);

impl CounterSnapshot {
    /// Creates an empty snapshot.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Returns the count for a class, zero when unknown.
    #[must_use]
    pub fn count(&self, class_id: &str) -> u64 {
        self.0.get(class_id).copied().unwrap_or(0)
    }

    /// Returns the count for a class if the snapshot has an entry for it.
    #[must_use]
    pub fn get(&self, class_id: &str) -> Option<u64> {
        self.0.get(class_id).copied()
    }

    /// Sets the count for a class.
    pub fn set(&mut self, class_id: impl Into<String>, count: u64) {
        self.0.insert(class_id.into(), count);
    }

    /// Applies an action to one class and returns the resulting count.
    pub fn apply(&mut self, class_id: &ClassId, action: LikeAction) -> u64 {
        let next = action.apply(self.count(class_id.as_str()));
        self.set(class_id.as_str(), next);
        next
    }

    /// Number of classes with an entry.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if no class has an entry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over `(class_id, count)` pairs in id order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Builds a snapshot from loosely typed JSON.
    ///
    /// Returns `None` unless `value` is an object. Entries whose value is not
    /// a finite non-negative number (or a string holding one) are kept with
    /// a count of zero; the second tuple element reports how many entries
    /// were repaired that way.
    #[must_use]
    pub fn from_json_lenient(value: &Value) -> Option<(Self, usize)> {
        let object = value.as_object()?;
        let mut snapshot = Self::new();
        let mut repaired = 0;

        for (class_id, raw) in object {
            let count = parse_count(raw).unwrap_or_else(|| {
                repaired += 1;
                0
            });
            snapshot.set(class_id.clone(), count);
        }

        Some((snapshot, repaired))
    }
}

impl FromIterator<(String, u64)> for CounterSnapshot {
    fn from_iter<T: IntoIterator<Item = (String, u64)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for CounterSnapshot {
    type Item = (String, u64);
    type IntoIter = std::collections::btree_map::IntoIter<String, u64>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Parses a stored counter value.
///
/// Accepts JSON integers, non-negative finite floats (truncated) and decimal
/// strings, which is what hash stores hand back. Anything else is `None`.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn parse_count(raw: &Value) -> Option<u64> {
    match raw {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && *f >= 0.0 && *f <= u64::MAX as f64)
                .map(|f| f as u64)
        }),
        Value::String(s) => parse_count_str(s),
        _ => None,
    }
}

/// Parses a counter stored as text; negative or non-numeric text is `None`.
#[must_use]
pub fn parse_count_str(raw: &str) -> Option<u64> {
    let trimmed = raw.trim();
    trimmed
        .parse::<u64>()
        .ok()
        .or_else(|| parse_count(&Value::from(trimmed.parse::<f64>().ok()?)))
}
