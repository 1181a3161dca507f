//! Data models for class likes.
//!
//! This module contains the identifiers, actions and snapshots shared by the
//! storage backends, the likes service and the HTTP layer.

mod class;
mod request;
mod snapshot;

pub use class::{ClassId, LikeAction};
pub use request::{LikeOutcome, LikeRequest};
pub use snapshot::{CounterSnapshot, parse_count, parse_count_str};
