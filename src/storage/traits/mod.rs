//! Storage backend traits.

mod counter;

pub use counter::{CounterStore, check_deadline};
