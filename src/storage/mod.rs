//! Counter storage.
//!
//! Every backend implements [`CounterStore`]: a persistent mapping from class
//! id to a non-negative count with an atomic increment/decrement primitive.
//!
//! | Backend | Atomicity | Durable | Use |
//! |---------|-----------|---------|-----|
//! | [`MemoryCounterStore`] | mutex | no | tests, development |
//! | [`FileCounterStore`] | process-wide mutex + atomic rename | yes | single host |
//! | [`HashCounterStore`] | server-side script (`HINCRBY` + clamp) | yes | production |
//! | [`DocumentCounterStore`] | optimistic retry on version conflicts | yes | stores without increments |
//!
//! [`CachedCounterStore`] wraps any of them to serve the last known snapshot
//! when the backend cannot be read.

// Lock guards are held across a whole read-modify-write on purpose.
#![allow(clippy::significant_drop_tightening)]

pub mod cache;
pub mod document;
pub mod file;
pub mod hash;
pub mod memory;
pub mod remote;
pub mod traits;

pub use cache::{CachedCounterStore, SnapshotCache};
pub use document::{
    DocumentClient, DocumentCounterStore, HttpDocumentClient, RetryPolicy, VersionedDocument,
    WriteOutcome,
};
pub use file::{FileCounterStore, LIKES_FILE_NAME};
pub use hash::{
    HASH_KEY, HashClient, HashCounterStore, INCREMENT_CLAMPED_SCRIPT, LEGACY_KEY, RedisHashClient,
    RestHashClient, SEED_IF_ABSENT_SCRIPT,
};
pub use memory::MemoryCounterStore;
pub use remote::{RemoteEndpoint, build_http_client};
pub use traits::{CounterStore, check_deadline};
