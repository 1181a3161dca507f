//! Atomic hash counter store.
//!
//! Counters are fields of a single hash (`class_likes_v2`), one field per
//! class. Mutations run `HINCRBY` inside a server-side script that also
//! clamps the field at zero, so the increment and the floor check form one
//! atomic step on the server and no client-side locking is needed.
//!
//! # Legacy layout
//!
//! Older deployments kept the whole snapshot as a JSON blob under
//! `class_likes`. Before its first read or write, each process checks whether
//! the hash exists; if it does not and the blob does, the blob's entries are
//! seeded into the hash by a script that refuses to touch an existing hash.
//! The blob itself is left in place.
//!
//! # Clients
//!
//! | Client | Transport | Selected by |
//! |--------|-----------|-------------|
//! | [`RestHashClient`] | Redis commands over HTTPS (Upstash/Vercel KV) | `KV_REST_API_URL` + `KV_REST_API_TOKEN` |
//! | [`RedisHashClient`] | Native Redis protocol (`redis` feature) | `CLASS_LIKES_REDIS_URL` |

mod redis;
mod rest;

pub use self::redis::RedisHashClient;
pub use rest::RestHashClient;

use super::traits::{CounterStore, check_deadline};
use crate::models::{ClassId, CounterSnapshot, LikeAction, parse_count_str};
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

/// Hash key holding one field per class.
pub const HASH_KEY: &str = "class_likes_v2";

/// Key of the pre-hash JSON blob layout.
pub const LEGACY_KEY: &str = "class_likes";

/// `HINCRBY` with a floor of zero.
///
/// `KEYS[1]` hash, `ARGV[1]` field, `ARGV[2]` delta. Returns the new value.
///
/// A field that `HINCRBY` would reject or that holds a negative number is
/// first rewritten to the count reads report for it: the truncated value of
/// a non-negative number, zero for anything else.
pub const INCREMENT_CLAMPED_SCRIPT: &str = r"
local raw = redis.call('HGET', KEYS[1], ARGV[1])
if raw and not (raw == '0' or (#raw <= 18 and string.match(raw, '^[1-9]%d*$'))) then
  local current = tonumber(raw)
  if current == nil or current ~= current or current < 0 or current >= 2^53 then
    current = 0
  end
  redis.call('HSET', KEYS[1], ARGV[1], string.format('%d', math.floor(current)))
end
local next = redis.call('HINCRBY', KEYS[1], ARGV[1], ARGV[2])
if next < 0 then
  redis.call('HSET', KEYS[1], ARGV[1], 0)
  next = 0
end
return next
";

/// Writes field/value pairs only if the hash does not exist yet.
///
/// `KEYS[1]` hash, `ARGV` alternating field and value. Returns the number of
/// fields written, zero when the hash already existed.
pub const SEED_IF_ABSENT_SCRIPT: &str = r"
if redis.call('EXISTS', KEYS[1]) == 1 then
  return 0
end
local written = 0
for i = 1, #ARGV, 2 do
  redis.call('HSET', KEYS[1], ARGV[i], ARGV[i + 1])
  written = written + 1
end
return written
";

/// Minimal command set a hash backend must offer.
pub trait HashClient: Send + Sync {
    /// Runs [`INCREMENT_CLAMPED_SCRIPT`] and returns the new value.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails or times out.
    fn increment_clamped(&self, key: &str, field: &str, delta: i64) -> Result<i64>;

    /// Returns every field of a hash; empty when the hash does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails or times out.
    fn get_all(&self, key: &str) -> Result<HashMap<String, String>>;

    /// Returns a plain string value.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails or times out.
    fn get_string(&self, key: &str) -> Result<Option<String>>;

    /// Runs [`SEED_IF_ABSENT_SCRIPT`] and returns the number of fields written.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails or times out.
    fn seed_if_absent(&self, key: &str, entries: &[(String, u64)]) -> Result<usize>;

    /// Client name for logs.
    fn name(&self) -> &'static str;
}

/// Counter store over an atomic hash.
pub struct HashCounterStore<C: HashClient> {
    client: C,
    hash_key: String,
    legacy_key: String,
    migrated: AtomicBool,
    migration_lock: Mutex<()>,
}

impl<C: HashClient> HashCounterStore<C> {
    /// Creates a store using the default keys.
    #[must_use]
    pub fn new(client: C) -> Self {
        Self::with_keys(client, HASH_KEY, LEGACY_KEY)
    }

    /// Creates a store using custom keys.
    #[must_use]
    pub fn with_keys(
        client: C,
        hash_key: impl Into<String>,
        legacy_key: impl Into<String>,
    ) -> Self {
        Self {
            client,
            hash_key: hash_key.into(),
            legacy_key: legacy_key.into(),
            migrated: AtomicBool::new(false),
            migration_lock: Mutex::new(()),
        }
    }

    /// Returns the underlying client.
    #[must_use]
    pub const fn client(&self) -> &C {
        &self.client
    }

    /// Runs the legacy migration once per process.
    ///
    /// A failed attempt is not remembered, so the next call tries again.
    fn ensure_migrated(&self) -> Result<()> {
        if self.migrated.load(Ordering::Acquire) {
            return Ok(());
        }
        self.run_migration().map(|_| ())
    }

    fn run_migration(&self) -> Result<usize> {
        let _guard = self
            .migration_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.migrated.load(Ordering::Acquire) {
            return Ok(0);
        }

        let copied = self.copy_legacy_blob()?;
        self.migrated.store(true, Ordering::Release);
        Ok(copied)
    }

    fn increment(&self, class_id: &ClassId, action: LikeAction) -> Result<u64> {
        let next = self
            .client
            .increment_clamped(&self.hash_key, class_id.as_str(), action.delta())?;
        u64::try_from(next).map_err(|_| {
            Error::operation(
                "hash_increment",
                format!("script returned negative count {next}"),
            )
        })
    }

    fn copy_legacy_blob(&self) -> Result<usize> {
        if !self.client.get_all(&self.hash_key)?.is_empty() {
            return Ok(0);
        }

        let Some(raw) = self.client.get_string(&self.legacy_key)? else {
            return Ok(0);
        };

        let parsed = serde_json::from_str::<serde_json::Value>(&raw)
            .ok()
            .and_then(|value| CounterSnapshot::from_json_lenient(&value));
        let Some((legacy, repaired)) = parsed else {
            tracing::warn!(
                legacy_key = %self.legacy_key,
                "Legacy likes blob is not a JSON object, leaving it untouched"
            );
            return Ok(0);
        };

        if legacy.is_empty() {
            return Ok(0);
        }

        let entries: Vec<(String, u64)> = legacy.into_iter().collect();
        let written = self.client.seed_if_absent(&self.hash_key, &entries)?;
        tracing::info!(
            client = self.client.name(),
            legacy_key = %self.legacy_key,
            hash_key = %self.hash_key,
            written,
            repaired,
            "Migrated legacy likes blob into hash"
        );
        Ok(written)
    }
}

impl<C: HashClient> CounterStore for HashCounterStore<C> {
    fn get_all(&self) -> Result<CounterSnapshot> {
        self.ensure_migrated()?;

        let fields = self.client.get_all(&self.hash_key)?;
        let mut repaired = 0usize;
        let snapshot = fields
            .into_iter()
            .map(|(class_id, raw)| {
                let count = parse_count_str(&raw).unwrap_or_else(|| {
                    repaired += 1;
                    0
                });
                (class_id, count)
            })
            .collect();

        if repaired > 0 {
            tracing::warn!(
                hash_key = %self.hash_key,
                repaired,
                "Hash held non-numeric or negative counts, treating them as zero"
            );
        }

        Ok(snapshot)
    }

    fn mutate(&self, class_id: &ClassId, action: LikeAction) -> Result<u64> {
        self.ensure_migrated()?;
        self.increment(class_id, action)
    }

    fn mutate_before(
        &self,
        class_id: &ClassId,
        action: LikeAction,
        deadline: Instant,
    ) -> Result<u64> {
        self.ensure_migrated()?;
        check_deadline("hash_increment", deadline)?;
        self.increment(class_id, action)
    }

    fn migrate(&self) -> Result<usize> {
        self.run_migration()
    }

    fn backend_name(&self) -> &'static str {
        self.client.name()
    }
}
