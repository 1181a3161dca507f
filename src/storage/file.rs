//! JSON file counter store.
//!
//! The whole snapshot lives in one JSON object on disk:
//!
//! ```json
//! {
//!   "1": 12,
//!   "7": 3
//! }
//! ```
//!
//! Every mutation reads the file, changes one entry and writes the file back.
//! That cycle holds a lock shared by every store in the process that points
//! at the same file, however the path was spelled, so concurrent requests
//! cannot lose updates. Writes go to a sibling temporary file first and are
//! moved into place with a rename.
//!
//! Missing, empty or unparsable files are replaced with `{}` and logged;
//! they never surface as errors.

use super::traits::{CounterStore, check_deadline};
use crate::models::{ClassId, CounterSnapshot, LikeAction};
use crate::{Error, Result};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Instant;

/// File name used inside the data directory.
pub const LIKES_FILE_NAME: &str = "likes.json";

/// Locks keyed by canonical file path, shared by all stores in the process.
static FILE_LOCKS: OnceLock<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> = OnceLock::new();

fn lock_for(path: &Path) -> Arc<Mutex<()>> {
    let registry = FILE_LOCKS.get_or_init(|| Mutex::new(HashMap::new()));
    let mut locks = registry.lock().unwrap_or_else(PoisonError::into_inner);
    Arc::clone(locks.entry(lock_key(path)).or_default())
}

/// Canonical parent directory joined with the file name.
///
/// The parent must already exist; otherwise the path is used as given.
fn lock_key(path: &Path) -> PathBuf {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    match (fs::canonicalize(parent), path.file_name()) {
        (Ok(dir), Some(name)) => dir.join(name),
        _ => path.to_path_buf(),
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).map_err(|e| Error::operation("create_likes_dir", e))
        },
        _ => Ok(()),
    }
}

/// Durable counter store backed by a single JSON file.
#[derive(Debug)]
pub struct FileCounterStore {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl FileCounterStore {
    /// Creates a store writing to `path`.
    ///
    /// The parent directory and an empty `{}` document are created if they
    /// do not exist yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or the initial file cannot be created.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        ensure_parent(&path)?;
        let store = Self {
            lock: lock_for(&path),
            path,
        };

        let guard = store.lock.lock().unwrap_or_else(PoisonError::into_inner);
        if !store.path.exists() {
            store.write_snapshot(&CounterSnapshot::new())?;
            tracing::debug!(path = %store.path.display(), "Created likes file");
        }
        drop(guard);

        Ok(store)
    }

    /// Creates a store at `{data_dir}/likes.json`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub fn in_dir(data_dir: &Path) -> Result<Self> {
        Self::new(data_dir.join(LIKES_FILE_NAME))
    }

    /// Returns the path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the snapshot, repairing the file when it is not a JSON object.
    ///
    /// Callers must hold `self.lock`.
    fn read_snapshot(&self) -> Result<CounterSnapshot> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                ensure_parent(&self.path)?;
                self.write_snapshot(&CounterSnapshot::new())?;
                return Ok(CounterSnapshot::new());
            },
            Err(e) => return Err(Error::operation("read_likes_file", e)),
        };

        if content.trim().is_empty() {
            tracing::warn!(path = %self.path.display(), "Likes file is empty, resetting");
            return self.reset();
        }

        let parsed = serde_json::from_str::<serde_json::Value>(&content)
            .ok()
            .and_then(|value| CounterSnapshot::from_json_lenient(&value));

        match parsed {
            Some((snapshot, 0)) => Ok(snapshot),
            Some((snapshot, repaired)) => {
                tracing::warn!(
                    path = %self.path.display(),
                    repaired,
                    "Likes file held invalid counts, treating them as zero"
                );
                Ok(snapshot)
            },
            None => {
                tracing::warn!(
                    path = %self.path.display(),
                    "Invalid JSON in likes file, resetting to an empty object"
                );
                self.reset()
            },
        }
    }

    fn reset(&self) -> Result<CounterSnapshot> {
        let empty = CounterSnapshot::new();
        self.write_snapshot(&empty)?;
        Ok(empty)
    }

    /// Read-modify-write of one counter. Callers must hold `self.lock`.
    fn apply_locked(&self, class_id: &ClassId, action: LikeAction) -> Result<u64> {
        let mut snapshot = self.read_snapshot()?;
        let count = snapshot.apply(class_id, action);
        self.write_snapshot(&snapshot)?;
        Ok(count)
    }

    /// Writes the snapshot through a temporary file and a rename.
    ///
    /// Callers must hold `self.lock`.
    fn write_snapshot(&self, snapshot: &CounterSnapshot) -> Result<()> {
        let content = serde_json::to_string_pretty(snapshot)
            .map_err(|e| Error::operation("serialize_likes", e))?;

        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        fs::write(&tmp_path, content).map_err(|e| Error::operation("write_likes_file", e))?;
        fs::rename(&tmp_path, &self.path).map_err(|e| Error::operation("replace_likes_file", e))
    }
}

impl CounterStore for FileCounterStore {
    fn get_all(&self) -> Result<CounterSnapshot> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.read_snapshot()
    }

    fn mutate(&self, class_id: &ClassId, action: LikeAction) -> Result<u64> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.apply_locked(class_id, action)
    }

    fn mutate_before(
        &self,
        class_id: &ClassId,
        action: LikeAction,
        deadline: Instant,
    ) -> Result<u64> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        check_deadline("write_likes_file", deadline)?;
        self.apply_locked(class_id, action)
    }

    fn backend_name(&self) -> &'static str {
        "file"
    }
}
