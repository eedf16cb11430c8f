//! Process-wide key/value store persisted as a single JSON snapshot.
//!
//! Values are kept as [`serde_json::Value`] and decoded at the boundary with
//! typed accessors, so a value of the wrong shape is reported as an error
//! instead of being silently misread. All access goes through one mutex; the
//! lock is never held across an `.await`.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Error;

/// Seed identifiers loaded from the seed file.
pub const BUNDLES_KEY: &str = "bundles";
/// Last successfully processed seed identifier.
pub const LAST_KEY: &str = "last";
/// Ordered keyword sequence.
pub const KEYS_KEY: &str = "_keys";
/// Index of the last consumed keyword.
pub const KEYS_NEXT_KEY: &str = "_keys_next";
/// Error ledger.
pub const ERRORS_KEY: &str = "errors";

/// A single stored value.
///
/// Serialized as `{"V": <value>, "Expired": <unix seconds>}`; `Expired == 0`
/// means the entry never expires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    #[serde(rename = "V", default)]
    pub value: Value,
    #[serde(rename = "Expired", default)]
    pub expired: i64,
}

impl CacheEntry {
    pub fn new(value: Value) -> Self {
        Self { value, expired: 0 }
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.expired != 0 && self.expired <= now
    }
}

/// How [`SnapshotStore::load`] treats the file on disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOptions {
    /// Delete any previous snapshot and start empty.
    pub fresh_start: bool,
    /// Fail with `SnapshotMissing` when there is nothing to load.
    pub require_existing: bool,
}

/// Mutex-guarded key/value store with snapshot persistence.
#[derive(Debug)]
pub struct SnapshotStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl SnapshotStore {
    /// Create an empty store that will dump to `path`. No I/O happens here.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), entries: Mutex::new(HashMap::new()) }
    }

    /// Create a store and immediately [`load`](Self::load) it.
    pub fn open(path: impl Into<PathBuf>, options: LoadOptions) -> Result<Self, Error> {
        let store = Self::new(path);
        store.load(options)?;
        Ok(store)
    }

    /// Snapshot file location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Load the snapshot file into memory, replacing current contents.
    ///
    /// # Errors
    ///
    /// - `SnapshotMissing` if the file is absent and `require_existing` is set
    /// - `SnapshotCorrupt` if the file cannot be decoded
    /// - `Io` for any other filesystem failure
    pub fn load(&self, options: LoadOptions) -> Result<(), Error> {
        if options.fresh_start {
            match fs::remove_file(&self.path) {
                Ok(()) => tracing::info!(path = %self.path.display(), "removed previous snapshot"),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    tracing::debug!(path = %self.path.display(), "no previous snapshot to remove")
                }
                Err(e) => tracing::warn!(path = %self.path.display(), error = %e, "cannot remove snapshot"),
            }
            self.lock().clear();
            return Ok(());
        }

        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        if bytes.iter().all(u8::is_ascii_whitespace) {
            if options.require_existing {
                return Err(Error::SnapshotMissing(self.path.display().to_string()));
            }
            tracing::info!(path = %self.path.display(), "snapshot not found, starting empty");
            return Ok(());
        }

        let loaded: HashMap<String, CacheEntry> =
            serde_json::from_slice(&bytes).map_err(|e| Error::SnapshotCorrupt(format!("{}: {e}", self.path.display())))?;

        tracing::info!(path = %self.path.display(), entries = loaded.len(), "snapshot loaded");
        *self.lock() = loaded;
        Ok(())
    }

    /// Serialize the whole store to the snapshot file.
    ///
    /// Returns `false` without touching the filesystem when the store is
    /// empty. The file is written next to the target and renamed over it.
    pub fn dump(&self) -> Result<bool, Error> {
        let entries = self.lock();
        if entries.is_empty() {
            tracing::info!("store is empty, skipping snapshot");
            return Ok(false);
        }

        let now = chrono::Utc::now().timestamp();
        let ordered: BTreeMap<&String, &CacheEntry> = entries.iter().filter(|(_, e)| !e.is_expired(now)).collect();
        let json = serde_json::to_vec(&ordered).map_err(|e| Error::SnapshotCorrupt(e.to_string()))?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let mut tmp_name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_else(|| "snapshot".into());
        tmp_name.push(".tmp");
        let tmp = self.path.with_file_name(tmp_name);
        fs::write(&tmp, &json)?;
        fs::rename(&tmp, &self.path)?;

        tracing::info!(path = %self.path.display(), entries = ordered.len(), bytes = json.len(), "snapshot written");
        Ok(true)
    }

    /// Overwrite `key` with a raw JSON value.
    pub fn set_value(&self, key: &str, value: Value) {
        self.lock().insert(key.to_string(), CacheEntry::new(value));
    }

    /// Overwrite `key` with a serializable value.
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), Error> {
        let value = serde_json::to_value(value).map_err(|e| Error::wrong_shape(key, e))?;
        self.set_value(key, value);
        Ok(())
    }

    /// Overwrite `key` with a value that disappears after `ttl`.
    pub fn set_with_ttl<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: chrono::Duration) -> Result<(), Error> {
        let value = serde_json::to_value(value).map_err(|e| Error::wrong_shape(key, e))?;
        let expired = (chrono::Utc::now() + ttl).timestamp();
        self.lock().insert(key.to_string(), CacheEntry { value, expired });
        Ok(())
    }

    /// Raw JSON value under `key`; `None` when absent or expired.
    pub fn get_value(&self, key: &str) -> Option<Value> {
        self.transaction(|entries| entries.get_ref(key).cloned())
    }

    /// Decode the value under `key`.
    ///
    /// `Ok(None)` is the normal "not found" outcome.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, Error> {
        self.transaction(|entries| entries.get(key))
    }

    /// Atomic read-modify-write of a single key.
    ///
    /// A missing or wrong-shaped value starts from `T::default()`.
    pub fn update<T, R>(&self, key: &str, f: impl FnOnce(&mut T) -> R) -> Result<R, Error>
    where
        T: Serialize + DeserializeOwned + Default,
    {
        self.transaction(|entries| {
            let mut current = entries.get_or_default::<T>(key);
            let out = f(&mut current);
            entries.set(key, &current)?;
            Ok(out)
        })
    }

    /// Atomically append one item to the list under `key`.
    ///
    /// `make` receives the current list length. Returns the new length.
    pub fn push<T: Serialize>(&self, key: &str, make: impl FnOnce(usize) -> T) -> Result<usize, Error> {
        self.transaction(|entries| entries.push(key, make))
    }

    /// Run `f` with exclusive access to every entry.
    pub fn transaction<R>(&self, f: impl FnOnce(&mut Entries<'_>) -> R) -> R {
        let mut guard = self.lock();
        let mut entries = Entries { map: &mut guard, now: chrono::Utc::now().timestamp() };
        f(&mut entries)
    }

    /// Delete `key`; returns whether it was present.
    pub fn remove(&self, key: &str) -> bool {
        self.lock().remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// All keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().keys().cloned().collect();
        keys.sort();
        keys
    }
}

/// Locked view of the store handed to [`SnapshotStore::transaction`].
pub struct Entries<'a> {
    map: &'a mut HashMap<String, CacheEntry>,
    now: i64,
}

impl Entries<'_> {
    /// Borrow the raw value under `key`, dropping it if it has expired.
    pub fn get_ref(&mut self, key: &str) -> Option<&Value> {
        if self.map.get(key).is_some_and(|e| e.is_expired(self.now)) {
            self.map.remove(key);
            return None;
        }
        self.map.get(key).map(|e| &e.value)
    }

    pub fn get<T: DeserializeOwned>(&mut self, key: &str) -> Result<Option<T>, Error> {
        match self.get_ref(key) {
            Some(value) => T::deserialize(value).map(Some).map_err(|e| Error::wrong_shape(key, e)),
            None => Ok(None),
        }
    }

    fn get_or_default<T: DeserializeOwned + Default>(&mut self, key: &str) -> T {
        match self.get::<T>(key) {
            Ok(Some(v)) => v,
            Ok(None) => T::default(),
            Err(e) => {
                tracing::warn!(key, error = %e, "replacing value of unexpected shape");
                T::default()
            }
        }
    }

    pub fn set<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) -> Result<(), Error> {
        let value = serde_json::to_value(value).map_err(|e| Error::wrong_shape(key, e))?;
        self.map.insert(key.to_string(), CacheEntry::new(value));
        Ok(())
    }

    /// Append to the list under `key`, replacing a non-list value.
    pub fn push<T: Serialize>(&mut self, key: &str, make: impl FnOnce(usize) -> T) -> Result<usize, Error> {
        let expired = self.map.get(key).is_some_and(|e| e.is_expired(self.now));
        let entry = self.map.entry(key.to_string()).or_insert_with(|| CacheEntry::new(Value::Array(Vec::new())));
        if expired || !entry.value.is_array() {
            if !expired && !entry.value.is_null() {
                tracing::warn!(key, "replacing non-list value before append");
            }
            *entry = CacheEntry::new(Value::Array(Vec::new()));
        }

        let Value::Array(items) = &mut entry.value else {
            return Err(Error::wrong_shape(key, "expected a list"));
        };
        let item = serde_json::to_value(make(items.len())).map_err(|e| Error::wrong_shape(key, e))?;
        items.push(item);
        Ok(items.len())
    }
}
