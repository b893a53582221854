//! Persistent storage of the authenticated identity.
//!
//! [`SessionStore`] keeps the identity in any [`KeyValueStore`] under two
//! string keys, [`USER_ID_KEY`] and [`USERNAME_KEY`]. Two stores are
//! provided: [`MemoryStore`] for tests and embedding, and [`FileStore`], a
//! small TOML file that survives restarts.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

/// Key under which the user id is stored.
pub const USER_ID_KEY: &str = "user_id";

/// Key under which the display name is stored.
pub const USERNAME_KEY: &str = "username";

/// The authenticated user's id and display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Server-issued opaque user id.
    pub user_id: String,
    /// Name shown next to this user's messages.
    pub display_name: String,
}

impl Identity {
    /// Creates an identity.
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
        }
    }
}

/// Errors from a key-value store backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Reading or writing the backing file failed.
    #[error("session file {path}: {source}")]
    Io {
        /// File that was accessed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The backing file is not a TOML table of strings.
    #[error("failed to parse session file: {0}")]
    Parse(#[from] toml::de::Error),

    /// The entries could not be serialized.
    #[error("failed to serialize session file: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// A string key-value store with get/set/remove semantics.
pub trait KeyValueStore: Send + Sync {
    /// Returns the value stored under `key`, if any.
    fn get(&self, key: &str) -> Option<String>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend cannot persist the change.
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Removes `key`. Removing an absent key is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend cannot persist the change.
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for Arc<T> {
    fn get(&self, key: &str) -> Option<String> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        (**self).remove(key)
    }
}

/// In-memory store. Contents are lost when it is dropped.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries
            .lock()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// Store backed by a TOML file of string values.
///
/// The whole file is rewritten on every change.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Opens the store at `path`. A missing file is an empty store.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the file exists but cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Default location: `<data_dir>/unichat/session.toml`.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_dir().map(|dir| dir.join("unichat").join("session.toml"))
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let contents = toml::to_string(entries)?;
        std::fs::write(&self.path, contents).map_err(io_err)
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock();
        entries.insert(key.to_string(), value.to_string());
        self.persist(&entries)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock();
        if entries.remove(key).is_none() {
            return Ok(());
        }
        self.persist(&entries)
    }
}

/// Identity persistence on top of a [`KeyValueStore`].
#[derive(Debug)]
pub struct SessionStore<K: KeyValueStore> {
    store: K,
}

impl<K: KeyValueStore> SessionStore<K> {
    /// Wraps a key-value store.
    pub const fn new(store: K) -> Self {
        Self { store }
    }

    /// Reads the stored identity.
    ///
    /// Returns `None` without a user id. A user id without a stored name
    /// uses the id as display name.
    pub fn load(&self) -> Option<Identity> {
        let user_id = self.store.get(USER_ID_KEY).filter(|id| !id.is_empty())?;
        let display_name = self
            .store
            .get(USERNAME_KEY)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| user_id.clone());
        Some(Identity {
            user_id,
            display_name,
        })
    }

    /// Whether a user id is currently stored.
    pub fn has_user_id(&self) -> bool {
        self.store
            .get(USER_ID_KEY)
            .is_some_and(|id| !id.is_empty())
    }

    /// Writes both identity keys.
    ///
    /// # Errors
    ///
    /// Returns the first [`StoreError`] from the backend.
    pub fn save(&self, identity: &Identity) -> Result<(), StoreError> {
        self.store.set(USER_ID_KEY, &identity.user_id)?;
        self.store.set(USERNAME_KEY, &identity.display_name)
    }

    /// Removes both identity keys. Both removals are attempted even if the
    /// first fails.
    ///
    /// # Errors
    ///
    /// Returns the first [`StoreError`] from the backend.
    pub fn clear(&self) -> Result<(), StoreError> {
        let id_result = self.store.remove(USER_ID_KEY);
        let name_result = self.store.remove(USERNAME_KEY);
        id_result.and(name_result)
    }

    /// The underlying key-value store.
    pub const fn inner(&self) -> &K {
        &self.store
    }
}
