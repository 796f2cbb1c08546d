//! Durable key-value text store backing the registry state.
//!
//! Each state category is stored as one serialized blob under its own key.

use crate::error::StoreError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Active scenario per handler key.
pub const SCENARIOS_KEY: &str = "mock-scenarios";
/// Global delay scalar.
pub const GLOBAL_DELAY_KEY: &str = "mock-delay";
/// Delay per handler key.
pub const HANDLER_DELAYS_KEY: &str = "mock-handler-delays";
/// Manual overrides per handler key.
pub const OVERRIDES_KEY: &str = "mock-overrides";
/// User-authored scenarios per handler key.
pub const CUSTOM_SCENARIOS_KEY: &str = "mock-custom-scenarios";
/// User-authored presets.
pub const CUSTOM_PRESETS_KEY: &str = "mock-custom-presets";

/// A durable text store.
pub trait StateStore: Send + Sync {
    /// Read the blob stored under `key`, if any.
    fn load(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Replace the blob stored under `key`.
    fn save(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// In-memory store, for tests and throwaway sessions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-filled with the given entries.
    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            data: Mutex::new(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }

    /// Current raw value under `key`.
    pub fn get(&self, key: &str) -> Option<String> {
        self.data.lock().get(key).cloned()
    }
}

impl StateStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.get(key))
    }

    fn save(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.data.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Directory-backed store: one `<key>.json` file per entry.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl StateStore for FileStore {
    fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        match std::fs::read_to_string(self.path_for(key)) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }

    fn save(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            key: key.to_string(),
            source,
        };

        std::fs::create_dir_all(&self.dir).map_err(io_err)?;

        // Blobs are replaced atomically.
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, value).map_err(io_err)?;
        std::fs::rename(&tmp, &path).map_err(io_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::with_entries([(SCENARIOS_KEY, "{}")]);
        assert_eq!(store.load(SCENARIOS_KEY).unwrap().as_deref(), Some("{}"));
        assert_eq!(store.load(OVERRIDES_KEY).unwrap(), None);

        store.save(OVERRIDES_KEY, r#"{"a":1}"#).unwrap();
        assert_eq!(store.get(OVERRIDES_KEY).as_deref(), Some(r#"{"a":1}"#));
    }

    #[test]
    fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("state"));

        assert_eq!(store.load(GLOBAL_DELAY_KEY).unwrap(), None);

        store.save(GLOBAL_DELAY_KEY, "250").unwrap();
        assert_eq!(store.load(GLOBAL_DELAY_KEY).unwrap().as_deref(), Some("250"));
        assert!(dir.path().join("state/mock-delay.json").exists());

        store.save(GLOBAL_DELAY_KEY, "0").unwrap();
        assert_eq!(store.load(GLOBAL_DELAY_KEY).unwrap().as_deref(), Some("0"));
    }

    #[test]
    fn test_file_store_reports_unreadable_entry() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the blob file should be cannot be read as text
        std::fs::create_dir_all(dir.path().join("mock-scenarios.json")).unwrap();

        let store = FileStore::new(dir.path());
        assert!(matches!(
            store.load(SCENARIOS_KEY),
            Err(StoreError::Io { .. })
        ));
    }
}
