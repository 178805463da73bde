//! Key-value persistence shim
//!
//! Flat string-keyed store holding one JSON document per collection. No
//! transactions or migrations; the last write wins. Callers supply seed data
//! for keys that were never written.

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store io for '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
    #[error("document '{key}' is not valid: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

pub trait KeyValueStore: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn save(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// One `<key>.json` file per collection under a base directory
pub struct JsonFileStore {
    base_path: PathBuf,
}

impl JsonFileStore {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Self {
        let base_path = base_path.as_ref().to_path_buf();
        info!(dir = %base_path.display(), "json_store_initialized");
        Self { base_path }
    }

    fn document_path(&self, key: &str) -> PathBuf {
        self.base_path.join(format!("{key}.json"))
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}

impl KeyValueStore for JsonFileStore {
    fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.document_path(key);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io { key: key.to_string(), source }),
        }
    }

    fn save(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io { key: key.to_string(), source };
        let path = self.document_path(key);

        // Create parent directories if they don't exist
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).map_err(io_err)?;
            }
        }

        // Write beside the target then rename so readers never see a torn document
        let tmp_path = path.with_extension("json.tmp");
        let mut file = fs::File::create(&tmp_path).map_err(io_err)?;
        file.write_all(value.as_bytes()).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        fs::rename(&tmp_path, &path).map_err(io_err)?;

        debug!(key = %key, bytes = %value.len(), "document_written");
        Ok(())
    }
}

/// Process-local store for tests and ephemeral runs
#[derive(Default)]
pub struct MemoryStore {
    documents: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.documents.lock().contains_key(key)
    }
}

impl KeyValueStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.documents.lock().get(key).cloned())
    }

    fn save(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.documents.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> Result<T, StoreError> {
    serde_json::from_str(raw).map_err(|source| StoreError::Corrupt { key: key.to_string(), source })
}

fn encode<T: Serialize + ?Sized>(key: &str, value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|source| StoreError::Corrupt { key: key.to_string(), source })
}

/// Typed view of a key holding a JSON array of records
pub struct Collection<T> {
    store: Arc<dyn KeyValueStore>,
    key: &'static str,
    seed: fn() -> Vec<T>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Serialize + DeserializeOwned> Collection<T> {
    pub fn new(store: Arc<dyn KeyValueStore>, key: &'static str, seed: fn() -> Vec<T>) -> Self {
        Self { store, key, seed, _marker: PhantomData }
    }

    pub fn key(&self) -> &'static str {
        self.key
    }

    /// Stored records, or the seed if the key was never written
    pub fn get(&self) -> Result<Vec<T>, StoreError> {
        match self.store.load(self.key)? {
            Some(raw) => decode(self.key, &raw),
            None => Ok((self.seed)()),
        }
    }

    /// Replace the whole document
    pub fn put(&self, records: &[T]) -> Result<(), StoreError> {
        let raw = encode(self.key, records)?;
        self.store.save(self.key, &raw)
    }

    /// Read, apply `f`, write back; returns what `f` returned
    pub fn update<R>(&self, f: impl FnOnce(&mut Vec<T>) -> R) -> Result<R, StoreError> {
        let mut records = self.get()?;
        let out = f(&mut records);
        self.put(&records)?;
        Ok(out)
    }
}

/// Typed view of a key holding a single JSON object
pub struct Document<T> {
    store: Arc<dyn KeyValueStore>,
    key: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Serialize + DeserializeOwned + Default> Document<T> {
    pub fn new(store: Arc<dyn KeyValueStore>, key: &'static str) -> Self {
        Self { store, key, _marker: PhantomData }
    }

    pub fn get(&self) -> Result<T, StoreError> {
        match self.store.load(self.key)? {
            Some(raw) => decode(self.key, &raw),
            None => Ok(T::default()),
        }
    }

    pub fn put(&self, value: &T) -> Result<(), StoreError> {
        let raw = encode(self.key, value)?;
        self.store.save(self.key, &raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
    struct Item {
        id: u32,
        name: String,
    }

    fn seed() -> Vec<Item> {
        vec![Item { id: 1, name: "seed".to_string() }]
    }

    #[test]
    fn test_collection_returns_seed_when_absent() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let items = Collection::new(store, "items", seed);
        assert_eq!(items.get().unwrap(), seed());
    }

    #[test]
    fn test_collection_put_replaces() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let items = Collection::new(store, "items", seed);

        items.put(&[]).unwrap();
        assert!(items.get().unwrap().is_empty());

        let inserted = items
            .update(|list| {
                list.push(Item { id: 7, name: "x".to_string() });
                list.len()
            })
            .unwrap();
        assert_eq!(inserted, 1);
        assert_eq!(items.get().unwrap()[0].id, 7);
    }

    #[test]
    fn test_file_store_roundtrip_and_nested_dir() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("nested").join("data");
        let store = JsonFileStore::new(&nested);

        assert_eq!(store.load("tours_data").unwrap(), None);
        store.save("tours_data", "[]").unwrap();
        assert_eq!(store.load("tours_data").unwrap().as_deref(), Some("[]"));
        assert!(nested.join("tours_data.json").exists());
        assert!(!nested.join("tours_data.json.tmp").exists());
    }

    #[test]
    fn test_last_write_wins() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        store.save("k", "1").unwrap();
        store.save("k", "2").unwrap();
        assert_eq!(store.load("k").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn test_corrupt_document_is_error() {
        let store = Arc::new(MemoryStore::new());
        store.save("items", "{not json").unwrap();
        let items = Collection::<Item>::new(store, "items", seed);
        assert!(matches!(items.get(), Err(StoreError::Corrupt { .. })));
    }

    #[test]
    fn test_document_defaults() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let doc = Document::<Item>::new(store.clone(), "item");
        assert_eq!(doc.get().unwrap(), Item::default());

        doc.put(&Item { id: 3, name: "three".to_string() }).unwrap();
        assert_eq!(doc.get().unwrap().id, 3);
    }
}
