//! Client-local key/value storage, persisted as a small JSON file.
//!
//! Holds state that belongs to the client rather than to the virtual file
//! store, currently just the default entry pointer. It survives restarts
//! but is cleared explicitly, never by the cache's own lifecycle.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

/// Key under which ingestion records the default entry document.
pub const DEFAULT_ENTRY_KEY: &str = "style-designer-default-entry";

/// File name of the store inside the storage root.
const LOCAL_STORE_FILENAME: &str = "local-storage.json";

#[derive(Error, Debug)]
pub enum LocalStoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Local store lock poisoned")]
    Poisoned,
}

impl<T> From<PoisonError<T>> for LocalStoreError {
    fn from(_: PoisonError<T>) -> Self {
        LocalStoreError::Poisoned
    }
}

#[derive(Debug)]
pub struct LocalStore {
    path: PathBuf,
    items: Mutex<BTreeMap<String, String>>,
}

impl LocalStore {
    /// Open the store kept in `root`. A missing or unreadable file starts
    /// empty.
    pub fn open(root: &Path) -> Self {
        let path = root.join(LOCAL_STORE_FILENAME);
        let items = fs::read_to_string(&path)
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok())
            .unwrap_or_default();
        Self {
            path,
            items: Mutex::new(items),
        }
    }

    pub fn get_item(&self, key: &str) -> Option<String> {
        self.items.lock().ok()?.get(key).cloned()
    }

    pub fn set_item(&self, key: &str, value: &str) -> Result<(), LocalStoreError> {
        let mut items = self.items.lock()?;
        items.insert(key.to_string(), value.to_string());
        self.persist(&items)
    }

    pub fn remove_item(&self, key: &str) -> Result<(), LocalStoreError> {
        let mut items = self.items.lock()?;
        if items.remove(key).is_some() {
            self.persist(&items)?;
        }
        Ok(())
    }

    fn persist(&self, items: &BTreeMap<String, String>) -> Result<(), LocalStoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(items)?)?;
        Ok(())
    }
}
