//! Per-process application context.
//!
//! Owns everything the storage layer needs for one process: the resolved
//! configuration, the [`StorageClient`] (and through it the single gateway
//! registration every caller shares) and the client-local store holding the
//! default entry pointer. Build one at startup and pass it by reference.

use crate::cache::CacheStorage;
use crate::client::{Environment, StorageClient, StorageError};
use crate::config::AppConfig;
use crate::gateway::Scope;
use crate::local::{DEFAULT_ENTRY_KEY, LocalStore, LocalStoreError};
use std::sync::Arc;
use thiserror::Error;

/// Subdirectory of `storage.root` holding the named caches.
const CACHES_DIR: &str = "caches";

#[derive(Error, Debug)]
pub enum ContextError {
    #[error("Invalid scope.base_url: {0}")]
    InvalidScope(#[from] url::ParseError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("Local store error: {0}")]
    LocalStore(#[from] LocalStoreError),
}

#[derive(Debug)]
pub struct AppContext {
    config: AppConfig,
    storage: StorageClient,
    local: LocalStore,
}

impl AppContext {
    pub fn new(config: AppConfig) -> Result<Self, ContextError> {
        let scope = Scope::parse(&config.scope.base_url)?;
        let root = &config.storage.root;
        let caches_root = root.join(CACHES_DIR);
        let environment = Environment::detect(&scope, &caches_root);
        let storage = StorageClient::new(
            scope,
            Arc::new(CacheStorage::new(caches_root)),
            config.storage.cache_name.clone(),
            environment,
        );
        let local = LocalStore::open(root);
        Ok(Self {
            config,
            storage,
            local,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn storage(&self) -> &StorageClient {
        &self.storage
    }

    pub fn local(&self) -> &LocalStore {
        &self.local
    }

    /// Register and activate the gateway if that has not happened yet.
    pub fn init(&self) -> Result<(), StorageError> {
        self.storage.init().map(|_| ())
    }

    /// Empty the virtual file store and forget the default entry.
    pub fn reset(&self) -> Result<(), ContextError> {
        self.storage.clear()?;
        self.clear_default_entry()?;
        Ok(())
    }

    /// Filename recorded by the last ingestion, if any.
    pub fn default_entry(&self) -> Option<String> {
        self.local
            .get_item(DEFAULT_ENTRY_KEY)
            .filter(|entry| !entry.is_empty())
    }

    pub fn set_default_entry(&self, file_name: &str) -> Result<(), LocalStoreError> {
        self.local.set_item(DEFAULT_ENTRY_KEY, file_name)
    }

    pub fn clear_default_entry(&self) -> Result<(), LocalStoreError> {
        self.local.remove_item(DEFAULT_ENTRY_KEY)
    }
}
