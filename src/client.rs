//! Storage client: the virtual file system API over the gateway's cache.
//!
//! Callers see path keys (`contents/web/index.html`, `theme/style.css`) and
//! five operations: save, read, list, clear and fetch. Behind them the client
//! owns the gateway's [`Registration`]: the first operation registers and
//! activates the gateway; later ones reuse it. Callers never observe the
//! intermediate states.
//!
//! ```text
//! Unregistered ──init()──▶ Registering ──activated──▶ Active
//!       ▲                        │
//!       └──────── failed ────────┘
//! ```
//!
//! A failed registration returns to `Unregistered` so a later `init()` can
//! retry. An unsupported environment is rejected before any transition.

use crate::cache::{Cache, CacheError, CacheStorage, CachedResponse};
use crate::gateway::{
    FetchOutcome, Gateway, GatewayError, GatewayHandle, GatewayMessage, Request, Response, Scope,
};
use crate::mime;
use percent_encoding::percent_decode_str;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Unsupported environment: {0}")]
    UnsupportedEnvironment(String),
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("Invalid store path {path:?}: {source}")]
    InvalidPath {
        path: String,
        source: url::ParseError,
    },
    #[error("Registration lock poisoned")]
    Poisoned,
}

impl<T> From<PoisonError<T>> for StorageError {
    fn from(_: PoisonError<T>) -> Self {
        StorageError::Poisoned
    }
}

/// Capabilities the host offers the storage layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    /// A worker can be placed in front of scoped requests.
    pub request_interception: bool,
    /// The cache root can be created and written.
    pub persistent_cache: bool,
    /// The scope is served over `https`.
    pub secure_context: bool,
    /// The scope is a local development host.
    pub loopback: bool,
}

impl Environment {
    /// Look up the host for a scope whose caches live under `cache_root`.
    pub fn detect(scope: &Scope, cache_root: &Path) -> Self {
        let persistent_cache = std::fs::create_dir_all(cache_root).is_ok()
            && std::fs::metadata(cache_root)
                .map(|m| !m.permissions().readonly())
                .unwrap_or(false);
        Self {
            request_interception: true,
            persistent_cache,
            secure_context: scope.is_secure(),
            loopback: scope.is_loopback(),
        }
    }

    /// Reject hosts the storage layer cannot run on.
    pub fn check(&self) -> Result<(), StorageError> {
        if !self.request_interception {
            return Err(StorageError::UnsupportedEnvironment(
                "request interception is required".into(),
            ));
        }
        if !self.persistent_cache {
            return Err(StorageError::UnsupportedEnvironment(
                "a writable persistent cache is required".into(),
            ));
        }
        if !self.secure_context && !self.loopback {
            return Err(StorageError::UnsupportedEnvironment(
                "a secure context (https or localhost) is required".into(),
            ));
        }
        Ok(())
    }
}

/// Lifecycle of the gateway registration owned by a [`StorageClient`].
#[derive(Debug)]
pub enum Registration {
    Unregistered,
    Registering,
    Active(Arc<GatewayHandle>),
}

/// Virtual file system over the gateway's persistent cache.
#[derive(Debug)]
pub struct StorageClient {
    scope: Scope,
    caches: Arc<CacheStorage>,
    cache_name: String,
    environment: Environment,
    registration: Mutex<Registration>,
}

impl StorageClient {
    pub fn new(
        scope: Scope,
        caches: Arc<CacheStorage>,
        cache_name: impl Into<String>,
        environment: Environment,
    ) -> Self {
        Self {
            scope,
            caches,
            cache_name: cache_name.into(),
            environment,
            registration: Mutex::new(Registration::Unregistered),
        }
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Whether the gateway is registered and active.
    pub fn is_active(&self) -> bool {
        self.registration
            .lock()
            .map(|r| matches!(*r, Registration::Active(_)))
            .unwrap_or(false)
    }

    /// Ensure the gateway is registered and active. Idempotent.
    ///
    /// Concurrent callers block on the same registration rather than
    /// starting their own.
    pub fn init(&self) -> Result<Arc<GatewayHandle>, StorageError> {
        self.environment.check()?;

        let mut registration = self.registration.lock()?;
        if let Registration::Active(handle) = &*registration {
            return Ok(Arc::clone(handle));
        }

        *registration = Registration::Registering;
        let gateway = Gateway::new(
            self.scope.clone(),
            Arc::clone(&self.caches),
            self.cache_name.clone(),
        );
        match GatewayHandle::spawn(gateway) {
            Ok(handle) => {
                let handle = Arc::new(handle);
                *registration = Registration::Active(Arc::clone(&handle));
                tracing::info!(scope = %self.scope.base(), "storage gateway active");
                Ok(handle)
            }
            Err(err) => {
                *registration = Registration::Unregistered;
                tracing::error!(%err, "storage gateway registration failed");
                Err(err.into())
            }
        }
    }

    fn cache(&self) -> Result<Arc<Cache>, StorageError> {
        self.init()?;
        Ok(self.caches.open(&self.cache_name)?)
    }

    fn url_for(&self, path: &str) -> Result<Url, StorageError> {
        let mut url = self
            .scope
            .resolve(path)
            .map_err(|source| StorageError::InvalidPath {
                path: path.to_string(),
                source,
            })?;
        url.set_fragment(None);
        Ok(url)
    }

    fn save(
        &self,
        path: &str,
        body: Vec<u8>,
        content_type: Option<&str>,
        fallback: &'static str,
    ) -> Result<(), StorageError> {
        let url = self.url_for(path)?;
        let mime = content_type.unwrap_or_else(|| mime::infer(path, fallback));
        let response = CachedResponse::ok(mime::content_type_header(mime), body);
        self.cache()?.put(url.as_str(), response)?;
        Ok(())
    }

    /// Store text at `path`. Unknown extensions are saved as `text/plain`.
    pub fn save_text(&self, path: &str, content: &str) -> Result<(), StorageError> {
        self.save(path, content.as_bytes().to_vec(), None, mime::TEXT_PLAIN)
    }

    /// Store bytes at `path`, with an optional explicit content type.
    pub fn save_binary(
        &self,
        path: &str,
        data: &[u8],
        content_type: Option<&str>,
    ) -> Result<(), StorageError> {
        self.save(path, data.to_vec(), content_type, mime::OCTET_STREAM)
    }

    /// Stored paths starting with `prefix`, deduplicated and sorted.
    pub fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let prefix = prefix.trim_start_matches('/');
        let mut paths = BTreeSet::new();
        for key in self.cache()?.keys()? {
            let Ok(url) = Url::parse(&key) else {
                continue;
            };
            let relative = url
                .path()
                .strip_prefix(self.scope.path())
                .unwrap_or(url.path());
            let relative = decode_path(relative);
            if !relative.is_empty() && relative.starts_with(prefix) {
                paths.insert(relative);
            }
        }
        Ok(paths.into_iter().collect())
    }

    fn read(&self, path: &str) -> Result<Option<CachedResponse>, StorageError> {
        let url = self.url_for(path)?;
        let cache = self.cache()?;
        if let Some(hit) = cache.match_key(url.as_str())? {
            return Ok(Some(hit));
        }
        let key = url.as_str();
        let stripped = key.split('?').next().unwrap_or(key);
        Ok(cache.match_key(stripped)?)
    }

    /// Stored text at `path`, or `None` when nothing is stored there.
    pub fn read_text(&self, path: &str) -> Result<Option<String>, StorageError> {
        Ok(self
            .read(path)?
            .map(|r| String::from_utf8_lossy(&r.body).into_owned()))
    }

    /// Stored bytes at `path`, or `None` when nothing is stored there.
    pub fn read_binary(&self, path: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.read(path)?.map(|r| r.body))
    }

    /// Drop every stored file.
    ///
    /// The gateway is told first and has dropped its handle by the time the
    /// cache itself is deleted, so no answer from the old cache survives.
    pub fn clear(&self) -> Result<(), StorageError> {
        let gateway = self.init()?;
        gateway.post_message(&GatewayMessage::CacheClear)?;
        self.caches.delete(&self.cache_name)?;
        tracing::info!(cache = %self.cache_name, "virtual file store cleared");
        Ok(())
    }

    /// Issue a GET through the gateway, as a page inside the scope would.
    ///
    /// `href` may be absolute or path-absolute. Requests the gateway passes
    /// through have no network behind them and answer `404`.
    pub fn fetch(&self, href: &str) -> Result<Response, StorageError> {
        let gateway = self.init()?;
        let url = self
            .scope
            .resolve_href(href)
            .map_err(|source| StorageError::InvalidPath {
                path: href.to_string(),
                source,
            })?;
        match gateway.fetch(Request::get(url))? {
            FetchOutcome::Respond(response) => Ok(response),
            FetchOutcome::PassThrough => Ok(Response::not_found()),
        }
    }
}

/// Undo the percent-encoding `Url` applies to path characters, so listed
/// paths match what was saved.
fn decode_path(path: &str) -> String {
    percent_decode_str(path).decode_utf8_lossy().into_owned()
}
