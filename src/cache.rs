//! Persistent response cache backing the virtual file store.
//!
//! This is the shared data plane between the [`gateway`](crate::gateway) and
//! the [`client`](crate::client): both open the same named [`Cache`] from a
//! [`CacheStorage`] and neither owns it exclusively. The gateway answers
//! requests out of it; the client writes, lists, and reads through it.
//!
//! # Design
//!
//! The cache is **path-keyed, content-addressed**. Keys are absolute request
//! URLs (as strings; URL semantics belong to the callers). Each key maps to a
//! [`CacheEntry`] recording status, content type, and the SHA-256 digest of
//! the body. Bodies live once per digest in a blob directory, so identical
//! assets mirrored into several namespaces (a mode's `theme/` and the shared
//! `theme/`) are stored once.
//!
//! A second `put` to the same key replaces the entry. When that leaves a
//! digest unreferenced, its blob is removed.
//!
//! ## Storage
//!
//! ```text
//! <root>/
//! └── <cache-name>/
//!     ├── manifest.json     # key → entry map, rewritten atomically on each put
//!     └── blobs/
//!         └── <sha256>      # one file per distinct body
//! ```
//!
//! A missing, corrupt, or wrong-version manifest loads as an empty cache.
//!
//! ## Deletion
//!
//! [`CacheStorage::delete`] removes the directory and marks any open handle
//! as deleted. A deleted handle rejects writes and answers no reads; holders
//! re-open by name to get a fresh, empty cache.

use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use thiserror::Error;

/// Name of the manifest file within a cache directory.
const MANIFEST_FILENAME: &str = "manifest.json";

/// Directory holding content-addressed bodies.
const BLOBS_DIR: &str = "blobs";

/// Version of the manifest format. Bump this to invalidate all existing
/// caches when the format or key computation changes.
const MANIFEST_VERSION: u32 = 1;

/// Disambiguates temp files written concurrently by this process.
static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid cache name: {0:?}")]
    InvalidName(String),
    #[error("Cache {0:?} has been deleted")]
    Deleted(String),
    #[error("Body {digest} for {key} is missing from the blob store")]
    MissingBlob { key: String, digest: String },
    #[error("Cache lock poisoned")]
    Poisoned,
}

impl<T> From<PoisonError<T>> for CacheError {
    fn from(_: PoisonError<T>) -> Self {
        CacheError::Poisoned
    }
}

/// A response as stored in and answered from the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub status: u16,
    /// Full `Content-Type` header value, including any charset.
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl CachedResponse {
    /// A `200 OK` response with the given content type.
    pub fn ok(content_type: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            status: 200,
            content_type: Some(content_type.into()),
            body,
        }
    }
}

/// Manifest record for one cached key.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct CacheEntry {
    pub digest: String,
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub size: u64,
}

/// On-disk manifest mapping keys to their entries.
///
/// `content_index` counts references per digest so overwritten bodies can
/// be garbage-collected.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CacheManifest {
    pub version: u32,
    pub entries: BTreeMap<String, CacheEntry>,
    /// Runtime reference counts: digest → number of keys using it.
    /// Built at load time, maintained on insert. Never serialized.
    #[serde(skip)]
    content_index: HashMap<String, usize>,
}

impl CacheManifest {
    /// Create an empty manifest.
    pub fn empty() -> Self {
        Self {
            version: MANIFEST_VERSION,
            entries: BTreeMap::new(),
            content_index: HashMap::new(),
        }
    }

    /// Load from a cache directory. Returns an empty manifest if the file
    /// doesn't exist or can't be parsed (version mismatch, corruption).
    pub fn load(cache_dir: &Path) -> Self {
        let path = cache_dir.join(MANIFEST_FILENAME);
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(_) => return Self::empty(),
        };
        let mut manifest: Self = match serde_json::from_str(&content) {
            Ok(m) => m,
            Err(err) => {
                tracing::warn!(path = %path.display(), %err, "discarding unreadable cache manifest");
                return Self::empty();
            }
        };
        if manifest.version != MANIFEST_VERSION {
            return Self::empty();
        }
        manifest.content_index = build_content_index(&manifest.entries);
        manifest
    }

    /// Save to a cache directory, replacing the previous manifest atomically.
    pub fn save(&self, cache_dir: &Path) -> Result<(), CacheError> {
        let json = serde_json::to_vec(self)?;
        write_atomic(&cache_dir.join(MANIFEST_FILENAME), &json)?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Record an entry, replacing any previous one under the same key.
    ///
    /// Returns the digest of the replaced body when no key references it
    /// any more.
    pub fn insert(&mut self, key: String, entry: CacheEntry) -> Option<String> {
        *self.content_index.entry(entry.digest.clone()).or_insert(0) += 1;
        let previous = self.entries.insert(key, entry)?;
        self.release(&previous.digest)
    }

    fn release(&mut self, digest: &str) -> Option<String> {
        let count = self.content_index.get_mut(digest)?;
        *count -= 1;
        if *count == 0 {
            self.content_index.remove(digest);
            Some(digest.to_string())
        } else {
            None
        }
    }

    /// Number of keys referencing a digest.
    pub fn references(&self, digest: &str) -> usize {
        self.content_index.get(digest).copied().unwrap_or(0)
    }
}

/// Build the digest reference counts from the entries map.
fn build_content_index(entries: &BTreeMap<String, CacheEntry>) -> HashMap<String, usize> {
    let mut index = HashMap::new();
    for entry in entries.values() {
        *index.entry(entry.digest.clone()).or_insert(0) += 1;
    }
    index
}

/// SHA-256 of a body, returned as a hex string.
pub fn hash_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Write through a uniquely-named temp file and rename into place.
fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let file_name = path
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{file_name}.{}.{n}.tmp", std::process::id()));
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)
}

/// One named, persistent cache.
#[derive(Debug)]
pub struct Cache {
    name: String,
    dir: PathBuf,
    manifest: RwLock<CacheManifest>,
    deleted: AtomicBool,
}

impl Cache {
    fn open_at(name: &str, dir: PathBuf) -> Result<Self, CacheError> {
        fs::create_dir_all(dir.join(BLOBS_DIR))?;
        let manifest = CacheManifest::load(&dir);
        tracing::debug!(cache = name, entries = manifest.entries.len(), "opened cache");
        Ok(Self {
            name: name.to_string(),
            dir,
            manifest: RwLock::new(manifest),
            deleted: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether [`CacheStorage::delete`] has dropped this cache.
    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    fn blob_path(&self, digest: &str) -> PathBuf {
        self.dir.join(BLOBS_DIR).join(digest)
    }

    fn write_blob(&self, digest: &str, body: &[u8]) -> io::Result<()> {
        let path = self.blob_path(digest);
        if path.exists() {
            return Ok(());
        }
        write_atomic(&path, body)
    }

    /// Store a response under `key`, replacing any previous one.
    pub fn put(&self, key: &str, response: CachedResponse) -> Result<(), CacheError> {
        if self.is_deleted() {
            return Err(CacheError::Deleted(self.name.clone()));
        }
        let digest = hash_bytes(&response.body);
        // Bodies are written outside the lock so concurrent puts overlap;
        // the lock only covers manifest bookkeeping.
        self.write_blob(&digest, &response.body)?;

        let mut manifest = self.manifest.write()?;
        if self.is_deleted() {
            return Err(CacheError::Deleted(self.name.clone()));
        }
        let entry = CacheEntry {
            digest: digest.clone(),
            status: response.status,
            content_type: response.content_type,
            size: response.body.len() as u64,
        };
        let orphan = manifest.insert(key.to_string(), entry);
        if let Some(orphan) = orphan
            && orphan != digest
        {
            match fs::remove_file(self.blob_path(&orphan)) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        // A concurrent overwrite may have collected this digest between the
        // optimistic write above and taking the lock.
        self.write_blob(&digest, &response.body)?;
        manifest.save(&self.dir)?;
        tracing::trace!(cache = %self.name, key, %digest, "stored response");
        Ok(())
    }

    /// Look up the response stored under exactly `key`.
    pub fn match_key(&self, key: &str) -> Result<Option<CachedResponse>, CacheError> {
        if self.is_deleted() {
            return Ok(None);
        }
        let entry = match self.manifest.read()?.get(key) {
            Some(entry) => entry.clone(),
            None => return Ok(None),
        };
        match fs::read(self.blob_path(&entry.digest)) {
            Ok(body) => Ok(Some(CachedResponse {
                status: entry.status,
                content_type: entry.content_type,
                body,
            })),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if self.is_deleted() {
                    Ok(None)
                } else {
                    Err(CacheError::MissingBlob {
                        key: key.to_string(),
                        digest: entry.digest,
                    })
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// All stored keys, sorted.
    pub fn keys(&self) -> Result<Vec<String>, CacheError> {
        if self.is_deleted() {
            return Ok(Vec::new());
        }
        Ok(self.manifest.read()?.entries.keys().cloned().collect())
    }

    pub fn len(&self) -> usize {
        if self.is_deleted() {
            return 0;
        }
        self.manifest.read().map(|m| m.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Registry of named caches under one root directory.
///
/// Opening the same name twice yields the same shared [`Cache`] instance, so
/// every component in the process sees the same in-memory manifest.
#[derive(Debug)]
pub struct CacheStorage {
    root: PathBuf,
    open: Mutex<HashMap<String, Arc<Cache>>>,
}

impl CacheStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            open: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn cache_dir(&self, name: &str) -> Result<PathBuf, CacheError> {
        let valid = !name.is_empty()
            && !name.starts_with('.')
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(CacheError::InvalidName(name.to_string()));
        }
        Ok(self.root.join(name))
    }

    /// Open (creating if needed) the cache called `name`.
    pub fn open(&self, name: &str) -> Result<Arc<Cache>, CacheError> {
        let dir = self.cache_dir(name)?;
        let mut open = self.open.lock()?;
        if let Some(cache) = open.get(name)
            && !cache.is_deleted()
        {
            return Ok(Arc::clone(cache));
        }
        let cache = Arc::new(Cache::open_at(name, dir)?);
        open.insert(name.to_string(), Arc::clone(&cache));
        Ok(cache)
    }

    /// Whether a cache called `name` exists, open or on disk.
    pub fn has(&self, name: &str) -> bool {
        match self.cache_dir(name) {
            Ok(dir) => dir.exists(),
            Err(_) => false,
        }
    }

    /// Delete the cache called `name` and everything in it.
    ///
    /// Returns `true` if there was something to delete.
    pub fn delete(&self, name: &str) -> Result<bool, CacheError> {
        let dir = self.cache_dir(name)?;
        let mut open = self.open.lock()?;
        let handle = open.remove(name);
        let mut existed = false;
        if let Some(cache) = handle {
            // Hold the manifest lock so no put lands between the flag and
            // the directory removal.
            let _guard = cache.manifest.write()?;
            cache.deleted.store(true, Ordering::Release);
            existed = true;
        }
        match fs::remove_dir_all(&dir) {
            Ok(()) => existed = true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        if existed {
            tracing::debug!(cache = name, "deleted cache");
        }
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const NAME: &str = "test-cache-v1";

    fn html(body: &str) -> CachedResponse {
        CachedResponse::ok("text/html; charset=utf-8", body.as_bytes().to_vec())
    }

    // =========================================================================
    // CacheManifest basics
    // =========================================================================

    #[test]
    fn empty_manifest_has_no_entries() {
        let m = CacheManifest::empty();
        assert_eq!(m.version, MANIFEST_VERSION);
        assert!(m.entries.is_empty());
        assert!(m.content_index.is_empty());
    }

    #[test]
    fn insert_reports_orphaned_digest() {
        let mut m = CacheManifest::empty();
        let entry = |d: &str| CacheEntry {
            digest: d.into(),
            status: 200,
            content_type: None,
            size: 1,
        };
        assert_eq!(m.insert("a".into(), entry("d1")), None);
        assert_eq!(m.insert("b".into(), entry("d1")), None);
        assert_eq!(m.references("d1"), 2);

        // d1 still referenced by "b"
        assert_eq!(m.insert("a".into(), entry("d2")), None);
        // last reference gone
        assert_eq!(m.insert("b".into(), entry("d2")), Some("d1".to_string()));
        assert_eq!(m.references("d1"), 0);
        assert_eq!(m.references("d2"), 2);
    }

    #[test]
    fn load_corrupt_json_returns_empty() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(MANIFEST_FILENAME), "not json").unwrap();
        assert!(CacheManifest::load(tmp.path()).entries.is_empty());
    }

    #[test]
    fn load_wrong_version_returns_empty() {
        let tmp = TempDir::new().unwrap();
        let json = format!(
            r#"{{"version": {}, "entries": {{"k": {{"digest":"d","status":200,"size":1}}}}}}"#,
            MANIFEST_VERSION + 1
        );
        fs::write(tmp.path().join(MANIFEST_FILENAME), json).unwrap();
        assert!(CacheManifest::load(tmp.path()).entries.is_empty());
    }

    #[test]
    fn content_index_rebuilt_on_load() {
        let tmp = TempDir::new().unwrap();
        let mut m = CacheManifest::empty();
        let entry = CacheEntry {
            digest: "same".into(),
            status: 200,
            content_type: None,
            size: 4,
        };
        m.insert("x".into(), entry.clone());
        m.insert("y".into(), entry);
        m.save(tmp.path()).unwrap();

        let loaded = CacheManifest::load(tmp.path());
        assert_eq!(loaded.references("same"), 2);
    }

    // =========================================================================
    // Cache put / match
    // =========================================================================

    #[test]
    fn put_then_match() {
        let tmp = TempDir::new().unwrap();
        let storage = CacheStorage::new(tmp.path());
        let cache = storage.open(NAME).unwrap();

        cache.put("http://h/theme/a.css", html("body{}")).unwrap();
        let got = cache.match_key("http://h/theme/a.css").unwrap().unwrap();
        assert_eq!(got.status, 200);
        assert_eq!(got.body, b"body{}");
        assert_eq!(got.content_type.as_deref(), Some("text/html; charset=utf-8"));
    }

    #[test]
    fn match_missing_key_is_none() {
        let tmp = TempDir::new().unwrap();
        let cache = CacheStorage::new(tmp.path()).open(NAME).unwrap();
        assert_eq!(cache.match_key("http://h/nothing").unwrap(), None);
    }

    #[test]
    fn overwrite_replaces_and_collects_old_blob() {
        let tmp = TempDir::new().unwrap();
        let cache = CacheStorage::new(tmp.path()).open(NAME).unwrap();

        cache.put("k", html("one")).unwrap();
        let old_blob = cache.blob_path(&hash_bytes(b"one"));
        assert!(old_blob.exists());

        cache.put("k", html("two")).unwrap();
        assert_eq!(cache.match_key("k").unwrap().unwrap().body, b"two");
        assert!(!old_blob.exists());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn identical_bodies_share_one_blob() {
        let tmp = TempDir::new().unwrap();
        let cache = CacheStorage::new(tmp.path()).open(NAME).unwrap();

        cache.put("contents/web/theme/s.css", html("x")).unwrap();
        cache.put("theme/s.css", html("x")).unwrap();

        let blobs = fs::read_dir(tmp.path().join(NAME).join(BLOBS_DIR))
            .unwrap()
            .count();
        assert_eq!(blobs, 1);

        // Overwriting one key keeps the blob for the other.
        cache.put("theme/s.css", html("y")).unwrap();
        assert_eq!(
            cache.match_key("contents/web/theme/s.css").unwrap().unwrap().body,
            b"x"
        );
    }

    #[test]
    fn entries_persist_across_storage_instances() {
        let tmp = TempDir::new().unwrap();
        {
            let cache = CacheStorage::new(tmp.path()).open(NAME).unwrap();
            cache.put("a", html("alpha")).unwrap();
            cache.put("b", html("beta")).unwrap();
        }
        let cache = CacheStorage::new(tmp.path()).open(NAME).unwrap();
        assert_eq!(cache.keys().unwrap(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(cache.match_key("b").unwrap().unwrap().body, b"beta");
    }

    #[test]
    fn open_twice_shares_instance() {
        let tmp = TempDir::new().unwrap();
        let storage = CacheStorage::new(tmp.path());
        let a = storage.open(NAME).unwrap();
        let b = storage.open(NAME).unwrap();
        a.put("k", html("v")).unwrap();
        assert!(b.match_key("k").unwrap().is_some());
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn concurrent_puts_all_land() {
        use rayon::prelude::*;
        let tmp = TempDir::new().unwrap();
        let cache = CacheStorage::new(tmp.path()).open(NAME).unwrap();

        (0..64).into_par_iter().for_each(|i| {
            cache
                .put(&format!("k{i}"), html(&format!("body {}", i % 8)))
                .unwrap();
        });
        assert_eq!(cache.len(), 64);
        assert_eq!(cache.match_key("k9").unwrap().unwrap().body, b"body 1");
    }

    // =========================================================================
    // Deletion
    // =========================================================================

    #[test]
    fn delete_removes_everything() {
        let tmp = TempDir::new().unwrap();
        let storage = CacheStorage::new(tmp.path());
        let cache = storage.open(NAME).unwrap();
        cache.put("k", html("v")).unwrap();

        assert!(storage.delete(NAME).unwrap());
        assert!(!storage.has(NAME));
        assert!(storage.open(NAME).unwrap().is_empty());
    }

    #[test]
    fn delete_missing_cache_reports_false() {
        let tmp = TempDir::new().unwrap();
        let storage = CacheStorage::new(tmp.path());
        assert!(!storage.delete(NAME).unwrap());
    }

    #[test]
    fn stale_handle_after_delete() {
        let tmp = TempDir::new().unwrap();
        let storage = CacheStorage::new(tmp.path());
        let stale = storage.open(NAME).unwrap();
        stale.put("k", html("v")).unwrap();
        storage.delete(NAME).unwrap();

        assert!(stale.is_deleted());
        assert_eq!(stale.match_key("k").unwrap(), None);
        assert!(stale.keys().unwrap().is_empty());
        assert!(matches!(
            stale.put("k", html("v")),
            Err(CacheError::Deleted(_))
        ));

        let fresh = storage.open(NAME).unwrap();
        assert!(!Arc::ptr_eq(&stale, &fresh));
        fresh.put("k", html("again")).unwrap();
        assert_eq!(fresh.match_key("k").unwrap().unwrap().body, b"again");
    }

    #[test]
    fn invalid_names_rejected() {
        let tmp = TempDir::new().unwrap();
        let storage = CacheStorage::new(tmp.path());
        for name in ["", "../escape", "a/b", ".hidden"] {
            assert!(matches!(
                storage.open(name),
                Err(CacheError::InvalidName(_))
            ));
        }
    }

    // =========================================================================
    // Hashing
    // =========================================================================

    #[test]
    fn hash_bytes_deterministic() {
        let h1 = hash_bytes(b"hello world");
        let h2 = hash_bytes(b"hello world");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
        assert_ne!(h1, hash_bytes(b"hello world!"));
    }
}
