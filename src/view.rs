//! View resolution for the preview surface.
//!
//! Each mode may or may not have a usable entry document, depending on what
//! the export contained. Resolution checks a short list of candidates per
//! mode through the gateway and keeps the first that answers 2xx:
//!
//! ```text
//! page:        contents/page/index.html → contents/page/html/<entry> → contents/page/html/index.html
//! web, scorm:  contents/<mode>/html/<entry> → contents/<mode>/index.html → contents/<mode>/html/index.html
//! ```
//!
//! `<entry>` is the default entry recorded at ingestion (`index.html` when
//! none). The first web/scorm candidate only exists when a non-index entry
//! is known.
//!
//! Every existence check and every activation appends a fresh `v=<stamp>`
//! so no cached answer from an earlier ingestion is ever shown.

use crate::client::{StorageClient, StorageError};
use crate::context::AppContext;
use crate::types::Mode;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Entry document assumed when ingestion recorded none.
pub const INDEX_ENTRY: &str = "index.html";

/// Shown instead of a preview when no mode resolved.
pub const EMPTY_MESSAGE: &str =
    "No preview content available yet. Upload your exported packages from the Upload page.";

/// Existence check for a path-absolute URL.
pub trait Existence {
    /// `true` when a GET for `href` answers 2xx. Any failure is `false`.
    fn exists(&self, href: &str) -> bool;
}

impl Existence for StorageClient {
    fn exists(&self, href: &str) -> bool {
        match self.fetch(href) {
            Ok(response) => response.ok(),
            Err(err) => {
                tracing::debug!(%href, %err, "existence check failed");
                false
            }
        }
    }
}

/// Source of strictly increasing cache-busting stamps.
///
/// Stamps follow wall-clock milliseconds but never repeat, even when two
/// are taken within the same millisecond.
#[derive(Debug, Default)]
pub struct CacheBuster {
    last: AtomicU64,
}

impl CacheBuster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stamp(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let mut last = self.last.load(Ordering::Relaxed);
        loop {
            let next = now.max(last + 1);
            match self
                .last
                .compare_exchange_weak(last, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(current) => last = current,
            }
        }
    }
}

/// Append `v=<stamp>` with the right separator.
pub fn with_cache_buster(url: &str, stamp: u64) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}v={stamp}")
}

/// Candidate entry documents for `mode`, most preferred first, without
/// duplicates. `root` is the scope path and always ends in `/`.
pub fn candidates(root: &str, mode: Mode, default_entry: &str) -> Vec<String> {
    let base = format!("{root}contents/{}", mode.id());
    let entry = if default_entry.trim().is_empty() {
        INDEX_ENTRY
    } else {
        default_entry.trim()
    };

    let mut list = Vec::with_capacity(3);
    if mode == Mode::Page {
        list.push(format!("{base}/index.html"));
        list.push(format!("{base}/html/{entry}"));
        list.push(format!("{base}/html/index.html"));
    } else {
        if entry != INDEX_ENTRY {
            list.push(format!("{base}/html/{entry}"));
        }
        list.push(format!("{base}/index.html"));
        list.push(format!("{base}/html/index.html"));
    }

    let mut unique = Vec::with_capacity(list.len());
    for candidate in list {
        if !unique.contains(&candidate) {
            unique.push(candidate);
        }
    }
    unique
}

/// What the preview surface is currently showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveView {
    Mode(Mode),
    ConfigEditor,
}

/// Resolved preview state: one source per available mode and at most one
/// active surface.
#[derive(Debug)]
pub struct Preview {
    sources: BTreeMap<Mode, String>,
    active: Option<ActiveView>,
    buster: CacheBuster,
}

impl Preview {
    /// Check every mode's candidates in order and keep the first hit.
    pub fn resolve(store: &impl Existence, root: &str, default_entry: Option<&str>) -> Self {
        let buster = CacheBuster::new();
        let entry = default_entry.unwrap_or(INDEX_ENTRY);
        let mut sources = BTreeMap::new();

        for mode in Mode::ALL {
            let hit = candidates(root, mode, entry)
                .into_iter()
                .find(|candidate| store.exists(&with_cache_buster(candidate, buster.stamp())));
            match hit {
                Some(source) => {
                    tracing::debug!(%mode, %source, "view resolved");
                    sources.insert(mode, source);
                }
                None => tracing::debug!(%mode, "view unavailable"),
            }
        }

        Self {
            sources,
            active: None,
            buster,
        }
    }

    /// Resolve against the context's store, registering the gateway first.
    pub fn from_context(ctx: &AppContext) -> Result<Self, StorageError> {
        ctx.init()?;
        let storage = ctx.storage();
        let default_entry = ctx.default_entry();
        Ok(Self::resolve(
            storage,
            storage.scope().path(),
            default_entry.as_deref(),
        ))
    }

    /// Modes with a resolved source, in preference order.
    pub fn available(&self) -> Vec<Mode> {
        self.sources.keys().copied().collect()
    }

    /// Resolved source of `mode`, without a cache-buster.
    pub fn source(&self, mode: Mode) -> Option<&str> {
        self.sources.get(&mode).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn active(&self) -> Option<ActiveView> {
        self.active
    }

    /// First available mode in `web, page, scorm` order.
    pub fn initial_view(&self) -> Option<Mode> {
        Mode::ALL
            .into_iter()
            .find(|mode| self.sources.contains_key(mode))
    }

    /// Activate `mode` and return its source with a fresh cache-buster.
    /// Unavailable modes return `None` and leave the active view alone.
    pub fn select(&mut self, mode: Mode) -> Option<String> {
        let source = self.sources.get(&mode)?;
        let src = with_cache_buster(source, self.buster.stamp());
        self.active = Some(ActiveView::Mode(mode));
        Some(src)
    }

    /// Show the configuration editor instead of a mode.
    pub fn activate_config(&mut self) {
        self.active = Some(ActiveView::ConfigEditor);
    }

    /// Activate the initial view: the preferred available mode, or the
    /// configuration editor when nothing resolved.
    pub fn start(&mut self) -> Option<String> {
        match self.initial_view() {
            Some(mode) => self.select(mode),
            None => {
                self.activate_config();
                None
            }
        }
    }

    /// Informational message for the empty state.
    pub fn info_message(&self) -> Option<&'static str> {
        self.is_empty().then_some(EMPTY_MESSAGE)
    }
}
