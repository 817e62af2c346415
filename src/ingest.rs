//! Archive ingestion: turns one upload batch into the virtual file store.
//!
//! An upload batch is exactly one ZIP archive per [`Mode`], recognized by
//! filename suffix. Ingestion is full-replace:
//!
//! 1. **Validate** the batch. Every problem is collected and reported
//!    together; nothing is written when any is found.
//! 2. **Clear** the store.
//! 3. **Extract** each archive in [`Mode::INGEST_ORDER`]. Entries are read
//!    sequentially, then written concurrently on the rayon pool:
//!
//! ```text
//! course_web.zip                         store
//! ├── index.html           ──rewrite──▶  contents/web/index.html
//! ├── html/intro.html      ──rewrite──▶  contents/web/html/intro.html
//! └── theme/style.css      ──────────▶   contents/web/theme/style.css
//!                                        theme/style.css   (shared mirror)
//! ```
//!
//! 4. **Record** the default entry: the first nested page of the website
//!    export, used by the preview when a mode has no usable index.
//!
//! `web` is extracted last, so its copy of each shared theme file is the one
//! left in `theme/`.
//!
//! An archive whose entries cannot be read is reported as an
//! [`ExtractionFailure`]; its mode is skipped and the others still load.

use crate::client::{StorageClient, StorageError};
use crate::context::{AppContext, ContextError};
use crate::local::LocalStoreError;
use crate::mime;
use crate::rewrite;
use crate::types::{self, Mode, THEME_PREFIX};
use rayon::prelude::*;
use std::collections::HashMap;
use std::fmt;
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::mpsc::Sender;
use thiserror::Error;
use zip::ZipArchive;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Upload rejected:\n{}", format_issues(.0))]
    Validation(Vec<ValidationIssue>),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("Local store error: {0}")]
    LocalStore(#[from] LocalStoreError),
    #[error(transparent)]
    Context(#[from] ContextError),
}

fn format_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|issue| format!("  - {issue}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// One uploaded archive: its declared filename and raw bytes.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub data: Vec<u8>,
}

impl Upload {
    pub fn new(file_name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            data,
        }
    }

    /// Read an archive from disk, keeping only its filename.
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let data = std::fs::read(path)?;
        let file_name = path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self { file_name, data })
    }
}

/// A reason an upload batch is rejected before anything is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    NoFiles,
    WrongCount { expected: usize, found: usize },
    NotZip(String),
    UnknownSuffix(String),
    DuplicateSuffix { mode: Mode, file_name: String },
    MissingMode(Mode),
    Unreadable { file_name: String, reason: String },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::NoFiles => write!(f, "No files selected."),
            ValidationIssue::WrongCount { expected, found } => {
                write!(f, "Expected exactly {expected} archives, got {found}.")
            }
            ValidationIssue::NotZip(name) => write!(f, "{name}: not a .zip file."),
            ValidationIssue::UnknownSuffix(name) => write!(
                f,
                "{name}: name must end in one of {}.",
                Mode::ALL.map(Mode::suffix).join(", ")
            ),
            ValidationIssue::DuplicateSuffix { mode, file_name } => {
                write!(f, "{file_name}: a second {} archive.", mode.suffix())
            }
            ValidationIssue::MissingMode(mode) => {
                write!(f, "Missing files for: {} ({}).", mode, mode.suffix())
            }
            ValidationIssue::Unreadable { file_name, reason } => {
                write!(f, "{file_name}: not a readable ZIP archive ({reason}).")
            }
        }
    }
}

/// An archive whose entries could not be extracted. Its mode is skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionFailure {
    pub mode: Mode,
    pub file_name: String,
    pub reason: String,
}

/// Per-mode counts from one ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModeSummary {
    pub mode: Option<Mode>,
    /// Entries written under `contents/<mode>/`.
    pub stored: usize,
    /// Theme entries also written under the shared `theme/`.
    pub mirrored: usize,
    /// HTML documents passed through the rewriter.
    pub rewritten: usize,
    /// Entry names refused (traversal, absolute, `__MACOSX`).
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    /// One summary per extracted mode, in ingestion order.
    pub modes: Vec<ModeSummary>,
    pub failures: Vec<ExtractionFailure>,
    /// Default entry recorded for the preview, if the website had one.
    pub default_entry: Option<String>,
}

impl IngestReport {
    pub fn total_stored(&self) -> usize {
        self.modes.iter().map(|m| m.stored).sum()
    }
}

/// Progress reported while ingesting.
#[derive(Debug, Clone)]
pub enum IngestEvent {
    Cleared,
    ArchiveStarted {
        mode: Mode,
        file_name: String,
        entry_count: usize,
    },
    ArchiveFinished(ModeSummary),
    ArchiveFailed(ExtractionFailure),
}

fn emit(events: &Option<Sender<IngestEvent>>, event: IngestEvent) {
    if let Some(tx) = events {
        tx.send(event).ok();
    }
}

// ============================================================================
// Validation
// ============================================================================

/// Check an upload batch and map each archive to its mode.
///
/// Naming problems are all reported together. Archives are only opened once
/// the names are in order.
pub fn validate_uploads(uploads: &[Upload]) -> Result<HashMap<Mode, &Upload>, Vec<ValidationIssue>> {
    if uploads.is_empty() {
        return Err(vec![ValidationIssue::NoFiles]);
    }

    let mut issues = Vec::new();
    let mut by_mode: HashMap<Mode, &Upload> = HashMap::new();

    if uploads.len() != Mode::ALL.len() {
        issues.push(ValidationIssue::WrongCount {
            expected: Mode::ALL.len(),
            found: uploads.len(),
        });
    }

    for upload in uploads {
        if types::extension(&upload.file_name) != ".zip" {
            issues.push(ValidationIssue::NotZip(upload.file_name.clone()));
            continue;
        }
        match Mode::from_file_name(&upload.file_name) {
            None => issues.push(ValidationIssue::UnknownSuffix(upload.file_name.clone())),
            Some(mode) if by_mode.contains_key(&mode) => {
                issues.push(ValidationIssue::DuplicateSuffix {
                    mode,
                    file_name: upload.file_name.clone(),
                })
            }
            Some(mode) => {
                by_mode.insert(mode, upload);
            }
        }
    }

    for mode in Mode::ALL {
        if !by_mode.contains_key(&mode) {
            issues.push(ValidationIssue::MissingMode(mode));
        }
    }

    if !issues.is_empty() {
        return Err(issues);
    }

    for mode in Mode::ALL {
        let upload = by_mode[&mode];
        if let Err(err) = ZipArchive::new(Cursor::new(upload.data.as_slice())) {
            issues.push(ValidationIssue::Unreadable {
                file_name: upload.file_name.clone(),
                reason: err.to_string(),
            });
        }
    }

    if issues.is_empty() {
        Ok(by_mode)
    } else {
        Err(issues)
    }
}

// ============================================================================
// Extraction
// ============================================================================

/// Why an entry name is refused, if it is.
fn refuse_reason(name: &str) -> Option<&'static str> {
    if name.starts_with("__MACOSX") {
        Some("resource fork")
    } else if name.contains("..") {
        Some("path traversal")
    } else if name.starts_with('/') || name.starts_with('\\') || name.contains(':') {
        Some("absolute path")
    } else {
        None
    }
}

/// Largest entry accepted from an archive, after decompression.
pub const MAX_ENTRY_BYTES: u64 = 256 * 1024 * 1024;

const PREALLOC_BYTES: u64 = 1024 * 1024;

#[derive(Error, Debug)]
enum ExtractError {
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{entry}: larger than 256 MiB")]
    TooLarge { entry: String },
}

#[derive(Debug)]
struct Entry {
    path: String,
    data: Vec<u8>,
}

struct Extracted {
    entries: Vec<Entry>,
    skipped: Vec<String>,
}

/// Read every usable entry of an archive into memory, in archive order.
///
/// Declared sizes are not trusted: an entry claiming more than
/// [`MAX_ENTRY_BYTES`], or inflating past it, fails the archive.
fn extract(data: &[u8]) -> Result<Extracted, ExtractError> {
    let mut archive = ZipArchive::new(Cursor::new(data))?;
    let mut entries = Vec::with_capacity(archive.len());
    let mut skipped = Vec::new();

    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        if file.is_dir() {
            continue;
        }
        let path = file.name().to_string();
        if path.is_empty() {
            continue;
        }
        if let Some(reason) = refuse_reason(&path) {
            tracing::debug!(entry = %path, reason, "entry refused");
            skipped.push(path);
            continue;
        }
        if file.size() > MAX_ENTRY_BYTES {
            return Err(ExtractError::TooLarge { entry: path });
        }
        let mut data = Vec::with_capacity(file.size().min(PREALLOC_BYTES) as usize);
        (&mut file).take(MAX_ENTRY_BYTES + 1).read_to_end(&mut data)?;
        if data.len() as u64 > MAX_ENTRY_BYTES {
            return Err(ExtractError::TooLarge { entry: path });
        }
        entries.push(Entry { path, data });
    }

    Ok(Extracted { entries, skipped })
}

/// First nested website page that is not an index.
fn default_entry_candidate(entries: &[Entry]) -> Option<String> {
    entries
        .iter()
        .filter(|e| types::extension(&e.path) == ".html")
        .filter(|e| e.path.starts_with("html/"))
        .map(|e| types::file_name(&e.path))
        .find(|name| *name != "index.html")
        .map(str::to_string)
}

#[derive(Debug, Default)]
struct EntryOutcome {
    rewritten: bool,
    mirrored: bool,
}

/// Store one entry under its mode and, for theme assets, the shared theme.
fn store_entry(
    client: &StorageClient,
    mode: Mode,
    entry: &Entry,
) -> Result<EntryOutcome, StorageError> {
    let dest = types::mode_path(mode, &entry.path);
    let ext = types::extension(&entry.path);
    let is_text = mime::is_text_path(&entry.path);
    let text = if is_text {
        std::str::from_utf8(&entry.data).ok()
    } else {
        None
    };

    let mut outcome = EntryOutcome::default();
    if ext == ".html" {
        // Pages in a legacy encoding still need the shared theme and the
        // hook; undecodable bytes become U+FFFD.
        let content = String::from_utf8_lossy(&entry.data);
        if text.is_none() {
            tracing::debug!(entry = %entry.path, "html entry is not UTF-8, decoding lossily");
        }
        let is_index = types::file_name(&entry.path) == "index.html";
        client.save_text(&dest, &rewrite::rewrite_html(&content, is_index))?;
        outcome.rewritten = true;
    } else {
        if is_text && text.is_none() {
            tracing::debug!(entry = %entry.path, "text entry is not UTF-8, storing as binary");
        }
        match text {
            Some(content) => client.save_text(&dest, content)?,
            None => client.save_binary(&dest, &entry.data, None)?,
        }
    }

    // The shared copy keeps the archive's original bytes.
    if let Some(relative) = entry.path.strip_prefix(THEME_PREFIX) {
        let shared = types::theme_path(relative);
        match text {
            Some(content) => client.save_text(&shared, content)?,
            None => client.save_binary(&shared, &entry.data, None)?,
        }
        outcome.mirrored = true;
    }

    Ok(outcome)
}

fn ingest_archive(
    client: &StorageClient,
    mode: Mode,
    upload: &Upload,
    events: &Option<Sender<IngestEvent>>,
    default_entry: &mut Option<String>,
) -> Result<Result<ModeSummary, ExtractionFailure>, StorageError> {
    let extracted = match extract(&upload.data) {
        Ok(extracted) => extracted,
        Err(err) => {
            return Ok(Err(ExtractionFailure {
                mode,
                file_name: upload.file_name.clone(),
                reason: err.to_string(),
            }));
        }
    };

    emit(
        events,
        IngestEvent::ArchiveStarted {
            mode,
            file_name: upload.file_name.clone(),
            entry_count: extracted.entries.len(),
        },
    );

    if mode == Mode::Web && default_entry.is_none() {
        *default_entry = default_entry_candidate(&extracted.entries);
    }

    let outcomes = extracted
        .entries
        .par_iter()
        .map(|entry| store_entry(client, mode, entry))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Ok(ModeSummary {
        mode: Some(mode),
        stored: outcomes.len(),
        mirrored: outcomes.iter().filter(|o| o.mirrored).count(),
        rewritten: outcomes.iter().filter(|o| o.rewritten).count(),
        skipped: extracted.skipped,
    }))
}

/// Replace the store's contents with an upload batch.
///
/// Validation failures leave the store untouched. Storage failures abort
/// the run; the next successful ingestion starts by clearing whatever was
/// partially written.
pub fn ingest(
    ctx: &AppContext,
    uploads: &[Upload],
    events: Option<Sender<IngestEvent>>,
) -> Result<IngestReport, IngestError> {
    let by_mode = validate_uploads(uploads).map_err(IngestError::Validation)?;

    let client = ctx.storage();
    client.init()?;
    ctx.reset()?;
    emit(&events, IngestEvent::Cleared);

    let mut report = IngestReport::default();
    let mut default_entry = None;

    for mode in Mode::INGEST_ORDER {
        let upload = by_mode[&mode];
        match ingest_archive(client, mode, upload, &events, &mut default_entry)? {
            Ok(summary) => {
                tracing::info!(
                    %mode,
                    stored = summary.stored,
                    mirrored = summary.mirrored,
                    rewritten = summary.rewritten,
                    skipped = summary.skipped.len(),
                    "archive ingested"
                );
                emit(&events, IngestEvent::ArchiveFinished(summary.clone()));
                report.modes.push(summary);
            }
            Err(failure) => {
                tracing::warn!(%mode, file = %failure.file_name, reason = %failure.reason, "archive skipped");
                emit(&events, IngestEvent::ArchiveFailed(failure.clone()));
                report.failures.push(failure);
            }
        }
    }

    match &default_entry {
        Some(entry) => ctx.set_default_entry(entry)?,
        None => ctx.clear_default_entry()?,
    }
    report.default_entry = default_entry;
    Ok(report)
}
