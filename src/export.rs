//! Theme export: repackages the shared `theme/` namespace as a ZIP.
//!
//! The archive holds every stored theme file at its path relative to
//! `theme/` and is named after the `<name>` in `theme/config.xml`, reduced
//! to a single file name component. Output is
//! deterministic: entries are sorted and carry a fixed timestamp, so the
//! same store always exports byte-identical archives.

use crate::client::StorageError;
use crate::context::AppContext;
use crate::theme_config::{ConfigRecord, FALLBACK_NAME, file_stem};
use crate::types::{CONFIG_PATH, THEME_PREFIX};
use std::io::{Cursor, Write};
use thiserror::Error;
use zip::DateTime;
use zip::write::SimpleFileOptions;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("No theme files found. Upload content first.")]
    NoThemeFiles,
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A built theme archive, ready to be written out.
#[derive(Debug)]
pub struct ThemeArchive {
    /// `<name>.zip`.
    pub file_name: String,
    pub bytes: Vec<u8>,
    /// Paths inside the archive, in order.
    pub entries: Vec<String>,
    /// Non-fatal problems, e.g. a missing `config.xml`.
    pub warnings: Vec<String>,
}

/// Archive base name from the stored config, plus a warning when it had to
/// fall back.
fn theme_name(ctx: &AppContext) -> Result<(String, Option<String>), StorageError> {
    let Some(xml) = ctx.storage().read_text(CONFIG_PATH)? else {
        return Ok((
            FALLBACK_NAME.to_string(),
            Some("config.xml not found. Using default name.".into()),
        ));
    };
    match ConfigRecord::from_xml(&xml) {
        Ok(record) if record.name.trim().is_empty() => Ok((FALLBACK_NAME.to_string(), None)),
        Ok(record) => match file_stem(&record.name) {
            Some(stem) => Ok((stem, None)),
            None => Ok((
                FALLBACK_NAME.to_string(),
                Some("config.xml name is not a usable file name. Using default name.".into()),
            )),
        },
        Err(err) => {
            tracing::warn!(%err, "config.xml unreadable during export");
            Ok((
                FALLBACK_NAME.to_string(),
                Some("Could not read config.xml. Using default name.".into()),
            ))
        }
    }
}

pub fn export_theme(ctx: &AppContext) -> Result<ThemeArchive, ExportError> {
    let storage = ctx.storage();
    let paths = storage.list(THEME_PREFIX)?;
    if paths.is_empty() {
        return Err(ExportError::NoThemeFiles);
    }

    let (name, warning) = theme_name(ctx)?;
    let mut warnings: Vec<String> = warning.into_iter().collect();

    let options = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .last_modified_time(DateTime::default());
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let mut entries = Vec::with_capacity(paths.len());

    // `list` is sorted, so entries are too.
    for path in &paths {
        let relative = path.strip_prefix(THEME_PREFIX).unwrap_or(path);
        let Some(data) = storage.read_binary(path)? else {
            warnings.push(format!("{path} disappeared during export"));
            continue;
        };
        zip.start_file(relative, options)?;
        zip.write_all(&data)?;
        entries.push(relative.to_string());
    }

    let bytes = zip.finish()?.into_inner();
    tracing::info!(name = %name, files = entries.len(), "theme exported");
    Ok(ThemeArchive {
        file_name: format!("{name}.zip"),
        bytes,
        entries,
        warnings,
    })
}
