//! Shared types used across storage, ingestion, and preview.
//!
//! The virtual file store has exactly two namespaces:
//!
//! ```text
//! contents/<mode>/<relative>   # one subtree per presentation mode
//! theme/<relative>             # shared theme assets (config.xml, style.css, ...)
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix of the per-mode namespace.
pub const CONTENTS_PREFIX: &str = "contents/";

/// Prefix of the shared theme namespace.
pub const THEME_PREFIX: &str = "theme/";

/// Path of the theme's configuration record inside the store.
pub const CONFIG_PATH: &str = "theme/config.xml";

/// A presentation variant of the same exported content bundle.
///
/// Every upload batch carries one archive per mode, recognized by the
/// filename suffix the authoring tool assigns on export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Multi-page website export (`*_web.zip`).
    Web,
    /// Single-page export (`*_page.zip`).
    Page,
    /// Packaged course export (`*_scorm.zip`).
    Scorm,
}

impl Mode {
    /// All modes in display and initial-selection preference order.
    pub const ALL: [Mode; 3] = [Mode::Web, Mode::Page, Mode::Scorm];

    /// Order in which archives are written during ingestion. `Web` goes last
    /// so its copy of shared theme assets is the one left in `theme/`.
    pub const INGEST_ORDER: [Mode; 3] = [Mode::Page, Mode::Scorm, Mode::Web];

    /// Identifier used in store paths and URLs.
    pub fn id(self) -> &'static str {
        match self {
            Mode::Web => "web",
            Mode::Page => "page",
            Mode::Scorm => "scorm",
        }
    }

    /// Lowercase filename suffix that identifies this mode's archive.
    pub fn suffix(self) -> &'static str {
        match self {
            Mode::Web => "_web.zip",
            Mode::Page => "_page.zip",
            Mode::Scorm => "_scorm.zip",
        }
    }

    /// Human-readable label for selectors and CLI output.
    pub fn label(self) -> &'static str {
        match self {
            Mode::Web => "Website",
            Mode::Page => "Single page",
            Mode::Scorm => "SCORM 1.2",
        }
    }

    /// Parse a mode identifier (`web`, `page`, `scorm`).
    pub fn from_id(id: &str) -> Option<Mode> {
        Mode::ALL.into_iter().find(|m| m.id() == id)
    }

    /// Match an uploaded filename against the suffix convention,
    /// case-insensitively.
    pub fn from_file_name(name: &str) -> Option<Mode> {
        let lower = name.to_lowercase();
        Mode::ALL.into_iter().find(|m| lower.ends_with(m.suffix()))
    }

    /// Store prefix of this mode's subtree, e.g. `contents/web/`.
    pub fn store_prefix(self) -> String {
        format!("{}{}/", CONTENTS_PREFIX, self.id())
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Store path of an entry inside a mode's subtree.
pub fn mode_path(mode: Mode, relative: &str) -> String {
    format!("{}{}", mode.store_prefix(), relative)
}

/// Store path of a shared theme asset.
pub fn theme_path(relative: &str) -> String {
    format!("{}{}", THEME_PREFIX, relative)
}

/// Lowercased extension including the leading dot (`".html"`), or empty.
///
/// Only the final path segment is considered, so dots in directory names
/// don't count.
pub fn extension(path: &str) -> String {
    let file = file_name(path);
    match file.rfind('.') {
        Some(pos) if pos + 1 < file.len() => file[pos..].to_lowercase(),
        _ => String::new(),
    }
}

/// Final `/`-separated segment of a path.
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}
