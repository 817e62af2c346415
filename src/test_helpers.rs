//! Shared test utilities for the style-designer test suite.
//!
//! Builds in-memory ZIP fixtures shaped like real exports, and throwaway
//! [`AppContext`]s rooted in a temp directory.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let (_tmp, ctx) = temp_context();
//! let report = ingest(&ctx, &standard_uploads(), None).unwrap();
//! assert_eq!(ctx.default_entry().as_deref(), Some("intro.html"));
//! ```

use std::io::{Cursor, Write};
use std::path::Path;
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

use crate::config::AppConfig;
use crate::context::AppContext;
use crate::ingest::Upload;

// =========================================================================
// Contexts
// =========================================================================

/// Config rooted at `root`, scoped to a loopback origin.
pub fn test_config(root: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.storage.root = root.to_path_buf();
    config.storage.cache_name = "style-designer-test-v1".into();
    config.scope.base_url = "http://127.0.0.1:8080/".into();
    config
}

/// A fresh context in its own temp directory. Keep the `TempDir` alive for
/// as long as the context is used.
pub fn temp_context() -> (TempDir, AppContext) {
    let tmp = TempDir::new().unwrap();
    let ctx = AppContext::new(test_config(tmp.path())).unwrap();
    (tmp, ctx)
}

// =========================================================================
// ZIP fixtures
// =========================================================================

/// Build a ZIP archive in memory. Names ending in `/` become directory
/// entries. Entries keep the given order.
pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    for (name, data) in entries {
        if name.ends_with('/') {
            zip.add_directory(*name, options).unwrap();
        } else {
            zip.start_file(*name, options).unwrap();
            zip.write_all(data).unwrap();
        }
    }
    zip.finish().unwrap().into_inner()
}

pub fn upload(file_name: &str, entries: &[(&str, &[u8])]) -> Upload {
    Upload::new(file_name, zip_bytes(entries))
}

pub const NESTED_PAGE: &str = r#"<html><head><link rel="stylesheet" href="../theme/style.css"><script src="../theme/style.js"></script></head><body><p>Intro</p></body></html>"#;
pub const INDEX_PAGE: &str = r#"<html><head><link rel="stylesheet" href="theme/style.css"></head><body><p>Home</p></body></html>"#;

/// Three archives as an authoring tool exports them: a website with a
/// nested page, a single page and a SCORM package, each carrying its own
/// copy of the theme.
pub fn standard_uploads() -> Vec<Upload> {
    vec![
        upload(
            "course_web.zip",
            &[
                ("index.html", INDEX_PAGE.as_bytes()),
                ("html/", b""),
                ("html/intro.html", NESTED_PAGE.as_bytes()),
                ("html/second.html", NESTED_PAGE.as_bytes()),
                ("theme/style.css", b"body{color:web}"),
                ("theme/style.js", b"// web"),
                ("theme/config.xml", b"<theme><name>webtheme</name></theme>"),
                ("theme/img/logo.png", &[0x89, b'P', b'N', b'G', 0, 1, 2]),
            ],
        ),
        upload(
            "course_page.zip",
            &[
                ("index.html", INDEX_PAGE.as_bytes()),
                ("theme/style.css", b"body{color:page}"),
            ],
        ),
        upload(
            "course_scorm.zip",
            &[
                ("index.html", INDEX_PAGE.as_bytes()),
                ("imsmanifest.xml", b"<manifest/>"),
                ("theme/style.css", b"body{color:scorm}"),
            ],
        ),
    ]
}
