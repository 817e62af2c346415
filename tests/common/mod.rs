//! Fixtures shared by the integration tests: export-shaped ZIP archives
//! written to a temp directory.

#![allow(dead_code)]

use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use style_designer::config::AppConfig;
use style_designer::context::AppContext;
use zip::write::SimpleFileOptions;

pub const NESTED_PAGE: &str = r#"<html><head><link rel="stylesheet" href="../theme/style.css"><script src="../theme/style.js"></script></head><body><p>Intro</p></body></html>"#;
pub const INDEX_PAGE: &str = r#"<html><head><link rel="stylesheet" href="theme/style.css"></head><body><p>Home</p></body></html>"#;

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

/// Write the three standard exports into `dir` and return their paths in
/// web, page, scorm order.
pub fn write_exports(dir: &Path) -> Vec<PathBuf> {
    write_exports_with_config(
        dir,
        "<?xml version=\"1.0\"?>\n<theme>\n  <name>webtheme</name>\n  <title>Web Theme</title>\n</theme>\n",
    )
}

/// Like [`write_exports`], with `config_xml` as the website's
/// `theme/config.xml`.
pub fn write_exports_with_config(dir: &Path, config_xml: &str) -> Vec<PathBuf> {
    let archives: [(&str, Vec<u8>); 3] = [
        (
            "course_web.zip",
            zip_bytes(&[
                ("index.html", INDEX_PAGE.as_bytes()),
                ("html/intro.html", NESTED_PAGE.as_bytes()),
                ("theme/style.css", b"body{color:web}"),
                ("theme/style.js", b"// web"),
                ("theme/config.xml", config_xml.as_bytes()),
                ("theme/img/logo.png", &[0x89, b'P', b'N', b'G', 0, 1, 2]),
                ("__MACOSX/._index.html", b"junk"),
            ]),
        ),
        (
            "course_page.zip",
            zip_bytes(&[
                ("index.html", INDEX_PAGE.as_bytes()),
                ("theme/style.css", b"body{color:page}"),
            ]),
        ),
        (
            "course_scorm.zip",
            zip_bytes(&[
                ("index.html", INDEX_PAGE.as_bytes()),
                ("imsmanifest.xml", b"<manifest/>"),
                ("theme/style.css", b"body{color:scorm}"),
            ]),
        ),
    ];
    archives
        .into_iter()
        .map(|(name, bytes)| {
            let path = dir.join(name);
            std::fs::write(&path, bytes).unwrap();
            path
        })
        .collect()
}

pub fn context(root: &Path) -> AppContext {
    let mut config = AppConfig::default();
    config.storage.root = root.join("store");
    config.scope.base_url = "http://127.0.0.1:8080/".into();
    AppContext::new(config).unwrap()
}
