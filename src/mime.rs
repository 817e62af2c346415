//! Content-type inference and text/binary classification by extension.

use crate::types::extension;

/// Fallback for extensions missing from [`MIME_TYPES`].
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Fallback for text payloads saved without a known extension.
pub const TEXT_PLAIN: &str = "text/plain";

/// Fixed extension → content-type table.
const MIME_TYPES: &[(&str, &str)] = &[
    (".html", "text/html"),
    (".css", "text/css"),
    (".js", "application/javascript"),
    (".json", "application/json"),
    (".xml", "application/xml"),
    (".png", "image/png"),
    (".jpg", "image/jpeg"),
    (".jpeg", "image/jpeg"),
    (".gif", "image/gif"),
    (".svg", "image/svg+xml"),
    (".ico", "image/x-icon"),
    (".zip", "application/zip"),
    (".webm", "video/webm"),
    (".ogg", "audio/ogg"),
    (".wav", "audio/wav"),
    (".m4a", "audio/mp4"),
    (".woff", "font/woff"),
    (".woff2", "font/woff2"),
    (".ttf", "font/ttf"),
    (".otf", "font/otf"),
    (".mp3", "audio/mpeg"),
    (".mp4", "video/mp4"),
    (".webp", "image/webp"),
];

/// Extensions whose archive entries are decoded and stored as text.
const TEXT_EXTENSIONS: &[&str] = &[
    ".html", ".htm", ".css", ".js", ".json", ".txt", ".xml", ".xhtml", ".svg",
];

/// Look up the content type for a path's extension.
pub fn lookup(path: &str) -> Option<&'static str> {
    let ext = extension(path);
    MIME_TYPES
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, mime)| *mime)
}

/// Content type for a path, or `fallback` when the extension is unmapped.
pub fn infer(path: &str, fallback: &'static str) -> &'static str {
    lookup(path).unwrap_or(fallback)
}

/// Whether an entry with this path is treated as text during ingestion
/// and export.
pub fn is_text_path(path: &str) -> bool {
    TEXT_EXTENSIONS.contains(&extension(path).as_str())
}

/// Whether a content type carries text that should declare a charset.
fn is_text_type(mime: &str) -> bool {
    mime.starts_with("text/")
        || mime.ends_with("/json")
        || mime.ends_with("/javascript")
        || mime.ends_with("/xml")
}

/// Final `Content-Type` header value: text-like types get
/// `; charset=utf-8` unless one is already declared.
pub fn content_type_header(mime: &str) -> String {
    if is_text_type(mime) && !mime.to_lowercase().contains("charset=") {
        format!("{mime}; charset=utf-8")
    } else {
        mime.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_extensions() {
        assert_eq!(lookup("a/b/index.html"), Some("text/html"));
        assert_eq!(lookup("photo.JPG"), Some("image/jpeg"));
        assert_eq!(lookup("font.woff2"), Some("font/woff2"));
        assert_eq!(lookup("clip.m4a"), Some("audio/mp4"));
    }

    #[test]
    fn unknown_extension_uses_fallback() {
        assert_eq!(infer("data.bin", OCTET_STREAM), OCTET_STREAM);
        assert_eq!(infer("notes.txt", TEXT_PLAIN), TEXT_PLAIN);
        assert_eq!(infer("Makefile", OCTET_STREAM), OCTET_STREAM);
    }

    #[test]
    fn text_classification() {
        assert!(is_text_path("html/page.htm"));
        assert!(is_text_path("theme/icons/logo.svg"));
        assert!(is_text_path("imsmanifest.xml"));
        assert!(!is_text_path("theme/img/logo.png"));
        assert!(!is_text_path("theme/fonts/a.woff"));
    }

    #[test]
    fn charset_added_to_text_types_only() {
        assert_eq!(content_type_header("text/html"), "text/html; charset=utf-8");
        assert_eq!(
            content_type_header("application/javascript"),
            "application/javascript; charset=utf-8"
        );
        assert_eq!(
            content_type_header("application/xml"),
            "application/xml; charset=utf-8"
        );
        assert_eq!(content_type_header("image/png"), "image/png");
        assert_eq!(content_type_header("image/svg+xml"), "image/svg+xml");
    }

    #[test]
    fn existing_charset_is_kept() {
        assert_eq!(
            content_type_header("text/css; charset=ISO-8859-1"),
            "text/css; charset=ISO-8859-1"
        );
    }
}
