//! HTML rewriting applied once per document at ingestion time.
//!
//! Exported pages reference the shared theme as plain tags:
//!
//! ```html
//! <link rel="stylesheet" href="../theme/style.css">   <!-- nested page -->
//! <script src="theme/style.js"></script>              <!-- mode index -->
//! ```
//!
//! Stored pages live at `contents/<mode>/index.html` and
//! `contents/<mode>/html/<page>.html`, so these are rewritten to point at the
//! shared `theme/` namespace (`../../theme/…` and `../../../theme/…`) through
//! a small `document.write` loader that appends `?v=<now>` on every load. An
//! author editing `theme/style.css` in place then sees the change on the next
//! reload without re-uploading the bundle.
//!
//! Every document also gets the client-side hook script appended, unless it
//! already references it.

use regex::{NoExpand, Regex};
use std::sync::LazyLock;

/// Scope-relative path of the hook script injected into every page.
pub const HOOK_SCRIPT_PATH: &str = "files/js/style-designer.js";

struct Replacement {
    pattern: Regex,
    replacement: &'static str,
}

fn replacement(pattern: &str, replacement: &'static str) -> Replacement {
    Replacement {
        // Patterns are literals below; a failure here is a programming error
        // caught by the tests.
        pattern: Regex::new(pattern).unwrap_or_else(|e| panic!("invalid pattern {pattern}: {e}")),
        replacement,
    }
}

static REPLACEMENTS: LazyLock<[Replacement; 4]> = LazyLock::new(|| {
    [
        replacement(
            r#"(?i)<script\s+src=["']\.\./theme/style\.js["']>\s*</script>"#,
            r#"<script>document.write('<script src="../../../theme/style.js?v='+Date.now()+'"><\/script>');</script>"#,
        ),
        replacement(
            r#"(?i)<link\s+rel=["']stylesheet["']\s+href=["']\.\./theme/style\.css["']\s*/?>"#,
            r#"<script>document.write('<link rel="stylesheet" href="../../../theme/style.css?v='+Date.now()+'">');</script>"#,
        ),
        replacement(
            r#"(?i)<script\s+src=["']theme/style\.js["']>\s*</script>"#,
            r#"<script>document.write('<script src="../../theme/style.js?v='+Date.now()+'"><\/script>');</script>"#,
        ),
        replacement(
            r#"(?i)<link\s+rel=["']stylesheet["']\s+href=["']theme/style\.css["']\s*/?>"#,
            r#"<script>document.write('<link rel="stylesheet" href="../../theme/style.css?v='+Date.now()+'">');</script>"#,
        ),
    ]
});

static BODY_CLOSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</body>").unwrap_or_else(|e| panic!("{e}")));

/// Rewrite theme references and inject the hook script.
///
/// `is_index` selects the relative depth of the hook script: mode index
/// documents sit two levels below the scope, nested pages three.
pub fn rewrite_html(content: &str, is_index: bool) -> String {
    inject_hook(&rewrite_theme_references(content), is_index)
}

/// Replace the four fixed theme reference forms with the deferred loader.
pub fn rewrite_theme_references(content: &str) -> String {
    let mut result = content.to_string();
    for Replacement {
        pattern,
        replacement,
    } in REPLACEMENTS.iter()
    {
        result = pattern
            .replace_all(&result, NoExpand(replacement))
            .into_owned();
    }
    result
}

/// The `<script>` tag referencing the hook at the right depth.
pub fn hook_tag(is_index: bool) -> String {
    let up = if is_index { "../../" } else { "../../../" };
    format!(r#"<script src="{up}{HOOK_SCRIPT_PATH}"></script>"#)
}

/// Append the hook script before the first closing body tag, or at the end
/// when there is none. Documents already referencing it are left alone.
pub fn inject_hook(content: &str, is_index: bool) -> String {
    if content.contains(HOOK_SCRIPT_PATH) {
        return content.to_string();
    }
    let tag = hook_tag(is_index);
    match BODY_CLOSE.find(content) {
        Some(m) => {
            let mut result = String::with_capacity(content.len() + tag.len());
            result.push_str(&content[..m.start()]);
            result.push_str(&tag);
            result.push_str(&content[m.start()..]);
            result
        }
        None => format!("{content}{tag}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NESTED_JS_LOADER: &str = r#"<script>document.write('<script src="../../../theme/style.js?v='+Date.now()+'"><\/script>');</script>"#;
    const INDEX_CSS_LOADER: &str = r#"<script>document.write('<link rel="stylesheet" href="../../theme/style.css?v='+Date.now()+'">');</script>"#;

    #[test]
    fn nested_script_reference_becomes_loader() {
        let html = r#"<head><script src="../theme/style.js"></script></head>"#;
        let out = rewrite_theme_references(html);
        assert!(out.contains(NESTED_JS_LOADER));
        assert!(!out.contains(r#"<script src="../theme/style.js"></script>"#));
    }

    #[test]
    fn nested_stylesheet_reference_becomes_loader() {
        let out = rewrite_theme_references(r#"<link rel='stylesheet' href='../theme/style.css' />"#);
        assert!(out.contains(r#"href="../../../theme/style.css?v='+Date.now()+'""#));
        assert!(!out.contains("<link rel='stylesheet'"));
    }

    #[test]
    fn same_level_references_use_two_levels() {
        let html = concat!(
            r#"<link rel="stylesheet" href="theme/style.css">"#,
            r#"<script src="theme/style.js"> </script>"#
        );
        let out = rewrite_theme_references(html);
        assert!(out.starts_with(INDEX_CSS_LOADER));
        assert!(out.contains(r#"src="../../theme/style.js?v='+Date.now()+'""#));
    }

    #[test]
    fn matching_is_case_insensitive() {
        let out = rewrite_theme_references(r#"<SCRIPT SRC="../theme/style.js"></SCRIPT>"#);
        assert_eq!(out, NESTED_JS_LOADER);
    }

    #[test]
    fn other_references_untouched() {
        let html = r#"<script src="../libs/jquery.js"></script><link rel="stylesheet" href="../theme/print.css">"#;
        assert_eq!(rewrite_theme_references(html), html);
    }

    #[test]
    fn hook_inserted_before_body_close() {
        let out = inject_hook("<html><body><p>x</p></BODY></html>", true);
        assert_eq!(
            out,
            r#"<html><body><p>x</p><script src="../../files/js/style-designer.js"></script></BODY></html>"#
        );
    }

    #[test]
    fn hook_appended_without_body_close() {
        let out = inject_hook("<p>fragment</p>", false);
        assert_eq!(
            out,
            r#"<p>fragment</p><script src="../../../files/js/style-designer.js"></script>"#
        );
    }

    #[test]
    fn hook_not_duplicated() {
        let once = rewrite_html("<body></body>", true);
        let twice = rewrite_html(&once, true);
        assert_eq!(once, twice);
        assert_eq!(twice.matches(HOOK_SCRIPT_PATH).count(), 1);
    }

    #[test]
    fn only_first_body_close_gets_hook() {
        let out = inject_hook("<body></body><!-- </body> -->", false);
        assert_eq!(out.matches(HOOK_SCRIPT_PATH).count(), 1);
        assert!(out.starts_with(r#"<body><script src="../../../files"#));
    }

    #[test]
    fn full_rewrite_of_nested_page() {
        let html = r#"<html><head><link rel="stylesheet" href="../theme/style.css"><script src="../theme/style.js"></script></head><body>Hi</body></html>"#;
        let out = rewrite_html(html, false);
        assert!(out.contains(NESTED_JS_LOADER));
        assert!(out.contains(r#"<script src="../../../files/js/style-designer.js"></script></body>"#));
    }
}
