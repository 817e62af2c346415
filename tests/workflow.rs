//! End-to-end tests through the library: ingest three exports, preview them
//! through the gateway, edit the theme, and export it again.

mod common;

use std::io::{Cursor, Read};
use style_designer::export::export_theme;
use style_designer::ingest::{Upload, ingest};
use style_designer::serve::handle_request;
use style_designer::theme_config::ConfigRecord;
use style_designer::types::Mode;
use style_designer::view::Preview;
use tempfile::TempDir;

fn ingested() -> (TempDir, style_designer::context::AppContext) {
    let tmp = TempDir::new().unwrap();
    let ctx = common::context(tmp.path());
    let uploads: Vec<Upload> = common::write_exports(tmp.path())
        .iter()
        .map(|p| Upload::from_path(p).unwrap())
        .collect();
    ingest(&ctx, &uploads, None).unwrap();
    (tmp, ctx)
}

fn get(ctx: &style_designer::context::AppContext, target: &str) -> (u16, String) {
    let response = handle_request(ctx, "GET", target);
    (
        response.status,
        String::from_utf8_lossy(&response.body).into_owned(),
    )
}

// ===========================================================================
// Ingest → gateway
// ===========================================================================

#[test]
fn ingested_pages_load_the_shared_theme() {
    let (_tmp, ctx) = ingested();

    let (status, body) = get(&ctx, "/contents/web/html/intro.html");
    assert_eq!(status, 200);
    assert!(body.contains("../../../theme/style.css?v="));
    assert!(body.contains("../../../theme/style.js?v="));
    assert!(body.contains(r#"<script src="../../../files/js/style-designer.js"></script></body>"#));

    let (_, index) = get(&ctx, "/contents/page/index.html");
    assert!(index.contains("../../theme/style.css?v="));
    assert!(index.contains("../../files/js/style-designer.js"));
}

#[test]
fn website_theme_wins_the_shared_namespace() {
    let (_tmp, ctx) = ingested();
    assert_eq!(get(&ctx, "/theme/style.css").1, "body{color:web}");
    // Each mode keeps its own copy too
    assert_eq!(get(&ctx, "/contents/page/theme/style.css").1, "body{color:page}");
}

#[test]
fn gateway_answers_with_content_types() {
    let (_tmp, ctx) = ingested();
    let css = handle_request(&ctx, "GET", "/theme/style.css?v=1");
    assert_eq!(css.status, 200);
    assert!(css.content_type.starts_with("text/css"));

    let png = handle_request(&ctx, "GET", "/theme/img/logo.png");
    assert_eq!(png.content_type, "image/png");
    assert_eq!(png.body, vec![0x89, b'P', b'N', b'G', 0, 1, 2]);

    assert_eq!(get(&ctx, "/theme/missing.css").0, 404);
    assert_eq!(get(&ctx, "/__MACOSX/._index.html").0, 404);
}

#[test]
fn hook_script_is_served() {
    let (_tmp, ctx) = ingested();
    let response = handle_request(&ctx, "GET", "/files/js/style-designer.js");
    assert_eq!(response.status, 200);
    assert!(response.content_type.starts_with("application/javascript"));
}

// ===========================================================================
// Preview
// ===========================================================================

#[test]
fn every_mode_resolves_after_ingest() {
    let (_tmp, ctx) = ingested();
    assert_eq!(ctx.default_entry().as_deref(), Some("intro.html"));

    let preview = Preview::from_context(&ctx).unwrap();
    assert_eq!(preview.available(), vec![Mode::Web, Mode::Page, Mode::Scorm]);
    assert_eq!(
        preview.source(Mode::Web),
        Some("/contents/web/html/intro.html")
    );
    assert_eq!(preview.source(Mode::Page), Some("/contents/page/index.html"));
    assert_eq!(preview.source(Mode::Scorm), Some("/contents/scorm/index.html"));
}

#[test]
fn preview_page_frames_the_selected_mode() {
    let (_tmp, ctx) = ingested();
    let (status, page) = get(&ctx, "/");
    assert_eq!(status, 200);
    assert!(page.contains(r#"<iframe src="/contents/web/html/intro.html?v="#));

    let (_, scorm) = get(&ctx, "/?view=scorm");
    assert!(scorm.contains(r#"<iframe src="/contents/scorm/index.html?v="#));

    let (_, config) = get(&ctx, "/?view=config");
    assert!(config.contains("webtheme"));
    assert!(!config.contains("<iframe"));
}

#[test]
fn reset_empties_the_preview() {
    let (_tmp, ctx) = ingested();
    ctx.reset().unwrap();
    assert_eq!(ctx.default_entry(), None);
    let preview = Preview::from_context(&ctx).unwrap();
    assert!(preview.is_empty());
    assert_eq!(get(&ctx, "/theme/style.css").0, 404);
}

// ===========================================================================
// Theme config → export
// ===========================================================================

#[test]
fn edited_config_names_the_export() {
    let (_tmp, ctx) = ingested();

    let (mut record, warning) = ConfigRecord::load(ctx.storage()).unwrap();
    assert_eq!(warning, None);
    assert_eq!(record.name, "webtheme");
    assert_eq!(record.title, "Web Theme");

    record.set("name", " my neo ").unwrap();
    let saved = record.save(ctx.storage()).unwrap();
    assert_eq!(saved.name, "myneo");

    let archive = export_theme(&ctx).unwrap();
    assert_eq!(archive.file_name, "myneo.zip");
    assert_eq!(
        archive.entries,
        vec!["config.xml", "img/logo.png", "style.css", "style.js"]
    );

    let mut zip = zip::ZipArchive::new(Cursor::new(archive.bytes)).unwrap();
    let mut css = String::new();
    zip.by_name("style.css")
        .unwrap()
        .read_to_string(&mut css)
        .unwrap();
    assert_eq!(css, "body{color:web}");
}

#[test]
fn reingesting_replaces_everything() {
    let (tmp, ctx) = ingested();
    ctx.storage()
        .save_text("theme/extra.css", "stale")
        .unwrap();

    let uploads: Vec<Upload> = common::write_exports(tmp.path())
        .iter()
        .map(|p| Upload::from_path(p).unwrap())
        .collect();
    ingest(&ctx, &uploads, None).unwrap();

    assert_eq!(ctx.storage().read_text("theme/extra.css").unwrap(), None);
}
