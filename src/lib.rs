//! # Style Designer
//!
//! A local workbench for e-learning styles. Authors export a course three
//! ways (website, single page, SCORM 1.2), drop the three ZIPs in, and get a
//! live preview of every mode driven by one shared, editable `theme/` folder.
//!
//! # Architecture: A Virtual File Store Behind a Gateway
//!
//! Nothing is extracted to a plain directory. Every file lives in a
//! persistent, path-keyed cache, and every read goes through a gateway that
//! answers URLs under its scope the way a web server would:
//!
//! ```text
//! 1. Ingest    *_web.zip, *_page.zip, *_scorm.zip  →  contents/<mode>/…, theme/…
//! 2. Resolve   candidate entry documents           →  one preview source per mode
//! 3. Preview   GET <scope>/contents/web/…          →  gateway → cache → response
//! 4. Export    theme/…                             →  <name>.zip
//! ```
//!
//! HTML is rewritten on the way in so that every mode loads its stylesheet
//! and scripts from the shared `theme/` namespace instead of its private
//! copy. Editing one file restyles all three previews at once.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`cache`] | Persistent named caches of path-keyed responses, content-addressed on disk |
//! | [`gateway`] | Request-intercepting worker thread: scope matching, cache lookups, reset messages |
//! | [`client`] | Storage client: gateway lifecycle plus save / read / list / clear / fetch |
//! | [`ingest`] | Upload validation and ZIP extraction into the virtual store |
//! | [`rewrite`] | Theme reference rewriting and hook script injection for stored HTML |
//! | [`view`] | Per-mode entry document resolution and cache-busting |
//! | [`theme_config`] | The `theme/config.xml` record: parse, edit, serialize |
//! | [`export`] | Repackages `theme/` as a downloadable ZIP |
//! | [`serve`] | Loopback HTTP preview server in front of the gateway |
//! | [`context`] | Application context owning config, storage and the local key/value store |
//! | [`config`] | `style-designer.toml` loading, validation, merging, and stock output |
//! | [`local`] | Small JSON key/value store for client-local settings |
//! | [`mime`] | Extension to content type table |
//! | [`types`] | Modes and the store path layout shared by every module |
//! | [`output`] | CLI output formatting: pure `format_*` functions plus printers |
//!
//! # Design Decisions
//!
//! ## Threads and Channels Over Async
//!
//! The gateway is a single worker thread reached through an `mpsc` channel,
//! and ingestion fans entry writes out over `rayon`. The store is local and
//! every operation is short, so a runtime would add weight without adding
//! throughput.
//!
//! ## Content-Addressed Bodies
//!
//! Cache bodies are stored under their SHA-256, and each cache keeps a small
//! JSON manifest from path to body hash plus headers. Identical theme files
//! mirrored from three archives land on disk once.
//!
//! ## Web Is Ingested Last
//!
//! All three archives mirror their `theme/` folder into the shared one. The
//! website export carries the most complete theme, so it is written last and
//! wins any overlap.

pub mod cache;
pub mod client;
pub mod config;
pub mod context;
pub mod export;
pub mod gateway;
pub mod ingest;
pub mod local;
pub mod mime;
pub mod output;
pub mod rewrite;
pub mod serve;
pub mod theme_config;
pub mod types;
pub mod view;

#[cfg(test)]
pub(crate) mod test_helpers;
