//! CLI output formatting for every command.
//!
//! # Information-First Display
//!
//! Output leads with what the author cares about (which modes were loaded,
//! which one previews, what the theme is called) with store paths shown as
//! indented context lines underneath.
//!
//! # Output Format
//!
//! ## Ingest
//!
//! ```text
//! Single page (course_page.zip, 4 entries)
//!     Stored: 4
//!     Theme: 1 mirrored
//!     Rewritten: 1 html
//! Website (course_web.zip, 8 entries)
//!     Stored: 8
//!     Theme: 4 mirrored
//!     Rewritten: 3 html
//!     Skipped: __MACOSX/._index.html
//!
//! Default entry: intro.html
//! Stored 12 files across 2 modes
//! ```
//!
//! ## Views
//!
//! ```text
//! 001 Website → /contents/web/html/intro.html
//! 002 Single page → /contents/page/index.html
//!     SCORM 1.2: not available
//! ```
//!
//! # Architecture
//!
//! Each command has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure: no I/O, no side effects.

use crate::export::ThemeArchive;
use crate::ingest::{IngestEvent, IngestReport, ModeSummary, ValidationIssue};
use crate::theme_config::{ConfigRecord, FIELDS};
use crate::types::Mode;
use crate::view::Preview;
use std::path::Path;

// ============================================================================
// Shared display helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn plural(n: usize, one: &str, many: &str) -> String {
    if n == 1 {
        format!("{n} {one}")
    } else {
        format!("{n} {many}")
    }
}

fn print_lines(lines: Vec<String>) {
    for line in lines {
        println!("{}", line);
    }
}

// ============================================================================
// Ingest
// ============================================================================

fn mode_summary_lines(summary: &ModeSummary) -> Vec<String> {
    let mut lines = vec![format!("{}Stored: {}", indent(1), summary.stored)];
    if summary.mirrored > 0 {
        lines.push(format!("{}Theme: {} mirrored", indent(1), summary.mirrored));
    }
    if summary.rewritten > 0 {
        lines.push(format!("{}Rewritten: {} html", indent(1), summary.rewritten));
    }
    for skipped in &summary.skipped {
        lines.push(format!("{}Skipped: {}", indent(1), skipped));
    }
    lines
}

/// Format a single ingestion progress event as display lines.
pub fn format_ingest_event(event: &IngestEvent) -> Vec<String> {
    match event {
        IngestEvent::Cleared => vec!["Cleared store".to_string()],
        IngestEvent::ArchiveStarted {
            mode,
            file_name,
            entry_count,
        } => vec![format!(
            "{} ({}, {})",
            mode.label(),
            file_name,
            plural(*entry_count, "entry", "entries")
        )],
        IngestEvent::ArchiveFinished(summary) => mode_summary_lines(summary),
        IngestEvent::ArchiveFailed(failure) => vec![format!(
            "{} ({}) skipped: {}",
            failure.mode.label(),
            failure.file_name,
            failure.reason
        )],
    }
}

/// Closing summary after the per-archive events.
pub fn format_ingest_report(report: &IngestReport) -> Vec<String> {
    let mut lines = vec![String::new()];
    match &report.default_entry {
        Some(entry) => lines.push(format!("Default entry: {}", entry)),
        None => lines.push("Default entry: none".to_string()),
    }
    lines.push(format!(
        "Stored {} across {}",
        plural(report.total_stored(), "file", "files"),
        plural(report.modes.len(), "mode", "modes")
    ));
    if !report.failures.is_empty() {
        lines.push(format!(
            "Skipped {}",
            plural(report.failures.len(), "archive", "archives")
        ));
    }
    lines
}

pub fn print_ingest_event(event: &IngestEvent) {
    print_lines(format_ingest_event(event));
}

pub fn print_ingest_report(report: &IngestReport) {
    print_lines(format_ingest_report(report));
}

pub fn format_validation_issues(issues: &[ValidationIssue]) -> Vec<String> {
    let mut lines = vec!["Upload rejected".to_string()];
    lines.extend(issues.iter().map(|issue| format!("{}{}", indent(1), issue)));
    lines
}

// ============================================================================
// Store inspection
// ============================================================================

pub fn format_list(paths: &[String]) -> Vec<String> {
    let mut lines: Vec<String> = paths.to_vec();
    lines.push(plural(paths.len(), "file", "files"));
    lines
}

pub fn print_list(paths: &[String]) {
    print_lines(format_list(paths));
}

/// Resolved views in preference order, then the ones that did not resolve.
pub fn format_views(preview: &Preview) -> Vec<String> {
    if let Some(message) = preview.info_message() {
        return vec![message.to_string()];
    }
    let mut lines = Vec::new();
    for (i, mode) in preview.available().into_iter().enumerate() {
        let source = preview.source(mode).unwrap_or_default();
        lines.push(format!(
            "{} {} → {}",
            format_index(i + 1),
            mode.label(),
            source
        ));
    }
    for mode in Mode::ALL {
        if preview.source(mode).is_none() {
            lines.push(format!("{}{}: not available", indent(1), mode.label()));
        }
    }
    lines
}

pub fn print_views(preview: &Preview) {
    print_lines(format_views(preview));
}

// ============================================================================
// Theme
// ============================================================================

pub fn format_theme_config(record: &ConfigRecord, warning: Option<&str>) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(warning) = warning {
        lines.push(format!("Warning: {}", warning));
    }
    for field in FIELDS {
        let value = record.get(field).unwrap_or_default();
        let mut values = value.lines();
        lines.push(format!("{}: {}", field, values.next().unwrap_or_default()));
        for continuation in values {
            if continuation.is_empty() {
                lines.push(String::new());
            } else {
                lines.push(format!("{}{}", indent(1), continuation));
            }
        }
    }
    lines
}

pub fn print_theme_config(record: &ConfigRecord, warning: Option<&str>) {
    print_lines(format_theme_config(record, warning));
}

pub fn format_export(archive: &ThemeArchive, dest: &Path) -> Vec<String> {
    let mut lines: Vec<String> = archive
        .warnings
        .iter()
        .map(|w| format!("Warning: {}", w))
        .collect();
    lines.push(format!(
        "{} → {}",
        archive.file_name,
        dest.display()
    ));
    lines.extend(archive.entries.iter().map(|e| format!("{}{}", indent(1), e)));
    lines.push(format!(
        "Exported {}",
        plural(archive.entries.len(), "file", "files")
    ));
    lines
}

pub fn print_export(archive: &ThemeArchive, dest: &Path) {
    print_lines(format_export(archive, dest));
}
