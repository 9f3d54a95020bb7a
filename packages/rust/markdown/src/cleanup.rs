//! Post-conversion cleanup passes for Markdown output.
//!
//! Each cleanup pass is a function `&str -> String` applied in sequence.
//! The pipeline only runs on output of the built-in engine; pandoc output is
//! left byte-for-byte as pandoc produced it.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

/// Run the full cleanup pipeline on raw Markdown text.
pub(crate) fn run_pipeline(md: &str) -> String {
    let mut result = normalize_line_endings(md);

    result = clean_blank_lines(&result);
    result = normalize_whitespace(&result);
    result = ensure_trailing_newline(&result);

    result
}

// ---------------------------------------------------------------------------
// Pass 1: Normalize line endings
// ---------------------------------------------------------------------------

/// Convert CRLF and lone CR to LF.
fn normalize_line_endings(md: &str) -> String {
    md.replace("\r\n", "\n").replace('\r', "\n")
}

// ---------------------------------------------------------------------------
// Pass 2: Clean up excessive blank lines
// ---------------------------------------------------------------------------

/// Collapse runs of 2+ blank lines into exactly one.
fn clean_blank_lines(md: &str) -> String {
    static MULTI_BLANK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n[ \t]*\n(?:[ \t]*\n)+").expect("valid regex"));

    MULTI_BLANK_RE.replace_all(md, "\n\n").to_string()
}

// ---------------------------------------------------------------------------
// Pass 3: Normalize whitespace
// ---------------------------------------------------------------------------

/// Clean up trailing whitespace on lines.
fn normalize_whitespace(md: &str) -> String {
    md.lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Pass 4: Ensure trailing newline
// ---------------------------------------------------------------------------

/// Ensure the file ends with exactly one newline.
fn ensure_trailing_newline(md: &str) -> String {
    let trimmed = md.trim_start_matches('\n').trim_end_matches('\n');
    format!("{trimmed}\n")
}

// ---------------------------------------------------------------------------
// Media link relocation
// ---------------------------------------------------------------------------

/// Rewrite media links that point into `extracted_to` so they start with
/// `link_prefix` instead.
///
/// Converters reference extracted media by the directory they were told to
/// extract into. When that directory is a temporary staging area, the links
/// must be rewritten to the final location relative to the Markdown file.
/// `link_prefix` is either empty or ends with `/`.
pub fn relink_media(md: &str, extracted_to: &Path, link_prefix: &str) -> String {
    let native = format!("{}/", extracted_to.display());
    let mut result = md.replace(&native, link_prefix);

    // Converters may emit forward slashes even where the platform uses `\`.
    let forward = native.replace('\\', "/");
    if forward != native {
        result = result.replace(&forward, link_prefix);
    }

    result
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
