//! Core domain types for a folio run.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{FolioError, Result};

/// Extension (without the dot) of convertible source documents.
pub const SOURCE_EXTENSION: &str = "docx";

/// Extension (without the dot) of generated Markdown files.
pub const OUTPUT_EXTENSION: &str = "md";

// ---------------------------------------------------------------------------
// Base name derivation
// ---------------------------------------------------------------------------

/// Strip the final extension from a file name.
///
/// Splits on the last `.` only, so `report.v2.docx` yields `report.v2`.
/// A name without any `.` is returned unchanged.
pub fn derive_base_name(file_name: &str) -> &str {
    match file_name.rsplit_once('.') {
        Some((stem, _)) => stem,
        None => file_name,
    }
}

/// Whether `file_name` carries the DOCX extension (ASCII case-insensitive).
///
/// The stem must be non-empty: a bare `.docx` dotfile has no extension.
pub fn has_source_extension(file_name: &str) -> bool {
    match file_name.rsplit_once('.') {
        Some((stem, ext)) => !stem.is_empty() && ext.eq_ignore_ascii_case(SOURCE_EXTENSION),
        None => false,
    }
}

// ---------------------------------------------------------------------------
// ConversionJob
// ---------------------------------------------------------------------------

/// One input document to convert, with its derived destinations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionJob {
    /// Path of the `.docx` source.
    pub source_path: PathBuf,
    /// Source file name with the final extension stripped.
    pub base_name: String,
    /// `<input_folder>/<base_name>.md`.
    pub output_path: PathBuf,
    /// Directory receiving extracted media.
    pub media_target: PathBuf,
}

impl ConversionJob {
    /// Derive a job for `source_path`.
    ///
    /// The output always lands in `input_folder`, next to the source, so that
    /// relative media links in the generated Markdown resolve.
    pub fn new(source_path: PathBuf, input_folder: &Path, media_target: &Path) -> Result<Self> {
        let file_name = source_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                FolioError::conversion(&source_path, "file name is not valid UTF-8")
            })?;

        let base_name = derive_base_name(file_name).to_string();
        let output_path = input_folder.join(format!("{base_name}.{OUTPUT_EXTENSION}"));

        Ok(Self {
            source_path,
            base_name,
            output_path,
            media_target: media_target.to_path_buf(),
        })
    }

    /// Folder that contains the generated Markdown file.
    pub fn output_dir(&self) -> &Path {
        self.output_path.parent().unwrap_or_else(|| Path::new("."))
    }
}

// ---------------------------------------------------------------------------
// OnError
// ---------------------------------------------------------------------------

/// What the run does after a job fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnError {
    /// Stop starting new jobs after the first failure.
    Abort,
    /// Record the failure and continue with the next job.
    #[default]
    Skip,
}

impl fmt::Display for OnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Abort => "abort",
            Self::Skip => "skip",
        })
    }
}

impl FromStr for OnError {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "abort" => Ok(Self::Abort),
            "skip" => Ok(Self::Skip),
            other => Err(format!("invalid on-error policy '{other}': expected 'abort' or 'skip'")),
        }
    }
}

// ---------------------------------------------------------------------------
// EngineKind
// ---------------------------------------------------------------------------

/// Which converter backend renders DOCX into Markdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// External `pandoc` process.
    #[default]
    Pandoc,
    /// In-process DOCX reader.
    Builtin,
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pandoc => "pandoc",
            Self::Builtin => "builtin",
        })
    }
}

impl FromStr for EngineKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pandoc" => Ok(Self::Pandoc),
            "builtin" => Ok(Self::Builtin),
            other => Err(format!("invalid engine '{other}': expected 'pandoc' or 'builtin'")),
        }
    }
}
