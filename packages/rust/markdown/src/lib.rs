//! DOCX-to-Markdown converters.
//!
//! Every backend implements [`DocumentConverter`] and is driven with the same
//! fixed [`ConvertOptions`] bundle:
//! - [`PandocConverter`] runs the external `pandoc` program
//! - [`BuiltinConverter`] reads the DOCX package in-process
//!
//! [`Converter`] picks one of them at runtime from a [`ConverterConfig`].

mod cleanup;
mod docx;
mod pandoc;

#[cfg(any(test, feature = "test-fixtures"))]
pub mod fixture;

use std::ffi::OsString;
use std::future::Future;
use std::path::{Path, PathBuf};

use folio_shared::{ConverterConfig, EngineKind, Result};

pub use cleanup::relink_media;
pub use docx::BuiltinConverter;
pub use pandoc::PandocConverter;

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Markdown heading syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadingStyle {
    /// `#`, `##`, …
    Atx,
    /// Underlined with `===` / `---`.
    Setext,
}

/// How hyperlinks are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStyle {
    /// `[text][1]` with `[1]: url` definitions at the end.
    Reference,
    /// `[text](url)`.
    Inline,
}

/// The option bundle every conversion in a run is invoked with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertOptions {
    /// Source format tag.
    pub from: &'static str,
    /// Target format tag. Output is never wrapped: one line per paragraph.
    pub to: &'static str,
    pub heading_style: HeadingStyle,
    pub link_style: LinkStyle,
    /// Emit a complete document (metadata header included).
    pub standalone: bool,
    /// Directory that receives extracted media under `media/`.
    pub extract_media: PathBuf,
}

impl ConvertOptions {
    /// The fixed option set: docx → markdown, no wrapping, ATX headings,
    /// reference links, standalone, media extracted into `extract_media`.
    pub fn new(extract_media: impl Into<PathBuf>) -> Self {
        Self {
            from: "docx",
            to: "markdown",
            heading_style: HeadingStyle::Atx,
            link_style: LinkStyle::Reference,
            standalone: true,
            extract_media: extract_media.into(),
        }
    }

    /// Command-line flags expressing these options for pandoc.
    pub fn pandoc_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            format!("--from={}", self.from).into(),
            format!("--to={}", self.to).into(),
            "--wrap=none".into(),
        ];

        args.push(
            match self.heading_style {
                HeadingStyle::Atx => "--markdown-headings=atx",
                HeadingStyle::Setext => "--markdown-headings=setext",
            }
            .into(),
        );

        if self.link_style == LinkStyle::Reference {
            args.push("--reference-links".into());
        }
        if self.standalone {
            args.push("--standalone".into());
        }

        let mut extract = OsString::from("--extract-media=");
        extract.push(&self.extract_media);
        args.push(extract);

        args
    }
}

/// Result of converting one document.
#[derive(Debug, Clone)]
pub struct ConvertOutput {
    /// The Markdown text. Media links point into `ConvertOptions::extract_media`.
    pub markdown: String,
}

// ---------------------------------------------------------------------------
// Converter capability
// ---------------------------------------------------------------------------

/// A DOCX → Markdown conversion capability.
pub trait DocumentConverter: Send + Sync {
    /// Short backend name used in logs.
    fn name(&self) -> &'static str;

    /// Fail with a dependency error when the backend cannot run at all.
    fn ensure_available(&self) -> Result<()>;

    /// One-line identity/version string of the backend.
    fn describe(&self) -> impl Future<Output = Result<String>> + Send;

    /// Convert `source`, writing media below `options.extract_media`.
    fn convert(
        &self,
        source: &Path,
        options: &ConvertOptions,
    ) -> impl Future<Output = Result<ConvertOutput>> + Send;
}

/// Backend selected at runtime.
#[derive(Debug, Clone)]
pub enum Converter {
    Pandoc(PandocConverter),
    Builtin(BuiltinConverter),
}

impl Converter {
    /// Build the backend named by `config.engine`.
    pub fn from_config(config: &ConverterConfig) -> Self {
        match config.engine {
            EngineKind::Pandoc => Self::Pandoc(PandocConverter::new(&config.program)),
            EngineKind::Builtin => Self::Builtin(BuiltinConverter::new()),
        }
    }
}

impl DocumentConverter for Converter {
    fn name(&self) -> &'static str {
        match self {
            Self::Pandoc(c) => c.name(),
            Self::Builtin(c) => c.name(),
        }
    }

    fn ensure_available(&self) -> Result<()> {
        match self {
            Self::Pandoc(c) => c.ensure_available(),
            Self::Builtin(c) => c.ensure_available(),
        }
    }

    async fn describe(&self) -> Result<String> {
        match self {
            Self::Pandoc(c) => c.describe().await,
            Self::Builtin(c) => c.describe().await,
        }
    }

    async fn convert(&self, source: &Path, options: &ConvertOptions) -> Result<ConvertOutput> {
        match self {
            Self::Pandoc(c) => c.convert(source, options).await,
            Self::Builtin(c) => c.convert(source, options).await,
        }
    }
}
