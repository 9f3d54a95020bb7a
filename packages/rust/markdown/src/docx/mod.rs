//! In-process DOCX reader.
//!
//! Covers the common subset of WordprocessingML: headings, paragraphs with
//! bold/italic/strike runs, lists, tables, hyperlinks, bookmarks and embedded
//! images. Used when pandoc is unavailable and by the test suites.

mod package;
mod render;
mod table;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, instrument};

use folio_shared::{FolioError, Result};

use crate::cleanup;
use crate::{ConvertOptions, ConvertOutput, DocumentConverter};
use package::{DocProperties, DocxPackage};
use render::Renderer;

/// Converter that reads the DOCX package directly.
#[derive(Debug, Clone, Default)]
pub struct BuiltinConverter;

impl BuiltinConverter {
    pub fn new() -> Self {
        Self
    }
}

impl DocumentConverter for BuiltinConverter {
    fn name(&self) -> &'static str {
        "builtin"
    }

    fn ensure_available(&self) -> Result<()> {
        Ok(())
    }

    async fn describe(&self) -> Result<String> {
        Ok(format!(
            "folio builtin DOCX reader {}",
            env!("CARGO_PKG_VERSION")
        ))
    }

    #[instrument(skip_all, fields(source = %source.display()))]
    async fn convert(&self, source: &Path, options: &ConvertOptions) -> Result<ConvertOutput> {
        let owned_source = source.to_path_buf();
        let owned_options = options.clone();
        let abandoned = Arc::new(AtomicBool::new(false));
        let task_abandoned = Arc::clone(&abandoned);
        // Dropping this future (on timeout) tells the blocking task to stop.
        let _guard = AbandonOnDrop(abandoned);

        // ZIP and XML work is synchronous; keep it off the async workers.
        let markdown = tokio::task::spawn_blocking(move || {
            convert_file(&owned_source, &owned_options, &task_abandoned)
        })
        .await
                .map_err(|e| {
                    FolioError::conversion(source, format!("conversion task failed: {e}"))
                })??;

        debug!(len = markdown.len(), "builtin conversion complete");
        Ok(ConvertOutput { markdown })
    }
}

/// Raises the flag when dropped.
struct AbandonOnDrop(Arc<AtomicBool>);

impl Drop for AbandonOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// Convert one DOCX file to Markdown, extracting media as a side effect.
///
/// Stops with a conversion error once `abandoned` is set.
fn convert_file(source: &Path, options: &ConvertOptions, abandoned: &AtomicBool) -> Result<String> {
    let mut package = DocxPackage::open(source)?;
    let xml = package.document_xml()?;
    let document = roxmltree::Document::parse(&xml).map_err(|e| {
        FolioError::conversion(
            package.source(),
            format!("malformed XML in {}: {e}", package::DOCUMENT_PART),
        )
    })?;

    let properties = if options.standalone {
        package.properties()?
    } else {
        DocProperties::default()
    };

    let body = Renderer::new(&mut package, options, abandoned)?.render(&document)?;

    let mut md = build_frontmatter(&properties);
    md.push_str(&body);
    Ok(cleanup::run_pipeline(&md))
}

/// YAML front matter for the non-empty metadata fields, or nothing.
fn build_frontmatter(properties: &DocProperties) -> String {
    let fields = properties.fields();
    if fields.is_empty() {
        return String::new();
    }

    let mut fm = String::from("---\n");
    for (key, value) in fields {
        fm.push_str(&format!("{key}: \"{}\"\n", escape_yaml_string(value)));
    }
    fm.push_str("---\n\n");
    fm
}

/// Escape special characters in a YAML string value.
fn escape_yaml_string(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
