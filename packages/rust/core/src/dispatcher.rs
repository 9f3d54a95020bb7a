//! Single-job conversion: converter call, media staging, output write.
//!
//! Each job extracts media into its own staging directory inside the media
//! target so concurrent jobs never see each other's files. After a successful
//! conversion the staged files are moved into place, the Markdown's links are
//! rewritten to point at them, and the staging directory is removed.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use tracing::{debug, instrument, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use folio_markdown::{ConvertOptions, DocumentConverter, relink_media};
use folio_shared::{ConversionJob, FolioError, Result};

/// Prefix of per-job staging directories.
pub const STAGING_PREFIX: &str = ".folio-staging-";

/// Convert one job, leaving `<output_path>` and its media in place on success.
#[instrument(skip_all, fields(source = %job.source_path.display(), converter = converter.name()))]
pub async fn convert_job<C: DocumentConverter>(
    converter: &C,
    job: &ConversionJob,
    timeout: Duration,
) -> Result<()> {
    let markdown = render_document(
        converter,
        &job.source_path,
        &job.media_target,
        job.output_dir(),
        timeout,
    )
    .await?;
    write_atomically(&job.output_path, markdown.as_bytes())
}

/// Convert `source` and publish its media into `media_target`.
///
/// Returns Markdown whose media links are relative to `link_base`, the folder
/// the Markdown will be read from.
pub async fn render_document<C: DocumentConverter>(
    converter: &C,
    source: &Path,
    media_target: &Path,
    link_base: &Path,
    timeout: Duration,
) -> Result<String> {
    fs::create_dir_all(media_target).map_err(|e| FolioError::io(media_target, e))?;

    let staging = media_target.join(format!("{STAGING_PREFIX}{}", Uuid::now_v7()));
    fs::create_dir_all(&staging).map_err(|e| FolioError::io(&staging, e))?;

    let result = convert_staged(converter, source, &staging, media_target, link_base, timeout).await;

    if let Err(e) = fs::remove_dir_all(&staging) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(staging = %staging.display(), error = %e, "failed to remove staging directory");
        }
    }

    result
}

async fn convert_staged<C: DocumentConverter>(
    converter: &C,
    source: &Path,
    staging: &Path,
    media_target: &Path,
    link_base: &Path,
    timeout: Duration,
) -> Result<String> {
    let options = ConvertOptions::new(staging);

    let output = tokio::time::timeout(timeout, converter.convert(source, &options))
        .await
        .map_err(|_| FolioError::Timeout {
            path: source.to_path_buf(),
            after: timeout,
        })??;

    let prefix = link_prefix(link_base, media_target)?;
    let markdown = relink_media(&output.markdown, staging, &prefix);

    let moved = publish_media(staging, media_target)?;
    debug!(files = moved, prefix = %prefix, "media published");

    Ok(markdown)
}

/// Path prefix that leads from `from_dir` to `to_dir`, empty or ending in `/`.
///
/// Computed lexically on absolute forms of both paths; symlinks are not resolved.
pub fn link_prefix(from_dir: &Path, to_dir: &Path) -> Result<String> {
    let from = normalized_components(from_dir)?;
    let to = normalized_components(to_dir)?;

    let common = from
        .iter()
        .zip(&to)
        .take_while(|(a, b)| a == b)
        .count();

    let mut parts: Vec<String> = vec!["..".to_string(); from.len() - common];
    parts.extend(to[common..].iter().cloned());

    if parts.is_empty() {
        Ok(String::new())
    } else {
        Ok(format!("{}/", parts.join("/")))
    }
}

fn normalized_components(path: &Path) -> Result<Vec<String>> {
    let absolute = std::path::absolute(path).map_err(|e| FolioError::io(path, e))?;
    let mut parts: Vec<String> = Vec::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                parts.pop();
            }
            other => parts.push(other.as_os_str().to_string_lossy().into_owned()),
        }
    }
    Ok(parts)
}

/// Move everything below `staging` into `target`, overwriting same-named files.
///
/// Returns the number of files moved.
fn publish_media(staging: &Path, target: &Path) -> Result<usize> {
    let mut moved = 0;

    for entry in WalkDir::new(staging).min_depth(1) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(staging).to_path_buf();
            FolioError::io(path, e.into())
        })?;

        let relative = entry
            .path()
            .strip_prefix(staging)
            .map_err(|e| FolioError::conversion(entry.path(), e.to_string()))?;
        let dest = target.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&dest).map_err(|e| FolioError::io(&dest, e))?;
            continue;
        }

        if let Err(e) = fs::rename(entry.path(), &dest) {
            // Some platforms refuse to rename over an existing file.
            if !dest.is_file() {
                return Err(FolioError::io(&dest, e));
            }
            fs::remove_file(&dest).map_err(|e| FolioError::io(&dest, e))?;
            fs::rename(entry.path(), &dest).map_err(|e| FolioError::io(&dest, e))?;
        }
        moved += 1;
    }

    Ok(moved)
}

/// Write `contents` to `path` via a temporary sibling and a rename.
pub fn write_atomically(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp = temp_sibling(path);

    fs::write(&tmp, contents).map_err(|e| FolioError::io(&tmp, e))?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(FolioError::io(path, e));
    }
    Ok(())
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.{}.tmp", Uuid::now_v7()))
}
