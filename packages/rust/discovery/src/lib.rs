//! Source document discovery.
//!
//! Before converting anything, folio scans the input folder (non-recursively)
//! for regular files carrying the `.docx` extension. The scan is lazy: paths
//! are produced straight from the directory stream in enumeration order, and
//! each call to [`SourceSet::iter`] starts a fresh scan.

use std::fs::{self, DirEntry, ReadDir};
use std::path::{Path, PathBuf};

use folio_shared::{FolioError, Result, has_source_extension};
use tracing::{debug, info, instrument, warn};

// ---------------------------------------------------------------------------
// SourceSet
// ---------------------------------------------------------------------------

/// A validated input folder whose `.docx` sources can be enumerated.
#[derive(Debug, Clone)]
pub struct SourceSet {
    folder: PathBuf,
}

impl SourceSet {
    /// Validate `folder` and prepare it for enumeration.
    ///
    /// Fails with a config error when the folder does not exist, is not a
    /// directory, or cannot be listed.
    #[instrument(skip_all, fields(folder = %folder.as_ref().display()))]
    pub fn open(folder: impl AsRef<Path>) -> Result<Self> {
        let folder = folder.as_ref().to_path_buf();

        let metadata = fs::metadata(&folder).map_err(|e| {
            FolioError::config(format!(
                "input folder '{}' is not accessible: {e}",
                folder.display()
            ))
        })?;

        if !metadata.is_dir() {
            return Err(FolioError::config(format!(
                "input folder '{}' is not a directory",
                folder.display()
            )));
        }

        let set = Self { folder };
        // Probe readability up front so permission problems surface before any job runs.
        set.iter()?;

        info!(folder = %set.folder.display(), "input folder ready");
        Ok(set)
    }

    /// The folder being scanned.
    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Start a new scan of the folder.
    pub fn iter(&self) -> Result<Sources> {
        let entries = fs::read_dir(&self.folder).map_err(|e| {
            FolioError::config(format!(
                "input folder '{}' cannot be read: {e}",
                self.folder.display()
            ))
        })?;
        Ok(Sources { entries })
    }
}

// ---------------------------------------------------------------------------
// Sources iterator
// ---------------------------------------------------------------------------

/// Lazy sequence of `.docx` source paths inside one folder.
#[derive(Debug)]
pub struct Sources {
    entries: ReadDir,
}

impl Iterator for Sources {
    type Item = PathBuf;

    fn next(&mut self) -> Option<PathBuf> {
        for entry in self.entries.by_ref() {
            match entry {
                Ok(entry) => {
                    if let Some(path) = accept(&entry) {
                        return Some(path);
                    }
                }
                Err(e) => warn!(error = %e, "skipping unreadable directory entry"),
            }
        }
        None
    }
}

/// Decide whether a directory entry is a convertible source.
fn accept(entry: &DirEntry) -> Option<PathBuf> {
    let path = entry.path();

    let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
        warn!(path = %path.display(), "skipping file name that is not valid UTF-8");
        return None;
    };

    if !has_source_extension(&name) {
        return None;
    }

    if !is_regular_file(entry, &path) {
        debug!(path = %path.display(), "skipping non-regular entry");
        return None;
    }

    Some(path)
}

/// Regular files, or symlinks whose final target is a regular file.
fn is_regular_file(entry: &DirEntry, path: &Path) -> bool {
    match entry.file_type() {
        Ok(ft) if ft.is_file() => true,
        Ok(ft) if ft.is_symlink() => fs::metadata(path).map(|m| m.is_file()).unwrap_or(false),
        Ok(_) => false,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot determine file type");
            false
        }
    }
}
