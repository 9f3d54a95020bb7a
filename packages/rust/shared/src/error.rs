//! Error types for folio.
//!
//! Library crates use [`FolioError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` and maps it onto process exit codes.

use std::path::PathBuf;
use std::time::Duration;

/// Top-level error type for all folio operations.
#[derive(Debug, thiserror::Error)]
pub enum FolioError {
    /// Input folder missing/unreadable, or an invalid configuration value.
    #[error("config error: {message}")]
    Config { message: String },

    /// The external converter cannot be found or started.
    #[error("dependency missing: `{program}` {message}")]
    DependencyMissing { program: String, message: String },

    /// A single document could not be converted.
    #[error("conversion error for {path:?}: {message}")]
    Conversion { path: PathBuf, message: String },

    /// The converter did not finish within the configured timeout.
    #[error("conversion of {path:?} timed out after {}s", after.as_secs())]
    Timeout { path: PathBuf, after: Duration },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, FolioError>;

impl FolioError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a dependency error for `program`.
    pub fn dependency_missing(program: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::DependencyMissing {
            program: program.into(),
            message: msg.into(),
        }
    }

    /// Create a conversion error scoped to one source document.
    pub fn conversion(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::Conversion {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Fatal errors end the whole run; everything else is scoped to one job.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config { .. } | Self::DependencyMissing { .. })
    }
}
