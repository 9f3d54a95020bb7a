//! Application configuration for folio.
//!
//! User config lives at `~/.folio/folio.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FolioError, Result};
use crate::types::{EngineKind, OnError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "folio.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".folio";

// ---------------------------------------------------------------------------
// Config structs (matching folio.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Converter settings.
    #[serde(default)]
    pub converter: ConverterSection,

    /// Batch run defaults.
    #[serde(default)]
    pub run: RunSection,
}

/// `[converter]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverterSection {
    /// Backend: "pandoc" or "builtin".
    #[serde(default)]
    pub engine: EngineKind,

    /// Program invoked by the pandoc backend.
    #[serde(default = "default_program")]
    pub program: String,

    /// Per-document timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ConverterSection {
    fn default() -> Self {
        Self {
            engine: EngineKind::default(),
            program: default_program(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_program() -> String {
    "pandoc".into()
}
fn default_timeout_secs() -> u64 {
    120
}

/// `[run]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSection {
    /// Failure policy: "skip" (default) or "abort".
    #[serde(default)]
    pub on_error: OnError,

    /// Number of documents converted concurrently.
    #[serde(default = "default_jobs")]
    pub jobs: usize,

    /// Media directory; the input folder when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_dir: Option<String>,
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            on_error: OnError::default(),
            jobs: default_jobs(),
            media_dir: None,
        }
    }
}

fn default_jobs() -> usize {
    1
}

// ---------------------------------------------------------------------------
// Converter config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime converter configuration, merged from config file + CLI flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConverterConfig {
    /// Backend used for every job in a run.
    pub engine: EngineKind,
    /// Program name or path of the external converter.
    pub program: String,
    /// Upper bound on a single conversion.
    pub timeout: Duration,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for ConverterConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            engine: config.converter.engine,
            program: config.converter.program.clone(),
            timeout: Duration::from_secs(config.converter.timeout_secs),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.folio/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| FolioError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.folio/folio.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| FolioError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content)
        .map_err(|e| FolioError::config(format!("failed to parse {}: {e}", path.display())))?;

    validate(&config)?;
    Ok(config)
}

/// Reject values that would make a run meaningless.
pub fn validate(config: &AppConfig) -> Result<()> {
    if config.run.jobs == 0 {
        return Err(FolioError::config("run.jobs must be at least 1"));
    }
    if config.converter.timeout_secs == 0 {
        return Err(FolioError::config("converter.timeout_secs must be at least 1"));
    }
    if config.converter.program.trim().is_empty() {
        return Err(FolioError::config("converter.program must not be empty"));
    }
    Ok(())
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let path = config_file_path()?;
    init_config_at(&path)?;
    Ok(path)
}

/// Write a default config file at `path`, creating parent directories.
pub fn init_config_at(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|e| FolioError::io(dir, e))?;
    }

    let content = toml::to_string_pretty(&AppConfig::default())
        .map_err(|e| FolioError::config(e.to_string()))?;

    std::fs::write(path, content).map_err(|e| FolioError::io(path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(())
}
