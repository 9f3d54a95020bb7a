//! Shared types, error model, and configuration for folio.
//!
//! This crate is the foundation depended on by all other folio crates.
//! It provides:
//! - [`FolioError`]: the unified error type
//! - Domain types ([`ConversionJob`], [`OnError`], [`EngineKind`])
//! - Configuration ([`AppConfig`], [`ConverterConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, ConverterConfig, ConverterSection, RunSection, config_dir, config_file_path,
    init_config, init_config_at, load_config, load_config_from, validate,
};
pub use error::{FolioError, Result};
pub use types::{
    ConversionJob, EngineKind, OUTPUT_EXTENSION, OnError, SOURCE_EXTENSION, derive_base_name,
    has_source_extension,
};
