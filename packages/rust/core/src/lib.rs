//! Batch orchestration for folio.
//!
//! This crate ties together source discovery and the Markdown converters:
//! [`dispatcher`] handles one document, [`pipeline`] drives a whole folder.

pub mod dispatcher;
pub mod pipeline;

pub use pipeline::{JobFailure, ProgressReporter, RunConfig, RunSummary, SilentProgress, run};
