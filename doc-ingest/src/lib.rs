//! # Doc Ingest
//!
//! Configuration and wiring for the document ingest pipeline.
//!
//! This crate turns a declarative [`IngestConfig`] into a fully wired
//! [`PipelineOrchestrator`](doc_ingest_pipeline::PipelineOrchestrator):
//! coercions, extractors, per-collection loaders, routing, and the backend
//! client.

pub mod config;

pub use config::{Dependencies, IngestConfig};

use thiserror::Error;

/// Errors that can occur while loading configuration or wiring the pipeline.
#[derive(Error, Debug)]
pub enum SetupError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Pipeline error.
    #[error("Pipeline error: {0}")]
    PipelineError(#[from] doc_ingest_pipeline::PipelineError),

    /// Backend error.
    #[error("Backend error: {0}")]
    BackendError(#[from] doc_ingest_backend::BackendError),

    /// Configuration file could not be parsed.
    #[error("Parse error: {0}")]
    ParseError(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl SetupError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }
}

/// Initialize the global tracing subscriber.
///
/// Honors `RUST_LOG`; defaults to `info` when unset.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
