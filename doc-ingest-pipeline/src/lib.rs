//! # Doc Ingest Pipeline
//!
//! This crate provides the core ingest pipeline: it splits container
//! documents into records, extracts text and metadata from each record,
//! maps the result onto collection schemas, and delivers the mapped
//! documents to the search backend.
//!
//! ## Architecture
//!
//! The pipeline follows a Splitter-Extractor-Mapper-Loader pattern:
//!
//! 1. **Splitter**: expands container events into per-record child events
//! 2. **Extractor**: turns raw bytes into text and metadata
//! 3. **Mapper**: coerces metadata into schema-typed documents
//! 4. **Loader**: batches, retries, and delivers documents per collection
//! 5. **Orchestrator**: composes the stages and accounts for every outcome

pub mod errors;
pub mod extract;
pub mod loader;
pub mod mapper;
pub mod orchestrator;
pub mod registry;
pub mod splitter;

pub use errors::PipelineError;
pub use loader::{DocumentLoader, LoaderConfig};
pub use orchestrator::{PipelineConfig, PipelineOrchestrator};
pub use registry::{CollectionRegistry, CollectionRegistryBuilder, RoutingPolicy};
