//! # Doc Ingest Shared
//!
//! Shared data types for the document ingest system.
//!
//! These are the leaf types that flow between the pipeline stages:
//!
//! 1. **Event**: raw bytes plus string metadata entering the pipeline
//! 2. **ExtractedRecord**: text and multi-valued metadata produced by extraction
//! 3. **MappedDocument**: schema-typed document ready for the search backend
//! 4. **DeliveryOutcome**: the terminal state of every document's journey

pub mod document;
pub mod event;
pub mod outcome;
pub mod record;

pub use document::{FieldValue, MappedDocument};
pub use event::{BodyConsumed, Event, Headers};
pub use outcome::{DeliveryOutcome, DeliveryStatus, FailureKind};
pub use record::ExtractedRecord;
