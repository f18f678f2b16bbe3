//! Error types for the ingest pipeline.
//!
//! Per-record errors (container framing, extraction, mapping) are isolated:
//! they never abort sibling records. `BackpressureSignal` is flow control,
//! not a failure.

use thiserror::Error;

use doc_ingest_backend::BackendError;
use doc_ingest_shared::{BodyConsumed, FailureKind};

/// Container framing errors raised by the splitter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ContainerError {
    /// A record header block could not be parsed. The splitter attempts to
    /// resynchronize at the next record boundary.
    #[error("malformed record header at offset {offset}: {reason}")]
    MalformedHeader { offset: u64, reason: String },

    /// A record body overran the remaining input, so the next boundary
    /// cannot be located. The stream terminates after this error.
    #[error("truncated record at offset {offset}: declared {declared} bytes, {available} available")]
    TruncatedBody {
        offset: u64,
        declared: u64,
        available: u64,
    },

    /// The container event's body was consumed before splitting.
    #[error(transparent)]
    BodyConsumed(#[from] BodyConsumed),
}

impl ContainerError {
    /// Byte offset of the damage within the container.
    pub fn offset(&self) -> u64 {
        match self {
            ContainerError::MalformedHeader { offset, .. } => *offset,
            ContainerError::TruncatedBody { offset, .. } => *offset,
            ContainerError::BodyConsumed(_) => 0,
        }
    }

    /// Convert to the terminal failure kind reported in outcomes.
    pub fn into_failure_kind(self) -> FailureKind {
        let offset = self.offset();
        FailureKind::ContainerFormat {
            offset,
            reason: self.to_string(),
        }
    }
}

/// Extraction errors, isolated to one record.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractionError {
    /// No extractor is registered for the resolved content type.
    #[error("no extractor registered for content type {0:?}")]
    UnsupportedType(String),

    /// The record's bytes do not match its declared content type.
    #[error("corrupt content: {0}")]
    Corrupt(String),

    /// Transparent decompression failed.
    #[error("decompression failed: {0}")]
    Decompression(String),

    /// The extraction capability itself reported a failure.
    #[error("extraction failed: {0}")]
    Failed(String),
}

impl ExtractionError {
    /// Create a corrupt-content error.
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::Corrupt(msg.into())
    }

    /// Create an extraction failure.
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    /// Convert to the terminal failure kind reported in outcomes.
    pub fn into_failure_kind(self, content_type: Option<String>) -> FailureKind {
        FailureKind::Extraction {
            content_type,
            reason: self.to_string(),
        }
    }
}

impl From<BodyConsumed> for ExtractionError {
    fn from(err: BodyConsumed) -> Self {
        Self::Failed(err.to_string())
    }
}

/// A field coercion or schema mismatch, naming the offending field and the
/// raw value that failed.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("cannot map field {field:?} with value {value:?}: {reason}")]
pub struct MappingError {
    pub field: String,
    pub value: String,
    pub reason: String,
}

impl MappingError {
    /// Create a mapping error for a field/value pair.
    pub fn new(
        field: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Convert to the terminal failure kind reported in outcomes.
    pub fn into_failure_kind(self) -> FailureKind {
        FailureKind::Mapping {
            field: self.field,
            value: self.value,
            reason: self.reason,
        }
    }
}

/// A single value failed coercion to its declared type.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{reason}")]
pub struct CoercionError {
    pub reason: String,
}

impl CoercionError {
    /// Create a coercion error.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Flow-control signal: the collection's in-flight batch ceiling is reached.
/// Callers should back off and retry, not treat this as fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("collection {collection:?} at in-flight ceiling ({in_flight}/{ceiling})")]
pub struct BackpressureSignal {
    pub collection: String,
    pub in_flight: usize,
    pub ceiling: usize,
}

/// Why an enqueue was not accepted.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EnqueueRejected {
    /// Retry later; the loader is at its in-flight ceiling.
    #[error(transparent)]
    Backpressure(#[from] BackpressureSignal),

    /// The loader has begun shutting down; no new work is accepted.
    #[error("loader for collection {0:?} is shut down")]
    Closed(String),
}

/// Collection registry construction and routing errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    /// A mapping rule targets a field the schema does not declare.
    #[error("mapping rule targets unknown schema field {field:?} in collection {collection:?}")]
    UnknownTargetField { collection: String, field: String },

    /// A mapping rule declares a value type with no registered coercion.
    #[error("no coercion registered for value type {value_type:?} in collection {collection:?}")]
    UnknownValueType {
        collection: String,
        value_type: String,
    },

    /// Two collections registered under the same name.
    #[error("duplicate collection {0:?}")]
    DuplicateCollection(String),

    /// Routing referenced a collection that is not registered.
    #[error("unknown collection {0:?}")]
    UnknownCollection(String),
}

/// Umbrella error for pipeline wiring and lifecycle operations.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Container framing error.
    #[error("container error: {0}")]
    Container(#[from] ContainerError),

    /// Extraction error.
    #[error("extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    /// Mapping error.
    #[error("mapping error: {0}")]
    Mapping(#[from] MappingError),

    /// Registry construction or routing error.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Error from the search backend.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// Internal channel communication error.
    #[error("channel error: {0}")]
    Channel(String),
}

impl PipelineError {
    /// Create a channel error.
    pub fn channel(msg: impl Into<String>) -> Self {
        Self::Channel(msg.into())
    }
}
