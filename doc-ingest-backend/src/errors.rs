//! Backend error types.
//!
//! Every variant is classified as transient (worth retrying with backoff)
//! or permanent (retrying cannot help). The loader's retry policy is driven
//! entirely by [`BackendError::is_transient`]; there is no message sniffing.

use thiserror::Error;

/// A single document the backend refused, with the reason it gave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentFailure {
    /// Id of the rejected document.
    pub document_id: String,
    /// Backend-supplied rejection reason.
    pub reason: String,
}

/// Errors that can occur during backend operations.
#[derive(Error, Debug, Clone)]
pub enum BackendError {
    /// Failed to reach the backend.
    #[error("connection error: {0}")]
    Connection(String),

    /// The backend did not answer in time.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// The backend asked us to slow down.
    #[error("backend overloaded: {0}")]
    Overloaded(String),

    /// Schema validation rejected specific documents; the rest of the batch
    /// was accepted.
    #[error("{} document(s) rejected by schema validation", failures.len())]
    Rejected { failures: Vec<DocumentFailure> },

    /// The request itself was malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Failed to serialize documents for the backend.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The named collection is not registered with the backend.
    #[error("unknown collection: {0}")]
    UnknownCollection(String),

    /// The backend refused the commit operation.
    #[error("commit refused: {0}")]
    CommitRefused(String),
}

impl BackendError {
    /// Whether retrying with backoff could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BackendError::Connection(_) | BackendError::Timeout(_) | BackendError::Overloaded(_)
        )
    }

    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a timeout error.
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create an overloaded error.
    pub fn overloaded(msg: impl Into<String>) -> Self {
        Self::Overloaded(msg.into())
    }

    /// Create an invalid request error.
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }
}
