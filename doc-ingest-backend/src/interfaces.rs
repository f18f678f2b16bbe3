//! Search backend client trait definition.
//!
//! This module defines the abstract interface the Document Loader delivers
//! through, allowing different backend implementations (embedded, networked,
//! mock) to be swapped without touching the pipeline.

use async_trait::async_trait;

use crate::errors::BackendError;
use doc_ingest_shared::MappedDocument;

/// Flags controlling how strongly a commit waits for durability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitOptions {
    /// Block until the backend has flushed the commit to stable storage.
    pub wait_flush: bool,
    /// Block until committed documents are visible to searches.
    pub wait_searchable: bool,
}

impl CommitOptions {
    /// Wait for both flush and search visibility.
    pub fn wait_all() -> Self {
        Self {
            wait_flush: true,
            wait_searchable: true,
        }
    }
}

/// Abstract interface for delivering documents to a search backend.
///
/// All operations are fallible network calls subject to the loader's
/// retry/backoff policy. Implementations must be `Send + Sync` so loaders
/// can share them across async tasks.
///
/// # Delivery semantics
///
/// The pipeline guarantees at-least-once delivery, so implementations must
/// make `add_batch` idempotent by document id (a redelivered document
/// replaces its earlier copy rather than duplicating it).
#[async_trait]
pub trait SearchBackendClient: Send + Sync {
    /// Add a batch of documents to a collection as one unit.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - every document in the batch was accepted
    /// * `Err(BackendError::Rejected)` - specific documents were refused by
    ///   schema validation; the rest were accepted
    /// * `Err(_)` - the whole batch failed
    async fn add_batch(
        &self,
        collection: &str,
        documents: &[MappedDocument],
    ) -> Result<(), BackendError>;

    /// Make previously added documents durable and visible.
    ///
    /// Committing twice with no intervening writes must be a no-op from the
    /// backend's perspective.
    async fn commit(&self, collection: &str, options: &CommitOptions) -> Result<(), BackendError>;

    /// Delete committed documents matching a query. Supports `*:*` (all) and
    /// `field:value` equality. Returns the number of documents removed.
    async fn delete_by_query(&self, collection: &str, query: &str) -> Result<u64, BackendError>;

    /// Check whether the backend is healthy and reachable.
    async fn health_check(&self) -> Result<bool, BackendError>;
}
