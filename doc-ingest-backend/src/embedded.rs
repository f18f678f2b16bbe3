//! Embedded in-memory backend.
//!
//! Implements the full client trait against process memory: documents are
//! staged by `add_batch` and become visible on `commit`, with upsert-by-id
//! semantics so at-least-once redelivery never duplicates a document. Used
//! for local wiring and end-to-end tests in place of a networked backend.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use crate::errors::BackendError;
use crate::interfaces::{CommitOptions, SearchBackendClient};
use doc_ingest_shared::MappedDocument;

#[derive(Debug, Default)]
struct CollectionStore {
    staged: Vec<MappedDocument>,
    committed: BTreeMap<String, MappedDocument>,
    commit_count: u64,
}

/// In-memory search backend with staged/committed document stores.
#[derive(Debug, Default)]
pub struct EmbeddedBackend {
    collections: Mutex<HashMap<String, CollectionStore>>,
    strict_collections: bool,
}

impl EmbeddedBackend {
    /// Create a backend that creates collections on first write.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a backend that only accepts the given collections; writes to
    /// any other name fail with `UnknownCollection`.
    pub fn with_collections<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let collections = names
            .into_iter()
            .map(|n| (n.into(), CollectionStore::default()))
            .collect();
        Self {
            collections: Mutex::new(collections),
            strict_collections: true,
        }
    }

    /// Number of committed (search-visible) documents in a collection.
    pub fn committed_count(&self, collection: &str) -> usize {
        self.collections
            .lock()
            .expect("backend lock poisoned")
            .get(collection)
            .map(|s| s.committed.len())
            .unwrap_or(0)
    }

    /// Number of staged (added, not yet committed) documents.
    pub fn staged_count(&self, collection: &str) -> usize {
        self.collections
            .lock()
            .expect("backend lock poisoned")
            .get(collection)
            .map(|s| s.staged.len())
            .unwrap_or(0)
    }

    /// How many commits actually took effect (no-op commits do not count).
    pub fn commit_count(&self, collection: &str) -> u64 {
        self.collections
            .lock()
            .expect("backend lock poisoned")
            .get(collection)
            .map(|s| s.commit_count)
            .unwrap_or(0)
    }

    /// Fetch a committed document by id.
    pub fn committed_document(&self, collection: &str, id: &str) -> Option<MappedDocument> {
        self.collections
            .lock()
            .expect("backend lock poisoned")
            .get(collection)
            .and_then(|s| s.committed.get(id).cloned())
    }

    /// Read back committed documents matching a query (`*:*` or
    /// `field:value`).
    pub fn search(&self, collection: &str, query: &str) -> Vec<MappedDocument> {
        let collections = self.collections.lock().expect("backend lock poisoned");
        let Some(store) = collections.get(collection) else {
            return Vec::new();
        };
        store
            .committed
            .values()
            .filter(|doc| Self::matches(doc, query))
            .cloned()
            .collect()
    }

    fn matches(doc: &MappedDocument, query: &str) -> bool {
        if query == "*:*" {
            return true;
        }
        let Some((field, value)) = query.split_once(':') else {
            return false;
        };
        if field == "id" {
            return doc.id == value;
        }
        doc.field(field)
            .map(|values| values.iter().any(|v| v.to_string() == value))
            .unwrap_or(false)
    }
}

#[async_trait]
impl SearchBackendClient for EmbeddedBackend {
    async fn add_batch(
        &self,
        collection: &str,
        documents: &[MappedDocument],
    ) -> Result<(), BackendError> {
        if let Some(doc) = documents.iter().find(|d| d.id.is_empty()) {
            return Err(BackendError::invalid_request(format!(
                "document with empty id ({} fields)",
                doc.field_count()
            )));
        }

        let mut collections = self.collections.lock().expect("backend lock poisoned");
        if self.strict_collections && !collections.contains_key(collection) {
            return Err(BackendError::UnknownCollection(collection.to_string()));
        }
        let store = collections.entry(collection.to_string()).or_default();
        store.staged.extend(documents.iter().cloned());

        debug!(
            collection = %collection,
            added = documents.len(),
            staged = store.staged.len(),
            "Staged document batch"
        );
        Ok(())
    }

    async fn commit(&self, collection: &str, _options: &CommitOptions) -> Result<(), BackendError> {
        let mut collections = self.collections.lock().expect("backend lock poisoned");
        if self.strict_collections && !collections.contains_key(collection) {
            return Err(BackendError::UnknownCollection(collection.to_string()));
        }
        let store = collections.entry(collection.to_string()).or_default();

        // Idempotent: nothing staged means nothing to do.
        if store.staged.is_empty() {
            return Ok(());
        }

        for doc in store.staged.drain(..) {
            store.committed.insert(doc.id.clone(), doc);
        }
        store.commit_count += 1;

        debug!(
            collection = %collection,
            visible = store.committed.len(),
            "Committed staged documents"
        );
        Ok(())
    }

    async fn delete_by_query(&self, collection: &str, query: &str) -> Result<u64, BackendError> {
        let mut collections = self.collections.lock().expect("backend lock poisoned");
        let Some(store) = collections.get_mut(collection) else {
            if self.strict_collections {
                return Err(BackendError::UnknownCollection(collection.to_string()));
            }
            return Ok(0);
        };

        let before = store.committed.len();
        store.committed.retain(|_, doc| !Self::matches(doc, query));
        Ok((before - store.committed.len()) as u64)
    }

    async fn health_check(&self) -> Result<bool, BackendError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use doc_ingest_shared::FieldValue;

    fn doc(id: &str, title: &str) -> MappedDocument {
        let mut doc = MappedDocument::new(id);
        doc.push_field("title", FieldValue::from(title));
        doc
    }

    #[tokio::test]
    async fn test_documents_visible_only_after_commit() {
        let backend = EmbeddedBackend::new();
        backend
            .add_batch("articles", &[doc("1", "a"), doc("2", "b")])
            .await
            .unwrap();

        assert_eq!(backend.committed_count("articles"), 0);
        assert_eq!(backend.staged_count("articles"), 2);

        backend
            .commit("articles", &CommitOptions::wait_all())
            .await
            .unwrap();

        assert_eq!(backend.committed_count("articles"), 2);
        assert_eq!(backend.staged_count("articles"), 0);
    }

    #[tokio::test]
    async fn test_commit_without_writes_is_noop() {
        let backend = EmbeddedBackend::new();
        backend.add_batch("articles", &[doc("1", "a")]).await.unwrap();

        let options = CommitOptions::default();
        backend.commit("articles", &options).await.unwrap();
        backend.commit("articles", &options).await.unwrap();
        backend.commit("articles", &options).await.unwrap();

        assert_eq!(backend.commit_count("articles"), 1);
    }

    #[tokio::test]
    async fn test_redelivery_upserts_by_id() {
        let backend = EmbeddedBackend::new();
        backend.add_batch("articles", &[doc("1", "first")]).await.unwrap();
        backend.add_batch("articles", &[doc("1", "second")]).await.unwrap();
        backend
            .commit("articles", &CommitOptions::default())
            .await
            .unwrap();

        assert_eq!(backend.committed_count("articles"), 1);
        let stored = backend.committed_document("articles", "1").unwrap();
        assert_eq!(stored.field("title"), Some(&[FieldValue::from("second")][..]));
    }

    #[tokio::test]
    async fn test_delete_by_query() {
        let backend = EmbeddedBackend::new();
        backend
            .add_batch("articles", &[doc("1", "keep"), doc("2", "drop"), doc("3", "drop")])
            .await
            .unwrap();
        backend
            .commit("articles", &CommitOptions::default())
            .await
            .unwrap();

        let removed = backend.delete_by_query("articles", "title:drop").await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(backend.committed_count("articles"), 1);

        let removed = backend.delete_by_query("articles", "*:*").await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(backend.committed_count("articles"), 0);
    }

    #[tokio::test]
    async fn test_strict_collections_reject_unknown_names() {
        let backend = EmbeddedBackend::with_collections(["articles"]);
        let err = backend.add_batch("other", &[doc("1", "a")]).await.unwrap_err();
        assert!(matches!(err, BackendError::UnknownCollection(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_empty_id_rejected() {
        let backend = EmbeddedBackend::new();
        let err = backend
            .add_batch("articles", &[MappedDocument::new("")])
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::InvalidRequest(_)));
    }
}
