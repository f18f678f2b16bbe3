//! # Doc Ingest Backend
//!
//! This crate provides the seam between the ingest pipeline and the search
//! backend. It includes the client trait, the error taxonomy with
//! transient/permanent classification, and an embedded in-memory backend
//! used for wiring and tests.
//!
//! All durability is delegated to the backend's commit semantics; the
//! pipeline itself owns no persisted state.

pub mod embedded;
pub mod errors;
pub mod interfaces;

pub use embedded::EmbeddedBackend;
pub use errors::{BackendError, DocumentFailure};
pub use interfaces::{CommitOptions, SearchBackendClient};
