//! Collection registry.
//!
//! Holds every registered collection with its mapping descriptor and its
//! loader, and routes extracted records to target collections. Descriptors
//! are validated at registration time so misconfiguration fails before any
//! event flows.

use std::sync::Arc;

use doc_ingest_shared::{event::keys, Headers};

use crate::errors::RegistryError;
use crate::loader::DocumentLoader;
use crate::mapper::{CoercionRegistry, CollectionDescriptor};

/// How records are routed to collections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingPolicy {
    /// Every record goes to every registered collection.
    Broadcast,
    /// A header names the target collections as a comma-separated list.
    /// Records without the header are routed nowhere.
    HeaderKey(String),
}

impl RoutingPolicy {
    /// Header routing on the well-known `collections` header.
    pub fn collections_header() -> Self {
        Self::HeaderKey(keys::COLLECTIONS.to_string())
    }
}

/// One registered collection: its mapping configuration plus its loader.
pub struct CollectionEntry {
    pub descriptor: CollectionDescriptor,
    pub loader: Arc<DocumentLoader>,
}

/// Builds a [`CollectionRegistry`], validating each descriptor against the
/// coercion registry as it is added.
pub struct CollectionRegistryBuilder {
    coercions: Arc<CoercionRegistry>,
    routing: RoutingPolicy,
    entries: Vec<CollectionEntry>,
}

impl CollectionRegistryBuilder {
    pub fn new(coercions: Arc<CoercionRegistry>, routing: RoutingPolicy) -> Self {
        Self {
            coercions,
            routing,
            entries: Vec::new(),
        }
    }

    /// Register a collection. Rejects duplicate names and descriptors whose
    /// rules reference unknown schema fields or value types.
    pub fn register(
        mut self,
        descriptor: CollectionDescriptor,
        loader: Arc<DocumentLoader>,
    ) -> Result<Self, RegistryError> {
        if self.entries.iter().any(|e| e.descriptor.name == descriptor.name) {
            return Err(RegistryError::DuplicateCollection(descriptor.name));
        }
        descriptor.validate(&self.coercions)?;
        self.entries.push(CollectionEntry { descriptor, loader });
        Ok(self)
    }

    pub fn build(self) -> CollectionRegistry {
        CollectionRegistry {
            routing: self.routing,
            entries: self.entries,
        }
    }
}

/// Immutable set of registered collections with a routing policy.
pub struct CollectionRegistry {
    routing: RoutingPolicy,
    entries: Vec<CollectionEntry>,
}

impl CollectionRegistry {
    /// Look up a collection by name.
    pub fn get(&self, name: &str) -> Option<&CollectionEntry> {
        self.entries.iter().find(|e| e.descriptor.name == name)
    }

    /// Iterate collections in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &CollectionEntry> {
        self.entries.iter()
    }

    /// Number of registered collections.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no collections are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve the target collections for a record's headers.
    ///
    /// Broadcast returns every collection in registration order. Header
    /// routing returns the named collections in header order, deduplicated;
    /// naming an unregistered collection is an error, a missing header
    /// routes nowhere.
    pub fn route(&self, headers: &Headers) -> Result<Vec<&CollectionEntry>, RegistryError> {
        match &self.routing {
            RoutingPolicy::Broadcast => Ok(self.entries.iter().collect()),
            RoutingPolicy::HeaderKey(key) => {
                let Some(raw) = headers.get(key) else {
                    return Ok(Vec::new());
                };
                let mut targets: Vec<&CollectionEntry> = Vec::new();
                for name in raw.split(',').map(str::trim).filter(|n| !n.is_empty()) {
                    let entry = self
                        .get(name)
                        .ok_or_else(|| RegistryError::UnknownCollection(name.to_string()))?;
                    if !targets
                        .iter()
                        .any(|t| t.descriptor.name == entry.descriptor.name)
                    {
                        targets.push(entry);
                    }
                }
                Ok(targets)
            }
        }
    }
}
