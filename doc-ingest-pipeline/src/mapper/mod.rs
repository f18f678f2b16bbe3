//! Field mapper.
//!
//! Turns an [`ExtractedRecord`] into a [`MappedDocument`] for one collection:
//! mapping rules select metadata fields, the coercion registry types their
//! values, and the per-field error policy decides whether a bad value drops
//! or fails the whole document.

pub mod coerce;

pub use coerce::{CoercionRegistry, ValueCoercer};

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::debug;

use doc_ingest_shared::{event::keys, ExtractedRecord, FieldValue, Headers, MappedDocument};

use crate::errors::{MappingError, RegistryError};

/// Rule source name that selects the record's extracted body text instead of
/// a metadata field.
pub const TEXT_SOURCE: &str = "text";

/// What to do when a value fails coercion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CoercionErrorPolicy {
    /// Fail the whole document with a mapping error.
    #[default]
    FailDocument,
    /// Drop the offending value, keep the rest of the document.
    DropValue,
}

/// Maps one extracted field onto one schema field.
#[derive(Debug, Clone)]
pub struct MappingRule {
    /// Metadata field to read, or [`TEXT_SOURCE`] for the body text.
    pub source: String,
    /// Schema field to write.
    pub target: String,
    /// Value-type tag resolved against the coercion registry.
    pub value_type: String,
    /// Per-field coercion error policy.
    pub on_error: CoercionErrorPolicy,
    /// Value used when the source field is absent.
    pub default: Option<String>,
}

impl MappingRule {
    /// A rule mapping `source` to `target` as strings, failing on error.
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            value_type: "string".to_string(),
            on_error: CoercionErrorPolicy::FailDocument,
            default: None,
        }
    }

    /// Set the value type.
    pub fn value_type(mut self, value_type: impl Into<String>) -> Self {
        self.value_type = value_type.into();
        self
    }

    /// Set the coercion error policy.
    pub fn on_error(mut self, policy: CoercionErrorPolicy) -> Self {
        self.on_error = policy;
        self
    }

    /// Set the default used when the source is absent.
    pub fn default_value(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }
}

/// One declared field of a collection schema.
#[derive(Debug, Clone)]
pub struct SchemaField {
    pub name: String,
    pub value_type: String,
}

impl SchemaField {
    pub fn new(name: impl Into<String>, value_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value_type: value_type.into(),
        }
    }
}

/// What happens to metadata fields no rule consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnmappedFieldPolicy {
    /// Copy them onto the document as plain strings.
    #[default]
    PassThrough,
    /// Discard them.
    Drop,
}

/// A collection's mapping configuration: schema, rules, and the policy for
/// fields the rules leave untouched.
#[derive(Debug, Clone)]
pub struct CollectionDescriptor {
    pub name: String,
    pub schema: Vec<SchemaField>,
    pub rules: Vec<MappingRule>,
    pub unmapped: UnmappedFieldPolicy,
}

impl CollectionDescriptor {
    /// A descriptor with no rules and pass-through unmapped fields.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: Vec::new(),
            rules: Vec::new(),
            unmapped: UnmappedFieldPolicy::default(),
        }
    }

    /// Add a schema field.
    pub fn field(mut self, field: SchemaField) -> Self {
        self.schema.push(field);
        self
    }

    /// Add a mapping rule.
    pub fn rule(mut self, rule: MappingRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Set the unmapped-field policy.
    pub fn unmapped(mut self, policy: UnmappedFieldPolicy) -> Self {
        self.unmapped = policy;
        self
    }

    /// Check every rule against the schema and the coercion registry.
    ///
    /// Rules must target declared schema fields and use registered value
    /// types. Run at registration time so misconfiguration fails before any
    /// event flows.
    pub fn validate(&self, coercions: &CoercionRegistry) -> Result<(), RegistryError> {
        let declared: HashSet<&str> = self.schema.iter().map(|f| f.name.as_str()).collect();
        for rule in &self.rules {
            if !declared.contains(rule.target.as_str()) {
                return Err(RegistryError::UnknownTargetField {
                    collection: self.name.clone(),
                    field: rule.target.clone(),
                });
            }
            if !coercions.contains(&rule.value_type) {
                return Err(RegistryError::UnknownValueType {
                    collection: self.name.clone(),
                    value_type: rule.value_type.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Applies a collection's mapping rules to extracted records.
pub struct FieldMapper {
    coercions: Arc<CoercionRegistry>,
}

impl FieldMapper {
    /// Create a mapper over a coercion registry.
    pub fn new(coercions: Arc<CoercionRegistry>) -> Self {
        Self { coercions }
    }

    /// Map a record onto a collection's schema under the given document id.
    pub fn map(
        &self,
        record: &ExtractedRecord,
        descriptor: &CollectionDescriptor,
        id: impl Into<String>,
    ) -> Result<MappedDocument, MappingError> {
        let mut document = MappedDocument::new(id);
        let mut consumed: HashSet<&str> = HashSet::new();

        for rule in &descriptor.rules {
            consumed.insert(rule.source.as_str());
            let coercer = self.coercions.get(&rule.value_type).ok_or_else(|| {
                MappingError::new(
                    &rule.target,
                    "",
                    format!("no coercion registered for value type {:?}", rule.value_type),
                )
            })?;

            let owned_text;
            let raw_values: &[String] = if rule.source == TEXT_SOURCE {
                owned_text = [record.text.clone()];
                &owned_text
            } else if let Some(values) = record.values(&rule.source) {
                values
            } else if let Some(default) = &rule.default {
                owned_text = [default.clone()];
                &owned_text
            } else {
                continue;
            };

            for raw in raw_values {
                match coercer.coerce(raw) {
                    Ok(value) => document.push_field(&rule.target, value),
                    Err(err) => match rule.on_error {
                        CoercionErrorPolicy::FailDocument => {
                            return Err(MappingError::new(&rule.target, raw, err.reason));
                        }
                        CoercionErrorPolicy::DropValue => {
                            debug!(
                                field = %rule.target,
                                value = %raw,
                                reason = %err.reason,
                                "Dropping value that failed coercion"
                            );
                        }
                    },
                }
            }
        }

        if descriptor.unmapped == UnmappedFieldPolicy::PassThrough {
            for (field, values) in record.iter() {
                // The id travels on the document itself, not as a field.
                if consumed.contains(field) || field == keys::ID {
                    continue;
                }
                for value in values {
                    document.push_field(field, FieldValue::Str(value.clone()));
                }
            }
        }

        Ok(document)
    }
}

/// How document ids are assigned when no explicit `id` header is present.
#[derive(Debug)]
pub enum IdPolicy {
    /// Monotonic per-run sequence, prefixed to keep ids readable.
    Sequence { prefix: String, next: AtomicU64 },
    /// SHA-256 over the extracted text, hex-encoded. Deterministic, so
    /// replays of the same content land on the same document.
    ContentHash,
}

/// Assigns document ids with a fixed precedence: explicit `id` header first,
/// then the configured policy.
#[derive(Debug)]
pub struct IdAssigner {
    policy: IdPolicy,
}

impl IdAssigner {
    /// Sequence-based ids starting at `start`.
    pub fn sequence(prefix: impl Into<String>, start: u64) -> Self {
        Self {
            policy: IdPolicy::Sequence {
                prefix: prefix.into(),
                next: AtomicU64::new(start),
            },
        }
    }

    /// Content-hash ids.
    pub fn content_hash() -> Self {
        Self {
            policy: IdPolicy::ContentHash,
        }
    }

    /// Assign an id for a record extracted from an event with `headers`.
    pub fn assign(&self, headers: &Headers, record: &ExtractedRecord) -> String {
        if let Some(explicit) = headers.get(keys::ID) {
            return explicit.to_string();
        }
        match &self.policy {
            IdPolicy::Sequence { prefix, next } => {
                let seq = next.fetch_add(1, Ordering::Relaxed);
                format!("{prefix}{seq}")
            }
            IdPolicy::ContentHash => {
                let mut hasher = Sha256::new();
                hasher.update(record.text.as_bytes());
                for (field, values) in record.iter() {
                    hasher.update(field.as_bytes());
                    for value in values {
                        hasher.update(value.as_bytes());
                    }
                }
                let digest = hasher.finalize();
                digest.iter().map(|b| format!("{b:02x}")).collect()
            }
        }
    }
}
