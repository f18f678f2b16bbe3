//! Extraction output: text plus multi-valued metadata.

use std::collections::BTreeMap;

/// The result of extracting one event: body text and metadata where each
/// field may carry several values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedRecord {
    /// The extracted body text.
    pub text: String,
    metadata: BTreeMap<String, Vec<String>>,
}

impl ExtractedRecord {
    /// Create an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a record with body text and no metadata.
    pub fn with_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// Append a metadata value for a field.
    pub fn push_value(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.metadata
            .entry(field.into())
            .or_default()
            .push(value.into());
    }

    /// All values of a metadata field, if present.
    pub fn values(&self, field: &str) -> Option<&[String]> {
        self.metadata.get(field).map(|v| v.as_slice())
    }

    /// First value of a metadata field, if present.
    pub fn first_value(&self, field: &str) -> Option<&str> {
        self.metadata
            .get(field)
            .and_then(|v| v.first())
            .map(|s| s.as_str())
    }

    /// Iterate fields and their values in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.metadata.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Number of metadata fields.
    pub fn field_count(&self) -> usize {
        self.metadata.len()
    }
}
