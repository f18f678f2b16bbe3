//! Schema-typed documents ready for the search backend.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A typed field value produced by coercion.
///
/// Serializes untagged so documents render as plain JSON for the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// 64-bit signed integer.
    Long(i64),
    /// Double-precision float.
    Double(f64),
    /// Boolean.
    Bool(bool),
    /// UTC timestamp.
    Date(DateTime<Utc>),
    /// Plain string.
    Str(String),
}

impl FieldValue {
    /// The value-type tag this value would coerce under.
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Long(_) => "long",
            FieldValue::Double(_) => "double",
            FieldValue::Bool(_) => "boolean",
            FieldValue::Date(_) => "date",
            FieldValue::Str(_) => "string",
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Long(v) => write!(f, "{}", v),
            FieldValue::Double(v) => write!(f, "{}", v),
            FieldValue::Bool(v) => write!(f, "{}", v),
            FieldValue::Date(v) => write!(f, "{}", v.to_rfc3339()),
            FieldValue::Str(v) => f.write_str(v),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Str(value.to_string())
    }
}

/// A schema-conformant document: a non-empty id plus typed, multi-valued
/// fields, ready for delivery to a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappedDocument {
    /// Deterministically assigned document id. Never empty.
    pub id: String,
    fields: BTreeMap<String, Vec<FieldValue>>,
}

impl MappedDocument {
    /// Create a document with the given id and no fields.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Append a value to a field.
    pub fn push_field(&mut self, field: impl Into<String>, value: FieldValue) {
        self.fields.entry(field.into()).or_default().push(value);
    }

    /// All values of a field, if present.
    pub fn field(&self, name: &str) -> Option<&[FieldValue]> {
        self.fields.get(name).map(|v| v.as_slice())
    }

    /// Iterate fields and their values in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[FieldValue])> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Number of fields.
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_push_and_read_fields() {
        let mut doc = MappedDocument::new("doc-1");
        doc.push_field("title", FieldValue::from("Example"));
        doc.push_field("price", FieldValue::Double(19.99));
        doc.push_field("price", FieldValue::Double(24.50));

        assert_eq!(doc.field("title"), Some(&[FieldValue::from("Example")][..]));
        assert_eq!(doc.field("price").map(|v| v.len()), Some(2));
        assert!(doc.field("missing").is_none());
    }

    #[test]
    fn test_field_value_display_round_trips_through_parse() {
        assert_eq!(FieldValue::Double(19.99).to_string(), "19.99");
        assert_eq!(FieldValue::Long(-7).to_string(), "-7");
        assert_eq!(FieldValue::Bool(true).to_string(), "true");

        let date = Utc.with_ymd_and_hms(2024, 4, 30, 20, 48, 25).unwrap();
        let printed = FieldValue::Date(date).to_string();
        let parsed: DateTime<Utc> = printed.parse().unwrap();
        assert_eq!(parsed, date);
    }

    #[test]
    fn test_document_serializes_as_plain_json() {
        let mut doc = MappedDocument::new("doc-1");
        doc.push_field("count", FieldValue::Long(3));
        doc.push_field("title", FieldValue::from("Example"));

        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["id"], "doc-1");
        assert_eq!(json["fields"]["count"][0], 3);
        assert_eq!(json["fields"]["title"][0], "Example");
    }
}
