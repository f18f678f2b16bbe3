//! Value coercion registry.
//!
//! Coercions turn raw metadata strings into typed [`FieldValue`]s. The set
//! of value types is open: callers register additional coercers under new
//! type tags without touching the mapper.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use doc_ingest_shared::FieldValue;

use crate::errors::CoercionError;

/// Converts one raw string into a typed field value.
pub trait ValueCoercer: Send + Sync {
    fn coerce(&self, raw: &str) -> Result<FieldValue, CoercionError>;
}

/// Open map of value-type tag to coercer.
pub struct CoercionRegistry {
    by_type: HashMap<String, Arc<dyn ValueCoercer>>,
}

impl CoercionRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            by_type: HashMap::new(),
        }
    }

    /// A registry preloaded with the built-in scalar coercions.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        let string = Arc::new(StringCoercer);
        registry.register("string", string.clone());
        registry.register("text", string);
        let double = Arc::new(DoubleCoercer);
        registry.register("double", double.clone());
        registry.register("float", double);
        let long = Arc::new(LongCoercer);
        registry.register("long", long.clone());
        registry.register("int", long.clone());
        registry.register("integer", long);
        let boolean = Arc::new(BooleanCoercer);
        registry.register("boolean", boolean.clone());
        registry.register("bool", boolean);
        registry.register("date", Arc::new(DateCoercer));
        registry
    }

    /// Register a coercer under a value-type tag.
    pub fn register(&mut self, value_type: impl Into<String>, coercer: Arc<dyn ValueCoercer>) {
        self.by_type.insert(value_type.into(), coercer);
    }

    /// Look up the coercer for a value type.
    pub fn get(&self, value_type: &str) -> Option<&Arc<dyn ValueCoercer>> {
        self.by_type.get(value_type)
    }

    /// Whether a coercer is registered for a value type.
    pub fn contains(&self, value_type: &str) -> bool {
        self.by_type.contains_key(value_type)
    }
}

impl Default for CoercionRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

struct StringCoercer;

impl ValueCoercer for StringCoercer {
    fn coerce(&self, raw: &str) -> Result<FieldValue, CoercionError> {
        Ok(FieldValue::Str(raw.to_string()))
    }
}

struct DoubleCoercer;

impl ValueCoercer for DoubleCoercer {
    fn coerce(&self, raw: &str) -> Result<FieldValue, CoercionError> {
        raw.trim()
            .parse::<f64>()
            .map(FieldValue::Double)
            .map_err(|_| CoercionError::new(format!("{raw:?} is not a valid double")))
    }
}

struct LongCoercer;

impl ValueCoercer for LongCoercer {
    fn coerce(&self, raw: &str) -> Result<FieldValue, CoercionError> {
        raw.trim()
            .parse::<i64>()
            .map(FieldValue::Long)
            .map_err(|_| CoercionError::new(format!("{raw:?} is not a valid long")))
    }
}

struct BooleanCoercer;

impl ValueCoercer for BooleanCoercer {
    fn coerce(&self, raw: &str) -> Result<FieldValue, CoercionError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(FieldValue::Bool(true)),
            "false" => Ok(FieldValue::Bool(false)),
            _ => Err(CoercionError::new(format!(
                "{raw:?} is not a valid boolean"
            ))),
        }
    }
}

struct DateCoercer;

impl ValueCoercer for DateCoercer {
    fn coerce(&self, raw: &str) -> Result<FieldValue, CoercionError> {
        DateTime::parse_from_rfc3339(raw.trim())
            .map(|dt| FieldValue::Date(dt.with_timezone(&Utc)))
            .map_err(|e| CoercionError::new(format!("{raw:?} is not a valid RFC 3339 date: {e}")))
    }
}
