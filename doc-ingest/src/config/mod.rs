//! Declarative pipeline configuration.
//!
//! The JSON configuration mirrors the pipeline's building blocks: global
//! pipeline settings, a routing policy, and one section per collection with
//! its schema, mapping rules, and loader thresholds. Parsed settings convert
//! into the pipeline's own types via the `*_config` methods.

mod dependencies;

pub use dependencies::Dependencies;

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use doc_ingest_pipeline::extract::ExtractOptions;
use doc_ingest_pipeline::loader::LoaderConfig;
use doc_ingest_pipeline::mapper::{
    CoercionErrorPolicy, CollectionDescriptor, IdAssigner, MappingRule, SchemaField,
    UnmappedFieldPolicy,
};
use doc_ingest_pipeline::orchestrator::PipelineConfig;
use doc_ingest_pipeline::registry::RoutingPolicy;

use crate::SetupError;

/// Top-level ingest configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub routing: RoutingSettings,
    pub collections: Vec<CollectionSettings>,
}

impl IngestConfig {
    /// Parse a configuration from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, SetupError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SetupError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }
}

/// Global pipeline settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Transparently decompress gzip bodies and containers.
    pub auto_decompress: bool,
    /// Content type assumed when neither header nor sniffing decides.
    pub default_content_type: String,
    /// Re-enqueue attempts when a loader signals backpressure.
    pub enqueue_retry_attempts: u32,
    /// Delay between backpressure retries, in milliseconds.
    pub enqueue_retry_delay_ms: u64,
    /// Document id assignment when no explicit `id` header is present.
    pub id_policy: IdPolicySettings,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            auto_decompress: true,
            default_content_type: "application/octet-stream".to_string(),
            enqueue_retry_attempts: 3,
            enqueue_retry_delay_ms: 50,
            id_policy: IdPolicySettings::Sequence {
                prefix: default_id_prefix(),
                start: 0,
            },
        }
    }
}

impl PipelineSettings {
    pub(crate) fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            decompress_containers: self.auto_decompress,
            enqueue_retry_attempts: self.enqueue_retry_attempts,
            enqueue_retry_delay: Duration::from_millis(self.enqueue_retry_delay_ms),
        }
    }

    pub(crate) fn extract_options(&self) -> ExtractOptions {
        ExtractOptions {
            auto_decompress: self.auto_decompress,
            default_content_type: self.default_content_type.clone(),
        }
    }

    pub(crate) fn id_assigner(&self) -> IdAssigner {
        match &self.id_policy {
            IdPolicySettings::Sequence { prefix, start } => IdAssigner::sequence(prefix, *start),
            IdPolicySettings::ContentHash => IdAssigner::content_hash(),
        }
    }
}

fn default_id_prefix() -> String {
    "doc-".to_string()
}

/// How document ids are assigned.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum IdPolicySettings {
    Sequence {
        #[serde(default = "default_id_prefix")]
        prefix: String,
        #[serde(default)]
        start: u64,
    },
    ContentHash,
}

/// How records are routed to collections.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RoutingSettings {
    #[default]
    Broadcast,
    Header {
        key: String,
    },
}

impl RoutingSettings {
    pub(crate) fn routing_policy(&self) -> RoutingPolicy {
        match self {
            RoutingSettings::Broadcast => RoutingPolicy::Broadcast,
            RoutingSettings::Header { key } => RoutingPolicy::HeaderKey(key.clone()),
        }
    }
}

/// One collection: schema, mapping rules, and loader thresholds.
#[derive(Debug, Clone, Deserialize)]
pub struct CollectionSettings {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldSettings>,
    #[serde(default)]
    pub rules: Vec<RuleSettings>,
    #[serde(default)]
    pub unmapped: UnmappedSettings,
    #[serde(default)]
    pub loader: LoaderSettings,
}

impl CollectionSettings {
    pub(crate) fn descriptor(&self) -> CollectionDescriptor {
        let mut descriptor = CollectionDescriptor::new(&self.name).unmapped(match self.unmapped {
            UnmappedSettings::PassThrough => UnmappedFieldPolicy::PassThrough,
            UnmappedSettings::Drop => UnmappedFieldPolicy::Drop,
        });
        for field in &self.fields {
            descriptor = descriptor.field(SchemaField::new(&field.name, &field.value_type));
        }
        for rule in &self.rules {
            let mut mapping = MappingRule::new(&rule.source, &rule.target)
                .value_type(&rule.value_type)
                .on_error(match rule.on_error {
                    OnErrorSettings::FailDocument => CoercionErrorPolicy::FailDocument,
                    OnErrorSettings::DropValue => CoercionErrorPolicy::DropValue,
                });
            if let Some(default) = &rule.default {
                mapping = mapping.default_value(default);
            }
            descriptor = descriptor.rule(mapping);
        }
        descriptor
    }
}

/// One declared schema field.
#[derive(Debug, Clone, Deserialize)]
pub struct FieldSettings {
    pub name: String,
    #[serde(default = "default_value_type")]
    pub value_type: String,
}

/// One mapping rule.
#[derive(Debug, Clone, Deserialize)]
pub struct RuleSettings {
    pub source: String,
    pub target: String,
    #[serde(default = "default_value_type")]
    pub value_type: String,
    #[serde(default)]
    pub on_error: OnErrorSettings,
    #[serde(default)]
    pub default: Option<String>,
}

fn default_value_type() -> String {
    "string".to_string()
}

/// Per-rule coercion error policy.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnErrorSettings {
    #[default]
    FailDocument,
    DropValue,
}

/// Policy for metadata fields no rule consumes.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmappedSettings {
    #[default]
    PassThrough,
    Drop,
}

/// Batching and retry thresholds for one collection's loader.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoaderSettings {
    pub max_batch_docs: usize,
    pub linger_ms: u64,
    pub max_in_flight_batches: usize,
    pub send_concurrency: usize,
    pub max_retries: u32,
    pub initial_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
}

impl Default for LoaderSettings {
    fn default() -> Self {
        let defaults = LoaderConfig::default();
        Self {
            max_batch_docs: defaults.max_batch_docs,
            linger_ms: defaults.linger.as_millis() as u64,
            max_in_flight_batches: defaults.max_in_flight_batches,
            send_concurrency: defaults.send_concurrency,
            max_retries: defaults.max_retries,
            initial_retry_delay_ms: defaults.initial_retry_delay.as_millis() as u64,
            max_retry_delay_ms: defaults.max_retry_delay.as_millis() as u64,
        }
    }
}

impl LoaderSettings {
    pub(crate) fn loader_config(&self) -> LoaderConfig {
        LoaderConfig {
            max_batch_docs: self.max_batch_docs,
            linger: Duration::from_millis(self.linger_ms),
            max_in_flight_batches: self.max_in_flight_batches,
            send_concurrency: self.send_concurrency,
            max_retries: self.max_retries,
            initial_retry_delay: Duration::from_millis(self.initial_retry_delay_ms),
            max_retry_delay: Duration::from_millis(self.max_retry_delay_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const FULL_CONFIG: &str = r#"{
        "pipeline": {
            "auto_decompress": false,
            "enqueue_retry_attempts": 5,
            "id_policy": { "policy": "content_hash" }
        },
        "routing": { "mode": "header", "key": "collections" },
        "collections": [
            {
                "name": "products",
                "fields": [
                    { "name": "title" },
                    { "name": "price", "value_type": "double" }
                ],
                "rules": [
                    { "source": "title", "target": "title" },
                    {
                        "source": "price",
                        "target": "price",
                        "value_type": "double",
                        "on_error": "drop_value",
                        "default": "0.0"
                    }
                ],
                "unmapped": "drop",
                "loader": { "max_batch_docs": 8, "linger_ms": 0 }
            }
        ]
    }"#;

    #[test]
    fn test_parses_full_config() {
        let config = IngestConfig::from_json(FULL_CONFIG).unwrap();

        assert!(!config.pipeline.auto_decompress);
        assert_eq!(config.pipeline.enqueue_retry_attempts, 5);
        assert!(matches!(
            config.pipeline.id_policy,
            IdPolicySettings::ContentHash
        ));
        assert!(matches!(
            config.routing.routing_policy(),
            RoutingPolicy::HeaderKey(ref key) if key == "collections"
        ));

        let collection = &config.collections[0];
        assert_eq!(collection.name, "products");
        assert_eq!(collection.fields[1].value_type, "double");
        assert!(matches!(collection.rules[1].on_error, OnErrorSettings::DropValue));
        assert_eq!(collection.rules[1].default.as_deref(), Some("0.0"));
        assert_eq!(collection.loader.max_batch_docs, 8);
        // Unset loader knobs fall back to defaults.
        assert_eq!(
            collection.loader.max_retries,
            LoaderConfig::default().max_retries
        );
    }

    #[test]
    fn test_defaults_cover_minimal_config() {
        let config = IngestConfig::from_json(r#"{ "collections": [{ "name": "docs" }] }"#).unwrap();

        assert!(config.pipeline.auto_decompress);
        assert!(matches!(config.routing, RoutingSettings::Broadcast));
        let descriptor = config.collections[0].descriptor();
        assert_eq!(descriptor.name, "docs");
        assert!(descriptor.rules.is_empty());
        assert_eq!(descriptor.unmapped, UnmappedFieldPolicy::PassThrough);
    }

    #[test]
    fn test_loads_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(FULL_CONFIG.as_bytes()).unwrap();

        let config = IngestConfig::from_file(file.path()).unwrap();
        assert_eq!(config.collections[0].name, "products");

        assert!(IngestConfig::from_file("/nonexistent/config.json").is_err());
    }

    #[test]
    fn test_rejects_malformed_config() {
        let err = IngestConfig::from_json(r#"{ "collections": "not-a-list" }"#).unwrap_err();
        assert!(matches!(err, SetupError::ParseError(_)));
    }
}
