//! Dependency initialization and wiring for the ingest pipeline.

use std::sync::Arc;

use tracing::info;

use crate::{IngestConfig, SetupError};
use doc_ingest_backend::{EmbeddedBackend, SearchBackendClient};
use doc_ingest_pipeline::extract::{ExtractionDispatcher, ExtractorRegistry};
use doc_ingest_pipeline::loader::DocumentLoader;
use doc_ingest_pipeline::mapper::{CoercionRegistry, FieldMapper};
use doc_ingest_pipeline::orchestrator::PipelineOrchestrator;
use doc_ingest_pipeline::registry::CollectionRegistryBuilder;
use doc_ingest_pipeline::PipelineError;

/// Container for all initialized dependencies.
pub struct Dependencies {
    /// The configured orchestrator ready to process events.
    pub orchestrator: Arc<PipelineOrchestrator>,
}

impl std::fmt::Debug for Dependencies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dependencies").finish_non_exhaustive()
    }
}

impl Dependencies {
    /// Initialize the pipeline over an embedded in-memory backend that only
    /// accepts the configured collections.
    pub async fn new(config: &IngestConfig) -> Result<Self, SetupError> {
        let names = config.collections.iter().map(|c| c.name.clone());
        let backend = Arc::new(EmbeddedBackend::with_collections(names));
        info!("Using embedded search backend");
        Self::with_client(config, backend).await
    }

    /// Initialize the pipeline over a caller-supplied backend client.
    ///
    /// Verifies the backend is reachable, builds the coercion and extractor
    /// registries, one loader per configured collection, and the routing
    /// registry, then assembles the orchestrator.
    pub async fn with_client(
        config: &IngestConfig,
        client: Arc<dyn SearchBackendClient>,
    ) -> Result<Self, SetupError> {
        let healthy = client
            .health_check()
            .await
            .map_err(|e| SetupError::config(format!("Backend health check failed: {}", e)))?;
        if !healthy {
            return Err(SetupError::config("Search backend is unhealthy"));
        }
        info!("Search backend connection verified");

        let coercions = Arc::new(CoercionRegistry::with_defaults());
        let extractors = Arc::new(ExtractorRegistry::with_defaults());

        let mut builder =
            CollectionRegistryBuilder::new(coercions.clone(), config.routing.routing_policy());
        for collection in &config.collections {
            let loader = DocumentLoader::new(
                collection.name.clone(),
                client.clone(),
                collection.loader.loader_config(),
            );
            builder = builder
                .register(collection.descriptor(), loader)
                .map_err(PipelineError::from)?;
        }
        let registry = Arc::new(builder.build());
        info!(collections = registry.len(), "Collection registry built");

        let orchestrator = PipelineOrchestrator::new(
            registry,
            ExtractionDispatcher::new(extractors, config.pipeline.extract_options()),
            FieldMapper::new(coercions),
            config.pipeline.id_assigner(),
            config.pipeline.pipeline_config(),
        );

        Ok(Self {
            orchestrator: Arc::new(orchestrator),
        })
    }
}
