use crate::cancel::CancellationToken;
use crate::clear::ClearPipeline;
use crate::config::{BackendKind, StoreConfig, DEFAULT_KNOWLEDGE_FILE};
use crate::embeddings::EmbeddingProvider;
use crate::error::{ConfigError, IngestError};
use crate::ingest::{IngestionPipeline, IngestionSettings};
use crate::store::{StoreSettings, VectorStore};
use crate::stores::{PineconeStore, QdrantStore};
use crate::traits::VectorBackend;
use crate::{ClearCommand, ClearReport, HealthStatus, IngestionStats};
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{error, info};

pub type BackendFactory =
    Box<dyn Fn(&StoreConfig) -> Result<Arc<dyn VectorBackend>, ConfigError> + Send + Sync>;

/// Builds the adapter named by `config.backend`.
pub fn build_backend(config: &StoreConfig) -> Result<Arc<dyn VectorBackend>, ConfigError> {
    let backend: Arc<dyn VectorBackend> = match config.backend {
        BackendKind::Qdrant => Arc::new(QdrantStore::new(
            config.qdrant.url.clone(),
            config.collection.clone(),
            config.dimensions,
            config.qdrant.api_key.as_deref(),
            config.request_timeout,
        )?),
        BackendKind::Pinecone => Arc::new(PineconeStore::new(
            &config.pinecone,
            config.collection.clone(),
            config.dimensions,
            config.request_timeout,
        )?),
    };
    Ok(backend)
}

/// Entry point for callers: resolves the configured backend once, on first
/// use, and routes every operation through it.
pub struct BackendSelector {
    config: StoreConfig,
    embedder: Arc<dyn EmbeddingProvider>,
    factory: BackendFactory,
    store: OnceCell<Arc<VectorStore>>,
}

impl BackendSelector {
    pub fn new(config: StoreConfig, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self::with_factory(config, embedder, Box::new(build_backend))
    }

    pub fn with_factory(
        config: StoreConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        factory: BackendFactory,
    ) -> Self {
        Self {
            config,
            embedder,
            factory,
            store: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Concurrent first callers share a single initialization.
    pub async fn store(&self) -> Result<Arc<VectorStore>, ConfigError> {
        self.store
            .get_or_try_init(|| async {
                self.config.validate()?;
                let backend = (self.factory)(&self.config)?;
                info!(
                    backend = backend.name(),
                    collection = %self.config.collection,
                    "vector backend selected"
                );
                Ok::<_, ConfigError>(Arc::new(VectorStore::new(
                    backend,
                    self.embedder.clone(),
                    StoreSettings::from(&self.config),
                )))
            })
            .await
            .cloned()
    }

    pub async fn upload_data(
        &self,
        path: Option<&Path>,
        cancel: Option<CancellationToken>,
    ) -> Result<IngestionStats, IngestError> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_KNOWLEDGE_FILE));
        let store = self.store().await?;
        let mut pipeline = IngestionPipeline::new(store, IngestionSettings::from(&self.config));
        if let Some(cancel) = cancel {
            pipeline = pipeline.with_cancellation(cancel);
        }
        pipeline.ingest(path).await
    }

    pub async fn clear_data(&self, command: ClearCommand) -> Result<ClearReport, IngestError> {
        let store = self.store().await?;
        ClearPipeline::new(store).run(command).await
    }

    /// Texts of the matches above the score threshold; empty on any failure.
    pub async fn query_knowledge_base(&self, text: &str) -> Vec<String> {
        match self.store().await {
            Ok(store) => store.query(text).await,
            Err(err) => {
                error!(error = %err, "vector backend unavailable for query");
                Vec::new()
            }
        }
    }

    pub async fn health_status(&self) -> bool {
        match self.store().await {
            Ok(store) => store.health_check().await,
            Err(err) => {
                error!(error = %err, "vector backend could not be initialised");
                false
            }
        }
    }

    pub async fn detailed_health_status(&self) -> HealthStatus {
        match self.store().await {
            Ok(store) => store.detailed_health_check().await,
            Err(err) => HealthStatus {
                backend_name: self.config.backend.to_string(),
                is_healthy: false,
                message: err.to_string(),
                timestamp: Utc::now(),
            },
        }
    }
}
