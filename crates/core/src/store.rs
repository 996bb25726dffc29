use crate::config::StoreConfig;
use crate::embeddings::EmbeddingProvider;
use crate::error::{EmbeddingError, StoreError};
use crate::retry::with_timeout;
use crate::traits::VectorBackend;
use crate::{ClearCommand, HealthStatus, ScoredMatch, StoredVector, VectorRecord};
use chrono::Utc;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct StoreSettings {
    pub top_k: usize,
    pub score_threshold: f64,
    pub dimensions: usize,
    pub request_timeout: Duration,
}

impl From<&StoreConfig> for StoreSettings {
    fn from(config: &StoreConfig) -> Self {
        Self {
            top_k: config.top_k,
            score_threshold: config.score_threshold,
            dimensions: config.dimensions,
            request_timeout: config.request_timeout,
        }
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self::from(&StoreConfig::default())
    }
}

/// Backend-agnostic front of the active adapter: query filtering, timeouts,
/// and health reporting live here, wire formats live in the adapter.
pub struct VectorStore {
    backend: Arc<dyn VectorBackend>,
    embedder: Arc<dyn EmbeddingProvider>,
    settings: StoreSettings,
}

impl VectorStore {
    pub fn new(
        backend: Arc<dyn VectorBackend>,
        embedder: Arc<dyn EmbeddingProvider>,
        settings: StoreSettings,
    ) -> Self {
        Self {
            backend,
            embedder,
            settings,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    /// Returns matched texts in backend rank order. Never fails: any error is
    /// logged and yields an empty result.
    pub async fn query(&self, text: &str) -> Vec<String> {
        match self.query_matches(text).await {
            Ok(matches) => matches.into_iter().map(|hit| hit.text).collect(),
            Err(error) => {
                error!(
                    backend = self.backend.name(),
                    error = %error,
                    "knowledge base query failed, returning no results"
                );
                Vec::new()
            }
        }
    }

    pub async fn query_matches(&self, text: &str) -> Result<Vec<ScoredMatch>, StoreError> {
        if text.trim().is_empty() {
            warn!("empty query text, skipping search");
            return Ok(Vec::new());
        }

        let embedding = self
            .embedding_call(self.embedder.generate_embedding(text))
            .await?;

        let Some(embedding) = embedding else {
            warn!(provider = self.embedder.name(), "no embedding produced for query");
            return Ok(Vec::new());
        };
        self.check_dimensions(&embedding)?;

        let operation = format!("{} search", self.backend.name());
        let hits = with_timeout(
            self.settings.request_timeout,
            &operation,
            self.backend.search(&embedding, self.settings.top_k),
        )
        .await?;

        let accepted = filter_matches(self.backend.as_ref(), &hits, self.settings.score_threshold);
        info!(
            backend = self.backend.name(),
            returned = hits.len(),
            accepted = accepted.len(),
            threshold = self.settings.score_threshold,
            "knowledge base query complete"
        );
        Ok(accepted)
    }

    pub async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, StoreError> {
        let vectors = self
            .embedding_call(self.embedder.generate_embeddings_batch(texts))
            .await?;

        if vectors.len() != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: texts.len(),
                returned: vectors.len(),
            }
            .into());
        }
        for vector in &vectors {
            self.check_dimensions(vector)?;
        }
        Ok(vectors)
    }

    pub async fn upsert(&self, records: &[VectorRecord]) -> Result<usize, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }
        for record in records {
            self.check_dimensions(&record.embedding)?;
        }

        let operation = format!("{} upsert", self.backend.name());
        let written = with_timeout(
            self.settings.request_timeout,
            &operation,
            self.backend.upsert(records),
        )
        .await?;
        debug!(backend = self.backend.name(), written, "upsert complete");
        Ok(written)
    }

    pub async fn delete_all(&self) -> Result<bool, StoreError> {
        let operation = format!("{} delete all", self.backend.name());
        let deleted = with_timeout(
            self.settings.request_timeout,
            &operation,
            self.backend.delete_all(),
        )
        .await?;
        info!(backend = self.backend.name(), deleted, "deleted all vectors");
        Ok(deleted)
    }

    pub async fn delete_by_ids(&self, ids: &[String]) -> Result<bool, StoreError> {
        if ids.is_empty() {
            return Ok(true);
        }
        let operation = format!("{} delete by id", self.backend.name());
        let deleted = with_timeout(
            self.settings.request_timeout,
            &operation,
            self.backend.delete_by_ids(ids),
        )
        .await?;
        info!(backend = self.backend.name(), count = ids.len(), deleted, "deleted vectors by id");
        Ok(deleted)
    }

    pub async fn count(&self) -> Result<usize, StoreError> {
        let operation = format!("{} count", self.backend.name());
        with_timeout(self.settings.request_timeout, &operation, self.backend.count()).await
    }

    pub async fn list_vectors(&self) -> Result<Vec<StoredVector>, StoreError> {
        let operation = format!("{} list", self.backend.name());
        with_timeout(
            self.settings.request_timeout,
            &operation,
            self.backend.list_vectors(),
        )
        .await
    }

    pub async fn after_clear(&self, command: ClearCommand) -> Result<(), StoreError> {
        let operation = format!("{} cleanup", self.backend.name());
        with_timeout(
            self.settings.request_timeout,
            &operation,
            self.backend.after_clear(command),
        )
        .await
    }

    pub async fn health_check(&self) -> bool {
        self.detailed_health_check().await.is_healthy
    }

    pub async fn detailed_health_check(&self) -> HealthStatus {
        let operation = format!("{} health check", self.backend.name());
        let result = with_timeout(
            self.settings.request_timeout,
            &operation,
            self.backend.health_check(),
        )
        .await;

        let (is_healthy, message) = match result {
            Ok(message) => (true, message),
            Err(error) => {
                warn!(backend = self.backend.name(), error = %error, "health check failed");
                (false, error.to_string())
            }
        };

        HealthStatus {
            backend_name: self.backend.name().to_string(),
            is_healthy,
            message,
            timestamp: Utc::now(),
        }
    }

    async fn embedding_call<T, F>(&self, call: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, EmbeddingError>>,
    {
        match tokio::time::timeout(self.settings.request_timeout, call).await {
            Ok(result) => result.map_err(StoreError::from),
            Err(_) => Err(EmbeddingError::Timeout {
                seconds: self.settings.request_timeout.as_secs(),
            }
            .into()),
        }
    }

    fn check_dimensions(&self, vector: &[f32]) -> Result<(), StoreError> {
        if vector.len() != self.settings.dimensions {
            return Err(EmbeddingError::Dimension {
                expected: self.settings.dimensions,
                actual: vector.len(),
            }
            .into());
        }
        Ok(())
    }
}

/// Applies the similarity threshold to raw hits, preserving backend order.
pub fn filter_matches(
    backend: &dyn VectorBackend,
    hits: &[Value],
    threshold: f64,
) -> Vec<ScoredMatch> {
    let mut accepted = Vec::new();

    for (rank, hit) in hits.iter().enumerate() {
        let metadata = backend.extract_metadata(hit);
        let topic = metadata
            .get("topic")
            .and_then(Value::as_str)
            .map(str::to_string);
        let id = backend.extract_id(hit).unwrap_or_default();

        let Some(score) = backend.extract_score(hit) else {
            warn!(rank, id = %id, "dropping match without a score");
            continue;
        };

        let text = match backend.extract_text(hit) {
            Some(text) if !text.trim().is_empty() => text,
            _ => {
                warn!(
                    rank,
                    id = %id,
                    score,
                    topic = topic.as_deref().unwrap_or("unknown"),
                    "dropping match with empty text"
                );
                continue;
            }
        };

        if score < threshold {
            debug!(
                rank,
                score,
                threshold,
                topic = topic.as_deref().unwrap_or("unknown"),
                "rejected match below threshold"
            );
            continue;
        }

        info!(
            rank,
            score,
            threshold,
            topic = topic.as_deref().unwrap_or("unknown"),
            "accepted match"
        );
        accepted.push(ScoredMatch {
            id,
            score,
            text,
            topic,
        });
    }

    accepted
}
