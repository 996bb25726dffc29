use crate::cancel::CancellationToken;
use crate::config::StoreConfig;
use crate::error::IngestError;
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::store::VectorStore;
use crate::validation::{
    check_token_limits, content_hash, parse_items, partition_batches, validate_items,
    TokenEstimator,
};
use crate::{BatchReport, IngestionStats, KnowledgeItem, VectorMetadata, VectorRecord};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct IngestionSettings {
    pub batch_size: usize,
    pub max_tokens_per_item: usize,
    pub batch_delay: Duration,
    pub retry: RetryPolicy,
}

impl From<&StoreConfig> for IngestionSettings {
    fn from(config: &StoreConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            max_tokens_per_item: config.max_tokens_per_item,
            batch_delay: config.batch_delay,
            retry: config.retry.clone(),
        }
    }
}

/// Reads a knowledge file and validates its structure, reporting every bad record.
pub async fn load_knowledge_file(path: &Path) -> Result<Vec<KnowledgeItem>, IngestError> {
    let raw = tokio::fs::read_to_string(path).await?;
    let values: Vec<Value> = serde_json::from_str(&raw)?;
    parse_items(values)
}

pub fn build_record(
    item: &KnowledgeItem,
    embedding: Vec<f32>,
    token_count: usize,
    created_at: DateTime<Utc>,
) -> VectorRecord {
    VectorRecord {
        id: item
            .id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        embedding,
        metadata: VectorMetadata {
            category: item.category.clone(),
            topic: item.topic.clone(),
            text: item.text.clone(),
            text_length: item.text.chars().count(),
            token_count,
            avatar_id: item.avatar_id.clone(),
            content_hash: Some(content_hash(&item.text)),
            created_at: Some(created_at),
            extra: item.extra.clone(),
        },
    }
}

/// Sequential embed-and-upsert of a knowledge file through the active store.
///
/// Batches run one at a time with `batch_delay` between them; a batch whose
/// upsert still fails after the retry policy is recorded as failed and the run
/// moves on. Running this concurrently with a clear against the same
/// collection is not supported.
pub struct IngestionPipeline {
    store: Arc<VectorStore>,
    settings: IngestionSettings,
    cancel: CancellationToken,
}

impl IngestionPipeline {
    pub fn new(store: Arc<VectorStore>, settings: IngestionSettings) -> Self {
        Self {
            store,
            settings,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub async fn ingest(&self, path: &Path) -> Result<IngestionStats, IngestError> {
        info!(path = %path.display(), backend = self.store.backend_name(), "loading knowledge file");
        let items = load_knowledge_file(path).await.map_err(|error| {
            error!(path = %path.display(), error = %error, "knowledge file rejected");
            error
        })?;
        self.ingest_items(items).await
    }

    pub async fn ingest_items(&self, items: Vec<KnowledgeItem>) -> Result<IngestionStats, IngestError> {
        let started = Instant::now();
        let issues = validate_items(&items);
        if !issues.is_empty() {
            error!(issues = issues.len(), "knowledge items failed validation");
            return Err(IngestError::Validation(issues));
        }

        let estimator = TokenEstimator::new()?;
        let token_counts: Vec<usize> = items.iter().map(|item| estimator.estimate(&item.text)).collect();

        let violations = check_token_limits(&items, &estimator, self.settings.max_tokens_per_item);
        if !violations.is_empty() {
            for violation in &violations {
                error!(
                    index = violation.index,
                    topic = %violation.topic,
                    tokens = violation.tokens,
                    limit = violation.limit,
                    over_by = violation.over_by(),
                    suggested_parts = violation.suggested_parts(),
                    "item exceeds token limit, split it before uploading"
                );
            }
            return Err(IngestError::TokenLimit(violations));
        }

        let mut stats = IngestionStats {
            total_items: items.len(),
            ..IngestionStats::default()
        };
        if items.is_empty() {
            info!("knowledge file is empty, nothing to ingest");
            return Ok(stats);
        }

        let health = self.store.detailed_health_check().await;
        if !health.is_healthy {
            return Err(IngestError::BackendUnavailable {
                backend: health.backend_name,
                message: health.message,
            });
        }

        let batches = partition_batches(&items, self.settings.batch_size);
        stats.batch_count = batches.len();
        info!(
            items = items.len(),
            batches = batches.len(),
            batch_size = self.settings.batch_size,
            backend = self.store.backend_name(),
            "starting ingestion"
        );

        let mut offset = 0;
        for (index, batch) in batches.into_iter().enumerate() {
            if index > 0 && !self.settings.batch_delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.settings.batch_delay) => {}
                    _ = self.cancel.cancelled() => {}
                }
            }
            if self.cancel.is_cancelled() {
                warn!(
                    batch = index + 1,
                    remaining_items = stats.total_items - stats.processed_items,
                    "ingestion cancelled"
                );
                stats.cancelled = true;
                break;
            }

            let report = self
                .process_batch(index, batch, &token_counts[offset..offset + batch.len()])
                .await;
            offset += batch.len();

            stats.processed_items += batch.len();
            if report.succeeded {
                stats.successful_items += batch.len();
            } else {
                stats.failed_items += batch.len();
            }
            stats.batches.push(report);
        }

        stats.elapsed = started.elapsed();
        info!(
            total = stats.total_items,
            successful = stats.successful_items,
            failed = stats.failed_items,
            batches = stats.batch_count,
            cancelled = stats.cancelled,
            elapsed_ms = stats.elapsed.as_millis() as u64,
            "ingestion finished"
        );
        Ok(stats)
    }

    async fn process_batch(
        &self,
        index: usize,
        batch: &[KnowledgeItem],
        token_counts: &[usize],
    ) -> BatchReport {
        let texts: Vec<&str> = batch.iter().map(|item| item.text.as_str()).collect();
        let store = &self.store;

        let embed_label = format!("batch {} embedding", index + 1);
        let texts = &texts;
        let embedded = retry_with_backoff(&self.settings.retry, &embed_label, move |_| {
            store.embed_batch(texts)
        })
        .await;
        let embedding_attempts = embedded.attempts;
        let embeddings = match embedded.result {
            Ok(embeddings) => embeddings,
            Err(error) => {
                error!(
                    batch = index + 1,
                    size = batch.len(),
                    attempts = embedding_attempts,
                    error = %error,
                    "batch embedding failed"
                );
                return BatchReport {
                    index,
                    size: batch.len(),
                    embedding_attempts,
                    attempts: 0,
                    succeeded: false,
                    error: Some(error.to_string()),
                };
            }
        };

        let created_at = Utc::now();
        let records: Vec<VectorRecord> = batch
            .iter()
            .zip(embeddings)
            .zip(token_counts)
            .map(|((item, embedding), tokens)| build_record(item, embedding, *tokens, created_at))
            .collect();

        let label = format!("batch {} upsert", index + 1);
        let records = &records;
        let outcome =
            retry_with_backoff(&self.settings.retry, &label, move |_| store.upsert(records)).await;

        match outcome.result {
            Ok(written) => {
                if written != records.len() {
                    warn!(
                        batch = index + 1,
                        expected = records.len(),
                        written,
                        "backend reported a different write count"
                    );
                }
                info!(
                    batch = index + 1,
                    size = batch.len(),
                    attempts = outcome.attempts,
                    "batch uploaded"
                );
                BatchReport {
                    index,
                    size: batch.len(),
                    embedding_attempts,
                    attempts: outcome.attempts,
                    succeeded: true,
                    error: None,
                }
            }
            Err(error) => {
                error!(
                    batch = index + 1,
                    size = batch.len(),
                    attempts = outcome.attempts,
                    error = %error,
                    "batch upload failed, continuing with next batch"
                );
                BatchReport {
                    index,
                    size: batch.len(),
                    embedding_attempts,
                    attempts: outcome.attempts,
                    succeeded: false,
                    error: Some(error.to_string()),
                }
            }
        }
    }
}
