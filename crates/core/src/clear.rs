use crate::error::IngestError;
use crate::store::VectorStore;
use crate::validation::content_hash;
use crate::{ClearCommand, ClearReport, PreviewStats, StoredVector};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

const METADATA_OVERHEAD_BYTES: u64 = 256;
const DELETE_CHUNK_SIZE: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicatePlan {
    pub groups: usize,
    pub redundant_ids: Vec<String>,
}

/// Groups vectors by content hash and marks all but the newest in each group.
/// Ties on `created_at` keep the greatest id.
pub fn plan_duplicate_removal(vectors: &[StoredVector]) -> DuplicatePlan {
    let mut groups: HashMap<String, Vec<&StoredVector>> = HashMap::new();
    for vector in vectors {
        let hash = match (&vector.content_hash, &vector.text) {
            (Some(hash), _) => hash.clone(),
            (None, Some(text)) => content_hash(text),
            (None, None) => continue,
        };
        groups.entry(hash).or_default().push(vector);
    }

    let mut plan = DuplicatePlan {
        groups: 0,
        redundant_ids: Vec::new(),
    };
    for members in groups.values().filter(|members| members.len() > 1) {
        plan.groups += 1;
        let keep = members
            .iter()
            .max_by(|left, right| {
                left.created_at
                    .cmp(&right.created_at)
                    .then_with(|| left.id.cmp(&right.id))
            })
            .map(|vector| vector.id.as_str());
        plan.redundant_ids.extend(
            members
                .iter()
                .filter(|vector| Some(vector.id.as_str()) != keep)
                .map(|vector| vector.id.clone()),
        );
    }
    plan.redundant_ids.sort_unstable();
    plan
}

pub fn estimate_storage_bytes(vectors: &[StoredVector], dimensions: usize) -> u64 {
    let vector_bytes = (vectors.len() * dimensions * std::mem::size_of::<f32>()) as u64;
    let text_bytes: u64 = vectors
        .iter()
        .map(|vector| vector.text.as_ref().map_or(0, |text| text.len() as u64))
        .sum();
    vector_bytes + text_bytes + vectors.len() as u64 * METADATA_OVERHEAD_BYTES
}

/// Destructive and maintenance commands against the active collection.
///
/// Every command health-checks the backend first and runs the adapter's
/// cleanup hook afterwards.
pub struct ClearPipeline {
    store: Arc<VectorStore>,
}

impl ClearPipeline {
    pub fn new(store: Arc<VectorStore>) -> Self {
        Self { store }
    }

    pub async fn run(&self, command: ClearCommand) -> Result<ClearReport, IngestError> {
        let started = Instant::now();
        let backend_name = self.store.backend_name().to_string();

        let health = self.store.detailed_health_check().await;
        if !health.is_healthy {
            warn!(%command, backend = %backend_name, message = %health.message, "aborting clear, backend unavailable");
            return Err(IngestError::BackendUnavailable {
                backend: health.backend_name,
                message: health.message,
            });
        }

        let (removed, preview) = match command {
            ClearCommand::ClearAll => (self.clear_all().await?, None),
            ClearCommand::Preview => (0, Some(self.preview().await?)),
            ClearCommand::Duplicates => (self.remove_duplicates().await?, None),
        };

        if let Err(error) = self.store.after_clear(command).await {
            warn!(%command, error = %error, "post-clear cleanup failed");
        }

        let report = ClearReport {
            command,
            backend_name,
            success: true,
            removed,
            elapsed: started.elapsed(),
            preview,
        };
        info!(
            %command,
            removed = report.removed,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "clear command finished"
        );
        Ok(report)
    }

    async fn clear_all(&self) -> Result<usize, IngestError> {
        let existing = match self.store.count().await {
            Ok(count) => count,
            Err(error) => {
                warn!(error = %error, "could not count vectors before clearing");
                0
            }
        };
        if !self.store.delete_all().await? {
            return Err(IngestError::InvalidArgument(format!(
                "{} refused to delete all vectors",
                self.store.backend_name()
            )));
        }
        Ok(existing)
    }

    pub async fn preview(&self) -> Result<PreviewStats, IngestError> {
        let vectors = self.store.list_vectors().await?;
        let total_vectors = match self.store.count().await {
            Ok(count) => count.max(vectors.len()),
            Err(_) => vectors.len(),
        };
        let plan = plan_duplicate_removal(&vectors);

        Ok(PreviewStats {
            total_vectors,
            estimated_bytes: estimate_storage_bytes(&vectors, self.store.settings().dimensions),
            duplicate_groups: plan.groups,
            redundant_vectors: plan.redundant_ids.len(),
        })
    }

    async fn remove_duplicates(&self) -> Result<usize, IngestError> {
        let vectors = self.store.list_vectors().await?;
        let plan = plan_duplicate_removal(&vectors);
        if plan.redundant_ids.is_empty() {
            info!(scanned = vectors.len(), "no duplicate vectors found");
            return Ok(0);
        }

        info!(
            scanned = vectors.len(),
            groups = plan.groups,
            redundant = plan.redundant_ids.len(),
            "removing duplicate vectors"
        );
        for chunk in plan.redundant_ids.chunks(DELETE_CHUNK_SIZE) {
            self.store.delete_by_ids(chunk).await?;
        }
        Ok(plan.redundant_ids.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreSettings;
    use crate::testing::{record, record_at, FakeBackend, FakeEmbedder};
    use chrono::{Duration as ChronoDuration, Utc};

    const DIMS: usize = 4;

    fn pipeline(backend: Arc<FakeBackend>) -> ClearPipeline {
        let store = VectorStore::new(
            backend,
            Arc::new(FakeEmbedder::new(DIMS)),
            StoreSettings {
                dimensions: DIMS,
                ..StoreSettings::default()
            },
        );
        ClearPipeline::new(Arc::new(store))
    }

    fn stored(id: &str, hash: Option<&str>, text: Option<&str>, minutes_ago: Option<i64>) -> StoredVector {
        StoredVector {
            id: id.to_string(),
            content_hash: hash.map(str::to_string),
            created_at: minutes_ago.map(|minutes| Utc::now() - ChronoDuration::minutes(minutes)),
            text: text.map(str::to_string),
            topic: None,
        }
    }

    #[test]
    fn duplicate_plan_keeps_newest_per_hash() {
        let vectors = vec![
            stored("a", Some("h1"), None, Some(30)),
            stored("b", Some("h1"), None, Some(5)),
            stored("c", Some("h1"), None, Some(60)),
            stored("d", Some("h2"), None, Some(10)),
            stored("e", None, Some("Refunds take five days."), Some(20)),
            stored("f", None, Some("refunds  take five DAYS."), Some(1)),
            stored("g", None, None, None),
        ];

        let plan = plan_duplicate_removal(&vectors);
        assert_eq!(plan.groups, 2);
        assert_eq!(plan.redundant_ids, vec!["a", "c", "e"]);
    }

    #[test]
    fn duplicate_plan_breaks_ties_by_id() {
        let vectors = vec![
            stored("x-1", Some("h"), None, None),
            stored("x-2", Some("h"), None, None),
        ];
        assert_eq!(plan_duplicate_removal(&vectors).redundant_ids, vec!["x-1"]);
    }

    #[test]
    fn storage_estimate_counts_vectors_text_and_overhead() {
        let vectors = vec![
            stored("a", None, Some("12345"), None),
            stored("b", None, None, None),
        ];
        assert_eq!(estimate_storage_bytes(&vectors, 4), 2 * 16 + 5 + 2 * 256);
    }

    #[tokio::test]
    async fn unhealthy_backend_blocks_clear_all() {
        let backend = Arc::new(FakeBackend::new());
        backend.insert(vec![record("a", "Refunds take five days.", DIMS)]);
        backend.set_healthy(false);

        let result = pipeline(backend.clone()).run(ClearCommand::ClearAll).await;

        assert!(matches!(result, Err(IngestError::BackendUnavailable { .. })));
        assert_eq!(backend.delete_calls(), 0);
        assert_eq!(backend.cleanup_calls(), 0);
        assert_eq!(backend.ids().len(), 1);
    }

    #[tokio::test]
    async fn clear_all_removes_everything() -> Result<(), IngestError> {
        let backend = Arc::new(FakeBackend::new());
        backend.insert(vec![
            record("a", "Refunds take five days.", DIMS),
            record("b", "Shipping is free.", DIMS),
        ]);

        let report = pipeline(backend.clone()).run(ClearCommand::ClearAll).await?;

        assert!(report.success);
        assert_eq!(report.removed, 2);
        assert!(backend.ids().is_empty());
        assert_eq!(backend.cleanup_calls(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn preview_does_not_mutate() -> Result<(), IngestError> {
        let backend = Arc::new(FakeBackend::new());
        backend.insert(vec![
            record("a", "Refunds take five days.", DIMS),
            record("b", "refunds take five days.", DIMS),
            record("c", "Shipping is free.", DIMS),
        ]);

        let report = pipeline(backend.clone()).run(ClearCommand::Preview).await?;
        let preview = report.preview.expect("preview stats present");

        assert_eq!(preview.total_vectors, 3);
        assert_eq!(preview.duplicate_groups, 1);
        assert_eq!(preview.redundant_vectors, 1);
        assert!(preview.estimated_bytes > 3 * 16);
        assert_eq!(report.removed, 0);
        assert_eq!(backend.delete_calls(), 0);
        assert_eq!(backend.ids().len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn duplicates_keeps_most_recent_copy() -> Result<(), IngestError> {
        let backend = Arc::new(FakeBackend::new());
        let now = Utc::now();
        backend.insert(vec![
            record_at("old", "Refunds take five days.", DIMS, Some(now - ChronoDuration::days(2))),
            record_at("new", "Refunds take five days.", DIMS, Some(now)),
            record_at("mid", "Refunds take five days.", DIMS, Some(now - ChronoDuration::days(1))),
            record_at("unique", "Shipping is free.", DIMS, Some(now)),
        ]);

        let report = pipeline(backend.clone()).run(ClearCommand::Duplicates).await?;

        assert_eq!(report.removed, 2);
        assert_eq!(backend.ids(), vec!["new".to_string(), "unique".to_string()]);
        assert_eq!(backend.cleanup_calls(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn duplicates_without_any_is_a_no_op() -> Result<(), IngestError> {
        let backend = Arc::new(FakeBackend::new());
        backend.insert(vec![record("a", "Refunds take five days.", DIMS)]);

        let report = pipeline(backend.clone()).run(ClearCommand::Duplicates).await?;

        assert_eq!(report.removed, 0);
        assert_eq!(backend.delete_calls(), 0);
        Ok(())
    }
}
