//! In-memory collaborators shared by unit tests.

use crate::embeddings::EmbeddingProvider;
use crate::error::EmbeddingError;
use crate::traits::VectorBackend;
use crate::validation::content_hash;
use crate::{ClearCommand, StoreError, StoredVector, VectorMetadata, VectorRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

pub fn fake_embedding(text: &str, dims: usize) -> Vec<f32> {
    let seed = text
        .bytes()
        .fold(17u64, |acc, byte| acc.wrapping_mul(31).wrapping_add(byte as u64));
    (0..dims)
        .map(|index| ((seed.wrapping_add(index as u64 * 7919) % 97) + 1) as f32 / 97.0)
        .collect()
}

pub fn record(id: &str, text: &str, dims: usize) -> VectorRecord {
    record_at(id, text, dims, Some(Utc::now()))
}

pub fn record_at(
    id: &str,
    text: &str,
    dims: usize,
    created_at: Option<DateTime<Utc>>,
) -> VectorRecord {
    VectorRecord {
        id: id.to_string(),
        embedding: fake_embedding(text, dims),
        metadata: VectorMetadata {
            category: "general".to_string(),
            topic: format!("topic-{id}"),
            text: text.to_string(),
            text_length: text.chars().count(),
            token_count: text.split_whitespace().count(),
            avatar_id: None,
            content_hash: Some(content_hash(text)),
            created_at,
            extra: Map::new(),
        },
    }
}

pub struct FakeEmbedder {
    dims: usize,
    fail: bool,
    transient_failures: AtomicUsize,
    calls: AtomicUsize,
    batch_calls: AtomicUsize,
}

impl FakeEmbedder {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            fail: false,
            transient_failures: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            batch_calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(dims: usize) -> Self {
        Self {
            fail: true,
            ..Self::new(dims)
        }
    }

    /// Rejects the next `count` batch calls with a rate-limit error.
    pub fn rate_limited(dims: usize, count: usize) -> Self {
        Self {
            transient_failures: AtomicUsize::new(count),
            ..Self::new(dims)
        }
    }

    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for FakeEmbedder {
    fn name(&self) -> &str {
        "fake"
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    async fn generate_embedding(&self, text: &str) -> Result<Option<Vec<f32>>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(EmbeddingError::Provider {
                provider: "fake".to_string(),
                details: "429 rate limited".to_string(),
            });
        }
        Ok(Some(fake_embedding(text, self.dims)))
    }

    async fn generate_embeddings_batch(
        &self,
        texts: &[&str],
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        let throttled = self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if throttled {
            return Err(EmbeddingError::Provider {
                provider: "fake".to_string(),
                details: "429 Too Many Requests".to_string(),
            });
        }
        if self.fail {
            return Err(EmbeddingError::Provider {
                provider: "fake".to_string(),
                details: "429 rate limited".to_string(),
            });
        }
        Ok(texts
            .iter()
            .map(|text| fake_embedding(text, self.dims))
            .collect())
    }
}

/// Id-keyed in-memory store with scriptable faults and call counters.
#[derive(Default)]
pub struct FakeBackend {
    records: Mutex<BTreeMap<String, VectorRecord>>,
    scripted_hits: Mutex<Option<Vec<Value>>>,
    failing_upsert_calls: Mutex<HashSet<usize>>,
    always_fail_upserts: AtomicBool,
    search_fails: AtomicBool,
    unhealthy: AtomicBool,
    upsert_calls: AtomicUsize,
    delete_calls: AtomicUsize,
    search_calls: AtomicUsize,
    cleanup_calls: AtomicUsize,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hit(id: &str, score: f64, text: Option<&str>, topic: &str) -> Value {
        let mut metadata = json!({ "topic": topic });
        if let Some(text) = text {
            metadata["text"] = Value::from(text);
        }
        json!({ "id": id, "score": score, "metadata": metadata })
    }

    pub fn push_search_hits(&self, hits: Vec<Value>) {
        *self.scripted_hits.lock().expect("hits lock") = Some(hits);
    }

    /// Makes the given 1-based upsert calls fail.
    pub fn fail_upsert_calls(&self, calls: &[usize]) {
        self.failing_upsert_calls
            .lock()
            .expect("failures lock")
            .extend(calls.iter().copied());
    }

    pub fn fail_all_upserts(&self) {
        self.always_fail_upserts.store(true, Ordering::SeqCst);
    }

    pub fn set_search_failure(&self, fails: bool) {
        self.search_fails.store(fails, Ordering::SeqCst);
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.unhealthy.store(!healthy, Ordering::SeqCst);
    }

    pub fn insert(&self, records: Vec<VectorRecord>) {
        let mut stored = self.records.lock().expect("records lock");
        for record in records {
            stored.insert(record.id.clone(), record);
        }
    }

    pub fn ids(&self) -> Vec<String> {
        self.records.lock().expect("records lock").keys().cloned().collect()
    }

    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn cleanup_calls(&self) -> usize {
        self.cleanup_calls.load(Ordering::SeqCst)
    }
}

fn cosine(left: &[f32], right: &[f32]) -> f64 {
    let dot: f32 = left.iter().zip(right).map(|(a, b)| a * b).sum();
    let norm = |values: &[f32]| values.iter().map(|value| value * value).sum::<f32>().sqrt();
    let denominator = norm(left) * norm(right);
    if denominator == 0.0 {
        0.0
    } else {
        f64::from(dot / denominator)
    }
}

#[async_trait]
impl VectorBackend for FakeBackend {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn search(&self, embedding: &[f32], top_k: usize) -> Result<Vec<Value>, StoreError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        if self.search_fails.load(Ordering::SeqCst) {
            return Err(StoreError::Request("search unavailable".to_string()));
        }
        if let Some(hits) = self.scripted_hits.lock().expect("hits lock").clone() {
            return Ok(hits.into_iter().take(top_k).collect());
        }

        let records = self.records.lock().expect("records lock");
        let mut scored: Vec<(f64, &VectorRecord)> = records
            .values()
            .map(|record| (cosine(embedding, &record.embedding), record))
            .collect();
        scored.sort_by(|left, right| right.0.total_cmp(&left.0));

        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(score, record)| {
                json!({
                    "id": record.id,
                    "score": score,
                    "metadata": serde_json::to_value(&record.metadata).unwrap_or_default(),
                })
            })
            .collect())
    }

    fn extract_text(&self, hit: &Value) -> Option<String> {
        hit.pointer("/metadata/text")
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    fn extract_score(&self, hit: &Value) -> Option<f64> {
        hit.pointer("/score").and_then(Value::as_f64)
    }

    fn extract_metadata(&self, hit: &Value) -> Map<String, Value> {
        hit.pointer("/metadata")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default()
    }

    fn extract_id(&self, hit: &Value) -> Option<String> {
        hit.pointer("/id").and_then(Value::as_str).map(str::to_string)
    }

    async fn upsert(&self, records: &[VectorRecord]) -> Result<usize, StoreError> {
        let call = self.upsert_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let scripted_failure = self
            .failing_upsert_calls
            .lock()
            .expect("failures lock")
            .contains(&call);
        if scripted_failure || self.always_fail_upserts.load(Ordering::SeqCst) {
            return Err(StoreError::BackendResponse {
                backend: "fake".to_string(),
                details: format!("503 Service Unavailable on call {call}"),
            });
        }

        self.insert(records.to_vec());
        Ok(records.len())
    }

    async fn delete_all(&self) -> Result<bool, StoreError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.records.lock().expect("records lock").clear();
        Ok(true)
    }

    async fn delete_by_ids(&self, ids: &[String]) -> Result<bool, StoreError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        let mut records = self.records.lock().expect("records lock");
        for id in ids {
            records.remove(id);
        }
        Ok(true)
    }

    async fn health_check(&self) -> Result<String, StoreError> {
        if self.unhealthy.load(Ordering::SeqCst) {
            return Err(StoreError::Request("fake backend unreachable".to_string()));
        }
        Ok("fake backend ok".to_string())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.records.lock().expect("records lock").len())
    }

    async fn list_vectors(&self) -> Result<Vec<StoredVector>, StoreError> {
        Ok(self
            .records
            .lock()
            .expect("records lock")
            .values()
            .map(|record| StoredVector {
                id: record.id.clone(),
                content_hash: record.metadata.content_hash.clone(),
                created_at: record.metadata.created_at,
                text: Some(record.metadata.text.clone()),
                topic: Some(record.metadata.topic.clone()),
            })
            .collect())
    }

    async fn after_clear(&self, _command: ClearCommand) -> Result<(), StoreError> {
        self.cleanup_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
