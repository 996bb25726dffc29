use super::{ensure_success, stored_vector_from_metadata, UPSERT_CHUNK_SIZE};
use crate::error::ConfigError;
use crate::traits::VectorBackend;
use crate::{ClearCommand, StoreError, StoredVector, VectorRecord};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

const BACKEND: &str = "qdrant";
const SCROLL_PAGE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CollectionState {
    Unknown,
    Ready,
}

pub struct QdrantStore {
    endpoint: String,
    collection: String,
    client: Client,
    vector_size: usize,
    state: Mutex<CollectionState>,
}

impl QdrantStore {
    pub fn new(
        endpoint: impl Into<String>,
        collection: impl Into<String>,
        vector_size: usize,
        api_key: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let endpoint = endpoint.into();
        url::Url::parse(&endpoint)?;

        let mut headers = HeaderMap::new();
        if let Some(key) = api_key.filter(|key| !key.trim().is_empty()) {
            let value = HeaderValue::from_str(key.trim()).map_err(|_| ConfigError::InvalidValue {
                key: "QDRANT_API_KEY",
                reason: "contains characters not allowed in a header".to_string(),
            })?;
            headers.insert("api-key", value);
        }
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            collection: collection.into(),
            client,
            vector_size,
            state: Mutex::new(CollectionState::Unknown),
        })
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.endpoint, self.collection)
    }

    /// Checks for the collection and creates it (cosine, configured size) when absent.
    /// A concurrent creator winning the race is not an error.
    pub async fn ensure_collection(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if *state == CollectionState::Ready {
            return Ok(());
        }

        let response = self.client.get(self.collection_url()).send().await?;
        match response.status() {
            status if status.is_success() => {
                let description: Value = response.json().await?;
                check_vector_size(&description, &self.collection, self.vector_size)?;
                debug!(collection = %self.collection, "qdrant collection exists");
                *state = CollectionState::Ready;
                return Ok(());
            }
            StatusCode::NOT_FOUND => {}
            status => {
                return Err(StoreError::BackendResponse {
                    backend: BACKEND.to_string(),
                    details: format!("collection check failed with {status}"),
                })
            }
        }

        let response = self
            .client
            .put(self.collection_url())
            .json(&json!({
                "vectors": {
                    "size": self.vector_size,
                    "distance": "Cosine",
                }
            }))
            .send()
            .await?;

        if response.status() == StatusCode::CONFLICT {
            debug!(collection = %self.collection, "qdrant collection created concurrently");
        } else {
            ensure_success(response, BACKEND).await?;
            info!(
                collection = %self.collection,
                vector_size = self.vector_size,
                "created qdrant collection"
            );
        }

        *state = CollectionState::Ready;
        Ok(())
    }

    async fn scroll_page(&self, offset: Option<Value>) -> Result<(Vec<Value>, Option<Value>), StoreError> {
        let mut body = json!({
            "limit": SCROLL_PAGE,
            "with_payload": true,
            "with_vector": false,
        });
        if let Some(offset) = offset {
            body["offset"] = offset;
        }

        let response = self
            .client
            .post(format!("{}/points/scroll", self.collection_url()))
            .json(&body)
            .send()
            .await?;
        let parsed: Value = ensure_success(response, BACKEND).await?.json().await?;

        let points = parsed
            .pointer("/result/points")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let next = parsed
            .pointer("/result/next_page_offset")
            .filter(|value| !value.is_null())
            .cloned();
        Ok((points, next))
    }
}

/// Qdrant only accepts UUIDs or integers as point ids.
pub fn point_id(record_id: &str) -> String {
    if let Ok(uuid) = Uuid::parse_str(record_id) {
        return uuid.to_string();
    }
    let digest = Sha256::digest(record_id.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes).to_string()
}

/// Rejects an existing collection created with a different dimensionality.
fn check_vector_size(description: &Value, collection: &str, expected: usize) -> Result<(), StoreError> {
    let actual = description
        .pointer("/result/config/params/vectors/size")
        .and_then(Value::as_u64);
    match actual {
        Some(actual) if actual != expected as u64 => Err(StoreError::Request(format!(
            "collection {collection} stores {actual}-dimensional vectors, configured for {expected}"
        ))),
        _ => Ok(()),
    }
}

fn raw_id(hit: &Value) -> Option<String> {
    match hit.pointer("/id")? {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

#[async_trait]
impl VectorBackend for QdrantStore {
    fn name(&self) -> &'static str {
        BACKEND
    }

    async fn search(&self, embedding: &[f32], top_k: usize) -> Result<Vec<Value>, StoreError> {
        if embedding.len() != self.vector_size {
            return Err(StoreError::Request(format!(
                "query vector dim {} is not {}",
                embedding.len(),
                self.vector_size
            )));
        }
        self.ensure_collection().await?;

        let response = self
            .client
            .post(format!("{}/points/search", self.collection_url()))
            .json(&json!({
                "vector": embedding,
                "limit": top_k,
                "with_payload": true,
            }))
            .send()
            .await?;

        let parsed: Value = ensure_success(response, BACKEND).await?.json().await?;
        Ok(parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    fn extract_text(&self, hit: &Value) -> Option<String> {
        hit.pointer("/payload/text")
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    fn extract_score(&self, hit: &Value) -> Option<f64> {
        hit.pointer("/score").and_then(Value::as_f64)
    }

    fn extract_metadata(&self, hit: &Value) -> Map<String, Value> {
        hit.pointer("/payload")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default()
    }

    fn extract_id(&self, hit: &Value) -> Option<String> {
        hit.pointer("/payload/record_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| raw_id(hit))
    }

    async fn upsert(&self, records: &[VectorRecord]) -> Result<usize, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }
        self.ensure_collection().await?;

        let mut written = 0;
        for chunk in records.chunks(UPSERT_CHUNK_SIZE) {
            let points = chunk
                .iter()
                .map(|record| {
                    if record.embedding.len() != self.vector_size {
                        return Err(StoreError::Request(format!(
                            "embedding dimension {} != {}",
                            record.embedding.len(),
                            self.vector_size
                        )));
                    }
                    let mut payload = serde_json::to_value(&record.metadata)?;
                    payload["record_id"] = Value::String(record.id.clone());

                    Ok(json!({
                        "id": point_id(&record.id),
                        "vector": record.embedding,
                        "payload": payload,
                    }))
                })
                .collect::<Result<Vec<_>, StoreError>>()?;

            let response = self
                .client
                .put(format!("{}/points?wait=true", self.collection_url()))
                .json(&json!({ "points": points }))
                .send()
                .await?;
            ensure_success(response, BACKEND).await?;

            written += chunk.len();
            debug!(collection = %self.collection, chunk = chunk.len(), written, "qdrant upsert chunk");
        }

        Ok(written)
    }

    async fn delete_all(&self) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let response = self.client.delete(self.collection_url()).send().await?;
        if response.status() != StatusCode::NOT_FOUND {
            ensure_success(response, BACKEND).await?;
        }
        *state = CollectionState::Unknown;
        Ok(true)
    }

    async fn delete_by_ids(&self, ids: &[String]) -> Result<bool, StoreError> {
        if ids.is_empty() {
            return Ok(true);
        }
        self.ensure_collection().await?;

        let points: Vec<String> = ids.iter().map(|id| point_id(id)).collect();
        let response = self
            .client
            .post(format!("{}/points/delete?wait=true", self.collection_url()))
            .json(&json!({ "points": points }))
            .send()
            .await?;
        ensure_success(response, BACKEND).await?;
        Ok(true)
    }

    async fn health_check(&self) -> Result<String, StoreError> {
        let response = self
            .client
            .get(format!("{}/collections", self.endpoint))
            .send()
            .await?;
        let parsed: Value = ensure_success(response, BACKEND).await?.json().await?;
        let collections = parsed
            .pointer("/result/collections")
            .and_then(Value::as_array)
            .map_or(0, Vec::len);
        Ok(format!(
            "qdrant at {} is reachable ({collections} collections)",
            self.endpoint
        ))
    }

    async fn count(&self) -> Result<usize, StoreError> {
        self.ensure_collection().await?;
        let response = self
            .client
            .post(format!("{}/points/count", self.collection_url()))
            .json(&json!({ "exact": true }))
            .send()
            .await?;
        let parsed: Value = ensure_success(response, BACKEND).await?.json().await?;
        parsed
            .pointer("/result/count")
            .and_then(Value::as_u64)
            .map(|count| count as usize)
            .ok_or_else(|| StoreError::BackendResponse {
                backend: BACKEND.to_string(),
                details: "count response missing result.count".to_string(),
            })
    }

    async fn list_vectors(&self) -> Result<Vec<StoredVector>, StoreError> {
        self.ensure_collection().await?;

        let mut vectors = Vec::new();
        let mut offset = None;
        loop {
            let (points, next) = self.scroll_page(offset).await?;
            for point in &points {
                let id = self.extract_id(point).unwrap_or_default();
                vectors.push(stored_vector_from_metadata(id, &self.extract_metadata(point)));
            }
            match next {
                Some(next) if !points.is_empty() => offset = Some(next),
                _ => break,
            }
        }
        Ok(vectors)
    }

    async fn after_clear(&self, command: ClearCommand) -> Result<(), StoreError> {
        if *self.state.lock().await == CollectionState::Unknown {
            info!(
                collection = %self.collection,
                %command,
                "qdrant collection dropped, it is recreated on the next write"
            );
            return Ok(());
        }
        let remaining = self.count().await?;
        info!(collection = %self.collection, %command, remaining, "qdrant post-clear point count");
        Ok(())
    }
}
