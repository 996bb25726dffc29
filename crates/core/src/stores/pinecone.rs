use super::{ensure_success, stored_vector_from_metadata, UPSERT_CHUNK_SIZE};
use crate::config::PineconeSettings;
use crate::error::ConfigError;
use crate::traits::VectorBackend;
use crate::{StoreError, StoredVector, VectorRecord};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use serde_json::{json, Map, Value};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const BACKEND: &str = "pinecone";
const API_VERSION: &str = "2024-07";
const DELETE_CHUNK_SIZE: usize = 1_000;
const LIST_PAGE: usize = 100;
const READY_POLLS: u32 = 10;
const READY_POLL_INTERVAL: Duration = Duration::from_secs(1);

pub struct PineconeStore {
    client: Client,
    controller_url: String,
    index_name: String,
    namespace: String,
    dimension: usize,
    cloud: String,
    region: String,
    /// Data-plane base URL, set once the index is known to exist.
    data_url: Mutex<Option<String>>,
}

impl PineconeStore {
    pub fn new(
        settings: &PineconeSettings,
        index_name: impl Into<String>,
        dimension: usize,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let api_key = settings
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or(ConfigError::Missing("PINECONE_API_KEY"))?;
        url::Url::parse(&settings.controller_url)?;

        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(api_key).map_err(|_| ConfigError::InvalidValue {
            key: "PINECONE_API_KEY",
            reason: "contains characters not allowed in a header".to_string(),
        })?;
        headers.insert("Api-Key", key);
        headers.insert("X-Pinecone-API-Version", HeaderValue::from_static(API_VERSION));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            controller_url: settings.controller_url.trim_end_matches('/').to_string(),
            index_name: index_name.into(),
            namespace: settings.namespace.clone(),
            dimension,
            cloud: settings.cloud.clone(),
            region: settings.region.clone(),
            data_url: Mutex::new(None),
        })
    }

    fn index_url(&self) -> String {
        format!("{}/indexes/{}", self.controller_url, self.index_name)
    }

    async fn describe_index(&self) -> Result<Option<Value>, StoreError> {
        let response = self.client.get(self.index_url()).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let parsed = ensure_success(response, BACKEND).await?.json().await?;
        Ok(Some(parsed))
    }

    /// Resolves the data-plane URL, creating the serverless index on first use.
    pub async fn ensure_index(&self) -> Result<String, StoreError> {
        let mut data_url = self.data_url.lock().await;
        if let Some(url) = data_url.as_ref() {
            return Ok(url.clone());
        }

        let mut description = self.describe_index().await?;
        if description.is_none() {
            let response = self
                .client
                .post(format!("{}/indexes", self.controller_url))
                .json(&json!({
                    "name": self.index_name,
                    "dimension": self.dimension,
                    "metric": "cosine",
                    "spec": {
                        "serverless": {
                            "cloud": self.cloud,
                            "region": self.region,
                        }
                    }
                }))
                .send()
                .await?;

            if response.status() == StatusCode::CONFLICT {
                debug!(index = %self.index_name, "pinecone index created concurrently");
            } else {
                ensure_success(response, BACKEND).await?;
                info!(index = %self.index_name, dimension = self.dimension, "created pinecone index");
            }

            description = self.wait_until_ready().await?;
        }

        let host = description
            .as_ref()
            .and_then(|value| value.pointer("/host"))
            .and_then(Value::as_str)
            .filter(|host| !host.is_empty())
            .ok_or_else(|| StoreError::BackendResponse {
                backend: BACKEND.to_string(),
                details: format!("index {} has no data-plane host yet", self.index_name),
            })?;

        let url = data_plane_url(host);
        *data_url = Some(url.clone());
        Ok(url)
    }

    async fn wait_until_ready(&self) -> Result<Option<Value>, StoreError> {
        let mut description = None;
        for poll in 1..=READY_POLLS {
            description = self.describe_index().await?;
            let ready = description
                .as_ref()
                .and_then(|value| value.pointer("/status/ready"))
                .and_then(Value::as_bool)
                .unwrap_or(false);
            if ready {
                break;
            }
            debug!(index = %self.index_name, poll, "waiting for pinecone index");
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
        Ok(description)
    }

    async fn list_ids(&self, data_url: &str) -> Result<Vec<String>, StoreError> {
        let mut ids = Vec::new();
        let mut token: Option<String> = None;
        let limit = LIST_PAGE.to_string();

        loop {
            let mut query = vec![("namespace", self.namespace.as_str()), ("limit", limit.as_str())];
            if let Some(token) = token.as_deref() {
                query.push(("paginationToken", token));
            }
            let response = self
                .client
                .get(format!("{data_url}/vectors/list"))
                .query(&query)
                .send()
                .await?;
            let parsed: Value = ensure_success(response, BACKEND).await?.json().await?;

            let page: Vec<String> = parsed
                .pointer("/vectors")
                .and_then(Value::as_array)
                .map(|vectors| {
                    vectors
                        .iter()
                        .filter_map(|vector| vector.pointer("/id").and_then(Value::as_str))
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            let next = parsed
                .pointer("/pagination/next")
                .and_then(Value::as_str)
                .map(str::to_string);

            let exhausted = page.is_empty();
            ids.extend(page);
            match next {
                Some(next) if !exhausted => token = Some(next),
                _ => break,
            }
        }

        Ok(ids)
    }
}

fn data_plane_url(host: &str) -> String {
    if host.starts_with("http://") || host.starts_with("https://") {
        host.trim_end_matches('/').to_string()
    } else {
        format!("https://{}", host.trim_end_matches('/'))
    }
}

/// Pinecone metadata values may only be strings, numbers, booleans, or lists of strings.
pub fn pinecone_metadata(record: &VectorRecord) -> Result<Map<String, Value>, StoreError> {
    let Value::Object(mut metadata) = serde_json::to_value(&record.metadata)? else {
        return Ok(Map::new());
    };

    metadata.retain(|key, value| {
        let supported = match value {
            Value::String(_) | Value::Number(_) | Value::Bool(_) => true,
            Value::Array(items) => items.iter().all(Value::is_string),
            Value::Null | Value::Object(_) => false,
        };
        if !supported {
            warn!(id = %record.id, field = %key, "dropping metadata field pinecone cannot store");
        }
        supported
    });
    Ok(metadata)
}

/// Vectors in one namespace of a `describe_index_stats` response. The empty
/// namespace is keyed as `""`; a namespace that was never written is absent.
fn namespace_vector_count(stats: &Value, namespace: &str) -> usize {
    stats
        .pointer("/namespaces")
        .and_then(|namespaces| namespaces.get(namespace))
        .and_then(|entry| entry.pointer("/vectorCount"))
        .and_then(Value::as_u64)
        .map_or(0, |count| count as usize)
}

#[async_trait]
impl VectorBackend for PineconeStore {
    fn name(&self) -> &'static str {
        BACKEND
    }

    async fn search(&self, embedding: &[f32], top_k: usize) -> Result<Vec<Value>, StoreError> {
        if embedding.len() != self.dimension {
            return Err(StoreError::Request(format!(
                "query vector dim {} is not {}",
                embedding.len(),
                self.dimension
            )));
        }
        let data_url = self.ensure_index().await?;

        let response = self
            .client
            .post(format!("{data_url}/query"))
            .json(&json!({
                "vector": embedding,
                "topK": top_k,
                "includeMetadata": true,
                "includeValues": false,
                "namespace": self.namespace,
            }))
            .send()
            .await?;

        let parsed: Value = ensure_success(response, BACKEND).await?.json().await?;
        Ok(parsed
            .pointer("/matches")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
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
        if records.is_empty() {
            return Ok(0);
        }
        let data_url = self.ensure_index().await?;

        let mut written = 0;
        for chunk in records.chunks(UPSERT_CHUNK_SIZE) {
            let vectors = chunk
                .iter()
                .map(|record| {
                    Ok(json!({
                        "id": record.id,
                        "values": record.embedding,
                        "metadata": pinecone_metadata(record)?,
                    }))
                })
                .collect::<Result<Vec<_>, StoreError>>()?;

            let response = self
                .client
                .post(format!("{data_url}/vectors/upsert"))
                .json(&json!({ "vectors": vectors, "namespace": self.namespace }))
                .send()
                .await?;
            let parsed: Value = ensure_success(response, BACKEND).await?.json().await?;

            let upserted = parsed
                .pointer("/upsertedCount")
                .and_then(Value::as_u64)
                .map_or(chunk.len(), |count| count as usize);
            written += upserted;
            debug!(index = %self.index_name, chunk = chunk.len(), upserted, "pinecone upsert chunk");
        }

        Ok(written)
    }

    async fn delete_all(&self) -> Result<bool, StoreError> {
        let data_url = self.ensure_index().await?;
        let response = self
            .client
            .post(format!("{data_url}/vectors/delete"))
            .json(&json!({ "deleteAll": true, "namespace": self.namespace }))
            .send()
            .await?;

        // an empty namespace does not exist yet
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(true);
        }
        ensure_success(response, BACKEND).await?;
        Ok(true)
    }

    async fn delete_by_ids(&self, ids: &[String]) -> Result<bool, StoreError> {
        if ids.is_empty() {
            return Ok(true);
        }
        let data_url = self.ensure_index().await?;

        for chunk in ids.chunks(DELETE_CHUNK_SIZE) {
            let response = self
                .client
                .post(format!("{data_url}/vectors/delete"))
                .json(&json!({ "ids": chunk, "namespace": self.namespace }))
                .send()
                .await?;
            ensure_success(response, BACKEND).await?;
        }
        Ok(true)
    }

    async fn health_check(&self) -> Result<String, StoreError> {
        let response = self
            .client
            .get(format!("{}/indexes", self.controller_url))
            .send()
            .await?;
        let parsed: Value = ensure_success(response, BACKEND).await?.json().await?;
        let indexes = parsed
            .pointer("/indexes")
            .and_then(Value::as_array)
            .map_or(0, Vec::len);
        Ok(format!("pinecone control plane is reachable ({indexes} indexes)"))
    }

    async fn count(&self) -> Result<usize, StoreError> {
        let data_url = self.ensure_index().await?;
        let response = self
            .client
            .post(format!("{data_url}/describe_index_stats"))
            .json(&json!({}))
            .send()
            .await?;
        let parsed: Value = ensure_success(response, BACKEND).await?.json().await?;

        Ok(namespace_vector_count(&parsed, &self.namespace))
    }

    async fn list_vectors(&self) -> Result<Vec<StoredVector>, StoreError> {
        let data_url = self.ensure_index().await?;
        let ids = self.list_ids(&data_url).await?;

        let mut vectors = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(LIST_PAGE) {
            let mut query: Vec<(&str, &str)> = chunk.iter().map(|id| ("ids", id.as_str())).collect();
            query.push(("namespace", self.namespace.as_str()));

            let response = self
                .client
                .get(format!("{data_url}/vectors/fetch"))
                .query(&query)
                .send()
                .await?;
            let parsed: Value = ensure_success(response, BACKEND).await?.json().await?;

            for id in chunk {
                let metadata = parsed
                    .pointer("/vectors")
                    .and_then(|vectors| vectors.get(id))
                    .map(|vector| self.extract_metadata(vector))
                    .unwrap_or_default();
                vectors.push(stored_vector_from_metadata(id.clone(), &metadata));
            }
        }
        Ok(vectors)
    }
}
