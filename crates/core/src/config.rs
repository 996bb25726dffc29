use crate::embeddings::DEFAULT_EMBEDDING_DIMENSIONS;
use crate::error::ConfigError;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::warn;
use url::Url;

pub const DEFAULT_KNOWLEDGE_FILE: &str = "data/knowledge_base.json";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum BackendKind {
    #[default]
    Qdrant,
    Pinecone,
}

impl BackendKind {
    /// Resolves the configured selector; anything unrecognised falls back to Qdrant.
    pub fn from_selector(selector: &str) -> Self {
        match selector.trim().to_ascii_lowercase().as_str() {
            "qdrant" => BackendKind::Qdrant,
            "pinecone" => BackendKind::Pinecone,
            other => {
                warn!(
                    selector = other,
                    fallback = %BackendKind::default(),
                    "unknown vector backend, using default"
                );
                BackendKind::default()
            }
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Qdrant => f.write_str("qdrant"),
            BackendKind::Pinecone => f.write_str("pinecone"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QdrantSettings {
    pub url: String,
    pub api_key: Option<String>,
}

impl Default for QdrantSettings {
    fn default() -> Self {
        Self {
            url: "http://localhost:6333".to_string(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PineconeSettings {
    pub api_key: Option<String>,
    pub controller_url: String,
    pub cloud: String,
    pub region: String,
    pub namespace: String,
}

impl Default for PineconeSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            controller_url: "https://api.pinecone.io".to_string(),
            cloud: "aws".to_string(),
            region: "us-east-1".to_string(),
            namespace: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreConfig {
    pub backend: BackendKind,
    pub qdrant: QdrantSettings,
    pub pinecone: PineconeSettings,
    pub collection: String,
    pub dimensions: usize,
    pub score_threshold: f64,
    pub top_k: usize,
    pub max_tokens_per_item: usize,
    pub batch_size: usize,
    pub batch_delay: Duration,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            qdrant: QdrantSettings::default(),
            pinecone: PineconeSettings::default(),
            collection: "knowledge-base".to_string(),
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
            score_threshold: 0.7,
            top_k: 3,
            max_tokens_per_item: 8191,
            batch_size: 50,
            batch_delay: Duration::from_millis(1_000),
            request_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

impl StoreConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.collection.trim().is_empty() {
            return Err(ConfigError::Missing("COLLECTION_NAME"));
        }
        if self.dimensions == 0 {
            return Err(invalid("EMBEDDING_DIMENSIONS", "must be greater than zero"));
        }
        if !(0.0..=1.0).contains(&self.score_threshold) {
            return Err(invalid("SCORE_THRESHOLD", "must be within [0, 1]"));
        }
        if self.top_k == 0 {
            return Err(invalid("TOP_K", "must be greater than zero"));
        }
        if self.max_tokens_per_item == 0 {
            return Err(invalid("MAX_TOKENS_PER_ITEM", "must be greater than zero"));
        }
        if self.batch_size == 0 {
            return Err(invalid("BATCH_SIZE", "must be greater than zero"));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("RETRY_MAX_ATTEMPTS", "must be at least one"));
        }
        if self.request_timeout.is_zero() {
            return Err(invalid("REQUEST_TIMEOUT_SECS", "must be greater than zero"));
        }

        match self.backend {
            BackendKind::Qdrant => {
                Url::parse(&self.qdrant.url)?;
            }
            BackendKind::Pinecone => {
                Url::parse(&self.pinecone.controller_url)?;
                if self
                    .pinecone
                    .api_key
                    .as_deref()
                    .map_or(true, |key| key.trim().is_empty())
                {
                    return Err(ConfigError::Missing("PINECONE_API_KEY"));
                }
            }
        }

        Ok(())
    }
}

fn invalid(key: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key,
        reason: reason.to_string(),
    }
}
