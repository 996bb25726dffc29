pub mod cancel;
pub mod clear;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod ingest;
pub mod models;
pub mod retry;
pub mod selector;
pub mod store;
pub mod stores;
pub mod traits;
pub mod validation;

#[cfg(test)]
mod testing;

pub use cancel::CancellationToken;
pub use clear::{estimate_storage_bytes, plan_duplicate_removal, ClearPipeline, DuplicatePlan};
pub use config::{
    BackendKind, PineconeSettings, QdrantSettings, StoreConfig, DEFAULT_KNOWLEDGE_FILE,
};
pub use embeddings::{
    CharacterNgramEmbedder, EmbeddingProvider, OpenAiEmbeddings, DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{
    ConfigError, EmbeddingError, IngestError, StoreError, TokenLimitViolation, ValidationIssue,
};
pub use ingest::{build_record, load_knowledge_file, IngestionPipeline, IngestionSettings};
pub use models::{
    BatchReport, ClearCommand, ClearReport, HealthStatus, IngestionStats, KnowledgeItem,
    PreviewStats, ScoredMatch, StoredVector, VectorMetadata, VectorRecord,
};
pub use retry::{retry_with_backoff, with_timeout, RetryOutcome, RetryPolicy};
pub use selector::{build_backend, BackendFactory, BackendSelector};
pub use store::{filter_matches, StoreSettings, VectorStore};
pub use stores::{PineconeStore, QdrantStore, UPSERT_CHUNK_SIZE};
pub use traits::VectorBackend;
pub use validation::{
    check_token_limits, content_hash, normalize_whitespace, parse_items, partition_batches,
    validate_items, validate_structure, TokenEstimator,
};
