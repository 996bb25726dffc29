use crate::{ClearCommand, StoreError, StoredVector, VectorRecord};
use async_trait::async_trait;
use serde_json::{Map, Value};

/// Capabilities every vector-store adapter provides to [`crate::VectorStore`].
///
/// Raw matches stay in the backend's native JSON shape; the `extract_*`
/// accessors are the only code that knows that shape.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn search(&self, embedding: &[f32], top_k: usize) -> Result<Vec<Value>, StoreError>;

    fn extract_text(&self, hit: &Value) -> Option<String>;

    fn extract_score(&self, hit: &Value) -> Option<f64>;

    fn extract_metadata(&self, hit: &Value) -> Map<String, Value>;

    fn extract_id(&self, hit: &Value) -> Option<String>;

    /// Writes all records, splitting into backend-sized requests, and returns the count written.
    async fn upsert(&self, records: &[VectorRecord]) -> Result<usize, StoreError>;

    async fn delete_all(&self) -> Result<bool, StoreError>;

    async fn delete_by_ids(&self, ids: &[String]) -> Result<bool, StoreError>;

    /// Lightweight read-only probe; returns a human-readable status line.
    async fn health_check(&self) -> Result<String, StoreError>;

    async fn count(&self) -> Result<usize, StoreError>;

    async fn list_vectors(&self) -> Result<Vec<StoredVector>, StoreError>;

    async fn after_clear(&self, _command: ClearCommand) -> Result<(), StoreError> {
        Ok(())
    }
}
