pub mod pinecone;
pub mod qdrant;

pub use pinecone::PineconeStore;
pub use qdrant::QdrantStore;

use crate::{StoreError, StoredVector};
use chrono::{DateTime, Utc};
use reqwest::Response;
use serde_json::{Map, Value};

/// Largest number of vectors sent in one physical upsert request.
pub const UPSERT_CHUNK_SIZE: usize = 100;

pub(crate) async fn ensure_success(
    response: Response,
    backend: &str,
) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<body unavailable>".to_string());
    Err(StoreError::BackendResponse {
        backend: backend.to_string(),
        details: format!("{status}: {body}"),
    })
}

pub(crate) fn stored_vector_from_metadata(id: String, metadata: &Map<String, Value>) -> StoredVector {
    let text_field = |key: &str| {
        metadata
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    StoredVector {
        id,
        content_hash: text_field("content_hash"),
        created_at: text_field("created_at")
            .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
            .map(|timestamp| timestamp.with_timezone(&Utc)),
        text: text_field("text"),
        topic: text_field("topic"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn stored_vector_reads_known_fields() {
        let metadata = json!({
            "text": "Refunds take five days.",
            "topic": "refunds",
            "content_hash": "abc",
            "created_at": "2024-03-01T10:00:00Z",
        });
        let metadata = metadata.as_object().cloned().unwrap_or_default();

        let stored = stored_vector_from_metadata("id-1".to_string(), &metadata);
        assert_eq!(stored.content_hash.as_deref(), Some("abc"));
        assert_eq!(stored.topic.as_deref(), Some("refunds"));
        assert_eq!(
            stored.created_at,
            Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).single()
        );
    }

    #[test]
    fn stored_vector_ignores_malformed_timestamp() {
        let metadata = json!({ "created_at": "yesterday" });
        let metadata = metadata.as_object().cloned().unwrap_or_default();

        let stored = stored_vector_from_metadata("id-2".to_string(), &metadata);
        assert_eq!(stored.created_at, None);
        assert_eq!(stored.text, None);
    }
}
