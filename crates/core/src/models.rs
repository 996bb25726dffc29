use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use serde_with::skip_serializing_none;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Raw record as it appears in the knowledge file, before embedding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KnowledgeItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub category: String,
    pub topic: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl KnowledgeItem {
    pub fn new(
        category: impl Into<String>,
        topic: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            category: category.into(),
            topic: topic.into(),
            text: text.into(),
            avatar_id: None,
            extra: Map::new(),
        }
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorMetadata {
    pub category: String,
    pub topic: String,
    pub text: String,
    pub text_length: usize,
    pub token_count: usize,
    pub avatar_id: Option<String>,
    pub content_hash: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorRecord {
    pub id: String,
    pub embedding: Vec<f32>,
    pub metadata: VectorMetadata,
}

/// Accepted search hit, in backend rank order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredMatch {
    pub id: String,
    pub score: f64,
    pub text: String,
    pub topic: Option<String>,
}

/// Read-only inventory row used by maintenance commands.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredVector {
    pub id: String,
    pub content_hash: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub text: Option<String>,
    pub topic: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthStatus {
    pub backend_name: String,
    pub is_healthy: bool,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchReport {
    pub index: usize,
    pub size: usize,
    /// Embedding calls made for the batch, including retries.
    pub embedding_attempts: u32,
    /// Upsert calls made; zero when embedding never succeeded.
    pub attempts: u32,
    pub succeeded: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct IngestionStats {
    pub total_items: usize,
    pub processed_items: usize,
    pub successful_items: usize,
    pub failed_items: usize,
    pub batch_count: usize,
    pub batches: Vec<BatchReport>,
    pub cancelled: bool,
    pub elapsed: Duration,
}

impl IngestionStats {
    pub fn is_complete_success(&self) -> bool {
        !self.cancelled && self.failed_items == 0 && self.successful_items == self.total_items
    }

    pub fn success_rate(&self) -> f64 {
        if self.processed_items == 0 {
            return 0.0;
        }
        self.successful_items as f64 / self.processed_items as f64 * 100.0
    }
}

impl fmt::Display for IngestionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ingestion summary")?;
        for batch in &self.batches {
            match &batch.error {
                None => writeln!(
                    f,
                    "  batch {:>3}: {} items ok (attempts={})",
                    batch.index + 1,
                    batch.size,
                    batch.attempts
                )?,
                Some(error) if batch.attempts == 0 => writeln!(
                    f,
                    "  batch {:>3}: {} items FAILED after {} embedding attempt(s): {}",
                    batch.index + 1,
                    batch.size,
                    batch.embedding_attempts,
                    error
                )?,
                Some(error) => writeln!(
                    f,
                    "  batch {:>3}: {} items FAILED after {} attempt(s): {}",
                    batch.index + 1,
                    batch.size,
                    batch.attempts,
                    error
                )?,
            }
        }
        writeln!(f, "  total items:      {}", self.total_items)?;
        writeln!(f, "  processed items:  {}", self.processed_items)?;
        writeln!(f, "  successful items: {}", self.successful_items)?;
        writeln!(f, "  failed items:     {}", self.failed_items)?;
        writeln!(f, "  batches:          {}", self.batch_count)?;
        writeln!(f, "  success rate:     {:.1}%", self.success_rate())?;
        writeln!(f, "  elapsed:          {:.2}s", self.elapsed.as_secs_f64())?;

        let status = if self.cancelled {
            "CANCELLED"
        } else if self.is_complete_success() {
            "OK"
        } else if self.successful_items == 0 && self.total_items > 0 {
            "FAILED"
        } else {
            "PARTIAL FAILURE"
        };
        write!(f, "  status:           {status}")
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ClearCommand {
    ClearAll,
    Preview,
    Duplicates,
}

impl ClearCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClearCommand::ClearAll => "clear-all",
            ClearCommand::Preview => "preview",
            ClearCommand::Duplicates => "duplicates",
        }
    }

    pub fn is_mutating(&self) -> bool {
        !matches!(self, ClearCommand::Preview)
    }
}

impl fmt::Display for ClearCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClearCommand {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "clear-all" | "all" => Ok(ClearCommand::ClearAll),
            "preview" => Ok(ClearCommand::Preview),
            "duplicates" | "dedupe" => Ok(ClearCommand::Duplicates),
            other => Err(format!(
                "unknown clear command '{other}', expected clear-all, preview or duplicates"
            )),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PreviewStats {
    pub total_vectors: usize,
    pub estimated_bytes: u64,
    pub duplicate_groups: usize,
    pub redundant_vectors: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClearReport {
    pub command: ClearCommand,
    pub backend_name: String,
    pub success: bool,
    pub removed: usize,
    pub elapsed: Duration,
    pub preview: Option<PreviewStats>,
}

impl fmt::Display for ClearReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} on {}", self.command, self.backend_name)?;
        if let Some(preview) = &self.preview {
            writeln!(f, "  total vectors:     {}", preview.total_vectors)?;
            writeln!(
                f,
                "  estimated storage: {:.2} MiB",
                preview.estimated_bytes as f64 / (1024.0 * 1024.0)
            )?;
            writeln!(f, "  duplicate groups:  {}", preview.duplicate_groups)?;
            writeln!(f, "  redundant vectors: {}", preview.redundant_vectors)?;
        }
        if self.command.is_mutating() {
            writeln!(f, "  removed:           {}", self.removed)?;
        }
        write!(
            f,
            "  {} in {:.2}s",
            if self.success { "completed" } else { "failed" },
            self.elapsed.as_secs_f64()
        )
    }
}
