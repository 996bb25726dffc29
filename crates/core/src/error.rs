use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store request failed: {0}")]
    Request(String),

    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding provider {provider} returned an error: {details}")]
    Provider { provider: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider returned {returned} embeddings for {expected} inputs")]
    CountMismatch { expected: usize, returned: usize },

    #[error("no embedding produced for input {index}")]
    Missing { index: usize },

    #[error("embedding dimension {actual} does not match configured {expected}")]
    Dimension { expected: usize, actual: usize },

    #[error("embedding request timed out after {seconds}s")]
    Timeout { seconds: u64 },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },

    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("http client setup failed: {0}")]
    Client(#[from] reqwest::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub index: usize,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "item {}: {} {}", self.index, self.field, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenLimitViolation {
    pub index: usize,
    pub topic: String,
    pub tokens: usize,
    pub limit: usize,
}

impl TokenLimitViolation {
    pub fn over_by(&self) -> usize {
        self.tokens.saturating_sub(self.limit)
    }

    /// Number of parts the item would need to be split into to fit the budget.
    pub fn suggested_parts(&self) -> usize {
        self.tokens.div_ceil(self.limit.max(1))
    }
}

impl fmt::Display for TokenLimitViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "item {} (topic '{}') has ~{} tokens, {} over the {} limit; split it into at least {} items",
            self.index,
            self.topic,
            self.tokens,
            self.over_by(),
            self.limit,
            self.suggested_parts()
        )
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("knowledge file is not a JSON array of objects: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("{} validation error(s):\n{}", .0.len(), join_lines(.0))]
    Validation(Vec<ValidationIssue>),

    #[error("{} item(s) exceed the token limit, nothing was uploaded:\n{}", .0.len(), join_lines(.0))]
    TokenLimit(Vec<TokenLimitViolation>),

    #[error("backend {backend} is unavailable: {message}")]
    BackendUnavailable { backend: String, message: String },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

fn join_lines<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|item| format!("  - {item}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_violation_guidance_names_overflow_and_split() {
        let violation = TokenLimitViolation {
            index: 4,
            topic: "refunds".to_string(),
            tokens: 250,
            limit: 100,
        };

        assert_eq!(violation.over_by(), 150);
        assert_eq!(violation.suggested_parts(), 3);
        let message = violation.to_string();
        assert!(message.contains("150 over the 100 limit"));
        assert!(message.contains("at least 3 items"));
    }

    #[test]
    fn validation_error_lists_every_issue() {
        let error = IngestError::Validation(vec![
            ValidationIssue {
                index: 0,
                field: "text".to_string(),
                message: "must not be empty".to_string(),
            },
            ValidationIssue {
                index: 3,
                field: "topic".to_string(),
                message: "is missing".to_string(),
            },
        ]);

        let rendered = error.to_string();
        assert!(rendered.starts_with("2 validation error(s)"));
        assert!(rendered.contains("item 0: text must not be empty"));
        assert!(rendered.contains("item 3: topic is missing"));
    }
}
