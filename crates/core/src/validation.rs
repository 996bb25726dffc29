use crate::error::{IngestError, TokenLimitViolation, ValidationIssue};
use crate::models::KnowledgeItem;
use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashSet;

const WORD_OR_SYMBOL: &str = r"\w+|[^\w\s]";
const CHARS_PER_TOKEN: usize = 4;
const REQUIRED_FIELDS: [&str; 3] = ["category", "topic", "text"];

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('\u{a0}', " ")
}

/// Hash of the trimmed, lower-cased, whitespace-collapsed text.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_whitespace(text).to_lowercase().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Approximates a BPE tokenizer without loading one: long words cost one token
/// per four characters, punctuation costs one token per symbol.
#[derive(Debug, Clone)]
pub struct TokenEstimator {
    pattern: Regex,
}

impl TokenEstimator {
    pub fn new() -> Result<Self, IngestError> {
        Ok(Self {
            pattern: Regex::new(WORD_OR_SYMBOL)?,
        })
    }

    pub fn estimate(&self, text: &str) -> usize {
        self.pattern
            .find_iter(text)
            .map(|piece| piece.as_str().chars().count().div_ceil(CHARS_PER_TOKEN).max(1))
            .sum()
    }
}

/// Checks every raw record and returns all problems found, never just the first.
pub fn validate_structure(raw_items: &[Value]) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let mut seen_ids = HashSet::new();

    for (index, raw) in raw_items.iter().enumerate() {
        let Some(object) = raw.as_object() else {
            issues.push(issue(index, "item", "must be a JSON object"));
            continue;
        };

        for field in REQUIRED_FIELDS {
            match object.get(field) {
                None | Some(Value::Null) => issues.push(issue(index, field, "is missing")),
                Some(Value::String(value)) if value.trim().is_empty() => {
                    issues.push(issue(index, field, "must not be empty"))
                }
                Some(Value::String(_)) => {}
                Some(_) => issues.push(issue(index, field, "must be a string")),
            }
        }

        for field in ["id", "avatar_id"] {
            match object.get(field) {
                None | Some(Value::Null) => {}
                Some(Value::String(value)) if value.trim().is_empty() => {
                    issues.push(issue(index, field, "must not be empty when present"))
                }
                Some(Value::String(value)) => {
                    if field == "id" && !seen_ids.insert(value.clone()) {
                        issues.push(issue(index, field, "duplicates an earlier item id"));
                    }
                }
                Some(_) => issues.push(issue(index, field, "must be a string")),
            }
        }
    }

    issues
}

/// Same rules as [`validate_structure`] for items that were built in code
/// rather than parsed from a file.
pub fn validate_items(items: &[KnowledgeItem]) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let mut seen_ids = HashSet::new();

    for (index, item) in items.iter().enumerate() {
        for (field, value) in [
            ("category", &item.category),
            ("topic", &item.topic),
            ("text", &item.text),
        ] {
            if value.trim().is_empty() {
                issues.push(issue(index, field, "must not be empty"));
            }
        }

        for (field, value) in [("id", &item.id), ("avatar_id", &item.avatar_id)] {
            match value.as_deref() {
                Some(value) if value.trim().is_empty() => {
                    issues.push(issue(index, field, "must not be empty when present"))
                }
                Some(value) if field == "id" && !seen_ids.insert(value.to_string()) => {
                    issues.push(issue(index, field, "duplicates an earlier item id"))
                }
                _ => {}
            }
        }
    }

    issues
}

pub fn check_token_limits(
    items: &[KnowledgeItem],
    estimator: &TokenEstimator,
    max_tokens: usize,
) -> Vec<TokenLimitViolation> {
    items
        .iter()
        .enumerate()
        .filter_map(|(index, item)| {
            let tokens = estimator.estimate(&item.text);
            (tokens > max_tokens).then(|| TokenLimitViolation {
                index,
                topic: item.topic.clone(),
                tokens,
                limit: max_tokens,
            })
        })
        .collect()
}

/// Parses raw records that already passed structural validation.
pub fn parse_items(raw_items: Vec<Value>) -> Result<Vec<KnowledgeItem>, IngestError> {
    let issues = validate_structure(&raw_items);
    if !issues.is_empty() {
        return Err(IngestError::Validation(issues));
    }

    raw_items
        .into_iter()
        .map(|raw| serde_json::from_value(raw).map_err(IngestError::from))
        .collect()
}

pub fn partition_batches(items: &[KnowledgeItem], batch_size: usize) -> Vec<&[KnowledgeItem]> {
    items.chunks(batch_size.max(1)).collect()
}

fn issue(index: usize, field: &str, message: &str) -> ValidationIssue {
    ValidationIssue {
        index,
        field: field.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn whitespace_is_normalized() {
        let input = "A  \t  lot\nof   spacing";
        let normalized = normalize_whitespace(input);
        assert_eq!(normalized, "A lot of spacing");
    }

    #[test]
    fn content_hash_ignores_case_and_spacing() {
        assert_eq!(
            content_hash("Refunds take  five days."),
            content_hash("  refunds TAKE five\ndays. ")
        );
        assert_ne!(content_hash("refunds"), content_hash("returns"));
    }

    #[test]
    fn token_estimate_is_deterministic_and_counts_symbols() -> Result<(), IngestError> {
        let estimator = TokenEstimator::new()?;
        assert_eq!(estimator.estimate(""), 0);
        assert_eq!(estimator.estimate("a b c"), 3);
        // "international" is 13 chars -> 4 tokens, "!" -> 1
        assert_eq!(estimator.estimate("international!"), 5);
        let text = "Refund requests are processed within five business days.";
        assert_eq!(estimator.estimate(text), estimator.estimate(text));
        Ok(())
    }

    #[test]
    fn structural_validation_reports_every_issue() {
        let raw = vec![
            json!({"category": "billing", "topic": "refunds", "text": "ok"}),
            json!({"category": "", "topic": "refunds", "text": "ok"}),
            json!({"category": "billing", "text": "   "}),
            json!("not an object"),
            json!({"category": "billing", "topic": 7, "text": "ok", "id": "a"}),
            json!({"category": "billing", "topic": "t", "text": "ok", "id": "a"}),
        ];

        let issues = validate_structure(&raw);
        let summary: Vec<(usize, &str)> = issues
            .iter()
            .map(|issue| (issue.index, issue.field.as_str()))
            .collect();

        assert_eq!(
            summary,
            vec![
                (1, "category"),
                (2, "topic"),
                (2, "text"),
                (3, "item"),
                (4, "topic"),
                (5, "id"),
            ]
        );
    }

    #[test]
    fn typed_items_with_blank_fields_are_rejected() {
        let mut duplicate = KnowledgeItem::new("billing", "refunds", "Refunds take five days.");
        duplicate.id = Some("kb-1".to_string());
        let items = vec![
            KnowledgeItem::new("billing", "refunds", "Refunds take five days."),
            KnowledgeItem::new("", "", "   "),
            duplicate.clone(),
            duplicate,
        ];

        let issues = validate_items(&items);
        let rendered: Vec<String> = issues.iter().map(ToString::to_string).collect();
        assert_eq!(
            rendered,
            vec![
                "item 1: category must not be empty",
                "item 1: topic must not be empty",
                "item 1: text must not be empty",
                "item 3: id duplicates an earlier item id",
            ]
        );
    }

    #[test]
    fn parse_items_refuses_invalid_input() {
        let raw = vec![json!({"category": "billing", "topic": "refunds"})];
        match parse_items(raw) {
            Err(IngestError::Validation(issues)) => assert_eq!(issues.len(), 1),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn token_limits_flag_only_oversized_items() -> Result<(), IngestError> {
        let estimator = TokenEstimator::new()?;
        let items = vec![
            KnowledgeItem::new("billing", "short", "one two three"),
            KnowledgeItem::new("billing", "long", "word ".repeat(20)),
        ];

        let violations = check_token_limits(&items, &estimator, 10);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].index, 1);
        assert_eq!(violations[0].tokens, 20);
        assert_eq!(violations[0].over_by(), 10);
        Ok(())
    }

    #[test]
    fn batches_partition_input_exactly() {
        for (count, batch_size) in [(0usize, 50usize), (1, 50), (50, 50), (51, 50), (250, 50), (7, 3)] {
            let items: Vec<KnowledgeItem> = (0..count)
                .map(|index| KnowledgeItem::new("c", format!("t{index}"), "text"))
                .collect();

            let batches = partition_batches(&items, batch_size);
            assert_eq!(batches.len(), count.div_ceil(batch_size));
            assert_eq!(batches.iter().map(|batch| batch.len()).sum::<usize>(), count);
            assert!(batches.iter().all(|batch| batch.len() <= batch_size));

            let flattened: Vec<&str> = batches
                .iter()
                .flat_map(|batch| batch.iter().map(|item| item.topic.as_str()))
                .collect();
            let original: Vec<&str> = items.iter().map(|item| item.topic.as_str()).collect();
            assert_eq!(flattened, original);
        }
    }
}
