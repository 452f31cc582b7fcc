//! # Shared Domain Types
//!
//! Types that cross component boundaries: posts as stored in the relational
//! store, ingestion cycle reports, search hits and filters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// The AI-tagging lifecycle of a post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaggingStatus {
    #[default]
    Pending,
    Success,
    Failed,
}

impl TaggingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaggingStatus::Pending => "pending",
            TaggingStatus::Success => "success",
            TaggingStatus::Failed => "failed",
        }
    }
}

impl FromStr for TaggingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaggingStatus::Pending),
            "success" => Ok(TaggingStatus::Success),
            "failed" => Ok(TaggingStatus::Failed),
            other => Err(format!("unknown tagging status '{other}'")),
        }
    }
}

/// One harvested message, as stored in the relational store.
///
/// `(user_id, channel_id, external_message_id)` is unique; ingestion relies
/// on that constraint for idempotency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    pub user_id: String,
    pub channel_id: i64,
    pub external_message_id: i64,
    pub text: String,
    /// Original text plus extracted web content, when links were enriched.
    pub enriched_text: Option<String>,
    pub tags: Vec<String>,
    pub tagging_status: TaggingStatus,
    pub tagging_attempts: i64,
    pub last_tagging_error: Option<String>,
    pub posted_at: DateTime<Utc>,
    pub parsed_at: DateTime<Utc>,
}

impl Post {
    /// The text the indexer and tagger operate on.
    pub fn indexable_text(&self) -> &str {
        self.enriched_text.as_deref().unwrap_or(&self.text)
    }
}

/// Report of one `parse_user` cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PostsIngested {
    /// True when another parse for the same user was already in flight and
    /// this call returned without doing any work.
    pub coalesced: bool,
    pub channels_parsed: usize,
    pub channels_skipped: usize,
    pub posts_ingested: usize,
    /// Relational ids of the newly inserted posts, in ingestion order.
    pub post_ids: Vec<i64>,
    /// Human-readable per-channel failures that did not abort the cycle.
    pub errors: Vec<String>,
}

/// The stores a post is indexed into. One `indexing_status` row exists per
/// (post, store).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexStore {
    Vector,
    Graph,
}

impl IndexStore {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexStore::Vector => "vector",
            IndexStore::Graph => "graph",
        }
    }
}

/// Optional constraints applied to a vector search.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilter {
    /// Restrict to a single source channel.
    pub channel_id: Option<i64>,
    /// Match posts carrying at least one of these tags.
    pub tags: Option<Vec<String>>,
    pub posted_after: Option<DateTime<Utc>>,
    pub posted_before: Option<DateTime<Utc>>,
}

/// One scored retrieval candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub post_id: i64,
    pub channel_id: i64,
    pub text: String,
    pub tags: Vec<String>,
    pub posted_at: DateTime<Utc>,
    pub score: f64,
}

/// The result of an `ask` call: a synthesized answer plus the contexts that
/// produced it.
#[derive(Debug, Clone, Serialize)]
pub struct RagAnswer {
    pub answer: String,
    pub sources: Vec<SearchHit>,
}

/// Serializes a tag list for the relational store. Tags are stored as a JSON
/// array in a TEXT column.
pub fn tags_to_json(tags: &[String]) -> String {
    serde_json::to_string(tags).unwrap_or_else(|_| "[]".to_string())
}

/// Deserializes a stored tag list, tolerating NULL/empty/malformed values.
pub fn tags_from_json(raw: Option<&str>) -> Vec<String> {
    raw.and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tagging_status_roundtrip() {
        for status in [
            TaggingStatus::Pending,
            TaggingStatus::Success,
            TaggingStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<TaggingStatus>().unwrap(), status);
        }
    }

    #[test]
    fn tags_json_tolerates_bad_input() {
        assert!(tags_from_json(None).is_empty());
        assert!(tags_from_json(Some("")).is_empty());
        assert!(tags_from_json(Some("not json")).is_empty());
        assert_eq!(
            tags_from_json(Some(r#"["ai","rust"]"#)),
            vec!["ai".to_string(), "rust".to_string()]
        );
    }
}
