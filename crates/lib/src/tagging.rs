//! # Tagging Pipeline
//!
//! Assigns short topical tags to ingested posts using a primary LLM
//! provider with failover to a secondary on rate limiting, provider
//! failure, or malformed output. Both providers are gated by the upstream
//! rate limiter, and pipeline-wide concurrency is bounded (the reference
//! tariff allows a single in-flight request).
//!
//! Per-post lifecycle: `pending → success | failed(attempts+1)`. A
//! background sweep re-enqueues failed posts below the attempt threshold
//! and posts stuck `pending` for over an hour.

use crate::constants::{MAX_TAGS_PER_POST, TAGGING_MAX_ATTEMPTS};
use crate::errors::ProviderError;
use crate::ingest::enrich;
use crate::metrics;
use crate::prompts::tasks::{TAGGING_SYSTEM_PROMPT, TAGGING_USER_PROMPT};
use crate::providers::ai::{strip_code_fence, AiProvider};
use crate::ratelimit::LeakyBucket;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use turso::{params, Database};

#[derive(Error, Debug)]
pub enum TaggingError {
    #[error("Database error: {0}")]
    Database(#[from] turso::Error),
    #[error("Post {0} not found")]
    PostNotFound(i64),
    #[error("Both providers failed; last error: {0}")]
    ProvidersExhausted(ProviderError),
    #[error("Providers returned unparseable tags: {0}")]
    MalformedOutput(String),
}

/// Partial-success report for one tagging batch.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaggingReport {
    pub tagged: usize,
    pub failed: usize,
}

pub struct TaggingPipeline {
    db: Database,
    primary: Box<dyn AiProvider>,
    fallback: Box<dyn AiProvider>,
    primary_limiter: Arc<LeakyBucket>,
    fallback_limiter: Arc<LeakyBucket>,
    concurrency: Arc<Semaphore>,
    enrich_timeout: Duration,
}

impl TaggingPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Database,
        primary: Box<dyn AiProvider>,
        fallback: Box<dyn AiProvider>,
        primary_limiter: Arc<LeakyBucket>,
        fallback_limiter: Arc<LeakyBucket>,
        concurrency: usize,
        enrich_timeout: Duration,
    ) -> Self {
        Self {
            db,
            primary,
            fallback,
            primary_limiter,
            fallback_limiter,
            concurrency: Arc::new(Semaphore::new(concurrency.max(1))),
            enrich_timeout,
        }
    }

    /// Tags every post in the batch sequentially under the concurrency
    /// bound, reporting partial success rather than failing the batch.
    pub async fn tag_posts(&self, post_ids: &[i64]) -> TaggingReport {
        let mut report = TaggingReport::default();
        for &post_id in post_ids {
            match self.tag_post(post_id).await {
                Ok(tags) => {
                    debug!(post_id, ?tags, "post tagged");
                    report.tagged += 1;
                }
                Err(e) => {
                    warn!(post_id, error = %e, "tagging failed");
                    report.failed += 1;
                }
            }
        }
        if report.failed > 0 {
            info!(
                tagged = report.tagged,
                failed = report.failed,
                "tagging batch finished with failures, sweep will retry"
            );
        }
        report
    }

    /// Tags one post. On success stores the tags and marks the post
    /// `success`; on failure increments the attempt counter and marks it
    /// `failed` with the error recorded.
    pub async fn tag_post(&self, post_id: i64) -> Result<Vec<String>, TaggingError> {
        let _permit = self
            .concurrency
            .acquire()
            .await
            .expect("tagging semaphore closed");

        let (text, enriched) = self.load_post_text(post_id).await?;

        // Link enrichment happens once, ahead of the first tagging attempt.
        let effective_text = match enriched {
            Some(existing) => existing,
            None => match enrich::enrich_post_text(&text, self.enrich_timeout).await {
                Some(enriched_text) => {
                    self.store_enriched_text(post_id, &enriched_text).await?;
                    enriched_text
                }
                None => text,
            },
        };

        match self.generate_tags(&effective_text).await {
            Ok(tags) => {
                self.mark_success(post_id, &tags).await?;
                Ok(tags)
            }
            Err(e) => {
                self.mark_failed(post_id, &e.to_string()).await?;
                Err(e)
            }
        }
    }

    /// Asks the primary provider, falling back to the secondary on rate
    /// limiting, provider failure, or malformed output.
    async fn generate_tags(&self, text: &str) -> Result<Vec<String>, TaggingError> {
        let user_prompt = TAGGING_USER_PROMPT.replace("{post_text}", text);

        let primary_error = match self.primary_limiter.acquire().await {
            Ok(()) => match self.primary.generate(TAGGING_SYSTEM_PROMPT, &user_prompt).await {
                Ok(response) => match parse_tags(&response) {
                    Ok(tags) => return Ok(tags),
                    Err(malformed) => {
                        warn!(raw = %malformed, "primary returned unparseable tags, failing over");
                        ProviderError::AiApi(format!("malformed tags: {malformed}"))
                    }
                },
                Err(e) if e.is_failover_worthy() => e,
                Err(e) => {
                    metrics::record_provider_error("primary", "tagging");
                    return Err(TaggingError::ProvidersExhausted(e));
                }
            },
            Err(rate_limited) => rate_limited,
        };

        metrics::record_provider_error("primary", "tagging");
        metrics::record_tagging_fallback();
        debug!(error = %primary_error, "falling back to secondary provider");

        self.fallback_limiter
            .acquire()
            .await
            .map_err(TaggingError::ProvidersExhausted)?;
        match self.fallback.generate(TAGGING_SYSTEM_PROMPT, &user_prompt).await {
            Ok(response) => {
                parse_tags(&response).map_err(TaggingError::MalformedOutput)
            }
            Err(e) => {
                metrics::record_provider_error("fallback", "tagging");
                Err(TaggingError::ProvidersExhausted(e))
            }
        }
    }

    /// Re-enqueues posts the pipeline should look at again: `failed` below
    /// the attempt threshold, and posts stuck `pending` for over an hour.
    /// Returns the number of posts processed.
    pub async fn sweep_stale(&self) -> Result<TaggingReport, TaggingError> {
        let conn = self.db.connect()?;
        let cutoff = (chrono::Utc::now() - chrono::Duration::hours(1)).to_rfc3339();
        let mut rows = conn
            .query(
                "SELECT id FROM posts
                 WHERE (tagging_status = 'failed' AND tagging_attempts < ?)
                    OR (tagging_status = 'pending' AND parsed_at < ?)
                 ORDER BY id",
                params![TAGGING_MAX_ATTEMPTS, cutoff],
            )
            .await?;

        let mut stale = Vec::new();
        while let Some(row) = rows.next().await? {
            stale.push(row.get::<i64>(0)?);
        }
        if stale.is_empty() {
            return Ok(TaggingReport::default());
        }
        info!(count = stale.len(), "tagging sweep re-enqueueing stale posts");
        Ok(self.tag_posts(&stale).await)
    }

    async fn load_post_text(&self, post_id: i64) -> Result<(String, Option<String>), TaggingError> {
        let conn = self.db.connect()?;
        let mut rows = conn
            .query(
                "SELECT text, enriched_text FROM posts WHERE id = ?",
                params![post_id],
            )
            .await?;
        let row = rows
            .next()
            .await?
            .ok_or(TaggingError::PostNotFound(post_id))?;
        Ok((row.get(0)?, row.get(1)?))
    }

    async fn store_enriched_text(&self, post_id: i64, enriched: &str) -> Result<(), TaggingError> {
        let conn = self.db.connect()?;
        conn.execute(
            "UPDATE posts SET enriched_text = ? WHERE id = ?",
            params![enriched.to_string(), post_id],
        )
        .await?;
        Ok(())
    }

    async fn mark_success(&self, post_id: i64, tags: &[String]) -> Result<(), TaggingError> {
        let conn = self.db.connect()?;
        conn.execute(
            "UPDATE posts SET tags = ?, tagging_status = 'success', last_tagging_error = NULL
             WHERE id = ?",
            params![crate::types::tags_to_json(tags), post_id],
        )
        .await?;
        Ok(())
    }

    async fn mark_failed(&self, post_id: i64, error: &str) -> Result<(), TaggingError> {
        let conn = self.db.connect()?;
        conn.execute(
            "UPDATE posts SET tagging_status = 'failed',
                 tagging_attempts = tagging_attempts + 1,
                 last_tagging_error = ?
             WHERE id = ?",
            params![error.to_string(), post_id],
        )
        .await?;
        Ok(())
    }
}

/// Parses and normalises an LLM tag response: a JSON array of strings,
/// possibly fenced. Tags are lowercased, trimmed, deduplicated, and capped
/// at [`MAX_TAGS_PER_POST`]. An empty list is legal.
fn parse_tags(response: &str) -> Result<Vec<String>, String> {
    let cleaned = strip_code_fence(response);
    let raw: Vec<String> =
        serde_json::from_str(cleaned).map_err(|_| cleaned.chars().take(200).collect::<String>())?;

    let mut seen = std::collections::HashSet::new();
    let tags: Vec<String> = raw
        .into_iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .filter(|t| seen.insert(t.clone()))
        .take(MAX_TAGS_PER_POST)
        .collect();
    Ok(tags)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_tags_normalises() {
        let tags = parse_tags(r#"["AI", "ai", "  Новости  ", ""]"#).unwrap();
        assert_eq!(tags, vec!["ai".to_string(), "новости".to_string()]);
    }

    #[test]
    fn parse_tags_accepts_fenced_json() {
        let tags = parse_tags("```json\n[\"спорт\"]\n```").unwrap();
        assert_eq!(tags, vec!["спорт".to_string()]);
    }

    #[test]
    fn parse_tags_empty_is_legal() {
        assert!(parse_tags("[]").unwrap().is_empty());
    }

    #[test]
    fn parse_tags_caps_at_limit() {
        let many: Vec<String> = (0..30).map(|i| format!("tag{i}")).collect();
        let response = serde_json::to_string(&many).unwrap();
        assert_eq!(parse_tags(&response).unwrap().len(), MAX_TAGS_PER_POST);
    }

    #[test]
    fn parse_tags_rejects_non_array() {
        assert!(parse_tags("here are your tags: ai, ml").is_err());
    }
}
