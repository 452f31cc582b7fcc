//! # Embedding + Indexer
//!
//! Takes tagged posts, chunks their enriched text, embeds each chunk, and
//! upserts the points into the user's vector collection while mirroring
//! relationships into the knowledge graph. The vector write is the source
//! of truth for "indexed"; the graph is best-effort and its failure never
//! fails the post. One `indexing_status` row is written per (post, store).

use crate::chunking::chunk_text;
use crate::constants::chunk_point_id;
use crate::errors::ProviderError;
use crate::providers::ai::embedding::EmbeddingClient;
use crate::providers::graph::GraphStore;
use crate::providers::vector::{PointPayload, VectorPoint, VectorStore};
use crate::ratelimit::LeakyBucket;
use crate::types::{tags_from_json, IndexStore, TaggingStatus};
use chrono::{DateTime, Utc};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use turso::{params, Database};

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Database error: {0}")]
    Database(#[from] turso::Error),
    #[error("Post {0} not found")]
    PostNotFound(i64),
    #[error("Post {0} is not tagged yet (status: {1})")]
    NotTagged(i64, &'static str),
    #[error("Embedding failed: {0}")]
    Embedding(ProviderError),
    #[error("Vector store failed: {0}")]
    Vector(ProviderError),
}

/// Partial-success report for one indexing batch.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexReport {
    pub indexed: usize,
    pub failed: usize,
}

struct PostForIndexing {
    user_id: String,
    user_telegram_id: i64,
    channel_id: i64,
    text: String,
    tags: Vec<String>,
    tagging_status: TaggingStatus,
    posted_at: DateTime<Utc>,
}

pub struct Indexer {
    db: Database,
    vector: Arc<dyn VectorStore>,
    graph: Arc<dyn GraphStore>,
    embedder: EmbeddingClient,
    embed_limiter: Arc<LeakyBucket>,
    dimension: usize,
}

impl Indexer {
    pub fn new(
        db: Database,
        vector: Arc<dyn VectorStore>,
        graph: Arc<dyn GraphStore>,
        embedder: EmbeddingClient,
        embed_limiter: Arc<LeakyBucket>,
        dimension: usize,
    ) -> Self {
        Self {
            db,
            vector,
            graph,
            embedder,
            embed_limiter,
            dimension,
        }
    }

    /// Indexes a batch, reporting partial success.
    pub async fn index_posts(&self, post_ids: &[i64]) -> IndexReport {
        let mut report = IndexReport::default();
        for &post_id in post_ids {
            match self.index_post(post_id).await {
                Ok(()) => report.indexed += 1,
                Err(IndexError::NotTagged(id, status)) => {
                    // Tagging completes before indexing; the sweep will
                    // come back for this one.
                    debug!(post_id = id, status, "post not ready for indexing");
                    report.failed += 1;
                }
                Err(e) => {
                    warn!(post_id, error = %e, "indexing failed");
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Indexes one tagged post: chunk → embed → vector upsert → graph
    /// mirror. Idempotent: chunk ids are stable and upserts overwrite.
    pub async fn index_post(&self, post_id: i64) -> Result<(), IndexError> {
        let post = self.load_post(post_id).await?;
        if post.tagging_status != TaggingStatus::Success {
            return Err(IndexError::NotTagged(post_id, post.tagging_status.as_str()));
        }

        let chunks = chunk_text(&post.text);
        if chunks.is_empty() {
            // Contentless post: nothing to embed, but record the outcome so
            // the reconciliation sweep does not retry forever.
            self.record_status(post_id, IndexStore::Vector, true, None)
                .await?;
            return Ok(());
        }

        self.vector
            .ensure_collection(&post.user_id, self.dimension)
            .await
            .map_err(IndexError::Vector)?;

        let mut points = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            self.embed_limiter
                .acquire()
                .await
                .map_err(IndexError::Embedding)?;
            let vector = self
                .embedder
                .embed(&chunk.text)
                .await
                .map_err(IndexError::Embedding)?;
            points.push(VectorPoint {
                id: chunk_point_id(post_id, chunk.index),
                vector,
                payload: PointPayload {
                    post_id,
                    user_id: post.user_id.clone(),
                    channel_id: post.channel_id,
                    text: chunk.text.clone(),
                    tags: post.tags.clone(),
                    posted_at: post.posted_at,
                },
            });
        }

        match self.vector.upsert_points(&post.user_id, points).await {
            Ok(()) => {
                self.record_status(post_id, IndexStore::Vector, true, None)
                    .await?;
            }
            Err(e) => {
                self.record_status(post_id, IndexStore::Vector, false, Some(&e.to_string()))
                    .await?;
                return Err(IndexError::Vector(e));
            }
        }

        // Graph mirror is best-effort.
        match self
            .graph
            .merge_post(post.user_telegram_id, post.channel_id, post_id, &post.tags)
        {
            Ok(()) => {
                self.record_status(post_id, IndexStore::Graph, true, None)
                    .await?;
            }
            Err(e) => {
                warn!(post_id, error = %e, "graph mirror failed, vector index stands");
                self.record_status(post_id, IndexStore::Graph, false, Some(&e.to_string()))
                    .await?;
            }
        }

        debug!(post_id, chunks = chunks.len(), "post indexed");
        Ok(())
    }

    /// Reconciliation: indexes tagged posts that lack a successful vector
    /// status row. Complements the tagging sweep, which handles the posts
    /// stuck before this stage.
    pub async fn sweep_unindexed(&self) -> Result<IndexReport, IndexError> {
        let conn = self.db.connect()?;
        let mut rows = conn
            .query(
                "SELECT p.id FROM posts p
                 WHERE p.tagging_status = 'success'
                   AND NOT EXISTS (
                     SELECT 1 FROM indexing_status s
                     WHERE s.post_id = p.id AND s.store = 'vector' AND s.success = 1
                   )
                 ORDER BY p.id",
                (),
            )
            .await?;
        let mut pending = Vec::new();
        while let Some(row) = rows.next().await? {
            pending.push(row.get::<i64>(0)?);
        }
        if pending.is_empty() {
            return Ok(IndexReport::default());
        }
        info!(count = pending.len(), "indexing sweep picking up unindexed posts");
        Ok(self.index_posts(&pending).await)
    }

    async fn load_post(&self, post_id: i64) -> Result<PostForIndexing, IndexError> {
        let conn = self.db.connect()?;
        let mut rows = conn
            .query(
                "SELECT p.user_id, u.telegram_id, p.channel_id,
                        COALESCE(p.enriched_text, p.text), p.tags, p.tagging_status, p.posted_at
                 FROM posts p JOIN users u ON u.id = p.user_id
                 WHERE p.id = ?",
                params![post_id],
            )
            .await?;
        let row = rows.next().await?.ok_or(IndexError::PostNotFound(post_id))?;

        let tags_raw: Option<String> = row.get(4)?;
        let status_raw: String = row.get(5)?;
        let posted_at_raw: String = row.get(6)?;
        Ok(PostForIndexing {
            user_id: row.get(0)?,
            user_telegram_id: row.get(1)?,
            channel_id: row.get(2)?,
            text: row.get(3)?,
            tags: tags_from_json(tags_raw.as_deref()),
            tagging_status: TaggingStatus::from_str(&status_raw)
                .unwrap_or(TaggingStatus::Pending),
            posted_at: DateTime::parse_from_rfc3339(&posted_at_raw)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }

    async fn record_status(
        &self,
        post_id: i64,
        store: IndexStore,
        success: bool,
        error: Option<&str>,
    ) -> Result<(), IndexError> {
        let conn = self.db.connect()?;
        conn.execute(
            "INSERT INTO indexing_status (post_id, store, success, error, indexed_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(post_id, store) DO UPDATE SET
                success = excluded.success,
                error = excluded.error,
                indexed_at = excluded.indexed_at",
            params![
                post_id,
                store.as_str().to_string(),
                success as i64,
                error.map(String::from),
                Utc::now().to_rfc3339()
            ],
        )
        .await?;
        Ok(())
    }
}
