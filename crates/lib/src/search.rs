//! # Retrieval Engine
//!
//! The user-facing query pipeline: optional graph-driven query expansion,
//! query embedding, tenant-scoped vector search, optional hybrid re-rank,
//! and LLM answer synthesis. Expansion and hybrid re-ranking are
//! feature-flagged with deterministic percentage rollout, so a given user's
//! experience is stable across calls and restarts.

use crate::errors::ProviderError;
use crate::flags::FeatureFlags;
use crate::metrics;
use crate::prompts::tasks::{
    QUERY_TOPICS_SYSTEM_PROMPT, QUERY_TOPICS_USER_PROMPT, RAG_SYNTHESIS_SYSTEM_PROMPT,
    RAG_SYNTHESIS_USER_PROMPT,
};
use crate::providers::ai::embedding::EmbeddingClient;
use crate::providers::ai::{strip_code_fence, AiProvider};
use crate::providers::graph::GraphStore;
use crate::providers::vector::VectorStore;
use crate::ratelimit::LeakyBucket;
use crate::rerank::graph_rerank;
use crate::types::{RagAnswer, SearchFilter, SearchHit};
use chrono::Utc;
use core_access::{CoreAccessError, User};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use turso::{params, Database};

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Database error: {0}")]
    Database(#[from] turso::Error),
    #[error("Query embedding failed: {0}")]
    Embedding(ProviderError),
    #[error("Vector search failed: {0}")]
    Vector(ProviderError),
    #[error("Answer synthesis failed: {0}")]
    Synthesis(ProviderError),
    #[error(transparent)]
    Quota(#[from] CoreAccessError),
}

/// Stop words excluded from expansion keywords. Deliberately small: the
/// goal is to skip glue words, not to do real lexical analysis.
const STOP_WORDS: &[&str] = &[
    // Russian
    "как", "что", "это", "для", "или", "если", "там", "тут", "при", "про", "его", "еще", "ещё",
    "был", "были", "есть", "где", "кто", "чем", "том", "так", "все", "всё", "мне", "меня", "они",
    // English
    "the", "and", "for", "are", "was", "were", "what", "who", "how", "why", "where", "when",
    "this", "that", "with", "from", "about", "can", "could", "will", "would", "has", "have",
];

/// How many query keywords are consulted for expansion.
const EXPANSION_KEYWORDS: usize = 2;
/// Default number of hits returned by `search`.
const DEFAULT_TOP_K: u32 = 10;
/// Contexts fed into answer synthesis.
const SYNTHESIS_CONTEXTS: usize = 5;

pub struct RetrievalEngine {
    db: Database,
    vector: Arc<dyn VectorStore>,
    graph: Arc<dyn GraphStore>,
    embedder: EmbeddingClient,
    embed_limiter: Arc<LeakyBucket>,
    synthesis_provider: Box<dyn AiProvider>,
    flags: FeatureFlags,
}

impl RetrievalEngine {
    pub fn new(
        db: Database,
        vector: Arc<dyn VectorStore>,
        graph: Arc<dyn GraphStore>,
        embedder: EmbeddingClient,
        embed_limiter: Arc<LeakyBucket>,
        synthesis_provider: Box<dyn AiProvider>,
        flags: FeatureFlags,
    ) -> Self {
        Self {
            db,
            vector,
            graph,
            embedder,
            embed_limiter,
            synthesis_provider,
            flags,
        }
    }

    /// Expands a query with tags that co-occur (in this user's graph) with
    /// its keywords. At most `query_expansion_max_terms` new terms are
    /// appended; terms already present in the query are never repeated.
    pub fn expand_query(&self, query: &str) -> String {
        let max_terms = self.flags.query_expansion_max_terms.max(1);
        let query_lower = query.to_lowercase();
        let present: HashSet<&str> = query_lower.split_whitespace().collect();

        let keywords: Vec<&str> = query_lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.chars().count() >= 3)
            .filter(|w| !STOP_WORDS.contains(w))
            .take(EXPANSION_KEYWORDS)
            .collect();

        let mut expansion: Vec<String> = Vec::new();
        for keyword in keywords {
            let related = match self.graph.related_tags(keyword, max_terms) {
                Ok(related) => related,
                Err(e) => {
                    debug!(error = %e, "graph unavailable for expansion, skipping");
                    break;
                }
            };
            for term in related {
                if expansion.len() >= max_terms {
                    break;
                }
                if !present.contains(term.as_str()) && !expansion.contains(&term) {
                    expansion.push(term);
                }
            }
        }

        if expansion.is_empty() {
            query.to_string()
        } else {
            debug!(?expansion, "query expanded");
            format!("{query} {}", expansion.join(" "))
        }
    }

    /// Vector search scoped to the caller's collection, with optional
    /// expansion and hybrid re-ranking by feature flag.
    pub async fn search(
        &self,
        user: &User,
        query: &str,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchHit>, SearchError> {
        let started = std::time::Instant::now();

        let effective_query = if self.flags.query_expansion_for(&user.id) {
            self.expand_query(query)
        } else {
            query.to_string()
        };

        self.embed_limiter
            .acquire()
            .await
            .map_err(SearchError::Embedding)?;
        let query_vector = self
            .embedder
            .embed(&effective_query)
            .await
            .map_err(SearchError::Embedding)?;

        let hits = self
            .vector
            .search(&user.id, query_vector, DEFAULT_TOP_K, filter)
            .await
            .map_err(SearchError::Vector)?;

        let hits = if self.flags.hybrid_search_for(&user.id) {
            graph_rerank(hits, self.graph.as_ref())
        } else {
            hits
        };

        metrics::record_search_latency(started.elapsed().as_secs_f64());
        Ok(hits)
    }

    /// Answers a question with RAG: retrieve, synthesize, log the query.
    /// Enforces the tier's daily RAG quota at entry.
    pub async fn ask(
        &self,
        user: &User,
        query: &str,
        filter: &SearchFilter,
    ) -> Result<RagAnswer, SearchError> {
        self.enforce_rag_quota(user).await?;
        metrics::record_rag_query();

        let hits = self.search(user, query, filter).await?;
        if hits.is_empty() {
            // No context; log the query anyway for personalisation.
            self.record_history(&user.id, query, &[]).await?;
            return Ok(RagAnswer {
                answer: String::new(),
                sources: Vec::new(),
            });
        }

        let sources: Vec<SearchHit> = hits.into_iter().take(SYNTHESIS_CONTEXTS).collect();
        let context = sources
            .iter()
            .enumerate()
            .map(|(i, hit)| {
                format!(
                    "[{}] ({}) {}",
                    i + 1,
                    hit.posted_at.format("%Y-%m-%d"),
                    hit.text
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        let user_prompt = RAG_SYNTHESIS_USER_PROMPT
            .replace("{prompt}", query)
            .replace("{context}", &context);
        let answer = self
            .synthesis_provider
            .generate(RAG_SYNTHESIS_SYSTEM_PROMPT, &user_prompt)
            .await
            .map_err(SearchError::Synthesis)?;

        let topics = self.extract_topics(query).await;
        self.record_history(&user.id, query, &topics).await?;

        info!(user_id = %user.id, sources = sources.len(), "RAG query answered");
        Ok(RagAnswer { answer, sources })
    }

    /// Extracts lightweight topics from the query for the history log.
    /// Failures degrade to an empty list; history is never worth failing a
    /// user-facing answer over.
    async fn extract_topics(&self, query: &str) -> Vec<String> {
        let user_prompt = QUERY_TOPICS_USER_PROMPT.replace("{prompt}", query);
        match self
            .synthesis_provider
            .generate(QUERY_TOPICS_SYSTEM_PROMPT, &user_prompt)
            .await
        {
            Ok(response) => {
                serde_json::from_str::<Vec<String>>(strip_code_fence(&response)).unwrap_or_default()
            }
            Err(e) => {
                warn!(error = %e, "topic extraction failed");
                Vec::new()
            }
        }
    }

    async fn enforce_rag_quota(&self, user: &User) -> Result<(), SearchError> {
        let limits = user.subscription_type.limits();
        let today_start = Utc::now()
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .expect("midnight is valid")
            .and_utc();

        let conn = self.db.connect()?;
        let mut rows = conn
            .query(
                "SELECT COUNT(*) FROM rag_query_history WHERE user_id = ? AND created_at >= ?",
                params![user.id.clone(), today_start.to_rfc3339()],
            )
            .await?;
        let used: i64 = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => 0,
        };

        if used >= limits.rag_queries_per_day {
            return Err(SearchError::Quota(CoreAccessError::QuotaExceeded {
                limit_name: "rag_queries_per_day",
                used,
                allowed: limits.rag_queries_per_day,
            }));
        }
        Ok(())
    }

    async fn record_history(
        &self,
        user_id: &str,
        query: &str,
        topics: &[String],
    ) -> Result<(), SearchError> {
        let conn = self.db.connect()?;
        conn.execute(
            "INSERT INTO rag_query_history (user_id, query, topics, created_at) VALUES (?, ?, ?, ?)",
            params![
                user_id.to_string(),
                query.to_string(),
                crate::types::tags_to_json(topics),
                Utc::now().to_rfc3339()
            ],
        )
        .await?;
        Ok(())
    }
}
