//! # Per-Tenant Vector Store
//!
//! One logical collection per user, named `posts_{user_id}`, created on
//! first use with the embedding dimension and cosine distance. Upserts are
//! idempotent on the point id; searches are structurally scoped to the
//! tenant's collection, so cross-tenant leakage is impossible even with a
//! hostile payload filter.
//!
//! The shipped implementation keeps collections as per-user tables in the
//! same Turso database as the relational store, with embeddings as f32
//! little-endian BLOBs and `vector_distance_cos` ordering.

use crate::constants::collection_name;
use crate::errors::ProviderError;
use crate::types::{tags_from_json, tags_to_json, SearchFilter, SearchHit};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt::Debug;
use turso::{params, Database, Value as TursoValue};

/// The payload attached to every point.
#[derive(Debug, Clone)]
pub struct PointPayload {
    pub post_id: i64,
    pub user_id: String,
    pub channel_id: i64,
    pub text: String,
    pub tags: Vec<String>,
    pub posted_at: DateTime<Utc>,
}

/// One point to upsert: stable id, dense vector, payload.
#[derive(Debug, Clone)]
pub struct VectorPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: PointPayload,
}

/// The capability contract the indexer, retrieval engine and retention job
/// require from a vector store vendor.
#[async_trait]
pub trait VectorStore: Send + Sync + Debug {
    /// Creates the user's collection if absent. The dimension is recorded on
    /// creation and immutable afterwards.
    async fn ensure_collection(&self, user_id: &str, dimension: usize)
        -> Result<(), ProviderError>;

    /// Idempotently upserts points into the user's collection.
    async fn upsert_points(
        &self,
        user_id: &str,
        points: Vec<VectorPoint>,
    ) -> Result<(), ProviderError>;

    /// Cosine-similarity search over the user's collection with optional
    /// payload filters. Returns up to `limit` hits, best first.
    async fn search(
        &self,
        user_id: &str,
        query_vector: Vec<f32>,
        limit: u32,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchHit>, ProviderError>;

    /// Deletes every chunk belonging to the given posts. Returns the number
    /// of points removed.
    async fn delete_by_post_ids(
        &self,
        user_id: &str,
        post_ids: &[i64],
    ) -> Result<u64, ProviderError>;

    /// Number of points currently stored for the user.
    async fn count_points(&self, user_id: &str) -> Result<u64, ProviderError>;

    /// Drops the user's collection entirely (tenant deletion).
    async fn drop_collection(&self, user_id: &str) -> Result<(), ProviderError>;
}

/// Converts an embedding to its stored BLOB form (f32 little-endian).
pub fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

/// Parses a stored BLOB back into an embedding.
pub fn blob_to_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Turso-backed [`VectorStore`] with one table per tenant.
#[derive(Clone)]
pub struct SqliteVectorStore {
    db: Database,
}

impl Debug for SqliteVectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteVectorStore").finish_non_exhaustive()
    }
}

impl SqliteVectorStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn connect(&self) -> Result<turso::Connection, ProviderError> {
        self.db
            .connect()
            .map_err(|e| ProviderError::StorageConnection(e.to_string()))
    }

    async fn collection_dimension(&self, user_id: &str) -> Result<Option<usize>, ProviderError> {
        let conn = self.connect()?;
        let mut rows = conn
            .query(
                "SELECT dimension FROM vector_collections WHERE user_id = ?",
                params![user_id.to_string()],
            )
            .await
            .map_err(|e| ProviderError::StorageOperationFailed(e.to_string()))?;
        match rows
            .next()
            .await
            .map_err(|e| ProviderError::StorageOperationFailed(e.to_string()))?
        {
            Some(row) => {
                let dim: i64 = row
                    .get(0)
                    .map_err(|e| ProviderError::StorageOperationFailed(e.to_string()))?;
                Ok(Some(dim as usize))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn ensure_collection(
        &self,
        user_id: &str,
        dimension: usize,
    ) -> Result<(), ProviderError> {
        let conn = self.connect()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS vector_collections (
                user_id TEXT PRIMARY KEY NOT NULL,
                name TEXT NOT NULL,
                dimension INTEGER NOT NULL,
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%S', 'now'))
            );",
            (),
        )
        .await
        .map_err(|e| ProviderError::StorageOperationFailed(e.to_string()))?;

        if let Some(existing) = self.collection_dimension(user_id).await? {
            if existing != dimension {
                return Err(ProviderError::StorageOperationFailed(format!(
                    "collection for user {user_id} has dimension {existing}, requested {dimension}"
                )));
            }
            return Ok(());
        }

        let table = collection_name(user_id);
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    point_id TEXT PRIMARY KEY NOT NULL,
                    post_id INTEGER NOT NULL,
                    user_id TEXT NOT NULL,
                    channel_id INTEGER NOT NULL,
                    text TEXT NOT NULL,
                    tags TEXT,
                    posted_at TEXT NOT NULL,
                    embedding BLOB NOT NULL
                );"
            ),
            (),
        )
        .await
        .map_err(|e| ProviderError::StorageOperationFailed(e.to_string()))?;
        conn.execute(
            &format!("CREATE INDEX IF NOT EXISTS idx_{table}_post ON {table} (post_id);"),
            (),
        )
        .await
        .map_err(|e| ProviderError::StorageOperationFailed(e.to_string()))?;

        conn.execute(
            "INSERT OR IGNORE INTO vector_collections (user_id, name, dimension) VALUES (?, ?, ?)",
            params![user_id.to_string(), table, dimension as i64],
        )
        .await
        .map_err(|e| ProviderError::StorageOperationFailed(e.to_string()))?;
        Ok(())
    }

    async fn upsert_points(
        &self,
        user_id: &str,
        points: Vec<VectorPoint>,
    ) -> Result<(), ProviderError> {
        if points.is_empty() {
            return Ok(());
        }
        let dimension = self.collection_dimension(user_id).await?.ok_or_else(|| {
            ProviderError::StorageOperationFailed(format!(
                "no collection exists for user {user_id}"
            ))
        })?;

        let table = collection_name(user_id);
        let conn = self.connect()?;
        for point in points {
            if point.vector.len() != dimension {
                return Err(ProviderError::StorageOperationFailed(format!(
                    "point {} has dimension {}, collection expects {dimension}",
                    point.id,
                    point.vector.len()
                )));
            }
            // Every point in a collection belongs to its owner; a payload
            // claiming otherwise is a caller bug, not data.
            if point.payload.user_id != user_id {
                return Err(ProviderError::StorageOperationFailed(format!(
                    "point {} carries user {} but targets collection of {user_id}",
                    point.id, point.payload.user_id
                )));
            }
            conn.execute(
                &format!(
                    "INSERT INTO {table}
                        (point_id, post_id, user_id, channel_id, text, tags, posted_at, embedding)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                     ON CONFLICT(point_id) DO UPDATE SET
                        text = excluded.text,
                        tags = excluded.tags,
                        posted_at = excluded.posted_at,
                        embedding = excluded.embedding"
                ),
                params![
                    point.id,
                    point.payload.post_id,
                    point.payload.user_id,
                    point.payload.channel_id,
                    point.payload.text,
                    tags_to_json(&point.payload.tags),
                    point.payload.posted_at.to_rfc3339(),
                    vector_to_blob(&point.vector)
                ],
            )
            .await
            .map_err(|e| ProviderError::StorageOperationFailed(e.to_string()))?;
        }
        Ok(())
    }

    async fn search(
        &self,
        user_id: &str,
        query_vector: Vec<f32>,
        limit: u32,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchHit>, ProviderError> {
        if self.collection_dimension(user_id).await?.is_none() {
            // Nothing indexed for this tenant yet.
            return Ok(Vec::new());
        }
        let table = collection_name(user_id);

        let vector_literal = format!(
            "vector('[{}]')",
            query_vector
                .iter()
                .map(|f| f.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
        let similarity = format!("(1.0 - (vector_distance_cos(embedding, {vector_literal}) / 2.0))");

        let mut conditions: Vec<String> = vec!["embedding IS NOT NULL".to_string()];
        let mut query_params: Vec<TursoValue> = Vec::new();

        if let Some(channel_id) = filter.channel_id {
            conditions.push("channel_id = ?".to_string());
            query_params.push(channel_id.into());
        }
        if let Some(after) = filter.posted_after {
            conditions.push("posted_at >= ?".to_string());
            query_params.push(after.to_rfc3339().into());
        }
        if let Some(before) = filter.posted_before {
            conditions.push("posted_at <= ?".to_string());
            query_params.push(before.to_rfc3339().into());
        }
        if let Some(tags) = &filter.tags {
            if !tags.is_empty() {
                // Tag disjunction over the JSON payload column.
                let clause = tags
                    .iter()
                    .map(|_| "tags LIKE ?")
                    .collect::<Vec<_>>()
                    .join(" OR ");
                conditions.push(format!("({clause})"));
                for tag in tags {
                    query_params.push(format!("%\"{tag}\"%").into());
                }
            }
        }

        let sql = format!(
            "SELECT post_id, channel_id, text, tags, posted_at, {similarity} AS similarity
             FROM {table}
             WHERE {}
             ORDER BY similarity DESC LIMIT {limit};",
            conditions.join(" AND ")
        );

        let conn = self.connect()?;
        let mut rows = if query_params.is_empty() {
            conn.query(&sql, ()).await
        } else {
            conn.query(&sql, query_params).await
        }
        .map_err(|e| ProviderError::StorageOperationFailed(e.to_string()))?;

        let mut hits = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| ProviderError::StorageOperationFailed(e.to_string()))?
        {
            let tags_raw: Option<String> = row
                .get(3)
                .map_err(|e| ProviderError::StorageOperationFailed(e.to_string()))?;
            let posted_at_raw: String = row
                .get(4)
                .map_err(|e| ProviderError::StorageOperationFailed(e.to_string()))?;
            let posted_at = DateTime::parse_from_rfc3339(&posted_at_raw)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now());
            let score = match row
                .get_value(5)
                .map_err(|e| ProviderError::StorageOperationFailed(e.to_string()))?
            {
                TursoValue::Real(f) => f,
                TursoValue::Integer(i) => i as f64,
                _ => 0.0,
            };
            hits.push(SearchHit {
                post_id: row
                    .get(0)
                    .map_err(|e| ProviderError::StorageOperationFailed(e.to_string()))?,
                channel_id: row
                    .get(1)
                    .map_err(|e| ProviderError::StorageOperationFailed(e.to_string()))?,
                text: row
                    .get(2)
                    .map_err(|e| ProviderError::StorageOperationFailed(e.to_string()))?,
                tags: tags_from_json(tags_raw.as_deref()),
                posted_at,
                score,
            });
        }
        Ok(hits)
    }

    async fn delete_by_post_ids(
        &self,
        user_id: &str,
        post_ids: &[i64],
    ) -> Result<u64, ProviderError> {
        if post_ids.is_empty() || self.collection_dimension(user_id).await?.is_none() {
            return Ok(0);
        }
        let table = collection_name(user_id);
        let placeholders = post_ids.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
        let query_params: Vec<TursoValue> = post_ids.iter().map(|id| (*id).into()).collect();

        let conn = self.connect()?;
        let affected = conn
            .execute(
                &format!("DELETE FROM {table} WHERE post_id IN ({placeholders})"),
                query_params,
            )
            .await
            .map_err(|e| ProviderError::StorageOperationFailed(e.to_string()))?;
        Ok(affected)
    }

    async fn count_points(&self, user_id: &str) -> Result<u64, ProviderError> {
        if self.collection_dimension(user_id).await?.is_none() {
            return Ok(0);
        }
        let table = collection_name(user_id);
        let conn = self.connect()?;
        let mut rows = conn
            .query(&format!("SELECT COUNT(*) FROM {table}"), ())
            .await
            .map_err(|e| ProviderError::StorageOperationFailed(e.to_string()))?;
        let row = rows
            .next()
            .await
            .map_err(|e| ProviderError::StorageOperationFailed(e.to_string()))?
            .ok_or_else(|| ProviderError::StorageOperationFailed("COUNT returned no row".into()))?;
        let count: i64 = row
            .get(0)
            .map_err(|e| ProviderError::StorageOperationFailed(e.to_string()))?;
        Ok(count as u64)
    }

    async fn drop_collection(&self, user_id: &str) -> Result<(), ProviderError> {
        if self.collection_dimension(user_id).await?.is_none() {
            return Ok(());
        }
        let table = collection_name(user_id);
        let conn = self.connect()?;
        conn.execute(&format!("DROP TABLE IF EXISTS {table}"), ())
            .await
            .map_err(|e| ProviderError::StorageOperationFailed(e.to_string()))?;
        conn.execute(
            "DELETE FROM vector_collections WHERE user_id = ?",
            params![user_id.to_string()],
        )
        .await
        .map_err(|e| ProviderError::StorageOperationFailed(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::db::sqlite::SqliteProvider;

    fn point(id: &str, post_id: i64, user_id: &str, vector: Vec<f32>, tags: &[&str]) -> VectorPoint {
        VectorPoint {
            id: id.to_string(),
            vector,
            payload: PointPayload {
                post_id,
                user_id: user_id.to_string(),
                channel_id: 100,
                text: format!("text of {id}"),
                tags: tags.iter().map(|t| t.to_string()).collect(),
                posted_at: Utc::now(),
            },
        }
    }

    async fn store() -> SqliteVectorStore {
        let provider = SqliteProvider::new(":memory:").await.unwrap();
        SqliteVectorStore::new(provider.db)
    }

    #[tokio::test]
    async fn upsert_is_idempotent_on_point_id() {
        let store = store().await;
        store.ensure_collection("user-a", 3).await.unwrap();

        let p = point("post_1_chunk_0", 1, "user-a", vec![1.0, 0.0, 0.0], &["ai"]);
        store.upsert_points("user-a", vec![p.clone()]).await.unwrap();
        store.upsert_points("user-a", vec![p]).await.unwrap();

        assert_eq!(store.count_points("user-a").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn upsert_rejects_foreign_payload() {
        let store = store().await;
        store.ensure_collection("user-a", 3).await.unwrap();

        let p = point("post_1_chunk_0", 1, "user-b", vec![1.0, 0.0, 0.0], &[]);
        let err = store.upsert_points("user-a", vec![p]).await.unwrap_err();
        assert!(matches!(err, ProviderError::StorageOperationFailed(_)));
    }

    #[tokio::test]
    async fn dimension_is_immutable() {
        let store = store().await;
        store.ensure_collection("user-a", 3).await.unwrap();
        let err = store.ensure_collection("user-a", 4).await.unwrap_err();
        assert!(matches!(err, ProviderError::StorageOperationFailed(_)));
    }

    #[tokio::test]
    async fn tenants_are_isolated() {
        let store = store().await;
        store.ensure_collection("user-a", 3).await.unwrap();
        store.ensure_collection("user-b", 3).await.unwrap();
        store
            .upsert_points(
                "user-a",
                vec![point("post_1_chunk_0", 1, "user-a", vec![1.0, 0.0, 0.0], &[])],
            )
            .await
            .unwrap();

        let hits = store
            .search("user-b", vec![1.0, 0.0, 0.0], 10, &SearchFilter::default())
            .await
            .unwrap();
        assert!(hits.is_empty());

        let hits = store
            .search("user-a", vec![1.0, 0.0, 0.0], 10, &SearchFilter::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].post_id, 1);
    }

    #[tokio::test]
    async fn search_orders_by_similarity_and_honors_filters() {
        let store = store().await;
        store.ensure_collection("u", 3).await.unwrap();
        store
            .upsert_points(
                "u",
                vec![
                    point("post_1_chunk_0", 1, "u", vec![1.0, 0.0, 0.0], &["ai"]),
                    point("post_2_chunk_0", 2, "u", vec![0.0, 1.0, 0.0], &["спорт"]),
                ],
            )
            .await
            .unwrap();

        let hits = store
            .search("u", vec![1.0, 0.1, 0.0], 10, &SearchFilter::default())
            .await
            .unwrap();
        assert_eq!(hits[0].post_id, 1);

        let filter = SearchFilter {
            tags: Some(vec!["спорт".to_string()]),
            ..Default::default()
        };
        let hits = store.search("u", vec![1.0, 0.0, 0.0], 10, &filter).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].post_id, 2);
    }

    #[tokio::test]
    async fn delete_by_post_ids_removes_all_chunks() {
        let store = store().await;
        store.ensure_collection("u", 3).await.unwrap();
        store
            .upsert_points(
                "u",
                vec![
                    point("post_1_chunk_0", 1, "u", vec![1.0, 0.0, 0.0], &[]),
                    point("post_1_chunk_1", 1, "u", vec![0.9, 0.1, 0.0], &[]),
                    point("post_2_chunk_0", 2, "u", vec![0.0, 1.0, 0.0], &[]),
                ],
            )
            .await
            .unwrap();

        let removed = store.delete_by_post_ids("u", &[1]).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.count_points("u").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn search_on_missing_collection_is_empty() {
        let store = store().await;
        let hits = store
            .search("ghost", vec![1.0], 5, &SearchFilter::default())
            .await
            .unwrap();
        assert!(hits.is_empty());
    }
}
