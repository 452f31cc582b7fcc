//! # Retention Enforcer
//!
//! Deletes aged posts from every store according to each user's retention
//! policy. The cutoff is anchored to the user's newest stored post (not the
//! wall clock), so a dormant account's history does not silently evaporate;
//! the retention window is clamped to a minimum of one day.
//!
//! The job is single-instance: a run that starts while another is active
//! coalesces into a no-op. Store failures are logged per user and the
//! remaining stores still run, so partial progress is always made.

use crate::providers::graph::GraphStore;
use crate::providers::vector::VectorStore;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use turso::{params, Database};

#[derive(Error, Debug)]
pub enum RetentionError {
    #[error("Database error: {0}")]
    Database(#[from] turso::Error),
    #[error("Access error: {0}")]
    Access(#[from] core_access::CoreAccessError),
}

/// Outcome of one cleanup run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupReport {
    /// False when the run coalesced into an already-active one.
    pub executed: bool,
    pub users_processed: usize,
    pub posts_deleted: usize,
    pub errors: Vec<String>,
}

pub struct RetentionEnforcer {
    db: Database,
    vector: Arc<dyn VectorStore>,
    graph: Arc<dyn GraphStore>,
    running: AtomicBool,
}

impl RetentionEnforcer {
    pub fn new(db: Database, vector: Arc<dyn VectorStore>, graph: Arc<dyn GraphStore>) -> Self {
        Self {
            db,
            vector,
            graph,
            running: AtomicBool::new(false),
        }
    }

    /// Runs cleanup for every active user. Single-instance; concurrent
    /// invocations return immediately with `executed = false`.
    pub async fn run_cleanup(&self) -> Result<CleanupReport, RetentionError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            info!("cleanup already running, coalescing");
            return Ok(CleanupReport::default());
        }

        let result = self.run_cleanup_inner().await;
        self.running.store(false, Ordering::Release);
        result
    }

    async fn run_cleanup_inner(&self) -> Result<CleanupReport, RetentionError> {
        let mut report = CleanupReport {
            executed: true,
            ..Default::default()
        };

        let users = core_access::list_active_users(&self.db).await?;
        for user in users {
            match self.cleanup_user(&user.id, user.retention_days).await {
                Ok(deleted) => {
                    report.users_processed += 1;
                    report.posts_deleted += deleted;
                }
                Err(e) => {
                    warn!(user_id = %user.id, error = %e, "cleanup failed for user, continuing");
                    report.errors.push(format!("{}: {e}", user.id));
                }
            }
        }

        info!(
            users = report.users_processed,
            posts = report.posts_deleted,
            errors = report.errors.len(),
            "cleanup run finished"
        );
        Ok(report)
    }

    /// Deletes one user's posts older than their retention window. Returns
    /// the number of posts removed from the relational store.
    pub async fn cleanup_user(
        &self,
        user_id: &str,
        retention_days: i64,
    ) -> Result<usize, RetentionError> {
        let Some(newest) = self.newest_post_at(user_id).await? else {
            return Ok(0);
        };
        let cutoff = newest - Duration::days(retention_days.max(1));

        let doomed = self.posts_older_than(user_id, cutoff).await?;
        if doomed.is_empty() {
            return Ok(0);
        }

        // 1. Relational store, one transactional batch (status rows first,
        // they reference posts).
        let placeholders = doomed.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
        let id_params: Vec<turso::Value> = doomed.iter().map(|id| (*id).into()).collect();
        let conn = self.db.connect()?;
        conn.execute("BEGIN TRANSACTION", ()).await?;
        if let Err(e) = conn
            .execute(
                &format!("DELETE FROM indexing_status WHERE post_id IN ({placeholders})"),
                id_params.clone(),
            )
            .await
        {
            conn.execute("ROLLBACK", ()).await?;
            return Err(RetentionError::Database(e));
        }
        if let Err(e) = conn
            .execute(
                &format!("DELETE FROM posts WHERE id IN ({placeholders})"),
                id_params,
            )
            .await
        {
            conn.execute("ROLLBACK", ()).await?;
            return Err(RetentionError::Database(e));
        }
        conn.execute("COMMIT", ()).await?;

        // 2. Vector store, by post-id payload filter.
        if let Err(e) = self.vector.delete_by_post_ids(user_id, &doomed).await {
            warn!(user_id, error = %e, "vector cleanup failed, graph cleanup continues");
        }

        // 3. Graph store, detach per post.
        for post_id in &doomed {
            if let Err(e) = self.graph.detach_post(*post_id) {
                warn!(user_id, post_id, error = %e, "graph detach failed");
            }
        }

        info!(user_id, deleted = doomed.len(), cutoff = %cutoff, "user cleanup done");
        Ok(doomed.len())
    }

    async fn newest_post_at(&self, user_id: &str) -> Result<Option<DateTime<Utc>>, RetentionError> {
        let conn = self.db.connect()?;
        let mut rows = conn
            .query(
                "SELECT MAX(posted_at) FROM posts WHERE user_id = ?",
                params![user_id.to_string()],
            )
            .await?;
        let Some(row) = rows.next().await? else {
            return Ok(None);
        };
        let raw: Option<String> = row.get(0)?;
        Ok(raw.and_then(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
        }))
    }

    async fn posts_older_than(
        &self,
        user_id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<i64>, RetentionError> {
        let conn = self.db.connect()?;
        let mut rows = conn
            .query(
                "SELECT id FROM posts WHERE user_id = ? AND posted_at < ? ORDER BY id",
                params![user_id.to_string(), cutoff.to_rfc3339()],
            )
            .await?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next().await? {
            ids.push(row.get::<i64>(0)?);
        }
        Ok(ids)
    }
}
