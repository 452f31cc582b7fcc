//! # Parsing Scheduler
//!
//! Periodic per-user parse cycles. Each cycle loads the user's active
//! channel subscriptions, pulls messages newer than the per-channel cursor,
//! inserts them relying on the `(user, channel, external_message_id)` unique
//! constraint for deduplication, advances the cursor after the batch
//! commits, and emits an "ingested" signal for the tagging pipeline.
//!
//! Concurrency: a single in-flight parse per user (later calls coalesce),
//! cross-user parallelism bounded by a semaphore worker pool. A failing
//! channel never aborts the rest of the cycle, and a failing user never
//! blocks other users.

use crate::ingest::IngestError;
use crate::metrics;
use crate::session::SessionSupervisor;
use crate::types::PostsIngested;
use chrono::Utc;
use core_access::User;
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tracing::{info, warn};
use turso::{params, Database, Value as TursoValue};

/// Signal emitted after a batch of posts commits.
#[derive(Debug, Clone)]
pub struct IngestedBatch {
    pub user_id: String,
    pub user_telegram_id: i64,
    pub post_ids: Vec<i64>,
}

struct ChannelCursor {
    channel_id: i64,
    username: String,
    last_parsed_message_id: i64,
}

pub struct ParsingScheduler {
    db: Database,
    supervisor: Arc<SessionSupervisor>,
    worker_slots: Arc<Semaphore>,
    in_flight: Mutex<HashSet<String>>,
    ingested_tx: mpsc::UnboundedSender<IngestedBatch>,
    batch_limit: usize,
}

impl ParsingScheduler {
    /// Creates a scheduler with `workers` parallel user slots. Returns the
    /// receiver side of the "ingested" signal for the tagging pipeline.
    pub fn new(
        db: Database,
        supervisor: Arc<SessionSupervisor>,
        workers: usize,
        batch_limit: usize,
    ) -> (Self, mpsc::UnboundedReceiver<IngestedBatch>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                db,
                supervisor,
                worker_slots: Arc::new(Semaphore::new(workers.max(1))),
                in_flight: Mutex::new(HashSet::new()),
                ingested_tx: tx,
                batch_limit,
            },
            rx,
        )
    }

    /// Parses every active channel of one user. Coalescing: when a parse
    /// for the same user is already running, returns immediately with
    /// `coalesced = true` and no work done.
    pub async fn parse_user(&self, user: &User) -> Result<PostsIngested, IngestError> {
        {
            let mut in_flight = self.in_flight.lock().await;
            if !in_flight.insert(user.id.clone()) {
                info!(user_id = %user.id, "parse already in flight, coalescing");
                return Ok(PostsIngested {
                    coalesced: true,
                    ..Default::default()
                });
            }
        }

        let result = self.parse_user_inner(user).await;
        self.in_flight.lock().await.remove(&user.id);
        result
    }

    /// Runs `parse_user` for every given user with bounded parallelism.
    pub async fn parse_users(&self, users: &[User]) -> Vec<(i64, Result<PostsIngested, IngestError>)> {
        metrics::set_parse_queue_depth(users.len() as f64);
        let tasks = users.iter().map(|user| {
            let slots = Arc::clone(&self.worker_slots);
            async move {
                let _permit = slots.acquire().await.expect("worker semaphore closed");
                let result = self.parse_user(user).await;
                (user.telegram_id, result)
            }
        });
        let results = join_all(tasks).await;
        metrics::set_parse_queue_depth(0.0);
        results
    }

    async fn parse_user_inner(&self, user: &User) -> Result<PostsIngested, IngestError> {
        let mut report = PostsIngested::default();

        // Tier quota: posts already parsed today count against the cap.
        let limits = user.subscription_type.limits();
        let parsed_today = self.posts_parsed_today(&user.id).await?;
        let mut remaining_quota = (limits.max_posts_per_day - parsed_today).max(0) as usize;
        if remaining_quota == 0 {
            report
                .errors
                .push(format!("max_posts_per_day ({}) reached", limits.max_posts_per_day));
            return Ok(report);
        }

        let client = self.supervisor.get_or_connect(user.telegram_id).await?;
        let channels = self.load_channel_cursors(&user.id).await?;

        for channel in &channels {
            if remaining_quota == 0 {
                report.channels_skipped += 1;
                continue;
            }
            let limit = self.batch_limit.min(remaining_quota);
            let messages = match client
                .fetch_messages_after(channel.channel_id, channel.last_parsed_message_id, limit)
                .await
            {
                Ok(messages) => messages,
                Err(e) if e.is_transient() => {
                    // One bounded retry before skipping the channel.
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    match client
                        .fetch_messages_after(
                            channel.channel_id,
                            channel.last_parsed_message_id,
                            limit,
                        )
                        .await
                    {
                        Ok(messages) => messages,
                        Err(e) => {
                            warn!(channel = %channel.username, error = %e, "channel parse failed after retry");
                            report.channels_skipped += 1;
                            report.errors.push(format!("@{}: {e}", channel.username));
                            continue;
                        }
                    }
                }
                Err(e) => {
                    // Private/banned/deleted: log and move on.
                    warn!(channel = %channel.username, error = %e, "channel inaccessible, skipping");
                    report.channels_skipped += 1;
                    report.errors.push(format!("@{}: {e}", channel.username));
                    continue;
                }
            };

            if messages.is_empty() {
                report.channels_parsed += 1;
                continue;
            }

            let max_seen_id = messages.iter().map(|m| m.id).max().unwrap_or(0);
            let inserted = self
                .insert_posts(&user.id, channel.channel_id, &messages)
                .await?;

            // The cursor only advances after the batch committed.
            self.advance_cursor(&user.id, channel.channel_id, max_seen_id)
                .await?;

            metrics::record_posts_ingested(channel.channel_id, inserted.len() as u64);
            remaining_quota = remaining_quota.saturating_sub(inserted.len());
            report.channels_parsed += 1;
            report.posts_ingested += inserted.len();
            report.post_ids.extend(inserted);
        }

        if !report.post_ids.is_empty() {
            let _ = self.ingested_tx.send(IngestedBatch {
                user_id: user.id.clone(),
                user_telegram_id: user.telegram_id,
                post_ids: report.post_ids.clone(),
            });
        }

        info!(
            user_id = %user.id,
            posts = report.posts_ingested,
            channels = report.channels_parsed,
            skipped = report.channels_skipped,
            "parse cycle finished"
        );
        Ok(report)
    }

    async fn posts_parsed_today(&self, user_id: &str) -> Result<i64, IngestError> {
        let conn = self.db.connect()?;
        let today_start = Utc::now()
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .expect("midnight is valid")
            .and_utc();
        let mut rows = conn
            .query(
                "SELECT COUNT(*) FROM posts WHERE user_id = ? AND parsed_at >= ?",
                params![user_id.to_string(), today_start.to_rfc3339()],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(row.get(0)?),
            None => Ok(0),
        }
    }

    async fn load_channel_cursors(&self, user_id: &str) -> Result<Vec<ChannelCursor>, IngestError> {
        let conn = self.db.connect()?;
        let mut rows = conn
            .query(
                "SELECT c.id, c.username, uc.last_parsed_message_id
                 FROM user_channels uc
                 JOIN channels c ON c.id = uc.channel_id
                 WHERE uc.user_id = ? AND uc.is_active = 1
                 ORDER BY c.id",
                params![user_id.to_string()],
            )
            .await?;
        let mut cursors = Vec::new();
        while let Some(row) = rows.next().await? {
            cursors.push(ChannelCursor {
                channel_id: row.get(0)?,
                username: row.get(1)?,
                last_parsed_message_id: row.get(2)?,
            });
        }
        Ok(cursors)
    }

    /// Inserts a batch of messages in one transaction, swallowing unique
    /// constraint conflicts so re-parses are idempotent. Returns the ids of
    /// the rows that were actually inserted, in message-id order.
    async fn insert_posts(
        &self,
        user_id: &str,
        channel_id: i64,
        messages: &[crate::providers::telegram::TelegramMessage],
    ) -> Result<Vec<i64>, IngestError> {
        let conn = self.db.connect()?;
        conn.execute("BEGIN TRANSACTION", ()).await?;

        let mut new_post_ids = Vec::new();
        let mut stmt = conn
            .prepare(
                "INSERT INTO posts (user_id, channel_id, external_message_id, text, posted_at, parsed_at)
                 VALUES (?, ?, ?, ?, ?, ?) RETURNING id",
            )
            .await?;

        let parsed_at = Utc::now().to_rfc3339();
        for message in messages {
            let params = params![
                user_id.to_string(),
                channel_id,
                message.id,
                message.text.clone(),
                message.date.to_rfc3339(),
                parsed_at.clone()
            ];
            match stmt.query(params).await {
                Ok(mut result_set) => {
                    if let Some(row) = result_set.next().await? {
                        if let Ok(TursoValue::Integer(id)) = row.get_value(0) {
                            new_post_ids.push(id);
                        }
                    }
                }
                Err(turso::Error::SqlExecutionFailure(msg))
                    if msg.contains("UNIQUE constraint failed") =>
                {
                    // Already ingested in an earlier cycle.
                }
                Err(e) => {
                    conn.execute("ROLLBACK", ()).await?;
                    return Err(IngestError::Database(e));
                }
            }
        }

        conn.execute("COMMIT", ()).await?;
        Ok(new_post_ids)
    }

    async fn advance_cursor(
        &self,
        user_id: &str,
        channel_id: i64,
        new_cursor: i64,
    ) -> Result<(), IngestError> {
        let conn = self.db.connect()?;
        conn.execute(
            "UPDATE user_channels SET last_parsed_message_id = ?
             WHERE user_id = ? AND channel_id = ? AND last_parsed_message_id < ?",
            params![new_cursor, user_id.to_string(), channel_id, new_cursor],
        )
        .await?;
        Ok(())
    }
}
