//! # Background Jobs
//!
//! The daemon's select loop: periodic parse cycles, the tagging/indexing
//! hand-off driven by ingestion signals, reconciliation sweeps, and the
//! daily retention cron. Every job recovers locally; one user's failure
//! never stops the loop.

use crate::state::AppState;
use chrono::{NaiveDate, Utc};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

/// How often the reconciliation sweeps run.
const SWEEP_INTERVAL: Duration = Duration::from_secs(600);
/// How often the cleanup schedule is checked.
const CLEANUP_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Runs a full parse cycle over all active users.
async fn run_parse_cycle(state: &AppState) {
    let mut users = match core_access::list_active_users(&state.sqlite_provider.db).await {
        Ok(users) => users,
        Err(e) => {
            error!(error = %e, "could not list users for parse cycle");
            return;
        }
    };
    if users.is_empty() {
        return;
    }
    // Priority-parsing tiers take the worker slots first.
    users.sort_by_key(|u| !u.subscription_type.limits().priority_parsing);
    info!(users = users.len(), "starting parse cycle");
    let results = state.scheduler.parse_users(&users).await;
    for (telegram_id, result) in results {
        if let Err(e) = result {
            warn!(telegram_id, error = %e, "parse failed for user");
        }
    }
}

/// Tags then indexes one ingested batch. Tagging completes before indexing
/// within each post; the sweeps pick up anything that fails here.
async fn handle_ingested_batch(state: &AppState, batch: tgrag::ingest::IngestedBatch) {
    let tag_report = state.tagging.tag_posts(&batch.post_ids).await;
    let index_report = state.indexer.index_posts(&batch.post_ids).await;
    info!(
        user_id = %batch.user_id,
        tagged = tag_report.tagged,
        tag_failed = tag_report.failed,
        indexed = index_report.indexed,
        index_failed = index_report.failed,
        "ingested batch processed"
    );
}

/// Runs the reconciliation sweeps: stale tagging retry, then unindexed
/// posts.
async fn run_sweeps(state: &AppState) {
    match state.tagging.sweep_stale().await {
        Ok(report) if report.tagged + report.failed > 0 => {
            info!(tagged = report.tagged, failed = report.failed, "tagging sweep done");
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "tagging sweep failed"),
    }
    match state.indexer.sweep_unindexed().await {
        Ok(report) if report.indexed + report.failed > 0 => {
            info!(indexed = report.indexed, failed = report.failed, "indexing sweep done");
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "indexing sweep failed"),
    }
}

/// Whether the daily cleanup is due: past today's scheduled time and not
/// yet run today. A missed run executes once at the next opportunity.
fn cleanup_due(last_run: Option<NaiveDate>, schedule: (u32, u32)) -> bool {
    let now = Utc::now();
    let today = now.date_naive();
    if last_run == Some(today) {
        return false;
    }
    let (hour, minute) = schedule;
    let due_at = today
        .and_hms_opt(hour, minute, 0)
        .expect("validated schedule time")
        .and_utc();
    now >= due_at
}

/// The daemon's main loop. Returns when the shutdown signal fires.
pub async fn run_jobs(
    state: AppState,
    mut ingested_rx: mpsc::UnboundedReceiver<tgrag::ingest::IngestedBatch>,
    mut shutdown: watch::Receiver<bool>,
) {
    let parse_period = Duration::from_secs(state.config.parser_interval_minutes.max(1) * 60);
    let mut parse_tick = tokio::time::interval(parse_period);
    let mut sweep_tick = tokio::time::interval(SWEEP_INTERVAL);
    let mut cleanup_tick = tokio::time::interval(CLEANUP_CHECK_INTERVAL);
    let cleanup_schedule = state.config.cleanup.schedule_time();
    let mut last_cleanup_day: Option<NaiveDate> = None;

    info!(
        parse_minutes = state.config.parser_interval_minutes,
        cleanup_enabled = state.config.cleanup.enabled,
        "job loop started"
    );

    loop {
        tokio::select! {
            _ = parse_tick.tick() => {
                run_parse_cycle(&state).await;
            }

            Some(batch) = ingested_rx.recv() => {
                handle_ingested_batch(&state, batch).await;
            }

            _ = sweep_tick.tick() => {
                run_sweeps(&state).await;
            }

            _ = cleanup_tick.tick() => {
                if state.config.cleanup.enabled && cleanup_due(last_cleanup_day, cleanup_schedule) {
                    match state.retention.run_cleanup().await {
                        Ok(report) if report.executed => {
                            last_cleanup_day = Some(Utc::now().date_naive());
                            info!(
                                users = report.users_processed,
                                posts = report.posts_deleted,
                                errors = report.errors.len(),
                                "retention cleanup done"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "retention cleanup failed"),
                    }
                }
            }

            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("job loop shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleanup_due_only_after_schedule_and_once_per_day() {
        let today = Utc::now().date_naive();

        // A midnight schedule is always past due for the current day.
        assert!(cleanup_due(None, (0, 0)));
        // ...but never twice on the same day.
        assert!(!cleanup_due(Some(today), (0, 0)));

        // A missed run from yesterday executes at the next opportunity.
        let yesterday = today.pred_opt().unwrap();
        assert!(cleanup_due(Some(yesterday), (0, 0)));
    }
}
