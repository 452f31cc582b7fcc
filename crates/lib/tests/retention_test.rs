//! # Retention Integration Test
//!
//! Cleanup across all three stores: relational batch delete, vector
//! delete by post-id filter, graph detach. The cutoff is anchored to the
//! user's newest post and the window clamps to one day.

mod common;

use chrono::{Duration, Utc};
use common::{count_rows, TestHarness};
use core_access::SubscriptionTier;
use tgrag::types::SearchFilter;
use tgrag_test_utils::hash_embedding;

/// Inserts a tagged post directly with a chosen age, then indexes it.
async fn insert_aged_post(
    harness: &TestHarness,
    user: &core_access::User,
    external_id: i64,
    text: &str,
    age_days: i64,
) -> i64 {
    let posted_at = (Utc::now() - Duration::days(age_days)).to_rfc3339();
    let conn = harness.db.connect().unwrap();
    conn.execute(
        "INSERT INTO channels (id, username) VALUES (100, 'feed')
         ON CONFLICT(id) DO NOTHING",
        (),
    )
    .await
    .unwrap();
    let mut rows = conn
        .query(
            "INSERT INTO posts (user_id, channel_id, external_message_id, text,
                                tags, tagging_status, posted_at, parsed_at)
             VALUES (?, 100, ?, ?, '[\"новости\"]', 'success', ?, ?) RETURNING id",
            turso::params![
                user.id.clone(),
                external_id,
                text.to_string(),
                posted_at.clone(),
                posted_at
            ],
        )
        .await
        .unwrap();
    let row = rows.next().await.unwrap().unwrap();
    let post_id: i64 = row.get(0).unwrap();

    let report = harness.indexer().index_posts(&[post_id]).await;
    assert_eq!(report.indexed, 1);
    post_id
}

#[tokio::test]
async fn cleanup_removes_aged_posts_from_all_stores() {
    // 1. Arrange: retention 30 days, posts at D-40, D-20, D-0.
    let harness = TestHarness::new(12345).await;
    let user = harness
        .onboard_user(12345, "INVITE", SubscriptionTier::Premium)
        .await;
    core_access::set_retention_days(&harness.db, &user.id, 30)
        .await
        .unwrap();

    let old = insert_aged_post(&harness, &user, 1, "ancient news", 40).await;
    let mid = insert_aged_post(&harness, &user, 2, "recent news", 20).await;
    let fresh = insert_aged_post(&harness, &user, 3, "todays news", 0).await;
    assert_eq!(harness.vector.count_points(&user.id).await.unwrap(), 3);

    // 2. Run cleanup.
    let retention = harness.retention();
    let report = retention.run_cleanup().await.unwrap();
    assert!(report.executed);
    assert_eq!(report.users_processed, 1);
    assert_eq!(report.posts_deleted, 1);
    assert!(report.errors.is_empty());

    // 3. The D-40 post is gone from the relational store...
    let remaining = count_rows(&harness.db, "SELECT COUNT(*) FROM posts").await;
    assert_eq!(remaining, 2);
    let old_gone = count_rows(
        &harness.db,
        &format!("SELECT COUNT(*) FROM posts WHERE id = {old}"),
    )
    .await;
    assert_eq!(old_gone, 0);

    // ...from the vector store (by post_id filter)...
    assert_eq!(harness.vector.count_points(&user.id).await.unwrap(), 2);
    let hits = harness
        .vector
        .search(
            &user.id,
            hash_embedding("ancient news", common::TEST_DIMENSION),
            10,
            &SearchFilter::default(),
        )
        .await
        .unwrap();
    assert!(hits.iter().all(|h| h.post_id != old));

    // ...and from the graph.
    assert!(harness.graph.tags_of_post(old).unwrap().is_empty());
    assert!(!harness.graph.tags_of_post(mid).unwrap().is_empty());
    assert!(!harness.graph.tags_of_post(fresh).unwrap().is_empty());

    // 4. Status rows of deleted posts are gone too.
    let orphaned = count_rows(
        &harness.db,
        &format!("SELECT COUNT(*) FROM indexing_status WHERE post_id = {old}"),
    )
    .await;
    assert_eq!(orphaned, 0);
}

#[tokio::test]
async fn cutoff_is_anchored_to_newest_post() {
    // A dormant user whose newest post is itself old: nothing is deleted,
    // because the window is measured from that newest post.
    let harness = TestHarness::new(321).await;
    let user = harness
        .onboard_user(321, "INVITE", SubscriptionTier::Premium)
        .await;
    core_access::set_retention_days(&harness.db, &user.id, 30)
        .await
        .unwrap();

    insert_aged_post(&harness, &user, 1, "dormant account post", 90).await;
    insert_aged_post(&harness, &user, 2, "last activity", 70).await;

    let report = harness.retention().run_cleanup().await.unwrap();
    assert_eq!(report.posts_deleted, 0);
    assert_eq!(count_rows(&harness.db, "SELECT COUNT(*) FROM posts").await, 2);
}

#[tokio::test]
async fn retention_window_clamps_to_one_day() {
    let harness = TestHarness::new(322).await;
    let user = harness
        .onboard_user(322, "INVITE", SubscriptionTier::Premium)
        .await;
    // A zero-day policy is stored as the one-day minimum.
    core_access::set_retention_days(&harness.db, &user.id, 0)
        .await
        .unwrap();
    let reloaded = core_access::get_user(&harness.db, &user.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.retention_days, 1);

    insert_aged_post(&harness, &user, 1, "two days old", 2).await;
    insert_aged_post(&harness, &user, 2, "fresh", 0).await;

    let report = harness.retention().run_cleanup().await.unwrap();
    // Only the post beyond the one-day clamp goes.
    assert_eq!(report.posts_deleted, 1);
}

#[tokio::test]
async fn users_without_posts_are_skipped() {
    let harness = TestHarness::new(323).await;
    harness
        .onboard_user(323, "INVITE", SubscriptionTier::Basic)
        .await;

    let report = harness.retention().run_cleanup().await.unwrap();
    assert!(report.executed);
    assert_eq!(report.posts_deleted, 0);
    assert!(report.errors.is_empty());
}
