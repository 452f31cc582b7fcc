//! # Tagging + Indexing Integration Test
//!
//! The tag-then-index flow: provider failover, per-post status tracking,
//! reconciliation sweeps, vector points with stable chunk ids, and the
//! graph mirror.

mod common;

use common::{count_rows, TestHarness};
use core_access::SubscriptionTier;
use tgrag::ingest::sources;
use tgrag::providers::telegram::ChannelInfo;
use tgrag::types::SearchFilter;
use tgrag_test_utils::{message, MockAiProvider};

async fn ingest_one_post(harness: &TestHarness, user: &core_access::User, text: &str) -> i64 {
    sources::subscribe_channel(
        &harness.db,
        user,
        &ChannelInfo {
            id: 100,
            username: "news".to_string(),
            title: None,
        },
    )
    .await
    .unwrap();
    harness.client.script_channel(100, vec![message(1, text)]);
    let (scheduler, _rx) = harness.scheduler();
    let report = scheduler.parse_user(user).await.unwrap();
    report.post_ids[0]
}

#[tokio::test]
async fn tag_then_index_happy_path() {
    // 1. Ingest a post.
    let harness = TestHarness::new(12345).await;
    let user = harness
        .onboard_user(12345, "INVITE", SubscriptionTier::Premium)
        .await;
    let post_id = ingest_one_post(&harness, &user, "AI breakthrough").await;

    // 2. Tag it.
    let primary = TestHarness::tagging_provider(r#"["ai"]"#);
    let fallback = MockAiProvider::new();
    let tagging = harness.tagging(primary, fallback.clone());
    let report = tagging.tag_posts(&[post_id]).await;
    assert_eq!(report.tagged, 1);
    assert_eq!(fallback.call_count(), 0);

    let tagged = count_rows(
        &harness.db,
        "SELECT COUNT(*) FROM posts WHERE tagging_status = 'success' AND tags = '[\"ai\"]'",
    )
    .await;
    assert_eq!(tagged, 1);

    // 3. Index it: one chunk, one point, graph edges mirrored.
    let indexer = harness.indexer();
    let report = indexer.index_posts(&[post_id]).await;
    assert_eq!(report.indexed, 1);

    assert_eq!(harness.vector.count_points(&user.id).await.unwrap(), 1);
    let hits = harness
        .vector
        .search(
            &user.id,
            tgrag_test_utils::hash_embedding("AI breakthrough", common::TEST_DIMENSION),
            5,
            &SearchFilter::default(),
        )
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].post_id, post_id);
    assert_eq!(hits[0].tags, vec!["ai".to_string()]);

    assert_eq!(harness.graph.tags_of_post(post_id).unwrap(), vec!["ai".to_string()]);

    // 4. Status rows exist for both stores.
    let status_rows = count_rows(
        &harness.db,
        "SELECT COUNT(*) FROM indexing_status WHERE success = 1",
    )
    .await;
    assert_eq!(status_rows, 2);
}

#[tokio::test]
async fn rate_limited_primary_fails_over_once() {
    let harness = TestHarness::new(42).await;
    let user = harness
        .onboard_user(42, "INVITE", SubscriptionTier::Premium)
        .await;
    let post_id = ingest_one_post(&harness, &user, "market news").await;

    // Primary answers 429; the fallback is programmed for tagging.
    let primary = MockAiProvider::new();
    primary.set_rate_limited(true);
    let fallback = TestHarness::tagging_provider(r#"["рынок"]"#);

    let tagging = harness.tagging(primary.clone(), fallback.clone());
    let report = tagging.tag_posts(&[post_id]).await;

    assert_eq!(report.tagged, 1);
    // The secondary was invoked exactly once for the one tagging call.
    assert_eq!(fallback.call_count(), 1);
    assert_eq!(primary.call_count(), 1);
}

#[tokio::test]
async fn exhausted_providers_mark_post_failed_and_sweep_retries() {
    let harness = TestHarness::new(43).await;
    let user = harness
        .onboard_user(43, "INVITE", SubscriptionTier::Premium)
        .await;
    let post_id = ingest_one_post(&harness, &user, "some text").await;

    // Both providers rate limited: the post fails with attempts = 1.
    let primary = MockAiProvider::new();
    primary.set_rate_limited(true);
    let fallback = MockAiProvider::new();
    fallback.set_rate_limited(true);
    let tagging = harness.tagging(primary.clone(), fallback.clone());

    let report = tagging.tag_posts(&[post_id]).await;
    assert_eq!(report.failed, 1);
    let failed = count_rows(
        &harness.db,
        "SELECT COUNT(*) FROM posts WHERE tagging_status = 'failed' \
         AND tagging_attempts = 1 AND last_tagging_error IS NOT NULL",
    )
    .await;
    assert_eq!(failed, 1);

    // Providers recover; the sweep picks the post up again.
    primary.set_rate_limited(false);
    primary.add_response("content tagger", r#"["новости"]"#);
    let report = tagging.sweep_stale().await.unwrap();
    assert_eq!(report.tagged, 1);

    let succeeded = count_rows(
        &harness.db,
        "SELECT COUNT(*) FROM posts WHERE tagging_status = 'success'",
    )
    .await;
    assert_eq!(succeeded, 1);
}

#[tokio::test]
async fn malformed_primary_output_falls_back() {
    let harness = TestHarness::new(44).await;
    let user = harness
        .onboard_user(44, "INVITE", SubscriptionTier::Premium)
        .await;
    let post_id = ingest_one_post(&harness, &user, "quarterly report").await;

    let primary = MockAiProvider::new();
    primary.add_response("content tagger", "sure! here are the tags: finance");
    let fallback = TestHarness::tagging_provider(r#"["финансы"]"#);

    let tagging = harness.tagging(primary, fallback.clone());
    let report = tagging.tag_posts(&[post_id]).await;

    assert_eq!(report.tagged, 1);
    assert_eq!(fallback.call_count(), 1);
}

#[tokio::test]
async fn indexing_is_idempotent_per_chunk() {
    let harness = TestHarness::new(45).await;
    let user = harness
        .onboard_user(45, "INVITE", SubscriptionTier::Premium)
        .await;
    let post_id = ingest_one_post(&harness, &user, "AI breakthrough").await;

    let tagging = harness.tagging(TestHarness::tagging_provider(r#"["ai"]"#), MockAiProvider::new());
    tagging.tag_posts(&[post_id]).await;

    let indexer = harness.indexer();
    indexer.index_posts(&[post_id]).await;
    indexer.index_posts(&[post_id]).await;

    // Same logical point per chunk, no duplicates.
    assert_eq!(harness.vector.count_points(&user.id).await.unwrap(), 1);
}

#[tokio::test]
async fn sweep_indexes_tagged_but_unindexed_posts() {
    let harness = TestHarness::new(46).await;
    let user = harness
        .onboard_user(46, "INVITE", SubscriptionTier::Premium)
        .await;
    let post_id = ingest_one_post(&harness, &user, "untouched post").await;

    let tagging = harness.tagging(
        TestHarness::tagging_provider(r#"["разное"]"#),
        MockAiProvider::new(),
    );
    tagging.tag_posts(&[post_id]).await;

    // The post was never explicitly indexed; reconciliation finds it.
    let indexer = harness.indexer();
    let report = indexer.sweep_unindexed().await.unwrap();
    assert_eq!(report.indexed, 1);
    assert_eq!(harness.vector.count_points(&user.id).await.unwrap(), 1);

    // A second sweep has nothing left to do.
    let report = indexer.sweep_unindexed().await.unwrap();
    assert_eq!(report.indexed, 0);
}
