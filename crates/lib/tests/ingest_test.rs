//! # Ingestion Integration Test
//!
//! Idempotent parsing, cursor advancement, per-channel failure isolation,
//! and the channel-subscription quota.

mod common;

use common::{count_rows, TestHarness};
use core_access::SubscriptionTier;
use tgrag::ingest::sources;
use tgrag::providers::telegram::{ChannelInfo, TelegramError};
use tgrag_test_utils::message;

fn channel(id: i64, username: &str) -> ChannelInfo {
    ChannelInfo {
        id,
        username: username.to_string(),
        title: Some(username.to_string()),
    }
}

#[tokio::test]
async fn parsing_twice_yields_no_duplicates() {
    // 1. Arrange: a subscribed channel with three messages.
    let harness = TestHarness::new(12345).await;
    let user = harness
        .onboard_user(12345, "INVITE", SubscriptionTier::Premium)
        .await;
    sources::subscribe_channel(&harness.db, &user, &channel(100, "technews"))
        .await
        .unwrap();
    harness.client.script_channel(
        100,
        vec![message(101, "post one"), message(102, "post two"), message(103, "post three")],
    );

    let (scheduler, mut rx) = harness.scheduler();

    // 2. First parse ingests everything.
    let first = scheduler.parse_user(&user).await.unwrap();
    assert_eq!(first.posts_ingested, 3);
    assert_eq!(first.post_ids.len(), 3);
    let batch = rx.try_recv().unwrap();
    assert_eq!(batch.post_ids, first.post_ids);

    // 3. Second parse is a no-op: same set of posts, no losses, no dupes.
    let second = scheduler.parse_user(&user).await.unwrap();
    assert_eq!(second.posts_ingested, 0);
    assert!(rx.try_recv().is_err());

    let total = count_rows(&harness.db, "SELECT COUNT(*) FROM posts").await;
    assert_eq!(total, 3);
    let distinct = count_rows(
        &harness.db,
        "SELECT COUNT(DISTINCT user_id || ':' || channel_id || ':' || external_message_id) FROM posts",
    )
    .await;
    assert_eq!(distinct, 3);

    // 4. The cursor sits at the newest external id.
    let cursor = count_rows(
        &harness.db,
        "SELECT last_parsed_message_id FROM user_channels WHERE channel_id = 100",
    )
    .await;
    assert_eq!(cursor, 103);
}

#[tokio::test]
async fn new_messages_are_picked_up_after_cursor() {
    let harness = TestHarness::new(7).await;
    let user = harness
        .onboard_user(7, "INVITE", SubscriptionTier::Premium)
        .await;
    sources::subscribe_channel(&harness.db, &user, &channel(100, "c"))
        .await
        .unwrap();
    harness
        .client
        .script_channel(100, vec![message(1, "old"), message(2, "old too")]);

    let (scheduler, _rx) = harness.scheduler();
    scheduler.parse_user(&user).await.unwrap();

    harness.client.script_channel(
        100,
        vec![message(1, "old"), message(2, "old too"), message(3, "fresh")],
    );
    let report = scheduler.parse_user(&user).await.unwrap();
    assert_eq!(report.posts_ingested, 1);

    let cursor = count_rows(
        &harness.db,
        "SELECT last_parsed_message_id FROM user_channels WHERE channel_id = 100",
    )
    .await;
    assert_eq!(cursor, 3);
}

#[tokio::test]
async fn failing_channel_does_not_abort_cycle() {
    let harness = TestHarness::new(9).await;
    let user = harness
        .onboard_user(9, "INVITE", SubscriptionTier::Premium)
        .await;
    sources::subscribe_channel(&harness.db, &user, &channel(100, "good"))
        .await
        .unwrap();
    sources::subscribe_channel(&harness.db, &user, &channel(200, "private"))
        .await
        .unwrap();

    harness.client.script_channel(100, vec![message(10, "ok")]);
    harness
        .client
        .script_channel_error(200, TelegramError::ChannelPrivate("private".into()));

    let (scheduler, _rx) = harness.scheduler();
    let report = scheduler.parse_user(&user).await.unwrap();

    assert_eq!(report.posts_ingested, 1);
    assert_eq!(report.channels_parsed, 1);
    assert_eq!(report.channels_skipped, 1);
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].contains("private"));
}

#[tokio::test]
async fn channel_quota_enforced_at_subscription() {
    let harness = TestHarness::new(11).await;
    // Free tier allows two channels.
    let user = harness
        .onboard_user(11, "INVITE", SubscriptionTier::Free)
        .await;

    sources::subscribe_channel(&harness.db, &user, &channel(1, "a"))
        .await
        .unwrap();
    sources::subscribe_channel(&harness.db, &user, &channel(2, "b"))
        .await
        .unwrap();
    let err = sources::subscribe_channel(&harness.db, &user, &channel(3, "c"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("max_channels"));
}

#[tokio::test]
async fn posts_per_day_quota_caps_cycle() {
    let harness = TestHarness::new(13).await;
    // Free tier: 200 posts/day. Script 250 messages.
    let user = harness
        .onboard_user(13, "INVITE", SubscriptionTier::Free)
        .await;
    sources::subscribe_channel(&harness.db, &user, &channel(100, "firehose"))
        .await
        .unwrap();
    let messages: Vec<_> = (1..=250).map(|i| message(i, &format!("msg {i}"))).collect();
    harness.client.script_channel(100, messages);

    let (scheduler, _rx) = harness.scheduler();
    // Batch limit is 100 per cycle; run until the quota stops the cycle.
    let mut total = 0;
    for _ in 0..5 {
        total += scheduler.parse_user(&user).await.unwrap().posts_ingested;
    }
    assert_eq!(total, 200);
}
