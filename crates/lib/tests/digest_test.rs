//! # Digest and Mention Integration Test
//!
//! The multi-agent digest pipeline over a scripted group window, the tier
//! gate on AI digests, and mention triage with urgency normalisation.

mod common;

use common::TestHarness;
use core_access::SubscriptionTier;
use std::sync::Arc;
use std::time::Duration;
use tgrag::digest::{DigestAgents, DigestError, DigestPipeline, Urgency};
use tgrag_test_utils::{message, MockAiProvider};

/// One mock serves all agents: responses are keyed on distinct system
/// prompt fragments.
fn scripted_agents() -> (MockAiProvider, DigestAgents) {
    let mock = MockAiProvider::new();
    mock.add_response(
        "Identify the main discussion topics",
        r#"["релиз", "дедлайны"]"#,
    );
    mock.add_response("emotional tone", "Оживлённое, местами напряжённое обсуждение.");
    mock.add_response(
        "role in the discussion",
        r#"{"anna": "drives the release plan", "boris": "raises risks"}"#,
    );
    mock.add_response("digest writer", "**Итоги**\n- релиз перенесён\n- дедлайн в пятницу");
    mock.add_response(
        "triaging a mention",
        r#"{"reason": "Вас просят согласовать релиз", "urgency": "high"}"#,
    );
    let agents = DigestAgents {
        topics: Box::new(mock.clone()),
        emotions: Box::new(mock.clone()),
        roles: Box::new(mock.clone()),
        synthesis: Box::new(mock.clone()),
    };
    (mock, agents)
}

fn pipeline(harness: &TestHarness, agents: DigestAgents) -> DigestPipeline {
    DigestPipeline::new(
        Arc::clone(&harness.supervisor),
        agents,
        Duration::from_secs(5),
    )
}

#[tokio::test]
async fn digest_produces_structured_result() {
    let harness = TestHarness::new(12345).await;
    let user = harness
        .onboard_user(12345, "INVITE", SubscriptionTier::Premium)
        .await;
    harness.client.script_group(
        300,
        vec![
            message(1, "когда релиз?"),
            message(2, "переносим на пятницу"),
            message(3, "ок, фиксируем"),
        ],
    );

    let (_mock, agents) = scripted_agents();
    let digest = pipeline(&harness, agents)
        .digest(&user, 300, 24)
        .await
        .unwrap();

    assert_eq!(digest.message_count, 3);
    assert_eq!(digest.topics, vec!["релиз".to_string(), "дедлайны".to_string()]);
    assert_eq!(digest.speakers.len(), 2);
    assert!(digest.summary.contains("Итоги"));
    // The rendered form uses the Telegram HTML subset, not raw Markdown.
    assert!(digest.summary_html.contains("<b>Итоги</b>"));
    assert!(digest.summary_html.contains("• релиз перенесён"));
}

#[tokio::test]
async fn empty_window_short_circuits() {
    let harness = TestHarness::new(777).await;
    let user = harness
        .onboard_user(777, "INVITE", SubscriptionTier::Premium)
        .await;
    harness.client.script_group(300, vec![]);

    let (mock, agents) = scripted_agents();
    let digest = pipeline(&harness, agents)
        .digest(&user, 300, 24)
        .await
        .unwrap();

    assert_eq!(digest.message_count, 0);
    assert!(digest.summary.is_empty());
    // No agent was consulted for an empty transcript.
    assert_eq!(mock.call_count(), 0);
}

#[tokio::test]
async fn free_tier_cannot_request_digests() {
    let harness = TestHarness::new(778).await;
    let user = harness
        .onboard_user(778, "INVITE", SubscriptionTier::Free)
        .await;

    let (_mock, agents) = scripted_agents();
    let err = pipeline(&harness, agents)
        .digest(&user, 300, 24)
        .await
        .unwrap_err();
    assert!(matches!(err, DigestError::Quota(_)));
}

#[tokio::test]
async fn failing_analyst_agents_degrade_gracefully() {
    let harness = TestHarness::new(779).await;
    let user = harness
        .onboard_user(779, "INVITE", SubscriptionTier::Premium)
        .await;
    harness.client.script_group(300, vec![message(1, "hello")]);

    // Only the synthesis agent is programmed; analysts fail.
    let mock = MockAiProvider::new();
    mock.add_response("digest writer", "Short summary.");
    let agents = DigestAgents {
        topics: Box::new(mock.clone()),
        emotions: Box::new(mock.clone()),
        roles: Box::new(mock.clone()),
        synthesis: Box::new(mock.clone()),
    };

    let digest = pipeline(&harness, agents)
        .digest(&user, 300, 24)
        .await
        .unwrap();
    assert_eq!(digest.summary, "Short summary.");
    assert!(digest.topics.is_empty());
    assert!(digest.speakers.is_empty());
}

#[tokio::test]
async fn mention_analysis_normalises_urgency() {
    let harness = TestHarness::new(780).await;
    harness
        .onboard_user(780, "INVITE", SubscriptionTier::Premium)
        .await;

    let context = vec![
        message(10, "нужен апрув от @alice"),
        message(11, "@alice срочно посмотри"),
    ];

    let (_mock, agents) = scripted_agents();
    let analysis = pipeline(&harness, agents)
        .analyze_mention("alice", &context)
        .await
        .unwrap();

    // The LLM answered "high"; the unified taxonomy maps it to Urgent.
    assert_eq!(analysis.urgency, Urgency::Urgent);
    assert!(analysis.reason.contains("согласовать"));
    assert!(analysis.context.contains("апрув"));
}
