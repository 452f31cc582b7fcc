//! # Group Digest and Mention Analysis
//!
//! Windowed summarisation of group conversations through a multi-agent LLM
//! pipeline, and triage of @mentions with a surrounding context window.
//! Each agent runs under its own timeout; analyst agents (topics, emotions,
//! roles) degrade to empty results on failure, only the synthesis step is
//! load-bearing. Temperatures are a property of the provider instance each
//! agent holds: conservative for topic extraction (≈0.1), creative for
//! emotions and roles (≈0.3), middle for synthesis (≈0.2).

use crate::html::render_telegram_html;
use crate::providers::ai::{strip_code_fence, AiProvider};
use crate::providers::telegram::TelegramMessage;
use crate::prompts::tasks::{
    DIGEST_EMOTIONS_SYSTEM_PROMPT, DIGEST_EMOTIONS_USER_PROMPT, DIGEST_ROLES_SYSTEM_PROMPT,
    DIGEST_ROLES_USER_PROMPT, DIGEST_SYNTHESIS_SYSTEM_PROMPT, DIGEST_SYNTHESIS_USER_PROMPT,
    DIGEST_TOPICS_SYSTEM_PROMPT, DIGEST_TOPICS_USER_PROMPT, MENTION_SYSTEM_PROMPT,
    MENTION_USER_PROMPT,
};
use crate::session::{SessionError, SessionSupervisor};
use chrono::{Duration as ChronoDuration, Utc};
use core_access::{CoreAccessError, User};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum DigestError {
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
    #[error("Synthesis agent failed: {0}")]
    Synthesis(String),
    #[error("Synthesis agent timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Quota(#[from] CoreAccessError),
}

/// The structured result of a group digest.
#[derive(Debug, Clone, Serialize)]
pub struct DigestResult {
    /// Synthesis output, raw Markdown-ish.
    pub summary: String,
    /// The summary rendered into the Telegram HTML subset.
    pub summary_html: String,
    pub topics: Vec<String>,
    /// Speaker name → role description.
    pub speakers: HashMap<String, String>,
    pub message_count: usize,
}

/// Mention urgency, unified on a single taxonomy. LLM outputs using the
/// `{high, medium, low}` family are normalised during deserialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Urgent,
    Important,
    #[default]
    Normal,
}

impl<'de> Deserialize<'de> for Urgency {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.to_lowercase().as_str() {
            "urgent" | "high" => Urgency::Urgent,
            "important" | "medium" => Urgency::Important,
            _ => Urgency::Normal,
        })
    }
}

/// Result of analysing one @mention.
#[derive(Debug, Clone, Serialize)]
pub struct MentionAnalysis {
    pub reason: String,
    /// The rendered context window the analysis was based on.
    pub context: String,
    pub urgency: Urgency,
}

#[derive(Deserialize)]
struct MentionLlmResponse {
    #[serde(default)]
    reason: String,
    #[serde(default)]
    urgency: Urgency,
}

/// One provider per agent so temperatures differ per role.
pub struct DigestAgents {
    pub topics: Box<dyn AiProvider>,
    pub emotions: Box<dyn AiProvider>,
    pub roles: Box<dyn AiProvider>,
    pub synthesis: Box<dyn AiProvider>,
}

pub struct DigestPipeline {
    supervisor: Arc<SessionSupervisor>,
    agents: DigestAgents,
    agent_timeout: Duration,
}

impl DigestPipeline {
    pub fn new(
        supervisor: Arc<SessionSupervisor>,
        agents: DigestAgents,
        agent_timeout: Duration,
    ) -> Self {
        Self {
            supervisor,
            agents,
            agent_timeout,
        }
    }

    /// Builds a digest of the last `hours` of a group conversation.
    pub async fn digest(
        &self,
        user: &User,
        group_id: i64,
        hours: i64,
    ) -> Result<DigestResult, DigestError> {
        let limits = user.subscription_type.limits();
        if !limits.ai_digest {
            return Err(DigestError::Quota(CoreAccessError::QuotaExceeded {
                limit_name: "ai_digest",
                used: 0,
                allowed: 0,
            }));
        }

        let client = self.supervisor.get_or_connect(user.telegram_id).await?;
        let since = Utc::now() - ChronoDuration::hours(hours.max(1));
        let messages = client
            .fetch_group_messages_since(group_id, since)
            .await
            .map_err(SessionError::from)?;

        if messages.is_empty() {
            return Ok(DigestResult {
                summary: String::new(),
                summary_html: String::new(),
                topics: Vec::new(),
                speakers: HashMap::new(),
                message_count: 0,
            });
        }

        let transcript = render_transcript(&messages);

        // Analyst agents run concurrently; each degrades to empty output.
        let (topics, emotions, speakers) = tokio::join!(
            self.run_topics_agent(&transcript),
            self.run_emotions_agent(&transcript),
            self.run_roles_agent(&transcript),
        );

        let synthesis_prompt = DIGEST_SYNTHESIS_USER_PROMPT
            .replace("{topics}", &topics.join(", "))
            .replace("{emotions}", &emotions)
            .replace("{transcript}", &transcript);
        let summary = match timeout(
            self.agent_timeout,
            self.agents
                .synthesis
                .generate(DIGEST_SYNTHESIS_SYSTEM_PROMPT, &synthesis_prompt),
        )
        .await
        {
            Ok(Ok(summary)) => summary,
            Ok(Err(e)) => return Err(DigestError::Synthesis(e.to_string())),
            Err(_) => return Err(DigestError::Timeout(self.agent_timeout)),
        };

        info!(
            group_id,
            messages = messages.len(),
            topics = topics.len(),
            "digest generated"
        );
        Ok(DigestResult {
            summary_html: render_telegram_html(&summary),
            summary,
            topics,
            speakers,
            message_count: messages.len(),
        })
    }

    async fn run_topics_agent(&self, transcript: &str) -> Vec<String> {
        let prompt = DIGEST_TOPICS_USER_PROMPT.replace("{transcript}", transcript);
        match timeout(
            self.agent_timeout,
            self.agents.topics.generate(DIGEST_TOPICS_SYSTEM_PROMPT, &prompt),
        )
        .await
        {
            Ok(Ok(response)) => {
                serde_json::from_str(strip_code_fence(&response)).unwrap_or_default()
            }
            Ok(Err(e)) => {
                warn!(error = %e, "topics agent failed");
                Vec::new()
            }
            Err(_) => {
                warn!("topics agent timed out");
                Vec::new()
            }
        }
    }

    async fn run_emotions_agent(&self, transcript: &str) -> String {
        let prompt = DIGEST_EMOTIONS_USER_PROMPT.replace("{transcript}", transcript);
        match timeout(
            self.agent_timeout,
            self.agents
                .emotions
                .generate(DIGEST_EMOTIONS_SYSTEM_PROMPT, &prompt),
        )
        .await
        {
            Ok(Ok(response)) => response.trim().to_string(),
            Ok(Err(e)) => {
                warn!(error = %e, "emotions agent failed");
                String::new()
            }
            Err(_) => {
                warn!("emotions agent timed out");
                String::new()
            }
        }
    }

    async fn run_roles_agent(&self, transcript: &str) -> HashMap<String, String> {
        let prompt = DIGEST_ROLES_USER_PROMPT.replace("{transcript}", transcript);
        match timeout(
            self.agent_timeout,
            self.agents.roles.generate(DIGEST_ROLES_SYSTEM_PROMPT, &prompt),
        )
        .await
        {
            Ok(Ok(response)) => {
                serde_json::from_str(strip_code_fence(&response)).unwrap_or_default()
            }
            Ok(Err(e)) => {
                warn!(error = %e, "roles agent failed");
                HashMap::new()
            }
            Err(_) => {
                warn!("roles agent timed out");
                HashMap::new()
            }
        }
    }

    /// Analyses why `username` was mentioned, given the surrounding context
    /// window (default size 5, configured per (user, group) pair).
    pub async fn analyze_mention(
        &self,
        username: &str,
        context_window: &[TelegramMessage],
    ) -> Result<MentionAnalysis, DigestError> {
        let context = render_transcript(context_window);
        let prompt = MENTION_USER_PROMPT
            .replace("{username}", username)
            .replace("{context}", &context);

        let response = match timeout(
            self.agent_timeout,
            self.agents.synthesis.generate(MENTION_SYSTEM_PROMPT, &prompt),
        )
        .await
        {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(DigestError::Synthesis(e.to_string())),
            Err(_) => return Err(DigestError::Timeout(self.agent_timeout)),
        };

        let parsed: MentionLlmResponse =
            serde_json::from_str(strip_code_fence(&response)).unwrap_or(MentionLlmResponse {
                reason: response.trim().chars().take(200).collect(),
                urgency: Urgency::Normal,
            });

        Ok(MentionAnalysis {
            reason: parsed.reason,
            context,
            urgency: parsed.urgency,
        })
    }
}

/// Renders messages as a `sender: text` transcript, oldest first.
fn render_transcript(messages: &[TelegramMessage]) -> String {
    messages
        .iter()
        .map(|m| {
            let sender = m.sender.as_deref().unwrap_or("unknown");
            format!("{sender}: {}", m.text)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
