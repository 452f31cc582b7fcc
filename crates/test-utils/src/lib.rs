//! # Test Utilities
//!
//! Shared fixtures for the tgrag test suites: an isolated in-memory
//! database with the full schema, a keyed mock AI provider, a scripted
//! Telegram client/factory pair, and a deterministic embedding endpoint
//! served over wiremock. No test touches the network beyond localhost.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tgrag::errors::ProviderError;
use tgrag::providers::ai::AiProvider;
use tgrag::providers::telegram::{
    ChannelInfo, ClientFactory, QrLoginStatus, QrToken, TelegramClient, TelegramError,
    TelegramMessage, TelegramUser,
};
use turso::Database;
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

// --- Test Setup ---

/// A helper struct to manage database creation for each test.
pub struct TestSetup {
    pub db: Database,
}

impl TestSetup {
    /// Creates a new, isolated in-memory database and initializes the schema.
    pub async fn new() -> Result<Self> {
        let provider = tgrag::providers::db::sqlite::SqliteProvider::new(":memory:").await?;
        provider.initialize_schema().await?;
        Ok(Self { db: provider.db })
    }
}

// --- Mock AI Provider ---

#[derive(Clone, Debug)]
pub struct MockAiProvider {
    responses: Arc<Mutex<HashMap<String, String>>>,
    calls: Arc<Mutex<Vec<(String, String)>>>,
    rate_limited: Arc<AtomicBool>,
}

impl MockAiProvider {
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            rate_limited: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Pre-programs a response for a specific prompt.
    /// The key should be a unique substring of the system prompt.
    pub fn add_response(&self, key: &str, response: &str) {
        let mut responses = self.responses.lock().unwrap();
        responses.insert(key.to_string(), response.to_string());
    }

    /// Makes every subsequent call fail with `RateLimited` (HTTP 429
    /// behaviour), as the failover tests require.
    pub fn set_rate_limited(&self, limited: bool) {
        self.rate_limited.store(limited, Ordering::SeqCst);
    }

    /// Retrieves the recorded calls for assertion.
    pub fn get_calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl Default for MockAiProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AiProvider for MockAiProvider {
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, ProviderError> {
        let mut calls = self.calls.lock().unwrap();
        calls.push((system_prompt.to_string(), user_prompt.to_string()));
        drop(calls);

        if self.rate_limited.load(Ordering::SeqCst) {
            return Err(ProviderError::RateLimited("429 Too Many Requests".into()));
        }

        let responses = self.responses.lock().unwrap();
        for (key, response) in responses.iter() {
            if system_prompt.contains(key) {
                return Ok(response.clone());
            }
        }

        Err(ProviderError::AiApi(format!(
            "MockAiProvider: No response programmed for system prompt. Got: '{system_prompt}'"
        )))
    }
}

// --- Mock Telegram Client ---

/// A scripted Telegram client. Channels and groups are programmed with
/// message lists; fetches honor cursors, ordering and limits the way the
/// contract demands.
#[derive(Debug, Default)]
pub struct MockTelegramClient {
    pub me: Mutex<TelegramUser>,
    channels: Mutex<HashMap<i64, Vec<TelegramMessage>>>,
    channel_errors: Mutex<HashMap<i64, TelegramError>>,
    groups: Mutex<HashMap<i64, Vec<TelegramMessage>>>,
    connected: AtomicBool,
    pub disconnect_count: AtomicU32,
}

impl MockTelegramClient {
    pub fn new(telegram_id: i64) -> Self {
        let client = Self::default();
        *client.me.lock().unwrap() = TelegramUser {
            id: telegram_id,
            username: Some(format!("user{telegram_id}")),
            first_name: Some("Test".to_string()),
        };
        client.connected.store(true, Ordering::SeqCst);
        client
    }

    /// Scripts a channel's full message history, oldest first.
    pub fn script_channel(&self, channel_id: i64, messages: Vec<TelegramMessage>) {
        self.channels.lock().unwrap().insert(channel_id, messages);
    }

    /// Makes fetches for one channel fail with the given error.
    pub fn script_channel_error(&self, channel_id: i64, error: TelegramError) {
        self.channel_errors.lock().unwrap().insert(channel_id, error);
    }

    pub fn script_group(&self, group_id: i64, messages: Vec<TelegramMessage>) {
        self.groups.lock().unwrap().insert(group_id, messages);
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

/// Builds a message with an id-derived timestamp (`base + id` minutes).
pub fn message(id: i64, text: &str) -> TelegramMessage {
    message_at(id, text, Utc::now() - Duration::hours(1) + Duration::minutes(id))
}

pub fn message_at(id: i64, text: &str, date: DateTime<Utc>) -> TelegramMessage {
    TelegramMessage {
        id,
        text: text.to_string(),
        sender: Some("sender".to_string()),
        date,
    }
}

#[async_trait]
impl TelegramClient for MockTelegramClient {
    async fn get_me(&self) -> Result<TelegramUser, TelegramError> {
        Ok(self.me.lock().unwrap().clone())
    }

    async fn fetch_messages_after(
        &self,
        channel_id: i64,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<TelegramMessage>, TelegramError> {
        if let Some(error) = self.channel_errors.lock().unwrap().get(&channel_id) {
            return Err(error.clone());
        }
        let channels = self.channels.lock().unwrap();
        let Some(messages) = channels.get(&channel_id) else {
            return Err(TelegramError::ChannelPrivate(channel_id.to_string()));
        };
        let mut newer: Vec<TelegramMessage> = messages
            .iter()
            .filter(|m| m.id > after_id)
            .cloned()
            .collect();
        newer.sort_by_key(|m| m.id);
        newer.truncate(limit);
        Ok(newer)
    }

    async fn fetch_group_messages_since(
        &self,
        group_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<TelegramMessage>, TelegramError> {
        let groups = self.groups.lock().unwrap();
        let Some(messages) = groups.get(&group_id) else {
            return Err(TelegramError::ChannelPrivate(group_id.to_string()));
        };
        let mut window: Vec<TelegramMessage> = messages
            .iter()
            .filter(|m| m.date >= since)
            .cloned()
            .collect();
        window.sort_by_key(|m| m.id);
        Ok(window)
    }

    async fn resolve_channel(&self, username: &str) -> Result<ChannelInfo, TelegramError> {
        Ok(ChannelInfo {
            id: username.len() as i64 * 1_000,
            username: username.trim_start_matches('@').to_string(),
            title: Some(username.to_string()),
        })
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn reconnect(&self) -> Result<(), TelegramError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.disconnect_count.fetch_add(1, Ordering::SeqCst);
    }
}

// --- Mock Client Factory ---

/// Drives the QR handshake against a pre-built [`MockTelegramClient`]. The
/// poll result is scripted; by default the token is accepted immediately.
#[derive(Debug)]
pub struct MockClientFactory {
    client: Arc<MockTelegramClient>,
    poll_result: Mutex<QrLoginStatus>,
    pub qr_started: AtomicU32,
}

impl MockClientFactory {
    pub fn new(client: Arc<MockTelegramClient>) -> Self {
        Self {
            client,
            poll_result: Mutex::new(QrLoginStatus::Accepted),
            qr_started: AtomicU32::new(0),
        }
    }

    pub fn set_poll_result(&self, status: QrLoginStatus) {
        *self.poll_result.lock().unwrap() = status;
    }
}

#[async_trait]
impl ClientFactory for MockClientFactory {
    async fn begin_qr_login(
        &self,
        session_id: &str,
        _api_id: &str,
        _api_hash: &str,
    ) -> Result<QrToken, TelegramError> {
        self.qr_started.fetch_add(1, Ordering::SeqCst);
        Ok(QrToken {
            token: format!("tg://login?token={session_id}"),
            expires_at: Utc::now() + Duration::seconds(300),
        })
    }

    async fn poll_qr_login(&self, _session_id: &str) -> Result<QrLoginStatus, TelegramError> {
        Ok(*self.poll_result.lock().unwrap())
    }

    async fn complete_qr_login(
        &self,
        _session_id: &str,
    ) -> Result<Arc<dyn TelegramClient>, TelegramError> {
        Ok(Arc::clone(&self.client) as Arc<dyn TelegramClient>)
    }

    async fn build_client(
        &self,
        _user_telegram_id: i64,
        _api_id: &str,
        _api_hash: &str,
    ) -> Result<Arc<dyn TelegramClient>, TelegramError> {
        Ok(Arc::clone(&self.client) as Arc<dyn TelegramClient>)
    }
}

// --- Deterministic Embeddings ---

/// Deterministic bag-of-words embedding: each word hashes to a dimension,
/// the vector is L2-normalised. Texts sharing words land close together in
/// cosine space, which is exactly what retrieval tests need.
pub fn hash_embedding(text: &str, dimension: usize) -> Vec<f32> {
    let mut vector = vec![0.0f32; dimension.max(1)];
    for word in text.to_lowercase().split(|c: char| !c.is_alphanumeric()) {
        if word.is_empty() {
            continue;
        }
        let digest = md5::compute(word);
        let index = u16::from_be_bytes([digest.0[0], digest.0[1]]) as usize % vector.len();
        vector[index] += 1.0;
    }
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut vector {
            *v /= norm;
        }
    }
    vector
}

struct EmbeddingResponder {
    dimension: usize,
}

impl Respond for EmbeddingResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let input = serde_json::from_slice::<serde_json::Value>(&request.body)
            .ok()
            .and_then(|v| v.get("input").and_then(|i| i.as_str().map(String::from)))
            .unwrap_or_default();
        let embedding = hash_embedding(&input, self.dimension);
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [{ "embedding": embedding }]
        }))
    }
}

/// Starts a wiremock server answering OpenAI-compatible embedding requests
/// with [`hash_embedding`] vectors of the given dimension. Returns the
/// server (keep it alive) and the endpoint URL.
pub async fn spawn_embedding_server(dimension: usize) -> (MockServer, String) {
    let server = MockServer::start().await;
    Mock::given(wiremock::matchers::method("POST"))
        .respond_with(EmbeddingResponder { dimension })
        .mount(&server)
        .await;
    let url = format!("{}/v1/embeddings", server.uri());
    (server, url)
}
