//! # Telegram Client Contract
//!
//! The capability seam for the MTProto vendor: QR login, identity lookup,
//! per-dialog message iteration, and channel resolution. The concrete client
//! binding is an external collaborator; the session supervisor and the parse
//! scheduler are written purely against these traits, and the test suite
//! ships a scripted implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt::Debug;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum TelegramError {
    #[error("Channel {0} is private or inaccessible")]
    ChannelPrivate(String),
    #[error("Account is banned from {0}")]
    Banned(String),
    #[error("Flood wait: retry after {0} seconds")]
    FloodWait(u64),
    #[error("Authorization expired; the user must log in again")]
    AuthExpired,
    #[error("Telegram rejected the request: {0}")]
    Rejected(String),
    #[error("Transport error: {0}")]
    Transport(String),
}

impl TelegramError {
    /// Whether a retry with backoff is worthwhile. Access errors are not
    /// transient: a private channel stays private until the operator acts.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TelegramError::Transport(_) | TelegramError::FloodWait(_)
        )
    }
}

/// One message as read from a dialog.
#[derive(Debug, Clone)]
pub struct TelegramMessage {
    /// The external message id, monotonically increasing per dialog.
    pub id: i64,
    pub text: String,
    pub sender: Option<String>,
    pub date: DateTime<Utc>,
}

/// The authenticated account behind a client.
#[derive(Debug, Clone, Default)]
pub struct TelegramUser {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
}

/// A resolved broadcast channel.
#[derive(Debug, Clone)]
pub struct ChannelInfo {
    pub id: i64,
    pub username: String,
    pub title: Option<String>,
}

/// A QR login token as issued by Telegram.
#[derive(Debug, Clone)]
pub struct QrToken {
    /// The `tg://login?token=...` payload to render as a QR code.
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Progress of a pending QR login on the Telegram side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QrLoginStatus {
    /// Not yet scanned/approved.
    Waiting,
    /// The user's device accepted the token.
    Accepted,
    /// The token lapsed before approval.
    Expired,
}

/// An authenticated, long-lived Telegram client. Owned by the session
/// supervisor; never shared across users, never duplicated for one user.
#[async_trait]
pub trait TelegramClient: Send + Sync + Debug {
    /// Returns the account this client is logged in as.
    async fn get_me(&self) -> Result<TelegramUser, TelegramError>;

    /// Fetches messages from a channel with ids strictly greater than
    /// `after_id`, in ascending id order, up to `limit`.
    async fn fetch_messages_after(
        &self,
        channel_id: i64,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<TelegramMessage>, TelegramError>;

    /// Fetches group messages newer than `since`, ascending by id.
    async fn fetch_group_messages_since(
        &self,
        group_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<TelegramMessage>, TelegramError>;

    /// Resolves a channel username to its stable id and metadata.
    async fn resolve_channel(&self, username: &str) -> Result<ChannelInfo, TelegramError>;

    /// Whether the underlying transport is currently connected.
    async fn is_connected(&self) -> bool;

    /// Re-establishes the transport after a drop.
    async fn reconnect(&self) -> Result<(), TelegramError>;

    /// Tears the connection down. Called by the supervisor on eviction.
    async fn disconnect(&self);
}

/// Builds clients from credentials, and drives the QR login handshake for
/// sessions that do not have an authorized client yet. Transient handshake
/// state is keyed by the caller's session id.
#[async_trait]
pub trait ClientFactory: Send + Sync + Debug {
    /// Starts a QR login: constructs a transient client and requests a
    /// login token.
    async fn begin_qr_login(
        &self,
        session_id: &str,
        api_id: &str,
        api_hash: &str,
    ) -> Result<QrToken, TelegramError>;

    /// Polls Telegram for acceptance of a previously issued token.
    async fn poll_qr_login(&self, session_id: &str) -> Result<QrLoginStatus, TelegramError>;

    /// Completes an accepted login, yielding the live client. The factory
    /// persists the vendor session blob internally.
    async fn complete_qr_login(
        &self,
        session_id: &str,
    ) -> Result<Arc<dyn TelegramClient>, TelegramError>;

    /// Rebuilds an authorized client for an existing user from decrypted
    /// credentials and the persisted session blob.
    async fn build_client(
        &self,
        user_telegram_id: i64,
        api_id: &str,
        api_hash: &str,
    ) -> Result<Arc<dyn TelegramClient>, TelegramError>;
}
