//! # Telegram Adapter Selection
//!
//! The concrete MTProto binding is an external collaborator: a deployment
//! links a vendor crate implementing [`ClientFactory`] and hands it to
//! [`crate::run`]. The standalone binary ships with the `disabled` adapter,
//! which keeps the retrieval, sweep and retention jobs running while every
//! Telegram operation reports itself unavailable.

use async_trait::async_trait;
use std::sync::Arc;
use tgrag::providers::telegram::{
    ClientFactory, QrLoginStatus, QrToken, TelegramClient, TelegramError,
};

/// A factory for deployments without a linked MTProto vendor. All
/// operations fail with a transport error naming the condition.
#[derive(Debug, Default)]
pub struct DisabledClientFactory;

impl DisabledClientFactory {
    fn unavailable<T>() -> Result<T, TelegramError> {
        Err(TelegramError::Transport(
            "no Telegram adapter is linked into this build".to_string(),
        ))
    }
}

#[async_trait]
impl ClientFactory for DisabledClientFactory {
    async fn begin_qr_login(
        &self,
        _session_id: &str,
        _api_id: &str,
        _api_hash: &str,
    ) -> Result<QrToken, TelegramError> {
        Self::unavailable()
    }

    async fn poll_qr_login(&self, _session_id: &str) -> Result<QrLoginStatus, TelegramError> {
        Self::unavailable()
    }

    async fn complete_qr_login(
        &self,
        _session_id: &str,
    ) -> Result<Arc<dyn TelegramClient>, TelegramError> {
        Self::unavailable()
    }

    async fn build_client(
        &self,
        _user_telegram_id: i64,
        _api_id: &str,
        _api_hash: &str,
    ) -> Result<Arc<dyn TelegramClient>, TelegramError> {
        Self::unavailable()
    }
}
