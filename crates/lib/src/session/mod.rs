//! # Session Supervisor
//!
//! Owns the registry of live Telegram clients, one per authenticated user.
//! Clients are built on demand from decrypted credentials, kept connected
//! with bounded exponential backoff, and disconnected on eviction. The QR
//! login state machine lives in [`qr`], admin session tokens in [`admin`].

pub mod admin;
pub mod qr;

use crate::providers::cache::CacheError;
use crate::providers::telegram::{ClientFactory, TelegramClient, TelegramError};
use crate::vault::{Vault, VaultError};
use core_access::{CoreAccessError, InviteError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};
use turso::Database;

/// Errors surfaced by session management and the QR login flow.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Invite is not valid: {0}")]
    InviteInvalid(#[from] InviteError),
    #[error("QR session expired")]
    QrExpired,
    #[error("QR session not found")]
    QrNotFound,
    #[error("QR session is not ready for this transition (status: {0})")]
    InvalidTransition(String),
    #[error("Telegram rejected the login: {0}")]
    TelegramRejected(String),
    #[error("User {0} is not authenticated")]
    NotAuthenticated(i64),
    #[error("Credential vault error: {0}")]
    Vault(#[from] VaultError),
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("Access error: {0}")]
    Access(#[from] CoreAccessError),
    #[error("Database error: {0}")]
    Database(#[from] turso::Error),
    #[error("Transient error, retry later: {0}")]
    Transient(String),
}

impl From<TelegramError> for SessionError {
    fn from(err: TelegramError) -> Self {
        if err.is_transient() {
            SessionError::Transient(err.to_string())
        } else {
            SessionError::TelegramRejected(err.to_string())
        }
    }
}

/// Reconnect attempts before a client is considered gone.
const RECONNECT_ATTEMPTS: u32 = 3;

/// Registry of live clients keyed by the user's Telegram id. At most one
/// client per user; registering a replacement disconnects the old one.
pub struct SessionSupervisor {
    db: Database,
    vault: Vault,
    factory: Arc<dyn ClientFactory>,
    clients: RwLock<HashMap<i64, Arc<dyn TelegramClient>>>,
}

impl std::fmt::Debug for SessionSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSupervisor").finish_non_exhaustive()
    }
}

impl SessionSupervisor {
    pub fn new(db: Database, vault: Vault, factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            db,
            vault,
            factory,
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the registered client for a user, if any. Does not build one.
    pub async fn get_client(&self, telegram_id: i64) -> Option<Arc<dyn TelegramClient>> {
        self.clients.read().await.get(&telegram_id).cloned()
    }

    /// Returns the user's client, building and registering one from their
    /// stored credentials when absent. Reconnects a dropped transport with
    /// exponential backoff before giving up.
    pub async fn get_or_connect(
        &self,
        telegram_id: i64,
    ) -> Result<Arc<dyn TelegramClient>, SessionError> {
        if let Some(client) = self.get_client(telegram_id).await {
            if client.is_connected().await {
                return Ok(client);
            }
            if self.reconnect_with_backoff(&client).await {
                return Ok(client);
            }
            warn!(telegram_id, "client unrecoverable, evicting");
            self.evict(telegram_id).await;
        }

        let user = core_access::get_user_by_telegram_id(&self.db, telegram_id)
            .await?
            .ok_or(SessionError::NotAuthenticated(telegram_id))?;
        if !user.is_authenticated || !user.is_active {
            return Err(SessionError::NotAuthenticated(telegram_id));
        }
        let (api_id_enc, api_hash_enc) = user
            .api_id_encrypted
            .as_deref()
            .zip(user.api_hash_encrypted.as_deref())
            .ok_or(SessionError::NotAuthenticated(telegram_id))?;

        // Decryption happens only here, at client construction.
        let api_id = self.vault.decrypt(api_id_enc)?;
        let api_hash = self.vault.decrypt(api_hash_enc)?;
        info!(
            telegram_id,
            api_id = %crate::vault::mask(&api_id),
            "building Telegram client"
        );

        let client = self
            .factory
            .build_client(telegram_id, &api_id, &api_hash)
            .await?;
        self.register(telegram_id, Arc::clone(&client)).await;
        Ok(client)
    }

    async fn reconnect_with_backoff(&self, client: &Arc<dyn TelegramClient>) -> bool {
        for attempt in 0..RECONNECT_ATTEMPTS {
            let delay = Duration::from_secs(1u64 << attempt);
            tokio::time::sleep(delay).await;
            match client.reconnect().await {
                Ok(()) => return true,
                Err(e) if e.is_transient() => {
                    warn!(attempt, error = %e, "reconnect attempt failed, retrying");
                }
                Err(e) => {
                    warn!(error = %e, "reconnect rejected, giving up");
                    return false;
                }
            }
        }
        false
    }

    /// Registers a live client, replacing (and disconnecting) any previous
    /// one for the same user.
    pub async fn register(&self, telegram_id: i64, client: Arc<dyn TelegramClient>) {
        let previous = {
            let mut clients = self.clients.write().await;
            let previous = clients.insert(telegram_id, client);
            crate::metrics::set_live_clients(clients.len() as f64);
            previous
        };
        if let Some(previous) = previous {
            info!(telegram_id, "replacing existing client");
            previous.disconnect().await;
        }
    }

    /// Evicts and disconnects a user's client.
    pub async fn evict(&self, telegram_id: i64) {
        let removed = {
            let mut clients = self.clients.write().await;
            let removed = clients.remove(&telegram_id);
            crate::metrics::set_live_clients(clients.len() as f64);
            removed
        };
        if let Some(client) = removed {
            client.disconnect().await;
        }
    }

    /// Number of currently registered clients.
    pub async fn live_count(&self) -> usize {
        self.clients.read().await.len()
    }

    pub(crate) fn db(&self) -> &Database {
        &self.db
    }

    pub(crate) fn vault(&self) -> &Vault {
        &self.vault
    }

    pub(crate) fn factory(&self) -> &Arc<dyn ClientFactory> {
        &self.factory
    }
}
