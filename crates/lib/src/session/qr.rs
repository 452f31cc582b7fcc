//! # QR Login State Machine
//!
//! Drives a new user through `Pending → Authorized → Finalized`, with
//! terminal `Expired`/`Error` states. Session state is transient and lives
//! in the cache under `qr_session:{uuid}` with a TTL equal to the QR
//! validity window; the relational store is only touched at finalization,
//! which is transactional and idempotent.

use crate::constants::{QR_SESSION_PREFIX, QR_SESSION_TTL_SECS};
use crate::providers::cache::Cache;
use crate::providers::telegram::QrLoginStatus;
use crate::session::{SessionError, SessionSupervisor};
use chrono::{DateTime, Utc};
use core_access::User;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Lifecycle of one QR login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QrSessionStatus {
    Pending,
    Authorized,
    Finalized,
    Expired,
    Error,
}

/// The cached record of one QR login attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QrAuthSession {
    pub session_id: String,
    pub telegram_id: i64,
    pub invite_code: String,
    pub qr_token: String,
    pub expires_at: DateTime<Utc>,
    pub status: QrSessionStatus,
    #[serde(default)]
    pub error: Option<String>,
}

/// What `create_qr_session` hands back to the caller for rendering.
#[derive(Debug, Clone, Serialize)]
pub struct QrSessionCreated {
    pub session_id: String,
    pub qr_token: String,
    pub expires_at: DateTime<Utc>,
}

/// The QR login flow. Holds the service-level Telegram API credentials used
/// to construct transient login clients; on finalization they are encrypted
/// per user by the vault.
pub struct QrLoginFlow {
    supervisor: Arc<SessionSupervisor>,
    cache: Arc<dyn Cache>,
    api_id: String,
    api_hash: String,
}

impl QrLoginFlow {
    pub fn new(
        supervisor: Arc<SessionSupervisor>,
        cache: Arc<dyn Cache>,
        api_id: String,
        api_hash: String,
    ) -> Self {
        Self {
            supervisor,
            cache,
            api_id,
            api_hash,
        }
    }

    fn cache_key(session_id: &str) -> String {
        format!("{QR_SESSION_PREFIX}{session_id}")
    }

    async fn store_session(&self, session: &QrAuthSession) -> Result<(), SessionError> {
        let ttl = (session.expires_at - Utc::now())
            .to_std()
            .unwrap_or(Duration::from_secs(1));
        let payload = serde_json::to_string(session)
            .map_err(|e| SessionError::Transient(format!("session serialization failed: {e}")))?;
        self.cache
            .set_with_ttl(&Self::cache_key(&session.session_id), payload, ttl)
            .await?;
        Ok(())
    }

    async fn load_session(&self, session_id: &str) -> Result<QrAuthSession, SessionError> {
        let raw = self
            .cache
            .get(&Self::cache_key(session_id))
            .await?
            .ok_or(SessionError::QrNotFound)?;
        serde_json::from_str(&raw)
            .map_err(|e| SessionError::Transient(format!("session deserialization failed: {e}")))
    }

    /// Records a terminal error on the session so pollers see the reason.
    async fn fail_session(&self, mut session: QrAuthSession, reason: &str) {
        session.status = QrSessionStatus::Error;
        session.error = Some(reason.to_string());
        if let Err(e) = self.store_session(&session).await {
            warn!(session_id = %session.session_id, error = %e, "failed to record session error");
        }
    }

    /// `Pending`: validates the invite atomically, requests a QR token from
    /// Telegram, and caches the session with the QR validity TTL.
    pub async fn create_qr_session(
        &self,
        telegram_id: i64,
        invite_code: &str,
    ) -> Result<QrSessionCreated, SessionError> {
        // 1. The invite must be redeemable before any Telegram traffic.
        core_access::validate_invite(self.supervisor.db(), invite_code).await?;

        // 2. Construct a transient client and request a login token.
        let session_id = Uuid::new_v4().to_string();
        let token = self
            .supervisor
            .factory()
            .begin_qr_login(&session_id, &self.api_id, &self.api_hash)
            .await?;

        let expires_at = token
            .expires_at
            .min(Utc::now() + chrono::Duration::seconds(QR_SESSION_TTL_SECS as i64));
        let session = QrAuthSession {
            session_id: session_id.clone(),
            telegram_id,
            invite_code: invite_code.to_string(),
            qr_token: token.token.clone(),
            expires_at,
            status: QrSessionStatus::Pending,
            error: None,
        };
        self.store_session(&session).await?;

        info!(telegram_id, session_id = %session_id, "QR login session created");
        Ok(QrSessionCreated {
            session_id,
            qr_token: token.token,
            expires_at,
        })
    }

    /// Polls the Telegram side. Moves `Pending → Authorized` when the token
    /// was accepted; `Pending → Expired` when the window lapsed.
    pub async fn poll(&self, session_id: &str) -> Result<QrSessionStatus, SessionError> {
        let mut session = self.load_session(session_id).await?;

        match session.status {
            QrSessionStatus::Pending => {}
            // Terminal and already-advanced states are stable under polling.
            other => return Ok(other),
        }

        if session.expires_at <= Utc::now() {
            session.status = QrSessionStatus::Expired;
            self.store_session(&session).await?;
            return Ok(QrSessionStatus::Expired);
        }

        match self.supervisor.factory().poll_qr_login(session_id).await {
            Ok(QrLoginStatus::Accepted) => {
                session.status = QrSessionStatus::Authorized;
                self.store_session(&session).await?;
                Ok(QrSessionStatus::Authorized)
            }
            Ok(QrLoginStatus::Waiting) => Ok(QrSessionStatus::Pending),
            Ok(QrLoginStatus::Expired) => {
                session.status = QrSessionStatus::Expired;
                self.store_session(&session).await?;
                Ok(QrSessionStatus::Expired)
            }
            Err(e) if e.is_transient() => Err(SessionError::Transient(e.to_string())),
            Err(e) => {
                self.fail_session(session, &e.to_string()).await;
                Err(SessionError::TelegramRejected(e.to_string()))
            }
        }
    }

    /// `Authorized → Finalized`: completes the login, upserts the user,
    /// applies the invite's tier, consumes the invite, and registers the
    /// live client. Transactional, and idempotent on repeat calls.
    pub async fn finalize(&self, session_id: &str) -> Result<User, SessionError> {
        let mut session = self.load_session(session_id).await?;
        let db = self.supervisor.db();

        match session.status {
            QrSessionStatus::Authorized => {}
            QrSessionStatus::Finalized => {
                // Idempotent: the user row already exists.
                let user = core_access::get_user_by_telegram_id(db, session.telegram_id)
                    .await?
                    .ok_or(SessionError::QrNotFound)?;
                return Ok(user);
            }
            QrSessionStatus::Expired => return Err(SessionError::QrExpired),
            other => {
                return Err(SessionError::InvalidTransition(
                    format!("{other:?}").to_lowercase(),
                ))
            }
        }
        if session.expires_at <= Utc::now() {
            session.status = QrSessionStatus::Expired;
            self.store_session(&session).await?;
            return Err(SessionError::QrExpired);
        }

        let invite = core_access::validate_invite(db, &session.invite_code).await?;

        // Complete the Telegram side and learn who we are.
        let client = self
            .supervisor
            .factory()
            .complete_qr_login(session_id)
            .await?;
        let me = client.get_me().await?;
        if me.id != session.telegram_id {
            let reason = format!(
                "QR login was approved by account {} but session belongs to {}",
                me.id, session.telegram_id
            );
            self.fail_session(session, &reason).await;
            return Err(SessionError::TelegramRejected(reason));
        }

        let user = core_access::get_or_create_user(db, me.id, me.first_name.as_deref()).await?;
        let api_id_enc = self.supervisor.vault().encrypt(&self.api_id)?;
        let api_hash_enc = self.supervisor.vault().encrypt(&self.api_hash)?;

        // One transaction: the user row is never left partially written and
        // the invite counter moves together with the authentication flag.
        let conn = db.connect()?;
        conn.execute("BEGIN TRANSACTION", ()).await?;
        let consumed =
            match core_access::consume_invite_on(&conn, &session.invite_code, &user.id).await {
                Ok(consumed) => consumed,
                Err(e) => {
                    conn.execute("ROLLBACK", ()).await?;
                    return Err(e.into());
                }
            };
        if !consumed {
            conn.execute("ROLLBACK", ()).await?;
            let reason = "invite exhausted or expired during finalization";
            self.fail_session(session, reason).await;
            return Err(SessionError::InviteInvalid(
                core_access::InviteError::Exhausted {
                    uses: invite.uses_count,
                    max: invite.max_uses,
                },
            ));
        }
        let now = Utc::now();
        let finalize_update = conn
            .execute(
                "UPDATE users SET is_authenticated = 1, \
                 display_name = COALESCE(?, display_name), \
                 api_id_encrypted = ?, api_hash_encrypted = ?, \
                 subscription_type = ?, subscription_started_at = ?, subscription_expires_at = ? \
                 WHERE id = ?",
                turso::params![
                    me.first_name.clone(),
                    api_id_enc,
                    api_hash_enc,
                    invite.tier.as_str().to_string(),
                    now.to_rfc3339(),
                    (now + chrono::Duration::days(invite.trial_days)).to_rfc3339(),
                    user.id.clone()
                ],
            )
            .await;
        if let Err(e) = finalize_update {
            conn.execute("ROLLBACK", ()).await?;
            return Err(e.into());
        }
        conn.execute("COMMIT", ()).await?;

        self.supervisor.register(me.id, client).await;

        session.status = QrSessionStatus::Finalized;
        self.store_session(&session).await?;

        info!(
            telegram_id = me.id,
            tier = %invite.tier,
            "QR login finalized"
        );

        let user = core_access::get_user_by_telegram_id(db, me.id)
            .await?
            .ok_or(SessionError::QrNotFound)?;
        Ok(user)
    }
}
