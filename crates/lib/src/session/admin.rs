//! # Admin Sessions
//!
//! Short-lived admin tokens in the cache under `admin_session:{uuid}`,
//! TTL one hour. The namespace is disjoint from QR sessions by
//! construction of the key prefix.

use crate::constants::{ADMIN_SESSION_PREFIX, ADMIN_SESSION_TTL_SECS};
use crate::providers::cache::Cache;
use crate::session::SessionError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AdminSessionRecord {
    admin_telegram_id: i64,
    expires_at: DateTime<Utc>,
}

/// Issues and validates admin session tokens.
#[derive(Clone)]
pub struct AdminSessions {
    cache: Arc<dyn Cache>,
}

impl AdminSessions {
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self { cache }
    }

    fn key(token: &str) -> String {
        format!("{ADMIN_SESSION_PREFIX}{token}")
    }

    /// Creates a session for an admin and returns the bearer token.
    pub async fn create(&self, admin_telegram_id: i64) -> Result<String, SessionError> {
        let token = Uuid::new_v4().to_string();
        let record = AdminSessionRecord {
            admin_telegram_id,
            expires_at: Utc::now() + chrono::Duration::seconds(ADMIN_SESSION_TTL_SECS as i64),
        };
        let payload = serde_json::to_string(&record)
            .map_err(|e| SessionError::Transient(format!("admin session serialization: {e}")))?;
        self.cache
            .set_with_ttl(
                &Self::key(&token),
                payload,
                Duration::from_secs(ADMIN_SESSION_TTL_SECS),
            )
            .await?;
        Ok(token)
    }

    /// Returns the admin's Telegram id when the token is valid.
    pub async fn validate(&self, token: &str) -> Result<Option<i64>, SessionError> {
        let Some(raw) = self.cache.get(&Self::key(token)).await? else {
            return Ok(None);
        };
        let record: AdminSessionRecord = serde_json::from_str(&raw)
            .map_err(|e| SessionError::Transient(format!("admin session deserialization: {e}")))?;
        if record.expires_at <= Utc::now() {
            return Ok(None);
        }
        Ok(Some(record.admin_telegram_id))
    }

    /// Drops a session token.
    pub async fn revoke(&self, token: &str) -> Result<(), SessionError> {
        self.cache.delete(&Self::key(token)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::cache::MemoryCache;

    #[tokio::test]
    async fn create_validate_revoke() {
        let sessions = AdminSessions::new(Arc::new(MemoryCache::new()));
        let token = sessions.create(42).await.unwrap();

        assert_eq!(sessions.validate(&token).await.unwrap(), Some(42));

        sessions.revoke(&token).await.unwrap();
        assert_eq!(sessions.validate(&token).await.unwrap(), None);
    }

    #[tokio::test]
    async fn unknown_token_is_invalid() {
        let sessions = AdminSessions::new(Arc::new(MemoryCache::new()));
        assert_eq!(sessions.validate("nope").await.unwrap(), None);
    }
}
