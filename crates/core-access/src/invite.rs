//! # Invite Codes
//!
//! Admin-issued credentials that gate first login. An invite carries the
//! subscription tier and trial window it grants, an optional expiry, and a
//! bounded use counter. Validation and consumption are atomic: an expired or
//! exhausted code can never be consumed, even under concurrent finalization.

use crate::{parse_timestamp, subscription::SubscriptionTier, CoreAccessError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use turso::{params, Database, Row};

#[derive(Error, Debug)]
pub enum InviteError {
    #[error("Invite code not found")]
    NotFound,
    #[error("Invite code expired at {0}")]
    Expired(DateTime<Utc>),
    #[error("Invite code has no uses left ({uses}/{max})")]
    Exhausted { uses: i64, max: i64 },
    #[error(transparent)]
    Access(#[from] CoreAccessError),
    #[error("Database error: {0}")]
    Database(#[from] turso::Error),
}

/// An admin-issued invite code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InviteCode {
    pub code: String,
    pub tier: SubscriptionTier,
    pub trial_days: i64,
    pub max_uses: i64,
    pub uses_count: i64,
    pub expires_at: Option<DateTime<Utc>>,
    pub used_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<&Row> for InviteCode {
    type Error = CoreAccessError;

    fn try_from(row: &Row) -> Result<Self, Self::Error> {
        let tier_str: String = row.get(1)?;
        let tier = tier_str.parse().map_err(|_| {
            CoreAccessError::DataIntegrity(format!("Unknown tier '{tier_str}' on invite"))
        })?;
        let expires_at: Option<String> = row.get(5)?;
        let created_at: String = row.get(7)?;
        Ok(InviteCode {
            code: row.get(0)?,
            tier,
            trial_days: row.get(2)?,
            max_uses: row.get(3)?,
            uses_count: row.get(4)?,
            expires_at: expires_at.map(|s| parse_timestamp(&s)).transpose()?,
            used_by: row.get(6)?,
            created_at: parse_timestamp(&created_at)?,
        })
    }
}

const INVITE_COLUMNS: &str =
    "code, tier, trial_days, max_uses, uses_count, expires_at, used_by, created_at";

/// Mints a new invite code.
pub async fn create_invite(
    db: &Database,
    code: &str,
    tier: SubscriptionTier,
    trial_days: i64,
    max_uses: i64,
    expires_at: Option<DateTime<Utc>>,
) -> Result<InviteCode, InviteError> {
    let conn = db.connect()?;
    conn.execute(
        "INSERT INTO invite_codes (code, tier, trial_days, max_uses, expires_at) \
         VALUES (?, ?, ?, ?, ?)",
        params![
            code.to_string(),
            tier.as_str().to_string(),
            trial_days,
            max_uses,
            expires_at.map(|dt| dt.to_rfc3339())
        ],
    )
    .await?;
    validate_invite(db, code).await
}

/// Loads an invite and checks it is currently redeemable.
///
/// Fails with `NotFound`, `Expired`, or `Exhausted`. Note that a successful
/// validation is only advisory under concurrency; `consume_invite` re-checks
/// the same conditions atomically.
pub async fn validate_invite(db: &Database, code: &str) -> Result<InviteCode, InviteError> {
    let conn = db.connect()?;
    let mut rows = conn
        .query(
            &format!("SELECT {INVITE_COLUMNS} FROM invite_codes WHERE code = ?"),
            params![code.to_string()],
        )
        .await?;
    let row = rows.next().await?.ok_or(InviteError::NotFound)?;
    let invite = InviteCode::try_from(&row)?;

    if let Some(expires) = invite.expires_at {
        if expires <= Utc::now() {
            return Err(InviteError::Expired(expires));
        }
    }
    if invite.uses_count >= invite.max_uses {
        return Err(InviteError::Exhausted {
            uses: invite.uses_count,
            max: invite.max_uses,
        });
    }
    Ok(invite)
}

/// Consumes one use of an invite on behalf of `user_id`.
///
/// The guard conditions live in the UPDATE itself, so consumption is atomic:
/// the counter can never exceed `max_uses` and an expired code is rejected
/// even if it validated moments earlier. `used_by` records the first
/// consumer of the code.
pub async fn consume_invite(db: &Database, code: &str, user_id: &str) -> Result<(), InviteError> {
    let conn = db.connect()?;
    if consume_invite_on(&conn, code, user_id).await? {
        return Ok(());
    }
    // Distinguish the failure for the caller.
    match validate_invite(db, code).await {
        Ok(_) => Err(InviteError::NotFound),
        Err(e) => Err(e),
    }
}

/// Connection-scoped consumption, for callers that enclose it in a larger
/// transaction (the QR finalization path). Returns whether a use was taken.
pub async fn consume_invite_on(
    conn: &turso::Connection,
    code: &str,
    user_id: &str,
) -> Result<bool, InviteError> {
    let now = Utc::now().to_rfc3339();
    let affected = conn
        .execute(
            "UPDATE invite_codes SET uses_count = uses_count + 1, \
             used_by = COALESCE(used_by, ?) \
             WHERE code = ? AND uses_count < max_uses \
             AND (expires_at IS NULL OR expires_at > ?)",
            params![user_id.to_string(), code.to_string(), now],
        )
        .await?;
    Ok(affected > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::get_or_create_user;
    use chrono::Duration;
    use tgrag::providers::db::sqlite::SqliteProvider;

    async fn setup() -> Database {
        let provider = SqliteProvider::new(":memory:").await.unwrap();
        provider.initialize_schema().await.unwrap();
        provider.db
    }

    #[tokio::test]
    async fn test_validate_and_consume_single_use() {
        let db = setup().await;
        let user = get_or_create_user(&db, 12345, None).await.unwrap();

        create_invite(&db, "WELCOME", SubscriptionTier::Premium, 14, 1, None)
            .await
            .unwrap();

        let invite = validate_invite(&db, "WELCOME").await.unwrap();
        assert_eq!(invite.tier, SubscriptionTier::Premium);
        assert_eq!(invite.uses_count, 0);

        consume_invite(&db, "WELCOME", &user.id).await.unwrap();

        // A second consumption must fail atomically.
        let err = consume_invite(&db, "WELCOME", &user.id).await.unwrap_err();
        assert!(matches!(err, InviteError::Exhausted { uses: 1, max: 1 }));

        // used_by points at the first consumer and the counter is bounded.
        let conn = db.connect().unwrap();
        let mut rows = conn
            .query(
                "SELECT uses_count, max_uses, used_by FROM invite_codes WHERE code = ?",
                params!["WELCOME".to_string()],
            )
            .await
            .unwrap();
        let row = rows.next().await.unwrap().unwrap();
        assert_eq!(row.get::<i64>(0).unwrap(), 1);
        assert!(row.get::<i64>(0).unwrap() <= row.get::<i64>(1).unwrap());
        assert_eq!(row.get::<Option<String>>(2).unwrap(), Some(user.id));
    }

    #[tokio::test]
    async fn test_expired_invite_rejected() {
        let db = setup().await;
        let past = Utc::now() - Duration::hours(1);
        create_invite(&db, "STALE", SubscriptionTier::Basic, 7, 5, Some(past))
            .await
            .err()
            .map(|e| assert!(matches!(e, InviteError::Expired(_))))
            .expect("creation should validate and report expiry");

        let err = validate_invite(&db, "STALE").await.unwrap_err();
        assert!(matches!(err, InviteError::Expired(_)));

        let err = consume_invite(&db, "STALE", "someone").await.unwrap_err();
        assert!(matches!(err, InviteError::Expired(_)));
    }

    #[tokio::test]
    async fn test_unknown_invite() {
        let db = setup().await;
        let err = validate_invite(&db, "NOPE").await.unwrap_err();
        assert!(matches!(err, InviteError::NotFound));
    }
}
