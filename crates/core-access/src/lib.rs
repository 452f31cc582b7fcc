//! # Core Access Crate
//!
//! This crate is the central authority for tenant identity and entitlements:
//! user accounts keyed by Telegram id, admin-issued invite codes, and
//! subscription tiers with their quota limits.

pub mod invite;
pub mod subscription;

pub use invite::{
    consume_invite, consume_invite_on, create_invite, validate_invite, InviteCode, InviteError,
};
pub use subscription::{SubscriptionTier, TierLimits};

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use turso::{params, Database, Error as TursoError, Row};
use uuid::Uuid;

/// The default retention policy, in days, written when a user row is created.
pub const DEFAULT_RETENTION_DAYS: i64 = 90;

#[derive(Error, Debug)]
pub enum CoreAccessError {
    #[error("Database error: {0}")]
    Database(#[from] TursoError),
    #[error("Failed to create or find user for telegram id: {0}")]
    UserPersistenceFailed(i64),
    #[error("User not found: {0}")]
    UserNotFound(String),
    #[error("Data integrity error: {0}")]
    DataIntegrity(String),
    #[error("Daily quota exceeded for {limit_name}: {used}/{allowed}")]
    QuotaExceeded {
        limit_name: &'static str,
        used: i64,
        allowed: i64,
    },
}

/// Represents a tenant in the system.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct User {
    /// The unique, deterministic ID of the user (UUIDv5 from the Telegram id).
    pub id: String,
    /// The user's Telegram id. Unique across tenants.
    pub telegram_id: i64,
    /// Display name as reported by Telegram.
    pub display_name: Option<String>,
    /// The user's role (`user` or `admin`).
    pub role: String,
    /// Soft-delete flag. Inactive users are skipped by all background jobs.
    pub is_active: bool,
    /// Set once the QR login flow has been finalized.
    pub is_authenticated: bool,
    /// The current subscription tier.
    pub subscription_type: SubscriptionTier,
    pub subscription_started_at: Option<DateTime<Utc>>,
    pub subscription_expires_at: Option<DateTime<Utc>>,
    /// Per-user retention policy in days. Enforced by the retention job.
    pub retention_days: i64,
    /// Telegram API credentials, encrypted at rest by the vault.
    pub api_id_encrypted: Option<String>,
    pub api_hash_encrypted: Option<String>,
    /// Voice query accounting for the current day.
    pub voice_queries_today: i64,
    pub voice_counter_reset_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Derives the deterministic user id for a Telegram id.
pub fn user_id_for_telegram_id(telegram_id: i64) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, telegram_id.to_string().as_bytes()).to_string()
}

/// Parses a stored timestamp, accepting both RFC 3339 (written by the app)
/// and SQLite's `CURRENT_TIMESTAMP` format (written by column defaults).
pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, CoreAccessError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .map(|ndt| DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc))
        .map_err(|e| CoreAccessError::DataIntegrity(format!("Failed to parse date '{raw}': {e}")))
}

fn opt_timestamp(raw: Option<String>) -> Result<Option<DateTime<Utc>>, CoreAccessError> {
    raw.map(|s| parse_timestamp(&s)).transpose()
}

impl TryFrom<&Row> for User {
    type Error = CoreAccessError;

    fn try_from(row: &Row) -> std::result::Result<Self, Self::Error> {
        let subscription_type: String = row.get(6)?;
        let tier = subscription_type.parse().map_err(|_| {
            CoreAccessError::DataIntegrity(format!(
                "Unknown subscription tier '{subscription_type}'"
            ))
        })?;
        let created_at_str: String = row.get(14)?;

        Ok(User {
            id: row.get(0)?,
            telegram_id: row.get(1)?,
            display_name: row.get(2)?,
            role: row.get(3)?,
            is_active: row.get::<i64>(4)? != 0,
            is_authenticated: row.get::<i64>(5)? != 0,
            subscription_type: tier,
            subscription_started_at: opt_timestamp(row.get(7)?)?,
            subscription_expires_at: opt_timestamp(row.get(8)?)?,
            retention_days: row.get(9)?,
            api_id_encrypted: row.get(10)?,
            api_hash_encrypted: row.get(11)?,
            voice_queries_today: row.get(12)?,
            voice_counter_reset_at: opt_timestamp(row.get(13)?)?,
            created_at: parse_timestamp(&created_at_str)?,
        })
    }
}

const USER_COLUMNS: &str = "id, telegram_id, display_name, role, is_active, is_authenticated, \
     subscription_type, subscription_started_at, subscription_expires_at, retention_days, \
     api_id_encrypted, api_hash_encrypted, voice_queries_today, voice_counter_reset_at, created_at";

/// Finds a user by Telegram id, creating the row if it does not exist.
///
/// The primary key is a deterministic UUIDv5 of the Telegram id, so repeated
/// calls for the same id are idempotent. New users start unauthenticated on
/// the `free` tier with the default retention policy.
pub async fn get_or_create_user(
    db: &Database,
    telegram_id: i64,
    display_name: Option<&str>,
) -> Result<User, CoreAccessError> {
    let conn = db.connect()?;
    let user_id = user_id_for_telegram_id(telegram_id);

    let mut rows = conn
        .query(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"),
            params![user_id.clone()],
        )
        .await?;

    if let Some(row) = rows.next().await? {
        return User::try_from(&row);
    }

    conn.execute(
        "INSERT INTO users (id, telegram_id, display_name, retention_days) VALUES (?, ?, ?, ?)",
        params![
            user_id.clone(),
            telegram_id,
            display_name.map(String::from),
            DEFAULT_RETENTION_DAYS
        ],
    )
    .await?;

    let mut rows = conn
        .query(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"),
            params![user_id],
        )
        .await?;

    let row = rows
        .next()
        .await?
        .ok_or(CoreAccessError::UserPersistenceFailed(telegram_id))?;

    User::try_from(&row)
}

/// Looks up a user by Telegram id without creating one.
pub async fn get_user_by_telegram_id(
    db: &Database,
    telegram_id: i64,
) -> Result<Option<User>, CoreAccessError> {
    let conn = db.connect()?;
    let mut rows = conn
        .query(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE telegram_id = ?"),
            params![telegram_id],
        )
        .await?;
    match rows.next().await? {
        Some(row) => Ok(Some(User::try_from(&row)?)),
        None => Ok(None),
    }
}

/// Looks up a user by internal id.
pub async fn get_user(db: &Database, user_id: &str) -> Result<Option<User>, CoreAccessError> {
    let conn = db.connect()?;
    let mut rows = conn
        .query(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"),
            params![user_id.to_string()],
        )
        .await?;
    match rows.next().await? {
        Some(row) => Ok(Some(User::try_from(&row)?)),
        None => Ok(None),
    }
}

/// Returns all active, authenticated users. This is the tenant set that the
/// parse cycle and the retention job iterate over.
pub async fn list_active_users(db: &Database) -> Result<Vec<User>, CoreAccessError> {
    let conn = db.connect()?;
    let mut rows = conn
        .query(
            &format!(
                "SELECT {USER_COLUMNS} FROM users \
                 WHERE is_active = 1 AND is_authenticated = 1 ORDER BY telegram_id"
            ),
            (),
        )
        .await?;
    let mut users = Vec::new();
    while let Some(row) = rows.next().await? {
        users.push(User::try_from(&row)?);
    }
    Ok(users)
}

/// Marks a user as authenticated and stores their encrypted API credentials.
pub async fn mark_authenticated(
    db: &Database,
    user_id: &str,
    display_name: Option<&str>,
    api_id_encrypted: &str,
    api_hash_encrypted: &str,
) -> Result<(), CoreAccessError> {
    let conn = db.connect()?;
    conn.execute(
        "UPDATE users SET is_authenticated = 1, \
         display_name = COALESCE(?, display_name), \
         api_id_encrypted = ?, api_hash_encrypted = ? WHERE id = ?",
        params![
            display_name.map(String::from),
            api_id_encrypted.to_string(),
            api_hash_encrypted.to_string(),
            user_id.to_string()
        ],
    )
    .await?;
    Ok(())
}

/// Applies a subscription tier with a trial window starting now.
pub async fn apply_subscription(
    db: &Database,
    user_id: &str,
    tier: SubscriptionTier,
    trial_days: i64,
) -> Result<(), CoreAccessError> {
    let conn = db.connect()?;
    let now = Utc::now();
    let expires = now + Duration::days(trial_days);
    conn.execute(
        "UPDATE users SET subscription_type = ?, subscription_started_at = ?, \
         subscription_expires_at = ? WHERE id = ?",
        params![
            tier.as_str().to_string(),
            now.to_rfc3339(),
            expires.to_rfc3339(),
            user_id.to_string()
        ],
    )
    .await?;
    Ok(())
}

/// Soft-disables (or re-enables) a user. Users are never hard-deleted.
pub async fn set_active(db: &Database, user_id: &str, active: bool) -> Result<(), CoreAccessError> {
    let conn = db.connect()?;
    conn.execute(
        "UPDATE users SET is_active = ? WHERE id = ?",
        params![active as i64, user_id.to_string()],
    )
    .await?;
    Ok(())
}

/// Updates a user's retention policy. The value is clamped to at least 1 day.
pub async fn set_retention_days(
    db: &Database,
    user_id: &str,
    days: i64,
) -> Result<(), CoreAccessError> {
    let conn = db.connect()?;
    conn.execute(
        "UPDATE users SET retention_days = ? WHERE id = ?",
        params![days.max(1), user_id.to_string()],
    )
    .await?;
    Ok(())
}

/// Accounts for one voice query against the user's daily quota.
///
/// The counter resets when the stored reset marker falls on an earlier UTC
/// day than today. Returns the updated count, or `QuotaExceeded` when the
/// tier's daily allowance is already spent.
pub async fn record_voice_query(db: &Database, user: &User) -> Result<i64, CoreAccessError> {
    let limits = user.subscription_type.limits();
    let now = Utc::now();
    let counter_is_stale = user
        .voice_counter_reset_at
        .map(|reset| reset.date_naive() < now.date_naive())
        .unwrap_or(true);
    let used = if counter_is_stale {
        0
    } else {
        user.voice_queries_today
    };

    if used >= limits.voice_queries_per_day {
        return Err(CoreAccessError::QuotaExceeded {
            limit_name: "voice_queries_per_day",
            used,
            allowed: limits.voice_queries_per_day,
        });
    }

    let conn = db.connect()?;
    conn.execute(
        "UPDATE users SET voice_queries_today = ?, voice_counter_reset_at = ? WHERE id = ?",
        params![used + 1, now.to_rfc3339(), user.id.clone()],
    )
    .await?;
    Ok(used + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tgrag::providers::db::sqlite::SqliteProvider;

    async fn setup() -> Database {
        let provider = SqliteProvider::new(":memory:").await.unwrap();
        provider.initialize_schema().await.unwrap();
        provider.db
    }

    #[tokio::test]
    async fn test_get_or_create_user_is_idempotent() {
        let db = setup().await;

        let user1 = get_or_create_user(&db, 12345, Some("Alice")).await.unwrap();
        assert_eq!(user1.telegram_id, 12345);
        assert_eq!(user1.id, user_id_for_telegram_id(12345));
        assert!(!user1.is_authenticated);
        assert_eq!(user1.subscription_type, SubscriptionTier::Free);
        assert_eq!(user1.retention_days, DEFAULT_RETENTION_DAYS);

        let user2 = get_or_create_user(&db, 12345, Some("Alice")).await.unwrap();
        assert_eq!(user1.id, user2.id);
        assert_eq!(user1.created_at.timestamp(), user2.created_at.timestamp());
    }

    #[tokio::test]
    async fn test_mark_authenticated_stores_credentials() {
        let db = setup().await;
        let user = get_or_create_user(&db, 777, None).await.unwrap();

        mark_authenticated(&db, &user.id, Some("Bob"), "enc-id", "enc-hash")
            .await
            .unwrap();

        let reloaded = get_user(&db, &user.id).await.unwrap().unwrap();
        assert!(reloaded.is_authenticated);
        assert_eq!(reloaded.display_name.as_deref(), Some("Bob"));
        assert_eq!(reloaded.api_id_encrypted.as_deref(), Some("enc-id"));
        assert_eq!(reloaded.api_hash_encrypted.as_deref(), Some("enc-hash"));
    }

    #[tokio::test]
    async fn test_apply_subscription_sets_window() {
        let db = setup().await;
        let user = get_or_create_user(&db, 1, None).await.unwrap();

        apply_subscription(&db, &user.id, SubscriptionTier::Premium, 14)
            .await
            .unwrap();

        let reloaded = get_user(&db, &user.id).await.unwrap().unwrap();
        assert_eq!(reloaded.subscription_type, SubscriptionTier::Premium);
        let started = reloaded.subscription_started_at.unwrap();
        let expires = reloaded.subscription_expires_at.unwrap();
        assert_eq!((expires - started).num_days(), 14);
    }

    #[tokio::test]
    async fn test_list_active_users_filters_unauthenticated() {
        let db = setup().await;
        let a = get_or_create_user(&db, 1, None).await.unwrap();
        let b = get_or_create_user(&db, 2, None).await.unwrap();
        get_or_create_user(&db, 3, None).await.unwrap();

        mark_authenticated(&db, &a.id, None, "x", "y").await.unwrap();
        mark_authenticated(&db, &b.id, None, "x", "y").await.unwrap();
        set_active(&db, &b.id, false).await.unwrap();

        let active = list_active_users(&db).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, a.id);
    }

    #[tokio::test]
    async fn test_voice_quota_enforced() {
        let db = setup().await;
        let user = get_or_create_user(&db, 9, None).await.unwrap();
        // Free tier allows zero voice queries.
        let err = record_voice_query(&db, &user).await.unwrap_err();
        assert!(matches!(
            err,
            CoreAccessError::QuotaExceeded {
                limit_name: "voice_queries_per_day",
                ..
            }
        ));

        apply_subscription(&db, &user.id, SubscriptionTier::Premium, 30)
            .await
            .unwrap();
        let user = get_user(&db, &user.id).await.unwrap().unwrap();
        let count = record_voice_query(&db, &user).await.unwrap();
        assert_eq!(count, 1);
    }
}
