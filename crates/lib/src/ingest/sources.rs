//! # Source Subscriptions
//!
//! Channel and group registration for a user, enforced against the tier
//! quotas at the point of addition.

use crate::ingest::IngestError;
use crate::providers::telegram::ChannelInfo;
use core_access::{CoreAccessError, User};
use turso::{params, Database};

async fn count_active(db: &Database, table: &str, user_id: &str) -> Result<i64, IngestError> {
    let conn = db.connect()?;
    let mut rows = conn
        .query(
            &format!("SELECT COUNT(*) FROM {table} WHERE user_id = ? AND is_active = 1"),
            params![user_id.to_string()],
        )
        .await?;
    match rows.next().await? {
        Some(row) => Ok(row.get(0)?),
        None => Ok(0),
    }
}

/// Subscribes a user to a channel, creating the channel row on first sight.
/// Re-subscribing an inactive pair re-activates it without resetting the
/// cursor.
pub async fn subscribe_channel(
    db: &Database,
    user: &User,
    channel: &ChannelInfo,
) -> Result<(), IngestError> {
    let limits = user.subscription_type.limits();
    let active = count_active(db, "user_channels", &user.id).await?;
    if active >= limits.max_channels {
        return Err(IngestError::Quota(CoreAccessError::QuotaExceeded {
            limit_name: "max_channels",
            used: active,
            allowed: limits.max_channels,
        }));
    }

    let conn = db.connect()?;
    conn.execute(
        "INSERT INTO channels (id, username, title) VALUES (?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET username = excluded.username, title = excluded.title",
        params![channel.id, channel.username.clone(), channel.title.clone()],
    )
    .await?;
    conn.execute(
        "INSERT INTO user_channels (user_id, channel_id) VALUES (?, ?)
         ON CONFLICT(user_id, channel_id) DO UPDATE SET is_active = 1",
        params![user.id.clone(), channel.id],
    )
    .await?;
    Ok(())
}

/// Unsubscribes (soft) a user from a channel.
pub async fn unsubscribe_channel(
    db: &Database,
    user_id: &str,
    channel_id: i64,
) -> Result<(), IngestError> {
    let conn = db.connect()?;
    conn.execute(
        "UPDATE user_channels SET is_active = 0 WHERE user_id = ? AND channel_id = ?",
        params![user_id.to_string(), channel_id],
    )
    .await?;
    Ok(())
}

/// Subscribes a user to a group for digests and mention analysis.
pub async fn subscribe_group(
    db: &Database,
    user: &User,
    group_id: i64,
    title: Option<&str>,
    mention_context_size: i64,
) -> Result<(), IngestError> {
    let limits = user.subscription_type.limits();
    let active = count_active(db, "user_groups", &user.id).await?;
    if active >= limits.max_groups {
        return Err(IngestError::Quota(CoreAccessError::QuotaExceeded {
            limit_name: "max_groups",
            used: active,
            allowed: limits.max_groups,
        }));
    }

    let conn = db.connect()?;
    conn.execute(
        "INSERT INTO chat_groups (id, title) VALUES (?, ?)
         ON CONFLICT(id) DO UPDATE SET title = excluded.title",
        params![group_id, title.map(String::from)],
    )
    .await?;
    conn.execute(
        "INSERT INTO user_groups (user_id, group_id, mention_context_size) VALUES (?, ?, ?)
         ON CONFLICT(user_id, group_id) DO UPDATE SET is_active = 1",
        params![user.id.clone(), group_id, mention_context_size],
    )
    .await?;
    Ok(())
}

/// The mention context window configured for a (user, group) pair.
pub async fn mention_context_size(
    db: &Database,
    user_id: &str,
    group_id: i64,
) -> Result<i64, IngestError> {
    let conn = db.connect()?;
    let mut rows = conn
        .query(
            "SELECT mention_context_size FROM user_groups
             WHERE user_id = ? AND group_id = ? AND is_active = 1",
            params![user_id.to_string(), group_id],
        )
        .await?;
    match rows.next().await? {
        Some(row) => Ok(row.get(0)?),
        None => Ok(crate::constants::MENTION_CONTEXT_DEFAULT),
    }
}
