//! # Relational Schema
//!
//! Centralizes the DDL for the relational store. This makes the component
//! logic cleaner and isolates database-specific syntax. All statements are
//! idempotent and safe to run on every startup.
//!
//! Per-user vector collections (`posts_{user_id}` tables) are created
//! lazily by the vector provider and intentionally absent here.

/// All application tables and indexes, in dependency order.
pub const ALL_TABLE_CREATION_SQL: &[&str] = &[
    // Tenants. The primary key is a deterministic UUIDv5 of the Telegram id.
    "CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY NOT NULL,
        telegram_id INTEGER NOT NULL UNIQUE,
        display_name TEXT,
        role TEXT NOT NULL DEFAULT 'user',
        is_active INTEGER NOT NULL DEFAULT 1,
        is_authenticated INTEGER NOT NULL DEFAULT 0,
        subscription_type TEXT NOT NULL DEFAULT 'free',
        subscription_started_at TEXT,
        subscription_expires_at TEXT,
        retention_days INTEGER NOT NULL DEFAULT 90,
        api_id_encrypted TEXT,
        api_hash_encrypted TEXT,
        voice_queries_today INTEGER NOT NULL DEFAULT 0,
        voice_counter_reset_at TEXT,
        created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%S', 'now'))
    );",
    // Admin-issued login credentials.
    "CREATE TABLE IF NOT EXISTS invite_codes (
        code TEXT PRIMARY KEY NOT NULL,
        tier TEXT NOT NULL DEFAULT 'trial',
        trial_days INTEGER NOT NULL DEFAULT 14,
        max_uses INTEGER NOT NULL DEFAULT 1,
        uses_count INTEGER NOT NULL DEFAULT 0,
        expires_at TEXT,
        used_by TEXT REFERENCES users(id),
        created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%S', 'now'))
    );",
    // Broadcast sources, keyed by the stable external channel id.
    "CREATE TABLE IF NOT EXISTS channels (
        id INTEGER PRIMARY KEY NOT NULL,
        username TEXT NOT NULL,
        title TEXT,
        created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%S', 'now'))
    );",
    // Subscription join. `last_parsed_message_id` is the per-pair cursor.
    "CREATE TABLE IF NOT EXISTS user_channels (
        user_id TEXT NOT NULL REFERENCES users(id),
        channel_id INTEGER NOT NULL REFERENCES channels(id),
        is_active INTEGER NOT NULL DEFAULT 1,
        last_parsed_message_id INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%S', 'now')),
        PRIMARY KEY (user_id, channel_id)
    );",
    // Conversational sources.
    "CREATE TABLE IF NOT EXISTS chat_groups (
        id INTEGER PRIMARY KEY NOT NULL,
        username TEXT,
        title TEXT,
        created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%S', 'now'))
    );",
    "CREATE TABLE IF NOT EXISTS user_groups (
        user_id TEXT NOT NULL REFERENCES users(id),
        group_id INTEGER NOT NULL REFERENCES chat_groups(id),
        is_active INTEGER NOT NULL DEFAULT 1,
        mentions_enabled INTEGER NOT NULL DEFAULT 1,
        mention_context_size INTEGER NOT NULL DEFAULT 5,
        created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%S', 'now')),
        PRIMARY KEY (user_id, group_id)
    );",
    // Harvested messages. The UNIQUE constraint is what makes ingestion
    // idempotent; inserts rely on it to deduplicate.
    "CREATE TABLE IF NOT EXISTS posts (
        id INTEGER PRIMARY KEY,
        user_id TEXT NOT NULL REFERENCES users(id),
        channel_id INTEGER NOT NULL REFERENCES channels(id),
        external_message_id INTEGER NOT NULL,
        text TEXT NOT NULL,
        enriched_text TEXT,
        tags TEXT,
        tagging_status TEXT NOT NULL DEFAULT 'pending',
        tagging_attempts INTEGER NOT NULL DEFAULT 0,
        last_tagging_error TEXT,
        posted_at TEXT NOT NULL,
        parsed_at TEXT NOT NULL,
        UNIQUE (user_id, channel_id, external_message_id)
    );",
    "CREATE INDEX IF NOT EXISTS idx_posts_user_status
        ON posts (user_id, tagging_status);",
    "CREATE INDEX IF NOT EXISTS idx_posts_user_posted
        ON posts (user_id, posted_at);",
    // One row per (post, store); a post is indexed iff a success row exists.
    "CREATE TABLE IF NOT EXISTS indexing_status (
        post_id INTEGER NOT NULL REFERENCES posts(id),
        store TEXT NOT NULL,
        success INTEGER NOT NULL,
        error TEXT,
        indexed_at TEXT NOT NULL,
        UNIQUE (post_id, store)
    );",
    // Append-only query log for personalisation and evaluation.
    "CREATE TABLE IF NOT EXISTS rag_query_history (
        id INTEGER PRIMARY KEY,
        user_id TEXT NOT NULL REFERENCES users(id),
        query TEXT NOT NULL,
        topics TEXT,
        created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%S', 'now'))
    );",
];
