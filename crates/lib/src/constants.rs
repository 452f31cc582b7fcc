//! # Shared Constants
//!
//! Centralized names and sizing defaults shared across the `tgrag`
//! workspace. Persisted-state naming (collection names, point ids, cache key
//! prefixes) lives here so every store partitions tenants identically.

/// Cache key prefix for transient QR login sessions (TTL ≤ 5 minutes).
pub const QR_SESSION_PREFIX: &str = "qr_session:";

/// Cache key prefix for admin sessions (TTL 1 hour). Disjoint from QR keys.
pub const ADMIN_SESSION_PREFIX: &str = "admin_session:";

/// Cache key prefix for rate-limiter state, keyed by upstream name.
pub const RATE_PREFIX: &str = "rate:";

/// QR login session validity window, in seconds.
pub const QR_SESSION_TTL_SECS: u64 = 300;

/// Admin session validity window, in seconds.
pub const ADMIN_SESSION_TTL_SECS: u64 = 3_600;

/// Target chunk size for indexing, in approximate tokens.
pub const CHUNK_TARGET_TOKENS: usize = 500;

/// Overlap carried between adjacent chunks, in approximate tokens.
pub const CHUNK_OVERLAP_TOKENS: usize = 50;

/// Embedding dimension of the reference configuration. The actual dimension
/// is recorded per user collection on first use and immutable afterwards.
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 1024;

/// Upper bound on tags a single post may carry.
pub const MAX_TAGS_PER_POST: usize = 15;

/// Tagging attempts before the sweeper leaves a post alone.
pub const TAGGING_MAX_ATTEMPTS: i64 = 3;

/// Per-channel message cap for one parse cycle.
pub const PARSE_BATCH_LIMIT: usize = 100;

/// Default number of surrounding messages for mention analysis.
pub const MENTION_CONTEXT_DEFAULT: i64 = 5;

/// Returns the per-user vector collection name.
///
/// Dashes in the UUID are flattened so the name stays a plain identifier in
/// every backing store.
pub fn collection_name(user_id: &str) -> String {
    format!("posts_{}", user_id.replace('-', ""))
}

/// Returns the stable point id for a chunk of a post.
pub fn chunk_point_id(post_id: i64, chunk_index: usize) -> String {
    format!("post_{post_id}_chunk_{chunk_index}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_name_is_identifier_safe() {
        let name = collection_name("3b241101-e2bb-4255-8caf-4136c566a962");
        assert_eq!(name, "posts_3b241101e2bb42558caf4136c566a962");
        assert!(name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
    }

    #[test]
    fn chunk_ids_are_stable() {
        assert_eq!(chunk_point_id(42, 0), "post_42_chunk_0");
        assert_eq!(chunk_point_id(42, 3), "post_42_chunk_3");
    }
}
