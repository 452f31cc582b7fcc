//! # TTL Cache
//!
//! Key/value storage with per-entry expiry for transient session state: QR
//! login sessions under `qr_session:` and admin sessions under
//! `admin_session:`. The two namespaces are never commingled.
//!
//! The shipped implementation is in-process; a Redis-backed one slots in
//! behind the same trait.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::Debug;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::Instant;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache backend unavailable: {0}")]
    Unavailable(String),
    #[error("Cached value failed to deserialize: {0}")]
    Deserialize(#[from] serde_json::Error),
}

/// The capability contract for the session cache.
#[async_trait]
pub trait Cache: Send + Sync + Debug {
    /// Stores a value under `key` for `ttl`. Overwrites an existing entry
    /// and resets its expiry.
    async fn set_with_ttl(&self, key: &str, value: String, ttl: Duration)
        -> Result<(), CacheError>;

    /// Returns the value if present and not expired.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Removes the entry, if any.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Instant,
}

/// In-process [`Cache`] with lazy expiry: stale entries are dropped on read
/// and swept opportunistically on writes.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn set_with_ttl(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        entries.retain(|_, entry| entry.expires_at > now);
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if entry.expires_at > Instant::now() => {
                    return Ok(Some(entry.value.clone()))
                }
                Some(_) => {}
                None => return Ok(None),
            }
        }
        // Entry exists but expired: drop it.
        self.entries.write().await.remove(key);
        Ok(None)
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}
