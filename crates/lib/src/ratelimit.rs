//! # Upstream Rate Limiting
//!
//! Process-wide leaky-bucket limiters keyed by upstream name. Acquisition is
//! cooperative: callers await their turn, and a configurable acquisition
//! timeout surfaces as [`ProviderError::RateLimited`] instead of blocking a
//! pipeline forever.
//!
//! The reference configuration runs the primary LLM and the embedding
//! provider at one request per second each.

use crate::constants::RATE_PREFIX;
use crate::errors::ProviderError;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

/// A single leaky bucket: `max_rate` grants per `period`, evenly spaced.
#[derive(Debug)]
pub struct LeakyBucket {
    name: String,
    spacing: Duration,
    acquire_timeout: Duration,
    next_free: Mutex<Option<Instant>>,
}

impl LeakyBucket {
    /// Creates a bucket granting `max_rate` tokens per `period`.
    pub fn new(name: &str, max_rate: u32, period: Duration, acquire_timeout: Duration) -> Self {
        let spacing = period / max_rate.max(1);
        Self {
            name: format!("{RATE_PREFIX}{name}"),
            spacing,
            acquire_timeout,
            next_free: Mutex::new(None),
        }
    }

    /// Waits for a token. Returns `RateLimited` when the projected wait
    /// exceeds the acquisition timeout.
    pub async fn acquire(&self) -> Result<(), ProviderError> {
        let wait = {
            let mut next_free = self.next_free.lock().await;
            let now = Instant::now();
            let free_at = next_free.unwrap_or(now).max(now);
            let wait = free_at - now;
            if wait > self.acquire_timeout {
                warn!(
                    upstream = %self.name,
                    wait_ms = wait.as_millis() as u64,
                    "rate limiter acquisition timed out"
                );
                return Err(ProviderError::RateLimited(format!(
                    "{} busy for another {}ms",
                    self.name,
                    wait.as_millis()
                )));
            }
            *next_free = Some(free_at + self.spacing);
            wait
        };

        if !wait.is_zero() {
            debug!(upstream = %self.name, wait_ms = wait.as_millis() as u64, "waiting for rate limiter");
            tokio::time::sleep(wait).await;
        }
        Ok(())
    }
}

/// Per-upstream limiter settings.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub max_rate: u32,
    pub period: Duration,
    pub acquire_timeout: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_rate: 1,
            period: Duration::from_secs(1),
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

/// Registry of buckets keyed by upstream name. Buckets are created lazily
/// with the default configuration unless one was registered explicitly.
#[derive(Debug, Default)]
pub struct RateLimiterRegistry {
    configs: std::sync::Mutex<HashMap<String, RateLimitConfig>>,
    buckets: std::sync::Mutex<HashMap<String, Arc<LeakyBucket>>>,
}

impl RateLimiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers explicit settings for an upstream. Must be called before
    /// the first `acquire` for that upstream to take effect.
    pub fn configure(&self, upstream: &str, config: RateLimitConfig) {
        self.configs
            .lock()
            .expect("rate limiter config lock poisoned")
            .insert(upstream.to_string(), config);
    }

    /// Returns the bucket for an upstream, creating it on first use.
    pub fn bucket(&self, upstream: &str) -> Arc<LeakyBucket> {
        let mut buckets = self
            .buckets
            .lock()
            .expect("rate limiter bucket lock poisoned");
        if let Some(bucket) = buckets.get(upstream) {
            return Arc::clone(bucket);
        }
        let config = self
            .configs
            .lock()
            .expect("rate limiter config lock poisoned")
            .get(upstream)
            .copied()
            .unwrap_or_default();
        let bucket = Arc::new(LeakyBucket::new(
            upstream,
            config.max_rate,
            config.period,
            config.acquire_timeout,
        ));
        buckets.insert(upstream.to_string(), Arc::clone(&bucket));
        bucket
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn grants_are_spaced() {
        let bucket = LeakyBucket::new(
            "llm",
            1,
            Duration::from_secs(1),
            Duration::from_secs(30),
        );

        let start = Instant::now();
        bucket.acquire().await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);

        bucket.acquire().await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(1));

        bucket.acquire().await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn acquisition_timeout_surfaces_rate_limited() {
        let bucket = LeakyBucket::new(
            "llm",
            1,
            Duration::from_secs(10),
            Duration::from_secs(5),
        );

        bucket.acquire().await.unwrap();
        // The next slot is 10s away but we only tolerate 5s.
        let err = bucket.acquire().await.unwrap_err();
        assert!(matches!(err, ProviderError::RateLimited(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn registry_reuses_buckets() {
        let registry = RateLimiterRegistry::new();
        registry.configure(
            "embedding",
            RateLimitConfig {
                max_rate: 2,
                period: Duration::from_secs(1),
                acquire_timeout: Duration::from_secs(30),
            },
        );

        let a = registry.bucket("embedding");
        let b = registry.bucket("embedding");
        assert!(Arc::ptr_eq(&a, &b));

        let start = Instant::now();
        a.acquire().await.unwrap();
        b.acquire().await.unwrap();
        b.acquire().await.unwrap();
        // Two grants per second: third grant lands at the 1s boundary.
        assert!(start.elapsed() >= Duration::from_millis(1000));
    }
}
