//! # Feature Flags
//!
//! An immutable snapshot of feature rollout state, loaded at startup from
//! configuration. Each feature carries a master switch and a 0–100 rollout
//! percentage; per-user enablement hashes the user id stably, so a user's
//! experience never changes across calls or process restarts.

use serde::{Deserialize, Serialize};

/// Master switch plus percentage rollout for one feature.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FlagRollout {
    pub enabled: bool,
    /// 0–100. Values above 100 behave as 100.
    pub percentage: u8,
}

impl Default for FlagRollout {
    fn default() -> Self {
        Self {
            enabled: false,
            percentage: 0,
        }
    }
}

impl FlagRollout {
    pub fn new(enabled: bool, percentage: u8) -> Self {
        Self {
            enabled,
            percentage,
        }
    }

    /// Whether the feature is on for this user.
    ///
    /// Buckets the user with an md5 of `{flag_name}:{user_id}` so distinct
    /// flags roll out to independent user populations.
    pub fn is_enabled_for(&self, flag_name: &str, user_id: &str) -> bool {
        if !self.enabled {
            return false;
        }
        if self.percentage >= 100 {
            return true;
        }
        bucket_of(flag_name, user_id) < self.percentage as u64
    }
}

/// Stable 0–99 bucket for a (flag, user) pair.
fn bucket_of(flag_name: &str, user_id: &str) -> u64 {
    let digest = md5::compute(format!("{flag_name}:{user_id}"));
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest.0[..8]);
    u64::from_be_bytes(prefix) % 100
}

/// The feature-flag snapshot carried by the application context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureFlags {
    /// Hybrid search: graph-context re-ranking on top of vector search.
    pub hybrid_search: FlagRollout,
    /// Query expansion: graph-derived terms appended to the query.
    pub query_expansion: FlagRollout,
    /// Cap on expansion terms added to a query.
    pub query_expansion_max_terms: usize,
}

impl FeatureFlags {
    pub fn hybrid_search_for(&self, user_id: &str) -> bool {
        self.hybrid_search.is_enabled_for("hybrid_search", user_id)
    }

    pub fn query_expansion_for(&self, user_id: &str) -> bool {
        self.query_expansion
            .is_enabled_for("query_expansion", user_id)
    }
}
