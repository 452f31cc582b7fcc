//! # Subscription Tiers
//!
//! Maps each subscription tier to its quota limits. Enforcement happens at
//! the call sites named in the service spec: channel/group registration, the
//! parse cycle, retrieval entry, and the voice handler.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// The recognised subscription tiers, in ascending order of entitlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTier {
    #[default]
    Free,
    Trial,
    Basic,
    Premium,
    Enterprise,
}

impl SubscriptionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionTier::Free => "free",
            SubscriptionTier::Trial => "trial",
            SubscriptionTier::Basic => "basic",
            SubscriptionTier::Premium => "premium",
            SubscriptionTier::Enterprise => "enterprise",
        }
    }

    /// The quota limits attached to this tier.
    pub fn limits(&self) -> TierLimits {
        match self {
            SubscriptionTier::Free => TierLimits {
                max_channels: 2,
                max_groups: 0,
                max_posts_per_day: 200,
                rag_queries_per_day: 10,
                voice_queries_per_day: 0,
                ai_digest: false,
                priority_parsing: false,
            },
            SubscriptionTier::Trial => TierLimits {
                max_channels: 10,
                max_groups: 3,
                max_posts_per_day: 1_000,
                rag_queries_per_day: 50,
                voice_queries_per_day: 10,
                ai_digest: true,
                priority_parsing: false,
            },
            SubscriptionTier::Basic => TierLimits {
                max_channels: 15,
                max_groups: 5,
                max_posts_per_day: 2_000,
                rag_queries_per_day: 100,
                voice_queries_per_day: 20,
                ai_digest: true,
                priority_parsing: false,
            },
            SubscriptionTier::Premium => TierLimits {
                max_channels: 50,
                max_groups: 20,
                max_posts_per_day: 10_000,
                rag_queries_per_day: 500,
                voice_queries_per_day: 100,
                ai_digest: true,
                priority_parsing: true,
            },
            SubscriptionTier::Enterprise => TierLimits {
                max_channels: 500,
                max_groups: 100,
                max_posts_per_day: 100_000,
                rag_queries_per_day: 5_000,
                voice_queries_per_day: 1_000,
                ai_digest: true,
                priority_parsing: true,
            },
        }
    }
}

impl FromStr for SubscriptionTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(SubscriptionTier::Free),
            "trial" => Ok(SubscriptionTier::Trial),
            "basic" => Ok(SubscriptionTier::Basic),
            "premium" => Ok(SubscriptionTier::Premium),
            "enterprise" => Ok(SubscriptionTier::Enterprise),
            other => Err(format!("unknown subscription tier '{other}'")),
        }
    }
}

impl std::fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The quota limits for a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierLimits {
    pub max_channels: i64,
    pub max_groups: i64,
    pub max_posts_per_day: i64,
    pub rag_queries_per_day: i64,
    pub voice_queries_per_day: i64,
    pub ai_digest: bool,
    pub priority_parsing: bool,
}
