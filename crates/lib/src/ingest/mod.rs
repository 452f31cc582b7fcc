//! # Ingestion
//!
//! Pulls new messages from Telegram into the relational store. The
//! [`scheduler`] runs periodic per-user parse cycles with per-channel
//! cursors and constraint-based deduplication; [`sources`] manages
//! channel/group subscriptions under tier quotas; [`enrich`] extracts
//! readable web content from links found in posts.

pub mod enrich;
pub mod scheduler;
pub mod sources;

pub use scheduler::{IngestedBatch, ParsingScheduler};

use crate::session::SessionError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Database error: {0}")]
    Database(#[from] turso::Error),
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
    #[error("Quota exceeded: {0}")]
    Quota(#[from] core_access::CoreAccessError),
}
