//! # tgrag
//!
//! A multi-tenant Telegram ingestion and retrieval library. For each
//! authenticated user it maintains a personal Telegram session, harvests new
//! posts from subscribed channels, enriches them with AI-generated tags,
//! indexes them into per-user vector and graph stores, and answers questions
//! through a hybrid Retrieval-Augmented Generation pipeline.
//!
//! Vendor adapters (the MTProto client, the LLM and embedding providers, the
//! stores) sit behind the traits in [`providers`]; everything above them is
//! vendor-agnostic.

pub mod chunking;
pub mod constants;
pub mod digest;
pub mod errors;
pub mod flags;
pub mod html;
pub mod indexing;
pub mod ingest;
pub mod metrics;
pub mod prompts;
pub mod providers;
pub mod ratelimit;
pub mod rerank;
pub mod retention;
pub mod search;
pub mod session;
pub mod tagging;
pub mod types;
pub mod vault;

pub use errors::ProviderError;
pub use types::{PostsIngested, RagAnswer, SearchFilter, SearchHit, TaggingStatus};
