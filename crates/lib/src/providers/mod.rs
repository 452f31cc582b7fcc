//! # Provider Seams
//!
//! Every external collaborator sits behind a trait in this module: LLM chat
//! and embedding providers, the relational store, the per-tenant vector
//! store, the knowledge graph, the TTL cache, and the Telegram client.
//! Concrete vendors are pluggable; the implementations shipped here are the
//! local-first ones the test suite and the reference deployment use.

pub mod ai;
pub mod cache;
pub mod db;
pub mod graph;
pub mod telegram;
pub mod vector;
