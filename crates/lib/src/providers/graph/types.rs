use indradb::{Datastore, MemoryDatastore, RocksdbDatastore, ValidationError};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("IndraDB error: {0}")]
    IndraDb(#[from] indradb::Error),
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Identifier validation error: {0}")]
    IdentifierValidation(#[from] ValidationError),
    #[error("Graph lock poisoned")]
    LockPoisoned,
    #[error("Required data was not found in the graph response")]
    NotFound,
}

/// The knowledge-graph mirror of the relational store: `User`, `Channel`,
/// `Post` and `Tag` nodes with `POSTED_IN`, `CONTAINS` and `HAS_TAG` edges.
/// Generic over the underlying datastore.
pub struct TagGraph<D: Datastore> {
    pub db: indradb::Database<D>,
    /// Cache of entity key → vertex id, to skip redundant vertex writes.
    pub entity_map: HashMap<String, Uuid>,
}

/// Type alias for an in-memory tag graph.
pub type MemoryTagGraph = TagGraph<MemoryDatastore>;
/// Type alias for a RocksDB-backed tag graph.
pub type RocksdbTagGraph = TagGraph<RocksdbDatastore>;
