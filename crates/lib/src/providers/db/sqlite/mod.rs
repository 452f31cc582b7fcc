//! # Relational Store Provider
//!
//! A provider for the relational store backed by Turso (SQLite). The
//! `Database` handle manages a connection pool; components take short-lived
//! connections per operation or batch. When cloned, it shares the same
//! underlying database, allowing concurrent access to the same file or
//! in-memory instance.

pub mod sql;

use crate::errors::ProviderError;
use std::fmt::{self, Debug};
use turso::Database;

#[derive(Clone)]
pub struct SqliteProvider {
    /// The Turso database instance. Cloneable and thread-safe.
    pub db: Database,
}

impl SqliteProvider {
    /// Creates a new `SqliteProvider` from a file path or in-memory.
    ///
    /// # Arguments
    ///
    /// * `db_path`: The path to the SQLite database file. Use ":memory:" for
    ///   a unique, isolated in-memory database. To share an in-memory
    ///   database across components (e.g., in tests), create one provider
    ///   and then `.clone()` it.
    pub async fn new(db_path: &str) -> Result<Self, ProviderError> {
        let db = turso::Builder::new_local(db_path)
            .build()
            .await
            .map_err(|e| ProviderError::StorageConnection(e.to_string()))?;

        // Enable WAL mode for better concurrency. No effect on in-memory
        // databases but safe to run.
        let conn = db
            .connect()
            .map_err(|e| ProviderError::StorageConnection(e.to_string()))?;
        conn.query("PRAGMA journal_mode=WAL;", ())
            .await
            .map_err(|e| ProviderError::StorageConnection(e.to_string()))?;

        Ok(Self { db })
    }

    /// Ensures that all required application tables and indexes exist.
    /// Idempotent and safe to call on every application startup.
    pub async fn initialize_schema(&self) -> Result<(), ProviderError> {
        let conn = self
            .db
            .connect()
            .map_err(|e| ProviderError::StorageConnection(e.to_string()))?;

        for statement in sql::ALL_TABLE_CREATION_SQL {
            conn.execute(statement, ())
                .await
                .map_err(|e| ProviderError::StorageOperationFailed(e.to_string()))?;
        }
        Ok(())
    }

    /// A helper for tests to pre-populate data by executing multiple SQL
    /// statements.
    pub async fn initialize_with_data(&self, init_sql: &str) -> Result<(), ProviderError> {
        let conn = self
            .db
            .connect()
            .map_err(|e| ProviderError::StorageConnection(e.to_string()))?;

        for statement in init_sql.split(';').filter(|s| !s.trim().is_empty()) {
            conn.execute(statement, ())
                .await
                .map_err(|e| ProviderError::StorageOperationFailed(e.to_string()))?;
        }
        Ok(())
    }
}

impl Debug for SqliteProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteProvider").finish_non_exhaustive()
    }
}

impl AsRef<Database> for SqliteProvider {
    fn as_ref(&self) -> &Database {
        &self.db
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn schema_initialization_is_idempotent() {
        let provider = SqliteProvider::new(":memory:").await.unwrap();
        provider.initialize_schema().await.unwrap();
        provider.initialize_schema().await.unwrap();

        let conn = provider.db.connect().unwrap();
        let mut rows = conn
            .query(
                "SELECT name FROM sqlite_master WHERE type='table' AND name='posts'",
                (),
            )
            .await
            .unwrap();
        assert!(rows.next().await.unwrap().is_some());
    }
}
