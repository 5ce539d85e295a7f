//! Connector variants over a single interface.
//!
//! - `pooled`: connection pool, used by the orchestrator and retriever.
//! - `single`: one connection, owned by a parse worker. Workers never share
//!   connections with the parent.
//! - `in_memory`: embedded database for tests.

use std::str::FromStr;
use std::time::Duration;

use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::debug;

use crate::error::Result;

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorKind {
    Pooled,
    Single,
    InMemory,
}

/// A handle to the database, sized for its execution context.
#[derive(Debug, Clone)]
pub struct Connector {
    pool: SqlitePool,
    kind: ConnectorKind,
}

impl Connector {
    /// Pool for the orchestrator process. `max_connections` bounds fan-in
    /// from concurrent retrieval queries.
    pub async fn pooled(url: &str, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(Self::file_options(url)?)
            .await?;
        debug!(url, max_connections, "opened pooled connector");
        Ok(Self {
            pool,
            kind: ConnectorKind::Pooled,
        })
    }

    /// Exactly one connection. Parse workers each own one of these.
    pub async fn single(url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(Self::file_options(url)?)
            .await?;
        Ok(Self {
            pool,
            kind: ConnectorKind::Single,
        })
    }

    /// Embedded database. One connection, since every `:memory:` connection
    /// is otherwise its own database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            // Keep the sole connection alive for the pool's lifetime.
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect_with(options)
            .await?;
        let conn = Self {
            pool,
            kind: ConnectorKind::InMemory,
        };
        conn.migrate().await?;
        Ok(conn)
    }

    fn file_options(url: &str) -> Result<SqliteConnectOptions> {
        Ok(SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true))
    }

    /// Run schema migrations to head.
    pub async fn migrate(&self) -> Result<()> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    pub fn kind(&self) -> ConnectorKind {
        self.kind
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_connector_migrates() {
        let conn = Connector::in_memory().await.unwrap();
        assert_eq!(conn.kind(), ConnectorKind::InMemory);

        // Schema is queryable after migration.
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM snapshots")
            .fetch_one(conn.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_single_connector_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("test.db").display());

        let conn = Connector::single(&url).await.unwrap();
        conn.migrate().await.unwrap();
        assert_eq!(conn.kind(), ConnectorKind::Single);
    }

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let conn = Connector::in_memory().await.unwrap();
        conn.migrate().await.unwrap();
        conn.migrate().await.unwrap();
    }
}
