//! The storage adapter: every durable operation of the indexing pipeline
//! and the retriever, grouped by concern.

mod graph;
mod ingest;
mod read;
mod search;
mod snapshot;
mod staging;

pub use graph::{NeighborDirection, NeighborRef};
pub use search::{FtsHit, SearchFilters, VectorHit};

use std::future::Future;
use std::time::Duration;

use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use tracing::warn;

use crate::connector::Connector;
use crate::error::Result;
use crate::models::{
    ChunkKind, ChunkNode, FileCategory, FileRecord, ParsingStatus, Snapshot, SnapshotState,
};

/// Storage adapter over one connector. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Store {
    conn: Connector,
}

impl Store {
    pub fn new(conn: Connector) -> Self {
        Self { conn }
    }

    pub fn connector(&self) -> &Connector {
        &self.conn
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        self.conn.pool()
    }
}

/// Retry a write once with backoff when the error is transient. Anything
/// else propagates unchanged.
pub(crate) async fn with_retry<T, F, Fut>(op: &str, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match f().await {
        Err(e) if e.is_transient() => {
            warn!(op, error = %e, "transient storage error, retrying once");
            tokio::time::sleep(Duration::from_millis(250)).await;
            f().await
        }
        other => other,
    }
}

pub(crate) fn snapshot_from_row(row: &SqliteRow) -> Result<Snapshot> {
    let state: String = row.try_get("state")?;
    let stats: String = row.try_get("stats_json")?;
    Ok(Snapshot {
        id: row.try_get("id")?,
        repo_id: row.try_get("repo_id")?,
        commit_hash: row.try_get("commit_hash")?,
        branch: row.try_get("branch")?,
        state: SnapshotState::parse(&state)?,
        stats: serde_json::from_str(&stats)?,
        error: row.try_get("error")?,
        created_at: row.try_get("created_at")?,
        activated_at: row.try_get("activated_at")?,
    })
}

pub(crate) fn chunk_node_from_row(row: &SqliteRow) -> Result<ChunkNode> {
    let kind: String = row.try_get("kind")?;
    let metadata: String = row.try_get("metadata_json")?;
    let is_external: i64 = row.try_get("is_external")?;
    Ok(ChunkNode {
        id: row.try_get("id")?,
        snapshot_id: row.try_get("snapshot_id")?,
        file_id: row.try_get("file_id")?,
        file_path: row.try_get("file_path")?,
        chunk_hash: row.try_get("chunk_hash")?,
        kind: ChunkKind::parse(&kind)?,
        start_line: row.try_get("start_line")?,
        end_line: row.try_get("end_line")?,
        byte_start: row.try_get("byte_start")?,
        byte_end: row.try_get("byte_end")?,
        is_external: is_external != 0,
        metadata: serde_json::from_str(&metadata)?,
    })
}

pub(crate) fn file_from_row(row: &SqliteRow) -> Result<FileRecord> {
    let category: String = row.try_get("category")?;
    let status: String = row.try_get("parsing_status")?;
    Ok(FileRecord {
        id: row.try_get("id")?,
        snapshot_id: row.try_get("snapshot_id")?,
        path: row.try_get("path")?,
        language: row.try_get("language")?,
        size_bytes: row.try_get("size_bytes")?,
        category: FileCategory::parse(&category)?,
        file_hash: row.try_get("file_hash")?,
        parsing_status: ParsingStatus::parse(&status)?,
        parsing_error: row.try_get("parsing_error")?,
        indexed_at: row.try_get("indexed_at")?,
    })
}
