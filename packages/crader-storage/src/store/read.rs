//! Read-side helpers: file listings, chunk streams, per-snapshot stats.

use sqlx::Row;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{ChunkNode, FileRecord, SnapshotStats};
use crate::store::{chunk_node_from_row, file_from_row, Store};

impl Store {
    pub async fn list_files(&self, snapshot_id: Uuid) -> Result<Vec<FileRecord>> {
        let rows = sqlx::query("SELECT * FROM files WHERE snapshot_id = ? ORDER BY path")
            .bind(snapshot_id)
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(file_from_row).collect()
    }

    pub async fn get_file(&self, snapshot_id: Uuid, path: &str) -> Result<Option<FileRecord>> {
        let row = sqlx::query("SELECT * FROM files WHERE snapshot_id = ? AND path = ?")
            .bind(snapshot_id)
            .bind(path)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(file_from_row).transpose()
    }

    /// All chunks of one file in byte order, paired with their content.
    /// Concatenating the contents reproduces the file's exact bytes.
    pub async fn get_file_chunks(
        &self,
        snapshot_id: Uuid,
        path: &str,
    ) -> Result<Vec<(ChunkNode, Vec<u8>)>> {
        let rows = sqlx::query(
            "SELECT n.*, c.content AS content
             FROM chunk_nodes n
             JOIN chunk_contents c ON c.chunk_hash = n.chunk_hash
             WHERE n.snapshot_id = ? AND n.file_path = ?
             ORDER BY n.byte_start ASC",
        )
        .bind(snapshot_id)
        .bind(path)
        .fetch_all(self.pool())
        .await?;

        rows.iter()
            .map(|row| {
                let content: Vec<u8> = row.try_get("content")?;
                Ok((chunk_node_from_row(row)?, content))
            })
            .collect()
    }

    /// Smallest chunk containing `offset` within one file. Byte-range
    /// lookups from the cross-reference resolver land here.
    pub async fn find_node_at(
        &self,
        snapshot_id: Uuid,
        path: &str,
        offset: i64,
    ) -> Result<Option<ChunkNode>> {
        let row = sqlx::query(
            "SELECT * FROM chunk_nodes
             WHERE snapshot_id = ? AND file_path = ? AND byte_start <= ? AND byte_end > ?
             ORDER BY (byte_end - byte_start) ASC LIMIT 1",
        )
        .bind(snapshot_id)
        .bind(path)
        .bind(offset)
        .bind(offset)
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(chunk_node_from_row).transpose()
    }

    pub async fn get_content(&self, chunk_hash: &str) -> Result<Option<Vec<u8>>> {
        let row = sqlx::query("SELECT content FROM chunk_contents WHERE chunk_hash = ?")
            .bind(chunk_hash)
            .fetch_optional(self.pool())
            .await?;
        row.map(|r| Ok(r.try_get::<Vec<u8>, _>("content")?)).transpose()
    }

    /// Aggregate counters computed from the snapshot's rows.
    pub async fn snapshot_stats(&self, snapshot_id: Uuid) -> Result<SnapshotStats> {
        let files = sqlx::query(
            "SELECT parsing_status, COUNT(*) AS n FROM files
             WHERE snapshot_id = ? GROUP BY parsing_status",
        )
        .bind(snapshot_id)
        .fetch_all(self.pool())
        .await?;

        let mut stats = SnapshotStats::default();
        for row in &files {
            let status: String = row.try_get("parsing_status")?;
            let n: i64 = row.try_get("n")?;
            match status.as_str() {
                "success" => stats.files_indexed = n as usize,
                "skipped" => stats.files_skipped = n as usize,
                "error" => stats.files_failed = n as usize,
                _ => {}
            }
        }

        stats.chunks_created = self.count_nodes(snapshot_id).await? as usize;

        let edges: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM edges e
             JOIN chunk_nodes s ON s.id = e.source_id
             WHERE s.snapshot_id = ?",
        )
        .bind(snapshot_id)
        .fetch_one(self.pool())
        .await?;
        stats.edges_created = edges as usize;

        Ok(stats)
    }
}
