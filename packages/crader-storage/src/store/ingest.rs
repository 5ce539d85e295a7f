//! Bulk append-only inserts.
//!
//! Primary keys collapse duplicates (`ON CONFLICT DO NOTHING`), so rows from
//! concurrently committing workers can interleave in any order. Each bulk
//! write retries once with backoff on transient errors.

use sqlx::QueryBuilder;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{ChunkContent, ChunkNode, Edge, FileRecord, SearchDoc};
use crate::store::{with_retry, Store};

/// Rows per multi-VALUES statement, kept well under the SQLite bind limit.
const INSERT_CHUNK: usize = 100;

impl Store {
    pub async fn insert_files(&self, files: &[FileRecord]) -> Result<u64> {
        let mut total = 0u64;
        for batch in files.chunks(INSERT_CHUNK) {
            total += with_retry("insert_files", || async {
                let mut qb = QueryBuilder::<sqlx::Sqlite>::new(
                    "INSERT INTO files (id, snapshot_id, path, language, size_bytes, category, \
                     file_hash, parsing_status, parsing_error, indexed_at) ",
                );
                qb.push_values(batch, |mut b, f| {
                    b.push_bind(f.id)
                        .push_bind(f.snapshot_id)
                        .push_bind(&f.path)
                        .push_bind(&f.language)
                        .push_bind(f.size_bytes)
                        .push_bind(f.category.as_str())
                        .push_bind(&f.file_hash)
                        .push_bind(f.parsing_status.as_str())
                        .push_bind(&f.parsing_error)
                        .push_bind(f.indexed_at);
                });
                qb.push(" ON CONFLICT DO NOTHING");
                let result = qb.build().execute(self.pool()).await?;
                Ok(result.rows_affected())
            })
            .await?;
        }
        Ok(total)
    }

    pub async fn insert_chunk_nodes(&self, nodes: &[ChunkNode]) -> Result<u64> {
        let mut total = 0u64;
        for batch in nodes.chunks(INSERT_CHUNK) {
            total += with_retry("insert_chunk_nodes", || async {
                let mut qb = QueryBuilder::<sqlx::Sqlite>::new(
                    "INSERT INTO chunk_nodes (id, snapshot_id, file_id, file_path, chunk_hash, \
                     kind, start_line, end_line, byte_start, byte_end, is_external, metadata_json) ",
                );
                qb.push_values(batch, |mut b, n| {
                    b.push_bind(n.id)
                        .push_bind(n.snapshot_id)
                        .push_bind(n.file_id)
                        .push_bind(&n.file_path)
                        .push_bind(&n.chunk_hash)
                        .push_bind(n.kind.as_str())
                        .push_bind(n.start_line)
                        .push_bind(n.end_line)
                        .push_bind(n.byte_start)
                        .push_bind(n.byte_end)
                        .push_bind(n.is_external as i64)
                        .push_bind(n.metadata.to_string());
                });
                qb.push(" ON CONFLICT DO NOTHING");
                let result = qb.build().execute(self.pool()).await?;
                Ok(result.rows_affected())
            })
            .await?;
        }
        Ok(total)
    }

    /// Content rows are global: identical bytes across files, commits or
    /// branches land on one row.
    pub async fn insert_chunk_contents(&self, contents: &[ChunkContent]) -> Result<u64> {
        let mut total = 0u64;
        for batch in contents.chunks(INSERT_CHUNK) {
            total += with_retry("insert_chunk_contents", || async {
                let mut qb =
                    QueryBuilder::<sqlx::Sqlite>::new("INSERT INTO chunk_contents (chunk_hash, content) ");
                qb.push_values(batch, |mut b, c| {
                    b.push_bind(&c.chunk_hash).push_bind(&c.content);
                });
                qb.push(" ON CONFLICT DO NOTHING");
                let result = qb.build().execute(self.pool()).await?;
                Ok(result.rows_affected())
            })
            .await?;
        }
        Ok(total)
    }

    /// Self-loops are dropped here so no caller has to remember to.
    pub async fn insert_edges(&self, edges: &[Edge]) -> Result<u64> {
        let edges: Vec<&Edge> = edges.iter().filter(|e| !e.is_self_loop()).collect();
        let mut total = 0u64;
        for batch in edges.chunks(INSERT_CHUNK) {
            total += with_retry("insert_edges", || async {
                let mut qb = QueryBuilder::<sqlx::Sqlite>::new(
                    "INSERT INTO edges (source_id, target_id, relation_type, metadata_json) ",
                );
                qb.push_values(batch, |mut b, e| {
                    b.push_bind(e.source_id)
                        .push_bind(e.target_id)
                        .push_bind(e.relation_type.as_str())
                        .push_bind(e.metadata.to_string());
                });
                qb.push(" ON CONFLICT DO NOTHING");
                let result = qb.build().execute(self.pool()).await?;
                Ok(result.rows_affected())
            })
            .await?;
        }
        Ok(total)
    }

    /// Insert search docs and their FTS rows in one transaction, keyed by
    /// the docs' rowids.
    pub async fn insert_search_docs(&self, docs: &[SearchDoc]) -> Result<u64> {
        with_retry("insert_search_docs", || async {
            let mut tx = self.pool().begin().await?;
            let mut inserted = 0u64;
            for doc in docs {
                let result = sqlx::query(
                    "INSERT INTO search_docs (node_id, file_path, tags, content)
                     VALUES (?, ?, ?, ?)
                     ON CONFLICT DO NOTHING",
                )
                .bind(doc.node_id)
                .bind(&doc.file_path)
                .bind(&doc.tags)
                .bind(&doc.content)
                .execute(&mut *tx)
                .await?;

                if result.rows_affected() == 1 {
                    let rowid = result.last_insert_rowid();
                    sqlx::query(
                        "INSERT INTO search_fts (rowid, tags, content) VALUES (?, ?, ?)",
                    )
                    .bind(rowid)
                    .bind(&doc.tags)
                    .bind(&doc.content)
                    .execute(&mut *tx)
                    .await?;
                    inserted += 1;
                }
            }
            tx.commit().await?;
            Ok(inserted)
        })
        .await
    }

    pub async fn count_chunk_contents(&self, chunk_hash: &str) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM chunk_contents WHERE chunk_hash = ?")
                .bind(chunk_hash)
                .fetch_one(self.pool())
                .await?;
        Ok(count)
    }

    pub async fn count_nodes(&self, snapshot_id: Uuid) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM chunk_nodes WHERE snapshot_id = ?")
                .bind(snapshot_id)
                .fetch_one(self.pool())
                .await?;
        Ok(count)
    }
}
