//! Staging primitives for the two-phase embedding pipeline.
//!
//! Phase 1 stages `(node, vector_hash, text)` rows, then backfills vectors
//! already known for the same `(vector_hash, model)` from any snapshot.
//! Phase 2 pages through the remainder and saves freshly embedded vectors.

use sqlx::{QueryBuilder, Row};
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{EmbeddingRow, StagedEmbedding};
use crate::store::{with_retry, Store};

const INSERT_CHUNK: usize = 100;

impl Store {
    /// Clear any leftover staging rows so a re-run starts clean.
    pub async fn prepare_embedding_staging(&self, snapshot_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM staging_embeddings WHERE snapshot_id = ?")
            .bind(snapshot_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn load_staging_data(&self, rows: &[StagedEmbedding]) -> Result<u64> {
        let mut total = 0u64;
        for batch in rows.chunks(INSERT_CHUNK) {
            total += with_retry("load_staging_data", || async {
                let mut qb = QueryBuilder::<sqlx::Sqlite>::new(
                    "INSERT INTO staging_embeddings (snapshot_id, node_id, vector_hash, model, text) ",
                );
                qb.push_values(batch, |mut b, s| {
                    b.push_bind(s.snapshot_id)
                        .push_bind(s.node_id)
                        .push_bind(&s.vector_hash)
                        .push_bind(&s.model)
                        .push_bind(&s.text);
                });
                qb.push(" ON CONFLICT DO NOTHING");
                let result = qb.build().execute(self.pool()).await?;
                Ok(result.rows_affected())
            })
            .await?;
        }
        Ok(total)
    }

    /// Copy vectors already embedded for the same `(vector_hash, model)`,
    /// from any snapshot, into this snapshot's embedding table. Returns the
    /// number of vectors recovered from history.
    pub async fn backfill_staging_vectors(&self, snapshot_id: Uuid) -> Result<u64> {
        let result = with_retry("backfill_staging_vectors", || async {
            Ok(sqlx::query(
                "INSERT INTO embeddings (node_id, snapshot_id, vector_hash, model, dim, vector)
                 SELECT s.node_id, s.snapshot_id, s.vector_hash, s.model, e.dim, e.vector
                 FROM staging_embeddings s
                 JOIN embeddings e ON e.vector_hash = s.vector_hash AND e.model = s.model
                 WHERE s.snapshot_id = ?
                 ON CONFLICT DO NOTHING",
            )
            .bind(snapshot_id)
            .execute(self.pool())
            .await?)
        })
        .await?;

        debug!(
            snapshot_id = %snapshot_id,
            recovered = result.rows_affected(),
            "backfilled staged vectors from history"
        );
        Ok(result.rows_affected())
    }

    /// Remove staged rows whose vector already landed in the snapshot.
    pub async fn flush_staged_hits(&self, snapshot_id: Uuid) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM staging_embeddings
             WHERE snapshot_id = ?
               AND node_id IN (SELECT node_id FROM embeddings WHERE snapshot_id = ?)",
        )
        .bind(snapshot_id)
        .bind(snapshot_id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected())
    }

    /// Next page of staged rows still missing a vector.
    pub async fn fetch_staging_delta(
        &self,
        snapshot_id: Uuid,
        batch: usize,
    ) -> Result<Vec<StagedEmbedding>> {
        let rows = sqlx::query(
            "SELECT snapshot_id, node_id, vector_hash, model, text
             FROM staging_embeddings
             WHERE snapshot_id = ?
               AND node_id NOT IN (SELECT node_id FROM embeddings WHERE snapshot_id = ?)
             ORDER BY node_id
             LIMIT ?",
        )
        .bind(snapshot_id)
        .bind(snapshot_id)
        .bind(batch as i64)
        .fetch_all(self.pool())
        .await?;

        rows.iter()
            .map(|row| {
                Ok(StagedEmbedding {
                    snapshot_id: row.try_get("snapshot_id")?,
                    node_id: row.try_get("node_id")?,
                    vector_hash: row.try_get("vector_hash")?,
                    model: row.try_get("model")?,
                    text: row.try_get("text")?,
                })
            })
            .collect()
    }

    pub async fn save_embeddings_direct(&self, rows: &[EmbeddingRow]) -> Result<u64> {
        let mut total = 0u64;
        for batch in rows.chunks(INSERT_CHUNK) {
            total += with_retry("save_embeddings_direct", || async {
                let mut qb = QueryBuilder::<sqlx::Sqlite>::new(
                    "INSERT INTO embeddings (node_id, snapshot_id, vector_hash, model, dim, vector) ",
                );
                qb.push_values(batch, |mut b, e| {
                    b.push_bind(e.node_id)
                        .push_bind(e.snapshot_id)
                        .push_bind(&e.vector_hash)
                        .push_bind(&e.model)
                        .push_bind(e.vector.len() as i64)
                        .push_bind(crate::vector::Vector(e.vector.clone()));
                });
                qb.push(" ON CONFLICT DO NOTHING");
                let result = qb.build().execute(self.pool()).await?;
                Ok(result.rows_affected())
            })
            .await?;
        }
        Ok(total)
    }

    /// Drop the snapshot's staging rows. Runs on success and on
    /// non-recoverable failure alike, so the table never grows unbounded.
    pub async fn cleanup_staging(&self, snapshot_id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM staging_embeddings WHERE snapshot_id = ?")
            .bind(snapshot_id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn count_staged(&self, snapshot_id: Uuid) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM staging_embeddings WHERE snapshot_id = ?")
                .bind(snapshot_id)
                .fetch_one(self.pool())
                .await?;
        Ok(count)
    }

    pub async fn count_embeddings(&self, snapshot_id: Uuid) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM embeddings WHERE snapshot_id = ?")
                .bind(snapshot_id)
                .fetch_one(self.pool())
                .await?;
        Ok(count)
    }

    /// Test/maintenance helper: drop a snapshot's vectors so embedding can
    /// be re-run in isolation.
    pub async fn delete_embeddings(&self, snapshot_id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM embeddings WHERE snapshot_id = ?")
            .bind(snapshot_id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected())
    }
}
