//! Repository upsert and the snapshot state machine.
//!
//! Activation is a single transaction that demotes the previous active
//! snapshot for the `(repo, branch)` pair and promotes the new one, so the
//! at-most-one-active invariant holds at every instant.

use chrono::Utc;
use sqlx::Row;
use tracing::info;
use uuid::Uuid;

use crate::error::{Result, StorageError};
use crate::models::{Repository, Snapshot, SnapshotState};
use crate::store::{snapshot_from_row, with_retry, Store};

impl Store {
    /// Insert the repository on first sight. Existing rows are never mutated.
    pub async fn ensure_repository(&self, repo: &Repository) -> Result<Uuid> {
        with_retry("ensure_repository", || async {
            sqlx::query(
                "INSERT INTO repositories (id, url, name, branch, created_at)
                 VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT (id) DO NOTHING",
            )
            .bind(repo.id)
            .bind(&repo.url)
            .bind(&repo.name)
            .bind(&repo.default_branch)
            .bind(repo.created_at)
            .execute(self.pool())
            .await?;
            Ok(repo.id)
        })
        .await
    }

    pub async fn get_repository(&self, repo_id: Uuid) -> Result<Option<Repository>> {
        let row = sqlx::query("SELECT * FROM repositories WHERE id = ?")
            .bind(repo_id)
            .fetch_optional(self.pool())
            .await?;
        row.map(|r| {
            Ok(Repository {
                id: r.try_get("id")?,
                url: r.try_get("url")?,
                name: r.try_get("name")?,
                default_branch: r.try_get("branch")?,
                created_at: r.try_get("created_at")?,
            })
        })
        .transpose()
    }

    /// Create (or adopt) the snapshot for `(repo, commit, branch)`.
    ///
    /// A `ready` or `active` row, as well as an in-flight `pending` or
    /// `building` row belonging to a concurrent job, is returned with
    /// `is_new = false` so the caller can short-circuit. A `failed` or
    /// `pruned` row is purged, reset to `pending`, and returned with
    /// `is_new = true`: the identity is reused, the build restarts clean.
    pub async fn create_snapshot(
        &self,
        repo_id: Uuid,
        commit_hash: &str,
        branch: &str,
    ) -> Result<(Snapshot, bool)> {
        if let Some(existing) = self
            .find_snapshot(repo_id, commit_hash, branch)
            .await?
        {
            if !matches!(
                existing.state,
                SnapshotState::Failed | SnapshotState::Pruned
            ) {
                return Ok((existing, false));
            }
            self.reset_snapshot(existing.id).await?;
            let mut reset = existing;
            reset.state = SnapshotState::Pending;
            reset.error = None;
            reset.stats = serde_json::json!({});
            return Ok((reset, true));
        }

        let snapshot = Snapshot::new(repo_id, commit_hash, branch);
        let inserted = sqlx::query(
            "INSERT INTO snapshots (id, repo_id, commit_hash, branch, state, stats_json, created_at)
             VALUES (?, ?, ?, ?, ?, '{}', ?)
             ON CONFLICT (repo_id, commit_hash, branch) DO NOTHING",
        )
        .bind(snapshot.id)
        .bind(repo_id)
        .bind(commit_hash)
        .bind(branch)
        .bind(SnapshotState::Pending.as_str())
        .bind(snapshot.created_at)
        .execute(self.pool())
        .await?;

        if inserted.rows_affected() == 0 {
            // Lost the race to a concurrent job for the same tuple.
            let existing = self
                .find_snapshot(repo_id, commit_hash, branch)
                .await?
                .ok_or_else(|| {
                    StorageError::Transient("snapshot vanished during create race".to_string())
                })?;
            return Ok((existing, false));
        }

        info!(snapshot_id = %snapshot.id, commit_hash, branch, "created snapshot");
        Ok((snapshot, true))
    }

    pub async fn find_snapshot(
        &self,
        repo_id: Uuid,
        commit_hash: &str,
        branch: &str,
    ) -> Result<Option<Snapshot>> {
        let row = sqlx::query(
            "SELECT * FROM snapshots WHERE repo_id = ? AND commit_hash = ? AND branch = ?",
        )
        .bind(repo_id)
        .bind(commit_hash)
        .bind(branch)
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(snapshot_from_row).transpose()
    }

    pub async fn get_snapshot(&self, snapshot_id: Uuid) -> Result<Option<Snapshot>> {
        let row = sqlx::query("SELECT * FROM snapshots WHERE id = ?")
            .bind(snapshot_id)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(snapshot_from_row).transpose()
    }

    pub async fn list_snapshots(&self, repo_id: Uuid) -> Result<Vec<Snapshot>> {
        let rows = sqlx::query(
            "SELECT * FROM snapshots WHERE repo_id = ? ORDER BY created_at DESC",
        )
        .bind(repo_id)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(snapshot_from_row).collect()
    }

    pub async fn get_active_snapshot(
        &self,
        repo_id: Uuid,
        branch: &str,
    ) -> Result<Option<Snapshot>> {
        let row = sqlx::query(
            "SELECT * FROM snapshots WHERE repo_id = ? AND branch = ? AND state = 'active'",
        )
        .bind(repo_id)
        .bind(branch)
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(snapshot_from_row).transpose()
    }

    pub async fn mark_building(&self, snapshot_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE snapshots SET state = 'building' WHERE id = ? AND state = 'pending'")
            .bind(snapshot_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Promote `snapshot_id` to `active` and demote the branch's previous
    /// active snapshot to `ready`, atomically.
    pub async fn activate_snapshot(
        &self,
        repo_id: Uuid,
        snapshot_id: Uuid,
        stats: &serde_json::Value,
    ) -> Result<()> {
        let snapshot = self
            .get_snapshot(snapshot_id)
            .await?
            .ok_or_else(|| StorageError::SnapshotNotFound(snapshot_id.to_string()))?;

        with_retry("activate_snapshot", || async {
            let mut tx = self.pool().begin().await?;

            sqlx::query(
                "UPDATE snapshots SET state = 'ready'
                 WHERE repo_id = ? AND branch = ? AND state = 'active' AND id != ?",
            )
            .bind(repo_id)
            .bind(&snapshot.branch)
            .bind(snapshot_id)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "UPDATE snapshots SET state = 'active', stats_json = ?, activated_at = ?
                 WHERE id = ?",
            )
            .bind(stats.to_string())
            .bind(Utc::now())
            .bind(snapshot_id)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok(())
        })
        .await?;

        info!(snapshot_id = %snapshot_id, branch = %snapshot.branch, "activated snapshot");
        Ok(())
    }

    pub async fn fail_snapshot(&self, snapshot_id: Uuid, error: &str) -> Result<()> {
        sqlx::query("UPDATE snapshots SET state = 'failed', error = ? WHERE id = ?")
            .bind(error)
            .bind(snapshot_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Purge a snapshot's rows and reset it to `pending` for a forced
    /// rebuild under the same identity.
    pub async fn reset_snapshot(&self, snapshot_id: Uuid) -> Result<()> {
        self.purge_snapshot_rows(snapshot_id).await?;
        sqlx::query(
            "UPDATE snapshots SET state = ?, error = NULL, stats_json = '{}', activated_at = NULL
             WHERE id = ?",
        )
        .bind(SnapshotState::Pending.as_str())
        .bind(snapshot_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Mark the snapshot pruned and reclaim its rows. Shared chunk contents
    /// are left alone: other snapshots may still reference them.
    pub async fn prune_snapshot(&self, snapshot_id: Uuid) -> Result<()> {
        self.purge_snapshot_rows(snapshot_id).await?;
        sqlx::query("UPDATE snapshots SET state = 'pruned' WHERE id = ?")
            .bind(snapshot_id)
            .execute(self.pool())
            .await?;
        info!(snapshot_id = %snapshot_id, "pruned snapshot");
        Ok(())
    }

    /// Snapshots superseded on their branch: `ready` rows that are not the
    /// branch's current active snapshot. Used by `--auto-prune`.
    pub async fn list_superseded(&self, repo_id: Uuid, branch: &str) -> Result<Vec<Snapshot>> {
        let rows = sqlx::query(
            "SELECT * FROM snapshots
             WHERE repo_id = ? AND branch = ? AND state = 'ready'
             ORDER BY created_at ASC",
        )
        .bind(repo_id)
        .bind(branch)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(snapshot_from_row).collect()
    }

    async fn purge_snapshot_rows(&self, snapshot_id: Uuid) -> Result<()> {
        with_retry("purge_snapshot_rows", || async {
            let mut tx = self.pool().begin().await?;

            sqlx::query(
                "DELETE FROM search_fts WHERE rowid IN (
                     SELECT d.rowid FROM search_docs d
                     JOIN chunk_nodes n ON n.id = d.node_id
                     WHERE n.snapshot_id = ?)",
            )
            .bind(snapshot_id)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "DELETE FROM search_docs WHERE node_id IN (
                     SELECT id FROM chunk_nodes WHERE snapshot_id = ?)",
            )
            .bind(snapshot_id)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "DELETE FROM edges WHERE source_id IN (
                     SELECT id FROM chunk_nodes WHERE snapshot_id = ?)",
            )
            .bind(snapshot_id)
            .execute(&mut *tx)
            .await?;

            sqlx::query("DELETE FROM embeddings WHERE snapshot_id = ?")
                .bind(snapshot_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM staging_embeddings WHERE snapshot_id = ?")
                .bind(snapshot_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM chunk_nodes WHERE snapshot_id = ?")
                .bind(snapshot_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM files WHERE snapshot_id = ?")
                .bind(snapshot_id)
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;
            Ok(())
        })
        .await
    }
}
