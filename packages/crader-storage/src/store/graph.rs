//! Neighborhood queries over the chunk graph.

use sqlx::Row;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{ChunkNode, RelationType};
use crate::store::{chunk_node_from_row, Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeighborDirection {
    Prev,
    Next,
    Parent,
}

/// A graph neighbor together with the relation that reached it.
#[derive(Debug, Clone)]
pub struct NeighborRef {
    pub node: ChunkNode,
    pub relation: RelationType,
    /// Target symbol recorded on the edge, when the resolver knew it.
    pub symbol: Option<String>,
}

impl Store {
    pub async fn get_node(&self, node_id: Uuid) -> Result<Option<ChunkNode>> {
        let row = sqlx::query("SELECT * FROM chunk_nodes WHERE id = ?")
            .bind(node_id)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(chunk_node_from_row).transpose()
    }

    /// Neighbors in both edge directions, for context assembly.
    pub async fn get_context_neighbors(&self, node_id: Uuid) -> Result<Vec<NeighborRef>> {
        let rows = sqlx::query(
            "SELECT n.*, e.relation_type AS relation_type, e.metadata_json AS edge_metadata
             FROM edges e
             JOIN chunk_nodes n
               ON n.id = CASE WHEN e.source_id = ? THEN e.target_id ELSE e.source_id END
             WHERE e.source_id = ? OR e.target_id = ?",
        )
        .bind(node_id)
        .bind(node_id)
        .bind(node_id)
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(|row| neighbor_from_row(row)).collect()
    }

    /// Edges pointing at this node.
    pub async fn get_incoming_references(&self, node_id: Uuid) -> Result<Vec<NeighborRef>> {
        let rows = sqlx::query(
            "SELECT n.*, e.relation_type AS relation_type, e.metadata_json AS edge_metadata
             FROM edges e
             JOIN chunk_nodes n ON n.id = e.source_id
             WHERE e.target_id = ?",
        )
        .bind(node_id)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(|row| neighbor_from_row(row)).collect()
    }

    /// `calls` edges leaving this node.
    pub async fn get_outgoing_calls(&self, node_id: Uuid) -> Result<Vec<NeighborRef>> {
        let rows = sqlx::query(
            "SELECT n.*, e.relation_type AS relation_type, e.metadata_json AS edge_metadata
             FROM edges e
             JOIN chunk_nodes n ON n.id = e.target_id
             WHERE e.source_id = ? AND e.relation_type = 'calls'",
        )
        .bind(node_id)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(|row| neighbor_from_row(row)).collect()
    }

    /// Positional navigation within the node's file, or its smallest
    /// enclosing chunk for `Parent`.
    pub async fn get_neighbor_chunk(
        &self,
        node_id: Uuid,
        direction: NeighborDirection,
    ) -> Result<Option<ChunkNode>> {
        let Some(node) = self.get_node(node_id).await? else {
            return Ok(None);
        };

        let row = match direction {
            NeighborDirection::Prev => {
                sqlx::query(
                    "SELECT * FROM chunk_nodes
                     WHERE snapshot_id = ? AND file_path = ? AND byte_end <= ? AND id != ?
                     ORDER BY byte_end DESC LIMIT 1",
                )
                .bind(node.snapshot_id)
                .bind(&node.file_path)
                .bind(node.byte_start)
                .bind(node.id)
                .fetch_optional(self.pool())
                .await?
            }
            NeighborDirection::Next => {
                sqlx::query(
                    "SELECT * FROM chunk_nodes
                     WHERE snapshot_id = ? AND file_path = ? AND byte_start >= ? AND id != ?
                     ORDER BY byte_start ASC LIMIT 1",
                )
                .bind(node.snapshot_id)
                .bind(&node.file_path)
                .bind(node.byte_end)
                .bind(node.id)
                .fetch_optional(self.pool())
                .await?
            }
            NeighborDirection::Parent => {
                let containing = sqlx::query(
                    "SELECT * FROM chunk_nodes
                     WHERE snapshot_id = ? AND file_path = ?
                       AND byte_start <= ? AND byte_end >= ? AND id != ?
                     ORDER BY (byte_end - byte_start) ASC LIMIT 1",
                )
                .bind(node.snapshot_id)
                .bind(&node.file_path)
                .bind(node.byte_start)
                .bind(node.byte_end)
                .bind(node.id)
                .fetch_optional(self.pool())
                .await?;
                match containing {
                    Some(row) => Some(row),
                    // Flat partitions carry parentage on `defines` edges.
                    None => {
                        sqlx::query(
                            "SELECT n.* FROM edges e
                             JOIN chunk_nodes n ON n.id = e.source_id
                             WHERE e.target_id = ? AND e.relation_type = 'defines'
                             LIMIT 1",
                        )
                        .bind(node.id)
                        .fetch_optional(self.pool())
                        .await?
                    }
                }
            }
        };

        row.as_ref().map(chunk_node_from_row).transpose()
    }

    /// Edge endpoints that reference no node. Empty on a healthy snapshot.
    pub async fn dangling_edges(&self, snapshot_id: Uuid) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM edges e
             JOIN chunk_nodes s ON s.id = e.source_id
             WHERE s.snapshot_id = ?
               AND NOT EXISTS (SELECT 1 FROM chunk_nodes t WHERE t.id = e.target_id)",
        )
        .bind(snapshot_id)
        .fetch_one(self.pool())
        .await?;
        Ok(count)
    }
}

fn neighbor_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<NeighborRef> {
    let relation: String = row.try_get("relation_type")?;
    let edge_metadata: String = row.try_get("edge_metadata")?;
    let metadata: serde_json::Value = serde_json::from_str(&edge_metadata)?;
    Ok(NeighborRef {
        node: chunk_node_from_row(row)?,
        relation: RelationType::parse(&relation)?,
        symbol: metadata
            .get("symbol")
            .and_then(|v| v.as_str())
            .map(String::from),
    })
}
