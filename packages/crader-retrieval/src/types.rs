//! Retrieval request and response models.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crader_storage::{ChunkKind, SearchFilters};

/// One retrieval request. Exactly one of `snapshot_id` or `repo_id` must be
/// set; a repository id resolves to its branch's currently active snapshot.
#[derive(Debug, Clone, Default)]
pub struct RetrievalQuery {
    pub text: String,
    pub snapshot_id: Option<Uuid>,
    pub repo_id: Option<Uuid>,
    /// Branch used with `repo_id`; the repository default when omitted.
    pub branch: Option<String>,
    pub filters: SearchFilters,
    pub limit: usize,
}

impl RetrievalQuery {
    pub fn for_snapshot(text: impl Into<String>, snapshot_id: Uuid) -> Self {
        Self {
            text: text.into(),
            snapshot_id: Some(snapshot_id),
            limit: 10,
            ..Default::default()
        }
    }

    pub fn for_repo(text: impl Into<String>, repo_id: Uuid) -> Self {
        Self {
            text: text.into(),
            repo_id: Some(repo_id),
            limit: 10,
            ..Default::default()
        }
    }
}

/// Deduplicated outgoing call target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallTarget {
    pub symbol: String,
    pub file_path: String,
    pub node_id: Uuid,
}

/// Sibling navigation hint (previous/next chunk in source order).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiblingHint {
    pub node_id: Uuid,
    pub kind: ChunkKind,
    pub symbol: Option<String>,
    pub start_line: i64,
}

/// Parent chunk summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentContext {
    pub node_id: Uuid,
    pub kind: ChunkKind,
    pub symbol: Option<String>,
    pub file_path: String,
}

/// One fused retrieval result with its graph neighborhood.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedContext {
    pub node_id: Uuid,
    pub file_path: String,
    pub kind: ChunkKind,
    pub symbol: Option<String>,
    pub start_line: i64,
    pub end_line: i64,
    /// Reciprocal-rank-fusion score.
    pub score: f64,
    pub content: String,
    pub parent: Option<ParentContext>,
    pub outgoing_calls: Vec<CallTarget>,
    pub prev: Option<SiblingHint>,
    pub next: Option<SiblingHint>,
}

/// Entry returned by `list_directory`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
    pub size_bytes: Option<i64>,
}
