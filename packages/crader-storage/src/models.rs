//! Domain models for the snapshot store.
//!
//! A snapshot is an immutable view of one repository at one commit on one
//! branch. Chunk contents are content-addressed and shared across the whole
//! store; everything else is scoped to a snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, StorageError};

/// Repository identity. Created on first sight, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    /// Stable 128-bit id derived from the sanitized remote URL (or local path).
    pub id: Uuid,
    pub url: String,
    pub name: String,
    pub default_branch: String,
    pub created_at: DateTime<Utc>,
}

impl Repository {
    pub fn new(
        id: Uuid,
        url: impl Into<String>,
        name: impl Into<String>,
        default_branch: impl Into<String>,
    ) -> Self {
        Self {
            id,
            url: url.into(),
            name: name.into(),
            default_branch: default_branch.into(),
            created_at: Utc::now(),
        }
    }
}

/// Snapshot lifecycle.
///
/// ```text
/// pending → building → ready → active | failed | pruned
/// ```
///
/// At most one snapshot per `(repo, branch)` is `active` at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotState {
    Pending,
    Building,
    Ready,
    Active,
    Failed,
    Pruned,
}

impl SnapshotState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotState::Pending => "pending",
            SnapshotState::Building => "building",
            SnapshotState::Ready => "ready",
            SnapshotState::Active => "active",
            SnapshotState::Failed => "failed",
            SnapshotState::Pruned => "pruned",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(SnapshotState::Pending),
            "building" => Ok(SnapshotState::Building),
            "ready" => Ok(SnapshotState::Ready),
            "active" => Ok(SnapshotState::Active),
            "failed" => Ok(SnapshotState::Failed),
            "pruned" => Ok(SnapshotState::Pruned),
            _ => Err(StorageError::InvalidArgument(format!(
                "invalid snapshot state: {}",
                s
            ))),
        }
    }

    /// A usable snapshot: its rows are complete and queryable.
    pub fn is_live(&self) -> bool {
        matches!(self, SnapshotState::Ready | SnapshotState::Active)
    }
}

impl std::fmt::Display for SnapshotState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: Uuid,
    pub repo_id: Uuid,
    pub commit_hash: String,
    pub branch: String,
    pub state: SnapshotState,
    #[serde(default)]
    pub stats: serde_json::Value,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
}

impl Snapshot {
    pub fn new(repo_id: Uuid, commit_hash: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            repo_id,
            commit_hash: commit_hash.into(),
            branch: branch.into(),
            state: SnapshotState::Pending,
            stats: serde_json::json!({}),
            error: None,
            created_at: Utc::now(),
            activated_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileCategory {
    Source,
    Test,
    Config,
    Docs,
    Other,
}

impl FileCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileCategory::Source => "source",
            FileCategory::Test => "test",
            FileCategory::Config => "config",
            FileCategory::Docs => "docs",
            FileCategory::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "source" => Ok(FileCategory::Source),
            "test" => Ok(FileCategory::Test),
            "config" => Ok(FileCategory::Config),
            "docs" => Ok(FileCategory::Docs),
            "other" => Ok(FileCategory::Other),
            _ => Err(StorageError::InvalidArgument(format!(
                "invalid file category: {}",
                s
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParsingStatus {
    Success,
    Skipped,
    Error,
}

impl ParsingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParsingStatus::Success => "success",
            ParsingStatus::Skipped => "skipped",
            ParsingStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "success" => Ok(ParsingStatus::Success),
            "skipped" => Ok(ParsingStatus::Skipped),
            "error" => Ok(ParsingStatus::Error),
            _ => Err(StorageError::InvalidArgument(format!(
                "invalid parsing status: {}",
                s
            ))),
        }
    }
}

/// One indexed file within a snapshot. Unique on `(snapshot_id, path)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: Uuid,
    pub snapshot_id: Uuid,
    pub path: String,
    pub language: Option<String>,
    pub size_bytes: i64,
    pub category: FileCategory,
    pub file_hash: String,
    pub parsing_status: ParsingStatus,
    pub parsing_error: Option<String>,
    pub indexed_at: DateTime<Utc>,
}

/// Semantic chunk kinds. `Filler` chunks cover the bytes between semantic
/// constructs so a file is always reconstructible from its chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    Function,
    Method,
    Class,
    Block,
    Module,
    Statement,
    Filler,
    External,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::Function => "function",
            ChunkKind::Method => "method",
            ChunkKind::Class => "class",
            ChunkKind::Block => "block",
            ChunkKind::Module => "module",
            ChunkKind::Statement => "statement",
            ChunkKind::Filler => "filler",
            ChunkKind::External => "external",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "function" => Ok(ChunkKind::Function),
            "method" => Ok(ChunkKind::Method),
            "class" => Ok(ChunkKind::Class),
            "block" => Ok(ChunkKind::Block),
            "module" => Ok(ChunkKind::Module),
            "statement" => Ok(ChunkKind::Statement),
            "filler" => Ok(ChunkKind::Filler),
            "external" => Ok(ChunkKind::External),
            _ => Err(StorageError::InvalidArgument(format!(
                "invalid chunk kind: {}",
                s
            ))),
        }
    }
}

/// A chunk node: one contiguous byte slice of a source file.
///
/// `chunk_hash` addresses the exact slice in `chunk_contents`; the slice is
/// `[byte_start, byte_end)` of the original file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkNode {
    pub id: Uuid,
    pub snapshot_id: Uuid,
    pub file_id: Option<Uuid>,
    pub file_path: String,
    pub chunk_hash: String,
    pub kind: ChunkKind,
    pub start_line: i64,
    pub end_line: i64,
    pub byte_start: i64,
    pub byte_end: i64,
    /// Sentinel for a symbol defined outside the indexed tree.
    pub is_external: bool,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl ChunkNode {
    /// Stable id for an external sentinel, derived from `(snapshot, symbol)`
    /// so that re-running resolution lands edges on the same node while
    /// sentinels stay scoped to their snapshot.
    pub fn external_sentinel(snapshot_id: Uuid, symbol: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(snapshot_id.as_bytes());
        hasher.update(symbol.as_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest.as_bytes()[..16]);
        Self {
            id: Uuid::from_bytes(bytes),
            snapshot_id,
            file_id: None,
            file_path: format!("<external>/{}", symbol),
            chunk_hash: digest.to_hex().to_string(),
            kind: ChunkKind::External,
            start_line: 0,
            end_line: 0,
            byte_start: 0,
            byte_end: 0,
            is_external: true,
            metadata: serde_json::json!({ "symbol": symbol }),
        }
    }
}

/// Content-addressed chunk bytes, deduplicated across the whole store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkContent {
    pub chunk_hash: String,
    pub content: Vec<u8>,
}

impl ChunkContent {
    pub fn from_bytes(content: &[u8]) -> Self {
        Self {
            chunk_hash: blake3::hash(content).to_hex().to_string(),
            content: content.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    Calls,
    Imports,
    Defines,
    ReadsFrom,
    WritesTo,
    Implements,
    Overrides,
}

impl RelationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::Calls => "calls",
            RelationType::Imports => "imports",
            RelationType::Defines => "defines",
            RelationType::ReadsFrom => "reads_from",
            RelationType::WritesTo => "writes_to",
            RelationType::Implements => "implements",
            RelationType::Overrides => "overrides",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "calls" => Ok(RelationType::Calls),
            "imports" => Ok(RelationType::Imports),
            "defines" => Ok(RelationType::Defines),
            "reads_from" => Ok(RelationType::ReadsFrom),
            "writes_to" => Ok(RelationType::WritesTo),
            "implements" => Ok(RelationType::Implements),
            "overrides" => Ok(RelationType::Overrides),
            _ => Err(StorageError::InvalidArgument(format!(
                "invalid relation type: {}",
                s
            ))),
        }
    }
}

/// Directed edge between two chunk nodes of the same snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub source_id: Uuid,
    pub target_id: Uuid,
    pub relation_type: RelationType,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl Edge {
    pub fn new(source_id: Uuid, target_id: Uuid, relation_type: RelationType) -> Self {
        Self {
            source_id,
            target_id,
            relation_type,
            metadata: serde_json::json!({}),
        }
    }

    pub fn is_self_loop(&self) -> bool {
        self.source_id == self.target_id
    }
}

/// Sparse/dense index entry for one chunk node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchDoc {
    pub node_id: Uuid,
    pub file_path: String,
    pub tags: String,
    pub content: String,
}

/// One embedded vector, keyed for cross-snapshot reuse by `vector_hash`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRow {
    pub node_id: Uuid,
    pub snapshot_id: Uuid,
    pub vector_hash: String,
    pub model: String,
    pub vector: Vec<f32>,
}

/// A staged-but-not-yet-embedded chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedEmbedding {
    pub snapshot_id: Uuid,
    pub node_id: Uuid,
    pub vector_hash: String,
    pub model: String,
    pub text: String,
}

/// Aggregate counters reported on activation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotStats {
    pub files_indexed: usize,
    pub files_skipped: usize,
    pub files_failed: usize,
    pub chunks_created: usize,
    pub edges_created: usize,
    pub newly_embedded: usize,
    pub recovered_from_history: usize,
}
