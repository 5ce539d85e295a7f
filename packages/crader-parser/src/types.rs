//! Parser output model.
//!
//! One file in, one `FileOutcome` out: a file record, a flat partition of
//! the file's bytes into chunks, and the intra-file relations the tree
//! revealed. Chunks never overlap and cover the decoded text exactly, so
//! concatenating them in byte order reproduces it.

use serde::{Deserialize, Serialize};

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

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseStatus {
    Success,
    Skipped,
    Error,
}

/// One contiguous slice of the decoded file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceChunk {
    pub kind: ChunkKind,
    /// Byte range `[start, end)` into the decoded text.
    pub byte_start: usize,
    pub byte_end: usize,
    /// 1-indexed, inclusive.
    pub start_line: usize,
    pub end_line: usize,
    /// Declared name, when the construct has one.
    pub symbol: Option<String>,
    /// True when a tree-sitter error node intersects this slice.
    pub has_parse_errors: bool,
}

impl SourceChunk {
    pub fn len(&self) -> usize {
        self.byte_end - self.byte_start
    }

    pub fn is_empty(&self) -> bool {
        self.byte_start == self.byte_end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    Calls,
    Defines,
}

/// Intra-file relation between two chunks, by index into `chunks`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalRelation {
    pub source: usize,
    pub target: usize,
    pub kind: RelationKind,
    pub symbol: Option<String>,
}

/// Everything the parser produced for one file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileOutcome {
    /// Repository-relative path.
    pub path: String,
    pub language: Option<String>,
    pub category: FileCategory,
    pub size_bytes: u64,
    /// blake3 of the raw file bytes.
    pub file_hash: String,
    pub status: ParseStatus,
    pub error: Option<String>,
    /// Decoded text the chunk ranges index into. Empty when skipped.
    pub text: Vec<u8>,
    pub chunks: Vec<SourceChunk>,
    pub relations: Vec<LocalRelation>,
}

impl FileOutcome {
    pub fn skipped(
        path: impl Into<String>,
        category: FileCategory,
        size_bytes: u64,
        file_hash: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            language: None,
            category,
            size_bytes,
            file_hash: file_hash.into(),
            status: ParseStatus::Skipped,
            error: Some(reason.into()),
            text: Vec::new(),
            chunks: Vec::new(),
            relations: Vec::new(),
        }
    }

    pub fn chunk_bytes(&self, chunk: &SourceChunk) -> &[u8] {
        &self.text[chunk.byte_start..chunk.byte_end]
    }
}
