//! Semantic chunk extraction for source files.
//!
//! Grammar-driven (tree-sitter) chunking that partitions every file into
//! byte-exact, reconstructible chunks, plus the intra-file relations the
//! syntax tree reveals.

pub mod chunker;
pub mod languages;
pub mod scan;
pub mod types;

pub use chunker::{ChunkParser, ParserConfig, DEFAULT_MAX_FILE_SIZE};
pub use types::{
    ChunkKind, FileCategory, FileOutcome, LocalRelation, ParseStatus, RelationKind, SourceChunk,
};
