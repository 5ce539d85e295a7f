//! Storage adapter for the crader snapshot store.
//!
//! One SQLite schema holds repositories, snapshots, the chunk graph, the
//! full-text and vector indexes, and the transient embedding staging table.
//! Three connector variants share the `Store` interface: a pool for the
//! orchestrator and retriever, a single connection for parse workers, and
//! an embedded in-memory database for tests.

pub mod connector;
pub mod error;
pub mod models;
pub mod store;
pub mod vector;

pub use connector::{Connector, ConnectorKind, MIGRATOR};
pub use error::{Result, StorageError};
pub use models::{
    ChunkContent, ChunkKind, ChunkNode, Edge, EmbeddingRow, FileCategory, FileRecord,
    ParsingStatus, RelationType, Repository, SearchDoc, Snapshot, SnapshotState, SnapshotStats,
    StagedEmbedding,
};
pub use store::{FtsHit, NeighborDirection, NeighborRef, SearchFilters, Store, VectorHit};
pub use vector::Vector;
