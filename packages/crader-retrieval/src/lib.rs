//! Hybrid retrieval over indexed snapshots: dense + sparse search fused by
//! reciprocal rank, graph-neighborhood expansion, and time-travel reads of
//! historical snapshots.

pub mod error;
pub mod fusion;
pub mod reader;
pub mod retriever;
pub mod types;
pub mod walker;

pub use error::{Result, RetrievalError};
pub use fusion::{rrf_fuse, FusedHit, DEFAULT_RRF_K};
pub use reader::SnapshotReader;
pub use retriever::Retriever;
pub use types::{
    CallTarget, DirEntry, ParentContext, RetrievalQuery, RetrievedContext, SiblingHint,
};
pub use walker::GraphWalker;
