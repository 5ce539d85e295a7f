//! Indexing engine: repository lifecycle, parallel parse-and-ingest,
//! cross-reference resolution, and the staged embedding pipeline.

pub mod collector;
pub mod config;
pub mod embed;
pub mod error;
pub mod indexer;
pub mod metadata;
pub mod volume;
pub mod worker;
pub mod xref;

pub use config::EngineConfig;
pub use embed::{EmbedProgress, EmbedReport, EmbeddingPipeline, EmbeddingProvider, HashProvider, OpenAiProvider};
pub use error::{EngineError, Result};
pub use indexer::{IndexOptions, IndexOutcome, Indexer, WorkerInitHook};
pub use metadata::RepoMetadata;
pub use volume::{GitVolume, MirrorLock, WorktreeGuard};
pub use xref::{XrefReport, XrefResolver};
