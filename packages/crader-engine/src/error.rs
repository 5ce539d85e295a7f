use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Missing database URL, unreadable storage root. Fatal before any work.
    #[error("configuration error: {0}")]
    Config(String),

    /// Non-zero exit from clone/fetch/worktree. Fatal to the job.
    #[error("git failure: {0}")]
    Git(String),

    #[error(transparent)]
    Storage(#[from] crader_storage::StorageError),

    /// Per-file parse failure that escaped the per-file recording path.
    #[error("parse failure: {0}")]
    Parse(String),

    /// Cross-reference indexer crash or timeout, recorded per project root.
    #[error("indexer tool failure: {0}")]
    IndexerTool(String),

    /// Embedding RPC failure after retries, recorded per batch.
    #[error("provider failure: {0}")]
    Provider(String),

    #[error("snapshot failed: {0}")]
    SnapshotFailed(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("cancelled")]
    Cancelled,

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("worker panicked: {0}")]
    WorkerPanic(String),
}

impl EngineError {
    pub fn git<E: std::fmt::Display>(e: E) -> Self {
        Self::Git(e.to_string())
    }

    pub fn config<E: std::fmt::Display>(e: E) -> Self {
        Self::Config(e.to_string())
    }
}

impl From<git2::Error> for EngineError {
    fn from(e: git2::Error) -> Self {
        EngineError::Git(e.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Serialization(e.to_string())
    }
}
