use thiserror::Error;

pub type Result<T> = std::result::Result<T, RetrievalError>;

#[derive(Error, Debug)]
pub enum RetrievalError {
    /// Neither a snapshot id nor a repository id was supplied.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Storage(#[from] crader_storage::StorageError),

    #[error("embedding provider failed: {0}")]
    Provider(String),
}

impl From<crader_engine::EngineError> for RetrievalError {
    fn from(e: crader_engine::EngineError) -> Self {
        RetrievalError::Provider(e.to_string())
    }
}
