use thiserror::Error;

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Error, Debug)]
pub enum StorageError {
    /// Deadlock, busy database, dropped connection. The write path retries
    /// these once with backoff before surfacing them.
    #[error("transient storage error: {0}")]
    Transient(String),

    /// Constraint violation or any other non-recoverable write failure.
    #[error("permanent storage error: {0}")]
    Permanent(String),

    #[error("database error: {0}")]
    Database(sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("snapshot not found: {0}")]
    SnapshotNotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StorageError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Transient(_))
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) => {
                let msg = db.message().to_lowercase();
                if msg.contains("locked") || msg.contains("busy") {
                    StorageError::Transient(db.message().to_string())
                } else if msg.contains("constraint") {
                    StorageError::Permanent(db.message().to_string())
                } else {
                    StorageError::Database(e)
                }
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
                StorageError::Transient(e.to_string())
            }
            _ => StorageError::Database(e),
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_detection() {
        let err = StorageError::Transient("database is locked".to_string());
        assert!(err.is_transient());

        let err = StorageError::Permanent("UNIQUE constraint failed".to_string());
        assert!(!err.is_transient());
    }
}
