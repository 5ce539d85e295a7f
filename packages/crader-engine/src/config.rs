//! Process-wide configuration, resolved once at startup. There is no
//! mutable global state after resolution.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{EngineError, Result};

pub const ENV_DB_URL: &str = "CRADER_DB_URL";
pub const ENV_VOLUME: &str = "REPO_VOLUME";
pub const ENV_XREF_BIN: &str = "CRADER_XREF_BIN";

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub db_url: String,
    /// Storage root holding `cache/` (mirrors) and `workspaces/` (worktrees).
    pub volume_root: PathBuf,
    /// Parse worker pool size.
    pub worker_count: usize,
    /// Files per shard handed to one worker at a time.
    pub shard_size: usize,
    /// Rows buffered per bulk flush inside a worker.
    pub flush_rows: usize,
    pub max_file_size: u64,
    pub git_timeout: Duration,
    pub xref_timeout: Duration,
    /// Cross-reference indexer binary; the resolve phase is skipped when absent.
    pub xref_command: Option<String>,
    /// Failed-shard ratio above which the snapshot is marked failed.
    pub shard_failure_threshold: f64,
    /// Connection pool size for the orchestrator-side connector.
    pub pool_size: u32,
}

impl EngineConfig {
    /// Resolve from flags with environment fallback. A missing database URL
    /// is fatal before any work starts.
    pub fn resolve(db_url: Option<String>, volume_root: Option<PathBuf>) -> Result<Self> {
        let db_url = db_url
            .or_else(|| std::env::var(ENV_DB_URL).ok())
            .ok_or_else(|| {
                EngineError::Config(format!("no database URL (set --db-url or {})", ENV_DB_URL))
            })?;

        let volume_root = volume_root
            .or_else(|| std::env::var(ENV_VOLUME).ok().map(PathBuf::from))
            .unwrap_or_else(|| std::env::temp_dir().join("crader-volume"));

        Ok(Self {
            db_url,
            volume_root,
            worker_count: default_worker_count(),
            shard_size: 100,
            flush_rows: 1000,
            max_file_size: crader_parser::DEFAULT_MAX_FILE_SIZE,
            git_timeout: Duration::from_secs(300),
            xref_timeout: Duration::from_secs(120),
            xref_command: std::env::var(ENV_XREF_BIN).ok(),
            shard_failure_threshold: 0.10,
            pool_size: 8,
        })
    }

    pub fn with_worker_count(mut self, workers: usize) -> Self {
        self.worker_count = workers.max(1);
        self
    }
}

pub fn default_worker_count() -> usize {
    num_cpus::get().saturating_sub(1).max(1)
}
