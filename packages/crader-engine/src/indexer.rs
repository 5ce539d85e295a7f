//! Snapshot controller and ingestion orchestrator.
//!
//! Drives one indexing job through a linear state machine:
//!
//! ```text
//! open → prepare → parse → resolve → embed (optional) → activate
//!                          ↘ fail_snapshot → failed
//! ```
//!
//! Each transition commits before the next starts, and a failure at any
//! point marks the snapshot `failed`; a snapshot is never left `building`.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crader_storage::{Connector, Edge, Repository, SnapshotState, SnapshotStats, Store};

use crate::collector;
use crate::config::EngineConfig;
use crate::embed::{EmbeddingPipeline, EmbeddingProvider};
use crate::error::{EngineError, Result};
use crate::metadata::{self, RepoMetadata};
use crate::volume::{GitVolume, WorktreeGuard};
use crate::worker::{ParseWorker, ShardOutcome};
use crate::xref::XrefResolver;

/// Called once per worker before it serves any shard, with the worker id.
pub type WorkerInitHook = Arc<dyn Fn(usize) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct IndexOptions {
    pub branch: Option<String>,
    pub force: bool,
    pub auto_prune: bool,
    pub embed: bool,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            branch: None,
            force: false,
            auto_prune: false,
            embed: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IndexOutcome {
    pub repo_id: Uuid,
    pub snapshot_id: Uuid,
    pub commit_hash: String,
    pub branch: String,
    /// The `(repo, commit, branch)` tuple was already indexed and usable.
    pub short_circuited: bool,
    pub stats: SnapshotStats,
}

pub struct Indexer {
    config: EngineConfig,
    store: Store,
    volume: GitVolume,
    provider: Option<Arc<dyn EmbeddingProvider>>,
    worker_init: Option<WorkerInitHook>,
    cancel: CancellationToken,
}

impl Indexer {
    /// Open the orchestrator-side pooled connector and the git volume.
    /// Migrations run here so a fresh database is usable immediately.
    pub async fn new(config: EngineConfig) -> Result<Self> {
        let conn = Connector::pooled(&config.db_url, config.pool_size).await?;
        conn.migrate().await?;
        let volume = GitVolume::open(&config.volume_root, config.git_timeout)?;
        Ok(Self {
            config,
            store: Store::new(conn),
            volume,
            provider: None,
            worker_init: None,
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_worker_init(mut self, hook: WorkerInitHook) -> Self {
        self.worker_init = Some(hook);
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Index one repository URL (or local tree) at one branch.
    pub async fn index(&self, url: &str, opts: &IndexOptions) -> Result<IndexOutcome> {
        // -- open --------------------------------------------------------
        let source = self.open_source(url, opts).await?;
        let meta = &source.meta;

        self.store
            .ensure_repository(&Repository::new(
                meta.repo_id,
                &meta.url,
                &meta.name,
                &meta.branch,
            ))
            .await?;

        let (snapshot, is_new) = self
            .store
            .create_snapshot(meta.repo_id, &meta.commit_hash, &meta.branch)
            .await?;

        if !is_new {
            if opts.force {
                info!(snapshot_id = %snapshot.id, "force: rebuilding existing snapshot");
                self.store.reset_snapshot(snapshot.id).await?;
            } else {
                // Re-assert the at-most-one-active invariant before returning.
                if snapshot.state == SnapshotState::Ready
                    && self
                        .store
                        .get_active_snapshot(meta.repo_id, &meta.branch)
                        .await?
                        .is_none()
                {
                    let stats = self.store.snapshot_stats(snapshot.id).await?;
                    self.store
                        .activate_snapshot(meta.repo_id, snapshot.id, &serde_json::to_value(&stats)?)
                        .await?;
                }
                info!(snapshot_id = %snapshot.id, "snapshot already indexed, short-circuiting");
                return Ok(IndexOutcome {
                    repo_id: meta.repo_id,
                    snapshot_id: snapshot.id,
                    commit_hash: meta.commit_hash.clone(),
                    branch: meta.branch.clone(),
                    short_circuited: true,
                    stats: serde_json::from_value(snapshot.stats.clone()).unwrap_or_default(),
                });
            }
        }

        self.store.mark_building(snapshot.id).await?;

        // -- prepare .. embed -------------------------------------------
        let built = self.build(snapshot.id, &source, opts).await;
        let stats = match built {
            Ok(stats) => stats,
            Err(e) => {
                error!(snapshot_id = %snapshot.id, error = %e, "indexing failed");
                if let Err(mark) = self.store.fail_snapshot(snapshot.id, &e.to_string()).await {
                    warn!(error = %mark, "could not mark snapshot failed");
                }
                return Err(e);
            }
        };

        // -- activate ----------------------------------------------------
        self.store
            .activate_snapshot(meta.repo_id, snapshot.id, &serde_json::to_value(&stats)?)
            .await?;

        if opts.auto_prune {
            for superseded in self
                .store
                .list_superseded(meta.repo_id, &meta.branch)
                .await?
            {
                self.store.prune_snapshot(superseded.id).await?;
            }
        }

        Ok(IndexOutcome {
            repo_id: meta.repo_id,
            snapshot_id: snapshot.id,
            commit_hash: meta.commit_hash.clone(),
            branch: meta.branch.clone(),
            short_circuited: false,
            stats,
        })
    }

    async fn build(
        &self,
        snapshot_id: Uuid,
        source: &JobSource,
        opts: &IndexOptions,
    ) -> Result<SnapshotStats> {
        // prepare: materialize the tree and enumerate files.
        let worktree = match &source.mirror {
            Some(mirror) => {
                self.volume
                    .checkout_worktree(mirror, &source.meta.commit_hash)
                    .await?
            }
            None => WorktreeGuard::borrowed(source.local_path.clone().expect("local source")),
        };

        let files =
            collector::collect_files(worktree.path(), self.config.git_timeout).await?;
        info!(snapshot_id = %snapshot_id, files = files.len(), "prepare complete");

        // parse: shard fan-out to the worker pool.
        let edges = self.run_parse_pool(snapshot_id, worktree.path(), &files).await?;
        self.store.insert_edges(&edges).await?;

        // resolve: cross-reference indexer, when configured.
        if let Some(command) = &self.config.xref_command {
            let resolver = XrefResolver::new(command, self.config.xref_timeout);
            resolver
                .resolve(&self.store, snapshot_id, worktree.path())
                .await?;
        }

        // embed (optional).
        let mut stats = self.store.snapshot_stats(snapshot_id).await?;
        if opts.embed {
            if let Some(provider) = &self.provider {
                let pipeline = EmbeddingPipeline::new(self.store.clone(), provider.clone());
                let report = pipeline
                    .run(snapshot_id, self.cancel.child_token(), None)
                    .await?;
                stats.newly_embedded = report.newly_embedded;
                stats.recovered_from_history = report.recovered_from_history;
            } else {
                info!("no embedding provider configured, skipping embed phase");
            }
        }

        Ok(stats)
        // worktree guard drops here, removing the checkout.
    }

    /// Fan shards out to a pool of workers, each owning a single connector.
    /// Per-file failures are recorded on rows; worker-level failures count
    /// against the shard failure threshold.
    async fn run_parse_pool(
        &self,
        snapshot_id: Uuid,
        worktree: &Path,
        files: &[PathBuf],
    ) -> Result<Vec<Edge>> {
        let shards: VecDeque<Vec<PathBuf>> = files
            .chunks(self.config.shard_size.max(1))
            .map(|c| c.to_vec())
            .collect();
        let total_shards = shards.len();
        if total_shards == 0 {
            return Ok(Vec::new());
        }

        let queue = Arc::new(Mutex::new(shards));
        let workers = self.config.worker_count.min(total_shards).max(1);
        let (tx, mut rx) = mpsc::channel::<Result<ShardOutcome>>(total_shards);

        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let queue = queue.clone();
            let tx = tx.clone();
            let db_url = self.config.db_url.clone();
            let worktree = worktree.to_path_buf();
            let max_file_size = self.config.max_file_size;
            let flush_rows = self.config.flush_rows;
            let init = self.worker_init.clone();

            handles.push(tokio::spawn(async move {
                if let Some(hook) = init {
                    hook(worker_id);
                }
                let store = match Connector::single(&db_url).await {
                    Ok(conn) => Store::new(conn),
                    Err(e) => {
                        let _ = tx.send(Err(e.into())).await;
                        return;
                    }
                };
                let worker = ParseWorker {
                    worker_id,
                    store,
                    snapshot_id,
                    worktree,
                    max_file_size,
                    flush_rows,
                };
                loop {
                    let shard = { queue.lock().await.pop_front() };
                    let Some(shard) = shard else { break };
                    let result = worker.process_shard(shard).await;
                    if tx.send(result).await.is_err() {
                        break;
                    }
                }
            }));
        }
        drop(tx);

        let mut edges = Vec::new();
        let mut failed_shards = 0usize;
        let mut completed = 0usize;
        while let Some(result) = rx.recv().await {
            completed += 1;
            match result {
                Ok(outcome) => edges.extend(outcome.edges),
                Err(e) => {
                    warn!(error = %e, "shard failed");
                    failed_shards += 1;
                }
            }
        }
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "worker task panicked");
                failed_shards += 1;
            }
        }

        let failure_rate = failed_shards as f64 / total_shards as f64;
        if failure_rate > self.config.shard_failure_threshold {
            return Err(EngineError::SnapshotFailed(format!(
                "{}/{} shards failed (threshold {:.0}%)",
                failed_shards,
                total_shards,
                self.config.shard_failure_threshold * 100.0
            )));
        }

        info!(
            snapshot_id = %snapshot_id,
            shards = completed,
            failed = failed_shards,
            "parse phase complete"
        );
        Ok(edges)
    }

    /// Resolve where the job's tree comes from: a mirror of a remote, or a
    /// local repository indexed in place.
    async fn open_source(&self, url: &str, opts: &IndexOptions) -> Result<JobSource> {
        let as_path = Path::new(url);
        if as_path.is_dir() {
            let mut meta = metadata::describe(as_path)?;
            if let Some(branch) = &opts.branch {
                meta.branch = branch.clone();
            }
            return Ok(JobSource {
                meta,
                mirror: None,
                local_path: Some(as_path.to_path_buf()),
            });
        }

        let mirror = self.volume.ensure_mirror(url).await?;
        let branch = match &opts.branch {
            Some(branch) => branch.clone(),
            None => self.volume.default_branch(&mirror).await?,
        };
        let commit_hash = self.volume.resolve_head(&mirror, &branch).await?;

        Ok(JobSource {
            meta: RepoMetadata {
                repo_id: metadata::repo_id_for_url(url),
                url: metadata::sanitize_url(url),
                name: metadata::repo_name(url),
                branch,
                commit_hash,
            },
            mirror: Some(mirror),
            local_path: None,
        })
    }
}

struct JobSource {
    meta: RepoMetadata,
    mirror: Option<PathBuf>,
    local_path: Option<PathBuf>,
}
