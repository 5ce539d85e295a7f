//! Two-phase embedding pipeline.
//!
//! Phase 1 (stage) walks the snapshot's chunks, computes a deterministic
//! enrichment context and vector hash per chunk, and fills the staging
//! table. Vectors already known for the same `(vector_hash, model)` are
//! recovered from history and never re-embedded. Phase 2 (embed) pages
//! through the remainder with bounded provider concurrency, committing
//! vectors as they return and streaming progress to the caller.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crader_storage::{ChunkNode, EmbeddingRow, StagedEmbedding, Store};

use crate::embed::provider::EmbeddingProvider;
use crate::error::Result;

/// Texts shorter than this are replaced by a placeholder; providers are
/// never sent empty input.
const MIN_TEXT_LEN: usize = 3;
const EMPTY_PLACEHOLDER: &str = "(empty code block)";

/// Head of the chunk included in the enrichment context.
const CONTEXT_CONTENT_HEAD: usize = 4096;

const STAGE_BATCH: usize = 500;
const PROVIDER_RETRIES: usize = 2;
const RETRY_BACKOFF: Duration = Duration::from_millis(500);
const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq)]
pub enum EmbedProgress {
    Progress { total_embedded: usize },
    Completed { newly_embedded: usize, recovered_from_history: usize },
}

#[derive(Debug, Clone, Default)]
pub struct EmbedReport {
    pub staged: usize,
    pub newly_embedded: usize,
    pub recovered_from_history: usize,
    pub skipped_batches: usize,
    pub cancelled: bool,
}

/// Deterministic enrichment context for one chunk. The same chunk in the
/// same file always stages the same text, which is what makes vector reuse
/// across snapshots sound.
pub fn enrichment_context(node: &ChunkNode, language: Option<&str>, content: &str) -> String {
    let symbol = node
        .metadata
        .get("symbol")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    let head: String = content.chars().take(CONTEXT_CONTENT_HEAD).collect();
    format!(
        "path: {}\nlanguage: {}\nkind: {}\nsymbol: {}\n\n{}",
        node.file_path,
        language.unwrap_or("unknown"),
        node.kind.as_str(),
        symbol,
        head
    )
}

/// `vector_hash = H(chunk_hash ‖ enrichment_context ‖ model)`.
pub fn vector_hash(chunk_hash: &str, context: &str, model: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(chunk_hash.as_bytes());
    hasher.update(context.as_bytes());
    hasher.update(model.as_bytes());
    hasher.finalize().to_hex().to_string()
}

pub struct EmbeddingPipeline {
    store: Store,
    provider: Arc<dyn EmbeddingProvider>,
    batch_timeout: Duration,
}

impl EmbeddingPipeline {
    pub fn new(store: Store, provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            store,
            provider,
            batch_timeout: DEFAULT_BATCH_TIMEOUT,
        }
    }

    /// Hard deadline per provider call. Exceeding it fails only the batch.
    pub fn with_batch_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout = timeout;
        self
    }

    /// Run both phases for one snapshot.
    pub async fn run(
        &self,
        snapshot_id: Uuid,
        cancel: CancellationToken,
        progress: Option<mpsc::Sender<EmbedProgress>>,
    ) -> Result<EmbedReport> {
        let mut report = EmbedReport::default();

        self.store.prepare_embedding_staging(snapshot_id).await?;
        report.staged = self.stage(snapshot_id).await?;

        report.recovered_from_history =
            self.store.backfill_staging_vectors(snapshot_id).await? as usize;
        self.store.flush_staged_hits(snapshot_id).await?;

        let embed_result = self.embed_remaining(snapshot_id, &cancel, &progress, &mut report).await;

        // Staging rows are transient either way.
        if let Err(e) = self.store.cleanup_staging(snapshot_id).await {
            warn!(error = %e, "staging cleanup failed");
        }
        embed_result?;

        if report.cancelled {
            info!(
                snapshot_id = %snapshot_id,
                embedded = report.newly_embedded,
                "embedding cancelled, committed vectors kept"
            );
        } else {
            if let Some(tx) = &progress {
                let _ = tx
                    .send(EmbedProgress::Completed {
                        newly_embedded: report.newly_embedded,
                        recovered_from_history: report.recovered_from_history,
                    })
                    .await;
            }
            info!(
                snapshot_id = %snapshot_id,
                newly = report.newly_embedded,
                recovered = report.recovered_from_history,
                skipped_batches = report.skipped_batches,
                "embedding complete"
            );
        }
        Ok(report)
    }

    /// Phase 1: stream the snapshot's chunks into the staging table.
    async fn stage(&self, snapshot_id: Uuid) -> Result<usize> {
        let model = self.provider.model_name().to_string();
        let mut staged = 0usize;
        let mut pending: Vec<StagedEmbedding> = Vec::new();

        for file in self.store.list_files(snapshot_id).await? {
            if file.parsing_status != crader_storage::ParsingStatus::Success {
                continue;
            }
            for (node, content) in self.store.get_file_chunks(snapshot_id, &file.path).await? {
                let text = String::from_utf8_lossy(&content);
                if text.trim().is_empty() {
                    continue;
                }
                let context = enrichment_context(&node, file.language.as_deref(), &text);
                let hash = vector_hash(&node.chunk_hash, &context, &model);
                let staged_text = if context.trim().len() < MIN_TEXT_LEN {
                    EMPTY_PLACEHOLDER.to_string()
                } else {
                    context
                };
                pending.push(StagedEmbedding {
                    snapshot_id,
                    node_id: node.id,
                    vector_hash: hash,
                    model: model.clone(),
                    text: staged_text,
                });

                if pending.len() >= STAGE_BATCH {
                    staged += self.store.load_staging_data(&pending).await? as usize;
                    pending.clear();
                }
            }
        }
        if !pending.is_empty() {
            staged += self.store.load_staging_data(&pending).await? as usize;
        }
        Ok(staged)
    }

    /// Phase 2: page through staged rows and dispatch to the provider with
    /// bounded concurrency. A page failure after retries skips those nodes
    /// and leaves the snapshot otherwise usable.
    async fn embed_remaining(
        &self,
        snapshot_id: Uuid,
        cancel: &CancellationToken,
        progress: &Option<mpsc::Sender<EmbedProgress>>,
        report: &mut EmbedReport,
    ) -> Result<()> {
        let batch_size = self.provider.max_batch_size().max(1);
        let concurrency = self.provider.max_concurrency().max(1);
        let page_size = batch_size * concurrency;
        let mut failed_nodes: HashSet<Uuid> = HashSet::new();

        loop {
            if cancel.is_cancelled() {
                report.cancelled = true;
                return Ok(());
            }

            let delta = self
                .store
                .fetch_staging_delta(snapshot_id, page_size + failed_nodes.len())
                .await?;
            let pending: Vec<StagedEmbedding> = delta
                .into_iter()
                .filter(|row| !failed_nodes.contains(&row.node_id))
                .take(page_size)
                .collect();
            if pending.is_empty() {
                return Ok(());
            }

            let batches: Vec<Vec<StagedEmbedding>> =
                pending.chunks(batch_size).map(|c| c.to_vec()).collect();

            let results: Vec<(Vec<StagedEmbedding>, Result<Vec<Vec<f32>>>)> =
                stream::iter(batches.into_iter().map(|batch| async move {
                    let outcome = self.embed_batch(&batch).await;
                    (batch, outcome)
                }))
                .buffer_unordered(concurrency)
                .collect()
                .await;

            for (batch, outcome) in results {
                match outcome {
                    Ok(vectors) => {
                        let rows: Vec<EmbeddingRow> = batch
                            .iter()
                            .zip(vectors)
                            .map(|(staged, vector)| EmbeddingRow {
                                node_id: staged.node_id,
                                snapshot_id,
                                vector_hash: staged.vector_hash.clone(),
                                model: staged.model.clone(),
                                vector,
                            })
                            .collect();
                        report.newly_embedded +=
                            self.store.save_embeddings_direct(&rows).await? as usize;

                        if let Some(tx) = progress {
                            let _ = tx
                                .send(EmbedProgress::Progress {
                                    total_embedded: report.newly_embedded
                                        + report.recovered_from_history,
                                })
                                .await;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, batch = batch.len(), "embedding batch skipped after retries");
                        report.skipped_batches += 1;
                        failed_nodes.extend(batch.iter().map(|s| s.node_id));
                    }
                }
            }
        }
    }

    async fn embed_batch(&self, batch: &[StagedEmbedding]) -> Result<Vec<Vec<f32>>> {
        let texts: Vec<String> = batch
            .iter()
            .map(|s| {
                if s.text.trim().len() < MIN_TEXT_LEN {
                    EMPTY_PLACEHOLDER.to_string()
                } else {
                    s.text.clone()
                }
            })
            .collect();

        let mut last_err = None;
        for attempt in 0..=PROVIDER_RETRIES {
            if attempt > 0 {
                tokio::time::sleep(RETRY_BACKOFF * attempt as u32).await;
            }
            let call = tokio::time::timeout(self.batch_timeout, self.provider.embed(&texts));
            match call.await {
                Ok(Ok(vectors)) => return Ok(vectors),
                Ok(Err(e)) => {
                    warn!(attempt, error = %e, "provider call failed");
                    last_err = Some(e);
                }
                Err(_) => {
                    warn!(attempt, timeout = ?self.batch_timeout, "provider call timed out");
                    last_err = Some(crate::error::EngineError::Provider(format!(
                        "embedding batch timed out after {:?}",
                        self.batch_timeout
                    )));
                }
            }
        }
        Err(last_err.expect("at least one attempt"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crader_storage::ChunkKind;

    fn node(path: &str, hash: &str) -> ChunkNode {
        ChunkNode {
            id: Uuid::new_v4(),
            snapshot_id: Uuid::new_v4(),
            file_id: None,
            file_path: path.to_string(),
            chunk_hash: hash.to_string(),
            kind: ChunkKind::Function,
            start_line: 1,
            end_line: 5,
            byte_start: 0,
            byte_end: 10,
            is_external: false,
            metadata: serde_json::json!({ "symbol": "login" }),
        }
    }

    #[test]
    fn test_enrichment_context_is_deterministic() {
        let n = node("src/auth.py", "abc");
        let a = enrichment_context(&n, Some("python"), "def login(): pass");
        let b = enrichment_context(&n, Some("python"), "def login(): pass");
        assert_eq!(a, b);
        assert!(a.contains("src/auth.py"));
        assert!(a.contains("login"));
    }

    #[test]
    fn test_vector_hash_varies_with_each_input() {
        let base = vector_hash("chunk", "ctx", "model-a");
        assert_eq!(vector_hash("chunk", "ctx", "model-a"), base);
        assert_ne!(vector_hash("chunk2", "ctx", "model-a"), base);
        assert_ne!(vector_hash("chunk", "ctx2", "model-a"), base);
        assert_ne!(vector_hash("chunk", "ctx", "model-b"), base);
    }
}
