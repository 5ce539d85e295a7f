//! Cross-reference resolution.
//!
//! Drives one indexer subprocess per project root, pools the occurrence
//! stream into a symbol table, then pairs every non-defining occurrence
//! with its symbol's definition to emit graph edges. Runs strictly after
//! chunk ingestion so byte-range lookups hit.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use dashmap::DashMap;
use tokio::process::Command;
use tracing::{info, warn};
use uuid::Uuid;

use crader_storage::{ChunkNode, Edge, Store};

use crate::error::{EngineError, Result};
use crate::xref::protocol::{relation_for_mask, FrameReader, OccurrenceRecord};
use crate::xref::scanner::{scan_project_roots, ProjectRoot};

#[derive(Debug, Default, Clone)]
pub struct XrefReport {
    pub projects_indexed: usize,
    pub projects_failed: usize,
    pub edges_created: usize,
    pub external_targets: usize,
    pub orphans_dropped: usize,
    /// Per-root failures, recorded and skipped.
    pub failures: Vec<(String, String)>,
}

pub struct XrefResolver {
    command: String,
    timeout: Duration,
}

impl XrefResolver {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }

    /// Resolve cross-references for a whole worktree into edges.
    pub async fn resolve(
        &self,
        store: &Store,
        snapshot_id: Uuid,
        worktree: &Path,
    ) -> Result<XrefReport> {
        let mut report = XrefReport::default();
        let roots = scan_project_roots(worktree);
        if roots.is_empty() {
            info!("no project roots found, skipping cross-reference pass");
            return Ok(report);
        }

        // symbol -> occurrences, pooled across roots.
        let table: DashMap<String, Vec<OccurrenceRecord>> = DashMap::new();

        for root in &roots {
            match self.run_indexer(worktree, root).await {
                Ok(occurrences) => {
                    report.projects_indexed += 1;
                    for mut occ in occurrences {
                        // Rebase tool-relative paths onto the worktree.
                        if !root.path.as_os_str().is_empty() {
                            occ.file = format!("{}/{}", root.path.display(), occ.file);
                        }
                        table.entry(occ.symbol.clone()).or_default().push(occ);
                    }
                }
                Err(e) => {
                    warn!(root = %root.path.display(), error = %e, "indexer tool failed, continuing");
                    report.projects_failed += 1;
                    report
                        .failures
                        .push((root.path.display().to_string(), e.to_string()));
                }
            }
        }

        // Node lookups repeat heavily per (file, range); memoize.
        let mut node_cache: HashMap<(String, u64), Option<ChunkNode>> = HashMap::new();
        let mut edges = Vec::new();
        let mut sentinels: HashMap<String, ChunkNode> = HashMap::new();

        for entry in table.iter() {
            let occurrences = entry.value();
            let definition = occurrences.iter().find(|o| o.is_definition());

            for occ in occurrences.iter().filter(|o| !o.is_definition()) {
                let Some(source) = self
                    .node_at(store, snapshot_id, &mut node_cache, &occ.file, occ.byte_start)
                    .await?
                else {
                    report.orphans_dropped += 1;
                    continue;
                };

                let target_id = match definition {
                    Some(def) => {
                        match self
                            .node_at(store, snapshot_id, &mut node_cache, &def.file, def.byte_start)
                            .await?
                        {
                            Some(node) => node.id,
                            None => {
                                report.orphans_dropped += 1;
                                continue;
                            }
                        }
                    }
                    None => {
                        // Defined outside the tree: a stable sentinel.
                        let sentinel = sentinels.entry(entry.key().clone()).or_insert_with(|| {
                            ChunkNode::external_sentinel(snapshot_id, entry.key())
                        });
                        sentinel.id
                    }
                };

                if source.id == target_id {
                    continue;
                }
                let mut edge = Edge::new(source.id, target_id, relation_for_mask(occ.role_mask));
                edge.metadata = serde_json::json!({ "symbol": entry.key() });
                edges.push(edge);
            }
        }

        report.external_targets = sentinels.len();
        if !sentinels.is_empty() {
            let nodes: Vec<ChunkNode> = sentinels.into_values().collect();
            store.insert_chunk_nodes(&nodes).await?;
        }
        report.edges_created = store.insert_edges(&edges).await? as usize;

        info!(
            projects = report.projects_indexed,
            failed = report.projects_failed,
            edges = report.edges_created,
            external = report.external_targets,
            "cross-reference pass complete"
        );
        Ok(report)
    }

    async fn node_at(
        &self,
        store: &Store,
        snapshot_id: Uuid,
        cache: &mut HashMap<(String, u64), Option<ChunkNode>>,
        file: &str,
        offset: u64,
    ) -> Result<Option<ChunkNode>> {
        let key = (file.to_string(), offset);
        if let Some(hit) = cache.get(&key) {
            return Ok(hit.clone());
        }
        let node = store
            .find_node_at(snapshot_id, file, offset as i64)
            .await?;
        cache.insert(key, node.clone());
        Ok(node)
    }

    /// One subprocess invocation per project root, under a hard timeout.
    async fn run_indexer(
        &self,
        worktree: &Path,
        root: &ProjectRoot,
    ) -> Result<Vec<OccurrenceRecord>> {
        let root_dir = worktree.join(&root.path);
        let mut cmd = Command::new(&self.command);
        cmd.arg(&root_dir)
            .arg("--language")
            .arg(&root.language)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| {
                EngineError::IndexerTool(format!(
                    "indexer timed out after {:?} on {}",
                    self.timeout,
                    root.path.display()
                ))
            })?
            .map_err(|e| EngineError::IndexerTool(format!("failed to spawn indexer: {}", e)))?;

        if !output.status.success() {
            return Err(EngineError::IndexerTool(format!(
                "indexer exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let mut reader = FrameReader::new(output.stdout.as_slice());
        let mut occurrences = Vec::new();
        while let Some(record) = reader.next_occurrence()? {
            occurrences.push(record);
        }
        Ok(occurrences)
    }
}
