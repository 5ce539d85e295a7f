//! Parse worker: one shard at a time, one private connector each.
//!
//! Workers parse their shard's files with rayon, then stream rows into
//! storage in bulk batches. Intra-file edges are returned to the
//! orchestrator instead of inserted here, so edges always land after every
//! node of the snapshot exists.

use std::path::{Path, PathBuf};

use chrono::Utc;
use rayon::prelude::*;
use tracing::{debug, warn};
use uuid::Uuid;

use crader_parser::{ChunkParser, FileOutcome, ParserConfig, RelationKind};
use crader_storage::{
    ChunkContent, ChunkKind, ChunkNode, Edge, FileCategory, FileRecord, ParsingStatus,
    RelationType, SearchDoc, Store,
};

use crate::error::Result;

#[derive(Debug, Default)]
pub struct ShardOutcome {
    pub files_processed: usize,
    pub files_skipped: usize,
    pub files_failed: usize,
    pub chunks_created: usize,
    /// Intra-file edges, deferred to the orchestrator.
    pub edges: Vec<Edge>,
}

pub struct ParseWorker {
    pub worker_id: usize,
    pub store: Store,
    pub snapshot_id: Uuid,
    pub worktree: PathBuf,
    pub max_file_size: u64,
    pub flush_rows: usize,
}

impl ParseWorker {
    pub async fn process_shard(&self, shard: Vec<PathBuf>) -> Result<ShardOutcome> {
        let worktree = self.worktree.clone();
        let max_file_size = self.max_file_size;

        // CPU-bound parsing off the runtime, fanned out with rayon.
        let outcomes: Vec<FileOutcome> = tokio::task::spawn_blocking(move || {
            let parser = ChunkParser::new(ParserConfig { max_file_size });
            shard
                .par_iter()
                .map(|rel| parse_one(&parser, &worktree, rel))
                .collect()
        })
        .await
        .map_err(|e| crate::error::EngineError::WorkerPanic(e.to_string()))?;

        let mut result = ShardOutcome::default();
        let mut files = Vec::new();
        let mut nodes = Vec::new();
        let mut contents = Vec::new();
        let mut docs = Vec::new();

        for outcome in &outcomes {
            let file_id = Uuid::new_v4();
            files.push(file_record(self.snapshot_id, file_id, outcome));

            match outcome.status {
                crader_parser::ParseStatus::Success => result.files_processed += 1,
                crader_parser::ParseStatus::Skipped => result.files_skipped += 1,
                crader_parser::ParseStatus::Error => result.files_failed += 1,
            }

            let mut node_ids = Vec::with_capacity(outcome.chunks.len());
            for chunk in &outcome.chunks {
                let bytes = outcome.chunk_bytes(chunk);
                let content = ChunkContent::from_bytes(bytes);
                let node = ChunkNode {
                    id: Uuid::new_v4(),
                    snapshot_id: self.snapshot_id,
                    file_id: Some(file_id),
                    file_path: outcome.path.clone(),
                    chunk_hash: content.chunk_hash.clone(),
                    kind: map_kind(chunk.kind),
                    start_line: chunk.start_line as i64,
                    end_line: chunk.end_line as i64,
                    byte_start: chunk.byte_start as i64,
                    byte_end: chunk.byte_end as i64,
                    is_external: false,
                    metadata: serde_json::json!({
                        "symbol": chunk.symbol,
                        "has_parse_errors": chunk.has_parse_errors,
                    }),
                };
                node_ids.push(node.id);

                let text = String::from_utf8_lossy(bytes);
                if !text.trim().is_empty() {
                    docs.push(SearchDoc {
                        node_id: node.id,
                        file_path: outcome.path.clone(),
                        tags: doc_tags(outcome, chunk),
                        content: text.into_owned(),
                    });
                }

                nodes.push(node);
                contents.push(content);
                result.chunks_created += 1;
            }

            for relation in &outcome.relations {
                let (Some(&source), Some(&target)) =
                    (node_ids.get(relation.source), node_ids.get(relation.target))
                else {
                    continue;
                };
                let mut edge = Edge::new(
                    source,
                    target,
                    match relation.kind {
                        RelationKind::Calls => RelationType::Calls,
                        RelationKind::Defines => RelationType::Defines,
                    },
                );
                edge.metadata = serde_json::json!({ "symbol": relation.symbol });
                result.edges.push(edge);
            }

            if nodes.len() >= self.flush_rows {
                self.flush(&mut files, &mut nodes, &mut contents, &mut docs).await?;
            }
        }
        self.flush(&mut files, &mut nodes, &mut contents, &mut docs).await?;

        debug!(
            worker = self.worker_id,
            files = outcomes.len(),
            chunks = result.chunks_created,
            "shard committed"
        );
        Ok(result)
    }

    async fn flush(
        &self,
        files: &mut Vec<FileRecord>,
        nodes: &mut Vec<ChunkNode>,
        contents: &mut Vec<ChunkContent>,
        docs: &mut Vec<SearchDoc>,
    ) -> Result<()> {
        if !files.is_empty() {
            self.store.insert_files(files).await?;
            files.clear();
        }
        if !nodes.is_empty() {
            self.store.insert_chunk_nodes(nodes).await?;
            nodes.clear();
        }
        if !contents.is_empty() {
            self.store.insert_chunk_contents(contents).await?;
            contents.clear();
        }
        if !docs.is_empty() {
            self.store.insert_search_docs(docs).await?;
            docs.clear();
        }
        Ok(())
    }
}

fn parse_one(parser: &ChunkParser, worktree: &Path, rel: &Path) -> FileOutcome {
    let rel_str = rel.to_string_lossy().replace('\\', "/");
    match std::fs::read(worktree.join(rel)) {
        Ok(bytes) => parser.parse_file(&rel_str, &bytes),
        Err(e) => {
            warn!(path = %rel_str, error = %e, "unreadable file");
            let mut outcome = FileOutcome::skipped(
                rel_str,
                crader_parser::FileCategory::Other,
                0,
                blake3::hash(&[]).to_hex().to_string(),
                format!("unreadable: {}", e),
            );
            outcome.status = crader_parser::ParseStatus::Error;
            outcome
        }
    }
}

fn file_record(snapshot_id: Uuid, file_id: Uuid, outcome: &FileOutcome) -> FileRecord {
    FileRecord {
        id: file_id,
        snapshot_id,
        path: outcome.path.clone(),
        language: outcome.language.clone(),
        size_bytes: outcome.size_bytes as i64,
        category: map_category(outcome.category),
        file_hash: outcome.file_hash.clone(),
        parsing_status: map_status(outcome.status),
        parsing_error: outcome.error.clone(),
        indexed_at: Utc::now(),
    }
}

fn doc_tags(outcome: &FileOutcome, chunk: &crader_parser::SourceChunk) -> String {
    let stem = Path::new(&outcome.path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("");
    let mut tags = vec![chunk.kind.as_str().to_string(), stem.to_string()];
    if let Some(symbol) = &chunk.symbol {
        tags.push(symbol.clone());
    }
    if let Some(language) = &outcome.language {
        tags.push(language.clone());
    }
    tags.join(" ")
}

fn map_kind(kind: crader_parser::ChunkKind) -> ChunkKind {
    match kind {
        crader_parser::ChunkKind::Function => ChunkKind::Function,
        crader_parser::ChunkKind::Method => ChunkKind::Method,
        crader_parser::ChunkKind::Class => ChunkKind::Class,
        crader_parser::ChunkKind::Block => ChunkKind::Block,
        crader_parser::ChunkKind::Module => ChunkKind::Module,
        crader_parser::ChunkKind::Statement => ChunkKind::Statement,
        crader_parser::ChunkKind::Filler => ChunkKind::Filler,
    }
}

fn map_category(category: crader_parser::FileCategory) -> FileCategory {
    match category {
        crader_parser::FileCategory::Source => FileCategory::Source,
        crader_parser::FileCategory::Test => FileCategory::Test,
        crader_parser::FileCategory::Config => FileCategory::Config,
        crader_parser::FileCategory::Docs => FileCategory::Docs,
        crader_parser::FileCategory::Other => FileCategory::Other,
    }
}

fn map_status(status: crader_parser::ParseStatus) -> ParsingStatus {
    match status {
        crader_parser::ParseStatus::Success => ParsingStatus::Success,
        crader_parser::ParseStatus::Skipped => ParsingStatus::Skipped,
        crader_parser::ParseStatus::Error => ParsingStatus::Error,
    }
}
