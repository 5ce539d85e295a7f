//! Graph walker: neighborhood context for one retrieved chunk.

use crader_storage::{ChunkKind, ChunkNode, NeighborDirection, Store};

use crate::error::Result;
use crate::types::{CallTarget, ParentContext, RetrievedContext, SiblingHint};

/// Hops tried when walking past module-type parents.
const MAX_PARENT_HOPS: usize = 3;

pub struct GraphWalker {
    store: Store,
    max_call_targets: usize,
}

impl GraphWalker {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            max_call_targets: 5,
        }
    }

    pub fn with_max_call_targets(mut self, max: usize) -> Self {
        self.max_call_targets = max;
        self
    }

    /// Assemble the full context for a fused hit.
    pub async fn context_for(&self, node: &ChunkNode, score: f64) -> Result<RetrievedContext> {
        let content = self
            .store
            .get_content(&node.chunk_hash)
            .await?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_default();

        Ok(RetrievedContext {
            node_id: node.id,
            file_path: node.file_path.clone(),
            kind: node.kind,
            symbol: node_symbol(node),
            start_line: node.start_line,
            end_line: node.end_line,
            score,
            content,
            parent: self.parent_of(node).await?,
            outgoing_calls: self.calls_of(node).await?,
            prev: self.sibling(node, NeighborDirection::Prev).await?,
            next: self.sibling(node, NeighborDirection::Next).await?,
        })
    }

    /// Nearest enclosing chunk, walking past module-type parents.
    async fn parent_of(&self, node: &ChunkNode) -> Result<Option<ParentContext>> {
        let mut current = node.id;
        for _ in 0..MAX_PARENT_HOPS {
            let Some(parent) = self
                .store
                .get_neighbor_chunk(current, NeighborDirection::Parent)
                .await?
            else {
                return Ok(None);
            };
            if parent.kind != ChunkKind::Module {
                return Ok(Some(ParentContext {
                    node_id: parent.id,
                    kind: parent.kind,
                    symbol: node_symbol(&parent),
                    file_path: parent.file_path,
                }));
            }
            current = parent.id;
        }
        Ok(None)
    }

    /// Outgoing call targets, deduplicated by symbol, unknowns filtered.
    async fn calls_of(&self, node: &ChunkNode) -> Result<Vec<CallTarget>> {
        let mut seen = std::collections::HashSet::new();
        let mut targets = Vec::new();
        for neighbor in self.store.get_outgoing_calls(node.id).await? {
            let symbol = neighbor
                .symbol
                .clone()
                .or_else(|| node_symbol(&neighbor.node))
                .unwrap_or_else(|| "<unknown>".to_string());
            if symbol == "<unknown>" || !seen.insert(symbol.clone()) {
                continue;
            }
            targets.push(CallTarget {
                symbol,
                file_path: neighbor.node.file_path.clone(),
                node_id: neighbor.node.id,
            });
            if targets.len() >= self.max_call_targets {
                break;
            }
        }
        Ok(targets)
    }

    async fn sibling(
        &self,
        node: &ChunkNode,
        direction: NeighborDirection,
    ) -> Result<Option<SiblingHint>> {
        Ok(self
            .store
            .get_neighbor_chunk(node.id, direction)
            .await?
            .map(|sibling| SiblingHint {
                node_id: sibling.id,
                kind: sibling.kind,
                symbol: node_symbol(&sibling),
                start_line: sibling.start_line,
            }))
    }
}

fn node_symbol(node: &ChunkNode) -> Option<String> {
    node.metadata
        .get("symbol")
        .and_then(|v| v.as_str())
        .map(String::from)
}
