//! Hybrid retriever: dense + sparse search fused by reciprocal rank.

use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crader_engine::EmbeddingProvider;
use crader_storage::{Store, Vector};

use crate::error::{Result, RetrievalError};
use crate::fusion::{rrf_fuse, DEFAULT_RRF_K};
use crate::types::{RetrievalQuery, RetrievedContext};
use crate::walker::GraphWalker;

pub struct Retriever {
    store: Store,
    provider: Arc<dyn EmbeddingProvider>,
    walker: GraphWalker,
    rrf_k: f64,
}

impl Retriever {
    pub fn new(store: Store, provider: Arc<dyn EmbeddingProvider>) -> Self {
        let walker = GraphWalker::new(store.clone());
        Self {
            store,
            provider,
            walker,
            rrf_k: DEFAULT_RRF_K,
        }
    }

    pub fn with_rrf_k(mut self, k: f64) -> Self {
        self.rrf_k = k;
        self
    }

    /// Run one hybrid query. A repository with no active snapshot yields an
    /// empty result, not an error.
    pub async fn retrieve(&self, query: &RetrievalQuery) -> Result<Vec<RetrievedContext>> {
        let Some(snapshot_id) = self.resolve_snapshot(query).await? else {
            return Ok(Vec::new());
        };
        let limit = query.limit.max(1);
        let candidate_limit = limit * 3;

        // One embedding call for the query text.
        let query_vector = self
            .provider
            .embed(&[query.text.clone()])
            .await
            .map_err(|e| RetrievalError::Provider(e.to_string()))?
            .into_iter()
            .next()
            .map(Vector)
            .ok_or_else(|| RetrievalError::Provider("provider returned no vector".into()))?;

        let (vector_hits, keyword_hits) = tokio::join!(
            self.store
                .search_vectors(&query_vector, candidate_limit, snapshot_id, &query.filters),
            self.store
                .search_fts(&query.text, candidate_limit, snapshot_id, &query.filters),
        );
        let (vector_hits, keyword_hits) = (vector_hits?, keyword_hits?);

        debug!(
            vector = vector_hits.len(),
            keyword = keyword_hits.len(),
            snapshot = %snapshot_id,
            "fusing rankings"
        );

        let fused = rrf_fuse(&vector_hits, &keyword_hits, self.rrf_k);
        let mut results = Vec::new();
        for hit in fused.into_iter().take(limit) {
            let Some(node) = self.store.get_node(hit.node_id).await? else {
                continue;
            };
            results.push(self.walker.context_for(&node, hit.score).await?);
        }
        Ok(results)
    }

    /// Resolve the snapshot the query runs against. The snapshot is
    /// required: a bare repo id means "that repository's active snapshot".
    async fn resolve_snapshot(&self, query: &RetrievalQuery) -> Result<Option<Uuid>> {
        if let Some(snapshot_id) = query.snapshot_id {
            return Ok(Some(snapshot_id));
        }
        let Some(repo_id) = query.repo_id else {
            return Err(RetrievalError::InvalidArgument(
                "retrieval requires a snapshot_id or repo_id".into(),
            ));
        };

        let branch = match &query.branch {
            Some(branch) => branch.clone(),
            None => match self.store.get_repository(repo_id).await? {
                Some(repo) => repo.default_branch,
                None => return Ok(None),
            },
        };

        Ok(self
            .store
            .get_active_snapshot(repo_id, &branch)
            .await?
            .map(|s| s.id))
    }
}
