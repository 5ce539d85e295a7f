//! Reciprocal rank fusion of the dense and sparse rankings.

use uuid::Uuid;

use crader_storage::{FtsHit, VectorHit};

pub const DEFAULT_RRF_K: f64 = 60.0;

#[derive(Debug, Clone, PartialEq)]
pub struct FusedHit {
    pub node_id: Uuid,
    pub file_path: String,
    pub score: f64,
    pub vector_score: Option<f32>,
}

/// `score(doc) = Σ_m 1 / (k + rank_m(doc))` with 1-based ranks per
/// modality. Ties break by descending vector score, then ascending node id.
pub fn rrf_fuse(vector: &[VectorHit], keyword: &[FtsHit], k: f64) -> Vec<FusedHit> {
    let mut fused: Vec<FusedHit> = Vec::new();

    let mut upsert = |node_id: Uuid, file_path: &str, contribution: f64, vscore: Option<f32>| {
        match fused.iter_mut().find(|f| f.node_id == node_id) {
            Some(hit) => {
                hit.score += contribution;
                if hit.vector_score.is_none() {
                    hit.vector_score = vscore;
                }
            }
            None => fused.push(FusedHit {
                node_id,
                file_path: file_path.to_string(),
                score: contribution,
                vector_score: vscore,
            }),
        }
    };

    for (index, hit) in vector.iter().enumerate() {
        upsert(hit.node_id, &hit.file_path, 1.0 / (k + index as f64 + 1.0), Some(hit.score));
    }
    for (index, hit) in keyword.iter().enumerate() {
        upsert(hit.node_id, &hit.file_path, 1.0 / (k + index as f64 + 1.0), None);
    }

    fused.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                let av = a.vector_score.unwrap_or(f32::MIN);
                let bv = b.vector_score.unwrap_or(f32::MIN);
                bv.partial_cmp(&av).unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.node_id.cmp(&b.node_id))
    });
    fused
}
