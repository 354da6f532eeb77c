//! Optional post-search reordering: diversity (MMR), weighted metadata
//! scoring, or a no-op pass-through.

use nbase_common::distance::distance;
use nbase_common::{DistanceMetric, Metadata, Result, ScoredId};

/// Which reranking strategy to apply, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RerankMethod {
    #[default]
    Standard,
    Diversity,
    Weighted,
}

/// Maximal marginal relevance: greedily builds a list of size `k` trading
/// off relevance to `query` against dissimilarity to what has already been
/// selected.
pub fn rerank_diversity(
    query: &[f32],
    metric: DistanceMetric,
    vectors: &[(ScoredId, Vec<f32>)],
    k: usize,
    lambda: f32,
) -> Vec<ScoredId> {
    let mut remaining: Vec<&(ScoredId, Vec<f32>)> = vectors.iter().collect();
    let mut selected: Vec<&(ScoredId, Vec<f32>)> = Vec::with_capacity(k.min(vectors.len()));

    while selected.len() < k && !remaining.is_empty() {
        let mut best_idx = 0;
        let mut best_score = f32::NEG_INFINITY;
        for (idx, (_, candidate_vec)) in remaining.iter().map(|(s, v)| (s, v)).enumerate() {
            let relevance = 1.0 - distance(query, candidate_vec, metric).unwrap_or(1.0);
            let diversity_penalty = selected
                .iter()
                .map(|(_, selected_vec)| {
                    1.0 - distance(candidate_vec, selected_vec, metric).unwrap_or(1.0)
                })
                .fold(f32::NEG_INFINITY, f32::max);
            let diversity_penalty = if diversity_penalty.is_finite() {
                diversity_penalty
            } else {
                0.0
            };
            let score = lambda * relevance - (1.0 - lambda) * diversity_penalty;
            if score > best_score {
                best_score = score;
                best_idx = idx;
            }
        }
        selected.push(remaining.remove(best_idx));
    }

    selected.into_iter().map(|(s, _)| s.clone()).collect()
}

/// Combines each result's distance with a weighted sum over numeric
/// metadata fields, then re-sorts ascending by the composite score (spec
/// section 4.7 step 4).
pub fn rerank_weighted(mut results: Vec<ScoredId>, fields: &[(String, f32)]) -> Result<Vec<ScoredId>> {
    let mut scored: Vec<(f32, ScoredId)> = Vec::with_capacity(results.len());
    for result in results.drain(..) {
        let weighted_sum: f32 = fields
            .iter()
            .map(|(field, weight)| {
                metadata_numeric_field(result.metadata.as_ref(), field).unwrap_or(0.0) * weight
            })
            .sum();
        let composite = result.distance + weighted_sum;
        scored.push((composite, result));
    }
    scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
    Ok(scored.into_iter().map(|(_, r)| r).collect())
}

fn metadata_numeric_field(metadata: Option<&Metadata>, field: &str) -> Option<f32> {
    metadata?.get(field)?.as_f64().map(|v| v as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nbase_common::VectorId;

    fn sid(id: u64, distance: f32) -> ScoredId {
        ScoredId {
            id: VectorId::Int(id),
            distance,
            metadata: None,
        }
    }

    #[test]
    fn diversity_prefers_relevance_when_lambda_is_one() {
        let query = vec![0.0, 0.0];
        let vectors = vec![
            (sid(1, 0.0), vec![0.0, 0.0]),
            (sid(2, 0.0), vec![0.0, 0.0]),
        ];
        let out = rerank_diversity(&query, DistanceMetric::Euclidean, &vectors, 2, 1.0);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn diversity_avoids_near_duplicates_when_lambda_is_low() {
        let query = vec![0.0, 0.0];
        let vectors = vec![
            (sid(1, 0.0), vec![0.0, 0.0]),
            (sid(2, 0.01), vec![0.0, 0.01]),
            (sid(3, 5.0), vec![5.0, 5.0]),
        ];
        let out = rerank_diversity(&query, DistanceMetric::Euclidean, &vectors, 2, 0.3);
        assert_eq!(out[0].id, VectorId::Int(1));
        assert_eq!(out[1].id, VectorId::Int(3));
    }

    #[test]
    fn weighted_rerank_reorders_by_composite_score() {
        let mut low_dist_low_weight = sid(1, 0.1);
        low_dist_low_weight.metadata = Some(
            [("boost".to_string(), serde_json::json!(-10.0))]
                .into_iter()
                .collect(),
        );
        let high_dist_high_weight = sid(2, 0.2);

        let results = vec![high_dist_high_weight, low_dist_low_weight];
        let reranked = rerank_weighted(results, &[("boost".to_string(), 1.0)]).unwrap();
        assert_eq!(reranked[0].id, VectorId::Int(1));
    }
}
