//! Result cache for the unified search coordinator. Keyed by a deterministic
//! fingerprint of the query vector plus `k` and the subset of search options
//! that affect the result set.

use crate::RerankMethod;
use lru::LruCache;
use nbase_common::{DistanceMetric, ScoredId};
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;

/// Samples up to 16 positions of `vector`, combining each sampled value
/// (scaled by 1000, truncated) with its index into a 32-bit rolling hash.
/// Two calls with bitwise-identical vectors always produce the same
/// fingerprint; near-identical vectors usually do too, which is an accepted
/// trade-off of a fingerprint over a full key.
pub fn vector_fingerprint(vector: &[f32]) -> u32 {
    const FNV_OFFSET: u32 = 2_166_136_261;
    const FNV_PRIME: u32 = 16_777_619;

    if vector.is_empty() {
        return FNV_OFFSET;
    }
    let step = (vector.len() / 16).max(1);
    let mut hash = FNV_OFFSET;
    let mut i = 0;
    while i < vector.len() {
        let scaled = (vector[i] * 1000.0) as i32 as u32;
        let combined = scaled ^ (i as u32);
        hash ^= combined;
        hash = hash.wrapping_mul(FNV_PRIME);
        i += step;
    }
    hash
}

/// The subset of [`crate::SearchOptions`] that affects which results come
/// back (as opposed to `include_metadata`, which only affects hydration of
/// an already-determined result set).
pub struct CacheKeyInputs<'a> {
    pub k: usize,
    pub use_hnsw: bool,
    pub rerank: bool,
    pub rerank_method: RerankMethod,
    pub rerank_lambda: Option<f32>,
    pub distance_metric: Option<DistanceMetric>,
    pub partition_ids: Option<&'a [String]>,
    pub ef_search: Option<usize>,
    pub exact_dimensions: bool,
}

/// Deterministic key for a search call: identical (fingerprint, k,
/// options-affecting-results) always produces the same key.
pub fn cache_key(fingerprint: u32, inputs: &CacheKeyInputs<'_>) -> u64 {
    let mut hasher = DefaultHasher::new();
    fingerprint.hash(&mut hasher);
    inputs.k.hash(&mut hasher);
    inputs.use_hnsw.hash(&mut hasher);
    inputs.rerank.hash(&mut hasher);
    (inputs.rerank_method as u8).hash(&mut hasher);
    inputs
        .rerank_lambda
        .map(|l| (l * 1_000.0) as i32)
        .hash(&mut hasher);
    inputs
        .distance_metric
        .map(|m| matches!(m, DistanceMetric::Cosine))
        .hash(&mut hasher);
    inputs.ef_search.hash(&mut hasher);
    inputs.exact_dimensions.hash(&mut hasher);
    if let Some(ids) = inputs.partition_ids {
        let mut sorted: Vec<&String> = ids.iter().collect();
        sorted.sort();
        for id in sorted {
            id.hash(&mut hasher);
        }
    }
    hasher.finish()
}

/// Bounded LRU cache of search results, owned by the coordinator.
pub struct ResultCache {
    inner: Mutex<LruCache<u64, Vec<ScoredId>>>,
}

impl ResultCache {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self {
            inner: Mutex::new(LruCache::new(cap)),
        }
    }

    pub fn get(&self, key: u64) -> Option<Vec<ScoredId>> {
        self.inner.lock().get(&key).cloned()
    }

    pub fn put(&self, key: u64, value: Vec<ScoredId>) {
        self.inner.lock().put(key, value);
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_deterministic() {
        let v = vec![1.0, 2.0, 3.0, 4.0];
        assert_eq!(vector_fingerprint(&v), vector_fingerprint(&v));
    }

    #[test]
    fn fingerprint_differs_for_different_vectors() {
        assert_ne!(
            vector_fingerprint(&[1.0, 2.0, 3.0]),
            vector_fingerprint(&[3.0, 2.0, 1.0])
        );
    }

    #[test]
    fn cache_key_is_deterministic_for_identical_inputs() {
        let fp = vector_fingerprint(&[1.0, 2.0]);
        let inputs = CacheKeyInputs {
            k: 10,
            use_hnsw: true,
            rerank: false,
            rerank_method: RerankMethod::Standard,
            rerank_lambda: None,
            distance_metric: Some(DistanceMetric::Euclidean),
            partition_ids: None,
            ef_search: None,
            exact_dimensions: false,
        };
        let a = cache_key(fp, &inputs);
        let b = cache_key(fp, &inputs);
        assert_eq!(a, b);
    }

    #[test]
    fn cache_key_ignores_partition_id_order() {
        let fp = vector_fingerprint(&[1.0]);
        let a_ids = vec!["p2".to_string(), "p1".to_string()];
        let b_ids = vec!["p1".to_string(), "p2".to_string()];
        let base = CacheKeyInputs {
            k: 5,
            use_hnsw: false,
            rerank: false,
            rerank_method: RerankMethod::Standard,
            rerank_lambda: None,
            distance_metric: None,
            partition_ids: Some(&a_ids),
            ef_search: None,
            exact_dimensions: false,
        };
        let a = cache_key(fp, &base);
        let b = cache_key(
            fp,
            &CacheKeyInputs {
                partition_ids: Some(&b_ids),
                ..base
            },
        );
        assert_eq!(a, b);
    }

    #[test]
    fn result_cache_round_trips() {
        let cache = ResultCache::new(4);
        let key = 42;
        assert!(cache.get(key).is_none());
        cache.put(
            key,
            vec![ScoredId {
                id: nbase_common::VectorId::Int(1),
                distance: 0.1,
                metadata: None,
            }],
        );
        assert_eq!(cache.get(key).unwrap().len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }
}
