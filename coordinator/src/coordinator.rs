//! Unified search coordinator: method selection, partition fan-out, merge,
//! optional rerank, metadata hydration, result cache.

use crate::cache::{cache_key, vector_fingerprint, CacheKeyInputs, ResultCache};
use crate::gate::ConcurrencyGate;
use crate::rerank::{rerank_diversity, rerank_weighted, RerankMethod};
use nbase_common::config::CoordinatorConfig;
use nbase_common::{DistanceMetric, Event, EventBus, Filter, NbaseError, Result, ScoredId};
use nbase_manager::{ManagerSearchOptions, PartitionManager};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Inputs accepted by [`SearchCoordinator::search`].
#[derive(Default)]
pub struct SearchOptions<'a> {
    pub use_hnsw: bool,
    pub rerank: bool,
    pub rerank_method: RerankMethod,
    pub filter: Option<&'a Filter<'a>>,
    pub include_metadata: bool,
    pub distance_metric: Option<DistanceMetric>,
    pub partition_ids: Option<Vec<String>>,
    pub ef_search: Option<usize>,
    pub search_timeout_ms: Option<u64>,
    pub skip_cache: bool,
    pub rerank_lambda: Option<f32>,
    /// Numeric metadata fields and weights for [`RerankMethod::Weighted`].
    pub weighted_fields: Vec<(String, f32)>,
    /// Restrict results to candidates whose stored dimension equals the
    /// query's, for dimension-aware HNSW search.
    pub exact_dimensions: bool,
}

/// Composes the partition manager, the result cache, and the event bus into
/// the single entry point external callers use for k-NN queries.
pub struct SearchCoordinator {
    manager: Arc<PartitionManager>,
    config: CoordinatorConfig,
    cache: ResultCache,
    gate: ConcurrencyGate,
    events: EventBus,
}

impl SearchCoordinator {
    pub fn new(manager: Arc<PartitionManager>, config: CoordinatorConfig, events: EventBus) -> Self {
        let gate = ConcurrencyGate::new(config.max_concurrent_searches);
        let cache = ResultCache::new(config.cache_size);
        Self {
            manager,
            config,
            cache,
            gate,
            events,
        }
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn invalidate_cache(&self) {
        self.cache.clear();
    }

    fn metric(&self, options: &SearchOptions<'_>) -> DistanceMetric {
        options.distance_metric.unwrap_or_default()
    }

    /// Run one k-NN query, composing cache lookup, the concurrency cap,
    /// method selection, rerank, and metadata hydration.
    pub async fn search(
        &self,
        query: &[f32],
        k: Option<usize>,
        options: SearchOptions<'_>,
    ) -> Result<Vec<ScoredId>> {
        let k = k.unwrap_or(self.config.default_k).max(1);
        // A filter predicate can't be folded into a hashable cache key, so a
        // filtered search always bypasses the cache (documented trade-off).
        let cacheable = !options.skip_cache && options.filter.is_none();
        let key = if cacheable {
            let fp = vector_fingerprint(query);
            Some(cache_key(
                fp,
                &CacheKeyInputs {
                    k,
                    use_hnsw: options.use_hnsw,
                    rerank: options.rerank,
                    rerank_method: options.rerank_method,
                    rerank_lambda: options.rerank_lambda,
                    distance_metric: options.distance_metric,
                    partition_ids: options.partition_ids.as_deref(),
                    ef_search: options.ef_search,
                    exact_dimensions: options.exact_dimensions,
                },
            ))
        } else {
            None
        };

        if let Some(key) = key {
            if let Some(hit) = self.cache.get(key) {
                return Ok(hit);
            }
        }

        let _permit = self.gate.acquire().await?;
        let start = Instant::now();

        let mut results = self.run_search(query, k, &options).await?;

        if options.rerank && results.len() > 1 {
            results = self.rerank(query, results, k, &options).await?;
        }

        if options.include_metadata {
            self.hydrate_metadata(&mut results)?;
        }

        if let Some(key) = key {
            self.cache.put(key, results.clone());
        }

        self.events.emit(Event::SearchComplete {
            duration_ms: start.elapsed().as_millis() as u64,
            result_count: results.len(),
        });

        Ok(results)
    }

    async fn run_search(
        &self,
        query: &[f32],
        k: usize,
        options: &SearchOptions<'_>,
    ) -> Result<Vec<ScoredId>> {
        let manager = self.manager.clone();
        let query_owned = query.to_vec();
        let use_hnsw = options.use_hnsw;
        let partition_ids = options.partition_ids.clone();
        let search_widening = None;
        let ef_search = options.ef_search;
        let exact_dimensions = options.exact_dimensions;
        let filter = options.filter;

        // The manager's own search calls are synchronous (CPU-bound graph
        // walks and centroid scoring run inline); the only suspension point
        // here is the timeout race itself.
        let fut = async move {
            let pids = partition_ids;
            let opts = ManagerSearchOptions {
                partition_ids: pids.as_deref(),
                search_widening,
                ef_search,
                exact_dimensions,
                filter,
            };
            if use_hnsw {
                manager.find_nearest_hnsw(&query_owned, k, opts)
            } else {
                manager.find_nearest(&query_owned, k, opts)
            }
        };

        match options.search_timeout_ms {
            Some(ms) => match tokio::time::timeout(Duration::from_millis(ms), fut).await {
                Ok(result) => result,
                Err(_) => Err(NbaseError::Timeout),
            },
            None => fut.await,
        }
    }

    async fn rerank(
        &self,
        query: &[f32],
        results: Vec<ScoredId>,
        k: usize,
        options: &SearchOptions<'_>,
    ) -> Result<Vec<ScoredId>> {
        match options.rerank_method {
            RerankMethod::Standard => Ok(results),
            RerankMethod::Diversity => {
                let lambda = options.rerank_lambda.unwrap_or(self.config.rerank_lambda);
                let mut with_vectors = Vec::with_capacity(results.len());
                for r in results {
                    if let Some(v) = self.manager.get_vector(&r.id)? {
                        with_vectors.push((r, v));
                    }
                }
                Ok(rerank_diversity(
                    query,
                    self.metric(options),
                    &with_vectors,
                    k,
                    lambda,
                ))
            }
            RerankMethod::Weighted => {
                let mut hydrated = results;
                self.hydrate_metadata(&mut hydrated)?;
                rerank_weighted(hydrated, &options.weighted_fields)
            }
        }
    }

    fn hydrate_metadata(&self, results: &mut [ScoredId]) -> Result<()> {
        for r in results.iter_mut() {
            if r.metadata.is_none() {
                r.metadata = self.manager.get_metadata(&r.id)?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for SearchCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchCoordinator")
            .field("cache_len", &self.cache_len())
            .field("in_use", &self.gate.in_use())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nbase_common::config::{ClusterConfig, HnswConfig, PartitionManagerConfig};

    fn coordinator(dir: &std::path::Path) -> SearchCoordinator {
        let events = EventBus::default();
        let manager = Arc::new(PartitionManager::new(
            dir,
            PartitionManagerConfig::default(),
            ClusterConfig {
                target_size: 10,
                threshold_factor: 1.5,
                distance_threshold: 10.0,
                max_clusters: 8,
                kmeans_max_iterations: 10,
            },
            HnswConfig::default(),
            DistanceMetric::Euclidean,
            false,
            events.clone(),
        ));
        for i in 0..20 {
            manager
                .add_vector(None, vec![i as f32, (i * 2) as f32], None)
                .unwrap();
        }
        SearchCoordinator::new(manager, CoordinatorConfig::default(), events)
    }

    #[tokio::test]
    async fn search_returns_k_results_sorted_ascending() {
        let dir = tempfile::tempdir().unwrap();
        let coord = coordinator(dir.path());
        let results = coord
            .search(&[0.0, 0.0], Some(5), SearchOptions::default())
            .await
            .unwrap();
        assert_eq!(results.len(), 5);
        for w in results.windows(2) {
            assert!(w[0].distance <= w[1].distance);
        }
    }

    #[tokio::test]
    async fn repeated_identical_search_hits_cache() {
        let dir = tempfile::tempdir().unwrap();
        let coord = coordinator(dir.path());
        let opts = || SearchOptions {
            skip_cache: false,
            ..Default::default()
        };
        let first = coord.search(&[1.0, 2.0], Some(3), opts()).await.unwrap();
        assert_eq!(coord.cache_len(), 1);
        let second = coord.search(&[1.0, 2.0], Some(3), opts()).await.unwrap();
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.id, b.id);
        }
    }

    #[tokio::test]
    async fn filtered_search_bypasses_cache() {
        let dir = tempfile::tempdir().unwrap();
        let coord = coordinator(dir.path());
        let filter: &nbase_common::Filter<'_> = &|_, _| true;
        coord
            .search(
                &[1.0, 2.0],
                Some(3),
                SearchOptions {
                    filter: Some(filter),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(coord.cache_len(), 0);
    }

    #[tokio::test]
    async fn invalidate_cache_clears_entries() {
        let dir = tempfile::tempdir().unwrap();
        let coord = coordinator(dir.path());
        coord
            .search(&[1.0, 2.0], Some(3), SearchOptions::default())
            .await
            .unwrap();
        assert_eq!(coord.cache_len(), 1);
        coord.invalidate_cache();
        assert_eq!(coord.cache_len(), 0);
    }

    #[tokio::test]
    async fn search_timeout_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let coord = coordinator(dir.path());
        let result = coord
            .search(
                &[0.0, 0.0],
                Some(3),
                SearchOptions {
                    search_timeout_ms: Some(0),
                    ..Default::default()
                },
            )
            .await;
        // A zero-millisecond budget may or may not lose the race against an
        // in-process search that never actually suspends; either outcome
        // (success or Timeout) is acceptable here, but nothing else is.
        if let Err(e) = result {
            assert!(matches!(e, NbaseError::Timeout));
        }
    }
}
