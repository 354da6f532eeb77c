//! Clustered (IVF-style) store. Wraps a [`VectorStore`] and routes every
//! inserted vector to the nearest compatible centroid, so `find_nearest` can
//! prune the candidate set to a handful of clusters instead of scanning
//! everything.
//!
//! The index holds no reference of its own to an HNSW graph or the
//! coordinator above it; like the HNSW index, it only ever reaches down into
//! the `VectorStore` it owns.

use nbase_common::config::ClusterConfig;
use nbase_common::distance::{distance, euclidean};
use nbase_common::{DistanceMetric, Filter, Metadata, NbaseError, Result, ScoredId, VectorId};
use nbase_index::VectorSource;
use nbase_vectorstore::VectorStore;
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const CLUSTER_STATE_FILE: &str = "cluster.json";
const CLUSTER_STATE_VERSION: u32 = 1;

type ClusterKey = u64;

/// Options for [`ClusteredStore::find_nearest`].
#[derive(Default)]
pub struct SearchOptions<'a> {
    /// Minimum candidate-member union size before scoring stops widening the
    /// cluster scan. `None` means `k` is used.
    pub search_widening: Option<usize>,
    pub filter: Option<&'a Filter<'a>>,
}

#[derive(Debug, Clone)]
struct Cluster {
    centroid: Vec<f32>,
    members: HashSet<VectorId>,
    /// Member count as of the last full recompute (or creation). Used to
    /// decide when incremental centroid drift warrants an eager recompute.
    baseline_count: usize,
}

#[derive(Debug, Default)]
struct ClusterMap {
    next_key: ClusterKey,
    clusters: HashMap<ClusterKey, Cluster>,
    member_cluster: HashMap<VectorId, ClusterKey>,
}

#[derive(Serialize, Deserialize)]
struct PersistedCluster {
    key: ClusterKey,
    centroid: Vec<f32>,
    members: Vec<VectorId>,
}

#[derive(Serialize, Deserialize)]
struct PersistedClusterState {
    version: u32,
    next_key: ClusterKey,
    clusters: Vec<PersistedCluster>,
}

/// IVF-style store: a [`VectorStore`] plus a centroid-keyed partitioning of
/// its ids that `find_nearest` uses to prune candidates.
pub struct ClusteredStore {
    store: VectorStore,
    config: ClusterConfig,
    metric: DistanceMetric,
    compress: bool,
    clusters: RwLock<ClusterMap>,
}

impl ClusteredStore {
    pub fn new(
        path: impl Into<PathBuf>,
        compress: bool,
        config: ClusterConfig,
        metric: DistanceMetric,
    ) -> Self {
        let path = path.into();
        Self {
            store: VectorStore::new(path, compress),
            config,
            metric,
            compress,
            clusters: RwLock::new(ClusterMap::default()),
        }
    }

    pub fn path(&self) -> &Path {
        self.store.path()
    }

    /// The underlying raw store, for callers (the HNSW index via
    /// `VectorSource`, the partition layer) that need direct vector/metadata
    /// access without going through cluster routing.
    pub fn vector_store(&self) -> &VectorStore {
        &self.store
    }

    pub fn cluster_count(&self) -> usize {
        self.clusters.read().clusters.len()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn add(
        &self,
        id: Option<VectorId>,
        vector: Vec<f32>,
        metadata: Option<Metadata>,
    ) -> Result<VectorId> {
        let id = self.store.add(id, vector.clone(), metadata)?;
        self.route(id.clone(), &vector);
        Ok(id)
    }

    pub fn add_batch(
        &self,
        items: Vec<(Option<VectorId>, Vec<f32>, Option<Metadata>)>,
    ) -> Result<Vec<VectorId>> {
        let vectors: Vec<Vec<f32>> = items.iter().map(|(_, v, _)| v.clone()).collect();
        let ids = self.store.add_batch(items)?;
        for (id, vector) in ids.iter().zip(vectors.iter()) {
            self.route(id.clone(), vector);
        }
        Ok(ids)
    }

    pub fn get(&self, id: &VectorId) -> Result<Option<Vec<f32>>> {
        self.store.get(id)
    }

    pub fn get_metadata(&self, id: &VectorId) -> Result<Option<Metadata>> {
        self.store.get_metadata(id)
    }

    pub fn has(&self, id: &VectorId) -> Result<bool> {
        self.store.has(id)
    }

    pub fn set_metadata(&self, id: &VectorId, value: Metadata) -> Result<()> {
        self.store.set_metadata(id, value)
    }

    /// Overwrite the vector at `id`. Re-routes the id to whatever centroid is
    /// now nearest, which may be a different cluster than before.
    pub fn update(&self, id: &VectorId, vector: Vec<f32>) -> Result<bool> {
        let previous = self.store.get(id)?;
        if !self.store.update(id, vector.clone())? {
            return Ok(false);
        }
        if let Some(old) = previous {
            self.unroute(id, &old);
        }
        self.route(id.clone(), &vector);
        Ok(true)
    }

    pub fn delete(&self, id: &VectorId) -> Result<bool> {
        let vector = self.store.get(id)?;
        let removed = self.store.delete(id)?;
        if removed {
            if let Some(v) = vector {
                self.unroute(id, &v);
            }
        }
        Ok(removed)
    }

    pub fn iter(&self) -> Result<Vec<(VectorId, Vec<f32>)>> {
        self.store.iter()
    }

    /// Score every candidate cluster, widen the member union until it covers
    /// `max(k, search_widening)` ids (or every cluster has been visited),
    /// then exactly re-score and filter those candidates. Falls back to a
    /// full linear scan when no clusters exist yet.
    pub fn find_nearest(
        &self,
        query: &[f32],
        k: usize,
        options: SearchOptions<'_>,
    ) -> Result<Vec<ScoredId>> {
        let widening = options.search_widening.unwrap_or(k);
        let state = self.clusters.read();

        if state.clusters.is_empty() {
            drop(state);
            return self.linear_scan(query, k, options.filter);
        }

        let metric = self.metric;
        let mut ordered: Vec<(ClusterKey, f32)> = state
            .clusters
            .iter()
            .filter(|(_, c)| metric != DistanceMetric::Cosine || c.centroid.len() == query.len())
            .map(|(key, c)| (*key, distance(query, &c.centroid, metric).unwrap_or(f32::MAX)))
            .collect();
        ordered.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());

        let target = k.max(widening);
        let mut candidates: HashSet<VectorId> = HashSet::new();
        for (key, _) in &ordered {
            if let Some(cluster) = state.clusters.get(key) {
                candidates.extend(cluster.members.iter().cloned());
            }
            if candidates.len() >= target {
                break;
            }
        }
        drop(state);

        self.score_candidates(query, k, candidates.into_iter(), options.filter)
    }

    fn linear_scan(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&Filter<'_>>,
    ) -> Result<Vec<ScoredId>> {
        let all = self.store.iter()?;
        self.score_candidates(query, k, all.into_iter().map(|(id, _)| id), filter)
    }

    fn score_candidates(
        &self,
        query: &[f32],
        k: usize,
        ids: impl Iterator<Item = VectorId>,
        filter: Option<&Filter<'_>>,
    ) -> Result<Vec<ScoredId>> {
        let metric = self.metric;
        let mut scored = Vec::new();
        for id in ids {
            let Some(vector) = self.store.get(&id)? else {
                continue;
            };
            let metadata = self.store.get_metadata(&id)?;
            if let Some(filter) = filter {
                if !filter(&id, metadata.as_ref()) {
                    continue;
                }
            }
            let d = distance(query, &vector, metric).unwrap_or(f32::MAX);
            scored.push(ScoredId {
                id,
                distance: d,
                metadata,
            });
        }
        scored.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap());
        scored.truncate(k);
        Ok(scored)
    }

    /// Lloyd's algorithm over every vector currently in the store. Replaces
    /// the cluster map atomically on completion; does not touch the
    /// underlying vectors.
    pub fn refit_kmeans(&self, target_k: Option<usize>) -> Result<()> {
        let all = self.store.iter()?;
        if all.is_empty() {
            return Ok(());
        }

        let k = target_k
            .unwrap_or_else(|| self.cluster_count().max(1))
            .min(all.len());
        if k == 0 {
            return Ok(());
        }

        let mut rng = StdRng::from_entropy();
        let mut indices: Vec<usize> = (0..all.len()).collect();
        indices.shuffle(&mut rng);
        let mut centroids: Vec<Vec<f32>> = indices[..k].iter().map(|&i| all[i].1.clone()).collect();

        let metric = self.metric;
        let mut assignment: Vec<usize> = vec![0; all.len()];
        let mut unassigned = 0usize;

        for _ in 0..self.config.kmeans_max_iterations {
            let mut changed = false;
            unassigned = 0;

            for (i, (_, v)) in all.iter().enumerate() {
                let mut best: Option<(usize, f32)> = None;
                for (ci, centroid) in centroids.iter().enumerate() {
                    if metric == DistanceMetric::Cosine && centroid.len() != v.len() {
                        continue;
                    }
                    let d = distance(v, centroid, metric).unwrap_or(f32::MAX);
                    if best.map_or(true, |(_, bd)| d < bd) {
                        best = Some((ci, d));
                    }
                }
                match best {
                    Some((ci, _)) => {
                        if assignment[i] != ci {
                            changed = true;
                        }
                        assignment[i] = ci;
                    }
                    None => unassigned += 1,
                }
            }

            let mut sums: Vec<Vec<f32>> = vec![Vec::new(); k];
            let mut counts = vec![0usize; k];
            for (i, (_, v)) in all.iter().enumerate() {
                let ci = assignment[i];
                if sums[ci].is_empty() {
                    sums[ci] = vec![0.0; v.len()];
                }
                if sums[ci].len() == v.len() {
                    for (s, x) in sums[ci].iter_mut().zip(v.iter()) {
                        *s += x;
                    }
                    counts[ci] += 1;
                }
            }
            for ci in 0..k {
                if counts[ci] > 0 {
                    for s in sums[ci].iter_mut() {
                        *s /= counts[ci] as f32;
                    }
                    centroids[ci] = sums[ci].clone();
                }
            }

            if !changed {
                break;
            }
        }

        if unassigned > 0 {
            warn!(
                unassigned,
                "k-means refit left vectors unassigned due to dimension mismatch"
            );
        }

        let mut new_clusters: HashMap<ClusterKey, Cluster> = HashMap::new();
        let mut member_cluster = HashMap::new();
        for ci in 0..k {
            new_clusters.insert(
                ci as ClusterKey,
                Cluster {
                    centroid: centroids[ci].clone(),
                    members: HashSet::new(),
                    baseline_count: 0,
                },
            );
        }
        for (i, (id, _)) in all.iter().enumerate() {
            let ci = assignment[i] as ClusterKey;
            if let Some(cluster) = new_clusters.get_mut(&ci) {
                cluster.members.insert(id.clone());
                member_cluster.insert(id.clone(), ci);
            }
        }
        for cluster in new_clusters.values_mut() {
            cluster.baseline_count = cluster.members.len();
        }
        new_clusters.retain(|_, c| !c.members.is_empty());

        let mut state = self.clusters.write();
        state.clusters = new_clusters;
        state.member_cluster = member_cluster;
        state.next_key = k as ClusterKey;

        info!(k, "k-means refit replaced cluster map");
        Ok(())
    }

    fn route(&self, id: VectorId, vector: &[f32]) {
        let mut state = self.clusters.write();

        if state.clusters.is_empty() {
            Self::create_cluster(&mut state, id, vector);
            return;
        }

        let metric = self.metric;
        let mut best: Option<(ClusterKey, f32)> = None;
        for (key, cluster) in state.clusters.iter() {
            if metric == DistanceMetric::Cosine && cluster.centroid.len() != vector.len() {
                continue;
            }
            let d = distance(vector, &cluster.centroid, metric).unwrap_or(f32::MAX);
            if best.map_or(true, |(_, bd)| d < bd) {
                best = Some((*key, d));
            }
        }

        let under_max = state.clusters.len() < self.config.max_clusters;

        let should_create = match best {
            None => under_max,
            Some((key, d)) => {
                let cluster = &state.clusters[&key];
                let over_size = cluster.members.len() as f32
                    >= self.config.target_size as f32 * self.config.threshold_factor;
                let too_far = d > self.config.distance_threshold;
                (over_size || too_far) && under_max
            }
        };

        if should_create {
            Self::create_cluster(&mut state, id, vector);
            return;
        }

        match best {
            Some((key, _)) => Self::attach(&mut state, key, id, vector, true),
            None => {
                // At capacity with no compatible centroid: attach to the
                // nearest one regardless of dimension. Euclidean is the only
                // metric defined across mismatched dimensions, so it is used
                // purely to rank "least bad" here.
                let fallback = state
                    .clusters
                    .iter()
                    .map(|(key, c)| (*key, euclidean(vector, &c.centroid)))
                    .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap())
                    .map(|(key, _)| key);
                match fallback {
                    Some(key) => {
                        let dim_matches = state.clusters[&key].centroid.len() == vector.len();
                        Self::attach(&mut state, key, id, vector, dim_matches);
                    }
                    None => Self::create_cluster(&mut state, id, vector),
                }
            }
        }
    }

    fn create_cluster(state: &mut ClusterMap, id: VectorId, vector: &[f32]) {
        let key = state.next_key;
        state.next_key += 1;
        let mut members = HashSet::new();
        members.insert(id.clone());
        state.clusters.insert(
            key,
            Cluster {
                centroid: vector.to_vec(),
                members,
                baseline_count: 1,
            },
        );
        state.member_cluster.insert(id, key);
    }

    fn attach(
        state: &mut ClusterMap,
        key: ClusterKey,
        id: VectorId,
        vector: &[f32],
        update_centroid: bool,
    ) {
        let cluster = state.clusters.get_mut(&key).expect("routed cluster exists");
        let n = cluster.members.len();
        cluster.members.insert(id.clone());
        if update_centroid && cluster.centroid.len() == vector.len() {
            for (c, v) in cluster.centroid.iter_mut().zip(vector.iter()) {
                *c = (*c * n as f32 + v) / (n + 1) as f32;
            }
        } else if !update_centroid {
            warn!(
                cluster = key,
                "attached vector to incompatible-dimension cluster without updating its centroid"
            );
        }
        state.member_cluster.insert(id, key);
    }

    fn unroute(&self, id: &VectorId, vector: &[f32]) {
        let mut state = self.clusters.write();
        let Some(key) = state.member_cluster.remove(id) else {
            return;
        };
        let Some(cluster) = state.clusters.get_mut(&key) else {
            return;
        };
        cluster.members.remove(id);
        let n = cluster.members.len();

        if n == 0 {
            state.clusters.remove(&key);
            return;
        }

        if cluster.centroid.len() == vector.len() {
            for (c, v) in cluster.centroid.iter_mut().zip(vector.iter()) {
                *c = (*c * (n + 1) as f32 - v) / n as f32;
            }
        }

        // Incremental updates drift; a cluster that has shrunk by more than
        // half since its last full recompute gets an eager one now rather
        // than waiting for the next k-means refit.
        let shrunk_by_half = n * 2 < cluster.baseline_count;
        if shrunk_by_half {
            self.recompute_centroid(&mut state, key);
        }
    }

    fn recompute_centroid(&self, state: &mut ClusterMap, key: ClusterKey) {
        let Some(cluster) = state.clusters.get(&key) else {
            return;
        };
        let members: Vec<VectorId> = cluster.members.iter().cloned().collect();

        let mut sum: Vec<f32> = Vec::new();
        let mut count = 0usize;
        for id in &members {
            if let Ok(Some(v)) = self.store.get(id) {
                if sum.is_empty() {
                    sum = vec![0.0; v.len()];
                }
                if sum.len() == v.len() {
                    for (s, x) in sum.iter_mut().zip(v.iter()) {
                        *s += x;
                    }
                    count += 1;
                }
            }
        }

        if count == 0 {
            return;
        }
        for s in sum.iter_mut() {
            *s /= count as f32;
        }

        if let Some(cluster) = state.clusters.get_mut(&key) {
            cluster.centroid = sum;
            cluster.baseline_count = cluster.members.len();
        }
        debug!(cluster = key, "full centroid recompute after shrink");
    }

    fn cluster_state_path(&self) -> PathBuf {
        self.store.path().join(CLUSTER_STATE_FILE)
    }

    /// Persist the underlying vectors/metadata and the cluster map.
    pub async fn save(&self) -> Result<()> {
        self.store.save().await?;
        self.save_cluster_state()
    }

    fn save_cluster_state(&self) -> Result<()> {
        let state = self.clusters.read();
        let persisted = PersistedClusterState {
            version: CLUSTER_STATE_VERSION,
            next_key: state.next_key,
            clusters: state
                .clusters
                .iter()
                .map(|(key, c)| PersistedCluster {
                    key: *key,
                    centroid: c.centroid.clone(),
                    members: c.members.iter().cloned().collect(),
                })
                .collect(),
        };
        drop(state);
        nbase_storage::save_json(&self.cluster_state_path(), &persisted, self.compress)
    }

    /// Hydrate vectors/metadata, then try to load the cluster map. When the
    /// companion file is missing or its version doesn't match, clusters are
    /// rebuilt incrementally by replaying every stored vector through the
    /// normal routing path.
    pub fn load(&self) -> Result<()> {
        self.store.load()?;

        match nbase_storage::load_json::<PersistedClusterState>(&self.cluster_state_path()) {
            Ok(persisted) if persisted.version == CLUSTER_STATE_VERSION => {
                let mut clusters = HashMap::new();
                let mut member_cluster = HashMap::new();
                for c in persisted.clusters {
                    for id in &c.members {
                        member_cluster.insert(id.clone(), c.key);
                    }
                    let baseline_count = c.members.len();
                    clusters.insert(
                        c.key,
                        Cluster {
                            centroid: c.centroid,
                            members: c.members.into_iter().collect(),
                            baseline_count,
                        },
                    );
                }
                *self.clusters.write() = ClusterMap {
                    next_key: persisted.next_key,
                    clusters,
                    member_cluster,
                };
                info!(path = %self.store.path().display(), "cluster state loaded");
            }
            Ok(_) => {
                warn!("cluster state file has an incompatible version, rebuilding");
                self.rebuild_from_store()?;
            }
            Err(NbaseError::NotFound(_)) => {
                self.rebuild_from_store()?;
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    fn rebuild_from_store(&self) -> Result<()> {
        *self.clusters.write() = ClusterMap::default();
        for (id, vector) in self.store.iter()? {
            self.route(id, &vector);
        }
        info!(
            clusters = self.cluster_count(),
            "cluster state rebuilt from vector store"
        );
        Ok(())
    }

    pub fn close(&self) {
        self.store.close();
    }
}

/// The clustered store is the HNSW index's non-owning lookup back to raw
/// vector data: the index
/// never holds a handle to it directly.
impl VectorSource for ClusteredStore {
    fn get_vector(&self, id: &VectorId) -> Option<Vec<f32>> {
        self.store.get(id).ok().flatten()
    }

    fn get_metadata(&self, id: &VectorId) -> Option<Metadata> {
        self.store.get_metadata(id).ok().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ClusterConfig {
        ClusterConfig {
            target_size: 4,
            threshold_factor: 1.5,
            distance_threshold: 2.0,
            max_clusters: 8,
            kmeans_max_iterations: 10,
        }
    }

    #[test]
    fn first_insert_creates_a_cluster() {
        let dir = tempfile::tempdir().unwrap();
        let store = ClusteredStore::new(dir.path(), false, config(), DistanceMetric::Euclidean);
        store.add(None, vec![0.0, 0.0], None).unwrap();
        assert_eq!(store.cluster_count(), 1);
    }

    #[test]
    fn far_vector_creates_a_new_cluster() {
        let dir = tempfile::tempdir().unwrap();
        let store = ClusteredStore::new(dir.path(), false, config(), DistanceMetric::Euclidean);
        store.add(None, vec![0.0, 0.0], None).unwrap();
        store.add(None, vec![100.0, 100.0], None).unwrap();
        assert_eq!(store.cluster_count(), 2);
    }

    #[test]
    fn nearby_vectors_join_the_same_cluster() {
        let dir = tempfile::tempdir().unwrap();
        let store = ClusteredStore::new(dir.path(), false, config(), DistanceMetric::Euclidean);
        store.add(None, vec![0.0, 0.0], None).unwrap();
        store.add(None, vec![0.1, 0.1], None).unwrap();
        store.add(None, vec![0.2, 0.0], None).unwrap();
        assert_eq!(store.cluster_count(), 1);
    }

    #[test]
    fn oversized_cluster_forces_a_split() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config();
        cfg.target_size = 2;
        cfg.threshold_factor = 1.0;
        cfg.distance_threshold = 1000.0;
        let store = ClusteredStore::new(dir.path(), false, cfg, DistanceMetric::Euclidean);
        for _ in 0..3 {
            store.add(None, vec![0.0, 0.0], None).unwrap();
        }
        assert!(store.cluster_count() >= 2);
    }

    #[test]
    fn delete_shrinks_then_drops_empty_cluster() {
        let dir = tempfile::tempdir().unwrap();
        let store = ClusteredStore::new(dir.path(), false, config(), DistanceMetric::Euclidean);
        let id = store.add(None, vec![1.0, 1.0], None).unwrap();
        assert_eq!(store.cluster_count(), 1);
        store.delete(&id).unwrap();
        assert_eq!(store.cluster_count(), 0);
        assert!(!store.has(&id).unwrap());
    }

    #[test]
    fn find_nearest_returns_closest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = ClusteredStore::new(dir.path(), false, config(), DistanceMetric::Euclidean);
        let a = store.add(None, vec![0.0, 0.0], None).unwrap();
        store.add(None, vec![5.0, 5.0], None).unwrap();
        store.add(None, vec![50.0, 50.0], None).unwrap();

        let results = store
            .find_nearest(&[0.1, 0.1], 1, SearchOptions::default())
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, a);
    }

    #[test]
    fn find_nearest_with_no_clusters_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ClusteredStore::new(dir.path(), false, config(), DistanceMetric::Euclidean);
        let results = store
            .find_nearest(&[0.0, 0.0], 5, SearchOptions::default())
            .unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn filter_excludes_matching_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let store = ClusteredStore::new(dir.path(), false, config(), DistanceMetric::Euclidean);
        let excluded = store.add(None, vec![0.0, 0.0], None).unwrap();
        let kept = store.add(None, vec![0.1, 0.1], None).unwrap();

        let filter: &Filter<'_> = &|id, _| *id != excluded;
        let results = store
            .find_nearest(
                &[0.0, 0.0],
                2,
                SearchOptions {
                    search_widening: None,
                    filter: Some(filter),
                },
            )
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, kept);
    }

    #[tokio::test]
    async fn save_then_load_rebuilds_matching_cluster_count() {
        let dir = tempfile::tempdir().unwrap();
        let store = ClusteredStore::new(dir.path(), false, config(), DistanceMetric::Euclidean);
        store.add(None, vec![0.0, 0.0], None).unwrap();
        store.add(None, vec![100.0, 100.0], None).unwrap();
        let before = store.cluster_count();
        store.save().await.unwrap();

        let reloaded = ClusteredStore::new(dir.path(), false, config(), DistanceMetric::Euclidean);
        reloaded.load().unwrap();
        assert_eq!(reloaded.cluster_count(), before);
        assert_eq!(reloaded.len(), 2);
    }

    #[tokio::test]
    async fn load_with_missing_cluster_file_rebuilds_from_vectors() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = ClusteredStore::new(dir.path(), false, config(), DistanceMetric::Euclidean);
            store.add(None, vec![0.0, 0.0], None).unwrap();
            store.add(None, vec![100.0, 100.0], None).unwrap();
            // Persist only the vector store, mirroring a crash between the
            // two writes that `save()` performs.
            store.vector_store().save().await.unwrap();
        }
        let reloaded = ClusteredStore::new(dir.path(), false, config(), DistanceMetric::Euclidean);
        reloaded.load().unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.cluster_count(), 2);
    }

    #[test]
    fn kmeans_refit_preserves_all_vectors() {
        let dir = tempfile::tempdir().unwrap();
        let store = ClusteredStore::new(dir.path(), false, config(), DistanceMetric::Euclidean);
        for i in 0..10 {
            store
                .add(None, vec![i as f32, (i * 2) as f32], None)
                .unwrap();
        }
        store.refit_kmeans(Some(3)).unwrap();
        let total_members: usize = {
            let state = store.clusters.read();
            state.clusters.values().map(|c| c.members.len()).sum()
        };
        assert_eq!(total_members, 10);
    }
}
