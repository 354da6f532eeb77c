use crate::VectorSource;
use dashmap::DashMap;
use nbase_common::config::HnswConfig;
use nbase_common::{distance, DistanceMetric, Filter, NbaseError, Result, VectorId};
use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct HnswNode {
    level: usize,
    dimension: usize,
    /// `neighbors[l]` holds this node's edges at level `l`, for `l` in
    /// `0..=level`.
    neighbors: Vec<Vec<VectorId>>,
}

/// Options accepted by [`HnswIndex::search`].
#[derive(Default)]
pub struct SearchOptions<'a> {
    pub ef_search: Option<usize>,
    /// When set, start the search from the per-dimension entry point for
    /// the query's own dimension rather than the global one.
    pub exact_dimensions: bool,
    pub filter: Option<&'a Filter<'a>>,
}

/// A single scored candidate produced during graph traversal.
struct Candidate {
    id: VectorId,
    distance: f32,
}

/// Hierarchical navigable small world graph over ids whose vectors live in
/// an external [`VectorSource`]. Supports vectors of more than one
/// dimension at once via per-dimension entry points and, in
/// `dimension_aware` mode, dimension-homogeneous edges.
pub struct HnswIndex {
    nodes: DashMap<VectorId, HnswNode>,
    tombstones: RwLock<HashSet<VectorId>>,
    global_entry_point: RwLock<Option<VectorId>>,
    dimension_entry_points: RwLock<HashMap<usize, VectorId>>,
    dimension_members: RwLock<HashMap<usize, HashSet<VectorId>>>,
    config: HnswConfig,
    metric: DistanceMetric,
    rng: RwLock<StdRng>,
}

impl HnswIndex {
    pub fn new(config: HnswConfig, metric: DistanceMetric) -> Self {
        Self {
            nodes: DashMap::new(),
            tombstones: RwLock::new(HashSet::new()),
            global_entry_point: RwLock::new(None),
            dimension_entry_points: RwLock::new(HashMap::new()),
            dimension_members: RwLock::new(HashMap::new()),
            config,
            metric,
            rng: RwLock::new(StdRng::from_entropy()),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn config(&self) -> &HnswConfig {
        &self.config
    }

    fn sample_level(&self) -> usize {
        let mut rng = self.rng.write();
        let mut level = 0;
        while rng.gen::<f64>() < self.config.level_probability && level < self.config.max_level {
            level += 1;
        }
        level
    }

    fn level_of(&self, id: &VectorId) -> Option<usize> {
        self.nodes.get(id).map(|n| n.level)
    }

    fn dimension_of(&self, id: &VectorId) -> Option<usize> {
        self.nodes.get(id).map(|n| n.dimension)
    }

    fn is_tombstoned(&self, id: &VectorId) -> bool {
        self.tombstones.read().contains(id)
    }

    fn vector_of(&self, source: &dyn VectorSource, id: &VectorId) -> Option<Vec<f32>> {
        source.get_vector(id)
    }

    /// Insert a new node, following the standard six-step HNSW insertion
    /// algorithm (see module docs).
    pub fn insert(&self, source: &dyn VectorSource, id: VectorId, vector: &[f32]) -> Result<()> {
        if vector.is_empty() {
            return Err(NbaseError::InvalidArgument(
                "cannot index an empty vector".to_string(),
            ));
        }
        let dimension = vector.len();
        let level = self.sample_level();

        let prior_dimension_entry = self.dimension_entry_points.read().get(&dimension).cloned();
        let prior_global_entry = self.global_entry_point.read().clone();

        self.dimension_members
            .write()
            .entry(dimension)
            .or_default()
            .insert(id.clone());

        self.nodes.insert(
            id.clone(),
            HnswNode {
                level,
                dimension,
                neighbors: vec![Vec::new(); level + 1],
            },
        );

        if prior_dimension_entry.is_none() {
            self.dimension_entry_points
                .write()
                .insert(dimension, id.clone());
        }

        let Some(global_entry) = prior_global_entry else {
            *self.global_entry_point.write() = Some(id);
            return Ok(());
        };

        let start = if self.config.dimension_aware {
            prior_dimension_entry
                .clone()
                .unwrap_or_else(|| global_entry.clone())
        } else {
            global_entry.clone()
        };
        let entry_level = self.level_of(&start).unwrap_or(0);

        let mut entries = vec![start];
        for lc in (level + 1..=entry_level).rev() {
            let found = self.search_layer(source, vector, &entries, 1, lc, &|_| true);
            if !found.is_empty() {
                entries = found.into_iter().map(|c| c.id).collect();
            }
        }

        let dimension_aware = self.config.dimension_aware;
        for lc in (0..=level.min(entry_level)).rev() {
            let visible = |cand: &VectorId| -> bool {
                !self.is_tombstoned(cand)
                    && (!dimension_aware || self.dimension_of(cand) == Some(dimension))
            };
            let candidates = self.search_layer(
                source,
                vector,
                &entries,
                self.config.ef_construction,
                lc,
                &visible,
            );
            let selected: Vec<VectorId> = candidates
                .iter()
                .take(self.config.m)
                .map(|c| c.id.clone())
                .collect();

            for neighbor in &selected {
                self.add_edge(&id, neighbor, lc);
                self.add_edge(neighbor, &id, lc);
                self.prune_neighbor(source, neighbor, lc);
            }

            if !selected.is_empty() {
                entries = selected;
            }
        }

        if level > entry_level {
            *self.global_entry_point.write() = Some(id.clone());
        }
        if let Some(prior) = prior_dimension_entry {
            if prior != id {
                let prior_level = self.level_of(&prior).unwrap_or(0);
                if level > prior_level {
                    self.dimension_entry_points.write().insert(dimension, id);
                }
            }
        }

        Ok(())
    }

    fn add_edge(&self, from: &VectorId, to: &VectorId, level: usize) {
        if let Some(mut node) = self.nodes.get_mut(from) {
            if level >= node.neighbors.len() {
                node.neighbors.resize(level + 1, Vec::new());
            }
            if !node.neighbors[level].contains(to) {
                node.neighbors[level].push(to.clone());
            }
        }
    }

    fn remove_edge(&self, from: &VectorId, to: &VectorId, level: usize) {
        if let Some(mut node) = self.nodes.get_mut(from) {
            if level < node.neighbors.len() {
                node.neighbors[level].retain(|x| x != to);
            }
        }
    }

    /// Keep only `neighbor_id`'s `m` nearest edges at `level`, removing the
    /// reverse edge from any neighbor that gets dropped so the graph stays
    /// symmetric.
    fn prune_neighbor(&self, source: &dyn VectorSource, neighbor_id: &VectorId, level: usize) {
        let m = self.config.m;
        let current: Vec<VectorId> = match self.nodes.get(neighbor_id) {
            Some(node) if level < node.neighbors.len() && node.neighbors[level].len() > m => {
                node.neighbors[level].clone()
            }
            _ => return,
        };
        let Some(nv) = self.vector_of(source, neighbor_id) else {
            return;
        };

        let mut scored: Vec<(VectorId, f32)> = current
            .iter()
            .filter_map(|cid| {
                self.vector_of(source, cid)
                    .map(|v| (cid.clone(), distance(&nv, &v, self.metric).unwrap_or(f32::MAX)))
            })
            .collect();
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap().then(a.0.cmp(&b.0)));
        scored.truncate(m);

        let kept: HashSet<VectorId> = scored.iter().map(|(id, _)| id.clone()).collect();
        let dropped: Vec<VectorId> = current.into_iter().filter(|c| !kept.contains(c)).collect();

        if let Some(mut node) = self.nodes.get_mut(neighbor_id) {
            node.neighbors[level] = scored.into_iter().map(|(id, _)| id).collect();
        }
        for d in dropped {
            self.remove_edge(&d, neighbor_id, level);
        }
    }

    /// Bounded beam search at a single level. `visible` composes the
    /// tombstone filter with any caller-supplied predicate; filtered-out
    /// nodes are still traversed through (their edges are read) but never
    /// enter the result set.
    fn search_layer(
        &self,
        source: &dyn VectorSource,
        query: &[f32],
        entry_points: &[VectorId],
        ef: usize,
        level: usize,
        visible: &dyn Fn(&VectorId) -> bool,
    ) -> Vec<Candidate> {
        let mut visited: HashSet<VectorId> = HashSet::new();
        let mut frontier: Vec<Candidate> = Vec::new(); // min-ordered by distance, popped from the front
        let mut results: Vec<Candidate> = Vec::new(); // bounded, kept sorted ascending

        for entry in entry_points {
            if visited.insert(entry.clone()) {
                if let Some(v) = self.vector_of(source, entry) {
                    let d = distance(query, &v, self.metric).unwrap_or(f32::MAX);
                    frontier.push(Candidate {
                        id: entry.clone(),
                        distance: d,
                    });
                    if visible(entry) {
                        insert_sorted(&mut results, Candidate {
                            id: entry.clone(),
                            distance: d,
                        }, ef);
                    }
                }
            }
        }
        frontier.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap());

        while !frontier.is_empty() {
            let current = frontier.remove(0);
            if results.len() >= ef {
                if let Some(worst) = results.last() {
                    if current.distance > worst.distance {
                        break;
                    }
                }
            }

            let neighbors = self
                .nodes
                .get(&current.id)
                .filter(|n| level < n.neighbors.len())
                .map(|n| n.neighbors[level].clone())
                .unwrap_or_default();

            for neighbor_id in neighbors {
                if !visited.insert(neighbor_id.clone()) {
                    continue;
                }
                let Some(v) = self.vector_of(source, &neighbor_id) else {
                    continue;
                };
                let d = distance(query, &v, self.metric).unwrap_or(f32::MAX);
                let candidate = Candidate {
                    id: neighbor_id.clone(),
                    distance: d,
                };

                let worst = results.last().map(|c| c.distance);
                let should_explore = results.len() < ef || worst.map_or(true, |w| d < w);
                if should_explore {
                    insert_sorted_frontier(&mut frontier, Candidate {
                        id: neighbor_id.clone(),
                        distance: d,
                    });
                    if visible(&neighbor_id) {
                        insert_sorted(&mut results, candidate, ef);
                    }
                }
            }
        }

        results
    }

    /// Search for the `k` nearest visible (non-tombstoned, filter-passing)
    /// neighbors of `query`.
    pub fn search(
        &self,
        source: &dyn VectorSource,
        query: &[f32],
        k: usize,
        options: &SearchOptions<'_>,
    ) -> Result<Vec<nbase_common::ScoredId>> {
        if query.is_empty() {
            return Err(NbaseError::InvalidArgument(
                "query vector must not be empty".to_string(),
            ));
        }
        let dimension = query.len();

        let entry = if options.exact_dimensions {
            self.dimension_entry_points
                .read()
                .get(&dimension)
                .cloned()
                .or_else(|| self.global_entry_point.read().clone())
        } else {
            self.global_entry_point.read().clone()
        };
        let Some(entry) = entry else {
            return Ok(Vec::new());
        };
        let entry_level = self.level_of(&entry).unwrap_or(0);

        let visible = |cand: &VectorId| -> bool {
            if self.is_tombstoned(cand) {
                return false;
            }
            match options.filter {
                Some(f) => f(cand, source.get_metadata(cand).as_ref()),
                None => true,
            }
        };

        let mut entries = vec![entry];
        for lc in (1..=entry_level).rev() {
            let found = self.search_layer(source, query, &entries, 1, lc, &visible);
            if !found.is_empty() {
                entries = found.into_iter().map(|c| c.id).collect();
            }
        }

        let ef = options.ef_search.unwrap_or(self.config.ef_search).max(k);
        let mut found = self.search_layer(source, query, &entries, ef, 0, &visible);
        found.truncate(k);

        Ok(found
            .into_iter()
            .map(|c| nbase_common::ScoredId {
                id: c.id.clone(),
                distance: c.distance,
                metadata: source.get_metadata(&c.id),
            })
            .collect())
    }

    /// Tombstone `id`. Edges are left untouched; readers skip tombstoned
    /// nodes. Returns `false` if `id` was never indexed.
    pub fn delete(&self, id: &VectorId) -> bool {
        if !self.nodes.contains_key(id) {
            return false;
        }
        self.tombstones.write().insert(id.clone());

        if self.global_entry_point.read().as_ref() == Some(id) {
            let replacement = self.pick_replacement_entry(None);
            *self.global_entry_point.write() = replacement;
        }

        if let Some(dim) = self.dimension_of(id) {
            let is_dim_entry = self.dimension_entry_points.read().get(&dim) == Some(id);
            if is_dim_entry {
                let replacement = self.pick_replacement_entry(Some(dim));
                let mut dims = self.dimension_entry_points.write();
                match replacement {
                    Some(r) => {
                        dims.insert(dim, r);
                    }
                    None => {
                        dims.remove(&dim);
                    }
                }
            }
        }
        true
    }

    /// Surviving node with the highest level, lowest id on tie; optionally
    /// restricted to one dimension group.
    fn pick_replacement_entry(&self, dimension: Option<usize>) -> Option<VectorId> {
        let tombstones = self.tombstones.read();
        let mut best: Option<(VectorId, usize)> = None;
        for entry in self.nodes.iter() {
            let id = entry.key();
            if tombstones.contains(id) {
                continue;
            }
            if let Some(dim) = dimension {
                if entry.value().dimension != dim {
                    continue;
                }
            }
            let level = entry.value().level;
            let better = match &best {
                None => true,
                Some((cur_id, cur_level)) => {
                    level > *cur_level || (level == *cur_level && id < cur_id)
                }
            };
            if better {
                best = Some((id.clone(), level));
            }
        }
        best.map(|(id, _)| id)
    }

    /// Rebuild the entire graph from scratch over `items`. Existing state
    /// (including tombstones) is discarded first.
    pub fn build_from_scratch(
        &self,
        source: &dyn VectorSource,
        items: &[(VectorId, Vec<f32>)],
    ) -> Result<()> {
        self.nodes.clear();
        self.tombstones.write().clear();
        *self.global_entry_point.write() = None;
        self.dimension_entry_points.write().clear();
        self.dimension_members.write().clear();

        let total = items.len().max(1);
        let mut last_reported: i64 = -1;

        let mut ordered: Vec<&(VectorId, Vec<f32>)> = Vec::with_capacity(items.len());
        if self.config.dimension_aware {
            let mut by_dimension: HashMap<usize, Vec<&(VectorId, Vec<f32>)>> = HashMap::new();
            for item in items {
                by_dimension.entry(item.1.len()).or_default().push(item);
            }
            for (_, group) in by_dimension {
                ordered.extend(group);
            }
        } else {
            ordered.extend(items.iter());
        }

        for (done, (id, vector)) in ordered.into_iter().enumerate() {
            self.insert(source, id.clone(), vector)?;
            let percent = (((done + 1) * 100) / total) as i64;
            if percent >= last_reported + 1 {
                last_reported = percent;
                tracing::debug!(percent, done = done + 1, total, "hnsw build progress");
            }
        }
        Ok(())
    }

    pub fn save(&self, path: &Path, compress: bool) -> Result<()> {
        let tombstones = self.tombstones.read();
        let nodes: Vec<PersistedNode> = self
            .nodes
            .iter()
            .filter(|e| !tombstones.contains(e.key()))
            .map(|e| PersistedNode {
                id: e.key().clone(),
                level: e.value().level,
                dimension: e.value().dimension,
                neighbors: e.value().neighbors.clone(),
            })
            .collect();
        drop(tombstones);

        let persisted = PersistedIndex {
            config: self.config,
            metric: self.metric,
            global_entry_point: self.global_entry_point.read().clone(),
            dimension_entry_points: self
                .dimension_entry_points
                .read()
                .iter()
                .map(|(k, v)| (*k, v.clone()))
                .collect(),
            nodes,
        };
        let bytes =
            bincode::serialize(&persisted).map_err(|e| NbaseError::Serialization(e.to_string()))?;
        nbase_storage::save_bytes(path, &bytes, compress)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = nbase_storage::load_bytes(path)?;
        let persisted: PersistedIndex =
            bincode::deserialize(&bytes).map_err(|e| NbaseError::Serialization(e.to_string()))?;

        let index = Self::new(persisted.config, persisted.metric);
        for node in persisted.nodes {
            index
                .dimension_members
                .write()
                .entry(node.dimension)
                .or_default()
                .insert(node.id.clone());
            index.nodes.insert(
                node.id,
                HnswNode {
                    level: node.level,
                    dimension: node.dimension,
                    neighbors: node.neighbors,
                },
            );
        }
        *index.global_entry_point.write() = persisted.global_entry_point;
        for (dim, id) in persisted.dimension_entry_points {
            index.dimension_entry_points.write().insert(dim, id);
        }
        Ok(index)
    }
}

#[derive(Serialize, Deserialize)]
struct PersistedIndex {
    config: HnswConfig,
    metric: DistanceMetric,
    global_entry_point: Option<VectorId>,
    dimension_entry_points: Vec<(usize, VectorId)>,
    nodes: Vec<PersistedNode>,
}

#[derive(Serialize, Deserialize)]
struct PersistedNode {
    id: VectorId,
    level: usize,
    dimension: usize,
    neighbors: Vec<Vec<VectorId>>,
}

fn insert_sorted(results: &mut Vec<Candidate>, candidate: Candidate, cap: usize) {
    let pos = results
        .partition_point(|c| c.distance < candidate.distance
            || (c.distance == candidate.distance && c.id < candidate.id));
    results.insert(pos, candidate);
    if results.len() > cap {
        results.pop();
    }
}

fn insert_sorted_frontier(frontier: &mut Vec<Candidate>, candidate: Candidate) {
    let pos = frontier.partition_point(|c| c.distance < candidate.distance);
    frontier.insert(pos, candidate);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;

    struct MapSource(StdHashMap<VectorId, Vec<f32>>);

    impl VectorSource for MapSource {
        fn get_vector(&self, id: &VectorId) -> Option<Vec<f32>> {
            self.0.get(id).cloned()
        }
    }

    fn build_source(pairs: &[(VectorId, Vec<f32>)]) -> MapSource {
        MapSource(pairs.iter().cloned().collect())
    }

    fn small_config() -> HnswConfig {
        HnswConfig {
            m: 4,
            ef_construction: 32,
            ef_search: 16,
            max_level: 4,
            level_probability: 0.5,
            dimension_aware: true,
        }
    }

    #[test]
    fn insert_and_search_finds_exact_match() {
        let data = vec![
            (VectorId::Int(0), vec![1.0, 0.0, 0.0]),
            (VectorId::Int(1), vec![0.0, 1.0, 0.0]),
            (VectorId::Int(2), vec![0.0, 0.0, 1.0]),
        ];
        let source = build_source(&data);
        let index = HnswIndex::new(small_config(), DistanceMetric::Euclidean);
        for (id, v) in &data {
            index.insert(&source, id.clone(), v).unwrap();
        }

        let results = index
            .search(&source, &[1.0, 0.0, 0.0], 1, &SearchOptions::default())
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, VectorId::Int(0));
    }

    #[test]
    fn deleted_nodes_are_skipped_by_search_but_keep_their_edges() {
        let data = vec![
            (VectorId::Int(0), vec![1.0, 0.0]),
            (VectorId::Int(1), vec![0.9, 0.1]),
            (VectorId::Int(2), vec![0.0, 1.0]),
        ];
        let source = build_source(&data);
        let index = HnswIndex::new(small_config(), DistanceMetric::Euclidean);
        for (id, v) in &data {
            index.insert(&source, id.clone(), v).unwrap();
        }

        assert!(index.delete(&VectorId::Int(0)));
        assert!(!index.delete(&VectorId::Int(0)), "deleting twice is a no-op");

        let results = index
            .search(&source, &[1.0, 0.0], 3, &SearchOptions::default())
            .unwrap();
        assert!(!results.iter().any(|r| r.id == VectorId::Int(0)));
    }

    #[test]
    fn entry_point_survives_deletion_of_the_original() {
        let data = vec![
            (VectorId::Int(0), vec![1.0, 0.0]),
            (VectorId::Int(1), vec![0.0, 1.0]),
        ];
        let source = build_source(&data);
        let index = HnswIndex::new(small_config(), DistanceMetric::Euclidean);
        for (id, v) in &data {
            index.insert(&source, id.clone(), v).unwrap();
        }

        let entry_before = index.global_entry_point.read().clone();
        assert!(entry_before.is_some());
        index.delete(entry_before.as_ref().unwrap());

        let entry_after = index.global_entry_point.read().clone();
        assert!(entry_after.is_some());
        assert_ne!(entry_after, entry_before);
    }

    #[test]
    fn dimension_aware_search_does_not_cross_dimensions() {
        let data = vec![
            (VectorId::Int(0), vec![1.0, 0.0]),
            (VectorId::Int(1), vec![1.0, 0.0, 0.0]),
        ];
        let source = build_source(&data);
        let index = HnswIndex::new(small_config(), DistanceMetric::Euclidean);
        for (id, v) in &data {
            index.insert(&source, id.clone(), v).unwrap();
        }

        let options = SearchOptions {
            exact_dimensions: true,
            ..Default::default()
        };
        let results = index
            .search(&source, &[1.0, 0.0, 0.0], 2, &options)
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, VectorId::Int(1));
    }

    #[test]
    fn build_from_scratch_clears_tombstones() {
        let data = vec![
            (VectorId::Int(0), vec![1.0, 0.0]),
            (VectorId::Int(1), vec![0.0, 1.0]),
        ];
        let source = build_source(&data);
        let index = HnswIndex::new(small_config(), DistanceMetric::Euclidean);
        index.build_from_scratch(&source, &data).unwrap();
        index.delete(&VectorId::Int(0));

        index.build_from_scratch(&source, &data).unwrap();
        let results = index
            .search(&source, &[1.0, 0.0], 2, &SearchOptions::default())
            .unwrap();
        assert!(results.iter().any(|r| r.id == VectorId::Int(0)));
    }

    #[test]
    fn save_and_load_round_trip_preserves_search_results() {
        let data: Vec<(VectorId, Vec<f32>)> = (0..20)
            .map(|i| (VectorId::Int(i), vec![i as f32, (i * 2) as f32]))
            .collect();
        let source = build_source(&data);
        let index = HnswIndex::new(small_config(), DistanceMetric::Euclidean);
        index.build_from_scratch(&source, &data).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.bin");
        index.save(&path, true).unwrap();

        let reloaded = HnswIndex::load(&path).unwrap();
        assert_eq!(reloaded.len(), index.len());

        let query = vec![5.0, 10.0];
        let before = index
            .search(&source, &query, 3, &SearchOptions::default())
            .unwrap();
        let after = reloaded
            .search(&source, &query, 3, &SearchOptions::default())
            .unwrap();
        let before_ids: Vec<_> = before.iter().map(|r| r.id.clone()).collect();
        let after_ids: Vec<_> = after.iter().map(|r| r.id.clone()).collect();
        assert_eq!(before_ids, after_ids);
    }
}
