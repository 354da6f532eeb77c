//! Partition: one independently persisted shard, bundling a clustered
//! store, an optionally loaded HNSW index, and its own config file.
//!
//! A partition does not own files directly; it delegates to the clustered
//! store's base path (a `data/` subdirectory) plus a fixed `hnsw/`
//! subdirectory for the graph index.

use nbase_clustered::{ClusteredStore, SearchOptions as ClusterSearchOptions};
use nbase_common::config::{ClusterConfig, HnswConfig};
use nbase_common::{DistanceMetric, Filter, Metadata, NbaseError, Result, ScoredId, VectorId};
use nbase_index::{HnswIndex, SearchOptions as HnswSearchOptions};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const DATA_DIR: &str = "data";
const HNSW_DIR: &str = "hnsw";
const HNSW_FILE: &str = "hnsw_index.json";

/// On-disk partition config (`<id>.config.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionConfig {
    pub id: String,
    pub name: String,
    pub db_dir_name: String,
    pub active: bool,
    pub vector_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<Metadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_size: Option<usize>,
}

impl PartitionConfig {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            db_dir_name: id.clone(),
            id,
            name: name.into(),
            active: false,
            vector_count: 0,
            description: None,
            properties: None,
            cluster_size: None,
        }
    }
}

/// Closes the clustered store if dropped before `disarm()` is called, so a
/// failure partway through opening a partition (e.g. vector store loads but
/// the HNSW graph fails to deserialize) never leaves an open file handle
/// behind.
struct LoadGuard<'a> {
    store: &'a ClusteredStore,
    armed: bool,
}

impl<'a> LoadGuard<'a> {
    fn new(store: &'a ClusteredStore) -> Self {
        Self { store, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<'a> Drop for LoadGuard<'a> {
    fn drop(&mut self) {
        if self.armed {
            self.store.close();
        }
    }
}

/// One partition: a clustered store, an optional loaded HNSW graph over it,
/// and the config file tracking its identity and vector count.
pub struct Partition {
    base_path: PathBuf,
    config: RwLock<PartitionConfig>,
    store: ClusteredStore,
    hnsw: RwLock<Option<HnswIndex>>,
    hnsw_config: HnswConfig,
    metric: DistanceMetric,
    compress: bool,
}

impl Partition {
    /// Construct an empty, in-memory partition. Does not touch disk.
    pub fn new(
        base_path: impl Into<PathBuf>,
        config: PartitionConfig,
        cluster_config: ClusterConfig,
        hnsw_config: HnswConfig,
        metric: DistanceMetric,
        compress: bool,
    ) -> Self {
        let base_path = base_path.into();
        let store = ClusteredStore::new(base_path.join(DATA_DIR), compress, cluster_config, metric);
        Self {
            base_path,
            config: RwLock::new(config),
            store,
            hnsw: RwLock::new(None),
            hnsw_config,
            metric,
            compress,
        }
    }

    /// Create a brand-new partition directory: writes the config file and
    /// pre-materializes empty data files so a later `load()` finds a
    /// consistent layout.
    pub fn create(
        base_path: impl Into<PathBuf>,
        config: PartitionConfig,
        cluster_config: ClusterConfig,
        hnsw_config: HnswConfig,
        metric: DistanceMetric,
        compress: bool,
    ) -> Result<Self> {
        let partition = Self::new(
            base_path,
            config,
            cluster_config,
            hnsw_config,
            metric,
            compress,
        );
        std::fs::create_dir_all(partition.hnsw_dir())?;
        partition.write_config()?;
        let empty_hnsw = HnswIndex::new(partition.hnsw_config, partition.metric);
        empty_hnsw.save(&partition.hnsw_path(), partition.compress)?;
        info!(id = %partition.id(), "partition created");
        Ok(partition)
    }

    pub fn id(&self) -> String {
        self.config.read().id.clone()
    }

    pub fn config(&self) -> PartitionConfig {
        self.config.read().clone()
    }

    pub fn set_active(&self, active: bool) {
        self.config.write().active = active;
    }

    pub fn is_active(&self) -> bool {
        self.config.read().active
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn config_path(&self) -> PathBuf {
        let id = self.config.read().id.clone();
        self.base_path.join(format!("{id}.config.json"))
    }

    fn hnsw_dir(&self) -> PathBuf {
        self.base_path.join(HNSW_DIR)
    }

    fn hnsw_path(&self) -> PathBuf {
        self.hnsw_dir().join(HNSW_FILE)
    }

    fn write_config(&self) -> Result<()> {
        let config = self.config.read().clone();
        nbase_storage::save_json(&self.config_path(), &config, false)
    }

    /// Persist just the config file, without touching the clustered store
    /// or HNSW graph. Used by the partition manager to flush
    /// `active`/`vectorCount` changes without a full `save()`.
    pub fn save_config(&self) -> Result<()> {
        self.write_config()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn is_hnsw_loaded(&self) -> bool {
        self.hnsw.read().is_some()
    }

    /// Insert a vector, routing it into the clustered store and, if an HNSW
    /// index is currently loaded, into the graph as well (vector commits
    /// first, then graph edges).
    pub fn add(
        &self,
        id: Option<VectorId>,
        vector: Vec<f32>,
        metadata: Option<Metadata>,
    ) -> Result<VectorId> {
        let id = self.store.add(id, vector.clone(), metadata)?;
        if let Some(hnsw) = self.hnsw.read().as_ref() {
            hnsw.insert(&self.store, id.clone(), &vector)?;
        }
        self.config.write().vector_count = self.store.len();
        Ok(id)
    }

    pub fn add_batch(
        &self,
        items: Vec<(Option<VectorId>, Vec<f32>, Option<Metadata>)>,
    ) -> Result<Vec<VectorId>> {
        let vectors: Vec<Vec<f32>> = items.iter().map(|(_, v, _)| v.clone()).collect();
        let ids = self.store.add_batch(items)?;
        if let Some(hnsw) = self.hnsw.read().as_ref() {
            for (id, vector) in ids.iter().zip(vectors.iter()) {
                hnsw.insert(&self.store, id.clone(), vector)?;
            }
        }
        self.config.write().vector_count = self.store.len();
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

    pub fn update(&self, id: &VectorId, vector: Vec<f32>) -> Result<bool> {
        let updated = self.store.update(id, vector.clone())?;
        if updated {
            if let Some(hnsw) = self.hnsw.read().as_ref() {
                hnsw.delete(id);
                hnsw.insert(&self.store, id.clone(), &vector)?;
            }
        }
        Ok(updated)
    }

    /// Remove a vector and, if an HNSW index is loaded, tombstone it there
    /// too.
    pub fn delete(&self, id: &VectorId) -> Result<bool> {
        let removed = self.store.delete(id)?;
        if removed {
            if let Some(hnsw) = self.hnsw.read().as_ref() {
                hnsw.delete(id);
            }
            self.config.write().vector_count = self.store.len();
        }
        Ok(removed)
    }

    pub fn iter(&self) -> Result<Vec<(VectorId, Vec<f32>)>> {
        self.store.iter()
    }

    pub fn find_nearest(
        &self,
        query: &[f32],
        k: usize,
        search_widening: Option<usize>,
        filter: Option<&Filter<'_>>,
    ) -> Result<Vec<ScoredId>> {
        self.store.find_nearest(
            query,
            k,
            ClusterSearchOptions {
                search_widening,
                filter,
            },
        )
    }

    /// `None` when no HNSW index is currently loaded; callers (the
    /// partition manager) decide whether to lazily load one.
    pub fn find_nearest_hnsw(
        &self,
        query: &[f32],
        k: usize,
        ef_search: Option<usize>,
        exact_dimensions: bool,
        filter: Option<&Filter<'_>>,
    ) -> Result<Option<Vec<ScoredId>>> {
        let guard = self.hnsw.read();
        let Some(hnsw) = guard.as_ref() else {
            return Ok(None);
        };
        let results = hnsw.search(
            &self.store,
            query,
            k,
            &HnswSearchOptions {
                ef_search,
                exact_dimensions,
                filter,
            },
        )?;
        Ok(Some(results))
    }

    /// Rebuild the HNSW graph from every vector currently in the clustered
    /// store, replacing any existing graph.
    pub fn build_hnsw(&self) -> Result<()> {
        let items = self.store.iter()?;
        let index = HnswIndex::new(self.hnsw_config, self.metric);
        index.build_from_scratch(&self.store, &items)?;
        *self.hnsw.write() = Some(index);
        info!(id = %self.id(), vectors = items.len(), "hnsw graph built");
        Ok(())
    }

    /// Load the serialized HNSW graph from disk, if present.
    pub fn load_hnsw(&self) -> Result<()> {
        let index = HnswIndex::load(&self.hnsw_path())?;
        *self.hnsw.write() = Some(index);
        Ok(())
    }

    pub fn save_hnsw(&self) -> Result<()> {
        let guard = self.hnsw.read();
        if let Some(index) = guard.as_ref() {
            std::fs::create_dir_all(self.hnsw_dir())?;
            index.save(&self.hnsw_path(), self.compress)?;
        }
        Ok(())
    }

    pub fn unload_hnsw(&self) {
        *self.hnsw.write() = None;
    }

    /// Persist the clustered store, the HNSW graph (if loaded), and the
    /// config file (with the current vector count).
    pub async fn save(&self) -> Result<()> {
        self.store.save().await?;
        self.save_hnsw()?;
        self.config.write().vector_count = self.store.len();
        self.write_config()
    }

    /// Load this partition's clustered store and, if `with_hnsw` is set, its
    /// HNSW graph. A failure loading the graph after the store has already
    /// loaded closes the store rather than leaving it open and untracked.
    pub fn load(&self, with_hnsw: bool) -> Result<()> {
        self.store.load()?;
        let guard = LoadGuard::new(&self.store);

        if with_hnsw {
            match self.load_hnsw() {
                Ok(()) => {}
                Err(NbaseError::NotFound(_)) => {
                    warn!(id = %self.id(), "no hnsw index on disk yet");
                }
                Err(e) => return Err(e),
            }
        }

        guard.disarm();
        self.config.write().vector_count = self.store.len();
        info!(id = %self.id(), vectors = self.store.len(), "partition loaded");
        Ok(())
    }

    pub fn close(&self) {
        self.unload_hnsw();
        self.store.close();
    }
}
