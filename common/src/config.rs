//! Typed, immutable-after-construction configuration for every component:
//! configuration is passed into each component constructor and mutation
//! after construction is forbidden.

use crate::types::DistanceMetric;
use serde::{Deserialize, Serialize};

/// Config for the clustered (IVF-style) store, C3.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub target_size: usize,
    pub threshold_factor: f32,
    pub distance_threshold: f32,
    pub max_clusters: usize,
    pub kmeans_max_iterations: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            target_size: 100,
            threshold_factor: 1.5,
            distance_threshold: 0.5,
            max_clusters: 256,
            kmeans_max_iterations: 25,
        }
    }
}

/// Config for the HNSW graph index, C4.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct HnswConfig {
    pub m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
    pub max_level: usize,
    pub level_probability: f64,
    pub dimension_aware: bool,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
            ef_search: 50,
            max_level: 16,
            level_probability: 0.5,
            dimension_aware: true,
        }
    }
}

/// Config for the partition manager, C6.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionManagerConfig {
    pub max_active_partitions: usize,
    pub auto_create: bool,
    /// Maximum vectors per partition before rollover. `None` means
    /// unbounded (a single partition absorbs every insert).
    pub partition_capacity: Option<usize>,
}

impl Default for PartitionManagerConfig {
    fn default() -> Self {
        Self {
            max_active_partitions: 3,
            auto_create: true,
            partition_capacity: None,
        }
    }
}

/// Config for the unified search coordinator, C7.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub default_k: usize,
    pub max_concurrent_searches: usize,
    pub cache_size: usize,
    pub rerank_lambda: f32,
    pub save_interval_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            default_k: 10,
            max_concurrent_searches: default_concurrency(),
            cache_size: 1000,
            rerank_lambda: 0.7,
            save_interval_ms: 60_000,
        }
    }
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1).max(1))
        .unwrap_or(1)
}

/// On-disk layout and compression settings shared by every persisted
/// component.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub db_path: String,
    pub compression: bool,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            db_path: "database".to_string(),
            compression: false,
        }
    }
}

/// The full, merged configuration for one database instance. Assembled once
/// (by `nbase-server`'s config-merge step, or directly by an embedding
/// application) and then handed down, unchanged, into every constructor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub persistence: PersistenceConfig,
    pub cluster: ClusterConfig,
    pub hnsw: HnswConfig,
    pub manager: PartitionManagerConfig,
    pub coordinator: CoordinatorConfig,
    pub default_distance_metric: DistanceMetric,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            persistence: PersistenceConfig::default(),
            cluster: ClusterConfig::default(),
            hnsw: HnswConfig::default(),
            manager: PartitionManagerConfig::default(),
            coordinator: CoordinatorConfig::default(),
            default_distance_metric: DistanceMetric::default(),
        }
    }
}
