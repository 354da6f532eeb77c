//! Database facade: wires the partition manager, the search coordinator,
//! the event bus, and the auto-save interval into the single object an
//! embedding application (or `nbase-server`) talks to.

use crate::coordinator::{SearchCoordinator, SearchOptions};
use nbase_common::config::DatabaseConfig;
use nbase_common::{Event, EventBus, Metadata, NbaseError, Result, ScoredId, VectorId};
use nbase_manager::{BulkAddResult, CreatePartitionOptions, ManagerStats, PartitionManager, SaveReport};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::warn;

const PARTITIONS_SUBDIR: &str = "partitions";

/// The embeddable vector database: a partition manager, a unified search
/// coordinator, and the background tasks that keep them in sync (C8's
/// cache-invalidating event listener and the auto-save interval timer).
pub struct Database {
    manager: Arc<PartitionManager>,
    coordinator: Arc<SearchCoordinator>,
    events: EventBus,
    ready: Arc<AtomicBool>,
    autosave: Mutex<Option<JoinHandle<()>>>,
    cache_listener: Mutex<Option<JoinHandle<()>>>,
}

impl Database {
    /// Assemble every component from `config`, scan `partitions_dir` for
    /// existing partitions, and start the background tasks. Initialization
    /// failure is fatal: the caller should treat a returned `Err` as fatal
    /// Initialization failure is always fatal; there is no degraded mode.
    pub async fn open(config: DatabaseConfig) -> Result<Self> {
        let events = EventBus::default();
        let partitions_dir = PathBuf::from(&config.persistence.db_path).join(PARTITIONS_SUBDIR);

        let manager = Arc::new(PartitionManager::new(
            partitions_dir,
            config.manager.clone(),
            config.cluster.clone(),
            config.hnsw,
            config.default_distance_metric,
            config.persistence.compression,
            events.clone(),
        ));
        manager.load().await?;

        let coordinator = Arc::new(SearchCoordinator::new(
            manager.clone(),
            config.coordinator.clone(),
            events.clone(),
        ));

        let cache_listener = spawn_cache_invalidator(events.subscribe(), coordinator.clone());
        let autosave = spawn_autosave(
            manager.clone(),
            events.clone(),
            config.coordinator.save_interval_ms,
        );

        Ok(Self {
            manager,
            coordinator,
            events,
            ready: Arc::new(AtomicBool::new(true)),
            autosave: Mutex::new(Some(autosave)),
            cache_listener: Mutex::new(Some(cache_listener)),
        })
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.ready.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(NbaseError::Closed)
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    pub fn add_vector(
        &self,
        id: Option<VectorId>,
        vector: Vec<f32>,
        metadata: Option<Metadata>,
    ) -> Result<(String, VectorId)> {
        self.ensure_ready()?;
        self.manager.add_vector(id, vector, metadata)
    }

    pub fn bulk_add(
        &self,
        items: Vec<(Option<VectorId>, Vec<f32>, Option<Metadata>)>,
    ) -> Result<BulkAddResult> {
        self.ensure_ready()?;
        self.manager.bulk_add(items)
    }

    pub fn get_vector(&self, id: &VectorId) -> Result<Option<Vec<f32>>> {
        self.ensure_ready()?;
        self.manager.get_vector(id)
    }

    pub fn get_metadata(&self, id: &VectorId) -> Result<Option<Metadata>> {
        self.ensure_ready()?;
        self.manager.get_metadata(id)
    }

    pub fn has_vector(&self, id: &VectorId) -> Result<bool> {
        self.ensure_ready()?;
        self.manager.has_vector(id)
    }

    pub fn delete_vector(&self, id: &VectorId) -> Result<bool> {
        self.ensure_ready()?;
        self.manager.delete_vector(id)
    }

    pub fn update_metadata(&self, id: &VectorId, metadata: Metadata) -> Result<bool> {
        self.ensure_ready()?;
        self.manager.update_metadata(id, metadata)
    }

    pub async fn search(
        &self,
        query: &[f32],
        k: Option<usize>,
        options: SearchOptions<'_>,
    ) -> Result<Vec<ScoredId>> {
        self.ensure_ready()?;
        self.coordinator.search(query, k, options).await
    }

    pub fn create_partition(&self, id: &str, name: &str, opts: CreatePartitionOptions) -> Result<()> {
        self.ensure_ready()?;
        self.manager.create_partition(id, name, opts)
    }

    pub fn set_active_partition(&self, id: &str) -> Result<()> {
        self.ensure_ready()?;
        self.manager.set_active_partition(id)
    }

    pub fn get_total_vector_count(&self) -> usize {
        self.manager.get_total_vector_count()
    }

    pub fn get_stats(&self) -> ManagerStats {
        self.manager.get_stats()
    }

    pub fn cache_len(&self) -> usize {
        self.coordinator.cache_len()
    }

    pub async fn save(&self) -> Result<SaveReport> {
        self.ensure_ready()?;
        self.manager.save().await
    }

    /// Stop the background tasks, run a final save, and close every loaded
    /// partition. Subsequent calls to any other method fail with `Closed`.
    pub async fn close(&self) -> Result<()> {
        self.ready.store(false, Ordering::Release);
        if let Some(handle) = self.autosave.lock().take() {
            handle.abort();
        }
        if let Some(handle) = self.cache_listener.lock().take() {
            handle.abort();
        }
        self.manager.close().await
    }
}

fn spawn_cache_invalidator(
    mut rx: broadcast::Receiver<Event>,
    coordinator: Arc<SearchCoordinator>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) if event.invalidates_cache() => coordinator.invalidate_cache(),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn spawn_autosave(manager: Arc<PartitionManager>, events: EventBus, interval_ms: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
        ticker.tick().await; // first tick is immediate; skip it
        loop {
            ticker.tick().await;
            if let Err(e) = manager.save().await {
                warn!(error = %e, "auto-save failed");
                events.emit(Event::Warn {
                    message: format!("auto-save failed: {e}"),
                });
            }
        }
    })
}
