//! Vector store: the bottom-most layer that holds raw vectors and their
//! metadata for a single partition. Every higher layer (clustered store,
//! HNSW index, partition, manager) is built on top of one of these.

use nbase_common::{Metadata, NbaseError, Result, VectorId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info};

const VECTORS_FILE: &str = "vec.bin";
const META_FILE: &str = "meta.json";

/// How to apply an `update_metadata` call: either an `update_fn` or a plain
/// replacement value, expressed as data since closures don't cross the
/// store's persistence boundary.
#[derive(Debug, Clone)]
pub enum MetadataPatch {
    /// Replace the stored metadata outright.
    Replace(Metadata),
    /// Merge keys into the existing metadata (inserting if absent).
    Merge(Metadata),
}

#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
struct PersistedMeta {
    next_id: u64,
    entries: Vec<(VectorId, Metadata)>,
}

struct Inner {
    vectors: HashMap<VectorId, Vec<f32>>,
    metadata: HashMap<VectorId, Metadata>,
}

/// A single partition's raw vector + metadata store.
///
/// `get`/`has`/`iter` take a read lock; mutating operations take a write
/// lock. Persistence is atomic at the file level (write to a temp file,
/// then rename) via `nbase_storage::atomic`.
pub struct VectorStore {
    path: PathBuf,
    compress: bool,
    state: RwLock<Inner>,
    next_id: AtomicU64,
    closed: AtomicBool,
    save_in_progress: Mutex<Option<Arc<Notify>>>,
}

impl VectorStore {
    /// Construct an empty, in-memory store rooted at `path`. Does not touch
    /// disk; call `load()` to hydrate from an existing partition directory.
    pub fn new(path: impl Into<PathBuf>, compress: bool) -> Self {
        Self {
            path: path.into(),
            compress,
            state: RwLock::new(Inner {
                vectors: HashMap::new(),
                metadata: HashMap::new(),
            }),
            next_id: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            save_in_progress: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(NbaseError::Closed);
        }
        Ok(())
    }

    /// Insert a vector. When `id` is `None` an auto-assigned, strictly
    /// increasing id is used; an explicit id overwrites any existing record
    /// at that id.
    pub fn add(
        &self,
        id: Option<VectorId>,
        vector: Vec<f32>,
        metadata: Option<Metadata>,
    ) -> Result<VectorId> {
        self.ensure_open()?;
        let id = id.unwrap_or_else(|| VectorId::Int(self.next_id.fetch_add(1, Ordering::Relaxed)));

        let mut state = self.state.write();
        state.vectors.insert(id.clone(), vector);
        if let Some(meta) = metadata {
            state.metadata.insert(id.clone(), meta);
        } else {
            state.metadata.remove(&id);
        }
        Ok(id)
    }

    /// Insert many vectors, returning assigned ids in insertion order. Bulk
    /// callers never need to re-fetch a vector by id to learn what id it was
    /// assigned.
    pub fn add_batch(
        &self,
        items: Vec<(Option<VectorId>, Vec<f32>, Option<Metadata>)>,
    ) -> Result<Vec<VectorId>> {
        self.ensure_open()?;
        let mut ids = Vec::with_capacity(items.len());
        let mut state = self.state.write();
        for (id, vector, metadata) in items {
            let id =
                id.unwrap_or_else(|| VectorId::Int(self.next_id.fetch_add(1, Ordering::Relaxed)));
            state.vectors.insert(id.clone(), vector);
            if let Some(meta) = metadata {
                state.metadata.insert(id.clone(), meta);
            } else {
                state.metadata.remove(&id);
            }
            ids.push(id);
        }
        Ok(ids)
    }

    pub fn get(&self, id: &VectorId) -> Result<Option<Vec<f32>>> {
        self.ensure_open()?;
        Ok(self.state.read().vectors.get(id).cloned())
    }

    pub fn get_metadata(&self, id: &VectorId) -> Result<Option<Metadata>> {
        self.ensure_open()?;
        Ok(self.state.read().metadata.get(id).cloned())
    }

    pub fn has(&self, id: &VectorId) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.state.read().vectors.contains_key(id))
    }

    pub fn delete(&self, id: &VectorId) -> Result<bool> {
        self.ensure_open()?;
        let mut state = self.state.write();
        let removed = state.vectors.remove(id).is_some();
        state.metadata.remove(id);
        Ok(removed)
    }

    /// Overwrite the vector at `id`. A dimension change is allowed (it is
    /// logically delete + add) — the caller that owns the event bus is
    /// responsible for emitting the corresponding event, since this layer
    /// does not know its own partition id.
    pub fn update(&self, id: &VectorId, vector: Vec<f32>) -> Result<bool> {
        self.ensure_open()?;
        let mut state = self.state.write();
        match state.vectors.get(id) {
            None => Ok(false),
            Some(existing) => {
                if existing.len() != vector.len() {
                    debug!(
                        old_dim = existing.len(),
                        new_dim = vector.len(),
                        "vector dimension changed on update"
                    );
                }
                state.vectors.insert(id.clone(), vector);
                Ok(true)
            }
        }
    }

    pub fn set_metadata(&self, id: &VectorId, value: Metadata) -> Result<()> {
        self.ensure_open()?;
        let mut state = self.state.write();
        if !state.vectors.contains_key(id) {
            return Err(NbaseError::NotFound(id.to_string()));
        }
        state.metadata.insert(id.clone(), value);
        Ok(())
    }

    pub fn update_metadata(&self, id: &VectorId, patch: MetadataPatch) -> Result<()> {
        self.ensure_open()?;
        let mut state = self.state.write();
        if !state.vectors.contains_key(id) {
            return Err(NbaseError::NotFound(id.to_string()));
        }
        match patch {
            MetadataPatch::Replace(value) => {
                state.metadata.insert(id.clone(), value);
            }
            MetadataPatch::Merge(value) => {
                let entry = state.metadata.entry(id.clone()).or_default();
                entry.extend(value);
            }
        }
        Ok(())
    }

    /// Snapshot of every `(id, vector)` pair currently stored.
    pub fn iter(&self) -> Result<Vec<(VectorId, Vec<f32>)>> {
        self.ensure_open()?;
        let state = self.state.read();
        Ok(state
            .vectors
            .iter()
            .map(|(id, v)| (id.clone(), v.clone()))
            .collect())
    }

    pub fn len(&self) -> usize {
        self.state.read().vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn vectors_path(&self) -> PathBuf {
        self.path.join(VECTORS_FILE)
    }

    fn meta_path(&self) -> PathBuf {
        self.path.join(META_FILE)
    }

    /// Persist vectors and metadata atomically. A concurrent `save()` while
    /// one is in flight waits for that save to finish rather than racing it.
    pub async fn save(&self) -> Result<()> {
        self.ensure_open()?;

        let notify = {
            let mut guard = self.save_in_progress.lock().await;
            if let Some(existing) = guard.as_ref() {
                let existing = existing.clone();
                drop(guard);
                existing.notified().await;
                return Ok(());
            }
            let notify = Arc::new(Notify::new());
            *guard = Some(notify.clone());
            notify
        };

        let result = self.save_now();

        {
            let mut guard = self.save_in_progress.lock().await;
            *guard = None;
        }
        notify.notify_waiters();
        result
    }

    fn save_now(&self) -> Result<()> {
        let (records, persisted_meta) = {
            let state = self.state.read();
            let records: Vec<nbase_storage::VecRecord> = state
                .vectors
                .iter()
                .map(|(id, data)| nbase_storage::VecRecord {
                    id: id.clone(),
                    vector: data.clone(),
                })
                .collect();
            let entries = state
                .metadata
                .iter()
                .map(|(id, meta)| (id.clone(), meta.clone()))
                .collect();
            (records, entries)
        };

        let header = nbase_storage::VecBinHeader {
            version: nbase_storage::VEC_BIN_VERSION,
            vector_count: records.len() as u32,
            default_dimension: records.first().map(|r| r.vector.len() as u32),
        };
        let bytes = nbase_storage::encode_all(&header, &records);
        nbase_storage::write_atomic(&self.vectors_path(), &bytes)?;

        let meta = PersistedMeta {
            next_id: self.next_id.load(Ordering::Relaxed),
            entries: persisted_meta,
        };
        nbase_storage::save_json(&self.meta_path(), &meta, self.compress)?;

        info!(path = %self.path.display(), vectors = header.vector_count, "vector store saved");
        Ok(())
    }

    /// Hydrate from disk. Missing files are treated as an empty store (a
    /// freshly created partition has no data yet).
    pub fn load(&self) -> Result<()> {
        self.ensure_open()?;

        let mut vectors = HashMap::new();
        if self.vectors_path().exists() {
            let bytes = nbase_storage::read_bytes(&self.vectors_path())?;
            let (_, records) = nbase_storage::decode_all(&bytes)?;
            for record in records {
                vectors.insert(record.id, record.vector);
            }
        }

        let mut metadata = HashMap::new();
        let mut next_id = 0u64;
        match nbase_storage::load_json::<PersistedMeta>(&self.meta_path()) {
            Ok(persisted) => {
                next_id = persisted.next_id;
                for (id, meta) in persisted.entries {
                    metadata.insert(id, meta);
                }
            }
            Err(NbaseError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        // Auto-assigned ids must remain strictly increasing even if the
        // persisted counter under-reports (e.g. a crash between a vector
        // write and the counter bump).
        let max_seen = vectors
            .keys()
            .filter_map(|id| match id {
                VectorId::Int(n) => Some(*n + 1),
                VectorId::Str(_) => None,
            })
            .max()
            .unwrap_or(0);

        *self.state.write() = Inner { vectors, metadata };
        self.next_id
            .store(next_id.max(max_seen), Ordering::Relaxed);

        info!(path = %self.path.display(), vectors = self.len(), "vector store loaded");
        Ok(())
    }

    /// Mark the store closed. Further operations return `Closed`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_at(dir: &tempfile::TempDir) -> VectorStore {
        VectorStore::new(dir.path(), false)
    }

    #[test]
    fn auto_assigned_ids_are_strictly_increasing() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(&dir);
        let a = store.add(None, vec![1.0], None).unwrap();
        let b = store.add(None, vec![2.0], None).unwrap();
        assert_eq!(a, VectorId::Int(0));
        assert_eq!(b, VectorId::Int(1));
    }

    #[test]
    fn get_set_delete_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(&dir);
        let id = VectorId::from("alpha");
        store
            .add(Some(id.clone()), vec![1.0, 2.0], None)
            .unwrap();

        assert!(store.has(&id).unwrap());
        assert_eq!(store.get(&id).unwrap(), Some(vec![1.0, 2.0]));

        assert!(store.delete(&id).unwrap());
        assert!(!store.has(&id).unwrap());
        assert_eq!(store.get(&id).unwrap(), None);
    }

    #[test]
    fn update_allows_dimension_change() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(&dir);
        let id = store.add(None, vec![1.0, 2.0], None).unwrap();
        assert!(store.update(&id, vec![1.0, 2.0, 3.0]).unwrap());
        assert_eq!(store.get(&id).unwrap(), Some(vec![1.0, 2.0, 3.0]));
    }

    #[test]
    fn update_unknown_id_returns_false() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(&dir);
        let missing = VectorId::from("ghost");
        assert!(!store.update(&missing, vec![1.0]).unwrap());
    }

    #[test]
    fn metadata_patch_merge_and_replace() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(&dir);
        let id = store.add(None, vec![1.0], None).unwrap();

        let mut initial = Metadata::new();
        initial.insert("a".to_string(), serde_json::json!(1));
        store.set_metadata(&id, initial).unwrap();

        let mut patch = Metadata::new();
        patch.insert("b".to_string(), serde_json::json!(2));
        store
            .update_metadata(&id, MetadataPatch::Merge(patch))
            .unwrap();
        let meta = store.get_metadata(&id).unwrap().unwrap();
        assert_eq!(meta.len(), 2);

        let mut replacement = Metadata::new();
        replacement.insert("c".to_string(), serde_json::json!(3));
        store
            .update_metadata(&id, MetadataPatch::Replace(replacement))
            .unwrap();
        let meta = store.get_metadata(&id).unwrap().unwrap();
        assert_eq!(meta.len(), 1);
        assert!(meta.contains_key("c"));
    }

    #[test]
    fn set_metadata_on_unknown_id_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(&dir);
        let missing = VectorId::from("ghost");
        let err = store.set_metadata(&missing, Metadata::new()).unwrap_err();
        assert!(matches!(err, NbaseError::NotFound(_)));
    }

    #[test]
    fn operations_after_close_return_closed() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(&dir);
        store.close();
        assert!(matches!(
            store.add(None, vec![1.0], None),
            Err(NbaseError::Closed)
        ));
    }

    #[tokio::test]
    async fn save_then_load_round_trips_vectors_and_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::new(dir.path(), false);

        let mut meta = Metadata::new();
        meta.insert("tag".to_string(), serde_json::json!("x"));
        let id = store.add(None, vec![1.0, 2.0, 3.0], Some(meta)).unwrap();
        store.add(None, vec![4.0, 5.0, 6.0], None).unwrap();

        store.save().await.unwrap();

        let reloaded = VectorStore::new(dir.path(), false);
        reloaded.load().unwrap();

        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.get(&id).unwrap(), Some(vec![1.0, 2.0, 3.0]));
        assert!(reloaded.get_metadata(&id).unwrap().is_some());

        // auto ids continue from where they left off rather than resetting
        let next = reloaded.add(None, vec![7.0, 8.0, 9.0], None).unwrap();
        assert_eq!(next, VectorId::Int(2));
    }

    #[tokio::test]
    async fn concurrent_saves_do_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(VectorStore::new(dir.path(), true));
        store.add(None, vec![1.0, 2.0], None).unwrap();

        let a = store.clone();
        let b = store.clone();
        let (r1, r2) = tokio::join!(
            tokio::spawn(async move { a.save().await }),
            tokio::spawn(async move { b.save().await }),
        );
        r1.unwrap().unwrap();
        r2.unwrap().unwrap();
    }

    #[test]
    fn load_on_missing_files_is_an_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(&dir);
        store.load().unwrap();
        assert_eq!(store.len(), 0);
    }
}
