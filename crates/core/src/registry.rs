//! Registry of open vector indexes.
//!
//! One [`IndexHandle`] per collection, loaded from its artifact directory on first
//! open. The handle's lock is also the collection's writer lock: the coordinator
//! holds it exclusively across each combined store + index mutation.
//!
//! Lock order is handle lock, then the persist ledger. A persist never waits on a
//! handle while holding the ledger.

use crate::collection::CollectionInfo;
use crate::error::Result;
use crate::index::{artifacts, IndexMeta, VectorIndex};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use uuid::Uuid;

/// Shared handle to one collection's index.
pub type IndexHandle = Arc<RwLock<VectorIndex>>;

/// Orders artifact writes against each other and against removals. Every event
/// takes a tick from one clock.
#[derive(Debug, Default)]
struct PersistLedger {
    clock: u64,
    reset_at: u64,
    removed_at: HashMap<Uuid, u64>,
    /// Tick of the snapshot currently on disk per collection.
    written_at: HashMap<Uuid, u64>,
    /// Handles dropped by remove or reset.
    retired: Vec<Weak<RwLock<VectorIndex>>>,
}

impl PersistLedger {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn retire(&mut self, handle: &IndexHandle) {
        self.retired.retain(|w| w.strong_count() > 0);
        self.retired.push(Arc::downgrade(handle));
    }

    /// Whether a persist of `handle` that began at `started` must be dropped.
    fn is_stale(&self, collection_id: Uuid, handle: &IndexHandle, started: u64) -> bool {
        self.reset_at > started
            || self
                .removed_at
                .get(&collection_id)
                .is_some_and(|&at| at > started)
            || self
                .retired
                .iter()
                .any(|w| std::ptr::eq(w.as_ptr(), Arc::as_ptr(handle)))
    }
}

/// Open index handles keyed by collection id.
#[derive(Debug)]
pub struct IndexRegistry {
    /// Parent of the per-collection artifact directories. `None` keeps indexes in
    /// memory only.
    root: Option<PathBuf>,
    handles: Mutex<HashMap<Uuid, IndexHandle>>,
    /// Serializes artifact writes and removals.
    ledger: Mutex<PersistLedger>,
}

impl IndexRegistry {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self {
            root,
            handles: Mutex::new(HashMap::new()),
            ledger: Mutex::new(PersistLedger::default()),
        }
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Artifact directory of a collection.
    pub fn index_dir(&self, collection_id: Uuid) -> Option<PathBuf> {
        self.root
            .as_ref()
            .map(|root| root.join(collection_id.to_string()))
    }

    /// Returns the open handle for `info`, loading it from disk on first use.
    ///
    /// Missing or corrupt artifacts are logged and yield an uninitialized index;
    /// the caller's consistency check then rebuilds it from the store.
    pub fn open(&self, info: &CollectionInfo) -> IndexHandle {
        let mut handles = self.handles.lock();
        if let Some(handle) = handles.get(&info.id) {
            return Arc::clone(handle);
        }
        let index = self.load(info);
        let handle = Arc::new(RwLock::new(index));
        handles.insert(info.id, Arc::clone(&handle));
        handle
    }

    fn load(&self, info: &CollectionInfo) -> VectorIndex {
        let config = info.config.to_hnsw_config();
        let Some(dir) = self.index_dir(info.id) else {
            return VectorIndex::new(config);
        };
        let loaded = artifacts::load(&dir)
            .and_then(|found| found.map(|(_, s)| VectorIndex::from_snapshot(config.clone(), s)).transpose());
        match loaded {
            Ok(Some(index)) => index,
            Ok(None) => VectorIndex::new(config),
            Err(e) => {
                tracing::warn!(
                    collection = %info.name,
                    dir = %dir.display(),
                    error = %e,
                    "ignoring unusable index artifacts"
                );
                VectorIndex::new(config)
            }
        }
    }

    /// Returns the handle if the collection's index is open.
    pub fn get(&self, collection_id: Uuid) -> Option<IndexHandle> {
        self.handles.lock().get(&collection_id).cloned()
    }

    pub fn open_ids(&self) -> Vec<Uuid> {
        self.handles.lock().keys().copied().collect()
    }

    /// Writes the handle's current state to disk.
    ///
    /// The snapshot is taken under the read lock and written after releasing it.
    /// Returns `None` for in-memory registries, uninitialized indexes, collections
    /// removed while the persist was pending, and snapshots older than the one
    /// already on disk.
    pub fn persist(&self, collection_id: Uuid, handle: &IndexHandle) -> Result<Option<IndexMeta>> {
        let Some(dir) = self.index_dir(collection_id) else {
            return Ok(None);
        };
        let started = self.ledger.lock().tick();
        let (generation, snapshot, taken) = {
            let index = handle.read();
            let Some((generation, snapshot)) = index.snapshot() else {
                return Ok(None);
            };
            (generation, snapshot, self.ledger.lock().tick())
        };

        let meta = {
            let mut ledger = self.ledger.lock();
            if ledger.is_stale(collection_id, handle, started) {
                tracing::debug!(%collection_id, "index removed during persist, discarding snapshot");
                return Ok(None);
            }
            if ledger
                .written_at
                .get(&collection_id)
                .is_some_and(|&at| at > taken)
            {
                tracing::debug!(%collection_id, "newer snapshot already on disk");
                return Ok(None);
            }
            let meta = artifacts::persist(&snapshot, &dir)?;
            ledger.written_at.insert(collection_id, taken);
            meta
        };
        handle.write().mark_persisted(generation);
        Ok(Some(meta))
    }

    /// Drops the handle, persisting it first if it has unsaved changes.
    pub fn close(&self, collection_id: Uuid) -> Result<()> {
        let Some(handle) = self.handles.lock().remove(&collection_id) else {
            return Ok(());
        };
        if handle.read().state().is_dirty() {
            self.persist(collection_id, &handle)?;
        }
        Ok(())
    }

    /// Closes every handle. All are attempted; the first error is returned.
    pub fn evict_all(&self) -> Result<()> {
        let drained: Vec<(Uuid, IndexHandle)> = self.handles.lock().drain().collect();
        let mut first_err = None;
        for (id, handle) in drained {
            if !handle.read().state().is_dirty() {
                continue;
            }
            if let Err(e) = self.persist(id, &handle) {
                tracing::warn!(collection_id = %id, error = %e, "failed to persist index on eviction");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Drops the handle without persisting and deletes the artifacts. A persist
    /// still pending for the collection writes nothing.
    ///
    /// Safe to call while holding the collection's handle lock.
    pub fn remove(&self, collection_id: Uuid) -> Result<()> {
        let removed = self.handles.lock().remove(&collection_id);
        let mut ledger = self.ledger.lock();
        let at = ledger.tick();
        ledger.removed_at.insert(collection_id, at);
        ledger.written_at.remove(&collection_id);
        if let Some(handle) = &removed {
            ledger.retire(handle);
        }
        if let Some(dir) = self.index_dir(collection_id) {
            artifacts::remove(&dir)?;
        }
        Ok(())
    }

    /// Drops every handle and deletes all artifacts.
    pub fn reset(&self) -> Result<()> {
        let drained: Vec<IndexHandle> = self.handles.lock().drain().map(|(_, h)| h).collect();
        let mut ledger = self.ledger.lock();
        let at = ledger.tick();
        ledger.reset_at = at;
        ledger.removed_at.clear();
        ledger.written_at.clear();
        for handle in &drained {
            ledger.retire(handle);
        }
        if let Some(root) = &self.root {
            artifacts::remove(root)?;
            tracing::info!(dir = %root.display(), "removed all index artifacts");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::CollectionConfig;
    use crate::config;
    use crate::embedding::EmbeddingAdapter;
    use crate::index::IndexState;
    use std::time::Duration;
    use tempfile::TempDir;

    fn info() -> CollectionInfo {
        CollectionInfo::new("docs", CollectionConfig::default(), EmbeddingAdapter::Precomputed)
    }

    fn fill(handle: &IndexHandle) {
        let ids: Vec<String> = (0..10).map(|i| format!("r{i}")).collect();
        let vectors: Vec<Vec<f32>> = (0..10).map(|i| vec![i as f32, 1.0]).collect();
        handle.write().add(&ids, &vectors, false).unwrap();
    }

    #[test]
    fn test_open_returns_same_handle() {
        let registry = IndexRegistry::new(None);
        let info = info();
        let a = registry.open(&info);
        let b = registry.open(&info);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.open_ids(), vec![info.id]);
    }

    #[test]
    fn test_close_persists_and_reopen_loads() {
        let tmp = TempDir::new().unwrap();
        let registry = IndexRegistry::new(Some(tmp.path().to_path_buf()));
        let info = info();
        fill(&registry.open(&info));
        registry.close(info.id).unwrap();
        assert!(registry.get(info.id).is_none());

        let reopened = registry.open(&info);
        let index = reopened.read();
        assert_eq!(index.state(), IndexState::Loaded);
        assert_eq!(index.len(), 10);
    }

    #[test]
    fn test_persist_marks_persisted() {
        let tmp = TempDir::new().unwrap();
        let registry = IndexRegistry::new(Some(tmp.path().to_path_buf()));
        let info = info();
        let handle = registry.open(&info);
        assert!(registry.persist(info.id, &handle).unwrap().is_none());
        fill(&handle);
        let meta = registry.persist(info.id, &handle).unwrap().unwrap();
        assert_eq!(meta.element_count, 10);
        assert_eq!(handle.read().state(), IndexState::Persisted);
    }

    #[test]
    fn test_corrupt_artifacts_open_uninitialized() {
        let tmp = TempDir::new().unwrap();
        let registry = IndexRegistry::new(Some(tmp.path().to_path_buf()));
        let info = info();
        fill(&registry.open(&info));
        registry.evict_all().unwrap();

        let dir = registry.index_dir(info.id).unwrap();
        std::fs::write(dir.join(config::GRAPH_FILE), b"garbage").unwrap();
        let handle = registry.open(&info);
        assert_eq!(handle.read().state(), IndexState::Uninitialized);
    }

    #[test]
    fn test_remove_while_writer_held_and_persist_pending() {
        let tmp = TempDir::new().unwrap();
        let registry = IndexRegistry::new(Some(tmp.path().to_path_buf()));
        let info = info();
        let handle = registry.open(&info);
        fill(&handle);
        let id = info.id;

        let writer = handle.write();
        let pending = std::thread::scope(|s| {
            let (registry, handle) = (&registry, &handle);
            let persist = s.spawn(move || registry.persist(id, handle));
            std::thread::sleep(Duration::from_millis(100));
            // Same thread holds the writer, as delete_collection does.
            registry.remove(id).unwrap();
            drop(writer);
            persist.join().unwrap()
        });
        assert!(pending.unwrap().is_none());
        assert!(!registry.index_dir(id).unwrap().exists());
        assert_eq!(handle.read().state(), IndexState::Dirty);
    }

    #[test]
    fn test_persist_after_remove_and_reopen_writes() {
        let tmp = TempDir::new().unwrap();
        let registry = IndexRegistry::new(Some(tmp.path().to_path_buf()));
        let info = info();
        fill(&registry.open(&info));
        registry.remove(info.id).unwrap();

        let handle = registry.open(&info);
        fill(&handle);
        assert!(registry.persist(info.id, &handle).unwrap().is_some());
        assert!(registry
            .index_dir(info.id)
            .unwrap()
            .join(config::INDEX_META_FILE)
            .exists());
    }

    #[test]
    fn test_remove_and_reset_delete_artifacts() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("index");
        let registry = IndexRegistry::new(Some(root.clone()));
        let info = info();
        fill(&registry.open(&info));
        registry.close(info.id).unwrap();
        let dir = registry.index_dir(info.id).unwrap();
        assert!(dir.exists());
        registry.remove(info.id).unwrap();
        assert!(!dir.exists());

        fill(&registry.open(&info));
        registry.evict_all().unwrap();
        registry.reset().unwrap();
        assert!(!root.exists());
    }
}
