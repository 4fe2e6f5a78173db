//! Collection coordinator.
//!
//! [`Coordinator`] ties the record store, the index registry, the embedding
//! adapters and the search pool together. Every mutation writes the store first
//! and the index second while holding the collection's index lock exclusively;
//! reads hold it shared. Before a collection is searched or mutated its index is
//! checked against the store and rebuilt when the two disagree.

mod config;
mod read;
mod request;
mod write;

pub use config::CoordinatorConfig;
pub use request::{DeleteRequest, GetRequest, QueryHit, QueryRequest, RecordBatch};

use crate::collection::{validate_collection_name, CollectionConfig, CollectionInfo};
use crate::config as limits;
use crate::embedding::EmbeddingAdapter;
use crate::error::{Error, Result};
use crate::hnsw::Space;
use crate::index::{IndexStats, VectorIndex};
use crate::registry::{IndexHandle, IndexRegistry};
use crate::store::{GetQuery, LocalRecordStore, RecordStore};
use parking_lot::RwLockReadGuard;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Counters reported by [`Coordinator::stats`].
#[derive(Debug, Clone, Serialize)]
pub struct CollectionStats {
    pub id: Uuid,
    pub name: String,
    /// Rows in the record store.
    pub count: usize,
    pub dimension: Option<usize>,
    pub space: Space,
    pub embedding: &'static str,
    pub index: IndexStats,
}

/// Entry point for all collection operations.
pub struct Coordinator {
    config: CoordinatorConfig,
    store: Arc<dyn RecordStore>,
    registry: IndexRegistry,
    pool: rayon::ThreadPool,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl Coordinator {
    /// Opens a coordinator over `config.data_dir`, or fully in memory when unset.
    pub fn open(config: CoordinatorConfig) -> Result<Self> {
        config.validate()?;
        let (store, index_root): (Arc<dyn RecordStore>, _) = match &config.data_dir {
            Some(dir) => (
                Arc::new(LocalRecordStore::open(&dir.join(limits::STORE_DIR_NAME))?),
                Some(dir.join(limits::INDEX_DIR_NAME)),
            ),
            None => (Arc::new(LocalRecordStore::in_memory()), None),
        };
        Self::with_store(config, store, IndexRegistry::new(index_root))
    }

    /// Builds a coordinator over an existing store and registry.
    pub fn with_store(
        config: CoordinatorConfig,
        store: Arc<dyn RecordStore>,
        registry: IndexRegistry,
    ) -> Result<Self> {
        config.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.search_threads)
            .thread_name(|i| format!("quiverdb-search-{i}"))
            .build()
            .map_err(|e| Error::invalid_config(format!("cannot start search pool: {e}")))?;
        tracing::info!(
            data_dir = ?config.data_dir,
            search_threads = config.search_threads,
            "coordinator ready"
        );
        Ok(Self {
            config,
            store,
            registry,
            pool,
        })
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn registry(&self) -> &IndexRegistry {
        &self.registry
    }

    // ── Collections ───────────────────────────────────────────────────

    pub fn create_collection(
        &self,
        name: &str,
        config: CollectionConfig,
        embedding: EmbeddingAdapter,
    ) -> Result<CollectionInfo> {
        validate_collection_name(name)?;
        config.validate()?;
        embedding.validate()?;
        let info = CollectionInfo::new(name, config, embedding);
        self.store.create_collection(&info)?;
        tracing::info!(collection = %name, id = %info.id, space = %info.config.space, "created collection");
        Ok(info)
    }

    /// Returns the existing collection, or creates it with the given settings.
    pub fn get_or_create_collection(
        &self,
        name: &str,
        config: CollectionConfig,
        embedding: EmbeddingAdapter,
    ) -> Result<CollectionInfo> {
        if let Some(info) = self.store.get_collection(name)? {
            return Ok(info);
        }
        match self.create_collection(name, config, embedding) {
            Err(Error::CollectionExists(_)) => self.get_collection(name),
            other => other,
        }
    }

    pub fn get_collection(&self, name: &str) -> Result<CollectionInfo> {
        self.store
            .get_collection(name)?
            .ok_or_else(|| Error::CollectionNotFound(name.to_string()))
    }

    pub fn list_collections(&self) -> Result<Vec<CollectionInfo>> {
        self.store.list_collections()
    }

    /// Removes the collection's rows, closes its index and deletes its artifacts.
    pub fn delete_collection(&self, name: &str) -> Result<()> {
        let info = self.get_collection(name)?;
        let handle = self.registry.open(&info);
        let _writer = handle.write();
        self.store.delete_collection(info.id)?;
        self.registry.remove(info.id)?;
        tracing::info!(collection = %name, id = %info.id, "deleted collection");
        Ok(())
    }

    // ── Consistency ───────────────────────────────────────────────────

    /// Re-reads the catalog entry; the dimension may have been set since the caller
    /// last looked.
    fn refresh(&self, id: Uuid) -> Result<CollectionInfo> {
        self.store
            .get_collection_by_id(id)?
            .ok_or(Error::UnknownCollectionId(id))
    }

    /// Rebuilds `index` from every row in the store.
    fn rebuild_locked(&self, info: &CollectionInfo, index: &mut VectorIndex) -> Result<()> {
        let records = self.store.get(info.id, &GetQuery::default())?;
        let dimension = info
            .dimension
            .or_else(|| records.first().map(|r| r.embedding.len()));
        let revision = self.store.revision(info.id)?;
        match dimension {
            Some(dimension) => {
                let entries = records.into_iter().map(|r| (r.id, r.embedding)).collect();
                index.rebuild(dimension, entries)?;
            }
            None => *index = VectorIndex::new(info.config.to_hnsw_config()),
        }
        index.sync_store_revision(revision);
        Ok(())
    }

    /// Stamps the index with the store revision it now reflects. Caller holds the
    /// index write lock across the store write and this call.
    fn stamp(&self, info: &CollectionInfo, index: &mut VectorIndex) -> Result<()> {
        index.sync_store_revision(self.store.revision(info.id)?);
        Ok(())
    }

    /// Compares the index with the store by live count and revision.
    fn divergence(&self, info: &CollectionInfo, index: &VectorIndex) -> Result<Option<Error>> {
        let stored = self.store.count(info.id)?;
        let store_revision = self.store.revision(info.id)?;
        if index.len() == stored && index.store_revision() == store_revision {
            return Ok(None);
        }
        Ok(Some(Error::StoreIndexDivergence {
            indexed: index.len(),
            stored,
            index_revision: index.store_revision(),
            store_revision,
        }))
    }

    /// Rebuilds the index when it has diverged from the store. Caller holds the
    /// index write lock.
    fn ensure_consistent(&self, info: &CollectionInfo, index: &mut VectorIndex) -> Result<()> {
        let Some(divergence) = self.divergence(info, index)? else {
            return Ok(());
        };
        tracing::warn!(collection = %info.name, "{divergence}; rebuilding index from store");
        self.rebuild_locked(info, index)
    }

    fn is_consistent(&self, info: &CollectionInfo, index: &VectorIndex) -> Result<bool> {
        Ok(self.divergence(info, index)?.is_none())
    }

    /// Opens the collection's index and takes its read lock, repairing divergence
    /// first if needed.
    fn read_index<'a>(
        &self,
        info: &CollectionInfo,
        handle: &'a IndexHandle,
    ) -> Result<RwLockReadGuard<'a, VectorIndex>> {
        let guard = handle.read();
        if self.is_consistent(info, &guard)? {
            return Ok(guard);
        }
        drop(guard);
        {
            let mut writer = handle.write();
            let info = self.refresh(info.id)?;
            self.ensure_consistent(&info, &mut writer)?;
        }
        Ok(handle.read())
    }

    /// Applies `op` to the index, retrying once and then rebuilding from the store.
    /// Only a failed rebuild is returned.
    fn write_index(
        &self,
        info: &CollectionInfo,
        index: &mut VectorIndex,
        op: impl Fn(&mut VectorIndex) -> Result<()>,
    ) -> Result<()> {
        let Err(first) = op(index) else {
            return Ok(());
        };
        tracing::warn!(collection = %info.name, error = %first, "index write failed, retrying");
        let Err(second) = op(index) else {
            return Ok(());
        };
        tracing::warn!(
            collection = %info.name,
            error = %second,
            "index write failed again, rebuilding from store"
        );
        self.rebuild_locked(info, index)
    }

    // ── Maintenance ───────────────────────────────────────────────────

    /// Rebuilds the collection's index from the store, dropping tombstones.
    pub fn create_index(&self, name: &str) -> Result<IndexStats> {
        let info = self.get_collection(name)?;
        let handle = self.registry.open(&info);
        let mut index = handle.write();
        let info = self.refresh(info.id)?;
        self.rebuild_locked(&info, &mut index)?;
        Ok(index.stats())
    }

    /// Writes the collection's index artifacts.
    pub fn persist(&self, name: &str) -> Result<()> {
        let info = self.get_collection(name)?;
        let handle = self.registry.open(&info);
        self.registry.persist(info.id, &handle)?;
        Ok(())
    }

    /// Persists every open index and checkpoints the store.
    pub fn persist_all(&self) -> Result<()> {
        for id in self.registry.open_ids() {
            if let Some(handle) = self.registry.get(id) {
                self.registry.persist(id, &handle)?;
            }
        }
        self.store.checkpoint()
    }

    /// Persists dirty indexes, closes every handle and checkpoints the store.
    pub fn close(&self) -> Result<()> {
        self.registry.evict_all()?;
        self.store.checkpoint()
    }

    /// Drops all collections, rows and index artifacts.
    pub fn reset(&self) -> Result<()> {
        if !self.config.allow_reset {
            return Err(Error::ResetDisabled);
        }
        self.registry.reset()?;
        self.store.reset()?;
        tracing::warn!("reset removed all collections");
        Ok(())
    }

    pub fn stats(&self, name: &str) -> Result<CollectionStats> {
        let info = self.get_collection(name)?;
        let handle = self.registry.open(&info);
        let index = self.read_index(&info, &handle)?;
        let info = self.refresh(info.id)?;
        Ok(CollectionStats {
            id: info.id,
            name: info.name.clone(),
            count: self.store.count(info.id)?,
            dimension: info.dimension,
            space: info.config.space,
            embedding: info.embedding.name(),
            index: index.stats(),
        })
    }

    /// Checks the loaded index's structural invariants.
    pub fn validate_index(&self, name: &str) -> Result<()> {
        let info = self.get_collection(name)?;
        let handle = self.registry.open(&info);
        let index = self.read_index(&info, &handle)?;
        index.validate().map_err(Error::corrupt)
    }
}
