//! Record storage, the source of truth for every collection.
//!
//! [`RecordStore`] is the seam between the coordinator and durable rows. The crate
//! ships [`LocalRecordStore`], an in-memory row table made durable by a
//! write-ahead log and periodic snapshots.

mod local;
pub mod snapshot;
pub mod wal;

pub use local::LocalRecordStore;

use crate::collection::CollectionInfo;
use crate::error::Result;
use crate::predicate::Predicate;
use crate::record::{Record, RecordPatch};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Result ordering for [`RecordStore::get`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sort {
    /// Order in which records were first inserted.
    #[default]
    Inserted,
    IdAscending,
    IdDescending,
}

/// Selection for [`RecordStore::get`]. Every present selector narrows the result.
#[derive(Debug, Clone, Copy, Default)]
pub struct GetQuery<'a> {
    pub ids: Option<&'a [String]>,
    pub predicate: Option<&'a Predicate>,
    pub limit: Option<usize>,
    pub offset: usize,
    pub sort: Sort,
}

/// Durable row store plus collection catalog.
pub trait RecordStore: Send + Sync {
    /// Registers a collection. Fails with `CollectionExists` on a name clash.
    fn create_collection(&self, info: &CollectionInfo) -> Result<()>;

    fn get_collection(&self, name: &str) -> Result<Option<CollectionInfo>>;

    fn get_collection_by_id(&self, id: Uuid) -> Result<Option<CollectionInfo>>;

    fn list_collections(&self) -> Result<Vec<CollectionInfo>>;

    /// Removes a collection and all of its rows.
    fn delete_collection(&self, id: Uuid) -> Result<()>;

    /// Records the dimensionality established by the first insert.
    fn set_dimension(&self, id: Uuid, dimension: usize) -> Result<()>;

    fn get(&self, collection_id: Uuid, query: &GetQuery<'_>) -> Result<Vec<Record>>;

    /// Inserts new rows. Any id already present fails the whole batch.
    fn insert(&self, collection_id: Uuid, records: Vec<Record>) -> Result<Vec<String>>;

    /// Applies `patches[i]` to `ids[i]`. Every id must exist; returns the number of
    /// rows written.
    fn update(&self, collection_id: Uuid, ids: &[String], patches: Vec<RecordPatch>)
        -> Result<usize>;

    /// Removes rows, returning the ids that existed.
    fn delete(&self, collection_id: Uuid, ids: &[String]) -> Result<Vec<String>>;

    fn count(&self, collection_id: Uuid) -> Result<usize>;

    /// Counter that moves whenever the collection's id set or any of its
    /// embeddings changes. An index built at the same revision holds exactly the
    /// store's vectors.
    fn revision(&self, collection_id: Uuid) -> Result<u64>;

    /// Drops every collection and row.
    fn reset(&self) -> Result<()>;

    /// Compacts durable state. Stores without a log have nothing to do.
    fn checkpoint(&self) -> Result<()> {
        Ok(())
    }
}
