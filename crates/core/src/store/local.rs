//! In-process record store with optional durability.
//!
//! Rows live in memory, ordered by an insertion sequence number. When opened on a
//! directory, every mutation is first appended to the write-ahead log and the
//! state is periodically written to a checksummed snapshot, after which the log is
//! truncated. Opening replays the snapshot plus every logged entry newer than it.

use super::snapshot;
use super::wal::{LogRecord, WalEntry, WriteAheadLog};
use super::{GetQuery, RecordStore, Sort};
use crate::collection::CollectionInfo;
use crate::config;
use crate::error::{Error, Result};
use crate::predicate::evaluate;
use crate::record::{Record, RecordPatch};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CollectionRows {
    info: CollectionInfo,
    rows: BTreeMap<u64, Record>,
    by_id: HashMap<String, u64>,
    next_seq: u64,
    /// Bumped by every entry that changes the id set or an embedding.
    revision: u64,
}

impl CollectionRows {
    fn new(info: CollectionInfo) -> Self {
        Self {
            info,
            rows: BTreeMap::new(),
            by_id: HashMap::new(),
            next_seq: 0,
            revision: 0,
        }
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut Record> {
        let seq = self.by_id.get(id)?;
        self.rows.get_mut(seq)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreState {
    collections: HashMap<Uuid, CollectionRows>,
    /// Sequence number of the last applied log record.
    applied_lsn: u64,
}

impl StoreState {
    fn collection(&self, id: Uuid) -> Result<&CollectionRows> {
        self.collections
            .get(&id)
            .ok_or(Error::UnknownCollectionId(id))
    }

    /// Applies a validated entry. Entries replayed from the log go through the same
    /// path, so anything referring to a vanished collection is ignored.
    fn apply(&mut self, entry: WalEntry) {
        match entry {
            WalEntry::CreateCollection { info } => {
                self.collections
                    .entry(info.id)
                    .or_insert_with(|| CollectionRows::new(info));
            }
            WalEntry::DeleteCollection { id } => {
                self.collections.remove(&id);
            }
            WalEntry::SetDimension { id, dimension } => {
                if let Some(c) = self.collections.get_mut(&id) {
                    c.info.dimension = Some(dimension);
                }
            }
            WalEntry::Insert {
                collection_id,
                records,
            } => {
                let Some(c) = self.collections.get_mut(&collection_id) else {
                    return;
                };
                c.revision += 1;
                for record in records {
                    if c.by_id.contains_key(&record.id) {
                        continue;
                    }
                    let seq = c.next_seq;
                    c.next_seq += 1;
                    c.by_id.insert(record.id.clone(), seq);
                    c.rows.insert(seq, record);
                }
            }
            WalEntry::Update {
                collection_id,
                ids,
                patches,
            } => {
                let Some(c) = self.collections.get_mut(&collection_id) else {
                    return;
                };
                if patches.iter().any(|p| p.embedding.is_some()) {
                    c.revision += 1;
                }
                for (id, patch) in ids.iter().zip(&patches) {
                    if let Some(record) = c.get_mut(id) {
                        patch.apply_to(record);
                    }
                }
            }
            WalEntry::Delete { collection_id, ids } => {
                let Some(c) = self.collections.get_mut(&collection_id) else {
                    return;
                };
                c.revision += 1;
                for id in &ids {
                    if let Some(seq) = c.by_id.remove(id) {
                        c.rows.remove(&seq);
                    }
                }
            }
            WalEntry::Reset => self.collections.clear(),
        }
    }
}

#[derive(Debug)]
struct Durability {
    dir: PathBuf,
    wal: WriteAheadLog,
    /// Log records appended since the last checkpoint.
    pending: AtomicUsize,
}

/// [`RecordStore`] keeping rows in memory, optionally backed by a WAL and snapshot.
#[derive(Debug)]
pub struct LocalRecordStore {
    state: RwLock<StoreState>,
    durability: Option<Durability>,
}

impl LocalRecordStore {
    /// A store that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            durability: None,
        }
    }

    /// Opens (or creates) a durable store in `dir`, replaying any logged entries.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let mut state: StoreState =
            snapshot::load(&dir.join(config::STORE_SNAPSHOT_FILE))?.unwrap_or_default();
        let snapshot_lsn = state.applied_lsn;

        let wal = WriteAheadLog::open(dir, config::STORE_WAL_FILE)?;
        let (records, stats) = wal.replay()?;
        let mut applied = 0usize;
        for LogRecord { lsn, entry } in records {
            if lsn <= state.applied_lsn {
                continue;
            }
            state.apply(entry);
            state.applied_lsn = lsn;
            applied += 1;
        }

        tracing::info!(
            dir = %dir.display(),
            collections = state.collections.len(),
            snapshot_lsn,
            replayed = applied,
            skipped = stats.skipped,
            crc_errors = stats.crc_errors,
            truncated = stats.truncated,
            "opened record store"
        );

        Ok(Self {
            state: RwLock::new(state),
            durability: Some(Durability {
                dir: dir.to_path_buf(),
                wal,
                pending: AtomicUsize::new(applied),
            }),
        })
    }

    /// Validates under the write lock, then logs and applies the entry `build`
    /// returns. `build` returning `None` means there is nothing to write.
    fn mutate<R>(
        &self,
        build: impl FnOnce(&StoreState) -> Result<(Option<WalEntry>, R)>,
    ) -> Result<R> {
        let mut state = self.state.write();
        let (entry, out) = build(&*state)?;
        let Some(entry) = entry else {
            return Ok(out);
        };
        let lsn = state.applied_lsn + 1;
        let mut pending = 0;
        if let Some(d) = &self.durability {
            d.wal.append(&LogRecord {
                lsn,
                entry: entry.clone(),
            })?;
            pending = d.pending.fetch_add(1, Ordering::Relaxed) + 1;
        }
        state.apply(entry);
        state.applied_lsn = lsn;
        drop(state);

        if pending >= config::STORE_CHECKPOINT_THRESHOLD {
            if let Err(e) = self.checkpoint() {
                tracing::warn!("automatic record store checkpoint failed: {}", e);
            }
        }
        Ok(out)
    }
}

fn select(rows: &CollectionRows, query: &GetQuery<'_>) -> Vec<Record> {
    let mut matched: Vec<&Record> = match query.ids {
        Some(ids) => {
            let mut seqs: Vec<u64> = ids
                .iter()
                .filter_map(|id| rows.by_id.get(id).copied())
                .collect();
            seqs.sort_unstable();
            seqs.dedup();
            seqs.iter().filter_map(|seq| rows.rows.get(seq)).collect()
        }
        None => rows.rows.values().collect(),
    };
    if let Some(predicate) = query.predicate {
        matched.retain(|record| evaluate(predicate, record));
    }
    match query.sort {
        Sort::Inserted => {}
        Sort::IdAscending => matched.sort_by(|a, b| a.id.cmp(&b.id)),
        Sort::IdDescending => matched.sort_by(|a, b| b.id.cmp(&a.id)),
    }
    matched
        .into_iter()
        .skip(query.offset)
        .take(query.limit.unwrap_or(usize::MAX))
        .cloned()
        .collect()
}

impl RecordStore for LocalRecordStore {
    fn create_collection(&self, info: &CollectionInfo) -> Result<()> {
        self.mutate(|state| {
            let clash = state
                .collections
                .values()
                .any(|c| c.info.name == info.name || c.info.id == info.id);
            if clash {
                return Err(Error::CollectionExists(info.name.clone()));
            }
            Ok((Some(WalEntry::CreateCollection { info: info.clone() }), ()))
        })
    }

    fn get_collection(&self, name: &str) -> Result<Option<CollectionInfo>> {
        let state = self.state.read();
        Ok(state
            .collections
            .values()
            .find(|c| c.info.name == name)
            .map(|c| c.info.clone()))
    }

    fn get_collection_by_id(&self, id: Uuid) -> Result<Option<CollectionInfo>> {
        let state = self.state.read();
        Ok(state.collections.get(&id).map(|c| c.info.clone()))
    }

    fn list_collections(&self) -> Result<Vec<CollectionInfo>> {
        let state = self.state.read();
        let mut infos: Vec<CollectionInfo> =
            state.collections.values().map(|c| c.info.clone()).collect();
        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.name.cmp(&b.name)));
        Ok(infos)
    }

    fn delete_collection(&self, id: Uuid) -> Result<()> {
        self.mutate(|state| {
            state.collection(id)?;
            Ok((Some(WalEntry::DeleteCollection { id }), ()))
        })
    }

    fn set_dimension(&self, id: Uuid, dimension: usize) -> Result<()> {
        self.mutate(|state| {
            let c = state.collection(id)?;
            match c.info.dimension {
                Some(existing) if existing == dimension => Ok((None, ())),
                Some(existing) => Err(Error::DimensionMismatch {
                    expected: existing,
                    got: dimension,
                }),
                None => Ok((Some(WalEntry::SetDimension { id, dimension }), ())),
            }
        })
    }

    fn get(&self, collection_id: Uuid, query: &GetQuery<'_>) -> Result<Vec<Record>> {
        let state = self.state.read();
        Ok(select(state.collection(collection_id)?, query))
    }

    fn insert(&self, collection_id: Uuid, records: Vec<Record>) -> Result<Vec<String>> {
        self.mutate(|state| {
            let c = state.collection(collection_id)?;
            let mut seen = HashSet::with_capacity(records.len());
            for record in &records {
                if c.by_id.contains_key(&record.id) || !seen.insert(record.id.as_str()) {
                    return Err(Error::DuplicateId(record.id.clone()));
                }
            }
            let ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();
            if records.is_empty() {
                return Ok((None, ids));
            }
            Ok((
                Some(WalEntry::Insert {
                    collection_id,
                    records,
                }),
                ids,
            ))
        })
    }

    fn update(
        &self,
        collection_id: Uuid,
        ids: &[String],
        patches: Vec<RecordPatch>,
    ) -> Result<usize> {
        if ids.len() != patches.len() {
            return Err(Error::invalid_argument(format!(
                "got {} ids but {} patches",
                ids.len(),
                patches.len()
            )));
        }
        self.mutate(|state| {
            let c = state.collection(collection_id)?;
            let missing = ids.iter().filter(|id| !c.by_id.contains_key(*id)).count();
            if missing > 0 {
                return Err(Error::NotFoundForUpdate { missing });
            }
            if ids.is_empty() {
                return Ok((None, 0));
            }
            Ok((
                Some(WalEntry::Update {
                    collection_id,
                    ids: ids.to_vec(),
                    patches,
                }),
                ids.len(),
            ))
        })
    }

    fn delete(&self, collection_id: Uuid, ids: &[String]) -> Result<Vec<String>> {
        self.mutate(|state| {
            let c = state.collection(collection_id)?;
            let mut seen = HashSet::new();
            let existing: Vec<String> = ids
                .iter()
                .filter(|id| c.by_id.contains_key(*id) && seen.insert(id.as_str()))
                .cloned()
                .collect();
            if existing.is_empty() {
                return Ok((None, existing));
            }
            Ok((
                Some(WalEntry::Delete {
                    collection_id,
                    ids: existing.clone(),
                }),
                existing,
            ))
        })
    }

    fn count(&self, collection_id: Uuid) -> Result<usize> {
        let state = self.state.read();
        Ok(state.collection(collection_id)?.rows.len())
    }

    fn revision(&self, collection_id: Uuid) -> Result<u64> {
        let state = self.state.read();
        Ok(state.collection(collection_id)?.revision)
    }

    fn reset(&self) -> Result<()> {
        self.mutate(|_| Ok((Some(WalEntry::Reset), ())))?;
        self.checkpoint()
    }

    fn checkpoint(&self) -> Result<()> {
        let Some(d) = &self.durability else {
            return Ok(());
        };
        // Appends only happen under the state write lock, so the read lock is
        // enough to keep the log and the snapshot in step.
        let state = self.state.read();
        let _gate = d.wal.freeze();
        let bytes = snapshot::save(&*state, &d.dir.join(config::STORE_SNAPSHOT_FILE))?;
        d.wal.truncate()?;
        d.pending.store(0, Ordering::Relaxed);
        tracing::info!(
            dir = %d.dir.display(),
            lsn = state.applied_lsn,
            bytes,
            "record store checkpoint"
        );
        Ok(())
    }
}
