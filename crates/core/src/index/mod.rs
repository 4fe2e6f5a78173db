//! Per-collection vector index.
//!
//! [`VectorIndex`] owns one HNSW graph plus the bidirectional map between external
//! string ids and dense graph ordinals. Deletes tombstone the ordinal and drop the
//! mapping, so an id can be re-added later under a fresh ordinal. Persistence of the
//! graph and maps lives in [`artifacts`].

pub mod artifacts;

use crate::config;
use crate::error::{Error, Result};
use crate::hnsw::search::sort_by_distance;
use crate::hnsw::{exhaustive_search, knn_search_filtered, HnswConfig, HnswIndex, Space};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

pub use artifacts::{IndexMeta, IndexSnapshot};

/// Lifecycle state of a [`VectorIndex`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexState {
    /// No graph allocated and nothing loaded.
    Uninitialized,
    /// Graph allocated, no mutation yet.
    Initialized,
    /// Mutated since the last persist or load.
    Dirty,
    /// In-memory graph matches the artifacts on disk.
    Persisted,
    /// Restored from disk, unchanged since.
    Loaded,
}

impl IndexState {
    pub fn is_dirty(&self) -> bool {
        matches!(self, IndexState::Dirty | IndexState::Initialized)
    }
}

/// Summary counters reported by [`VectorIndex::stats`].
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    /// Live (non-tombstoned) vectors.
    pub element_count: usize,
    pub tombstone_count: usize,
    pub capacity: usize,
    pub dimension: Option<usize>,
    pub space: Space,
    pub state: IndexState,
}

/// Nearest neighbors of a single query, ascending by distance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Neighbors {
    pub ids: Vec<String>,
    pub distances: Vec<f32>,
}

impl Neighbors {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// ANN graph for one collection with its id↔ordinal mapping.
#[derive(Debug)]
pub struct VectorIndex {
    config: HnswConfig,
    graph: Option<HnswIndex>,
    id_to_ordinal: HashMap<String, u32>,
    /// Indexed by ordinal; `None` once the ordinal is tombstoned.
    ordinal_to_id: Vec<Option<String>>,
    state: IndexState,
    /// Bumped on every mutation so a persist can tell whether it is still current.
    generation: u64,
    /// Record store revision the vectors reflect.
    store_revision: u64,
    created_at: DateTime<Utc>,
}

impl VectorIndex {
    /// Creates an uninitialized index. The graph is allocated on the first add or
    /// an explicit [`init_index`](Self::init_index).
    pub fn new(config: HnswConfig) -> Self {
        Self {
            config,
            graph: None,
            id_to_ordinal: HashMap::new(),
            ordinal_to_id: Vec::new(),
            state: IndexState::Uninitialized,
            generation: 0,
            store_revision: 0,
            created_at: Utc::now(),
        }
    }

    /// Allocates an empty graph of the given dimension.
    ///
    /// Calling it again with the same dimension is a no-op; a different dimension
    /// is a [`Error::DimensionMismatch`].
    pub fn init_index(&mut self, dimension: usize) -> Result<()> {
        if let Some(existing) = self.dimension() {
            if existing != dimension {
                return Err(Error::DimensionMismatch {
                    expected: existing,
                    got: dimension,
                });
            }
            return Ok(());
        }
        if dimension == 0 || dimension > config::MAX_DIMENSION {
            return Err(Error::invalid_argument(format!(
                "dimension must be between 1 and {}, got {dimension}",
                config::MAX_DIMENSION
            )));
        }
        self.graph = Some(HnswIndex::new(
            dimension,
            self.config.clone(),
            config::HNSW_INITIAL_CAPACITY,
        ));
        self.id_to_ordinal.clear();
        self.ordinal_to_id.clear();
        self.created_at = Utc::now();
        self.state = IndexState::Initialized;
        self.generation += 1;
        Ok(())
    }

    pub fn dimension(&self) -> Option<usize> {
        self.graph.as_ref().map(|g| g.dimension)
    }

    pub fn config(&self) -> &HnswConfig {
        &self.config
    }

    pub fn state(&self) -> IndexState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn store_revision(&self) -> u64 {
        self.store_revision
    }

    /// Records that the index now matches the store at `revision`. A change marks
    /// the index dirty so the new revision reaches disk with the next persist.
    pub fn sync_store_revision(&mut self, revision: u64) {
        if self.store_revision != revision {
            self.store_revision = revision;
            self.touch();
        }
    }

    /// Number of live ids.
    pub fn len(&self) -> usize {
        self.id_to_ordinal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_ordinal.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.id_to_ordinal.contains_key(id)
    }

    /// Live ids in no particular order.
    pub fn ids(&self) -> impl Iterator<Item = &String> {
        self.id_to_ordinal.keys()
    }

    fn touch(&mut self) {
        self.state = IndexState::Dirty;
        self.generation += 1;
    }

    fn check_dimensions(&self, dimension: usize, vectors: &[Vec<f32>]) -> Result<()> {
        match vectors.iter().find(|v| v.len() != dimension) {
            Some(bad) => Err(Error::DimensionMismatch {
                expected: dimension,
                got: bad.len(),
            }),
            None => Ok(()),
        }
    }

    /// Inserts or overwrites vectors.
    ///
    /// With `update == false` every id is assigned a new ordinal; an id already
    /// live in the index is a [`Error::DuplicateId`]. With `update == true` the
    /// existing ordinal's vector is overwritten and re-linked; an unknown id is a
    /// [`Error::NotIndexed`]. The whole batch is validated before any write.
    pub fn add(&mut self, ids: &[String], embeddings: &[Vec<f32>], update: bool) -> Result<()> {
        if ids.len() != embeddings.len() {
            return Err(Error::invalid_argument(format!(
                "got {} ids but {} embeddings",
                ids.len(),
                embeddings.len()
            )));
        }
        let Some(first) = embeddings.first() else {
            return Ok(());
        };
        let dimension = match self.dimension() {
            Some(d) => d,
            None => first.len(),
        };
        self.check_dimensions(dimension, embeddings)?;

        if update {
            let ordinals = ids
                .iter()
                .map(|id| {
                    self.id_to_ordinal
                        .get(id)
                        .copied()
                        .ok_or_else(|| Error::NotIndexed(id.clone()))
                })
                .collect::<Result<Vec<u32>>>()?;
            let graph = self
                .graph
                .as_mut()
                .ok_or_else(|| Error::NotIndexed(ids[0].clone()))?;
            for (ordinal, vector) in ordinals.into_iter().zip(embeddings) {
                graph.update(ordinal, vector);
            }
        } else {
            let mut seen = HashSet::with_capacity(ids.len());
            for id in ids {
                if self.id_to_ordinal.contains_key(id) || !seen.insert(id.as_str()) {
                    return Err(Error::DuplicateId(id.clone()));
                }
            }
            self.init_index(dimension)?;
            let graph = self
                .graph
                .as_mut()
                .ok_or_else(|| Error::invalid_argument("index is not initialized"))?;
            if graph.remaining_capacity() < ids.len() {
                let new_capacity = graph.capacity + ids.len();
                tracing::debug!(
                    from = graph.capacity,
                    to = new_capacity,
                    "growing index capacity"
                );
                graph.resize(new_capacity);
            }
            for (id, vector) in ids.iter().zip(embeddings) {
                let ordinal = graph.node_count;
                graph.insert(ordinal, vector);
                self.id_to_ordinal.insert(id.clone(), ordinal);
                self.ordinal_to_id.push(Some(id.clone()));
            }
        }

        self.touch();
        Ok(())
    }

    /// Tombstones the given ids. Unknown ids are skipped.
    ///
    /// Returns the ids that were actually removed.
    pub fn delete(&mut self, ids: &[String]) -> Vec<String> {
        let Some(graph) = self.graph.as_mut() else {
            return Vec::new();
        };
        let mut removed = Vec::new();
        for id in ids {
            let Some(ordinal) = self.id_to_ordinal.remove(id) else {
                continue;
            };
            graph.mark_deleted(ordinal);
            if let Some(slot) = self.ordinal_to_id.get_mut(ordinal as usize) {
                *slot = None;
            }
            removed.push(id.clone());
        }
        if !removed.is_empty() {
            self.touch();
        }
        removed
    }

    /// Replaces the graph with a compacted one built from `entries`.
    ///
    /// The new graph is built off to the side and swapped in only when complete,
    /// so a failure leaves the current index untouched.
    pub fn rebuild(&mut self, dimension: usize, entries: Vec<(String, Vec<f32>)>) -> Result<()> {
        let mut fresh = VectorIndex::new(self.config.clone());
        fresh.init_index(dimension)?;
        if let Some(graph) = fresh.graph.as_mut() {
            graph.resize(entries.len().max(config::HNSW_INITIAL_CAPACITY));
        }
        let (ids, vectors): (Vec<String>, Vec<Vec<f32>>) = entries.into_iter().unzip();
        fresh.add(&ids, &vectors, false)?;

        fresh.generation = self.generation + 1;
        fresh.state = IndexState::Dirty;
        *self = fresh;
        tracing::info!(elements = self.len(), dimension, "rebuilt vector index");
        Ok(())
    }

    /// Ranks eligible vectors by ascending distance to each query.
    ///
    /// With `allowed_ids`, only ids in the set are eligible. `k` is clamped to the
    /// eligible count. Queries are searched in parallel on the current rayon pool.
    pub fn nearest_neighbors(
        &self,
        queries: &[Vec<f32>],
        k: usize,
        allowed_ids: Option<&HashSet<String>>,
    ) -> Result<Vec<Neighbors>> {
        let Some(graph) = self.graph.as_ref() else {
            return Ok(vec![Neighbors::default(); queries.len()]);
        };
        self.check_dimensions(graph.dimension, queries)?;

        // Eligible ordinals, sorted for deterministic exhaustive scans.
        let eligible: Option<Vec<u32>> = allowed_ids.map(|allowed| {
            let mut ordinals: Vec<u32> = allowed
                .iter()
                .filter_map(|id| self.id_to_ordinal.get(id).copied())
                .collect();
            ordinals.sort_unstable();
            ordinals
        });
        let eligible_count = eligible.as_ref().map_or(self.len(), Vec::len);
        let k = k.min(eligible_count);
        if k == 0 {
            return Ok(vec![Neighbors::default(); queries.len()]);
        }

        let mask: Option<Vec<bool>> = eligible.as_ref().map(|ordinals| {
            let mut mask = vec![false; graph.node_count as usize];
            for &o in ordinals {
                mask[o as usize] = true;
            }
            mask
        });
        let brute_force = eligible_count <= config::BRUTE_FORCE_THRESHOLD;

        let search_one = |query: &Vec<f32>| -> Neighbors {
            let scan = || match eligible.as_ref() {
                Some(ordinals) => exhaustive_search(graph, query, k, ordinals.iter().copied()),
                None => exhaustive_search(graph, query, k, 0..graph.node_count),
            };
            let mut hits = if brute_force {
                scan()
            } else {
                match mask.as_ref() {
                    Some(mask) => {
                        knn_search_filtered(graph, query, k, &|o: u32| mask[o as usize])
                    }
                    None => knn_search_filtered(graph, query, k, &|_: u32| true),
                }
            };
            if hits.len() < k {
                hits = scan();
            }
            sort_by_distance(&mut hits);
            self.resolve(hits)
        };

        Ok(queries.par_iter().map(search_one).collect())
    }

    fn resolve(&self, hits: Vec<(f32, u32)>) -> Neighbors {
        let mut out = Neighbors {
            ids: Vec::with_capacity(hits.len()),
            distances: Vec::with_capacity(hits.len()),
        };
        for (distance, ordinal) in hits {
            if let Some(Some(id)) = self.ordinal_to_id.get(ordinal as usize) {
                out.ids.push(id.clone());
                out.distances.push(distance);
            }
        }
        out
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            element_count: self.len(),
            tombstone_count: self.graph.as_ref().map_or(0, |g| g.tombstone_count()),
            capacity: self.graph.as_ref().map_or(0, |g| g.capacity),
            dimension: self.dimension(),
            space: self.config.space,
            state: self.state,
        }
    }

    /// Checks graph invariants and that the two id maps agree with each other and
    /// with the graph's tombstones.
    pub fn validate(&self) -> std::result::Result<(), String> {
        let Some(graph) = self.graph.as_ref() else {
            if self.id_to_ordinal.is_empty() && self.ordinal_to_id.is_empty() {
                return Ok(());
            }
            return Err("id maps populated without a graph".to_string());
        };
        graph.validate()?;
        if self.ordinal_to_id.len() != graph.node_count as usize {
            return Err(format!(
                "ordinal_to_id length {} != node_count {}",
                self.ordinal_to_id.len(),
                graph.node_count
            ));
        }
        for (id, &ordinal) in &self.id_to_ordinal {
            match self.ordinal_to_id.get(ordinal as usize) {
                Some(Some(back)) if back == id => {}
                _ => return Err(format!("id '{id}' maps to ordinal {ordinal} without a reverse entry")),
            }
            if graph.is_deleted(ordinal) {
                return Err(format!("id '{id}' maps to tombstoned ordinal {ordinal}"));
            }
        }
        let mapped = self.ordinal_to_id.iter().filter(|slot| slot.is_some()).count();
        if mapped != self.id_to_ordinal.len() {
            return Err(format!(
                "ordinal_to_id holds {mapped} ids but id_to_ordinal holds {}",
                self.id_to_ordinal.len()
            ));
        }
        if graph.len() != mapped {
            return Err(format!(
                "graph has {} live nodes but {mapped} mapped ids",
                graph.len()
            ));
        }
        Ok(())
    }

    /// Clones the persistable state, tagged with the current generation.
    ///
    /// Returns `None` for an uninitialized index.
    pub fn snapshot(&self) -> Option<(u64, IndexSnapshot)> {
        let graph = self.graph.as_ref()?;
        Some((
            self.generation,
            IndexSnapshot {
                graph: graph.clone(),
                ordinal_to_id: self.ordinal_to_id.clone(),
                id_to_ordinal: self.id_to_ordinal.clone(),
                created_at: self.created_at,
                store_revision: self.store_revision,
            },
        ))
    }

    /// Records a successful persist of the snapshot taken at `generation`. A later
    /// mutation keeps the index dirty.
    pub fn mark_persisted(&mut self, generation: u64) {
        if self.generation == generation {
            self.state = IndexState::Persisted;
        }
    }

    /// Restores an index from a loaded snapshot.
    pub fn from_snapshot(config: HnswConfig, snapshot: IndexSnapshot) -> Result<Self> {
        let mut graph = snapshot.graph;
        if graph.config.space != config.space {
            return Err(Error::corrupt(format!(
                "persisted space '{}' does not match collection space '{}'",
                graph.config.space, config.space
            )));
        }
        graph.config.ef_search = config.ef_search;
        let index = Self {
            config,
            graph: Some(graph),
            id_to_ordinal: snapshot.id_to_ordinal,
            ordinal_to_id: snapshot.ordinal_to_id,
            state: IndexState::Loaded,
            generation: 0,
            store_revision: snapshot.store_revision,
            created_at: snapshot.created_at,
        };
        index.validate().map_err(Error::corrupt)?;
        Ok(index)
    }
}
