//! HNSW insertion and in-place update.
//!
//! Inserts a vector with bidirectional connections and heuristic neighbor pruning
//! (Algorithm 4 from the HNSW paper). [`HnswIndex::update`] overwrites a stored
//! vector and re-links the node so the graph reflects its new position.

use crate::hnsw::graph::HnswIndex;
use crate::hnsw::search::search_layer;
use crate::hnsw::visited::VisitedList;
use std::cell::RefCell;

thread_local! {
    /// Per-thread visited list reused across inserts and updates.
    static BUILD_VISITED: RefCell<VisitedList> = RefCell::new(VisitedList::new(0));
}

/// Runs `f` with this thread's build list, grown to cover `capacity` ordinals.
fn with_build_visited<R>(capacity: usize, f: impl FnOnce(&mut VisitedList) -> R) -> R {
    BUILD_VISITED.with(|cell| {
        let mut visited = cell.borrow_mut();
        visited.ensure_capacity(capacity);
        f(&mut visited)
    })
}

impl HnswIndex {
    /// Insert a new vector at ordinal `internal_id`.
    ///
    /// `internal_id` must equal `node_count` and the caller must have reserved
    /// capacity with [`resize`](HnswIndex::resize).
    pub fn insert(&mut self, internal_id: u32, vector: &[f32]) {
        debug_assert_eq!(internal_id, self.node_count);
        debug_assert!(self.remaining_capacity() > 0, "insert past capacity");
        let level = self.random_level();

        let Some(entry_point) = self.entry_point else {
            self.push_node(vector, vec![Vec::new(); level + 1], level);
            self.entry_point = Some(internal_id);
            self.max_layer = level;
            return;
        };

        // Collect neighbor lists for every layer first, then push the node.
        let top = level.min(self.max_layer);
        let mut node_neighbors: Vec<Vec<u32>> = vec![Vec::new(); level + 1];
        with_build_visited(self.node_count as usize + 1, |visited| {
            let any = |_: u32| true;
            let current_ep = self.descend(vector, entry_point, level, visited, &any);
            self.select_layer_neighbors(vector, current_ep, top, visited, &any, &mut node_neighbors);
        });

        self.push_node(vector, node_neighbors, level);
        self.connect_back(internal_id, top);

        if level > self.max_layer {
            self.max_layer = level;
            self.entry_point = Some(internal_id);
        }
    }

    /// Overwrite the vector of an existing node and re-link it.
    ///
    /// Outgoing links are recomputed from a fresh search; nodes that already point
    /// at this ordinal keep their links, which only affects navigation, not results.
    pub fn update(&mut self, internal_id: u32, vector: &[f32]) {
        self.set_vector(internal_id, vector);
        let Some(entry_point) = self.entry_point else {
            return;
        };
        if self.node_count < 2 {
            return;
        }

        let level = self.get_layer(internal_id) as usize;
        let top = level.min(self.max_layer);
        let mut node_neighbors: Vec<Vec<u32>> = vec![Vec::new(); level + 1];
        with_build_visited(self.node_count as usize, |visited| {
            let not_self = |id: u32| id != internal_id;
            let current_ep = self.descend(vector, entry_point, level, visited, &not_self);
            self.select_layer_neighbors(
                vector,
                current_ep,
                top,
                visited,
                &not_self,
                &mut node_neighbors,
            );
        });
        self.neighbors[internal_id as usize] = node_neighbors;
        self.connect_back(internal_id, top);
    }

    /// Greedy descent from the top layer down to `level + 1`, returning the entry
    /// point for the layers the node lives on.
    fn descend<F: Fn(u32) -> bool>(
        &self,
        vector: &[f32],
        entry_point: u32,
        level: usize,
        visited: &mut VisitedList,
        filter_fn: &F,
    ) -> u32 {
        let mut current_ep = entry_point;
        for layer in (level + 1..=self.max_layer).rev() {
            let results = search_layer(
                self,
                vector,
                std::slice::from_ref(&current_ep),
                1,
                layer,
                visited,
                filter_fn,
            );
            if let Some(&(_, nearest)) = results.first() {
                current_ep = nearest;
            }
        }
        current_ep
    }

    fn select_layer_neighbors<F: Fn(u32) -> bool>(
        &self,
        vector: &[f32],
        start: u32,
        top: usize,
        visited: &mut VisitedList,
        filter_fn: &F,
        out: &mut [Vec<u32>],
    ) {
        let mut layer_eps: Vec<u32> = vec![start];
        for layer in (0..=top).rev() {
            let candidates = search_layer(
                self,
                vector,
                &layer_eps,
                self.config.ef_construction,
                layer,
                visited,
                filter_fn,
            );
            let selected = select_neighbors_heuristic(self, &candidates, self.m_max(layer));
            out[layer] = selected.iter().map(|&(_, id)| id).collect();

            if !candidates.is_empty() {
                layer_eps.clear();
                layer_eps.extend(candidates.iter().map(|&(_, id)| id));
            }
        }
    }

    fn push_node(&mut self, vector: &[f32], neighbors: Vec<Vec<u32>>, level: usize) {
        self.vectors.extend_from_slice(vector);
        self.neighbors.push(neighbors);
        self.layers.push(level as u8);
        self.deleted.push(false);
        self.node_count += 1;
    }

    #[inline]
    fn m_max(&self, layer: usize) -> usize {
        if layer == 0 {
            self.config.m_max0
        } else {
            self.config.m
        }
    }

    /// Add the reverse edge for each of `internal_id`'s neighbors, pruning lists
    /// that go over capacity.
    fn connect_back(&mut self, internal_id: u32, top: usize) {
        let space = self.config.space;
        for layer in 0..=top {
            let m_max = self.m_max(layer);
            let my_neighbors: Vec<u32> = self.neighbors[internal_id as usize]
                .get(layer)
                .cloned()
                .unwrap_or_default();
            for neighbor_id in my_neighbors {
                let nid = neighbor_id as usize;
                while self.neighbors[nid].len() <= layer {
                    self.neighbors[nid].push(Vec::new());
                }
                if self.neighbors[nid][layer].contains(&internal_id) {
                    continue;
                }
                self.neighbors[nid][layer].push(internal_id);

                if self.neighbors[nid][layer].len() > m_max {
                    let base = self.vector(neighbor_id);
                    let candidates: Vec<(f32, u32)> = self.neighbors[nid][layer]
                        .iter()
                        .map(|&cid| (space.distance(base, self.vector(cid)), cid))
                        .collect();
                    let pruned = select_neighbors_heuristic(self, &candidates, m_max);
                    self.neighbors[nid][layer] = pruned.iter().map(|&(_, id)| id).collect();
                }
            }
        }
    }
}

/// Heuristic neighbor selection (Algorithm 4 from the HNSW paper).
///
/// A candidate is kept only if it is closer to the base node than to any neighbor
/// already selected; remaining slots are then filled with the closest leftovers.
fn select_neighbors_heuristic(
    index: &HnswIndex,
    candidates: &[(f32, u32)],
    m: usize,
) -> Vec<(f32, u32)> {
    let mut sorted = candidates.to_vec();
    sorted.sort_unstable_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

    let space = index.config.space;
    let mut selected: Vec<(f32, u32)> = Vec::with_capacity(m);
    for &(dist_to_base, cid) in &sorted {
        if selected.len() >= m {
            break;
        }
        let candidate = index.vector(cid);
        let is_diverse = selected
            .iter()
            .all(|&(_, sid)| dist_to_base <= space.distance(candidate, index.vector(sid)));
        if is_diverse {
            selected.push((dist_to_base, cid));
        }
    }

    if selected.len() < m {
        let selected_ids: std::collections::HashSet<u32> =
            selected.iter().map(|&(_, id)| id).collect();
        for &(dist, cid) in &sorted {
            if selected.len() >= m {
                break;
            }
            if !selected_ids.contains(&cid) {
                selected.push((dist, cid));
            }
        }
    }

    selected
}
