//! HNSW graph structure and configuration.
//!
//! [`HnswConfig`] holds the tuning parameters (M, ef_construction, ef_search, space).
//! [`HnswIndex`] stores the graph using Struct-of-Arrays layout, with an explicit
//! node capacity that only grows.

use crate::config;
use crate::hnsw::distance::Space;
use serde::{Deserialize, Serialize};

/// Configuration parameters for an HNSW graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HnswConfig {
    /// Number of bidirectional links per node (except layer 0, which uses `m_max0`).
    pub m: usize,
    /// Maximum links per node at layer 0 (typically `2 * m`).
    pub m_max0: usize,
    /// Candidate list size during index construction.
    pub ef_construction: usize,
    /// Candidate list size during search (higher = better recall, slower).
    pub ef_search: usize,
    /// Maximum number of layers in the graph.
    pub max_layers: usize,
    pub space: Space,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            m: config::HNSW_DEFAULT_M,
            m_max0: config::HNSW_DEFAULT_M * 2,
            ef_construction: config::HNSW_DEFAULT_EF_CONSTRUCTION,
            ef_search: config::HNSW_DEFAULT_EF_SEARCH,
            max_layers: config::HNSW_DEFAULT_MAX_LAYERS,
            space: Space::L2,
        }
    }
}

/// HNSW graph using Struct-of-Arrays (SoA) layout.
///
/// Ordinal `i` owns `vectors[i * dimension..(i + 1) * dimension]`, `neighbors[i]`,
/// `layers[i]` and `deleted[i]`. Ordinals are assigned densely in insertion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnswIndex {
    pub config: HnswConfig,
    /// f32 vector arena, `node_count * dimension` values.
    pub vectors: Vec<f32>,
    pub neighbors: Vec<Vec<Vec<u32>>>, // [node_id][layer][neighbor_ids]
    pub layers: Vec<u8>,
    pub deleted: Vec<bool>,
    pub entry_point: Option<u32>,
    pub max_layer: usize,
    pub dimension: usize,
    pub node_count: u32,
    /// Number of ordinals that may be assigned before a resize is required.
    pub capacity: usize,
}

impl HnswIndex {
    /// Creates an empty graph with room for `capacity` nodes.
    pub fn new(dimension: usize, config: HnswConfig, capacity: usize) -> Self {
        Self {
            config,
            vectors: Vec::with_capacity(capacity * dimension),
            neighbors: Vec::with_capacity(capacity),
            layers: Vec::with_capacity(capacity),
            deleted: Vec::with_capacity(capacity),
            entry_point: None,
            max_layer: 0,
            dimension,
            node_count: 0,
            capacity,
        }
    }

    /// Number of live (non-tombstoned) nodes.
    pub fn len(&self) -> usize {
        self.deleted.iter().filter(|&&d| !d).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of tombstoned nodes still occupying ordinal slots.
    pub fn tombstone_count(&self) -> usize {
        self.node_count as usize - self.len()
    }

    /// Ordinal slots left before the next resize.
    pub fn remaining_capacity(&self) -> usize {
        self.capacity.saturating_sub(self.node_count as usize)
    }

    /// Grows node capacity to `new_capacity`. Shrinking is a no-op.
    pub fn resize(&mut self, new_capacity: usize) {
        if new_capacity <= self.capacity {
            return;
        }
        let extra = new_capacity - self.node_count as usize;
        self.vectors.reserve(extra * self.dimension);
        self.neighbors.reserve(extra);
        self.layers.reserve(extra);
        self.deleted.reserve(extra);
        self.capacity = new_capacity;
    }

    /// Generate a random layer for a new node using exponential distribution.
    pub fn random_level(&self) -> usize {
        let ml = 1.0 / (self.config.m.max(2) as f64).ln();
        let r: f64 = rand::random::<f64>().max(f64::MIN_POSITIVE);
        let level = (-r.ln() * ml).floor() as usize;
        level.min(self.config.max_layers - 1)
    }

    /// The stored vector of a node. O(1) slice into the arena.
    #[inline]
    pub fn vector(&self, id: u32) -> &[f32] {
        let start = id as usize * self.dimension;
        &self.vectors[start..start + self.dimension]
    }

    /// Overwrites a node's vector in place.
    pub fn set_vector(&mut self, id: u32, vector: &[f32]) {
        let start = id as usize * self.dimension;
        self.vectors[start..start + self.dimension].copy_from_slice(vector);
    }

    #[inline]
    pub fn is_deleted(&self, id: u32) -> bool {
        self.deleted[id as usize]
    }

    #[inline]
    pub fn get_layer(&self, id: u32) -> u8 {
        self.layers[id as usize]
    }

    /// Tombstone a node. Returns `false` if the ordinal is out of range or already deleted.
    pub fn mark_deleted(&mut self, internal_id: u32) -> bool {
        match self.deleted.get_mut(internal_id as usize) {
            Some(flag) if !*flag => {
                *flag = true;
                true
            }
            _ => false,
        }
    }

    /// Checks the structural invariants of the arrays, used after deserialization.
    pub fn validate(&self) -> Result<(), String> {
        let nc = self.node_count as usize;
        if self.vectors.len() != nc * self.dimension {
            return Err(format!(
                "vector arena length {} != node_count({}) * dimension({})",
                self.vectors.len(),
                nc,
                self.dimension
            ));
        }
        if self.neighbors.len() != nc {
            return Err(format!(
                "neighbors length {} != node_count {}",
                self.neighbors.len(),
                nc
            ));
        }
        if self.layers.len() != nc {
            return Err(format!(
                "layers length {} != node_count {}",
                self.layers.len(),
                nc
            ));
        }
        if self.deleted.len() != nc {
            return Err(format!(
                "deleted length {} != node_count {}",
                self.deleted.len(),
                nc
            ));
        }
        if nc > self.capacity {
            return Err(format!("node_count {} > capacity {}", nc, self.capacity));
        }
        match self.entry_point {
            Some(ep) if ep as usize >= nc => {
                return Err(format!("entry_point {} >= node_count {}", ep, nc));
            }
            None if nc > 0 => return Err("non-empty graph without entry point".to_string()),
            _ => {}
        }
        for (node_id, node_neighbors) in self.neighbors.iter().enumerate() {
            for (layer, layer_neighbors) in node_neighbors.iter().enumerate() {
                for &neighbor in layer_neighbors {
                    if neighbor as usize >= nc {
                        return Err(format!(
                            "neighbor {} out of bounds (node_count={}) at node {} layer {}",
                            neighbor, nc, node_id, layer
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_graph_is_empty() {
        let g = HnswIndex::new(3, HnswConfig::default(), 10);
        assert!(g.is_empty());
        assert_eq!(g.remaining_capacity(), 10);
        assert!(g.validate().is_ok());
    }

    #[test]
    fn test_resize_only_grows() {
        let mut g = HnswIndex::new(3, HnswConfig::default(), 10);
        g.resize(25);
        assert_eq!(g.capacity, 25);
        g.resize(5);
        assert_eq!(g.capacity, 25);
    }

    #[test]
    fn test_random_level_bounded() {
        let g = HnswIndex::new(3, HnswConfig::default(), 1);
        for _ in 0..1000 {
            assert!(g.random_level() < g.config.max_layers);
        }
    }

    #[test]
    fn test_validate_detects_arena_mismatch() {
        let mut g = HnswIndex::new(3, HnswConfig::default(), 4);
        g.node_count = 1;
        assert!(g.validate().is_err());
    }
}
