//! Hierarchical Navigable Small World (HNSW) approximate nearest neighbor graph.
//!
//! The graph stores raw f32 vectors in a contiguous arena addressed by dense
//! ordinals, with separate arrays for neighbor lists, layer assignments and
//! tombstones (Struct-of-Arrays). Nodes are never physically removed: deletion
//! sets a tombstone, and tombstoned nodes stay navigable but are never returned.
//! Node capacity is explicit and grows through [`HnswIndex::resize`].

/// Distance functions for the three supported spaces.
pub mod distance;
/// Graph structure, configuration and capacity management.
pub mod graph;
/// Insertion and in-place update with heuristic neighbor selection.
pub mod insert;
/// Layered KNN search, filtered search and exhaustive fallback.
pub mod search;
/// Generation-stamped visited list for traversal.
pub mod visited;

pub use distance::Space;
pub use graph::{HnswConfig, HnswIndex};
pub use search::{exhaustive_search, knn_search, knn_search_filtered};
