//! HNSW search algorithms: single-layer search, multi-layer KNN and exhaustive scan.
//!
//! Filtering uses a predicate `Fn(u32) -> bool` applied during graph traversal.
//! Filtered and tombstoned nodes are still used for navigation but excluded from
//! results.

use crate::hnsw::graph::HnswIndex;
use crate::hnsw::visited::VisitedList;
use ordered_float::OrderedFloat;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

thread_local! {
    /// Per-thread visited list reused across searches on the same worker.
    static SEARCH_VISITED: RefCell<VisitedList> = RefCell::new(VisitedList::new(0));
}

/// A candidate during search. `BinaryHeap` is a max-heap, so distance is negated.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Candidate {
    neg_distance: OrderedFloat<f32>,
    id: u32,
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.neg_distance.cmp(&other.neg_distance)
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A result entry, max-heap by distance so the worst result is evicted first.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ResultEntry {
    distance: OrderedFloat<f32>,
    id: u32,
}

impl Ord for ResultEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .cmp(&other.distance)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for ResultEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Sort `(distance, ordinal)` pairs ascending, ties broken by ordinal.
pub(crate) fn sort_by_distance(results: &mut [(f32, u32)]) {
    results.sort_unstable_by(|a, b| {
        a.0.partial_cmp(&b.0)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.1.cmp(&b.1))
    });
}

/// Search a single layer of the graph.
///
/// Returns up to `ef` closest non-deleted nodes passing `filter_fn`, ascending by
/// distance. `visited` is cleared at the start of each call.
pub fn search_layer<F: Fn(u32) -> bool>(
    index: &HnswIndex,
    query: &[f32],
    entry_points: &[u32],
    ef: usize,
    layer: usize,
    visited: &mut VisitedList,
    filter_fn: &F,
) -> Vec<(f32, u32)> {
    visited.clear();
    let space = index.config.space;
    let mut candidates: BinaryHeap<Candidate> = BinaryHeap::with_capacity(ef * 2);
    let mut results: BinaryHeap<ResultEntry> = BinaryHeap::with_capacity(ef + 1);
    let mut worst_dist = f32::MAX;

    for &ep in entry_points {
        if visited.insert(ep) {
            let dist = space.distance(query, index.vector(ep));
            candidates.push(Candidate {
                neg_distance: OrderedFloat(-dist),
                id: ep,
            });
            if !index.is_deleted(ep) && filter_fn(ep) {
                results.push(ResultEntry {
                    distance: OrderedFloat(dist),
                    id: ep,
                });
                if results.len() > ef {
                    results.pop();
                }
                if results.len() >= ef {
                    worst_dist = results.peek().map_or(f32::MAX, |r| r.distance.0);
                }
            }
        }
    }

    while let Some(candidate) = candidates.pop() {
        let c_dist = -candidate.neg_distance.0;
        if results.len() >= ef && c_dist > worst_dist {
            break;
        }

        let node_id = candidate.id as usize;
        let Some(neighbor_list) = index.neighbors[node_id].get(layer) else {
            continue;
        };

        for &neighbor_id in neighbor_list {
            if !visited.insert(neighbor_id) {
                continue;
            }
            let dist = space.distance(query, index.vector(neighbor_id));
            if results.len() < ef || dist < worst_dist {
                candidates.push(Candidate {
                    neg_distance: OrderedFloat(-dist),
                    id: neighbor_id,
                });
                if !index.is_deleted(neighbor_id) && filter_fn(neighbor_id) {
                    results.push(ResultEntry {
                        distance: OrderedFloat(dist),
                        id: neighbor_id,
                    });
                    if results.len() > ef {
                        results.pop();
                    }
                    if results.len() >= ef {
                        worst_dist = results.peek().map_or(f32::MAX, |r| r.distance.0);
                    }
                }
            }
        }
    }

    results
        .into_sorted_vec()
        .into_iter()
        .map(|r| (r.distance.0, r.id))
        .collect()
}

/// Multi-layer KNN search over all live nodes.
pub fn knn_search(index: &HnswIndex, query: &[f32], k: usize) -> Vec<(f32, u32)> {
    knn_search_filtered(index, query, k, &|_: u32| true)
}

/// Multi-layer KNN search with a filter applied at layer 0.
///
/// Uses adaptive ef oversampling: if the first pass yields fewer than `k` results,
/// retries with doubled ef (up to 4x, bounded by node count) to cope with
/// low-selectivity filters.
pub fn knn_search_filtered<F: Fn(u32) -> bool>(
    index: &HnswIndex,
    query: &[f32],
    k: usize,
    filter_fn: &F,
) -> Vec<(f32, u32)> {
    let Some(entry_point) = index.entry_point else {
        return Vec::new();
    };
    if k == 0 {
        return Vec::new();
    }

    SEARCH_VISITED.with(|cell| {
        let mut visited = cell.borrow_mut();
        visited.ensure_capacity(index.node_count as usize);

        let no_filter = |_: u32| true;
        let mut current_ep = entry_point;
        for layer in (1..=index.max_layer).rev() {
            let results = search_layer(
                index,
                query,
                std::slice::from_ref(&current_ep),
                1,
                layer,
                &mut visited,
                &no_filter,
            );
            if let Some(&(_, nearest)) = results.first() {
                current_ep = nearest;
            }
        }

        let base_ef = index.config.ef_search.max(k);
        let max_ef = (base_ef * 4).min(index.node_count as usize).max(base_ef);
        let mut ef = base_ef;
        let mut results;
        loop {
            results = search_layer(
                index,
                query,
                std::slice::from_ref(&current_ep),
                ef,
                0,
                &mut visited,
                filter_fn,
            );
            if results.len() >= k || ef >= max_ef {
                break;
            }
            ef = (ef * 2).min(max_ef);
        }

        results.truncate(k);
        results
    })
}

/// Exact scan over the given ordinals, skipping tombstones.
pub fn exhaustive_search<I: IntoIterator<Item = u32>>(
    index: &HnswIndex,
    query: &[f32],
    k: usize,
    ordinals: I,
) -> Vec<(f32, u32)> {
    let space = index.config.space;
    let mut results: Vec<(f32, u32)> = ordinals
        .into_iter()
        .filter(|&id| (id as usize) < index.node_count as usize && !index.is_deleted(id))
        .map(|id| (space.distance(query, index.vector(id)), id))
        .collect();
    sort_by_distance(&mut results);
    results.truncate(k);
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hnsw::graph::HnswConfig;
    use crate::hnsw::Space;

    fn line_graph(n: usize, space: Space) -> HnswIndex {
        let config = HnswConfig {
            space,
            ..HnswConfig::default()
        };
        let mut g = HnswIndex::new(2, config, n);
        for i in 0..n {
            g.insert(i as u32, &[i as f32, 1.0]);
        }
        g
    }

    #[test]
    fn test_knn_orders_ascending() {
        let g = line_graph(100, Space::L2);
        let results = knn_search(&g, &[10.2, 1.0], 5);
        assert_eq!(results.len(), 5);
        assert_eq!(results[0].1, 10);
        for w in results.windows(2) {
            assert!(w[0].0 <= w[1].0);
        }
    }

    #[test]
    fn test_knn_skips_deleted() {
        let mut g = line_graph(20, Space::L2);
        g.mark_deleted(5);
        let results = knn_search(&g, &[5.0, 1.0], 3);
        assert!(results.iter().all(|&(_, id)| id != 5));
    }

    #[test]
    fn test_filtered_search_respects_filter() {
        let g = line_graph(200, Space::L2);
        let even = |id: u32| id % 2 == 0;
        let results = knn_search_filtered(&g, &[51.0, 1.0], 4, &even);
        assert!(!results.is_empty());
        assert!(results.iter().all(|&(_, id)| id % 2 == 0));
    }

    #[test]
    fn test_empty_graph() {
        let g = HnswIndex::new(2, HnswConfig::default(), 0);
        assert!(knn_search(&g, &[0.0, 0.0], 3).is_empty());
    }

    #[test]
    fn test_exhaustive_search_exact() {
        let mut g = line_graph(30, Space::L2);
        g.mark_deleted(3);
        let results = exhaustive_search(&g, &[3.0, 1.0], 2, [1, 2, 3, 4, 99]);
        let ids: Vec<u32> = results.iter().map(|r| r.1).collect();
        assert_eq!(ids, vec![2, 4]);
    }
}
