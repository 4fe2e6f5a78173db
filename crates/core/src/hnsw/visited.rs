//! Generation-stamped visited list for HNSW traversal.
//!
//! Each slot stores the generation in which its ordinal was last visited, so
//! `clear()` is a counter bump rather than a memset.

/// Visited list indexed by ordinal.
#[derive(Debug, Default)]
pub struct VisitedList {
    stamps: Vec<u32>,
    generation: u32,
}

impl VisitedList {
    pub fn new(capacity: usize) -> Self {
        Self {
            stamps: vec![0; capacity],
            generation: 1,
        }
    }

    /// Start a new traversal. The stamp array is only zeroed on counter wrap-around.
    pub fn clear(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        if self.generation == 0 {
            self.stamps.fill(0);
            self.generation = 1;
        }
    }

    /// Number of ordinals covered without growing.
    pub fn capacity(&self) -> usize {
        self.stamps.len()
    }

    /// Grow to cover `capacity` ordinals; the graph may have been resized since the
    /// list was allocated.
    pub fn ensure_capacity(&mut self, capacity: usize) {
        if capacity > self.stamps.len() {
            self.stamps.resize(capacity, 0);
        }
    }

    /// Mark `id` visited. Returns `true` if it was not yet visited in this generation.
    #[inline]
    pub fn insert(&mut self, id: u32) -> bool {
        let idx = id as usize;
        if idx >= self.stamps.len() {
            self.stamps.resize(idx + 1, 0);
        }
        if self.stamps[idx] == self.generation {
            false
        } else {
            self.stamps[idx] = self.generation;
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_then_clear() {
        let mut v = VisitedList::new(8);
        assert!(v.insert(3));
        assert!(!v.insert(3));
        v.clear();
        assert!(v.insert(3));
    }

    #[test]
    fn test_grows_on_out_of_range_insert() {
        let mut v = VisitedList::new(2);
        assert!(v.insert(10));
        assert!(!v.insert(10));
    }

    #[test]
    fn test_wraparound_resets_stamps() {
        let mut v = VisitedList::new(4);
        v.generation = u32::MAX;
        v.insert(1);
        v.clear();
        assert_eq!(v.generation, 1);
        assert!(v.insert(1));
    }
}
