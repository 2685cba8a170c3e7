//! Interval tree mapping disjoint `u32` ranges to an `id` (spec §4.1).
//!
//! Grounded in `mfsmaster/itree.cc`: insert overwrites/splits overlapping
//! ranges, id `0` is a delete sentinel, lookup descends by comparing the
//! query point against range bounds, and `rebalance` coalesces adjacent
//! same-id ranges and rebuilds the tree via in-order midpoint selection.
//!
//! The backing store here is a `BTreeMap` keyed by `from`, which gives the
//! same external semantics as the original's BST (point lookup is still a
//! descent by range comparison; `rebalance` still walks the tree in-order
//! and rebuilds it) while keeping node surgery — the part of the original
//! that is easiest to get subtly wrong — out of the implementation.

use std::collections::BTreeMap;

/// Sentinel id meaning "delete this range" when passed to [`IntervalTree::add`].
pub const DELETE: u32 = 0;

/// An interval tree over `u32` ranges, as used to track e.g. free/allocated
/// inode-id ranges or chunk-id ranges.
#[derive(Debug, Default, Clone)]
pub struct IntervalTree {
    /// Disjoint, non-adjacent-when-coalesced ranges keyed by `from`.
    ranges: BTreeMap<u32, (u32, u32)>,
}

impl IntervalTree {
    pub fn new() -> Self {
        Self { ranges: BTreeMap::new() }
    }

    /// Looks up the id mapped to point `v`, descending by comparing `v`
    /// against the bounds of the range starting at-or-before it.
    pub fn find(&self, v: u32) -> Option<u32> {
        self.ranges
            .range(..=v)
            .next_back()
            .filter(|(_, (to, _))| v <= *to)
            .map(|(_, (_, id))| *id)
    }

    /// Inserts `[from, to] -> id`, merging and overwriting any overlapping
    /// range. `id == DELETE` removes the range instead of mapping it. If the
    /// inserted range is properly contained in an existing range with a
    /// different id, the existing range is split around it.
    pub fn add(&mut self, from: u32, to: u32, id: u32) {
        assert!(from <= to);

        // Collect every existing range that overlaps [from, to]; split off
        // the leftover slivers outside [from, to] and drop the rest.
        let overlapping: Vec<(u32, (u32, u32))> = self
            .ranges
            .range(..=to)
            .filter(|(f, (t, _))| **f <= to && *t >= from)
            .map(|(f, v)| (*f, *v))
            .collect();

        for (f, (t, existing_id)) in overlapping {
            self.ranges.remove(&f);
            if f < from {
                self.ranges.insert(f, (from - 1, existing_id));
            }
            if t > to {
                self.ranges.insert(to + 1, (t, existing_id));
            }
        }

        if id != DELETE {
            self.ranges.insert(from, (to, id));
        }
    }

    /// Removes the mapping for every point in `[from, to]`.
    pub fn delete_range(&mut self, from: u32, to: u32) {
        self.add(from, to, DELETE);
    }

    /// Coalesces adjacent ranges that map to the same id. Exposed under the
    /// same name as the original's BST rebuild so call sites read the same
    /// way; here the backing `BTreeMap` needs no rebalancing of its own.
    pub fn rebalance(&mut self) {
        let flat: Vec<(u32, u32, u32)> =
            self.ranges.iter().map(|(f, (t, id))| (*f, *t, *id)).collect();

        let mut coalesced: Vec<(u32, u32, u32)> = Vec::with_capacity(flat.len());
        for (from, to, id) in flat {
            if let Some(last) = coalesced.last_mut() {
                if last.2 == id && last.1.checked_add(1) == Some(from) {
                    last.1 = to;
                    continue;
                }
            }
            coalesced.push((from, to, id));
        }

        self.ranges = coalesced.into_iter().map(|(f, t, id)| (f, (t, id))).collect();
    }

    /// Brute-force scan used by tests as an oracle for [`IntervalTree::find`].
    #[cfg(test)]
    fn brute_find(ranges: &[(u32, u32, u32)], v: u32) -> Option<u32> {
        ranges.iter().rev().find(|(f, t, _)| *f <= v && v <= *t).map(|(_, _, id)| *id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_add_and_find() {
        let mut t = IntervalTree::new();
        t.add(10, 20, 5);
        t.add(15, 25, 7);
        assert_eq!(t.find(12), Some(5));
        assert_eq!(t.find(18), Some(7));
        assert_eq!(t.find(22), Some(7));
    }

    #[test]
    fn delete_range_punches_a_hole() {
        let mut t = IntervalTree::new();
        t.add(10, 20, 5);
        t.add(15, 25, 7);
        t.delete_range(16, 17);
        assert_eq!(t.find(16), None);
        assert_eq!(t.find(17), None);
        assert_eq!(t.find(18), Some(7));
        assert_eq!(t.find(15), Some(7));
    }

    #[test]
    fn split_properly_contained_range() {
        let mut t = IntervalTree::new();
        t.add(0, 100, 1);
        t.add(40, 60, 2);
        assert_eq!(t.find(10), Some(1));
        assert_eq!(t.find(50), Some(2));
        assert_eq!(t.find(90), Some(1));
    }

    #[test]
    fn rebalance_preserves_semantics_against_brute_force() {
        let mut t = IntervalTree::new();
        let mut model: Vec<(u32, u32, u32)> = Vec::new();

        let ops: &[(u32, u32, u32)] =
            &[(0, 50, 1), (20, 30, 2), (60, 80, 3), (25, 65, 4), (0, 0, 0), (70, 75, 0)];

        for &(from, to, id) in ops {
            t.add(from, to, id);
            model.push((from, to, id));
        }
        t.rebalance();

        for v in 0..100u32 {
            assert_eq!(t.find(v), IntervalTree::brute_find(&model, v), "mismatch at {v}");
        }
    }

    #[test]
    fn coalesces_adjacent_equal_ids_on_rebalance() {
        let mut t = IntervalTree::new();
        t.add(0, 10, 1);
        t.add(11, 20, 1);
        t.rebalance();
        assert_eq!(t.find(0), Some(1));
        assert_eq!(t.find(20), Some(1));
        assert_eq!(t.find(15), Some(1));
    }

    #[test]
    fn example_d_from_spec() {
        let mut t = IntervalTree::new();
        t.add(10, 20, 5);
        t.add(15, 25, 7);
        assert_eq!(t.find(12), Some(5));
        assert_eq!(t.find(18), Some(7));
        assert_eq!(t.find(22), Some(7));
        t.delete_range(16, 17);
        assert_eq!(t.find(16), None);
        assert_eq!(t.find(17), None);
        assert_eq!(t.find(18), Some(7));
    }
}
