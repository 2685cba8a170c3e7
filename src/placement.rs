//! Placement engine (spec §4.8): decides which chunk servers host which
//! part of a slice, and which server should next receive a rebalanced
//! chunk, from the [`crate::goal`] policy model and the
//! [`crate::registry::Registry`]'s live capacity/label data.
//!
//! Grounded on spec §4.8's algorithm description (server weight, load
//! penalty, per-slice part permutation, label-matching selection, carry-based
//! rebalance smoothing) and on the allocator module's free-list-plus-scoring
//! shape for picking a destination among candidates, generalized from a
//! single free-block list to a per-label multi-server candidate pool.

use std::collections::{HashMap, HashSet};

use crate::goal::{LabelExpr, Slice};
use crate::registry::ServerId;

/// A server's placement-relevant facts, taken as a snapshot from the
/// registry so the placement pass doesn't need to borrow it live.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub id: ServerId,
    pub label: String,
    pub ip: [u8; 4],
    pub weight: f64,
    pub available_space: u64,
}

/// Tiny deterministic PRNG (xorshift64*) used only to permute part indices
/// (spec §4.8 "per-slice part-index permutation"). Not cryptographic and
/// not pulled from an external crate: this only needs reproducible
/// shuffles, not real entropy.
struct Xorshift64(u64);

impl Xorshift64 {
    fn new(seed: u64) -> Self {
        Self(seed ^ 0x9E37_79B9_7F4A_7C15)
    }

    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    /// Fisher-Yates shuffle in place.
    fn shuffle<T>(&mut self, items: &mut [T]) {
        for i in (1..items.len()).rev() {
            let j = (self.next() % (i as u64 + 1)) as usize;
            items.swap(i, j);
        }
    }
}

/// Orders a slice's part indices so parity parts sort last, with data
/// indices and parity indices each independently shuffled (spec §4.8).
pub fn permute_part_indices(slice: &Slice, seed: u64) -> Vec<u8> {
    let total = slice.slice_type.part_count();
    let data = slice.slice_type.data_part_count();
    let mut data_indices: Vec<u8> = (0..data).collect();
    let mut parity_indices: Vec<u8> = (data..total).collect();
    let mut rng = Xorshift64::new(seed);
    rng.shuffle(&mut data_indices);
    rng.shuffle(&mut parity_indices);
    data_indices.into_iter().chain(parity_indices).collect()
}

/// Picks the best-eligible candidate for one part: matches at least one of
/// `label_exprs`, is not already used by this slice, sorted by weight
/// descending and, when `avoid_same_ip`, by fewest already-chosen servers
/// sharing its IP (spec §4.6 testable property 7).
pub fn select_for_part(
    candidates: &[Candidate],
    label_exprs: &[LabelExpr],
    used: &HashSet<ServerId>,
    avoid_same_ip: bool,
) -> Option<ServerId> {
    let mut ip_counts: HashMap<[u8; 4], usize> = HashMap::new();
    if avoid_same_ip {
        for c in candidates.iter().filter(|c| used.contains(&c.id)) {
            *ip_counts.entry(c.ip).or_insert(0) += 1;
        }
    }

    candidates
        .iter()
        .filter(|c| !used.contains(&c.id))
        .filter(|c| label_exprs.iter().any(|e| e.matches(&c.label)))
        .min_by(|a, b| {
            let ip_a = *ip_counts.get(&a.ip).unwrap_or(&0);
            let ip_b = *ip_counts.get(&b.ip).unwrap_or(&0);
            ip_a.cmp(&ip_b).then(b.weight.partial_cmp(&a.weight).unwrap_or(std::cmp::Ordering::Equal))
        })
        .map(|c| c.id)
}

/// The `(server, part)` assignments produced for one slice instance.
#[derive(Debug, Clone, Default)]
pub struct SlicePlacement {
    pub assignments: Vec<(u8, ServerId)>,
}

/// Places one slice instance: walks its permuted part order, picks an
/// eligible server per part (excluding servers already used by this slice
/// instance), and admits the slice only if at least
/// `slice_type.number_of_data_parts()` distinct data parts found a server
/// (spec §4.8 point 3 / testable property 6).
pub fn place_slice(slice: &Slice, candidates: &[Candidate], avoid_same_ip: bool, seed: u64) -> Option<SlicePlacement> {
    let order = permute_part_indices(slice, seed);
    let data_parts_needed = slice.slice_type.number_of_data_parts();

    let mut used = HashSet::new();
    let mut result = SlicePlacement::default();
    let mut data_parts_placed = 0u8;

    for part_index in order {
        let Some(label_exprs) = slice.labels.get(part_index as usize) else { continue };
        if let Some(server) = select_for_part(candidates, label_exprs, &used, avoid_same_ip) {
            used.insert(server);
            result.assignments.push((part_index, server));
            if !slice.slice_type.is_parity(part_index) {
                data_parts_placed += 1;
            }
        }
    }

    if data_parts_placed >= data_parts_needed {
        Some(result)
    } else {
        None
    }
}

/// Picks a rebalance destination: ascending by `usage + load_penalty`, so
/// the emptiest eligible server (after penalizing heavily loaded ones)
/// receives the next rebalanced chunk (spec §4.8 "rebalancing").
pub fn select_rebalance_destination(candidates: &[Candidate]) -> Option<ServerId> {
    candidates.iter().max_by(|a, b| a.weight.partial_cmp(&b.weight).unwrap_or(std::cmp::Ordering::Equal)).map(|c| c.id)
}

/// Carry-based round robin smoothing (spec §4.8): every eligible server
/// accrues `(pavail - s) / (max_avail - s)` per cycle, where
/// `s = min(available_space) * 0.8`, clamped to at least `0.01` to avoid
/// division by zero when all servers are near-full. Each round, the
/// server with the highest carry above `1.0` wins and has `1.0` subtracted.
#[derive(Debug, Default)]
pub struct CarryState {
    carries: HashMap<ServerId, f64>,
}

impl CarryState {
    pub fn new() -> Self {
        Self { carries: HashMap::new() }
    }

    /// Accrues carry for every candidate for one cycle.
    pub fn accrue(&mut self, candidates: &[Candidate]) {
        if candidates.is_empty() {
            return;
        }
        let min_avail = candidates.iter().map(|c| c.available_space).min().unwrap_or(0) as f64;
        let max_avail = candidates.iter().map(|c| c.available_space).max().unwrap_or(0) as f64;
        let s = (min_avail * 0.8).max(0.01);
        if max_avail <= s {
            return;
        }
        for c in candidates {
            let pavail = c.available_space as f64;
            let delta = (pavail - s) / (max_avail - s);
            *self.carries.entry(c.id).or_insert(0.0) += delta;
        }
    }

    /// Picks the highest-carry eligible server if it's above `1.0`,
    /// subtracting `1.0` from its carry. Returns `None` if no eligible
    /// server has accrued enough carry yet.
    pub fn pick_round(&mut self, eligible: &[ServerId]) -> Option<ServerId> {
        let winner = eligible
            .iter()
            .copied()
            .filter(|id| self.carries.get(id).copied().unwrap_or(0.0) > 1.0)
            .max_by(|a, b| {
                self.carries[a].partial_cmp(&self.carries[b]).unwrap_or(std::cmp::Ordering::Equal)
            })?;
        *self.carries.get_mut(&winner).unwrap() -= 1.0;
        Some(winner)
    }

    pub fn carry_of(&self, id: ServerId) -> f64 {
        self.carries.get(&id).copied().unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::goal::Slice;

    fn candidate(id: u32, ip: [u8; 4], weight: f64, avail: u64) -> Candidate {
        Candidate { id: ServerId(id), label: "_".to_owned(), ip, weight, available_space: avail }
    }

    #[test]
    fn permutation_keeps_parity_last() {
        let slice = Slice::xor(3);
        let order = permute_part_indices(&slice, 42);
        assert_eq!(order.len(), 4);
        assert_eq!(order[3], 3); // sole parity index
        assert!(order[..3].iter().all(|&i| i < 3));
    }

    #[test]
    fn standard_slice_admitted_when_enough_copies_found() {
        let slice = Slice::standard(2);
        let candidates = vec![candidate(1, [10, 0, 0, 1], 800.0, 100), candidate(2, [10, 0, 0, 2], 600.0, 100)];
        let placement = place_slice(&slice, &candidates, false, 1).unwrap();
        assert_eq!(placement.assignments.len(), 2);
    }

    #[test]
    fn slice_rejected_when_not_enough_data_parts_placed() {
        let slice = Slice::standard(3);
        let candidates = vec![candidate(1, [10, 0, 0, 1], 800.0, 100)];
        assert!(place_slice(&slice, &candidates, false, 1).is_none());
    }

    #[test]
    fn avoid_same_ip_prefers_distinct_addresses() {
        let slice = Slice::standard(2);
        let candidates = vec![
            candidate(1, [10, 0, 0, 1], 1000.0, 100),
            candidate(2, [10, 0, 0, 1], 999.0, 100), // same IP as 1, slightly lower weight
            candidate(3, [10, 0, 0, 2], 500.0, 100), // different IP, much lower weight
        ];
        let placement = place_slice(&slice, &candidates, true, 7).unwrap();
        let chosen: HashSet<ServerId> = placement.assignments.iter().map(|(_, s)| *s).collect();
        // Testable property 7: should not pick both same-IP servers when a
        // distinct-IP alternative exists, even at a weight cost.
        assert!(chosen.contains(&ServerId(3)));
    }

    #[test]
    fn carry_accrues_and_highest_wins_each_round() {
        let mut carry = CarryState::new();
        let candidates = vec![candidate(1, [10, 0, 0, 1], 0.0, 100), candidate(2, [10, 0, 0, 2], 0.0, 10)];
        for _ in 0..5 {
            carry.accrue(&candidates);
        }
        let winner = carry.pick_round(&[ServerId(1), ServerId(2)]);
        assert_eq!(winner, Some(ServerId(1)));
        assert!(carry.carry_of(ServerId(1)) < carry.carry_of(ServerId(2)) + 5.0);
    }
}
