//! Slot-addressed HNSW backend over unit vectors.
//!
//! Points are addressed by caller-chosen integer slots below `max_elements`,
//! which is what lets the facade reuse slots freed by deletion instead of
//! re-indexing on churn. Deletion is a tombstone: the vector stays in the
//! graph so traversal keeps its connectivity, and tombstoned slots are
//! excluded from search results. Re-adding to a slot (live or tombstoned)
//! replaces the node in place; edges other nodes hold toward that slot then
//! simply lead to the new vector.
//!
//! All vectors are unit-normalized by the embedder, so cosine distance is
//! `1 - dot(a, b)`.

use std::cmp::Ordering;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::collections::HashSet;

use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::error::MemoryErr;
use crate::error::Result;

/// Hard cap on sampled node levels.
const MAX_LEVEL: usize = 16;

#[derive(Debug)]
struct Node {
    vector: Vec<f32>,
    level: usize,
    /// Outgoing neighbor slots, indexed by level `0..=level`.
    links: Vec<Vec<usize>>,
    deleted: bool,
}

/// A `(distance, slot)` pair ordered by distance (ties broken by slot so the
/// heap order is total).
#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    dist: f32,
    slot: usize,
}

impl Eq for Candidate {}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dist
            .total_cmp(&other.dist)
            .then_with(|| self.slot.cmp(&other.slot))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// In-memory HNSW graph with slot addressing and tombstone deletion.
#[derive(Debug)]
pub struct HnswBackend {
    max_elements: usize,
    m: usize,
    m_max0: usize,
    ef_construction: usize,
    level_mult: f64,
    nodes: Vec<Option<Node>>,
    entry: Option<usize>,
    live: usize,
    tombstones: usize,
    rng: StdRng,
}

impl HnswBackend {
    /// Allocate an empty graph.
    pub fn new(max_elements: usize, m: usize, ef_construction: usize) -> Self {
        let m = m.max(2);
        Self {
            max_elements,
            m,
            m_max0: m * 2,
            ef_construction: ef_construction.max(m),
            level_mult: 1.0 / (m as f64).ln(),
            nodes: Vec::new(),
            entry: None,
            live: 0,
            tombstones: 0,
            rng: StdRng::from_os_rng(),
        }
    }

    /// Number of live (non-tombstoned) points.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Whether a slot currently holds a live point.
    pub fn contains(&self, slot: usize) -> bool {
        matches!(self.nodes.get(slot), Some(Some(node)) if !node.deleted)
    }

    /// Insert or replace the point at `slot`.
    pub fn add_point(&mut self, vector: Vec<f32>, slot: usize) -> Result<()> {
        if slot >= self.max_elements {
            return Err(MemoryErr::CapacityExceeded {
                max_elements: self.max_elements,
            });
        }
        if self.nodes.len() <= slot {
            self.nodes.resize_with(slot + 1, || None);
        }

        // Replacing: pull the old node out so the construction search cannot
        // connect the new point to its own slot or to the stale vector.
        if let Some(old) = self.nodes[slot].take() {
            if old.deleted {
                self.tombstones -= 1;
            } else {
                self.live -= 1;
            }
            if self.entry == Some(slot) {
                self.entry = self.pick_entry();
            }
        }

        let level = self.random_level();
        let mut links = vec![Vec::new(); level + 1];

        if let Some(ep) = self.entry {
            let entry_level = self.level_of(ep);
            let mut cur = ep;
            for l in ((level + 1)..=entry_level).rev() {
                cur = self.greedy_search(&vector, cur, l);
            }
            let mut eps = vec![cur];
            for l in (0..=level.min(entry_level)).rev() {
                let found = self.search_layer(&vector, &eps, self.ef_construction, l);
                let m_max = if l == 0 { self.m_max0 } else { self.m };
                let neighbors: Vec<usize> = found
                    .iter()
                    .take(self.m)
                    .map(|c| c.slot)
                    .filter(|&n| n != slot)
                    .collect();
                for &nb in &neighbors {
                    self.link(nb, slot, l, m_max);
                }
                links[l] = neighbors;
                eps = found.iter().map(|c| c.slot).collect();
            }
        }

        self.nodes[slot] = Some(Node {
            vector,
            level,
            links,
            deleted: false,
        });
        self.live += 1;

        let entry_level = self.entry.map(|ep| self.level_of(ep));
        if entry_level.is_none_or(|el| level > el) {
            self.entry = Some(slot);
        }
        Ok(())
    }

    /// Tombstone a slot. Returns false if the slot holds no live point.
    pub fn mark_delete(&mut self, slot: usize) -> bool {
        match self.nodes.get_mut(slot) {
            Some(Some(node)) if !node.deleted => {
                node.deleted = true;
                self.live -= 1;
                self.tombstones += 1;
                true
            }
            _ => false,
        }
    }

    /// K nearest live points to `query`, ascending by cosine distance.
    pub fn search_knn(&self, query: &[f32], k: usize, ef: usize) -> Vec<(usize, f32)> {
        let Some(ep) = self.entry else {
            return Vec::new();
        };
        if k == 0 {
            return Vec::new();
        }
        let mut cur = ep;
        for l in (1..=self.level_of(ep)).rev() {
            cur = self.greedy_search(query, cur, l);
        }
        // Widen the beam by the tombstone count so deleted points crowding
        // the neighborhood cannot starve the result set.
        let ef = ef.max(k).saturating_add(self.tombstones);
        self.search_layer(query, &[cur], ef, 0)
            .into_iter()
            .filter(|c| self.contains(c.slot))
            .take(k)
            .map(|c| (c.slot, c.dist))
            .collect()
    }

    fn random_level(&mut self) -> usize {
        let u: f64 = self.rng.random::<f64>().max(1e-12);
        ((-u.ln() * self.level_mult) as usize).min(MAX_LEVEL)
    }

    fn level_of(&self, slot: usize) -> usize {
        match &self.nodes[slot] {
            Some(node) => node.level,
            None => 0,
        }
    }

    fn vector_of(&self, slot: usize) -> Option<&[f32]> {
        match self.nodes.get(slot) {
            Some(Some(node)) => Some(&node.vector),
            _ => None,
        }
    }

    /// Neighbor list of `slot` at `level`; empty when the node is absent or
    /// its level is lower (stale edges from replaced nodes can point here).
    fn links_at(&self, slot: usize, level: usize) -> &[usize] {
        match self.nodes.get(slot) {
            Some(Some(node)) => node.links.get(level).map_or(&[], Vec::as_slice),
            _ => &[],
        }
    }

    /// Any present node, preferring the highest level. Used to re-anchor the
    /// entry point after the current entry's slot is replaced.
    fn pick_entry(&self) -> Option<usize> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(slot, node)| node.as_ref().map(|n| (slot, n.level)))
            .max_by_key(|&(_, level)| level)
            .map(|(slot, _)| slot)
    }

    /// Greedy descent toward `query` within one level.
    fn greedy_search(&self, query: &[f32], start: usize, level: usize) -> usize {
        let mut cur = start;
        let mut cur_dist = match self.vector_of(cur) {
            Some(v) => cosine_distance(query, v),
            None => return start,
        };
        loop {
            let mut improved = false;
            for &n in self.links_at(cur, level) {
                if let Some(v) = self.vector_of(n) {
                    let d = cosine_distance(query, v);
                    if d < cur_dist {
                        cur = n;
                        cur_dist = d;
                        improved = true;
                    }
                }
            }
            if !improved {
                return cur;
            }
        }
    }

    /// Beam search within one level; returns up to `ef` candidates sorted
    /// ascending by distance. Tombstoned points participate (connectivity)
    /// and are filtered by the caller.
    fn search_layer(&self, query: &[f32], entries: &[usize], ef: usize, level: usize) -> Vec<Candidate> {
        let mut visited: HashSet<usize> = HashSet::new();
        let mut candidates: BinaryHeap<Reverse<Candidate>> = BinaryHeap::new();
        let mut results: BinaryHeap<Candidate> = BinaryHeap::new();

        for &e in entries {
            if let Some(v) = self.vector_of(e) {
                if visited.insert(e) {
                    let c = Candidate {
                        dist: cosine_distance(query, v),
                        slot: e,
                    };
                    candidates.push(Reverse(c));
                    results.push(c);
                }
            }
        }

        while let Some(Reverse(c)) = candidates.pop() {
            if results.len() >= ef {
                if let Some(worst) = results.peek() {
                    if c.dist > worst.dist {
                        break;
                    }
                }
            }
            for &n in self.links_at(c.slot, level) {
                if !visited.insert(n) {
                    continue;
                }
                let Some(v) = self.vector_of(n) else { continue };
                let d = cosine_distance(query, v);
                let admit = results.len() < ef || results.peek().is_some_and(|w| d < w.dist);
                if admit {
                    let cand = Candidate { dist: d, slot: n };
                    candidates.push(Reverse(cand));
                    results.push(cand);
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        let mut out = results.into_vec();
        out.sort_unstable();
        out
    }

    /// Make `from -> to` at `level`, pruning `from`'s list back to `m_max`
    /// closest when it overflows.
    fn link(&mut self, from: usize, to: usize, level: usize, m_max: usize) {
        let Some(Some(node)) = self.nodes.get(from) else {
            return;
        };
        if node.links.len() <= level || node.links[level].contains(&to) {
            return;
        }
        let from_vector = node.vector.clone();
        let mut list = node.links[level].clone();
        list.push(to);
        if list.len() > m_max {
            let mut scored: Vec<Candidate> = list
                .iter()
                .filter_map(|&n| {
                    self.vector_of(n).map(|v| Candidate {
                        dist: cosine_distance(&from_vector, v),
                        slot: n,
                    })
                })
                .collect();
            scored.sort_unstable();
            list = scored.into_iter().take(m_max).map(|c| c.slot).collect();
        }
        if let Some(Some(node)) = self.nodes.get_mut(from) {
            node.links[level] = list;
        }
    }
}

/// Cosine distance between unit vectors: `1 - dot`.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    1.0 - dot
}
