//! Hierarchical Navigable Small World (HNSW) graph index.
//!
//! A multi-layer proximity graph: layer 0 holds every vector, each higher
//! layer a geometrically-shrinking subset, with greedy routing from the
//! top layer down. Construction and search both honour `efConstruction`/
//! `efSearch` candidate-list sizes. No training step — vectors are inserted
//! directly, which is why Flat and HNSW are the two backends spec.md marks
//! "no-op" for `train`.

use std::collections::{HashMap, HashSet};

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::InternalId;
use crate::error::StoreResult;
use crate::simd;

#[derive(Debug, Serialize, Deserialize)]
pub struct HnswIndex {
    pub dimension: usize,
    m: usize,
    ef_construction: usize,
    ef_search: usize,
    vectors: HashMap<InternalId, Vec<f32>>,
    /// `layers[level][id] = neighbour ids at that level`.
    layers: Vec<HashMap<InternalId, Vec<InternalId>>>,
    levels: HashMap<InternalId, usize>,
    entry_point: Option<InternalId>,
}

impl HnswIndex {
    pub fn new(dimension: usize, m: usize, ef_construction: usize, ef_search: usize) -> Self {
        Self {
            dimension,
            m: m.max(2),
            ef_construction: ef_construction.max(1),
            ef_search: ef_search.max(1),
            vectors: HashMap::new(),
            layers: Vec::new(),
            levels: HashMap::new(),
            entry_point: None,
        }
    }

    pub fn add(&mut self, vectors: &[Vec<f32>], internal_ids: &[InternalId]) -> StoreResult<()> {
        for (v, id) in vectors.iter().zip(internal_ids.iter()) {
            self.insert_one(*id, v.clone());
        }
        Ok(())
    }

    fn insert_one(&mut self, id: InternalId, vector: Vec<f32>) {
        let level = random_level(self.m);
        while self.layers.len() <= level {
            self.layers.push(HashMap::new());
        }

        self.vectors.insert(id, vector.clone());
        self.levels.insert(id, level);

        let Some(entry) = self.entry_point else {
            for l in self.layers.iter_mut().take(level + 1) {
                l.insert(id, Vec::new());
            }
            self.entry_point = Some(id);
            return;
        };

        let mut current = entry;
        let top_level = self.layers.len() - 1;

        for l in (0..=top_level).rev() {
            current = self.greedy_descend(current, &vector, l);
            if l <= level {
                let candidates = self.search_layer(&vector, current, self.ef_construction, l);
                let neighbours: Vec<InternalId> = candidates
                    .into_iter()
                    .filter(|&cid| cid != id)
                    .take(self.m)
                    .collect();
                for &n in &neighbours {
                    self.layers[l].entry(n).or_default().push(id);
                    self.prune(n, l);
                }
                self.layers[l].insert(id, neighbours);
            }
        }

        if level > top_level {
            self.entry_point = Some(id);
        }
    }

    fn prune(&mut self, id: InternalId, level: usize) {
        let Some(v) = self.vectors.get(&id).cloned() else {
            return;
        };
        if let Some(neighbours) = self.layers[level].get_mut(&id) {
            if neighbours.len() > self.m * 2 {
                let mut by_dist: Vec<(InternalId, f32)> = neighbours
                    .iter()
                    .filter_map(|&n| self.vectors.get(&n).map(|nv| (n, simd::l2_squared(&v, nv))))
                    .collect();
                by_dist.sort_unstable_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
                by_dist.truncate(self.m * 2);
                *neighbours = by_dist.into_iter().map(|(n, _)| n).collect();
            }
        }
    }

    fn greedy_descend(&self, from: InternalId, query: &[f32], level: usize) -> InternalId {
        let mut current = from;
        let mut current_dist = self.dist(current, query);
        loop {
            let mut moved = false;
            if let Some(neighbours) = self.layers[level].get(&current) {
                for &n in neighbours {
                    let d = self.dist(n, query);
                    if d < current_dist {
                        current = n;
                        current_dist = d;
                        moved = true;
                    }
                }
            }
            if !moved {
                break;
            }
        }
        current
    }

    /// Beam search at a single layer, returning up to `ef` candidates
    /// ordered nearest-first.
    fn search_layer(
        &self,
        query: &[f32],
        entry: InternalId,
        ef: usize,
        level: usize,
    ) -> Vec<InternalId> {
        let mut visited: HashSet<InternalId> = HashSet::new();
        visited.insert(entry);
        let mut candidates = vec![(self.dist(entry, query), entry)];
        let mut best = candidates.clone();

        while let Some(pos) = candidates
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(i, _)| i)
        {
            let (dist, id) = candidates.remove(pos);
            let worst_best = best
                .iter()
                .map(|(d, _)| *d)
                .fold(f32::NEG_INFINITY, f32::max);
            if best.len() >= ef && dist > worst_best {
                break;
            }
            if let Some(neighbours) = self.layers[level].get(&id) {
                for &n in neighbours {
                    if visited.insert(n) {
                        let d = self.dist(n, query);
                        candidates.push((d, n));
                        best.push((d, n));
                    }
                }
            }
            best.sort_unstable_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
            best.truncate(ef.max(1));
        }

        best.into_iter().map(|(_, id)| id).collect()
    }

    fn dist(&self, id: InternalId, query: &[f32]) -> f32 {
        self.vectors
            .get(&id)
            .map(|v| simd::l2_squared(v, query))
            .unwrap_or(f32::INFINITY)
    }

    /// Physical removal: drop the vector and scrub it from every layer's
    /// adjacency lists it appears in.
    pub fn remove(&mut self, internal_ids: &[InternalId]) -> usize {
        let mut removed = 0;
        for id in internal_ids {
            if self.vectors.remove(id).is_none() {
                continue;
            }
            removed += 1;
            self.levels.remove(id);
            for layer in &mut self.layers {
                layer.remove(id);
                for neighbours in layer.values_mut() {
                    neighbours.retain(|n| n != id);
                }
            }
            if self.entry_point == Some(*id) {
                self.entry_point = self.vectors.keys().next().copied();
            }
        }
        removed
    }

    pub fn search(&self, query: &[f32], k: usize) -> Vec<(InternalId, f32)> {
        let Some(entry) = self.entry_point else {
            return Vec::new();
        };
        if k == 0 {
            return Vec::new();
        }

        let top_level = self.layers.len() - 1;
        let mut current = entry;
        for l in (1..=top_level).rev() {
            current = self.greedy_descend(current, query, l);
        }

        let candidates = self.search_layer(query, current, self.ef_search.max(k), 0);
        let mut scored: Vec<(InternalId, f32)> = candidates
            .into_iter()
            .map(|id| (id, self.dist(id, query)))
            .collect();
        scored.sort_unstable_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }

    pub fn size(&self) -> usize {
        self.vectors.len()
    }

    pub fn get_vector(&self, internal_id: InternalId) -> Option<Vec<f32>> {
        self.vectors.get(&internal_id).cloned()
    }
}

/// Exponentially-decaying level assignment, `m_L = 1/ln(m)` as in the
/// original HNSW paper.
fn random_level(m: usize) -> usize {
    let m_l = 1.0 / (m as f32).ln();
    let r: f32 = rand::thread_rng().gen_range(1e-9..1.0);
    (-r.ln() * m_l).floor() as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_search_finds_self() {
        let mut idx = HnswIndex::new(2, 8, 32, 32);
        idx.add(
            &[vec![0.0, 0.0], vec![1.0, 1.0], vec![5.0, 5.0], vec![0.1, 0.1]],
            &[1, 2, 3, 4],
        )
        .unwrap();
        let results = idx.search(&[0.0, 0.0], 1);
        assert_eq!(results[0].0, 1);
    }

    #[test]
    fn remove_drops_from_results() {
        let mut idx = HnswIndex::new(2, 8, 32, 32);
        idx.add(&[vec![0.0, 0.0], vec![0.1, 0.1]], &[1, 2]).unwrap();
        assert_eq!(idx.remove(&[1]), 1);
        assert!(idx.search(&[0.0, 0.0], 5).iter().all(|(id, _)| *id != 1));
    }
}
