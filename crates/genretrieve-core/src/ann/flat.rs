//! Exact brute-force ANN backend.
//!
//! O(n*d) per query. Used below the corpus-size threshold where an
//! approximate structure buys nothing (spec §4.2), and as the reference
//! backend migration validation compares against.

use serde::{Deserialize, Serialize};

use super::InternalId;
use crate::simd;

#[derive(Debug, Serialize, Deserialize)]
pub struct FlatIndex {
    pub dimension: usize,
    ids: Vec<InternalId>,
    vectors: Vec<Vec<f32>>,
}

impl FlatIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            ids: Vec::new(),
            vectors: Vec::new(),
        }
    }

    pub fn add(&mut self, vectors: &[Vec<f32>], internal_ids: &[InternalId]) -> crate::error::StoreResult<()> {
        self.ids.extend_from_slice(internal_ids);
        self.vectors.extend(vectors.iter().cloned());
        Ok(())
    }

    /// Physical removal: swap-remove matching entries.
    pub fn remove(&mut self, internal_ids: &[InternalId]) -> usize {
        let to_remove: std::collections::HashSet<InternalId> =
            internal_ids.iter().copied().collect();
        let before = self.ids.len();
        let mut i = 0;
        while i < self.ids.len() {
            if to_remove.contains(&self.ids[i]) {
                self.ids.swap_remove(i);
                self.vectors.swap_remove(i);
            } else {
                i += 1;
            }
        }
        before - self.ids.len()
    }

    /// Search, sorted ascending by L2 distance. Heap-based for small `k`
    /// relative to corpus size, full sort otherwise (mirrors the teacher's
    /// brute-force retriever).
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(InternalId, f32)> {
        if k == 0 || self.ids.is_empty() {
            return Vec::new();
        }

        if k < self.ids.len() / 2 {
            use std::cmp::Reverse;
            use std::collections::BinaryHeap;

            #[derive(PartialEq)]
            struct FloatOrd(f32);
            impl Eq for FloatOrd {}
            impl PartialOrd for FloatOrd {
                fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
                    Some(self.cmp(other))
                }
            }
            impl Ord for FloatOrd {
                fn cmp(&self, other: &Self) -> std::cmp::Ordering {
                    self.0
                        .partial_cmp(&other.0)
                        .unwrap_or(std::cmp::Ordering::Equal)
                }
            }

            // Max-heap on distance so the farthest of the current top-k sits
            // at the top and gets evicted first.
            let mut heap: BinaryHeap<(FloatOrd, InternalId)> = BinaryHeap::with_capacity(k + 1);
            for (id, v) in self.ids.iter().zip(self.vectors.iter()) {
                let dist = simd::l2_squared(query, v);
                if heap.len() < k {
                    heap.push((FloatOrd(dist), *id));
                } else if let Some(&(FloatOrd(max_dist), _)) = heap.peek() {
                    if dist < max_dist {
                        heap.pop();
                        heap.push((FloatOrd(dist), *id));
                    }
                }
            }
            let mut results: Vec<(InternalId, f32)> = heap
                .into_iter()
                .map(|(FloatOrd(dist), id)| (id, dist))
                .collect();
            results.sort_unstable_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
            results
        } else {
            let mut scored: Vec<(InternalId, f32)> = self
                .ids
                .iter()
                .zip(self.vectors.iter())
                .map(|(id, v)| (*id, simd::l2_squared(query, v)))
                .collect();
            scored.sort_unstable_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
            scored.truncate(k);
            scored
        }
    }

    pub fn size(&self) -> usize {
        self.ids.len()
    }

    pub fn get_vector(&self, internal_id: InternalId) -> Option<Vec<f32>> {
        self.ids
            .iter()
            .position(|id| *id == internal_id)
            .map(|i| self.vectors[i].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_returns_nearest_first() {
        let mut idx = FlatIndex::new(2);
        idx.add(
            &[vec![0.0, 0.0], vec![10.0, 10.0], vec![1.0, 1.0]],
            &[1, 2, 3],
        )
        .unwrap();
        let results = idx.search(&[0.0, 0.0], 2);
        assert_eq!(results[0].0, 1);
        assert_eq!(results[1].0, 3);
    }

    #[test]
    fn remove_is_physical() {
        let mut idx = FlatIndex::new(2);
        idx.add(&[vec![0.0, 0.0], vec![1.0, 1.0]], &[1, 2]).unwrap();
        assert_eq!(idx.remove(&[1]), 1);
        assert_eq!(idx.size(), 1);
        assert!(idx.search(&[0.0, 0.0], 5).iter().all(|(id, _)| *id != 1));
    }
}
