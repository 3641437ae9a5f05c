//! Inverted file (IVF) ANN backend.
//!
//! A coarse quantiser (`nlist` centroids, trained by k-means on a sample)
//! partitions the vector space; each vector lives in the inverted list of
//! its nearest centroid. Search probes only the `nprobe` closest lists,
//! trading recall for speed relative to `Flat`.

use serde::{Deserialize, Serialize};

use super::InternalId;
use crate::error::{StoreError, StoreResult};
use crate::simd;

#[derive(Debug, Serialize, Deserialize)]
pub struct IvfIndex {
    pub dimension: usize,
    nlist: usize,
    nprobe: usize,
    centroids: Vec<Vec<f32>>,
    /// One inverted list per centroid: `(internal_id, vector)`.
    lists: Vec<Vec<(InternalId, Vec<f32>)>>,
}

impl IvfIndex {
    pub fn new(dimension: usize, nlist: usize, nprobe: usize) -> Self {
        Self {
            dimension,
            nlist: nlist.max(1),
            nprobe: nprobe.max(1),
            centroids: Vec::new(),
            lists: Vec::new(),
        }
    }

    pub fn is_trained(&self) -> bool {
        !self.centroids.is_empty()
    }

    /// Lloyd's-algorithm k-means over `sample_vectors`, seeded by picking
    /// the first `nlist` distinct samples (k-means++ is overkill at the
    /// sample sizes this runs on).
    pub fn train(&mut self, sample_vectors: &[Vec<f32>]) -> StoreResult<()> {
        if sample_vectors.is_empty() {
            return Err(StoreError::Other("IVF training requires samples".into()));
        }
        let k = self.nlist.min(sample_vectors.len());
        let mut centroids: Vec<Vec<f32>> = sample_vectors.iter().take(k).cloned().collect();

        const MAX_ITERS: usize = 25;
        for _ in 0..MAX_ITERS {
            let mut sums = vec![vec![0.0f32; self.dimension]; k];
            let mut counts = vec![0usize; k];

            for v in sample_vectors {
                let nearest = nearest_centroid(&centroids, v);
                counts[nearest] += 1;
                for (s, x) in sums[nearest].iter_mut().zip(v.iter()) {
                    *s += x;
                }
            }

            let mut moved = false;
            for c in 0..k {
                if counts[c] == 0 {
                    continue;
                }
                for d in 0..self.dimension {
                    let new_val = sums[c][d] / counts[c] as f32;
                    if (new_val - centroids[c][d]).abs() > 1e-5 {
                        moved = true;
                    }
                    centroids[c][d] = new_val;
                }
            }
            if !moved {
                break;
            }
        }

        self.centroids = centroids;
        self.lists = vec![Vec::new(); k];
        Ok(())
    }

    pub fn add(&mut self, vectors: &[Vec<f32>], internal_ids: &[InternalId]) -> StoreResult<()> {
        if !self.is_trained() {
            return Err(StoreError::Other("IVF backend must be trained before add".into()));
        }
        for (v, id) in vectors.iter().zip(internal_ids.iter()) {
            let list = nearest_centroid(&self.centroids, v);
            self.lists[list].push((*id, v.clone()));
        }
        Ok(())
    }

    pub fn search(&self, query: &[f32], k: usize) -> Vec<(InternalId, f32)> {
        if !self.is_trained() || k == 0 {
            return Vec::new();
        }
        let mut list_order: Vec<usize> = (0..self.centroids.len()).collect();
        list_order.sort_by(|&a, &b| {
            simd::l2_squared(query, &self.centroids[a])
                .partial_cmp(&simd::l2_squared(query, &self.centroids[b]))
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut scored: Vec<(InternalId, f32)> = Vec::new();
        for &list_idx in list_order.iter().take(self.nprobe) {
            for (id, v) in &self.lists[list_idx] {
                scored.push((*id, simd::l2_squared(query, v)));
            }
        }
        scored.sort_unstable_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }

    pub fn size(&self) -> usize {
        self.lists.iter().map(|l| l.len()).sum()
    }

    pub fn get_vector(&self, internal_id: InternalId) -> Option<Vec<f32>> {
        self.lists
            .iter()
            .flatten()
            .find(|(id, _)| *id == internal_id)
            .map(|(_, v)| v.clone())
    }
}

fn nearest_centroid(centroids: &[Vec<f32>], v: &[f32]) -> usize {
    centroids
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            simd::l2_squared(v, a)
                .partial_cmp(&simd::l2_squared(v, b))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|(i, _)| i)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn train_then_search_finds_nearest() {
        let mut idx = IvfIndex::new(2, 2, 2);
        let samples = vec![
            vec![0.0, 0.0],
            vec![0.1, 0.0],
            vec![10.0, 10.0],
            vec![10.1, 10.0],
        ];
        idx.train(&samples).unwrap();
        idx.add(&samples, &[1, 2, 3, 4]).unwrap();

        let results = idx.search(&[0.0, 0.0], 1);
        assert_eq!(results[0].0, 1);
    }

    #[test]
    fn add_before_train_errors() {
        let mut idx = IvfIndex::new(2, 4, 2);
        assert!(idx.add(&[vec![0.0, 0.0]], &[1]).is_err());
    }
}
