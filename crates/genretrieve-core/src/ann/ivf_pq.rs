//! IVF with product quantisation (IVF-PQ).
//!
//! Each residual (vector minus its assigned coarse centroid) is split into
//! `m` sub-vectors, each quantised against its own codebook of `2^nbits`
//! centroids. A stored vector becomes `m` bytes instead of `dimension`
//! floats; search uses the asymmetric distance computation (query kept in
//! full precision, compared against per-subvector distance tables) rather
//! than decoding codes back to vectors.

use serde::{Deserialize, Serialize};

use super::InternalId;
use crate::error::{StoreError, StoreResult};
use crate::simd;

#[derive(Debug, Serialize, Deserialize)]
pub struct IvfPqIndex {
    pub dimension: usize,
    nlist: usize,
    nprobe: usize,
    m: usize,
    nbits: u8,
    sub_dim: usize,
    coarse_centroids: Vec<Vec<f32>>,
    /// `codebooks[sub][code] = centroid of that sub-vector`.
    codebooks: Vec<Vec<Vec<f32>>>,
    /// One inverted list per coarse centroid: `(internal_id, codes)`.
    lists: Vec<Vec<(InternalId, Vec<u8>)>>,
}

impl IvfPqIndex {
    pub fn new(dimension: usize, nlist: usize, nprobe: usize, m: usize, nbits: u8) -> Self {
        let m = m.max(1);
        Self {
            dimension,
            nlist: nlist.max(1),
            nprobe: nprobe.max(1),
            m,
            nbits,
            sub_dim: (dimension / m).max(1),
            coarse_centroids: Vec::new(),
            codebooks: Vec::new(),
            lists: Vec::new(),
        }
    }

    pub fn is_trained(&self) -> bool {
        !self.coarse_centroids.is_empty() && !self.codebooks.is_empty()
    }

    pub fn train(&mut self, sample_vectors: &[Vec<f32>]) -> StoreResult<()> {
        if sample_vectors.is_empty() {
            return Err(StoreError::Other("IVF-PQ training requires samples".into()));
        }

        let k = self.nlist.min(sample_vectors.len());
        let coarse = kmeans(sample_vectors, k, self.dimension);
        self.coarse_centroids = coarse;
        self.lists = vec![Vec::new(); self.coarse_centroids.len()];

        let residuals: Vec<Vec<f32>> = sample_vectors
            .iter()
            .map(|v| {
                let c = nearest(&self.coarse_centroids, v);
                subtract(v, &self.coarse_centroids[c])
            })
            .collect();

        let n_codes = 1usize << self.nbits.min(12);
        let mut codebooks = Vec::with_capacity(self.m);
        for sub in 0..self.m {
            let start = sub * self.sub_dim;
            let end = (start + self.sub_dim).min(self.dimension);
            let sub_samples: Vec<Vec<f32>> = residuals
                .iter()
                .map(|r| r[start..end].to_vec())
                .collect();
            let sub_dim = end - start;
            codebooks.push(kmeans(&sub_samples, n_codes.min(sub_samples.len().max(1)), sub_dim));
        }
        self.codebooks = codebooks;
        Ok(())
    }

    pub fn add(&mut self, vectors: &[Vec<f32>], internal_ids: &[InternalId]) -> StoreResult<()> {
        if !self.is_trained() {
            return Err(StoreError::Other(
                "IVF-PQ backend must be trained before add".into(),
            ));
        }
        for (v, id) in vectors.iter().zip(internal_ids.iter()) {
            let coarse = nearest(&self.coarse_centroids, v);
            let residual = subtract(v, &self.coarse_centroids[coarse]);
            let codes = self.encode(&residual);
            self.lists[coarse].push((*id, codes));
        }
        Ok(())
    }

    fn encode(&self, residual: &[f32]) -> Vec<u8> {
        let mut codes = Vec::with_capacity(self.m);
        for sub in 0..self.m {
            let start = sub * self.sub_dim;
            let end = (start + self.sub_dim).min(self.dimension);
            let sub_vec = &residual[start..end];
            let code = nearest(&self.codebooks[sub], sub_vec);
            codes.push(code as u8);
        }
        codes
    }

    /// Asymmetric distance: per-subvector distance table built once against
    /// the (full precision) query residual, then summed per stored code.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(InternalId, f32)> {
        if !self.is_trained() || k == 0 {
            return Vec::new();
        }

        let mut list_order: Vec<usize> = (0..self.coarse_centroids.len()).collect();
        list_order.sort_by(|&a, &b| {
            simd::l2_squared(query, &self.coarse_centroids[a])
                .partial_cmp(&simd::l2_squared(query, &self.coarse_centroids[b]))
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut scored: Vec<(InternalId, f32)> = Vec::new();
        for &list_idx in list_order.iter().take(self.nprobe) {
            let residual = subtract(query, &self.coarse_centroids[list_idx]);
            let tables: Vec<Vec<f32>> = (0..self.m)
                .map(|sub| {
                    let start = sub * self.sub_dim;
                    let end = (start + self.sub_dim).min(self.dimension);
                    let sub_query = &residual[start..end];
                    self.codebooks[sub]
                        .iter()
                        .map(|centroid| simd::l2_squared(sub_query, centroid))
                        .collect()
                })
                .collect();

            for (id, codes) in &self.lists[list_idx] {
                let mut dist = 0.0f32;
                for (sub, &code) in codes.iter().enumerate() {
                    dist += tables[sub][code as usize];
                }
                scored.push((*id, dist));
            }
        }
        scored.sort_unstable_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }

    pub fn size(&self) -> usize {
        self.lists.iter().map(|l| l.len()).sum()
    }

    /// Reconstructs an approximate vector from its stored codes: coarse
    /// centroid plus the decoded (quantised) residual. Lossy by
    /// construction — PQ never keeps the exact input around.
    pub fn get_vector(&self, internal_id: InternalId) -> Option<Vec<f32>> {
        for (list_idx, list) in self.lists.iter().enumerate() {
            if let Some((_, codes)) = list.iter().find(|(id, _)| *id == internal_id) {
                let mut v = self.coarse_centroids[list_idx].clone();
                for (sub, &code) in codes.iter().enumerate() {
                    let start = sub * self.sub_dim;
                    let end = (start + self.sub_dim).min(self.dimension);
                    let centroid = &self.codebooks[sub][code as usize];
                    for (vi, ci) in v[start..end].iter_mut().zip(centroid.iter()) {
                        *vi += ci;
                    }
                }
                return Some(v);
            }
        }
        None
    }
}

fn subtract(a: &[f32], b: &[f32]) -> Vec<f32> {
    a.iter().zip(b.iter()).map(|(x, y)| x - y).collect()
}

fn nearest(centroids: &[Vec<f32>], v: &[f32]) -> usize {
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

/// Small k-means helper shared by the coarse quantiser and the per-subvector
/// codebooks.
fn kmeans(samples: &[Vec<f32>], k: usize, dim: usize) -> Vec<Vec<f32>> {
    if samples.is_empty() || k == 0 {
        return Vec::new();
    }
    let k = k.min(samples.len());
    let mut centroids: Vec<Vec<f32>> = samples.iter().take(k).cloned().collect();

    const MAX_ITERS: usize = 15;
    for _ in 0..MAX_ITERS {
        let mut sums = vec![vec![0.0f32; dim]; k];
        let mut counts = vec![0usize; k];
        for s in samples {
            let c = nearest(&centroids, s);
            counts[c] += 1;
            for (sum, x) in sums[c].iter_mut().zip(s.iter()) {
                *sum += x;
            }
        }
        let mut moved = false;
        for c in 0..k {
            if counts[c] == 0 {
                continue;
            }
            for d in 0..dim {
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
    centroids
}
