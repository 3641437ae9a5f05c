//! Approximate nearest neighbour backends.
//!
//! `AnnBackend` is a closed, tagged-variant enum rather than a trait object:
//! the set of supported algorithms is fixed and known at compile time, the
//! store and selector need to match on concrete variants (to read `nlist`,
//! emit upgrade advisories, etc.), and dynamic dispatch would only add an
//! indirection with no corresponding flexibility gain.
//!
//! Every variant honours the same contract:
//! - `train(sample_vectors)` — no-op for Flat and HNSW, required before the
//!   first `add` for IVF and IVF-PQ.
//! - `add(vectors, internal_ids)` — internal ids are caller-assigned and
//!   opaque to the backend; the Hot/Cold overlay maps them to `doc_id`.
//! - `remove(internal_ids) -> count_removed` — physical removal where
//!   supported; `Flat` and `Hnsw` support it, `Ivf`/`IvfPq` do not (removal
//!   falls back to the tombstone path in the owning tier).
//! - `search(query, k) -> Vec<(internal_id, distance)>` sorted ascending by
//!   distance.
//! - `get_vector(internal_id)` — returns the stored (or, for `IvfPq`,
//!   reconstructed) vector, used by archive and migration to read data back
//!   out without a parallel store.
//! - `persist`/`load` round-trip the backend through a `Directory`.

mod flat;
mod hnsw;
mod ivf;
mod ivf_pq;

pub use flat::FlatIndex;
pub use hnsw::HnswIndex;
pub use ivf::IvfIndex;
pub use ivf_pq::IvfPqIndex;

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::persistence::Directory;

/// Caller-assigned identifier internal to a single ANN backend instance.
pub type InternalId = u32;

/// Which concrete ANN algorithm a backend instance is. Used by the
/// selector and by persisted headers to know which variant to reconstruct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnnType {
    Flat,
    Ivf,
    IvfPq,
    Hnsw,
}

impl std::fmt::Display for AnnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Flat => "flat",
            Self::Ivf => "ivf",
            Self::IvfPq => "ivf_pq",
            Self::Hnsw => "hnsw",
        };
        write!(f, "{s}")
    }
}

/// Parameters for constructing a backend. Fields not relevant to the chosen
/// `AnnType` are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnParams {
    pub nlist: usize,
    pub nprobe: usize,
    pub m: usize,
    pub nbits: u8,
    pub hnsw_m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
}

impl Default for AnnParams {
    fn default() -> Self {
        Self {
            nlist: 100,
            nprobe: 8,
            m: 8,
            nbits: 8,
            hnsw_m: 16,
            ef_construction: 200,
            ef_search: 64,
        }
    }
}

/// A tagged-variant ANN backend.
#[derive(Debug, Serialize, Deserialize)]
pub enum AnnBackend {
    Flat(FlatIndex),
    Ivf(IvfIndex),
    IvfPq(IvfPqIndex),
    Hnsw(HnswIndex),
}

impl AnnBackend {
    pub fn create(ann_type: AnnType, dimension: usize, params: AnnParams) -> Self {
        match ann_type {
            AnnType::Flat => Self::Flat(FlatIndex::new(dimension)),
            AnnType::Ivf => Self::Ivf(IvfIndex::new(dimension, params.nlist, params.nprobe)),
            AnnType::IvfPq => Self::IvfPq(IvfPqIndex::new(
                dimension,
                params.nlist,
                params.nprobe,
                params.m,
                params.nbits,
            )),
            AnnType::Hnsw => Self::Hnsw(HnswIndex::new(
                dimension,
                params.hnsw_m,
                params.ef_construction,
                params.ef_search,
            )),
        }
    }

    pub fn ann_type(&self) -> AnnType {
        match self {
            Self::Flat(_) => AnnType::Flat,
            Self::Ivf(_) => AnnType::Ivf,
            Self::IvfPq(_) => AnnType::IvfPq,
            Self::Hnsw(_) => AnnType::Hnsw,
        }
    }

    pub fn dimension(&self) -> usize {
        match self {
            Self::Flat(b) => b.dimension,
            Self::Ivf(b) => b.dimension,
            Self::IvfPq(b) => b.dimension,
            Self::Hnsw(b) => b.dimension,
        }
    }

    /// Train on a representative sample. No-op for `Flat`/`Hnsw`.
    pub fn train(&mut self, sample_vectors: &[Vec<f32>]) -> StoreResult<()> {
        match self {
            Self::Flat(_) | Self::Hnsw(_) => Ok(()),
            Self::Ivf(b) => b.train(sample_vectors),
            Self::IvfPq(b) => b.train(sample_vectors),
        }
    }

    pub fn is_trained(&self) -> bool {
        match self {
            Self::Flat(_) | Self::Hnsw(_) => true,
            Self::Ivf(b) => b.is_trained(),
            Self::IvfPq(b) => b.is_trained(),
        }
    }

    /// `true` if this backend physically removes vectors on `remove`,
    /// rather than requiring the caller to tombstone and rebuild.
    pub fn supports_remove(&self) -> bool {
        matches!(self, Self::Flat(_) | Self::Hnsw(_))
    }

    pub fn add(&mut self, vectors: &[Vec<f32>], internal_ids: &[InternalId]) -> StoreResult<()> {
        if vectors.len() != internal_ids.len() {
            return Err(StoreError::Other(
                "vectors and internal_ids length mismatch".into(),
            ));
        }
        for v in vectors {
            if v.len() != self.dimension() {
                return Err(StoreError::DimensionMismatch {
                    expected: self.dimension(),
                    actual: v.len(),
                });
            }
        }
        match self {
            Self::Flat(b) => b.add(vectors, internal_ids),
            Self::Ivf(b) => b.add(vectors, internal_ids),
            Self::IvfPq(b) => b.add(vectors, internal_ids),
            Self::Hnsw(b) => b.add(vectors, internal_ids),
        }
    }

    pub fn remove(&mut self, internal_ids: &[InternalId]) -> StoreResult<usize> {
        match self {
            Self::Flat(b) => Ok(b.remove(internal_ids)),
            Self::Hnsw(b) => Ok(b.remove(internal_ids)),
            Self::Ivf(_) | Self::IvfPq(_) => Ok(0),
        }
    }

    pub fn search(&self, query: &[f32], k: usize) -> StoreResult<Vec<(InternalId, f32)>> {
        if query.len() != self.dimension() {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimension(),
                actual: query.len(),
            });
        }
        Ok(match self {
            Self::Flat(b) => b.search(query, k),
            Self::Ivf(b) => b.search(query, k),
            Self::IvfPq(b) => b.search(query, k),
            Self::Hnsw(b) => b.search(query, k),
        })
    }

    pub fn size(&self) -> usize {
        match self {
            Self::Flat(b) => b.size(),
            Self::Ivf(b) => b.size(),
            Self::IvfPq(b) => b.size(),
            Self::Hnsw(b) => b.size(),
        }
    }

    /// Retrieve a previously-stored vector by its internal id, for archive
    /// and migration flows that need the original (or, for `IvfPq`,
    /// reconstructed) vector back. `None` if the id isn't present.
    pub fn get_vector(&self, internal_id: InternalId) -> Option<Vec<f32>> {
        match self {
            Self::Flat(b) => b.get_vector(internal_id),
            Self::Ivf(b) => b.get_vector(internal_id),
            Self::IvfPq(b) => b.get_vector(internal_id),
            Self::Hnsw(b) => b.get_vector(internal_id),
        }
    }

    pub fn persist(&self, dir: &dyn Directory, name: &str) -> StoreResult<()> {
        let bytes = match self {
            Self::Flat(b) => postcard::to_allocvec(b),
            Self::Ivf(b) => postcard::to_allocvec(b),
            Self::IvfPq(b) => postcard::to_allocvec(b),
            Self::Hnsw(b) => postcard::to_allocvec(b),
        }
        .map_err(|e| StoreError::PersistError(e.to_string()))?;
        dir.atomic_write(name, &bytes)
            .map_err(|e| StoreError::PersistError(e.to_string()))
    }

    pub fn load(dir: &dyn Directory, name: &str, ann_type: AnnType) -> StoreResult<Self> {
        let bytes = dir
            .read_file(name)
            .map_err(|e| StoreError::PersistError(e.to_string()))?;
        let backend = match ann_type {
            AnnType::Flat => Self::Flat(
                postcard::from_bytes(&bytes).map_err(|e| StoreError::PersistError(e.to_string()))?,
            ),
            AnnType::Ivf => Self::Ivf(
                postcard::from_bytes(&bytes).map_err(|e| StoreError::PersistError(e.to_string()))?,
            ),
            AnnType::IvfPq => Self::IvfPq(
                postcard::from_bytes(&bytes).map_err(|e| StoreError::PersistError(e.to_string()))?,
            ),
            AnnType::Hnsw => Self::Hnsw(
                postcard::from_bytes(&bytes).map_err(|e| StoreError::PersistError(e.to_string()))?,
            ),
        };
        Ok(backend)
    }
}
