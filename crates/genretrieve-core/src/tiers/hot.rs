//! The Hot tier: a size-bounded, frequently-written ANN index with
//! physical deletion.
//!
//! `HotIndex` owns an [`AnnBackend`] plus the `internal_id <-> doc_id`
//! overlay the backend contract (spec.md §4.1) delegates to the owning
//! tier. When the backend can't physically remove, `remove` falls back to
//! tombstoning and the doc_id is queued for elimination at the next
//! migration/rebuild.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::ann::{AnnBackend, AnnParams, AnnType, InternalId};
use crate::error::{StoreError, StoreResult};
use crate::filtering::{DocumentMetadata, MetadataStore};
use crate::persistence::Directory;
use crate::DocId;

#[allow(clippy::type_complexity)]
type HotSnapshotOwned = (
    AnnBackend,
    usize,
    u64,
    u32,
    HashMap<DocId, InternalId>,
    HashMap<InternalId, DocId>,
    Vec<DocId>,
    HashMap<DocId, i64>,
    HashMap<DocId, DocumentMetadata>,
);

/// A chunk queued for insertion: its vector plus the metadata to store
/// alongside it.
pub struct PendingChunk {
    pub vector: Vec<f32>,
    pub metadata: DocumentMetadata,
}

pub struct HotIndex {
    backend: AnnBackend,
    max_size: usize,
    doc_id_counter: AtomicU64,
    internal_id_counter: AtomicU32,
    doc_to_internal: HashMap<DocId, InternalId>,
    internal_to_doc: HashMap<InternalId, DocId>,
    tombstones: HashSet<DocId>,
    created_at: HashMap<DocId, i64>,
    metadata: MetadataStore,
}

impl HotIndex {
    pub fn new(ann_type: AnnType, dimension: usize, params: AnnParams, max_size: usize) -> Self {
        Self {
            backend: AnnBackend::create(ann_type, dimension, params),
            max_size,
            doc_id_counter: AtomicU64::new(1),
            internal_id_counter: AtomicU32::new(1),
            doc_to_internal: HashMap::new(),
            internal_to_doc: HashMap::new(),
            tombstones: HashSet::new(),
            created_at: HashMap::new(),
            metadata: MetadataStore::new(),
        }
    }

    /// Live size, excluding tombstoned entries.
    pub fn size(&self) -> usize {
        self.backend.size().saturating_sub(self.tombstones.len())
    }

    pub fn ann_type(&self) -> AnnType {
        self.backend.ann_type()
    }

    pub fn backend(&self) -> &AnnBackend {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut AnnBackend {
        &mut self.backend
    }

    /// Insert a batch of chunks, assigning fresh `doc_id`s.
    ///
    /// If `size + chunks.len() > max_size` this returns `CapacityExceeded`
    /// — the caller (`GenerationalStore::add_documents`) is expected to
    /// have already attempted a synchronous archive pass before calling
    /// this, per spec.md §4.3.
    pub fn add(&mut self, chunks: Vec<PendingChunk>, created_at: i64) -> StoreResult<Vec<DocId>> {
        if self.size() + chunks.len() > self.max_size {
            return Err(StoreError::CapacityExceeded {
                max_size: self.max_size,
            });
        }

        let mut doc_ids = Vec::with_capacity(chunks.len());
        let mut vectors = Vec::with_capacity(chunks.len());
        let mut internal_ids = Vec::with_capacity(chunks.len());

        for chunk in chunks {
            let doc_id = self.doc_id_counter.fetch_add(1, Ordering::SeqCst);
            let internal_id = self.internal_id_counter.fetch_add(1, Ordering::SeqCst);

            self.doc_to_internal.insert(doc_id, internal_id);
            self.internal_to_doc.insert(internal_id, doc_id);
            self.created_at.insert(doc_id, created_at);
            self.metadata.insert(doc_id, chunk.metadata);

            vectors.push(chunk.vector);
            internal_ids.push(internal_id);
            doc_ids.push(doc_id);
        }

        self.backend.add(&vectors, &internal_ids)?;
        Ok(doc_ids)
    }

    /// Physical removal where the backend supports it; tombstone otherwise.
    pub fn remove(&mut self, doc_id: DocId) -> StoreResult<()> {
        let Some(&internal_id) = self.doc_to_internal.get(&doc_id) else {
            return Err(StoreError::NotFound(doc_id.to_string()));
        };

        if self.backend.supports_remove() {
            self.backend.remove(&[internal_id])?;
            self.doc_to_internal.remove(&doc_id);
            self.internal_to_doc.remove(&internal_id);
            self.created_at.remove(&doc_id);
            self.metadata.remove(doc_id);
        } else {
            self.tombstones.insert(doc_id);
        }
        Ok(())
    }

    pub fn search(&self, query: &[f32], k: usize) -> StoreResult<Vec<(DocId, f32)>> {
        // Oversample to absorb tombstoned hits, since the backend doesn't
        // know about them.
        let oversampled_k = k + self.tombstones.len().min(k.max(1) * 4);
        let raw = self.backend.search(query, oversampled_k.max(k))?;
        Ok(raw
            .into_iter()
            .filter_map(|(internal_id, dist)| {
                let doc_id = *self.internal_to_doc.get(&internal_id)?;
                if self.tombstones.contains(&doc_id) {
                    None
                } else {
                    Some((doc_id, dist))
                }
            })
            .take(k)
            .collect())
    }

    /// `doc_id`s created before `threshold_ts`, oldest-first, for the
    /// archive flow to pull from.
    pub fn iter_older_than(&self, threshold_ts: i64) -> Vec<(DocId, Vec<f32>, DocumentMetadata)> {
        let mut candidates: Vec<(DocId, i64)> = self
            .created_at
            .iter()
            .filter(|(doc_id, &ts)| ts < threshold_ts && !self.tombstones.contains(doc_id))
            .map(|(&doc_id, &ts)| (doc_id, ts))
            .collect();
        candidates.sort_by_key(|(_, ts)| *ts);

        candidates
            .into_iter()
            .filter_map(|(doc_id, _)| {
                let internal_id = *self.doc_to_internal.get(&doc_id)?;
                let metadata = self.metadata.get(doc_id).cloned().unwrap_or_default();
                self.backend
                    .get_vector(internal_id)
                    .map(|v| (doc_id, v, metadata))
            })
            .collect()
    }

    pub fn tombstone_count(&self) -> usize {
        self.tombstones.len()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn metadata_get(&self, doc_id: DocId) -> Option<DocumentMetadata> {
        self.metadata.get(doc_id).cloned()
    }

    /// Snapshot of every live internal id, for the migrator's Planning phase.
    pub fn internal_ids(&self) -> Vec<InternalId> {
        self.doc_to_internal.values().copied().collect()
    }

    /// Snapshot of every live doc_id, for the crash-recovery reconciliation
    /// pass in `GenerationalStore::open`.
    pub fn doc_ids(&self) -> Vec<DocId> {
        self.doc_to_internal.keys().copied().collect()
    }

    /// The internal id currently backing `doc_id`, if live.
    pub fn internal_id_of(&self, doc_id: DocId) -> Option<InternalId> {
        self.doc_to_internal.get(&doc_id).copied()
    }

    /// Up to `n` live vectors paired with a small `k`, for migration recall
    /// validation queries.
    pub fn sample_vectors(&self, n: usize) -> Vec<(Vec<f32>, usize)> {
        self.doc_to_internal
            .values()
            .take(n)
            .filter_map(|&internal_id| self.backend.get_vector(internal_id))
            .map(|v| (v, 5))
            .collect()
    }

    /// Serialise the backend plus the `doc_id`/`internal_id` overlay as one
    /// blob, so a reload doesn't need to replay every insert to rebuild the
    /// mapping.
    pub fn persist(&self, dir: &dyn Directory, path: &str) -> StoreResult<()> {
        let tombstones: Vec<DocId> = self.tombstones.iter().copied().collect();
        let metadata: HashMap<DocId, DocumentMetadata> =
            self.metadata.iter().map(|(id, m)| (*id, m.clone())).collect();
        let payload = (
            &self.backend,
            self.max_size,
            self.doc_id_counter.load(Ordering::SeqCst),
            self.internal_id_counter.load(Ordering::SeqCst),
            &self.doc_to_internal,
            &self.internal_to_doc,
            tombstones,
            &self.created_at,
            metadata,
        );
        let bytes =
            postcard::to_allocvec(&payload).map_err(|e| StoreError::PersistError(e.to_string()))?;
        dir.atomic_write(path, &bytes).map_err(StoreError::from)
    }

    pub fn load(dir: &dyn Directory, path: &str) -> StoreResult<Self> {
        let bytes = dir.read_file(path).map_err(StoreError::from)?;
        let (
            backend,
            max_size,
            next_doc_id,
            next_internal_id,
            doc_to_internal,
            internal_to_doc,
            tombstones,
            created_at,
            metadata,
        ): HotSnapshotOwned =
            postcard::from_bytes(&bytes).map_err(|e| StoreError::PersistError(e.to_string()))?;

        Ok(Self {
            backend,
            max_size,
            doc_id_counter: AtomicU64::new(next_doc_id),
            internal_id_counter: AtomicU32::new(next_internal_id),
            doc_to_internal,
            internal_to_doc,
            tombstones: tombstones.into_iter().collect(),
            created_at,
            metadata: MetadataStore::from_entries(metadata),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ann::AnnType;

    fn chunk(vector: Vec<f32>) -> PendingChunk {
        PendingChunk {
            vector,
            metadata: DocumentMetadata::new(),
        }
    }

    #[test]
    fn add_then_search_finds_nearest() {
        let mut hot = HotIndex::new(AnnType::Flat, 2, AnnParams::default(), 10);
        let ids = hot
            .add(
                vec![chunk(vec![0.0, 0.0]), chunk(vec![10.0, 10.0])],
                1_000,
            )
            .unwrap();
        assert_eq!(ids.len(), 2);

        let results = hot.search(&[0.0, 0.0], 1).unwrap();
        assert_eq!(results[0].0, ids[0]);
    }

    #[test]
    fn add_past_capacity_errors() {
        let mut hot = HotIndex::new(AnnType::Flat, 2, AnnParams::default(), 1);
        hot.add(vec![chunk(vec![0.0, 0.0])], 1).unwrap();
        let err = hot.add(vec![chunk(vec![1.0, 1.0])], 2).unwrap_err();
        assert!(matches!(err, StoreError::CapacityExceeded { max_size: 1 }));
    }

    #[test]
    fn remove_is_physical_for_flat_and_drops_from_search() {
        let mut hot = HotIndex::new(AnnType::Flat, 2, AnnParams::default(), 10);
        let ids = hot.add(vec![chunk(vec![0.0, 0.0])], 1).unwrap();
        hot.remove(ids[0]).unwrap();
        assert_eq!(hot.size(), 0);
        assert!(hot.search(&[0.0, 0.0], 5).unwrap().is_empty());
    }

    #[test]
    fn remove_tombstones_when_backend_cannot_physically_remove() {
        let mut hot = HotIndex::new(
            AnnType::Ivf,
            2,
            AnnParams {
                nlist: 1,
                nprobe: 1,
                ..AnnParams::default()
            },
            10,
        );
        hot.backend_mut()
            .train(&[vec![0.0, 0.0], vec![1.0, 1.0]])
            .unwrap();
        let ids = hot.add(vec![chunk(vec![0.0, 0.0])], 1).unwrap();
        hot.remove(ids[0]).unwrap();
        assert_eq!(hot.tombstone_count(), 1);
        assert!(hot.search(&[0.0, 0.0], 5).unwrap().is_empty());
    }

    #[test]
    fn iter_older_than_returns_oldest_first_excluding_tombstoned() {
        let mut hot = HotIndex::new(AnnType::Flat, 2, AnnParams::default(), 10);
        let ids = hot
            .add(
                vec![chunk(vec![0.0, 0.0]), chunk(vec![1.0, 1.0])],
                100,
            )
            .unwrap();
        hot.remove(ids[1]).unwrap();

        let older = hot.iter_older_than(200);
        assert_eq!(older.len(), 1);
        assert_eq!(older[0].0, ids[0]);
        assert_eq!(older[0].1, vec![0.0, 0.0]);
    }
}
