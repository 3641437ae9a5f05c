//! The Cold tier: a large, rebuild-oriented ANN index with soft deletion.
//!
//! Cold holds everything archived out of Hot. Its backend is typically an
//! approximate structure (IVF/IVF-PQ/HNSW) that doesn't support cheap
//! physical removal, so deletes are tombstones (`soft_delete`) tracked
//! until the accumulated deletion rate crosses a threshold and a rebuild
//! is worth triggering (spec.md §4.5).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};

use crate::ann::{AnnBackend, AnnParams, AnnType, InternalId};
use crate::error::{StoreError, StoreResult};
use crate::filtering::{DocumentMetadata, MetadataStore};
use crate::persistence::Directory;
use crate::DocId;

#[allow(clippy::type_complexity)]
type ColdSnapshotOwned = (
    AnnBackend,
    u32,
    HashMap<DocId, InternalId>,
    HashMap<InternalId, DocId>,
    Vec<DocId>,
    HashMap<DocId, DocumentMetadata>,
    f32,
);

/// Above this fraction of soft-deleted entries, the owning store should
/// schedule a rebuild to reclaim space and restore search quality.
pub const DEFAULT_REBUILD_THRESHOLD: f32 = 0.3;

/// A rebuild only pays for itself once this many entries are soft-deleted,
/// regardless of how high the deletion rate is — rebuilding a handful of
/// entries isn't worth a full backend reconstruction.
pub const REBUILD_MIN_DELETED_COUNT: usize = 1000;

pub struct ColdIndex {
    backend: AnnBackend,
    next_internal_id: AtomicU32,
    doc_to_internal: HashMap<DocId, InternalId>,
    internal_to_doc: HashMap<InternalId, DocId>,
    soft_deleted: HashSet<DocId>,
    metadata: MetadataStore,
    rebuild_threshold: f32,
}

impl ColdIndex {
    pub fn new(ann_type: AnnType, dimension: usize, params: AnnParams) -> Self {
        Self {
            backend: AnnBackend::create(ann_type, dimension, params),
            next_internal_id: AtomicU32::new(1),
            doc_to_internal: HashMap::new(),
            internal_to_doc: HashMap::new(),
            soft_deleted: HashSet::new(),
            metadata: MetadataStore::new(),
            rebuild_threshold: DEFAULT_REBUILD_THRESHOLD,
        }
    }

    pub fn with_rebuild_threshold(mut self, threshold: f32) -> Self {
        self.rebuild_threshold = threshold;
        self
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

    pub fn metadata_get(&self, doc_id: DocId) -> Option<DocumentMetadata> {
        self.metadata.get(doc_id).cloned()
    }

    /// Snapshot of every live internal id, for the migrator's Planning phase.
    pub fn internal_ids(&self) -> Vec<InternalId> {
        self.doc_to_internal.values().copied().collect()
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

    pub fn is_trained(&self) -> bool {
        self.backend.is_trained()
    }

    pub fn train(&mut self, sample_vectors: &[Vec<f32>]) -> StoreResult<()> {
        self.backend.train(sample_vectors)
    }

    /// Live size, excluding soft-deleted entries.
    pub fn size(&self) -> usize {
        self.backend.size().saturating_sub(self.soft_deleted.len())
    }

    /// Bulk-load archived chunks, assigning fresh internal ids but keeping
    /// the caller-provided `doc_id`s (archive moves existing documents, it
    /// doesn't mint new ones).
    pub fn add_archived(
        &mut self,
        entries: Vec<(DocId, Vec<f32>, DocumentMetadata)>,
    ) -> StoreResult<()> {
        let mut vectors = Vec::with_capacity(entries.len());
        let mut internal_ids = Vec::with_capacity(entries.len());

        for (doc_id, vector, metadata) in entries {
            let internal_id = self.next_internal_id.fetch_add(1, Ordering::SeqCst);

            self.doc_to_internal.insert(doc_id, internal_id);
            self.internal_to_doc.insert(internal_id, doc_id);
            self.metadata.insert(doc_id, metadata);

            vectors.push(vector);
            internal_ids.push(internal_id);
        }

        self.backend.add(&vectors, &internal_ids)
    }

    /// Mark `doc_id` as deleted. Idempotent: deleting an already-deleted or
    /// unknown `doc_id` is a no-op, not an error — cold deletes race with
    /// the archive flow by design.
    pub fn soft_delete(&mut self, doc_id: DocId) {
        if self.doc_to_internal.contains_key(&doc_id) {
            self.soft_deleted.insert(doc_id);
        }
    }

    pub fn is_soft_deleted(&self, doc_id: DocId) -> bool {
        self.soft_deleted.contains(&doc_id)
    }

    pub fn search(&self, query: &[f32], k: usize) -> StoreResult<Vec<(DocId, f32)>> {
        let oversampled_k = k + self.soft_deleted.len().min(k.max(1) * 4);
        let raw = self.backend.search(query, oversampled_k.max(k))?;
        Ok(raw
            .into_iter()
            .filter_map(|(internal_id, dist)| {
                let doc_id = *self.internal_to_doc.get(&internal_id)?;
                if self.soft_deleted.contains(&doc_id) {
                    None
                } else {
                    Some((doc_id, dist))
                }
            })
            .take(k)
            .collect())
    }

    /// Fraction of the backend's entries that are soft-deleted.
    pub fn deletion_rate(&self) -> f32 {
        let total = self.backend.size();
        if total == 0 {
            return 0.0;
        }
        self.soft_deleted.len() as f32 / total as f32
    }

    /// Whether accumulated soft deletes justify a rebuild: the deletion
    /// rate must cross the threshold *and* the absolute count must be
    /// large enough that a rebuild is worth its cost.
    pub fn needs_rebuild(&self) -> bool {
        self.deletion_rate() >= self.rebuild_threshold
            && self.soft_deleted_count() > REBUILD_MIN_DELETED_COUNT
    }

    /// Every live `(doc_id, vector, metadata)` still present, for the
    /// migrator to read when rebuilding onto a fresh backend.
    pub fn iter_live(&self) -> Vec<(DocId, Vec<f32>, DocumentMetadata)> {
        self.doc_to_internal
            .iter()
            .filter(|(doc_id, _)| !self.soft_deleted.contains(doc_id))
            .filter_map(|(&doc_id, &internal_id)| {
                let metadata = self.metadata.get(doc_id).cloned().unwrap_or_default();
                self.backend
                    .get_vector(internal_id)
                    .map(|v| (doc_id, v, metadata))
            })
            .collect()
    }

    pub fn soft_deleted_count(&self) -> usize {
        self.soft_deleted.len()
    }

    pub fn persist(&self, dir: &dyn Directory, path: &str) -> StoreResult<()> {
        let soft_deleted: Vec<DocId> = self.soft_deleted.iter().copied().collect();
        let metadata: HashMap<DocId, DocumentMetadata> =
            self.metadata.iter().map(|(id, m)| (*id, m.clone())).collect();
        let payload = (
            &self.backend,
            self.next_internal_id.load(Ordering::SeqCst),
            &self.doc_to_internal,
            &self.internal_to_doc,
            soft_deleted,
            metadata,
            self.rebuild_threshold,
        );
        let bytes =
            postcard::to_allocvec(&payload).map_err(|e| StoreError::PersistError(e.to_string()))?;
        dir.atomic_write(path, &bytes).map_err(StoreError::from)
    }

    pub fn load(dir: &dyn Directory, path: &str) -> StoreResult<Self> {
        let bytes = dir.read_file(path).map_err(StoreError::from)?;
        let (
            backend,
            next_internal_id,
            doc_to_internal,
            internal_to_doc,
            soft_deleted,
            metadata,
            rebuild_threshold,
        ): ColdSnapshotOwned =
            postcard::from_bytes(&bytes).map_err(|e| StoreError::PersistError(e.to_string()))?;

        Ok(Self {
            backend,
            next_internal_id: AtomicU32::new(next_internal_id),
            doc_to_internal,
            internal_to_doc,
            soft_deleted: soft_deleted.into_iter().collect(),
            metadata: MetadataStore::from_entries(metadata),
            rebuild_threshold,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_archived_then_search() {
        let mut cold = ColdIndex::new(AnnType::Flat, 2, AnnParams::default());
        cold.add_archived(vec![
            (10, vec![0.0, 0.0], DocumentMetadata::new()),
            (11, vec![10.0, 10.0], DocumentMetadata::new()),
        ])
        .unwrap();

        let results = cold.search(&[0.0, 0.0], 1).unwrap();
        assert_eq!(results[0].0, 10);
    }

    #[test]
    fn soft_delete_is_idempotent_and_filters_search() {
        let mut cold = ColdIndex::new(AnnType::Flat, 2, AnnParams::default());
        cold.add_archived(vec![(10, vec![0.0, 0.0], DocumentMetadata::new())])
            .unwrap();

        cold.soft_delete(10);
        cold.soft_delete(10);
        assert_eq!(cold.soft_deleted_count(), 1);
        assert!(cold.search(&[0.0, 0.0], 5).unwrap().is_empty());
    }

    #[test]
    fn high_deletion_rate_alone_does_not_trigger_rebuild_below_the_count_floor() {
        let mut cold = ColdIndex::new(AnnType::Flat, 2, AnnParams::default())
            .with_rebuild_threshold(0.3);
        cold.add_archived(vec![
            (1, vec![0.0, 0.0], DocumentMetadata::new()),
            (2, vec![1.0, 1.0], DocumentMetadata::new()),
            (3, vec![2.0, 2.0], DocumentMetadata::new()),
        ])
        .unwrap();

        cold.soft_delete(1);
        assert!(cold.deletion_rate() >= 0.3);
        assert!(!cold.needs_rebuild());
    }

    #[test]
    fn rebuild_triggers_once_rate_and_count_both_cross_their_thresholds() {
        let mut cold = ColdIndex::new(AnnType::Flat, 2, AnnParams::default())
            .with_rebuild_threshold(0.3);
        let entries: Vec<(DocId, Vec<f32>, DocumentMetadata)> = (0..3000)
            .map(|i| (i as DocId, vec![i as f32, i as f32], DocumentMetadata::new()))
            .collect();
        cold.add_archived(entries).unwrap();

        for doc_id in 0..1200 {
            cold.soft_delete(doc_id as DocId);
        }

        assert!(cold.deletion_rate() >= 0.3);
        assert!(cold.soft_deleted_count() > REBUILD_MIN_DELETED_COUNT);
        assert!(cold.needs_rebuild());
    }

    #[test]
    fn iter_live_excludes_soft_deleted() {
        let mut cold = ColdIndex::new(AnnType::Flat, 2, AnnParams::default());
        cold.add_archived(vec![
            (1, vec![0.0, 0.0], DocumentMetadata::new()),
            (2, vec![1.0, 1.0], DocumentMetadata::new()),
        ])
        .unwrap();
        cold.soft_delete(2);

        let live = cold.iter_live();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].0, 1);
    }
}
