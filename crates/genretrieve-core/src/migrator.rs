//! Online ANN backend migration (spec.md §4.8).
//!
//! Swaps a tier's backend from one `AnnType` to another without blocking
//! queries: reads keep serving the old backend throughout planning,
//! building, and validating; writes that land on the old backend during
//! that window are journaled and replayed into the new backend immediately
//! before the atomic swap, which happens under a short exclusive lock the
//! caller (not this module — it's store-specific) holds. [`IndexMigrator::migrate`]
//! drains the journal once itself during the Swapping phase; the caller
//! replays it a second time via [`IndexMigrator::replay_journal`] right
//! before the swap, under the same exclusive lock, to catch anything
//! recorded in the gap between this function returning and the lock being
//! acquired.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use tokio::sync::watch;

use crate::ann::{AnnBackend, AnnParams, AnnType, InternalId};
use crate::error::{StoreError, StoreResult};
use crate::persistence::Tier;

pub const DEFAULT_BUILD_BATCH_SIZE: usize = 10_000;
pub const DEFAULT_VALIDATION_QUERIES: usize = 100;
pub const DEFAULT_RECALL_THRESHOLD: f32 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationPhase {
    Planning,
    Building,
    Validating,
    Swapping,
    Cleaning,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct MigrationStatus {
    pub tier: Tier,
    pub from: AnnType,
    pub to: AnnType,
    pub phase: MigrationPhase,
    pub processed: usize,
    pub total: usize,
    pub failure_reason: Option<String>,
}

impl MigrationStatus {
    fn starting(tier: Tier, from: AnnType, to: AnnType, total: usize) -> Self {
        Self {
            tier,
            from,
            to,
            phase: MigrationPhase::Planning,
            processed: 0,
            total,
            failure_reason: None,
        }
    }
}

/// One write that landed on the old backend while a migration was in
/// flight for its tier.
#[derive(Debug, Clone)]
pub enum JournaledWrite {
    Add {
        internal_id: InternalId,
        vector: Vec<f32>,
    },
    Remove {
        internal_id: InternalId,
    },
}

/// Write journal shared between the store (appends as it serves live
/// traffic) and the migrator (drains it immediately before swap).
#[derive(Default)]
pub struct MigrationJournal {
    writes: Mutex<VecDeque<JournaledWrite>>,
}

impl MigrationJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, write: JournaledWrite) {
        self.writes.lock().unwrap().push_back(write);
    }

    fn drain(&self) -> Vec<JournaledWrite> {
        self.writes.lock().unwrap().drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.lock().unwrap().is_empty()
    }
}

pub struct IndexMigrator {
    build_batch_size: usize,
    validation_queries: usize,
    recall_threshold: f32,
}

impl Default for IndexMigrator {
    fn default() -> Self {
        Self {
            build_batch_size: DEFAULT_BUILD_BATCH_SIZE,
            validation_queries: DEFAULT_VALIDATION_QUERIES,
            recall_threshold: DEFAULT_RECALL_THRESHOLD,
        }
    }
}

impl IndexMigrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(build_batch_size: usize, validation_queries: usize, recall_threshold: f32) -> Self {
        Self {
            build_batch_size: build_batch_size.max(1),
            validation_queries: validation_queries.max(1),
            recall_threshold,
        }
    }

    /// Run the full five-phase migration protocol, emitting status updates
    /// on `status_tx` as it progresses. `source_ids` is the snapshot of
    /// internal ids to migrate (planning's output, computed by the caller
    /// from its doc_id/internal_id overlay). Returns the built backend,
    /// ready for the caller to swap in under its own exclusive lock; on
    /// validation failure the old backend is left untouched and this
    /// returns `Err`.
    pub async fn migrate(
        &self,
        tier: Tier,
        source: &AnnBackend,
        source_ids: &[InternalId],
        to: AnnType,
        params: AnnParams,
        journal: &MigrationJournal,
        validation_queries: &[(Vec<f32>, usize)],
        status_tx: &watch::Sender<MigrationStatus>,
    ) -> StoreResult<AnnBackend> {
        let from = source.ann_type();
        let total = source_ids.len();
        let _ = status_tx.send(MigrationStatus::starting(tier, from, to, total));

        let mut target = AnnBackend::create(to, source.dimension(), params.clone());

        self.send(status_tx, tier, from, to, total, MigrationPhase::Building, 0, None);
        if !target.is_trained() {
            let sample_size = self.build_batch_size.max(params.nlist * 64);
            let sample: Vec<Vec<f32>> = source_ids
                .iter()
                .take(sample_size)
                .filter_map(|&id| source.get_vector(id))
                .collect();
            target.train(&sample).map_err(|e| self.fail(status_tx, tier, from, to, total, e))?;
        }

        let mut processed = 0;
        for batch in source_ids.chunks(self.build_batch_size) {
            let mut vectors = Vec::with_capacity(batch.len());
            let mut ids = Vec::with_capacity(batch.len());
            for &id in batch {
                if let Some(v) = source.get_vector(id) {
                    vectors.push(v);
                    ids.push(id);
                }
            }
            target
                .add(&vectors, &ids)
                .map_err(|e| self.fail(status_tx, tier, from, to, total, e))?;
            processed += batch.len();
            self.send(
                status_tx,
                tier,
                from,
                to,
                total,
                MigrationPhase::Building,
                processed,
                None,
            );
        }

        self.send(
            status_tx,
            tier,
            from,
            to,
            total,
            MigrationPhase::Validating,
            processed,
            None,
        );
        let skip_validation = from == AnnType::Flat && to == AnnType::Flat;
        if !skip_validation && !validation_queries.is_empty() {
            let recall = self.measure_recall(source, &target, validation_queries);
            if recall < self.recall_threshold {
                let reason = format!(
                    "recall@k {recall:.3} below threshold {:.3}",
                    self.recall_threshold
                );
                self.send(
                    status_tx,
                    tier,
                    from,
                    to,
                    total,
                    MigrationPhase::Failed,
                    processed,
                    Some(reason.clone()),
                );
                return Err(StoreError::MigrationValidationFailed { tier, reason });
            }
        }

        self.send(
            status_tx,
            tier,
            from,
            to,
            total,
            MigrationPhase::Swapping,
            processed,
            None,
        );
        Self::replay_journal(journal, &mut target)
            .map_err(|e| self.fail(status_tx, tier, from, to, total, e))?;

        self.send(
            status_tx,
            tier,
            from,
            to,
            total,
            MigrationPhase::Cleaning,
            processed,
            None,
        );
        self.send(
            status_tx,
            tier,
            from,
            to,
            total,
            MigrationPhase::Completed,
            processed,
            None,
        );
        Ok(target)
    }

    /// Apply every write recorded in `journal` to `target`, draining it.
    /// Called once from [`Self::migrate`] during the Swapping phase, and
    /// again by the caller immediately before the atomic backend swap
    /// (under its exclusive lock) to catch anything journaled in the gap
    /// between `migrate` returning and the caller acquiring that lock.
    pub fn replay_journal(journal: &MigrationJournal, target: &mut AnnBackend) -> StoreResult<()> {
        for write in journal.drain() {
            match write {
                JournaledWrite::Add { internal_id, vector } => {
                    target.add(&[vector], &[internal_id])?;
                }
                JournaledWrite::Remove { internal_id } => {
                    let _ = target.remove(&[internal_id]);
                }
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn send(
        &self,
        status_tx: &watch::Sender<MigrationStatus>,
        tier: Tier,
        from: AnnType,
        to: AnnType,
        total: usize,
        phase: MigrationPhase,
        processed: usize,
        failure_reason: Option<String>,
    ) {
        let _ = status_tx.send(MigrationStatus {
            tier,
            from,
            to,
            phase,
            processed,
            total,
            failure_reason,
        });
    }

    fn fail(
        &self,
        status_tx: &watch::Sender<MigrationStatus>,
        tier: Tier,
        from: AnnType,
        to: AnnType,
        total: usize,
        err: StoreError,
    ) -> StoreError {
        self.send(
            status_tx,
            tier,
            from,
            to,
            total,
            MigrationPhase::Failed,
            0,
            Some(err.to_string()),
        );
        err
    }

    fn measure_recall(
        &self,
        source: &AnnBackend,
        target: &AnnBackend,
        queries: &[(Vec<f32>, usize)],
    ) -> f32 {
        let sample: Vec<&(Vec<f32>, usize)> = queries.iter().take(self.validation_queries).collect();
        if sample.is_empty() {
            return 1.0;
        }

        let mut total_recall = 0.0;
        for (query, k) in &sample {
            let expected: HashSet<InternalId> = source
                .search(query, *k)
                .unwrap_or_default()
                .into_iter()
                .map(|(id, _)| id)
                .collect();
            if expected.is_empty() {
                total_recall += 1.0;
                continue;
            }
            let got: HashSet<InternalId> = target
                .search(query, *k)
                .unwrap_or_default()
                .into_iter()
                .map(|(id, _)| id)
                .collect();
            let hits = expected.intersection(&got).count();
            total_recall += hits as f32 / expected.len() as f32;
        }
        total_recall / sample.len() as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_flat(vectors: &[(InternalId, Vec<f32>)]) -> AnnBackend {
        let mut backend = AnnBackend::create(AnnType::Flat, 2, AnnParams::default());
        let ids: Vec<InternalId> = vectors.iter().map(|(id, _)| *id).collect();
        let vs: Vec<Vec<f32>> = vectors.iter().map(|(_, v)| v.clone()).collect();
        backend.add(&vs, &ids).unwrap();
        backend
    }

    #[tokio::test]
    async fn migrate_flat_to_ivf_preserves_nearest_neighbour() {
        let source = make_flat(&[
            (1, vec![0.0, 0.0]),
            (2, vec![0.1, 0.0]),
            (3, vec![10.0, 10.0]),
            (4, vec![10.1, 10.0]),
        ]);
        let ids: Vec<InternalId> = vec![1, 2, 3, 4];
        let journal = MigrationJournal::new();
        let (tx, _rx) = watch::channel(MigrationStatus::starting(
            Tier::Hot,
            AnnType::Flat,
            AnnType::Ivf,
            4,
        ));
        let migrator = IndexMigrator::new();
        let params = AnnParams {
            nlist: 2,
            nprobe: 2,
            ..AnnParams::default()
        };

        let validation = vec![(vec![0.0, 0.0], 2usize)];
        let target = migrator
            .migrate(
                Tier::Hot,
                &source,
                &ids,
                AnnType::Ivf,
                params,
                &journal,
                &validation,
                &tx,
            )
            .await
            .unwrap();

        assert_eq!(target.ann_type(), AnnType::Ivf);
        let results = target.search(&[0.0, 0.0], 1).unwrap();
        assert_eq!(results[0].0, 1);
    }

    #[tokio::test]
    async fn journaled_writes_replay_into_the_new_backend() {
        let source = make_flat(&[(1, vec![0.0, 0.0])]);
        let ids = vec![1];
        let journal = MigrationJournal::new();
        journal.record(JournaledWrite::Add {
            internal_id: 2,
            vector: vec![5.0, 5.0],
        });
        let (tx, _rx) = watch::channel(MigrationStatus::starting(
            Tier::Hot,
            AnnType::Flat,
            AnnType::Flat,
            1,
        ));
        let migrator = IndexMigrator::new();

        let target = migrator
            .migrate(
                Tier::Hot,
                &source,
                &ids,
                AnnType::Flat,
                AnnParams::default(),
                &journal,
                &[],
                &tx,
            )
            .await
            .unwrap();

        assert_eq!(target.size(), 2);
        assert!(journal.is_empty());
    }

    #[tokio::test]
    async fn low_recall_fails_the_migration() {
        // IVF-PQ with a single training sample and coarse params produces
        // low fidelity; force a recall check that can't pass.
        let source = make_flat(&[
            (1, vec![0.0, 0.0, 0.0, 0.0]),
            (2, vec![1.0, 0.0, 0.0, 0.0]),
            (3, vec![0.0, 1.0, 0.0, 0.0]),
        ]);
        let ids = vec![1, 2, 3];
        let journal = MigrationJournal::new();
        let (tx, _rx) = watch::channel(MigrationStatus::starting(
            Tier::Hot,
            AnnType::Flat,
            AnnType::IvfPq,
            3,
        ));
        let migrator = IndexMigrator::with_params(10_000, 100, 2.0);
        let validation = vec![(vec![0.0, 0.0, 0.0, 0.0], 3usize)];

        let result = migrator
            .migrate(
                Tier::Hot,
                &source,
                &ids,
                AnnType::IvfPq,
                AnnParams {
                    nlist: 1,
                    nprobe: 1,
                    m: 2,
                    nbits: 1,
                    ..AnnParams::default()
                },
                &journal,
                &validation,
                &tx,
            )
            .await;

        assert!(result.is_err());
    }
}
