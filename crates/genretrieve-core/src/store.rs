//! `GenerationalStore`: the public orchestrator tying the Hot/Cold tiers,
//! routing table, BM25 index, fusion, reranking, and maintenance jobs
//! together (spec.md §4.6-§4.11).
//!
//! Reads never block on writes for long: Hot and Cold are behind their own
//! `tokio::sync::RwLock`, searched concurrently, and a capacity-triggered
//! archive pass is the only write-side operation a request can be made to
//! wait on synchronously.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{watch, Mutex, RwLock};

use crate::ann::{AnnParams, AnnType};
use crate::bm25::manager::Bm25IndexManager;
use crate::bm25::{Bm25Params, InvertedIndex};
use crate::collaborators::{Clock, CrossEncoder, Embedder, TextGenerator, Tokeniser};
use crate::config::Config;
use crate::error::{StoreError, StoreResult};
use crate::filtering::{DocumentMetadata, FilterPredicate};
use crate::fusion::{reciprocal_rank_fusion, FusedResult, RankedList, DEFAULT_RRF_C};
use crate::migrator::{IndexMigrator, JournaledWrite, MigrationJournal, MigrationPhase, MigrationStatus};
use crate::persistence::{Directory, Tier};
use crate::rerank::{RerankCandidate, RerankOutcome, Reranker};
use crate::routing_table::{RoutingStats, RoutingTable};
use crate::scheduler::{self, ArchiveRunStats, ArchiveSchedulerHandle, DailySchedule};
use crate::selector::{AdaptiveIndexSelector, SelectorInput};
use crate::strategies::{QueryPlan, RetrievalStrategy, StrategyPlanner};
use crate::tiers::{ColdIndex, HotIndex};
use crate::DocId;

/// One chunk of a search result: its fused/reranked score, the distance the
/// vector search contributed (if any), and a copy of its stored metadata.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub doc_id: DocId,
    pub score: f32,
    pub distance: Option<f32>,
    pub reranked: bool,
    pub metadata: DocumentMetadata,
}

#[derive(Debug, Clone, Copy)]
pub struct HotStats {
    pub size: usize,
    pub max_size: usize,
    pub tombstones: usize,
    pub ann_type: AnnType,
}

#[derive(Debug, Clone, Copy)]
pub struct ColdStats {
    pub size: usize,
    pub soft_deleted: usize,
    pub deletion_rate: f32,
    pub ann_type: AnnType,
}

#[derive(Debug, Clone, Copy)]
pub struct StoreStats {
    pub hot: HotStats,
    pub cold: ColdStats,
    pub routing: RoutingStats,
    pub needs_archive: bool,
    pub needs_cold_rebuild: bool,
}

#[derive(Debug, Clone)]
pub struct RebuildOutcome {
    pub reason: String,
    pub migrated: usize,
    pub ann_type: AnnType,
}

pub struct GenerationalStore {
    config: Config,
    directory: Arc<dyn Directory>,
    hot: RwLock<HotIndex>,
    cold: RwLock<ColdIndex>,
    routing: Arc<RoutingTable>,
    bm25: Option<Bm25IndexManager>,
    embedder: Arc<dyn Embedder>,
    #[allow(dead_code)]
    tokeniser: Arc<dyn Tokeniser>,
    text_generator: Option<Arc<dyn TextGenerator>>,
    reranker: Option<Reranker>,
    clock: Arc<dyn Clock>,
    selector: Mutex<AdaptiveIndexSelector>,
    migrator: IndexMigrator,
    hot_journal: MigrationJournal,
    cold_journal: MigrationJournal,
    /// Set for the duration of a Hot migration; gates whether
    /// `add_documents`/`delete_by_file`/`archive_old` journal their writes
    /// in addition to applying them directly, and rejects a second
    /// concurrent migration on the same tier (spec.md §4.8).
    hot_migrating: AtomicBool,
    cold_migrating: AtomicBool,
    /// Chunk text kept alongside the vector store so BM25 catch-up and the
    /// reranker have something to score against without re-reading the
    /// caller's original documents. Persisted as one blob, not streamed —
    /// acceptable for the chunk volumes this store targets.
    content: RwLock<HashMap<DocId, String>>,
    scheduler: Mutex<Option<ArchiveSchedulerHandle>>,
}

impl GenerationalStore {
    pub async fn open(
        config: Config,
        directory: Arc<dyn Directory>,
        embedder: Arc<dyn Embedder>,
        tokeniser: Arc<dyn Tokeniser>,
        text_generator: Option<Arc<dyn TextGenerator>>,
        cross_encoder: Option<Arc<dyn CrossEncoder>>,
        clock: Arc<dyn Clock>,
    ) -> StoreResult<Arc<Self>> {
        config.validate()?;
        if embedder.dimension() != config.dimension {
            return Err(StoreError::ConfigError(format!(
                "embedder dimension {} does not match configured dimension {}",
                embedder.dimension(),
                config.dimension
            )));
        }

        let hot_dir_str = config.hot_dir().to_string_lossy().to_string();
        let cold_dir_str = config.cold_dir().to_string_lossy().to_string();
        directory.create_dir_all(&hot_dir_str).map_err(StoreError::from)?;
        directory.create_dir_all(&cold_dir_str).map_err(StoreError::from)?;

        let hot_snapshot_path = format!("{hot_dir_str}/index.bin");
        let cold_snapshot_path = format!("{cold_dir_str}/index.bin");
        let content_path = format!("{}/content.bin", config.root_dir.to_string_lossy());

        let routing = Arc::new(RoutingTable::open(
            directory.clone(),
            config.routing_path().to_string_lossy().to_string(),
        )?);
        let routing_stats = routing.stats();

        let selector_input = SelectorInput {
            vector_count: routing_stats.total,
            dimension: config.dimension,
            memory_budget_bytes: config.memory_budget_mb as u64 * 1024 * 1024,
            target_latency_ms: config.target_latency_ms,
        };

        let mut hot = if directory.exists(&hot_snapshot_path) {
            HotIndex::load(directory.as_ref(), &hot_snapshot_path)?
        } else {
            let hot_type = if config.faiss_index_auto_select {
                AdaptiveIndexSelector::select(selector_input, config.hot_index_type).ann_type
            } else {
                config.hot_index_type.unwrap_or(AnnType::Flat)
            };
            HotIndex::new(
                hot_type,
                config.dimension,
                AnnParams::default(),
                config.hot_index_max_size,
            )
        };

        // Crash-recovery reconciliation (spec.md §4.3, §5): a crash between
        // the ANN write and the routing-table write leaves an orphaned Hot
        // entry with no routing record. Evict it before the store is usable.
        let mut orphaned = 0usize;
        for doc_id in hot.doc_ids() {
            if routing.get(doc_id).is_none() {
                let _ = hot.remove(doc_id);
                orphaned += 1;
            }
        }
        if orphaned > 0 {
            tracing::warn!(
                target: "genretrieve.reconcile",
                orphaned,
                "evicted hot entries with no routing record at open"
            );
        }

        let cold = if directory.exists(&cold_snapshot_path) {
            ColdIndex::load(directory.as_ref(), &cold_snapshot_path)?
        } else {
            let cold_type = if config.faiss_index_auto_select {
                AdaptiveIndexSelector::select(selector_input, config.cold_index_type).ann_type
            } else {
                config.cold_index_type.unwrap_or(AnnType::Flat)
            };
            ColdIndex::new(cold_type, config.dimension, AnnParams::default())
        };

        let content_map: HashMap<DocId, String> = if directory.exists(&content_path) {
            let bytes = directory.read_file(&content_path).map_err(StoreError::from)?;
            postcard::from_bytes(&bytes).map_err(|e| StoreError::PersistError(e.to_string()))?
        } else {
            HashMap::new()
        };

        let bm25 = if config.enable_bm25 {
            let bm25_path = config.bm25_path().to_string_lossy().to_string();
            let index: InvertedIndex = if directory.exists(&bm25_path) {
                let bytes = directory.read_file(&bm25_path).map_err(StoreError::from)?;
                postcard::from_bytes(&bytes).map_err(|e| StoreError::PersistError(e.to_string()))?
            } else {
                InvertedIndex::new()
            };
            let manager = Bm25IndexManager::new(
                index,
                tokeniser.clone(),
                Bm25Params {
                    k1: config.bm25_k1,
                    b: config.bm25_b,
                },
                directory.clone(),
                bm25_path,
                Duration::from_secs(30),
            );

            // Sync protocol (spec.md §4.9): an index with zero synced docs
            // but a non-empty routing table is rebuilt from the content
            // store in one pass. A partially-synced index is left alone —
            // re-adding docs it already has would double-count postings.
            if manager.last_synced_vector_count().await == 0 && routing_stats.total > 0 {
                let all_ids: Vec<DocId> = routing
                    .iter_by_tier(Tier::Hot)
                    .into_iter()
                    .chain(routing.iter_by_tier(Tier::Cold))
                    .collect();
                let snapshot = content_map.clone();
                manager
                    .catch_up(all_ids, move |doc_id| {
                        let text = snapshot.get(&doc_id).cloned();
                        async move { text }
                    })
                    .await?;
            }
            Some(manager)
        } else {
            None
        };

        let migrator = IndexMigrator::with_params(
            config.migration_batch_size,
            config.migration_validation_queries,
            config.migration_recall_threshold,
        );

        Ok(Arc::new(Self {
            config,
            directory,
            hot: RwLock::new(hot),
            cold: RwLock::new(cold),
            routing,
            bm25,
            embedder,
            tokeniser,
            text_generator,
            reranker: cross_encoder.map(Reranker::new),
            clock,
            selector: Mutex::new(AdaptiveIndexSelector::new()),
            migrator,
            hot_journal: MigrationJournal::new(),
            cold_journal: MigrationJournal::new(),
            hot_migrating: AtomicBool::new(false),
            cold_migrating: AtomicBool::new(false),
            content: RwLock::new(content_map),
            scheduler: Mutex::new(None),
        }))
    }

    /// Start the background daily archive scheduler (spec.md §4.11). A
    /// no-op if called twice; the second handle replaces the first, leaving
    /// the original task running unreferenced but harmless until shutdown.
    pub async fn start_scheduler(self: &Arc<Self>) {
        let store = self.clone();
        let schedule = DailySchedule::default();
        let seconds_until_first = schedule.seconds_until_next(0);
        let handle = scheduler::spawn(schedule, seconds_until_first, move || {
            let store = store.clone();
            async move { store.archive_old(false).await.unwrap_or_default() }
        });
        *self.scheduler.lock().await = Some(handle);
    }

    pub async fn request_archive_now(&self) {
        if let Some(handle) = self.scheduler.lock().await.as_ref() {
            handle.archive_now();
        }
    }

    /// Flush every in-memory structure to disk and stop background tasks.
    pub async fn close(&self) -> StoreResult<()> {
        self.persist_all().await?;
        if let Some(bm25) = &self.bm25 {
            bm25.shutdown();
        }
        if let Some(handle) = self.scheduler.lock().await.take() {
            handle.shutdown();
        }
        Ok(())
    }

    async fn persist_all(&self) -> StoreResult<()> {
        let hot_path = format!("{}/index.bin", self.config.hot_dir().to_string_lossy());
        let cold_path = format!("{}/index.bin", self.config.cold_dir().to_string_lossy());
        self.hot.read().await.persist(self.directory.as_ref(), &hot_path)?;
        self.cold.read().await.persist(self.directory.as_ref(), &cold_path)?;
        self.persist_content().await
    }

    async fn persist_content(&self) -> StoreResult<()> {
        let content = self.content.read().await;
        let bytes =
            postcard::to_allocvec(&*content).map_err(|e| StoreError::PersistError(e.to_string()))?;
        let path = format!("{}/content.bin", self.config.root_dir.to_string_lossy());
        self.directory.atomic_write(&path, &bytes).map_err(StoreError::from)
    }

    /// Embed and insert `chunks` (text + metadata) under `file_id`, archiving
    /// synchronously first if the Hot tier doesn't have room (spec.md §4.3).
    #[tracing::instrument(skip(self, chunks), fields(chunk_count = chunks.len()))]
    pub async fn add_documents(
        &self,
        file_id: &str,
        chunks: Vec<(String, DocumentMetadata)>,
    ) -> StoreResult<Vec<DocId>> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }
        for (text, _) in &chunks {
            if text.len() > self.config.max_chunk_bytes {
                return Err(StoreError::ConfigError(format!(
                    "chunk of {} bytes exceeds max_chunk_bytes ({})",
                    text.len(),
                    self.config.max_chunk_bytes
                )));
            }
        }

        let texts: Vec<String> = chunks.iter().map(|(t, _)| t.clone()).collect();
        let vectors = self
            .embedder
            .embed(&texts)
            .await
            .map_err(StoreError::EmbedError)?;
        for v in &vectors {
            if v.len() != self.config.dimension {
                return Err(StoreError::DimensionMismatch {
                    expected: self.config.dimension,
                    actual: v.len(),
                });
            }
        }

        self.ensure_hot_capacity(chunks.len()).await?;

        let now = self.clock.now_unix_secs();
        let journal_vectors = vectors.clone();
        let pending: Vec<crate::tiers::hot::PendingChunk> = vectors
            .into_iter()
            .zip(chunks.iter())
            .map(|(vector, (_, metadata))| crate::tiers::hot::PendingChunk {
                vector,
                metadata: metadata.clone(),
            })
            .collect();

        let doc_ids = {
            let mut hot = self.hot.write().await;
            let doc_ids = hot.add(pending, now)?;
            if self.hot_migrating.load(Ordering::SeqCst) {
                for (&doc_id, vector) in doc_ids.iter().zip(journal_vectors.into_iter()) {
                    if let Some(internal_id) = hot.internal_id_of(doc_id) {
                        self.hot_journal.record(JournaledWrite::Add { internal_id, vector });
                    }
                }
            }
            doc_ids
        };

        let records: Vec<(DocId, Tier, String, i64)> = doc_ids
            .iter()
            .map(|&id| (id, Tier::Hot, file_id.to_string(), now))
            .collect();
        self.routing.put_many(records)?;

        {
            let mut content = self.content.write().await;
            for (&doc_id, (text, _)) in doc_ids.iter().zip(chunks.iter()) {
                content.insert(doc_id, text.clone());
            }
        }
        self.persist_content().await?;

        if let Some(bm25) = &self.bm25 {
            for (&doc_id, (text, _)) in doc_ids.iter().zip(chunks.iter()) {
                bm25.index_document(doc_id, text).await;
            }
        }

        tracing::info!(
            target: "genretrieve.ingest",
            file_id,
            doc_count = doc_ids.len(),
            "ingested chunks"
        );
        Ok(doc_ids)
    }

    async fn ensure_hot_capacity(&self, additional: usize) -> StoreResult<()> {
        let needs_room = {
            let hot = self.hot.read().await;
            hot.size() + additional > hot.max_size()
        };
        if needs_room {
            self.archive_old(true).await?;
        }
        Ok(())
    }

    /// Remove every chunk routed under `file_id`. Hot removals are physical
    /// where the backend supports it; Cold removals are always tombstones.
    #[tracing::instrument(skip(self))]
    pub async fn delete_by_file(&self, file_id: &str) -> StoreResult<usize> {
        let doc_ids = self.routing.by_file_id(file_id);
        let mut count = 0usize;
        for doc_id in doc_ids {
            let Some(record) = self.routing.get(doc_id) else {
                continue;
            };
            match record.tier {
                Tier::Hot => {
                    let mut hot = self.hot.write().await;
                    let internal_id = hot.internal_id_of(doc_id);
                    let _ = hot.remove(doc_id);
                    if self.hot_migrating.load(Ordering::SeqCst) {
                        if let Some(internal_id) = internal_id {
                            self.hot_journal.record(JournaledWrite::Remove { internal_id });
                        }
                    }
                }
                Tier::Cold => {
                    let mut cold = self.cold.write().await;
                    let internal_id = cold.internal_id_of(doc_id);
                    cold.soft_delete(doc_id);
                    if self.cold_migrating.load(Ordering::SeqCst) {
                        if let Some(internal_id) = internal_id {
                            self.cold_journal.record(JournaledWrite::Remove { internal_id });
                        }
                    }
                }
            }
            self.routing.delete(doc_id)?;
            self.content.write().await.remove(&doc_id);
            if let Some(bm25) = &self.bm25 {
                bm25.remove_document(doc_id).await;
            }
            count += 1;
        }
        if count > 0 {
            self.persist_content().await?;
        }
        tracing::info!(target: "genretrieve.delete", file_id, removed = count, "deleted chunks");
        Ok(count)
    }

    fn oversampled_k(&self, k: usize, per_tier_factor: f32) -> usize {
        let global = if self.config.enable_reranker { 3.0 } else { 1.5 };
        (((k as f32) * per_tier_factor * global).ceil() as usize).max(k)
    }

    fn filter_hits(
        raw: Vec<(DocId, f32)>,
        filter: &Option<FilterPredicate>,
        metadata_of: impl Fn(DocId) -> Option<DocumentMetadata>,
    ) -> Vec<(DocId, f32)> {
        match filter {
            None => raw,
            Some(f) => raw
                .into_iter()
                .filter(|(id, _)| metadata_of(*id).is_some_and(|m| f.matches(&m)))
                .collect(),
        }
    }

    /// Plain dense (+ optional BM25, + optional rerank) search over a single
    /// query string — the base retrieval step every [`RetrievalStrategy`]
    /// composes on top of (spec.md §4.6).
    #[tracing::instrument(skip(self, query_text, filter))]
    pub async fn search(
        &self,
        query_text: &str,
        k: usize,
        filter: Option<&FilterPredicate>,
    ) -> StoreResult<Vec<SearchResult>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let query_vecs = self
            .embedder
            .embed(std::slice::from_ref(&query_text.to_string()))
            .await
            .map_err(StoreError::EmbedError)?;
        let query_vec = query_vecs
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::EmbedError("embedder returned no vector".into()))?;

        let hot_k = self.oversampled_k(k, self.config.hot_search_oversample);
        let cold_k = self.oversampled_k(k, self.config.cold_search_oversample);
        let filter_owned = filter.cloned();

        let (hot_hits, cold_hits) = tokio::join!(
            async {
                let hot = self.hot.read().await;
                let raw = hot.search(&query_vec, hot_k)?;
                StoreResult::Ok(Self::filter_hits(raw, &filter_owned, |id| {
                    hot.metadata_get(id)
                }))
            },
            async {
                let cold = self.cold.read().await;
                let raw = cold.search(&query_vec, cold_k)?;
                StoreResult::Ok(Self::filter_hits(raw, &filter_owned, |id| {
                    cold.metadata_get(id)
                }))
            },
        );
        let hot_hits = hot_hits?;
        let cold_hits = cold_hits?;

        let hot_list: Vec<(DocId, Option<f32>)> =
            hot_hits.iter().map(|(id, d)| (*id, Some(*d))).collect();
        let cold_list: Vec<(DocId, Option<f32>)> =
            cold_hits.iter().map(|(id, d)| (*id, Some(*d))).collect();

        let bm25_list: Vec<(DocId, Option<f32>)> = if self.config.enable_bm25 {
            if let Some(bm25) = &self.bm25 {
                let hits = bm25.search(query_text, hot_k.max(cold_k)).await;
                hits.into_iter().map(|(id, _)| (id, None)).collect()
            } else {
                Vec::new()
            }
        } else {
            Vec::new()
        };

        let mut lists = vec![
            RankedList {
                doc_ids: &hot_list,
                weight: self.config.w_hot,
            },
            RankedList {
                doc_ids: &cold_list,
                weight: self.config.w_cold,
            },
        ];
        if !bm25_list.is_empty() {
            lists.push(RankedList {
                doc_ids: &bm25_list,
                weight: self.config.w_bm25,
            });
        }
        let fused = reciprocal_rank_fusion(&lists, DEFAULT_RRF_C);

        let results = if self.config.enable_reranker && self.reranker.is_some() {
            self.rerank_and_trim(query_text, fused, k).await?
        } else {
            fused
                .into_iter()
                .take(k)
                .map(|f| (f, false))
                .collect::<Vec<_>>()
        };

        let mut out = Vec::with_capacity(results.len());
        for (fused, reranked) in results {
            let metadata = self.metadata_of(fused.doc_id).await.unwrap_or_default();
            out.push(SearchResult {
                doc_id: fused.doc_id,
                score: fused.rrf_score,
                distance: fused.distance,
                reranked,
                metadata,
            });
        }
        tracing::debug!(
            target: "genretrieve.search",
            hot_hits = hot_hits.len(),
            cold_hits = cold_hits.len(),
            bm25_hits = bm25_list.len(),
            returned = out.len(),
            "search completed"
        );
        Ok(out)
    }

    async fn rerank_and_trim(
        &self,
        query_text: &str,
        fused: Vec<FusedResult>,
        k: usize,
    ) -> StoreResult<Vec<(FusedResult, bool)>> {
        let Some(reranker) = &self.reranker else {
            return Ok(fused.into_iter().take(k).map(|f| (f, false)).collect());
        };
        let pool_size = self.config.rerank_pool_size.min(fused.len());
        let pool = &fused[..pool_size];

        let content = self.content.read().await;
        let candidates: Vec<RerankCandidate> = pool
            .iter()
            .map(|f| RerankCandidate {
                doc_id: f.doc_id,
                text: content.get(&f.doc_id).cloned().unwrap_or_default(),
                fused: *f,
            })
            .collect();
        drop(content);

        match reranker.rerank(query_text, candidates).await {
            RerankOutcome::Reranked(mut results) => {
                results.truncate(k);
                let fused_by_id: HashMap<DocId, FusedResult> =
                    pool.iter().map(|f| (f.doc_id, *f)).collect();
                Ok(results
                    .into_iter()
                    .filter_map(|r| fused_by_id.get(&r.doc_id).map(|f| (*f, true)))
                    .collect())
            }
            RerankOutcome::FellBackToFusedOrder { reason } => {
                tracing::warn!(target: "genretrieve.rerank", reason = %reason, "reranker fell back to fused order");
                Ok(fused.into_iter().take(k).map(|f| (f, false)).collect())
            }
        }
    }

    /// Query-side strategy composition (spec.md GLOSSARY): builds one or
    /// more sub-queries via [`StrategyPlanner`], runs the base [`search`]
    /// for each, and fuses multi-query results via another RRF pass.
    /// `ParentChild` collapses the final ranking to parent doc ids.
    pub async fn search_with_strategy(
        &self,
        strategy: RetrievalStrategy,
        query_text: &str,
        k: usize,
        filter: Option<&FilterPredicate>,
    ) -> StoreResult<Vec<SearchResult>> {
        let QueryPlan { queries } =
            StrategyPlanner::plan(strategy, query_text, self.text_generator.as_deref()).await?;

        let mut results = if queries.len() == 1 {
            self.search(&queries[0], k, filter).await?
        } else {
            let per_query_k = k.max(1);
            let mut per_query_results = Vec::with_capacity(queries.len());
            for q in &queries {
                per_query_results.push(self.search(q, per_query_k, filter).await?);
            }
            self.fuse_multi_query(per_query_results, k)
        };

        if strategy == RetrievalStrategy::ParentChild {
            results = self.collapse_parent_child(results).await;
        }
        Ok(results)
    }

    fn fuse_multi_query(&self, per_query: Vec<Vec<SearchResult>>, k: usize) -> Vec<SearchResult> {
        let lists: Vec<Vec<(DocId, Option<f32>)>> = per_query
            .iter()
            .map(|results| results.iter().map(|r| (r.doc_id, r.distance)).collect())
            .collect();
        let ranked_lists: Vec<RankedList> = lists
            .iter()
            .map(|l| RankedList {
                doc_ids: l,
                weight: 1.0,
            })
            .collect();
        let fused = reciprocal_rank_fusion(&ranked_lists, DEFAULT_RRF_C);

        let metadata_by_id: HashMap<DocId, DocumentMetadata> = per_query
            .into_iter()
            .flatten()
            .map(|r| (r.doc_id, r.metadata))
            .collect();

        fused
            .into_iter()
            .take(k)
            .map(|f| SearchResult {
                doc_id: f.doc_id,
                score: f.rrf_score,
                distance: f.distance,
                reranked: false,
                metadata: metadata_by_id.get(&f.doc_id).cloned().unwrap_or_default(),
            })
            .collect()
    }

    async fn collapse_parent_child(&self, results: Vec<SearchResult>) -> Vec<SearchResult> {
        let metadata_snapshot: HashMap<DocId, DocumentMetadata> =
            results.iter().map(|r| (r.doc_id, r.metadata.clone())).collect();
        let order: Vec<DocId> = results.iter().map(|r| r.doc_id).collect();
        let collapsed_ids =
            StrategyPlanner::collapse_to_parents(order.into_iter(), |id| metadata_snapshot.get(&id));

        let results_by_id: HashMap<DocId, SearchResult> =
            results.into_iter().map(|r| (r.doc_id, r)).collect();
        let mut out = Vec::with_capacity(collapsed_ids.len());
        for parent_id in collapsed_ids {
            if let Some(r) = results_by_id.get(&parent_id) {
                out.push(r.clone());
            } else if let Some(metadata) = self.metadata_of(parent_id).await {
                out.push(SearchResult {
                    doc_id: parent_id,
                    score: 0.0,
                    distance: None,
                    reranked: false,
                    metadata,
                });
            }
        }
        out
    }

    async fn metadata_of(&self, doc_id: DocId) -> Option<DocumentMetadata> {
        if let Some(m) = self.hot.read().await.metadata_get(doc_id) {
            return Some(m);
        }
        self.cold.read().await.metadata_get(doc_id)
    }

    /// Move every Hot chunk older than `archive_age_days` into Cold. When
    /// `force` is set (the Hot tier is full), age is ignored and the oldest
    /// entries are archived down to 90% of capacity instead.
    #[tracing::instrument(skip(self))]
    pub async fn archive_old(&self, force: bool) -> StoreResult<ArchiveRunStats> {
        let hot_before = self.hot.read().await.size();
        let threshold = if force {
            i64::MAX
        } else {
            self.clock.now_unix_secs() - self.config.archive_age_days * 86_400
        };
        let target_size = if force {
            (self.hot.read().await.max_size() * 9) / 10
        } else {
            0
        };

        let start = Instant::now();
        let budget = Duration::from_secs(self.config.archive_run_budget_secs.max(1));
        let mut archived = 0usize;
        let mut batches_run = 0usize;
        let mut budget_exhausted = false;

        loop {
            if start.elapsed() > budget {
                budget_exhausted = true;
                break;
            }
            if force {
                let current = self.hot.read().await.size();
                if current <= target_size {
                    break;
                }
            }

            let candidates = {
                let hot = self.hot.read().await;
                let mut c = hot.iter_older_than(threshold);
                c.truncate(self.config.archive_batch_size);
                c
            };
            if candidates.is_empty() {
                break;
            }

            let doc_ids: Vec<DocId> = candidates.iter().map(|(id, _, _)| *id).collect();
            let moved = doc_ids.len();
            {
                let mut cold = self.cold.write().await;
                cold.add_archived(candidates)?;
                if self.cold_migrating.load(Ordering::SeqCst) {
                    for &doc_id in &doc_ids {
                        if let Some(internal_id) = cold.internal_id_of(doc_id) {
                            if let Some(vector) = cold.backend().get_vector(internal_id) {
                                self.cold_journal
                                    .record(JournaledWrite::Add { internal_id, vector });
                            }
                        }
                    }
                }
            }
            {
                let mut hot = self.hot.write().await;
                for &doc_id in &doc_ids {
                    let internal_id = hot.internal_id_of(doc_id);
                    hot.remove(doc_id)?;
                    if self.hot_migrating.load(Ordering::SeqCst) {
                        if let Some(internal_id) = internal_id {
                            self.hot_journal.record(JournaledWrite::Remove { internal_id });
                        }
                    }
                }
            }
            self.routing.set_tier_many(&doc_ids, Tier::Cold)?;

            archived += moved;
            batches_run += 1;
            if moved < self.config.archive_batch_size {
                break;
            }
        }

        if archived > 0 {
            self.persist_all().await?;
        }

        let hot_after = self.hot.read().await.size();
        if budget_exhausted {
            tracing::warn!(
                target: "genretrieve.archive",
                archived,
                hot_before,
                hot_after,
                "archive run stopped early: budget exhausted"
            );
        } else if archived > 0 {
            tracing::info!(target: "genretrieve.archive", archived, hot_before, hot_after, batches_run, "archive run completed");
        }
        Ok(ArchiveRunStats {
            archived,
            hot_before,
            hot_after,
            batches_run,
            budget_exhausted,
        })
    }

    /// Rebuild the Cold backend onto a fresh structure of the same type if
    /// the accumulated soft-delete rate crosses the rebuild threshold
    /// (spec.md §4.5). A no-op otherwise.
    #[tracing::instrument(skip(self))]
    pub async fn rebuild_cold(&self) -> StoreResult<RebuildOutcome> {
        let (needs, reason, ann_type) = {
            let cold = self.cold.read().await;
            if cold.needs_rebuild() {
                (
                    true,
                    format!(
                        "deletion rate {:.2} crossed the rebuild threshold",
                        cold.deletion_rate()
                    ),
                    cold.ann_type(),
                )
            } else {
                (
                    false,
                    "deletion rate below rebuild threshold".to_string(),
                    cold.ann_type(),
                )
            }
        };
        if !needs {
            return Ok(RebuildOutcome {
                reason,
                migrated: 0,
                ann_type,
            });
        }

        let live = { self.cold.read().await.iter_live() };
        let params = AnnParams::default();
        let mut fresh = ColdIndex::new(ann_type, self.config.dimension, params.clone());
        if !fresh.is_trained() {
            let sample: Vec<Vec<f32>> = live
                .iter()
                .map(|(_, v, _)| v.clone())
                .take(params.nlist.max(1) * 64)
                .collect();
            fresh.train(&sample)?;
        }
        let migrated = live.len();
        fresh.add_archived(live)?;

        {
            let mut cold = self.cold.write().await;
            *cold = fresh;
        }
        self.persist_all().await?;

        tracing::info!(target: "genretrieve.rebuild", migrated, ann_type = %ann_type, "cold tier rebuilt");
        Ok(RebuildOutcome {
            reason,
            migrated,
            ann_type,
        })
    }

    /// Online-migrate `tier`'s backend to `to` (spec.md §4.8): reads keep
    /// serving the old backend throughout planning/building/validating,
    /// then the new backend is swapped in under a brief exclusive lock.
    #[tracing::instrument(skip(self), fields(tier = %tier, to = %to))]
    pub async fn migrate_tier(&self, tier: Tier, to: AnnType) -> StoreResult<MigrationStatus> {
        let params = AnnParams::default();
        let migrating = match tier {
            Tier::Hot => &self.hot_migrating,
            Tier::Cold => &self.cold_migrating,
        };
        if migrating
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(StoreError::MigrationConflict {
                tier: tier.to_string(),
            });
        }

        let (status_tx, status_rx) = watch::channel(MigrationStatus {
            tier,
            from: to,
            to,
            phase: MigrationPhase::Planning,
            processed: 0,
            total: 0,
            failure_reason: None,
        });

        let journal = match tier {
            Tier::Hot => &self.hot_journal,
            Tier::Cold => &self.cold_journal,
        };

        let migration_result = match tier {
            Tier::Hot => {
                let hot = self.hot.read().await;
                let source_ids = hot.internal_ids();
                let validation_queries = hot.sample_vectors(self.config.migration_validation_queries);
                self.migrator
                    .migrate(
                        tier,
                        hot.backend(),
                        &source_ids,
                        to,
                        params,
                        journal,
                        &validation_queries,
                        &status_tx,
                    )
                    .await
            }
            Tier::Cold => {
                let cold = self.cold.read().await;
                let source_ids = cold.internal_ids();
                let validation_queries =
                    cold.sample_vectors(self.config.migration_validation_queries);
                self.migrator
                    .migrate(
                        tier,
                        cold.backend(),
                        &source_ids,
                        to,
                        params,
                        journal,
                        &validation_queries,
                        &status_tx,
                    )
                    .await
            }
        };

        let mut new_backend = match migration_result {
            Ok(backend) => backend,
            Err(e) => {
                migrating.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        // Replay anything journaled in the gap between the migrator's own
        // drain (above) and this exclusive lock being acquired, then swap.
        let swap_result: StoreResult<()> = match tier {
            Tier::Hot => {
                let mut hot = self.hot.write().await;
                IndexMigrator::replay_journal(journal, &mut new_backend).map(|_| {
                    *hot.backend_mut() = new_backend;
                })
            }
            Tier::Cold => {
                let mut cold = self.cold.write().await;
                IndexMigrator::replay_journal(journal, &mut new_backend).map(|_| {
                    *cold.backend_mut() = new_backend;
                })
            }
        };
        migrating.store(false, Ordering::SeqCst);
        swap_result?;
        self.persist_all().await?;

        tracing::info!(target: "genretrieve.migrate", tier = %tier, to = %to, "tier migration completed");
        Ok(status_rx.borrow().clone())
    }

    /// Record one search's observed latency and, if it's consistently above
    /// `target_latency_ms`, surface an advisory that a bigger backend would
    /// help. Purely informational — never auto-migrates.
    pub async fn record_search_latency(&self, latency_ms: f64) {
        self.selector.lock().await.record_latency(latency_ms);
    }

    pub async fn hot_upgrade_advice(&self) -> Option<crate::selector::UpgradeAdvisory> {
        let hot = self.hot.read().await;
        let input = SelectorInput {
            vector_count: hot.size(),
            dimension: self.config.dimension,
            memory_budget_bytes: self.config.memory_budget_mb as u64 * 1024 * 1024,
            target_latency_ms: self.config.target_latency_ms,
        };
        self.selector.lock().await.upgrade_advice(input, hot.ann_type())
    }

    pub async fn stats(&self) -> StoreStats {
        let hot = self.hot.read().await;
        let cold = self.cold.read().await;
        let routing = self.routing.stats();
        let threshold = self.clock.now_unix_secs() - self.config.archive_age_days * 86_400;
        let needs_archive = !hot.iter_older_than(threshold).is_empty();
        let needs_cold_rebuild = cold.needs_rebuild();

        StoreStats {
            hot: HotStats {
                size: hot.size(),
                max_size: hot.max_size(),
                tombstones: hot.tombstone_count(),
                ann_type: hot.ann_type(),
            },
            cold: ColdStats {
                size: cold.size(),
                soft_deleted: cold.soft_deleted_count(),
                deletion_rate: cold.deletion_rate(),
                ann_type: cold.ann_type(),
            },
            routing,
            needs_archive,
            needs_cold_rebuild,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{DefaultTokeniser, FixedClock};
    use crate::persistence::MemoryDirectory;
    use async_trait::async_trait;

    struct StubEmbedder {
        dimension: usize,
    }

    #[async_trait]
    impl Embedder for StubEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, String> {
            Ok(texts
                .iter()
                .map(|t| {
                    let seed = t.bytes().map(|b| b as f32).sum::<f32>();
                    vec![seed, seed / 2.0]
                })
                .collect())
        }

        fn dimension(&self) -> usize {
            self.dimension
        }
    }

    fn test_config() -> Config {
        Config {
            dimension: 2,
            hot_index_max_size: 100,
            enable_bm25: true,
            faiss_index_auto_select: false,
            hot_index_type: Some(AnnType::Flat),
            cold_index_type: Some(AnnType::Flat),
            archive_age_days: 30,
            ..Config::default()
        }
    }

    async fn test_store() -> Arc<GenerationalStore> {
        let dir: Arc<dyn Directory> = Arc::new(MemoryDirectory::new());
        GenerationalStore::open(
            test_config(),
            dir,
            Arc::new(StubEmbedder { dimension: 2 }),
            Arc::new(DefaultTokeniser),
            None,
            None,
            Arc::new(FixedClock(1_000)),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn add_then_search_finds_the_document() {
        let store = test_store().await;
        let doc_ids = store
            .add_documents("file-a", vec![("hello world".to_string(), DocumentMetadata::new())])
            .await
            .unwrap();
        assert_eq!(doc_ids.len(), 1);

        let results = store.search("hello world", 5, None).await.unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].doc_id, doc_ids[0]);
    }

    #[tokio::test]
    async fn delete_by_file_removes_all_its_chunks() {
        let store = test_store().await;
        store
            .add_documents(
                "file-a",
                vec![
                    ("one".to_string(), DocumentMetadata::new()),
                    ("two".to_string(), DocumentMetadata::new()),
                ],
            )
            .await
            .unwrap();

        let removed = store.delete_by_file("file-a").await.unwrap();
        assert_eq!(removed, 2);

        let stats = store.stats().await;
        assert_eq!(stats.hot.size, 0);
        assert_eq!(stats.routing.total, 0);
    }

    #[tokio::test]
    async fn archive_old_moves_aged_chunks_to_cold() {
        let store = test_store().await;
        store
            .add_documents("file-a", vec![("old chunk".to_string(), DocumentMetadata::new())])
            .await
            .unwrap();

        // FixedClock(1_000) + default archive_age_days=30 means everything
        // is "future" relative to the archive threshold; force=true ignores
        // age and archives regardless, exercising the capacity-pressure path.
        let stats = store.archive_old(true).await.unwrap();
        assert_eq!(stats.archived, 1);
        assert_eq!(stats.hot_after, 0);

        let search_results = store.search("old chunk", 5, None).await.unwrap();
        assert_eq!(search_results[0].doc_id, 1);
    }

    #[tokio::test]
    async fn filter_excludes_non_matching_metadata() {
        let store = test_store().await;
        let mut meta_a = DocumentMetadata::new();
        meta_a.insert("category".to_string(), "keep".into());
        let mut meta_b = DocumentMetadata::new();
        meta_b.insert("category".to_string(), "drop".into());

        store
            .add_documents(
                "file-a",
                vec![("alpha".to_string(), meta_a), ("beta".to_string(), meta_b)],
            )
            .await
            .unwrap();

        let filter = FilterPredicate::equals("category", "keep");
        let results = store.search("alpha beta", 10, Some(&filter)).await.unwrap();
        assert!(results.iter().all(|r| r
            .metadata
            .get("category")
            .map(|v| matches!(v, crate::filtering::MetadataValue::String(s) if s == "keep"))
            .unwrap_or(false)));
    }

    #[tokio::test]
    async fn reopen_after_close_preserves_documents() {
        let dir: Arc<dyn Directory> = Arc::new(MemoryDirectory::new());
        let doc_ids = {
            let store = GenerationalStore::open(
                test_config(),
                dir.clone(),
                Arc::new(StubEmbedder { dimension: 2 }),
                Arc::new(DefaultTokeniser),
                None,
                None,
                Arc::new(FixedClock(1_000)),
            )
            .await
            .unwrap();
            let ids = store
                .add_documents("file-a", vec![("persisted chunk".to_string(), DocumentMetadata::new())])
                .await
                .unwrap();
            store.close().await.unwrap();
            ids
        };

        let reopened = GenerationalStore::open(
            test_config(),
            dir,
            Arc::new(StubEmbedder { dimension: 2 }),
            Arc::new(DefaultTokeniser),
            None,
            None,
            Arc::new(FixedClock(2_000)),
        )
        .await
        .unwrap();

        let results = reopened.search("persisted chunk", 5, None).await.unwrap();
        assert_eq!(results[0].doc_id, doc_ids[0]);
    }

    #[tokio::test]
    async fn open_evicts_hot_entries_orphaned_by_a_crash_before_the_routing_write() {
        let dir: Arc<dyn Directory> = Arc::new(MemoryDirectory::new());
        let store = GenerationalStore::open(
            test_config(),
            dir.clone(),
            Arc::new(StubEmbedder { dimension: 2 }),
            Arc::new(DefaultTokeniser),
            None,
            None,
            Arc::new(FixedClock(1_000)),
        )
        .await
        .unwrap();

        let doc_ids = store
            .add_documents("file-a", vec![("orphan candidate".to_string(), DocumentMetadata::new())])
            .await
            .unwrap();

        // Simulate a crash between the ANN write and the routing-table
        // write: the routing record never lands, but the hot snapshot gets
        // persisted with the doc still live.
        store.routing.delete(doc_ids[0]).unwrap();
        store.persist_all().await.unwrap();

        let reopened = GenerationalStore::open(
            test_config(),
            dir,
            Arc::new(StubEmbedder { dimension: 2 }),
            Arc::new(DefaultTokeniser),
            None,
            None,
            Arc::new(FixedClock(2_000)),
        )
        .await
        .unwrap();

        let stats = reopened.stats().await;
        assert_eq!(
            stats.hot.size, 0,
            "a hot entry with no routing record must be evicted by the reconciliation pass at open"
        );
    }
}
