//! Store configuration.
//!
//! Mirrors the recognised options in spec.md §6. Validated fail-fast at
//! `GenerationalStore::open` — invalid values become `StoreError::ConfigError`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::ann::AnnType;
use crate::error::{StoreError, StoreResult};

/// Top-level store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// On-disk state root (`routing.db`, `hot/`, `cold/`, `bm25.bin`).
    pub root_dir: PathBuf,
    /// Embedding dimension; must equal the embedder's dimension.
    pub dimension: usize,
    /// If false, only Hot is created and archive is disabled (legacy single-tier mode).
    pub enable_generational_index: bool,
    /// Maximum number of vectors the Hot tier will hold before requiring archive.
    pub hot_index_max_size: usize,
    /// Backend type used for the Hot tier when the selector is not consulted.
    pub hot_index_type: Option<AnnType>,
    /// Backend type used for the Cold tier when the selector is not consulted.
    pub cold_index_type: Option<AnnType>,
    /// Age (in days) after which Hot records become eligible for archive.
    pub archive_age_days: i64,
    /// Cron-like schedule for the archive scheduler (default: daily at 02:00).
    pub archive_schedule: String,
    /// Oversample multiplier applied to `k` for the Hot-tier search.
    pub hot_search_oversample: f32,
    /// Oversample multiplier applied to `k` for the Cold-tier search.
    pub cold_search_oversample: f32,
    /// RRF weight for the Hot-tier ranked list.
    pub w_hot: f32,
    /// RRF weight for the Cold-tier ranked list.
    pub w_cold: f32,
    /// RRF weight for the BM25 ranked list.
    pub w_bm25: f32,
    /// Enable BM25 keyword retrieval alongside dense search.
    pub enable_bm25: bool,
    /// BM25 `k1` parameter.
    pub bm25_k1: f32,
    /// BM25 `b` parameter.
    pub bm25_b: f32,
    /// Enable cross-encoder reranking of the fused candidate pool.
    pub enable_reranker: bool,
    /// Number of fused candidates passed to the reranker.
    pub rerank_pool_size: usize,
    /// Consult the adaptive index selector at open and via the maintenance API.
    pub faiss_index_auto_select: bool,
    /// Advisory memory budget used by the selector to pick IVF-PQ vs IVF.
    pub memory_budget_mb: usize,
    /// Advisory latency target (ms) used to emit upgrade advisories.
    pub target_latency_ms: u64,
    /// If true, a backend-type mismatch at open forces an immediate rebuild
    /// instead of recording an advisory and keeping the saved structure.
    pub force_rebuild_on_open: bool,
    /// Per-request deadline.
    pub request_timeout_ms: u64,
    /// Maximum content length accepted for a single chunk, in bytes.
    pub max_chunk_bytes: usize,
    /// Batch size used when streaming the archive flow (spec.md §4.11).
    pub archive_batch_size: usize,
    /// Wall-clock budget for a single archive run, in seconds.
    pub archive_run_budget_secs: u64,
    /// Batch size used when streaming vectors during migration (spec.md §4.8).
    pub migration_batch_size: usize,
    /// Number of validation queries sampled during migration.
    pub migration_validation_queries: usize,
    /// Minimum recall@k required for a migration to pass validation.
    pub migration_recall_threshold: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("./genretrieve-data"),
            dimension: 1536,
            enable_generational_index: true,
            hot_index_max_size: 1_000_000,
            hot_index_type: None,
            cold_index_type: None,
            archive_age_days: 30,
            archive_schedule: "0 2 * * *".to_string(),
            hot_search_oversample: 0.7,
            cold_search_oversample: 0.5,
            w_hot: 0.7,
            w_cold: 0.3,
            w_bm25: 0.3,
            enable_bm25: true,
            bm25_k1: 1.2,
            bm25_b: 0.75,
            enable_reranker: false,
            rerank_pool_size: 20,
            faiss_index_auto_select: true,
            memory_budget_mb: 4096,
            target_latency_ms: 200,
            force_rebuild_on_open: false,
            request_timeout_ms: 30_000,
            max_chunk_bytes: 1_000_000,
            archive_batch_size: 1_000,
            archive_run_budget_secs: 30 * 60,
            migration_batch_size: 10_000,
            migration_validation_queries: 100,
            migration_recall_threshold: 0.9,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, falling back to defaults for
    /// absent fields, then validate.
    pub fn from_toml_str(s: &str) -> StoreResult<Self> {
        let cfg: Self =
            toml::from_str(s).map_err(|e| StoreError::ConfigError(format!("toml: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Fail-fast validation of cross-field invariants (spec.md §7 `ConfigError`).
    pub fn validate(&self) -> StoreResult<()> {
        if self.dimension == 0 {
            return Err(StoreError::ConfigError("dimension must be > 0".into()));
        }
        if self.w_hot < 0.0 || self.w_cold < 0.0 || self.w_bm25 < 0.0 {
            return Err(StoreError::ConfigError(
                "RRF weights must be non-negative".into(),
            ));
        }
        if self.hot_index_max_size == 0 {
            return Err(StoreError::ConfigError(
                "hot_index_max_size must be > 0".into(),
            ));
        }
        if self.hot_search_oversample <= 0.0 || self.cold_search_oversample <= 0.0 {
            return Err(StoreError::ConfigError(
                "oversample factors must be > 0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.migration_recall_threshold) {
            return Err(StoreError::ConfigError(
                "migration_recall_threshold must be in [0,1]".into(),
            ));
        }
        Ok(())
    }

    pub(crate) fn hot_dir(&self) -> PathBuf {
        self.root_dir.join("hot")
    }

    pub(crate) fn cold_dir(&self) -> PathBuf {
        self.root_dir.join("cold")
    }

    pub(crate) fn routing_path(&self) -> PathBuf {
        self.root_dir.join("routing.db")
    }

    pub(crate) fn bm25_path(&self) -> PathBuf {
        self.root_dir.join("bm25.bin")
    }
}
