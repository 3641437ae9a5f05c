//! End-to-end tests exercising `GenerationalStore` through its public API
//! rather than individual modules: ingest/search/delete, archive, hybrid
//! fusion, online migration, reranker fallback, and crash recovery.

use std::sync::Arc;

use async_trait::async_trait;
use genretrieve_core::ann::AnnType;
use genretrieve_core::collaborators::{CrossEncoder, DefaultTokeniser, Embedder, FixedClock};
use genretrieve_core::config::Config;
use genretrieve_core::filtering::DocumentMetadata;
use genretrieve_core::persistence::{Directory, FsDirectory, MemoryDirectory, Tier};
use genretrieve_core::store::GenerationalStore;

/// Embeds a short bag-of-words signature so documents sharing a word end up
/// near one another in vector space; good enough to make dense search
/// behaviour observable without a real model.
struct WordSumEmbedder;

#[async_trait]
impl Embedder for WordSumEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, String> {
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = vec![0.0f32; 4];
                for (i, word) in t.split_whitespace().enumerate() {
                    let bucket = i % 4;
                    v[bucket] += word.bytes().map(|b| b as f32).sum::<f32>();
                }
                v
            })
            .collect())
    }

    fn dimension(&self) -> usize {
        4
    }
}

struct AlwaysFailingCrossEncoder;

#[async_trait]
impl CrossEncoder for AlwaysFailingCrossEncoder {
    async fn score(&self, _pairs: &[(String, String)]) -> Result<Vec<f32>, String> {
        Err("cross-encoder endpoint unreachable".into())
    }
}

fn base_config(root: std::path::PathBuf) -> Config {
    Config {
        root_dir: root,
        dimension: 4,
        hot_index_max_size: 1_000,
        enable_bm25: true,
        faiss_index_auto_select: false,
        hot_index_type: Some(AnnType::Flat),
        cold_index_type: Some(AnnType::Flat),
        archive_age_days: 30,
        migration_batch_size: 100,
        migration_validation_queries: 5,
        ..Config::default()
    }
}

async fn open_memory_store(config: Config) -> Arc<GenerationalStore> {
    let dir: Arc<dyn Directory> = Arc::new(MemoryDirectory::new());
    GenerationalStore::open(
        config,
        dir,
        Arc::new(WordSumEmbedder),
        Arc::new(DefaultTokeniser),
        None,
        None,
        Arc::new(FixedClock(10_000)),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn ingest_search_delete_round_trip() {
    let store = open_memory_store(base_config("./unused".into())).await;

    let doc_ids = store
        .add_documents(
            "manual.pdf",
            vec![
                ("the quick brown fox".to_string(), DocumentMetadata::new()),
                ("jumps over the lazy dog".to_string(), DocumentMetadata::new()),
            ],
        )
        .await
        .unwrap();
    assert_eq!(doc_ids.len(), 2);

    let results = store.search("the quick brown fox", 5, None).await.unwrap();
    assert_eq!(results[0].doc_id, doc_ids[0]);

    let removed = store.delete_by_file("manual.pdf").await.unwrap();
    assert_eq!(removed, 2);

    let after_delete = store.search("the quick brown fox", 5, None).await.unwrap();
    assert!(after_delete.is_empty());
}

#[tokio::test]
async fn archive_moves_chunks_to_cold_and_search_still_finds_them() {
    let mut config = base_config("./unused".into());
    config.hot_index_max_size = 2;
    let store = open_memory_store(config).await;

    store
        .add_documents(
            "report.pdf",
            vec![
                ("alpha document".to_string(), DocumentMetadata::new()),
                ("beta document".to_string(), DocumentMetadata::new()),
            ],
        )
        .await
        .unwrap();

    // A third chunk overflows hot_index_max_size=2, forcing a synchronous
    // archive pass before insertion.
    store
        .add_documents("report.pdf", vec![("gamma document".to_string(), DocumentMetadata::new())])
        .await
        .unwrap();

    let stats = store.stats().await;
    assert!(stats.cold.size > 0, "expected some chunks archived to cold");
    assert_eq!(stats.hot.size + stats.cold.size, 3);

    let results = store.search("alpha document", 5, None).await.unwrap();
    assert!(!results.is_empty());
}

#[tokio::test]
async fn hybrid_search_surfaces_keyword_only_matches_via_bm25() {
    let store = open_memory_store(base_config("./unused".into())).await;

    // "xylophone" never appears paired with another document's words, so
    // the toy embedder places it far from everything else in vector space;
    // only BM25 gives it a chance to surface.
    store
        .add_documents(
            "glossary.pdf",
            vec![
                ("common overlapping terms here".to_string(), DocumentMetadata::new()),
                ("xylophone".to_string(), DocumentMetadata::new()),
            ],
        )
        .await
        .unwrap();

    let results = store.search("xylophone", 5, None).await.unwrap();
    assert!(
        results.iter().any(|r| r.doc_id == 2),
        "expected the keyword-only document to be found via BM25 fusion"
    );
}

#[tokio::test]
async fn online_migration_preserves_nearest_neighbour_results() {
    let store = open_memory_store(base_config("./unused".into())).await;

    let mut chunks = Vec::new();
    for i in 0..8 {
        chunks.push((format!("cluster one doc {i}"), DocumentMetadata::new()));
    }
    store.add_documents("set-a", chunks).await.unwrap();

    let before = store.search("cluster one doc 0", 3, None).await.unwrap();

    let status = store.migrate_tier(Tier::Hot, AnnType::Ivf).await.unwrap();
    assert_eq!(status.to, AnnType::Ivf);

    let stats = store.stats().await;
    assert_eq!(stats.hot.ann_type, AnnType::Ivf);

    let after = store.search("cluster one doc 0", 3, None).await.unwrap();
    assert_eq!(before[0].doc_id, after[0].doc_id);
}

#[tokio::test]
async fn reranker_failure_falls_back_to_fused_order_without_erroring() {
    let mut config = base_config("./unused".into());
    config.enable_reranker = true;
    let dir: Arc<dyn Directory> = Arc::new(MemoryDirectory::new());
    let store = GenerationalStore::open(
        config,
        dir,
        Arc::new(WordSumEmbedder),
        Arc::new(DefaultTokeniser),
        None,
        Some(Arc::new(AlwaysFailingCrossEncoder)),
        Arc::new(FixedClock(10_000)),
    )
    .await
    .unwrap();

    store
        .add_documents("doc.pdf", vec![("hello reranking world".to_string(), DocumentMetadata::new())])
        .await
        .unwrap();

    let results = store.search("hello reranking world", 5, None).await.unwrap();
    assert!(!results.is_empty());
    assert!(!results[0].reranked, "a failed cross-encoder call must not be reported as reranked");
}

#[tokio::test]
async fn reopening_the_store_after_a_crash_recovers_all_state() {
    let tmp = tempfile::tempdir().unwrap();
    let config = base_config(tmp.path().to_path_buf());

    let doc_ids = {
        let dir: Arc<dyn Directory> = Arc::new(FsDirectory::new(tmp.path().to_path_buf()).unwrap());
        let store = GenerationalStore::open(
            config.clone(),
            dir,
            Arc::new(WordSumEmbedder),
            Arc::new(DefaultTokeniser),
            None,
            None,
            Arc::new(FixedClock(10_000)),
        )
        .await
        .unwrap();
        let ids = store
            .add_documents("durable.pdf", vec![("durability matters here".to_string(), DocumentMetadata::new())])
            .await
            .unwrap();
        // No explicit close(): simulates a crash before the hot/cold
        // snapshot and the BM25 background flush ever run. Only the
        // routing log and the content blob (both written synchronously by
        // add_documents) survive; the reopen's BM25 catch-up pass is what
        // rebuilds the keyword index from the recovered content.
        ids
    };

    let dir: Arc<dyn Directory> = Arc::new(FsDirectory::new(tmp.path().to_path_buf()).unwrap());
    let reopened = GenerationalStore::open(
        config,
        dir,
        Arc::new(WordSumEmbedder),
        Arc::new(DefaultTokeniser),
        None,
        None,
        Arc::new(FixedClock(20_000)),
    )
    .await
    .unwrap();

    let results = reopened.search("durability matters here", 5, None).await.unwrap();
    assert_eq!(results[0].doc_id, doc_ids[0]);
}
