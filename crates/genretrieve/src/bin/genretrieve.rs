use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use genretrieve::prelude::*;
use genretrieve::core::collaborators::Embedder;

#[derive(Parser)]
#[command(author, version, about = "Generational ANN store for RAG vector retrieval", long_about = None)]
struct Cli {
    /// On-disk root directory for the store's state.
    #[arg(long, global = true, default_value = "./genretrieve-data")]
    root: PathBuf,

    /// Embedding dimension used by the built-in hashing embedder.
    #[arg(long, global = true, default_value_t = 256)]
    dimension: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a text file as one or more chunks (split on blank lines).
    Add {
        /// Identifier this file's chunks are grouped under for later deletion.
        file_id: String,
        /// Path to the text file to ingest.
        path: PathBuf,
    },
    /// Run a search query against the store.
    Search {
        query: String,
        #[arg(short, default_value_t = 10)]
        k: usize,
        /// Retrieval strategy: vector, hybrid, hyde, query2doc, decomposition, parent-child.
        #[arg(long, default_value = "vector")]
        strategy: String,
    },
    /// Remove every chunk ingested under a file id.
    Delete { file_id: String },
    /// Force an immediate archive pass.
    Archive,
    /// Print Hot/Cold/routing statistics.
    Stats,
}

/// A feature-hashing embedder: no model download, no network call, just a
/// deterministic bag-of-words hashed into a fixed-width vector. Good enough
/// for exercising the store end to end; production callers are expected to
/// supply a real `Embedder` (see [`genretrieve::Engine::open`]).
struct HashingEmbedder {
    dimension: usize,
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, String> {
        Ok(texts.iter().map(|t| self.hash_vector(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

impl HashingEmbedder {
    fn hash_vector(&self, text: &str) -> Vec<f32> {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut v = vec![0.0f32; self.dimension];
        for token in text.split_whitespace() {
            let mut hasher = DefaultHasher::new();
            token.to_lowercase().hash(&mut hasher);
            let bucket = (hasher.finish() as usize) % self.dimension;
            v[bucket] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in v.iter_mut() {
                *x /= norm;
            }
        }
        v
    }
}

fn parse_strategy(s: &str) -> RetrievalStrategy {
    match s {
        "hybrid" => RetrievalStrategy::Hybrid,
        "hyde" => RetrievalStrategy::HyDE,
        "query2doc" => RetrievalStrategy::Query2Doc,
        "decomposition" => RetrievalStrategy::Decomposition,
        "parent-child" => RetrievalStrategy::ParentChild,
        _ => RetrievalStrategy::Vector,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let config = Config {
        root_dir: cli.root.clone(),
        dimension: cli.dimension,
        ..Config::default()
    };
    let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder {
        dimension: cli.dimension,
    });
    let engine = Engine::open(config, embedder, None, None)
        .await
        .context("opening genretrieve store")?;
    let store = engine.store;

    match cli.command {
        Commands::Add { file_id, path } => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let chunks: Vec<(String, DocumentMetadata)> = text
                .split("\n\n")
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(|s| (s.to_string(), DocumentMetadata::new()))
                .collect();
            let doc_ids = store.add_documents(&file_id, chunks).await?;
            println!("ingested {} chunks under {file_id:?}: {doc_ids:?}", doc_ids.len());
        }
        Commands::Search { query, k, strategy } => {
            let results = store
                .search_with_strategy(parse_strategy(&strategy), &query, k, None)
                .await?;
            for r in results {
                println!("{:>8.4}  doc={}  reranked={}", r.score, r.doc_id, r.reranked);
            }
        }
        Commands::Delete { file_id } => {
            let removed = store.delete_by_file(&file_id).await?;
            println!("removed {removed} chunks for {file_id:?}");
        }
        Commands::Archive => {
            let stats = store.archive_old(false).await?;
            println!(
                "archived {} chunks ({} -> {} hot, budget_exhausted={})",
                stats.archived, stats.hot_before, stats.hot_after, stats.budget_exhausted
            );
        }
        Commands::Stats => {
            let stats = store.stats().await;
            println!(
                "hot: {}/{} ({} tombstones, {})",
                stats.hot.size, stats.hot.max_size, stats.hot.tombstones, stats.hot.ann_type
            );
            println!(
                "cold: {} ({} soft-deleted, rate={:.3}, {})",
                stats.cold.size, stats.cold.soft_deleted, stats.cold.deletion_rate, stats.cold.ann_type
            );
            println!(
                "routing: {} total, needs_archive={}, needs_cold_rebuild={}",
                stats.routing.total, stats.needs_archive, stats.needs_cold_rebuild
            );
        }
    }

    store.close().await?;
    Ok(())
}
