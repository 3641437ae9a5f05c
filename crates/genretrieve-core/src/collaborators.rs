//! Injected external collaborators.
//!
//! The store never instantiates model clients, tokenisers, or storage
//! backends itself — it depends only on these trait objects. Production
//! callers plug in their own embedding service, generator, and reranker;
//! tests plug in fixtures.

use async_trait::async_trait;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Produces dense embeddings for text.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, preserving order. Implementations should
    /// batch internally rather than requiring the caller to chunk.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, String>;

    /// Dimension of vectors this embedder produces.
    fn dimension(&self) -> usize;
}

/// Splits text into tokens for the BM25 inverted index.
pub trait Tokeniser: Send + Sync {
    /// Lowercases, strips punctuation, and splits; implementation-defined
    /// beyond that contract.
    fn tokenise(&self, text: &str) -> Vec<String>;
}

/// Default whitespace/punctuation tokeniser, used when no custom
/// `Tokeniser` is supplied.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultTokeniser;

impl Tokeniser for DefaultTokeniser {
    fn tokenise(&self, text: &str) -> Vec<String> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_lowercase())
            .collect()
    }
}

/// Generates free text from a prompt, used by HyDE/Query2Doc strategies.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, String>;
}

/// Scores (query, document) pairs for reranking.
#[async_trait]
pub trait CrossEncoder: Send + Sync {
    /// Score `pairs` as `(query, document_text)`; output order matches input.
    /// Implementations should batch internally (spec.md §4.10: batches of 32).
    async fn score(&self, pairs: &[(String, String)]) -> Result<Vec<f32>, String>;
}

/// Wall-clock source, injected so tests can control "now".
pub trait Clock: Send + Sync {
    fn now_unix_secs(&self) -> i64;
}

/// `Clock` backed by `SystemTime::now()`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix_secs(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }
}

/// Fixed clock for deterministic tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub i64);

impl Clock for FixedClock {
    fn now_unix_secs(&self) -> i64 {
        self.0
    }
}

impl fmt::Debug for dyn Embedder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Embedder(dim={})", self.dimension())
    }
}
