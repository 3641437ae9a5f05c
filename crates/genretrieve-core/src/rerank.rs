//! Cross-encoder reranking of a fused candidate pool (spec.md §4.10).
//!
//! The cross-encoder is heavy to load, so it's wrapped lazily — nothing
//! calls into the collaborator until the first `rerank`. Batches of 32
//! keep a single slow/unavailable call from blocking the whole pool;
//! on any failure reranking is skipped and the fused order is returned
//! unchanged, with an advisory flag the caller can surface.

use std::sync::Arc;

use crate::collaborators::CrossEncoder;
use crate::fusion::FusedResult;
use crate::DocId;

pub const DEFAULT_BATCH_SIZE: usize = 32;
pub const DEFAULT_RERANK_POOL_SIZE: usize = 20;

/// A fused candidate plus the text the cross-encoder scores it against.
pub struct RerankCandidate {
    pub doc_id: DocId,
    pub text: String,
    pub fused: FusedResult,
}

#[derive(Debug, Clone, Copy)]
pub struct RerankedResult {
    pub doc_id: DocId,
    pub score: f32,
}

/// Outcome of a rerank attempt: either the cross-encoder's ordering, or a
/// fallback signal telling the caller to keep the fused order.
pub enum RerankOutcome {
    Reranked(Vec<RerankedResult>),
    FellBackToFusedOrder { reason: String },
}

pub struct Reranker {
    cross_encoder: Arc<dyn CrossEncoder>,
    batch_size: usize,
}

impl Reranker {
    pub fn new(cross_encoder: Arc<dyn CrossEncoder>) -> Self {
        Self {
            cross_encoder,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Rescore `candidates` against `query`, batching through the
    /// cross-encoder. On any batch failure, the whole rerank is aborted
    /// and the caller should fall back to the fused ranking — a partial
    /// rerank would be a confusing, order-inconsistent result.
    pub async fn rerank(&self, query: &str, candidates: Vec<RerankCandidate>) -> RerankOutcome {
        if candidates.is_empty() {
            return RerankOutcome::Reranked(Vec::new());
        }

        let mut scored = Vec::with_capacity(candidates.len());
        for batch in candidates.chunks(self.batch_size) {
            let pairs: Vec<(String, String)> = batch
                .iter()
                .map(|c| (query.to_string(), c.text.clone()))
                .collect();

            match self.cross_encoder.score(&pairs).await {
                Ok(scores) if scores.len() == batch.len() => {
                    for (candidate, score) in batch.iter().zip(scores) {
                        scored.push(RerankedResult {
                            doc_id: candidate.doc_id,
                            score,
                        });
                    }
                }
                Ok(_) => {
                    return RerankOutcome::FellBackToFusedOrder {
                        reason: "cross-encoder returned a mismatched score count".into(),
                    };
                }
                Err(e) => {
                    return RerankOutcome::FellBackToFusedOrder {
                        reason: format!("cross-encoder unavailable: {e}"),
                    };
                }
            }
        }

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        RerankOutcome::Reranked(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct StubEncoder {
        fail: bool,
    }

    #[async_trait]
    impl CrossEncoder for StubEncoder {
        async fn score(&self, pairs: &[(String, String)]) -> Result<Vec<f32>, String> {
            if self.fail {
                return Err("model not loaded".into());
            }
            Ok(pairs
                .iter()
                .map(|(_, doc)| doc.len() as f32)
                .collect())
        }
    }

    fn candidate(doc_id: DocId, text: &str) -> RerankCandidate {
        RerankCandidate {
            doc_id,
            text: text.to_string(),
            fused: FusedResult {
                doc_id,
                rrf_score: 0.0,
                distance: None,
            },
        }
    }

    #[tokio::test]
    async fn reranks_by_descending_cross_encoder_score() {
        let reranker = Reranker::new(Arc::new(StubEncoder { fail: false }));
        let candidates = vec![candidate(1, "a"), candidate(2, "longer text")];
        match reranker.rerank("query", candidates).await {
            RerankOutcome::Reranked(results) => {
                assert_eq!(results[0].doc_id, 2);
            }
            RerankOutcome::FellBackToFusedOrder { .. } => panic!("expected success"),
        }
    }

    #[tokio::test]
    async fn falls_back_to_fused_order_on_encoder_failure() {
        let reranker = Reranker::new(Arc::new(StubEncoder { fail: true }));
        let candidates = vec![candidate(1, "a")];
        match reranker.rerank("query", candidates).await {
            RerankOutcome::FellBackToFusedOrder { .. } => {}
            RerankOutcome::Reranked(_) => panic!("expected fallback"),
        }
    }
}
