//! Query-side retrieval strategies (spec.md §2 component K) and query
//! feature-based routing.
//!
//! `QueryRouter`/`QueryFeatures` below are a distinct concept from the
//! routing table (`crate::routing_table`): this is query-to-retriever
//! selection heuristics, not the durable `doc_id -> tier` mapping.

use std::collections::HashSet;

use crate::collaborators::TextGenerator;
use crate::error::{StoreError, StoreResult};
use crate::filtering::{DocumentMetadata, MetadataValue};
use crate::DocId;

/// Which query-side composition strategy to apply before embedding/search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalStrategy {
    /// Plain single-query dense search.
    Vector,
    /// Dense + BM25, fused (the store's default search path already does
    /// this when `enable_bm25` is set; this variant exists so callers can
    /// name it explicitly in a request).
    Hybrid,
    /// Hypothetical Document Embeddings: generate a hypothetical answer,
    /// embed and search with *that* instead of the raw query.
    HyDE,
    /// Query2Doc: generate a pseudo-document and append it to the original
    /// query before embedding.
    Query2Doc,
    /// Decompose the query into sub-questions, search each, fuse results.
    Decomposition,
    /// Search at child-chunk granularity, then collapse results up to
    /// their parent document via the `parent_id` metadata field.
    ParentChild,
}

/// One or more query texts to embed and search, to be fused via RRF by the
/// caller when more than one is returned.
pub struct QueryPlan {
    pub queries: Vec<String>,
}

const DECOMPOSITION_PROMPT_PREFIX: &str =
    "Break the following question into 2-4 simpler sub-questions, one per line:\n\n";
const HYDE_PROMPT_PREFIX: &str =
    "Write a short hypothetical passage that would answer this question:\n\n";
const QUERY2DOC_PROMPT_PREFIX: &str =
    "Write a short passage relevant to this query, to expand it with extra context:\n\n";

/// Builds a [`QueryPlan`] for a given strategy. Strategies that need a
/// generator (HyDE, Query2Doc, Decomposition) fall back to the plain query
/// when no `TextGenerator` is configured, rather than failing the search.
pub struct StrategyPlanner;

impl StrategyPlanner {
    pub async fn plan(
        strategy: RetrievalStrategy,
        query_text: &str,
        generator: Option<&dyn TextGenerator>,
    ) -> StoreResult<QueryPlan> {
        match strategy {
            RetrievalStrategy::Vector
            | RetrievalStrategy::Hybrid
            | RetrievalStrategy::ParentChild => Ok(QueryPlan {
                queries: vec![query_text.to_string()],
            }),

            RetrievalStrategy::HyDE => {
                let Some(generator) = generator else {
                    return Ok(QueryPlan {
                        queries: vec![query_text.to_string()],
                    });
                };
                let prompt = format!("{HYDE_PROMPT_PREFIX}{query_text}");
                let hypothetical = generator
                    .generate(&prompt)
                    .await
                    .map_err(StoreError::GenerationError)?;
                Ok(QueryPlan {
                    queries: vec![hypothetical],
                })
            }

            RetrievalStrategy::Query2Doc => {
                let Some(generator) = generator else {
                    return Ok(QueryPlan {
                        queries: vec![query_text.to_string()],
                    });
                };
                let prompt = format!("{QUERY2DOC_PROMPT_PREFIX}{query_text}");
                let pseudo_doc = generator
                    .generate(&prompt)
                    .await
                    .map_err(StoreError::GenerationError)?;
                Ok(QueryPlan {
                    queries: vec![format!("{query_text} {pseudo_doc}")],
                })
            }

            RetrievalStrategy::Decomposition => {
                let Some(generator) = generator else {
                    return Ok(QueryPlan {
                        queries: vec![query_text.to_string()],
                    });
                };
                let prompt = format!("{DECOMPOSITION_PROMPT_PREFIX}{query_text}");
                let response = generator
                    .generate(&prompt)
                    .await
                    .map_err(StoreError::GenerationError)?;
                let sub_questions: Vec<String> = response
                    .lines()
                    .map(|l| l.trim().trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c == '-' || c == ' '))
                    .map(|l| l.to_string())
                    .filter(|l| !l.is_empty())
                    .collect();
                if sub_questions.is_empty() {
                    Ok(QueryPlan {
                        queries: vec![query_text.to_string()],
                    })
                } else {
                    Ok(QueryPlan {
                        queries: sub_questions,
                    })
                }
            }
        }
    }

    /// Post-process ParentChild results: map each matched child `doc_id` up
    /// to its `parent_id` (falling back to itself if absent), deduplicating
    /// while preserving rank order.
    pub fn collapse_to_parents<'a>(
        ranked_doc_ids: impl Iterator<Item = DocId>,
        metadata_of: impl Fn(DocId) -> Option<&'a DocumentMetadata>,
    ) -> Vec<DocId> {
        let mut seen = HashSet::new();
        let mut collapsed = Vec::new();
        for doc_id in ranked_doc_ids {
            let parent = metadata_of(doc_id)
                .and_then(|m| m.get("parent_id"))
                .and_then(|v| match v {
                    MetadataValue::Number(n) => Some(*n as DocId),
                    _ => None,
                })
                .unwrap_or(doc_id);
            if seen.insert(parent) {
                collapsed.push(parent);
            }
        }
        collapsed
    }
}

/// Features extracted from a query's terms, used to pick a retriever.
#[derive(Debug, Clone)]
pub struct QueryFeatures {
    pub length: usize,
    pub complexity: f32,
    pub query_type: QueryType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    Keyword,
    Semantic,
    Hybrid,
    Unknown,
}

impl QueryFeatures {
    pub fn from_terms(terms: &[String]) -> Self {
        let length = terms.len();
        let complexity = Self::estimate_complexity(terms);
        let query_type = Self::classify_query_type(terms, complexity);
        Self {
            length,
            complexity,
            query_type,
        }
    }

    fn estimate_complexity(terms: &[String]) -> f32 {
        if terms.is_empty() {
            return 0.0;
        }
        let unique: HashSet<&String> = terms.iter().collect();
        unique.len() as f32 / terms.len() as f32
    }

    fn classify_query_type(terms: &[String], complexity: f32) -> QueryType {
        if terms.is_empty() {
            return QueryType::Unknown;
        }
        let avg_length: f32 = terms.iter().map(|t| t.len() as f32).sum::<f32>() / terms.len() as f32;
        if complexity > 0.8 && avg_length > 5.0 {
            QueryType::Semantic
        } else if complexity < 0.5 && avg_length < 4.0 {
            QueryType::Keyword
        } else {
            QueryType::Hybrid
        }
    }
}

/// Suggests a [`RetrievalStrategy`] from query features. A heuristic, not
/// a trained model — good enough to pick a sensible default when the
/// caller doesn't name a strategy explicitly.
#[derive(Debug, Clone, Default)]
pub struct QueryRouter;

impl QueryRouter {
    pub fn new() -> Self {
        Self
    }

    pub fn suggest(&self, features: &QueryFeatures) -> RetrievalStrategy {
        match features.query_type {
            QueryType::Keyword => RetrievalStrategy::Hybrid,
            QueryType::Semantic => RetrievalStrategy::Vector,
            QueryType::Hybrid => RetrievalStrategy::Hybrid,
            QueryType::Unknown => RetrievalStrategy::Vector,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct StubGenerator(String);

    #[async_trait]
    impl TextGenerator for StubGenerator {
        async fn generate(&self, _prompt: &str) -> Result<String, String> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn vector_strategy_is_a_single_unmodified_query() {
        let plan = StrategyPlanner::plan(RetrievalStrategy::Vector, "hello", None)
            .await
            .unwrap();
        assert_eq!(plan.queries, vec!["hello".to_string()]);
    }

    #[tokio::test]
    async fn hyde_without_generator_falls_back_to_plain_query() {
        let plan = StrategyPlanner::plan(RetrievalStrategy::HyDE, "hello", None)
            .await
            .unwrap();
        assert_eq!(plan.queries, vec!["hello".to_string()]);
    }

    #[tokio::test]
    async fn hyde_with_generator_embeds_the_hypothetical_document() {
        let generator = StubGenerator("a hypothetical answer".into());
        let plan = StrategyPlanner::plan(RetrievalStrategy::HyDE, "hello", Some(&generator))
            .await
            .unwrap();
        assert_eq!(plan.queries, vec!["a hypothetical answer".to_string()]);
    }

    #[tokio::test]
    async fn decomposition_splits_on_lines() {
        let generator = StubGenerator("sub one\nsub two".into());
        let plan = StrategyPlanner::plan(RetrievalStrategy::Decomposition, "q", Some(&generator))
            .await
            .unwrap();
        assert_eq!(plan.queries, vec!["sub one".to_string(), "sub two".to_string()]);
    }

    #[test]
    fn collapse_to_parents_dedupes_siblings() {
        let mut meta_a = DocumentMetadata::new();
        meta_a.insert("parent_id".to_string(), MetadataValue::Number(100.0));
        let mut meta_b = DocumentMetadata::new();
        meta_b.insert("parent_id".to_string(), MetadataValue::Number(100.0));

        let lookup = |doc_id: DocId| -> Option<&DocumentMetadata> {
            match doc_id {
                1 => Some(&meta_a),
                2 => Some(&meta_b),
                _ => None,
            }
        };

        let collapsed = StrategyPlanner::collapse_to_parents(vec![1, 2, 3].into_iter(), lookup);
        assert_eq!(collapsed, vec![100, 3]);
    }

    #[test]
    fn router_suggests_hybrid_for_keyword_queries() {
        let router = QueryRouter::new();
        let features = QueryFeatures::from_terms(&["the".into(), "cat".into()]);
        assert_eq!(router.suggest(&features), RetrievalStrategy::Hybrid);
    }
}
