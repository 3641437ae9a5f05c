//! BM25 keyword retrieval.
//!
//! An in-memory inverted index with Okapi BM25 scoring, kept in sync with
//! the vector tiers by [`manager::Bm25IndexManager`].
//!
//! ```text
//! BM25(q, d) = Σ IDF(q_i) * f(q_i, d) * (k1 + 1)
//!              ─────────────────────────────────────
//!              f(q_i, d) + k1 * (1 - b + b * |d| / avgdl)
//! ```

pub mod manager;

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::DocId;

/// BM25 tuning parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Bm25Params {
    pub k1: f32,
    pub b: f32,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.2, b: 0.75 }
    }
}

/// Inverted index over tokenised chunk content.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct InvertedIndex {
    /// term -> (doc_id -> term frequency)
    postings: HashMap<String, HashMap<DocId, u32>>,
    doc_lengths: HashMap<DocId, u32>,
    num_docs: u32,
    avg_doc_length: f32,
    doc_frequencies: HashMap<String, u32>,

    /// Lazily recomputed; cleared whenever the corpus changes.
    #[serde(skip)]
    precomputed_idf: RefCell<HashMap<String, f32>>,
    #[serde(skip)]
    idf_computed_at_num_docs: RefCell<u32>,
}

impl InvertedIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_document(&mut self, doc_id: DocId, terms: &[String]) {
        let doc_length = terms.len() as u32;
        self.doc_lengths.insert(doc_id, doc_length);

        let mut term_freqs: HashMap<String, u32> = HashMap::new();
        for term in terms {
            *term_freqs.entry(term.clone()).or_insert(0) += 1;
        }
        for (term, freq) in term_freqs {
            self.postings.entry(term.clone()).or_default().insert(doc_id, freq);
            *self.doc_frequencies.entry(term).or_insert(0) += 1;
        }

        self.num_docs += 1;
        self.update_avg_doc_length();
        self.invalidate_idf();
    }

    /// Remove a document's postings entirely (used by delete-by-file).
    pub fn remove_document(&mut self, doc_id: DocId) {
        if self.doc_lengths.remove(&doc_id).is_none() {
            return;
        }
        self.postings.retain(|term, docs| {
            if docs.remove(&doc_id).is_some() {
                let still_present = !docs.is_empty();
                if !still_present {
                    self.doc_frequencies.remove(term);
                } else if let Some(df) = self.doc_frequencies.get_mut(term) {
                    *df = df.saturating_sub(1);
                }
            }
            !docs.is_empty()
        });
        self.num_docs = self.num_docs.saturating_sub(1);
        self.update_avg_doc_length();
        self.invalidate_idf();
    }

    fn update_avg_doc_length(&mut self) {
        let total: u32 = self.doc_lengths.values().sum();
        self.avg_doc_length = if self.num_docs > 0 {
            total as f32 / self.num_docs as f32
        } else {
            0.0
        };
    }

    fn invalidate_idf(&mut self) {
        self.precomputed_idf.borrow_mut().clear();
        *self.idf_computed_at_num_docs.borrow_mut() = 0;
    }

    fn ensure_idf_computed(&self) {
        let computed_at = *self.idf_computed_at_num_docs.borrow();
        if computed_at == self.num_docs && !self.precomputed_idf.borrow().is_empty() {
            return;
        }
        let mut idf_map = self.precomputed_idf.borrow_mut();
        idf_map.clear();
        let n = self.num_docs as f32;
        for (term, df) in &self.doc_frequencies {
            let df_f = *df as f32;
            if df_f > 0.0 {
                idf_map.insert(term.clone(), ((n - df_f + 0.5) / (df_f + 0.5) + 1.0).ln());
            }
        }
        *self.idf_computed_at_num_docs.borrow_mut() = self.num_docs;
    }

    pub fn num_docs(&self) -> u32 {
        self.num_docs
    }

    pub fn idf(&self, term: &str) -> f32 {
        self.ensure_idf_computed();
        if let Some(&idf) = self.precomputed_idf.borrow().get(term) {
            return idf;
        }
        let df = self.doc_frequencies.get(term).copied().unwrap_or(0) as f32;
        if df == 0.0 {
            return 0.0;
        }
        let n = self.num_docs as f32;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    pub fn score(&self, doc_id: DocId, query_terms: &[String], params: Bm25Params) -> f32 {
        if self.avg_doc_length == 0.0 {
            return 0.0;
        }
        let doc_length = self.doc_lengths.get(&doc_id).copied().unwrap_or(0) as f32;
        let mut score = 0.0;
        for term in query_terms {
            let idf = self.idf(term);
            if idf == 0.0 {
                continue;
            }
            let tf = self
                .postings
                .get(term)
                .and_then(|p| p.get(&doc_id))
                .copied()
                .unwrap_or(0) as f32;
            if tf == 0.0 {
                continue;
            }
            let numerator = tf * (params.k1 + 1.0);
            let denominator =
                tf + params.k1 * (1.0 - params.b + params.b * doc_length / self.avg_doc_length);
            score += idf * (numerator / denominator);
        }
        score
    }

    /// Top-k documents for `query_terms`, sorted by score descending.
    pub fn retrieve(&self, query_terms: &[String], k: usize, params: Bm25Params) -> Vec<(DocId, f32)> {
        if query_terms.is_empty() || self.num_docs == 0 || k == 0 {
            return Vec::new();
        }
        self.ensure_idf_computed();

        let mut candidates: Vec<DocId> = Vec::new();
        let mut seen: HashSet<DocId> = HashSet::new();
        for term in query_terms {
            if let Some(postings) = self.postings.get(term) {
                for &doc_id in postings.keys() {
                    if seen.insert(doc_id) {
                        candidates.push(doc_id);
                    }
                }
            }
        }

        let mut scored: Vec<(DocId, f32)> = candidates
            .into_iter()
            .map(|doc_id| (doc_id, self.score(doc_id, query_terms, params)))
            .filter(|(_, score)| *score > 0.0)
            .collect();
        scored.sort_unstable_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_term_match_ranks_highest() {
        let mut idx = InvertedIndex::new();
        idx.add_document(1, &["machine".into(), "learning".into()]);
        idx.add_document(2, &["artificial".into(), "intelligence".into()]);

        let results = idx.retrieve(&["machine".into(), "learning".into()], 10, Bm25Params::default());
        assert_eq!(results[0].0, 1);
    }

    #[test]
    fn remove_document_drops_its_postings() {
        let mut idx = InvertedIndex::new();
        idx.add_document(1, &["rust".into()]);
        idx.add_document(2, &["rust".into(), "lang".into()]);
        idx.remove_document(1);
        assert_eq!(idx.num_docs(), 1);
        let results = idx.retrieve(&["rust".into()], 10, Bm25Params::default());
        assert!(results.iter().all(|(id, _)| *id != 1));
    }
}
