//! Metadata filtering and selectivity estimation.
//!
//! Generalises categorical-only filtering to the three primitive types a
//! chunk's metadata may hold (string, number, bool). Filters narrow a
//! search; they are evaluated after the oversampled ANN search returns
//! candidates, not pushed into the ANN backend itself.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::DocId;

/// A metadata value attached to a chunk.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum MetadataValue {
    String(String),
    Number(f64),
    Bool(bool),
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<f64> for MetadataValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<bool> for MetadataValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// A chunk's full metadata map.
pub type DocumentMetadata = HashMap<String, MetadataValue>;

/// A predicate over a chunk's metadata, used to narrow search results.
#[derive(Clone, Debug)]
pub enum FilterPredicate {
    /// Field must equal value.
    Equals { field: String, value: MetadataValue },
    /// All sub-predicates must match.
    And(Vec<FilterPredicate>),
    /// Any sub-predicate must match.
    Or(Vec<FilterPredicate>),
}

impl FilterPredicate {
    pub fn equals(field: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        Self::Equals {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Check whether `metadata` satisfies this predicate.
    pub fn matches(&self, metadata: &DocumentMetadata) -> bool {
        match self {
            Self::Equals { field, value } => metadata.get(field).is_some_and(|v| v == value),
            Self::And(predicates) => predicates.iter().all(|p| p.matches(metadata)),
            Self::Or(predicates) => predicates.iter().any(|p| p.matches(metadata)),
        }
    }
}

/// In-memory metadata storage keyed by `doc_id`, used for post-search
/// filtering and for estimating a filter's selectivity so the store knows
/// how aggressively to oversample candidates before filtering.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct MetadataStore {
    metadata: HashMap<DocId, DocumentMetadata>,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self {
            metadata: HashMap::new(),
        }
    }

    pub fn insert(&mut self, doc_id: DocId, metadata: DocumentMetadata) {
        self.metadata.insert(doc_id, metadata);
    }

    pub fn remove(&mut self, doc_id: DocId) {
        self.metadata.remove(&doc_id);
    }

    pub fn get(&self, doc_id: DocId) -> Option<&DocumentMetadata> {
        self.metadata.get(&doc_id)
    }

    pub fn matches(&self, doc_id: DocId, filter: &FilterPredicate) -> bool {
        self.metadata
            .get(&doc_id)
            .is_some_and(|m| filter.matches(m))
    }

    /// Fraction of stored documents matching `filter`, or `None` if the
    /// store is empty. Used to decide the oversample factor for a filtered
    /// search: low selectivity means more candidates must be pulled from
    /// the ANN backend before the post-filter step leaves `k` results.
    pub fn estimate_selectivity(&self, filter: &FilterPredicate) -> Option<f32> {
        if self.metadata.is_empty() {
            return None;
        }
        let matching = self
            .metadata
            .values()
            .filter(|m| filter.matches(m))
            .count();
        Some(matching as f32 / self.metadata.len() as f32)
    }

    pub fn len(&self) -> usize {
        self.metadata.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metadata.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DocId, &DocumentMetadata)> {
        self.metadata.iter()
    }

    pub fn from_entries(entries: HashMap<DocId, DocumentMetadata>) -> Self {
        Self { metadata: entries }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(pairs: &[(&str, MetadataValue)]) -> DocumentMetadata {
        pairs
            .iter()
            .cloned()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    #[test]
    fn equals_matches_on_field_and_value() {
        let m = meta(&[
            ("category", "laptop".into()),
            ("in_stock", MetadataValue::Bool(true)),
        ]);
        assert!(FilterPredicate::equals("category", "laptop").matches(&m));
        assert!(!FilterPredicate::equals("category", "phone").matches(&m));
        assert!(FilterPredicate::equals("in_stock", true).matches(&m));
    }

    #[test]
    fn and_or_composition() {
        let m = meta(&[("category", "laptop".into()), ("price", 999.0.into())]);
        let and = FilterPredicate::And(vec![
            FilterPredicate::equals("category", "laptop"),
            FilterPredicate::equals("price", 999.0),
        ]);
        assert!(and.matches(&m));

        let or = FilterPredicate::Or(vec![
            FilterPredicate::equals("category", "phone"),
            FilterPredicate::equals("price", 999.0),
        ]);
        assert!(or.matches(&m));
    }

    #[test]
    fn selectivity_estimation() {
        let mut store = MetadataStore::new();
        for i in 0..10u64 {
            let cat = if i < 3 { "laptop" } else { "phone" };
            store.insert(i, meta(&[("category", cat.into())]));
        }
        let sel = store
            .estimate_selectivity(&FilterPredicate::equals("category", "laptop"))
            .unwrap();
        assert!((sel - 0.3).abs() < 1e-6);
    }

    #[test]
    fn empty_store_has_no_selectivity_estimate() {
        let store = MetadataStore::new();
        assert!(store
            .estimate_selectivity(&FilterPredicate::equals("category", "laptop"))
            .is_none());
    }
}
