//! Adaptive index selector: picks an ANN backend from corpus size, memory
//! budget, and a latency target (spec.md §4.2). Consulted only at store
//! open and by the maintenance API — runtime backend changes go through
//! the migrator, not this module.

use crate::ann::{AnnParams, AnnType};

/// Inputs to a selection decision.
#[derive(Debug, Clone, Copy)]
pub struct SelectorInput {
    pub vector_count: usize,
    pub dimension: usize,
    pub memory_budget_bytes: u64,
    pub target_latency_ms: u64,
}

/// The chosen backend type plus the parameters the decision rule derived
/// for it.
#[derive(Debug, Clone)]
pub struct Selection {
    pub ann_type: AnnType,
    pub params: AnnParams,
}

/// An advisory that the current backend no longer matches what the
/// decision rule would choose for the observed corpus size/latency.
/// Advisory only — never auto-migrates.
#[derive(Debug, Clone)]
pub struct UpgradeAdvisory {
    pub current: AnnType,
    pub recommended: AnnType,
    pub reason: String,
}

pub struct AdaptiveIndexSelector {
    rolling_avg_latency_ms: f64,
    observations: u64,
}

impl Default for AdaptiveIndexSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl AdaptiveIndexSelector {
    pub fn new() -> Self {
        Self {
            rolling_avg_latency_ms: 0.0,
            observations: 0,
        }
    }

    /// Run the corpus-size-driven decision rule. `user_override`, if set,
    /// always wins.
    pub fn select(input: SelectorInput, user_override: Option<AnnType>) -> Selection {
        if let Some(ann_type) = user_override {
            return Selection {
                ann_type,
                params: AnnParams::default(),
            };
        }

        let mut params = AnnParams::default();
        let ann_type = if input.vector_count < 10_000 {
            AnnType::Flat
        } else if input.vector_count < 100_000 {
            let nlist = clamp_sqrt(input.vector_count, 16, 256);
            params.nlist = nlist;
            params.nprobe = (nlist / 10).max(1);
            AnnType::Ivf
        } else if input.vector_count < 1_000_000 {
            let raw_memory_bytes = input.vector_count as u64 * input.dimension as u64 * 4;
            if raw_memory_bytes as f64 > 0.5 * input.memory_budget_bytes as f64 {
                params.m = nearest_power_of_2_divisor(input.dimension).min(64);
                params.nbits = 8;
                AnnType::IvfPq
            } else {
                let nlist = clamp_sqrt(input.vector_count, 16, 256);
                params.nlist = nlist;
                params.nprobe = (nlist / 10).max(1);
                AnnType::Ivf
            }
        } else {
            params.hnsw_m = 32;
            params.ef_construction = 200;
            params.ef_search = 64;
            AnnType::Hnsw
        };

        Selection { ann_type, params }
    }

    /// Record one search's latency into the rolling average used for
    /// upgrade advisories.
    pub fn record_latency(&mut self, latency_ms: f64) {
        self.observations += 1;
        let n = self.observations as f64;
        self.rolling_avg_latency_ms += (latency_ms - self.rolling_avg_latency_ms) / n;
    }

    pub fn rolling_avg_latency_ms(&self) -> f64 {
        self.rolling_avg_latency_ms
    }

    /// Emit an advisory if the rolling average latency exceeds the target
    /// and the current backend sits below what the decision rule would
    /// choose today. Never mutates anything — purely informational.
    pub fn upgrade_advice(
        &self,
        input: SelectorInput,
        current: AnnType,
    ) -> Option<UpgradeAdvisory> {
        if self.observations == 0 || self.rolling_avg_latency_ms <= input.target_latency_ms as f64
        {
            return None;
        }

        let recommended = Self::select(input, None).ann_type;
        if tier_rank(current) < tier_rank(recommended) {
            Some(UpgradeAdvisory {
                current,
                recommended,
                reason: format!(
                    "rolling average latency {:.1}ms exceeds target {}ms with {} backend",
                    self.rolling_avg_latency_ms, input.target_latency_ms, current
                ),
            })
        } else {
            None
        }
    }
}

/// Ordinal used only to compare "lower tier than the rule-of-thumb
/// suggests" — not a reflection of any persisted value.
fn tier_rank(ann_type: AnnType) -> u8 {
    match ann_type {
        AnnType::Flat => 0,
        AnnType::Ivf => 1,
        AnnType::IvfPq => 2,
        AnnType::Hnsw => 3,
    }
}

fn clamp_sqrt(vector_count: usize, lo: usize, hi: usize) -> usize {
    let sqrt = (vector_count as f64).sqrt().round() as usize;
    sqrt.clamp(lo, hi)
}

/// Largest power of 2 that evenly divides `dimension`, defaulting to 1 if
/// none does (e.g. an odd dimension).
fn nearest_power_of_2_divisor(dimension: usize) -> usize {
    let mut best = 1usize;
    let mut p = 1usize;
    while p <= dimension {
        if dimension % p == 0 {
            best = p;
        }
        p *= 2;
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(vector_count: usize) -> SelectorInput {
        SelectorInput {
            vector_count,
            dimension: 128,
            memory_budget_bytes: 1_000_000_000,
            target_latency_ms: 50,
        }
    }

    #[test]
    fn small_corpus_selects_flat() {
        let sel = AdaptiveIndexSelector::select(input(5_000), None);
        assert_eq!(sel.ann_type, AnnType::Flat);
    }

    #[test]
    fn mid_corpus_selects_ivf_with_clamped_nlist() {
        let sel = AdaptiveIndexSelector::select(input(40_000), None);
        assert_eq!(sel.ann_type, AnnType::Ivf);
        assert_eq!(sel.params.nlist, 200);
        assert_eq!(sel.params.nprobe, 20);
    }

    #[test]
    fn large_corpus_over_memory_budget_selects_ivf_pq() {
        let mut big = input(500_000);
        big.memory_budget_bytes = 1_000_000;
        let sel = AdaptiveIndexSelector::select(big, None);
        assert_eq!(sel.ann_type, AnnType::IvfPq);
    }

    #[test]
    fn huge_corpus_selects_hnsw() {
        let sel = AdaptiveIndexSelector::select(input(2_000_000), None);
        assert_eq!(sel.ann_type, AnnType::Hnsw);
        assert_eq!(sel.params.hnsw_m, 32);
    }

    #[test]
    fn user_override_always_wins() {
        let sel = AdaptiveIndexSelector::select(input(5_000), Some(AnnType::Hnsw));
        assert_eq!(sel.ann_type, AnnType::Hnsw);
    }

    #[test]
    fn upgrade_advisory_fires_only_above_target_latency_and_lower_tier() {
        let mut selector = AdaptiveIndexSelector::new();
        for _ in 0..5 {
            selector.record_latency(200.0);
        }
        let advice = selector.upgrade_advice(input(2_000_000), AnnType::Flat);
        assert!(advice.is_some());
        assert_eq!(advice.unwrap().recommended, AnnType::Hnsw);
    }

    #[test]
    fn no_advisory_when_current_already_matches_or_exceeds_recommendation() {
        let mut selector = AdaptiveIndexSelector::new();
        selector.record_latency(200.0);
        assert!(selector
            .upgrade_advice(input(2_000_000), AnnType::Hnsw)
            .is_none());
    }
}
