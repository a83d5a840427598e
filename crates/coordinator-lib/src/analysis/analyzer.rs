//! Workload characteristic scoring
//!
//! Converts a caller's workload descriptor into a vector of scores in
//! [0, 1]. Missing descriptor fields score neutral (0.5); explicit hints
//! replace the derived score for their characteristic.

use crate::models::{
    Characteristic, OperationCategory, PerformanceSnapshot, WorkloadAnalysis, WorkloadDescriptor,
};
use std::collections::BTreeMap;

/// Score used when a signal is absent
pub const NEUTRAL_SCORE: f64 = 0.5;

/// Floor applied to consistency need for strongly-consistent operations
pub const STRONG_CONSISTENCY_FLOOR: f64 = 0.8;

/// Confidence with no caller-supplied signals
const BASE_CONFIDENCE: f64 = 0.4;

/// Confidence added per supplied signal
const CONFIDENCE_PER_SIGNAL: f64 = 0.1;

/// Configuration for the workload analyzer
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// Result count at which parallelizability from cardinality saturates
    pub saturating_results: u64,
    /// Throughput (ops/s) regarded as full concurrency pressure
    pub reference_throughput: f64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            saturating_results: 1000,
            reference_throughput: 100.0,
        }
    }
}

/// Scores workload descriptors
#[derive(Debug, Clone, Default)]
pub struct WorkloadAnalyzer {
    config: AnalyzerConfig,
}

impl WorkloadAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self { config }
    }

    /// Analyze a descriptor. `current` is only used to estimate resource
    /// need and concurrency pressure.
    pub fn analyze(
        &self,
        descriptor: &WorkloadDescriptor,
        current: Option<&PerformanceSnapshot>,
    ) -> WorkloadAnalysis {
        let cardinality = descriptor
            .expected_results
            .map(|n| self.cardinality_score(n))
            .unwrap_or(NEUTRAL_SCORE);
        let ordering_freedom = match descriptor.sequential {
            Some(true) => 0.0,
            Some(false) => 1.0,
            None => NEUTRAL_SCORE,
        };
        let time_sensitivity = descriptor
            .urgency
            .map(|u| u.score())
            .unwrap_or(NEUTRAL_SCORE);
        let load = current
            .map(|s| (s.throughput / self.config.reference_throughput).clamp(0.0, 1.0))
            .unwrap_or(NEUTRAL_SCORE);

        let mut scores = BTreeMap::new();
        scores.insert(
            Characteristic::Complexity,
            descriptor.category.complexity_weight(),
        );
        scores.insert(
            Characteristic::Parallelizability,
            0.6 * cardinality + 0.4 * ordering_freedom,
        );
        scores.insert(
            Characteristic::Interdependency,
            match descriptor.sequential {
                Some(true) => 0.85,
                Some(false) => 0.15,
                None => NEUTRAL_SCORE,
            },
        );
        scores.insert(
            Characteristic::ResourceNeed,
            match current {
                Some(s) => 0.5 * s.resource_utilization + 0.5 * cardinality,
                None => cardinality,
            },
        );
        scores.insert(Characteristic::TimeSensitivity, time_sensitivity);
        scores.insert(
            Characteristic::DomainSpecificity,
            self.domain_specificity(descriptor),
        );
        scores.insert(
            Characteristic::ConsistencyNeed,
            match descriptor.strong_consistency {
                Some(true) => 0.9,
                Some(false) => 0.2,
                None => NEUTRAL_SCORE,
            },
        );
        scores.insert(
            Characteristic::ConcurrencyPressure,
            0.5 * load + 0.5 * time_sensitivity,
        );

        for (characteristic, hint) in &descriptor.hints {
            scores.insert(*characteristic, *hint);
        }

        if descriptor.strong_consistency == Some(true) {
            let need = scores
                .entry(Characteristic::ConsistencyNeed)
                .or_insert(STRONG_CONSISTENCY_FLOOR);
            *need = need.max(STRONG_CONSISTENCY_FLOOR);
        }

        for score in scores.values_mut() {
            *score = clamp_score(*score);
        }

        WorkloadAnalysis {
            primary_reason: primary_reason(&scores),
            confidence: confidence(descriptor.signal_count()),
            sequential: descriptor.sequential.unwrap_or(false),
            scores,
        }
    }

    /// Log-scaled cardinality, saturating at the configured result count
    fn cardinality_score(&self, expected_results: u64) -> f64 {
        let ceiling = (self.config.saturating_results.max(1) as f64 + 1.0).log10();
        ((expected_results as f64 + 1.0).log10() / ceiling).clamp(0.0, 1.0)
    }

    fn domain_specificity(&self, descriptor: &WorkloadDescriptor) -> f64 {
        let base = match descriptor.category {
            OperationCategory::Analytics | OperationCategory::MediaProcessing => 0.7,
            _ => NEUTRAL_SCORE,
        };
        if descriptor.partition_key.is_some() {
            base.max(0.85)
        } else {
            base
        }
    }
}

fn clamp_score(score: f64) -> f64 {
    if score.is_finite() {
        score.clamp(0.0, 1.0)
    } else {
        NEUTRAL_SCORE
    }
}

/// Highest-scoring characteristic, ties broken by `Characteristic::PRIORITY`
pub(crate) fn primary_reason(scores: &BTreeMap<Characteristic, f64>) -> Characteristic {
    let mut best = Characteristic::PRIORITY[0];
    let mut best_score = f64::NEG_INFINITY;
    for characteristic in Characteristic::PRIORITY {
        let score = scores.get(&characteristic).copied().unwrap_or(NEUTRAL_SCORE);
        if score > best_score {
            best = characteristic;
            best_score = score;
        }
    }
    best
}

fn confidence(signals: usize) -> f64 {
    (BASE_CONFIDENCE + CONFIDENCE_PER_SIGNAL * signals as f64).min(1.0)
}
