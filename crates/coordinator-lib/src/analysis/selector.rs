//! Rule-table topology selection
//!
//! Rules are evaluated in order and the first match wins. When nothing
//! matches the current topology is kept.

use crate::models::{Characteristic, Topology, WorkloadAnalysis};
use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// One row of the selection policy
#[derive(Debug, Clone, Copy)]
pub struct SelectionRule {
    pub name: &'static str,
    /// Every characteristic must score at or above its threshold
    pub thresholds: &'static [(Characteristic, f64)],
    /// Rule only applies when the descriptor declared sequential processing
    pub requires_sequential: bool,
    pub topology: Topology,
    pub rationale: &'static str,
}

impl SelectionRule {
    pub fn matches(&self, analysis: &WorkloadAnalysis) -> bool {
        (!self.requires_sequential || analysis.sequential)
            && self
                .thresholds
                .iter()
                .all(|(characteristic, min)| analysis.score(*characteristic) >= *min)
    }

    fn explain(&self, analysis: &WorkloadAnalysis) -> String {
        let mut reason = String::new();
        for (i, (characteristic, min)) in self.thresholds.iter().enumerate() {
            if i > 0 {
                reason.push_str(" and ");
            }
            let _ = write!(
                reason,
                "{} {:.2} >= {:.2}",
                characteristic,
                analysis.score(*characteristic),
                min
            );
        }
        if self.requires_sequential {
            reason.push_str(" with sequential processing");
        }
        let _ = write!(reason, ": {}", self.rationale);
        reason
    }
}

/// Default selection policy
pub const DEFAULT_RULES: &[SelectionRule] = &[
    SelectionRule {
        name: "consistent_writes",
        thresholds: &[
            (Characteristic::ConsistencyNeed, 0.8),
            (Characteristic::Complexity, 0.7),
        ],
        requires_sequential: false,
        topology: Topology::Hierarchical,
        rationale: "centralizes validation for strongly-consistent writes",
    },
    SelectionRule {
        name: "parallel_fan_out",
        thresholds: &[
            (Characteristic::Parallelizability, 0.8),
            (Characteristic::ConcurrencyPressure, 0.6),
        ],
        requires_sequential: false,
        topology: Topology::Mesh,
        rationale: "maximizes parallel fan-out for independent, read-heavy work",
    },
    SelectionRule {
        name: "ordered_hand_off",
        thresholds: &[(Characteristic::Interdependency, 0.7)],
        requires_sequential: true,
        topology: Topology::Ring,
        rationale: "enforces ordered hand-off between agents",
    },
    SelectionRule {
        name: "multi_strategy",
        thresholds: &[
            (Characteristic::Complexity, 0.8),
            (Characteristic::DomainSpecificity, 0.7),
        ],
        requires_sequential: false,
        topology: Topology::Hybrid,
        rationale: "composes multiple coordination strategies",
    },
];

/// Recommendation produced by the selector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub topology: Topology,
    pub reason: String,
    /// Name of the matching rule, `None` when falling back
    pub rule: Option<String>,
}

impl Selection {
    /// Whether the recommendation differs from `current`
    pub fn changes(&self, current: Topology) -> bool {
        self.topology != current
    }
}

/// Pure decision function from analysis to topology
#[derive(Debug, Clone)]
pub struct TopologySelector {
    rules: &'static [SelectionRule],
}

impl Default for TopologySelector {
    fn default() -> Self {
        Self::new(DEFAULT_RULES)
    }
}

impl TopologySelector {
    pub fn new(rules: &'static [SelectionRule]) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &'static [SelectionRule] {
        self.rules
    }

    pub fn select(&self, analysis: &WorkloadAnalysis, current: Topology) -> Selection {
        match self.rules.iter().find(|rule| rule.matches(analysis)) {
            Some(rule) => Selection {
                topology: rule.topology,
                reason: rule.explain(analysis),
                rule: Some(rule.name.to_string()),
            },
            None => Selection {
                topology: current,
                reason: format!("no rule matched; keeping {}", current),
                rule: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::WorkloadAnalyzer;
    use crate::models::{OperationCategory, WorkloadDescriptor};
    use std::collections::BTreeMap;

    fn analysis_with(scores: &[(Characteristic, f64)], sequential: bool) -> WorkloadAnalysis {
        let mut map = BTreeMap::new();
        for characteristic in Characteristic::PRIORITY {
            map.insert(characteristic, 0.5);
        }
        for (characteristic, score) in scores {
            map.insert(*characteristic, *score);
        }
        WorkloadAnalysis {
            scores: map,
            primary_reason: Characteristic::Complexity,
            confidence: 0.5,
            sequential,
        }
    }

    #[test]
    fn test_property_crud_recommends_hierarchical() {
        let descriptor = WorkloadDescriptor::new(OperationCategory::Crud)
            .with_hint(Characteristic::ConsistencyNeed, 0.9)
            .with_hint(Characteristic::Complexity, 0.75);
        let analysis = WorkloadAnalyzer::default().analyze(&descriptor, None);

        let selection = TopologySelector::default().select(&analysis, Topology::Mesh);
        assert_eq!(selection.topology, Topology::Hierarchical);
        assert_eq!(selection.rule.as_deref(), Some("consistent_writes"));
        assert!(selection.changes(Topology::Mesh));
        assert!(selection.reason.contains("consistency_need 0.90 >= 0.80"));
    }

    #[test]
    fn test_property_search_recommends_mesh() {
        let descriptor = WorkloadDescriptor::new(OperationCategory::Search)
            .with_hint(Characteristic::Parallelizability, 0.9)
            .with_hint(Characteristic::ConcurrencyPressure, 0.7);
        let analysis = WorkloadAnalyzer::default().analyze(&descriptor, None);

        let selection = TopologySelector::default().select(&analysis, Topology::Hierarchical);
        assert_eq!(selection.topology, Topology::Mesh);
        assert_eq!(selection.rule.as_deref(), Some("parallel_fan_out"));
    }

    #[test]
    fn test_ring_requires_declared_sequential() {
        let selector = TopologySelector::default();
        let interdependent = [(Characteristic::Interdependency, 0.9)];

        let selection = selector.select(&analysis_with(&interdependent, true), Topology::Mesh);
        assert_eq!(selection.topology, Topology::Ring);

        let selection = selector.select(&analysis_with(&interdependent, false), Topology::Mesh);
        assert_eq!(selection.topology, Topology::Mesh);
        assert!(selection.rule.is_none());
    }

    #[test]
    fn test_hybrid_for_complex_domain_work() {
        let analysis = analysis_with(
            &[
                (Characteristic::Complexity, 0.85),
                (Characteristic::DomainSpecificity, 0.75),
            ],
            false,
        );
        let selection = TopologySelector::default().select(&analysis, Topology::Ring);
        assert_eq!(selection.topology, Topology::Hybrid);
    }

    #[test]
    fn test_first_matching_rule_wins() {
        // Matches both the consistency rule and the hybrid rule
        let analysis = analysis_with(
            &[
                (Characteristic::ConsistencyNeed, 0.95),
                (Characteristic::Complexity, 0.9),
                (Characteristic::DomainSpecificity, 0.9),
            ],
            false,
        );
        let selection = TopologySelector::default().select(&analysis, Topology::Ring);
        assert_eq!(selection.topology, Topology::Hierarchical);
    }

    #[test]
    fn test_fallback_keeps_current_topology() {
        let analysis = analysis_with(&[], false);
        for current in Topology::ALL {
            let selection = TopologySelector::default().select(&analysis, current);
            assert_eq!(selection.topology, current);
            assert!(!selection.changes(current));
        }
    }

    #[test]
    fn test_selection_is_deterministic() {
        let selector = TopologySelector::default();
        let analysis = analysis_with(
            &[
                (Characteristic::Parallelizability, 0.81),
                (Characteristic::ConcurrencyPressure, 0.6),
            ],
            false,
        );
        let first = selector.select(&analysis, Topology::Ring);
        for _ in 0..10 {
            assert_eq!(selector.select(&analysis, Topology::Ring), first);
        }
    }

    #[test]
    fn test_custom_rule_table() {
        static ALWAYS_RING: &[SelectionRule] = &[SelectionRule {
            name: "always_ring",
            thresholds: &[],
            requires_sequential: false,
            topology: Topology::Ring,
            rationale: "test policy",
        }];
        let selector = TopologySelector::new(ALWAYS_RING);
        let selection = selector.select(&analysis_with(&[], false), Topology::Mesh);
        assert_eq!(selection.topology, Topology::Ring);
        assert_eq!(selection.reason, ": test policy");
    }
}
