//! Workload analysis and topology selection
//!
//! Both halves are pure: the analyzer scores a descriptor, the selector
//! maps scores to a recommended topology through a fixed rule table.

mod analyzer;
mod selector;

pub use analyzer::{AnalyzerConfig, WorkloadAnalyzer, NEUTRAL_SCORE, STRONG_CONSISTENCY_FLOOR};
pub(crate) use analyzer::primary_reason;
pub use selector::{Selection, SelectionRule, TopologySelector, DEFAULT_RULES};
