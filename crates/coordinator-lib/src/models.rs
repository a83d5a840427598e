//! Core data models for the adaptive coordinator

use crate::error::CoordinatorError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Structural pattern by which worker agents coordinate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topology {
    Hierarchical,
    Mesh,
    Ring,
    Hybrid,
}

impl Topology {
    pub const ALL: [Topology; 4] = [
        Topology::Hierarchical,
        Topology::Mesh,
        Topology::Ring,
        Topology::Hybrid,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topology::Hierarchical => "hierarchical",
            Topology::Mesh => "mesh",
            Topology::Ring => "ring",
            Topology::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topology {
    type Err = CoordinatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Topology::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| CoordinatorError::UnknownTopology(s.to_string()))
    }
}

/// Domain category an operation belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationCategory {
    Search,
    Crud,
    InquiryProcessing,
    Analytics,
    MediaProcessing,
    Generic,
}

impl OperationCategory {
    pub const ALL: [OperationCategory; 6] = [
        OperationCategory::Search,
        OperationCategory::Crud,
        OperationCategory::InquiryProcessing,
        OperationCategory::Analytics,
        OperationCategory::MediaProcessing,
        OperationCategory::Generic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationCategory::Search => "search",
            OperationCategory::Crud => "crud",
            OperationCategory::InquiryProcessing => "inquiry_processing",
            OperationCategory::Analytics => "analytics",
            OperationCategory::MediaProcessing => "media_processing",
            OperationCategory::Generic => "generic",
        }
    }

    /// Topology a pipeline of this category runs best on when no
    /// pipeline overrides it. `Generic` runs on whatever is current.
    pub fn default_topology(&self) -> Option<Topology> {
        match self {
            OperationCategory::Search => Some(Topology::Mesh),
            OperationCategory::Crud => Some(Topology::Hierarchical),
            OperationCategory::InquiryProcessing => Some(Topology::Ring),
            OperationCategory::Analytics => Some(Topology::Hybrid),
            OperationCategory::MediaProcessing => Some(Topology::Mesh),
            OperationCategory::Generic => None,
        }
    }

    /// Relative complexity weight of the operation type.
    /// Writes weigh more than searches, searches more than plain reads.
    pub fn complexity_weight(&self) -> f64 {
        match self {
            OperationCategory::Crud => 0.8,
            OperationCategory::Analytics => 0.7,
            OperationCategory::MediaProcessing => 0.65,
            OperationCategory::InquiryProcessing => 0.6,
            OperationCategory::Search => 0.5,
            OperationCategory::Generic => 0.3,
        }
    }
}

impl fmt::Display for OperationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationCategory {
    type Err = CoordinatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        OperationCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| CoordinatorError::UnknownCategory(s.to_string()))
    }
}

/// Named characteristic scored by the workload analyzer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Characteristic {
    Complexity,
    Parallelizability,
    Interdependency,
    ResourceNeed,
    TimeSensitivity,
    DomainSpecificity,
    ConsistencyNeed,
    ConcurrencyPressure,
}

impl Characteristic {
    /// Tie-break order used when two characteristics share the top score
    pub const PRIORITY: [Characteristic; 8] = [
        Characteristic::ConsistencyNeed,
        Characteristic::Interdependency,
        Characteristic::Parallelizability,
        Characteristic::Complexity,
        Characteristic::ConcurrencyPressure,
        Characteristic::TimeSensitivity,
        Characteristic::ResourceNeed,
        Characteristic::DomainSpecificity,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Characteristic::Complexity => "complexity",
            Characteristic::Parallelizability => "parallelizability",
            Characteristic::Interdependency => "interdependency",
            Characteristic::ResourceNeed => "resource_need",
            Characteristic::TimeSensitivity => "time_sensitivity",
            Characteristic::DomainSpecificity => "domain_specificity",
            Characteristic::ConsistencyNeed => "consistency_need",
            Characteristic::ConcurrencyPressure => "concurrency_pressure",
        }
    }
}

impl fmt::Display for Characteristic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared urgency of a workload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    Normal,
    High,
    Critical,
}

impl Urgency {
    pub fn score(&self) -> f64 {
        match self {
            Urgency::Low => 0.2,
            Urgency::Normal => 0.5,
            Urgency::High => 0.8,
            Urgency::Critical => 1.0,
        }
    }
}

/// Caller-supplied description of an operation's shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadDescriptor {
    pub category: OperationCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_results: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urgency: Option<Urgency>,
    /// Geographic or tenant partition the work is scoped to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strong_consistency: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequential: Option<bool>,
    /// Explicit score per characteristic, replacing the derived one
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub hints: BTreeMap<Characteristic, f64>,
}

impl WorkloadDescriptor {
    pub fn new(category: OperationCategory) -> Self {
        Self {
            category,
            expected_results: None,
            urgency: None,
            partition_key: None,
            strong_consistency: None,
            sequential: None,
            hints: BTreeMap::new(),
        }
    }

    pub fn with_expected_results(mut self, count: u64) -> Self {
        self.expected_results = Some(count);
        self
    }

    pub fn with_urgency(mut self, urgency: Urgency) -> Self {
        self.urgency = Some(urgency);
        self
    }

    pub fn with_partition_key(mut self, key: impl Into<String>) -> Self {
        self.partition_key = Some(key.into());
        self
    }

    pub fn with_strong_consistency(mut self, required: bool) -> Self {
        self.strong_consistency = Some(required);
        self
    }

    pub fn with_sequential(mut self, sequential: bool) -> Self {
        self.sequential = Some(sequential);
        self
    }

    pub fn with_hint(mut self, characteristic: Characteristic, score: f64) -> Self {
        self.hints.insert(characteristic, score);
        self
    }

    /// Number of optional fields and hints the caller supplied
    pub fn signal_count(&self) -> usize {
        [
            self.expected_results.is_some(),
            self.urgency.is_some(),
            self.partition_key.is_some(),
            self.strong_consistency.is_some(),
            self.sequential.is_some(),
        ]
        .into_iter()
        .filter(|present| *present)
        .count()
            + self.hints.len()
    }
}

/// Scored characteristics vector derived from a descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadAnalysis {
    pub scores: BTreeMap<Characteristic, f64>,
    pub primary_reason: Characteristic,
    pub confidence: f64,
    /// Whether the descriptor declared sequential processing
    pub sequential: bool,
}

impl WorkloadAnalysis {
    /// Score for a characteristic, neutral when absent
    pub fn score(&self, characteristic: Characteristic) -> f64 {
        self.scores.get(&characteristic).copied().unwrap_or(0.5)
    }
}

/// Upper bound of domain-specific counters kept on a snapshot
pub const MAX_DOMAIN_COUNTERS: usize = 3;

/// Metric tuple reported by the agent execution layer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawMetrics {
    pub avg_response_time_ms: f64,
    pub throughput: f64,
    pub error_rate: f64,
    pub resource_utilization: f64,
    #[serde(default)]
    pub domain_counters: BTreeMap<String, f64>,
}

/// Timestamped, topology-tagged performance sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    pub topology: Topology,
    pub avg_response_time_ms: f64,
    pub throughput: f64,
    pub error_rate: f64,
    pub resource_utilization: f64,
    pub domain_counters: BTreeMap<String, f64>,
}

impl PerformanceSnapshot {
    pub fn from_raw(topology: Topology, raw: RawMetrics) -> Self {
        Self {
            timestamp: chrono::Utc::now().timestamp_millis(),
            topology,
            avg_response_time_ms: raw.avg_response_time_ms.max(0.0),
            throughput: raw.throughput.max(0.0),
            error_rate: raw.error_rate.clamp(0.0, 1.0),
            resource_utilization: raw.resource_utilization.clamp(0.0, 1.0),
            domain_counters: raw
                .domain_counters
                .into_iter()
                .take(MAX_DOMAIN_COUNTERS)
                .collect(),
        }
    }

    /// Composite cost of the sample; lower is better.
    /// Errors are penalised as if each failed call cost ten successful ones.
    pub fn cost(&self) -> f64 {
        self.avg_response_time_ms * (1.0 + 10.0 * self.error_rate)
    }

    /// No operations completed while the sample was taken
    pub fn is_idle(&self) -> bool {
        self.throughput <= f64::EPSILON
    }

    /// Relative improvement of `after` over `self`. Positive is better.
    ///
    /// `None` when either sample is idle or the baseline has no cost;
    /// such a pair says nothing about the topologies.
    pub fn gain_to(&self, after: &PerformanceSnapshot) -> Option<f64> {
        let before = self.cost();
        if self.is_idle() || after.is_idle() || before <= f64::EPSILON {
            return None;
        }
        Some((before - after.cost()) / before)
    }
}

/// Outcome of a finished switch attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionOutcome {
    Committed,
    RolledBack,
}

impl fmt::Display for TransitionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionOutcome::Committed => write!(f, "committed"),
            TransitionOutcome::RolledBack => write!(f, "rolled_back"),
        }
    }
}

/// Historical log entry for one switch attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologySwitchRecord {
    pub from: Topology,
    pub to: Topology,
    pub timestamp: i64,
    pub predicted_gain: f64,
    pub measured_gain: Option<f64>,
    pub outcome: TransitionOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

/// Liveness report for one agent, as seen by the agent layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentHeartbeat {
    pub agent_id: String,
    pub alive: bool,
    pub last_heartbeat: i64,
}

/// Health state the fault tolerance manager keeps per agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentHealthRecord {
    pub agent_id: String,
    pub alive: bool,
    pub last_heartbeat: i64,
    pub consecutive_failures: u32,
    pub workloads: Vec<String>,
}

impl AgentHealthRecord {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            alive: true,
            last_heartbeat: chrono::Utc::now().timestamp_millis(),
            consecutive_failures: 0,
            workloads: Vec::new(),
        }
    }
}

/// Request for a replacement agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSpec {
    pub replaces: String,
    pub topology: Topology,
}

/// A unit of domain work submitted for dispatch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: String,
    pub category: OperationCategory,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptor: Option<WorkloadDescriptor>,
}

impl Operation {
    pub fn new(id: impl Into<String>, category: OperationCategory) -> Self {
        Self {
            id: id.into(),
            category,
            payload: serde_json::Value::Null,
            descriptor: None,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_descriptor(mut self, descriptor: WorkloadDescriptor) -> Self {
        self.descriptor = Some(descriptor);
        self
    }
}

/// Result of a dispatched operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    pub operation_id: String,
    /// Topology the operation actually ran on
    pub topology: Topology,
    /// True when the operation ran under a temporary override
    pub overridden: bool,
    pub output: serde_json::Value,
    pub duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(rt: f64, err: f64) -> PerformanceSnapshot {
        PerformanceSnapshot::from_raw(
            Topology::Mesh,
            RawMetrics {
                avg_response_time_ms: rt,
                throughput: 20.0,
                error_rate: err,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_topology_parse_and_display() {
        for topology in Topology::ALL {
            assert_eq!(topology.to_string().parse::<Topology>().unwrap(), topology);
        }
        assert_eq!("MESH".parse::<Topology>().unwrap(), Topology::Mesh);
        assert!("star".parse::<Topology>().is_err());
    }

    #[test]
    fn test_category_parse_accepts_dashes() {
        assert_eq!(
            "inquiry-processing".parse::<OperationCategory>().unwrap(),
            OperationCategory::InquiryProcessing
        );
        assert!("billing".parse::<OperationCategory>().is_err());
    }

    #[test]
    fn test_category_complexity_ordering() {
        assert!(
            OperationCategory::Crud.complexity_weight()
                > OperationCategory::Search.complexity_weight()
        );
        assert!(
            OperationCategory::Search.complexity_weight()
                > OperationCategory::Generic.complexity_weight()
        );
    }

    #[test]
    fn test_signal_count() {
        let descriptor = WorkloadDescriptor::new(OperationCategory::Search);
        assert_eq!(descriptor.signal_count(), 0);

        let descriptor = descriptor
            .with_expected_results(10)
            .with_sequential(false)
            .with_hint(Characteristic::Complexity, 0.4);
        assert_eq!(descriptor.signal_count(), 3);
    }

    #[test]
    fn test_snapshot_keeps_at_most_three_counters() {
        let mut counters = BTreeMap::new();
        for name in ["a", "b", "c", "d"] {
            counters.insert(name.to_string(), 1.0);
        }
        let snap = PerformanceSnapshot::from_raw(
            Topology::Ring,
            RawMetrics {
                domain_counters: counters,
                error_rate: 3.0,
                ..Default::default()
            },
        );
        assert_eq!(snap.domain_counters.len(), MAX_DOMAIN_COUNTERS);
        assert_eq!(snap.error_rate, 1.0);
    }

    #[test]
    fn test_gain_between_snapshots() {
        let before = snapshot(100.0, 0.0);
        let after = snapshot(92.0, 0.0);
        assert!((before.gain_to(&after).unwrap() - 0.08).abs() < 1e-9);

        let worse = snapshot(100.0, 0.1);
        assert!(before.gain_to(&worse).unwrap() < 0.0);

        let zero = snapshot(0.0, 0.0);
        assert_eq!(zero.gain_to(&after), None);
    }

    #[test]
    fn test_idle_sample_has_no_gain() {
        let busy = snapshot(100.0, 0.0);
        let mut idle = snapshot(0.0, 0.0);
        idle.throughput = 0.0;

        assert!(idle.is_idle());
        assert!(!busy.is_idle());
        assert_eq!(busy.gain_to(&idle), None);
        assert_eq!(idle.gain_to(&busy), None);
    }
}
