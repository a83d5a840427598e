//! Observability infrastructure for the coordinator
//!
//! Provides:
//! - Prometheus metrics (switch outcomes, dispatch latency, overrides,
//!   agent recoveries, circuit breaker states)
//! - Structured JSON logging with tracing

use crate::fault::{CircuitState, RecoveryOutcome};
use crate::models::{OperationCategory, Topology, TopologySwitchRecord, TransitionOutcome};
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    register_int_gauge_vec, Histogram, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for dispatch latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<CoordinatorMetricsInner> = OnceLock::new();

struct CoordinatorMetricsInner {
    switch_attempts: IntCounterVec,
    current_topology: IntGaugeVec,
    dispatch_latency_seconds: Histogram,
    dispatch_errors: IntCounterVec,
    topology_overrides: IntCounter,
    optimization_recommendations: IntCounter,
    agent_recoveries: IntCounterVec,
    healthy_agents: IntGauge,
    breaker_state: IntGaugeVec,
    performance_history_size: IntGauge,
}

impl CoordinatorMetricsInner {
    fn new() -> Self {
        Self {
            switch_attempts: register_int_counter_vec!(
                "coordinator_switch_attempts_total",
                "Topology switch attempts by outcome",
                &["outcome"]
            )
            .expect("Failed to register switch_attempts_total"),

            current_topology: register_int_gauge_vec!(
                "coordinator_current_topology",
                "Currently committed topology (1 for the active one)",
                &["topology"]
            )
            .expect("Failed to register current_topology"),

            dispatch_latency_seconds: register_histogram!(
                "coordinator_dispatch_latency_seconds",
                "Time spent dispatching operations",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register dispatch_latency_seconds"),

            dispatch_errors: register_int_counter_vec!(
                "coordinator_dispatch_errors_total",
                "Failed dispatches by error kind",
                &["kind"]
            )
            .expect("Failed to register dispatch_errors_total"),

            topology_overrides: register_int_counter!(
                "coordinator_topology_overrides_total",
                "Operations routed through a temporary topology override"
            )
            .expect("Failed to register topology_overrides_total"),

            optimization_recommendations: register_int_counter!(
                "coordinator_optimization_recommendations_total",
                "Optimization recommendations raised by the performance monitor"
            )
            .expect("Failed to register optimization_recommendations_total"),

            agent_recoveries: register_int_counter_vec!(
                "coordinator_agent_recoveries_total",
                "Agent recovery actions by outcome",
                &["outcome"]
            )
            .expect("Failed to register agent_recoveries_total"),

            healthy_agents: register_int_gauge!(
                "coordinator_healthy_agents",
                "Agents reporting healthy on the last poll"
            )
            .expect("Failed to register healthy_agents"),

            breaker_state: register_int_gauge_vec!(
                "coordinator_circuit_breaker_state",
                "Circuit breaker state per dependency (0 closed, 1 half-open, 2 open)",
                &["dependency"]
            )
            .expect("Failed to register circuit_breaker_state"),

            performance_history_size: register_int_gauge!(
                "coordinator_performance_history_size",
                "Number of performance snapshots retained"
            )
            .expect("Failed to register performance_history_size"),
        }
    }
}

/// Coordinator metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance. Clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct CoordinatorMetrics {
    _private: (),
}

impl Default for CoordinatorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl CoordinatorMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(CoordinatorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &CoordinatorMetricsInner {
        GLOBAL_METRICS.get_or_init(CoordinatorMetricsInner::new)
    }

    pub fn inc_switch_attempts(&self, outcome: &str) {
        self.inner()
            .switch_attempts
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn set_current_topology(&self, topology: Topology) {
        for candidate in Topology::ALL {
            let value = if candidate == topology { 1 } else { 0 };
            self.inner()
                .current_topology
                .with_label_values(&[candidate.as_str()])
                .set(value);
        }
    }

    pub fn observe_dispatch_latency(&self, duration_secs: f64) {
        self.inner().dispatch_latency_seconds.observe(duration_secs);
    }

    pub fn inc_dispatch_errors(&self, kind: &str) {
        self.inner()
            .dispatch_errors
            .with_label_values(&[kind])
            .inc();
    }

    pub fn inc_topology_overrides(&self) {
        self.inner().topology_overrides.inc();
    }

    pub fn inc_optimization_recommendations(&self) {
        self.inner().optimization_recommendations.inc();
    }

    pub fn inc_agent_recoveries(&self, outcome: &str) {
        self.inner()
            .agent_recoveries
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn set_healthy_agents(&self, count: i64) {
        self.inner().healthy_agents.set(count);
    }

    pub fn set_breaker_state(&self, dependency: &str, state: CircuitState) {
        self.inner()
            .breaker_state
            .with_label_values(&[dependency])
            .set(state.gauge_value());
    }

    pub fn set_performance_history_size(&self, size: i64) {
        self.inner().performance_history_size.set(size);
    }
}

/// Structured logger for coordinator events
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn log_switch_attempt(&self, from: Topology, to: Topology, predicted_gain: f64) {
        info!(
            event = "switch_attempted",
            instance = %self.instance,
            from = %from,
            to = %to,
            predicted_gain = predicted_gain,
            "Attempting topology switch"
        );
    }

    pub fn log_switch_completed(&self, record: &TopologySwitchRecord) {
        match record.outcome {
            TransitionOutcome::Committed => {
                info!(
                    event = "switch_committed",
                    instance = %self.instance,
                    from = %record.from,
                    to = %record.to,
                    predicted_gain = record.predicted_gain,
                    measured_gain = ?record.measured_gain,
                    "Topology switch committed"
                );
            }
            TransitionOutcome::RolledBack => {
                warn!(
                    event = "switch_rolled_back",
                    instance = %self.instance,
                    from = %record.from,
                    to = %record.to,
                    predicted_gain = record.predicted_gain,
                    measured_gain = ?record.measured_gain,
                    failure = ?record.failure,
                    "Topology switch rolled back"
                );
            }
        }
    }

    pub fn log_switch_rejected(&self, from: Topology, to: Topology, reason: &str) {
        info!(
            event = "switch_rejected",
            instance = %self.instance,
            from = %from,
            to = %to,
            reason = %reason,
            "Topology switch rejected"
        );
    }

    pub fn log_topology_override(
        &self,
        operation_id: &str,
        category: OperationCategory,
        current: Topology,
        route: Topology,
    ) {
        info!(
            event = "topology_override",
            instance = %self.instance,
            operation_id = %operation_id,
            category = %category,
            current = %current,
            route = %route,
            "Routing operation through temporary topology override"
        );
    }

    pub fn log_optimization(
        &self,
        current: Topology,
        recommended: Topology,
        reason: &str,
        trigger: &str,
    ) {
        info!(
            event = "optimization_recommended",
            instance = %self.instance,
            current = %current,
            recommended = %recommended,
            reason = %reason,
            trigger = %trigger,
            "Optimization recommended"
        );
    }

    pub fn log_agent_unhealthy(&self, agent_id: &str, consecutive_failures: u32) {
        warn!(
            event = "agent_unhealthy",
            instance = %self.instance,
            agent_id = %agent_id,
            consecutive_failures = consecutive_failures,
            "Agent reported unhealthy"
        );
    }

    pub fn log_agent_recovery(
        &self,
        agent_id: &str,
        outcome: RecoveryOutcome,
        replacement: Option<&str>,
        redistributed: usize,
    ) {
        match outcome {
            RecoveryOutcome::Failed => {
                warn!(
                    event = "agent_recovery",
                    instance = %self.instance,
                    agent_id = %agent_id,
                    outcome = %outcome.as_str(),
                    redistributed = redistributed,
                    "Agent could not be recovered"
                );
            }
            _ => {
                info!(
                    event = "agent_recovery",
                    instance = %self.instance,
                    agent_id = %agent_id,
                    outcome = %outcome.as_str(),
                    replacement = ?replacement,
                    redistributed = redistributed,
                    "Agent recovery completed"
                );
            }
        }
    }

    pub fn log_breaker_transition(&self, dependency: &str, from: CircuitState, to: CircuitState) {
        match to {
            CircuitState::Open => {
                warn!(
                    event = "breaker_transition",
                    instance = %self.instance,
                    dependency = %dependency,
                    from = %from,
                    to = %to,
                    "Circuit breaker opened"
                );
            }
            _ => {
                info!(
                    event = "breaker_transition",
                    instance = %self.instance,
                    dependency = %dependency,
                    from = %from,
                    to = %to,
                    "Circuit breaker state changed"
                );
            }
        }
    }

    pub fn log_startup(&self, version: &str, topology: Topology) {
        info!(
            event = "coordinator_started",
            instance = %self.instance,
            version = %version,
            topology = %topology,
            "Adaptive coordinator started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "coordinator_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Adaptive coordinator shutting down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_handles_share_registry() {
        let metrics = CoordinatorMetrics::new();
        let again = CoordinatorMetrics::new();

        metrics.inc_switch_attempts("committed");
        metrics.set_current_topology(Topology::Ring);
        metrics.observe_dispatch_latency(0.002);
        again.inc_dispatch_errors("timeout");
        again.set_breaker_state("database", CircuitState::HalfOpen);
        again.set_healthy_agents(3);

        let families = prometheus::gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "coordinator_current_topology"));
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("coordinator-0");
        assert_eq!(logger.instance, "coordinator-0");
    }
}
