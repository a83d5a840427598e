//! Coordinator event stream
//!
//! Every significant decision is published as a `CoordinatorEvent`. The
//! sink logs it, updates Prometheus metrics and broadcasts it to any
//! subscriber. Emitting never blocks.

use crate::fault::{CircuitState, RecoveryOutcome};
use crate::models::{OperationCategory, Topology, TopologySwitchRecord};
use crate::observability::{CoordinatorMetrics, StructuredLogger};
use serde::Serialize;
use tokio::sync::broadcast;

/// Capacity of the broadcast channel; slow subscribers lag past this
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CoordinatorEvent {
    SwitchAttempted {
        from: Topology,
        to: Topology,
        predicted_gain: f64,
    },
    SwitchCompleted {
        record: TopologySwitchRecord,
    },
    SwitchRejected {
        from: Topology,
        to: Topology,
        reason: String,
    },
    TopologyOverridden {
        operation_id: String,
        category: OperationCategory,
        current: Topology,
        route: Topology,
    },
    OptimizationRecommended {
        current: Topology,
        recommended: Topology,
        reason: String,
        trigger: String,
    },
    AgentUnhealthy {
        agent_id: String,
        consecutive_failures: u32,
    },
    AgentRecovery {
        agent_id: String,
        outcome: RecoveryOutcome,
        replacement: Option<String>,
        redistributed: usize,
    },
    BreakerTransition {
        dependency: String,
        from: CircuitState,
        to: CircuitState,
    },
}

/// Fan-out point for coordinator events
#[derive(Clone)]
pub struct EventSink {
    tx: broadcast::Sender<CoordinatorEvent>,
    logger: StructuredLogger,
    metrics: CoordinatorMetrics,
}

impl EventSink {
    pub fn new(instance: impl Into<String>) -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            tx,
            logger: StructuredLogger::new(instance),
            metrics: CoordinatorMetrics::new(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.tx.subscribe()
    }

    pub fn logger(&self) -> &StructuredLogger {
        &self.logger
    }

    pub fn metrics(&self) -> &CoordinatorMetrics {
        &self.metrics
    }

    pub fn emit(&self, event: CoordinatorEvent) {
        self.record(&event);
        // No subscribers is fine
        let _ = self.tx.send(event);
    }

    fn record(&self, event: &CoordinatorEvent) {
        match event {
            CoordinatorEvent::SwitchAttempted {
                from,
                to,
                predicted_gain,
            } => {
                self.logger.log_switch_attempt(*from, *to, *predicted_gain);
            }
            CoordinatorEvent::SwitchCompleted { record } => {
                self.logger.log_switch_completed(record);
                self.metrics.inc_switch_attempts(record.outcome.to_string().as_str());
                if record.outcome == crate::models::TransitionOutcome::Committed {
                    self.metrics.set_current_topology(record.to);
                }
            }
            CoordinatorEvent::SwitchRejected { from, to, reason } => {
                self.logger.log_switch_rejected(*from, *to, reason);
                self.metrics.inc_switch_attempts("rejected");
            }
            CoordinatorEvent::TopologyOverridden {
                operation_id,
                category,
                current,
                route,
            } => {
                self.logger
                    .log_topology_override(operation_id, *category, *current, *route);
                self.metrics.inc_topology_overrides();
            }
            CoordinatorEvent::OptimizationRecommended {
                current,
                recommended,
                reason,
                trigger,
            } => {
                self.logger
                    .log_optimization(*current, *recommended, reason, trigger);
                self.metrics.inc_optimization_recommendations();
            }
            CoordinatorEvent::AgentUnhealthy {
                agent_id,
                consecutive_failures,
            } => {
                self.logger
                    .log_agent_unhealthy(agent_id, *consecutive_failures);
            }
            CoordinatorEvent::AgentRecovery {
                agent_id,
                outcome,
                replacement,
                redistributed,
            } => {
                self.logger.log_agent_recovery(
                    agent_id,
                    *outcome,
                    replacement.as_deref(),
                    *redistributed,
                );
                self.metrics.inc_agent_recoveries(outcome.as_str());
            }
            CoordinatorEvent::BreakerTransition {
                dependency,
                from,
                to,
            } => {
                self.logger.log_breaker_transition(dependency, *from, *to);
                self.metrics.set_breaker_state(dependency, *to);
            }
        }
    }
}
