//! Adaptive coordination controller
//!
//! Decides at runtime which coordination topology (hierarchical, mesh,
//! ring or hybrid) a set of worker agents should use, switches between
//! topologies with rollback, and keeps agents and external dependencies
//! in check:
//! - Workload analysis and rule-based topology selection
//! - Guarded topology switching with validation and rollback
//! - Periodic performance monitoring
//! - Agent recovery and per-dependency circuit breakers
//! - Structured events, Prometheus metrics and health tracking

pub mod analysis;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod execution;
pub mod fault;
pub mod health;
pub mod models;
pub mod monitor;
pub mod observability;
pub mod switch;

#[cfg(test)]
pub(crate) mod testing;

pub use analysis::{Selection, TopologySelector, WorkloadAnalyzer};
pub use coordinator::{
    AdaptationReport, AdaptiveCoordinator, CoordinatorConfig, CoordinatorHandle,
    CoordinatorStatus, Recommendation, SwitchDecision,
};
pub use error::{CoordinatorError, Result};
pub use events::{CoordinatorEvent, EventSink};
pub use execution::{
    async_trait, AgentExecutionLayer, CategoryPipeline, DomainPipeline, ExecutionContext,
};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{CoordinatorMetrics, StructuredLogger};
