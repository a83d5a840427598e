//! Seams to the collaborators the coordinator drives but does not implement
//!
//! The agent execution layer owns the worker agents; domain pipelines own
//! the business logic of each operation category.

use crate::fault::CircuitBreakerRegistry;
use crate::models::{
    AgentHeartbeat, AgentSpec, Operation, OperationCategory, RawMetrics, Topology,
};
use anyhow::Result;
use std::future::Future;

pub use async_trait::async_trait;

/// Execution capacity the coordinator routes work to
#[async_trait]
pub trait AgentExecutionLayer: Send + Sync {
    /// Execute an operation using the given coordination topology
    async fn execute_on_topology(
        &self,
        topology: Topology,
        operation: &Operation,
    ) -> Result<serde_json::Value>;

    /// Report liveness for every known agent
    async fn check_health(&self) -> Result<Vec<AgentHeartbeat>>;

    /// Restart a single agent
    async fn restart(&self, agent_id: &str) -> Result<()>;

    /// Provision a replacement agent, returning its id
    async fn create_replacement(&self, spec: &AgentSpec) -> Result<String>;

    /// Current aggregate metrics of the agent fleet
    async fn collect_metrics(&self) -> Result<RawMetrics>;

    /// Allocate resources for a topology without routing traffic to it
    async fn prepare_topology(&self, _topology: Topology) -> Result<()> {
        Ok(())
    }

    /// Move `fraction` (0..=1) of routing from one topology to another
    async fn migrate(&self, _from: Topology, _to: Topology, _fraction: f64) -> Result<()> {
        Ok(())
    }

    /// Route all traffic back to a previously captured topology
    async fn restore(&self, _topology: Topology) -> Result<()> {
        Ok(())
    }
}

/// What a pipeline may reach while it executes one operation
pub struct ExecutionContext<'a> {
    pub layer: &'a dyn AgentExecutionLayer,
    pub breakers: &'a CircuitBreakerRegistry,
}

impl ExecutionContext<'_> {
    /// Run the operation on the agent layer
    pub async fn execute_on(
        &self,
        topology: Topology,
        operation: &Operation,
    ) -> Result<serde_json::Value> {
        self.layer.execute_on_topology(topology, operation).await
    }

    /// Call an external dependency through its circuit breaker.
    ///
    /// An open breaker fails with `DependencyUnavailable` without running
    /// `call`; the error survives `?` into `anyhow` and reaches the
    /// dispatch caller unchanged.
    pub async fn call_dependency<T, F>(
        &self,
        dependency: &str,
        call: F,
    ) -> crate::error::Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.breakers.call(dependency, call).await
    }
}

/// Domain logic for one operation category
#[async_trait]
pub trait DomainPipeline: Send + Sync {
    fn category(&self) -> OperationCategory;

    /// Topology this pipeline runs best on; `None` accepts the current one
    fn preferred_topology(&self) -> Option<Topology> {
        self.category().default_topology()
    }

    /// Execute the operation on the topology chosen by the coordinator.
    /// Calls to external dependencies go through `ctx.call_dependency`.
    async fn execute(
        &self,
        topology: Topology,
        operation: &Operation,
        ctx: &ExecutionContext<'_>,
    ) -> Result<serde_json::Value> {
        ctx.execute_on(topology, operation).await
    }
}

/// Pipeline that adds nothing beyond its category's preferred topology
pub struct CategoryPipeline {
    category: OperationCategory,
}

impl CategoryPipeline {
    pub fn new(category: OperationCategory) -> Self {
        Self { category }
    }
}

#[async_trait]
impl DomainPipeline for CategoryPipeline {
    fn category(&self) -> OperationCategory {
        self.category
    }
}
