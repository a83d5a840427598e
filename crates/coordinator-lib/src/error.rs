//! Error taxonomy for the coordinator

use crate::models::Topology;
use std::time::Duration;

/// Errors raised by coordinator components
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoordinatorError {
    #[error("preparing {topology} topology failed: {reason}")]
    PreparationFailed { topology: Topology, reason: String },

    #[error("migrating to {topology} topology failed: {reason}")]
    MigrationFailed {
        topology: Topology,
        reason: String,
        /// Set when the rollback that followed also failed
        rollback_error: Option<String>,
    },

    #[error("validation of {topology} topology exceeded {window:?}")]
    ValidationTimedOut { topology: Topology, window: Duration },

    #[error("a topology switch is already in progress")]
    SwitchInProgress,

    #[error("dependency '{dependency}' unavailable, retry in {retry_after:?}")]
    DependencyUnavailable {
        dependency: String,
        retry_after: Duration,
    },

    #[error("agent '{agent_id}' could not be restarted or replaced: {reason}")]
    AgentUnrecoverable { agent_id: String, reason: String },

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("unknown topology '{0}'")]
    UnknownTopology(String),

    #[error("unknown operation category '{0}'")]
    UnknownCategory(String),
}

impl CoordinatorError {
    /// Short machine-readable name used as a metrics label
    pub fn kind(&self) -> &'static str {
        match self {
            CoordinatorError::PreparationFailed { .. } => "preparation_failed",
            CoordinatorError::MigrationFailed { .. } => "migration_failed",
            CoordinatorError::ValidationTimedOut { .. } => "validation_timed_out",
            CoordinatorError::SwitchInProgress => "switch_in_progress",
            CoordinatorError::DependencyUnavailable { .. } => "dependency_unavailable",
            CoordinatorError::AgentUnrecoverable { .. } => "agent_unrecoverable",
            CoordinatorError::ExecutionFailed(_) => "execution_failed",
            CoordinatorError::Timeout { .. } => "timeout",
            CoordinatorError::UnknownTopology(_) => "unknown_topology",
            CoordinatorError::UnknownCategory(_) => "unknown_category",
        }
    }
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;

/// Run an external call under a timeout, mapping both failure modes
/// into the coordinator taxonomy.
pub(crate) async fn bounded<T, F>(
    operation: &'static str,
    timeout: Duration,
    call: F,
) -> Result<T>
where
    F: std::future::Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(CoordinatorError::ExecutionFailed(format!("{:#}", e))),
        Err(_) => Err(CoordinatorError::Timeout { operation, timeout }),
    }
}
