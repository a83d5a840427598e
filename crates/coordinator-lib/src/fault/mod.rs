//! Fault tolerance: agent recovery and dependency circuit breakers

pub mod circuit_breaker;
pub mod manager;

pub use circuit_breaker::{
    dependencies, BreakerConfig, BreakerSnapshot, CircuitBreakerRegistry, CircuitState,
};
pub use manager::{
    FaultConfig, FaultToleranceManager, RecoveryOutcome, RecoveryReport, WorkloadLease,
};
