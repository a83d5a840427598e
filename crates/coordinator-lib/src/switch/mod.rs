//! Topology switching

pub mod controller;
pub mod state;

pub use controller::{SwitchConfig, SwitchEvaluation, SwitchOutcome, TopologySwitchController};
pub use state::{SwitchPhase, TopologyCell};
