//! Performance monitoring
//!
//! - `history`: bounded rolling snapshot history
//! - `counters`: dispatch outcomes observed by the coordinator itself
//! - `loop`: the periodic sampler and its optimization predicate

pub mod counters;
pub mod history;
mod r#loop;

pub use counters::{DispatchCounters, LocalSample};
pub use history::{PerformanceHistory, PerformanceSummary, DEFAULT_RETENTION};
pub use r#loop::{should_optimize, MonitorConfig, OptimizationTrigger, PerformanceMonitor};
