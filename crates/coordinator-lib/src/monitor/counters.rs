//! Local dispatch counters merged into each performance tick

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Dispatch outcomes observed since the last tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalSample {
    pub operations: u64,
    pub errors: u64,
    pub avg_latency_ms: f64,
}

impl LocalSample {
    pub fn error_rate(&self) -> f64 {
        if self.operations == 0 {
            0.0
        } else {
            self.errors as f64 / self.operations as f64
        }
    }
}

#[derive(Debug, Default)]
pub struct DispatchCounters {
    operations: AtomicU64,
    errors: AtomicU64,
    latency_us: AtomicU64,
}

impl DispatchCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, latency: Duration, success: bool) {
        self.operations.fetch_add(1, Ordering::Relaxed);
        self.latency_us
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
        if !success {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Drain the counters. `None` when nothing was dispatched.
    pub fn take(&self) -> Option<LocalSample> {
        let operations = self.operations.swap(0, Ordering::Relaxed);
        let errors = self.errors.swap(0, Ordering::Relaxed);
        let latency_us = self.latency_us.swap(0, Ordering::Relaxed);
        if operations == 0 {
            return None;
        }
        Some(LocalSample {
            operations,
            errors: errors.min(operations),
            avg_latency_ms: latency_us as f64 / operations as f64 / 1000.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_drains() {
        let counters = DispatchCounters::new();
        assert!(counters.take().is_none());

        counters.record(Duration::from_millis(10), true);
        counters.record(Duration::from_millis(30), false);

        let sample = counters.take().unwrap();
        assert_eq!(sample.operations, 2);
        assert_eq!(sample.errors, 1);
        assert!((sample.avg_latency_ms - 20.0).abs() < 1e-9);
        assert_eq!(sample.error_rate(), 0.5);

        assert!(counters.take().is_none());
    }
}
