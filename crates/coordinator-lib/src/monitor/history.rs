//! Bounded rolling history of performance snapshots

use crate::models::{PerformanceSnapshot, Topology};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::RwLock;

/// Default number of snapshots retained
pub const DEFAULT_RETENTION: usize = 500;

/// Append-only history; oldest entries are evicted past the retention size
#[derive(Debug)]
pub struct PerformanceHistory {
    samples: RwLock<VecDeque<PerformanceSnapshot>>,
    retention: usize,
}

impl Default for PerformanceHistory {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}

impl PerformanceHistory {
    pub fn new(retention: usize) -> Self {
        let retention = retention.max(1);
        Self {
            samples: RwLock::new(VecDeque::with_capacity(retention.min(1024))),
            retention,
        }
    }

    /// Append a snapshot, returning the resulting history length
    pub fn push(&self, snapshot: PerformanceSnapshot) -> usize {
        let mut samples = self.samples.write().unwrap_or_else(|e| e.into_inner());
        while samples.len() >= self.retention {
            samples.pop_front();
        }
        samples.push_back(snapshot);
        samples.len()
    }

    pub fn latest(&self) -> Option<PerformanceSnapshot> {
        self.read(|samples| samples.back().cloned())
    }

    /// Most recent snapshot with traffic taken while `topology` was in
    /// effect
    pub fn latest_for(&self, topology: Topology) -> Option<PerformanceSnapshot> {
        self.read(|samples| {
            samples
                .iter()
                .rev()
                .find(|s| s.topology == topology && !s.is_idle())
                .cloned()
        })
    }

    /// Copy of the newest `limit` snapshots, oldest first
    pub fn recent(&self, limit: usize) -> Vec<PerformanceSnapshot> {
        self.read(|samples| {
            let skip = samples.len().saturating_sub(limit);
            samples.iter().skip(skip).cloned().collect()
        })
    }

    /// Copy of the whole history, oldest first
    pub fn snapshot(&self) -> Vec<PerformanceSnapshot> {
        self.read(|samples| samples.iter().cloned().collect())
    }

    pub fn len(&self) -> usize {
        self.read(|samples| samples.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn retention(&self) -> usize {
        self.retention
    }

    /// Means over the newest `window` snapshots
    pub fn summary(&self, window: usize) -> Option<PerformanceSummary> {
        let recent = self.recent(window);
        if recent.is_empty() {
            return None;
        }
        let n = recent.len() as f64;
        let mut per_topology = BTreeMap::new();
        for snapshot in &recent {
            *per_topology.entry(snapshot.topology).or_insert(0usize) += 1;
        }
        Some(PerformanceSummary {
            samples: recent.len(),
            avg_response_time_ms: recent.iter().map(|s| s.avg_response_time_ms).sum::<f64>() / n,
            avg_throughput: recent.iter().map(|s| s.throughput).sum::<f64>() / n,
            avg_error_rate: recent.iter().map(|s| s.error_rate).sum::<f64>() / n,
            avg_resource_utilization: recent.iter().map(|s| s.resource_utilization).sum::<f64>()
                / n,
            samples_per_topology: per_topology,
        })
    }

    fn read<T>(&self, f: impl FnOnce(&VecDeque<PerformanceSnapshot>) -> T) -> T {
        let samples = self.samples.read().unwrap_or_else(|e| e.into_inner());
        f(&samples)
    }
}

/// Window means over the history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub samples: usize,
    pub avg_response_time_ms: f64,
    pub avg_throughput: f64,
    pub avg_error_rate: f64,
    pub avg_resource_utilization: f64,
    pub samples_per_topology: BTreeMap<Topology, usize>,
}
