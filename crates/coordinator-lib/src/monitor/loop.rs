//! Periodic performance sampling
//!
//! Every tick the monitor pulls aggregate metrics from the agent layer,
//! folds in what the coordinator observed locally while dispatching,
//! tags the result with the committed topology and appends it to the
//! history. Unhealthy samples raise an optimization trigger.

use super::counters::DispatchCounters;
use super::history::{PerformanceHistory, DEFAULT_RETENTION};
use crate::error::{bounded, Result};
use crate::execution::AgentExecutionLayer;
use crate::health::{components, HealthRegistry};
use crate::models::{PerformanceSnapshot, RawMetrics};
use crate::observability::CoordinatorMetrics;
use crate::switch::TopologyCell;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Sampling interval (default: 10 seconds)
    pub interval: Duration,
    /// Upper bound for one metrics collection
    pub collect_timeout: Duration,
    /// Snapshots kept in the rolling history
    pub retention: usize,
    /// Average response time above which optimization is recommended
    pub max_response_time_ms: f64,
    /// Error rate above which optimization is recommended
    pub max_error_rate: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            collect_timeout: Duration::from_secs(5),
            retention: DEFAULT_RETENTION,
            max_response_time_ms: 1000.0,
            max_error_rate: 0.05,
        }
    }
}

/// Raised when a sample crosses a health threshold
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizationTrigger {
    pub reason: String,
    pub snapshot: PerformanceSnapshot,
}

/// Reason the snapshot warrants re-optimization, if any
pub fn should_optimize(snapshot: &PerformanceSnapshot, config: &MonitorConfig) -> Option<String> {
    if snapshot.avg_response_time_ms > config.max_response_time_ms {
        Some(format!(
            "average response time {:.0}ms exceeds {:.0}ms",
            snapshot.avg_response_time_ms, config.max_response_time_ms
        ))
    } else if snapshot.error_rate > config.max_error_rate {
        Some(format!(
            "error rate {:.1}% exceeds {:.1}%",
            snapshot.error_rate * 100.0,
            config.max_error_rate * 100.0
        ))
    } else {
        None
    }
}

pub struct PerformanceMonitor {
    layer: Arc<dyn AgentExecutionLayer>,
    topology: Arc<TopologyCell>,
    history: Arc<PerformanceHistory>,
    counters: Arc<DispatchCounters>,
    config: MonitorConfig,
    health: Option<HealthRegistry>,
    metrics: CoordinatorMetrics,
}

impl PerformanceMonitor {
    pub fn new(
        layer: Arc<dyn AgentExecutionLayer>,
        topology: Arc<TopologyCell>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            layer,
            topology,
            history: Arc::new(PerformanceHistory::new(config.retention)),
            counters: Arc::new(DispatchCounters::new()),
            config,
            health: None,
            metrics: CoordinatorMetrics::new(),
        }
    }

    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn history(&self) -> &Arc<PerformanceHistory> {
        &self.history
    }

    pub fn counters(&self) -> &Arc<DispatchCounters> {
        &self.counters
    }

    /// Collect one snapshot and append it to the history
    pub async fn sample(&self) -> Result<PerformanceSnapshot> {
        let raw = bounded(
            "metrics collection",
            self.config.collect_timeout,
            self.layer.collect_metrics(),
        )
        .await?;

        let raw = self.merge_local(raw);
        let snapshot = PerformanceSnapshot::from_raw(self.topology.get(), raw);
        let size = self.history.push(snapshot.clone());
        self.metrics.set_performance_history_size(size as i64);
        Ok(snapshot)
    }

    /// Blend layer-reported metrics with locally observed dispatches
    fn merge_local(&self, mut raw: RawMetrics) -> RawMetrics {
        let Some(local) = self.counters.take() else {
            return raw;
        };
        let rate = local.operations as f64 / self.config.interval.as_secs_f64().max(1e-3);
        raw.avg_response_time_ms = (raw.avg_response_time_ms + local.avg_latency_ms) / 2.0;
        raw.error_rate = raw.error_rate.max(local.error_rate());
        raw.throughput = raw.throughput.max(rate);
        raw
    }

    /// One monitoring cycle. Skipped while a switch attempt owns the
    /// traffic window.
    pub async fn tick(&self) -> Option<OptimizationTrigger> {
        if self.topology.is_switching() {
            debug!("Switch in progress, skipping performance sample");
            return None;
        }
        match self.sample().await {
            Ok(snapshot) => {
                if let Some(health) = &self.health {
                    health.set_healthy(components::PERFORMANCE_MONITOR).await;
                }
                debug!(
                    topology = %snapshot.topology,
                    avg_response_time_ms = snapshot.avg_response_time_ms,
                    error_rate = snapshot.error_rate,
                    throughput = snapshot.throughput,
                    "Performance sample recorded"
                );
                should_optimize(&snapshot, &self.config)
                    .map(|reason| OptimizationTrigger { reason, snapshot })
            }
            Err(e) => {
                warn!(error = %e, "Performance sample failed");
                if let Some(health) = &self.health {
                    health
                        .set_degraded(components::PERFORMANCE_MONITOR, e.to_string())
                        .await;
                }
                None
            }
        }
    }

    /// Run until shutdown, forwarding optimization triggers
    pub async fn run(
        self: Arc<Self>,
        triggers: mpsc::Sender<OptimizationTrigger>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            "Starting performance monitor"
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Some(trigger) = self.tick().await {
                        info!(reason = %trigger.reason, "Performance degraded, requesting optimization");
                        // A full channel means an optimization is already queued
                        if let Err(e) = triggers.try_send(trigger) {
                            debug!(error = %e, "Optimization trigger dropped");
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down performance monitor");
                    break;
                }
            }
        }
    }
}
