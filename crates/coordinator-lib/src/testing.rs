//! Scriptable agent execution layer shared by unit tests

use crate::execution::AgentExecutionLayer;
use crate::models::{AgentHeartbeat, AgentSpec, Operation, RawMetrics, Topology};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub(crate) fn metrics(rt: f64, error_rate: f64) -> RawMetrics {
    RawMetrics {
        avg_response_time_ms: rt,
        throughput: 50.0,
        error_rate,
        resource_utilization: 0.4,
        ..Default::default()
    }
}

pub(crate) fn heartbeat(agent_id: &str, alive: bool) -> AgentHeartbeat {
    AgentHeartbeat {
        agent_id: agent_id.to_string(),
        alive,
        last_heartbeat: chrono::Utc::now().timestamp_millis(),
    }
}

#[derive(Default)]
pub(crate) struct MockLayer {
    /// Queued metric replies; the last one repeats once the queue drains
    pub metrics: Mutex<VecDeque<RawMetrics>>,
    pub metrics_delay: Mutex<Duration>,
    pub heartbeats: Mutex<Vec<AgentHeartbeat>>,
    pub health_delay: Mutex<Duration>,
    pub prepare_delay: Mutex<Duration>,
    pub fail_prepare: AtomicBool,
    pub fail_migrate: AtomicBool,
    pub fail_restore: AtomicBool,
    pub fail_restart: AtomicBool,
    pub fail_replacement: AtomicBool,
    pub failing_topologies: Mutex<HashSet<Topology>>,

    pub executed_on: Mutex<Vec<Topology>>,
    pub prepared: Mutex<Vec<Topology>>,
    pub migrations: Mutex<Vec<f64>>,
    pub restores: Mutex<Vec<Topology>>,
    pub restarts: AtomicUsize,
    pub replacements: AtomicUsize,
    pub collects: AtomicUsize,
}

impl MockLayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metrics(self, replies: Vec<RawMetrics>) -> Self {
        *self.metrics.lock().unwrap() = replies.into();
        self
    }

    pub fn with_heartbeats(self, heartbeats: Vec<AgentHeartbeat>) -> Self {
        *self.heartbeats.lock().unwrap() = heartbeats;
        self
    }

    pub fn failing_on(self, topology: Topology) -> Self {
        self.failing_topologies.lock().unwrap().insert(topology);
        self
    }
}

#[async_trait]
impl AgentExecutionLayer for MockLayer {
    async fn execute_on_topology(
        &self,
        topology: Topology,
        operation: &Operation,
    ) -> Result<serde_json::Value> {
        self.executed_on.lock().unwrap().push(topology);
        if self.failing_topologies.lock().unwrap().contains(&topology) {
            return Err(anyhow!("{} topology rejected {}", topology, operation.id));
        }
        Ok(serde_json::json!({ "operation": operation.id, "topology": topology }))
    }

    async fn check_health(&self) -> Result<Vec<AgentHeartbeat>> {
        let delay = *self.health_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(self.heartbeats.lock().unwrap().clone())
    }

    async fn restart(&self, agent_id: &str) -> Result<()> {
        self.restarts.fetch_add(1, Ordering::SeqCst);
        if self.fail_restart.load(Ordering::SeqCst) {
            return Err(anyhow!("{} did not come back", agent_id));
        }
        Ok(())
    }

    async fn create_replacement(&self, spec: &AgentSpec) -> Result<String> {
        let n = self.replacements.fetch_add(1, Ordering::SeqCst);
        if self.fail_replacement.load(Ordering::SeqCst) {
            return Err(anyhow!("no capacity to replace {}", spec.replaces));
        }
        Ok(format!("{}-r{}", spec.replaces, n + 1))
    }

    async fn collect_metrics(&self) -> Result<RawMetrics> {
        self.collects.fetch_add(1, Ordering::SeqCst);
        let delay = *self.metrics_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mut queue = self.metrics.lock().unwrap();
        let reply = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        reply.ok_or_else(|| anyhow!("no metrics available"))
    }

    async fn prepare_topology(&self, topology: Topology) -> Result<()> {
        let delay = *self.prepare_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.prepared.lock().unwrap().push(topology);
        if self.fail_prepare.load(Ordering::SeqCst) {
            return Err(anyhow!("cannot allocate {} resources", topology));
        }
        Ok(())
    }

    async fn migrate(&self, _from: Topology, _to: Topology, fraction: f64) -> Result<()> {
        self.migrations.lock().unwrap().push(fraction);
        if self.fail_migrate.load(Ordering::SeqCst) && fraction > 0.5 {
            return Err(anyhow!("routing update rejected at {:.0}%", fraction * 100.0));
        }
        Ok(())
    }

    async fn restore(&self, topology: Topology) -> Result<()> {
        self.restores.lock().unwrap().push(topology);
        if self.fail_restore.load(Ordering::SeqCst) {
            return Err(anyhow!("restore of {} failed", topology));
        }
        Ok(())
    }
}
