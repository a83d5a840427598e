//! In-process agent pool
//!
//! A fixed set of local agents that lets the daemon run without an
//! external agent fleet. Operations run inline; the pool keeps per-window
//! latency and error counts to answer metric collections.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use coordinator_lib::{AgentExecutionLayer, AgentHeartbeat, AgentSpec, Operation, RawMetrics, Topology};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone)]
struct LocalAgent {
    started_at: i64,
    executed: u64,
}

impl LocalAgent {
    fn new() -> Self {
        Self {
            started_at: chrono::Utc::now().timestamp_millis(),
            executed: 0,
        }
    }
}

/// Dispatch outcomes since the last collection
#[derive(Debug)]
struct Window {
    started: Instant,
    operations: u64,
    errors: u64,
    latency_us: u64,
}

impl Window {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            operations: 0,
            errors: 0,
            latency_us: 0,
        }
    }
}

/// Routing state driven by topology switches
#[derive(Debug, Clone, Copy)]
struct Routing {
    active: Topology,
    /// Topology being migrated to and the share of traffic it receives
    migrating: Option<(Topology, f64)>,
}

pub struct LocalAgentPool {
    agents: DashMap<String, LocalAgent>,
    next_id: AtomicU64,
    cursor: AtomicUsize,
    in_flight: AtomicUsize,
    window: Mutex<Window>,
    routing: Mutex<Routing>,
}

impl LocalAgentPool {
    pub fn new(size: usize, topology: Topology) -> Self {
        let pool = Self {
            agents: DashMap::new(),
            next_id: AtomicU64::new(0),
            cursor: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            window: Mutex::new(Window::new()),
            routing: Mutex::new(Routing {
                active: topology,
                migrating: None,
            }),
        };
        for _ in 0..size.max(1) {
            let id = pool.allocate_id();
            pool.agents.insert(id, LocalAgent::new());
        }
        pool
    }

    fn allocate_id(&self) -> String {
        format!("agent-{}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn size(&self) -> usize {
        self.agents.len()
    }

    pub fn agent_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.agents.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn active_topology(&self) -> Topology {
        self.routing.lock().unwrap_or_else(|e| e.into_inner()).active
    }

    /// Round-robin choice of the next agent
    fn next_agent(&self) -> Option<String> {
        let ids = self.agent_ids();
        if ids.is_empty() {
            return None;
        }
        let n = self.cursor.fetch_add(1, Ordering::Relaxed);
        Some(ids[n % ids.len()].clone())
    }

    fn record(&self, started: Instant, success: bool) {
        let mut window = self.window.lock().unwrap_or_else(|e| e.into_inner());
        window.operations += 1;
        window.latency_us += started.elapsed().as_micros() as u64;
        if !success {
            window.errors += 1;
        }
    }
}

#[async_trait]
impl AgentExecutionLayer for LocalAgentPool {
    async fn execute_on_topology(
        &self,
        topology: Topology,
        operation: &Operation,
    ) -> Result<serde_json::Value> {
        let started = Instant::now();
        let agent_id = self
            .next_agent()
            .ok_or_else(|| anyhow!("no agents available"))?;

        self.in_flight.fetch_add(1, Ordering::Relaxed);
        tokio::task::yield_now().await;
        self.in_flight.fetch_sub(1, Ordering::Relaxed);

        if let Some(mut agent) = self.agents.get_mut(&agent_id) {
            agent.executed += 1;
        }

        // Callers can exercise failure handling with {"fail": true}
        let failed = operation
            .payload
            .get("fail")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        self.record(started, !failed);
        if failed {
            bail!("operation {} failed on {}", operation.id, agent_id);
        }

        Ok(serde_json::json!({
            "operation_id": operation.id,
            "category": operation.category,
            "agent": agent_id,
            "topology": topology,
            "payload": operation.payload,
        }))
    }

    async fn check_health(&self) -> Result<Vec<AgentHeartbeat>> {
        let now = chrono::Utc::now().timestamp_millis();
        Ok(self
            .agent_ids()
            .into_iter()
            .map(|agent_id| AgentHeartbeat {
                agent_id,
                alive: true,
                last_heartbeat: now,
            })
            .collect())
    }

    async fn restart(&self, agent_id: &str) -> Result<()> {
        let mut agent = self
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| anyhow!("unknown agent {}", agent_id))?;
        *agent = LocalAgent::new();
        info!(agent_id = %agent_id, "Local agent restarted");
        Ok(())
    }

    async fn create_replacement(&self, spec: &AgentSpec) -> Result<String> {
        self.agents.remove(&spec.replaces);
        let id = self.allocate_id();
        self.agents.insert(id.clone(), LocalAgent::new());
        info!(replaces = %spec.replaces, agent_id = %id, topology = %spec.topology, "Local agent replaced");
        Ok(id)
    }

    async fn collect_metrics(&self) -> Result<RawMetrics> {
        let window = std::mem::replace(
            &mut *self.window.lock().unwrap_or_else(|e| e.into_inner()),
            Window::new(),
        );
        let elapsed = window.started.elapsed().as_secs_f64().max(1e-3);
        let agents = self.agents.len().max(1);

        let (avg_response_time_ms, error_rate) = if window.operations == 0 {
            (0.0, 0.0)
        } else {
            (
                window.latency_us as f64 / window.operations as f64 / 1000.0,
                window.errors as f64 / window.operations as f64,
            )
        };

        let oldest = self.agents.iter().map(|e| e.started_at).min().unwrap_or_default();
        let executed: u64 = self.agents.iter().map(|e| e.executed).sum();
        let mut domain_counters = BTreeMap::new();
        domain_counters.insert("agents".to_string(), agents as f64);
        domain_counters.insert("executed_total".to_string(), executed as f64);
        domain_counters.insert(
            "oldest_agent_age_secs".to_string(),
            ((chrono::Utc::now().timestamp_millis() - oldest) / 1000) as f64,
        );

        Ok(RawMetrics {
            avg_response_time_ms,
            throughput: window.operations as f64 / elapsed,
            error_rate,
            resource_utilization: (self.in_flight.load(Ordering::Relaxed) as f64
                / agents as f64)
                .min(1.0),
            domain_counters,
        })
    }

    async fn prepare_topology(&self, topology: Topology) -> Result<()> {
        debug!(topology = %topology, agents = self.agents.len(), "Preparing local topology");
        Ok(())
    }

    async fn migrate(&self, from: Topology, to: Topology, fraction: f64) -> Result<()> {
        let mut routing = self.routing.lock().unwrap_or_else(|e| e.into_inner());
        if fraction >= 1.0 {
            routing.active = to;
            routing.migrating = None;
        } else {
            routing.migrating = Some((to, fraction));
        }
        debug!(from = %from, to = %to, fraction = fraction, "Local routing migrated");
        Ok(())
    }

    async fn restore(&self, topology: Topology) -> Result<()> {
        let mut routing = self.routing.lock().unwrap_or_else(|e| e.into_inner());
        routing.active = topology;
        routing.migrating = None;
        debug!(topology = %topology, "Local routing restored");
        Ok(())
    }
}
