//! Agent health polling and recovery
//!
//! Each tick polls the agent layer for heartbeats. An agent that stays
//! unhealthy for `unhealthy_threshold` consecutive polls is restarted once;
//! if the restart fails a single replacement is provisioned and the failed
//! agent is retired. Workloads held by a failed agent are redistributed to
//! healthy agents in both cases.

use super::circuit_breaker::{BreakerConfig, CircuitBreakerRegistry};
use crate::error::{bounded, CoordinatorError};
use crate::events::{CoordinatorEvent, EventSink};
use crate::execution::AgentExecutionLayer;
use crate::health::{components, HealthRegistry};
use crate::models::{AgentHealthRecord, AgentHeartbeat, AgentSpec};
use crate::switch::TopologyCell;
use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct FaultConfig {
    /// Health poll interval (default: 5 seconds)
    pub interval: Duration,
    /// Upper bound for one health poll
    pub health_timeout: Duration,
    /// Upper bound for one restart or replacement call
    pub recovery_timeout: Duration,
    /// Consecutive unhealthy polls before recovery starts
    pub unhealthy_threshold: u32,
    /// Breaker settings applied to every external dependency
    pub breaker: BreakerConfig,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            health_timeout: Duration::from_secs(2),
            recovery_timeout: Duration::from_secs(10),
            unhealthy_threshold: 2,
            breaker: BreakerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryOutcome {
    /// The agent came back after a restart
    Recovered,
    /// The agent was retired and a replacement provisioned
    Replaced,
    /// Neither restart nor replacement succeeded
    Failed,
}

impl RecoveryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryOutcome::Recovered => "recovered",
            RecoveryOutcome::Replaced => "replaced",
            RecoveryOutcome::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryReport {
    pub agent_id: String,
    pub outcome: RecoveryOutcome,
    pub replacement: Option<String>,
    /// Workloads moved to other agents
    pub redistributed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A workload held on an agent for as long as the lease lives
pub struct WorkloadLease<'a> {
    manager: &'a FaultToleranceManager,
    workload: String,
    agent_id: Option<String>,
}

impl WorkloadLease<'_> {
    /// Agent the workload was first assigned to
    pub fn agent_id(&self) -> Option<&str> {
        self.agent_id.as_deref()
    }
}

impl Drop for WorkloadLease<'_> {
    fn drop(&mut self) {
        self.manager.release_workload(&self.workload);
    }
}

pub struct FaultToleranceManager {
    layer: Arc<dyn AgentExecutionLayer>,
    topology: Arc<TopologyCell>,
    agents: DashMap<String, AgentHealthRecord>,
    /// Agents that were replaced; their heartbeats are ignored from then on
    retired: DashSet<String>,
    /// Workloads no healthy agent could take yet
    orphaned: Mutex<Vec<String>>,
    breakers: CircuitBreakerRegistry,
    config: FaultConfig,
    events: EventSink,
    health: Option<HealthRegistry>,
}

impl FaultToleranceManager {
    pub fn new(
        layer: Arc<dyn AgentExecutionLayer>,
        topology: Arc<TopologyCell>,
        config: FaultConfig,
        events: EventSink,
    ) -> Self {
        Self {
            layer,
            topology,
            agents: DashMap::new(),
            retired: DashSet::new(),
            orphaned: Mutex::new(Vec::new()),
            breakers: CircuitBreakerRegistry::new(config.breaker, events.clone()),
            config,
            events,
            health: None,
        }
    }

    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    /// Start tracking an agent before its first heartbeat arrives
    pub fn register_agent(&self, agent_id: impl Into<String>) {
        let agent_id = agent_id.into();
        if self.retired.contains(&agent_id) {
            return;
        }
        self.agents
            .entry(agent_id.clone())
            .or_insert_with(|| AgentHealthRecord::new(agent_id));
    }

    /// All tracked agents, sorted by id
    pub fn agents(&self) -> Vec<AgentHealthRecord> {
        let mut agents: Vec<_> = self.agents.iter().map(|e| e.value().clone()).collect();
        agents.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        agents
    }

    pub fn agent(&self, agent_id: &str) -> Option<AgentHealthRecord> {
        self.agents.get(agent_id).map(|e| e.value().clone())
    }

    pub fn is_retired(&self, agent_id: &str) -> bool {
        self.retired.contains(agent_id)
    }

    pub fn healthy_count(&self) -> usize {
        self.agents.iter().filter(|e| e.alive).count()
    }

    pub fn orphaned(&self) -> Vec<String> {
        self.orphaned
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Assign a workload to the least-loaded healthy agent
    pub fn assign_workload(&self, workload: impl Into<String>) -> Option<String> {
        let workload = workload.into();
        let agent_id = self.least_loaded(None)?;
        self.agents
            .get_mut(&agent_id)
            .map(|mut record| record.workloads.push(workload))?;
        Some(agent_id)
    }

    /// Assign a workload that is released again when the lease drops,
    /// however the work holding it ends
    pub fn lease_workload(&self, workload: impl Into<String>) -> WorkloadLease<'_> {
        let workload = workload.into();
        let agent_id = self.assign_workload(workload.clone());
        WorkloadLease {
            manager: self,
            workload,
            agent_id,
        }
    }

    /// Forget a finished workload wherever it is held
    pub fn release_workload(&self, workload: &str) {
        for mut record in self.agents.iter_mut() {
            record.workloads.retain(|w| w != workload);
        }
        self.orphaned
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|w| w != workload);
    }

    fn least_loaded(&self, exclude: Option<&str>) -> Option<String> {
        self.agents
            .iter()
            .filter(|e| e.alive && Some(e.key().as_str()) != exclude)
            .min_by(|a, b| {
                a.workloads
                    .len()
                    .cmp(&b.workloads.len())
                    .then_with(|| a.key().cmp(b.key()))
            })
            .map(|e| e.key().clone())
    }

    /// Move workloads off `from` onto healthy agents. Whatever cannot be
    /// placed is parked as orphaned until an agent is available.
    fn redistribute(&self, from: &str, workloads: Vec<String>) -> usize {
        let mut placed = 0;
        let mut parked = Vec::new();
        for workload in workloads {
            let target = self
                .least_loaded(Some(from))
                .or_else(|| self.least_loaded(None));
            match target.and_then(|id| self.agents.get_mut(&id)) {
                Some(mut record) => {
                    record.workloads.push(workload);
                    placed += 1;
                }
                None => parked.push(workload),
            }
        }
        if !parked.is_empty() {
            warn!(
                agent_id = %from,
                orphaned = parked.len(),
                "No healthy agent available, workloads parked"
            );
            self.orphaned
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .extend(parked);
        }
        placed
    }

    fn place_orphans(&self) {
        let orphans = std::mem::take(&mut *self.orphaned.lock().unwrap_or_else(|e| e.into_inner()));
        if orphans.is_empty() {
            return;
        }
        let placed = self.redistribute("", orphans);
        if placed > 0 {
            info!(placed = placed, "Orphaned workloads placed");
        }
    }

    /// One health poll followed by recovery of agents past the threshold
    pub async fn poll(&self) -> Vec<RecoveryReport> {
        match bounded(
            "agent health check",
            self.config.health_timeout,
            self.layer.check_health(),
        )
        .await
        {
            Ok(heartbeats) => self.apply_heartbeats(heartbeats),
            Err(e) => {
                // No answer counts against every agent
                warn!(error = %e, "Agent health check failed");
                let ids: Vec<String> = self.agents.iter().map(|e| e.key().clone()).collect();
                for id in ids {
                    self.mark_unhealthy(&id);
                }
            }
        }

        let due: Vec<String> = self
            .agents
            .iter()
            .filter(|e| !e.alive && e.consecutive_failures >= self.config.unhealthy_threshold)
            .map(|e| e.key().clone())
            .collect();

        let mut reports = Vec::with_capacity(due.len());
        for agent_id in due {
            reports.push(self.recover(&agent_id).await);
        }

        self.place_orphans();
        self.report_health().await;
        reports
    }

    fn apply_heartbeats(&self, heartbeats: Vec<AgentHeartbeat>) {
        for heartbeat in heartbeats {
            if self.retired.contains(&heartbeat.agent_id) {
                debug!(agent_id = %heartbeat.agent_id, "Ignoring heartbeat from retired agent");
                continue;
            }
            if heartbeat.alive {
                let mut record = self
                    .agents
                    .entry(heartbeat.agent_id.clone())
                    .or_insert_with(|| AgentHealthRecord::new(heartbeat.agent_id.clone()));
                record.alive = true;
                record.consecutive_failures = 0;
                record.last_heartbeat = heartbeat.last_heartbeat;
            } else {
                self.agents
                    .entry(heartbeat.agent_id.clone())
                    .or_insert_with(|| AgentHealthRecord::new(heartbeat.agent_id.clone()));
                self.mark_unhealthy(&heartbeat.agent_id);
            }
        }
    }

    fn mark_unhealthy(&self, agent_id: &str) {
        let failures = match self.agents.get_mut(agent_id) {
            Some(mut record) => {
                record.alive = false;
                record.consecutive_failures = record.consecutive_failures.saturating_add(1);
                record.consecutive_failures
            }
            None => return,
        };
        self.events.emit(CoordinatorEvent::AgentUnhealthy {
            agent_id: agent_id.to_string(),
            consecutive_failures: failures,
        });
    }

    async fn recover(&self, agent_id: &str) -> RecoveryReport {
        let restart = bounded(
            "agent restart",
            self.config.recovery_timeout,
            self.layer.restart(agent_id),
        )
        .await;

        let report = match restart {
            Ok(()) => {
                let workloads = match self.agents.get_mut(agent_id) {
                    Some(mut record) => {
                        record.alive = true;
                        record.consecutive_failures = 0;
                        record.last_heartbeat = chrono::Utc::now().timestamp_millis();
                        std::mem::take(&mut record.workloads)
                    }
                    None => Vec::new(),
                };
                let redistributed = self.redistribute(agent_id, workloads);
                RecoveryReport {
                    agent_id: agent_id.to_string(),
                    outcome: RecoveryOutcome::Recovered,
                    replacement: None,
                    redistributed,
                    error: None,
                }
            }
            Err(restart_error) => {
                warn!(agent_id = %agent_id, error = %restart_error, "Agent restart failed, provisioning replacement");
                self.replace(agent_id, restart_error).await
            }
        };

        self.events.emit(CoordinatorEvent::AgentRecovery {
            agent_id: report.agent_id.clone(),
            outcome: report.outcome,
            replacement: report.replacement.clone(),
            redistributed: report.redistributed,
        });
        report
    }

    async fn replace(&self, agent_id: &str, restart_error: CoordinatorError) -> RecoveryReport {
        let spec = AgentSpec {
            replaces: agent_id.to_string(),
            topology: self.topology.get(),
        };
        let replacement = bounded(
            "agent replacement",
            self.config.recovery_timeout,
            self.layer.create_replacement(&spec),
        )
        .await;

        match replacement {
            Ok(new_id) => {
                self.retired.insert(agent_id.to_string());
                let workloads = self
                    .agents
                    .remove(agent_id)
                    .map(|(_, record)| record.workloads)
                    .unwrap_or_default();
                self.agents
                    .insert(new_id.clone(), AgentHealthRecord::new(new_id.clone()));
                let redistributed = self.redistribute(agent_id, workloads);
                RecoveryReport {
                    agent_id: agent_id.to_string(),
                    outcome: RecoveryOutcome::Replaced,
                    replacement: Some(new_id),
                    redistributed,
                    error: None,
                }
            }
            Err(replace_error) => {
                let unrecoverable = CoordinatorError::AgentUnrecoverable {
                    agent_id: agent_id.to_string(),
                    reason: format!("restart: {}; replacement: {}", restart_error, replace_error),
                };
                error!(agent_id = %agent_id, error = %unrecoverable, "Agent unrecoverable");

                // Start counting again so recovery is retried after another
                // full threshold of failed polls
                let workloads = match self.agents.get_mut(agent_id) {
                    Some(mut record) => {
                        record.consecutive_failures = 0;
                        std::mem::take(&mut record.workloads)
                    }
                    None => Vec::new(),
                };
                let redistributed = self.redistribute(agent_id, workloads);
                RecoveryReport {
                    agent_id: agent_id.to_string(),
                    outcome: RecoveryOutcome::Failed,
                    replacement: None,
                    redistributed,
                    error: Some(unrecoverable.to_string()),
                }
            }
        }
    }

    async fn report_health(&self) {
        let total = self.agents.len();
        let healthy = self.healthy_count();
        self.events.metrics().set_healthy_agents(healthy as i64);
        if let Some(health) = &self.health {
            health.report_agents(healthy, total).await;
            let open = self.breakers.open_dependencies();
            if open.is_empty() {
                health.set_healthy(components::FAULT_TOLERANCE).await;
            } else {
                health
                    .set_degraded(
                        components::FAULT_TOLERANCE,
                        format!("circuit open for {}", open.join(", ")),
                    )
                    .await;
            }
        }
    }

    /// Poll on the configured interval until shutdown
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            threshold = self.config.unhealthy_threshold,
            "Starting fault tolerance manager"
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let reports = self.poll().await;
                    if !reports.is_empty() {
                        debug!(recoveries = reports.len(), "Health poll finished with recoveries");
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down fault tolerance manager");
                    break;
                }
            }
        }
    }
}
