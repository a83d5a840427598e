//! Adaptive coordinator
//!
//! Owns the committed topology and composes the analyzer, selector,
//! switch controller, performance monitor and fault tolerance manager.
//! Operations are routed to their pipeline's preferred topology through
//! a per-call override that never touches the committed topology.

mod pipelines;
mod profile;

pub use pipelines::PipelineRegistry;
pub use profile::{ProfileWindow, DEFAULT_PROFILE_WINDOW};

use crate::analysis::{AnalyzerConfig, Selection, TopologySelector, WorkloadAnalyzer};
use crate::error::{CoordinatorError, Result};
use crate::events::{CoordinatorEvent, EventSink};
use crate::execution::{AgentExecutionLayer, DomainPipeline, ExecutionContext};
use crate::fault::{BreakerSnapshot, FaultConfig, FaultToleranceManager};
use crate::health::{components, HealthRegistry};
use crate::models::{
    AgentHealthRecord, Operation, OperationResult, PerformanceSnapshot, Topology,
    TopologySwitchRecord, TransitionOutcome, WorkloadAnalysis, WorkloadDescriptor,
};
use crate::monitor::{
    MonitorConfig, OptimizationTrigger, PerformanceHistory, PerformanceMonitor,
    PerformanceSummary,
};
use crate::switch::{
    SwitchConfig, SwitchOutcome, SwitchPhase, TopologyCell, TopologySwitchController,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Optimization triggers waiting for the listener
const TRIGGER_BUFFER: usize = 8;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Name used in logs and events
    pub instance: String,
    pub initial_topology: Topology,
    /// Upper bound for one pipeline execution
    pub dispatch_timeout: Duration,
    /// Analyses kept for the aggregate profile
    pub profile_window: usize,
    pub analyzer: AnalyzerConfig,
    pub monitor: MonitorConfig,
    pub switch: SwitchConfig,
    pub fault: FaultConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            instance: "coordinator".to_string(),
            initial_topology: Topology::Hierarchical,
            dispatch_timeout: Duration::from_secs(30),
            profile_window: DEFAULT_PROFILE_WINDOW,
            analyzer: AnalyzerConfig::default(),
            monitor: MonitorConfig::default(),
            switch: SwitchConfig::default(),
            fault: FaultConfig::default(),
        }
    }
}

/// What the coordinator did about a recommendation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SwitchDecision {
    /// The recommendation matches the committed topology
    Unchanged,
    /// Predicted gain below the adaptation threshold
    Skipped { predicted_gain: f64 },
    Committed { record: TopologySwitchRecord },
    RolledBack { record: TopologySwitchRecord },
    /// The attempt failed and was rolled back
    Failed {
        error: String,
        record: Option<TopologySwitchRecord>,
    },
    /// Another switch was in flight
    Rejected { reason: String },
}

/// Result of analysing a workload and acting on the recommendation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptationReport {
    pub analysis: WorkloadAnalysis,
    pub selection: Selection,
    pub decision: SwitchDecision,
    /// Committed topology after the decision
    pub topology: Topology,
}

/// Side-effect-free analysis and selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub current: Topology,
    pub analysis: WorkloadAnalysis,
    pub selection: Selection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorStatus {
    pub instance: String,
    pub topology: Topology,
    pub switch_in_progress: bool,
    pub switch_phase: SwitchPhase,
    pub latest_snapshot: Option<PerformanceSnapshot>,
    pub healthy_agents: usize,
    pub total_agents: usize,
    pub open_breakers: Vec<String>,
    pub last_switch: Option<TopologySwitchRecord>,
    pub profile_size: usize,
}

pub struct AdaptiveCoordinator {
    config: CoordinatorConfig,
    layer: Arc<dyn AgentExecutionLayer>,
    topology: Arc<TopologyCell>,
    analyzer: WorkloadAnalyzer,
    selector: TopologySelector,
    pipelines: PipelineRegistry,
    profile: ProfileWindow,
    monitor: Arc<PerformanceMonitor>,
    switches: Arc<TopologySwitchController>,
    faults: Arc<FaultToleranceManager>,
    events: EventSink,
    health: HealthRegistry,
    dispatch_seq: AtomicU64,
}

impl AdaptiveCoordinator {
    pub fn new(layer: Arc<dyn AgentExecutionLayer>, config: CoordinatorConfig) -> Self {
        let events = EventSink::new(config.instance.clone());
        let health = HealthRegistry::new();
        let topology = Arc::new(TopologyCell::new(config.initial_topology));

        let monitor = Arc::new(
            PerformanceMonitor::new(layer.clone(), topology.clone(), config.monitor.clone())
                .with_health(health.clone()),
        );
        let switches = Arc::new(TopologySwitchController::new(
            layer.clone(),
            topology.clone(),
            monitor.history().clone(),
            config.switch.clone(),
            events.clone(),
        ));
        let faults = Arc::new(
            FaultToleranceManager::new(
                layer.clone(),
                topology.clone(),
                config.fault.clone(),
                events.clone(),
            )
            .with_health(health.clone()),
        );

        Self {
            analyzer: WorkloadAnalyzer::new(config.analyzer.clone()),
            selector: TopologySelector::default(),
            pipelines: PipelineRegistry::new(),
            profile: ProfileWindow::new(config.profile_window),
            dispatch_seq: AtomicU64::new(0),
            config,
            layer,
            topology,
            monitor,
            switches,
            faults,
            events,
            health,
        }
    }

    /// Use a custom rule table
    pub fn with_selector(mut self, selector: TopologySelector) -> Self {
        self.selector = selector;
        self
    }

    pub fn register_pipeline(&self, pipeline: Arc<dyn DomainPipeline>) {
        let category = pipeline.category();
        if self.pipelines.register(pipeline).is_some() {
            debug!(category = %category, "Replaced domain pipeline");
        }
    }

    pub fn topology(&self) -> Topology {
        self.topology.get()
    }

    pub fn events(&self) -> &EventSink {
        &self.events
    }

    pub fn health(&self) -> &HealthRegistry {
        &self.health
    }

    pub fn monitor(&self) -> &Arc<PerformanceMonitor> {
        &self.monitor
    }

    pub fn switches(&self) -> &Arc<TopologySwitchController> {
        &self.switches
    }

    pub fn faults(&self) -> &Arc<FaultToleranceManager> {
        &self.faults
    }

    pub fn history(&self) -> &Arc<PerformanceHistory> {
        self.monitor.history()
    }

    pub fn switch_history(&self) -> Vec<TopologySwitchRecord> {
        self.switches.records()
    }

    pub fn performance_history(&self, limit: usize) -> Vec<PerformanceSnapshot> {
        self.history().recent(limit)
    }

    pub fn performance_summary(&self, window: usize) -> Option<PerformanceSummary> {
        self.history().summary(window)
    }

    pub fn agents(&self) -> Vec<AgentHealthRecord> {
        self.faults.agents()
    }

    pub fn breakers(&self) -> Vec<BreakerSnapshot> {
        self.faults.breakers().snapshot()
    }

    pub fn status(&self) -> CoordinatorStatus {
        let agents = self.faults.agents();
        CoordinatorStatus {
            instance: self.config.instance.clone(),
            topology: self.topology.get(),
            switch_in_progress: self.switches.in_progress(),
            switch_phase: self.switches.phase(),
            latest_snapshot: self.history().latest(),
            healthy_agents: agents.iter().filter(|a| a.alive).count(),
            total_agents: agents.len(),
            open_breakers: self.faults.breakers().open_dependencies(),
            last_switch: self.switches.last_record(),
            profile_size: self.profile.len(),
        }
    }

    fn analyze(&self, descriptor: &WorkloadDescriptor) -> WorkloadAnalysis {
        let latest = self.history().latest();
        self.analyzer.analyze(descriptor, latest.as_ref())
    }

    /// Analysis and selection only; nothing is recorded or switched
    pub fn recommend(&self, descriptor: &WorkloadDescriptor) -> Recommendation {
        let current = self.topology.get();
        let analysis = self.analyze(descriptor);
        let selection = self.selector.select(&analysis, current);
        Recommendation {
            current,
            analysis,
            selection,
        }
    }

    /// Analyse a workload, add it to the profile and switch topology if
    /// the recommendation justifies it
    pub async fn submit_workload(&self, descriptor: &WorkloadDescriptor) -> AdaptationReport {
        let analysis = self.analyze(descriptor);
        self.profile.push(analysis.clone());
        self.adapt(analysis, "workload_submitted").await
    }

    /// Re-run selection over the aggregate profile. `None` while no
    /// workload has been profiled yet.
    pub async fn reoptimize(&self, trigger: &str) -> Option<AdaptationReport> {
        let Some(profile) = self.profile.aggregate() else {
            debug!(trigger = %trigger, "No workload profile yet, nothing to optimize");
            return None;
        };
        Some(self.adapt(profile, trigger).await)
    }

    async fn adapt(&self, analysis: WorkloadAnalysis, trigger: &str) -> AdaptationReport {
        let current = self.topology.get();
        let selection = self.selector.select(&analysis, current);

        let decision = if !selection.changes(current) {
            SwitchDecision::Unchanged
        } else {
            self.events.emit(CoordinatorEvent::OptimizationRecommended {
                current,
                recommended: selection.topology,
                reason: selection.reason.clone(),
                trigger: trigger.to_string(),
            });
            self.switch_to(selection.topology).await
        };

        AdaptationReport {
            analysis,
            selection,
            decision,
            topology: self.topology.get(),
        }
    }

    async fn switch_to(&self, target: Topology) -> SwitchDecision {
        match self.switches.request_switch(target).await {
            Ok(SwitchOutcome::Skipped(evaluation)) => SwitchDecision::Skipped {
                predicted_gain: evaluation.predicted_gain,
            },
            Ok(SwitchOutcome::Completed(record)) => {
                self.health.set_healthy(components::SWITCH_CONTROLLER).await;
                match record.outcome {
                    TransitionOutcome::Committed => SwitchDecision::Committed { record },
                    TransitionOutcome::RolledBack => SwitchDecision::RolledBack { record },
                }
            }
            Err(CoordinatorError::SwitchInProgress) => SwitchDecision::Rejected {
                reason: CoordinatorError::SwitchInProgress.to_string(),
            },
            Err(e) => {
                let rollback_failed = matches!(
                    &e,
                    CoordinatorError::MigrationFailed {
                        rollback_error: Some(_),
                        ..
                    }
                );
                if rollback_failed {
                    self.health
                        .set_degraded(components::SWITCH_CONTROLLER, e.to_string())
                        .await;
                }
                SwitchDecision::Failed {
                    error: e.to_string(),
                    record: self.switches.last_record(),
                }
            }
        }
    }

    /// Route an operation to its pipeline.
    ///
    /// The pipeline's preferred topology is used for this call only. An
    /// execution failure under such an override is retried once on the
    /// committed topology; `DependencyUnavailable` is returned as is.
    pub async fn dispatch(&self, operation: Operation) -> Result<OperationResult> {
        let started = Instant::now();
        let current = self.topology.get();
        let pipeline = self.pipelines.get(operation.category);
        let route = pipeline.preferred_topology().unwrap_or(current);
        let overridden = route != current;

        if let Some(descriptor) = &operation.descriptor {
            self.profile.push(self.analyze(descriptor));
        }
        if overridden {
            self.events.emit(CoordinatorEvent::TopologyOverridden {
                operation_id: operation.id.clone(),
                category: operation.category,
                current,
                route,
            });
        }

        // Released when dispatch returns or its future is dropped
        let lease = self.faults.lease_workload(format!(
            "{}#{}",
            operation.id,
            self.dispatch_seq.fetch_add(1, Ordering::Relaxed)
        ));

        let mut ran_on = route;
        let mut result = self.execute(pipeline.as_ref(), route, &operation).await;
        if overridden {
            if let Err(e) = &result {
                if retryable(e) {
                    warn!(
                        operation_id = %operation.id,
                        route = %route,
                        fallback = %current,
                        error = %e,
                        "Override failed, retrying on committed topology"
                    );
                    ran_on = current;
                    result = self.execute(pipeline.as_ref(), current, &operation).await;
                }
            }
        }

        drop(lease);

        let elapsed = started.elapsed();
        self.monitor.counters().record(elapsed, result.is_ok());
        let metrics = self.events.metrics();
        metrics.observe_dispatch_latency(elapsed.as_secs_f64());
        if let Err(e) = &result {
            metrics.inc_dispatch_errors(e.kind());
        }

        result.map(|output| OperationResult {
            operation_id: operation.id,
            topology: ran_on,
            overridden: ran_on != current,
            output,
            duration_ms: elapsed.as_millis() as u64,
        })
    }

    async fn execute(
        &self,
        pipeline: &dyn DomainPipeline,
        topology: Topology,
        operation: &Operation,
    ) -> Result<serde_json::Value> {
        let timeout = self.config.dispatch_timeout;
        let ctx = ExecutionContext {
            layer: self.layer.as_ref(),
            breakers: self.faults.breakers(),
        };
        match tokio::time::timeout(timeout, pipeline.execute(topology, operation, &ctx)).await
        {
            Ok(Ok(output)) => Ok(output),
            // Pipelines may surface coordinator errors such as an open breaker
            Ok(Err(e)) => Err(match e.downcast::<CoordinatorError>() {
                Ok(inner) => inner,
                Err(e) => CoordinatorError::ExecutionFailed(format!("{:#}", e)),
            }),
            Err(_) => Err(CoordinatorError::Timeout {
                operation: "dispatch",
                timeout,
            }),
        }
    }

    /// Spawn the monitor, fault tolerance and optimization tasks
    pub async fn start(self: &Arc<Self>) -> CoordinatorHandle {
        for component in [
            components::PERFORMANCE_MONITOR,
            components::FAULT_TOLERANCE,
            components::SWITCH_CONTROLLER,
            components::AGENT_POOL,
        ] {
            self.health.register(component).await;
        }

        let (shutdown_tx, _) = broadcast::channel(1);
        let (trigger_tx, trigger_rx) = mpsc::channel(TRIGGER_BUFFER);

        let tasks = vec![
            tokio::spawn(self.monitor.clone().run(trigger_tx, shutdown_tx.subscribe())),
            tokio::spawn(self.faults.clone().run(shutdown_tx.subscribe())),
            tokio::spawn(self.clone().listen(trigger_rx, shutdown_tx.subscribe())),
        ];

        self.events.metrics().set_current_topology(self.topology.get());
        self.events
            .logger()
            .log_startup(env!("CARGO_PKG_VERSION"), self.topology.get());
        self.health.set_ready(true).await;

        CoordinatorHandle {
            shutdown: shutdown_tx,
            tasks,
            health: self.health.clone(),
            events: self.events.clone(),
        }
    }

    async fn listen(
        self: Arc<Self>,
        mut triggers: mpsc::Receiver<OptimizationTrigger>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                Some(trigger) = triggers.recv() => {
                    let reason = format!("performance: {}", trigger.reason);
                    if let Some(report) = self.reoptimize(&reason).await {
                        info!(
                            recommended = %report.selection.topology,
                            topology = %report.topology,
                            "Re-optimization finished"
                        );
                    }
                }
                _ = shutdown.recv() => {
                    debug!("Optimization listener stopping");
                    break;
                }
            }
        }
    }
}

/// Whether a failed override should be retried on the committed topology
fn retryable(error: &CoordinatorError) -> bool {
    matches!(
        error,
        CoordinatorError::ExecutionFailed(_) | CoordinatorError::Timeout { .. }
    )
}

/// Handle to the coordinator's background tasks
pub struct CoordinatorHandle {
    shutdown: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
    health: HealthRegistry,
    events: EventSink,
}

impl CoordinatorHandle {
    /// Signal every task to stop and wait for them
    pub async fn shutdown(self) {
        self.health.set_ready(false).await;
        self.events.logger().log_shutdown("shutdown requested");
        let _ = self.shutdown.send(());
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Coordinator task ended abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::{dependencies, BreakerConfig, CircuitState};
    use crate::models::{Characteristic, OperationCategory};
    use crate::testing::{heartbeat, metrics, MockLayer};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    fn config(initial: Topology) -> CoordinatorConfig {
        CoordinatorConfig {
            instance: "test".to_string(),
            initial_topology: initial,
            dispatch_timeout: Duration::from_millis(100),
            monitor: MonitorConfig {
                interval: Duration::from_millis(20),
                collect_timeout: Duration::from_millis(50),
                ..Default::default()
            },
            switch: SwitchConfig {
                phase_timeout: Duration::from_millis(200),
                observation_window: Duration::from_millis(5),
                validation_timeout: Duration::from_millis(200),
                ..Default::default()
            },
            fault: FaultConfig {
                interval: Duration::from_millis(20),
                health_timeout: Duration::from_millis(50),
                recovery_timeout: Duration::from_millis(50),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn coordinator(layer: Arc<MockLayer>, initial: Topology) -> AdaptiveCoordinator {
        AdaptiveCoordinator::new(layer, config(initial))
    }

    fn consistent_crud() -> WorkloadDescriptor {
        WorkloadDescriptor::new(OperationCategory::Crud)
            .with_hint(Characteristic::ConsistencyNeed, 0.9)
            .with_hint(Characteristic::Complexity, 0.75)
    }

    struct CountingPipeline {
        calls: AtomicUsize,
        error: Option<CoordinatorError>,
        delay: Duration,
    }

    #[async_trait]
    impl DomainPipeline for CountingPipeline {
        fn category(&self) -> OperationCategory {
            OperationCategory::Analytics
        }

        async fn execute(
            &self,
            topology: Topology,
            _operation: &Operation,
            _ctx: &ExecutionContext<'_>,
        ) -> anyhow::Result<serde_json::Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match &self.error {
                Some(e) => Err(anyhow::Error::new(e.clone())),
                None => Ok(serde_json::json!({ "topology": topology })),
            }
        }
    }

    #[tokio::test]
    async fn test_dispatch_overrides_for_one_call() {
        let layer = Arc::new(MockLayer::new());
        let coordinator = coordinator(layer.clone(), Topology::Hierarchical);
        let mut events = coordinator.events().subscribe();

        let result = coordinator
            .dispatch(Operation::new("op-1", OperationCategory::Search))
            .await
            .unwrap();

        assert_eq!(result.topology, Topology::Mesh);
        assert!(result.overridden);
        assert_eq!(coordinator.topology(), Topology::Hierarchical);
        assert_eq!(*layer.executed_on.lock().unwrap(), vec![Topology::Mesh]);
        assert!(matches!(
            events.try_recv().unwrap(),
            CoordinatorEvent::TopologyOverridden { route: Topology::Mesh, .. }
        ));
        assert!(coordinator.switch_history().is_empty());
    }

    #[tokio::test]
    async fn test_generic_operations_run_on_current_topology() {
        let layer = Arc::new(MockLayer::new());
        let coordinator = coordinator(layer.clone(), Topology::Ring);

        let result = coordinator
            .dispatch(Operation::new("op-1", OperationCategory::Generic))
            .await
            .unwrap();

        assert_eq!(result.topology, Topology::Ring);
        assert!(!result.overridden);
    }

    #[tokio::test]
    async fn test_failed_override_retries_on_committed_topology() {
        let layer = Arc::new(MockLayer::new().failing_on(Topology::Mesh));
        let coordinator = coordinator(layer.clone(), Topology::Hierarchical);

        let result = coordinator
            .dispatch(Operation::new("op-1", OperationCategory::Search))
            .await
            .unwrap();

        assert_eq!(result.topology, Topology::Hierarchical);
        assert!(!result.overridden);
        assert_eq!(
            *layer.executed_on.lock().unwrap(),
            vec![Topology::Mesh, Topology::Hierarchical]
        );
    }

    /// Stores every operation in the database dependency
    struct DatabasePipeline {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl DomainPipeline for DatabasePipeline {
        fn category(&self) -> OperationCategory {
            OperationCategory::Crud
        }

        async fn execute(
            &self,
            topology: Topology,
            operation: &Operation,
            ctx: &ExecutionContext<'_>,
        ) -> anyhow::Result<serde_json::Value> {
            ctx.call_dependency(dependencies::DATABASE, async {
                self.attempts.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(anyhow::anyhow!("connection refused"))
            })
            .await?;
            ctx.execute_on(topology, operation).await
        }
    }

    #[tokio::test]
    async fn test_open_breaker_fails_dispatch_fast() {
        let mut config = config(Topology::Hierarchical);
        config.fault.breaker = BreakerConfig {
            threshold: 2,
            cooldown: Duration::from_secs(60),
            call_timeout: Duration::from_millis(50),
        };
        let layer = Arc::new(MockLayer::new());
        let coordinator = AdaptiveCoordinator::new(layer.clone(), config);
        let pipeline = Arc::new(DatabasePipeline {
            attempts: AtomicUsize::new(0),
        });
        coordinator.register_pipeline(pipeline.clone());

        for id in ["op-1", "op-2"] {
            let err = coordinator
                .dispatch(Operation::new(id, OperationCategory::Crud))
                .await
                .unwrap_err();
            assert!(matches!(err, CoordinatorError::ExecutionFailed(_)));
        }
        let err = coordinator
            .dispatch(Operation::new("op-3", OperationCategory::Crud))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            CoordinatorError::DependencyUnavailable { ref dependency, .. }
                if dependency == dependencies::DATABASE
        ));
        assert_eq!(pipeline.attempts.load(Ordering::SeqCst), 2);
        assert!(layer.executed_on.lock().unwrap().is_empty());
        assert_eq!(
            coordinator.status().open_breakers,
            vec![dependencies::DATABASE.to_string()]
        );
        assert_eq!(coordinator.breakers()[0].state, CircuitState::Open);
    }

    #[tokio::test]
    async fn test_cancelled_dispatch_releases_its_workload() {
        let layer = Arc::new(MockLayer::new().with_heartbeats(vec![heartbeat("a1", true)]));
        let coordinator = coordinator(layer, Topology::Hybrid);
        coordinator.faults().poll().await;
        let pipeline = Arc::new(CountingPipeline {
            calls: AtomicUsize::new(0),
            error: None,
            delay: Duration::from_millis(500),
        });
        coordinator.register_pipeline(pipeline.clone());

        let dispatch = coordinator.dispatch(Operation::new("op-1", OperationCategory::Analytics));
        assert!(tokio::time::timeout(Duration::from_millis(20), dispatch)
            .await
            .is_err());

        assert_eq!(pipeline.calls.load(Ordering::SeqCst), 1);
        assert!(coordinator.agents()[0].workloads.is_empty());
    }

    #[tokio::test]
    async fn test_dependency_unavailable_is_not_retried() {
        let coordinator = coordinator(Arc::new(MockLayer::new()), Topology::Mesh);
        let pipeline = Arc::new(CountingPipeline {
            calls: AtomicUsize::new(0),
            error: Some(CoordinatorError::DependencyUnavailable {
                dependency: "database".to_string(),
                retry_after: Duration::from_secs(5),
            }),
            delay: Duration::ZERO,
        });
        coordinator.register_pipeline(pipeline.clone());

        let err = coordinator
            .dispatch(Operation::new("op-1", OperationCategory::Analytics))
            .await
            .unwrap_err();

        assert!(matches!(err, CoordinatorError::DependencyUnavailable { .. }));
        assert_eq!(pipeline.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_slow_pipeline_times_out() {
        // Analytics prefers hybrid, which is already committed: no retry
        let coordinator = coordinator(Arc::new(MockLayer::new()), Topology::Hybrid);
        let pipeline = Arc::new(CountingPipeline {
            calls: AtomicUsize::new(0),
            error: None,
            delay: Duration::from_millis(500),
        });
        coordinator.register_pipeline(pipeline.clone());

        let err = coordinator
            .dispatch(Operation::new("op-1", OperationCategory::Analytics))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "timeout");
        assert_eq!(pipeline.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dispatch_tracks_workloads_and_counters() {
        let layer = Arc::new(MockLayer::new().with_heartbeats(vec![heartbeat("a1", true)]));
        let coordinator = coordinator(layer, Topology::Mesh);
        coordinator.faults().poll().await;

        coordinator
            .dispatch(
                Operation::new("op-1", OperationCategory::Crud)
                    .with_descriptor(consistent_crud()),
            )
            .await
            .unwrap();

        assert!(coordinator.agents()[0].workloads.is_empty());
        assert_eq!(coordinator.status().profile_size, 1);
        assert_eq!(coordinator.monitor().counters().take().unwrap().operations, 1);
    }

    #[tokio::test]
    async fn test_submit_workload_switches_topology() {
        let layer = Arc::new(
            MockLayer::new().with_metrics(vec![metrics(100.0, 0.0), metrics(70.0, 0.0)]),
        );
        let coordinator = coordinator(layer, Topology::Mesh);

        let report = coordinator.submit_workload(&consistent_crud()).await;

        assert_eq!(report.selection.topology, Topology::Hierarchical);
        assert!(matches!(report.decision, SwitchDecision::Committed { .. }));
        assert_eq!(report.topology, Topology::Hierarchical);
        assert_eq!(coordinator.topology(), Topology::Hierarchical);
        assert_eq!(coordinator.switch_history().len(), 1);
    }

    #[tokio::test]
    async fn test_submit_workload_with_marginal_gain_rolls_back() {
        let layer = Arc::new(
            MockLayer::new().with_metrics(vec![metrics(100.0, 0.0), metrics(92.0, 0.0)]),
        );
        let coordinator = coordinator(layer, Topology::Mesh);

        let report = coordinator.submit_workload(&consistent_crud()).await;

        assert!(matches!(report.decision, SwitchDecision::RolledBack { .. }));
        assert_eq!(coordinator.topology(), Topology::Mesh);
    }

    #[tokio::test]
    async fn test_submit_workload_reports_failed_switch() {
        let layer = Arc::new(MockLayer::new().with_metrics(vec![metrics(100.0, 0.0)]));
        layer.fail_prepare.store(true, Ordering::SeqCst);
        let coordinator = coordinator(layer, Topology::Mesh);

        let report = coordinator.submit_workload(&consistent_crud()).await;

        match report.decision {
            SwitchDecision::Failed { error, record } => {
                assert!(error.contains("preparing"));
                assert_eq!(record.unwrap().outcome, TransitionOutcome::RolledBack);
            }
            other => panic!("unexpected decision {:?}", other),
        }
        assert_eq!(coordinator.topology(), Topology::Mesh);
    }

    #[tokio::test]
    async fn test_recommend_is_a_dry_run() {
        let layer = Arc::new(MockLayer::new().with_metrics(vec![metrics(100.0, 0.0)]));
        let coordinator = coordinator(layer.clone(), Topology::Mesh);

        let recommendation = coordinator.recommend(&consistent_crud());

        assert_eq!(recommendation.current, Topology::Mesh);
        assert_eq!(recommendation.selection.topology, Topology::Hierarchical);
        assert!(coordinator.switch_history().is_empty());
        assert_eq!(coordinator.status().profile_size, 0);
        assert!(layer.prepared.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reoptimize_uses_aggregate_profile() {
        let layer = Arc::new(
            MockLayer::new().with_metrics(vec![metrics(100.0, 0.0), metrics(60.0, 0.0)]),
        );
        let coordinator = coordinator(layer, Topology::Ring);
        assert!(coordinator.reoptimize("test").await.is_none());

        coordinator.profile.push(coordinator.analyze(&consistent_crud()));
        coordinator.profile.push(coordinator.analyze(&consistent_crud()));
        let mut events = coordinator.events().subscribe();

        let report = coordinator.reoptimize("performance: test").await.unwrap();

        assert_eq!(report.selection.topology, Topology::Hierarchical);
        assert_eq!(coordinator.topology(), Topology::Hierarchical);
        assert!(matches!(
            events.try_recv().unwrap(),
            CoordinatorEvent::OptimizationRecommended { recommended: Topology::Hierarchical, .. }
        ));
    }

    #[tokio::test]
    async fn test_status_snapshot() {
        let layer = Arc::new(MockLayer::new().with_heartbeats(vec![
            heartbeat("a1", true),
            heartbeat("a2", false),
        ]));
        let coordinator = coordinator(layer, Topology::Ring);
        coordinator.faults().poll().await;

        let status = coordinator.status();
        assert_eq!(status.topology, Topology::Ring);
        assert_eq!(status.total_agents, 2);
        assert_eq!(status.healthy_agents, 1);
        assert!(!status.switch_in_progress);
        assert_eq!(status.switch_phase, SwitchPhase::Idle);
        assert!(status.last_switch.is_none());
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let layer = Arc::new(
            MockLayer::new()
                .with_metrics(vec![metrics(80.0, 0.0)])
                .with_heartbeats(vec![heartbeat("a1", true)]),
        );
        let coordinator = Arc::new(coordinator(layer, Topology::Mesh));

        let handle = coordinator.start().await;
        assert!(coordinator.health().readiness().await.ready);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!coordinator.history().is_empty());
        assert_eq!(coordinator.status().healthy_agents, 1);

        tokio::time::timeout(Duration::from_secs(1), handle.shutdown())
            .await
            .unwrap();
        assert!(!coordinator.health().readiness().await.ready);
    }
}
