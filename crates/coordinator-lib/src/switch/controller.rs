//! Topology switch controller
//!
//! A switch runs Snapshot → Preparing → Migrating → Validating and ends
//! either Committed or RolledBack. The committed topology only changes in
//! the commit step; every failure before it restores the captured routing.
//! At most one switch is in flight per controller.

use super::state::{SwitchPhase, TopologyCell};
use crate::error::{bounded, CoordinatorError, Result};
use crate::events::{CoordinatorEvent, EventSink};
use crate::execution::AgentExecutionLayer;
use crate::models::{PerformanceSnapshot, Topology, TopologySwitchRecord, TransitionOutcome};
use crate::monitor::PerformanceHistory;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct SwitchConfig {
    /// Predicted gain a switch must exceed to be attempted
    pub adaptation_threshold: f64,
    /// Measured gain a switch must reach to be committed
    pub commit_threshold: f64,
    /// Prediction used when the history has no sample for a topology
    pub default_predicted_gain: f64,
    /// Number of increments traffic is migrated in
    pub migration_steps: u32,
    /// Upper bound for baseline, preparation, migration and restore calls
    pub phase_timeout: Duration,
    /// Time traffic settles on the new topology before it is measured
    pub observation_window: Duration,
    /// Upper bound for the whole validation phase
    pub validation_timeout: Duration,
    /// Switch records kept in memory
    pub max_records: usize,
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            adaptation_threshold: 0.20,
            commit_threshold: 0.10,
            default_predicted_gain: 0.25,
            migration_steps: 4,
            phase_timeout: Duration::from_secs(10),
            observation_window: Duration::from_secs(5),
            validation_timeout: Duration::from_secs(30),
            max_records: 1000,
        }
    }
}

/// Predicted value of switching to a topology
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchEvaluation {
    pub from: Topology,
    pub to: Topology,
    pub predicted_gain: f64,
    /// Whether the prediction clears the adaptation threshold
    pub worthwhile: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SwitchOutcome {
    /// The predicted gain did not justify an attempt; nothing was recorded
    Skipped(SwitchEvaluation),
    /// The attempt ran to a terminal state
    Completed(TopologySwitchRecord),
}

impl SwitchOutcome {
    pub fn record(&self) -> Option<&TopologySwitchRecord> {
        match self {
            SwitchOutcome::Completed(record) => Some(record),
            SwitchOutcome::Skipped(_) => None,
        }
    }

    pub fn committed(&self) -> bool {
        self.record()
            .map(|r| r.outcome == TransitionOutcome::Committed)
            .unwrap_or(false)
    }
}

/// Resets the in-flight flag and phase however the attempt ends. Owned by
/// the attempt task, so it also covers a task that never gets to run.
struct InFlight {
    controller: Arc<TopologySwitchController>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.controller.set_phase(SwitchPhase::Idle);
        self.controller.topology.set_switching(false);
        self.controller.in_flight.store(false, Ordering::Release);
    }
}

pub struct TopologySwitchController {
    layer: Arc<dyn AgentExecutionLayer>,
    topology: Arc<TopologyCell>,
    history: Arc<PerformanceHistory>,
    config: SwitchConfig,
    events: EventSink,
    in_flight: AtomicBool,
    phase: Mutex<SwitchPhase>,
    records: RwLock<VecDeque<TopologySwitchRecord>>,
}

impl TopologySwitchController {
    pub fn new(
        layer: Arc<dyn AgentExecutionLayer>,
        topology: Arc<TopologyCell>,
        history: Arc<PerformanceHistory>,
        config: SwitchConfig,
        events: EventSink,
    ) -> Self {
        Self {
            layer,
            topology,
            history,
            config,
            events,
            in_flight: AtomicBool::new(false),
            phase: Mutex::new(SwitchPhase::Idle),
            records: RwLock::new(VecDeque::new()),
        }
    }

    pub fn config(&self) -> &SwitchConfig {
        &self.config
    }

    pub fn current(&self) -> Topology {
        self.topology.get()
    }

    pub fn in_progress(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn phase(&self) -> SwitchPhase {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// All switch records, oldest first
    pub fn records(&self) -> Vec<TopologySwitchRecord> {
        self.records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn last_record(&self) -> Option<TopologySwitchRecord> {
        self.records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .back()
            .cloned()
    }

    /// Predict the gain of moving from the committed topology to `target`.
    ///
    /// Compares the latest samples of both topologies; without a sample
    /// for either side the configured default prediction applies.
    pub fn evaluate(&self, target: Topology) -> SwitchEvaluation {
        let from = self.topology.get();
        if target == from {
            return SwitchEvaluation {
                from,
                to: target,
                predicted_gain: 0.0,
                worthwhile: false,
            };
        }

        let predicted_gain = self
            .history
            .latest_for(from)
            .zip(self.history.latest_for(target))
            .and_then(|(current, candidate)| current.gain_to(&candidate))
            .unwrap_or(self.config.default_predicted_gain);

        SwitchEvaluation {
            from,
            to: target,
            predicted_gain,
            worthwhile: predicted_gain > self.config.adaptation_threshold,
        }
    }

    /// Attempt a switch to `target` if the predicted gain justifies it.
    ///
    /// Fails with `SwitchInProgress` while another attempt is in flight.
    /// Preparation, migration and validation-timeout failures are returned
    /// as errors after the attempt has been rolled back and recorded; a
    /// switch that completes validation but misses the commit threshold is
    /// a `Completed` outcome with a rolled-back record.
    ///
    /// The attempt runs on its own task. Dropping the returned future does
    /// not interrupt it: the switch still ends committed or rolled back and
    /// is recorded.
    pub async fn request_switch(self: &Arc<Self>, target: Topology) -> Result<SwitchOutcome> {
        let guard = self.acquire(target)?;

        let attempt = tokio::spawn(async move {
            let controller = guard.controller.clone();
            let outcome = controller.run(target).await;
            drop(guard);
            outcome
        });

        match attempt.await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(to = %target, error = %e, "Switch task ended abnormally");
                Err(CoordinatorError::ExecutionFailed(format!(
                    "switch task failed: {}",
                    e
                )))
            }
        }
    }

    async fn run(&self, target: Topology) -> Result<SwitchOutcome> {
        let evaluation = self.evaluate(target);
        if !evaluation.worthwhile {
            debug!(
                from = %evaluation.from,
                to = %evaluation.to,
                predicted_gain = evaluation.predicted_gain,
                "Predicted gain below adaptation threshold, skipping switch"
            );
            return Ok(SwitchOutcome::Skipped(evaluation));
        }

        self.attempt(evaluation.from, target, evaluation.predicted_gain)
            .await
    }

    fn acquire(self: &Arc<Self>, target: Topology) -> Result<InFlight> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            let error = CoordinatorError::SwitchInProgress;
            self.events.emit(CoordinatorEvent::SwitchRejected {
                from: self.topology.get(),
                to: target,
                reason: error.to_string(),
            });
            return Err(error);
        }
        self.topology.set_switching(true);
        Ok(InFlight {
            controller: Arc::clone(self),
        })
    }

    async fn attempt(
        &self,
        from: Topology,
        to: Topology,
        predicted_gain: f64,
    ) -> Result<SwitchOutcome> {
        self.events.emit(CoordinatorEvent::SwitchAttempted {
            from,
            to,
            predicted_gain,
        });

        // Snapshot
        let baseline = match self.baseline(from).await {
            Ok(baseline) => baseline,
            Err(e) => {
                let reason = format!("baseline unavailable: {}", e);
                self.finish(from, to, predicted_gain, None, Some(reason.clone()));
                return Err(CoordinatorError::PreparationFailed { topology: to, reason });
            }
        };

        self.set_phase(SwitchPhase::Preparing);
        if let Err(e) = bounded(
            "topology preparation",
            self.config.phase_timeout,
            self.layer.prepare_topology(to),
        )
        .await
        {
            let reason = e.to_string();
            self.finish(
                from,
                to,
                predicted_gain,
                None,
                Some(format!("preparation failed: {}", reason)),
            );
            return Err(CoordinatorError::PreparationFailed { topology: to, reason });
        }

        self.set_phase(SwitchPhase::Migrating);
        let steps = self.config.migration_steps.max(1);
        for step in 1..=steps {
            let fraction = f64::from(step) / f64::from(steps);
            if let Err(e) = bounded(
                "traffic migration",
                self.config.phase_timeout,
                self.layer.migrate(from, to, fraction),
            )
            .await
            {
                let reason = e.to_string();
                let rollback_error = self.rollback(from).await;
                let mut failure = format!("migration failed at {:.0}%: {}", fraction * 100.0, reason);
                if let Some(rollback) = &rollback_error {
                    failure.push_str(&format!("; rollback failed: {}", rollback));
                }
                self.finish(from, to, predicted_gain, None, Some(failure));
                return Err(CoordinatorError::MigrationFailed {
                    topology: to,
                    reason,
                    rollback_error,
                });
            }
        }

        self.set_phase(SwitchPhase::Validating);
        let observed = tokio::time::timeout(self.config.validation_timeout, self.observe(to)).await;

        let post = match observed {
            Ok(Ok(post)) => post,
            Ok(Err(e)) => {
                self.rollback(from).await;
                let record = self.finish(
                    from,
                    to,
                    predicted_gain,
                    None,
                    Some(format!("validation measurement failed: {}", e)),
                );
                return Ok(SwitchOutcome::Completed(record));
            }
            Err(_) => {
                self.rollback(from).await;
                self.finish(
                    from,
                    to,
                    predicted_gain,
                    None,
                    Some(format!(
                        "validation exceeded {:?}",
                        self.config.validation_timeout
                    )),
                );
                return Err(CoordinatorError::ValidationTimedOut {
                    topology: to,
                    window: self.config.validation_timeout,
                });
            }
        };

        let Some(measured_gain) = baseline.gain_to(&post) else {
            self.rollback(from).await;
            let record = self.finish(
                from,
                to,
                predicted_gain,
                None,
                Some(format!("validation on {} produced no comparable measurement", to)),
            );
            return Ok(SwitchOutcome::Completed(record));
        };

        let record = if measured_gain >= self.config.commit_threshold {
            self.topology.commit(to);
            self.finish(from, to, predicted_gain, Some(measured_gain), None)
        } else {
            self.rollback(from).await;
            self.finish(
                from,
                to,
                predicted_gain,
                Some(measured_gain),
                Some(format!(
                    "measured gain {:.1}% below {:.1}% commit threshold",
                    measured_gain * 100.0,
                    self.config.commit_threshold * 100.0
                )),
            )
        };

        Ok(SwitchOutcome::Completed(record))
    }

    /// Fresh measurement of the current topology, falling back to the
    /// latest recorded one with traffic
    async fn baseline(&self, from: Topology) -> Result<PerformanceSnapshot> {
        let fresh = bounded(
            "baseline collection",
            self.config.phase_timeout,
            self.layer.collect_metrics(),
        )
        .await
        .map(|raw| PerformanceSnapshot::from_raw(from, raw));

        match fresh {
            Ok(snapshot) => {
                self.history.push(snapshot.clone());
                if !snapshot.is_idle() {
                    return Ok(snapshot);
                }
                self.history.latest_for(from).ok_or_else(|| {
                    CoordinatorError::ExecutionFailed(format!(
                        "no operations observed on {}",
                        from
                    ))
                })
            }
            Err(e) => self.history.latest_for(from).ok_or(e),
        }
    }

    async fn observe(&self, to: Topology) -> Result<PerformanceSnapshot> {
        tokio::time::sleep(self.config.observation_window).await;
        let raw = bounded(
            "validation measurement",
            self.config.phase_timeout,
            self.layer.collect_metrics(),
        )
        .await?;
        let snapshot = PerformanceSnapshot::from_raw(to, raw);
        self.history.push(snapshot.clone());
        Ok(snapshot)
    }

    /// Route traffic back to `from`. Returns the restore error, if any;
    /// a failed restore is reported, not retried.
    async fn rollback(&self, from: Topology) -> Option<String> {
        self.set_phase(SwitchPhase::RollingBack);
        match bounded("rollback", self.config.phase_timeout, self.layer.restore(from)).await {
            Ok(()) => None,
            Err(e) => {
                warn!(topology = %from, error = %e, "Rollback failed");
                Some(e.to_string())
            }
        }
    }

    fn finish(
        &self,
        from: Topology,
        to: Topology,
        predicted_gain: f64,
        measured_gain: Option<f64>,
        failure: Option<String>,
    ) -> TopologySwitchRecord {
        let outcome = if failure.is_none() {
            TransitionOutcome::Committed
        } else {
            TransitionOutcome::RolledBack
        };
        let record = TopologySwitchRecord {
            from,
            to,
            timestamp: chrono::Utc::now().timestamp_millis(),
            predicted_gain,
            measured_gain,
            outcome,
            failure,
        };

        {
            let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
            while records.len() >= self.config.max_records.max(1) {
                records.pop_front();
            }
            records.push_back(record.clone());
        }

        self.events.emit(CoordinatorEvent::SwitchCompleted {
            record: record.clone(),
        });
        record
    }

    fn set_phase(&self, phase: SwitchPhase) {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner()) = phase;
    }
}
