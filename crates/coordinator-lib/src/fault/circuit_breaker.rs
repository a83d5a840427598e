//! Per-dependency circuit breakers
//!
//! Closed → Open after `threshold` consecutive failures. Open → HalfOpen
//! once the cooldown has elapsed, admitting exactly one trial call whose
//! outcome closes or re-opens the breaker.

use crate::error::{CoordinatorError, Result};
use crate::events::{CoordinatorEvent, EventSink};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

/// Well-known dependency names
pub mod dependencies {
    pub const DATABASE: &str = "database";
    pub const FILE_STORAGE: &str = "file_storage";
    pub const NOTIFICATION: &str = "notification";

    pub const ALL: [&str; 3] = [DATABASE, FILE_STORAGE, NOTIFICATION];
}

/// Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }

    /// Numeric encoding for the state gauge
    pub fn gauge_value(&self) -> i64 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::HalfOpen => 1,
            CircuitState::Open => 2,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Thresholds for one breaker
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BreakerConfig {
    /// Consecutive failures that open the breaker
    pub threshold: u32,
    /// Time an open breaker waits before admitting a trial call
    pub cooldown: Duration,
    /// Upper bound for a single dependency call
    pub call_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            cooldown: Duration::from_secs(30),
            call_timeout: Duration::from_secs(10),
        }
    }
}

/// Point-in-time view of a breaker, for reporting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub dependency: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    /// Milliseconds since the Unix epoch
    pub last_failure: Option<i64>,
    pub threshold: u32,
    pub cooldown_ms: u64,
}

#[derive(Debug)]
struct Breaker {
    config: BreakerConfig,
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    last_failure: Option<i64>,
    trial_in_flight: bool,
}

/// Admission decision for one call
enum Admission {
    Allowed { transition: Option<(CircuitState, CircuitState)> },
    Rejected { retry_after: Duration },
}

impl Breaker {
    fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            last_failure: None,
            trial_in_flight: false,
        }
    }

    fn admit(&mut self) -> Admission {
        match self.state {
            CircuitState::Closed => Admission::Allowed { transition: None },
            CircuitState::Open => {
                let elapsed = self.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.config.cooldown {
                    self.state = CircuitState::HalfOpen;
                    self.trial_in_flight = true;
                    Admission::Allowed {
                        transition: Some((CircuitState::Open, CircuitState::HalfOpen)),
                    }
                } else {
                    Admission::Rejected {
                        retry_after: self.config.cooldown - elapsed,
                    }
                }
            }
            CircuitState::HalfOpen => {
                if self.trial_in_flight {
                    Admission::Rejected {
                        retry_after: Duration::ZERO,
                    }
                } else {
                    self.trial_in_flight = true;
                    Admission::Allowed { transition: None }
                }
            }
        }
    }

    fn on_success(&mut self) -> Option<(CircuitState, CircuitState)> {
        self.consecutive_failures = 0;
        self.trial_in_flight = false;
        match self.state {
            CircuitState::Closed => None,
            previous => {
                self.state = CircuitState::Closed;
                self.opened_at = None;
                Some((previous, CircuitState::Closed))
            }
        }
    }

    fn on_failure(&mut self) -> Option<(CircuitState, CircuitState)> {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_failure = Some(chrono::Utc::now().timestamp_millis());
        self.trial_in_flight = false;
        match self.state {
            CircuitState::Closed if self.consecutive_failures >= self.config.threshold => {
                self.open();
                Some((CircuitState::Closed, CircuitState::Open))
            }
            CircuitState::HalfOpen => {
                self.open();
                Some((CircuitState::HalfOpen, CircuitState::Open))
            }
            _ => None,
        }
    }

    /// An admitted call was dropped before it settled. An abandoned trial
    /// re-opens the breaker; in other states nothing was learned.
    fn on_abandoned(&mut self) -> Option<(CircuitState, CircuitState)> {
        if self.state == CircuitState::HalfOpen && self.trial_in_flight {
            self.trial_in_flight = false;
            self.open();
            return Some((CircuitState::HalfOpen, CircuitState::Open));
        }
        None
    }

    fn open(&mut self) {
        self.state = CircuitState::Open;
        self.opened_at = Some(Instant::now());
    }

    fn snapshot(&self, dependency: &str) -> BreakerSnapshot {
        BreakerSnapshot {
            dependency: dependency.to_string(),
            state: self.state,
            consecutive_failures: self.consecutive_failures,
            last_failure: self.last_failure,
            threshold: self.config.threshold,
            cooldown_ms: self.config.cooldown.as_millis() as u64,
        }
    }
}

/// Outcome of one call as seen by its breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settlement {
    Success,
    Failure,
    Abandoned,
}

/// Settles an admitted call exactly once, including when the caller drops
/// the call future before it completes
struct AdmittedCall<'a> {
    registry: &'a CircuitBreakerRegistry,
    dependency: &'a str,
    settled: bool,
}

impl AdmittedCall<'_> {
    fn settle(mut self, settlement: Settlement) {
        self.settled = true;
        self.registry.record(self.dependency, settlement);
    }
}

impl Drop for AdmittedCall<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.registry.record(self.dependency, Settlement::Abandoned);
        }
    }
}

/// Registry of breakers keyed by dependency name
pub struct CircuitBreakerRegistry {
    breakers: Mutex<HashMap<String, Breaker>>,
    default_config: BreakerConfig,
    overrides: HashMap<String, BreakerConfig>,
    events: EventSink,
}

impl CircuitBreakerRegistry {
    pub fn new(default_config: BreakerConfig, events: EventSink) -> Self {
        Self {
            breakers: Mutex::new(HashMap::new()),
            default_config,
            overrides: HashMap::new(),
            events,
        }
    }

    /// Use a dedicated configuration for one dependency
    pub fn with_override(mut self, dependency: impl Into<String>, config: BreakerConfig) -> Self {
        self.overrides.insert(dependency.into(), config);
        self
    }

    fn config_for(&self, dependency: &str) -> BreakerConfig {
        self.overrides
            .get(dependency)
            .copied()
            .unwrap_or(self.default_config)
    }

    /// Track a dependency before its first call so it shows up in
    /// snapshots as closed
    pub fn register(&self, dependency: &str) {
        let config = self.config_for(dependency);
        self.lock()
            .entry(dependency.to_string())
            .or_insert_with(|| Breaker::new(config));
    }

    /// Call a dependency through its breaker.
    ///
    /// Fails fast with `DependencyUnavailable` while the breaker is open.
    /// The breaker lock is never held while the call is in flight. A
    /// half-open trial that is cancelled re-opens the breaker.
    pub async fn call<T, F>(&self, dependency: &str, call: F) -> Result<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        let config = self.config_for(dependency);
        let admitted = self.admit(dependency, config)?;

        match tokio::time::timeout(config.call_timeout, call).await {
            Ok(Ok(value)) => {
                admitted.settle(Settlement::Success);
                Ok(value)
            }
            Ok(Err(e)) => {
                admitted.settle(Settlement::Failure);
                Err(CoordinatorError::ExecutionFailed(format!(
                    "{} call failed: {:#}",
                    dependency, e
                )))
            }
            Err(_) => {
                admitted.settle(Settlement::Failure);
                Err(CoordinatorError::Timeout {
                    operation: "dependency call",
                    timeout: config.call_timeout,
                })
            }
        }
    }

    fn admit<'a>(&'a self, dependency: &'a str, config: BreakerConfig) -> Result<AdmittedCall<'a>> {
        let admission = {
            let mut breakers = self.lock();
            breakers
                .entry(dependency.to_string())
                .or_insert_with(|| Breaker::new(config))
                .admit()
        };

        match admission {
            Admission::Allowed { transition } => {
                if let Some((from, to)) = transition {
                    self.emit_transition(dependency, from, to);
                }
                Ok(AdmittedCall {
                    registry: self,
                    dependency,
                    settled: false,
                })
            }
            Admission::Rejected { retry_after } => {
                debug!(dependency = %dependency, "Circuit open, failing fast");
                Err(CoordinatorError::DependencyUnavailable {
                    dependency: dependency.to_string(),
                    retry_after,
                })
            }
        }
    }

    fn record(&self, dependency: &str, settlement: Settlement) {
        let transition = {
            let mut breakers = self.lock();
            breakers
                .get_mut(dependency)
                .and_then(|breaker| match settlement {
                    Settlement::Success => breaker.on_success(),
                    Settlement::Failure => breaker.on_failure(),
                    Settlement::Abandoned => breaker.on_abandoned(),
                })
        };
        if settlement == Settlement::Abandoned {
            debug!(dependency = %dependency, "Dependency call dropped before it settled");
        }
        if let Some((from, to)) = transition {
            self.emit_transition(dependency, from, to);
        }
    }

    fn emit_transition(&self, dependency: &str, from: CircuitState, to: CircuitState) {
        self.events.emit(CoordinatorEvent::BreakerTransition {
            dependency: dependency.to_string(),
            from,
            to,
        });
    }

    /// State of one breaker; unknown dependencies are closed
    pub fn state(&self, dependency: &str) -> CircuitState {
        self.lock()
            .get(dependency)
            .map(|b| b.state)
            .unwrap_or(CircuitState::Closed)
    }

    /// Snapshot of all breakers, sorted by dependency name
    pub fn snapshot(&self) -> Vec<BreakerSnapshot> {
        let mut snapshots: Vec<_> = self
            .lock()
            .iter()
            .map(|(name, breaker)| breaker.snapshot(name))
            .collect();
        snapshots.sort_by(|a, b| a.dependency.cmp(&b.dependency));
        snapshots
    }

    /// Names of dependencies whose breaker is not closed
    pub fn open_dependencies(&self) -> Vec<String> {
        self.snapshot()
            .into_iter()
            .filter(|s| s.state != CircuitState::Closed)
            .map(|s| s.dependency)
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Breaker>> {
        // A poisoned map only means a panic happened mid-update; the
        // counters are still usable.
        self.breakers.lock().unwrap_or_else(|e| e.into_inner())
    }
}
