//! Daemon configuration
//!
//! Sources, lowest precedence first: built-in defaults, an optional file
//! named by `COORDINATOR_CONFIG`, then `COORDINATOR_*` environment
//! variables (e.g. `COORDINATOR_API_PORT=9000`).

use anyhow::{Context, Result};
use coordinator_lib::analysis::AnalyzerConfig;
use coordinator_lib::coordinator::CoordinatorConfig;
use coordinator_lib::fault::{BreakerConfig, FaultConfig};
use coordinator_lib::monitor::MonitorConfig;
use coordinator_lib::switch::SwitchConfig;
use coordinator_lib::Topology;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming an optional configuration file
pub const CONFIG_FILE_ENV: &str = "COORDINATOR_CONFIG";

#[derive(Debug, Clone, Deserialize)]
pub struct CoordinatorSettings {
    /// Instance name used in logs and events
    #[serde(default = "default_instance")]
    pub instance: String,

    /// Port of the HTTP API
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Topology committed at startup
    #[serde(default = "default_initial_topology")]
    pub initial_topology: String,

    /// Agents in the in-process pool
    #[serde(default = "default_agents")]
    pub agents: usize,

    #[serde(default = "default_monitor_interval")]
    pub monitor_interval_secs: u64,

    #[serde(default = "default_fault_interval")]
    pub fault_interval_secs: u64,

    /// Bound for one metrics collection
    #[serde(default = "default_collect_timeout")]
    pub collect_timeout_ms: u64,

    /// Bound for one agent health poll
    #[serde(default = "default_health_timeout")]
    pub health_timeout_ms: u64,

    /// Bound for one restart or replacement
    #[serde(default = "default_recovery_timeout")]
    pub recovery_timeout_ms: u64,

    #[serde(default = "default_unhealthy_threshold")]
    pub unhealthy_threshold: u32,

    #[serde(default = "default_history_retention")]
    pub history_retention: usize,

    #[serde(default = "default_max_response_time")]
    pub max_response_time_ms: f64,

    #[serde(default = "default_max_error_rate")]
    pub max_error_rate: f64,

    #[serde(default = "default_adaptation_threshold")]
    pub adaptation_threshold: f64,

    #[serde(default = "default_commit_threshold")]
    pub commit_threshold: f64,

    #[serde(default = "default_predicted_gain")]
    pub default_predicted_gain: f64,

    #[serde(default = "default_migration_steps")]
    pub migration_steps: u32,

    /// Bound for preparation, migration and restore calls
    #[serde(default = "default_phase_timeout")]
    pub phase_timeout_ms: u64,

    #[serde(default = "default_observation_window")]
    pub observation_window_secs: u64,

    #[serde(default = "default_validation_timeout")]
    pub validation_timeout_secs: u64,

    #[serde(default = "default_dispatch_timeout")]
    pub dispatch_timeout_ms: u64,

    #[serde(default = "default_profile_window")]
    pub profile_window: usize,

    #[serde(default = "default_breaker_threshold")]
    pub breaker_threshold: u32,

    #[serde(default = "default_breaker_cooldown")]
    pub breaker_cooldown_secs: u64,

    /// Bound for one call to an external dependency
    #[serde(default = "default_dependency_timeout")]
    pub dependency_timeout_ms: u64,
}

fn default_instance() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "coordinator".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_initial_topology() -> String {
    "hierarchical".to_string()
}

fn default_agents() -> usize {
    4
}

fn default_monitor_interval() -> u64 {
    10
}

fn default_fault_interval() -> u64 {
    5
}

fn default_collect_timeout() -> u64 {
    5_000
}

fn default_health_timeout() -> u64 {
    2_000
}

fn default_recovery_timeout() -> u64 {
    10_000
}

fn default_unhealthy_threshold() -> u32 {
    2
}

fn default_history_retention() -> usize {
    500
}

fn default_max_response_time() -> f64 {
    1000.0
}

fn default_max_error_rate() -> f64 {
    0.05
}

fn default_adaptation_threshold() -> f64 {
    0.20
}

fn default_commit_threshold() -> f64 {
    0.10
}

fn default_predicted_gain() -> f64 {
    0.25
}

fn default_migration_steps() -> u32 {
    4
}

fn default_phase_timeout() -> u64 {
    10_000
}

fn default_observation_window() -> u64 {
    5
}

fn default_validation_timeout() -> u64 {
    30
}

fn default_dispatch_timeout() -> u64 {
    30_000
}

fn default_profile_window() -> usize {
    50
}

fn default_breaker_threshold() -> u32 {
    5
}

fn default_breaker_cooldown() -> u64 {
    30
}

fn default_dependency_timeout() -> u64 {
    10_000
}

impl CoordinatorSettings {
    /// Load from `COORDINATOR_CONFIG` (if set) and the environment
    pub fn load() -> Result<Self> {
        let file = std::env::var_os(CONFIG_FILE_ENV).map(PathBuf::from);
        Self::load_from(file.as_deref())
    }

    /// Load from an explicit file (if any) and the environment
    pub fn load_from(file: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let settings = builder
            .add_source(config::Environment::with_prefix("COORDINATOR").try_parsing(true))
            .build()
            .context("Failed to read coordinator configuration")?;

        let settings: Self = settings
            .try_deserialize()
            .context("Invalid coordinator configuration")?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        self.topology()?;
        anyhow::ensure!(self.agents > 0, "agents must be at least 1");
        anyhow::ensure!(
            self.monitor_interval_secs > 0 && self.fault_interval_secs > 0,
            "monitor_interval_secs and fault_interval_secs must be at least 1"
        );
        anyhow::ensure!(
            self.fault_interval_secs < self.monitor_interval_secs,
            "fault_interval_secs ({}) must be shorter than monitor_interval_secs ({})",
            self.fault_interval_secs,
            self.monitor_interval_secs
        );
        anyhow::ensure!(
            self.commit_threshold <= self.adaptation_threshold,
            "commit_threshold ({}) must not exceed adaptation_threshold ({})",
            self.commit_threshold,
            self.adaptation_threshold
        );
        anyhow::ensure!(
            self.validation_timeout_secs > self.observation_window_secs,
            "validation_timeout_secs must exceed observation_window_secs"
        );
        Ok(())
    }

    pub fn topology(&self) -> Result<Topology> {
        self.initial_topology
            .parse()
            .with_context(|| format!("Invalid initial_topology '{}'", self.initial_topology))
    }

    /// Map the flat settings onto the component configurations
    pub fn coordinator_config(&self) -> Result<CoordinatorConfig> {
        Ok(CoordinatorConfig {
            instance: self.instance.clone(),
            initial_topology: self.topology()?,
            dispatch_timeout: Duration::from_millis(self.dispatch_timeout_ms),
            profile_window: self.profile_window,
            analyzer: AnalyzerConfig::default(),
            monitor: MonitorConfig {
                interval: Duration::from_secs(self.monitor_interval_secs),
                collect_timeout: Duration::from_millis(self.collect_timeout_ms),
                retention: self.history_retention,
                max_response_time_ms: self.max_response_time_ms,
                max_error_rate: self.max_error_rate,
            },
            switch: SwitchConfig {
                adaptation_threshold: self.adaptation_threshold,
                commit_threshold: self.commit_threshold,
                default_predicted_gain: self.default_predicted_gain,
                migration_steps: self.migration_steps,
                phase_timeout: Duration::from_millis(self.phase_timeout_ms),
                observation_window: Duration::from_secs(self.observation_window_secs),
                validation_timeout: Duration::from_secs(self.validation_timeout_secs),
                ..SwitchConfig::default()
            },
            fault: FaultConfig {
                interval: Duration::from_secs(self.fault_interval_secs),
                health_timeout: Duration::from_millis(self.health_timeout_ms),
                recovery_timeout: Duration::from_millis(self.recovery_timeout_ms),
                unhealthy_threshold: self.unhealthy_threshold,
                breaker: BreakerConfig {
                    threshold: self.breaker_threshold,
                    cooldown: Duration::from_secs(self.breaker_cooldown_secs),
                    call_timeout: Duration::from_millis(self.dependency_timeout_ms),
                },
            },
        })
    }
}
