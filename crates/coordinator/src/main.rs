//! Coordinator daemon
//!
//! Runs the adaptive coordinator over an in-process agent pool and serves
//! health, metrics and the coordinator API over HTTP.

use anyhow::Result;
use coordinator::{api, config::CoordinatorSettings, pool::LocalAgentPool};
use coordinator_lib::{fault::dependencies, AdaptiveCoordinator};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting coordinatord");

    let settings = CoordinatorSettings::load()?;
    let config = settings.coordinator_config()?;
    info!(
        instance = %settings.instance,
        topology = %config.initial_topology,
        agents = settings.agents,
        "Coordinator configured"
    );

    let pool = Arc::new(LocalAgentPool::new(settings.agents, config.initial_topology));
    let coordinator = Arc::new(AdaptiveCoordinator::new(pool.clone(), config));
    // Known before the first health poll
    for agent_id in pool.agent_ids() {
        coordinator.faults().register_agent(agent_id);
    }
    for dependency in dependencies::ALL {
        coordinator.faults().breakers().register(dependency);
    }

    let handle = coordinator.start().await;

    let app_state = Arc::new(api::AppState::new(coordinator.clone()));
    let mut api_handle = tokio::spawn(api::serve(settings.api_port, app_state));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("SIGINT received, shutting down");
        }
        result = &mut api_handle => {
            match result {
                Ok(Ok(())) => info!("API server stopped"),
                Ok(Err(e)) => error!(error = %e, "API server failed"),
                Err(e) => error!(error = %e, "API server task panicked"),
            }
        }
    }

    handle.shutdown().await;
    api_handle.abort();
    info!("Coordinator stopped");

    Ok(())
}
