//! HTTP API for health checks, Prometheus metrics and the coordinator

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use coordinator_lib::{
    AdaptiveCoordinator, ComponentStatus, CoordinatorError, Operation, WorkloadDescriptor,
};
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Snapshots returned when no limit is given
const DEFAULT_PERFORMANCE_LIMIT: usize = 50;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<AdaptiveCoordinator>,
}

impl AppState {
    pub fn new(coordinator: Arc<AdaptiveCoordinator>) -> Self {
        Self { coordinator }
    }
}

/// Error body returned by the operation endpoint
struct ApiError(CoordinatorError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            CoordinatorError::DependencyUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            CoordinatorError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            CoordinatorError::ExecutionFailed(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = serde_json::json!({
            "error": self.0.to_string(),
            "kind": self.0.kind(),
        });
        (status, Json(body)).into_response()
    }
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.coordinator.health().health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.coordinator.health().readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.coordinator.status())
}

async fn switches(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.coordinator.switch_history())
}

#[derive(Debug, Deserialize)]
struct PerformanceQuery {
    limit: Option<usize>,
    /// Snapshots averaged into the summary; defaults to `limit`
    window: Option<usize>,
}

async fn performance(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PerformanceQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(DEFAULT_PERFORMANCE_LIMIT);
    let window = query.window.unwrap_or(limit);

    Json(serde_json::json!({
        "summary": state.coordinator.performance_summary(window),
        "snapshots": state.coordinator.performance_history(limit),
    }))
}

async fn agents(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.coordinator.agents())
}

async fn breakers(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.coordinator.breakers())
}

async fn submit_workload(
    State(state): State<Arc<AppState>>,
    Json(descriptor): Json<WorkloadDescriptor>,
) -> impl IntoResponse {
    Json(state.coordinator.submit_workload(&descriptor).await)
}

async fn recommend(
    State(state): State<Arc<AppState>>,
    Json(descriptor): Json<WorkloadDescriptor>,
) -> impl IntoResponse {
    Json(state.coordinator.recommend(&descriptor))
}

async fn dispatch(
    State(state): State<Arc<AppState>>,
    Json(operation): Json<Operation>,
) -> Result<impl IntoResponse, ApiError> {
    let result = state.coordinator.dispatch(operation).await.map_err(ApiError)?;
    Ok(Json(result))
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/v1/status", get(status))
        .route("/api/v1/switches", get(switches))
        .route("/api/v1/performance", get(performance))
        .route("/api/v1/agents", get(agents))
        .route("/api/v1/breakers", get(breakers))
        .route("/api/v1/workloads", post(submit_workload))
        .route("/api/v1/recommendations", post(recommend))
        .route("/api/v1/operations", post(dispatch))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
