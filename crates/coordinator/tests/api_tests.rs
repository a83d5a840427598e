//! Integration tests for the coordinator API endpoints

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use coordinator::api::{create_router, AppState};
use coordinator::pool::LocalAgentPool;
use coordinator_lib::{
    coordinator::CoordinatorConfig, fault::dependencies, health::components,
    switch::SwitchConfig, AdaptiveCoordinator, AgentExecutionLayer, Operation,
    OperationCategory, Topology, TransitionOutcome,
};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn test_config() -> CoordinatorConfig {
    CoordinatorConfig {
        instance: "api-test".to_string(),
        initial_topology: Topology::Hierarchical,
        switch: SwitchConfig {
            phase_timeout: Duration::from_millis(200),
            observation_window: Duration::from_millis(5),
            validation_timeout: Duration::from_millis(500),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn setup_test_app() -> (Router, Arc<AdaptiveCoordinator>) {
    let pool = Arc::new(LocalAgentPool::new(2, Topology::Hierarchical));
    let coordinator = Arc::new(AdaptiveCoordinator::new(pool, test_config()));
    let state = Arc::new(AppState::new(coordinator.clone()));
    (create_router(state), coordinator)
}

async fn get(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

async fn post(app: Router, uri: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_healthz_returns_ok_when_degraded() {
    let (app, coordinator) = setup_test_app();

    coordinator
        .health()
        .set_degraded(components::PERFORMANCE_MONITOR, "metrics collection timed out")
        .await;

    let (status, health) = get(app, "/healthz").await;

    // Degraded still returns 200 (operational)
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "degraded");
}

#[tokio::test]
async fn test_healthz_returns_503_when_unhealthy() {
    let (app, coordinator) = setup_test_app();

    coordinator.health().report_agents(0, 2).await;

    let (status, health) = get(app, "/healthz").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(health["status"], "unhealthy");
    assert_eq!(
        health["components"][components::AGENT_POOL]["message"],
        "0 of 2 agents healthy"
    );
}

#[tokio::test]
async fn test_readyz_returns_503_before_start() {
    let (app, _coordinator) = setup_test_app();

    let (status, readiness) = get(app, "/readyz").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(readiness["ready"], false);
    assert_eq!(readiness["reason"], "Coordinator not yet started");
}

#[tokio::test]
async fn test_readyz_follows_coordinator_lifecycle() {
    let (app, coordinator) = setup_test_app();

    let handle = coordinator.start().await;
    let (status, readiness) = get(app.clone(), "/readyz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(readiness["ready"], true);

    handle.shutdown().await;
    let (status, _) = get(app, "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_metrics_endpoint_exposes_coordinator_metrics() {
    let (app, _coordinator) = setup_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/plain; charset=utf-8"
    );

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("coordinator_topology_overrides_total"));
}

#[tokio::test]
async fn test_status_reports_committed_topology() {
    let (app, coordinator) = setup_test_app();
    coordinator.faults().register_agent("agent-0");

    let (status, body) = get(app, "/api/v1/status").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["instance"], "api-test");
    assert_eq!(body["topology"], "hierarchical");
    assert_eq!(body["switch_in_progress"], false);
    assert_eq!(body["total_agents"], 1);
}

#[tokio::test]
async fn test_performance_returns_summary_and_snapshots() {
    let (app, coordinator) = setup_test_app();
    coordinator.monitor().sample().await.unwrap();
    coordinator.monitor().sample().await.unwrap();

    let (status, body) = get(app, "/api/v1/performance?limit=1&window=2").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["snapshots"].as_array().unwrap().len(), 1);
    assert_eq!(body["summary"]["samples"], 2);
}

#[tokio::test]
async fn test_performance_without_history_has_no_summary() {
    let (app, _coordinator) = setup_test_app();

    let (status, body) = get(app, "/api/v1/performance").await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["summary"].is_null());
    assert!(body["snapshots"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_agents_and_breakers_start_empty() {
    let (app, _coordinator) = setup_test_app();

    let (status, agents) = get(app.clone(), "/api/v1/agents").await;
    assert_eq!(status, StatusCode::OK);
    assert!(agents.as_array().unwrap().is_empty());

    let (status, breakers) = get(app, "/api/v1/breakers").await;
    assert_eq!(status, StatusCode::OK);
    assert!(breakers.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_registered_dependencies_are_listed() {
    let (app, coordinator) = setup_test_app();
    for dependency in dependencies::ALL {
        coordinator.faults().breakers().register(dependency);
    }

    let (status, breakers) = get(app, "/api/v1/breakers").await;

    assert_eq!(status, StatusCode::OK);
    let breakers = breakers.as_array().unwrap();
    assert_eq!(breakers.len(), 3);
    assert!(breakers.iter().all(|b| b["state"] == "closed"));
    assert_eq!(breakers[0]["dependency"], "database");
}

#[tokio::test]
async fn test_agents_listed_after_health_poll() {
    let (app, coordinator) = setup_test_app();
    coordinator.faults().poll().await;

    let (status, agents) = get(app, "/api/v1/agents").await;

    assert_eq!(status, StatusCode::OK);
    let agents = agents.as_array().unwrap();
    assert_eq!(agents.len(), 2);
    assert_eq!(agents[0]["agent_id"], "agent-0");
    assert_eq!(agents[0]["alive"], true);
}

#[tokio::test]
async fn test_recommendation_has_no_side_effects() {
    let (app, coordinator) = setup_test_app();

    let (status, body) = post(
        app,
        "/api/v1/recommendations",
        serde_json::json!({ "category": "search", "expected_results": 5000 }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["current"], "hierarchical");
    assert!(body["selection"]["topology"].is_string());
    assert_eq!(coordinator.topology(), Topology::Hierarchical);
    assert!(coordinator.switch_history().is_empty());
}

#[tokio::test]
async fn test_submit_workload_returns_decision() {
    let (app, _coordinator) = setup_test_app();

    let (status, body) = post(
        app,
        "/api/v1/workloads",
        serde_json::json!({ "category": "crud", "strong_consistency": true }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["decision"]["status"].is_string());
    assert!(body["analysis"]["confidence"].is_number());
    assert!(body["topology"].is_string());
}

#[tokio::test]
async fn test_submit_workload_rejects_unknown_category() {
    let (app, _coordinator) = setup_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/workloads")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"category":"teleportation"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_dispatch_routes_to_pipeline_topology() {
    let (app, _coordinator) = setup_test_app();

    let (status, body) = post(
        app,
        "/api/v1/operations",
        serde_json::json!({ "id": "op-1", "category": "search", "payload": { "q": "rust" } }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["operation_id"], "op-1");
    assert_eq!(body["topology"], "mesh");
    assert_eq!(body["overridden"], true);
}

#[tokio::test]
async fn test_dispatch_failure_maps_to_bad_gateway() {
    let (app, _coordinator) = setup_test_app();

    let (status, body) = post(
        app,
        "/api/v1/operations",
        serde_json::json!({ "id": "op-2", "category": "crud", "payload": { "fail": true } }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["kind"], "execution_failed");
    assert!(body["error"].as_str().unwrap().contains("op-2"));
}

#[tokio::test]
async fn test_switch_history_starts_empty() {
    let (app, _coordinator) = setup_test_app();

    let (status, body) = get(app, "/api/v1/switches").await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_idle_pool_does_not_commit_switch() {
    let pool = Arc::new(LocalAgentPool::new(2, Topology::Hierarchical));
    let coordinator = Arc::new(AdaptiveCoordinator::new(pool.clone(), test_config()));
    for i in 0..5 {
        let op = Operation::new(format!("op-{}", i), OperationCategory::Generic);
        pool.execute_on_topology(Topology::Hierarchical, &op)
            .await
            .unwrap();
    }

    // Nothing runs during the observation window
    let outcome = coordinator
        .switches()
        .request_switch(Topology::Ring)
        .await
        .unwrap();

    let record = outcome.record().unwrap();
    assert_eq!(record.outcome, TransitionOutcome::RolledBack);
    assert!(record.measured_gain.is_none());
    assert_eq!(coordinator.topology(), Topology::Hierarchical);
    assert_eq!(pool.active_topology(), Topology::Hierarchical);
}
