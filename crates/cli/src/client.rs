//! API client for communicating with the coordinator daemon

use anyhow::{Context, Result};
use reqwest::{Client, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

/// Non-success reply from the coordinator
#[derive(Debug, thiserror::Error)]
#[error("API error ({status}): {message}")]
pub struct ApiError {
    pub status: u16,
    pub message: String,
    /// Machine-readable error kind, when the daemon sent one
    pub kind: Option<String>,
}

/// API client for the coordinator daemon
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        Self::parse(response).await
    }

    /// Make a POST request with JSON body
    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .context("Failed to send request")?;

        Self::parse(response).await
    }

    async fn parse<T: DeserializeOwned>(response: Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let (message, kind) = match serde_json::from_str::<ErrorResponse>(&body) {
                Ok(err) => (err.error, err.kind),
                Err(_) => (body, None),
            };
            return Err(ApiError {
                status: status.as_u16(),
                message,
                kind,
            }
            .into());
        }

        response.json().await.context("Failed to parse response")
    }
}

// API response types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub timestamp: i64,
    pub topology: String,
    pub avg_response_time_ms: f64,
    pub throughput: f64,
    pub error_rate: f64,
    pub resource_utilization: f64,
    #[serde(default)]
    pub domain_counters: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchRecord {
    pub from: String,
    pub to: String,
    pub timestamp: i64,
    pub predicted_gain: f64,
    pub measured_gain: Option<f64>,
    pub outcome: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorStatus {
    pub instance: String,
    pub topology: String,
    pub switch_in_progress: bool,
    pub switch_phase: String,
    pub latest_snapshot: Option<Snapshot>,
    pub healthy_agents: usize,
    pub total_agents: usize,
    pub open_breakers: Vec<String>,
    pub last_switch: Option<SwitchRecord>,
    pub profile_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub samples: usize,
    pub avg_response_time_ms: f64,
    pub avg_throughput: f64,
    pub avg_error_rate: f64,
    pub avg_resource_utilization: f64,
    #[serde(default)]
    pub samples_per_topology: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub summary: Option<PerformanceSummary>,
    pub snapshots: Vec<Snapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentHealth {
    pub agent_id: String,
    pub alive: bool,
    pub last_heartbeat: i64,
    pub consecutive_failures: u32,
    #[serde(default)]
    pub workloads: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Breaker {
    pub dependency: String,
    pub state: String,
    pub consecutive_failures: u32,
    pub last_failure: Option<i64>,
    pub threshold: u32,
    pub cooldown_ms: u64,
}

/// Workload description sent for recommendation or submission
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkloadDescriptor {
    pub category: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_results: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub urgency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partition_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strong_consistency: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequential: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadAnalysis {
    pub scores: BTreeMap<String, f64>,
    pub primary_reason: String,
    pub confidence: f64,
    pub sequential: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Selection {
    pub topology: String,
    pub reason: String,
    pub rule: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub current: String,
    pub analysis: WorkloadAnalysis,
    pub selection: Selection,
}

/// Decision taken on a submitted workload, tagged by `status`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchDecision {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicted_gain: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<SwitchRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptationReport {
    pub analysis: WorkloadAnalysis,
    pub selection: Selection,
    pub decision: SwitchDecision,
    pub topology: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRequest {
    pub id: String,
    pub category: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResult {
    pub operation_id: String,
    pub topology: String,
    pub overridden: bool,
    pub output: serde_json::Value,
    pub duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn test_get_parses_status() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/status")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                serde_json::json!({
                    "instance": "edge-1",
                    "topology": "mesh",
                    "switch_in_progress": false,
                    "switch_phase": "idle",
                    "latest_snapshot": null,
                    "healthy_agents": 3,
                    "total_agents": 4,
                    "open_breakers": ["search_index"],
                    "last_switch": null,
                    "profile_size": 12
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let status: CoordinatorStatus = assert_ok!(client.get("api/v1/status").await);

        mock.assert_async().await;
        assert_eq!(status.topology, "mesh");
        assert_eq!(status.healthy_agents, 3);
        assert_eq!(status.open_breakers, vec!["search_index"]);
    }

    #[tokio::test]
    async fn test_error_body_becomes_api_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/v1/operations")
            .with_status(503)
            .with_body(r#"{"error":"dependency 'search_index' unavailable","kind":"dependency_unavailable"}"#)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let request = OperationRequest {
            id: "op-1".to_string(),
            category: "search".to_string(),
            payload: serde_json::Value::Null,
        };
        let err = client
            .post::<OperationResult, _>("api/v1/operations", &request)
            .await
            .unwrap_err();

        let api = err.downcast_ref::<ApiError>().unwrap();
        assert_eq!(api.status, 503);
        assert_eq!(api.kind.as_deref(), Some("dependency_unavailable"));
        assert!(api.message.contains("search_index"));
    }

    #[tokio::test]
    async fn test_plain_error_body_is_kept() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/agents")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let err = client.get::<Vec<AgentHealth>>("api/v1/agents").await.unwrap_err();

        let api = err.downcast_ref::<ApiError>().unwrap();
        assert_eq!(api.message, "boom");
        assert!(api.kind.is_none());
    }

    #[tokio::test]
    async fn test_post_sends_descriptor() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v1/recommendations")
            .match_body(mockito::Matcher::Json(serde_json::json!({
                "category": "search",
                "expected_results": 5000
            })))
            .with_status(200)
            .with_body(
                serde_json::json!({
                    "current": "hierarchical",
                    "analysis": {
                        "scores": { "parallelizability": 0.9 },
                        "primary_reason": "parallelizability",
                        "confidence": 0.6,
                        "sequential": false
                    },
                    "selection": { "topology": "mesh", "reason": "parallel work", "rule": "parallel" }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let descriptor = WorkloadDescriptor {
            category: "search".to_string(),
            expected_results: Some(5000),
            ..Default::default()
        };
        let rec: Recommendation = client
            .post("api/v1/recommendations", &descriptor)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(rec.selection.topology, "mesh");
    }

    #[test]
    fn test_decision_variants_deserialize() {
        let skipped: SwitchDecision =
            serde_json::from_str(r#"{"status":"skipped","predicted_gain":0.08}"#).unwrap();
        assert_eq!(skipped.status, "skipped");
        assert_eq!(skipped.predicted_gain, Some(0.08));

        let unchanged: SwitchDecision = serde_json::from_str(r#"{"status":"unchanged"}"#).unwrap();
        assert!(unchanged.record.is_none());
    }

    #[test]
    fn test_invalid_url_is_rejected() {
        assert!(ApiClient::new("not a url").is_err());
    }
}
