//! Health endpoint integration tests
//!
//! - GET /health - Full health check with credential status
//! - GET /health/live - Liveness probe
//! - GET /metrics - Prometheus exposition

use axum::http::StatusCode;
use pretty_assertions::assert_eq;
use serde_json::Value;
use threatlens::routes::{metrics::init_metrics, RELAY_PATH};

use crate::common::{chat_body, test_config, test_server, TEST_NIM_API_KEY};
use crate::mocks::MockNim;

#[tokio::test]
async fn test_health_reports_healthy_with_credential() {
    let server = test_server(test_config("http://127.0.0.1:1/v1", Some(TEST_NIM_API_KEY)));

    let response = server.get("/health").await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let json = response.json::<Value>();
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["provider"], "nim");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(json["checks"]["credential"]["configured"], true);
    assert!(json["uptime_seconds"].is_u64());
    assert!(json["timestamp"].is_string());
}

#[tokio::test]
async fn test_health_reports_degraded_without_credential() {
    let server = test_server(test_config("http://127.0.0.1:1/v1", None));

    let response = server.get("/health").await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let json = response.json::<Value>();
    assert_eq!(json["status"], "degraded");
    assert_eq!(json["checks"]["credential"]["status"], "degraded");
    assert_eq!(json["checks"]["credential"]["configured"], false);
}

#[tokio::test]
async fn test_liveness() {
    let server = test_server(test_config("http://127.0.0.1:1/v1", None));

    let response = server.get("/health/live").await;

    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.json::<Value>(), serde_json::json!({ "status": "healthy" }));
}

#[tokio::test]
async fn test_metrics_count_relay_outcomes() {
    init_metrics();

    let nim = MockNim::start().await;
    nim.mock_stream(&["ok"]).await;
    let server = test_server(test_config(&nim.base_url(), Some(TEST_NIM_API_KEY)));

    let relayed = server.post(RELAY_PATH).json(&chat_body("hi")).await;
    assert_eq!(relayed.status_code(), StatusCode::OK);

    let response = server.get("/metrics").await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let body = response.text();
    assert!(body.contains("threatlens_relay_requests_total"));
    assert!(body.contains("status=\"streaming\""));
    assert!(body.contains("threatlens_relay_chunks_total"));
}

#[tokio::test]
async fn test_metrics_labels_ignore_caller_model_names() {
    init_metrics();

    let server = test_server(test_config("http://127.0.0.1:1/v1", None));
    for i in 0..20 {
        let body = serde_json::json!({
            "model": format!("caller-model-{i}"),
            "messages": [],
            "stream": true
        });
        let response = server.post(RELAY_PATH).json(&body).await;
        assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    let body = server.get("/metrics").await.text();
    assert!(body.contains("status=\"config_error\""));
    assert!(!body.contains("caller-model-"));
    assert!(!body.contains("model=\""));
}
