//! Health check endpoints
//!
//! - `/health` - Full health check with configuration status
//! - `/health/live` - Liveness probe

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::AppState;

/// Health status enum
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

/// Upstream credential check
#[derive(Debug, Serialize)]
pub struct CredentialCheck {
    pub status: HealthStatus,
    pub configured: bool,
}

/// Checks collection
#[derive(Debug, Serialize)]
pub struct HealthChecks {
    pub credential: CredentialCheck,
}

/// Full health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub timestamp: String,
    pub provider: String,
    pub checks: HealthChecks,
}

/// Simple health response for liveness
#[derive(Debug, Serialize)]
pub struct SimpleHealthResponse {
    pub status: HealthStatus,
}

/// Full health check
///
/// The relay stays up without a credential (every relay call then fails
/// with a configuration error), so that case reports `degraded`, not an
/// error status.
pub async fn health_check(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    let configured = state.config.has_credential();
    let status = if configured {
        HealthStatus::Healthy
    } else {
        HealthStatus::Degraded
    };

    let response = HealthResponse {
        status: status.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        provider: state.provider.name().to_string(),
        checks: HealthChecks {
            credential: CredentialCheck { status, configured },
        },
    };

    (StatusCode::OK, Json(response))
}

/// Liveness probe
pub async fn liveness_check() -> (StatusCode, Json<SimpleHealthResponse>) {
    (
        StatusCode::OK,
        Json(SimpleHealthResponse {
            status: HealthStatus::Healthy,
        }),
    )
}
