//! Error types for the relay endpoint
//!
//! Local failures become `500` responses with a `{ "error": "<message>" }`
//! body. Upstream failures are replayed to the caller with the upstream's own
//! status code and body, untouched.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;

/// Relay-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Server NIM_API_KEY is not configured")]
    MissingCredential,

    #[error("Invalid request body: {0}")]
    InvalidBody(#[from] serde_json::Error),

    #[error("Upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Upstream returned {status}")]
    Upstream {
        status: StatusCode,
        content_type: Option<HeaderValue>,
        body: Bytes,
    },

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Short label used for metrics and log fields
    pub fn label(&self) -> &'static str {
        match self {
            AppError::MissingCredential => "config_error",
            AppError::InvalidBody(_) => "invalid_body",
            AppError::Transport(_) => "transport_error",
            AppError::Upstream { .. } => "upstream_error",
            AppError::Internal(_) => "internal_error",
        }
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Upstream {
                status,
                content_type,
                body,
            } => {
                let body = if body.is_empty() {
                    Bytes::from(status.canonical_reason().unwrap_or_default())
                } else {
                    body
                };

                let content_type = content_type
                    .unwrap_or_else(|| HeaderValue::from_static("text/plain; charset=utf-8"));
                let mut response = (status, body).into_response();
                response.headers_mut().insert(header::CONTENT_TYPE, content_type);
                response
            }
            other => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: other.to_string(),
                }),
            )
                .into_response(),
        }
    }
}

/// Result type alias for convenience
pub type AppResult<T> = Result<T, AppError>;
