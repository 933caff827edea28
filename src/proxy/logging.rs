//! Request logging utilities for relaying
//!
//! Provides structured logging with short correlation IDs so a relayed
//! request can be followed from arrival to the end of its stream.

use std::time::Instant;
use tracing::{error, info, warn, Span};
use uuid::Uuid;

/// Context for tracking a relayed request through the system
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Unique identifier for this request (for log correlation)
    pub trace_id: String,
    /// When the request started
    pub start_time: Instant,
    /// Upstream provider handling this request
    pub provider: String,
    /// Relay path being served
    pub endpoint: String,
    /// Model requested by the caller (if present in the body)
    pub model: Option<String>,
    /// Number of conversation turns in the request
    pub messages: Option<usize>,
}

impl RequestContext {
    /// Create a new request context
    pub fn new(provider: &str, endpoint: &str) -> Self {
        Self {
            trace_id: Uuid::new_v4().to_string()[..8].to_string(), // Short ID for readability
            start_time: Instant::now(),
            provider: provider.to_string(),
            endpoint: endpoint.to_string(),
            model: None,
            messages: None,
        }
    }

    /// Fill model and message count from the caller's JSON body
    pub fn with_request_body(mut self, body: &serde_json::Value) -> Self {
        self.model = body
            .get("model")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string);
        self.messages = body
            .get("messages")
            .and_then(serde_json::Value::as_array)
            .map(Vec::len);
        self
    }

    /// Get elapsed time in milliseconds
    pub fn elapsed_ms(&self) -> u128 {
        self.start_time.elapsed().as_millis()
    }

    /// Get elapsed time in seconds
    pub fn elapsed_secs(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }

    /// Log request initiation
    pub fn log_request_start(&self) {
        info!(
            trace_id = %self.trace_id,
            provider = %self.provider,
            endpoint = %self.endpoint,
            model = ?self.model,
            messages = ?self.messages,
            "Relay request started"
        );
    }

    /// Log stream started
    pub fn log_stream_started(&self) {
        info!(
            trace_id = %self.trace_id,
            provider = %self.provider,
            elapsed_ms = %self.elapsed_ms(),
            "Streaming response started"
        );
    }

    /// Log stream ended after the upstream body was fully relayed
    pub fn log_stream_ended(&self, chunks: usize, bytes: usize) {
        info!(
            trace_id = %self.trace_id,
            provider = %self.provider,
            model = ?self.model,
            chunks = %chunks,
            bytes = %bytes,
            elapsed_ms = %self.elapsed_ms(),
            "Streaming response ended"
        );
    }

    /// Log the consumer going away before the upstream finished
    pub fn log_consumer_disconnected(&self, chunks: usize) {
        warn!(
            trace_id = %self.trace_id,
            provider = %self.provider,
            chunks = %chunks,
            elapsed_ms = %self.elapsed_ms(),
            "Consumer disconnected mid-stream, releasing upstream"
        );
    }

    /// Log request failure
    pub fn log_error(&self, error: &str) {
        error!(
            trace_id = %self.trace_id,
            provider = %self.provider,
            endpoint = %self.endpoint,
            model = ?self.model,
            elapsed_ms = %self.elapsed_ms(),
            error = %error,
            "Relay request failed"
        );
    }

    /// Create a tracing span for this request
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "relay_request",
            trace_id = %self.trace_id,
            provider = %self.provider,
            model = ?self.model,
        )
    }
}
