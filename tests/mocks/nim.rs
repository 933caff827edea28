//! Mock NVIDIA NIM endpoint for testing
//!
//! Serves `POST /v1/chat/completions` and only answers requests carrying the
//! expected bearer credential.
//!
//! # Example
//!
//! ```rust,ignore
//! let nim = MockNim::start().await;
//! nim.mock_stream(&["Hello", " world"]).await;
//!
//! // Use nim.base_url() as NIM_API_URL
//! ```

#![allow(dead_code)]

use serde_json::Value;
use threatlens::completion::StreamChunk;
use threatlens::streaming::{format_sse_chunk, format_sse_done};
use wiremock::{
    matchers::{header, method, path},
    Mock, MockServer, Request, ResponseTemplate,
};

use crate::common::TEST_NIM_API_KEY;

pub const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";

/// Mock NIM server wrapper
pub struct MockNim {
    server: MockServer,
}

impl MockNim {
    /// Start a new mock NIM server
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Base URL to configure as `NIM_API_URL`
    pub fn base_url(&self) -> String {
        format!("{}/v1", self.server.uri())
    }

    fn authorized() -> wiremock::MockBuilder {
        Mock::given(method("POST"))
            .and(path(CHAT_COMPLETIONS_PATH))
            .and(header(
                "Authorization",
                format!("Bearer {}", TEST_NIM_API_KEY).as_str(),
            ))
    }

    /// Stream one SSE frame per delta, then `[DONE]`
    pub async fn mock_stream(&self, deltas: &[&str]) {
        self.mock_raw_stream(&sse_body(deltas)).await;
    }

    /// Stream an arbitrary SSE body
    pub async fn mock_raw_stream(&self, body: &str) {
        Self::authorized()
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(body.to_string(), "text/event-stream"),
            )
            .mount(&self.server)
            .await;
    }

    /// Answer with a success status but a non-SSE content type
    pub async fn mock_plain_success(&self, body: &str) {
        Self::authorized()
            .respond_with(ResponseTemplate::new(200).set_body_raw(body.to_string(), "text/plain"))
            .mount(&self.server)
            .await;
    }

    /// Answer with an error status and JSON body
    pub async fn mock_error(&self, status: u16, body: Value) {
        Self::authorized()
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .mount(&self.server)
            .await;
    }

    /// Fail the test if any request reaches the provider
    pub async fn expect_no_requests(&self) {
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&self.server)
            .await;
    }

    /// Requests received so far
    pub async fn received_requests(&self) -> Vec<Request> {
        self.server.received_requests().await.unwrap_or_default()
    }
}

/// OpenAI-style error body
pub fn provider_error(message: &str, error_type: &str) -> Value {
    serde_json::json!({
        "error": {
            "message": message,
            "type": error_type,
        }
    })
}

/// SSE body with one content frame per delta followed by `[DONE]`
pub fn sse_body(deltas: &[&str]) -> String {
    let mut body = Vec::new();
    for delta in deltas {
        body.extend_from_slice(&format_sse_chunk(&StreamChunk::text(*delta)).unwrap());
    }
    body.extend_from_slice(&format_sse_done());
    String::from_utf8(body).unwrap()
}
