//! NVIDIA NIM provider
//!
//! Forwards chat-completion requests to an OpenAI-compatible NIM endpoint.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, error, instrument};

use crate::{
    config::Config,
    error::{AppError, AppResult},
    proxy::{headers::build_default_headers, ByteStream, CompletionProvider},
};

/// NIM client holding a pooled HTTP client and the provider base URL
pub struct NimProvider {
    client: reqwest::Client,
    base_url: String,
}

impl NimProvider {
    /// Create a new NIM provider
    pub fn new(client: reqwest::Client, config: &Config) -> Self {
        Self {
            client,
            base_url: config.nim_api_url.trim_end_matches('/').to_string(),
        }
    }

    fn chat_completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl CompletionProvider for NimProvider {
    fn name(&self) -> &'static str {
        "nim"
    }

    #[instrument(skip(self, api_key, body), fields(body_len = body.len()))]
    async fn chat_completions_stream(&self, api_key: &str, body: Bytes) -> AppResult<ByteStream> {
        let url = self.chat_completions_url();
        let headers = build_default_headers(api_key)?;

        debug!(url = %url, "Sending request to NIM");

        let response = self
            .client
            .post(&url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                error!(url = %url, error = %e, "Failed to send request to NIM");
                e
            })?;

        let status = response.status();
        debug!(url = %url, status = %status, "Received response from NIM");

        if !status.is_success() {
            let content_type = response.headers().get(CONTENT_TYPE).cloned();
            let body = response.bytes().await?;
            return Err(AppError::Upstream {
                status,
                content_type,
                body,
            });
        }

        Ok(Box::pin(response.bytes_stream()))
    }
}
