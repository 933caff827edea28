//! Stream consumer
//!
//! Client side of the relay: issues a chat-completion request to the relay
//! endpoint and turns its SSE body into an incrementally growing text buffer
//! with cooperative cancellation.

pub mod consumer;
pub mod error;
pub mod session;

use std::env;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::completion::CompletionRequest;
use crate::routes::RELAY_PATH;
use crate::streaming::FrameError;

pub use consumer::{StopHandle, StreamConsumer};
pub use error::ConsumerError;
pub use session::{SessionOptions, SessionReport, SessionState, SkipHook, StreamSession};

/// Model used when the caller does not pick one
pub const DEFAULT_MODEL: &str = "meta/llama-3.1-8b-instruct";

/// Relay client configuration
#[derive(Debug, Clone)]
pub struct RelayClientConfig {
    /// Origin of the relay server, e.g. `http://127.0.0.1:8080`
    pub base_url: String,
    /// Path of the relay endpoint on that server
    pub relay_path: String,
    /// Model identifier placed in every request
    pub model: String,
    /// Fail a session when the relay stays silent this long
    pub idle_timeout: Option<Duration>,
}

impl Default for RelayClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            relay_path: RELAY_PATH.to_string(),
            model: DEFAULT_MODEL.to_string(),
            idle_timeout: Some(Duration::from_secs(60)),
        }
    }
}

impl RelayClientConfig {
    /// Load client configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let idle_secs: u64 = env::var("THREATLENS_IDLE_TIMEOUT_SECONDS")
            .unwrap_or_else(|_| "60".to_string())
            .parse()
            .context("Invalid THREATLENS_IDLE_TIMEOUT_SECONDS")?;

        Ok(Self {
            base_url: env::var("THREATLENS_RELAY_URL").unwrap_or(defaults.base_url),
            relay_path: defaults.relay_path,
            model: env::var("THREATLENS_MODEL").unwrap_or(defaults.model),
            idle_timeout: (idle_secs > 0).then(|| Duration::from_secs(idle_secs)),
        })
    }

    /// Full URL of the relay endpoint
    pub fn endpoint(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.relay_path.trim_start_matches('/')
        )
    }
}

/// Explicitly constructed handle to the relay endpoint
#[derive(Clone)]
pub struct RelayClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    idle_timeout: Option<Duration>,
    skip_hook: Option<SkipHook>,
}

impl RelayClient {
    /// Create a new relay client
    pub fn new(http: reqwest::Client, config: RelayClientConfig) -> Self {
        Self {
            http,
            endpoint: config.endpoint(),
            model: config.model,
            idle_timeout: config.idle_timeout,
            skip_hook: None,
        }
    }

    /// Install a diagnostic hook called for every skipped frame
    pub fn with_skip_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&FrameError) + Send + Sync + 'static,
    {
        self.skip_hook = Some(Arc::new(hook));
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Issue the request and wait for the relay's response headers.
    ///
    /// Gives up with [`ConsumerError::AbortedByUser`] if `cancel` fires first.
    pub async fn open(
        &self,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response, ConsumerError> {
        debug!(
            endpoint = %self.endpoint,
            model = %request.model,
            messages = request.messages.len(),
            "Sending completion request to relay"
        );

        let send = self.http.post(&self.endpoint).json(request).send();
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ConsumerError::AbortedByUser),
            response = send => response.map_err(ConsumerError::transport)?,
        };

        let status = response.status();
        if !status.is_success() {
            let body = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ConsumerError::AbortedByUser),
                body = response.text() => body.unwrap_or_default(),
            };
            return Err(ConsumerError::upstream(status, &body));
        }

        Ok(response)
    }

    /// Start a session for `request` with this client's default options.
    pub fn start(&self, request: CompletionRequest) -> StreamSession {
        self.start_with(request, None)
    }

    /// Start a session, optionally publishing its text into `publish_to`.
    pub fn start_with(
        &self,
        request: CompletionRequest,
        publish_to: Option<Arc<watch::Sender<String>>>,
    ) -> StreamSession {
        let options = SessionOptions {
            idle_timeout: self.idle_timeout,
            skip_hook: self.skip_hook.clone(),
            publish_to,
        };

        let client = self.clone();
        StreamSession::spawn(options, move |cancel| async move {
            let response = client.open(&request, &cancel).await?;
            Ok::<_, ConsumerError>(response.bytes_stream())
        })
    }
}

impl fmt::Debug for RelayClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayClient")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("idle_timeout", &self.idle_timeout)
            .field("skip_hook", &self.skip_hook.is_some())
            .finish()
    }
}
