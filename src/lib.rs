//! Threatlens - streaming chat-completion relay for the threat dashboard
//!
//! The server side relays chat-completion requests to an OpenAI-compatible
//! provider, injecting a credential the browser never sees, and pipes the
//! server-sent event stream back unchanged. The client side consumes that
//! stream incrementally with cooperative cancellation.

pub mod analysis;
pub mod client;
pub mod completion;
pub mod config;
pub mod error;
pub mod proxy;
pub mod routes;
pub mod streaming;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;

pub use crate::client::{RelayClient, RelayClientConfig, StreamConsumer, StreamSession};
pub use crate::config::Config;
pub use crate::error::{AppError, AppResult};
pub use crate::proxy::{CompletionProvider, NimProvider};

/// Application state shared across all request handlers
pub struct AppState {
    pub config: Config,
    pub start_time: Instant,
    /// Upstream provider the relay forwards to
    pub provider: Arc<dyn CompletionProvider>,
}

impl AppState {
    /// Create a new application state backed by the NIM provider
    pub fn new(config: Config) -> Result<Self> {
        // Initialize HTTP client with connection pooling
        let mut builder = reqwest::Client::builder().pool_max_idle_per_host(100);
        if config.upstream_timeout_seconds > 0 {
            builder = builder.timeout(Duration::from_secs(config.upstream_timeout_seconds));
        }
        let http_client = builder.build()?;

        let provider: Arc<dyn CompletionProvider> =
            Arc::new(NimProvider::new(http_client, &config));

        Ok(Self::with_provider(config, provider))
    }

    /// Create an application state around an explicit provider
    pub fn with_provider(config: Config, provider: Arc<dyn CompletionProvider>) -> Self {
        Self {
            config,
            start_time: Instant::now(),
            provider,
        }
    }
}
