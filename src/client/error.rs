//! Errors surfaced by the stream consumer
//!
//! Malformed individual frames are not errors at this level; they are
//! skipped and counted by the session instead.

use reqwest::StatusCode;
use thiserror::Error;

/// Terminal error of a stream session
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsumerError {
    /// Cancellation was requested before the stream finished
    #[error("stopped by user")]
    AbortedByUser,

    /// The relay answered with a non-success status
    #[error("relay error {status}: {message}")]
    Upstream { status: u16, message: String },

    /// The relay could not be reached, or the connection failed mid-stream
    #[error("transport error: {0}")]
    Transport(String),
}

impl ConsumerError {
    pub(crate) fn transport(error: impl std::fmt::Display) -> Self {
        Self::Transport(error.to_string())
    }

    /// Build an upstream error from a relay status and raw response body.
    ///
    /// Local relay errors carry `{ "error": "<message>" }`; OpenAI-style
    /// provider errors carry `{ "error": { "message": "..." } }`. Anything
    /// else is reported as the trimmed body, or the reason phrase when empty.
    pub(crate) fn upstream(status: StatusCode, body: &str) -> Self {
        let message = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|value| {
                let error = value.get("error")?;
                error
                    .as_str()
                    .or_else(|| error.get("message").and_then(serde_json::Value::as_str))
                    .map(str::to_string)
            })
            .unwrap_or_else(|| body.trim().to_string());

        let message = if message.is_empty() {
            status.canonical_reason().unwrap_or("unknown error").to_string()
        } else {
            message
        };

        Self::Upstream {
            status: status.as_u16(),
            message,
        }
    }

    /// Whether this error came from cancellation rather than a failure
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::AbortedByUser)
    }
}
