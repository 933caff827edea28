//! Completion provider abstraction
//!
//! The relay endpoint talks to its upstream through this trait so the
//! provider can be swapped (or replaced by an in-process fake in tests)
//! without touching the handler.

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;

use crate::error::AppResult;

/// Stream of raw body chunks from an upstream provider
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

/// Trait defining the interface for streaming chat-completion providers
///
/// # Security
///
/// Implementations MUST:
/// - Authenticate with the credential passed in, never with caller headers
/// - Forward the request body byte-for-byte
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Get the provider name for logging and metrics
    fn name(&self) -> &'static str;

    /// Chat completions (streaming)
    ///
    /// Sends exactly one request upstream. A success status yields the
    /// response body as a live byte stream; any other status yields
    /// [`AppError::Upstream`](crate::error::AppError::Upstream) carrying the
    /// upstream status and full body.
    async fn chat_completions_stream(&self, api_key: &str, body: Bytes) -> AppResult<ByteStream>;
}
