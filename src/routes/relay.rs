//! Chat-completion relay endpoint
//!
//! Injects the server-held credential, forwards the caller's body upstream
//! unmodified and pipes the upstream stream straight back.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::StatusCode,
    response::Response,
};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use tracing::Instrument;

use crate::{
    error::AppError,
    proxy::{headers::with_stream_headers, ByteStream, RequestContext},
    routes::metrics::{record_consumer_disconnect, record_relay_request, record_stream_chunks},
    AppState,
};

/// Path the dashboard posts chat-completion requests to
pub const RELAY_PATH: &str = "/api/nim/v1/chat/completions";

/// Relay a streaming chat completion
///
/// 1. The body must parse as JSON; it is otherwise passed through untouched
/// 2. A missing credential fails before anything is sent upstream
/// 3. Upstream failures are replayed with their original status and body
/// 4. Upstream success is streamed back chunk by chunk as SSE
pub async fn relay_chat_completions(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, AppError> {
    let ctx = RequestContext::new(state.provider.name(), RELAY_PATH);

    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => return Err(fail(&ctx, AppError::InvalidBody(e))),
    };
    let ctx = ctx.with_request_body(&payload);
    ctx.log_request_start();

    let Some(api_key) = state.config.nim_api_key.as_deref() else {
        return Err(fail(&ctx, AppError::MissingCredential));
    };

    let upstream = match state
        .provider
        .chat_completions_stream(api_key, body)
        .instrument(ctx.create_span())
        .await
    {
        Ok(stream) => stream,
        Err(e) => return Err(fail(&ctx, e)),
    };

    ctx.log_stream_started();
    record_relay_request("streaming", ctx.elapsed_secs());

    let body = Body::from_stream(relay_stream(upstream, ctx));

    with_stream_headers(Response::builder().status(StatusCode::OK))
        .body(body)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to build response: {}", e)))
}

fn fail(ctx: &RequestContext, error: AppError) -> AppError {
    ctx.log_error(&error.to_string());
    record_relay_request(error.label(), ctx.elapsed_secs());
    error
}

/// Pipe upstream chunks through as they arrive.
///
/// The returned stream owns the upstream body. If the consumer disconnects,
/// axum drops it, which drops the upstream response and frees its connection.
fn relay_stream(
    upstream: ByteStream,
    ctx: RequestContext,
) -> impl Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static {
    async_stream::stream! {
        let mut upstream = upstream;
        let mut tracker = StreamTracker::new(ctx);

        while let Some(chunk) = upstream.next().await {
            match chunk {
                Ok(bytes) => {
                    tracker.record(bytes.len());
                    yield Ok(bytes);
                }
                Err(e) => {
                    tracker.ctx.log_error(&format!("Upstream stream error: {}", e));
                    tracker.finish();
                    yield Err(e);
                    return;
                }
            }
        }

        tracker.finish();
    }
}

/// Bookkeeping for one relayed stream; reports a disconnect if dropped early.
struct StreamTracker {
    ctx: RequestContext,
    chunks: usize,
    bytes: usize,
    finished: bool,
}

impl StreamTracker {
    fn new(ctx: RequestContext) -> Self {
        Self {
            ctx,
            chunks: 0,
            bytes: 0,
            finished: false,
        }
    }

    fn record(&mut self, len: usize) {
        self.chunks += 1;
        self.bytes += len;
    }

    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.ctx.log_stream_ended(self.chunks, self.bytes);
        record_stream_chunks(self.chunks as u64);
    }
}

impl Drop for StreamTracker {
    fn drop(&mut self) {
        if !self.finished {
            self.ctx.log_consumer_disconnected(self.chunks);
            record_consumer_disconnect();
            record_stream_chunks(self.chunks as u64);
        }
    }
}
