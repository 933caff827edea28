//! Header utilities for relaying
//!
//! Outbound requests carry only the provider credential and a JSON content
//! type. Relayed streams always go out with the same fixed SSE header set.

use axum::http::{header, response::Builder};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};

use crate::error::{AppError, AppResult};

/// Media type of relayed streams
pub const SSE_CONTENT_TYPE: &str = "text/event-stream";

/// Cache policy of relayed streams
pub const SSE_CACHE_CONTROL: &str = "no-cache, no-transform";

/// Build default headers for upstream requests
///
/// Client headers are intentionally NOT forwarded; the relay is a complete
/// barrier between the browser and the provider.
pub fn build_default_headers(api_key: &str) -> AppResult<HeaderMap> {
    let mut authorization = HeaderValue::from_str(&format!("Bearer {}", api_key)).map_err(|_| {
        AppError::Internal(anyhow::anyhow!(
            "Configured credential contains characters not allowed in a header"
        ))
    })?;
    authorization.set_sensitive(true);

    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, authorization);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    Ok(headers)
}

/// Apply the fixed SSE header set to a relayed response
pub fn with_stream_headers(builder: Builder) -> Builder {
    builder
        .header(header::CONTENT_TYPE, SSE_CONTENT_TYPE)
        .header(header::CACHE_CONTROL, SSE_CACHE_CONTROL)
        .header(header::CONNECTION, "keep-alive")
        .header("X-Accel-Buffering", "no")
}
