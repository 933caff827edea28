//! HTTP routes for Threatlens
//!
//! This module defines all HTTP endpoints exposed by the relay server.

pub mod health;
pub mod metrics;
pub mod relay;

use std::sync::Arc;

use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

use crate::AppState;

pub use relay::RELAY_PATH;

/// Create the main application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let relay_routes = Router::new().route(RELAY_PATH, post(relay::relay_chat_completions));

    let public_routes = Router::new()
        .route("/health", get(health::health_check))
        .route("/health/live", get(health::liveness_check))
        .route("/metrics", get(metrics::prometheus_metrics));

    // Compression skips `text/event-stream` by default, so relayed streams
    // are flushed chunk by chunk.
    let mut router = Router::new()
        .merge(public_routes)
        .merge(relay_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new()),
        );

    // Same-origin only unless origins are configured
    if let Some(cors) = cors_layer(&state.config.allowed_origins) {
        router = router.layer(cors);
    }

    router.with_state(state)
}

/// CORS for the configured origins, or `None` when the relay is same-origin only
fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid allowed origin");
                None
            }
        })
        .collect();

    if allowed.is_empty() {
        return None;
    }

    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(allowed))
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::CONTENT_TYPE]),
    )
}
