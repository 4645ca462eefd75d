use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
};
use prometheus::{Encoder, TextEncoder};
use std::sync::Arc;

use super::metrics::READER_BUSY;
use crate::state::AppState;

/// `/metrics` in the Prometheus text format. Point-in-time reader gauges are
/// refreshed from the shared state before gathering.
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    READER_BUSY.set(i64::from(state.dispatcher.is_busy()));

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::error!("❌ Failed to encode metrics: {}", e);
        return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response();
    }

    (
        [(header::CONTENT_TYPE, encoder.format_type().to_string())],
        buffer,
    )
        .into_response()
}
