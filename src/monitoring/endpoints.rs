use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use std::sync::Arc;

use crate::observability::metrics_handler;
use crate::state::AppState;

/// Health and Prometheus endpoints, unauthenticated.
pub fn monitoring_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
}

async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.status.snapshot();
    let health = serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "service": "nfce_reader",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "reader": {
            "severity": snapshot.severity,
            "is_processing": snapshot.is_processing,
        },
        "store_present": state.store.exists(),
    });

    (StatusCode::OK, Json(health))
}
