use axum::middleware as axum_middleware;
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod models;
pub mod monitoring;
pub mod observability;
pub mod processing;
pub mod security;
pub mod server;
pub mod services;
pub mod state;

use api::create_api_router;
use monitoring::monitoring_router;
use observability::metrics_middleware;
use security::{get_cors_layer, security_headers_middleware};
use state::AppState;

/// Full HTTP surface: control API, health and metrics.
pub fn create_app_router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .merge(monitoring_router())
        .merge(create_api_router())
        .with_state(app_state)
        .layer(axum_middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(get_cors_layer())
        .layer(axum_middleware::from_fn(security_headers_middleware))
}
