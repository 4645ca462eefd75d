use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::state::AppState;

pub mod common;
pub mod scan;
pub mod store;

/// Creates the API router with all REST endpoints
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/process", post(scan::process_url))
        .route("/api/status", get(scan::get_status))
        .route("/api/data", get(store::get_data))
        .route("/api/stats", get(store::get_stats))
        .route("/api/download", get(store::download_csv))
        .route("/api/clear", post(store::clear_data))
}
