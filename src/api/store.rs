use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use shared::{AppError, Result};
use std::sync::Arc;
use tracing::info;

use super::common::SimpleApiResponse;
use crate::services::{ReceiptRow, ReceiptStats};
use crate::state::AppState;

pub async fn get_data(State(state): State<Arc<AppState>>) -> Result<Json<SimpleApiResponse<Vec<ReceiptRow>>>> {
    let rows = state.store.rows()?;
    Ok(Json(SimpleApiResponse::success(rows)))
}

pub async fn get_stats(State(state): State<Arc<AppState>>) -> Result<Json<SimpleApiResponse<ReceiptStats>>> {
    let stats = state.store.stats()?;
    Ok(Json(SimpleApiResponse::success(stats)))
}

/// The store file as a timestamped CSV attachment.
pub async fn download_csv(State(state): State<Arc<AppState>>) -> Result<Response> {
    let bytes = state
        .store
        .read_raw()?
        .ok_or_else(|| AppError::not_found("receipt data"))?;

    let filename = format!(
        "nfce_data_{}.csv",
        chrono::Local::now().format("%Y%m%d_%H%M%S")
    );
    let disposition = format!("attachment; filename=\"{}\"", filename);

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

/// Recreates the store with only its header. Refused while a job may be
/// appending to it; the single-flight slot is held for the whole rewrite so
/// no job can start halfway through.
pub async fn clear_data(State(state): State<Arc<AppState>>) -> Result<Json<SimpleApiResponse<()>>> {
    let _slot = state.dispatcher.try_reserve().ok_or_else(|| {
        AppError::conflict("Cannot clear data while an extraction job is running")
    })?;

    state.store.clear()?;
    info!("🧹 Receipt data cleared via API");
    Ok(Json(SimpleApiResponse::success_with_message((), "Data cleared")))
}
