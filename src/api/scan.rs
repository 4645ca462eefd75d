use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use shared::{AppError, Result};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use super::common::SimpleApiResponse;
use crate::models::Severity;
use crate::observability::metrics;
use crate::processing::url_validator;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ProcessRequest {
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct ProcessResponse {
    pub url: String,
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct StatusView {
    pub status_text: String,
    pub severity: Severity,
    pub color: [u8; 3],
    pub is_processing: bool,
    pub last_url: String,
    pub last_accept_secs: f64,
}

/// Manual submission of a receipt URL; goes through the same validation,
/// debounce and single-flight rules as a camera scan.
#[instrument(skip(state, request))]
pub async fn process_url(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ProcessRequest>,
) -> Result<(StatusCode, Json<SimpleApiResponse<ProcessResponse>>)> {
    let url = request.url.trim().to_string();
    if url.is_empty() {
        return Err(AppError::bad_request("URL not provided"));
    }
    if !url_validator::is_valid(&url) {
        metrics::URL_REJECTIONS_TOTAL.inc();
        return Err(AppError::validation(
            "Invalid URL, expected a fiscal receipt (NFC-e) URL",
        ));
    }

    if !state.gate.offer_now(&url) {
        let body = ProcessResponse {
            url,
            accepted: false,
            job_id: None,
        };
        return Ok((
            StatusCode::OK,
            Json(SimpleApiResponse::success_with_message(
                body,
                "Same receipt submitted moments ago, ignored",
            )),
        ));
    }

    state.store.ensure_initialized()?;

    let job_id = state
        .dispatcher
        .dispatch(&url)
        .ok_or_else(|| AppError::conflict("An extraction job is already running"))?;

    info!("📥 Receipt URL queued via API as job {}", job_id);
    let body = ProcessResponse {
        url,
        accepted: true,
        job_id: Some(job_id),
    };
    Ok((
        StatusCode::ACCEPTED,
        Json(SimpleApiResponse::success_with_message(body, "Extraction started")),
    ))
}

pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<SimpleApiResponse<StatusView>> {
    let snapshot = state.status.snapshot();
    let (r, g, b) = snapshot.severity.color_rgb();

    Json(SimpleApiResponse::success(StatusView {
        status_text: snapshot.status_text,
        severity: snapshot.severity,
        color: [r, g, b],
        is_processing: snapshot.is_processing,
        last_url: snapshot.last_url,
        last_accept_secs: snapshot.last_accept_time.as_secs_f64(),
    }))
}
