//! HTTP surface exercised in-process through `tower::ServiceExt::oneshot`.

mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use common::{test_config, wait_until_idle, FakeRunner, Script, RECEIPT_URL};
use nfce_reader::create_app_router;
use nfce_reader::state::AppState;
use serde_json::{json, Value};
use std::io::Write;
use std::sync::Arc;
use tokio::runtime::Handle;
use tower::ServiceExt;

fn build_app(script: Script) -> (Router, Arc<AppState>, Arc<FakeRunner>) {
    let runner = Arc::new(FakeRunner::new(script));
    let state = Arc::new(AppState::with_runner(test_config(5), runner.clone(), Handle::current()).unwrap());
    (create_app_router(state.clone()), state, runner)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, headers, body.to_vec())
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
    let (status, _, body) = send(app, Request::get(uri).body(Body::empty()).unwrap()).await;
    (status, serde_json::from_slice(&body).unwrap())
}

async fn post_json(app: &Router, uri: &str, payload: Value) -> (StatusCode, Value) {
    let request = Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap();
    let (status, _, body) = send(app, request).await;
    (status, serde_json::from_slice(&body).unwrap())
}

fn cleanup(state: &AppState) {
    std::fs::remove_file(state.store.path()).ok();
}

#[tokio::test]
async fn test_health_and_metrics() {
    let (app, state, _) = build_app(Script::Exit(0));

    let (status, body) = get_json(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["reader"]["severity"], "IDLE");

    let (status, headers, body) = send(&app, Request::get("/metrics").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get("x-content-type-options").unwrap(), "nosniff");
    let text = String::from_utf8(body).unwrap();
    assert!(headers.get(header::CONTENT_TYPE).unwrap().to_str().unwrap().starts_with("text/plain"));
    assert!(text.contains("nfce_http_requests_total"));
    assert!(text.contains("nfce_reader_busy"));

    cleanup(&state);
}

#[tokio::test]
async fn test_process_rejects_missing_and_invalid_urls() {
    let (app, state, runner) = build_app(Script::Exit(0));

    let (status, body) = post_json(&app, "/api/process", json!({ "url": "  " })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let (status, _) = post_json(&app, "/api/process", json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = post_json(&app, "/api/process", json!({ "url": "https://example.com/cat.jpg" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "VALIDATION_ERROR");

    assert_eq!(runner.calls(), 0);
    assert!(!state.store.exists());
}

#[tokio::test]
async fn test_process_accepts_then_debounces() {
    println!("🧪 Testing manual URL submission");
    let (app, state, runner) = build_app(Script::Exit(0));

    let (status, body) = post_json(&app, "/api/process", json!({ "url": RECEIPT_URL })).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["data"]["accepted"], true);
    assert!(body["data"]["job_id"].is_string());
    assert!(state.store.exists(), "store is created before the first job");

    wait_until_idle(&state.status).await;
    assert_eq!(runner.calls(), 1);

    let (status, body) = post_json(&app, "/api/process", json!({ "url": RECEIPT_URL })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["accepted"], false);
    assert!(body["data"].get("job_id").is_none());
    assert_eq!(runner.calls(), 1);

    let (_, body) = get_json(&app, "/api/status").await;
    assert_eq!(body["data"]["last_url"], RECEIPT_URL);
    assert_eq!(body["data"]["severity"], "IDLE");
    assert_eq!(body["data"]["color"], json!([0, 255, 0]));

    cleanup(&state);
    println!("✅ 202 then debounced 200");
}

#[tokio::test]
async fn test_busy_dispatcher_returns_conflict() {
    let (app, state, runner) = build_app(Script::WaitForRelease);

    let (status, _) = post_json(&app, "/api/process", json!({ "url": RECEIPT_URL })).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (_, body) = get_json(&app, "/api/status").await;
    assert_eq!(body["data"]["severity"], "BUSY");
    assert_eq!(body["data"]["is_processing"], true);

    let other = "https://www.sefaz.example/nfce/qrcode?p=456";
    let (status, body) = post_json(&app, "/api/process", json!({ "url": other })).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "CONFLICT");

    let (status, _) = post_json(&app, "/api/clear", json!({})).await;
    assert_eq!(status, StatusCode::CONFLICT);

    runner.release.notify_one();
    wait_until_idle(&state.status).await;

    let (status, body) = post_json(&app, "/api/clear", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(runner.calls(), 1);

    cleanup(&state);
}

#[tokio::test]
async fn test_data_stats_and_download() {
    let (app, state, _) = build_app(Script::Exit(0));

    let (status, _, _) = send(&app, Request::get("/api/download").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = get_json(&app, "/api/data").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!([]));

    state.store.ensure_initialized().unwrap();
    {
        let mut file = std::fs::OpenOptions::new().append(true).open(state.store.path()).unwrap();
        writeln!(file, "Mercado A;Arroz;1;UN;12,50;-0,50").unwrap();
        writeln!(file, "Mercado A;Café;2;UN;20,00;").unwrap();
        writeln!(file, "Padaria B;Pão;4;UN;3,00;").unwrap();
    }

    let (_, body) = get_json(&app, "/api/data").await;
    assert_eq!(body["data"].as_array().unwrap().len(), 3);
    assert_eq!(body["data"][1]["Produto"], "Café");

    let (_, body) = get_json(&app, "/api/stats").await;
    assert_eq!(body["data"]["total_items"], 3);
    assert_eq!(body["data"]["total_value"], json!(35.5));
    assert_eq!(body["data"]["total_discount"], json!(0.5));
    assert_eq!(body["data"]["stores"][0]["name"], "Mercado A");
    assert_eq!(body["data"]["stores"][0]["count"], 2);

    let (status, headers, body) = send(&app, Request::get("/api/download").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    let disposition = headers.get(header::CONTENT_DISPOSITION).unwrap().to_str().unwrap();
    assert!(disposition.starts_with("attachment; filename=\"nfce_data_"));
    assert!(disposition.ends_with(".csv\""));
    assert!(body.starts_with(b"\xEF\xBB\xBF"));
    assert!(String::from_utf8_lossy(&body).contains("Padaria B"));

    cleanup(&state);
}

#[tokio::test]
async fn test_clear_holds_slot_and_releases_it() {
    let (app, state, runner) = build_app(Script::Exit(0));
    state.store.ensure_initialized().unwrap();

    // While the slot is held (as it is during a clear) nothing can dispatch.
    let slot = state.dispatcher.try_reserve().unwrap();
    let (status, _) = post_json(&app, "/api/process", json!({ "url": RECEIPT_URL })).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _) = post_json(&app, "/api/clear", json!({})).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(runner.calls(), 0);
    drop(slot);

    let (status, _) = post_json(&app, "/api/clear", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!state.dispatcher.is_busy(), "clear releases the slot");

    let other = "https://www.sefaz.example/nfce/qrcode?p=789";
    let (status, _) = post_json(&app, "/api/process", json!({ "url": other })).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    wait_until_idle(&state.status).await;
    assert_eq!(runner.calls(), 1);

    cleanup(&state);
}
