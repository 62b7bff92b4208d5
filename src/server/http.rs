use crate::audit::AuditKind;
use crate::config::SettingsUpdate;
use crate::logs::LogKind;
use crate::server::AppState;
use crate::server::ws::EXTENSION_WS_PATH;
use crate::{BridgeError, Result};
use axum::{
    Json, Router,
    extract::{State, WebSocketUpgrade},
    http::StatusCode,
    response::Response,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::atomic::Ordering;
use tower_http::cors::{Any, CorsLayer};

pub const IDENTITY_SIGNATURE: &str = "browser-telemetry-bridge";

#[derive(Deserialize)]
struct ExtensionLogRequest {
    data: Value,
    settings: Option<SettingsUpdate>,
}

#[derive(Deserialize)]
struct SelectedElementRequest {
    data: Value,
}

#[derive(Deserialize)]
struct CurrentUrlRequest {
    url: String,
    #[serde(rename = "tabId")]
    tab_id: Option<Value>,
    source: Option<String>,
    #[allow(dead_code)]
    timestamp: Option<u64>,
}

#[derive(Deserialize)]
struct DirectScreenshotRequest {
    data: String,
    filename: Option<String>,
}

#[derive(Deserialize, Default)]
struct AuditRequest {
    url: Option<String>,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/extension-log", post(ingest_extension_log))
        .route("/console-logs", get(get_console_logs))
        .route("/console-errors", get(get_console_errors))
        .route("/network-errors", get(get_network_errors))
        .route("/network-success", get(get_network_success))
        .route("/all-xhr", get(get_all_xhr))
        .route("/selected-element", post(post_selected_element).get(get_selected_element))
        .route("/.port", get(get_port))
        .route("/.identity", get(get_identity))
        .route("/wipelogs", post(wipe_logs))
        .route("/current-url", post(post_current_url).get(get_current_url))
        .route("/capture-screenshot", post(capture_screenshot))
        .route("/screenshot", post(save_screenshot))
        .route("/accessibility-audit", post(accessibility_audit))
        .route("/performance-audit", post(performance_audit))
        .route("/seo-audit", post(seo_audit))
        .route("/best-practices-audit", post(best_practices_audit))
        .route(EXTENSION_WS_PATH, get(extension_ws_upgrade))
        .layer(axum::extract::DefaultBodyLimit::max(50 * 1024 * 1024))
        .layer(cors)
        .with_state(state)
}

fn error_response(err: BridgeError) -> (StatusCode, Json<Value>) {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(json!({"error": err.to_string()})))
}

fn ok_or_error(result: Result<Value>) -> (StatusCode, Json<Value>) {
    match result {
        Ok(value) => (StatusCode::OK, Json(value)),
        Err(err) => error_response(err),
    }
}

async fn extension_ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let bridge = state.bridge.clone();
    ws.on_upgrade(move |socket| bridge.run_connection(socket))
}

async fn ingest_extension_log(
    State(state): State<AppState>,
    Json(req): Json<ExtensionLogRequest>,
) -> Json<Value> {
    if let Some(update) = req.settings {
        state.settings.write().await.merge(update);
    }
    state.logs.ingest(req.data).await;
    Json(json!({"status": "ok"}))
}

async fn get_console_logs(State(state): State<AppState>) -> Json<Vec<Value>> {
    Json(state.logs.query(LogKind::ConsoleLogs).await)
}

async fn get_console_errors(State(state): State<AppState>) -> Json<Vec<Value>> {
    Json(state.logs.query(LogKind::ConsoleErrors).await)
}

async fn get_network_errors(State(state): State<AppState>) -> Json<Vec<Value>> {
    Json(state.logs.query(LogKind::NetworkErrors).await)
}

async fn get_network_success(State(state): State<AppState>) -> Json<Vec<Value>> {
    Json(state.logs.query(LogKind::NetworkSuccess).await)
}

async fn get_all_xhr(State(state): State<AppState>) -> Json<Vec<Value>> {
    Json(state.logs.merged_network().await)
}

async fn post_selected_element(
    State(state): State<AppState>,
    Json(req): Json<SelectedElementRequest>,
) -> Json<Value> {
    state.logs.set_selected_element(req.data).await;
    Json(json!({"status": "ok"}))
}

async fn get_selected_element(State(state): State<AppState>) -> Json<Value> {
    match state.logs.selected_element().await {
        Some(element) => Json(element),
        None => Json(json!({"message": "No element selected"})),
    }
}

async fn get_port(State(state): State<AppState>) -> String {
    state.port.load(Ordering::SeqCst).to_string()
}

async fn get_identity(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "port": state.port.load(Ordering::SeqCst),
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "signature": IDENTITY_SIGNATURE,
    }))
}

async fn wipe_logs(State(state): State<AppState>) -> Json<Value> {
    state.logs.clear_all().await;
    Json(json!({"status": "ok", "message": "All logs cleared"}))
}

async fn post_current_url(
    State(state): State<AppState>,
    Json(req): Json<CurrentUrlRequest>,
) -> Json<Value> {
    let tab_id = req
        .tab_id
        .map(|v| v.to_string().trim_matches('"').to_owned());
    let old = state
        .logs
        .update_current_url(req.url.clone(), tab_id, req.source)
        .await;
    Json(json!({
        "status": "ok",
        "previousUrl": old,
        "url": req.url,
    }))
}

async fn get_current_url(State(state): State<AppState>) -> Json<Value> {
    // Ask a live extension to refresh the URL first; fall back to the
    // last value either channel stored.
    if let Ok(Some(url)) = state.bridge.request_current_url().await {
        return Json(json!({"url": url}));
    }
    Json(json!({"url": state.logs.current_url().await}))
}

async fn capture_screenshot(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match state.screenshots.capture().await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "path": outcome.saved_path,
                "autoPasted": outcome.auto_pasted,
            })),
        ),
        Err(err) => error_response(err),
    }
}

async fn save_screenshot(
    State(state): State<AppState>,
    Json(req): Json<DirectScreenshotRequest>,
) -> (StatusCode, Json<Value>) {
    match state.screenshots.save_direct(&req.data, req.filename).await {
        Ok(path) => (StatusCode::OK, Json(json!({"status": "ok", "path": path}))),
        Err(err) => error_response(err),
    }
}

async fn run_audit(state: &AppState, kind: AuditKind, req: AuditRequest) -> Result<Value> {
    state.audits.run_audit(kind, req.url).await
}

async fn accessibility_audit(
    State(state): State<AppState>,
    body: Option<Json<AuditRequest>>,
) -> (StatusCode, Json<Value>) {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    ok_or_error(run_audit(&state, AuditKind::Accessibility, req).await)
}

async fn performance_audit(
    State(state): State<AppState>,
    body: Option<Json<AuditRequest>>,
) -> (StatusCode, Json<Value>) {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    ok_or_error(run_audit(&state, AuditKind::Performance, req).await)
}

async fn seo_audit(
    State(state): State<AppState>,
    body: Option<Json<AuditRequest>>,
) -> (StatusCode, Json<Value>) {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    ok_or_error(run_audit(&state, AuditKind::Seo, req).await)
}

async fn best_practices_audit(
    State(state): State<AppState>,
    body: Option<Json<AuditRequest>>,
) -> (StatusCode, Json<Value>) {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    ok_or_error(run_audit(&state, AuditKind::BestPractices, req).await)
}
