use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::AppState;

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

// GET /health/db
pub async fn health_db(State(state): State<AppState>) -> Response {
    match state.store.ping().await {
        Ok(()) => (StatusCode::OK, "store: ok".to_string()).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, format!("store error: {e}")).into_response(),
    }
}

// GET /monitor/status
pub async fn get_status(State(state): State<AppState>) -> Response {
    let status = state.monitor.status().await;
    (StatusCode::OK, Json(status)).into_response()
}

// POST /monitor/refresh
// For CRUD layers that write alerts directly to the store.
pub async fn post_refresh(State(state): State<AppState>) -> Response {
    state.monitor.on_alerts_changed().await;
    let symbols: Vec<String> = state.monitor.watched_symbols().await.into_iter().collect();
    (StatusCode::OK, Json(json!({ "status": "success", "watched_symbols": symbols }))).into_response()
}

// POST /monitor/sweep
pub async fn post_sweep(State(state): State<AppState>) -> Response {
    let report = state.monitor.sweep_now().await;
    (StatusCode::OK, Json(report)).into_response()
}
