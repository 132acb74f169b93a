//! Health endpoints.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub monitor_running: bool,
}

/// Liveness endpoint
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        monitor_running: state.monitor.is_running(),
    })
}

/// Latest monitor report; 503 while pending or when a critical check fails
pub async fn health_report(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.monitor.latest() {
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "pending",
                "message": "First health check has not finished"
            })),
        ),
        Some(report) => {
            let code = if report.is_healthy() {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            (code, Json(json!(report)))
        }
    }
}
