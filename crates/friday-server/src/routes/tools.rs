//! Capability listing.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use std::sync::Arc;

use crate::state::AppState;

pub async fn list_tools(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let bridge = match &state.bridge {
        Some(bridge) if bridge.is_connected().await => bridge,
        _ => {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"error": "Home Assistant is not connected"})),
            )
        }
    };

    let tools = bridge.registry().list().await;
    (
        StatusCode::OK,
        Json(json!({
            "count": tools.len(),
            "revision": bridge.registry().revision(),
            "tools": tools,
        })),
    )
}
