//! Connection diagnostics API

use super::ServerState;
use crate::utils::error::AppResult;
use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};
use std::sync::Arc;

/// `GET /api/connections`
pub async fn list_connections(State(state): State<Arc<ServerState>>) -> Json<Value> {
    let connections = state.registry.connections();
    let count = connections.len();
    Json(json!({
        "connections": connections,
        "count": count,
    }))
}

/// `POST /api/connections/:webrtc_id/input-data`
pub async fn set_input_data(
    State(state): State<Arc<ServerState>>,
    Path(webrtc_id): Path<String>,
    Json(data): Json<Value>,
) -> AppResult<Json<Value>> {
    let handler = state.registry.get(&webrtc_id)?;
    handler.set_input(data.clone());
    tracing::info!("[conn {}] Test input set over HTTP", webrtc_id);
    Ok(Json(json!({
        "status": "success",
        "webrtc_id": webrtc_id,
        "message": "Input data updated",
        "data": data,
    })))
}

/// `GET /api/connections/:webrtc_id/input-data`
pub async fn get_input_data(
    State(state): State<Arc<ServerState>>,
    Path(webrtc_id): Path<String>,
) -> AppResult<Json<Value>> {
    let handler = state.registry.get(&webrtc_id)?;
    Ok(Json(json!({
        "status": "success",
        "webrtc_id": webrtc_id,
        "data": handler.get_input_data(),
    })))
}
