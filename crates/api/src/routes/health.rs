//! Health check endpoints

use axum::{extract::State, Json};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Serialize)]
pub struct RealtimeHealthResponse {
    pub active_connections: usize,
    pub active_tenants: usize,
    pub bridge: String,
}

/// Health check endpoint
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Realtime delivery stats
///
/// Always 200: a stopped bridge degrades realtime delivery but the server
/// still accepts connections.
pub async fn realtime(State(state): State<AppState>) -> Json<RealtimeHealthResponse> {
    let stats = state.registry.get_stats().await;

    Json(RealtimeHealthResponse {
        active_connections: stats.active_connections,
        active_tenants: stats.active_tenants,
        bridge: state.bridge_status.get().to_string(),
    })
}
