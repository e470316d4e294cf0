//! API routes

pub mod health;

use axum::{routing::get, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{state::AppState, websocket::ws_handler};

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    // Health check routes (at root level for infrastructure monitoring)
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/realtime", get(health::realtime));

    // WebSocket route (auth handled in handler via query parameter or header)
    let websocket_routes = Router::new().route("/ws", get(ws_handler));

    Router::new()
        .merge(health_routes)
        .merge(websocket_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
