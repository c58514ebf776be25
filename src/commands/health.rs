//! Health Check Commands

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

use crate::models::response::{ApiResponse, HealthResponse};
use crate::state::AppState;

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/api/agent/health", get(get_health))
}

/// Service status with connected client and running Work counts
pub async fn get_health(State(state): State<AppState>) -> Json<ApiResponse<HealthResponse>> {
    let health = HealthResponse {
        connected_clients: state.controller.connected_clients(),
        running_works: state.controller.running_works(),
        ..HealthResponse::default()
    };
    Json(ApiResponse::ok("ok", health))
}
