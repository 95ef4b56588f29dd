use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;
use crate::models::HealthResponse;
use crate::AppState;
use tracing::debug;

/// Health check endpoint
pub async fn health_check() -> Json<HealthResponse> {
    debug!("Health check requested");
    Json(HealthResponse {
        status: "ok".to_string(),
        message: "Server is running".to_string(),
    })
}

/// Readiness check endpoint
pub async fn ready_check(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    debug!("Readiness check requested");
    let stats = state.registry.stats().await;
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".to_string(),
            message: format!("Service is ready ({} rooms, {} connections)", stats.rooms, stats.connections),
        }),
    )
}
