//! Health check route.

use axum::{Json, Router, extract::State, routing::get};

use crate::api::models::HealthResponse;
use crate::api::server::AppState;

/// Create the health router.
pub fn router() -> Router<AppState> {
    Router::new().route("/api/health", get(health_check))
}

/// Liveness plus the detected tool versions.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        yt_dlp_version: state.binaries.yt_dlp_version.clone(),
        ffmpeg: state.binaries.ffmpeg_available(),
    })
}
