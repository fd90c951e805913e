//! Operator settings, reachable from the local machine only.

use std::net::SocketAddr;

use axum::{
    Json, Router,
    extract::{ConnectInfo, State},
    routing::get,
};
use tracing::warn;

use crate::api::error::{ApiError, ApiResult};
use crate::api::models::{AdminSettingsResponse, LogFilterResponse, UpdateLogFilterRequest};
use crate::api::server::AppState;
use crate::utils::fs;

/// Create the admin router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/admin/settings", get(get_settings))
        .route(
            "/api/admin/logging",
            get(get_log_filter).put(update_log_filter),
        )
}

fn require_local(addr: &SocketAddr) -> ApiResult<()> {
    if addr.ip().to_canonical().is_loopback() {
        Ok(())
    } else {
        Err(ApiError::forbidden("Local access only"))
    }
}

async fn get_settings(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> ApiResult<Json<AdminSettingsResponse>> {
    require_local(&addr)?;

    let config = &state.config;
    let disk_usage = match fs::dir_size(&config.data_dir).await {
        Ok(size) => size,
        Err(e) => {
            warn!("Failed to measure data directory: {}", e);
            0
        }
    };
    let stats = state.scheduler.stats().await?;

    Ok(Json(AdminSettingsResponse {
        max_concurrency: stats.max_concurrency,
        per_client_limit: config.per_client_limit,
        parallel_fragments_default: config.parallel_fragments_default,
        downloads_dir: config.downloads_dir().display().to_string(),
        disk_usage,
        queued: stats.queued,
        running: stats.running,
        binaries: state.binaries.as_ref().clone(),
    }))
}

async fn get_log_filter(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> ApiResult<Json<LogFilterResponse>> {
    require_local(&addr)?;
    Ok(Json(LogFilterResponse {
        filter: state.logging.get_filter(),
    }))
}

/// Swap the active log filter without a restart.
async fn update_log_filter(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(request): Json<UpdateLogFilterRequest>,
) -> ApiResult<Json<LogFilterResponse>> {
    require_local(&addr)?;
    state.logging.set_filter(request.filter.trim())?;
    Ok(Json(LogFilterResponse {
        filter: state.logging.get_filter(),
    }))
}
