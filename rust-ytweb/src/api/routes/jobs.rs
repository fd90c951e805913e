//! Job submission and tracking routes.

use std::net::SocketAddr;

use axum::{
    Json, Router,
    extract::{ConnectInfo, Path, State, rejection::JsonRejection},
    routing::{get, post},
};
use tracing::info;

use crate::api::error::{ApiError, ApiResult};
use crate::api::models::{
    DownloadLinkResponse, OkResponse, SubmitDownloadRequest, SubmitDownloadResponse,
};
use crate::api::server::AppState;
use crate::domain::JobSnapshot;

/// Create the jobs router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/download", post(submit_download))
        .route("/api/jobs", get(list_jobs))
        .route("/api/jobs/{id}", get(get_job).delete(cancel_job))
        .route("/api/jobs/{id}/download", get(download_link))
}

/// Client identity: the peer address without port.
pub(crate) fn client_id(addr: &SocketAddr) -> String {
    addr.ip().to_canonical().to_string()
}

async fn submit_download(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    payload: Result<Json<SubmitDownloadRequest>, JsonRejection>,
) -> ApiResult<Json<SubmitDownloadResponse>> {
    let Json(body) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let request =
        body.into_job_request(client_id(&addr), state.config.parallel_fragments_default)?;
    let job = state.scheduler.submit(request).await?;
    info!(job_id = %job.id, client = %job.client_id, "Download submitted");

    Ok(Json(SubmitDownloadResponse { job_id: job.id }))
}

/// The caller's jobs, newest first.
async fn list_jobs(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> ApiResult<Json<Vec<JobSnapshot>>> {
    let jobs = state.scheduler.list_for_client(&client_id(&addr)).await?;
    Ok(Json(jobs))
}

async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobSnapshot>> {
    state
        .scheduler
        .get(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Not found"))
}

async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<OkResponse>> {
    state.scheduler.cancel(&id).await?;
    Ok(Json(OkResponse { ok: true }))
}

/// Mint a short-lived link for a completed job.
async fn download_link(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<DownloadLinkResponse>> {
    let grant = state
        .scheduler
        .issue_download_grant(&id)
        .await?
        .ok_or_else(|| ApiError::bad_request("Job not ready"))?;
    Ok(Json(DownloadLinkResponse { url: grant.url() }))
}
