//! Grant redemption: streams a completed job's file.

use axum::Router;
use axum::extract::{Path, Query, Request, State};
use axum::http::{HeaderValue, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde::Deserialize;
use tower_http::services::ServeFile;
use tracing::debug;

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::utils::filename::content_disposition;

#[derive(Debug, Deserialize)]
pub struct GrantQuery {
    pub token: Option<String>,
}

/// Create the media router.
pub fn router() -> Router<AppState> {
    Router::new().route("/dl/{id}", get(redeem_grant))
}

async fn redeem_grant(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<GrantQuery>,
    req: Request,
) -> ApiResult<Response> {
    let path = state
        .scheduler
        .get(&id)
        .await?
        .and_then(|job| job.output_file)
        .ok_or_else(|| ApiError::not_found("Not found"))?;

    let token = query.token.unwrap_or_default();
    if let Err(e) = state.grants.verify(&token, &id, &path) {
        debug!(job_id = %id, "Rejected download token: {}", e);
        return Err(ApiError::unauthorized("Invalid or expired token"));
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut response = match ServeFile::new(&path).try_call(req).await {
        Ok(response) => response.into_response(),
        Err(e) => return Err(ApiError::internal(format!("Failed to serve file: {}", e))),
    };

    if response.status().is_success() {
        let disposition = HeaderValue::from_str(&content_disposition(&file_name))
            .map_err(|e| ApiError::internal(format!("Invalid header value: {e}")))?;
        response
            .headers_mut()
            .insert(header::CONTENT_DISPOSITION, disposition);
    } else if response.status() == axum::http::StatusCode::NOT_FOUND {
        return Err(ApiError::not_found("Not found"));
    }

    Ok(response)
}
