//! API route modules.
//!
//! Organizes routes by resource type.

pub mod admin;
pub mod health;
pub mod jobs;
pub mod media;
pub mod ws;

use axum::Router;

use crate::api::server::AppState;

/// Create the main API router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(jobs::router())
        .merge(admin::router())
        .merge(media::router())
        .merge(ws::router())
        .with_state(state)
}
