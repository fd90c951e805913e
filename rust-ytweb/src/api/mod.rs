//! HTTP and WebSocket surface.
//!
//! Clients submit and follow jobs under `/api`, push progress over `/ws`
//! and redeem download grants under `/dl`.

pub mod error;
pub mod models;
pub mod routes;
pub mod server;

pub use server::{ApiServer, AppState};
