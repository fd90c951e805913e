//! rust-ytweb library crate.
//!
//! A self-hosted download service: clients submit media URLs, a bounded
//! scheduler runs `yt-dlp` for them, progress is pushed over WebSocket and
//! finished files are handed out through signed, expiring links.

pub mod api;
pub mod config;
pub mod domain;
pub mod downloader;
pub mod error;
pub mod grant;
pub mod logging;
pub mod notification;
pub mod panic_hook;
pub mod scheduler;
pub mod store;
pub mod utils;

pub use error::{Error, Result};
