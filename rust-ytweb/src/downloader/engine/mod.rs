//! Download engine abstraction.
//!
//! This module defines the `DownloadEngine` trait and the yt-dlp backed
//! implementation that supervises the external process.

mod binaries;
mod traits;
pub mod utils;
mod ytdlp;

pub use binaries::{BinaryInfo, DEFAULT_FFMPEG, DEFAULT_YT_DLP};
pub use traits::{
    DownloadEngine, DownloadHandle, DownloadRequest, ExecutionEvent, ExecutionOutcome,
};
pub use utils::{HeuristicStageDetector, StageDetector};
pub use ytdlp::{
    TOOL_UNAVAILABLE, YtDlpConfig, YtDlpEngine, default_cancel_grace, resolve_outcome,
};
