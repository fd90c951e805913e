//! Download execution layer.
//!
//! Wraps the external download tool behind the [`DownloadEngine`] trait:
//! - builds the tool invocation for a job
//! - decodes structured progress and infers stages from log output
//! - reports one terminal outcome per execution
//! - stops the process gracefully on cancellation

pub mod engine;

pub use engine::{
    BinaryInfo, DownloadEngine, DownloadHandle, DownloadRequest, ExecutionEvent,
    ExecutionOutcome, StageDetector, YtDlpConfig, YtDlpEngine,
};
