//! Domain layer for rust-ytweb.
//!
//! This module contains the job entity, its state machine and the request
//! value objects.

pub mod job;
pub mod options;

pub use job::{
    CANCELED_BY_USER, INTERRUPTED_BY_RESTART, Job, JobRequest, JobSnapshot, JobStage, JobStatus,
    ProgressSample,
};
pub use options::{AudioFormat, DownloadOptions, Preset, SubtitleFormat, SubtitleOptions};
