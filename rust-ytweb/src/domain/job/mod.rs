//! Download job entity.

mod state;

pub use state::{JobStage, JobStatus};

use std::collections::VecDeque;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::options::{DownloadOptions, Preset};
use crate::Result;

/// Error recorded on jobs canceled by a client.
pub const CANCELED_BY_USER: &str = "Canceled by user";

/// Error recorded on jobs that were still active when the process stopped.
pub const INTERRUPTED_BY_RESTART: &str = "Interrupted by server restart";

/// A request to download one URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    pub url: String,
    pub preset: Preset,
    pub options: DownloadOptions,
    /// Submitting client identity (peer IP).
    pub client_id: String,
}

/// One decoded progress line from the external tool.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressSample {
    pub downloaded_bytes: u64,
    pub total_bytes: Option<u64>,
    /// Percentage in `[0, 100]`.
    pub percent: f64,
    pub eta: Option<String>,
    pub speed: Option<String>,
}

/// A tracked download job.
///
/// The serde form is the persisted record: it carries the client identity but
/// not the rolling log, which only lives in memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub url: String,
    pub preset: Preset,
    pub options: DownloadOptions,
    pub client_id: String,
    pub status: JobStatus,
    pub stage: JobStage,
    pub progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downloaded_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    pub log_tail: VecDeque<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a queued job from a request.
    pub fn new(id: impl Into<String>, request: JobRequest) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            url: request.url,
            preset: request.preset,
            options: request.options,
            client_id: request.client_id,
            status: JobStatus::Queued,
            stage: JobStage::Queued,
            progress: 0.0,
            downloaded_bytes: None,
            total_bytes: None,
            speed: None,
            eta: None,
            output_file: None,
            error: None,
            log_tail: VecDeque::new(),
            created_at: now,
            updated_at: now,
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    fn transition(&mut self, target: JobStatus) -> Result<()> {
        self.status = self.status.transition_to(target)?;
        self.touch();
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether this job answers the same request as `request`.
    pub fn matches_request(&self, request: &JobRequest) -> bool {
        self.client_id == request.client_id
            && self.url == request.url
            && self.preset == request.preset
            && self.options.is_equivalent(&request.options)
    }

    /// Move a queued job into the running state.
    pub fn mark_running(&mut self) -> Result<()> {
        self.transition(JobStatus::Running)?;
        self.stage = JobStage::Downloading;
        Ok(())
    }

    /// Record a progress sample. Percentage never moves backwards while running.
    pub fn apply_progress(&mut self, sample: &ProgressSample) {
        self.stage = JobStage::Downloading;
        self.progress = self.progress.max(sample.percent.clamp(0.0, 100.0));
        self.downloaded_bytes = Some(sample.downloaded_bytes);
        self.total_bytes = sample.total_bytes;
        self.speed = sample.speed.clone();
        self.eta = sample.eta.clone();
        self.touch();
    }

    pub fn set_stage(&mut self, stage: JobStage) {
        self.stage = stage;
        self.touch();
    }

    /// Append a raw output line, evicting the oldest beyond `cap`.
    pub fn push_log(&mut self, line: &str, cap: usize) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        self.log_tail.push_back(line.to_string());
        while self.log_tail.len() > cap {
            self.log_tail.pop_front();
        }
    }

    pub fn complete(&mut self, output_file: PathBuf) -> Result<()> {
        self.transition(JobStatus::Completed)?;
        self.stage = JobStage::Completed;
        self.progress = 100.0;
        self.output_file = Some(output_file);
        self.error = None;
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>) -> Result<()> {
        self.transition(JobStatus::Failed)?;
        self.stage = JobStage::Failed;
        self.error = Some(error.into());
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<()> {
        self.transition(JobStatus::Canceled)?;
        self.stage = JobStage::Failed;
        self.error = Some(CANCELED_BY_USER.to_string());
        Ok(())
    }

    /// Build the value published to subscribers.
    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id.clone(),
            url: self.url.clone(),
            preset: self.preset,
            options: self.options.clone(),
            status: self.status,
            stage: self.stage,
            progress: self.progress,
            downloaded_bytes: self.downloaded_bytes,
            total_bytes: self.total_bytes,
            speed: self.speed.clone(),
            eta: self.eta.clone(),
            output_file: self.output_file.clone(),
            error: self.error.clone(),
            logfile: self.log_tail.iter().cloned().collect(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Client-facing view of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub id: String,
    pub url: String,
    pub preset: Preset,
    pub options: DownloadOptions,
    pub status: JobStatus,
    pub stage: JobStage,
    pub progress: f64,
    pub downloaded_bytes: Option<u64>,
    pub total_bytes: Option<u64>,
    pub speed: Option<String>,
    pub eta: Option<String>,
    pub output_file: Option<PathBuf>,
    pub error: Option<String>,
    pub logfile: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
