//! Download engine trait and related types.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::domain::{DownloadOptions, Job, JobStage, Preset, ProgressSample};

/// Everything an engine needs to run one job.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    /// Job ID; also names the per-job output directory.
    pub job_id: String,
    /// Source URL.
    pub url: String,
    pub preset: Preset,
    pub options: DownloadOptions,
}

impl DownloadRequest {
    pub fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            url: job.url.clone(),
            preset: job.preset,
            options: job.options.clone(),
        }
    }
}

/// How an execution ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Exit status was success and the tool reported the final file.
    Completed { output_file: PathBuf },
    /// Anything else, with a human-readable reason.
    Failed { error: String },
    /// Stopped through the cancellation token.
    Canceled,
}

/// Events emitted by download engines, in the order they happened.
///
/// A started execution emits exactly one [`ExecutionEvent::Finished`], and it
/// is always the last event on the channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionEvent {
    /// A structured progress sample. Implies the downloading stage.
    Progress(ProgressSample),
    /// A stage inferred from auxiliary output.
    Stage(JobStage),
    /// A raw output line that was not a progress line.
    Log(String),
    /// Terminal event.
    Finished(ExecutionOutcome),
}

/// Handle to an active download.
pub struct DownloadHandle {
    pub request: DownloadRequest,
    /// Cancellation token.
    pub cancellation_token: CancellationToken,
    /// Event sender.
    pub event_tx: mpsc::Sender<ExecutionEvent>,
}

impl DownloadHandle {
    /// Create a new download handle.
    pub fn new(request: DownloadRequest, event_tx: mpsc::Sender<ExecutionEvent>) -> Self {
        Self {
            request,
            cancellation_token: CancellationToken::new(),
            event_tx,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.request.job_id
    }

    /// Cancel the download.
    pub fn cancel(&self) {
        self.cancellation_token.cancel();
    }

    /// Send an event, ignoring a closed receiver.
    pub async fn emit(&self, event: ExecutionEvent) {
        let _ = self.event_tx.send(event).await;
    }
}

/// Trait for download engines.
#[async_trait]
pub trait DownloadEngine: Send + Sync {
    /// Engine name for logs.
    fn name(&self) -> &'static str;

    /// Start a download.
    ///
    /// Returns once the work is running in the background. From then on the
    /// engine reports through the handle's event channel and finishes with a
    /// single [`ExecutionEvent::Finished`]. An `Err` means nothing was
    /// started and no event will follow.
    async fn start(&self, handle: Arc<DownloadHandle>) -> Result<()>;

    /// Check if the engine is available (e.g., binary exists).
    fn is_available(&self) -> bool;

    /// Get the engine version string.
    fn version(&self) -> Option<String>;
}
