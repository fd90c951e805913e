//! Mailbox messages for the scheduler actor.

use serde::Serialize;
use tokio::sync::oneshot;

use crate::Result;
use crate::domain::{Job, JobRequest, JobSnapshot};
use crate::downloader::ExecutionEvent;
use crate::grant::DownloadGrant;

/// Messages handled by the scheduler actor.
#[derive(Debug)]
pub enum SchedulerMessage {
    /// Admit a new request.
    Submit {
        request: JobRequest,
        reply: oneshot::Sender<Result<Job>>,
    },
    /// Cancel a job. The reply for a running job is sent once its process is gone.
    Cancel {
        job_id: String,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Look up one job.
    Get {
        job_id: String,
        reply: oneshot::Sender<Option<JobSnapshot>>,
    },
    /// List a client's jobs, newest first.
    ListForClient {
        client_id: String,
        reply: oneshot::Sender<Vec<JobSnapshot>>,
    },
    /// Mint a download grant for a completed job.
    IssueGrant {
        job_id: String,
        reply: oneshot::Sender<Option<DownloadGrant>>,
    },
    /// Query counters.
    GetStats(oneshot::Sender<SchedulerStats>),
    /// Event relayed from a running execution.
    Execution {
        job_id: String,
        event: ExecutionEvent,
    },
}

/// Point-in-time scheduler counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStats {
    pub total: usize,
    pub queued: usize,
    pub running: usize,
    pub max_concurrency: usize,
}
