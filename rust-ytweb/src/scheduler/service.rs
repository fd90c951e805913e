//! Public handle to the job scheduler.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::actor::{ActorParts, SchedulerActor};
use super::messages::{SchedulerMessage, SchedulerStats};
use crate::domain::{Job, JobRequest, JobSnapshot};
use crate::downloader::DownloadEngine;
use crate::grant::{DownloadGrant, GrantService};
use crate::notification::ProgressSink;
use crate::store::{JobStore, spawn_snapshot_writer};
use crate::{Error, Result};

/// Default mailbox capacity for the scheduler actor.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 256;

/// Scheduler limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Maximum number of running jobs.
    pub max_concurrency: usize,
    /// Maximum number of queued or running jobs per client.
    pub per_client_limit: usize,
    /// Lines of tool output kept per job.
    pub log_tail_lines: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 3,
            per_client_limit: 3,
            log_tail_lines: 50,
        }
    }
}

/// Cloneable handle to the scheduler actor.
///
/// The actor stops when the last handle is dropped or when
/// [`JobScheduler::shutdown`] is called.
#[derive(Clone)]
pub struct JobScheduler {
    sender: mpsc::Sender<SchedulerMessage>,
    cancellation_token: CancellationToken,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
    config: SchedulerConfig,
}

impl JobScheduler {
    /// Restore persisted jobs, reconcile interrupted ones and start the actor.
    pub async fn start(
        config: SchedulerConfig,
        engine: Arc<dyn DownloadEngine>,
        sink: Arc<dyn ProgressSink>,
        grants: Arc<GrantService>,
        store: Arc<JobStore>,
    ) -> Self {
        let config = SchedulerConfig {
            max_concurrency: config.max_concurrency.max(1),
            per_client_limit: config.per_client_limit.max(1),
            log_tail_lines: config.log_tail_lines.max(1),
        };

        let mut jobs = store.restore().await;
        let interrupted = JobStore::reconcile(&mut jobs);
        if interrupted > 0 {
            warn!(count = interrupted, "Marked interrupted jobs as failed");
        }
        if let Err(e) = store.snapshot(jobs.clone()).await {
            warn!(path = %store.path().display(), "Failed to write reconciled job snapshot: {}", e);
        }

        let (persistence, writer_task) = spawn_snapshot_writer(store);
        let (sender, mailbox) = mpsc::channel(DEFAULT_MAILBOX_CAPACITY);
        let cancellation_token = CancellationToken::new();

        let actor = SchedulerActor::new(
            ActorParts {
                config,
                engine,
                sink,
                grants,
                persistence,
                writer_task,
            },
            jobs,
            mailbox,
            sender.downgrade(),
            cancellation_token.clone(),
        );
        let task = tokio::spawn(actor.run());

        Self {
            sender,
            cancellation_token,
            task: Arc::new(Mutex::new(Some(task))),
            config,
        }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> SchedulerMessage,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(make(tx))
            .await
            .map_err(|_| Error::SchedulerStopped)?;
        rx.await.map_err(|_| Error::SchedulerStopped)
    }

    /// Admit a request.
    ///
    /// Fails with an admission error when the client is over its limit.
    /// Returns an existing completed job when an identical request already
    /// produced a file that is still on disk.
    pub async fn submit(&self, request: JobRequest) -> Result<Job> {
        self.request(|reply| SchedulerMessage::Submit { request, reply })
            .await?
    }

    /// Cancel a job. For a running job this resolves after the process is gone.
    ///
    /// Unknown and finished jobs are acknowledged without any change.
    pub async fn cancel(&self, job_id: &str) -> Result<()> {
        let job_id = job_id.to_string();
        self.request(|reply| SchedulerMessage::Cancel { job_id, reply })
            .await?
    }

    pub async fn get(&self, job_id: &str) -> Result<Option<JobSnapshot>> {
        let job_id = job_id.to_string();
        self.request(|reply| SchedulerMessage::Get { job_id, reply })
            .await
    }

    /// A client's jobs, newest first.
    pub async fn list_for_client(&self, client_id: &str) -> Result<Vec<JobSnapshot>> {
        let client_id = client_id.to_string();
        self.request(|reply| SchedulerMessage::ListForClient { client_id, reply })
            .await
    }

    /// Mint a grant for a completed job. `None` if the job has no output.
    pub async fn issue_download_grant(&self, job_id: &str) -> Result<Option<DownloadGrant>> {
        let job_id = job_id.to_string();
        self.request(|reply| SchedulerMessage::IssueGrant { job_id, reply })
            .await
    }

    pub async fn stats(&self) -> Result<SchedulerStats> {
        self.request(SchedulerMessage::GetStats).await
    }

    /// Stop the actor: running downloads are stopped and a final snapshot
    /// is written before this returns.
    pub async fn shutdown(&self) {
        self.cancellation_token.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Scheduler task failed: {}", e);
            }
            info!("Job scheduler shut down");
        }
    }
}

impl std::fmt::Debug for JobScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobScheduler")
            .field("config", &self.config)
            .field("stopped", &self.cancellation_token.is_cancelled())
            .finish()
    }
}
