//! The scheduler actor.
//!
//! A single task owns the job table, the FIFO wait queue and the running
//! set. Everything else talks to it through the mailbox, so job state has
//! exactly one writer.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::messages::{SchedulerMessage, SchedulerStats};
use super::service::SchedulerConfig;
use crate::domain::{Job, JobRequest, JobSnapshot, JobStatus};
use crate::downloader::{
    DownloadEngine, DownloadHandle, DownloadRequest, ExecutionEvent, ExecutionOutcome,
};
use crate::error::AdmissionError;
use crate::grant::GrantService;
use crate::notification::ProgressSink;
use crate::store::SnapshotHandle;
use crate::utils::fs::is_file;
use crate::{Error, Result};

/// Capacity of each execution's event channel.
const EXECUTION_EVENT_CAPACITY: usize = 64;

/// How long shutdown waits for running executions to report.
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Bookkeeping for a job whose process is alive.
struct RunningJob {
    handle: Arc<DownloadHandle>,
    cancel_requested: bool,
    /// Callers waiting for the cancellation to finish.
    cancel_waiters: Vec<oneshot::Sender<Result<()>>>,
}

/// Collaborators handed to the actor.
pub(crate) struct ActorParts {
    pub config: SchedulerConfig,
    pub engine: Arc<dyn DownloadEngine>,
    pub sink: Arc<dyn ProgressSink>,
    pub grants: Arc<GrantService>,
    pub persistence: SnapshotHandle,
    pub writer_task: JoinHandle<()>,
}

pub(crate) struct SchedulerActor {
    config: SchedulerConfig,
    engine: Arc<dyn DownloadEngine>,
    sink: Arc<dyn ProgressSink>,
    grants: Arc<GrantService>,
    /// Job table.
    jobs: HashMap<String, Job>,
    /// Job ids in insertion order.
    order: Vec<String>,
    /// FIFO of job ids waiting for a slot.
    queue: VecDeque<String>,
    running: HashMap<String, RunningJob>,
    mailbox: mpsc::Receiver<SchedulerMessage>,
    /// Used by execution forwarders; does not keep the mailbox open.
    self_tx: mpsc::WeakSender<SchedulerMessage>,
    persistence: SnapshotHandle,
    writer_task: JoinHandle<()>,
    cancellation_token: CancellationToken,
}

impl SchedulerActor {
    pub(crate) fn new(
        parts: ActorParts,
        restored: Vec<Job>,
        mailbox: mpsc::Receiver<SchedulerMessage>,
        self_tx: mpsc::WeakSender<SchedulerMessage>,
        cancellation_token: CancellationToken,
    ) -> Self {
        let order = restored.iter().map(|job| job.id.clone()).collect();
        let jobs = restored
            .into_iter()
            .map(|job| (job.id.clone(), job))
            .collect();

        Self {
            config: parts.config,
            engine: parts.engine,
            sink: parts.sink,
            grants: parts.grants,
            jobs,
            order,
            queue: VecDeque::new(),
            running: HashMap::new(),
            mailbox,
            self_tx,
            persistence: parts.persistence,
            writer_task: parts.writer_task,
            cancellation_token,
        }
    }

    /// Run until every handle is dropped or the token is cancelled.
    pub(crate) async fn run(mut self) {
        info!(
            max_concurrency = self.config.max_concurrency,
            per_client_limit = self.config.per_client_limit,
            jobs = self.jobs.len(),
            "Job scheduler started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.cancellation_token.cancelled() => {
                    debug!("Job scheduler cancelled");
                    break;
                }

                msg = self.mailbox.recv() => match msg {
                    Some(msg) => self.handle_message(msg).await,
                    None => {
                        debug!("All scheduler handles dropped");
                        break;
                    }
                },
            }
        }

        self.shutdown().await;
    }

    async fn handle_message(&mut self, msg: SchedulerMessage) {
        match msg {
            SchedulerMessage::Submit { request, reply } => {
                let result = self.handle_submit(request).await;
                let _ = reply.send(result);
            }
            SchedulerMessage::Cancel { job_id, reply } => self.handle_cancel(job_id, reply),
            SchedulerMessage::Get { job_id, reply } => {
                let _ = reply.send(self.jobs.get(&job_id).map(Job::snapshot));
            }
            SchedulerMessage::ListForClient { client_id, reply } => {
                let _ = reply.send(self.list_for_client(&client_id));
            }
            SchedulerMessage::IssueGrant { job_id, reply } => {
                let _ = reply.send(self.issue_grant(&job_id));
            }
            SchedulerMessage::GetStats(reply) => {
                let _ = reply.send(self.stats());
            }
            SchedulerMessage::Execution { job_id, event } => self.handle_execution(job_id, event),
        }
    }

    async fn handle_submit(&mut self, request: JobRequest) -> Result<Job> {
        let active = self
            .jobs
            .values()
            .filter(|job| job.client_id == request.client_id && job.status.is_active())
            .count();
        if active >= self.config.per_client_limit {
            warn!(
                client_id = %request.client_id,
                active,
                "Rejecting submission over per-client limit"
            );
            return Err(AdmissionError::QuotaExceeded {
                client_id: request.client_id,
                limit: self.config.per_client_limit,
            }
            .into());
        }

        if let Some(existing) = self.find_reusable(&request).await {
            info!(job_id = %existing.id, client_id = %request.client_id, "Reusing completed job");
            return Ok(existing);
        }

        let job = Job::new(uuid::Uuid::new_v4().to_string(), request);
        let job_id = job.id.clone();
        info!(
            job_id = %job_id,
            client_id = %job.client_id,
            preset = %job.preset,
            url = %job.url,
            "Job queued"
        );

        self.order.push(job_id.clone());
        self.jobs.insert(job_id.clone(), job);
        self.queue.push_back(job_id.clone());
        self.persist();
        self.publish(&job_id);
        self.dispatch();

        self.jobs
            .get(&job_id)
            .cloned()
            .ok_or_else(|| Error::not_found("Job", job_id))
    }

    /// Newest completed job answering the same request whose file still exists.
    async fn find_reusable(&self, request: &JobRequest) -> Option<Job> {
        for job_id in self.order.iter().rev() {
            let Some(job) = self.jobs.get(job_id) else {
                continue;
            };
            if job.status != JobStatus::Completed || !job.matches_request(request) {
                continue;
            }
            if let Some(path) = &job.output_file
                && is_file(path).await
            {
                return Some(job.clone());
            }
        }
        None
    }

    /// Start queued jobs while slots are free. The only place the running
    /// set grows.
    fn dispatch(&mut self) {
        while self.running.len() < self.config.max_concurrency {
            let Some(job_id) = self.queue.pop_front() else {
                break;
            };
            if !self.start_job(job_id) {
                break;
            }
        }
    }

    /// Returns `false` if nothing more can be started right now.
    fn start_job(&mut self, job_id: String) -> bool {
        let Some(job) = self.jobs.get_mut(&job_id) else {
            return true;
        };
        if job.status != JobStatus::Queued {
            // Canceled while waiting.
            return true;
        }
        let Some(mailbox) = self.self_tx.upgrade() else {
            // Shutting down; leave it queued.
            self.queue.push_front(job_id);
            return false;
        };

        if let Err(e) = job.mark_running() {
            error!(job_id = %job_id, "Cannot start job: {}", e);
            return true;
        }

        let (event_tx, mut event_rx) = mpsc::channel(EXECUTION_EVENT_CAPACITY);
        let handle = Arc::new(DownloadHandle::new(DownloadRequest::from_job(job), event_tx));
        self.running.insert(
            job_id.clone(),
            RunningJob {
                handle: handle.clone(),
                cancel_requested: false,
                cancel_waiters: Vec::new(),
            },
        );
        info!(job_id = %job_id, engine = self.engine.name(), "Job started");
        self.persist();
        self.publish(&job_id);

        // Forward engine events into the mailbox in emission order.
        let forward_id = job_id.clone();
        let weak = mailbox.downgrade();
        drop(mailbox);
        tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                let terminal = matches!(event, ExecutionEvent::Finished(_));
                let Some(mailbox) = weak.upgrade() else {
                    break;
                };
                let msg = SchedulerMessage::Execution {
                    job_id: forward_id.clone(),
                    event,
                };
                if mailbox.send(msg).await.is_err() || terminal {
                    break;
                }
            }
        });

        let engine = self.engine.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.start(handle.clone()).await {
                error!(job_id = %handle.job_id(), "Engine start error: {}", e);
                handle
                    .emit(ExecutionEvent::Finished(ExecutionOutcome::Failed {
                        error: e.to_string(),
                    }))
                    .await;
            }
        });

        true
    }

    fn handle_cancel(&mut self, job_id: String, reply: oneshot::Sender<Result<()>>) {
        let Some(job) = self.jobs.get_mut(&job_id) else {
            debug!(job_id = %job_id, "Cancel for unknown job ignored");
            let _ = reply.send(Ok(()));
            return;
        };

        match job.status {
            JobStatus::Queued => {
                self.queue.retain(|id| id != &job_id);
                if let Err(e) = job.cancel() {
                    error!(job_id = %job_id, "Failed to cancel queued job: {}", e);
                }
                info!(job_id = %job_id, "Queued job canceled");
                self.persist();
                self.publish(&job_id);
                let _ = reply.send(Ok(()));
                self.dispatch();
            }
            JobStatus::Running => match self.running.get_mut(&job_id) {
                Some(running) => {
                    if !running.cancel_requested {
                        info!(job_id = %job_id, "Stopping running job");
                        running.cancel_requested = true;
                        running.handle.cancel();
                    }
                    running.cancel_waiters.push(reply);
                }
                None => {
                    warn!(job_id = %job_id, "Running job has no execution, canceling directly");
                    if let Err(e) = job.cancel() {
                        error!(job_id = %job_id, "Failed to cancel job: {}", e);
                    }
                    self.persist();
                    self.publish(&job_id);
                    let _ = reply.send(Ok(()));
                    self.dispatch();
                }
            },
            // Terminal jobs stay as they are.
            _ => {
                let _ = reply.send(Ok(()));
            }
        }
    }

    fn handle_execution(&mut self, job_id: String, event: ExecutionEvent) {
        if !self.running.contains_key(&job_id) {
            debug!(job_id = %job_id, ?event, "Ignoring event for job that is not running");
            return;
        }
        let Some(job) = self.jobs.get_mut(&job_id) else {
            return;
        };

        match event {
            ExecutionEvent::Progress(sample) => {
                job.apply_progress(&sample);
                self.persist();
                self.publish(&job_id);
            }
            ExecutionEvent::Stage(stage) => {
                if job.stage != stage {
                    debug!(job_id = %job_id, stage = %stage, "Stage changed");
                    job.set_stage(stage);
                    self.persist();
                    self.publish(&job_id);
                }
            }
            ExecutionEvent::Log(line) => {
                job.push_log(&line, self.config.log_tail_lines);
                self.publish(&job_id);
            }
            ExecutionEvent::Finished(outcome) => self.finish_job(job_id, outcome),
        }
    }

    fn finish_job(&mut self, job_id: String, outcome: ExecutionOutcome) {
        let Some(running) = self.running.remove(&job_id) else {
            return;
        };
        let Some(job) = self.jobs.get_mut(&job_id) else {
            return;
        };

        // A requested cancel wins over whatever the process reported.
        let result = match outcome {
            _ if running.cancel_requested => job.cancel(),
            ExecutionOutcome::Completed { output_file } => job.complete(output_file),
            ExecutionOutcome::Failed { error } => job.fail(error),
            ExecutionOutcome::Canceled => job.cancel(),
        };
        match result {
            Ok(()) => info!(
                job_id = %job_id,
                status = %job.status,
                error = job.error.as_deref().unwrap_or(""),
                "Job finished"
            ),
            Err(e) => error!(job_id = %job_id, "Failed to record job outcome: {}", e),
        }

        for waiter in running.cancel_waiters {
            let _ = waiter.send(Ok(()));
        }
        self.persist();
        self.publish(&job_id);
        self.dispatch();
    }

    fn list_for_client(&self, client_id: &str) -> Vec<JobSnapshot> {
        let mut jobs: Vec<&Job> = self
            .order
            .iter()
            .rev()
            .filter_map(|id| self.jobs.get(id))
            .filter(|job| job.client_id == client_id)
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs.into_iter().map(Job::snapshot).collect()
    }

    fn issue_grant(&self, job_id: &str) -> Option<crate::grant::DownloadGrant> {
        let job = self.jobs.get(job_id)?;
        if job.status != JobStatus::Completed {
            return None;
        }
        let path = job.output_file.as_ref()?;
        Some(self.grants.mint(job_id, path))
    }

    fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            total: self.jobs.len(),
            queued: self.queue.len(),
            running: self.running.len(),
            max_concurrency: self.config.max_concurrency,
        }
    }

    fn ordered_jobs(&self) -> Vec<Job> {
        self.order
            .iter()
            .filter_map(|id| self.jobs.get(id))
            .cloned()
            .collect()
    }

    fn persist(&self) {
        self.persistence.request(self.ordered_jobs());
    }

    fn publish(&self, job_id: &str) {
        if let Some(job) = self.jobs.get(job_id) {
            self.sink.publish(&job.snapshot());
        }
    }

    /// Answer a message that arrives while shutting down.
    fn reject(&self, msg: SchedulerMessage) {
        match msg {
            SchedulerMessage::Submit { reply, .. } => {
                let _ = reply.send(Err(Error::SchedulerStopped));
            }
            SchedulerMessage::Cancel { reply, .. } => {
                let _ = reply.send(Err(Error::SchedulerStopped));
            }
            SchedulerMessage::Get { job_id, reply } => {
                let _ = reply.send(self.jobs.get(&job_id).map(Job::snapshot));
            }
            SchedulerMessage::ListForClient { client_id, reply } => {
                let _ = reply.send(self.list_for_client(&client_id));
            }
            SchedulerMessage::IssueGrant { job_id, reply } => {
                let _ = reply.send(self.issue_grant(&job_id));
            }
            SchedulerMessage::GetStats(reply) => {
                let _ = reply.send(self.stats());
            }
            SchedulerMessage::Execution { .. } => {}
        }
    }

    /// Record how a job ended during shutdown.
    ///
    /// Only completions and user cancels are recorded; anything else stays
    /// running in the final snapshot and is reconciled on the next start.
    fn settle_on_shutdown(&mut self, job_id: String, outcome: ExecutionOutcome) {
        let Some(running) = self.running.remove(&job_id) else {
            return;
        };
        let Some(job) = self.jobs.get_mut(&job_id) else {
            return;
        };
        let result = match outcome {
            _ if running.cancel_requested => job.cancel(),
            ExecutionOutcome::Completed { output_file } => job.complete(output_file),
            _ => Ok(()),
        };
        if let Err(e) = result {
            error!(job_id = %job_id, "Failed to record job outcome: {}", e);
        }
        for waiter in running.cancel_waiters {
            let _ = waiter.send(Ok(()));
        }
        self.publish(&job_id);
    }

    async fn shutdown(mut self) {
        info!(
            running = self.running.len(),
            queued = self.queue.len(),
            "Job scheduler shutting down"
        );

        for running in self.running.values() {
            running.handle.cancel();
        }

        let deadline = tokio::time::Instant::now() + SHUTDOWN_DRAIN_TIMEOUT;
        while !self.running.is_empty() {
            match tokio::time::timeout_at(deadline, self.mailbox.recv()).await {
                Ok(Some(SchedulerMessage::Execution {
                    job_id,
                    event: ExecutionEvent::Finished(outcome),
                })) => self.settle_on_shutdown(job_id, outcome),
                Ok(Some(msg)) => self.reject(msg),
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        remaining = self.running.len(),
                        "Timed out waiting for downloads to stop"
                    );
                    break;
                }
            }
        }
        self.mailbox.close();

        // Final flush, then let the writer drain and exit.
        self.persist();
        let Self {
            persistence,
            writer_task,
            ..
        } = self;
        drop(persistence);
        if let Err(e) = writer_task.await {
            error!("Snapshot writer task failed: {}", e);
        }
        info!("Job scheduler stopped");
    }
}
