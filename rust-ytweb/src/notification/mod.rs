//! Per-job snapshot fan-out.
//!
//! The scheduler publishes a full [`JobSnapshot`] after every state change.
//! Subscribers join the group of the job they care about and receive every
//! later snapshot of that job. Publishing never blocks: a slow subscriber
//! lags and skips to the newest snapshots.

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::trace;

use crate::domain::JobSnapshot;

/// Default per-job channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Destination for job snapshots.
pub trait ProgressSink: Send + Sync {
    /// Publish a snapshot to the subscribers of `snapshot.id`.
    fn publish(&self, snapshot: &JobSnapshot);
}

/// Broadcast groups keyed by job id.
#[derive(Debug)]
pub struct JobEventHub {
    channels: DashMap<String, broadcast::Sender<JobSnapshot>>,
    capacity: usize,
}

impl Default for JobEventHub {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl JobEventHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Join the group for `job_id`.
    pub fn subscribe(&self, job_id: &str) -> broadcast::Receiver<JobSnapshot> {
        self.channels
            .entry(job_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    pub fn subscriber_count(&self, job_id: &str) -> usize {
        self.channels
            .get(job_id)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    /// Number of jobs with a live group.
    pub fn group_count(&self) -> usize {
        self.channels.len()
    }
}

impl ProgressSink for JobEventHub {
    fn publish(&self, snapshot: &JobSnapshot) {
        let unobserved = match self.channels.get(&snapshot.id) {
            Some(tx) => tx.send(snapshot.clone()).is_err(),
            None => return,
        };
        if unobserved {
            // Everyone left; drop the group until someone joins again.
            self.channels
                .remove_if(&snapshot.id, |_, tx| tx.receiver_count() == 0);
            trace!(job_id = %snapshot.id, "Dropped empty subscriber group");
        }
    }
}
