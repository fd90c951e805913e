//! Background snapshot writer.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use super::JobStore;
use crate::domain::Job;

/// Hands job tables to the writer task.
///
/// Only the newest table is kept; tables requested while a write is in
/// flight are coalesced into one write. Dropping the handle lets the writer
/// flush what is pending and exit.
#[derive(Debug)]
pub struct SnapshotHandle {
    tx: watch::Sender<Option<Vec<Job>>>,
}

impl SnapshotHandle {
    /// Queue `jobs` for the next write. Never blocks.
    pub fn request(&self, jobs: Vec<Job>) {
        self.tx.send_replace(Some(jobs));
    }
}

/// Spawn the writer task for `store`.
pub fn spawn_snapshot_writer(store: Arc<JobStore>) -> (SnapshotHandle, JoinHandle<()>) {
    let (tx, mut rx) = watch::channel::<Option<Vec<Job>>>(None);

    let task = tokio::spawn(async move {
        // A value sent right before the sender is dropped is still observed.
        while rx.changed().await.is_ok() {
            let pending = rx.borrow_and_update().clone();
            let Some(jobs) = pending else {
                continue;
            };
            let count = jobs.len();
            match store.snapshot(jobs).await {
                Ok(()) => debug!(count, "Job snapshot written"),
                Err(e) => error!(
                    path = %store.path().display(),
                    "Failed to write job snapshot: {}",
                    e
                ),
            }
        }
        debug!("Snapshot writer stopped");
    });

    (SnapshotHandle { tx }, task)
}
