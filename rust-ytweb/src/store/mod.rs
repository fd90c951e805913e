//! Durable job storage.

mod job_store;
mod writer;

pub use job_store::{JOBS_FILE, JobStore};
pub use writer::{SnapshotHandle, spawn_snapshot_writer};
