//! JSON document store for the job table.

use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::domain::{INTERRUPTED_BY_RESTART, Job};
use crate::utils::fs::io_error;
use crate::{Error, Result};

/// File name of the job table inside the cache directory.
pub const JOBS_FILE: &str = "jobs.json";

/// Durable copy of the job table.
///
/// The whole table is rewritten on every snapshot. Writes go to a temporary
/// file in the same directory which is then renamed over the target, so a
/// crash mid-write leaves the previous snapshot intact.
#[derive(Debug, Clone)]
pub struct JobStore {
    path: PathBuf,
}

impl JobStore {
    /// Store backed by `<cache_dir>/jobs.json`.
    pub fn new(cache_dir: impl AsRef<Path>) -> Self {
        Self {
            path: cache_dir.as_ref().join(JOBS_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted table.
    ///
    /// A missing or unreadable file yields an empty table.
    pub async fn restore(&self) -> Vec<Job> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No job snapshot found, starting empty");
                return Vec::new();
            }
            Err(e) => {
                warn!(path = %self.path.display(), "Failed to read job snapshot: {}", e);
                return Vec::new();
            }
        };

        match serde_json::from_slice::<Vec<Job>>(&bytes) {
            Ok(jobs) => {
                info!(path = %self.path.display(), count = jobs.len(), "Restored job snapshot");
                jobs
            }
            Err(e) => {
                warn!(path = %self.path.display(), "Job snapshot is corrupt, ignoring it: {}", e);
                Vec::new()
            }
        }
    }

    /// Atomically replace the persisted table with `jobs`.
    pub async fn snapshot(&self, jobs: Vec<Job>) -> Result<()> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, &jobs))
            .await
            .map_err(|e| Error::Other(format!("job snapshot task failed: {e}")))?
    }

    /// Force every job that was still active into the failed state.
    ///
    /// Returns how many jobs were changed.
    pub fn reconcile(jobs: &mut [Job]) -> usize {
        let mut interrupted = 0;
        for job in jobs.iter_mut().filter(|job| job.status.is_active()) {
            if job.fail(INTERRUPTED_BY_RESTART).is_ok() {
                interrupted += 1;
            }
        }
        interrupted
    }
}

fn write_atomic(path: &Path, jobs: &[Job]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(|e| io_error("creating cache directory", dir, e))?;

    let json = serde_json::to_vec_pretty(jobs)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| io_error("creating temporary snapshot in", dir, e))?;
    tmp.write_all(&json)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| io_error("writing temporary snapshot for", path, e))?;
    tmp.persist(path)
        .map_err(|e| io_error("replacing job snapshot", path, e.error))?;
    Ok(())
}
