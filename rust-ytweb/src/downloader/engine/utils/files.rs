//! File utility functions for download engines.

use std::path::{Path, PathBuf};

use crate::Result;
use crate::utils::fs;

/// Directory that holds every artifact of one job.
pub fn job_dir(downloads_dir: &Path, job_id: &str) -> PathBuf {
    downloads_dir.join(job_id)
}

/// Ensure the per-job output directory exists, creating it if necessary.
///
/// Returns the directory path.
pub async fn ensure_job_dir(downloads_dir: &Path, job_id: &str) -> Result<PathBuf> {
    let dir = job_dir(downloads_dir, job_id);
    fs::ensure_dir_all_with_op("creating job output directory", &dir).await?;
    Ok(dir)
}
