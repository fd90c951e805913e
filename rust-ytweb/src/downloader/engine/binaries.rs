//! Startup probe for the external tools.

use std::process::Stdio;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

/// Default yt-dlp binary name.
pub const DEFAULT_YT_DLP: &str = "yt-dlp";

/// Default ffmpeg binary name.
pub const DEFAULT_FFMPEG: &str = "ffmpeg";

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// What the host provides, detected once at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BinaryInfo {
    pub yt_dlp_path: String,
    /// `None` when yt-dlp could not be run.
    pub yt_dlp_version: Option<String>,
    pub ffmpeg_path: String,
    /// First line of `ffmpeg -version`, when available.
    pub ffmpeg_version: Option<String>,
}

impl BinaryInfo {
    pub fn yt_dlp_available(&self) -> bool {
        self.yt_dlp_version.is_some()
    }

    pub fn ffmpeg_available(&self) -> bool {
        self.ffmpeg_version.is_some()
    }

    /// Probe both tools.
    pub async fn probe(yt_dlp_path: &str, ffmpeg_path: &str) -> Self {
        let (yt_dlp_version, ffmpeg_version) = tokio::join!(
            detect_version(yt_dlp_path, "--version"),
            detect_version(ffmpeg_path, "-version"),
        );

        match &yt_dlp_version {
            Some(version) => info!(path = yt_dlp_path, version = %version, "yt-dlp detected"),
            None => warn!(
                path = yt_dlp_path,
                "yt-dlp not found; downloads will fail until it is installed"
            ),
        }
        match &ffmpeg_version {
            Some(version) => info!(path = ffmpeg_path, version = %version, "ffmpeg detected"),
            None => warn!(
                path = ffmpeg_path,
                "ffmpeg not found; merging, embedding and audio extraction are limited"
            ),
        }

        Self {
            yt_dlp_path: yt_dlp_path.to_string(),
            yt_dlp_version,
            ffmpeg_path: ffmpeg_path.to_string(),
            ffmpeg_version,
        }
    }
}

/// Run `<path> <flag>` and return the first non-empty stdout line.
async fn detect_version(path: &str, flag: &str) -> Option<String> {
    let mut cmd = process_utils::tokio_command(path);
    cmd.arg(flag)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let output = tokio::time::timeout(PROBE_TIMEOUT, cmd.output())
        .await
        .ok()?
        .ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}
