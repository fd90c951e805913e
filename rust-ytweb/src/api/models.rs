//! API request and response models (DTOs).
//!
//! Request bodies are deliberately looser than the domain types so that
//! validation failures surface as 400 responses with a readable message
//! instead of a generic JSON rejection.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::domain::options::{MAX_PARALLEL_FRAGMENTS, MIN_PARALLEL_FRAGMENTS};
use crate::domain::{AudioFormat, DownloadOptions, JobRequest, JobSnapshot, Preset, SubtitleOptions};
use crate::downloader::BinaryInfo;
use crate::{Error, Result};

/// Minimum accepted length of a client supplied output template.
pub const MIN_OUTPUT_TEMPLATE_LEN: usize = 3;

// ============================================================================
// Jobs
// ============================================================================

/// Body of `POST /api/download`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitDownloadRequest {
    pub url: String,
    pub preset: Preset,
    #[serde(default)]
    pub options: SubmitOptions,
}

/// Options as sent by clients. Missing fields take server defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitOptions {
    pub format: Option<String>,
    pub audio_format: Option<AudioFormat>,
    pub subtitles: Option<SubtitleOptions>,
    #[serde(default)]
    pub embed_metadata: bool,
    pub output_template: Option<String>,
    pub parallel_fragments: Option<i64>,
    /// KiB/s.
    pub speed_limit: Option<f64>,
    pub proxy: Option<String>,
}

impl SubmitDownloadRequest {
    /// Validate the body and turn it into a scheduler request.
    pub fn into_job_request(
        self,
        client_id: String,
        parallel_fragments_default: u32,
    ) -> Result<JobRequest> {
        let url = Url::parse(self.url.trim())
            .map_err(|_| Error::validation(format!("Invalid url: {}", self.url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::validation("url must use http or https"));
        }

        let opts = self.options;

        let output_template = match opts.output_template {
            Some(template) if template.chars().count() < MIN_OUTPUT_TEMPLATE_LEN => {
                return Err(Error::validation(format!(
                    "outputTemplate must be at least {MIN_OUTPUT_TEMPLATE_LEN} characters"
                )));
            }
            Some(template) => template,
            None => DownloadOptions::default().output_template,
        };

        let parallel_fragments = match opts.parallel_fragments {
            Some(n)
                if n < i64::from(MIN_PARALLEL_FRAGMENTS) || n > i64::from(MAX_PARALLEL_FRAGMENTS) =>
            {
                return Err(Error::validation(format!(
                    "parallelFragments must be between {MIN_PARALLEL_FRAGMENTS} and {MAX_PARALLEL_FRAGMENTS}"
                )));
            }
            Some(n) => n as u32,
            None => parallel_fragments_default,
        };

        let speed_limit = match opts.speed_limit {
            Some(limit) if !limit.is_finite() || limit < 0.0 => {
                return Err(Error::validation("speedLimit must be a non-negative number"));
            }
            Some(limit) => Some(limit.round() as u64),
            None => None,
        };

        let blank_to_none = |value: Option<String>| {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        Ok(JobRequest {
            url: url.to_string(),
            preset: self.preset,
            options: DownloadOptions {
                format: blank_to_none(opts.format),
                audio_format: opts.audio_format,
                subtitles: opts.subtitles,
                embed_metadata: opts.embed_metadata,
                output_template,
                parallel_fragments,
                speed_limit,
                proxy: blank_to_none(opts.proxy),
            },
            client_id,
        })
    }
}

/// Response of `POST /api/download`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitDownloadResponse {
    pub job_id: String,
}

/// Response of `GET /api/jobs/{id}/download`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadLinkResponse {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OkResponse {
    pub ok: bool,
}

// ============================================================================
// Health / admin
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub ok: bool,
    pub yt_dlp_version: Option<String>,
    /// Whether ffmpeg is usable.
    pub ffmpeg: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminSettingsResponse {
    pub max_concurrency: usize,
    pub per_client_limit: usize,
    pub parallel_fragments_default: u32,
    pub downloads_dir: String,
    /// Bytes used under the data directory.
    pub disk_usage: u64,
    pub queued: usize,
    pub running: usize,
    pub binaries: BinaryInfo,
}

/// Body of `PUT /api/admin/logging`.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateLogFilterRequest {
    pub filter: String,
}

/// Active log filter directive.
#[derive(Debug, Clone, Serialize)]
pub struct LogFilterResponse {
    pub filter: String,
}

// ============================================================================
// WebSocket
// ============================================================================

/// Messages accepted on `/ws`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum WsClientMessage {
    Join {
        #[serde(rename = "jobId")]
        job_id: String,
    },
    Leave {
        #[serde(rename = "jobId")]
        job_id: String,
    },
}

/// Messages pushed on `/ws`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum WsServerMessage {
    Progress { job: JobSnapshot },
}
