//! yt-dlp download engine implementation.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::binaries::{BinaryInfo, DEFAULT_FFMPEG, DEFAULT_YT_DLP};
use super::traits::{
    DownloadEngine, DownloadHandle, DownloadRequest, ExecutionEvent, ExecutionOutcome,
};
use super::utils::{
    HeuristicStageDetector, ProcessExit, StageDetector, ensure_job_dir, job_dir,
    parse_progress_line, spawn_process_waiter,
};
use crate::domain::Preset;
use crate::utils::filename::sanitize_output_template;
use crate::{Error, Result};

/// Error reported for every job when the tool is missing.
pub const TOOL_UNAVAILABLE: &str = "yt-dlp is not available on this host";

/// Marker printed by yt-dlp once the final file is in place.
const FILEPATH_MARKER: &str = "after_move:filepath ";

const PROGRESS_TEMPLATE: &str = "download:progress:%(progress.downloaded_bytes)s:%(progress.total_bytes_estimate)s:%(progress._percent_str)s:%(progress._eta_str)s:%(progress._speed_str)s";

const PRINT_FILEPATH: &str = "after_move:after_move:filepath %(filepath)s";

/// Upper bound on draining the output pipes after the process is gone.
/// Post-processors spawned by yt-dlp may keep them open.
const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Default grace period between the interrupt and a hard kill.
pub const fn default_cancel_grace() -> Duration {
    if cfg!(unix) {
        Duration::from_secs(5)
    } else {
        Duration::from_millis(300)
    }
}

/// yt-dlp engine configuration.
#[derive(Debug, Clone)]
pub struct YtDlpConfig {
    /// Path to the yt-dlp binary.
    pub binary_path: String,
    /// Path to ffmpeg; passed through when it is not the default.
    pub ffmpeg_path: String,
    /// Whether ffmpeg-dependent options may be requested.
    pub ffmpeg_available: bool,
    /// Root under which each job gets its own directory.
    pub downloads_dir: PathBuf,
    /// Time allowed between interrupt and kill on cancellation.
    pub cancel_grace: Duration,
}

impl Default for YtDlpConfig {
    fn default() -> Self {
        Self {
            binary_path: DEFAULT_YT_DLP.to_string(),
            ffmpeg_path: DEFAULT_FFMPEG.to_string(),
            ffmpeg_available: false,
            downloads_dir: PathBuf::from("downloads"),
            cancel_grace: default_cancel_grace(),
        }
    }
}

/// yt-dlp based download engine.
///
/// Spawns one yt-dlp process per job, decodes its structured progress
/// output and reports the final file printed after post-processing.
pub struct YtDlpEngine {
    config: YtDlpConfig,
    /// Version detected at startup; `None` means the binary is missing.
    version: Option<String>,
    stage_detector: Arc<dyn StageDetector>,
}

impl YtDlpEngine {
    pub fn new(config: YtDlpConfig, version: Option<String>) -> Self {
        Self {
            config,
            version,
            stage_detector: Arc::new(HeuristicStageDetector),
        }
    }

    /// Build from the startup probe.
    pub fn from_probe(
        binaries: &BinaryInfo,
        downloads_dir: PathBuf,
        cancel_grace: Duration,
    ) -> Self {
        Self::new(
            YtDlpConfig {
                binary_path: binaries.yt_dlp_path.clone(),
                ffmpeg_path: binaries.ffmpeg_path.clone(),
                ffmpeg_available: binaries.ffmpeg_available(),
                downloads_dir,
                cancel_grace,
            },
            binaries.yt_dlp_version.clone(),
        )
    }

    /// Replace the stage detector.
    pub fn with_stage_detector(mut self, detector: Arc<dyn StageDetector>) -> Self {
        self.stage_detector = detector;
        self
    }

    /// Output path template for a job: `<downloads>/<job_id>/<template>`.
    pub fn output_template(&self, request: &DownloadRequest) -> PathBuf {
        job_dir(&self.config.downloads_dir, &request.job_id)
            .join(sanitize_output_template(&request.options.output_template))
    }

    /// Build yt-dlp command arguments.
    pub fn build_args(&self, request: &DownloadRequest) -> Vec<String> {
        let options = &request.options;
        let mut args: Vec<String> = [
            "--no-warnings",
            "--newline",
            "--no-playlist",
            // `--print` implies quiet mode; keep progress and log lines.
            "--no-quiet",
            "--progress",
            "--progress-template",
            PROGRESS_TEMPLATE,
            "--print",
            PRINT_FILEPATH,
        ]
        .into_iter()
        .map(String::from)
        .collect();

        args.extend(["-N".to_string(), options.clamped_parallelism().to_string()]);
        args.extend([
            "-o".to_string(),
            self.output_template(request).to_string_lossy().into_owned(),
        ]);

        if let Some(proxy) = options.proxy.as_deref().filter(|p| !p.trim().is_empty()) {
            args.extend(["--proxy".to_string(), proxy.to_string()]);
        }
        if let Some(limit) = options.speed_limit.filter(|limit| *limit > 0) {
            args.extend(["--limit-rate".to_string(), format!("{limit}K")]);
        }

        let format = options.format.as_deref().filter(|f| !f.trim().is_empty());
        match request.preset {
            Preset::Audio => {
                args.extend([
                    "-x".to_string(),
                    "--audio-format".to_string(),
                    options.audio_format.unwrap_or_default().as_str().to_string(),
                    "--audio-quality".to_string(),
                    "0".to_string(),
                    "-f".to_string(),
                    format.unwrap_or("bestaudio/best").to_string(),
                ]);
            }
            Preset::Best => {
                args.extend([
                    "-f".to_string(),
                    format.unwrap_or("bv*+ba/b").to_string(),
                    "--merge-output-format".to_string(),
                    "mp4".to_string(),
                ]);
            }
            Preset::Custom => {
                if let Some(format) = format {
                    args.extend(["-f".to_string(), format.to_string()]);
                }
            }
        }

        if let Some(subs) = &options.subtitles {
            if !subs.langs.is_empty() {
                args.extend([
                    "--write-subs".to_string(),
                    "--sub-langs".to_string(),
                    subs.langs.join(","),
                ]);
            }
            if let Some(target) = subs.convert_to {
                args.extend(["--convert-subs".to_string(), target.as_str().to_string()]);
            }
            if subs.embed && self.config.ffmpeg_available {
                args.push("--embed-subs".to_string());
            }
        }

        if options.embed_metadata && self.config.ffmpeg_available {
            args.extend([
                "--embed-thumbnail".to_string(),
                "--embed-metadata".to_string(),
            ]);
        }

        if self.config.ffmpeg_path != DEFAULT_FFMPEG {
            args.extend([
                "--ffmpeg-location".to_string(),
                self.config.ffmpeg_path.clone(),
            ]);
        }

        args.push("--".to_string());
        args.push(request.url.clone());
        args
    }
}

/// Decide the outcome once the process is gone and its output drained.
pub fn resolve_outcome(
    exit: &ProcessExit,
    output_file: Option<PathBuf>,
    last_error: Option<String>,
) -> ExecutionOutcome {
    let code = match exit {
        ProcessExit::Cancelled => return ExecutionOutcome::Canceled,
        ProcessExit::WaitFailed(e) => {
            return ExecutionOutcome::Failed {
                error: format!("Failed to wait for yt-dlp: {e}"),
            };
        }
        ProcessExit::Exited(code) => *code,
    };

    if code == Some(0) {
        return match output_file {
            Some(output_file) => ExecutionOutcome::Completed { output_file },
            None => ExecutionOutcome::Failed {
                error: "yt-dlp exited without reporting an output file".to_string(),
            },
        };
    }

    let mut error = match code {
        Some(code) => format!("yt-dlp exited with code {code}"),
        None => "yt-dlp was terminated by a signal".to_string(),
    };
    if let Some(last_error) = last_error {
        error.push_str(": ");
        error.push_str(&last_error);
    }
    ExecutionOutcome::Failed { error }
}

/// Read newline-delimited output without failing on invalid UTF-8.
async fn next_line<R: AsyncRead + Unpin>(
    reader: &mut BufReader<R>,
    buf: &mut Vec<u8>,
) -> Option<String> {
    buf.clear();
    match reader.read_until(b'\n', buf).await {
        Ok(0) => None,
        Ok(_) => Some(String::from_utf8_lossy(buf).trim().to_string()),
        Err(e) => {
            warn!("Error reading yt-dlp output: {}", e);
            None
        }
    }
}

async fn emit_log(handle: &DownloadHandle, detector: &dyn StageDetector, line: String) {
    let stage = detector.detect(&line);
    handle.emit(ExecutionEvent::Log(line)).await;
    if let Some(stage) = stage {
        handle.emit(ExecutionEvent::Stage(stage)).await;
    }
}

/// Consume stdout. Returns the final path, if one was printed.
async fn read_stdout<R: AsyncRead + Unpin>(
    stdout: R,
    handle: Arc<DownloadHandle>,
    detector: Arc<dyn StageDetector>,
) -> Option<PathBuf> {
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();
    let mut output_file = None;

    while let Some(line) = next_line(&mut reader, &mut buf).await {
        if line.is_empty() {
            continue;
        }
        if let Some(sample) = parse_progress_line(&line) {
            handle.emit(ExecutionEvent::Progress(sample)).await;
        } else if let Some(path) = line.strip_prefix(FILEPATH_MARKER) {
            let path = path.trim();
            if !path.is_empty() {
                debug!(job_id = %handle.job_id(), path, "yt-dlp reported final file");
                output_file = Some(PathBuf::from(path));
            }
        } else {
            emit_log(&handle, detector.as_ref(), line).await;
        }
    }

    output_file
}

/// Consume stderr. Returns the last `ERROR:` line.
async fn read_stderr<R: AsyncRead + Unpin>(
    stderr: R,
    handle: Arc<DownloadHandle>,
    detector: Arc<dyn StageDetector>,
) -> Option<String> {
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();
    let mut last_error = None;

    while let Some(line) = next_line(&mut reader, &mut buf).await {
        if line.is_empty() {
            continue;
        }
        if line.starts_with("ERROR:") {
            last_error = Some(line.clone());
        }
        emit_log(&handle, detector.as_ref(), line).await;
    }

    last_error
}

async fn join_reader<T: Default>(mut task: JoinHandle<T>, job_id: &str) -> T {
    match tokio::time::timeout(READER_DRAIN_TIMEOUT, &mut task).await {
        Ok(result) => result.unwrap_or_default(),
        Err(_) => {
            warn!(job_id, "Output pipe still open after exit, abandoning reader");
            task.abort();
            T::default()
        }
    }
}

#[async_trait]
impl DownloadEngine for YtDlpEngine {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn start(&self, handle: Arc<DownloadHandle>) -> Result<()> {
        if !self.is_available() {
            return Err(Error::Other(TOOL_UNAVAILABLE.to_string()));
        }

        let request = &handle.request;
        // The tool does not create the per-job directory on every platform.
        ensure_job_dir(&self.config.downloads_dir, &request.job_id).await?;

        let args = self.build_args(request);
        info!(
            job_id = %request.job_id,
            preset = %request.preset,
            "Starting yt-dlp download"
        );
        debug!(job_id = %request.job_id, ?args, "yt-dlp arguments");

        let mut command = process_utils::tokio_command(&self.config.binary_path);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = command
            .spawn()
            .map_err(|e| Error::Other(format!("Failed to spawn yt-dlp: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Other("Failed to capture yt-dlp stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Other("Failed to capture yt-dlp stderr".to_string()))?;

        let stdout_task = tokio::spawn(read_stdout(
            stdout,
            handle.clone(),
            self.stage_detector.clone(),
        ));
        let stderr_task = tokio::spawn(read_stderr(
            stderr,
            handle.clone(),
            self.stage_detector.clone(),
        ));
        let exit_rx = spawn_process_waiter(
            child,
            handle.cancellation_token.clone(),
            self.config.cancel_grace,
        );

        tokio::spawn(async move {
            let exit = exit_rx
                .await
                .unwrap_or_else(|_| ProcessExit::WaitFailed("process waiter dropped".to_string()));
            let job_id = handle.job_id().to_string();
            let output_file = join_reader(stdout_task, &job_id).await;
            let last_error = join_reader(stderr_task, &job_id).await;

            let outcome = resolve_outcome(&exit, output_file, last_error);
            match &outcome {
                ExecutionOutcome::Completed { output_file } => {
                    info!(
                        job_id = %job_id,
                        path = %output_file.display(),
                        "yt-dlp download completed"
                    )
                }
                ExecutionOutcome::Failed { error } => {
                    warn!(job_id = %job_id, error = %error, "yt-dlp download failed")
                }
                ExecutionOutcome::Canceled => info!(job_id = %job_id, "yt-dlp download cancelled"),
            }
            handle.emit(ExecutionEvent::Finished(outcome)).await;
        });

        Ok(())
    }

    fn is_available(&self) -> bool {
        self.version.is_some()
    }

    fn version(&self) -> Option<String> {
        self.version.clone()
    }
}
