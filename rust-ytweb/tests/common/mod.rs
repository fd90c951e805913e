//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing_subscriber::{EnvFilter, Registry, reload};

use rust_ytweb::api::AppState;
use rust_ytweb::config::AppConfig;
use rust_ytweb::domain::{
    DownloadOptions, JobRequest, JobSnapshot, JobStage, JobStatus, Preset, ProgressSample,
};
use rust_ytweb::downloader::{
    BinaryInfo, DownloadEngine, DownloadHandle, ExecutionEvent, ExecutionOutcome,
};
use rust_ytweb::grant::{DEFAULT_GRANT_TTL, GrantService};
use rust_ytweb::logging::{DEFAULT_LOG_FILTER, LoggingConfig};
use rust_ytweb::notification::{JobEventHub, ProgressSink};
use rust_ytweb::scheduler::{JobScheduler, SchedulerConfig};
use rust_ytweb::store::JobStore;
use rust_ytweb::{Error, Result};

pub const TEST_SECRET: &str = "integration-secret";

/// Engine whose behavior is picked by the last path segment of the URL:
/// `complete`, `fail`, `hang` (until canceled), `late` (reports success after
/// being canceled) or `refuse` (start error).
pub struct FakeEngine {
    output_dir: PathBuf,
    started: Mutex<Vec<String>>,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl FakeEngine {
    pub fn new(output_dir: &Path) -> Self {
        Self {
            output_dir: output_dir.to_path_buf(),
            started: Mutex::new(Vec::new()),
            active: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Job ids in the order they were started.
    pub fn started(&self) -> Vec<String> {
        self.started.lock().clone()
    }

    /// Highest number of simultaneously running executions seen.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DownloadEngine for FakeEngine {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn start(&self, handle: Arc<DownloadHandle>) -> Result<()> {
        let behavior = handle
            .request
            .url
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        if behavior == "refuse" {
            return Err(Error::Other("engine refused to start".to_string()));
        }

        self.started.lock().push(handle.job_id().to_string());
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let active = self.active.clone();
        let output = self.output_dir.join(format!("{}.mp4", handle.job_id()));
        tokio::spawn(async move {
            let outcome = match behavior.as_str() {
                "complete" => {
                    for percent in [25.0, 75.0] {
                        handle
                            .emit(ExecutionEvent::Progress(ProgressSample {
                                downloaded_bytes: (percent * 10.0) as u64,
                                total_bytes: Some(1000),
                                percent,
                                eta: Some("00:01".to_string()),
                                speed: Some("1.00MiB/s".to_string()),
                            }))
                            .await;
                    }
                    handle.emit(ExecutionEvent::Log("[download] done".to_string())).await;
                    handle.emit(ExecutionEvent::Stage(JobStage::Merging)).await;
                    match tokio::fs::write(&output, b"media").await {
                        Ok(()) => ExecutionOutcome::Completed {
                            output_file: output,
                        },
                        Err(e) => ExecutionOutcome::Failed {
                            error: e.to_string(),
                        },
                    }
                }
                "fail" => {
                    handle
                        .emit(ExecutionEvent::Log("ERROR: Video unavailable".to_string()))
                        .await;
                    ExecutionOutcome::Failed {
                        error: "ERROR: Video unavailable".to_string(),
                    }
                }
                "late" => {
                    handle.cancellation_token.cancelled().await;
                    match tokio::fs::write(&output, b"media").await {
                        Ok(()) => ExecutionOutcome::Completed {
                            output_file: output,
                        },
                        Err(e) => ExecutionOutcome::Failed {
                            error: e.to_string(),
                        },
                    }
                }
                _ => {
                    handle.cancellation_token.cancelled().await;
                    ExecutionOutcome::Canceled
                }
            };
            active.fetch_sub(1, Ordering::SeqCst);
            handle.emit(ExecutionEvent::Finished(outcome)).await;
        });
        Ok(())
    }

    fn is_available(&self) -> bool {
        true
    }

    fn version(&self) -> Option<String> {
        Some("fake".to_string())
    }
}

/// Sink that keeps every published snapshot.
#[derive(Default)]
pub struct RecordingSink {
    published: Mutex<Vec<JobSnapshot>>,
}

impl RecordingSink {
    pub fn for_job(&self, job_id: &str) -> Vec<JobSnapshot> {
        self.published
            .lock()
            .iter()
            .filter(|s| s.id == job_id)
            .cloned()
            .collect()
    }
}

impl ProgressSink for RecordingSink {
    fn publish(&self, snapshot: &JobSnapshot) {
        self.published.lock().push(snapshot.clone());
    }
}

pub struct Harness {
    pub scheduler: JobScheduler,
    pub engine: Arc<FakeEngine>,
    pub sink: Arc<RecordingSink>,
    pub grants: Arc<GrantService>,
    pub store: Arc<JobStore>,
}

pub async fn start_scheduler(dir: &Path, config: SchedulerConfig) -> Harness {
    let engine = Arc::new(FakeEngine::new(dir));
    let sink = Arc::new(RecordingSink::default());
    let grants = Arc::new(GrantService::new(TEST_SECRET, DEFAULT_GRANT_TTL).unwrap());
    let store = Arc::new(JobStore::new(dir.join(".cache")));

    let scheduler = JobScheduler::start(
        config,
        engine.clone(),
        sink.clone(),
        grants.clone(),
        store.clone(),
    )
    .await;

    Harness {
        scheduler,
        engine,
        sink,
        grants,
        store,
    }
}

/// Log filter handle that is not installed as the global subscriber.
pub fn detached_logging(dir: &Path) -> Arc<LoggingConfig> {
    let (layer, handle) =
        reload::Layer::<EnvFilter, Registry>::new(EnvFilter::new(DEFAULT_LOG_FILTER));
    // The handle only works while its layer is alive.
    std::mem::forget(layer);
    Arc::new(LoggingConfig::new(handle, dir.join("logs")))
}

/// Full application state over a [`FakeEngine`], publishing into a real hub.
pub async fn app_state(dir: &Path, per_client_limit: usize) -> AppState {
    let config = AppConfig {
        data_dir: dir.to_path_buf(),
        per_client_limit,
        ..AppConfig::default()
    };
    let hub = Arc::new(JobEventHub::default());
    let grants = Arc::new(GrantService::new(TEST_SECRET, DEFAULT_GRANT_TTL).unwrap());
    let scheduler = JobScheduler::start(
        config.scheduler_config(),
        Arc::new(FakeEngine::new(dir)),
        hub.clone(),
        grants.clone(),
        Arc::new(JobStore::new(config.cache_dir())),
    )
    .await;

    AppState {
        scheduler,
        hub,
        grants,
        binaries: Arc::new(BinaryInfo {
            yt_dlp_path: "yt-dlp".to_string(),
            yt_dlp_version: Some("2024.08.06".to_string()),
            ffmpeg_path: "ffmpeg".to_string(),
            ffmpeg_version: None,
        }),
        config: Arc::new(config),
        logging: detached_logging(dir),
    }
}

pub fn request(client_id: &str, behavior: &str) -> JobRequest {
    JobRequest {
        url: format!("https://media.example.com/watch/{behavior}"),
        preset: Preset::Best,
        options: DownloadOptions::default(),
        client_id: client_id.to_string(),
    }
}

/// Poll until the job reaches `status`.
pub async fn wait_for_status(
    scheduler: &JobScheduler,
    job_id: &str,
    status: JobStatus,
) -> JobSnapshot {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let snapshot = scheduler.get(job_id).await.unwrap().unwrap();
        if snapshot.status == status {
            return snapshot;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {job_id} stuck in {:?}, expected {:?}",
            snapshot.status,
            status
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll until `check` holds.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
