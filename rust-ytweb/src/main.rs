use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use rust_ytweb::api::{ApiServer, AppState};
use rust_ytweb::config::AppConfig;
use rust_ytweb::downloader::{BinaryInfo, DownloadEngine, YtDlpEngine};
use rust_ytweb::grant::GrantService;
use rust_ytweb::notification::{JobEventHub, ProgressSink};
use rust_ytweb::scheduler::JobScheduler;
use rust_ytweb::store::JobStore;
use rust_ytweb::{logging, panic_hook};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env().context("Invalid configuration")?;

    let (logging_config, _log_guard) =
        logging::init_logging(&config.log_dir).context("Failed to initialize logging")?;
    panic_hook::install(logging_config.log_dir());

    let background = CancellationToken::new();
    logging_config.start_retention_cleanup(background.clone());

    info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %config.data_dir.display(),
        "Starting rust-ytweb"
    );

    if config.uses_dev_secret() {
        warn!(
            "DOWNLOAD_TOKEN_SECRET is not set; download links use an insecure development secret"
        );
    }

    config
        .ensure_dirs()
        .await
        .context("Failed to create data directories")?;

    let binaries = Arc::new(BinaryInfo::probe(&config.yt_dlp_path, &config.ffmpeg_path).await);
    let engine: Arc<dyn DownloadEngine> = Arc::new(YtDlpEngine::from_probe(
        &binaries,
        config.downloads_dir(),
        config.cancel_grace,
    ));

    let hub = Arc::new(JobEventHub::default());
    let grants = Arc::new(
        GrantService::new(&config.download_token_secret, config.download_token_ttl)
            .context("Failed to initialize download grants")?,
    );
    let store = Arc::new(JobStore::new(config.cache_dir()));

    let scheduler = JobScheduler::start(
        config.scheduler_config(),
        engine,
        hub.clone() as Arc<dyn ProgressSink>,
        grants.clone(),
        store,
    )
    .await;

    let config = Arc::new(config);
    let server = ApiServer::new(AppState {
        scheduler: scheduler.clone(),
        hub,
        grants,
        binaries,
        config,
        logging: logging_config.clone(),
    });

    let server_token = server.cancel_token();
    tokio::spawn(async move {
        shutdown_signal().await;
        server_token.cancel();
    });

    let served = server.run().await;
    if let Err(e) = &served {
        warn!("API server stopped with error: {}", e);
    }

    scheduler.shutdown().await;
    background.cancel();
    info!("Graceful shutdown complete");

    served.context("API server failed")
}

/// Wait for Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
