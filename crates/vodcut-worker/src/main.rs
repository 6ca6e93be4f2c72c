//! VOD pipeline binary.

use std::sync::Arc;

use anyhow::{bail, Context};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use vodcut_api::{create_router, serve, ApiConfig, AppState};
use vodcut_ledger::{FileLedger, Ledger};
use vodcut_opus::{ClipWaiter, OpusClient, TokioClock, WaiterConfig};
use vodcut_storage::{build_publisher, PublishConfig};
use vodcut_worker::{
    init_tracing, HttpDownloader, JobExecutor, Pipeline, PipelineServices, TriggerMode,
    TriggerResolver, VodWatcher, WorkerConfig,
};
use vodcut_youtube::{YouTubeConfig, YouTubeUploader};

/// Events buffered between the listener and the dispatcher.
const EVENT_QUEUE_CAPACITY: usize = 64;

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    dotenvy::dotenv().ok();
    init_tracing();

    let code = match run().await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            1
        }
    };

    info!(exit_code = code, "vodcut stopped");
    std::process::exit(code);
}

async fn run() -> anyhow::Result<i32> {
    let worker = WorkerConfig::from_env().context("invalid worker configuration")?;
    let publish = PublishConfig::from_env().context("invalid publish configuration")?;
    let opus = OpusClient::from_env().context("invalid clip service configuration")?;
    let waiter = WaiterConfig::from_env().context("invalid clip wait configuration")?;
    let youtube = YouTubeConfig::from_env().context("invalid upload configuration")?;
    let api = ApiConfig::from_env();

    if worker.vod_file.is_none()
        && worker.trigger_mode == TriggerMode::Poll
        && !worker.watch_dir.is_dir()
    {
        bail!("WATCH_DIR not found: {}", worker.watch_dir.display());
    }

    let ledger = FileLedger::open(worker.ledger_path.clone())
        .with_context(|| format!("cannot open ledger {}", worker.ledger_path.display()))?;
    let processed = ledger.processed_count().await?;

    info!("Starting vodcut");
    info!(
        trigger_mode = worker.trigger_mode.as_str(),
        publish_mode = publish.mode().as_str(),
        run_once = worker.run_once,
        vod_file = ?worker.vod_file,
        "Modes"
    );
    info!(
        watch_dir = %worker.watch_dir.display(),
        ledger = %worker.ledger_path.display(),
        processed,
        work_dir = %worker.work_dir.display(),
        "Storage"
    );
    if worker.vod_file.is_none() && worker.trigger_mode == TriggerMode::Webhook {
        info!("Webhook endpoint: http://{}{}", api.bind_address(), api.webhook_path);
    }
    info!(
        client_secret_file = %youtube.client_secret_file.display(),
        token_file = %youtube.token_file.display(),
        "YouTube credentials"
    );

    let uploader = YouTubeUploader::from_config(&youtube).context("cannot build uploader")?;
    if let Err(e) = uploader.check_credentials().await {
        warn!(
            error = %e,
            "YouTube credentials unusable; uploads will fail until youtube-authorize is run"
        );
    }

    let ledger: Arc<dyn Ledger> = Arc::new(ledger);
    let pipeline = Arc::new(Pipeline::new(PipelineServices {
        ledger,
        publisher: build_publisher(publish),
        clips: Arc::new(opus),
        waiter: ClipWaiter::new(waiter, TokioClock),
        downloader: Arc::new(HttpDownloader::new(worker.max_download_parallel)?),
        uploader: Arc::new(uploader),
        metadata: youtube.defaults.clone(),
        work_dir: worker.work_dir.clone(),
    }));

    let executor = JobExecutor::new(
        pipeline,
        TriggerResolver::from_config(&worker),
        worker.max_concurrent_jobs,
        worker.run_once,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);
    {
        let shutdown_tx = Arc::clone(&shutdown_tx);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received shutdown signal");
                let _ = shutdown_tx.send(true);
            }
        });
    }

    if let Some(file) = &worker.vod_file {
        let outcome = executor.run_file(file, worker.vod_id.as_deref()).await?;
        return Ok(outcome.exit_code());
    }

    match worker.trigger_mode {
        TriggerMode::Webhook => {
            let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
            let metrics_handle = if api.metrics_enabled {
                Some(vodcut_api::metrics::init_metrics().context("cannot install metrics recorder")?)
            } else {
                None
            };
            let router = create_router(AppState::new(api.clone(), events_tx), metrics_handle);

            let mut server_shutdown = shutdown_rx.clone();
            let server = tokio::spawn(async move {
                serve(&api, router, async move {
                    let _ = server_shutdown.wait_for(|stop| *stop).await;
                })
                .await
            });

            let outcome = executor.run_webhook(events_rx, shutdown_rx).await;
            let _ = shutdown_tx.send(true);

            match server.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(e).context("webhook listener failed"),
                Err(e) => return Err(e).context("webhook listener task panicked"),
            }

            Ok(outcome?.map_or(0, |o| o.exit_code()))
        }
        TriggerMode::Poll => {
            let watcher = VodWatcher::from_config(&worker);
            let outcome = executor.run_poll(&watcher, shutdown_rx).await?;
            Ok(outcome.map_or(0, |o| o.exit_code()))
        }
    }
}
