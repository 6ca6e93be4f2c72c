//! Trigger dispatch.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Semaphore};
use tracing::{debug, error, info, warn};
use vodcut_models::{DvrEvent, VodId};
use vodcut_opus::{Clock, TokioClock};

use crate::error::WorkerResult;
use crate::pipeline::{Pipeline, PipelineOutcome};
use crate::trigger::TriggerResolver;
use crate::watcher::VodWatcher;

/// Idle period after which the listener logs that it is still waiting.
const IDLE_LOG_INTERVAL: Duration = Duration::from_secs(60);

/// Minimum pause between poll-mode runs.
const MIN_POLL_REST: Duration = Duration::from_secs(10);

/// Maximum time to wait for in-flight jobs on shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(60);

/// Feeds triggers to the pipeline.
pub struct JobExecutor<C: Clock = TokioClock> {
    pipeline: Arc<Pipeline<C>>,
    resolver: TriggerResolver,
    job_semaphore: Arc<Semaphore>,
    max_concurrent_jobs: usize,
    run_once: bool,
}

impl<C: Clock + 'static> JobExecutor<C> {
    pub fn new(
        pipeline: Arc<Pipeline<C>>,
        resolver: TriggerResolver,
        max_concurrent_jobs: usize,
        run_once: bool,
    ) -> Self {
        let max_concurrent_jobs = max_concurrent_jobs.max(1);
        Self {
            pipeline,
            resolver,
            job_semaphore: Arc::new(Semaphore::new(max_concurrent_jobs)),
            max_concurrent_jobs,
            run_once,
        }
    }

    /// Process one file named by the operator.
    pub async fn run_file(&self, source: &Path, vod_id: Option<&str>) -> WorkerResult<PipelineOutcome> {
        let vod_id = match vod_id {
            Some(id) => VodId::new(id),
            None => self.resolver.vod_id_for(source),
        };
        info!(vod_id = %vod_id, path = %source.display(), "Processing VOD_FILE");
        self.pipeline.process(vod_id, source.to_path_buf()).await
    }

    /// Consume recorder events until shutdown.
    ///
    /// In run-once mode the first VOD that actually runs is processed inline
    /// and its outcome returned. Otherwise each VOD is processed on its own
    /// task, bounded by the job semaphore, and `None` is returned after
    /// shutdown once in-flight jobs drain.
    pub async fn run_webhook(
        &self,
        mut events: mpsc::Receiver<DvrEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> WorkerResult<Option<PipelineOutcome>> {
        info!(
            run_once = self.run_once,
            max_concurrent_jobs = self.max_concurrent_jobs,
            "Waiting for recorder events"
        );

        loop {
            let event = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Shutdown signal received, stopping dispatcher");
                        break;
                    }
                    continue;
                }
                received = tokio::time::timeout(IDLE_LOG_INTERVAL, events.recv()) => match received {
                    Err(_) => {
                        info!("Still waiting for an end_download event, none in the last {}s", IDLE_LOG_INTERVAL.as_secs());
                        continue;
                    }
                    Ok(None) => {
                        info!("Event channel closed, stopping dispatcher");
                        break;
                    }
                    Ok(Some(event)) => event,
                },
            };

            let Some(source) = self.resolve(&event).await else {
                continue;
            };
            let vod_id = self.resolver.vod_id_for(&source);

            if self.run_once {
                let outcome = self.pipeline.process(vod_id, source).await?;
                if matches!(outcome, PipelineOutcome::InProgress { .. }) {
                    continue;
                }
                info!(vod_id = %outcome.vod_id(), "RUN_ONCE set and one VOD handled, exiting");
                return Ok(Some(outcome));
            }

            let Ok(permit) = self.job_semaphore.clone().acquire_owned().await else {
                break;
            };
            let pipeline = Arc::clone(&self.pipeline);
            tokio::spawn(async move {
                let _permit = permit;
                run_logged(&pipeline, vod_id, source).await;
            });
        }

        self.drain().await;
        Ok(None)
    }

    /// Scan the watch directory until shutdown.
    pub async fn run_poll(
        &self,
        watcher: &VodWatcher,
        mut shutdown: watch::Receiver<bool>,
    ) -> WorkerResult<Option<PipelineOutcome>> {
        let rest = watcher.poll_interval().max(MIN_POLL_REST);

        loop {
            info!("Waiting for finished VOD in poll mode");
            let Some(source) = watcher
                .wait_for_vod(self.pipeline.ledger().as_ref(), &mut shutdown)
                .await
            else {
                return Ok(None);
            };
            let vod_id = self.resolver.vod_id_for(&source);

            if self.run_once {
                let outcome = self.pipeline.process(vod_id, source).await?;
                info!("RUN_ONCE set and poll cycle completed, exiting");
                return Ok(Some(outcome));
            }
            run_logged(&self.pipeline, vod_id, source).await;

            tokio::select! {
                _ = tokio::time::sleep(rest) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return Ok(None);
                    }
                }
            }
        }
    }

    async fn resolve(&self, event: &DvrEvent) -> Option<PathBuf> {
        match self
            .resolver
            .resolve(event, self.pipeline.ledger().as_ref())
            .await
        {
            Ok(source) => source,
            Err(e) => {
                warn!(error = %e, "Failed to resolve recorder event");
                None
            }
        }
    }

    /// Wait for in-flight jobs, giving up after [`DRAIN_TIMEOUT`].
    async fn drain(&self) {
        let idle = async {
            while self.job_semaphore.available_permits() < self.max_concurrent_jobs {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        };
        if tokio::time::timeout(DRAIN_TIMEOUT, idle).await.is_err() {
            warn!("In-flight jobs still running after {:?}", DRAIN_TIMEOUT);
        }
    }
}

async fn run_logged<C: Clock>(pipeline: &Pipeline<C>, vod_id: VodId, source: PathBuf) {
    match pipeline.process(vod_id.clone(), source).await {
        Ok(outcome) => debug!(vod_id = %vod_id, ?outcome, "Trigger handled"),
        Err(e) => error!(vod_id = %vod_id, error = %e, "Pipeline could not start"),
    }
}
