//! Per-VOD pipeline orchestration.
//!
//! A job moves RECEIVED -> PUBLISHED -> PROJECT_CREATED -> AWAITING_CLIPS ->
//! CLIPS_READY -> DOWNLOADED -> UPLOADED -> DONE. The ledger is checkpointed
//! after every step, so an interrupted run resumes at its last durable
//! status. Any failure stops the job at FAILED; nothing is retried here.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio::fs;
use tracing::{error, info, info_span, Instrument};
use vodcut_ledger::{Claim, Ledger};
use vodcut_models::{safe_name, ClipRef, StatusTransitionError, UploadRecord, VodId, VodJob, VodStatus};
use vodcut_opus::{ClipService, ClipWaiter, Clock, TokioClock};
use vodcut_storage::PublishStrategy;
use vodcut_youtube::{MetadataDefaults, UploadMetadata, VideoUploader};

use crate::download::ClipDownloader;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;

/// Everything a pipeline run talks to.
pub struct PipelineServices<C: Clock = TokioClock> {
    pub ledger: Arc<dyn Ledger>,
    pub publisher: Arc<dyn PublishStrategy>,
    pub clips: Arc<dyn ClipService>,
    pub waiter: ClipWaiter<C>,
    pub downloader: Arc<dyn ClipDownloader>,
    pub uploader: Arc<dyn VideoUploader>,
    pub metadata: MetadataDefaults,
    /// Clips for a VOD land in `work_dir/<safe vod_id>`
    pub work_dir: PathBuf,
}

/// How a trigger ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// Every clip uploaded and the VOD recorded DONE.
    Completed { vod_id: VodId, video_ids: Vec<String> },
    /// The ledger already holds DONE for this VOD; nothing was called.
    AlreadyProcessed { vod_id: VodId },
    /// Another run in this process owns the VOD.
    InProgress { vod_id: VodId },
    /// The job stopped at FAILED.
    Failed {
        vod_id: VodId,
        /// Status the job held when it failed
        status: VodStatus,
        reason: String,
    },
}

impl PipelineOutcome {
    pub fn vod_id(&self) -> &VodId {
        match self {
            PipelineOutcome::Completed { vod_id, .. }
            | PipelineOutcome::AlreadyProcessed { vod_id }
            | PipelineOutcome::InProgress { vod_id }
            | PipelineOutcome::Failed { vod_id, .. } => vod_id,
        }
    }

    /// Completed or already processed.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            PipelineOutcome::Completed { .. } | PipelineOutcome::AlreadyProcessed { .. }
        )
    }

    /// Process exit code for run-once modes.
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineOutcome::Failed { .. } => 1,
            _ => 0,
        }
    }
}

/// Drives VOD jobs through the pipeline.
pub struct Pipeline<C: Clock = TokioClock> {
    services: PipelineServices<C>,
}

impl<C: Clock> Pipeline<C> {
    pub fn new(services: PipelineServices<C>) -> Self {
        Self { services }
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.services.ledger
    }

    /// Run the pipeline for one VOD.
    ///
    /// Component failures are reported as [`PipelineOutcome::Failed`]; only
    /// a ledger that cannot be read for the claim is an `Err`.
    pub async fn process(&self, vod_id: VodId, source: PathBuf) -> WorkerResult<PipelineOutcome> {
        let span = info_span!("vod", vod_id = %vod_id);
        self.process_claimed(vod_id, source).instrument(span).await
    }

    async fn process_claimed(&self, vod_id: VodId, source: PathBuf) -> WorkerResult<PipelineOutcome> {
        let mut guard = match self.services.ledger.try_claim(&vod_id).await? {
            Claim::Acquired(guard) => guard,
            Claim::AlreadyProcessed(entry) => {
                info!(
                    vod_id = %vod_id,
                    video_ids = ?entry.video_ids,
                    "VOD already processed, skipping"
                );
                metrics::record_job_skipped("already_processed");
                return Ok(PipelineOutcome::AlreadyProcessed { vod_id });
            }
            Claim::InProgress => {
                info!(vod_id = %vod_id, "VOD is already being processed, skipping");
                metrics::record_job_skipped("in_progress");
                return Ok(PipelineOutcome::InProgress { vod_id });
            }
        };

        let (mut job, resumed) = match guard.take_resume() {
            Some(mut job) => {
                if job.status == VodStatus::Received {
                    job.source_path = source;
                }
                (job, true)
            }
            None => (VodJob::new(vod_id.clone(), source), false),
        };

        let logger = JobLogger::new(&vod_id);
        logger.log_start(
            job.status,
            &format!(
                "{} {}",
                if resumed { "resuming" } else { "processing" },
                job.source_path.display()
            ),
        );
        metrics::record_job_started(resumed);
        let started = Instant::now();

        let outcome = match self.drive(&mut job, &logger).await {
            Ok(()) => {
                metrics::record_job_completed(started.elapsed().as_secs_f64());
                logger.log_completion(&format!("{} video(s) uploaded", job.upload_results.len()));
                PipelineOutcome::Completed {
                    vod_id,
                    video_ids: job.video_ids(),
                }
            }
            Err(e) => {
                let status = job.status;
                let reason = e.to_string();
                logger.log_error(status, &reason);
                if e.needs_reauthorization() {
                    error!(vod_id = %vod_id, "Upload credentials must be renewed with youtube-authorize");
                }

                job.fail(reason.clone());
                if let Err(ledger_err) = self.services.ledger.mark_failed(&job).await {
                    error!(vod_id = %vod_id, error = %ledger_err, "Failed to record failure in ledger");
                }
                metrics::record_job_failed(status.as_str());

                PipelineOutcome::Failed {
                    vod_id,
                    status,
                    reason,
                }
            }
        };

        drop(guard);
        Ok(outcome)
    }

    async fn drive(&self, job: &mut VodJob, logger: &JobLogger) -> WorkerResult<()> {
        loop {
            match job.status {
                VodStatus::Received => {
                    if fs::metadata(&job.source_path).await.is_err() {
                        return Err(WorkerError::SourceMissing(job.source_path.clone()));
                    }
                    let url = self
                        .services
                        .publisher
                        .publish(&job.source_path, &job.vod_id)
                        .await?;
                    job.record_published(url)?;
                    logger.log_progress(
                        job.status,
                        &format!("published via {}: {}", self.services.publisher.name(), job.publish_url),
                    );
                }
                VodStatus::Published => {
                    let project_id = self.services.clips.create_project(&job.publish_url).await?;
                    job.record_project(project_id)?;
                    info!(vod_id = %job.vod_id, project_id = %job.project_id, "Clip project created");
                }
                VodStatus::ProjectCreated => {
                    job.begin_waiting()?;
                }
                VodStatus::AwaitingClips => {
                    let clock = self.services.waiter.clock();
                    let waiting_since = clock.now();
                    let result = self
                        .services
                        .waiter
                        .wait_for_clips(self.services.clips.as_ref(), &job.project_id)
                        .await;
                    metrics::record_clip_wait(
                        clock.now().saturating_duration_since(waiting_since).as_secs_f64(),
                    );
                    job.record_clips(result?)?;
                    logger.log_progress(job.status, &format!("{} clip(s) ready", job.clip_refs.len()));
                }
                VodStatus::ClipsReady => {
                    let paths = self.download(&job.vod_id, &job.clip_refs).await?;
                    job.record_downloads(paths)?;
                    logger.log_progress(job.status, &format!("{} clip(s) downloaded", job.local_clip_paths.len()));
                }
                VodStatus::Downloaded => {
                    self.ensure_downloads(job, logger).await?;
                    self.upload_pending(job, logger).await?;
                    job.finish_uploads()?;
                }
                VodStatus::Uploaded => {
                    let mut done = job.clone();
                    done.complete()?;
                    self.services.ledger.mark_processed(&done).await?;
                    *job = done;
                    return Ok(());
                }
                VodStatus::Done => return Ok(()),
                VodStatus::Failed => {
                    return Err(StatusTransitionError::Regression {
                        from: VodStatus::Failed,
                        to: VodStatus::Received,
                    }
                    .into());
                }
            }

            self.services.ledger.checkpoint(job).await?;
        }
    }

    fn clip_dir(&self, vod_id: &VodId) -> PathBuf {
        self.services.work_dir.join(safe_name(vod_id.as_str()))
    }

    async fn download(&self, vod_id: &VodId, clips: &[ClipRef]) -> WorkerResult<Vec<PathBuf>> {
        let paths = self
            .services
            .downloader
            .download(clips, &self.clip_dir(vod_id))
            .await?;
        metrics::record_clips_downloaded(paths.len());
        Ok(paths)
    }

    /// Re-fetch clips when a resumed job's files are gone.
    async fn ensure_downloads(&self, job: &mut VodJob, logger: &JobLogger) -> WorkerResult<()> {
        let mut missing = false;
        for path in job.local_clip_paths.iter().skip(job.upload_results.len()) {
            if !file_exists(path).await {
                missing = true;
                break;
            }
        }
        if !missing {
            return Ok(());
        }

        logger.log_warning(job.status, "downloaded clips missing, fetching again");
        let paths = self.download(&job.vod_id, &job.clip_refs).await?;
        if paths.len() != job.clip_refs.len() {
            return Err(StatusTransitionError::Misaligned {
                what: "local_clip_paths",
                expected: job.clip_refs.len(),
                actual: paths.len(),
            }
            .into());
        }
        job.local_clip_paths = paths;
        self.services.ledger.checkpoint(job).await?;
        Ok(())
    }

    /// Upload every clip without a recorded result, checkpointing each one.
    async fn upload_pending(&self, job: &mut VodJob, logger: &JobLogger) -> WorkerResult<()> {
        let pending: Vec<(usize, ClipRef, PathBuf)> = job
            .clip_refs
            .iter()
            .cloned()
            .zip(job.local_clip_paths.iter().cloned())
            .enumerate()
            .skip(job.upload_results.len())
            .map(|(index, (clip, path))| (index, clip, path))
            .collect();

        for (index, clip, path) in pending {
            let metadata = UploadMetadata::for_clip(&clip, index + 1, &self.services.metadata);
            let video_id = self.services.uploader.upload(&path, &metadata).await?;
            metrics::record_clip_uploaded();
            logger.log_progress(
                job.status,
                &format!("clip {} uploaded as {} ({})", clip.id, video_id, metadata.title),
            );

            job.record_upload(UploadRecord {
                clip_id: clip.id,
                video_id,
            })?;
            self.services.ledger.checkpoint(job).await?;
        }
        Ok(())
    }
}

async fn file_exists(path: &Path) -> bool {
    fs::metadata(path).await.is_ok_and(|m| m.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_exit_codes() {
        let id = VodId::new("channel1/ep42.ts");
        let done = PipelineOutcome::Completed {
            vod_id: id.clone(),
            video_ids: vec!["v1".into()],
        };
        let skipped = PipelineOutcome::AlreadyProcessed { vod_id: id.clone() };
        let failed = PipelineOutcome::Failed {
            vod_id: id.clone(),
            status: VodStatus::AwaitingClips,
            reason: "Clips not ready after 300s (21 polls)".into(),
        };

        assert!(done.is_success() && skipped.is_success());
        assert!(!failed.is_success());
        assert_eq!(done.exit_code(), 0);
        assert_eq!(skipped.exit_code(), 0);
        assert_eq!(failed.exit_code(), 1);
        assert_eq!(failed.vod_id(), &id);
    }
}
