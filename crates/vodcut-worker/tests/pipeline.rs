//! End-to-end pipeline scenarios against in-memory collaborators.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::{mpsc, watch};

use vodcut_ledger::{FileLedger, Ledger};
use vodcut_models::{ClipRef, DvrEvent, UploadRecord, VodId, VodJob, VodStatus};
use vodcut_opus::{ClipService, ClipServiceError, ClipServiceResult, ClipWaiter, ManualClock, WaiterConfig};
use vodcut_storage::{LocalHttpPublisher, PublishResult, PublishStrategy};
use vodcut_worker::download::clip_file_name;
use vodcut_worker::{
    ClipDownloader, JobExecutor, Pipeline, PipelineOutcome, PipelineServices, TriggerResolver,
    WorkerError, WorkerResult,
};
use vodcut_youtube::{MetadataDefaults, UploadError, UploadMetadata, UploadResult, VideoUploader};

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

struct CountingPublisher {
    base_url: String,
    calls: AtomicUsize,
}

impl CountingPublisher {
    fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl PublishStrategy for CountingPublisher {
    fn name(&self) -> &'static str {
        "counting"
    }

    async fn publish(&self, _source: &Path, vod_id: &VodId) -> PublishResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{}/{}", self.base_url, vod_id))
    }
}

/// Clip service whose poll results are scripted; an exhausted script means
/// "not ready".
#[derive(Default)]
struct ScriptedClips {
    script: Mutex<VecDeque<Vec<ClipRef>>>,
    submitted_urls: Mutex<Vec<String>>,
    fetches: AtomicUsize,
}

impl ScriptedClips {
    fn push(&self, clips: Vec<ClipRef>) {
        self.script.lock().unwrap().push_back(clips);
    }

    fn creates(&self) -> usize {
        self.submitted_urls.lock().unwrap().len()
    }

    fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClipService for ScriptedClips {
    async fn create_project(&self, video_url: &str) -> ClipServiceResult<String> {
        let mut urls = self.submitted_urls.lock().unwrap();
        urls.push(video_url.to_string());
        Ok(if urls.len() == 1 {
            "proj_123".to_string()
        } else {
            format!("proj_123_{}", urls.len())
        })
    }

    async fn fetch_clips(&self, _project_id: &str) -> ClipServiceResult<Vec<ClipRef>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.script.lock().unwrap().pop_front().unwrap_or_default())
    }
}

/// Writes placeholder files instead of fetching.
#[derive(Default)]
struct FakeDownloader {
    calls: AtomicUsize,
    fail_clip: Option<String>,
}

#[async_trait]
impl ClipDownloader for FakeDownloader {
    async fn download(&self, clips: &[ClipRef], dest_dir: &Path) -> WorkerResult<Vec<PathBuf>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::fs::create_dir_all(dest_dir)?;

        let mut paths = Vec::new();
        for (index, clip) in clips.iter().enumerate() {
            if self.fail_clip.as_deref() == Some(clip.id.as_str()) {
                return Err(WorkerError::download(&clip.id, "HTTP 404"));
            }
            let path = dest_dir.join(clip_file_name(index, clip));
            std::fs::write(&path, clip.id.as_bytes())?;
            paths.push(path);
        }
        Ok(paths)
    }
}

/// Records uploads and hands out sequential video ids.
#[derive(Default)]
struct FakeUploader {
    titles: Mutex<Vec<String>>,
    reject_with_auth: bool,
    /// Fail once with a quota error when this many uploads have succeeded
    quota_after: Option<usize>,
    quota_hit: AtomicBool,
}

impl FakeUploader {
    fn uploads(&self) -> usize {
        self.titles.lock().unwrap().len()
    }
}

#[async_trait]
impl VideoUploader for FakeUploader {
    async fn upload(&self, path: &Path, metadata: &UploadMetadata) -> UploadResult<String> {
        if self.reject_with_auth {
            return Err(UploadError::Auth("invalid_grant".to_string()));
        }
        assert!(path.is_file(), "uploading a file that does not exist: {}", path.display());

        let mut titles = self.titles.lock().unwrap();
        if self.quota_after == Some(titles.len()) && !self.quota_hit.swap(true, Ordering::SeqCst) {
            return Err(UploadError::Quota {
                message: "quotaExceeded".to_string(),
                retry_after: None,
            });
        }
        titles.push(metadata.title.clone());
        Ok(format!("yt_{}", titles.len()))
    }
}

fn clip(id: &str, title: Option<&str>) -> ClipRef {
    ClipRef {
        id: id.to_string(),
        download_url: format!("https://cdn.opus.pro/{}.mp4", id),
        title: title.map(str::to_string),
        description: None,
        hashtags: None,
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    dir: TempDir,
    ledger: Arc<FileLedger>,
    clips: Arc<ScriptedClips>,
    downloader: Arc<FakeDownloader>,
    uploader: Arc<FakeUploader>,
    clock: Arc<ManualClock>,
}

impl Harness {
    fn new() -> Self {
        Self::with(FakeDownloader::default(), FakeUploader::default())
    }

    fn with(downloader: FakeDownloader, uploader: FakeUploader) -> Self {
        let dir = TempDir::new().unwrap();
        let ledger = Arc::new(FileLedger::open(dir.path().join("processed_vods.json")).unwrap());
        Self {
            dir,
            ledger,
            clips: Arc::new(ScriptedClips::default()),
            downloader: Arc::new(downloader),
            uploader: Arc::new(uploader),
            clock: Arc::new(ManualClock::new()),
        }
    }

    fn watch_dir(&self) -> PathBuf {
        self.dir.path().join("vods")
    }

    /// Create a recording under the watch directory.
    fn recording(&self, relative: &str) -> PathBuf {
        let path = self.watch_dir().join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"mpeg-ts bytes").unwrap();
        path
    }

    fn local_publisher(&self) -> Arc<dyn PublishStrategy> {
        Arc::new(LocalHttpPublisher::new(
            self.dir.path().join("public"),
            "https://host/public_vods",
        ))
    }

    fn pipeline(&self, publisher: Arc<dyn PublishStrategy>) -> Pipeline<Arc<ManualClock>> {
        Pipeline::new(PipelineServices {
            ledger: self.ledger.clone(),
            publisher,
            clips: self.clips.clone(),
            waiter: ClipWaiter::new(WaiterConfig::default(), self.clock.clone()),
            downloader: self.downloader.clone(),
            uploader: self.uploader.clone(),
            metadata: MetadataDefaults::default(),
            work_dir: self.dir.path().join("downloads"),
        })
    }

    fn vod_id(&self, source: &Path) -> VodId {
        VodId::from_source(source, Some(&self.watch_dir()))
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_vod_flows_through_to_done() {
    let h = Harness::new();
    let source = h.recording("channel1/ep42.ts");
    let vod_id = h.vod_id(&source);
    assert_eq!(vod_id.as_str(), "channel1/ep42.ts");

    h.clips.push(vec![]);
    h.clips.push(vec![]);
    h.clips.push(vec![clip("clipA", Some("Best moment")), clip("clipB", None)]);

    let outcome = h
        .pipeline(h.local_publisher())
        .process(vod_id.clone(), source)
        .await
        .unwrap();

    assert_eq!(
        outcome,
        PipelineOutcome::Completed {
            vod_id: vod_id.clone(),
            video_ids: vec!["yt_1".to_string(), "yt_2".to_string()],
        }
    );
    assert_eq!(
        *h.clips.submitted_urls.lock().unwrap(),
        vec!["https://host/public_vods/channel1/ep42.ts".to_string()]
    );
    assert!(h.dir.path().join("public/channel1/ep42.ts").is_file());
    assert_eq!(h.clips.fetches(), 3);
    assert_eq!(h.clock.elapsed(), Duration::from_secs(30));
    assert_eq!(
        *h.uploader.titles.lock().unwrap(),
        vec!["Best moment".to_string(), "Short clip #2".to_string()]
    );

    let entry = h.ledger.entry(&vod_id).await.unwrap().unwrap();
    assert_eq!(entry.status, VodStatus::Done);
    assert_eq!(entry.video_ids, vec!["yt_1", "yt_2"]);
    assert!(entry.checkpoint.is_none());
    assert!(h.ledger.has_processed(&vod_id).await.unwrap());

    let persisted = std::fs::read_to_string(h.dir.path().join("processed_vods.json")).unwrap();
    assert!(persisted.contains("channel1/ep42.ts"));
    assert!(persisted.contains("\"DONE\""));
}

#[tokio::test]
async fn test_retrigger_of_done_vod_makes_no_calls() {
    let h = Harness::new();
    let source = h.recording("channel1/ep42.ts");
    let vod_id = h.vod_id(&source);
    h.clips.push(vec![clip("clipA", None)]);

    let publisher = Arc::new(CountingPublisher::new("https://host/public_vods"));
    let pipeline = h.pipeline(publisher.clone());

    let first = pipeline.process(vod_id.clone(), source.clone()).await.unwrap();
    assert!(matches!(first, PipelineOutcome::Completed { .. }));

    let second = pipeline.process(vod_id.clone(), source).await.unwrap();
    assert_eq!(second, PipelineOutcome::AlreadyProcessed { vod_id });
    assert!(second.is_success());

    assert_eq!(publisher.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.clips.creates(), 1);
    assert_eq!(h.clips.fetches(), 1);
    assert_eq!(h.downloader.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.uploader.uploads(), 1);
}

#[tokio::test]
async fn test_clip_timeout_fails_and_allows_fresh_retry() {
    let h = Harness::new();
    let source = h.recording("channel1/ep42.ts");
    let vod_id = h.vod_id(&source);

    let publisher = Arc::new(CountingPublisher::new("https://host/public_vods"));
    let pipeline = h.pipeline(publisher.clone());

    let outcome = pipeline.process(vod_id.clone(), source.clone()).await.unwrap();
    match &outcome {
        PipelineOutcome::Failed { status, reason, .. } => {
            assert_eq!(*status, VodStatus::AwaitingClips);
            assert!(reason.contains("Clips not ready after 300s"), "{reason}");
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(outcome.exit_code(), 1);
    assert_eq!(h.clock.elapsed(), Duration::from_secs(300));
    assert_eq!(h.downloader.calls.load(Ordering::SeqCst), 0);

    let entry = h.ledger.entry(&vod_id).await.unwrap().unwrap();
    assert_eq!(entry.status, VodStatus::Failed);
    assert!(!h.ledger.has_processed(&vod_id).await.unwrap());

    // A re-trigger starts over: publish and project creation happen again.
    h.clips.push(vec![clip("clipA", None)]);
    let retry = pipeline.process(vod_id.clone(), source).await.unwrap();
    assert!(matches!(retry, PipelineOutcome::Completed { .. }));
    assert_eq!(publisher.calls.load(Ordering::SeqCst), 2);
    assert_eq!(h.clips.creates(), 2);
    assert!(h.ledger.has_processed(&vod_id).await.unwrap());
}

#[tokio::test]
async fn test_download_failure_never_marks_done() {
    let h = Harness::with(
        FakeDownloader {
            fail_clip: Some("clipB".to_string()),
            ..Default::default()
        },
        FakeUploader::default(),
    );
    let source = h.recording("channel1/ep42.ts");
    let vod_id = h.vod_id(&source);
    h.clips.push(vec![clip("clipA", None), clip("clipB", None)]);

    let outcome = h
        .pipeline(h.local_publisher())
        .process(vod_id.clone(), source)
        .await
        .unwrap();

    match outcome {
        PipelineOutcome::Failed { status, reason, .. } => {
            assert_eq!(status, VodStatus::ClipsReady);
            assert!(reason.contains("clipB"), "{reason}");
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(h.uploader.uploads(), 0);
    assert!(!h.ledger.has_processed(&vod_id).await.unwrap());
}

#[tokio::test]
async fn test_upload_auth_failure_fails_job() {
    let h = Harness::with(
        FakeDownloader::default(),
        FakeUploader {
            reject_with_auth: true,
            ..Default::default()
        },
    );
    let source = h.recording("channel1/ep42.ts");
    let vod_id = h.vod_id(&source);
    h.clips.push(vec![clip("clipA", None)]);

    let outcome = h
        .pipeline(h.local_publisher())
        .process(vod_id.clone(), source)
        .await
        .unwrap();

    match outcome {
        PipelineOutcome::Failed { status, reason, .. } => {
            assert_eq!(status, VodStatus::Downloaded);
            assert!(reason.contains("Authentication failed"), "{reason}");
        }
        other => panic!("expected failure, got {other:?}"),
    }
    let entry = h.ledger.entry(&vod_id).await.unwrap().unwrap();
    assert_eq!(entry.status, VodStatus::Failed);
    assert!(entry.failure_reason.is_some());
}

#[tokio::test]
async fn test_failed_vod_is_retried_from_scratch() {
    let h = Harness::with(
        FakeDownloader::default(),
        FakeUploader {
            quota_after: Some(1),
            ..Default::default()
        },
    );
    let source = h.recording("channel1/ep42.ts");
    let vod_id = h.vod_id(&source);
    h.clips.push(vec![clip("clipA", Some("First")), clip("clipB", Some("Second"))]);
    let pipeline = h.pipeline(h.local_publisher());

    let outcome = pipeline.process(vod_id.clone(), source.clone()).await.unwrap();
    match &outcome {
        PipelineOutcome::Failed { status, reason, .. } => {
            assert_eq!(*status, VodStatus::Downloaded);
            assert!(reason.contains("quota"), "{reason}");
        }
        other => panic!("expected failure, got {other:?}"),
    }
    let entry = h.ledger.entry(&vod_id).await.unwrap().unwrap();
    assert_eq!(entry.status, VodStatus::Failed);
    assert!(entry.checkpoint.is_none());

    // The FAILED entry carries no progress, so the first clip goes up again.
    h.clips.push(vec![clip("clipA", Some("First")), clip("clipB", Some("Second"))]);
    let retry = pipeline.process(vod_id.clone(), source).await.unwrap();
    assert!(matches!(retry, PipelineOutcome::Completed { .. }), "{retry:?}");
    assert_eq!(
        *h.uploader.titles.lock().unwrap(),
        vec!["First".to_string(), "First".to_string(), "Second".to_string()]
    );
    assert_eq!(h.clips.creates(), 2);
}

#[tokio::test]
async fn test_missing_source_fails_before_publishing() {
    let h = Harness::new();
    let source = h.watch_dir().join("channel1/missing.ts");
    let vod_id = h.vod_id(&source);

    let publisher = Arc::new(CountingPublisher::new("https://host/public_vods"));
    let outcome = h
        .pipeline(publisher.clone())
        .process(vod_id, source)
        .await
        .unwrap();

    assert!(matches!(
        outcome,
        PipelineOutcome::Failed {
            status: VodStatus::Received,
            ..
        }
    ));
    assert_eq!(publisher.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_publish_strategies_are_interchangeable() {
    let h = Harness::new();
    let local_source = h.recording("channel1/ep42.ts");
    let cloud_source = h.recording("channel2/ep7.mkv");
    h.clips.push(vec![clip("clipA", None)]);
    h.clips.push(vec![clip("clipB", None)]);

    let local = h
        .pipeline(h.local_publisher())
        .process(h.vod_id(&local_source), local_source)
        .await
        .unwrap();
    let cloud = h
        .pipeline(Arc::new(CountingPublisher::new("https://bucket.r2.dev/vods")))
        .process(h.vod_id(&cloud_source), cloud_source)
        .await
        .unwrap();

    assert!(local.is_success() && cloud.is_success());
    assert_eq!(
        *h.clips.submitted_urls.lock().unwrap(),
        vec![
            "https://host/public_vods/channel1/ep42.ts".to_string(),
            "https://bucket.r2.dev/vods/channel2/ep7.mkv".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_resume_skips_completed_work() {
    let h = Harness::new();
    let source = h.recording("channel1/ep42.ts");
    let vod_id = h.vod_id(&source);

    // Simulate a run that stopped after uploading the first of two clips.
    let clips = vec![clip("clipA", None), clip("clipB", None)];
    let clip_dir = h.dir.path().join("downloads/channel1_ep42.ts");
    let paths = FakeDownloader::default().download(&clips, &clip_dir).await.unwrap();

    let mut job = VodJob::new(vod_id.clone(), &source);
    job.record_published("https://host/public_vods/channel1/ep42.ts").unwrap();
    job.record_project("proj_123").unwrap();
    job.begin_waiting().unwrap();
    job.record_clips(clips).unwrap();
    job.record_downloads(paths).unwrap();
    job.record_upload(UploadRecord {
        clip_id: "clipA".to_string(),
        video_id: "yt_earlier".to_string(),
    })
    .unwrap();
    h.ledger.checkpoint(&job).await.unwrap();

    let publisher = Arc::new(CountingPublisher::new("https://host/public_vods"));
    let outcome = h
        .pipeline(publisher.clone())
        .process(vod_id.clone(), source)
        .await
        .unwrap();

    assert_eq!(
        outcome,
        PipelineOutcome::Completed {
            vod_id: vod_id.clone(),
            video_ids: vec!["yt_earlier".to_string(), "yt_1".to_string()],
        }
    );
    assert_eq!(publisher.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.clips.creates(), 0);
    assert_eq!(h.clips.fetches(), 0);
    assert_eq!(h.downloader.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.uploader.uploads(), 1);
}

#[tokio::test]
async fn test_resume_refetches_missing_downloads() {
    let h = Harness::new();
    let source = h.recording("channel1/ep42.ts");
    let vod_id = h.vod_id(&source);

    let clips = vec![clip("clipA", None)];
    let mut job = VodJob::new(vod_id.clone(), &source);
    job.record_published("https://host/public_vods/channel1/ep42.ts").unwrap();
    job.record_project("proj_123").unwrap();
    job.begin_waiting().unwrap();
    job.record_clips(clips).unwrap();
    job.record_downloads(vec![h.dir.path().join("gone/01_clipA.mp4")]).unwrap();
    h.ledger.checkpoint(&job).await.unwrap();

    let outcome = h
        .pipeline(h.local_publisher())
        .process(vod_id, source)
        .await
        .unwrap();

    assert!(matches!(outcome, PipelineOutcome::Completed { .. }));
    assert_eq!(h.downloader.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.uploader.uploads(), 1);
}

#[tokio::test]
async fn test_clip_service_error_fails_job() {
    struct BrokenClips;

    #[async_trait]
    impl ClipService for BrokenClips {
        async fn create_project(&self, _video_url: &str) -> ClipServiceResult<String> {
            Err(ClipServiceError::from_http_status(401, "bad token"))
        }

        async fn fetch_clips(&self, _project_id: &str) -> ClipServiceResult<Vec<ClipRef>> {
            Ok(vec![])
        }
    }

    let h = Harness::new();
    let source = h.recording("channel1/ep42.ts");
    let vod_id = h.vod_id(&source);

    let pipeline = Pipeline::new(PipelineServices {
        ledger: h.ledger.clone(),
        publisher: h.local_publisher(),
        clips: Arc::new(BrokenClips),
        waiter: ClipWaiter::new(WaiterConfig::default(), h.clock.clone()),
        downloader: h.downloader.clone(),
        uploader: h.uploader.clone(),
        metadata: MetadataDefaults::default(),
        work_dir: h.dir.path().join("downloads"),
    });

    let outcome = pipeline.process(vod_id, source).await.unwrap();
    match outcome {
        PipelineOutcome::Failed { status, reason, .. } => {
            assert_eq!(status, VodStatus::Published);
            assert!(reason.contains("401"), "{reason}");
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_webhook_run_once_handles_first_resolvable_event() {
    let h = Harness::new();
    let source = h.recording("channel1/ep42.ts");
    h.clips.push(vec![clip("clipA", None)]);

    let executor = JobExecutor::new(
        Arc::new(h.pipeline(h.local_publisher())),
        TriggerResolver::new(h.watch_dir(), vec!["ts".into(), "mp4".into(), "mkv".into()]),
        1,
        true,
    );

    let (events_tx, events_rx) = mpsc::channel(8);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    events_tx
        .send(DvrEvent::from_value(&json!({"action": "start_download"})))
        .await
        .unwrap();
    events_tx
        .send(DvrEvent::from_value(&json!({
            "action": "end_download",
            "data": {"vod": {"basename": "no-such-recording"}}
        })))
        .await
        .unwrap();
    events_tx
        .send(DvrEvent::from_value(&json!({
            "action": "end_download",
            "data": {"vod": {"path_downloaded_vod": source.to_string_lossy()}}
        })))
        .await
        .unwrap();

    let outcome = executor.run_webhook(events_rx, shutdown_rx).await.unwrap();
    match outcome {
        Some(PipelineOutcome::Completed { vod_id, video_ids }) => {
            assert_eq!(vod_id.as_str(), "channel1/ep42.ts");
            assert_eq!(video_ids, vec!["yt_1"]);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn test_webhook_stops_when_events_end() {
    let h = Harness::new();
    let executor = JobExecutor::new(
        Arc::new(h.pipeline(h.local_publisher())),
        TriggerResolver::new(h.watch_dir(), vec!["ts".into()]),
        2,
        false,
    );

    let (events_tx, events_rx) = mpsc::channel(1);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    drop(events_tx);

    let outcome = executor.run_webhook(events_rx, shutdown_rx).await.unwrap();
    assert!(outcome.is_none());
}

#[tokio::test]
async fn test_direct_file_uses_explicit_id() {
    let h = Harness::new();
    let source = h.recording("channel1/ep42.ts");
    h.clips.push(vec![clip("clipA", None)]);

    let executor = JobExecutor::new(
        Arc::new(h.pipeline(h.local_publisher())),
        TriggerResolver::new(h.watch_dir(), vec!["ts".into()]),
        1,
        true,
    );

    let outcome = executor.run_file(&source, Some("manual/ep42")).await.unwrap();
    assert_eq!(outcome.vod_id().as_str(), "manual/ep42");
    assert_eq!(outcome.exit_code(), 0);
    assert!(h.ledger.has_processed(&VodId::new("manual/ep42")).await.unwrap());
}
