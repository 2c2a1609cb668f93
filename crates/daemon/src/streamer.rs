//! Stream executor
//!
//! Runs one locator's transcode from a pool slot to a terminal state. The
//! pool is a tokio Semaphore sized by the concurrency plan; each admitted job
//! waits for a permit, refreshes its download URL, spawns the transcoder and
//! turns its log output into persisted, published state.

use crate::config::Config;
use crate::locator::{current_timestamp_ms, JobStatus, LocatorId, StreamLocator};
use crate::metrics::SharedMetrics;
use crate::progress::ProgressLogAdapter;
use crate::publisher::StatusPublisher;
use crate::resolver::{ResolveError, UrlResolver};
use crate::store::{StoreError, StreamStore};
use crate::transcode::{
    parse_additional_args, FfmpegTask, ProcessExit, TranscodeError, TranscodeRequest,
};
use crate::ConcurrencyPlan;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::{watch, AcquireError, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Error type for stream execution
#[derive(Debug, Error)]
pub enum StreamJobError {
    #[error("URL refresh failed: {0}")]
    Resolve(#[from] ResolveError),

    #[error("Transcode failed: {0}")]
    Transcode(#[from] TranscodeError),

    #[error("Failed to persist locator state: {0}")]
    Store(#[from] StoreError),

    #[error("Stream pool is closed")]
    PoolClosed(#[from] AcquireError),
}

/// How a stream job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed,
    Stopped,
    Failed,
}

/// Control block shared between the manager and one running job.
#[derive(Debug)]
pub struct ActiveStream {
    locator_id: LocatorId,
    cancel: CancellationToken,
    kill_claimed: AtomicBool,
    done: watch::Sender<Option<StreamOutcome>>,
}

impl ActiveStream {
    pub fn new(locator_id: LocatorId) -> Arc<Self> {
        let (done, _) = watch::channel(None);
        Arc::new(Self {
            locator_id,
            cancel: CancellationToken::new(),
            kill_claimed: AtomicBool::new(false),
            done,
        })
    }

    pub fn locator_id(&self) -> LocatorId {
        self.locator_id
    }

    /// Outcome once the job has ended.
    pub fn outcome(&self) -> Option<StreamOutcome> {
        *self.done.borrow()
    }

    pub fn is_finished(&self) -> bool {
        self.outcome().is_some()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Request a stop and wait for the job to reach a terminal state.
    ///
    /// Returns true only for the first caller, and only if the job actually
    /// ended stopped. A job that completed or failed first, or one another
    /// caller is already killing, yields false.
    pub async fn kill(&self) -> bool {
        let claimed = !self.kill_claimed.swap(true, Ordering::SeqCst);
        self.cancel.cancel();

        let mut done = self.done.subscribe();
        let outcome = done.wait_for(|o| o.is_some()).await.ok().and_then(|o| *o);
        claimed && outcome == Some(StreamOutcome::Stopped)
    }

    fn finish(&self, outcome: StreamOutcome) {
        self.done.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(outcome);
            true
        });
    }
}

/// Callback run exactly once when a job ends, whatever the path out.
pub type OnFinish = Box<dyn FnOnce() + Send + 'static>;

/// Marks the job finished and runs its hook even if the job future is
/// dropped or panics.
struct FinishGuard {
    job: Arc<ActiveStream>,
    hook: Option<OnFinish>,
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        if !self.job.is_finished() {
            self.job.finish(StreamOutcome::Failed);
        }
        if let Some(hook) = self.hook.take() {
            hook();
        }
    }
}

/// Configuration for the stream executor
#[derive(Debug, Clone)]
pub struct StreamerConfig {
    pub executable: PathBuf,
    pub base_args: Vec<String>,
    pub additional_args: Vec<(String, String)>,
    /// Copy transcoder output into `ffmpeg-<unix_ms>.log` beside the manifest
    pub log_to_file: bool,
    /// Minimum gap between persisted progress-only updates
    pub progress_persist_interval: Duration,
}

impl StreamerConfig {
    pub fn from_config(cfg: &Config) -> Result<Self, TranscodeError> {
        Ok(Self {
            executable: cfg.transcoder.executable.clone(),
            base_args: cfg.transcoder.base_args.clone(),
            additional_args: parse_additional_args(&cfg.transcoder.additional_args)?,
            log_to_file: cfg.transcoder.log_to_file,
            progress_persist_interval: Duration::from_millis(
                cfg.streaming.progress_persist_interval_ms,
            ),
        })
    }
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("ffmpeg"),
            base_args: vec!["-v".into(), "info".into(), "-y".into()],
            additional_args: Vec::new(),
            log_to_file: false,
            progress_persist_interval: Duration::from_secs(1),
        }
    }
}

/// Stream executor that runs transcodes with concurrency limiting
///
/// Uses a tokio Semaphore to limit the number of concurrent transcoders
/// according to the concurrency plan.
pub struct Streamer {
    semaphore: Arc<Semaphore>,
    concurrency_plan: ConcurrencyPlan,
    store: Arc<dyn StreamStore>,
    resolver: Arc<dyn UrlResolver>,
    publisher: StatusPublisher,
    metrics: SharedMetrics,
    config: StreamerConfig,
}

impl Streamer {
    pub fn new(
        plan: ConcurrencyPlan,
        store: Arc<dyn StreamStore>,
        resolver: Arc<dyn UrlResolver>,
        publisher: StatusPublisher,
        metrics: SharedMetrics,
        config: StreamerConfig,
    ) -> Self {
        let permits = plan.max_concurrent_streams.max(1) as usize;
        Self {
            semaphore: Arc::new(Semaphore::new(permits)),
            concurrency_plan: plan,
            store,
            resolver,
            publisher,
            metrics,
            config,
        }
    }

    /// Get the number of available permits (free transcoder slots)
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn concurrency_plan(&self) -> &ConcurrencyPlan {
        &self.concurrency_plan
    }

    pub fn config(&self) -> &StreamerConfig {
        &self.config
    }

    pub fn publisher(&self) -> &StatusPublisher {
        &self.publisher
    }

    pub fn metrics(&self) -> &SharedMetrics {
        &self.metrics
    }

    /// Acquire a permit, waiting until a slot frees up.
    pub async fn acquire_permit(&self) -> Result<OwnedSemaphorePermit, AcquireError> {
        self.semaphore.clone().acquire_owned().await
    }

    /// Try to acquire a permit without waiting
    ///
    /// Returns None if no permits are available.
    pub fn try_acquire_permit(&self) -> Option<OwnedSemaphorePermit> {
        self.semaphore.clone().try_acquire_owned().ok()
    }

    /// Run a job to a terminal state
    ///
    /// The locator must already be admitted (QUEUED). The job's terminal
    /// state is persisted and published before `job` reports its outcome,
    /// and `on_finish` runs after that on every path out of this method.
    pub async fn stream(
        &self,
        mut locator: StreamLocator,
        job: Arc<ActiveStream>,
        on_finish: Option<OnFinish>,
    ) -> Result<StreamOutcome, StreamJobError> {
        let _guard = FinishGuard {
            job: job.clone(),
            hook: on_finish,
        };

        let result = match self.run(&mut locator, &job).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                warn!(locator_id = locator.id, error = %e, "Stream failed");
                locator.fail(&e.to_string());
                if let Err(store_err) = self.commit(&locator).await {
                    error!(locator_id = locator.id, error = %store_err, "Failed to persist error state");
                }
                Err(e)
            }
        };

        let outcome = result.as_ref().copied().unwrap_or(StreamOutcome::Failed);
        self.count_outcome(outcome).await;
        job.finish(outcome);
        result
    }

    async fn run(
        &self,
        locator: &mut StreamLocator,
        job: &ActiveStream,
    ) -> Result<StreamOutcome, StreamJobError> {
        let _permit = tokio::select! {
            permit = self.acquire_permit() => permit?,
            _ = job.cancel.cancelled() => return self.stop(locator).await,
        };

        self.transition(locator, JobStatus::Started, 0.0).await?;
        info!(locator_id = locator.id, video_file_id = %locator.video_file.id, "Stream started");

        let uri = tokio::select! {
            uri = self.resolver.refresh(&locator.video_file) => uri?,
            _ = job.cancel.cancelled() => return self.stop(locator).await,
        };

        self.transition(locator, JobStatus::Buffering, 0.0).await?;

        let request = TranscodeRequest::single(uri, locator.playlist_path.clone())
            .with_additional_args(self.config.additional_args.clone());
        let task = FfmpegTask::new(
            self.config.executable.clone(),
            self.config.base_args.clone(),
            request,
        );
        task.prepare()?;
        if job.is_cancelled() {
            return self.stop(locator).await;
        }

        let mut process = task.start(job.cancel.clone())?;
        debug!(locator_id = locator.id, pid = ?process.pid(), "Transcoder running");

        let mut transcoder_log = self.open_transcoder_log(locator).await;
        let mut adapter = ProgressLogAdapter::new();
        let mut last_persist = Instant::now();

        loop {
            let line = tokio::select! {
                line = process.next_line() => line,
                _ = job.cancel.cancelled() => break,
            };
            let Some(line) = line else { break };

            let write_failed = match transcoder_log.as_mut() {
                Some(writer) => writer.write_all(format!("{line}\n").as_bytes()).await.err(),
                None => None,
            };
            if let Some(e) = write_failed {
                warn!(locator_id = locator.id, error = %e, "Transcoder log write failed, disabling");
                transcoder_log = None;
            }

            adapter.observe(&line);
            let current = locator.state.completion_ratio.max(0.0);
            let ratio = adapter
                .completion_ratio()
                .map(|r| r.clamp(0.0, 1.0))
                .unwrap_or(current)
                .max(current);

            let status_changed = locator.status() != JobStatus::Streaming;
            if !status_changed && ratio <= current {
                continue;
            }

            locator.update_state(JobStatus::Streaming, ratio);
            if status_changed || last_persist.elapsed() >= self.config.progress_persist_interval {
                self.store.save_locator(locator)?;
                last_persist = Instant::now();
            }
            self.publisher.publish(locator);
            self.update_stream_metrics(locator).await;
        }

        if let Some(mut writer) = transcoder_log {
            if let Err(e) = writer.flush().await {
                debug!(locator_id = locator.id, error = %e, "Failed to flush transcoder log");
            }
        }

        match process.finish().await? {
            ProcessExit::Completed => self.complete(locator).await,
            ProcessExit::Killed => self.stop(locator).await,
        }
    }

    /// Mark completed unless the stored state already moved past it.
    async fn complete(&self, locator: &mut StreamLocator) -> Result<StreamOutcome, StreamJobError> {
        let persisted = self
            .store
            .find_locator(locator.id)?
            .map(|l| l.status())
            .unwrap_or_else(|| locator.status());

        if persisted >= JobStatus::Stopped {
            debug!(locator_id = locator.id, status = %persisted, "Not overwriting terminal state");
            return Ok(StreamOutcome::Stopped);
        }

        self.transition(locator, JobStatus::Completed, 1.0).await?;
        info!(locator_id = locator.id, "Stream completed");
        Ok(StreamOutcome::Completed)
    }

    async fn stop(&self, locator: &mut StreamLocator) -> Result<StreamOutcome, StreamJobError> {
        locator.stop();
        self.commit(locator).await?;
        info!(locator_id = locator.id, ratio = locator.state.completion_ratio, "Stream stopped");
        Ok(StreamOutcome::Stopped)
    }

    async fn transition(
        &self,
        locator: &mut StreamLocator,
        status: JobStatus,
        ratio: f64,
    ) -> Result<(), StoreError> {
        locator.update_state(status, ratio);
        self.commit(locator).await
    }

    /// Persist, publish and record the locator's current state.
    async fn commit(&self, locator: &StreamLocator) -> Result<(), StoreError> {
        self.store.save_locator(locator)?;
        self.publisher.publish(locator);
        self.update_stream_metrics(locator).await;
        Ok(())
    }

    async fn open_transcoder_log(&self, locator: &StreamLocator) -> Option<BufWriter<File>> {
        if !self.config.log_to_file {
            return None;
        }
        let path = locator
            .directory()
            .join(format!("ffmpeg-{}.log", current_timestamp_ms()));
        match File::create(&path).await {
            Ok(file) => Some(BufWriter::new(file)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to create transcoder log");
                None
            }
        }
    }

    /// Update stream metrics in shared state
    async fn update_stream_metrics(&self, locator: &StreamLocator) {
        let mut metrics = self.metrics.write().await;
        metrics.record_stream(locator);
    }

    async fn count_outcome(&self, outcome: StreamOutcome) {
        let mut metrics = self.metrics.write().await;
        match outcome {
            StreamOutcome::Completed => metrics.completed_streams += 1,
            StreamOutcome::Stopped => metrics.stopped_streams += 1,
            StreamOutcome::Failed => metrics.failed_streams += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::new_shared_metrics;
    use crate::resolver::PassthroughResolver;
    use crate::store::JsonFileStore;
    use crate::test_support::{
        admitted_locator, failing_resolver, streamer_config, wait_for_status, write_script,
        LONG_RUNNING_SCRIPT, SUCCESS_SCRIPT,
    };
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        root: PathBuf,
        store: Arc<JsonFileStore>,
        publisher: StatusPublisher,
        metrics: SharedMetrics,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let root = dir.path().to_path_buf();
            Self {
                _dir: dir,
                root,
                store: Arc::new(JsonFileStore::ephemeral()),
                publisher: StatusPublisher::new("/video-stream-status", 64),
                metrics: new_shared_metrics(),
            }
        }

        fn streamer(&self, script_body: &str, resolver: Arc<dyn UrlResolver>) -> Streamer {
            let script = write_script(&self.root, "transcoder.sh", script_body);
            Streamer::new(
                ConcurrencyPlan::fixed(2),
                self.store.clone(),
                resolver,
                self.publisher.clone(),
                self.metrics.clone(),
                streamer_config(&script),
            )
        }
    }

    #[tokio::test]
    async fn test_executor_initial_permits() {
        let fixture = Fixture::new();
        let streamer = fixture.streamer(SUCCESS_SCRIPT, Arc::new(PassthroughResolver));
        assert_eq!(streamer.available_permits(), 2);
        assert_eq!(streamer.concurrency_plan().max_concurrent_streams, 2);
    }

    #[tokio::test]
    async fn test_semaphore_permit_limiting() {
        let fixture = Fixture::new();
        let streamer = fixture.streamer(SUCCESS_SCRIPT, Arc::new(PassthroughResolver));

        let permit1 = streamer.try_acquire_permit();
        assert!(permit1.is_some());
        let permit2 = streamer.try_acquire_permit();
        assert!(permit2.is_some());
        assert!(streamer.try_acquire_permit().is_none());

        drop(permit1);
        assert_eq!(streamer.available_permits(), 1);
    }

    #[test]
    fn test_streamer_config_rejects_odd_additional_args() {
        let mut cfg = Config::default();
        cfg.transcoder.additional_args = vec!["-hls_time".into()];
        assert!(matches!(
            StreamerConfig::from_config(&cfg),
            Err(TranscodeError::AdditionalArgs(1))
        ));

        cfg.transcoder.additional_args = vec!["-hls_time".into(), "4".into()];
        let config = StreamerConfig::from_config(&cfg).unwrap();
        assert_eq!(config.additional_args, vec![("-hls_time".into(), "4".into())]);
    }

    #[tokio::test]
    async fn test_successful_stream_completes() {
        let fixture = Fixture::new();
        let streamer = fixture.streamer(SUCCESS_SCRIPT, Arc::new(PassthroughResolver));
        let locator = admitted_locator(fixture.store.as_ref(), &fixture.root);
        let mut updates = fixture.publisher.subscribe();

        let job = ActiveStream::new(locator.id);
        let outcome = streamer.stream(locator.clone(), job.clone(), None).await.unwrap();

        assert_eq!(outcome, StreamOutcome::Completed);
        assert_eq!(job.outcome(), Some(StreamOutcome::Completed));

        let stored = fixture.store.find_locator(locator.id).unwrap().unwrap();
        assert_eq!(stored.status(), JobStatus::Completed);
        assert_eq!(stored.state.completion_ratio, 1.0);
        let manifest = std::fs::read_to_string(&stored.playlist_path).unwrap();
        assert_eq!(manifest.trim_end(), "#EXTM3U");

        let mut seen = Vec::new();
        while let Ok(message) = updates.try_recv() {
            seen.extend(message.status);
        }
        assert_eq!(seen.first(), Some(&JobStatus::Started));
        assert!(seen.contains(&JobStatus::Buffering));
        assert!(seen.contains(&JobStatus::Streaming));
        assert_eq!(seen.last(), Some(&JobStatus::Completed));

        let metrics = fixture.metrics.read().await;
        assert_eq!(metrics.completed_streams, 1);
        assert_eq!(metrics.running_streams, 0);
    }

    #[tokio::test]
    async fn test_progress_never_decreases() {
        let fixture = Fixture::new();
        let script = r#"
echo "  Duration: 00:00:10.00, start: 0.000000" >&2
echo "frame=1 time=00:00:06.00 bitrate=N/A" >&2
echo "frame=2 time=00:00:03.00 bitrate=N/A" >&2
echo "frame=3 time=00:00:20.00 bitrate=N/A" >&2
exit 0
"#;
        let streamer = fixture.streamer(script, Arc::new(PassthroughResolver));
        let locator = admitted_locator(fixture.store.as_ref(), &fixture.root);
        let mut updates = fixture.publisher.subscribe();

        streamer
            .stream(locator, ActiveStream::new(0), None)
            .await
            .unwrap();

        let mut ratios = Vec::new();
        while let Ok(message) = updates.try_recv() {
            if message.status == Some(JobStatus::Streaming) {
                ratios.push(message.completion_ratio);
            }
        }
        assert!(ratios.windows(2).all(|w| w[0] <= w[1]), "ratios: {:?}", ratios);
        assert!(ratios.iter().all(|r| (0.0..=1.0).contains(r)));
        assert_eq!(ratios.last(), Some(&1.0));
    }

    #[tokio::test]
    async fn test_failing_transcoder_marks_error() {
        let fixture = Fixture::new();
        let streamer = fixture.streamer(
            "echo 'Invalid data found when processing input' >&2\nexit 1",
            Arc::new(PassthroughResolver),
        );
        let locator = admitted_locator(fixture.store.as_ref(), &fixture.root);

        let job = ActiveStream::new(locator.id);
        let result = streamer.stream(locator.clone(), job.clone(), None).await;

        assert!(matches!(
            result,
            Err(StreamJobError::Transcode(TranscodeError::Failed(1)))
        ));
        assert_eq!(job.outcome(), Some(StreamOutcome::Failed));

        let stored = fixture.store.find_locator(locator.id).unwrap().unwrap();
        assert_eq!(stored.status(), JobStatus::Error);
        assert_eq!(stored.state.completion_ratio, -1.0);
        assert!(stored.state.error.unwrap().contains("exit code: 1"));
        assert_eq!(fixture.metrics.read().await.failed_streams, 1);
    }

    #[tokio::test]
    async fn test_resolver_failure_never_spawns() {
        let fixture = Fixture::new();
        let marker = fixture.root.join("spawned");
        let streamer = fixture.streamer(
            &format!("touch '{}'\nexit 0", marker.display()),
            failing_resolver(),
        );
        let locator = admitted_locator(fixture.store.as_ref(), &fixture.root);

        let result = streamer.stream(locator.clone(), ActiveStream::new(locator.id), None).await;

        assert!(matches!(result, Err(StreamJobError::Resolve(_))));
        assert!(!marker.exists());
        let stored = fixture.store.find_locator(locator.id).unwrap().unwrap();
        assert_eq!(stored.status(), JobStatus::Error);
    }

    #[tokio::test]
    async fn test_kill_stops_running_transcoder() {
        let fixture = Fixture::new();
        let streamer = Arc::new(fixture.streamer(LONG_RUNNING_SCRIPT, Arc::new(PassthroughResolver)));
        let locator = admitted_locator(fixture.store.as_ref(), &fixture.root);
        let job = ActiveStream::new(locator.id);

        let handle = {
            let streamer = streamer.clone();
            let job = job.clone();
            let locator = locator.clone();
            tokio::spawn(async move { streamer.stream(locator, job, None).await })
        };

        wait_for_status(fixture.store.as_ref(), locator.id, JobStatus::Streaming).await;

        let killed = tokio::time::timeout(Duration::from_secs(10), job.kill())
            .await
            .unwrap();
        assert!(killed);
        // Only the first kill claims the stop
        assert!(!job.kill().await);

        assert_eq!(handle.await.unwrap().unwrap(), StreamOutcome::Stopped);
        let stored = fixture.store.find_locator(locator.id).unwrap().unwrap();
        assert_eq!(stored.status(), JobStatus::Stopped);
        assert!(stored.state.completion_ratio > 0.0);
        assert_eq!(streamer.available_permits(), 2);
    }

    #[tokio::test]
    async fn test_kill_before_permit_stops_without_spawning() {
        let fixture = Fixture::new();
        let marker = fixture.root.join("spawned");
        let streamer = fixture.streamer(
            &format!("touch '{}'\nexit 0", marker.display()),
            Arc::new(PassthroughResolver),
        );
        let _held = (
            streamer.try_acquire_permit().unwrap(),
            streamer.try_acquire_permit().unwrap(),
        );
        let locator = admitted_locator(fixture.store.as_ref(), &fixture.root);
        let job = ActiveStream::new(locator.id);
        job.cancel.cancel();

        let outcome = streamer.stream(locator.clone(), job, None).await.unwrap();

        assert_eq!(outcome, StreamOutcome::Stopped);
        assert!(!marker.exists());
        let stored = fixture.store.find_locator(locator.id).unwrap().unwrap();
        assert_eq!(stored.status(), JobStatus::Stopped);
        assert_eq!(stored.state.completion_ratio, 0.0);
    }

    #[tokio::test]
    async fn test_kill_after_completion_returns_false() {
        let fixture = Fixture::new();
        let streamer = fixture.streamer(SUCCESS_SCRIPT, Arc::new(PassthroughResolver));
        let locator = admitted_locator(fixture.store.as_ref(), &fixture.root);
        let job = ActiveStream::new(locator.id);

        streamer.stream(locator, job.clone(), None).await.unwrap();
        assert!(!job.kill().await);
    }

    #[tokio::test]
    async fn test_finish_hook_runs_once_outcome_is_known() {
        let fixture = Fixture::new();
        let streamer = fixture.streamer(SUCCESS_SCRIPT, Arc::new(PassthroughResolver));
        let locator = admitted_locator(fixture.store.as_ref(), &fixture.root);
        let job = ActiveStream::new(locator.id);

        let (tx, rx) = std::sync::mpsc::channel();
        let observed = job.clone();
        let hook: OnFinish = Box::new(move || {
            let _ = tx.send(observed.outcome());
        });
        streamer.stream(locator, job, Some(hook)).await.unwrap();

        assert_eq!(rx.try_recv().unwrap(), Some(StreamOutcome::Completed));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_transcoder_output_logged_to_file() {
        let fixture = Fixture::new();
        let script = write_script(&fixture.root, "transcoder.sh", SUCCESS_SCRIPT);
        let mut config = streamer_config(&script);
        config.log_to_file = true;
        let streamer = Streamer::new(
            ConcurrencyPlan::fixed(1),
            fixture.store.clone(),
            Arc::new(PassthroughResolver),
            fixture.publisher.clone(),
            fixture.metrics.clone(),
            config,
        );
        let locator = admitted_locator(fixture.store.as_ref(), &fixture.root);

        streamer
            .stream(locator.clone(), ActiveStream::new(locator.id), None)
            .await
            .unwrap();

        let log = std::fs::read_dir(locator.directory())
            .unwrap()
            .filter_map(|e| e.ok())
            .find(|e| e.file_name().to_string_lossy().starts_with("ffmpeg-"))
            .expect("transcoder log written");
        let content = std::fs::read_to_string(log.path()).unwrap();
        assert!(content.contains("Duration: 00:00:10.00"));
    }
}
