//! Stream manager
//!
//! Turns video file sources into playlists on disk, admits locators to the
//! stream executor at most once at a time, and kills or deletes their work.
//!
//! Admission is the only per-locator serialization point: the registry of
//! live jobs is checked and updated under one mutex before any transcoder is
//! spawned.

use crate::config::Config;
use crate::locator::{JobStatus, LocatorId, StreamLocator};
use crate::metrics::SharedMetrics;
use crate::playlist::{PlaylistError, PlaylistId, StreamLocatorPlaylist, TaskListState, VideoPlaylist};
use crate::publisher::StatusPublisher;
use crate::sanity::{build_report, SanityReport};
use crate::source::VideoFileSource;
use crate::store::{StoreError, StreamStore};
use crate::streamer::{ActiveStream, OnFinish, Streamer};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

const SEGMENT_EXTENSION: &str = "ts";
const MAX_SEGMENT_NAME_LEN: usize = 128;

/// Error type for stream manager operations
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Locator {0} not found")]
    LocatorNotFound(LocatorId),

    #[error("Playlist {0} not found")]
    PlaylistNotFound(PlaylistId),

    #[error("No locator found for video file {0}")]
    VideoFileNotFound(Uuid),

    #[error("Video file source {0} has no playable files")]
    EmptySource(Uuid),

    #[error("Invalid segment name: {0:?}")]
    InvalidSegmentName(String),

    #[error("Video file source {file_source_id} already has playlist {playlist_id}")]
    PlaylistExists {
        file_source_id: Uuid,
        playlist_id: PlaylistId,
    },

    #[error("Playlist {0} failed to stream")]
    PlaylistFailed(PlaylistId),

    #[error(transparent)]
    Playlist(#[from] PlaylistError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl StreamError {
    /// Unknown ids, safe to surface to callers as-is.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StreamError::LocatorNotFound(_)
                | StreamError::PlaylistNotFound(_)
                | StreamError::VideoFileNotFound(_)
        )
    }
}

#[derive(Debug, Clone)]
pub struct ManagerSettings {
    /// Parent of every playlist's storage root
    pub video_root: PathBuf,
    /// Manifest file name inside each locator directory
    pub playlist_name: String,
    /// Expected time per remaining lifecycle step when advising clients
    pub default_ping: Duration,
    pub startup_delay: Duration,
}

impl ManagerSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            video_root: cfg.storage.video_root.clone(),
            playlist_name: cfg.storage.playlist_name.clone(),
            default_ping: Duration::from_millis(cfg.streaming.default_ping_ms),
            startup_delay: Duration::from_millis(cfg.streaming.startup_delay_ms),
        }
    }
}

/// Aggregate view of a playlist for clients deciding when to start playback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistStatus {
    pub playlist_id: PlaylistId,
    pub file_source_id: Uuid,
    pub state: TaskListState,
    pub ready: bool,
    /// None when the playlist failed and waiting will not help.
    pub retry_after_ms: Option<u64>,
}

type Registry = Arc<Mutex<HashMap<LocatorId, Arc<ActiveStream>>>>;

pub struct StreamManager {
    settings: ManagerSettings,
    store: Arc<dyn StreamStore>,
    streamer: Arc<Streamer>,
    active: Registry,
    creation: Mutex<()>,
}

impl StreamManager {
    pub fn new(settings: ManagerSettings, store: Arc<dyn StreamStore>, streamer: Arc<Streamer>) -> Self {
        Self {
            settings,
            store,
            streamer,
            active: Arc::new(Mutex::new(HashMap::new())),
            creation: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    pub fn streamer(&self) -> &Arc<Streamer> {
        &self.streamer
    }

    fn publisher(&self) -> &StatusPublisher {
        self.streamer.publisher()
    }

    fn metrics(&self) -> &SharedMetrics {
        self.streamer.metrics()
    }

    // Playlist creation

    /// Materialize a playlist for `source`: one CREATED locator per part
    /// under `{video_root}/{source_id}/{video_file_id}/`.
    ///
    /// A source owns at most one storage root, so a source that already has
    /// a playlist is refused with [`StreamError::PlaylistExists`].
    pub fn create_playlist(&self, source: &VideoFileSource) -> Result<StreamLocatorPlaylist, StreamError> {
        let _creating = lock(&self.creation);
        if let Some(existing) = self.playlist_for(source.id)? {
            return Err(StreamError::PlaylistExists {
                file_source_id: source.id,
                playlist_id: existing.id,
            });
        }
        self.materialize(source)
    }

    /// Caller holds the creation lock.
    fn materialize(&self, source: &VideoFileSource) -> Result<StreamLocatorPlaylist, StreamError> {
        if source.is_empty() {
            return Err(StreamError::EmptySource(source.id));
        }

        let storage_root = self.settings.video_root.join(source.id.to_string());
        fs::create_dir_all(&storage_root)?;

        let mut playlist =
            StreamLocatorPlaylist::new(self.store.next_playlist_id(), source.id, storage_root.clone());
        let mut locators = Vec::with_capacity(source.video_files.len());
        for file in source.ordered_files() {
            let path = storage_root
                .join(file.id.to_string())
                .join(&self.settings.playlist_name);
            let locator = StreamLocator::new(self.store.next_locator_id(), path, file.clone());
            playlist.add_locator(locator.clone())?;
            locators.push(locator);
        }

        for locator in &locators {
            self.store.save_locator(locator)?;
        }
        self.store.save_playlist(&playlist)?;

        info!(
            playlist_id = playlist.id,
            file_source_id = %source.id,
            locators = locators.len(),
            "Playlist created"
        );
        Ok(playlist)
    }

    /// Most recent playlist for the source, created if there is none.
    pub fn get_or_create_playlist(&self, source: &VideoFileSource) -> Result<StreamLocatorPlaylist, StreamError> {
        let _creating = lock(&self.creation);
        match self.playlist_for(source.id)? {
            Some(existing) => {
                debug!(playlist_id = existing.id, file_source_id = %source.id, "Reusing playlist");
                Ok(existing)
            }
            None => self.materialize(source),
        }
    }

    // Queries

    pub fn playlist_for(&self, file_source_id: Uuid) -> Result<Option<StreamLocatorPlaylist>, StreamError> {
        Ok(self
            .store
            .find_playlists_by(&|p| p.file_source_id == file_source_id)?
            .into_iter()
            .max_by_key(|p| (p.created_at, p.id)))
    }

    pub fn get_all_playlists(&self) -> Result<Vec<StreamLocatorPlaylist>, StreamError> {
        Ok(self.store.all_playlists()?)
    }

    pub fn get_all_locators(&self) -> Result<Vec<StreamLocator>, StreamError> {
        Ok(self.store.all_locators()?)
    }

    pub fn get_locator(&self, locator_id: LocatorId) -> Result<StreamLocator, StreamError> {
        self.store
            .find_locator(locator_id)?
            .ok_or(StreamError::LocatorNotFound(locator_id))
    }

    pub fn get_playlist(&self, playlist_id: PlaylistId) -> Result<StreamLocatorPlaylist, StreamError> {
        self.store
            .find_playlist(playlist_id)?
            .ok_or(StreamError::PlaylistNotFound(playlist_id))
    }

    /// Latest locator streaming the given video file.
    pub fn get_locator_for(&self, video_file_id: Uuid) -> Result<StreamLocator, StreamError> {
        self.store
            .find_locators_by(&|l| l.video_file.id == video_file_id)?
            .into_iter()
            .max_by_key(|l| l.id)
            .ok_or(StreamError::VideoFileNotFound(video_file_id))
    }

    /// Whether a job for the locator is live in this process.
    pub fn is_streaming(&self, locator_id: LocatorId) -> bool {
        lock(&self.active)
            .get(&locator_id)
            .is_some_and(|job| !job.is_finished())
    }

    /// Locators whose stored status is STARTED through STREAMING.
    pub fn active_stream_count(&self) -> Result<usize, StreamError> {
        Ok(self
            .store
            .find_locators_by(&|l| l.status().is_running())?
            .len())
    }

    pub fn render_playlist(&self, event_id: Uuid, playlist_id: PlaylistId) -> Result<VideoPlaylist, StreamError> {
        let playlist = self.get_playlist(playlist_id)?;
        Ok(VideoPlaylist::render(event_id, &playlist))
    }

    // Admission

    /// Queue one locator. Returns false when it is already live, in flight
    /// or completed.
    pub async fn queue_job(&self, locator_id: LocatorId) -> Result<bool, StreamError> {
        let Some((locator, job)) = self.admit(locator_id)? else {
            return Ok(false);
        };

        self.publisher().publish(&locator);
        self.metrics().write().await.record_stream(&locator);
        info!(locator_id, video_file_id = %locator.video_file.id, "Stream queued");

        self.spawn_job(locator, job);
        Ok(true)
    }

    /// Queue several locators, returning how many were admitted.
    pub async fn queue_jobs(&self, locator_ids: &[LocatorId]) -> Result<usize, StreamError> {
        let mut queued = 0;
        for &locator_id in locator_ids {
            if self.queue_job(locator_id).await? {
                queued += 1;
            }
        }
        Ok(queued)
    }

    pub async fn queue_playlist(&self, playlist_id: PlaylistId) -> Result<usize, StreamError> {
        let playlist = self.get_playlist(playlist_id)?;
        self.queue_jobs(&playlist.locator_ids()).await
    }

    /// Check-and-set under the registry lock: mark the locator QUEUED and
    /// register its job before anything is spawned.
    fn admit(&self, locator_id: LocatorId) -> Result<Option<(StreamLocator, Arc<ActiveStream>)>, StreamError> {
        let mut active = lock(&self.active);
        if active.get(&locator_id).is_some_and(|job| !job.is_finished()) {
            debug!(locator_id, "Already streaming");
            return Ok(None);
        }

        let mut locator = self.get_locator(locator_id)?;
        if !locator.status().is_admissible() {
            debug!(locator_id, status = %locator.status(), "Not admitting locator");
            return Ok(None);
        }

        locator.update_state(JobStatus::Queued, 0.0);
        self.store.save_locator(&locator)?;

        let job = ActiveStream::new(locator_id);
        active.insert(locator_id, job.clone());
        Ok(Some((locator, job)))
    }

    fn spawn_job(&self, locator: StreamLocator, job: Arc<ActiveStream>) {
        let registry = self.active.clone();
        let finished = job.clone();
        let release: OnFinish = Box::new(move || {
            let mut active = lock(&registry);
            let locator_id = finished.locator_id();
            if active.get(&locator_id).is_some_and(|j| Arc::ptr_eq(j, &finished)) {
                active.remove(&locator_id);
            }
        });

        let streamer = self.streamer.clone();
        let locator_id = locator.id;
        tokio::spawn(async move {
            match streamer.stream(locator, job, Some(release)).await {
                Ok(outcome) => debug!(locator_id, ?outcome, "Stream job ended"),
                Err(e) => debug!(locator_id, error = %e, "Stream job ended with error"),
            }
        });
    }

    // Cancellation

    /// Kill one locator's job. True only if this call stopped a live job.
    pub async fn kill_one(&self, locator_id: LocatorId) -> Result<bool, StreamError> {
        match self.job_or_stop_stale(locator_id)? {
            Some(job) => Ok(job.kill().await),
            None => Ok(false),
        }
    }

    /// Kill every live job, returning how many were stopped.
    pub async fn kill_all(&self) -> Result<usize, StreamError> {
        let jobs: Vec<Arc<ActiveStream>> = lock(&self.active).values().cloned().collect();
        let killed = kill_jobs(jobs).await;
        self.recover_stale()?;
        info!(killed, "Killed all streams");
        Ok(killed)
    }

    pub async fn kill_all_for(&self, playlist_id: PlaylistId) -> Result<usize, StreamError> {
        let playlist = self.get_playlist(playlist_id)?;
        let killed = self.kill_locators(&playlist.locator_ids()).await?;
        info!(playlist_id, killed, "Killed playlist streams");
        Ok(killed)
    }

    async fn kill_locators(&self, locator_ids: &[LocatorId]) -> Result<usize, StreamError> {
        let mut jobs = Vec::new();
        for &locator_id in locator_ids {
            jobs.extend(self.job_or_stop_stale(locator_id)?);
        }
        Ok(kill_jobs(jobs).await)
    }

    /// The locator's live job, if any. A locator stored as in flight with no
    /// live job is left over from a previous run and is marked STOPPED.
    fn job_or_stop_stale(&self, locator_id: LocatorId) -> Result<Option<Arc<ActiveStream>>, StreamError> {
        let active = lock(&self.active);
        if let Some(job) = active.get(&locator_id) {
            return Ok(Some(job.clone()));
        }

        let locator = self.get_locator(locator_id)?;
        if locator.status().is_in_flight() {
            self.stop_stale(locator)?;
        }
        Ok(None)
    }

    /// Mark every stored in-flight locator without a live job STOPPED.
    pub fn recover_stale(&self) -> Result<usize, StreamError> {
        let active = lock(&self.active);
        let stale = self
            .store
            .find_locators_by(&|l| l.status().is_in_flight() && !active.contains_key(&l.id))?;

        let count = stale.len();
        for locator in stale {
            self.stop_stale(locator)?;
        }
        Ok(count)
    }

    fn stop_stale(&self, mut locator: StreamLocator) -> Result<(), StreamError> {
        warn!(locator_id = locator.id, status = %locator.status(), "Stopping stale locator");
        locator.stop();
        self.store.save_locator(&locator)?;
        self.publisher().publish(&locator);
        Ok(())
    }

    // Deletion

    /// Kill the playlist's jobs, remove its storage root and drop its records.
    ///
    /// A storage root that is already gone is not an error.
    pub async fn delete_local_data(&self, playlist_id: PlaylistId) -> Result<(), StreamError> {
        loop {
            let playlist = self.get_playlist(playlist_id)?;
            self.kill_locators(&playlist.locator_ids()).await?;

            if self.purge_playlist(&playlist)? {
                self.forget(&playlist.locators).await;
                info!(playlist_id, root = %playlist.storage_root.display(), "Playlist data deleted");
                return Ok(());
            }
            debug!(playlist_id, "Playlist re-queued during deletion, killing again");
        }
    }

    /// Kill one locator, remove its directory and drop it from the store and
    /// from any playlist referencing it.
    pub async fn delete_locator_data(&self, locator_id: LocatorId) -> Result<(), StreamError> {
        loop {
            let locator = self.get_locator(locator_id)?;
            self.kill_locators(&[locator_id]).await?;

            if self.purge_locator(&locator)? {
                self.forget(std::slice::from_ref(&locator)).await;
                info!(locator_id, "Locator data deleted");
                return Ok(());
            }
        }
    }

    fn purge_playlist(&self, playlist: &StreamLocatorPlaylist) -> Result<bool, StreamError> {
        let active = lock(&self.active);
        if playlist.locators.iter().any(|l| is_live(&active, l.id)) {
            return Ok(false);
        }

        remove_dir_if_exists(&playlist.storage_root)?;
        for locator in &playlist.locators {
            self.store.delete_locator(locator.id)?;
        }
        self.store.delete_playlist(playlist.id)?;
        Ok(true)
    }

    fn purge_locator(&self, locator: &StreamLocator) -> Result<bool, StreamError> {
        let active = lock(&self.active);
        if is_live(&active, locator.id) {
            return Ok(false);
        }

        let owners = self.store.find_playlists_by(&|p| p.contains(locator.id))?;
        remove_dir_if_exists(locator.directory())?;
        self.store.delete_locator(locator.id)?;
        for mut playlist in owners {
            playlist.remove_locator(locator.id);
            self.store.save_playlist(&playlist)?;
        }
        Ok(true)
    }

    async fn forget(&self, locators: &[StreamLocator]) {
        let mut metrics = self.metrics().write().await;
        for locator in locators {
            self.publisher().publish_deleted(locator);
            metrics.forget_stream(locator.id);
        }
    }

    // Files

    /// Path of a segment in the locator's directory. Only bare names made of
    /// ASCII letters, digits, `_` and `-` are accepted; a `.ts` suffix is
    /// optional.
    pub fn segment_path(&self, locator_id: LocatorId, segment: &str) -> Result<PathBuf, StreamError> {
        let name = segment
            .strip_suffix(".ts")
            .unwrap_or(segment);
        if !is_valid_segment_name(name) {
            return Err(StreamError::InvalidSegmentName(segment.to_string()));
        }

        let locator = self.get_locator(locator_id)?;
        Ok(locator
            .directory()
            .join(name)
            .with_extension(SEGMENT_EXTENSION))
    }

    /// The manifest text, or None while the transcoder has not written it.
    pub async fn read_playlist_file(&self, locator_id: LocatorId) -> Result<Option<String>, StreamError> {
        let locator = self.get_locator(locator_id)?;
        match tokio::fs::read_to_string(&locator.playlist_path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    // Readiness

    pub fn is_stream_ready(&self, playlist_id: PlaylistId) -> Result<bool, StreamError> {
        Ok(self.get_playlist(playlist_id)?.is_ready())
    }

    /// How long a client should wait before asking again.
    pub fn delay_advice(&self, playlist_id: PlaylistId) -> Result<Duration, StreamError> {
        let playlist = self.get_playlist(playlist_id)?;
        self.advise(&playlist)
    }

    fn advise(&self, playlist: &StreamLocatorPlaylist) -> Result<Duration, StreamError> {
        let state = playlist.state();
        if state.status == JobStatus::Error {
            return Err(StreamError::PlaylistFailed(playlist.id));
        }
        if playlist.is_ready() {
            return Ok(Duration::ZERO);
        }

        let steps = state
            .status
            .steps_to_completion()
            .or(JobStatus::Created.steps_to_completion())
            .unwrap_or(0);
        Ok(self
            .settings
            .default_ping
            .saturating_mul(steps)
            .saturating_add(self.settings.startup_delay))
    }

    pub fn playlist_status(&self, playlist_id: PlaylistId) -> Result<PlaylistStatus, StreamError> {
        let playlist = self.get_playlist(playlist_id)?;
        let retry_after_ms = match self.advise(&playlist) {
            Ok(delay) => Some(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)),
            Err(StreamError::PlaylistFailed(_)) => None,
            Err(e) => return Err(e),
        };
        Ok(PlaylistStatus {
            playlist_id: playlist.id,
            file_source_id: playlist.file_source_id,
            state: playlist.state(),
            ready: playlist.is_ready(),
            retry_after_ms,
        })
    }

    // Sanity

    /// Taken under the creation lock so a playlist whose locators are
    /// saved but whose record is not yet written is never seen as orphans.
    pub fn sanity_report(&self) -> Result<SanityReport, StreamError> {
        let _creating = lock(&self.creation);
        let playlists = self.store.all_playlists()?;
        let locators = self.store.all_locators()?;
        Ok(build_report(&playlists, &locators, &self.settings.video_root))
    }

    /// Delete the records a report flagged. Returns how many were removed.
    pub async fn repair_sanity(&self, report: &SanityReport) -> Result<usize, StreamError> {
        let mut repaired = 0;
        for dangling in &report.dangling_playlists {
            match self.delete_local_data(dangling.playlist_id).await {
                Ok(()) => repaired += 1,
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        for dangling in &report.dangling_locators {
            match self.delete_locator_data(dangling.locator_id).await {
                Ok(()) => repaired += 1,
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        if repaired > 0 {
            info!(repaired, "Repaired dangling records");
        }
        Ok(repaired)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn is_live(active: &HashMap<LocatorId, Arc<ActiveStream>>, locator_id: LocatorId) -> bool {
    active.get(&locator_id).is_some_and(|job| !job.is_finished())
}

async fn kill_jobs(jobs: Vec<Arc<ActiveStream>>) -> usize {
    let mut kills = JoinSet::new();
    for job in jobs {
        kills.spawn(async move { job.kill().await });
    }

    let mut killed = 0;
    while let Some(result) = kills.join_next().await {
        if matches!(result, Ok(true)) {
            killed += 1;
        }
    }
    killed
}

fn is_valid_segment_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_SEGMENT_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn remove_dir_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
