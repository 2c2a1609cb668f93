//! Stream locators: one transcoding job for one physical video file.

use crate::source::VideoFile;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Identifier assigned to a locator by the record store.
pub type LocatorId = u64;

/// Lifecycle status of a stream job.
///
/// Variants are declared in lifecycle order so comparisons such as
/// `status >= JobStatus::Started` are meaningful. `Stopped` and `Error` sit
/// past `Completed`; any running state may jump straight to them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Created,
    Queued,
    Started,
    Buffering,
    Streaming,
    Completed,
    Stopped,
    Error,
}

impl Default for JobStatus {
    fn default() -> Self {
        Self::Created
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Created => write!(f, "CREATED"),
            JobStatus::Queued => write!(f, "QUEUED"),
            JobStatus::Started => write!(f, "STARTED"),
            JobStatus::Buffering => write!(f, "BUFFERING"),
            JobStatus::Streaming => write!(f, "STREAMING"),
            JobStatus::Completed => write!(f, "COMPLETED"),
            JobStatus::Stopped => write!(f, "STOPPED"),
            JobStatus::Error => write!(f, "ERROR"),
        }
    }
}

impl JobStatus {
    /// A transcoder is (or should be) alive: `Started` through `Streaming`.
    pub fn is_running(self) -> bool {
        matches!(
            self,
            JobStatus::Started | JobStatus::Buffering | JobStatus::Streaming
        )
    }

    /// Admitted but not yet finished.
    pub fn is_in_flight(self) -> bool {
        self == JobStatus::Queued || self.is_running()
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Stopped | JobStatus::Error
        )
    }

    /// Whether a new job may be queued for a locator in this status.
    ///
    /// Fresh locators and ones that were stopped or failed can be re-queued;
    /// anything in flight or already completed is left alone.
    pub fn is_admissible(self) -> bool {
        matches!(
            self,
            JobStatus::Created | JobStatus::Stopped | JobStatus::Error
        )
    }

    /// Number of lifecycle steps left before `Completed`, or None for the
    /// out-of-band statuses.
    pub fn steps_to_completion(self) -> Option<u32> {
        match self {
            JobStatus::Stopped | JobStatus::Error => None,
            status => Some(JobStatus::Completed as u32 - status as u32),
        }
    }
}

/// Status, completion ratio and failure reason of one locator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskState {
    pub status: JobStatus,
    /// Fraction of the media processed, `-1.0` after an error.
    pub completion_ratio: f64,
    pub error: Option<String>,
}

impl Default for TaskState {
    fn default() -> Self {
        Self {
            status: JobStatus::Created,
            completion_ratio: 0.0,
            error: None,
        }
    }
}

impl TaskState {
    pub fn new(status: JobStatus, completion_ratio: f64) -> Self {
        Self {
            status,
            completion_ratio,
            error: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Error,
            completion_ratio: -1.0,
            error: Some(reason.into()),
        }
    }
}

/// One transcoding job for one video file.
///
/// Identity is the store-assigned id: two locators are equal when their ids
/// are, whatever their state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamLocator {
    pub id: LocatorId,
    /// Path of the HLS manifest the transcoder writes.
    pub playlist_path: PathBuf,
    pub video_file: VideoFile,
    #[serde(default)]
    pub state: TaskState,
    /// Unix timestamp (milliseconds) when the locator was created.
    pub created_at: i64,
    /// Unix timestamp (milliseconds) of the last state change.
    pub updated_at: i64,
}

impl PartialEq for StreamLocator {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for StreamLocator {}

impl StreamLocator {
    pub fn new(id: LocatorId, playlist_path: PathBuf, video_file: VideoFile) -> Self {
        let now = current_timestamp_ms();
        Self {
            id,
            playlist_path,
            video_file,
            state: TaskState::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Directory holding the manifest and its segments.
    pub fn directory(&self) -> &Path {
        self.playlist_path.parent().unwrap_or(Path::new(""))
    }

    pub fn status(&self) -> JobStatus {
        self.state.status
    }

    /// Update the job's updated_at timestamp to now.
    pub fn touch(&mut self) {
        self.updated_at = current_timestamp_ms();
    }

    /// Set status and ratio, clearing any previous error.
    pub fn update_state(&mut self, status: JobStatus, completion_ratio: f64) {
        self.state = TaskState::new(status, completion_ratio);
        self.touch();
    }

    /// Move to `Stopped`, keeping the ratio reached so far.
    pub fn stop(&mut self) {
        let ratio = self.state.completion_ratio;
        self.update_state(JobStatus::Stopped, ratio);
    }

    pub fn fail(&mut self, reason: &str) {
        self.state = TaskState::failed(reason);
        self.touch();
    }
}

/// Get current timestamp in milliseconds since Unix epoch.
pub(crate) fn current_timestamp_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
