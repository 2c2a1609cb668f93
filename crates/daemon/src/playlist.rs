//! Playlists group the locators materialized from one video file source.

use crate::locator::{current_timestamp_ms, JobStatus, LocatorId, StreamLocator};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

/// Identifier assigned to a playlist by the record store.
pub type PlaylistId = u64;

/// Minimum ratio before a streaming playlist is worth handing to a player.
const READY_RATIO: f64 = 0.01;

#[derive(Debug, Error)]
pub enum PlaylistError {
    #[error("Locator {locator_id} path {path:?} is outside storage root {root:?}")]
    OutsideStorageRoot {
        locator_id: LocatorId,
        path: PathBuf,
        root: PathBuf,
    },
}

/// All locators created from one source, sharing one storage root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamLocatorPlaylist {
    pub id: PlaylistId,
    pub file_source_id: Uuid,
    pub storage_root: PathBuf,
    /// Kept sorted by video-file part.
    pub locators: Vec<StreamLocator>,
    pub created_at: i64,
}

impl StreamLocatorPlaylist {
    pub fn new(id: PlaylistId, file_source_id: Uuid, storage_root: PathBuf) -> Self {
        Self {
            id,
            file_source_id,
            storage_root,
            locators: Vec::new(),
            created_at: current_timestamp_ms(),
        }
    }

    /// Add a locator, keeping playback order.
    ///
    /// Rejects locators whose manifest does not live strictly below the
    /// storage root.
    pub fn add_locator(&mut self, locator: StreamLocator) -> Result<(), PlaylistError> {
        if !is_subpath(&locator.playlist_path, &self.storage_root) {
            return Err(PlaylistError::OutsideStorageRoot {
                locator_id: locator.id,
                path: locator.playlist_path,
                root: self.storage_root.clone(),
            });
        }

        self.locators.retain(|existing| existing.id != locator.id);
        let position = self.locators.partition_point(|existing| {
            (&existing.video_file.part, existing.id) <= (&locator.video_file.part, locator.id)
        });
        self.locators.insert(position, locator);
        Ok(())
    }

    pub fn remove_locator(&mut self, locator_id: LocatorId) -> Option<StreamLocator> {
        let index = self.locators.iter().position(|l| l.id == locator_id)?;
        Some(self.locators.remove(index))
    }

    pub fn contains(&self, locator_id: LocatorId) -> bool {
        self.locators.iter().any(|l| l.id == locator_id)
    }

    pub fn locator_ids(&self) -> Vec<LocatorId> {
        self.locators.iter().map(|l| l.id).collect()
    }

    /// Aggregate state across every locator.
    pub fn state(&self) -> TaskListState {
        TaskListState::from_locators(&self.locators)
    }

    /// Whether enough has been transcoded for playback to begin.
    pub fn is_ready(&self) -> bool {
        let state = self.state();
        matches!(state.status, JobStatus::Streaming | JobStatus::Completed)
            && state.completion_ratio > READY_RATIO
    }
}

fn is_subpath(path: &Path, root: &Path) -> bool {
    path != root
        && path.starts_with(root)
        && !path.components().any(|c| matches!(c, Component::ParentDir))
}

/// Aggregate status of a playlist's locators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskListState {
    pub status: JobStatus,
    pub completion_ratio: f64,
}

impl TaskListState {
    /// Combine locator states.
    ///
    /// Any failure marks the whole list failed, then any stop marks it
    /// stopped; otherwise the list is as far along as its slowest member.
    /// The ratio is the mean over locators that have not failed.
    pub fn from_locators(locators: &[StreamLocator]) -> Self {
        if locators.is_empty() {
            return Self {
                status: JobStatus::Created,
                completion_ratio: 0.0,
            };
        }

        let statuses = locators.iter().map(|l| l.state.status);
        let status = if statuses.clone().any(|s| s == JobStatus::Error) {
            JobStatus::Error
        } else if statuses.clone().any(|s| s == JobStatus::Stopped) {
            JobStatus::Stopped
        } else {
            statuses.min().unwrap_or(JobStatus::Created)
        };

        let ratios: Vec<f64> = locators
            .iter()
            .map(|l| l.state.completion_ratio)
            .filter(|r| *r >= 0.0)
            .collect();
        let completion_ratio = if ratios.is_empty() {
            0.0
        } else {
            ratios.iter().sum::<f64>() / ratios.len() as f64
        };

        Self {
            status,
            completion_ratio,
        }
    }
}

/// A locator as presented to manifest builders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistEntry {
    pub locator_id: LocatorId,
    pub part_label: String,
}

/// Client-facing view of a playlist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoPlaylist {
    pub event_id: Uuid,
    pub file_source_id: Uuid,
    /// In playback order.
    pub locators: Vec<PlaylistEntry>,
}

impl VideoPlaylist {
    pub fn render(event_id: Uuid, playlist: &StreamLocatorPlaylist) -> Self {
        Self {
            event_id,
            file_source_id: playlist.file_source_id,
            locators: playlist
                .locators
                .iter()
                .map(|l| PlaylistEntry {
                    locator_id: l.id,
                    part_label: l.video_file.part.label().to_string(),
                })
                .collect(),
        }
    }
}
