//! Consistency checks between stored records and files on disk.

use crate::locator::{current_timestamp_ms, JobStatus, LocatorId, StreamLocator};
use crate::playlist::{PlaylistId, StreamLocatorPlaylist};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use uuid::Uuid;
use walkdir::WalkDir;

/// A playlist whose storage root no longer exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DanglingPlaylist {
    pub playlist_id: PlaylistId,
    pub file_source_id: Uuid,
    pub storage_root: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DanglingReason {
    /// Marked completed but the manifest is gone.
    MissingManifest,
    /// Not referenced by any playlist.
    Orphaned,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DanglingLocator {
    pub locator_id: LocatorId,
    pub playlist_path: PathBuf,
    pub status: JobStatus,
    pub reason: DanglingReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SanityReport {
    pub generated_at: i64,
    pub total_playlists: usize,
    pub total_locators: usize,
    pub dangling_playlists: Vec<DanglingPlaylist>,
    pub dangling_locators: Vec<DanglingLocator>,
    /// Bytes currently stored under the video root.
    pub storage_bytes: u64,
}

impl SanityReport {
    pub fn is_clean(&self) -> bool {
        self.dangling_playlists.is_empty() && self.dangling_locators.is_empty()
    }
}

/// Compare records with the filesystem under `video_root`.
pub fn build_report(
    playlists: &[StreamLocatorPlaylist],
    locators: &[StreamLocator],
    video_root: &Path,
) -> SanityReport {
    let dangling_playlists = playlists
        .iter()
        .filter(|p| !p.storage_root.is_dir())
        .map(|p| DanglingPlaylist {
            playlist_id: p.id,
            file_source_id: p.file_source_id,
            storage_root: p.storage_root.clone(),
        })
        .collect();

    let referenced: HashSet<LocatorId> = playlists
        .iter()
        .flat_map(|p| p.locators.iter().map(|l| l.id))
        .collect();

    let dangling_locators = locators
        .iter()
        .filter_map(|locator| {
            let reason = if !referenced.contains(&locator.id) {
                DanglingReason::Orphaned
            } else if locator.status() == JobStatus::Completed && !locator.playlist_path.is_file() {
                DanglingReason::MissingManifest
            } else {
                return None;
            };
            Some(DanglingLocator {
                locator_id: locator.id,
                playlist_path: locator.playlist_path.clone(),
                status: locator.status(),
                reason,
            })
        })
        .collect();

    SanityReport {
        generated_at: current_timestamp_ms(),
        total_playlists: playlists.len(),
        total_locators: locators.len(),
        dangling_playlists,
        dangling_locators,
        storage_bytes: directory_size(video_root),
    }
}

/// Total size of regular files below `root`; unreadable entries are skipped.
pub fn directory_size(root: &Path) -> u64 {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|meta| meta.len())
        .sum()
}
