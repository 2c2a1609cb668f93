//! Record store for locators and playlists.
//!
//! Records are persisted as JSON files in a state directory, one file per
//! record, and mirrored in memory. Playlist records only reference their
//! locators by id; reads hydrate them from the locator records so there is a
//! single copy of every locator's state.

use crate::locator::{LocatorId, StreamLocator};
use crate::playlist::{PlaylistId, StreamLocatorPlaylist};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

const LOCATOR_DIR: &str = "locators";
const PLAYLIST_DIR: &str = "playlists";
const TMP_EXTENSION: &str = "json.tmp";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to serialize record: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Persistence seam used by the stream manager and executor.
pub trait StreamStore: Send + Sync {
    fn next_locator_id(&self) -> LocatorId;

    fn next_playlist_id(&self) -> PlaylistId;

    fn save_locator(&self, locator: &StreamLocator) -> Result<(), StoreError>;

    fn find_locator(&self, id: LocatorId) -> Result<Option<StreamLocator>, StoreError>;

    fn find_locators_by(
        &self,
        filter: &dyn Fn(&StreamLocator) -> bool,
    ) -> Result<Vec<StreamLocator>, StoreError>;

    /// Returns whether a record was removed.
    fn delete_locator(&self, id: LocatorId) -> Result<bool, StoreError>;

    /// Persist the playlist record. Locators are saved separately.
    fn save_playlist(&self, playlist: &StreamLocatorPlaylist) -> Result<(), StoreError>;

    fn find_playlist(&self, id: PlaylistId) -> Result<Option<StreamLocatorPlaylist>, StoreError>;

    fn find_playlists_by(
        &self,
        filter: &dyn Fn(&StreamLocatorPlaylist) -> bool,
    ) -> Result<Vec<StreamLocatorPlaylist>, StoreError>;

    fn delete_playlist(&self, id: PlaylistId) -> Result<bool, StoreError>;

    fn all_locators(&self) -> Result<Vec<StreamLocator>, StoreError> {
        self.find_locators_by(&|_| true)
    }

    fn all_playlists(&self) -> Result<Vec<StreamLocatorPlaylist>, StoreError> {
        self.find_playlists_by(&|_| true)
    }
}

/// Persisted form of a playlist.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PlaylistRecord {
    id: PlaylistId,
    file_source_id: Uuid,
    storage_root: PathBuf,
    locator_ids: Vec<LocatorId>,
    created_at: i64,
}

impl From<&StreamLocatorPlaylist> for PlaylistRecord {
    fn from(playlist: &StreamLocatorPlaylist) -> Self {
        Self {
            id: playlist.id,
            file_source_id: playlist.file_source_id,
            storage_root: playlist.storage_root.clone(),
            locator_ids: playlist.locator_ids(),
            created_at: playlist.created_at,
        }
    }
}

/// JSON-file backed store with an in-memory index.
///
/// Every mutation is written through to disk before it becomes visible.
/// [`JsonFileStore::ephemeral`] skips the disk entirely.
pub struct JsonFileStore {
    state_dir: Option<PathBuf>,
    locators: RwLock<BTreeMap<LocatorId, StreamLocator>>,
    playlists: RwLock<BTreeMap<PlaylistId, PlaylistRecord>>,
    next_locator_id: AtomicU64,
    next_playlist_id: AtomicU64,
}

impl JsonFileStore {
    /// Open (or create) a store rooted at `state_dir`, loading existing records.
    pub fn open(state_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let state_dir = state_dir.into();
        fs::create_dir_all(state_dir.join(LOCATOR_DIR))?;
        fs::create_dir_all(state_dir.join(PLAYLIST_DIR))?;

        let (locators, max_locator_id) = load_records::<StreamLocator>(&state_dir.join(LOCATOR_DIR))?;
        let locators: BTreeMap<LocatorId, StreamLocator> =
            locators.into_iter().map(|l| (l.id, l)).collect();
        let (playlists, max_playlist_id) =
            load_records::<PlaylistRecord>(&state_dir.join(PLAYLIST_DIR))?;
        let playlists: BTreeMap<PlaylistId, PlaylistRecord> =
            playlists.into_iter().map(|p| (p.id, p)).collect();

        // Ids of unreadable records stay reserved
        let next_locator = locators
            .keys()
            .next_back()
            .copied()
            .max(max_locator_id)
            .map_or(1, |id| id + 1);
        let next_playlist = playlists
            .keys()
            .next_back()
            .copied()
            .max(max_playlist_id)
            .map_or(1, |id| id + 1);

        Ok(Self {
            state_dir: Some(state_dir),
            locators: RwLock::new(locators),
            playlists: RwLock::new(playlists),
            next_locator_id: AtomicU64::new(next_locator),
            next_playlist_id: AtomicU64::new(next_playlist),
        })
    }

    /// A store that never touches the filesystem.
    pub fn ephemeral() -> Self {
        Self {
            state_dir: None,
            locators: RwLock::new(BTreeMap::new()),
            playlists: RwLock::new(BTreeMap::new()),
            next_locator_id: AtomicU64::new(1),
            next_playlist_id: AtomicU64::new(1),
        }
    }

    pub fn state_dir(&self) -> Option<&Path> {
        self.state_dir.as_deref()
    }

    fn record_path(&self, kind: &str, id: u64) -> Option<PathBuf> {
        self.state_dir
            .as_ref()
            .map(|dir| dir.join(kind).join(format!("{}.json", id)))
    }

    fn hydrate(&self, record: &PlaylistRecord) -> StreamLocatorPlaylist {
        let locators = read_lock(&self.locators);
        let mut playlist =
            StreamLocatorPlaylist::new(record.id, record.file_source_id, record.storage_root.clone());
        playlist.created_at = record.created_at;
        for id in &record.locator_ids {
            if let Some(locator) = locators.get(id) {
                if let Err(e) = playlist.add_locator(locator.clone()) {
                    warn!(playlist_id = record.id, error = %e, "Skipping misplaced locator");
                }
            }
        }
        playlist
    }
}

impl StreamStore for JsonFileStore {
    fn next_locator_id(&self) -> LocatorId {
        self.next_locator_id.fetch_add(1, Ordering::SeqCst)
    }

    fn next_playlist_id(&self) -> PlaylistId {
        self.next_playlist_id.fetch_add(1, Ordering::SeqCst)
    }

    fn save_locator(&self, locator: &StreamLocator) -> Result<(), StoreError> {
        let mut locators = write_lock(&self.locators);
        if let Some(path) = self.record_path(LOCATOR_DIR, locator.id) {
            write_record(&path, locator)?;
        }
        locators.insert(locator.id, locator.clone());
        Ok(())
    }

    fn find_locator(&self, id: LocatorId) -> Result<Option<StreamLocator>, StoreError> {
        Ok(read_lock(&self.locators).get(&id).cloned())
    }

    fn find_locators_by(
        &self,
        filter: &dyn Fn(&StreamLocator) -> bool,
    ) -> Result<Vec<StreamLocator>, StoreError> {
        Ok(read_lock(&self.locators)
            .values()
            .filter(|l| filter(l))
            .cloned()
            .collect())
    }

    fn delete_locator(&self, id: LocatorId) -> Result<bool, StoreError> {
        let mut locators = write_lock(&self.locators);
        if let Some(path) = self.record_path(LOCATOR_DIR, id) {
            remove_record(&path)?;
        }
        Ok(locators.remove(&id).is_some())
    }

    fn save_playlist(&self, playlist: &StreamLocatorPlaylist) -> Result<(), StoreError> {
        let record = PlaylistRecord::from(playlist);
        let mut playlists = write_lock(&self.playlists);
        if let Some(path) = self.record_path(PLAYLIST_DIR, record.id) {
            write_record(&path, &record)?;
        }
        playlists.insert(record.id, record);
        Ok(())
    }

    fn find_playlist(&self, id: PlaylistId) -> Result<Option<StreamLocatorPlaylist>, StoreError> {
        let record = read_lock(&self.playlists).get(&id).cloned();
        Ok(record.map(|r| self.hydrate(&r)))
    }

    fn find_playlists_by(
        &self,
        filter: &dyn Fn(&StreamLocatorPlaylist) -> bool,
    ) -> Result<Vec<StreamLocatorPlaylist>, StoreError> {
        let records: Vec<PlaylistRecord> = read_lock(&self.playlists).values().cloned().collect();
        Ok(records
            .iter()
            .map(|r| self.hydrate(r))
            .filter(|p| filter(p))
            .collect())
    }

    fn delete_playlist(&self, id: PlaylistId) -> Result<bool, StoreError> {
        let mut playlists = write_lock(&self.playlists);
        if let Some(path) = self.record_path(PLAYLIST_DIR, id) {
            remove_record(&path)?;
        }
        Ok(playlists.remove(&id).is_some())
    }
}

// A panicking writer leaves the maps consistent (disk is written before the
// insert), so a poisoned lock is still usable.
fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Writes `{id}.json.tmp` and renames it over the record, so a crash never
/// leaves a half-written record behind.
fn write_record<T: Serialize>(path: &Path, record: &T) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(record)?;

    let tmp_path = path.with_extension(TMP_EXTENSION);
    {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
    }
    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e.into());
    }
    Ok(())
}

fn remove_record(path: &Path) -> Result<(), StoreError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Loads every `.json` record in `dir`, skipping files that fail to parse.
///
/// Also returns the highest id named by any record file, readable or not.
fn load_records<T: DeserializeOwned>(dir: &Path) -> Result<(Vec<T>, Option<u64>), StoreError> {
    if !dir.exists() {
        return Ok((Vec::new(), None));
    }

    let mut records = Vec::new();
    let mut max_id = None;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let file_id = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(|stem| stem.parse::<u64>().ok());
        max_id = max_id.max(file_id);

        let parsed = fs::read_to_string(&path)
            .map_err(StoreError::from)
            .and_then(|content| serde_json::from_str(&content).map_err(StoreError::from));
        match parsed {
            Ok(record) => records.push(record),
            Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable record"),
        }
    }

    Ok((records, max_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locator::JobStatus;
    use crate::source::{PartIdentifier, VideoFile};
    use tempfile::TempDir;
    use url::Url;

    fn make_playlist(store: &dyn StreamStore, root: &Path, parts: &[PartIdentifier]) -> StreamLocatorPlaylist {
        let mut playlist =
            StreamLocatorPlaylist::new(store.next_playlist_id(), Uuid::new_v4(), root.to_path_buf());
        for part in parts {
            let file = VideoFile::new(
                part.clone(),
                Url::parse("https://files.example.com/video.mkv").unwrap(),
            );
            let path = root.join(file.id.to_string()).join("playlist.m3u8");
            let locator = StreamLocator::new(store.next_locator_id(), path, file);
            store.save_locator(&locator).unwrap();
            playlist.add_locator(locator).unwrap();
        }
        store.save_playlist(&playlist).unwrap();
        playlist
    }

    #[test]
    fn test_ephemeral_store_allocates_sequential_ids() {
        let store = JsonFileStore::ephemeral();
        assert_eq!(store.next_locator_id(), 1);
        assert_eq!(store.next_locator_id(), 2);
        assert_eq!(store.next_playlist_id(), 1);
        assert!(store.state_dir().is_none());
    }

    #[test]
    fn test_records_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("videos").join("source");

        let playlist_id = {
            let store = JsonFileStore::open(temp_dir.path().join("state")).unwrap();
            let playlist = make_playlist(
                &store,
                &root,
                &[PartIdentifier::FirstHalf, PartIdentifier::SecondHalf],
            );
            let mut first = playlist.locators[0].clone();
            first.update_state(JobStatus::Completed, 1.0);
            store.save_locator(&first).unwrap();
            playlist.id
        };

        let store = JsonFileStore::open(temp_dir.path().join("state")).unwrap();
        let playlist = store.find_playlist(playlist_id).unwrap().unwrap();

        assert_eq!(playlist.locators.len(), 2);
        assert_eq!(playlist.locators[0].status(), JobStatus::Completed);
        assert_eq!(playlist.locators[1].status(), JobStatus::Created);
        // Ids continue after the highest persisted one
        assert_eq!(store.next_locator_id(), 3);
        assert_eq!(store.next_playlist_id(), playlist_id + 1);
    }

    #[test]
    fn test_unparseable_records_are_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let state_dir = temp_dir.path().join("state");
        fs::create_dir_all(state_dir.join(LOCATOR_DIR)).unwrap();
        fs::write(state_dir.join(LOCATOR_DIR).join("9.json"), "{ not json").unwrap();
        fs::write(state_dir.join(LOCATOR_DIR).join("notes.txt"), "ignored").unwrap();

        let store = JsonFileStore::open(&state_dir).unwrap();
        assert!(store.all_locators().unwrap().is_empty());
    }

    #[test]
    fn test_interrupted_write_keeps_previous_record() {
        let temp_dir = TempDir::new().unwrap();
        let state_dir = temp_dir.path().join("state");
        let root = temp_dir.path().join("videos").join("source");

        let (playlist_id, completed_id) = {
            let store = JsonFileStore::open(&state_dir).unwrap();
            let playlist = make_playlist(
                &store,
                &root,
                &[PartIdentifier::FirstHalf, PartIdentifier::SecondHalf],
            );
            let mut second = playlist.locators[1].clone();
            second.update_state(JobStatus::Completed, 1.0);
            store.save_locator(&second).unwrap();
            (playlist.id, second.id)
        };

        let record = state_dir.join(LOCATOR_DIR).join(format!("{}.json", completed_id));
        let tmp = record.with_extension(TMP_EXTENSION);
        assert!(!tmp.exists());

        // A crash mid-save leaves only a partial temp file
        let content = fs::read_to_string(&record).unwrap();
        fs::write(&tmp, &content[..content.len() / 2]).unwrap();

        let store = JsonFileStore::open(&state_dir).unwrap();
        let locator = store.find_locator(completed_id).unwrap().unwrap();
        assert_eq!(locator.status(), JobStatus::Completed);
        assert_eq!(store.find_playlist(playlist_id).unwrap().unwrap().locators.len(), 2);
    }

    #[test]
    fn test_unreadable_record_ids_are_not_reused() {
        let temp_dir = TempDir::new().unwrap();
        let state_dir = temp_dir.path().join("state");
        {
            let store = JsonFileStore::open(&state_dir).unwrap();
            make_playlist(
                &store,
                &temp_dir.path().join("v"),
                &[PartIdentifier::FirstHalf, PartIdentifier::SecondHalf],
            );
        }

        let record = state_dir.join(LOCATOR_DIR).join("2.json");
        let content = fs::read_to_string(&record).unwrap();
        fs::write(&record, &content[..content.len() / 2]).unwrap();
        fs::write(state_dir.join(PLAYLIST_DIR).join("7.json"), "{").unwrap();

        let store = JsonFileStore::open(&state_dir).unwrap();
        assert!(store.find_locator(2).unwrap().is_none());
        assert_eq!(store.next_locator_id(), 3);
        assert_eq!(store.next_playlist_id(), 8);
    }

    #[test]
    fn test_delete_removes_record_files() {
        let temp_dir = TempDir::new().unwrap();
        let state_dir = temp_dir.path().join("state");
        let store = JsonFileStore::open(&state_dir).unwrap();
        let playlist = make_playlist(&store, &temp_dir.path().join("v"), &[PartIdentifier::FirstHalf]);
        let locator_id = playlist.locators[0].id;

        assert!(store.delete_locator(locator_id).unwrap());
        assert!(store.delete_playlist(playlist.id).unwrap());
        assert!(!store.delete_locator(locator_id).unwrap());

        assert!(!state_dir.join(LOCATOR_DIR).join(format!("{}.json", locator_id)).exists());
        assert!(!state_dir.join(PLAYLIST_DIR).join(format!("{}.json", playlist.id)).exists());
        assert!(store.find_playlist(playlist.id).unwrap().is_none());
    }

    #[test]
    fn test_playlist_reads_see_latest_locator_state() {
        let store = JsonFileStore::ephemeral();
        let playlist = make_playlist(&store, Path::new("/videos/s"), &[PartIdentifier::FirstHalf]);

        let mut locator = playlist.locators[0].clone();
        locator.update_state(JobStatus::Streaming, 0.3);
        store.save_locator(&locator).unwrap();

        let reloaded = store.find_playlist(playlist.id).unwrap().unwrap();
        assert_eq!(reloaded.locators[0].status(), JobStatus::Streaming);
    }

    #[test]
    fn test_find_by_filter() {
        let store = JsonFileStore::ephemeral();
        let a = make_playlist(&store, Path::new("/videos/a"), &[PartIdentifier::FirstHalf]);
        let _b = make_playlist(&store, Path::new("/videos/b"), &[PartIdentifier::FirstHalf]);

        let found = store
            .find_playlists_by(&|p| p.file_source_id == a.file_source_id)
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, a.id);

        let locators = store
            .find_locators_by(&|l| l.playlist_path.starts_with("/videos/b"))
            .unwrap();
        assert_eq!(locators.len(), 1);
    }
}
