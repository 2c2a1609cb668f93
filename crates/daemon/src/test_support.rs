//! Shared fixtures for unit tests: a scripted stand-in for the transcoder
//! and helpers for polling stored state.

use crate::locator::{JobStatus, LocatorId, StreamLocator};
use crate::resolver::{ResolveError, UrlResolver};
use crate::source::{PartIdentifier, VideoFile, VideoFileSource};
use crate::store::StreamStore;
use crate::streamer::StreamerConfig;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Reports full progress, writes the manifest (last argument) and exits 0.
pub(crate) const SUCCESS_SCRIPT: &str = r##"
echo "  Duration: 00:00:10.00, start: 0.000000, bitrate: 1000 kb/s" >&2
echo "frame=10 fps=0.0 q=-1.0 size=N/A time=00:00:05.00 bitrate=N/A speed=10x" >&2
for last; do :; done
echo "#EXTM3U" > "$last"
echo "frame=20 fps=0.0 q=-1.0 size=N/A time=00:00:10.00 bitrate=N/A speed=10x" >&2
exit 0
"##;

/// Reports 10% progress then blocks until killed.
pub(crate) const LONG_RUNNING_SCRIPT: &str = r#"
echo "  Duration: 00:00:10.00, start: 0.000000" >&2
echo "frame=1 fps=0.0 q=-1.0 size=N/A time=00:00:01.00 bitrate=N/A" >&2
exec sleep 30
"#;

/// Like [`LONG_RUNNING_SCRIPT`] but appends a line to `count_file` per spawn.
pub(crate) fn counting_script(count_file: &Path) -> String {
    format!(
        "echo spawned >> '{}'\n{}",
        count_file.display(),
        LONG_RUNNING_SCRIPT
    )
}

pub(crate) fn spawn_count(count_file: &Path) -> usize {
    std::fs::read_to_string(count_file)
        .map(|s| s.lines().count())
        .unwrap_or(0)
}

pub(crate) fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    path
}

/// Run `/bin/sh <script>` in place of the transcoder binary.
pub(crate) fn streamer_config(script: &Path) -> StreamerConfig {
    StreamerConfig {
        executable: PathBuf::from("/bin/sh"),
        base_args: vec![script.to_string_lossy().into_owned()],
        additional_args: Vec::new(),
        log_to_file: false,
        progress_persist_interval: Duration::ZERO,
    }
}

pub(crate) fn video_file(part: PartIdentifier) -> VideoFile {
    VideoFile::new(
        part,
        Url::parse("https://files.example.com/match/video.mkv").unwrap(),
    )
}

pub(crate) fn make_source(parts: &[PartIdentifier]) -> VideoFileSource {
    VideoFileSource::new(parts.iter().cloned().map(video_file).collect())
}

/// Store a QUEUED locator under `root`, as admission would.
pub(crate) fn admitted_locator(store: &dyn StreamStore, root: &Path) -> StreamLocator {
    let file = video_file(PartIdentifier::FirstHalf);
    let path = root.join(file.id.to_string()).join("playlist.m3u8");
    let mut locator = StreamLocator::new(store.next_locator_id(), path, file);
    locator.update_state(JobStatus::Queued, 0.0);
    store.save_locator(&locator).unwrap();
    locator
}

struct FailingResolver;

#[async_trait]
impl UrlResolver for FailingResolver {
    async fn refresh(&self, video_file: &VideoFile) -> Result<Url, ResolveError> {
        Err(ResolveError::Unavailable(video_file.id))
    }
}

pub(crate) fn failing_resolver() -> Arc<dyn UrlResolver> {
    Arc::new(FailingResolver)
}

/// Poll the store until the locator reaches `status`, panicking after 10s.
pub(crate) async fn wait_for_status(
    store: &dyn StreamStore,
    locator_id: LocatorId,
    status: JobStatus,
) -> StreamLocator {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(locator) = store.find_locator(locator_id).unwrap() {
            if locator.status() == status {
                return locator;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "locator {} never reached {}",
            locator_id,
            status
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
