//! HTTP server for the stream daemon
//!
//! Exposes metrics for monitoring tools, and manifests, segments and
//! playlist readiness for players.

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};
use std::io;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::locator::LocatorId;
use crate::manager::{PlaylistStatus, StreamError, StreamManager};
use crate::metrics::{MetricsSnapshot, SharedMetrics};
use crate::playlist::PlaylistId;

const PLAYLIST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";
const SEGMENT_CONTENT_TYPE: &str = "video/mp2t";

/// Errors that can occur when running the server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind to {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("Server failed: {0}")]
    Serve(#[source] io::Error),
}

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<StreamManager>,
    pub metrics: SharedMetrics,
}

/// Maps manager errors onto HTTP statuses.
struct ApiError(StreamError);

impl From<StreamError> for ApiError {
    fn from(e: StreamError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            e if e.is_not_found() => StatusCode::NOT_FOUND,
            StreamError::InvalidSegmentName(_) => StatusCode::BAD_REQUEST,
            StreamError::PlaylistFailed(_) | StreamError::PlaylistExists { .. } => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(error = %self.0, "Request failed");
        }
        (status, self.0.to_string()).into_response()
    }
}

/// Handler for GET /metrics endpoint
async fn get_metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    let snapshot = state.metrics.read().await.clone();
    Json(snapshot)
}

async fn get_playlist_file(
    State(state): State<AppState>,
    Path(locator_id): Path<LocatorId>,
) -> Result<Response, ApiError> {
    match state.manager.read_playlist_file(locator_id).await? {
        Some(content) => Ok(([(header::CONTENT_TYPE, PLAYLIST_CONTENT_TYPE)], content).into_response()),
        None => Ok((StatusCode::NOT_FOUND, "Playlist not written yet").into_response()),
    }
}

async fn get_segment(
    State(state): State<AppState>,
    Path((locator_id, segment)): Path<(LocatorId, String)>,
) -> Result<Response, ApiError> {
    let path = state.manager.segment_path(locator_id, &segment)?;
    match tokio::fs::read(&path).await {
        Ok(bytes) => Ok(([(header::CONTENT_TYPE, SEGMENT_CONTENT_TYPE)], bytes).into_response()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            Ok((StatusCode::NOT_FOUND, "Segment not found").into_response())
        }
        Err(e) => Err(StreamError::Io(e).into()),
    }
}

async fn get_playlist_status(
    State(state): State<AppState>,
    Path(playlist_id): Path<PlaylistId>,
) -> Result<Json<PlaylistStatus>, ApiError> {
    Ok(Json(state.manager.playlist_status(playlist_id)?))
}

/// Creates the axum Router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/metrics", get(get_metrics))
        .route("/streams/:locator_id/playlist", get(get_playlist_file))
        .route("/streams/:locator_id/segments/:segment", get(get_segment))
        .route("/playlists/:playlist_id/status", get(get_playlist_status))
        .with_state(state)
}

/// Runs the HTTP server on `bind_address` until it fails.
pub async fn run_server(state: AppState, bind_address: &str) -> Result<(), ServerError> {
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(bind_address)
        .await
        .map_err(|source| ServerError::Bind {
            address: bind_address.to_string(),
            source,
        })?;
    info!(address = bind_address, "HTTP server listening");

    axum::serve(listener, app).await.map_err(ServerError::Serve)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locator::{JobStatus, StreamLocator};
    use crate::manager::ManagerSettings;
    use crate::metrics::new_shared_metrics;
    use crate::playlist::StreamLocatorPlaylist;
    use crate::publisher::StatusPublisher;
    use crate::resolver::PassthroughResolver;
    use crate::source::PartIdentifier;
    use crate::store::JsonFileStore;
    use crate::streamer::Streamer;
    use crate::test_support::{make_source, streamer_config};
    use crate::ConcurrencyPlan;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct Fixture {
        _dir: TempDir,
        state: AppState,
        playlist: StreamLocatorPlaylist,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let store = Arc::new(JsonFileStore::ephemeral());
            let metrics = new_shared_metrics();
            let streamer = Arc::new(Streamer::new(
                ConcurrencyPlan::fixed(1),
                store.clone(),
                Arc::new(PassthroughResolver),
                StatusPublisher::new("/video-stream-status", 16),
                metrics.clone(),
                streamer_config(&dir.path().join("unused.sh")),
            ));
            let settings = ManagerSettings {
                video_root: dir.path().join("videos"),
                playlist_name: "playlist.m3u8".to_string(),
                default_ping: Duration::from_millis(3000),
                startup_delay: Duration::from_millis(2000),
            };
            let manager = Arc::new(StreamManager::new(settings, store, streamer));
            let playlist = manager
                .create_playlist(&make_source(&[PartIdentifier::FirstHalf]))
                .unwrap();

            Self {
                _dir: dir,
                state: AppState { manager, metrics },
                playlist,
            }
        }

        fn locator(&self) -> &StreamLocator {
            &self.playlist.locators[0]
        }

        async fn get(&self, uri: &str) -> (StatusCode, Vec<u8>) {
            let response = create_router(self.state.clone())
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            let status = response.status();
            let body = response.into_body().collect().await.unwrap().to_bytes();
            (status, body.to_vec())
        }
    }

    #[tokio::test]
    async fn test_get_metrics_returns_json() {
        let fixture = Fixture::new();
        {
            let mut snapshot = fixture.state.metrics.write().await;
            snapshot.timestamp_unix_ms = 1701388800000;
            snapshot.completed_streams = 3;
            snapshot.record_stream(fixture.locator());
        }

        let response = create_router(fixture.state.clone())
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get("content-type")
            .expect("should have content-type header");
        assert!(content_type.to_str().unwrap().contains("application/json"));

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let snapshot: MetricsSnapshot =
            serde_json::from_slice(&body).expect("should deserialize to MetricsSnapshot");
        assert_eq!(snapshot.timestamp_unix_ms, 1701388800000);
        assert_eq!(snapshot.completed_streams, 3);
        assert_eq!(snapshot.streams.len(), 1);
        assert_eq!(snapshot.streams[0].locator_id, fixture.locator().id);
    }

    #[tokio::test]
    async fn test_playlist_file_served_once_written() {
        let fixture = Fixture::new();
        let uri = format!("/streams/{}/playlist", fixture.locator().id);

        let (status, _) = fixture.get(&uri).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let manifest = "#EXTM3U\n#EXT-X-PLAYLIST-TYPE:EVENT\n";
        std::fs::create_dir_all(fixture.locator().directory()).unwrap();
        std::fs::write(&fixture.locator().playlist_path, manifest).unwrap();

        let (status, body) = fixture.get(&uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(String::from_utf8(body).unwrap(), manifest);
    }

    #[tokio::test]
    async fn test_unknown_locator_is_404() {
        let fixture = Fixture::new();
        assert_eq!(fixture.get("/streams/9999/playlist").await.0, StatusCode::NOT_FOUND);
        assert_eq!(
            fixture.get("/streams/9999/segments/segment_00000.ts").await.0,
            StatusCode::NOT_FOUND
        );
        assert_eq!(fixture.get("/playlists/9999/status").await.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_segment_served_and_traversal_rejected() {
        let fixture = Fixture::new();
        let id = fixture.locator().id;
        std::fs::create_dir_all(fixture.locator().directory()).unwrap();
        std::fs::write(fixture.locator().directory().join("segment_00000.ts"), b"\x47\x40").unwrap();

        let (status, body) = fixture.get(&format!("/streams/{}/segments/segment_00000.ts", id)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"\x47\x40");

        let (status, _) = fixture.get(&format!("/streams/{}/segments/segment_00001", id)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = fixture.get(&format!("/streams/{}/segments/..%2Fplaylist", id)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_playlist_status_reports_delay() {
        let fixture = Fixture::new();
        let (status, body) = fixture
            .get(&format!("/playlists/{}/status", fixture.playlist.id))
            .await;

        assert_eq!(status, StatusCode::OK);
        let report: PlaylistStatus = serde_json::from_slice(&body).unwrap();
        assert_eq!(report.state.status, JobStatus::Created);
        assert!(!report.ready);
        assert_eq!(report.retry_after_ms, Some(17_000));
    }
}
