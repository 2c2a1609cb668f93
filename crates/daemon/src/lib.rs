//! HLS relay daemon
//!
//! Background service that transcodes remote video files into HLS playlists
//! on local disk, tracks every stream's lifecycle and serves the results.

pub mod concurrency;
pub mod daemon;
pub mod locator;
pub mod manager;
pub mod metrics;
pub mod playlist;
pub mod progress;
pub mod publisher;
pub mod resolver;
pub mod sanity;
pub mod server;
pub mod source;
pub mod startup;
pub mod store;
pub mod streamer;
pub mod transcode;

#[cfg(test)]
mod test_support;

pub use hls_relay_config as config;
pub use hls_relay_config::Config;
pub use concurrency::{derive_plan, ConcurrencyPlan};
pub use daemon::{Daemon, DaemonError};
pub use locator::{JobStatus, LocatorId, StreamLocator, TaskState};
pub use manager::{ManagerSettings, PlaylistStatus, StreamError, StreamManager};
pub use metrics::{
    collect_system_metrics, new_shared_metrics, MetricsSnapshot, SharedMetrics, StreamMetrics,
    SystemMetrics,
};
pub use playlist::{PlaylistId, StreamLocatorPlaylist, TaskListState, VideoPlaylist};
pub use publisher::{StatusPublisher, StreamStatusMessage};
pub use resolver::{PassthroughResolver, ResolveError, UrlResolver};
pub use sanity::SanityReport;
pub use server::{create_router, run_server, AppState, ServerError};
pub use source::{PartIdentifier, VideoFile, VideoFileSource};
pub use startup::{run_startup_checks, StartupError};
pub use store::{JsonFileStore, StoreError, StreamStore};
pub use streamer::{ActiveStream, StreamJobError, StreamOutcome, Streamer, StreamerConfig};
pub use transcode::{FfmpegTask, TranscodeError, TranscodeRequest};
