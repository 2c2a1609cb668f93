//! Daemon startup and main loop for the HLS relay
//!
//! Wires the store, executor and manager together, turns submitted video
//! file sources into streaming playlists and serves them over HTTP.

use crate::concurrency::{derive_plan, ConcurrencyPlan};
use crate::config::{Config, ConfigError};
use crate::locator::current_timestamp_ms;
use crate::manager::{ManagerSettings, StreamError, StreamManager};
use crate::metrics::{collect_system_metrics, new_shared_metrics, SharedMetrics};
use crate::publisher::StatusPublisher;
use crate::resolver::{PassthroughResolver, UrlResolver};
use crate::server::{run_server, AppState, ServerError};
use crate::source::VideoFileSource;
use crate::startup::{run_startup_checks, StartupError};
use crate::store::{JsonFileStore, StoreError, StreamStore};
use crate::streamer::{Streamer, StreamerConfig};
use crate::transcode::TranscodeError;
use std::future::Future;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const SOURCE_QUEUE_CAPACITY: usize = 100;
const METRICS_REFRESH_INTERVAL: Duration = Duration::from_millis(500);

/// Error type for daemon operations
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Startup check failed: {0}")]
    Startup(#[from] StartupError),

    #[error("State store error: {0}")]
    Store(#[from] StoreError),

    #[error("Transcoder configuration error: {0}")]
    Transcode(#[from] TranscodeError),

    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    #[error("Source queue closed")]
    QueueClosed,

    #[error("Background task failed: {0}")]
    Task(String),
}

/// Daemon state containing all runtime components
pub struct Daemon {
    /// Configuration loaded from file and environment
    pub config: Config,
    pub concurrency_plan: ConcurrencyPlan,
    pub metrics: SharedMetrics,
    pub store: Arc<dyn StreamStore>,
    pub manager: Arc<StreamManager>,
    source_tx: mpsc::Sender<VideoFileSource>,
    source_rx: Mutex<mpsc::Receiver<VideoFileSource>>,
}

impl Daemon {
    /// Initialize the daemon with configuration from file
    ///
    /// Loads the config, applies environment overrides, runs the startup
    /// checks and opens the state store under `storage.state_dir`.
    /// `skip_checks` skips only the transcoder availability check; argument validation
    /// always runs.
    pub async fn new<P: AsRef<Path>>(config_path: P, skip_checks: bool) -> Result<Self, DaemonError> {
        let config = Config::load(config_path)?;
        run_startup_checks(&config, skip_checks)?;
        Self::new_without_checks(config)
    }

    /// Initialize the daemon with an existing configuration
    pub async fn with_config(config: Config) -> Result<Self, DaemonError> {
        run_startup_checks(&config, false)?;
        Self::new_without_checks(config)
    }

    /// Initialize the daemon without checking the transcoder
    pub fn new_without_checks(config: Config) -> Result<Self, DaemonError> {
        let store = Arc::new(JsonFileStore::open(&config.storage.state_dir)?);
        Self::with_store(config, store, Arc::new(PassthroughResolver))
    }

    /// Assemble the daemon around an existing store and URL resolver.
    pub fn with_store(
        config: Config,
        store: Arc<dyn StreamStore>,
        resolver: Arc<dyn UrlResolver>,
    ) -> Result<Self, DaemonError> {
        let concurrency_plan = derive_plan(&config);
        let metrics = new_shared_metrics();
        let publisher = StatusPublisher::new(&config.status.topic, config.status.channel_capacity);

        let streamer = Arc::new(Streamer::new(
            concurrency_plan.clone(),
            store.clone(),
            resolver,
            publisher,
            metrics.clone(),
            StreamerConfig::from_config(&config)?,
        ));
        let manager = Arc::new(StreamManager::new(
            ManagerSettings::from_config(&config),
            store.clone(),
            streamer,
        ));

        let (source_tx, source_rx) = mpsc::channel(SOURCE_QUEUE_CAPACITY);

        Ok(Self {
            config,
            concurrency_plan,
            metrics,
            store,
            manager,
            source_tx,
            source_rx: Mutex::new(source_rx),
        })
    }

    /// Queue a video file source for streaming
    pub async fn submit_source(&self, source: VideoFileSource) -> Result<(), DaemonError> {
        self.source_tx
            .send(source)
            .await
            .map_err(|_| DaemonError::QueueClosed)
    }

    /// Get a clone of the source sender for external submission
    pub fn source_sender(&self) -> mpsc::Sender<VideoFileSource> {
        self.source_tx.clone()
    }

    pub fn metrics(&self) -> SharedMetrics {
        self.metrics.clone()
    }

    /// Spawn the HTTP server on the configured bind address.
    pub fn start_server(&self) -> JoinHandle<Result<(), ServerError>> {
        let state = AppState {
            manager: self.manager.clone(),
            metrics: self.metrics.clone(),
        };
        let bind_address = self.config.server.bind_address.clone();
        tokio::spawn(async move { run_server(state, &bind_address).await })
    }

    /// Start the metrics update task
    ///
    /// Periodically refreshes system metrics in the shared state.
    pub fn start_metrics_updater(&self) -> JoinHandle<()> {
        let metrics = self.metrics.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(METRICS_REFRESH_INTERVAL);
            loop {
                ticker.tick().await;
                let system_metrics = collect_system_metrics();
                let mut snapshot = metrics.write().await;
                snapshot.system = system_metrics;
                snapshot.timestamp_unix_ms = current_timestamp_ms();
            }
        })
    }

    /// Run the daemon main loop
    ///
    /// Stops locators left in flight by a previous run, then turns every
    /// submitted source into a playlist and queues its locators. Returns
    /// once every sender is dropped.
    pub async fn run(&self) -> Result<(), DaemonError> {
        let recovered = self.manager.recover_stale()?;
        if recovered > 0 {
            warn!(recovered, "Stopped locators left in flight by a previous run");
        }

        let mut rx = self.source_rx.lock().await;
        while let Some(source) = rx.recv().await {
            if let Err(e) = self.handle_source(&source).await {
                error!(file_source_id = %source.id, error = %e, "Failed to stream source");
            }
        }
        Ok(())
    }

    async fn handle_source(&self, source: &VideoFileSource) -> Result<(), StreamError> {
        let playlist = self.manager.get_or_create_playlist(source)?;
        let queued = self.manager.queue_playlist(playlist.id).await?;
        info!(
            file_source_id = %source.id,
            playlist_id = playlist.id,
            queued,
            "Source submitted"
        );
        Ok(())
    }

    /// Run the daemon with all background tasks
    ///
    /// Serves HTTP, refreshes metrics and processes sources until Ctrl-C,
    /// then kills every running stream.
    pub async fn run_with_server(&self) -> Result<(), DaemonError> {
        let mut server = self.start_server();
        let updater = self.start_metrics_updater();

        let result = tokio::select! {
            result = self.run() => result,
            joined = &mut server => match joined {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e.into()),
                Err(e) => Err(DaemonError::Task(e.to_string())),
            },
            _ = wait_for_shutdown(tokio::signal::ctrl_c()) => {
                info!("Shutdown requested");
                Ok(())
            }
        };

        let killed = self.manager.kill_all().await?;
        info!(killed, "Stopped running streams");
        server.abort();
        updater.abort();
        result
    }
}

/// Resolves when `signal` fires. If the signal cannot be installed this
/// never resolves, leaving the daemon running.
async fn wait_for_shutdown<F>(signal: F)
where
    F: Future<Output = io::Result<()>>,
{
    if let Err(e) = signal.await {
        warn!(error = %e, "Failed to listen for shutdown signal, running until stopped");
        std::future::pending::<()>().await;
    }
}
