//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// On-disk layout configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    /// Root under which every playlist gets its own `{file_source_id}` directory
    #[serde(default = "default_video_root")]
    pub video_root: PathBuf,
    /// Directory holding the JSON locator and playlist records
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// File name of the HLS manifest written in each locator directory
    #[serde(default = "default_playlist_name")]
    pub playlist_name: String,
}

fn default_video_root() -> PathBuf {
    PathBuf::from("/var/lib/hls-relay/videos")
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("/var/lib/hls-relay/state")
}

fn default_playlist_name() -> String {
    "playlist.m3u8".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            video_root: default_video_root(),
            state_dir: default_state_dir(),
            playlist_name: default_playlist_name(),
        }
    }
}

/// Transcoder invocation settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscoderConfig {
    /// Path or name of the transcoder executable
    #[serde(default = "default_executable")]
    pub executable: PathBuf,
    /// Arguments placed before everything else on the command line
    #[serde(default = "default_base_args")]
    pub base_args: Vec<String>,
    /// Extra flags as a flat `[flag, value, flag, value, ...]` list
    #[serde(default)]
    pub additional_args: Vec<String>,
    /// Write each job's raw transcoder output next to its manifest
    #[serde(default)]
    pub log_to_file: bool,
}

fn default_executable() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_base_args() -> Vec<String> {
    vec!["-v".to_string(), "info".to_string(), "-y".to_string()]
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            executable: default_executable(),
            base_args: default_base_args(),
            additional_args: Vec::new(),
            log_to_file: false,
        }
    }
}

/// Worker pool and progress bookkeeping
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamingConfig {
    /// Maximum concurrent transcoder processes (0 = auto-derive)
    #[serde(default)]
    pub max_concurrent_streams: u32,
    /// Number of logical cores (auto-detected if None)
    pub logical_cores: Option<u32>,
    /// Minimum interval between persisted progress-only updates
    #[serde(default = "default_progress_persist_interval_ms")]
    pub progress_persist_interval_ms: u64,
    /// Assumed client poll interval used for delay advice
    #[serde(default = "default_ping_ms")]
    pub default_ping_ms: u64,
    /// Typical time for the transcoder to produce its first segment
    #[serde(default = "default_startup_delay_ms")]
    pub startup_delay_ms: u64,
}

fn default_progress_persist_interval_ms() -> u64 {
    1000
}

fn default_ping_ms() -> u64 {
    3000
}

fn default_startup_delay_ms() -> u64 {
    2000
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            max_concurrent_streams: 0,
            logical_cores: None,
            progress_persist_interval_ms: default_progress_persist_interval_ms(),
            default_ping_ms: default_ping_ms(),
            startup_delay_ms: default_startup_delay_ms(),
        }
    }
}

/// HTTP status server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

fn default_bind_address() -> String {
    "127.0.0.1:7878".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

/// Status broadcast channel configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusConfig {
    /// Name of the channel status events are published on
    #[serde(default = "default_topic")]
    pub topic: String,
    /// Events buffered per subscriber before lagging receivers drop messages
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_topic() -> String {
    "/video-stream-status".to_string()
}

fn default_channel_capacity() -> usize {
    256
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            topic: default_topic(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub transcoder: TranscoderConfig,
    #[serde(default)]
    pub streaming: StreamingConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub status: StatusConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing sections and fields fall back to their defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - HLS_VIDEO_ROOT -> storage.video_root
    /// - HLS_STATE_DIR -> storage.state_dir
    /// - HLS_TRANSCODER_EXECUTABLE -> transcoder.executable
    /// - HLS_LOG_TO_FILE -> transcoder.log_to_file
    /// - HLS_MAX_CONCURRENT_STREAMS -> streaming.max_concurrent_streams
    /// - HLS_BIND_ADDRESS -> server.bind_address
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("HLS_VIDEO_ROOT") {
            if !val.is_empty() {
                self.storage.video_root = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("HLS_STATE_DIR") {
            if !val.is_empty() {
                self.storage.state_dir = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("HLS_TRANSCODER_EXECUTABLE") {
            if !val.is_empty() {
                self.transcoder.executable = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("HLS_LOG_TO_FILE") {
            // Accept "true", "1", "yes" as true; "false", "0", "no" as false
            match val.to_lowercase().as_str() {
                "true" | "1" | "yes" => self.transcoder.log_to_file = true,
                "false" | "0" | "no" => self.transcoder.log_to_file = false,
                _ => {}
            }
        }

        if let Ok(val) = env::var("HLS_MAX_CONCURRENT_STREAMS") {
            if let Ok(streams) = val.parse::<u32>() {
                self.streaming.max_concurrent_streams = streams;
            }
        }

        if let Ok(val) = env::var("HLS_BIND_ADDRESS") {
            if !val.is_empty() {
                self.server.bind_address = val;
            }
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }
}
