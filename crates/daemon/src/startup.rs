//! Startup checks for the stream daemon
//!
//! Preflight checks run before the daemon accepts work:
//! - Additional transcoder arguments form flag/value pairs
//! - The transcoder executable runs (`<executable> -version`)

use crate::config::Config;
use crate::transcode::{parse_additional_args, TranscodeError};
use std::path::Path;
use std::process::Command;
use thiserror::Error;
use tracing::{info, warn};

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Invalid transcoder configuration: {0}")]
    InvalidArguments(#[from] TranscodeError),

    #[error("Transcoder not available: {0}")]
    TranscoderUnavailable(String),
}

/// Parse FFmpeg version string and extract major version number
///
/// Handles various FFmpeg version formats:
/// - Standard: "ffmpeg version 6.1.1 ..."
/// - N-prefixed: "ffmpeg version n7.0-... ..."
pub fn parse_ffmpeg_version(version_output: &str) -> Option<u32> {
    let version_line = version_output
        .lines()
        .find(|line| line.to_lowercase().contains("ffmpeg version"))?;

    let version_part = version_line
        .to_lowercase()
        .split("ffmpeg version")
        .nth(1)?
        .split_whitespace()
        .next()?
        .to_string();

    let version_str = version_part.trim_start_matches('n');
    let major_str = version_str.split(|c| c == '.' || c == '-').next()?;

    major_str.parse().ok()
}

/// Validate the flat additional-args list.
pub fn check_additional_args(cfg: &Config) -> Result<(), StartupError> {
    parse_additional_args(&cfg.transcoder.additional_args)?;
    Ok(())
}

/// Check the transcoder runs by invoking `<executable> -version`
///
/// Returns the major version when the output is recognisable.
pub fn check_transcoder_available(executable: &Path) -> Result<Option<u32>, StartupError> {
    let output = Command::new(executable)
        .arg("-version")
        .output()
        .map_err(|e| {
            StartupError::TranscoderUnavailable(format!(
                "{} -version failed; is it installed and in PATH? Error: {}",
                executable.display(),
                e
            ))
        })?;

    if !output.status.success() {
        return Err(StartupError::TranscoderUnavailable(format!(
            "{} -version exited with {}",
            executable.display(),
            output.status
        )));
    }

    let version_output = String::from_utf8_lossy(&output.stdout);
    Ok(parse_ffmpeg_version(&version_output))
}

/// Run all startup checks in order
///
/// Argument validation always runs; `skip_exec_check` only skips the
/// executable availability check.
pub fn run_startup_checks(cfg: &Config, skip_exec_check: bool) -> Result<(), StartupError> {
    check_additional_args(cfg)?;
    if skip_exec_check {
        warn!("Skipping transcoder availability check");
        return Ok(());
    }

    let executable = &cfg.transcoder.executable;
    match check_transcoder_available(executable)? {
        Some(major) => info!(executable = %executable.display(), major, "Transcoder available"),
        None => warn!(executable = %executable.display(), "Transcoder available, version not recognised"),
    }
    Ok(())
}
