//! FFmpeg HLS transcode tasks
//!
//! Builds the command line that turns one remote file (or several,
//! concatenated) into an HLS event playlist with copied codecs, and prepares
//! the output directory it writes into.

use super::process::{spawn_transcoder, TranscodeProcess};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

/// Protocols the transcoder may open, including the ones its own demuxers need
/// internally (concat lists, encrypted HLS inputs).
pub const PROTOCOL_WHITELIST: &str = "concat,file,http,https,tcp,tls,crypto";

/// Schemes accepted for caller-supplied input URIs.
const INPUT_SCHEMES: &[&str] = &["http", "https", "tcp", "tls", "file"];

/// Zero-padded segment file name pattern, relative to the manifest directory.
pub const SEGMENT_PATTERN: &str = "segment_%05d.ts";

/// Name of the concat demuxer list written beside the manifest.
pub const CONCAT_FILENAME: &str = "concat.txt";

/// Error type for transcoder operations
#[derive(Debug, Error)]
pub enum TranscodeError {
    /// Flat flag/value list with a dangling entry
    #[error("Additional transcoder arguments must be flag/value pairs, got {0} entries")]
    AdditionalArgs(usize),

    #[error("Input protocol not allowed: {0}")]
    UnsupportedProtocol(String),

    #[error("No input URIs supplied")]
    NoInput,

    #[error("Output path has no parent directory: {0:?}")]
    InvalidOutput(PathBuf),

    #[error("Failed to prepare output directory {path:?}: {source}")]
    Prepare {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to spawn transcoder: {0}")]
    Spawn(#[source] io::Error),

    /// Transcoder process exited with non-zero status
    #[error("Transcoder failed with exit code: {0}")]
    Failed(i32),

    /// Transcoder process was terminated by a signal it was not sent by us
    #[error("Transcoder process was terminated by signal")]
    Terminated,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Split a flat `[flag, value, flag, value, ...]` list into pairs.
pub fn parse_additional_args(args: &[String]) -> Result<Vec<(String, String)>, TranscodeError> {
    if args.len() % 2 != 0 {
        return Err(TranscodeError::AdditionalArgs(args.len()));
    }
    Ok(args
        .chunks_exact(2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect())
}

/// What the transcoder reads from.
#[derive(Debug, Clone, PartialEq)]
pub enum TranscodeSource {
    Single(Url),
    /// Joined back to back at the container level, without re-encoding.
    Concat(Vec<Url>),
}

impl TranscodeSource {
    pub fn uris(&self) -> &[Url] {
        match self {
            TranscodeSource::Single(uri) => std::slice::from_ref(uri),
            TranscodeSource::Concat(uris) => uris,
        }
    }
}

/// Codec handling for one stream type.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Codec {
    #[default]
    Copy,
    Encode(String),
}

impl Codec {
    fn as_arg(&self) -> &str {
        match self {
            Codec::Copy => "copy",
            Codec::Encode(codec) => codec,
        }
    }
}

/// Everything needed to produce one HLS stream.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeRequest {
    pub source: TranscodeSource,
    /// Path of the manifest to write; segments go in the same directory.
    pub output: PathBuf,
    pub video_codec: Codec,
    pub audio_codec: Codec,
    pub additional_args: Vec<(String, String)>,
}

impl TranscodeRequest {
    pub fn single(uri: Url, output: PathBuf) -> Self {
        Self::new(TranscodeSource::Single(uri), output)
    }

    pub fn concat(uris: Vec<Url>, output: PathBuf) -> Self {
        Self::new(TranscodeSource::Concat(uris), output)
    }

    fn new(source: TranscodeSource, output: PathBuf) -> Self {
        Self {
            source,
            output,
            video_codec: Codec::Copy,
            audio_codec: Codec::Copy,
            additional_args: Vec::new(),
        }
    }

    pub fn with_additional_args(mut self, args: Vec<(String, String)>) -> Self {
        self.additional_args = args;
        self
    }

    pub fn output_dir(&self) -> Result<&Path, TranscodeError> {
        self.output
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| TranscodeError::InvalidOutput(self.output.clone()))
    }

    /// Reject empty inputs and schemes outside the whitelist.
    pub fn validate(&self) -> Result<(), TranscodeError> {
        let uris = self.source.uris();
        if uris.is_empty() {
            return Err(TranscodeError::NoInput);
        }
        if let Some(uri) = uris.iter().find(|u| !INPUT_SCHEMES.contains(&u.scheme())) {
            return Err(TranscodeError::UnsupportedProtocol(uri.scheme().to_string()));
        }
        self.output_dir()?;
        Ok(())
    }
}

/// A transcode ready to be prepared and started.
#[derive(Debug, Clone)]
pub struct FfmpegTask {
    executable: PathBuf,
    base_args: Vec<String>,
    request: TranscodeRequest,
}

impl FfmpegTask {
    pub fn new(executable: PathBuf, base_args: Vec<String>, request: TranscodeRequest) -> Self {
        Self {
            executable,
            base_args,
            request,
        }
    }

    pub fn request(&self) -> &TranscodeRequest {
        &self.request
    }

    fn concat_file(&self) -> Result<PathBuf, TranscodeError> {
        Ok(self.request.output_dir()?.join(CONCAT_FILENAME))
    }

    fn input_args(&self) -> Result<Vec<String>, TranscodeError> {
        match &self.request.source {
            TranscodeSource::Single(uri) => Ok(vec!["-i".to_string(), uri.to_string()]),
            TranscodeSource::Concat(_) => Ok(vec![
                "-f".to_string(),
                "concat".to_string(),
                "-safe".to_string(),
                "0".to_string(),
                "-i".to_string(),
                self.concat_file()?.to_string_lossy().into_owned(),
            ]),
        }
    }

    /// Full argument list, excluding the executable.
    pub fn arguments(&self) -> Result<Vec<String>, TranscodeError> {
        let output_dir = self.request.output_dir()?;
        let mut args = self.base_args.clone();

        args.push("-protocol_whitelist".to_string());
        args.push(PROTOCOL_WHITELIST.to_string());
        args.extend(self.input_args()?);

        args.push("-vcodec".to_string());
        args.push(self.request.video_codec.as_arg().to_string());
        args.push("-acodec".to_string());
        args.push(self.request.audio_codec.as_arg().to_string());

        for (flag, value) in &self.request.additional_args {
            args.push(flag.clone());
            args.push(value.clone());
        }

        args.extend(
            ["-muxdelay", "0", "-f", "hls", "-hls_playlist_type", "event"]
                .iter()
                .map(|s| s.to_string()),
        );
        args.push("-hls_segment_filename".to_string());
        args.push(output_dir.join(SEGMENT_PATTERN).to_string_lossy().into_owned());
        args.push(self.request.output.to_string_lossy().into_owned());

        Ok(args)
    }

    /// Build the transcoder command
    pub fn build_command(&self) -> Result<Command, TranscodeError> {
        let mut cmd = Command::new(&self.executable);
        cmd.args(self.arguments()?);
        Ok(cmd)
    }

    /// Validate the request and create the output directory tree.
    ///
    /// In concat mode the demuxer list is written here as well.
    pub fn prepare(&self) -> Result<(), TranscodeError> {
        self.request.validate()?;
        let output_dir = self.request.output_dir()?;
        fs::create_dir_all(output_dir).map_err(|source| TranscodeError::Prepare {
            path: output_dir.to_path_buf(),
            source,
        })?;

        if let TranscodeSource::Concat(uris) = &self.request.source {
            let path = self.concat_file()?;
            fs::write(&path, concat_list(uris)).map_err(|source| TranscodeError::Prepare {
                path: path.clone(),
                source,
            })?;
            debug!(path = %path.display(), entries = uris.len(), "Wrote concat list");
        }
        Ok(())
    }

    /// Spawn the transcoder. The process is killed once `cancel` fires.
    pub fn start(&self, cancel: CancellationToken) -> Result<TranscodeProcess, TranscodeError> {
        let cmd = self.build_command()?;
        spawn_transcoder(cmd, cancel)
    }
}

/// Concat demuxer list, one `file '<uri>'` line per input.
fn concat_list(uris: &[Url]) -> String {
    uris.iter()
        .map(|uri| format!("file '{}'\n", uri.as_str().replace('\'', r"'\''")))
        .collect()
}
