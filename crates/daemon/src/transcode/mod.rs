//! External transcoder wrapper: argument construction, process spawning and
//! supervision.

pub mod ffmpeg;
pub mod process;

pub use ffmpeg::{
    parse_additional_args, Codec, FfmpegTask, TranscodeError, TranscodeRequest, TranscodeSource,
    CONCAT_FILENAME, PROTOCOL_WHITELIST, SEGMENT_PATTERN,
};
pub use process::{ProcessExit, ProcessKiller, TranscodeProcess};
