//! Remote video sources handed to the relay by the scraping side.
//!
//! A [`VideoFileSource`] is a read-only description of one remote asset split
//! into named parts. Part labels carry a natural playback order.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use url::Url;
use uuid::Uuid;

/// Identifies which portion of an event a video file covers.
///
/// Known parts sort in playback order; free-form labels sort after them,
/// alphabetically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PartIdentifier {
    PreMatch,
    FirstHalf,
    SecondHalf,
    ExtraTime,
    Penalties,
    PostMatch,
    Other(String),
}

impl PartIdentifier {
    /// Parse a human label such as `"first half"` or `"FIRST_HALF"`.
    pub fn parse(label: &str) -> Self {
        let normalized = label
            .trim()
            .to_lowercase()
            .replace(|c: char| c == '_' || c == '-', " ");
        match normalized.as_str() {
            "pre match" | "prematch" => PartIdentifier::PreMatch,
            "first half" | "1st half" => PartIdentifier::FirstHalf,
            "second half" | "2nd half" => PartIdentifier::SecondHalf,
            "extra time" => PartIdentifier::ExtraTime,
            "penalties" => PartIdentifier::Penalties,
            "post match" | "postmatch" => PartIdentifier::PostMatch,
            _ => PartIdentifier::Other(label.trim().to_string()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            PartIdentifier::PreMatch => "pre-match",
            PartIdentifier::FirstHalf => "first half",
            PartIdentifier::SecondHalf => "second half",
            PartIdentifier::ExtraTime => "extra time",
            PartIdentifier::Penalties => "penalties",
            PartIdentifier::PostMatch => "post-match",
            PartIdentifier::Other(label) => label,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            PartIdentifier::PreMatch => 0,
            PartIdentifier::FirstHalf => 1,
            PartIdentifier::SecondHalf => 2,
            PartIdentifier::ExtraTime => 3,
            PartIdentifier::Penalties => 4,
            PartIdentifier::PostMatch => 5,
            PartIdentifier::Other(_) => 6,
        }
    }
}

impl Ord for PartIdentifier {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank()
            .cmp(&other.rank())
            .then_with(|| self.label().cmp(other.label()))
    }
}

impl PartialOrd for PartIdentifier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for PartIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl From<String> for PartIdentifier {
    fn from(label: String) -> Self {
        PartIdentifier::parse(&label)
    }
}

impl From<PartIdentifier> for String {
    fn from(part: PartIdentifier) -> Self {
        part.label().to_string()
    }
}

/// One physical video file of a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoFile {
    pub id: Uuid,
    pub part: PartIdentifier,
    /// Last known download URL; may have expired by the time it is streamed.
    pub remote_uri: Url,
}

impl VideoFile {
    pub fn new(part: PartIdentifier, remote_uri: Url) -> Self {
        Self {
            id: Uuid::new_v4(),
            part,
            remote_uri,
        }
    }
}

/// A remote video asset and its parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoFileSource {
    pub id: Uuid,
    #[serde(default)]
    pub video_files: Vec<VideoFile>,
}

impl VideoFileSource {
    pub fn new(video_files: Vec<VideoFile>) -> Self {
        Self {
            id: Uuid::new_v4(),
            video_files,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.video_files.is_empty()
    }

    /// Parts in playback order.
    pub fn ordered_files(&self) -> Vec<&VideoFile> {
        let mut files: Vec<&VideoFile> = self.video_files.iter().collect();
        files.sort_by(|a, b| a.part.cmp(&b.part));
        files
    }
}
