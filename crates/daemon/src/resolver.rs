//! Refreshing download URLs before a stream starts.
//!
//! Remote hosts hand out time-limited links, so the URL stored with a video
//! file may be stale by the time its locator is streamed.

use crate::source::VideoFile;
use async_trait::async_trait;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("No download URL available for video file {0}")]
    Unavailable(Uuid),

    #[error("Failed to refresh download URL: {0}")]
    Failed(String),
}

/// Produces a fresh download URL for a video file.
#[async_trait]
pub trait UrlResolver: Send + Sync {
    async fn refresh(&self, video_file: &VideoFile) -> Result<Url, ResolveError>;
}

/// Uses the stored URL as-is, for hosts whose links do not expire.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughResolver;

#[async_trait]
impl UrlResolver for PassthroughResolver {
    async fn refresh(&self, video_file: &VideoFile) -> Result<Url, ResolveError> {
        Ok(video_file.remote_uri.clone())
    }
}
