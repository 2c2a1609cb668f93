//! Best-effort status notifications for UIs.
//!
//! Every locator state change is pushed onto a named broadcast channel.
//! Nothing waits on subscribers and a send with nobody listening is not an
//! error for the job.

use crate::locator::{JobStatus, LocatorId, StreamLocator};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

/// Status event for one video file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamStatusMessage {
    pub video_file_id: Uuid,
    pub locator_id: LocatorId,
    /// None once the locator has been deleted.
    pub status: Option<JobStatus>,
    pub completion_ratio: f64,
    pub error: Option<String>,
}

impl StreamStatusMessage {
    pub fn from_locator(locator: &StreamLocator) -> Self {
        Self {
            video_file_id: locator.video_file.id,
            locator_id: locator.id,
            status: Some(locator.state.status),
            completion_ratio: locator.state.completion_ratio,
            error: locator.state.error.clone(),
        }
    }

    fn deleted(locator: &StreamLocator) -> Self {
        Self {
            video_file_id: locator.video_file.id,
            locator_id: locator.id,
            status: None,
            completion_ratio: 0.0,
            error: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StatusPublisher {
    topic: Arc<str>,
    sender: broadcast::Sender<StreamStatusMessage>,
}

impl StatusPublisher {
    pub fn new(topic: &str, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            topic: Arc::from(topic),
            sender,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamStatusMessage> {
        self.sender.subscribe()
    }

    /// Publish the locator's current state.
    pub fn publish(&self, locator: &StreamLocator) {
        self.send(StreamStatusMessage::from_locator(locator));
    }

    /// Tell subscribers the locator is gone.
    pub fn publish_deleted(&self, locator: &StreamLocator) {
        self.send(StreamStatusMessage::deleted(locator));
    }

    fn send(&self, message: StreamStatusMessage) {
        if let Err(e) = self.sender.send(message) {
            trace!(
                topic = %self.topic,
                video_file_id = %e.0.video_file_id,
                "No subscribers for status update"
            );
        }
    }
}
