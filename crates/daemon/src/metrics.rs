//! Metrics for the stream daemon
//!
//! Provides structs for per-stream metrics, system metrics, and metrics
//! snapshots with JSON serialization support.

use crate::locator::{JobStatus, LocatorId, StreamLocator};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Per-stream metrics tracking transcoding progress
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamMetrics {
    pub locator_id: LocatorId,
    pub video_file_id: String,
    pub part: String,
    pub status: JobStatus,
    pub completion_ratio: f64,
    pub error: Option<String>,
    pub updated_at: i64,
}

impl StreamMetrics {
    pub fn from_locator(locator: &StreamLocator) -> Self {
        Self {
            locator_id: locator.id,
            video_file_id: locator.video_file.id.to_string(),
            part: locator.video_file.part.label().to_string(),
            status: locator.state.status,
            completion_ratio: locator.state.completion_ratio,
            error: locator.state.error.clone(),
            updated_at: locator.updated_at,
        }
    }
}

/// System-level metrics for resource monitoring
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SystemMetrics {
    pub cpu_usage_percent: f32,
    pub mem_usage_percent: f32,
    pub load_avg_1: f32,
    pub load_avg_5: f32,
    pub load_avg_15: f32,
}

/// Complete metrics snapshot including streams, system, and aggregate stats
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MetricsSnapshot {
    pub timestamp_unix_ms: i64,
    pub streams: Vec<StreamMetrics>,
    pub system: SystemMetrics,
    pub queued_streams: usize,
    pub running_streams: usize,
    pub completed_streams: u64,
    pub stopped_streams: u64,
    pub failed_streams: u64,
}

impl MetricsSnapshot {
    /// Insert or replace the entry for `locator` and recount live streams.
    pub fn record_stream(&mut self, locator: &StreamLocator) {
        let entry = StreamMetrics::from_locator(locator);
        match self.streams.iter_mut().find(|s| s.locator_id == locator.id) {
            Some(existing) => *existing = entry,
            None => self.streams.push(entry),
        }
        self.recount();
    }

    /// Drop the entry for a deleted locator.
    pub fn forget_stream(&mut self, locator_id: LocatorId) {
        self.streams.retain(|s| s.locator_id != locator_id);
        self.recount();
    }

    fn recount(&mut self) {
        self.queued_streams = self
            .streams
            .iter()
            .filter(|s| s.status == JobStatus::Queued)
            .count();
        self.running_streams = self.streams.iter().filter(|s| s.status.is_running()).count();
    }
}

/// Shared metrics state for concurrent access across daemon components
pub type SharedMetrics = Arc<RwLock<MetricsSnapshot>>;

/// Creates a new SharedMetrics instance with default values
pub fn new_shared_metrics() -> SharedMetrics {
    Arc::new(RwLock::new(MetricsSnapshot::default()))
}

/// Collects current system metrics using sysinfo
pub fn collect_system_metrics() -> SystemMetrics {
    use sysinfo::System;

    let mut sys = System::new();
    sys.refresh_cpu_usage();
    sys.refresh_memory();

    let cpu_usage = sys.global_cpu_usage();
    let total_memory = sys.total_memory();
    let used_memory = sys.used_memory();
    let mem_usage = if total_memory > 0 {
        (used_memory as f64 / total_memory as f64 * 100.0) as f32
    } else {
        0.0
    };

    let load_avg = System::load_average();

    SystemMetrics {
        cpu_usage_percent: cpu_usage,
        mem_usage_percent: mem_usage,
        load_avg_1: load_avg.one as f32,
        load_avg_5: load_avg.five as f32,
        load_avg_15: load_avg.fifteen as f32,
    }
}
