//! Concurrency planning for the stream pool
//!
//! Derives how many transcoders may run at once from the CPU core count and
//! configuration.

use crate::config::Config;

/// Transcoders are IO bound relays, but each one still decodes and muxes.
const MIN_DERIVED_STREAMS: u32 = 2;
const MAX_DERIVED_STREAMS: u32 = 8;

/// Concurrency plan derived from configuration and system resources
#[derive(Debug, Clone, PartialEq)]
pub struct ConcurrencyPlan {
    /// Total logical CPU cores available
    pub total_cores: u32,
    /// Maximum number of transcoders running at the same time
    pub max_concurrent_streams: u32,
}

impl ConcurrencyPlan {
    /// Derive a concurrency plan from configuration
    ///
    /// Uses the following rules:
    /// - Detects CPU cores via num_cpus if not specified in config
    /// - Uses an explicit non-zero `max_concurrent_streams` unchanged
    /// - Otherwise allows one stream per two cores, clamped to [2, 8]
    pub fn derive(cfg: &Config) -> Self {
        let total_cores = cfg
            .streaming
            .logical_cores
            .unwrap_or_else(|| num_cpus::get() as u32)
            .max(1);

        let max_concurrent_streams = if cfg.streaming.max_concurrent_streams > 0 {
            cfg.streaming.max_concurrent_streams
        } else {
            derive_max_streams(total_cores)
        };

        Self {
            total_cores,
            max_concurrent_streams,
        }
    }

    /// Plan with a fixed pool size, for callers that bypass configuration.
    pub fn fixed(max_concurrent_streams: u32) -> Self {
        Self {
            total_cores: num_cpus::get() as u32,
            max_concurrent_streams: max_concurrent_streams.max(1),
        }
    }
}

fn derive_max_streams(total_cores: u32) -> u32 {
    (total_cores / 2).clamp(MIN_DERIVED_STREAMS, MAX_DERIVED_STREAMS)
}

/// Convenience function to derive a concurrency plan from configuration
pub fn derive_plan(cfg: &Config) -> ConcurrencyPlan {
    ConcurrencyPlan::derive(cfg)
}
