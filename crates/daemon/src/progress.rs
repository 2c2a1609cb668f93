//! Turns transcoder log output into a completion ratio.
//!
//! The transcoder announces the input duration once (`Duration: 00:45:00.00`)
//! and then reports the running output timestamp on each stats line
//! (`time=00:22:30.00`). Lines matching neither are ignored.

use regex::Regex;
use std::sync::LazyLock;

static DURATION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*Duration:\s*((?:\d+:)+\d+(?:\.\d+)?)").expect("valid duration pattern")
});

static TIME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:out_)?time=\s*((?:\d+:)+\d+(?:\.\d+)?)").expect("valid time pattern")
});

/// What a single log line told the adapter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LogEvent {
    /// Total media duration, in milliseconds.
    Duration(u64),
    /// Position reached so far, in milliseconds.
    Progress(u64),
    Ignored,
}

/// Per-job progress tracker fed one log line at a time.
#[derive(Debug, Clone, Default)]
pub struct ProgressLogAdapter {
    stream_duration_ms: Option<u64>,
    progress_ms: Option<u64>,
}

impl ProgressLogAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one line. Malformed or unrelated lines leave the state untouched.
    pub fn observe(&mut self, line: &str) -> LogEvent {
        if let Some(ms) = capture_timestamp(&DURATION_PATTERN, line) {
            self.stream_duration_ms = Some(ms);
            return LogEvent::Duration(ms);
        }
        if let Some(ms) = capture_timestamp(&TIME_PATTERN, line) {
            self.progress_ms = Some(ms);
            return LogEvent::Progress(ms);
        }
        LogEvent::Ignored
    }

    pub fn stream_duration_ms(&self) -> Option<u64> {
        self.stream_duration_ms
    }

    /// `progress / duration`, unclamped. None until both have been seen or
    /// when the announced duration is zero.
    pub fn completion_ratio(&self) -> Option<f64> {
        match (self.progress_ms, self.stream_duration_ms) {
            (Some(progress), Some(duration)) if duration > 0 => {
                Some(progress as f64 / duration as f64)
            }
            _ => None,
        }
    }
}

fn capture_timestamp(pattern: &Regex, line: &str) -> Option<u64> {
    pattern
        .captures(line)
        .and_then(|caps| caps.get(1))
        .and_then(|m| parse_timestamp_ms(m.as_str()))
}

/// Parse `[[HH:]MM:]SS[.frac]` into milliseconds.
pub fn parse_timestamp_ms(timestamp: &str) -> Option<u64> {
    let mut parts = timestamp.rsplit(':');
    let seconds: f64 = parts.next()?.parse().ok()?;
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }

    let mut total_ms = (seconds * 1000.0).round() as u64;
    let mut unit_ms: u64 = 60_000;
    for part in parts {
        let value: u64 = part.parse().ok()?;
        total_ms = total_ms.checked_add(value.checked_mul(unit_ms)?)?;
        unit_ms = unit_ms.saturating_mul(60);
    }
    Some(total_ms)
}
