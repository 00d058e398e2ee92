//! Throughput and session statistics.
//!
//! Components never log statistics through a global; they receive an
//! `Arc<dyn StatsSink>` at construction. `LogStatsSink` is the default and
//! writes human-readable lines under the `stats` log target.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReportKind {
    Interval,
    Final,
}

/// Frames received (and lost) by one transport over a time span.
#[derive(Clone, Debug)]
pub struct ThroughputReport {
    pub source: &'static str,
    pub kind: ReportKind,
    pub frames: u64,
    pub lost: u64,
    pub elapsed: Duration,
}

impl ThroughputReport {
    pub fn frames_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 {
            0.0
        } else {
            self.frames as f64 / secs
        }
    }
}

impl fmt::Display for ThroughputReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.kind {
            ReportKind::Interval => "",
            ReportKind::Final => " done,",
        };
        write!(
            f,
            "{}{} received {} frames in {:.1}s at {:.2} frames/second, {} lost",
            self.source,
            prefix,
            self.frames,
            self.elapsed.as_secs_f64(),
            self.frames_per_second(),
            self.lost
        )
    }
}

/// Per-connection control loop summary.
#[derive(Clone, Debug, Default)]
pub struct SessionReport {
    pub peer: String,
    pub duration: Duration,
    pub commands_sent: u64,
    pub keep_alives_sent: u64,
    pub faces_used: u64,
    pub faces_skipped: u64,
    pub outcome: String,
}

impl fmt::Display for SessionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "session {} {} after {:.1}s: {} commands ({} keep-alive), {} faces used, {} skipped",
            self.peer,
            self.outcome,
            self.duration.as_secs_f64(),
            self.commands_sent,
            self.keep_alives_sent,
            self.faces_used,
            self.faces_skipped
        )
    }
}

/// Write-only, thread-safe statistics capability.
pub trait StatsSink: Send + Sync {
    fn throughput(&self, report: &ThroughputReport);

    fn session(&self, report: &SessionReport);
}

/// Default sink: one `log` line per report under target `stats`.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogStatsSink;

impl StatsSink for LogStatsSink {
    fn throughput(&self, report: &ThroughputReport) {
        log::info!(target: "stats", "{}", report);
    }

    fn session(&self, report: &SessionReport) {
        log::info!(target: "stats", "{}", report);
    }
}

pub fn log_sink() -> Arc<dyn StatsSink> {
    Arc::new(LogStatsSink)
}

/// Counts frames and emits interval/final reports without pausing the caller.
pub struct ThroughputMeter {
    source: &'static str,
    interval: Duration,
    started_at: Instant,
    last_report_at: Instant,
    total_frames: u64,
    frames_since_report: u64,
    lost_at_last_report: u64,
}

impl ThroughputMeter {
    pub fn new(source: &'static str, interval: Duration) -> Self {
        Self::starting_at(source, interval, Instant::now())
    }

    pub fn starting_at(source: &'static str, interval: Duration, now: Instant) -> Self {
        Self {
            source,
            interval,
            started_at: now,
            last_report_at: now,
            total_frames: 0,
            frames_since_report: 0,
            lost_at_last_report: 0,
        }
    }

    pub fn record_frame(&mut self) {
        self.total_frames += 1;
        self.frames_since_report += 1;
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    /// Emit an interval report if the interval elapsed. `lost_total` is the
    /// cumulative loss counter owned by the transport.
    pub fn tick(&mut self, now: Instant, lost_total: u64, sink: &dyn StatsSink) -> bool {
        let elapsed = now.saturating_duration_since(self.last_report_at);
        if self.interval.is_zero() || elapsed <= self.interval {
            return false;
        }
        sink.throughput(&ThroughputReport {
            source: self.source,
            kind: ReportKind::Interval,
            frames: self.frames_since_report,
            lost: lost_total.saturating_sub(self.lost_at_last_report),
            elapsed,
        });
        self.last_report_at = now;
        self.frames_since_report = 0;
        self.lost_at_last_report = lost_total;
        true
    }

    /// Cumulative report since the meter started.
    pub fn finish(&self, now: Instant, lost_total: u64, sink: &dyn StatsSink) -> ThroughputReport {
        let report = ThroughputReport {
            source: self.source,
            kind: ReportKind::Final,
            frames: self.total_frames,
            lost: lost_total,
            elapsed: now.saturating_duration_since(self.started_at),
        };
        sink.throughput(&report);
        report
    }
}
