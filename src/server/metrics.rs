//! Server metrics collection.
//!
//! Aggregate counters only. No session ids, addresses or key material are
//! ever recorded here.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;

/// Server metrics collector.
pub struct ServerMetrics {
    /// Server start time
    start_time: Instant,
    /// HTTP requests handled
    total_requests: AtomicU64,
    /// Key exchanges started
    sessions_initiated: AtomicU64,
    /// Key exchanges completed
    sessions_completed: AtomicU64,
    /// Completions rejected for any reason
    sessions_failed: AtomicU64,
    /// Exchanges that timed out
    sessions_expired: AtomicU64,
    /// Parameter generation failures
    generation_failures: AtomicU64,
    /// Init requests rejected by the rate limiter
    rate_limited: AtomicU64,
    /// Files stored
    files_uploaded: AtomicU64,
    /// Files served
    files_downloaded: AtomicU64,
    /// Plaintext bytes accepted
    bytes_uploaded: AtomicU64,
    /// Plaintext bytes served
    bytes_downloaded: AtomicU64,
}

impl ServerMetrics {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            total_requests: AtomicU64::new(0),
            sessions_initiated: AtomicU64::new(0),
            sessions_completed: AtomicU64::new(0),
            sessions_failed: AtomicU64::new(0),
            sessions_expired: AtomicU64::new(0),
            generation_failures: AtomicU64::new(0),
            rate_limited: AtomicU64::new(0),
            files_uploaded: AtomicU64::new(0),
            files_downloaded: AtomicU64::new(0),
            bytes_uploaded: AtomicU64::new(0),
            bytes_downloaded: AtomicU64::new(0),
        }
    }

    pub fn increment_requests(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_initiated(&self) {
        self.sessions_initiated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_completed(&self) {
        self.sessions_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_failed(&self) {
        self.sessions_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_expired(&self, count: u64) {
        self.sessions_expired.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_generation_failures(&self) {
        self.generation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_rate_limited(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one stored upload of `bytes` plaintext bytes.
    pub fn record_upload(&self, bytes: u64) {
        self.files_uploaded.fetch_add(1, Ordering::Relaxed);
        self.bytes_uploaded.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Count one served download of `bytes` plaintext bytes.
    pub fn record_download(&self, bytes: u64) {
        self.files_downloaded.fetch_add(1, Ordering::Relaxed);
        self.bytes_downloaded.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Get uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Get a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            total_requests: self.total_requests.load(Ordering::Relaxed),
            sessions_initiated: self.sessions_initiated.load(Ordering::Relaxed),
            sessions_completed: self.sessions_completed.load(Ordering::Relaxed),
            sessions_failed: self.sessions_failed.load(Ordering::Relaxed),
            sessions_expired: self.sessions_expired.load(Ordering::Relaxed),
            generation_failures: self.generation_failures.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            files_uploaded: self.files_uploaded.load(Ordering::Relaxed),
            files_downloaded: self.files_downloaded.load(Ordering::Relaxed),
            bytes_uploaded: self.bytes_uploaded.load(Ordering::Relaxed),
            bytes_downloaded: self.bytes_downloaded.load(Ordering::Relaxed),
        }
    }

    /// Format metrics as a simple text report.
    ///
    /// Live gauges come from the caller since the store and registry own them.
    pub fn format_report(&self, pending_sessions: usize, open_channels: usize) -> String {
        let snapshot = self.snapshot();

        format!(
            r#"SFX Server Metrics
==================
Uptime: {} seconds
Requests: {}

Key Exchange:
  Pending:     {}
  Initiated:   {}
  Completed:   {}
  Failed:      {}
  Expired:     {}
  Rate Limited: {}
  Completion Rate: {:.2}

Channels:
  Open: {}

Files:
  Uploaded:   {} ({} bytes)
  Downloaded: {} ({} bytes)

Errors:
  Generation Failures: {}
"#,
            snapshot.uptime_secs,
            snapshot.total_requests,
            pending_sessions,
            snapshot.sessions_initiated,
            snapshot.sessions_completed,
            snapshot.sessions_failed,
            snapshot.sessions_expired,
            snapshot.rate_limited,
            snapshot.completion_rate(),
            open_channels,
            snapshot.files_uploaded,
            snapshot.bytes_uploaded,
            snapshot.files_downloaded,
            snapshot.bytes_downloaded,
            snapshot.generation_failures,
        )
    }
}

impl Default for ServerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of all metrics at a point in time.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub total_requests: u64,
    pub sessions_initiated: u64,
    pub sessions_completed: u64,
    pub sessions_failed: u64,
    pub sessions_expired: u64,
    pub generation_failures: u64,
    pub rate_limited: u64,
    pub files_uploaded: u64,
    pub files_downloaded: u64,
    pub bytes_uploaded: u64,
    pub bytes_downloaded: u64,
}

impl MetricsSnapshot {
    /// Share of initiated exchanges that completed.
    pub fn completion_rate(&self) -> f64 {
        if self.sessions_initiated == 0 {
            0.0
        } else {
            self.sessions_completed as f64 / self.sessions_initiated as f64
        }
    }
}
