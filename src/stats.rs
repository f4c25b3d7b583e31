//! Session statistics.
//!
//! Counters are updated from the device loop, the classifier thread and the
//! supervisors, so everything is atomic. Totals can be persisted across runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Live counters for the current agent run.
#[derive(Debug)]
pub struct SessionStats {
    samples_received: AtomicU64,
    windows_classified: AtomicU64,
    results_dispatched: AtomicU64,
    results_discarded: AtomicU64,
    notification_failures: AtomicU64,
    capture_records_written: AtomicU64,
    capture_jobs_completed: AtomicU64,
    capture_jobs_timed_out: AtomicU64,
    probes_succeeded: AtomicU64,
    probes_failed: AtomicU64,
    session_start: DateTime<Utc>,
    persist_path: Option<PathBuf>,
}

impl SessionStats {
    pub fn new() -> Self {
        Self {
            samples_received: AtomicU64::new(0),
            windows_classified: AtomicU64::new(0),
            results_dispatched: AtomicU64::new(0),
            results_discarded: AtomicU64::new(0),
            notification_failures: AtomicU64::new(0),
            capture_records_written: AtomicU64::new(0),
            capture_jobs_completed: AtomicU64::new(0),
            capture_jobs_timed_out: AtomicU64::new(0),
            probes_succeeded: AtomicU64::new(0),
            probes_failed: AtomicU64::new(0),
            session_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Create a stats object that resumes from, and saves to, `path`.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut stats = Self::new();
        stats.persist_path = Some(path);

        if let Err(e) = stats.load() {
            tracing::warn!(error = %e, "could not load previous session statistics");
        }

        stats
    }

    pub fn record_sample(&self) {
        self.samples_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_window_classified(&self) {
        self.windows_classified.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_result_dispatched(&self) {
        self.results_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_result_discarded(&self) {
        self.results_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_notification_failure(&self) {
        self.notification_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_capture_completed(&self, records: u64) {
        self.capture_records_written
            .fetch_add(records, Ordering::Relaxed);
        self.capture_jobs_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_capture_timed_out(&self) {
        self.capture_jobs_timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_probe(&self, reachable: bool) {
        if reachable {
            self.probes_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.probes_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            samples_received: self.samples_received.load(Ordering::Relaxed),
            windows_classified: self.windows_classified.load(Ordering::Relaxed),
            results_dispatched: self.results_dispatched.load(Ordering::Relaxed),
            results_discarded: self.results_discarded.load(Ordering::Relaxed),
            notification_failures: self.notification_failures.load(Ordering::Relaxed),
            capture_records_written: self.capture_records_written.load(Ordering::Relaxed),
            capture_jobs_completed: self.capture_jobs_completed.load(Ordering::Relaxed),
            capture_jobs_timed_out: self.capture_jobs_timed_out.load(Ordering::Relaxed),
            probes_succeeded: self.probes_succeeded.load(Ordering::Relaxed),
            probes_failed: self.probes_failed.load(Ordering::Relaxed),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Session Statistics:\n\
             - Samples received: {}\n\
             - Windows classified: {}\n\
             - Results dispatched: {}\n\
             - Results below threshold: {}\n\
             - Notification failures: {}\n\
             - Capture jobs completed: {} ({} records)\n\
             - Capture jobs timed out: {}\n\
             - Probes: {} reachable, {} unreachable\n\
             - Session duration: {} seconds",
            stats.samples_received,
            stats.windows_classified,
            stats.results_dispatched,
            stats.results_discarded,
            stats.notification_failures,
            stats.capture_jobs_completed,
            stats.capture_records_written,
            stats.capture_jobs_timed_out,
            stats.probes_succeeded,
            stats.probes_failed,
            stats.session_duration_secs
        )
    }

    /// Save totals to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let stats = self.stats();
            let persisted = PersistedStats {
                samples_received: stats.samples_received,
                windows_classified: stats.windows_classified,
                results_dispatched: stats.results_dispatched,
                results_discarded: stats.results_discarded,
                notification_failures: stats.notification_failures,
                capture_records_written: stats.capture_records_written,
                capture_jobs_completed: stats.capture_jobs_completed,
                capture_jobs_timed_out: stats.capture_jobs_timed_out,
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;

            std::fs::write(path, json)?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;

                self.samples_received
                    .store(persisted.samples_received, Ordering::Relaxed);
                self.windows_classified
                    .store(persisted.windows_classified, Ordering::Relaxed);
                self.results_dispatched
                    .store(persisted.results_dispatched, Ordering::Relaxed);
                self.results_discarded
                    .store(persisted.results_discarded, Ordering::Relaxed);
                self.notification_failures
                    .store(persisted.notification_failures, Ordering::Relaxed);
                self.capture_records_written
                    .store(persisted.capture_records_written, Ordering::Relaxed);
                self.capture_jobs_completed
                    .store(persisted.capture_jobs_completed, Ordering::Relaxed);
                self.capture_jobs_timed_out
                    .store(persisted.capture_jobs_timed_out, Ordering::Relaxed);
            }
        }
        Ok(())
    }
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub samples_received: u64,
    pub windows_classified: u64,
    pub results_dispatched: u64,
    pub results_discarded: u64,
    pub notification_failures: u64,
    pub capture_records_written: u64,
    pub capture_jobs_completed: u64,
    pub capture_jobs_timed_out: u64,
    pub probes_succeeded: u64,
    pub probes_failed: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    samples_received: u64,
    windows_classified: u64,
    results_dispatched: u64,
    results_discarded: u64,
    notification_failures: u64,
    capture_records_written: u64,
    capture_jobs_completed: u64,
    capture_jobs_timed_out: u64,
    last_updated: DateTime<Utc>,
}

/// Thread-safe shared statistics.
pub type SharedSessionStats = Arc<SessionStats>;

pub fn create_shared_stats() -> SharedSessionStats {
    Arc::new(SessionStats::new())
}

pub fn create_shared_stats_with_persistence(path: PathBuf) -> SharedSessionStats {
    Arc::new(SessionStats::with_persistence(path))
}
