//! Shuttle statistics.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic shuttle counters.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub uploads_completed: AtomicU64,
    pub uploads_failed: AtomicU64,
    pub preloads_completed: AtomicU64,
    pub bytes_uploaded: AtomicU64,
    pub dedup_saves: AtomicU64,
}

impl Counters {
    /// Fold one batch outcome into the totals.
    pub fn record_upload(&self, report: &UploadReport, bytes: u64) {
        self.uploads_completed
            .fetch_add(report.uploaded as u64, Ordering::Relaxed);
        self.uploads_failed
            .fetch_add(report.failed as u64, Ordering::Relaxed);
        self.dedup_saves
            .fetch_add(report.deduplicated as u64, Ordering::Relaxed);
        self.bytes_uploaded.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_preloads(&self, inserted: usize) {
        self.preloads_completed
            .fetch_add(inserted as u64, Ordering::Relaxed);
    }
}

/// Snapshot returned by `ShuttleOrchestrator::stats`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShuttleStats {
    pub running: bool,
    pub uploads_completed: u64,
    pub uploads_failed: u64,
    pub preloads_completed: u64,
    pub bytes_uploaded: u64,
    pub dedup_saves: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserShuttleStats>,
}

impl ShuttleStats {
    pub(crate) fn snapshot(counters: &Counters, running: bool, user: Option<UserShuttleStats>) -> Self {
        Self {
            running,
            uploads_completed: counters.uploads_completed.load(Ordering::Relaxed),
            uploads_failed: counters.uploads_failed.load(Ordering::Relaxed),
            preloads_completed: counters.preloads_completed.load(Ordering::Relaxed),
            bytes_uploaded: counters.bytes_uploaded.load(Ordering::Relaxed),
            dedup_saves: counters.dedup_saves.load(Ordering::Relaxed),
            user,
        }
    }
}

/// Per-user scheduling state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserShuttleStats {
    pub user_id: String,
    pub pending_uploads: usize,
    pub last_upload_at: Option<DateTime<Utc>>,
    pub last_preload_at: Option<DateTime<Utc>>,
}

/// Outcome of uploading one user's batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReport {
    pub uploaded: usize,
    pub failed: usize,
    pub deduplicated: usize,
    pub total_candidates: usize,
}
