//! ShuttleOrchestrator - background STM ⇄ LTM synchronization
//!
//! Two long-running workers share one store and one remote client:
//!
//! - UploadWorker wakes every 10s and, for each user with queued records
//!   whose upload throttle has elapsed, uploads the highest-salience pending
//!   records (after deduplication) and marks them uploaded.
//! - PreloadWorker wakes every `download_interval_seconds` and copies each
//!   user's hot remote records into the store, pre-marked as uploaded.
//!
//! Users are processed concurrently within a cycle, up to
//! `max_concurrent_users`. A per-user lock keeps uploads and preloads for
//! the same user from interleaving.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use memshuttle_core::{Error, Record, RemoteMemory, StmStore};

use super::dedup::Deduplicator;
use super::stats::{Counters, ShuttleStats, UploadReport, UserShuttleStats};
use crate::config::ShuttleConfig;
use crate::{SDKError, SDKResult};

/// UploadWorker wake-up period
pub const UPLOAD_TICK: Duration = Duration::from_secs(10);

/// Candidates considered by `force_upload`
pub const FORCE_UPLOAD_LIMIT: usize = 100;

/// App id given to preloaded records whose remote metadata carries none
const PRELOAD_APP_ID: &str = "ltm";

/// Per-user scheduling state
#[derive(Debug, Default)]
struct UserState {
    /// Record ids awaiting upload, oldest first
    queue: Vec<String>,
    last_upload: Option<Instant>,
    last_upload_at: Option<DateTime<Utc>>,
    last_preload: Option<Instant>,
    last_preload_at: Option<DateTime<Utc>>,
}

/// State shared between the orchestrator handle and its workers
struct Shared {
    config: ShuttleConfig,
    stm: Arc<StmStore>,
    ltm: Arc<dyn RemoteMemory>,
    dedup: Deduplicator,
    counters: Counters,
    users: Mutex<HashMap<String, UserState>>,
    user_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

/// Handles for the running worker tasks
struct Workers {
    upload: JoinHandle<()>,
    preload: JoinHandle<()>,
}

/// Moves records between the short-term store and the remote service.
pub struct ShuttleOrchestrator {
    shared: Arc<Shared>,
    workers: tokio::sync::Mutex<Option<Workers>>,
    running: AtomicBool,
}

impl ShuttleOrchestrator {
    /// Create a stopped orchestrator
    pub fn new(
        config: ShuttleConfig,
        stm: Arc<StmStore>,
        ltm: Arc<dyn RemoteMemory>,
    ) -> SDKResult<Self> {
        config.validate()?;
        let dedup = Deduplicator::from_config(&config);

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                stm,
                ltm,
                dedup,
                counters: Counters::default(),
                users: Mutex::new(HashMap::new()),
                user_locks: Mutex::new(HashMap::new()),
            }),
            workers: tokio::sync::Mutex::new(None),
            running: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &ShuttleConfig {
        &self.shared.config
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Spawn the upload and preload workers. No-op when already running.
    pub async fn start(&self) {
        let mut workers = self.workers.lock().await;
        if workers.is_some() {
            debug!("Shuttle already running");
            return;
        }

        let upload = tokio::spawn(upload_loop(Arc::clone(&self.shared)));
        let preload = tokio::spawn(preload_loop(Arc::clone(&self.shared)));
        *workers = Some(Workers { upload, preload });
        self.running.store(true, Ordering::SeqCst);

        info!(
            upload_interval_secs = self.shared.config.upload_interval_seconds,
            download_interval_secs = self.shared.config.download_interval_seconds,
            "Shuttle started"
        );
    }

    /// Cancel both workers and wait for them to finish.
    pub async fn stop(&self) {
        let mut workers = self.workers.lock().await;
        let Some(Workers { upload, preload }) = workers.take() else {
            return;
        };

        upload.abort();
        preload.abort();
        for handle in [upload, preload] {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    error!(error = %e, "Shuttle worker terminated abnormally");
                }
            }
        }
        self.running.store(false, Ordering::SeqCst);
        info!("Shuttle stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Queue a record for upload.
    ///
    /// Returns false when the user's queue is full; the record stays pending
    /// and is still picked up by later batches for that user.
    pub fn enqueue(&self, user_id: &str, record_id: &str) -> SDKResult<bool> {
        let mut users = self.shared.lock_users()?;
        let state = users.entry(user_id.to_string()).or_default();
        if state.queue.iter().any(|id| id == record_id) {
            return Ok(true);
        }
        if state.queue.len() >= self.shared.config.max_pending_uploads {
            warn!(
                user_id = %user_id,
                max_pending = self.shared.config.max_pending_uploads,
                "Upload queue full"
            );
            return Ok(false);
        }
        state.queue.push(record_id.to_string());
        Ok(true)
    }

    /// Queued record ids for a user
    pub fn pending_count(&self, user_id: &str) -> SDKResult<usize> {
        let users = self.shared.lock_users()?;
        Ok(users.get(user_id).map_or(0, |s| s.queue.len()))
    }

    /// Upload a user's pending records now, bypassing the throttle and the
    /// salience floor. Never fails; internal errors are logged and reported
    /// as an empty result.
    pub async fn force_upload(&self, user_id: &str) -> UploadReport {
        match self.shared.upload_user(user_id, FORCE_UPLOAD_LIMIT, false).await {
            Ok(report) => {
                info!(
                    user_id = %user_id,
                    uploaded = report.uploaded,
                    failed = report.failed,
                    deduplicated = report.deduplicated,
                    "Forced upload finished"
                );
                report
            }
            Err(e) => {
                error!(user_id = %user_id, error = %e, "Forced upload failed");
                UploadReport::default()
            }
        }
    }

    /// Run one upload cycle immediately. Returns the number of users processed.
    pub async fn run_upload_cycle(&self) -> usize {
        self.shared.upload_cycle().await
    }

    /// Run one preload cycle immediately. Returns the number of users processed.
    pub async fn run_preload_cycle(&self) -> usize {
        self.shared.preload_cycle().await
    }

    /// Counter snapshot, plus scheduling state when a user is given
    pub fn stats(&self, user_id: Option<&str>) -> SDKResult<ShuttleStats> {
        let user = match user_id {
            Some(user_id) => {
                let users = self.shared.lock_users()?;
                let state = users.get(user_id);
                Some(UserShuttleStats {
                    user_id: user_id.to_string(),
                    pending_uploads: state.map_or(0, |s| s.queue.len()),
                    last_upload_at: state.and_then(|s| s.last_upload_at),
                    last_preload_at: state.and_then(|s| s.last_preload_at),
                })
            }
            None => None,
        };
        Ok(ShuttleStats::snapshot(
            &self.shared.counters,
            self.is_running(),
            user,
        ))
    }
}

impl Drop for ShuttleOrchestrator {
    fn drop(&mut self) {
        if let Some(workers) = self.workers.get_mut().take() {
            workers.upload.abort();
            workers.preload.abort();
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Workers
// ─────────────────────────────────────────────────────────────────────────────

async fn upload_loop(shared: Arc<Shared>) {
    let mut ticker = interval_at(Instant::now() + UPLOAD_TICK, UPLOAD_TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        shared.upload_cycle().await;
    }
}

async fn preload_loop(shared: Arc<Shared>) {
    let period = shared.config.download_interval();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        shared.preload_cycle().await;
    }
}

impl Shared {
    fn lock_users(&self) -> Result<MutexGuard<'_, HashMap<String, UserState>>, Error> {
        self.users.lock().map_err(|_| Error::LockPoisoned)
    }

    fn user_lock(&self, user_id: &str) -> SDKResult<Arc<tokio::sync::Mutex<()>>> {
        let mut locks = self.user_locks.lock().map_err(|_| Error::LockPoisoned)?;
        Ok(Arc::clone(locks.entry(user_id.to_string()).or_default()))
    }

    fn users_due_for_upload(&self, now: Instant) -> SDKResult<Vec<String>> {
        let interval = self.config.upload_interval();
        let users = self.lock_users()?;
        Ok(users
            .iter()
            .filter(|(_, s)| !s.queue.is_empty())
            .filter(|(_, s)| s.last_upload.is_none_or(|t| now.duration_since(t) >= interval))
            .map(|(user_id, _)| user_id.clone())
            .collect())
    }

    fn users_due_for_preload(&self, now: Instant) -> SDKResult<Vec<String>> {
        let interval = self.config.preload_interval();
        let known = self.stm.users()?;
        let users = self.lock_users()?;
        Ok(known
            .into_iter()
            .filter(|user_id| {
                users
                    .get(user_id)
                    .and_then(|s| s.last_preload)
                    .is_none_or(|t| now.duration_since(t) >= interval)
            })
            .collect())
    }

    async fn upload_cycle(&self) -> usize {
        if !self.ltm.is_ready() {
            debug!("LTM not ready, skipping upload cycle");
            return 0;
        }
        let due = match self.users_due_for_upload(Instant::now()) {
            Ok(due) => due,
            Err(e) => {
                error!(error = %e, "Failed to collect users for upload");
                return 0;
            }
        };
        let processed = due.len();

        for_each_user(due, self.config.max_concurrent_users, |user_id| async move {
            let report = self
                .upload_user(&user_id, self.config.batch_size, true)
                .await?;
            if report.total_candidates > 0 {
                debug!(
                    user_id = %user_id,
                    uploaded = report.uploaded,
                    failed = report.failed,
                    deduplicated = report.deduplicated,
                    "Upload batch finished"
                );
            }
            Ok(())
        })
        .await;

        processed
    }

    async fn preload_cycle(&self) -> usize {
        if !self.ltm.is_ready() {
            debug!("LTM not ready, skipping preload cycle");
            return 0;
        }
        let due = match self.users_due_for_preload(Instant::now()) {
            Ok(due) => due,
            Err(e) => {
                error!(error = %e, "Failed to collect users for preload");
                return 0;
            }
        };
        let processed = due.len();

        for_each_user(due, self.config.max_concurrent_users, |user_id| async move {
            let inserted = self.preload_user(&user_id).await?;
            if inserted > 0 {
                debug!(user_id = %user_id, inserted, "Preloaded hot records");
            }
            Ok(())
        })
        .await;

        processed
    }

    /// Upload one user's batch. `periodic` applies the salience floor.
    async fn upload_user(
        &self,
        user_id: &str,
        limit: usize,
        periodic: bool,
    ) -> SDKResult<UploadReport> {
        let lock = self.user_lock(user_id)?;
        let _guard = lock.lock().await;

        let mut candidates = self.stm.upload_candidates(user_id, limit)?;
        if periodic {
            let floor = self.config.min_salience_score;
            candidates.retain(|r| r.salience_score >= floor);
        }
        let mut report = UploadReport {
            total_candidates: candidates.len(),
            ..Default::default()
        };

        // Periodic batches stay under the byte cap; the rest waits for a
        // later cycle and is reported as not sent.
        let mut deferred = 0;
        if periodic {
            candidates = cap_batch_bytes(candidates, self.config.max_batch_bytes());
            deferred = report.total_candidates - candidates.len();
        }

        let to_upload = if self.config.enable_dedup && !candidates.is_empty() {
            let outcome = self
                .dedup
                .filter(self.ltm.as_ref(), user_id, candidates)
                .await;
            for duplicate in &outcome.duplicates {
                self.stm
                    .mark_uploaded(&duplicate.record.id, &duplicate.remote_id)?;
            }
            report.deduplicated = outcome.duplicates.len();
            outcome.kept
        } else {
            candidates
        };

        let mut bytes = 0u64;
        let batch = tokio::time::timeout(self.config.batch_timeout(), async {
            for record in &to_upload {
                let remote = self
                    .ltm
                    .upload(&record.content, user_id, &record.app_id, &record.metadata)
                    .await;
                match remote {
                    Some(remote) => {
                        self.stm.mark_uploaded(&record.id, &remote.id)?;
                        report.uploaded += 1;
                        bytes += record.size_bytes() as u64;
                    }
                    None => report.failed += 1,
                }
            }
            Ok::<(), SDKError>(())
        })
        .await;

        match batch {
            Ok(result) => result?,
            Err(_) => {
                let unsent = to_upload.len() - report.uploaded - report.failed;
                warn!(
                    user_id = %user_id,
                    unsent,
                    timeout_secs = self.config.batch_timeout_seconds,
                    "Upload batch timed out"
                );
                report.failed += unsent;
            }
        }

        report.failed += deferred;
        self.counters.record_upload(&report, bytes);

        self.finish_upload(user_id)?;
        Ok(report)
    }

    /// Stamp the throttle and resync the queue with the store: settled ids
    /// drop out, and records still pending (failed, deferred, or never
    /// queued because the queue was full) keep the user due.
    fn finish_upload(&self, user_id: &str) -> SDKResult<()> {
        let max_pending = self.config.max_pending_uploads;
        let pending: Vec<String> = self
            .stm
            .upload_candidates(user_id, max_pending)?
            .into_iter()
            .map(|r| r.id)
            .collect();
        let pending_set: HashSet<&str> = pending.iter().map(String::as_str).collect();

        let mut users = self.lock_users()?;
        let state = users.entry(user_id.to_string()).or_default();
        state.last_upload = Some(Instant::now());
        state.last_upload_at = Some(Utc::now());
        state.queue.retain(|id| pending_set.contains(id.as_str()));

        let queued: HashSet<String> = state.queue.iter().cloned().collect();
        for id in pending {
            if state.queue.len() >= max_pending {
                break;
            }
            if !queued.contains(&id) {
                state.queue.push(id);
            }
        }
        Ok(())
    }

    /// Copy a user's hot remote records into the store.
    async fn preload_user(&self, user_id: &str) -> SDKResult<usize> {
        let lock = self.user_lock(user_id)?;
        let _guard = lock.lock().await;

        let hot = self.ltm.hot_records(user_id, self.config.preload_count).await;
        let mut local = self.stm.contents_for_user(user_id)?;
        let mut inserted = 0;

        for remote in hot {
            if remote.content.is_empty() || local.contains(&remote.content) {
                continue;
            }
            let app_id = remote.app_id().unwrap_or(PRELOAD_APP_ID).to_string();
            let record = self
                .stm
                .add(&remote.content, user_id, &app_id, remote.metadata.clone())?;
            self.stm.mark_uploaded(&record.id, &remote.id)?;
            local.insert(remote.content);
            inserted += 1;
        }

        self.counters.record_preloads(inserted);

        let mut users = self.lock_users()?;
        let state = users.entry(user_id.to_string()).or_default();
        state.last_preload = Some(Instant::now());
        state.last_preload_at = Some(Utc::now());
        Ok(inserted)
    }
}

/// Run `work` for each user, at most `limit` at a time. A user's error is
/// logged and never stops the others.
async fn for_each_user<F, Fut>(users: Vec<String>, limit: usize, work: F)
where
    F: Fn(String) -> Fut,
    Fut: std::future::Future<Output = SDKResult<()>>,
{
    stream::iter(users)
        .for_each_concurrent(limit, |user_id| {
            let task = work(user_id.clone());
            async move {
                if let Err(e) = task.await {
                    error!(user_id = %user_id, error = %e, "Shuttle cycle failed for user");
                }
            }
        })
        .await;
}

/// Keep the longest prefix that fits in `max_bytes`. The first record is
/// always kept so an oversized record cannot stall its user forever.
fn cap_batch_bytes(candidates: Vec<Record>, max_bytes: usize) -> Vec<Record> {
    let mut total = 0usize;
    let mut batch = Vec::with_capacity(candidates.len());
    for record in candidates {
        let size = record.size_bytes();
        if !batch.is_empty() && total + size > max_bytes {
            break;
        }
        total += size;
        batch.push(record);
    }
    batch
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use memshuttle_core::{Metadata, RemoteRecord, RemoteStats, StmConfig, UploadStatus};
    use std::sync::atomic::AtomicUsize;

    /// In-memory stand-in for the remote service.
    #[derive(Default)]
    struct FakeRemote {
        not_ready: bool,
        fail_uploads: AtomicBool,
        fail_contents: Mutex<HashSet<String>>,
        upload_delay: Option<Duration>,
        stored: Mutex<Vec<RemoteRecord>>,
        hot: Vec<RemoteRecord>,
        upload_calls: AtomicUsize,
    }

    fn remote(id: &str, content: &str) -> RemoteRecord {
        serde_json::from_value(serde_json::json!({ "id": id, "content": content })).unwrap()
    }

    impl FakeRemote {
        fn with_existing(records: Vec<RemoteRecord>) -> Self {
            Self {
                stored: Mutex::new(records),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl RemoteMemory for FakeRemote {
        fn is_ready(&self) -> bool {
            !self.not_ready
        }

        async fn upload(
            &self,
            content: &str,
            _user_id: &str,
            _app_id: &str,
            _metadata: &Metadata,
        ) -> Option<RemoteRecord> {
            if let Some(delay) = self.upload_delay {
                tokio::time::sleep(delay).await;
            }
            self.upload_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_uploads.load(Ordering::SeqCst)
                || self.fail_contents.lock().unwrap().contains(content)
            {
                return None;
            }
            let mut stored = self.stored.lock().unwrap();
            let record = remote(&format!("m-{}", stored.len() + 1), content);
            stored.push(record.clone());
            Some(record)
        }

        async fn search(&self, _query: &str, _user_id: &str, _limit: usize) -> Vec<RemoteRecord> {
            Vec::new()
        }

        async fn get(&self, remote_id: &str, _user_id: &str) -> Option<RemoteRecord> {
            let stored = self.stored.lock().unwrap();
            stored.iter().find(|r| r.id == remote_id).cloned()
        }

        async fn delete(&self, _remote_id: &str, _user_id: &str) -> bool {
            false
        }

        async fn hot_records(&self, _user_id: &str, limit: usize) -> Vec<RemoteRecord> {
            self.hot.iter().take(limit).cloned().collect()
        }

        async fn recent(&self, _user_id: &str, limit: usize) -> Vec<RemoteRecord> {
            let stored = self.stored.lock().unwrap();
            stored.iter().rev().take(limit).cloned().collect()
        }

        async fn stats(&self, _user_id: Option<&str>) -> Option<RemoteStats> {
            None
        }
    }

    fn setup(config: ShuttleConfig, fake: FakeRemote) -> (Arc<StmStore>, Arc<FakeRemote>, ShuttleOrchestrator) {
        let stm = Arc::new(StmStore::new(StmConfig::with_max_memories(100)));
        let fake = Arc::new(fake);
        let shuttle = ShuttleOrchestrator::new(config, stm.clone(), fake.clone()).unwrap();
        (stm, fake, shuttle)
    }

    fn remember(stm: &StmStore, shuttle: &ShuttleOrchestrator, user_id: &str, content: &str) -> Record {
        let record = stm.add(content, user_id, "app", Metadata::new()).unwrap();
        assert!(shuttle.enqueue(user_id, &record.id).unwrap());
        record
    }

    #[tokio::test]
    async fn test_force_upload_marks_records_uploaded() {
        let (stm, _fake, shuttle) = setup(ShuttleConfig::default(), FakeRemote::default());
        let a = remember(&stm, &shuttle, "u1", "likes tea");
        let b = remember(&stm, &shuttle, "u1", "drives a bike");

        let report = shuttle.force_upload("u1").await;
        assert_eq!(report.uploaded, 2);
        assert_eq!(report.failed, 0);
        assert_eq!(report.total_candidates, 2);

        for id in [&a.id, &b.id] {
            let record = stm.peek(id).unwrap().unwrap();
            assert_eq!(record.upload_status, UploadStatus::Uploaded);
            assert!(record.remote_id().is_some());
        }
        assert_eq!(shuttle.pending_count("u1").unwrap(), 0);

        let stats = shuttle.stats(Some("u1")).unwrap();
        assert_eq!(stats.uploads_completed, 2);
        assert_eq!(stats.bytes_uploaded, ("likes tea".len() + "drives a bike".len()) as u64);
        assert!(stats.user.unwrap().last_upload_at.is_some());
    }

    #[tokio::test]
    async fn test_dedup_filters_exact_content_only() {
        let fake = FakeRemote::with_existing(vec![remote("m-existing", "X")]);
        let (stm, fake, shuttle) = setup(ShuttleConfig::default(), fake);
        let same = remember(&stm, &shuttle, "u1", "X");
        let trailing = remember(&stm, &shuttle, "u1", "X ");

        let report = shuttle.force_upload("u1").await;
        assert_eq!(report.deduplicated, 1);
        assert_eq!(report.uploaded, 1);
        assert_eq!(fake.upload_calls.load(Ordering::SeqCst), 1);
        assert_eq!(shuttle.stats(None).unwrap().dedup_saves, 1);

        // The duplicate is settled locally against the existing remote record
        let same = stm.peek(&same.id).unwrap().unwrap();
        assert_eq!(same.upload_status, UploadStatus::Uploaded);
        assert_eq!(same.remote_id(), Some("m-existing"));

        // "X " differs from "X" and went out as its own upload
        let trailing = stm.peek(&trailing.id).unwrap().unwrap();
        assert_eq!(trailing.upload_status, UploadStatus::Uploaded);
        assert_ne!(trailing.remote_id(), Some("m-existing"));
    }

    #[tokio::test]
    async fn test_failed_uploads_stay_pending() {
        let fake = FakeRemote::default();
        fake.fail_uploads.store(true, Ordering::SeqCst);
        let (stm, fake, shuttle) = setup(ShuttleConfig::default(), fake);
        let record = remember(&stm, &shuttle, "u1", "likes tea");

        let report = shuttle.force_upload("u1").await;
        assert_eq!(report.uploaded, 0);
        assert_eq!(report.failed, 1);
        assert_eq!(
            stm.peek(&record.id).unwrap().unwrap().upload_status,
            UploadStatus::Pending
        );
        assert_eq!(shuttle.pending_count("u1").unwrap(), 1);

        fake.fail_uploads.store(false, Ordering::SeqCst);
        let report = shuttle.force_upload("u1").await;
        assert_eq!(report.uploaded, 1);
        assert_eq!(shuttle.stats(None).unwrap().uploads_failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_cycle_respects_throttle() {
        let config = ShuttleConfig::default().with_upload_interval(60);
        let (stm, fake, shuttle) = setup(config, FakeRemote::default());

        remember(&stm, &shuttle, "u1", "first");
        assert_eq!(shuttle.run_upload_cycle().await, 1);
        assert_eq!(fake.upload_calls.load(Ordering::SeqCst), 1);

        remember(&stm, &shuttle, "u1", "second");
        assert_eq!(shuttle.run_upload_cycle().await, 0);
        assert_eq!(fake.upload_calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(shuttle.run_upload_cycle().await, 1);
        assert_eq!(fake.upload_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_salience_floor_only_applies_to_periodic_uploads() {
        let mut config = ShuttleConfig::default();
        config.min_salience_score = 0.99;
        let (stm, fake, shuttle) = setup(config, FakeRemote::default());
        let record = remember(&stm, &shuttle, "u1", "fresh but unread");

        assert_eq!(shuttle.run_upload_cycle().await, 1);
        assert_eq!(fake.upload_calls.load(Ordering::SeqCst), 0);
        assert_eq!(shuttle.pending_count("u1").unwrap(), 1);

        let report = shuttle.force_upload("u1").await;
        assert_eq!(report.uploaded, 1);
        assert_eq!(
            stm.peek(&record.id).unwrap().unwrap().upload_status,
            UploadStatus::Uploaded
        );
    }

    #[tokio::test]
    async fn test_preload_skips_existing_content() {
        let fake = FakeRemote {
            hot: vec![
                remote("m-1", "likes tea"),
                remote("m-2", "drives a bike"),
                remote("m-3", "drives a bike"),
            ],
            ..Default::default()
        };
        let (stm, _fake, shuttle) = setup(ShuttleConfig::default(), fake);
        stm.add("likes tea", "u1", "app", Metadata::new()).unwrap();

        assert_eq!(shuttle.run_preload_cycle().await, 1);
        assert_eq!(stm.count().unwrap(), 2);
        assert_eq!(shuttle.stats(None).unwrap().preloads_completed, 1);

        let bike = stm
            .list_by_user("u1", 10, None)
            .unwrap()
            .into_iter()
            .find(|r| r.content == "drives a bike")
            .unwrap();
        assert_eq!(bike.upload_status, UploadStatus::Uploaded);
        assert_eq!(bike.remote_id(), Some("m-2"));
        assert_eq!(bike.app_id, PRELOAD_APP_ID);

        // Preloaded records are never re-uploaded
        let candidates = stm.upload_candidates("u1", 10).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].content, "likes tea");

        // Throttled until the preload interval passes
        assert_eq!(shuttle.run_preload_cycle().await, 0);
    }

    #[tokio::test]
    async fn test_not_ready_remote_skips_cycles() {
        let fake = FakeRemote {
            not_ready: true,
            ..Default::default()
        };
        let (stm, fake, shuttle) = setup(ShuttleConfig::default(), fake);
        remember(&stm, &shuttle, "u1", "likes tea");

        assert_eq!(shuttle.run_upload_cycle().await, 0);
        assert_eq!(shuttle.run_preload_cycle().await, 0);
        assert_eq!(fake.upload_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_enqueue_respects_cap() {
        let mut config = ShuttleConfig::default();
        config.max_pending_uploads = 2;
        let (_stm, _fake, shuttle) = setup(config, FakeRemote::default());

        assert!(shuttle.enqueue("u1", "u1_a").unwrap());
        assert!(shuttle.enqueue("u1", "u1_b").unwrap());
        assert!(shuttle.enqueue("u1", "u1_a").unwrap());
        assert!(!shuttle.enqueue("u1", "u1_c").unwrap());
        assert!(shuttle.enqueue("u2", "u2_a").unwrap());
        assert_eq!(shuttle.pending_count("u1").unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_workers_run_until_stopped() {
        let (stm, fake, shuttle) = setup(ShuttleConfig::default(), FakeRemote::default());
        shuttle.start().await;
        shuttle.start().await;
        assert!(shuttle.is_running());

        remember(&stm, &shuttle, "u1", "likes tea");
        tokio::time::sleep(UPLOAD_TICK + Duration::from_secs(1)).await;
        assert_eq!(fake.upload_calls.load(Ordering::SeqCst), 1);

        shuttle.stop().await;
        assert!(!shuttle.is_running());

        remember(&stm, &shuttle, "u1", "drives a bike");
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(fake.upload_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_stamped_when_every_upload_fails() {
        let config = ShuttleConfig::default().with_upload_interval(60);
        let fake = FakeRemote::default();
        fake.fail_uploads.store(true, Ordering::SeqCst);
        let (stm, fake, shuttle) = setup(config, fake);
        remember(&stm, &shuttle, "u1", "likes tea");

        assert_eq!(shuttle.run_upload_cycle().await, 1);
        assert_eq!(fake.upload_calls.load(Ordering::SeqCst), 1);
        assert!(shuttle.stats(Some("u1")).unwrap().user.unwrap().last_upload_at.is_some());

        // Still throttled even though nothing went out
        assert_eq!(shuttle.run_upload_cycle().await, 0);
        assert_eq!(fake.upload_calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(shuttle.run_upload_cycle().await, 1);
        assert_eq!(fake.upload_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_force_upload_sends_past_byte_cap() {
        let mut config = ShuttleConfig::default();
        config.max_batch_size_mb = 1;
        let (stm, fake, shuttle) = setup(config, FakeRemote::default());
        for prefix in ["a", "b", "c"] {
            remember(&stm, &shuttle, "u1", &prefix.repeat(600 * 1024));
        }

        let report = shuttle.force_upload("u1").await;
        assert_eq!(report.total_candidates, 3);
        assert_eq!(report.uploaded, 3);
        assert_eq!(report.failed, 0);
        assert_eq!(fake.upload_calls.load(Ordering::SeqCst), 3);
        assert!(stm.upload_candidates("u1", 10).unwrap().is_empty());
        assert_eq!(shuttle.pending_count("u1").unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_upload_defers_records_past_byte_cap() {
        let mut config = ShuttleConfig::default().with_upload_interval(60);
        config.max_batch_size_mb = 1;
        let (stm, fake, shuttle) = setup(config, FakeRemote::default());
        for prefix in ["a", "b", "c"] {
            remember(&stm, &shuttle, "u1", &prefix.repeat(600 * 1024));
        }

        assert_eq!(shuttle.run_upload_cycle().await, 1);
        assert_eq!(fake.upload_calls.load(Ordering::SeqCst), 1);
        let stats = shuttle.stats(Some("u1")).unwrap();
        assert_eq!(stats.uploads_completed, 1);
        assert_eq!(stats.uploads_failed, 2);
        assert_eq!(stats.user.unwrap().pending_uploads, 2);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(shuttle.run_upload_cycle().await, 1);
        assert_eq!(fake.upload_calls.load(Ordering::SeqCst), 2);
        assert_eq!(stm.upload_candidates("u1", 10).unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_records_past_full_queue_are_retried() {
        let mut config = ShuttleConfig::default().with_upload_interval(60);
        config.max_pending_uploads = 1;
        let (stm, fake, shuttle) = setup(config, FakeRemote::default());

        let a = remember(&stm, &shuttle, "u1", "a");
        let b = stm.add("b", "u1", "app", Metadata::new()).unwrap();
        assert!(!shuttle.enqueue("u1", &b.id).unwrap());
        fake.fail_contents.lock().unwrap().insert("b".to_string());

        assert_eq!(shuttle.run_upload_cycle().await, 1);
        assert_eq!(stm.peek(&a.id).unwrap().unwrap().upload_status, UploadStatus::Uploaded);
        assert_eq!(stm.peek(&b.id).unwrap().unwrap().upload_status, UploadStatus::Pending);
        // The failed overflow record now holds the queue slot
        assert_eq!(shuttle.pending_count("u1").unwrap(), 1);

        fake.fail_contents.lock().unwrap().clear();
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(shuttle.run_upload_cycle().await, 1);
        assert_eq!(stm.peek(&b.id).unwrap().unwrap().upload_status, UploadStatus::Uploaded);
        assert_eq!(shuttle.pending_count("u1").unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_timeout_leaves_unsent_records_pending() {
        let mut config = ShuttleConfig::default();
        config.batch_timeout_seconds = 5;
        let fake = FakeRemote {
            upload_delay: Some(Duration::from_secs(2)),
            ..Default::default()
        };
        let (stm, _fake, shuttle) = setup(config, fake);
        for content in ["one", "two", "three", "four"] {
            remember(&stm, &shuttle, "u1", content);
        }

        let report = shuttle.force_upload("u1").await;
        assert_eq!(report.total_candidates, 4);
        assert_eq!(report.uploaded, 2);
        assert_eq!(report.failed, 2);
        assert_eq!(stm.upload_candidates("u1", 10).unwrap().len(), 2);
        assert_eq!(shuttle.pending_count("u1").unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fan_out_isolates_errors_and_caps_concurrency() {
        let in_flight = &AtomicUsize::new(0);
        let peak = &AtomicUsize::new(0);
        let finished = &Mutex::new(Vec::new());
        let users = (1..=6).map(|i| format!("u{i}")).collect();

        for_each_user(users, 2, |user_id| async move {
            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            in_flight.fetch_sub(1, Ordering::SeqCst);

            if user_id == "u3" {
                return Err(SDKError::invalid_operation("store unavailable"));
            }
            finished.lock().unwrap().push(user_id);
            Ok(())
        })
        .await;

        assert_eq!(peak.load(Ordering::SeqCst), 2);
        let mut finished = finished.lock().unwrap().clone();
        finished.sort();
        assert_eq!(finished, vec!["u1", "u2", "u4", "u5", "u6"]);
    }

    #[test]
    fn test_cap_batch_bytes() {
        let make = |content: &str| {
            Record::new(
                format!("u1_{content}"),
                content.into(),
                "u1".into(),
                "app".into(),
                Metadata::new(),
                Utc::now(),
            )
        };
        let batch = cap_batch_bytes(vec![make("aaaa"), make("bbbb"), make("cc")], 9);
        assert_eq!(batch.len(), 2);

        let oversized = cap_batch_bytes(vec![make("aaaaaaaaaaaa"), make("b")], 4);
        assert_eq!(oversized.len(), 1);
    }
}
