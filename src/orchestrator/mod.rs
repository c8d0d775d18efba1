// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync orchestrator: the single-flight reconciliation cycle.
//!
//! Each cycle uploads queued mutations before downloading anything, so
//! freshly-made local changes are visible before remote state is reconciled.
//! Failed uploads are rescheduled with exponential backoff through an
//! explicit delay queue and dead-lettered once the retry budget is spent.
//!
//! Cycles run on the interval timer (when `auto_sync` is on), immediately on
//! a connectivity "restored" transition, and when a rescheduled mutation
//! comes due. At most one cycle is ever active.

mod types;

pub use types::{DelayQueue, SyncCycleReport};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::records::{now_ms, ConnectionStatus, JobStatus, MutationRecord, MutationStatus};
use crate::remote::RemoteBackend;
use crate::retry::backoff_delay;
use crate::store::LocalStore;

/// Meta-slot key holding the last successful cycle timestamp (epoch millis).
pub const LAST_SYNC_KEY: &str = "last_sync_ms";

/// Single-flight reconciliation between the local store and the backend.
pub struct SyncOrchestrator {
    config: SyncConfig,
    store: Arc<dyn LocalStore>,
    backend: Arc<dyn RemoteBackend>,
    status_rx: watch::Receiver<ConnectionStatus>,
    /// Single-writer mutual-exclusion flag for the cycle
    is_syncing: AtomicBool,
    /// Retry deadlines for rescheduled mutations
    schedule: Mutex<DelayQueue>,
    /// Lifetime dead-letter count (aggregate warning surface)
    dead_letters: AtomicU64,
}

impl SyncOrchestrator {
    pub fn new(
        config: SyncConfig,
        store: Arc<dyn LocalStore>,
        backend: Arc<dyn RemoteBackend>,
        status_rx: watch::Receiver<ConnectionStatus>,
    ) -> Self {
        Self {
            config,
            store,
            backend,
            status_rx,
            is_syncing: AtomicBool::new(false),
            schedule: Mutex::new(DelayQueue::new()),
            dead_letters: AtomicU64::new(0),
        }
    }

    /// Whether a cycle is currently active.
    #[must_use]
    pub fn is_syncing(&self) -> bool {
        self.is_syncing.load(Ordering::Acquire)
    }

    /// Mutations dead-lettered since construction.
    #[must_use]
    pub fn dead_letter_count(&self) -> u64 {
        self.dead_letters.load(Ordering::Acquire)
    }

    /// Queue a local change for upload under a fresh id.
    pub async fn enqueue_upload(&self, payload: Value) -> Result<String, SyncError> {
        self.enqueue_upload_with_id(uuid::Uuid::new_v4().to_string(), payload)
            .await
    }

    /// Queue a local change for upload under a stable caller-supplied id.
    ///
    /// Idempotent by per-item status: if a mutation with this id is already
    /// pending or uploaded, nothing is re-enqueued.
    pub async fn enqueue_upload_with_id(
        &self,
        id: String,
        payload: Value,
    ) -> Result<String, SyncError> {
        if let Some(existing) = self.store.get_mutation(&id).await? {
            match existing.status {
                MutationStatus::Pending | MutationStatus::Uploaded => {
                    debug!(id = %id, status = ?existing.status, "mutation already queued, skipping re-enqueue");
                    return Ok(id);
                }
                // A dead-lettered id may be resubmitted deliberately
                MutationStatus::DeadLettered => {}
            }
        }

        let record = MutationRecord::upload(id.clone(), payload);
        self.store.put_mutation(&record).await?;
        self.schedule.lock().push(record.next_attempt_ms, id.clone());
        debug!(id = %id, "mutation enqueued for upload");
        Ok(id)
    }

    /// Run one reconciliation cycle.
    ///
    /// Guarded by the `is_syncing` flag: a call while another cycle is active
    /// returns a skipped report immediately. Disconnected cycles short-circuit
    /// the same way.
    #[tracing::instrument(skip(self), fields(uploaded, downloaded, failed))]
    pub async fn sync_cycle(&self) -> SyncCycleReport {
        if self
            .is_syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("sync cycle already active, skipping");
            return SyncCycleReport::skipped();
        }

        let report = self.cycle_inner().await;
        self.is_syncing.store(false, Ordering::Release);

        tracing::Span::current().record("uploaded", report.uploaded);
        tracing::Span::current().record("downloaded", report.downloaded);
        tracing::Span::current().record("failed", report.failed);
        report
    }

    async fn cycle_inner(&self) -> SyncCycleReport {
        if !self.status_rx.borrow().is_connected {
            debug!("offline, sync cycle short-circuited");
            return SyncCycleReport::skipped();
        }

        let start = std::time::Instant::now();
        let mut report = SyncCycleReport::default();
        let now = now_ms();

        // Drop schedule entries this cycle covers; the store is authoritative
        self.schedule.lock().pop_due(now);

        // Phase 1: uploads. Always complete before any download so local
        // changes are not overwritten by stale remote reads.
        self.upload_pending(now, &mut report).await;

        // Phase 2: downloads.
        self.merge_job_results(&mut report).await;
        self.pull_notifications(&mut report).await;

        // Phase 3: remember when this cycle ran.
        if let Err(e) = self.store.put_meta(LAST_SYNC_KEY, &now_ms().to_string()).await {
            warn!(error = %e, "failed to persist last-sync timestamp");
            report.errors.push(format!("last-sync write failed: {e}"));
        }

        crate::metrics::record_sync_cycle(report.uploaded, report.downloaded, report.failed);
        crate::metrics::record_sync_cycle_latency(start.elapsed());
        info!(
            uploaded = report.uploaded,
            downloaded = report.downloaded,
            failed = report.failed,
            errors = report.errors.len(),
            "sync cycle complete"
        );
        report
    }

    async fn upload_pending(&self, now: i64, report: &mut SyncCycleReport) {
        let pending = match self
            .store
            .mutations_with_status(MutationStatus::Pending, self.config.batch_size)
            .await
        {
            Ok(pending) => pending,
            Err(e) => {
                warn!(error = %e, "failed to read mutation queue");
                report.errors.push(format!("mutation queue read failed: {e}"));
                return;
            }
        };

        let due: Vec<MutationRecord> = pending.into_iter().filter(|m| m.is_due(now)).collect();
        crate::metrics::set_pending_mutations(due.len());

        for mut mutation in due {
            match self.backend.push_mutation(&mutation).await {
                Ok(()) => {
                    if let Err(e) = self.store.delete_mutation(&mutation.id).await {
                        warn!(id = %mutation.id, error = %e, "uploaded mutation could not be removed from queue");
                        report.errors.push(format!("queue cleanup failed for '{}': {e}", mutation.id));
                    }
                    report.uploaded += 1;
                    debug!(id = %mutation.id, "mutation uploaded");
                }
                Err(e) => {
                    let err = SyncError::Upload { id: mutation.id.clone(), source: e };
                    report.errors.push(err.to_string());

                    let delay = backoff_delay(
                        self.config.retry_base(),
                        mutation.retries,
                        self.config.retry_max_delay(),
                    );
                    mutation.retries += 1;

                    if mutation.retries >= self.config.max_retries {
                        // Dead-letter: out of the active queue, counted once
                        mutation.status = MutationStatus::DeadLettered;
                        report.failed += 1;
                        let total = self.dead_letters.fetch_add(1, Ordering::AcqRel) + 1;
                        crate::metrics::record_dead_letter();
                        warn!(
                            id = %mutation.id,
                            attempts = mutation.retries,
                            dead_letters_total = total,
                            "mutation dead-lettered after exhausting retries"
                        );
                    } else {
                        mutation.next_attempt_ms = now + delay.as_millis() as i64;
                        self.schedule
                            .lock()
                            .push(mutation.next_attempt_ms, mutation.id.clone());
                        debug!(
                            id = %mutation.id,
                            retries = mutation.retries,
                            delay_ms = delay.as_millis() as u64,
                            "mutation rescheduled with backoff"
                        );
                    }

                    if let Err(e) = self.store.put_mutation(&mutation).await {
                        warn!(id = %mutation.id, error = %e, "failed to persist rescheduled mutation");
                        report.errors.push(format!("reschedule write failed for '{}': {e}", mutation.id));
                    }
                }
            }
        }
    }

    /// Poll the backend for finished jobs and merge outcomes into local
    /// records. Terminal jobs are never regressed.
    async fn merge_job_results(&self, report: &mut SyncCycleReport) {
        let mut awaiting = Vec::new();
        for status in [JobStatus::Pending, JobStatus::Processing] {
            match self.store.jobs_with_status(status).await {
                Ok(jobs) => awaiting.extend(jobs.into_iter().map(|j| j.id)),
                Err(e) => {
                    report.errors.push(format!("job scan failed: {e}"));
                    return;
                }
            }
        }
        if awaiting.is_empty() {
            return;
        }

        let envelopes = match self.backend.poll_job_results(&awaiting).await {
            Ok(envelopes) => envelopes,
            Err(e) => {
                let err = SyncError::Download { source: e };
                warn!(error = %err, "job result poll failed");
                report.errors.push(err.to_string());
                return;
            }
        };

        for envelope in envelopes {
            let job = match self.store.get_job(&envelope.job_id).await {
                Ok(Some(job)) => job,
                Ok(None) => {
                    debug!(id = %envelope.job_id, "result for unknown job, ignoring");
                    continue;
                }
                Err(e) => {
                    report.errors.push(format!("job read failed: {e}"));
                    continue;
                }
            };
            if job.status.is_terminal() {
                // Already resolved locally; remote echo is stale
                continue;
            }

            let mut merged = job;
            if merged.status == JobStatus::Pending {
                merged.status = JobStatus::Processing;
            }
            match envelope.error {
                Some(remote_err) => {
                    merged.status = JobStatus::Failed;
                    merged.error = Some(remote_err);
                }
                None => {
                    merged.status = JobStatus::Completed;
                    merged.outcome = envelope.outcome;
                    merged.confidence = envelope.confidence.clamp(0.0, 1.0);
                }
            }
            merged.completed_ms = Some(envelope.completed_ms);

            match self.store.put_job(&merged).await {
                Ok(()) => {
                    report.downloaded += 1;
                    debug!(id = %merged.id, status = %merged.status, "remote job result merged");
                }
                Err(e) => report.errors.push(format!("job merge failed: {e}")),
            }
        }
    }

    /// Pull notifications created remotely since the last cycle.
    async fn pull_notifications(&self, report: &mut SyncCycleReport) {
        let since = match self.store.get_meta(LAST_SYNC_KEY).await {
            Ok(value) => value.and_then(|v| v.parse::<i64>().ok()).unwrap_or(0),
            Err(e) => {
                report.errors.push(format!("last-sync read failed: {e}"));
                0
            }
        };

        let remote = match self.backend.list_notifications(since).await {
            Ok(remote) => remote,
            Err(e) => {
                let err = SyncError::Download { source: e };
                warn!(error = %err, "notification pull failed");
                report.errors.push(err.to_string());
                return;
            }
        };

        for notification in remote {
            match self.store.get_notification(&notification.id).await {
                Ok(Some(_)) => continue, // already have it
                Ok(None) => {}
                Err(e) => {
                    report.errors.push(format!("notification read failed: {e}"));
                    continue;
                }
            }
            match self.store.put_notification(&notification).await {
                Ok(()) => report.downloaded += 1,
                Err(e) => report.errors.push(format!("notification write failed: {e}")),
            }
        }
    }

    /// Time until the next rescheduled mutation is due.
    fn next_retry_in(&self) -> Option<Duration> {
        self.schedule.lock().time_until_next(now_ms())
    }

    /// Run the cycle loop until `shutdown` flips to true.
    ///
    /// Triggers: interval timer (when `auto_sync`), connectivity restored,
    /// and the delay queue's next deadline.
    #[tracing::instrument(skip_all)]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.sync_interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let mut status_rx = self.status_rx.clone();
        let mut was_connected = status_rx.borrow().is_connected;
        info!(auto_sync = self.config.auto_sync, "sync orchestrator running");

        loop {
            let retry_sleep = self
                .next_retry_in()
                .unwrap_or(Duration::from_secs(3600));

            tokio::select! {
                _ = interval.tick(), if self.config.auto_sync => {
                    self.sync_cycle().await;
                }
                changed = status_rx.changed() => {
                    if changed.is_err() {
                        warn!("connectivity channel closed, stopping orchestrator");
                        return;
                    }
                    let now_connected = status_rx.borrow().is_connected;
                    if !was_connected && now_connected {
                        info!("connectivity restored, syncing immediately");
                        self.sync_cycle().await;
                    }
                    was_connected = now_connected;
                }
                _ = tokio::time::sleep(retry_sleep) => {
                    // A rescheduled mutation came due
                    self.sync_cycle().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("sync orchestrator stopping");
                        return;
                    }
                }
            }
        }
    }
}
