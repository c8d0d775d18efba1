// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Analysis job queue: deferred job lifecycle with bounded concurrency.
//!
//! Jobs are persisted immediately on enqueue. While connected they are
//! dispatched right away; while offline they stay Pending and are picked up
//! on the next reconnect by [`reconcile()`](AnalysisJobQueue::reconcile).
//! An in-memory processing set guarantees a job is never dispatched twice
//! across a flapping connection, and a semaphore bounds how many jobs
//! process concurrently.
//!
//! The actual computation is behind [`JobProcessor`]; the core only owns the
//! submit/process/complete contract.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashSet;
use serde_json::Value;
use tokio::sync::{mpsc, watch, Semaphore};
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::JobError;
use crate::records::{
    now_ms, AgentKind, AgentOutcome, AnalysisJob, ConnectionStatus, JobPriority, JobStatus,
};
use crate::remote::RemoteBackend;
use crate::retry::RetryConfig;
use crate::store::LocalStore;

/// The pluggable analysis computation.
///
/// Implementations return the agent-specific outcome and a confidence in
/// `[0, 1]`. Failures are terminal for the job, never for the queue.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    async fn process(&self, job: &AnalysisJob) -> Result<(AgentOutcome, f64), JobError>;
}

/// Processor that delegates to the backend's submit/poll endpoints.
pub struct RemoteJobProcessor {
    backend: Arc<dyn RemoteBackend>,
    poll_interval: Duration,
    max_polls: usize,
}

impl RemoteJobProcessor {
    pub fn new(backend: Arc<dyn RemoteBackend>) -> Self {
        Self {
            backend,
            poll_interval: Duration::from_secs(5),
            max_polls: 60,
        }
    }

    #[must_use]
    pub fn with_polling(mut self, interval: Duration, max_polls: usize) -> Self {
        self.poll_interval = interval;
        self.max_polls = max_polls;
        self
    }
}

#[async_trait]
impl JobProcessor for RemoteJobProcessor {
    async fn process(&self, job: &AnalysisJob) -> Result<(AgentOutcome, f64), JobError> {
        let backend = &self.backend;
        crate::retry::retry("submit_job", &RetryConfig::query(), || backend.submit_job(job))
            .await
            .map_err(|e| JobError::Processing(format!("submit failed: {e}")))?;

        let ids = [job.id.clone()];
        for _ in 0..self.max_polls {
            tokio::time::sleep(self.poll_interval).await;
            let envelopes = self
                .backend
                .poll_job_results(&ids)
                .await
                .map_err(|e| JobError::Processing(format!("poll failed: {e}")))?;

            if let Some(envelope) = envelopes.into_iter().find(|e| e.job_id == job.id) {
                if let Some(remote_err) = envelope.error {
                    return Err(JobError::Processing(remote_err));
                }
                let outcome = envelope
                    .outcome
                    .ok_or_else(|| JobError::Processing("result without outcome".into()))?;
                return Ok((outcome, envelope.confidence.clamp(0.0, 1.0)));
            }
        }

        Err(JobError::Processing(format!(
            "no result after {} polls",
            self.max_polls
        )))
    }
}

/// Deferred analysis job queue.
pub struct AnalysisJobQueue {
    store: Arc<dyn LocalStore>,
    processor: Arc<dyn JobProcessor>,
    status_rx: watch::Receiver<ConnectionStatus>,
    /// Job ids currently being processed (duplicate-dispatch guard)
    processing: DashSet<String>,
    /// Worker pool bound
    permits: Arc<Semaphore>,
    /// Terminal jobs flow out here (dispatcher wiring)
    completed_tx: parking_lot::Mutex<Option<mpsc::UnboundedSender<AnalysisJob>>>,
}

impl AnalysisJobQueue {
    pub fn new(
        config: &SyncConfig,
        store: Arc<dyn LocalStore>,
        processor: Arc<dyn JobProcessor>,
        status_rx: watch::Receiver<ConnectionStatus>,
    ) -> Self {
        Self {
            store,
            processor,
            status_rx,
            processing: DashSet::new(),
            permits: Arc::new(Semaphore::new(config.max_concurrent_jobs)),
            completed_tx: parking_lot::Mutex::new(None),
        }
    }

    /// Open the terminal-job channel. Every job that reaches Completed or
    /// Failed is sent to the returned receiver.
    pub fn completion_channel(&self) -> mpsc::UnboundedReceiver<AnalysisJob> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.completed_tx.lock() = Some(tx);
        rx
    }

    /// Jobs currently in flight.
    #[must_use]
    pub fn processing_len(&self) -> usize {
        self.processing.len()
    }

    /// Whether a specific job is in the processing set.
    #[must_use]
    pub fn is_processing(&self, job_id: &str) -> bool {
        self.processing.contains(job_id)
    }

    /// Persist a new Pending job; dispatch immediately when connected.
    #[tracing::instrument(skip(self, metadata), fields(agent = %agent))]
    pub async fn enqueue(
        self: &Arc<Self>,
        agent: AgentKind,
        metadata: Value,
        priority: JobPriority,
    ) -> Result<String, JobError> {
        let job = AnalysisJob::new(agent, metadata, priority);
        let id = job.id.clone();
        self.store.put_job(&job).await?;

        if self.status_rx.borrow().is_connected {
            self.dispatch(id.clone());
        } else {
            debug!(id = %id, "offline, job left pending for reconnect pickup");
        }
        Ok(id)
    }

    /// Look up a job by id.
    pub async fn status(&self, job_id: &str) -> Result<AnalysisJob, JobError> {
        self.store
            .get_job(job_id)
            .await?
            .ok_or_else(|| JobError::UnknownJob(job_id.to_string()))
    }

    /// Dispatch a job for processing on the worker pool.
    ///
    /// No-op when the job is already in the processing set. Membership is
    /// claimed synchronously, before the worker task starts, so a reconnect
    /// sweep racing this call cannot double-dispatch.
    pub fn dispatch(self: &Arc<Self>, job_id: String) {
        if !self.processing.insert(job_id.clone()) {
            debug!(id = %job_id, "job already processing, dispatch skipped");
            return;
        }
        crate::metrics::set_jobs_in_flight(self.processing.len());

        let queue = self.clone();
        tokio::spawn(async move {
            // Closed semaphore is impossible here; treat it as shutdown
            if let Ok(_permit) = queue.permits.clone().acquire_owned().await {
                if let Err(e) = queue.process_job(&job_id).await {
                    warn!(id = %job_id, error = %e, "job processing errored");
                }
            }
            // Guaranteed cleanup on every exit path
            queue.processing.remove(&job_id);
            crate::metrics::set_jobs_in_flight(queue.processing.len());
        });
    }

    /// Run one job to a terminal state.
    async fn process_job(&self, job_id: &str) -> Result<(), JobError> {
        let mut job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or_else(|| JobError::UnknownJob(job_id.to_string()))?;

        if job.status.is_terminal() {
            debug!(id = %job_id, status = %job.status, "job already resolved, skipping");
            return Ok(());
        }
        if !job.status.can_transition_to(JobStatus::Processing) {
            return Err(JobError::InvalidTransition {
                from: job.status,
                to: JobStatus::Processing,
            });
        }
        job.status = JobStatus::Processing;
        self.store.put_job(&job).await?;
        crate::metrics::record_job_event(&job.agent.to_string(), "dispatched");

        let start = std::time::Instant::now();
        match self.processor.process(&job).await {
            Ok((outcome, confidence)) if outcome.agent() == job.agent => {
                job.status = JobStatus::Completed;
                job.outcome = Some(outcome);
                job.confidence = confidence.clamp(0.0, 1.0);
                crate::metrics::record_job_event(&job.agent.to_string(), "completed");
            }
            Ok((outcome, _)) => {
                let err = JobError::UnexpectedAgent(outcome.agent());
                warn!(id = %job_id, error = %err, "processor returned mismatched outcome");
                job.status = JobStatus::Failed;
                job.error = Some(err.to_string());
                crate::metrics::record_job_event(&job.agent.to_string(), "failed");
            }
            Err(e) => {
                job.status = JobStatus::Failed;
                job.error = Some(e.to_string());
                crate::metrics::record_job_event(&job.agent.to_string(), "failed");
            }
        }
        job.completed_ms = Some(now_ms());
        crate::metrics::record_job_latency(&job.agent.to_string(), start.elapsed());
        self.store.put_job(&job).await?;

        debug!(id = %job_id, status = %job.status, "job reached terminal state");
        if let Some(tx) = self.completed_tx.lock().as_ref() {
            // Receiver may be gone during shutdown; that is fine
            let _ = tx.send(job);
        }
        Ok(())
    }

    /// Re-dispatch every Pending job exactly once, skipping any already in
    /// the processing set. Called on each reconnect transition.
    pub async fn reconcile(self: &Arc<Self>) -> Result<usize, JobError> {
        let pending = self.store.jobs_with_status(JobStatus::Pending).await?;
        let mut dispatched = 0;
        for job in pending {
            if self.processing.contains(&job.id) {
                crate::metrics::record_job_event(&job.agent.to_string(), "skipped");
                continue;
            }
            self.dispatch(job.id);
            dispatched += 1;
        }
        if dispatched > 0 {
            info!(dispatched, "re-dispatched pending jobs after reconnect");
        }
        Ok(dispatched)
    }

    /// Watch connectivity and reconcile on every restored transition.
    #[tracing::instrument(skip_all)]
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut status_rx = self.status_rx.clone();
        let mut was_connected = status_rx.borrow().is_connected;
        info!("analysis job queue running");

        loop {
            tokio::select! {
                changed = status_rx.changed() => {
                    if changed.is_err() {
                        warn!("connectivity channel closed, stopping job queue");
                        return;
                    }
                    let now_connected = status_rx.borrow().is_connected;
                    if !was_connected && now_connected {
                        if let Err(e) = self.reconcile().await {
                            warn!(error = %e, "reconnect reconciliation failed");
                        }
                    }
                    was_connected = now_connected;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("analysis job queue stopping");
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::PestSeverity;
    use crate::store::InMemoryStore;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    /// Processor scripted to succeed, fail, or park on a gate.
    struct ScriptedProcessor {
        fail: bool,
        gate: Option<Arc<Notify>>,
        calls: AtomicUsize,
    }

    impl ScriptedProcessor {
        fn ok() -> Self {
            Self { fail: false, gate: None, calls: AtomicUsize::new(0) }
        }

        fn failing() -> Self {
            Self { fail: true, gate: None, calls: AtomicUsize::new(0) }
        }

        fn gated(gate: Arc<Notify>) -> Self {
            Self { fail: false, gate: Some(gate), calls: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl JobProcessor for ScriptedProcessor {
        async fn process(&self, job: &AnalysisJob) -> Result<(AgentOutcome, f64), JobError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.fail {
                return Err(JobError::Processing("model unavailable".into()));
            }
            let outcome = match job.agent {
                AgentKind::Phytosanitary => AgentOutcome::Phytosanitary {
                    pest: "leaf miner".into(),
                    severity: PestSeverity::Moderate,
                    affected_lots: vec![],
                    recommendation: "monitor weekly".into(),
                },
                AgentKind::Predictive => AgentOutcome::Predictive {
                    metric: "yield_kg".into(),
                    projected_value: 900.0,
                    horizon_days: 14,
                },
                AgentKind::Assistant => AgentOutcome::Assistant {
                    answer: "prune after harvest".into(),
                    sources: vec![],
                },
                AgentKind::Optimization => AgentOutcome::Optimization {
                    suggestion: "reduce shade".into(),
                    estimated_gain_pct: 2.0,
                },
            };
            Ok((outcome, 0.9))
        }
    }

    fn queue(
        processor: ScriptedProcessor,
        is_connected: bool,
        max_concurrent: usize,
    ) -> (Arc<InMemoryStore>, Arc<AnalysisJobQueue>, watch::Sender<ConnectionStatus>) {
        let store = Arc::new(InMemoryStore::new());
        let (tx, rx) = watch::channel(ConnectionStatus {
            is_connected,
            last_checked_ms: now_ms(),
            retry_count: 0,
            error: None,
        });
        let config = SyncConfig {
            base_url: "https://api.example.farm".into(),
            max_concurrent_jobs: max_concurrent,
            ..Default::default()
        };
        let queue = Arc::new(AnalysisJobQueue::new(
            &config,
            store.clone(),
            Arc::new(processor),
            rx,
        ));
        (store, queue, tx)
    }

    async fn wait_terminal(store: &InMemoryStore, id: &str) -> AnalysisJob {
        for _ in 0..200 {
            if let Some(job) = store.get_job(id).await.unwrap() {
                if job.status.is_terminal() {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job {id} never reached a terminal state");
    }

    #[tokio::test]
    async fn test_enqueue_connected_completes() {
        let (store, queue, _tx) = queue(ScriptedProcessor::ok(), true, 4);
        let id = queue
            .enqueue(AgentKind::Phytosanitary, json!({"lot": "lot-1"}), JobPriority::High)
            .await
            .unwrap();

        let job = wait_terminal(&store, &id).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.confidence, 0.9);
        assert!(job.outcome.is_some());
        assert!(job.completed_ms.is_some());
        // Processing set drained
        assert_eq!(queue.processing_len(), 0);
    }

    #[tokio::test]
    async fn test_enqueue_offline_stays_pending() {
        let (store, queue, _tx) = queue(ScriptedProcessor::ok(), false, 4);
        let id = queue
            .enqueue(AgentKind::Predictive, json!({}), JobPriority::Low)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        let job = store.get_job(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(queue.processing_len(), 0);
    }

    #[tokio::test]
    async fn test_reconcile_dispatches_pending_once() {
        let (store, queue, _tx) = queue(ScriptedProcessor::ok(), false, 4);
        let id = queue
            .enqueue(AgentKind::Assistant, json!({}), JobPriority::Medium)
            .await
            .unwrap();

        let dispatched = queue.reconcile().await.unwrap();
        assert_eq!(dispatched, 1);
        // A second sweep racing the first must skip the in-flight id
        let again = queue.reconcile().await.unwrap();
        assert_eq!(again, 0);

        let job = wait_terminal(&store, &id).await;
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_duplicate_dispatch_is_noop() {
        let gate = Arc::new(Notify::new());
        let (_store, queue, _tx) = queue(ScriptedProcessor::gated(gate.clone()), true, 4);
        let id = queue
            .enqueue(AgentKind::Optimization, json!({}), JobPriority::Low)
            .await
            .unwrap();

        tokio::task::yield_now().await;
        assert_eq!(queue.processing_len(), 1);
        // Explicit duplicate dispatch while the first is parked
        queue.dispatch(id.clone());
        assert_eq!(queue.processing_len(), 1);

        gate.notify_waiters();
        gate.notify_one();
    }

    #[tokio::test]
    async fn test_failure_is_terminal_and_cleans_up() {
        let (store, queue, _tx) = queue(ScriptedProcessor::failing(), true, 4);
        let id = queue
            .enqueue(AgentKind::Phytosanitary, json!({}), JobPriority::High)
            .await
            .unwrap();

        let job = wait_terminal(&store, &id).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.as_deref().unwrap().contains("model unavailable"));
        assert_eq!(queue.processing_len(), 0);
    }

    #[tokio::test]
    async fn test_worker_pool_bound() {
        let gate = Arc::new(Notify::new());
        let (store, queue, _tx) = queue(ScriptedProcessor::gated(gate.clone()), true, 1);

        let a = queue.enqueue(AgentKind::Assistant, json!({}), JobPriority::Low).await.unwrap();
        let b = queue.enqueue(AgentKind::Assistant, json!({}), JobPriority::Low).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Both dispatched, but only one holds the single permit
        assert_eq!(queue.processing_len(), 2);
        let processing = store.jobs_with_status(JobStatus::Processing).await.unwrap();
        assert_eq!(processing.len(), 1);

        // Release both in turn
        gate.notify_one();
        tokio::time::sleep(Duration::from_millis(20)).await;
        gate.notify_one();
        let _ = wait_terminal(&store, &a).await;
        let _ = wait_terminal(&store, &b).await;
        assert_eq!(queue.processing_len(), 0);
    }

    #[tokio::test]
    async fn test_completion_channel_receives_terminal_jobs() {
        let (_store, queue, _tx) = queue(ScriptedProcessor::ok(), true, 4);
        let mut rx = queue.completion_channel();
        let id = queue
            .enqueue(AgentKind::Predictive, json!({}), JobPriority::Medium)
            .await
            .unwrap();

        let done = rx.recv().await.unwrap();
        assert_eq!(done.id, id);
        assert_eq!(done.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_status_unknown_job() {
        let (_store, queue, _tx) = queue(ScriptedProcessor::ok(), true, 4);
        assert!(matches!(
            queue.status("missing").await,
            Err(JobError::UnknownJob(_))
        ));
    }

    #[tokio::test]
    async fn test_restored_transition_triggers_reconcile() {
        let (store, queue, tx) = queue(ScriptedProcessor::ok(), false, 4);
        let id = queue
            .enqueue(AgentKind::Phytosanitary, json!({}), JobPriority::High)
            .await
            .unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let runner = tokio::spawn(queue.clone().run(shutdown_rx));

        // Flip offline -> online
        tx.send_replace(ConnectionStatus {
            is_connected: true,
            last_checked_ms: now_ms(),
            retry_count: 0,
            error: None,
        });

        let job = wait_terminal(&store, &id).await;
        assert_eq!(job.status, JobStatus::Completed);

        shutdown_tx.send_replace(true);
        runner.await.unwrap();
    }
}
