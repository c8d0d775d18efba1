// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! End-to-end scenarios over the full component stack: connectivity monitor,
//! cache layer, orchestrator, job queue and dispatcher wired against an
//! in-memory store and a controllable mock backend.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use fieldsync::{
    AgentKind, AgentOutcome, AnalysisJob, AnalysisJobQueue, CacheFallbackLayer,
    ConnectivityMonitor, HealthReport, InMemoryStore, JobPriority, JobResultEnvelope, JobStatus,
    LocalStore, LogNotifier, MutationRecord, MutationStatus, Notification, NotificationDispatcher,
    PestSeverity, RemoteBackend, RemoteError, SyncConfig, SyncOrchestrator, now_ms,
};

/// Backend whose reachability is a switch. While "down" every call times out,
/// matching a field device that lost its uplink mid-flight.
struct FarmBackend {
    up: AtomicBool,
    pushed: Mutex<Vec<MutationRecord>>,
    submitted: Mutex<Vec<String>>,
    results: Mutex<Vec<JobResultEnvelope>>,
    remote_notifications: Mutex<Vec<Notification>>,
    fetches: AtomicUsize,
}

impl FarmBackend {
    fn new(up: bool) -> Self {
        Self {
            up: AtomicBool::new(up),
            pushed: Mutex::new(Vec::new()),
            submitted: Mutex::new(Vec::new()),
            results: Mutex::new(Vec::new()),
            remote_notifications: Mutex::new(Vec::new()),
            fetches: AtomicUsize::new(0),
        }
    }

    fn set_up(&self, up: bool) {
        self.up.store(up, Ordering::SeqCst);
    }

    fn guard(&self) -> Result<(), RemoteError> {
        if self.up.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RemoteError::Timeout)
        }
    }
}

#[async_trait]
impl RemoteBackend for FarmBackend {
    async fn probe_health(&self) -> Result<HealthReport, RemoteError> {
        self.guard()?;
        Ok(HealthReport { status: "ok".into(), timestamp_ms: now_ms() })
    }

    async fn fetch(&self, endpoint: &str) -> Result<Value, RemoteError> {
        self.guard()?;
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(json!({"endpoint": endpoint, "lots": ["lot-1", "lot-2", "lot-3"]}))
    }

    async fn push_mutation(&self, mutation: &MutationRecord) -> Result<(), RemoteError> {
        self.guard()?;
        self.pushed.lock().push(mutation.clone());
        Ok(())
    }

    async fn submit_job(&self, job: &AnalysisJob) -> Result<(), RemoteError> {
        self.guard()?;
        self.submitted.lock().push(job.id.clone());
        Ok(())
    }

    async fn poll_job_results(&self, ids: &[String]) -> Result<Vec<JobResultEnvelope>, RemoteError> {
        self.guard()?;
        Ok(self
            .results
            .lock()
            .iter()
            .filter(|r| ids.contains(&r.job_id))
            .cloned()
            .collect())
    }

    async fn list_notifications(&self, since_ms: i64) -> Result<Vec<Notification>, RemoteError> {
        self.guard()?;
        Ok(self
            .remote_notifications
            .lock()
            .iter()
            .filter(|n| n.created_ms > since_ms)
            .cloned()
            .collect())
    }
}

/// Opt-in log output for debugging scenario failures, e.g.
/// `RUST_LOG=fieldsync=debug cargo test --test integration`.
fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

fn test_config() -> SyncConfig {
    SyncConfig {
        base_url: "https://api.example.farm".into(),
        max_retries: 5,
        retry_base_ms: 1, // keep rescheduled mutations due almost immediately
        ..Default::default()
    }
}

struct Harness {
    backend: Arc<FarmBackend>,
    store: Arc<InMemoryStore>,
    monitor: Arc<ConnectivityMonitor>,
    orchestrator: Arc<SyncOrchestrator>,
}

impl Harness {
    fn new(up: bool) -> Self {
        init_tracing();
        let config = test_config();
        let backend = Arc::new(FarmBackend::new(up));
        let store = Arc::new(InMemoryStore::new());
        let monitor = Arc::new(ConnectivityMonitor::new(config.clone(), backend.clone()));
        let orchestrator = Arc::new(SyncOrchestrator::new(
            config,
            store.clone(),
            backend.clone(),
            monitor.subscribe(),
        ));
        Self { backend, store, monitor, orchestrator }
    }
}

/// A harvest report captured offline is queued locally and uploaded on the
/// first cycle after connectivity returns.
#[tokio::test]
async fn offline_capture_syncs_on_reconnect() {
    let h = Harness::new(false);
    h.monitor.probe().await;
    assert!(!h.monitor.current().is_connected);

    let id = h
        .orchestrator
        .enqueue_upload(json!({"lot": "lot-3", "harvest_kg": 120, "moisture_pct": 11.2}))
        .await
        .unwrap();

    // Offline cycles never touch the queue
    let report = h.orchestrator.sync_cycle().await;
    assert!(report.skipped);
    assert!(h.backend.pushed.lock().is_empty());
    assert_eq!(
        h.store.get_mutation(&id).await.unwrap().unwrap().status,
        MutationStatus::Pending
    );

    // Uplink returns
    h.backend.set_up(true);
    h.monitor.probe().await;
    assert!(h.monitor.current().is_connected);

    let report = h.orchestrator.sync_cycle().await;
    assert_eq!(report.uploaded, 1);
    assert!(report.is_clean());
    assert_eq!(h.backend.pushed.lock().len(), 1);
    assert!(h.store.get_mutation(&id).await.unwrap().is_none());
}

/// Reads keep answering from cache when the uplink drops, without a network
/// attempt, until the entry expires.
#[tokio::test]
async fn cached_reads_survive_outage() {
    let h = Harness::new(true);
    h.monitor.probe().await;

    let cache = CacheFallbackLayer::new(
        h.backend.clone(),
        h.monitor.subscribe(),
        Duration::from_secs(1800),
    );

    let live = cache.request("/lots?farm=la-esperanza", None).await;
    assert!(!live.from_cache);
    assert_eq!(h.backend.fetches.load(Ordering::SeqCst), 1);

    h.backend.set_up(false);
    h.monitor.probe().await;

    // Equivalent signature with reordered params hits the same entry
    let cached = cache.request("/lots?farm=la-esperanza", None).await;
    assert!(cached.from_cache);
    assert!(cached.error.is_none());
    assert_eq!(cached.data, live.data);
    assert_eq!(h.backend.fetches.load(Ordering::SeqCst), 1);

    // Unknown endpoint offline: fallback value with the failure attached
    let miss = cache.request("/prices", Some(json!({"prices": []}))).await;
    assert!(!miss.from_cache);
    assert_eq!(miss.data, Some(json!({"prices": []})));
    assert!(miss.error.is_some());
}

/// An analysis requested offline stays pending, dispatches once on reconnect,
/// and its completion raises exactly one deduplicated notification.
#[tokio::test]
async fn offline_analysis_dispatches_and_notifies_on_reconnect() {
    let h = Harness::new(false);
    h.monitor.probe().await;

    struct InstantProcessor;

    #[async_trait]
    impl fieldsync::JobProcessor for InstantProcessor {
        async fn process(
            &self,
            _job: &AnalysisJob,
        ) -> Result<(AgentOutcome, f64), fieldsync::JobError> {
            Ok((
                AgentOutcome::Phytosanitary {
                    pest: "coffee leaf rust".into(),
                    severity: PestSeverity::Critical,
                    affected_lots: vec!["lot-1".into()],
                    recommendation: "apply fungicide within 48h".into(),
                },
                0.93,
            ))
        }
    }

    let queue = Arc::new(AnalysisJobQueue::new(
        &test_config(),
        h.store.clone(),
        Arc::new(InstantProcessor),
        h.monitor.subscribe(),
    ));
    let dispatcher = Arc::new(NotificationDispatcher::new(
        h.store.clone(),
        Arc::new(LogNotifier),
    ));
    let completed = queue.completion_channel();

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let queue_runner = tokio::spawn(queue.clone().run(shutdown_rx.clone()));
    let d = dispatcher.clone();
    let dispatch_runner = tokio::spawn(async move { d.run(completed, shutdown_rx).await });

    let job_id = queue
        .enqueue(
            AgentKind::Phytosanitary,
            json!({"photo": "leaf-042.jpg", "lot": "lot-1"}),
            JobPriority::High,
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(queue.status(&job_id).await.unwrap().status, JobStatus::Pending);

    // Reconnect: the run loop reconciles and dispatches the pending job
    h.backend.set_up(true);
    h.monitor.probe().await;

    let mut job = None;
    for _ in 0..200 {
        let current = queue.status(&job_id).await.unwrap();
        if current.status.is_terminal() {
            job = Some(current);
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let job = job.expect("job never completed after reconnect");
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.confidence, 0.93);

    // Critical finding became an unread urgent notification
    for _ in 0..200 {
        if !dispatcher.unread().await.unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let unread = dispatcher.unread().await.unwrap();
    assert_eq!(unread.len(), 1);
    assert_eq!(unread[0].dedupe_tag, format!("phytosanitary:{job_id}"));

    shutdown_tx.send_replace(true);
    queue_runner.await.unwrap();
    dispatch_runner.await.unwrap();
}

/// Flapping connectivity fires exactly one restored event per outage and
/// never double-runs concurrent sync cycles.
#[tokio::test]
async fn flapping_link_restores_once_per_outage() {
    let h = Harness::new(true);
    h.monitor.probe().await;
    assert_eq!(h.monitor.restored_count(), 0);

    for outage in 1..=3 {
        h.backend.set_up(false);
        // Several failed probes within one outage
        h.monitor.probe().await;
        h.monitor.probe().await;
        assert_eq!(h.monitor.current().retry_count, 2);

        h.backend.set_up(true);
        h.monitor.probe().await;
        assert_eq!(h.monitor.restored_count(), outage);

        // A further success inside the same online stretch adds nothing
        h.monitor.probe().await;
        assert_eq!(h.monitor.restored_count(), outage);
    }
}

/// A mutation the backend keeps rejecting is retried with growing delays and
/// dead-lettered after the retry budget, never to run again.
#[tokio::test]
async fn persistent_failure_dead_letters_after_budget() {
    let h = Harness::new(true);
    h.monitor.probe().await;

    let id = h
        .orchestrator
        .enqueue_upload(json!({"lot": "lot-9", "note": "rejected upstream"}))
        .await
        .unwrap();
    // Probe endpoint stays reachable; only data pushes fail. retry_base_ms
    // is 1ms so each reschedule is due again by the next iteration.
    struct PushRejectingBackend(Arc<FarmBackend>);

    #[async_trait]
    impl RemoteBackend for PushRejectingBackend {
        async fn probe_health(&self) -> Result<HealthReport, RemoteError> {
            self.0.probe_health().await
        }
        async fn fetch(&self, endpoint: &str) -> Result<Value, RemoteError> {
            self.0.fetch(endpoint).await
        }
        async fn push_mutation(&self, _: &MutationRecord) -> Result<(), RemoteError> {
            Err(RemoteError::Server { status: 500 })
        }
        async fn submit_job(&self, job: &AnalysisJob) -> Result<(), RemoteError> {
            self.0.submit_job(job).await
        }
        async fn poll_job_results(
            &self,
            ids: &[String],
        ) -> Result<Vec<JobResultEnvelope>, RemoteError> {
            self.0.poll_job_results(ids).await
        }
        async fn list_notifications(&self, since_ms: i64) -> Result<Vec<Notification>, RemoteError> {
            self.0.list_notifications(since_ms).await
        }
    }

    let orchestrator = SyncOrchestrator::new(
        test_config(),
        h.store.clone(),
        Arc::new(PushRejectingBackend(h.backend.clone())),
        h.monitor.subscribe(),
    );

    let mut dead_letter_reports = 0;
    for _ in 0..20 {
        let report = orchestrator.sync_cycle().await;
        dead_letter_reports += report.failed;
        let mutation = h.store.get_mutation(&id).await.unwrap().unwrap();
        if mutation.status == MutationStatus::DeadLettered {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let mutation = h.store.get_mutation(&id).await.unwrap().unwrap();
    assert_eq!(mutation.status, MutationStatus::DeadLettered);
    assert_eq!(mutation.retries, 5); // exactly max_retries attempts
    assert_eq!(dead_letter_reports, 1); // counted once across all cycles
    assert_eq!(orchestrator.dead_letter_count(), 1);

    // Nothing left for a clean backend either
    let report = orchestrator.sync_cycle().await;
    assert_eq!(report.uploaded, 0);
    assert_eq!(report.failed, 0);
}

/// Job results completed remotely while the device was away are merged by the
/// next cycle, and remote notifications arrive deduplicated.
#[tokio::test]
async fn downloads_merge_remote_results_and_notifications() {
    let h = Harness::new(true);
    h.monitor.probe().await;

    // A job the device submitted earlier, still awaiting its result
    let mut job = AnalysisJob::new(AgentKind::Predictive, json!({"metric": "yield_kg"}), JobPriority::Medium);
    job.status = JobStatus::Processing;
    h.store.put_job(&job).await.unwrap();

    h.backend.results.lock().push(JobResultEnvelope {
        job_id: job.id.clone(),
        outcome: Some(AgentOutcome::Predictive {
            metric: "yield_kg".into(),
            projected_value: 1340.0,
            horizon_days: 30,
        }),
        confidence: 0.81,
        error: None,
        completed_ms: now_ms(),
    });
    h.backend.remote_notifications.lock().push(Notification {
        id: "coop-price-88".into(),
        agent: None,
        kind: fieldsync::NotificationKind::SystemUpdate,
        title: "Reference price updated".into(),
        message: "New cooperative price sheet available".into(),
        priority: fieldsync::NotificationPriority::Low,
        read: false,
        created_ms: now_ms(),
        expires_ms: None,
        dedupe_tag: "sys:coop-price-88".into(),
    });

    let report = h.orchestrator.sync_cycle().await;
    assert_eq!(report.downloaded, 2);

    let merged = h.store.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(merged.status, JobStatus::Completed);
    assert_eq!(merged.confidence, 0.81);

    // Second cycle re-downloads nothing
    let again = h.orchestrator.sync_cycle().await;
    assert_eq!(again.downloaded, 0);
}
