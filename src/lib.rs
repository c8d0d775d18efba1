//! # FieldSync
//!
//! An offline-first synchronization core for field-operations apps running on
//! intermittently-connected devices.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Connectivity Monitor                      │
//! │  • Bounded-timeout health probes on a profile interval     │
//! │  • One ConnectionStatus, broadcast over a watch channel    │
//! │  • Single-flight probing; "restored" fires once per outage │
//! └─────────────────────────────────────────────────────────────┘
//!            │ status                          │ status
//!            ▼                                 ▼
//! ┌──────────────────────────┐   ┌──────────────────────────────┐
//! │   Cache Fallback Layer   │   │      Sync Orchestrator       │
//! │  • TTL read-through      │   │  • Upload queue w/ backoff   │
//! │  • cache → fallback →    │   │  • Dead-letter after retry   │
//! │    result-with-error     │   │    budget exhausts           │
//! │  • No network offline    │   │  • Uploads before downloads  │
//! └──────────────────────────┘   └──────────────────────────────┘
//!                                          │ merged job results
//!                                          ▼
//! ┌──────────────────────────┐   ┌──────────────────────────────┐
//! │    Analysis Job Queue    │──▶│   Notification Dispatcher    │
//! │  • Persist-then-dispatch │   │  • Durable store always      │
//! │  • Bounded worker pool   │   │  • Platform alert best-      │
//! │  • Reconnect reconcile   │   │    effort, deduped by tag    │
//! └──────────────────────────┘   └──────────────────────────────┘
//!            │                              │
//!            ▼                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  LocalStore (pluggable)                     │
//! │  • Mutations, jobs, notifications, meta keys               │
//! │  • InMemoryStore ships in-crate; hosts bring durable impls │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use fieldsync::{
//!     AnalysisJobQueue, ConnectivityMonitor, HttpBackend, InMemoryStore,
//!     RemoteJobProcessor, SyncConfig, SyncOrchestrator,
//! };
//! use serde_json::json;
//! use tokio::sync::watch;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SyncConfig::production("https://api.example.farm");
//!     let backend = Arc::new(HttpBackend::new(&config)?);
//!     let store = Arc::new(InMemoryStore::new());
//!
//!     let monitor = Arc::new(ConnectivityMonitor::new(config.clone(), backend.clone()));
//!     let orchestrator = Arc::new(SyncOrchestrator::new(
//!         config.clone(),
//!         store.clone(),
//!         backend.clone(),
//!         monitor.subscribe(),
//!     ));
//!     let jobs = Arc::new(AnalysisJobQueue::new(
//!         &config,
//!         store.clone(),
//!         Arc::new(RemoteJobProcessor::new(backend.clone())),
//!         monitor.subscribe(),
//!     ));
//!
//!     let (shutdown_tx, shutdown_rx) = watch::channel(false);
//!     tokio::spawn({
//!         let monitor = monitor.clone();
//!         let shutdown = shutdown_rx.clone();
//!         async move { monitor.run(shutdown).await }
//!     });
//!     tokio::spawn({
//!         let orchestrator = orchestrator.clone();
//!         let shutdown = shutdown_rx.clone();
//!         async move { orchestrator.run(shutdown).await }
//!     });
//!     tokio::spawn(jobs.clone().run(shutdown_rx));
//!
//!     // Queue a change; it uploads now or on the next reconnect
//!     orchestrator
//!         .enqueue_upload(json!({"lot": "lot-3", "harvest_kg": 120}))
//!         .await?;
//!
//!     shutdown_tx.send_replace(true);
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Offline-first**: every read has a cached answer, every write queues
//! - **Single source of connectivity truth**: one status value, watch-channel fan-out
//! - **Bounded retries**: exponential backoff with a dead-letter terminus
//! - **Deferred analysis**: jobs persist offline and dispatch on reconnect
//! - **Deduplicated alerts**: durable notifications, at most one banner per source
//!
//! ## Modules
//!
//! - [`connectivity`]: health probing and the [`ConnectivityMonitor`]
//! - [`cache`]: TTL read-through [`CacheFallbackLayer`]
//! - [`orchestrator`]: the [`SyncOrchestrator`] reconciliation loop
//! - [`jobs`]: the [`AnalysisJobQueue`] and [`JobProcessor`] seam
//! - [`notify`]: the [`NotificationDispatcher`] and [`SystemNotifier`] seam
//! - [`store`]: the [`LocalStore`] trait and the in-memory implementation
//! - [`remote`]: the [`RemoteBackend`] trait and HTTP implementation

pub mod cache;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod jobs;
pub mod metrics;
pub mod notify;
pub mod orchestrator;
pub mod records;
pub mod remote;
pub mod retry;
pub mod store;

pub use cache::{cache_key, CacheFallbackLayer, CachedResponse};
pub use config::SyncConfig;
pub use connectivity::ConnectivityMonitor;
pub use error::{ConfigError, JobError, NotifyError, SyncError};
pub use jobs::{AnalysisJobQueue, JobProcessor, RemoteJobProcessor};
pub use notify::{
    AlertPermission, DeniedNotifier, LogNotifier, NotificationDispatcher, NotifyOptions,
    SystemNotifier,
};
pub use orchestrator::{DelayQueue, SyncCycleReport, SyncOrchestrator};
pub use records::{
    now_ms, AgentKind, AgentOutcome, AnalysisJob, ConnectionStatus, ConnectivityProfile,
    JobPriority, JobStatus, MutationKind, MutationRecord, MutationStatus, Notification,
    NotificationKind, NotificationPriority, PestSeverity,
};
pub use remote::{HealthReport, HttpBackend, JobResultEnvelope, RemoteBackend, RemoteError};
pub use retry::RetryConfig;
pub use store::{InMemoryStore, LocalStore, StoreError};
