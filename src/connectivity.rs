// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Connectivity monitor: periodic health probing and connection-state
//! transitions.
//!
//! One [`ConnectionStatus`] value exists at any time, broadcast over a watch
//! channel. Probes are single-flight: a probe invoked while another is
//! outstanding is a no-op that returns the current status. Probe failures
//! never raise errors to callers; they only update state.
//!
//! Probes run on the profile interval, and immediately when the host reports
//! an OS online/offline hint or an application-foreground transition
//! ([`nudge()`](ConnectivityMonitor::nudge)).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, Mutex, Notify};
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::records::{now_ms, ConnectionStatus};
use crate::remote::RemoteBackend;

/// Health-probing connectivity monitor.
///
/// Explicitly constructed and passed by handle; multiple independent
/// instances can exist (one per backend in tests).
pub struct ConnectivityMonitor {
    config: SyncConfig,
    backend: Arc<dyn RemoteBackend>,
    status_tx: watch::Sender<ConnectionStatus>,
    status_rx: watch::Receiver<ConnectionStatus>,
    /// Single-flight guard: held for the duration of one probe
    probe_lock: Mutex<()>,
    /// Count of offline→online transitions (one-shot "restored" events)
    restored_seq: AtomicU64,
    /// External probe trigger (foreground / OS online hints)
    nudge: Notify,
}

impl ConnectivityMonitor {
    pub fn new(config: SyncConfig, backend: Arc<dyn RemoteBackend>) -> Self {
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::default());
        Self {
            config,
            backend,
            status_tx,
            status_rx,
            probe_lock: Mutex::new(()),
            restored_seq: AtomicU64::new(0),
            nudge: Notify::new(),
        }
    }

    /// Current connection status.
    #[must_use]
    pub fn current(&self) -> ConnectionStatus {
        self.status_rx.borrow().clone()
    }

    /// Watch status transitions (the `onTransition` hook).
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }

    /// How many "restored" transitions have fired since construction.
    #[must_use]
    pub fn restored_count(&self) -> u64 {
        self.restored_seq.load(Ordering::Acquire)
    }

    /// Request an immediate probe from the run loop (application foreground,
    /// OS online/offline hint).
    pub fn nudge(&self) {
        self.nudge.notify_one();
    }

    /// Issue one bounded-timeout health probe and update status.
    ///
    /// Single-flight: if a probe is already outstanding this returns the
    /// in-progress (current) status untouched. Never returns an error.
    #[tracing::instrument(skip(self), fields(outcome))]
    pub async fn probe(&self) -> ConnectionStatus {
        let Ok(_guard) = self.probe_lock.try_lock() else {
            debug!("probe already in flight, returning current status");
            return self.current();
        };

        let start = std::time::Instant::now();
        let previous = self.current();

        let next = match self.backend.probe_health().await {
            Ok(report) => {
                tracing::Span::current().record("outcome", "success");
                crate::metrics::record_probe("success");
                if previous.retry_count > 0 {
                    // Exactly one restored event per offline episode
                    self.restored_seq.fetch_add(1, Ordering::AcqRel);
                    info!(
                        failures = previous.retry_count,
                        backend_status = %report.status,
                        "connectivity restored"
                    );
                }
                ConnectionStatus {
                    is_connected: true,
                    last_checked_ms: now_ms(),
                    retry_count: 0,
                    error: None,
                }
            }
            Err(e) => {
                let cause = e.classify();
                tracing::Span::current().record("outcome", cause);
                crate::metrics::record_probe(cause);
                warn!(cause, error = %e, retry_count = previous.retry_count + 1, "health probe failed");
                ConnectionStatus {
                    is_connected: false,
                    last_checked_ms: now_ms(),
                    retry_count: previous.retry_count + 1,
                    error: Some(format!("{cause}: {e}")),
                }
            }
        };

        crate::metrics::record_probe_latency(start.elapsed());
        crate::metrics::set_connected(next.is_connected);
        self.status_tx.send_replace(next.clone());
        next
    }

    /// Run the probe loop until `shutdown` flips to true.
    #[tracing::instrument(skip_all)]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.probe_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(interval = ?self.config.probe_interval(), profile = ?self.config.profile, "connectivity monitor running");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.probe().await;
                }
                _ = self.nudge.notified() => {
                    debug!("external trigger, probing immediately");
                    self.probe().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("connectivity monitor stopping");
                        return;
                    }
                }
            }
        }
    }
}
