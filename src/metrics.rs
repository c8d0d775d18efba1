// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the sync core.
//!
//! Uses the `metrics` crate for backend-agnostic collection; the host
//! application chooses the exporter (Prometheus, OTEL, ...).
//!
//! # Metric Naming Convention
//! - `fieldsync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `component`: connectivity, cache, orchestrator, jobs, notify
//! - `status`: success, error, hit, miss, ...

use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};

/// Record a probe outcome (`success`, `timeout`, `refused`, `server`, `transport`)
pub fn record_probe(outcome: &str) {
    counter!(
        "fieldsync_probe_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record probe latency
pub fn record_probe_latency(duration: Duration) {
    histogram!("fieldsync_probe_seconds").record(duration.as_secs_f64());
}

/// Set the connectivity gauge (1 connected, 0 disconnected)
pub fn set_connected(connected: bool) {
    gauge!("fieldsync_connected").set(if connected { 1.0 } else { 0.0 });
}

/// Record a cache lookup result (`hit`, `miss`, `stale`, `fallback`, `network`)
pub fn record_cache_lookup(result: &str) {
    counter!(
        "fieldsync_cache_lookup_total",
        "result" => result.to_string()
    )
    .increment(1);
}

/// Set the cache entry count gauge
pub fn set_cache_entries(count: usize) {
    gauge!("fieldsync_cache_entries").set(count as f64);
}

/// Record a sync cycle outcome
pub fn record_sync_cycle(uploaded: usize, downloaded: usize, failed: usize) {
    counter!("fieldsync_sync_uploaded_total").increment(uploaded as u64);
    counter!("fieldsync_sync_downloaded_total").increment(downloaded as u64);
    counter!("fieldsync_sync_failed_total").increment(failed as u64);
}

/// Record sync cycle latency
pub fn record_sync_cycle_latency(duration: Duration) {
    histogram!("fieldsync_sync_cycle_seconds").record(duration.as_secs_f64());
}

/// Record a dead-lettered mutation
pub fn record_dead_letter() {
    counter!("fieldsync_dead_letter_total").increment(1);
}

/// Set the pending mutation gauge
pub fn set_pending_mutations(count: usize) {
    gauge!("fieldsync_pending_mutations").set(count as f64);
}

/// Record a job lifecycle event (`dispatched`, `completed`, `failed`, `skipped`)
pub fn record_job_event(agent: &str, event: &str) {
    counter!(
        "fieldsync_job_events_total",
        "agent" => agent.to_string(),
        "event" => event.to_string()
    )
    .increment(1);
}

/// Record job processing latency
pub fn record_job_latency(agent: &str, duration: Duration) {
    histogram!(
        "fieldsync_job_seconds",
        "agent" => agent.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Set the in-flight job gauge (processing-set size)
pub fn set_jobs_in_flight(count: usize) {
    gauge!("fieldsync_jobs_in_flight").set(count as f64);
}

/// Record a notification event (`persisted`, `alerted`, `deduped`)
pub fn record_notification(event: &str) {
    counter!(
        "fieldsync_notifications_total",
        "event" => event.to_string()
    )
    .increment(1);
}

/// Simple RAII latency timer.
///
/// Records to the given histogram name on drop.
pub struct LatencyTimer {
    name: &'static str,
    start: Instant,
}

impl LatencyTimer {
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self { name, start: Instant::now() }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        histogram!(self.name).record(self.start.elapsed().as_secs_f64());
    }
}
