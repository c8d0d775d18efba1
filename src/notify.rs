// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Notification dispatcher: durable notifications plus best-effort platform
//! alerts.
//!
//! Every notification is persisted through the store regardless of alert
//! permission; the platform alert on top is fire-and-forget and deduplicated
//! by tag, so one analysis outcome never raises two banners even when its
//! result is merged twice.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashSet;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::error::NotifyError;
use crate::records::{
    now_ms, AgentKind, AgentOutcome, AnalysisJob, JobStatus, Notification, NotificationKind,
    NotificationPriority, PestSeverity,
};
use crate::store::LocalStore;

/// Platform alert permission state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertPermission {
    Granted,
    Denied,
    Unrequested,
}

/// Host-platform alert surface (OS banners, tray toasts).
///
/// The core talks to this for the ephemeral alert only; durable storage is
/// the dispatcher's job.
#[async_trait]
pub trait SystemNotifier: Send + Sync {
    fn permission(&self) -> AlertPermission;
    async fn request_permission(&self) -> Result<AlertPermission, NotifyError>;
    async fn show(&self, title: &str, body: &str, tag: &str) -> Result<(), NotifyError>;
}

/// Notifier that writes alerts to the log. Used headless and in development.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl SystemNotifier for LogNotifier {
    fn permission(&self) -> AlertPermission {
        AlertPermission::Granted
    }

    async fn request_permission(&self) -> Result<AlertPermission, NotifyError> {
        Ok(AlertPermission::Granted)
    }

    async fn show(&self, title: &str, body: &str, tag: &str) -> Result<(), NotifyError> {
        info!(title, body, tag, "alert");
        Ok(())
    }
}

/// Notifier with permission permanently denied.
#[derive(Debug, Default)]
pub struct DeniedNotifier;

#[async_trait]
impl SystemNotifier for DeniedNotifier {
    fn permission(&self) -> AlertPermission {
        AlertPermission::Denied
    }

    async fn request_permission(&self) -> Result<AlertPermission, NotifyError> {
        Ok(AlertPermission::Denied)
    }

    async fn show(&self, _: &str, _: &str, _: &str) -> Result<(), NotifyError> {
        Err(NotifyError::PermissionDenied)
    }
}

/// Inputs for a manually-raised notification.
#[derive(Debug, Clone)]
pub struct NotifyOptions {
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub priority: NotificationPriority,
    pub agent: Option<AgentKind>,
    pub expires_ms: Option<i64>,
    pub dedupe_tag: String,
}

/// Persists notifications and raises deduplicated platform alerts.
pub struct NotificationDispatcher {
    store: Arc<dyn LocalStore>,
    notifier: Arc<dyn SystemNotifier>,
    /// Tags already alerted this session
    raised_tags: DashSet<String>,
}

impl NotificationDispatcher {
    pub fn new(store: Arc<dyn LocalStore>, notifier: Arc<dyn SystemNotifier>) -> Self {
        Self {
            store,
            notifier,
            raised_tags: DashSet::new(),
        }
    }

    /// Ask the platform for alert permission when it has not been decided
    /// yet. Decided states are returned as-is without prompting again.
    pub async fn ensure_permission(&self) -> Result<AlertPermission, NotifyError> {
        match self.notifier.permission() {
            AlertPermission::Unrequested => self.notifier.request_permission().await,
            decided => Ok(decided),
        }
    }

    /// Persist a notification and raise the platform alert when permitted
    /// and not already raised for the same tag.
    ///
    /// Tag dedupe is durable: a persisted record with the same tag means the
    /// alert was raised before (possibly in an earlier process), so a repeat
    /// updates that record in place and stays silent. The session set only
    /// covers the window before the first write lands.
    #[tracing::instrument(skip(self, options), fields(tag = %options.dedupe_tag))]
    pub async fn notify(&self, options: NotifyOptions) -> Result<Notification, NotifyError> {
        let existing = self.store.notification_by_tag(&options.dedupe_tag).await?;
        let previously_raised = existing.is_some();

        let notification = match existing {
            Some(mut current) => {
                current.agent = options.agent;
                current.kind = options.kind;
                current.title = options.title;
                current.message = options.message;
                current.priority = options.priority;
                current.expires_ms = options.expires_ms;
                current
            }
            None => Notification {
                id: uuid::Uuid::new_v4().to_string(),
                agent: options.agent,
                kind: options.kind,
                title: options.title,
                message: options.message,
                priority: options.priority,
                read: false,
                created_ms: now_ms(),
                expires_ms: options.expires_ms,
                dedupe_tag: options.dedupe_tag,
            },
        };
        // Durable record first, alert second
        self.store.put_notification(&notification).await?;
        crate::metrics::record_notification("persisted");

        if self.notifier.permission() != AlertPermission::Granted {
            debug!("alert permission not granted, stored only");
            return Ok(notification);
        }
        if previously_raised || !self.raised_tags.insert(notification.dedupe_tag.clone()) {
            debug!("alert already raised for tag, stored only");
            crate::metrics::record_notification("deduped");
            return Ok(notification);
        }

        // Alert failure never fails the notification
        if let Err(e) = self
            .notifier
            .show(&notification.title, &notification.message, &notification.dedupe_tag)
            .await
        {
            warn!(error = %e, "platform alert failed");
        } else {
            crate::metrics::record_notification("alerted");
        }
        Ok(notification)
    }

    /// Turn a terminal analysis job into a user notification.
    ///
    /// Completed jobs map to agent-specific titles and priorities; a critical
    /// phytosanitary finding escalates to an urgent alert. Failed jobs are
    /// not surfaced here, the host reads them from job status.
    pub async fn notify_job_complete(&self, job: &AnalysisJob) -> Result<Option<Notification>, NotifyError> {
        if job.status != JobStatus::Completed {
            debug!(id = %job.id, status = %job.status, "job not completed, no notification");
            return Ok(None);
        }
        let Some(outcome) = &job.outcome else {
            warn!(id = %job.id, "completed job without outcome, skipping notification");
            return Ok(None);
        };

        let (kind, priority, title, message) = describe_outcome(outcome);
        let notification = self
            .notify(NotifyOptions {
                kind,
                title,
                message,
                priority,
                agent: Some(job.agent),
                expires_ms: None,
                dedupe_tag: format!("{}:{}", job.agent, job.id),
            })
            .await?;
        Ok(Some(notification))
    }

    /// Mark a stored notification as read.
    pub async fn mark_read(&self, id: &str) -> Result<(), NotifyError> {
        let Some(mut notification) = self.store.get_notification(id).await? else {
            return Err(NotifyError::Store(crate::store::StoreError::NotFound));
        };
        notification.read = true;
        self.store.put_notification(&notification).await?;
        Ok(())
    }

    /// Unread, non-expired notifications, newest first.
    pub async fn unread(&self) -> Result<Vec<Notification>, NotifyError> {
        Ok(self.store.unread_notifications(now_ms()).await?)
    }

    /// Delete expired notifications; returns how many were removed.
    pub async fn cleanup_expired(&self) -> Result<usize, NotifyError> {
        let now = now_ms();
        let mut removed = 0;
        for notification in self.store.scan_notifications().await? {
            if notification.is_expired(now) {
                self.store.delete_notification(&notification.id).await?;
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(removed, "cleaned up expired notifications");
        }
        Ok(removed)
    }

    /// Consume terminal jobs from the queue's completion channel until the
    /// channel closes or `shutdown` flips.
    #[tracing::instrument(skip_all)]
    pub async fn run(
        &self,
        mut completed: mpsc::UnboundedReceiver<AnalysisJob>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("notification dispatcher running");
        loop {
            tokio::select! {
                job = completed.recv() => {
                    let Some(job) = job else {
                        info!("completion channel closed, dispatcher stopping");
                        return;
                    };
                    if let Err(e) = self.notify_job_complete(&job).await {
                        warn!(id = %job.id, error = %e, "failed to dispatch job notification");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("notification dispatcher stopping");
                        return;
                    }
                }
            }
        }
    }
}

/// Map an outcome onto notification kind, priority, title and body.
fn describe_outcome(
    outcome: &AgentOutcome,
) -> (NotificationKind, NotificationPriority, String, String) {
    match outcome {
        AgentOutcome::Phytosanitary { pest, severity, affected_lots, recommendation } => {
            let (kind, priority) = match severity {
                PestSeverity::Critical => {
                    (NotificationKind::UrgentAlert, NotificationPriority::Critical)
                }
                PestSeverity::High => {
                    (NotificationKind::AnalysisComplete, NotificationPriority::High)
                }
                _ => (NotificationKind::AnalysisComplete, NotificationPriority::Medium),
            };
            let lots = if affected_lots.is_empty() {
                "no specific lots".to_string()
            } else {
                affected_lots.join(", ")
            };
            (
                kind,
                priority,
                format!("Pest analysis: {pest}"),
                format!("{lots}. {recommendation}"),
            )
        }
        AgentOutcome::Predictive { metric, projected_value, horizon_days } => (
            NotificationKind::AnalysisComplete,
            NotificationPriority::Medium,
            "Forecast ready".to_string(),
            format!("{metric}: {projected_value:.1} over the next {horizon_days} days"),
        ),
        AgentOutcome::Assistant { answer, .. } => (
            NotificationKind::AnalysisComplete,
            NotificationPriority::Medium,
            "Assistant answer ready".to_string(),
            answer.clone(),
        ),
        AgentOutcome::Optimization { suggestion, estimated_gain_pct } => (
            NotificationKind::Recommendation,
            NotificationPriority::Medium,
            "Optimization suggestion".to_string(),
            format!("{suggestion} (est. +{estimated_gain_pct:.1}%)"),
        ),
    }
}
