use async_trait::async_trait;
use thiserror::Error;

use crate::records::{AnalysisJob, JobStatus, MutationRecord, MutationStatus, Notification};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("store backend error: {0}")]
    Backend(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Persistent keyed storage consumed by the sync core.
///
/// `put_*` operations are insert-or-replace keyed by record id. Filter
/// operations never return expired or mismatched records; full scans are for
/// reconciliation sweeps only.
#[async_trait]
pub trait LocalStore: Send + Sync {
    // --- mutation queue ---

    async fn get_mutation(&self, id: &str) -> Result<Option<MutationRecord>, StoreError>;
    async fn put_mutation(&self, record: &MutationRecord) -> Result<(), StoreError>;
    async fn delete_mutation(&self, id: &str) -> Result<(), StoreError>;

    /// Mutations with the given status, ordered by `next_attempt_ms`,
    /// at most `limit`.
    async fn mutations_with_status(
        &self,
        status: MutationStatus,
        limit: usize,
    ) -> Result<Vec<MutationRecord>, StoreError>;

    async fn scan_mutations(&self) -> Result<Vec<MutationRecord>, StoreError>;

    // --- analysis jobs ---

    async fn get_job(&self, id: &str) -> Result<Option<AnalysisJob>, StoreError>;
    async fn put_job(&self, job: &AnalysisJob) -> Result<(), StoreError>;
    async fn jobs_with_status(&self, status: JobStatus) -> Result<Vec<AnalysisJob>, StoreError>;
    async fn scan_jobs(&self) -> Result<Vec<AnalysisJob>, StoreError>;

    // --- notifications ---

    async fn get_notification(&self, id: &str) -> Result<Option<Notification>, StoreError>;
    async fn put_notification(&self, notification: &Notification) -> Result<(), StoreError>;
    async fn delete_notification(&self, id: &str) -> Result<(), StoreError>;

    /// Unread, non-expired notifications at `now_ms`, newest first.
    async fn unread_notifications(&self, now_ms: i64) -> Result<Vec<Notification>, StoreError>;

    /// The notification carrying `tag`, if one exists. Dedupe tags are unique
    /// per source, so at most one record matches.
    async fn notification_by_tag(&self, tag: &str) -> Result<Option<Notification>, StoreError>;

    async fn scan_notifications(&self) -> Result<Vec<Notification>, StoreError>;

    // --- key-value slot (last-sync timestamp and friends) ---

    async fn get_meta(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn put_meta(&self, key: &str, value: &str) -> Result<(), StoreError>;
}
