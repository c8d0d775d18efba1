use async_trait::async_trait;
use dashmap::DashMap;

use crate::records::{AnalysisJob, JobStatus, MutationRecord, MutationStatus, Notification};

use super::traits::{LocalStore, StoreError};

/// DashMap-backed [`LocalStore`] with no durability.
///
/// The reference implementation: tests run against it, and hosts without
/// their own persistence can embed it directly.
pub struct InMemoryStore {
    mutations: DashMap<String, MutationRecord>,
    jobs: DashMap<String, AnalysisJob>,
    notifications: DashMap<String, Notification>,
    meta: DashMap<String, String>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            mutations: DashMap::new(),
            jobs: DashMap::new(),
            notifications: DashMap::new(),
            meta: DashMap::new(),
        }
    }

    /// Counts per collection: (mutations, jobs, notifications)
    #[must_use]
    pub fn counts(&self) -> (usize, usize, usize) {
        (self.mutations.len(), self.jobs.len(), self.notifications.len())
    }

    /// Clear all collections
    pub fn clear(&self) {
        self.mutations.clear();
        self.jobs.clear();
        self.notifications.clear();
        self.meta.clear();
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LocalStore for InMemoryStore {
    async fn get_mutation(&self, id: &str) -> Result<Option<MutationRecord>, StoreError> {
        Ok(self.mutations.get(id).map(|r| r.value().clone()))
    }

    async fn put_mutation(&self, record: &MutationRecord) -> Result<(), StoreError> {
        self.mutations.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn delete_mutation(&self, id: &str) -> Result<(), StoreError> {
        self.mutations.remove(id);
        Ok(())
    }

    async fn mutations_with_status(
        &self,
        status: MutationStatus,
        limit: usize,
    ) -> Result<Vec<MutationRecord>, StoreError> {
        let mut matching: Vec<MutationRecord> = self
            .mutations
            .iter()
            .filter(|r| r.value().status == status)
            .map(|r| r.value().clone())
            .collect();
        matching.sort_by_key(|m| m.next_attempt_ms);
        matching.truncate(limit);
        Ok(matching)
    }

    async fn scan_mutations(&self) -> Result<Vec<MutationRecord>, StoreError> {
        Ok(self.mutations.iter().map(|r| r.value().clone()).collect())
    }

    async fn get_job(&self, id: &str) -> Result<Option<AnalysisJob>, StoreError> {
        Ok(self.jobs.get(id).map(|r| r.value().clone()))
    }

    async fn put_job(&self, job: &AnalysisJob) -> Result<(), StoreError> {
        self.jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn jobs_with_status(&self, status: JobStatus) -> Result<Vec<AnalysisJob>, StoreError> {
        Ok(self
            .jobs
            .iter()
            .filter(|r| r.value().status == status)
            .map(|r| r.value().clone())
            .collect())
    }

    async fn scan_jobs(&self) -> Result<Vec<AnalysisJob>, StoreError> {
        Ok(self.jobs.iter().map(|r| r.value().clone()).collect())
    }

    async fn get_notification(&self, id: &str) -> Result<Option<Notification>, StoreError> {
        Ok(self.notifications.get(id).map(|r| r.value().clone()))
    }

    async fn put_notification(&self, notification: &Notification) -> Result<(), StoreError> {
        self.notifications
            .insert(notification.id.clone(), notification.clone());
        Ok(())
    }

    async fn delete_notification(&self, id: &str) -> Result<(), StoreError> {
        self.notifications.remove(id);
        Ok(())
    }

    async fn unread_notifications(&self, now_ms: i64) -> Result<Vec<Notification>, StoreError> {
        let mut unread: Vec<Notification> = self
            .notifications
            .iter()
            .filter(|r| !r.value().read && !r.value().is_expired(now_ms))
            .map(|r| r.value().clone())
            .collect();
        unread.sort_by_key(|n| std::cmp::Reverse(n.created_ms));
        Ok(unread)
    }

    async fn notification_by_tag(&self, tag: &str) -> Result<Option<Notification>, StoreError> {
        Ok(self
            .notifications
            .iter()
            .find(|r| r.value().dedupe_tag == tag)
            .map(|r| r.value().clone()))
    }

    async fn scan_notifications(&self) -> Result<Vec<Notification>, StoreError> {
        Ok(self.notifications.iter().map(|r| r.value().clone()).collect())
    }

    async fn get_meta(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.meta.get(key).map(|r| r.value().clone()))
    }

    async fn put_meta(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.meta.insert(key.to_string(), value.to_string());
        Ok(())
    }
}
