//! Remote backend abstraction.
//!
//! The sync core talks to the backend exclusively through [`RemoteBackend`];
//! [`HttpBackend`](http::HttpBackend) is the production implementation and
//! tests substitute scripted mocks. Every call carries the fixed per-call
//! timeout from [`SyncConfig`](crate::SyncConfig); a slow backend is treated
//! as failed, never as hung.

pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::records::{AgentOutcome, AnalysisJob, MutationRecord, Notification};

pub use http::HttpBackend;

/// Classified backend failure causes.
///
/// The connectivity monitor records these verbatim in
/// [`ConnectionStatus::error`](crate::records::ConnectionStatus).
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("request timed out")]
    Timeout,
    #[error("connection refused: {0}")]
    Refused(String),
    #[error("server error (status {status})")]
    Server { status: u16 },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

impl RemoteError {
    /// Short classification label for metrics and status records.
    #[must_use]
    pub fn classify(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Refused(_) => "refused",
            Self::Server { .. } => "server",
            Self::Transport(_) => "transport",
            Self::MalformedPayload(_) => "malformed",
        }
    }
}

/// Health probe response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub timestamp_ms: i64,
}

/// A completed (or remotely failed) job result pulled from the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResultEnvelope {
    pub job_id: String,
    pub outcome: Option<AgentOutcome>,
    pub confidence: f64,
    pub error: Option<String>,
    pub completed_ms: i64,
}

/// The backend API surface the sync core consumes.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Bounded-timeout health probe.
    async fn probe_health(&self) -> Result<HealthReport, RemoteError>;

    /// Generic resource read (GET), JSON body.
    async fn fetch(&self, endpoint: &str) -> Result<Value, RemoteError>;

    /// Push one queued mutation.
    async fn push_mutation(&self, mutation: &MutationRecord) -> Result<(), RemoteError>;

    /// Submit a job for remote processing.
    async fn submit_job(&self, job: &AnalysisJob) -> Result<(), RemoteError>;

    /// Poll results for the given job ids; absent ids are still in progress.
    async fn poll_job_results(&self, ids: &[String]) -> Result<Vec<JobResultEnvelope>, RemoteError>;

    /// Notifications created on the backend since `since_ms`.
    async fn list_notifications(&self, since_ms: i64) -> Result<Vec<Notification>, RemoteError>;
}
