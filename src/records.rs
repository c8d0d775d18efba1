//! Core record types that flow through the sync core.
//!
//! Everything here is persisted through the [`LocalStore`](crate::store::LocalStore)
//! and serialized with serde. Timestamps are epoch milliseconds (`i64`) so
//! records round-trip cleanly through JSON without timezone baggage.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Current time as epoch milliseconds.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Snapshot of connectivity state, owned by the [`ConnectivityMonitor`](crate::ConnectivityMonitor).
///
/// Exactly one value exists at any time; consumers read it through a
/// `watch::Receiver` and never mutate it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub is_connected: bool,
    /// When the last probe finished (epoch millis)
    pub last_checked_ms: i64,
    /// Consecutive failed probes since the last success
    pub retry_count: u32,
    /// Classified cause of the last failure, cleared on success
    pub error: Option<String>,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            is_connected: false,
            last_checked_ms: 0,
            retry_count: 0,
            error: None,
        }
    }
}

/// Probe cadence profile.
///
/// `Production` probes often and tolerates more retries; `LowPower` stretches
/// the interval for battery-constrained field devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectivityProfile {
    Production,
    LowPower,
}

/// Direction of a queued mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MutationKind {
    Upload,
    Download,
}

/// Lifecycle of a queued mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MutationStatus {
    /// Waiting for the next sync cycle
    Pending,
    /// Accepted by the backend; kept only until the queue entry is pruned
    Uploaded,
    /// Retries exhausted; removed from the active queue and counted
    DeadLettered,
}

/// A locally-made change waiting to be reconciled with the backend.
///
/// Lives only while pending: deleted on successful upload, dead-lettered when
/// `retries` exceeds the configured maximum.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationRecord {
    pub id: String,
    pub kind: MutationKind,
    /// Opaque domain payload (the core never inspects it)
    pub payload: Value,
    pub status: MutationStatus,
    pub retries: u32,
    /// Earliest time the next attempt may run (epoch millis)
    pub next_attempt_ms: i64,
    pub created_ms: i64,
}

impl MutationRecord {
    /// Create a pending upload mutation, due immediately.
    pub fn upload(id: String, payload: Value) -> Self {
        let now = now_ms();
        Self {
            id,
            kind: MutationKind::Upload,
            payload,
            status: MutationStatus::Pending,
            retries: 0,
            next_attempt_ms: now,
            created_ms: now,
        }
    }

    /// Whether this mutation is due at `now`.
    #[must_use]
    pub fn is_due(&self, now: i64) -> bool {
        self.status == MutationStatus::Pending && self.next_attempt_ms <= now
    }
}

/// Classification of an analysis job, determining its outcome shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentKind {
    Phytosanitary,
    Predictive,
    Assistant,
    Optimization,
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Phytosanitary => write!(f, "phytosanitary"),
            Self::Predictive => write!(f, "predictive"),
            Self::Assistant => write!(f, "assistant"),
            Self::Optimization => write!(f, "optimization"),
        }
    }
}

/// Scheduling priority for analysis jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum JobPriority {
    Low,
    Medium,
    High,
}

/// Job lifecycle state.
///
/// Transitions are monotonic: `Pending → Processing → {Completed | Failed}`.
/// No other edge is legal; [`JobStatus::can_transition_to`] is the single
/// authority and every status write goes through it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// Check whether moving from `self` to `next` is a legal edge.
    #[must_use]
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }

    /// Terminal states never change again.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Processing => write!(f, "Processing"),
            Self::Completed => write!(f, "Completed"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Pest severity reported by a phytosanitary analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PestSeverity {
    Low,
    Moderate,
    High,
    Critical,
}

/// Outcome of a completed analysis job, tagged by agent kind.
///
/// This replaces the open-ended dynamic payload of earlier designs with one
/// explicit variant per agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "agent", rename_all = "snake_case")]
pub enum AgentOutcome {
    Phytosanitary {
        pest: String,
        severity: PestSeverity,
        affected_lots: Vec<String>,
        recommendation: String,
    },
    Predictive {
        metric: String,
        projected_value: f64,
        horizon_days: u32,
    },
    Assistant {
        answer: String,
        sources: Vec<String>,
    },
    Optimization {
        suggestion: String,
        estimated_gain_pct: f64,
    },
}

impl AgentOutcome {
    /// The agent kind this outcome belongs to.
    #[must_use]
    pub fn agent(&self) -> AgentKind {
        match self {
            Self::Phytosanitary { .. } => AgentKind::Phytosanitary,
            Self::Predictive { .. } => AgentKind::Predictive,
            Self::Assistant { .. } => AgentKind::Assistant,
            Self::Optimization { .. } => AgentKind::Optimization,
        }
    }
}

/// A deferred analysis job.
///
/// Created on enqueue, mutated only by the [`AnalysisJobQueue`](crate::AnalysisJobQueue),
/// never deleted by the core (archival is host policy).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisJob {
    pub id: String,
    pub agent: AgentKind,
    pub status: JobStatus,
    pub priority: JobPriority,
    /// Domain inputs for the processor (lot ids, photo refs, ...)
    pub metadata: Value,
    /// Confidence in `[0, 1]`, meaningful once Completed
    pub confidence: f64,
    pub outcome: Option<AgentOutcome>,
    pub error: Option<String>,
    pub created_ms: i64,
    pub completed_ms: Option<i64>,
}

impl AnalysisJob {
    /// Create a new pending job.
    pub fn new(agent: AgentKind, metadata: Value, priority: JobPriority) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            agent,
            status: JobStatus::Pending,
            priority,
            metadata,
            confidence: 0.0,
            outcome: None,
            error: None,
            created_ms: now_ms(),
            completed_ms: None,
        }
    }
}

/// Kind of user-facing notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationKind {
    AnalysisComplete,
    UrgentAlert,
    Recommendation,
    SystemUpdate,
}

/// Priority of a user-facing notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NotificationPriority {
    Low,
    Medium,
    High,
    Critical,
}

/// A durable, deduplicated, optionally-expiring user notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub agent: Option<AgentKind>,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub priority: NotificationPriority,
    pub read: bool,
    pub created_ms: i64,
    pub expires_ms: Option<i64>,
    /// Stable tag preventing duplicate platform alerts for the same source
    pub dedupe_tag: String,
}

impl Notification {
    /// Whether this notification has expired at `now`.
    #[must_use]
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_ms.is_some_and(|e| e <= now)
    }
}
