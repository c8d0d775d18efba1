// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Crate-wide error taxonomy.
//!
//! Backend-specific errors live next to their traits
//! ([`StoreError`](crate::store::StoreError), [`RemoteError`](crate::remote::RemoteError));
//! this module holds the cross-cutting kinds. Nothing here except
//! [`ConfigError`] is allowed to abort the host: the cache and orchestrator
//! return result-with-error shapes, probes and job failures update state and
//! log.

use thiserror::Error;

use crate::records::{AgentKind, JobStatus};
use crate::remote::RemoteError;
use crate::store::StoreError;

/// Startup configuration errors, the only fatal errors in the crate.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("base_url is required")]
    MissingBaseUrl,
    #[error("base_url '{0}' is not a valid http(s) URL")]
    InvalidBaseUrl(String),
    #[error("{0} must be greater than zero")]
    ZeroField(&'static str),
}

/// Errors surfaced by a sync cycle, collected into the cycle report.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("upload of mutation '{id}' failed: {source}")]
    Upload {
        id: String,
        #[source]
        source: RemoteError,
    },
    #[error("download failed: {source}")]
    Download {
        #[source]
        source: RemoteError,
    },
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from the analysis job queue.
///
/// A `Processing` error is terminal for that job (status becomes Failed) but
/// never crashes the queue.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("job processing failed: {0}")]
    Processing(String),
    #[error("unknown job '{0}'")]
    UnknownJob(String),
    #[error("processor returned an outcome for the wrong agent: {0}")]
    UnexpectedAgent(AgentKind),
    #[error("illegal job status transition {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from the notification dispatcher.
///
/// `PermissionDenied` only ever skips the platform alert; the persisted
/// notification is created regardless.
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("platform alert permission denied")]
    PermissionDenied,
    #[error("platform alert failed: {0}")]
    Platform(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}
