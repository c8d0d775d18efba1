// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! HTTP implementation of [`RemoteBackend`] over reqwest.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::config::SyncConfig;
use crate::error::ConfigError;
use crate::records::{now_ms, AnalysisJob, MutationRecord, Notification};

use super::{HealthReport, JobResultEnvelope, RemoteBackend, RemoteError};

/// Reqwest-backed backend client.
///
/// Bearer auth when an API key is configured; JSON bodies everywhere; one
/// fixed timeout per call.
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    health_path: String,
}

impl HttpBackend {
    /// Build a client from validated configuration.
    pub fn new(config: &SyncConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let client = reqwest::Client::builder()
            .timeout(config.probe_timeout())
            .build()
            .map_err(|_| ConfigError::InvalidBaseUrl(config.base_url.clone()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            health_path: config.health_path.clone(),
        })
    }

    fn url(&self, endpoint: &str) -> String {
        if endpoint.starts_with('/') {
            format!("{}{}", self.base_url, endpoint)
        } else {
            format!("{}/{}", self.base_url, endpoint)
        }
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }

    fn classify(err: reqwest::Error) -> RemoteError {
        if err.is_timeout() {
            RemoteError::Timeout
        } else if err.is_connect() {
            RemoteError::Refused(err.to_string())
        } else if err.is_decode() {
            RemoteError::MalformedPayload(err.to_string())
        } else {
            RemoteError::Transport(err.to_string())
        }
    }

    fn check_status(resp: &reqwest::Response) -> Result<(), RemoteError> {
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(RemoteError::Server { status: status.as_u16() })
        }
    }

    async fn get_json(&self, endpoint: &str) -> Result<Value, RemoteError> {
        let resp = self
            .authed(self.client.get(self.url(endpoint)))
            .send()
            .await
            .map_err(Self::classify)?;
        Self::check_status(&resp)?;
        resp.json::<Value>().await.map_err(Self::classify)
    }

    async fn post_json(&self, endpoint: &str, body: &Value) -> Result<Value, RemoteError> {
        let resp = self
            .authed(self.client.post(self.url(endpoint)))
            .json(body)
            .send()
            .await
            .map_err(Self::classify)?;
        Self::check_status(&resp)?;
        resp.json::<Value>().await.map_err(Self::classify)
    }

    /// Generic authenticated resource call for host-level REST access
    /// (GET/POST/PUT/PATCH/DELETE). Empty response bodies map to `Null`.
    pub async fn request_json(
        &self,
        method: reqwest::Method,
        endpoint: &str,
        body: Option<&Value>,
    ) -> Result<Value, RemoteError> {
        let mut req = self.authed(self.client.request(method, self.url(endpoint)));
        if let Some(body) = body {
            req = req.json(body);
        }
        let resp = req.send().await.map_err(Self::classify)?;
        Self::check_status(&resp)?;

        let bytes = resp.bytes().await.map_err(Self::classify)?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes).map_err(|e| RemoteError::MalformedPayload(e.to_string()))
    }

    /// Multipart file upload (field photos, audio notes).
    pub async fn upload_file(
        &self,
        endpoint: &str,
        field: &str,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<Value, RemoteError> {
        let part = reqwest::multipart::Part::bytes(bytes).file_name(filename.to_string());
        let form = reqwest::multipart::Form::new().part(field.to_string(), part);
        let resp = self
            .authed(self.client.post(self.url(endpoint)))
            .multipart(form)
            .send()
            .await
            .map_err(Self::classify)?;
        Self::check_status(&resp)?;
        resp.json::<Value>().await.map_err(Self::classify)
    }
}

#[async_trait]
impl RemoteBackend for HttpBackend {
    async fn probe_health(&self) -> Result<HealthReport, RemoteError> {
        let body = self.get_json(&self.health_path).await?;
        let status = body
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("ok")
            .to_string();
        let timestamp_ms = body
            .get("timestamp_ms")
            .and_then(Value::as_i64)
            .unwrap_or_else(now_ms);
        debug!(status = %status, "health probe succeeded");
        Ok(HealthReport { status, timestamp_ms })
    }

    async fn fetch(&self, endpoint: &str) -> Result<Value, RemoteError> {
        self.get_json(endpoint).await
    }

    async fn push_mutation(&self, mutation: &MutationRecord) -> Result<(), RemoteError> {
        let body = serde_json::to_value(mutation)
            .map_err(|e| RemoteError::MalformedPayload(e.to_string()))?;
        self.post_json("/sync/mutations", &body).await?;
        Ok(())
    }

    async fn submit_job(&self, job: &AnalysisJob) -> Result<(), RemoteError> {
        let body = serde_json::to_value(job)
            .map_err(|e| RemoteError::MalformedPayload(e.to_string()))?;
        self.post_json("/analysis/jobs", &body).await?;
        Ok(())
    }

    async fn poll_job_results(&self, ids: &[String]) -> Result<Vec<JobResultEnvelope>, RemoteError> {
        let body = serde_json::json!({ "job_ids": ids });
        let resp = self.post_json("/analysis/results", &body).await?;
        serde_json::from_value(
            resp.get("results").cloned().unwrap_or(Value::Array(vec![])),
        )
        .map_err(|e| RemoteError::MalformedPayload(e.to_string()))
    }

    async fn list_notifications(&self, since_ms: i64) -> Result<Vec<Notification>, RemoteError> {
        let resp = self
            .get_json(&format!("/notifications?since={since_ms}"))
            .await?;
        serde_json::from_value(
            resp.get("notifications").cloned().unwrap_or(Value::Array(vec![])),
        )
        .map_err(|e| RemoteError::MalformedPayload(e.to_string()))
    }
}
