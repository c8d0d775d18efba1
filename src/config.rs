//! Configuration for the sync core.
//!
//! # Example
//!
//! ```
//! use fieldsync::SyncConfig;
//!
//! // Minimal config (uses defaults)
//! let config = SyncConfig {
//!     base_url: "https://api.example.farm".into(),
//!     ..Default::default()
//! };
//! assert_eq!(config.cache_ttl_secs, 30 * 60);
//! assert!(config.validate().is_ok());
//!
//! // Low-power profile for battery-constrained field devices
//! let low = fieldsync::SyncConfig::low_power("https://api.example.farm");
//! let prod = fieldsync::SyncConfig::production("https://api.example.farm");
//! assert!(low.probe_interval() > prod.probe_interval());
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::records::ConnectivityProfile;

/// Configuration supplied by the host application at startup.
///
/// All fields except `base_url` have sensible defaults. Validation happens
/// once in [`validate()`](Self::validate); it is the only place in the crate
/// allowed to fail initialization outright.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Backend base URL (e.g., "https://api.example.farm"); required
    #[serde(default)]
    pub base_url: String,

    /// Bearer token sent on every backend call
    #[serde(default)]
    pub api_key: Option<String>,

    /// Health probe endpoint path
    #[serde(default = "default_health_path")]
    pub health_path: String,

    /// Per-call network timeout in milliseconds
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// Probe cadence profile
    #[serde(default = "default_profile")]
    pub profile: ConnectivityProfile,

    /// Seconds between periodic health probes
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,

    /// Seconds between periodic sync cycles
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,

    /// Max mutations uploaded per sync cycle
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Max retries before a mutation is dead-lettered
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base backoff delay in milliseconds (doubles per retry)
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,

    /// Backoff cap in seconds
    #[serde(default = "default_retry_max_delay_secs")]
    pub retry_max_delay_secs: u64,

    /// Cached response TTL in seconds
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Run sync cycles on the interval timer (reconnect cycles always run)
    #[serde(default = "default_auto_sync")]
    pub auto_sync: bool,

    /// Worker pool bound for concurrent job processing
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
}

fn default_health_path() -> String { "/health".to_string() }
fn default_probe_timeout_ms() -> u64 { 5_000 }
fn default_profile() -> ConnectivityProfile { ConnectivityProfile::Production }
fn default_probe_interval_secs() -> u64 { 30 }
fn default_sync_interval_secs() -> u64 { 300 }
fn default_batch_size() -> usize { 50 }
fn default_max_retries() -> u32 { 5 }
fn default_retry_base_ms() -> u64 { 1_000 }
fn default_retry_max_delay_secs() -> u64 { 300 }
fn default_cache_ttl_secs() -> u64 { 30 * 60 }
fn default_auto_sync() -> bool { true }
fn default_max_concurrent_jobs() -> usize { 4 }

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: None,
            health_path: default_health_path(),
            probe_timeout_ms: default_probe_timeout_ms(),
            profile: default_profile(),
            probe_interval_secs: default_probe_interval_secs(),
            sync_interval_secs: default_sync_interval_secs(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
            retry_max_delay_secs: default_retry_max_delay_secs(),
            cache_ttl_secs: default_cache_ttl_secs(),
            auto_sync: default_auto_sync(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
        }
    }
}

impl SyncConfig {
    /// Production profile: frequent probes, full retry budget.
    #[must_use]
    pub fn production(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            profile: ConnectivityProfile::Production,
            probe_interval_secs: 30,
            ..Default::default()
        }
    }

    /// Low-power profile: infrequent probes, smaller retry budget.
    #[must_use]
    pub fn low_power(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            profile: ConnectivityProfile::LowPower,
            probe_interval_secs: 180,
            max_retries: 3,
            ..Default::default()
        }
    }

    /// Validate the configuration.
    ///
    /// A missing or malformed `base_url`, zero `batch_size`, or zero cache
    /// TTL is a startup error.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.is_empty() {
            return Err(ConfigError::MissingBaseUrl);
        }
        match url::Url::parse(&self.base_url) {
            Ok(u) if matches!(u.scheme(), "http" | "https") => {}
            _ => return Err(ConfigError::InvalidBaseUrl(self.base_url.clone())),
        }
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroField("batch_size"));
        }
        if self.cache_ttl_secs == 0 {
            return Err(ConfigError::ZeroField("cache_ttl_secs"));
        }
        if self.max_concurrent_jobs == 0 {
            return Err(ConfigError::ZeroField("max_concurrent_jobs"));
        }
        Ok(())
    }

    /// Per-call network timeout.
    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Probe interval for the configured profile.
    #[must_use]
    pub fn probe_interval(&self) -> Duration {
        match self.profile {
            ConnectivityProfile::Production => Duration::from_secs(self.probe_interval_secs),
            // LowPower never probes more often than once a minute
            ConnectivityProfile::LowPower => {
                Duration::from_secs(self.probe_interval_secs.max(60))
            }
        }
    }

    /// Cached response TTL.
    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Base backoff delay.
    #[must_use]
    pub fn retry_base(&self) -> Duration {
        Duration::from_millis(self.retry_base_ms)
    }

    /// Backoff cap.
    #[must_use]
    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_secs(self.retry_max_delay_secs)
    }
}
