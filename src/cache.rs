//! Cache fallback layer: TTL-cached reads that survive outages.
//!
//! Wraps outbound resource reads. While connected, responses are cached
//! under a sanitized endpoint signature with a fixed TTL (default 30 min).
//! While disconnected, or when a live call fails, a non-expired cached
//! response is served instead, then the caller-supplied fallback, then a
//! result-with-error. The network is never even attempted while the monitor
//! reports disconnected. This layer never retries; retries belong to the
//! orchestrator.

use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::watch;
use tracing::{debug, warn};

use std::sync::Arc;

use crate::records::{now_ms, ConnectionStatus};
use crate::remote::RemoteBackend;

/// Result shape of a cached read. Never an `Err`.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResponse {
    pub data: Option<Value>,
    pub from_cache: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    payload: Value,
    stored_ms: i64,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self, now: i64) -> bool {
        now - self.stored_ms > self.ttl.as_millis() as i64
    }
}

/// Derive a stable cache key from a request signature.
///
/// Lowercases the path, sorts query parameters so equivalent requests share
/// an entry, and digests oversized keys with SHA-256.
pub fn cache_key(endpoint: &str) -> String {
    let (path, query) = match endpoint.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (endpoint, None),
    };

    let mut key = path.trim_end_matches('/').to_ascii_lowercase();
    if let Some(query) = query {
        let mut params: Vec<&str> = query.split('&').filter(|p| !p.is_empty()).collect();
        params.sort_unstable();
        if !params.is_empty() {
            key.push('?');
            key.push_str(&params.join("&"));
        }
    }

    if key.len() > 128 {
        let digest = hex::encode(&Sha256::digest(key.as_bytes())[..16]);
        key.truncate(96);
        format!("{key}#{digest}")
    } else {
        key
    }
}

/// TTL-cached read-through layer over the remote backend.
pub struct CacheFallbackLayer {
    backend: Arc<dyn RemoteBackend>,
    status_rx: watch::Receiver<ConnectionStatus>,
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
}

impl CacheFallbackLayer {
    pub fn new(
        backend: Arc<dyn RemoteBackend>,
        status_rx: watch::Receiver<ConnectionStatus>,
        ttl: Duration,
    ) -> Self {
        Self {
            backend,
            status_rx,
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Read `endpoint`, preferring the network while connected and falling
    /// back to cache → `fallback` → error.
    #[tracing::instrument(skip(self, fallback), fields(from_cache))]
    pub async fn request(&self, endpoint: &str, fallback: Option<Value>) -> CachedResponse {
        let key = cache_key(endpoint);

        if self.status_rx.borrow().is_connected {
            match self.backend.fetch(endpoint).await {
                Ok(data) => {
                    // Last write wins for this signature
                    self.entries.insert(
                        key,
                        CacheEntry {
                            payload: data.clone(),
                            stored_ms: now_ms(),
                            ttl: self.ttl,
                        },
                    );
                    tracing::Span::current().record("from_cache", false);
                    crate::metrics::record_cache_lookup("network");
                    crate::metrics::set_cache_entries(self.entries.len());
                    return CachedResponse { data: Some(data), from_cache: false, error: None };
                }
                Err(e) => {
                    warn!(error = %e, "live fetch failed, falling back to cache");
                    return self.serve_fallback(&key, fallback, e.to_string());
                }
            }
        }

        // Disconnected: do not waste the round trip
        debug!("offline, serving from cache without network attempt");
        self.serve_fallback(&key, fallback, "offline: network not attempted".to_string())
    }

    fn serve_fallback(&self, key: &str, fallback: Option<Value>, error: String) -> CachedResponse {
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired(now_ms()) {
                tracing::Span::current().record("from_cache", true);
                crate::metrics::record_cache_lookup("hit");
                return CachedResponse {
                    data: Some(entry.payload.clone()),
                    from_cache: true,
                    error: None,
                };
            }
            crate::metrics::record_cache_lookup("stale");
        } else {
            crate::metrics::record_cache_lookup("miss");
        }

        tracing::Span::current().record("from_cache", false);
        match fallback {
            Some(data) => {
                crate::metrics::record_cache_lookup("fallback");
                CachedResponse { data: Some(data), from_cache: false, error: Some(error) }
            }
            None => CachedResponse { data: None, from_cache: false, error: Some(error) },
        }
    }

    /// Remove expired entries; returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = now_ms();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let purged = before - self.entries.len();
        if purged > 0 {
            debug!(purged, "purged expired cache entries");
        }
        crate::metrics::set_cache_entries(self.entries.len());
        purged
    }

    /// Current entry count.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Age an entry backwards, for expiry tests.
    #[cfg(test)]
    fn backdate(&self, endpoint: &str, by_ms: i64) {
        if let Some(mut entry) = self.entries.get_mut(&cache_key(endpoint)) {
            entry.stored_ms -= by_ms;
        }
    }
}
