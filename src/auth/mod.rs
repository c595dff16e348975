// Per-credential OAuth token cache
//
// Shared across all requests. Each refresh token maps to one cached
// access token with an absolute expiry, an optionally discovered Cloud
// Code project id, and a derived header fingerprint. Concurrent misses
// for the same refresh token share a single outbound refresh.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

const MAX_CACHE_ENTRIES: usize = 1000;
const EXPIRY_SAFETY_MARGIN_MS: u64 = 60_000;
const CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

/// loadCodeAssist discovery order mirrors the generate endpoint order.
const DISCOVERY_ENDPOINTS: [&str; 3] = [
    "https://daily-cloudcode-pa.sandbox.googleapis.com",
    "https://autopush-cloudcode-pa.sandbox.googleapis.com",
    "https://cloudcode-pa.googleapis.com",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// Token endpoint rejected the refresh token (400/401). The cached
    /// entry is evicted before this surfaces.
    InvalidToken(String),
    /// Token endpoint rate limited us (429); the entry is kept.
    RateLimit(String),
    /// Transport failure or unexpected status; the entry is kept.
    Network(String),
}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenError::InvalidToken(msg) => write!(f, "invalid refresh token: {}", msg),
            TokenError::RateLimit(msg) => write!(f, "token endpoint rate limit: {}", msg),
            TokenError::Network(msg) => write!(f, "token refresh failed: {}", msg),
        }
    }
}

impl std::error::Error for TokenError {}

#[derive(Debug, Clone)]
struct CredentialEntry {
    access_token: String,
    expires_at_ms: u64,
    project_id: Option<String>,
    last_accessed_at_ms: u64,
}

/// Stable per-credential header values derived from the refresh token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub quota_user: String,
    pub device_id: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub refreshes: u64,
    #[serde(rename = "evictedByCleanup")]
    pub evicted_by_cleanup: u64,
    #[serde(rename = "evictedByLRU")]
    pub evicted_by_lru: u64,
}

#[derive(Debug, Deserialize)]
struct TokenEndpointResponse {
    access_token: String,
    expires_in: u64,
}

type RefreshResult = Result<String, TokenError>;
type SharedRefresh = Shared<BoxFuture<'static, RefreshResult>>;

#[derive(Clone)]
pub struct OauthCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    entries: Mutex<HashMap<String, CredentialEntry>>,
    fingerprints: Mutex<HashMap<String, Fingerprint>>,
    in_flight: Mutex<HashMap<String, SharedRefresh>>,
    cleanup_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    refreshes: AtomicU64,
    evicted_by_cleanup: AtomicU64,
    evicted_by_lru: AtomicU64,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

impl OauthCache {
    pub fn new(client_id: String, client_secret: String) -> Self {
        Self::with_token_url(client_id, client_secret, GOOGLE_TOKEN_URL.to_string())
    }

    /// Test hook: points the refresh flow at a mock token endpoint.
    pub fn with_token_url(client_id: String, client_secret: String, token_url: String) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                http: reqwest::Client::new(),
                token_url,
                client_id,
                client_secret,
                entries: Mutex::new(HashMap::new()),
                fingerprints: Mutex::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
                cleanup_task: Mutex::new(None),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                refreshes: AtomicU64::new(0),
                evicted_by_cleanup: AtomicU64::new(0),
                evicted_by_lru: AtomicU64::new(0),
            }),
        }
    }

    /// Returns a valid access token for the refresh token, refreshing it
    /// through the Google token endpoint when the cached one is missing
    /// or expired. Concurrent refreshes for the same key are coalesced.
    pub async fn access_token(&self, refresh_token: &str) -> RefreshResult {
        let inner = &self.inner;
        let now = now_ms();
        {
            let mut entries = inner.entries.lock();
            if let Some(entry) = entries.get_mut(refresh_token) {
                if entry.expires_at_ms > now {
                    entry.last_accessed_at_ms = now;
                    inner.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(entry.access_token.clone());
                }
            }
        }

        inner.misses.fetch_add(1, Ordering::Relaxed);
        self.ensure_cleanup_task();

        let (refresh, leader) = {
            let mut in_flight = inner.in_flight.lock();
            if let Some(existing) = in_flight.get(refresh_token) {
                (existing.clone(), false)
            } else {
                let shared_inner = Arc::clone(inner);
                let key = refresh_token.to_string();
                let refresh: SharedRefresh = async move { shared_inner.refresh(&key).await }
                    .boxed()
                    .shared();
                in_flight.insert(refresh_token.to_string(), refresh.clone());
                (refresh, true)
            }
        };

        let result = refresh.await;

        if leader {
            inner.in_flight.lock().remove(refresh_token);
        }
        inner.evict_lru_if_needed();

        result
    }

    /// Returns the discovered Cloud Code project id for this credential,
    /// probing loadCodeAssist across the endpoint list on first use.
    pub async fn project_id(&self, refresh_token: &str) -> Result<Option<String>, TokenError> {
        let inner = &self.inner;
        if let Some(cached) = inner
            .entries
            .lock()
            .get(refresh_token)
            .and_then(|e| e.project_id.clone())
        {
            return Ok(Some(cached));
        }

        let access_token = self.access_token(refresh_token).await?;
        let body = serde_json::json!({
            "metadata": {
                "ideType": "IDE_UNSPECIFIED",
                "platform": "PLATFORM_UNSPECIFIED",
                "pluginType": "GEMINI"
            }
        });

        for endpoint in DISCOVERY_ENDPOINTS {
            let url = format!("{}/v1internal:loadCodeAssist", endpoint);
            let response = inner
                .http
                .post(&url)
                .bearer_auth(&access_token)
                .json(&body)
                .send()
                .await;

            let response = match response {
                Ok(r) if r.status().is_success() => r,
                Ok(r) => {
                    tracing::debug!("loadCodeAssist {} returned {}", endpoint, r.status());
                    continue;
                }
                Err(e) => {
                    tracing::debug!("loadCodeAssist {} failed: {}", endpoint, e);
                    continue;
                }
            };

            let payload: serde_json::Value = match response.json().await {
                Ok(v) => v,
                Err(_) => continue,
            };

            // cloudaicompanionProject is either a bare string or {id}.
            let project = payload
                .get("cloudaicompanionProject")
                .and_then(|p| {
                    p.as_str()
                        .map(|s| s.to_string())
                        .or_else(|| p.get("id").and_then(|v| v.as_str()).map(|s| s.to_string()))
                })
                .filter(|s| !s.is_empty());

            if let Some(project) = project {
                if let Some(entry) = inner.entries.lock().get_mut(refresh_token) {
                    entry.project_id = Some(project.clone());
                }
                tracing::info!("Discovered Cloud Code project {}", project);
                return Ok(Some(project));
            }
        }

        Ok(None)
    }

    /// Derives stable QuotaUser / DeviceId header values from the
    /// refresh token: 8-byte SHA-256 prefix, hex-encoded, device id
    /// right-padded with zeros to 32 chars.
    pub fn fingerprint_headers(&self, refresh_token: &str) -> Fingerprint {
        if let Some(cached) = self.inner.fingerprints.lock().get(refresh_token) {
            return cached.clone();
        }

        let mut hasher = Sha256::new();
        hasher.update(refresh_token.as_bytes());
        let digest = hasher.finalize();
        let prefix: String = digest[..8].iter().map(|b| format!("{:02x}", b)).collect();

        let fingerprint = Fingerprint {
            quota_user: prefix.clone(),
            device_id: format!("{:0<32}", prefix),
        };
        self.inner
            .fingerprints
            .lock()
            .insert(refresh_token.to_string(), fingerprint.clone());
        fingerprint
    }

    pub fn metrics(&self) -> CacheMetrics {
        let inner = &self.inner;
        CacheMetrics {
            hits: inner.hits.load(Ordering::Relaxed),
            misses: inner.misses.load(Ordering::Relaxed),
            refreshes: inner.refreshes.load(Ordering::Relaxed),
            evicted_by_cleanup: inner.evicted_by_cleanup.load(Ordering::Relaxed),
            evicted_by_lru: inner.evicted_by_lru.load(Ordering::Relaxed),
        }
    }

    /// Test hook: drops every cached credential and fingerprint.
    pub fn clear_cache(&self) {
        self.inner.entries.lock().clear();
        self.inner.fingerprints.lock().clear();
    }

    /// Test hook: stops the periodic cleanup task so the next miss can
    /// start a fresh one.
    pub fn reset_cleanup_timer(&self) {
        if let Some(task) = self.inner.cleanup_task.lock().take() {
            task.abort();
        }
    }

    fn ensure_cleanup_task(&self) {
        let mut guard = self.inner.cleanup_task.lock();
        if guard.is_some() {
            return;
        }
        let weak: Weak<CacheInner> = Arc::downgrade(&self.inner);
        *guard = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.sweep_expired();
            }
        }));
    }
}

impl CacheInner {
    async fn refresh(self: Arc<Self>, refresh_token: &str) -> RefreshResult {
        let params = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];

        let response = self
            .http
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| TokenError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                400 | 401 => {
                    tracing::warn!(
                        "Token endpoint rejected refresh token ({}), evicting cached credential",
                        status
                    );
                    self.evict(refresh_token);
                    TokenError::InvalidToken(body)
                }
                429 => TokenError::RateLimit(body),
                _ => TokenError::Network(format!("{}: {}", status, body)),
            });
        }

        let token: TokenEndpointResponse = response
            .json()
            .await
            .map_err(|e| TokenError::Network(e.to_string()))?;

        let now = now_ms();
        let expires_at_ms = now + (token.expires_in * 1000).saturating_sub(EXPIRY_SAFETY_MARGIN_MS);

        {
            let mut entries = self.entries.lock();
            let project_id = entries
                .get(refresh_token)
                .and_then(|e| e.project_id.clone());
            entries.insert(
                refresh_token.to_string(),
                CredentialEntry {
                    access_token: token.access_token.clone(),
                    expires_at_ms,
                    project_id,
                    last_accessed_at_ms: now,
                },
            );
        }

        self.refreshes.fetch_add(1, Ordering::Relaxed);
        tracing::info!("Refreshed access token (expires in {}s)", token.expires_in);
        Ok(token.access_token)
    }

    fn evict(&self, refresh_token: &str) {
        self.entries.lock().remove(refresh_token);
        self.fingerprints.lock().remove(refresh_token);
    }

    fn evict_lru_if_needed(&self) {
        let stale: Vec<String> = {
            let entries = self.entries.lock();
            if entries.len() <= MAX_CACHE_ENTRIES {
                return;
            }
            let overflow = entries.len() - MAX_CACHE_ENTRIES;
            let mut by_age: Vec<(&String, u64)> = entries
                .iter()
                .map(|(k, e)| (k, e.last_accessed_at_ms))
                .collect();
            by_age.sort_by_key(|(_, t)| *t);
            by_age
                .into_iter()
                .take(overflow)
                .map(|(k, _)| k.clone())
                .collect()
        };

        tracing::warn!(
            "Credential cache over capacity, evicting {} least-recently-used entries",
            stale.len()
        );
        for key in stale {
            self.evict(&key);
            self.evicted_by_lru.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn sweep_expired(&self) {
        let now = now_ms();
        let expired: Vec<String> = self
            .entries
            .lock()
            .iter()
            .filter(|(_, e)| e.expires_at_ms <= now)
            .map(|(k, _)| k.clone())
            .collect();

        if !expired.is_empty() {
            tracing::warn!(
                "Cleanup sweep evicting {} expired credential entries",
                expired.len()
            );
        }
        for key in expired {
            self.evict(&key);
            self.evicted_by_cleanup.fetch_add(1, Ordering::Relaxed);
        }
    }
}
