// Upstream Cloud Code client
//
// Posts generate requests across the endpoint failover list, retries
// capacity exhaustion with bounded exponential backoff, and falls back
// from the antigravity wire style to gemini-cli for non-Claude models
// once every antigravity endpoint has failed.

use anyhow::{anyhow, Result};
use rand::Rng;
use serde_json::Value;
use std::time::Duration;

use crate::auth::Fingerprint;

use super::reasoning::{is_claude_model, resolve_model_for_header_style};

pub const ANTIGRAVITY_ENDPOINTS: [&str; 3] = [
    "https://daily-cloudcode-pa.sandbox.googleapis.com",
    "https://autopush-cloudcode-pa.sandbox.googleapis.com",
    "https://cloudcode-pa.googleapis.com",
];

const GEMINI_CLI_ENDPOINTS: [&str; 1] = ["https://cloudcode-pa.googleapis.com"];

const STREAM_PATH: &str = "/v1internal:streamGenerateContent?alt=sse";
const ANTHROPIC_BETA: &str = "interleaved-thinking-2025-05-14";

/// Per-endpoint capacity retries: attempts 0..=4.
const MAX_CAPACITY_ATTEMPTS: u32 = 5;
const BACKOFF_CAP_MS: u64 = 8000;
const BACKOFF_JITTER_MS: u64 = 500;

/// {User-Agent, X-Goog-Api-Client, Client-Metadata} triples, one picked
/// uniformly at random per outbound attempt.
const ANTIGRAVITY_HEADER_PROFILES: [(&str, &str, &str); 5] = [
    (
        "antigravity/1.104.0 darwin/arm64",
        "google-cloud-sdk vscode_cloudshelleditor/0.1",
        r#"{"ideType":"IDE_UNSPECIFIED","platform":"PLATFORM_UNSPECIFIED","pluginType":"GEMINI"}"#,
    ),
    (
        "antigravity/1.104.0 darwin/x64",
        "google-cloud-sdk vscode_cloudshelleditor/0.1",
        r#"{"ideType":"IDE_UNSPECIFIED","platform":"PLATFORM_UNSPECIFIED","pluginType":"GEMINI"}"#,
    ),
    (
        "antigravity/1.104.0 win32/x64",
        "google-cloud-sdk vscode_cloudshelleditor/0.1",
        r#"{"ideType":"IDE_UNSPECIFIED","platform":"PLATFORM_UNSPECIFIED","pluginType":"GEMINI"}"#,
    ),
    (
        "antigravity/1.104.0 linux/x64",
        "google-cloud-sdk vscode_cloudshelleditor/0.1",
        r#"{"ideType":"IDE_UNSPECIFIED","platform":"PLATFORM_UNSPECIFIED","pluginType":"GEMINI"}"#,
    ),
    (
        "antigravity/1.104.0 linux/arm64",
        "google-cloud-sdk vscode_cloudshelleditor/0.1",
        r#"{"ideType":"IDE_UNSPECIFIED","platform":"PLATFORM_UNSPECIFIED","pluginType":"GEMINI"}"#,
    ),
];

const GEMINI_CLI_HEADER_PROFILES: [(&str, &str, &str); 3] = [
    (
        "google-api-nodejs-client/9.15.1",
        "gl-node/22.17.0",
        "ideType=IDE_UNSPECIFIED,platform=PLATFORM_UNSPECIFIED,pluginType=GEMINI",
    ),
    (
        "google-api-nodejs-client/9.15.1",
        "gl-node/20.12.2",
        "ideType=IDE_UNSPECIFIED,platform=PLATFORM_UNSPECIFIED,pluginType=GEMINI",
    ),
    (
        "google-api-nodejs-client/9.14.0",
        "gl-node/22.17.0",
        "ideType=IDE_UNSPECIFIED,platform=PLATFORM_UNSPECIFIED,pluginType=GEMINI",
    ),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetryReason {
    ModelCapacityExhausted,
    ServerError,
    Other,
}

#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// "antigravity" or "gemini-cli".
    pub style: &'static str,
    /// Present when the caller has a per-credential fingerprint to send.
    pub fingerprint: Option<Fingerprint>,
}

#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
}

impl Default for UpstreamClient {
    fn default() -> Self {
        Self::new()
    }
}

impl UpstreamClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    /// Sends the generate request, traversing the endpoint list for the
    /// requested style and switching styles when permitted.
    pub async fn request(
        &self,
        payload: &Value,
        access_token: &str,
        options: &RequestOptions,
    ) -> Result<reqwest::Response> {
        let model = payload.get("model").and_then(|v| v.as_str()).unwrap_or("");
        let claude = is_claude_model(model);
        let mut style = options.style;
        let mut payload = payload.clone();

        loop {
            if style == "gemini-cli" {
                payload = rebuild_for_gemini_cli(&payload);
            }

            match self
                .try_endpoints(&payload, access_token, style, options)
                .await
            {
                Ok(response) => return Ok(response),
                Err(err) => {
                    if style == "antigravity" && !claude {
                        tracing::warn!(
                            "All antigravity endpoints failed ({}), retrying with gemini-cli style",
                            err
                        );
                        style = "gemini-cli";
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }

    async fn try_endpoints(
        &self,
        payload: &Value,
        access_token: &str,
        style: &str,
        options: &RequestOptions,
    ) -> Result<reqwest::Response> {
        let endpoints: &[&str] = if style == "gemini-cli" {
            &GEMINI_CLI_ENDPOINTS
        } else {
            &ANTIGRAVITY_ENDPOINTS
        };

        let mut last_error = anyhow!("no upstream endpoint available");

        'endpoints: for endpoint in endpoints {
            let url = format!("{}{}", endpoint, STREAM_PATH);

            for attempt in 0..MAX_CAPACITY_ATTEMPTS {
                let mut request = self
                    .http
                    .post(&url)
                    .header("Content-Type", "application/json")
                    .header("Accept", "text/event-stream")
                    .header("Authorization", format!("Bearer {}", access_token))
                    .header("anthropic-beta", ANTHROPIC_BETA)
                    .json(payload);

                let (user_agent, api_client, metadata) = pick_header_profile(style);
                request = request
                    .header("User-Agent", user_agent)
                    .header("X-Goog-Api-Client", api_client)
                    .header("Client-Metadata", metadata);

                if style == "antigravity" {
                    if let Some(fingerprint) = &options.fingerprint {
                        request = request
                            .header("X-Goog-QuotaUser", &fingerprint.quota_user)
                            .header("X-Client-Device-Id", &fingerprint.device_id);
                    }
                }

                let response = match request.send().await {
                    Ok(r) => r,
                    Err(e) => {
                        last_error = anyhow!("request to {} failed: {}", endpoint, e);
                        continue 'endpoints;
                    }
                };

                let status = response.status();
                if status.is_success() {
                    return Ok(response);
                }

                let body = response.text().await.unwrap_or_default();

                if status.as_u16() == 429 || status.as_u16() == 503 {
                    let reason = classify_retry_reason(&body);
                    if reason == RetryReason::ModelCapacityExhausted
                        && attempt < MAX_CAPACITY_ATTEMPTS - 1
                    {
                        let delay = backoff_delay(attempt);
                        tracing::info!(
                            "Capacity exhausted on {} (attempt {}), backing off {}ms",
                            endpoint,
                            attempt,
                            delay.as_millis()
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    last_error = anyhow!("upstream {} returned {}: {}", endpoint, status, body);
                    continue 'endpoints;
                }

                last_error = anyhow!("upstream {} returned {}: {}", endpoint, status, body);
                continue 'endpoints;
            }
        }

        Err(last_error)
    }
}

fn classify_retry_reason(body: &str) -> RetryReason {
    if body.contains("RESOURCE_EXHAUSTED") || body.contains("MODEL_CAPACITY_EXHAUSTED") {
        RetryReason::ModelCapacityExhausted
    } else if body.contains("INTERNAL") || body.contains("SERVER_ERROR") {
        RetryReason::ServerError
    } else {
        RetryReason::Other
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let base = (1000u64 << attempt).min(BACKOFF_CAP_MS);
    let jitter = rand::rng().random_range(0..BACKOFF_JITTER_MS);
    Duration::from_millis(base + jitter)
}

fn pick_header_profile(style: &str) -> (&'static str, &'static str, &'static str) {
    let mut rng = rand::rng();
    if style == "gemini-cli" {
        GEMINI_CLI_HEADER_PROFILES[rng.random_range(0..GEMINI_CLI_HEADER_PROFILES.len())]
    } else {
        ANTIGRAVITY_HEADER_PROFILES[rng.random_range(0..ANTIGRAVITY_HEADER_PROFILES.len())]
    }
}

/// The gemini-cli wire shape carries no agent envelope fields and uses
/// canonical `-preview` model identifiers.
fn rebuild_for_gemini_cli(payload: &Value) -> Value {
    let mut rebuilt = payload.clone();
    if let Some(obj) = rebuilt.as_object_mut() {
        obj.remove("requestType");
        obj.remove("userAgent");
        obj.remove("requestId");
        if let Some(model) = obj.get("model").and_then(|v| v.as_str()) {
            let resolved = resolve_model_for_header_style(model, "gemini-cli");
            obj.insert("model".to_string(), Value::String(resolved));
        }
    }
    rebuilt
}
