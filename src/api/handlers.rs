// API request handlers

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Json, Response};
use futures::StreamExt;
use rand::distr::Alphanumeric;
use rand::Rng;
use serde::Serialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use uuid::Uuid;

use super::reasoning::{self, ReasoningEffort};
use super::streaming::{self, StreamOptions};
use super::translator::{self, GeminiPrompt};
use super::upstream::RequestOptions;
use super::AppState;
use crate::config;

const DEFAULT_MODEL: &str = "gemini-3-flash";

pub async fn root() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "antigravity-openai-proxy"
    }))
}

pub async fn metrics(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "oauth": {
            "cache": state.cache.metrics(),
            "uptime": state.started_at.elapsed().as_secs()
        }
    }))
}

#[derive(Debug, Serialize)]
pub struct ModelInfo {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub owned_by: String,
}

#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub object: String,
    pub data: Vec<ModelInfo>,
}

pub async fn models() -> Json<ModelsResponse> {
    Json(ModelsResponse {
        object: "list".to_string(),
        data: model_catalog(),
    })
}

/// Static catalog of models served through the Antigravity surface.
fn model_catalog() -> Vec<ModelInfo> {
    let entry = |id: &str, created: i64| ModelInfo {
        id: id.to_string(),
        object: "model".to_string(),
        created,
        owned_by: "antigravity".to_string(),
    };
    vec![
        entry("gemini-3-pro-high", 1737158400),
        entry("gemini-3-pro-low", 1737158400),
        entry("gemini-3-flash", 1765929600),
        entry("gemini-2.5-flash", 1750118400),
        entry("gemini-2.5-flash-lite", 1753142400),
        entry("claude-sonnet-4-5", 1759104000),
        entry("claude-sonnet-4-5-thinking", 1759104000),
        entry("claude-opus-4-5-thinking", 1761955200),
    ]
}

pub async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let Some(refresh_token) = bearer_token(&headers) else {
        return error_response(StatusCode::UNAUTHORIZED, "Missing Authorization header");
    };

    let raw: Value = match serde_json::from_str(&body) {
        Ok(v) => v,
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, format!("Invalid JSON body: {}", e))
        }
    };

    let messages = match raw.get("messages").and_then(|v| v.as_array()) {
        Some(list) if !list.is_empty() => list.clone(),
        _ => return error_response(StatusCode::BAD_REQUEST, "messages is required"),
    };

    let model = raw
        .get("model")
        .and_then(|v| v.as_str())
        .filter(|m| !m.is_empty())
        .unwrap_or(DEFAULT_MODEL)
        .to_string();
    let stream = raw.get("stream").and_then(|v| v.as_bool()).unwrap_or(true);
    let effort = ReasoningEffort::parse(raw.get("reasoning_effort").and_then(|v| v.as_str()));
    let config = config::get_config();
    let claude = reasoning::is_claude_model(&model);

    let prompt = translator::openai_to_gemini(&messages);
    let tools = raw
        .get("tools")
        .and_then(|v| v.as_array())
        .filter(|list| !list.is_empty())
        .map(|list| translator::openai_tools_to_gemini(list, &model));

    let generation_config = build_generation_config(&raw, &model, effort, config.thinking_budget);

    let access_token = match state.cache.access_token(&refresh_token).await {
        Ok(token) => token,
        Err(e) => {
            tracing::error!("Token refresh failed: {}", e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
    };

    let project = match &config.project_id {
        Some(project) => project.clone(),
        None => state
            .cache
            .project_id(&refresh_token)
            .await
            .ok()
            .flatten()
            .unwrap_or_else(generate_project_id),
    };

    let payload = compose_payload(&model, effort, &project, prompt, tools, generation_config);

    let options = RequestOptions {
        style: if claude { "antigravity" } else { "gemini-cli" },
        fingerprint: Some(state.cache.fingerprint_headers(&refresh_token)),
    };

    let response = match state.upstream.request(&payload, &access_token, &options).await {
        Ok(r) => r,
        Err(e) => {
            tracing::error!("Upstream request failed: {}", e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
    };

    let stream_options = StreamOptions {
        keep_thinking: config.keep_thinking,
    };
    let chunks = streaming::openai_chunks(response.bytes_stream(), stream_options);

    let id = completion_id();
    let created = chrono::Utc::now().timestamp();

    if stream {
        let sse = async_stream::stream! {
            futures::pin_mut!(chunks);
            while let Some(mut chunk) = chunks.next().await {
                chunk["id"] = json!(id);
                chunk["object"] = json!("chat.completion.chunk");
                chunk["created"] = json!(created);
                chunk["model"] = json!(model);
                yield Ok::<Event, Infallible>(Event::default().data(chunk.to_string()));
            }
            yield Ok(Event::default().data("[DONE]"));
        };
        return Sse::new(sse).into_response();
    }

    let collected = streaming::collect_completion(chunks).await;
    if collected.is_empty() {
        return error_response(StatusCode::BAD_GATEWAY, "Empty response from upstream");
    }

    let finish_reason = if collected.tool_calls.is_empty() {
        "stop"
    } else {
        "tool_calls"
    };
    let content = if collected.content.is_empty() {
        Value::Null
    } else {
        json!(collected.content)
    };
    let mut message = json!({ "role": "assistant", "content": content });
    if !collected.tool_calls.is_empty() {
        message["tool_calls"] = json!(collected.tool_calls);
    }

    Json(json!({
        "id": id,
        "object": "chat.completion",
        "created": created,
        "model": model,
        "choices": [{
            "index": 0,
            "message": message,
            "finish_reason": finish_reason
        }],
        "usage": {
            "prompt_tokens": 0,
            "completion_tokens": 0,
            "total_tokens": 0
        }
    }))
    .into_response()
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({ "error": { "message": message.into() } })),
    )
        .into_response()
}

fn completion_id() -> String {
    let suffix: String = rand::rng()
        .sample_iter(Alphanumeric)
        .take(29)
        .map(char::from)
        .collect();
    format!("chatcmpl-{}", suffix)
}

/// Fallback project id when discovery yields nothing; the upstream only
/// requires the field to be present and plausibly shaped.
fn generate_project_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("proxy-{}", &suffix[..12])
}

fn build_generation_config(
    raw: &Value,
    model: &str,
    effort: Option<ReasoningEffort>,
    default_budget: u32,
) -> Value {
    let mut config = json!({});

    if let Some(max_tokens) = raw.get("max_tokens").and_then(|v| v.as_u64()) {
        config["maxOutputTokens"] = json!(max_tokens);
    }
    if let Some(temperature) = raw.get("temperature").and_then(|v| v.as_f64()) {
        config["temperature"] = json!(temperature);
    }
    if let Some(top_p) = raw.get("top_p").and_then(|v| v.as_f64()) {
        config["topP"] = json!(top_p);
    }
    match raw.get("stop") {
        Some(Value::String(s)) => {
            config["stopSequences"] = json!([s]);
        }
        Some(Value::Array(list)) if !list.is_empty() => {
            config["stopSequences"] = json!(list);
        }
        _ => {}
    }

    reasoning::apply_thinking_config(&mut config, model, effort, default_budget);
    config
}

fn compose_payload(
    model: &str,
    effort: Option<ReasoningEffort>,
    project: &str,
    prompt: GeminiPrompt,
    tools: Option<Value>,
    generation_config: Value,
) -> Value {
    let claude = reasoning::is_claude_model(model);

    let mut request = json!({
        "contents": prompt.contents,
        "sessionId": format!("session-{}", Uuid::new_v4())
    });

    if let Some(tools) = tools {
        request["tools"] = tools;
        if claude {
            request["toolConfig"] = json!({
                "functionCallingConfig": { "mode": "VALIDATED" }
            });
        }
    }

    if generation_config
        .as_object()
        .map(|o| !o.is_empty())
        .unwrap_or(false)
    {
        request["generationConfig"] = generation_config;
    }

    if let Some(system) = prompt.system_instruction {
        request["systemInstruction"] = json!({
            "role": "user",
            "parts": [{ "text": system }]
        });
    }

    json!({
        "project": project,
        "model": reasoning::normalize_model_for_antigravity(model, effort),
        "userAgent": "antigravity",
        "requestId": format!("agent-{}", Uuid::new_v4()),
        "requestType": "agent",
        "request": request
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompt_with_user_text(text: &str) -> GeminiPrompt {
        GeminiPrompt {
            system_instruction: None,
            contents: vec![json!({ "role": "user", "parts": [{ "text": text }] })],
        }
    }

    #[test]
    fn test_completion_id_shape() {
        let id = completion_id();
        assert!(id.starts_with("chatcmpl-"));
        assert_eq!(id.len(), "chatcmpl-".len() + 29);
    }

    #[test]
    fn test_generate_project_id_shape() {
        let id = generate_project_id();
        assert!(id.starts_with("proxy-"));
        assert_eq!(id.len(), "proxy-".len() + 12);
        assert!(id["proxy-".len()..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_build_generation_config_maps_openai_fields() {
        let raw = json!({
            "max_tokens": 2048,
            "temperature": 0.4,
            "top_p": 0.9,
            "stop": "END"
        });
        let config = build_generation_config(&raw, "gemini-2.5-flash", None, 16000);
        assert_eq!(config["maxOutputTokens"], 2048);
        assert_eq!(config["temperature"], 0.4);
        assert_eq!(config["topP"], 0.9);
        assert_eq!(config["stopSequences"], json!(["END"]));
        assert!(config.get("thinkingConfig").is_none());
    }

    #[test]
    fn test_build_generation_config_stop_list() {
        let raw = json!({ "stop": ["a", "b"] });
        let config = build_generation_config(&raw, "gemini-2.5-flash", None, 16000);
        assert_eq!(config["stopSequences"], json!(["a", "b"]));
    }

    #[test]
    fn test_build_generation_config_injects_thinking() {
        let raw = json!({});
        let config = build_generation_config(
            &raw,
            "gemini-3-flash",
            Some(ReasoningEffort::High),
            16000,
        );
        assert_eq!(config["thinkingConfig"]["thinkingLevel"], "high");
    }

    #[test]
    fn test_compose_payload_envelope() {
        let payload = compose_payload(
            "gemini-3-pro",
            Some(ReasoningEffort::High),
            "my-project",
            prompt_with_user_text("hi"),
            None,
            json!({}),
        );
        assert_eq!(payload["project"], "my-project");
        assert_eq!(payload["model"], "gemini-3-pro-high");
        assert_eq!(payload["userAgent"], "antigravity");
        assert_eq!(payload["requestType"], "agent");
        assert!(payload["requestId"].as_str().unwrap().starts_with("agent-"));
        assert!(payload["request"]["sessionId"]
            .as_str()
            .unwrap()
            .starts_with("session-"));
        assert!(payload["request"].get("generationConfig").is_none());
        assert!(payload["request"].get("toolConfig").is_none());
    }

    #[test]
    fn test_compose_payload_validated_mode_for_claude_with_tools() {
        let tools = json!([{ "functionDeclarations": [{ "name": "t" }] }]);
        let payload = compose_payload(
            "claude-sonnet-4-5",
            None,
            "p",
            prompt_with_user_text("hi"),
            Some(tools),
            json!({}),
        );
        assert_eq!(
            payload["request"]["toolConfig"]["functionCallingConfig"]["mode"],
            "VALIDATED"
        );
    }

    #[test]
    fn test_compose_payload_no_validated_mode_without_tools() {
        let payload = compose_payload(
            "claude-sonnet-4-5",
            None,
            "p",
            prompt_with_user_text("hi"),
            None,
            json!({}),
        );
        assert!(payload["request"].get("toolConfig").is_none());
    }

    #[test]
    fn test_compose_payload_no_validated_mode_for_gemini_with_tools() {
        let tools = json!([{ "functionDeclarations": [{ "name": "t" }] }]);
        let payload = compose_payload(
            "gemini-3-flash",
            None,
            "p",
            prompt_with_user_text("hi"),
            Some(tools),
            json!({}),
        );
        assert!(payload["request"].get("tools").is_some());
        assert!(payload["request"].get("toolConfig").is_none());
    }

    #[test]
    fn test_compose_payload_wraps_system_instruction() {
        let prompt = GeminiPrompt {
            system_instruction: Some("be brief".to_string()),
            contents: vec![json!({ "role": "user", "parts": [{ "text": "hi" }] })],
        };
        let payload = compose_payload("gemini-3-flash", None, "p", prompt, None, json!({}));
        let system = &payload["request"]["systemInstruction"];
        assert_eq!(system["role"], "user");
        assert_eq!(system["parts"][0]["text"], "be brief");
    }

    #[test]
    fn test_bearer_token_extraction() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer refresh-123".parse().unwrap());
        assert_eq!(bearer_token(&headers).as_deref(), Some("refresh-123"));

        let empty = HeaderMap::new();
        assert!(bearer_token(&empty).is_none());

        let mut bad = HeaderMap::new();
        bad.insert("authorization", "Basic abc".parse().unwrap());
        assert!(bearer_token(&bad).is_none());
    }

    #[test]
    fn test_model_catalog_shape() {
        let catalog = model_catalog();
        assert!(!catalog.is_empty());
        assert!(catalog.iter().any(|m| m.id == "gemini-3-flash"));
        assert!(catalog.iter().any(|m| m.id.starts_with("claude-")));
        assert!(catalog.iter().all(|m| m.object == "model"));
    }
}
