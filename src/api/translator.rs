// OpenAI -> Gemini message and tool translation
//
// Translates an OpenAI Chat Completions message list into Gemini
// `contents` plus a detached system instruction, keeping tool-call
// chains bindable: every function call carries a non-empty id, and tool
// responses are matched back by id or by the oldest pending call for
// the same function name.

use std::collections::{HashMap, VecDeque};

use rand::RngCore;
use serde_json::{json, Value};

use super::reasoning::is_claude_model;
use super::schema_cleaner;

/// Upstream accepts this sentinel in place of a real thought signature
/// under its permissive validator. The proxy is stateless and cannot
/// round-trip real signatures.
pub const SKIP_THOUGHT_SIGNATURE: &str = "skip_thought_signature_validator";

#[derive(Debug, Default)]
pub struct GeminiPrompt {
    pub system_instruction: Option<String>,
    pub contents: Vec<Value>,
}

pub fn generate_call_id() -> String {
    let mut bytes = [0u8; 12];
    rand::rng().fill_bytes(&mut bytes);
    let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
    format!("call_{}", hex)
}

pub fn openai_to_gemini(messages: &[Value]) -> GeminiPrompt {
    let mut prompt = GeminiPrompt::default();
    // Pending tool-call ids per function name, consumed FIFO by tool
    // responses that arrive without a tool_call_id.
    let mut pending_ids: HashMap<String, VecDeque<String>> = HashMap::new();

    for message in messages {
        let role = message.get("role").and_then(|v| v.as_str()).unwrap_or("user");

        match role {
            "system" => {
                if let Some(text) = content_as_text(message.get("content")) {
                    prompt.system_instruction = Some(text);
                }
            }
            "assistant" if has_tool_calls(message) => {
                let mut parts: Vec<Value> = Vec::new();
                if let Some(text) = message.get("content").and_then(|v| v.as_str()) {
                    if !text.is_empty() {
                        parts.push(json!({ "text": text }));
                    }
                }
                if let Some(tool_calls) = message.get("tool_calls").and_then(|v| v.as_array()) {
                    for call in tool_calls {
                        let id = call
                            .get("id")
                            .and_then(|v| v.as_str())
                            .filter(|s| !s.is_empty())
                            .map(|s| s.to_string())
                            .unwrap_or_else(generate_call_id);
                        let name = call
                            .get("function")
                            .and_then(|f| f.get("name"))
                            .and_then(|v| v.as_str())
                            .unwrap_or("")
                            .to_string();
                        let args = parse_call_arguments(call);

                        pending_ids
                            .entry(name.clone())
                            .or_default()
                            .push_back(id.clone());

                        parts.push(json!({
                            "functionCall": {
                                "id": id,
                                "name": name,
                                "args": args
                            },
                            "thoughtSignature": SKIP_THOUGHT_SIGNATURE
                        }));
                    }
                }
                if !parts.is_empty() {
                    prompt.contents.push(json!({ "role": "model", "parts": parts }));
                }
            }
            "tool" => {
                let name = message
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                let id = message
                    .get("tool_call_id")
                    .and_then(|v| v.as_str())
                    .filter(|s| !s.is_empty())
                    .map(|s| s.to_string())
                    .or_else(|| pending_ids.get_mut(&name).and_then(|q| q.pop_front()))
                    .unwrap_or_else(|| "unknown".to_string());
                let result = content_as_text(message.get("content")).unwrap_or_default();

                prompt.contents.push(json!({
                    "role": "user",
                    "parts": [{
                        "functionResponse": {
                            "id": id,
                            "name": name,
                            "response": { "result": result }
                        }
                    }]
                }));
            }
            _ => {
                let gemini_role = if role == "assistant" { "model" } else { "user" };
                let parts = content_to_parts(message.get("content"));
                if !parts.is_empty() {
                    prompt
                        .contents
                        .push(json!({ "role": gemini_role, "parts": parts }));
                }
            }
        }
    }

    prompt
}

/// Wraps all tool declarations in a single functionDeclarations group.
/// Parameters go through the strict cleaner for Claude-family models and
/// the light cleaner otherwise.
pub fn openai_tools_to_gemini(tools: &[Value], model: &str) -> Value {
    let strict = is_claude_model(model);
    let mut declarations: Vec<Value> = Vec::new();

    for tool in tools {
        let function = tool.get("function").unwrap_or(tool);
        let name = function.get("name").and_then(|v| v.as_str()).unwrap_or("");
        if name.is_empty() {
            continue;
        }
        let mut declaration = json!({ "name": name });
        if let Some(description) = function.get("description").and_then(|v| v.as_str()) {
            declaration["description"] = json!(description);
        }
        if let Some(parameters) = function.get("parameters") {
            let cleaned = if strict {
                schema_cleaner::clean_strict(parameters)
            } else {
                schema_cleaner::clean_light(parameters)
            };
            declaration["parameters"] = cleaned;
        }
        declarations.push(declaration);
    }

    json!([{ "functionDeclarations": declarations }])
}

fn has_tool_calls(message: &Value) -> bool {
    message
        .get("tool_calls")
        .and_then(|v| v.as_array())
        .map(|a| !a.is_empty())
        .unwrap_or(false)
}

fn parse_call_arguments(call: &Value) -> Value {
    let arguments = call.get("function").and_then(|f| f.get("arguments"));
    match arguments {
        Some(Value::String(s)) => serde_json::from_str(s).unwrap_or_else(|_| json!({})),
        Some(Value::Object(obj)) => Value::Object(obj.clone()),
        _ => json!({}),
    }
}

/// Extracts plain text from string-or-parts content.
fn content_as_text(content: Option<&Value>) -> Option<String> {
    match content? {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => {
            let texts: Vec<&str> = items
                .iter()
                .filter_map(|item| item.get("text").and_then(|v| v.as_str()))
                .collect();
            Some(texts.join(""))
        }
        _ => None,
    }
}

fn content_to_parts(content: Option<&Value>) -> Vec<Value> {
    let mut parts = Vec::new();
    match content {
        Some(Value::String(s)) => {
            if !s.is_empty() {
                parts.push(json!({ "text": s }));
            }
        }
        Some(Value::Array(items)) => {
            for item in items {
                match item.get("type").and_then(|v| v.as_str()) {
                    Some("text") => {
                        if let Some(text) = item.get("text").and_then(|v| v.as_str()) {
                            parts.push(json!({ "text": text }));
                        }
                    }
                    Some("image_url") => {
                        let url = item
                            .get("image_url")
                            .and_then(|u| u.get("url"))
                            .and_then(|v| v.as_str())
                            .unwrap_or("");
                        if let Some((mime_type, data)) = parse_image_data_uri(url) {
                            parts.push(json!({
                                "inlineData": {
                                    "mimeType": mime_type,
                                    "data": data
                                }
                            }));
                        }
                    }
                    _ => {}
                }
            }
        }
        _ => {}
    }
    parts
}

/// Matches `data:image/<subtype>;base64,<payload>`. Non-data URLs are
/// skipped by the caller.
fn parse_image_data_uri(url: &str) -> Option<(String, String)> {
    let rest = url.strip_prefix("data:")?;
    let (mime_type, data) = rest.split_once(";base64,")?;
    if !mime_type.starts_with("image/") || data.is_empty() {
        return None;
    }
    Some((mime_type.to_string(), data.to_string()))
}
