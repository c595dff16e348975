// Gemini SSE -> OpenAI chunk transformation
//
// The upstream stream has cumulative-parts semantics: every frame
// repeats all previously seen parts of the candidate plus any new ones.
// A naive pass-through would duplicate tool calls, so function-call
// parts are deduplicated by their array position, which is stable for a
// given candidate. Text parts are not deduplicated; upstream does not
// resend text at the same position with identical content in practice.

use std::collections::HashSet;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde_json::{json, Value};

use super::translator::generate_call_id;

#[derive(Debug, Clone, Copy)]
pub struct StreamOptions {
    /// Forward thought-tagged text parts instead of dropping them.
    pub keep_thinking: bool,
}

/// Per-response transformer state.
struct StreamContext {
    tool_call_index: u64,
    emitted_function_calls: HashSet<usize>,
}

/// Accumulated result of a non-streaming request.
#[derive(Debug, Default)]
pub struct CollectedCompletion {
    pub content: String,
    pub tool_calls: Vec<Value>,
}

impl CollectedCompletion {
    pub fn is_empty(&self) -> bool {
        self.content.is_empty() && self.tool_calls.is_empty()
    }
}

/// Converts an upstream SSE byte stream into bare OpenAI chunk objects.
/// The caller wraps them into `data: ...` frames (or accumulates them)
/// and appends the `[DONE]` sentinel itself.
pub fn openai_chunks<S, E>(upstream: S, options: StreamOptions) -> impl Stream<Item = Value>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::fmt::Display,
{
    async_stream::stream! {
        let mut context = StreamContext {
            tool_call_index: 0,
            emitted_function_calls: HashSet::new(),
        };
        let mut buffer = String::new();
        let mut raw_tail = String::new();
        let mut saw_sse_data = false;

        futures::pin_mut!(upstream);

        while let Some(chunk) = upstream.next().await {
            let bytes = match chunk {
                Ok(b) => b,
                Err(e) => {
                    yield json!({
                        "choices": [{
                            "index": 0,
                            "delta": { "content": format!("\n\nStream error: {}", e) },
                            "finish_reason": "stop"
                        }]
                    });
                    return;
                }
            };
            buffer.push_str(&String::from_utf8_lossy(&bytes));

            while let Some(pos) = buffer.find('\n') {
                let line = buffer[..pos].trim_end_matches('\r').to_string();
                buffer = buffer[pos + 1..].to_string();

                if line.is_empty() {
                    continue;
                }
                if let Some(data) = line.strip_prefix("data:") {
                    let data = data.trim();
                    if data.is_empty() || data == "[DONE]" {
                        continue;
                    }
                    saw_sse_data = true;
                    if let Ok(parsed) = serde_json::from_str::<Value>(data) {
                        for out in process_frame(&parsed, &mut context, options) {
                            yield out;
                        }
                    }
                } else {
                    raw_tail.push_str(&line);
                    raw_tail.push('\n');
                }
            }
        }

        // Permissive non-SSE endpoints answer with a bare JSON object or
        // array; try the leftover bytes as raw JSON when no SSE frame
        // ever arrived.
        raw_tail.push_str(&buffer);
        let remainder = raw_tail.trim();
        if !saw_sse_data && !remainder.is_empty() {
            if let Ok(parsed) = serde_json::from_str::<Value>(remainder) {
                match parsed {
                    Value::Array(frames) => {
                        for frame in frames {
                            for out in process_frame(&frame, &mut context, options) {
                                yield out;
                            }
                        }
                    }
                    frame => {
                        for out in process_frame(&frame, &mut context, options) {
                            yield out;
                        }
                    }
                }
            }
        }

        yield json!({
            "choices": [{
                "index": 0,
                "delta": {},
                "finish_reason": "stop"
            }]
        });
    }
}

/// Consumes the transformed chunk stream into a single completion.
/// Tool calls are deduplicated by id + name; text deltas concatenate.
pub async fn collect_completion<S>(chunks: S) -> CollectedCompletion
where
    S: Stream<Item = Value>,
{
    let mut collected = CollectedCompletion::default();
    futures::pin_mut!(chunks);

    while let Some(chunk) = chunks.next().await {
        let delta = &chunk["choices"][0]["delta"];
        if let Some(text) = delta.get("content").and_then(|v| v.as_str()) {
            collected.content.push_str(text);
        }
        if let Some(calls) = delta.get("tool_calls").and_then(|v| v.as_array()) {
            for call in calls {
                let id = call.get("id").and_then(|v| v.as_str()).unwrap_or("");
                let name = call
                    .get("function")
                    .and_then(|f| f.get("name"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("");
                let duplicate = collected.tool_calls.iter().any(|existing| {
                    existing.get("id").and_then(|v| v.as_str()) == Some(id)
                        && existing
                            .get("function")
                            .and_then(|f| f.get("name"))
                            .and_then(|v| v.as_str())
                            == Some(name)
                });
                if !duplicate {
                    collected.tool_calls.push(call.clone());
                }
            }
        }
    }

    collected
}

fn process_frame(frame: &Value, context: &mut StreamContext, options: StreamOptions) -> Vec<Value> {
    let mut out = Vec::new();

    // Frames arrive both wrapped in a `response` envelope and bare.
    let parts = frame
        .pointer("/response/candidates/0/content/parts")
        .or_else(|| frame.pointer("/candidates/0/content/parts"))
        .and_then(|v| v.as_array());

    let Some(parts) = parts else {
        return out;
    };

    for (position, part) in parts.iter().enumerate() {
        if let Some(text) = part.get("text").and_then(|v| v.as_str()) {
            let is_thought = part.get("thought").and_then(|v| v.as_bool()).unwrap_or(false);
            if is_thought && !options.keep_thinking {
                continue;
            }
            out.push(json!({
                "choices": [{
                    "index": 0,
                    "delta": { "content": text },
                    "finish_reason": null
                }]
            }));
            continue;
        }

        if let Some(function_call) = part.get("functionCall") {
            if context.emitted_function_calls.contains(&position) {
                continue;
            }
            let name = function_call
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or("");
            let mut args = function_call.get("args").cloned().unwrap_or_else(|| json!({}));
            if let Some(obj) = args.as_object_mut() {
                obj.remove("__thinking_text");
            }
            let arguments = serde_json::to_string(&args).unwrap_or_else(|_| "{}".to_string());

            out.push(json!({
                "choices": [{
                    "index": 0,
                    "delta": {
                        "tool_calls": [{
                            "index": context.tool_call_index,
                            "id": generate_call_id(),
                            "type": "function",
                            "function": { "name": name, "arguments": arguments }
                        }]
                    },
                    "finish_reason": null
                }]
            }));
            context.emitted_function_calls.insert(position);
            context.tool_call_index += 1;
        }
    }

    out
}
