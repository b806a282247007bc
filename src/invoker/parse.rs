//! Normalization of assistant CLI output.
//!
//! The CLI emits JSON in several shapes (object, array of events, fenced in
//! markdown, or buried in log noise) and with two key casings (`session_id`
//! and `sessionid`). Everything funnels through `parse_payload` +
//! `response_from_payload` so the rest of the crate only sees
//! `InvokeResponse`.

use std::collections::HashMap;

use serde_json::Value;

use crate::client::InvokeResponse;
use crate::types::ModelTokens;

pub const MAX_TURNS_MESSAGE: &str =
    "Hit the maximum number of turns before finishing. Try a smaller request.";
pub const UNPARSEABLE_MESSAGE: &str = "Could not parse the assistant response.";

/// First value under any of `keys`, checked in order.
fn pick<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| value.get(k))
}

fn pick_str(value: &Value, keys: &[&str]) -> Option<String> {
    pick(value, keys).and_then(Value::as_str).map(String::from)
}

fn pick_f64(value: &Value, keys: &[&str]) -> Option<f64> {
    pick(value, keys).and_then(Value::as_f64)
}

fn pick_u64(value: &Value, keys: &[&str]) -> Option<u64> {
    pick(value, keys).and_then(Value::as_u64)
}

/// Parse captured stdout into a JSON payload, trying four strategies in
/// order: whole text, fenced block, brace-matched object with a `"type"`
/// key, then the largest terminal object.
pub fn parse_payload(stdout: &str) -> Option<Value> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if value.is_object() || value.is_array() {
            return Some(value);
        }
    }

    if let Some(inner) = strip_markdown_fence(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(inner.trim()) {
            if value.is_object() || value.is_array() {
                return Some(value);
            }
        }
    }

    if let Some(value) = typed_object(trimmed) {
        return Some(value);
    }

    terminal_object(trimmed)
}

/// Strip a single surrounding markdown fence (```json ... ```).
fn strip_markdown_fence(text: &str) -> Option<String> {
    let rest = text.strip_prefix("```")?;
    // Drop the info string (e.g. "json") on the opening fence line.
    let body_start = rest.find('\n')?;
    let body = &rest[body_start + 1..];
    let end = body.rfind("```")?;
    Some(body[..end].to_string())
}

/// Scan for the outermost brace-matched object that contains a `"type"` key.
fn typed_object(text: &str) -> Option<Value> {
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' {
            if let Some(end) = match_braces(text, i) {
                let candidate = &text[i..=end];
                if candidate.contains("\"type\"") {
                    if let Ok(value) = serde_json::from_str::<Value>(candidate) {
                        return Some(value);
                    }
                }
                // Skip past this object either way; inner objects would not
                // be outermost.
                i = end + 1;
                continue;
            }
        }
        i += 1;
    }
    None
}

/// Find the index of the `}` matching the `{` at `start`, string-aware.
fn match_braces(text: &str, start: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}

/// Walk backward from the last `}` to find the largest terminal object.
fn terminal_object(text: &str) -> Option<Value> {
    let bytes = text.as_bytes();
    let end = text.rfind('}')?;
    let mut depth = 1usize;
    let mut start = None;
    for i in (0..end).rev() {
        match bytes[i] {
            b'}' => depth += 1,
            b'{' => {
                depth -= 1;
                if depth == 0 {
                    start = Some(i);
                    break;
                }
            }
            _ => {}
        }
    }
    serde_json::from_str::<Value>(&text[start?..=end]).ok()
}

/// Collect every `"text"` string field, in order, from a JSON fragment.
fn collect_text(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Array(items) => {
            for item in items {
                collect_text(item, out);
            }
        }
        Value::Object(map) => {
            if let Some(Value::String(text)) = map.get("text") {
                out.push(text.clone());
            }
            for (key, child) in map {
                if key != "text" && (child.is_array() || child.is_object()) {
                    collect_text(child, out);
                }
            }
        }
        _ => {}
    }
}

/// Normalize a parsed payload into an `InvokeResponse`.
pub fn response_from_payload(payload: &Value) -> InvokeResponse {
    if let Value::Array(items) = payload {
        if let Some(result) = items
            .iter()
            .find(|item| item.get("type").and_then(Value::as_str) == Some("result"))
        {
            return response_from_payload(result);
        }
        let mut texts = Vec::new();
        collect_text(payload, &mut texts);
        return InvokeResponse {
            text: texts.join("\n"),
            ..Default::default()
        };
    }

    let is_error = pick(payload, &["is_error", "iserror"])
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let mut response = InvokeResponse {
        is_error,
        session_id: pick_str(payload, &["session_id", "sessionid"]),
        cost_usd: pick_f64(payload, &["total_cost_usd", "totalcostusd", "cost_usd"]),
        duration_ms: pick_u64(payload, &["duration_ms", "durationms"]),
        duration_api_ms: pick_u64(payload, &["duration_api_ms", "durationapims"]),
        num_turns: pick_u64(payload, &["num_turns", "numturns"]),
        stop_reason: pick_str(payload, &["stop_reason", "stopreason"]),
        model_usage: parse_model_usage(payload),
        needs_restart: pick(payload, &["needsRestart", "needs_restart", "needsrestart"])
            .and_then(Value::as_bool),
        ..Default::default()
    };

    if let Some(subtype) = pick_str(payload, &["subtype"]) {
        if subtype == "error_max_turns" {
            response.text = MAX_TURNS_MESSAGE.to_string();
            response.is_error = true;
            return response;
        }
        if subtype.starts_with("error") {
            let detail = extract_text(payload).unwrap_or_else(|| subtype.clone());
            response.text = format!("The assistant reported an error: {detail}");
            response.is_error = true;
            return response;
        }
    }

    match extract_text(payload) {
        Some(text) => response.text = text,
        None => response.text = UNPARSEABLE_MESSAGE.to_string(),
    }
    response
}

/// Pull the result text out of a payload: `result` first, then `content`.
fn extract_text(payload: &Value) -> Option<String> {
    if let Some(result) = payload.get("result") {
        return Some(match result {
            Value::String(s) => s.clone(),
            other => {
                let mut texts = Vec::new();
                collect_text(other, &mut texts);
                if texts.is_empty() {
                    other.to_string()
                } else {
                    texts.join("\n")
                }
            }
        });
    }
    if let Some(content) = payload.get("content") {
        return Some(match content {
            Value::String(s) => s.clone(),
            other => {
                let mut texts = Vec::new();
                collect_text(other, &mut texts);
                texts.join("\n")
            }
        });
    }
    None
}

fn parse_model_usage(payload: &Value) -> HashMap<String, ModelTokens> {
    pick(payload, &["modelUsage", "model_usage"])
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default()
}

/// Error messages that mean the resume handle is dead and the call should be
/// retried once without it.
pub fn is_session_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    ["session", "resume", "not found", "invalid"]
        .iter()
        .any(|needle| lower.contains(needle))
}

/// Rate-limit classification for stderr from a non-zero exit.
pub fn is_rate_limited(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("rate limit") || lower.contains("429")
}

#[cfg(test)]
mod tests;
