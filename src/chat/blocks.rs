//! Extraction of action and memory blocks from assistant chat replies.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::types::{Urgency, WorkRequest};

/// Shown when stripping the blocks leaves nothing to say.
pub const PLACEHOLDER_TEXT: &str = "Working on it...";

fn action_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<RUMPBOT_ACTION>(.*?)</RUMPBOT_ACTION>").unwrap())
}

fn memory_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<TIFFBOT_MEMORY>(.*?)</TIFFBOT_MEMORY>").unwrap())
}

/// A chat reply with its embedded blocks pulled out.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedReply {
    /// Reply text with all delimiters stripped; never empty.
    pub chat_text: String,
    pub work_request: Option<WorkRequest>,
    pub memory_note: Option<String>,
}

/// Parse a raw assistant reply. Malformed blocks are logged and ignored;
/// the chat text always comes back.
pub fn parse_reply(raw: &str) -> ParsedReply {
    let work_request = action_re()
        .captures(raw)
        .and_then(|caps| parse_action(caps.get(1).map_or("", |m| m.as_str())));

    let memory_note = memory_re().captures(raw).and_then(|caps| {
        let text = caps.get(1).map_or("", |m| m.as_str()).trim();
        (!text.is_empty()).then(|| text.to_string())
    });

    let stripped = action_re().replace_all(raw, "");
    let stripped = memory_re().replace_all(&stripped, "");
    let text = stripped.trim();

    ParsedReply {
        chat_text: if text.is_empty() {
            PLACEHOLDER_TEXT.to_string()
        } else {
            text.to_string()
        },
        work_request,
        memory_note,
    }
}

/// Validate an action payload. Unknown fields are ignored; a missing
/// `type` or empty `task` makes the block invalid.
fn parse_action(json: &str) -> Option<WorkRequest> {
    let value: Value = match serde_json::from_str(json.trim()) {
        Ok(value) => value,
        Err(e) => {
            debug!(error = %e, "ignoring malformed action block");
            return None;
        }
    };

    if value.get("type").and_then(Value::as_str) != Some("work_request") {
        return None;
    }
    let task = value.get("task").and_then(Value::as_str)?.trim().to_string();
    if task.is_empty() {
        return None;
    }

    let context = value
        .get("context")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let urgency = match value.get("urgency").and_then(Value::as_str) {
        Some("quick") => Urgency::Quick,
        _ => Urgency::Normal,
    };

    Some(WorkRequest {
        task,
        context,
        urgency,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_reply_passes_through() {
        let parsed = parse_reply("hello there");
        assert_eq!(parsed.chat_text, "hello there");
        assert!(parsed.work_request.is_none());
        assert!(parsed.memory_note.is_none());
    }

    #[test]
    fn test_action_block_round_trip() {
        let raw = concat!(
            "On it!\n",
            r#"<RUMPBOT_ACTION>{"type":"work_request","task":"fix the build","context":"CI is red","urgency":"quick"}</RUMPBOT_ACTION>"#,
        );
        let parsed = parse_reply(raw);
        let request = parsed.work_request.unwrap();
        assert_eq!(request.task, "fix the build");
        assert_eq!(request.context, "CI is red");
        assert_eq!(request.urgency, Urgency::Quick);
        assert_eq!(parsed.chat_text, "On it!");
        assert!(!parsed.chat_text.contains("RUMPBOT_ACTION"));
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let raw = r#"ok <RUMPBOT_ACTION>{"type":"work_request","task":"t","extra":1}</RUMPBOT_ACTION>"#;
        let parsed = parse_reply(raw);
        let request = parsed.work_request.unwrap();
        assert_eq!(request.task, "t");
        assert_eq!(request.urgency, Urgency::Normal);
    }

    #[test]
    fn test_missing_type_invalidates_block() {
        let raw = r#"ok <RUMPBOT_ACTION>{"task":"t"}</RUMPBOT_ACTION>"#;
        assert!(parse_reply(raw).work_request.is_none());
    }

    #[test]
    fn test_empty_task_invalidates_block() {
        let raw = r#"ok <RUMPBOT_ACTION>{"type":"work_request","task":"  "}</RUMPBOT_ACTION>"#;
        assert!(parse_reply(raw).work_request.is_none());
    }

    #[test]
    fn test_malformed_json_is_ignored_but_text_returns() {
        let raw = "still here <RUMPBOT_ACTION>{not json</RUMPBOT_ACTION>";
        let parsed = parse_reply(raw);
        assert!(parsed.work_request.is_none());
        assert_eq!(parsed.chat_text, "still here");
    }

    #[test]
    fn test_memory_block_trimmed() {
        let raw = "noted <TIFFBOT_MEMORY>  likes tabs over spaces  </TIFFBOT_MEMORY>";
        let parsed = parse_reply(raw);
        assert_eq!(parsed.memory_note.as_deref(), Some("likes tabs over spaces"));
        assert_eq!(parsed.chat_text, "noted");
    }

    #[test]
    fn test_empty_memory_block_is_none() {
        let raw = "noted <TIFFBOT_MEMORY>   </TIFFBOT_MEMORY>";
        assert!(parse_reply(raw).memory_note.is_none());
    }

    #[test]
    fn test_blocks_only_reply_gets_placeholder() {
        let raw = r#"<RUMPBOT_ACTION>{"type":"work_request","task":"t","context":"","urgency":"normal"}</RUMPBOT_ACTION>"#;
        let parsed = parse_reply(raw);
        assert_eq!(parsed.chat_text, PLACEHOLDER_TEXT);
        assert!(parsed.work_request.is_some());
    }

    #[test]
    fn test_both_blocks_together() {
        let raw = concat!(
            "done\n",
            r#"<RUMPBOT_ACTION>{"type":"work_request","task":"deploy"}</RUMPBOT_ACTION>"#,
            "\n<TIFFBOT_MEMORY>prod deploys need approval</TIFFBOT_MEMORY>",
        );
        let parsed = parse_reply(raw);
        assert!(parsed.work_request.is_some());
        assert_eq!(
            parsed.memory_note.as_deref(),
            Some("prod deploys need approval")
        );
        assert_eq!(parsed.chat_text, "done");
    }
}
