//! Per-provider normalizers and the shared utilities they lean on.
//!
//! Normalization is synchronous and pure: the same raw payload always
//! produces the same [`NormalizedThread`]. All I/O lives in the connectors;
//! everything here takes already-loaded JSON/JSONL.

use serde_json::Value;

use crate::connectors::RawPayload;
use crate::detect::{self, ThreadFormat};
use crate::error::ThreadError;
use crate::model::{MessageKind, NormalizedThread, ThreadMessage, TurnEntry};

pub mod claude;
pub mod codex;
pub mod copilot;
pub mod cursor;
pub mod gemini;

/// Normalize a parsed document with a known provider format.
pub fn normalize_value(format: ThreadFormat, payload: &Value) -> Result<NormalizedThread, ThreadError> {
    match format {
        ThreadFormat::Copilot => copilot::normalize(payload),
        ThreadFormat::Cursor => cursor::normalize(payload),
        ThreadFormat::Claude => claude::normalize(payload),
        ThreadFormat::Gemini => gemini::normalize(payload),
        // A Codex payload is a record stream; accept a pre-parsed array of
        // records for callers that already split the lines themselves.
        ThreadFormat::Codex => match payload.as_array() {
            Some(records) => codex::normalize_records(records),
            None => Err(ThreadError::malformed(
                ThreadFormat::Codex,
                "expected a JSONL string or an array of records",
            )),
        },
    }
}

/// Normalize a raw payload as loaded by a connector.
pub fn normalize_raw(format: ThreadFormat, payload: &RawPayload) -> Result<NormalizedThread, ThreadError> {
    match payload {
        RawPayload::Document(value) => normalize_value(format, value),
        RawPayload::Lines(text) => match format {
            ThreadFormat::Codex => codex::normalize(text),
            other => Err(ThreadError::malformed(
                other,
                "line-delimited payload for a document format",
            )),
        },
    }
}

/// Detect the format of a loose document and normalize it.
pub fn normalize_auto(payload: &Value) -> Result<NormalizedThread, ThreadError> {
    match detect::detect(payload) {
        Some(format) => normalize_value(format, payload),
        None => Err(ThreadError::unrecognized(payload)),
    }
}

/// Collapse consecutive assistant-side messages into single visual turns.
///
/// A user message always starts a new top-level entry, and so does an
/// orphan tool result: one provider encodes tool outputs as user-role
/// records, and when such a record has no preceding assistant turn to be
/// absorbed into it must still be shown rather than silently dropped.
pub fn group_turns(messages: &[ThreadMessage]) -> Vec<TurnEntry> {
    let mut entries = Vec::new();
    let mut group: Vec<ThreadMessage> = Vec::new();

    for message in messages {
        if message.is_assistant_side() {
            group.push(message.clone());
        } else {
            if !group.is_empty() {
                entries.push(TurnEntry::AssistantGroup(std::mem::take(&mut group)));
            }
            entries.push(TurnEntry::Message(message.clone()));
        }
    }

    if !group.is_empty() {
        entries.push(TurnEntry::AssistantGroup(group));
    }

    entries
}

/// True if a record's message content is a tool-result block array.
pub(crate) fn is_tool_result_content(content: &Value) -> bool {
    content
        .as_array()
        .and_then(|arr| arr.first())
        .and_then(|first| first.get("type"))
        .and_then(Value::as_str)
        == Some("tool_result")
}

/// Forward-scan correlation for providers that deliver tool results as
/// later user-role records.
///
/// Starting at `start`, each subsequent user-role record whose content is a
/// tool-result array is searched for an entry matching `tool_use_id`. The
/// scan stops at the first user-role record that is *not* a tool result:
/// that closes the asynchronous pairing window. A call with no match in the
/// window gets no result, never someone else's.
pub(crate) fn find_tool_result(tool_use_id: &str, records: &[Value], start: usize) -> Option<String> {
    for record in &records[start.min(records.len())..] {
        let message = record.get("message").unwrap_or(record);
        if message.get("role").and_then(Value::as_str) != Some("user") {
            continue;
        }

        let Some(content) = message.get("content") else {
            continue;
        };

        if !is_tool_result_content(content) {
            break;
        }

        if let Some(entries) = content.as_array() {
            for entry in entries {
                if entry.get("tool_use_id").and_then(Value::as_str) == Some(tool_use_id) {
                    return entry
                        .get("content")
                        .map(flatten_result_content);
                }
            }
        }
    }
    None
}

/// Tool-result content is usually a plain string but some provider versions
/// nest `[{type:"text", text}]` arrays; flatten either to display text.
pub(crate) fn flatten_result_content(content: &Value) -> String {
    if let Some(s) = content.as_str() {
        return s.to_string();
    }
    if let Some(arr) = content.as_array() {
        return arr
            .iter()
            .filter_map(|item| {
                item.as_str()
                    .map(String::from)
                    .or_else(|| item.get("text").and_then(Value::as_str).map(String::from))
            })
            .collect::<Vec<_>>()
            .join("\n");
    }
    content.to_string()
}

/// Marker appended when a listing is cut at five entries.
pub const ELLIPSIS: &str = "…";

/// Truncate a listing to five entries plus an explicit ellipsis marker.
/// Never truncates silently: the marker is the renderer's cue that entries
/// were elided.
pub(crate) fn truncate_listing(entries: &[Value]) -> Vec<String> {
    let mut out: Vec<String> = entries
        .iter()
        .take(5)
        .filter_map(|v| v.as_str().map(String::from))
        .collect();
    if entries.len() > 5 {
        out.push(ELLIPSIS.to_string());
    }
    out
}

/// Parse a tool-arguments JSON string, recovering with an empty object on
/// failure. One bad argument string must not hide an otherwise-valid thread.
pub(crate) fn parse_args_json(raw: Option<&str>) -> Value {
    let Some(raw) = raw else {
        return Value::Object(serde_json::Map::new());
    };
    match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => {
            tracing::debug!(error = %e, "unparseable tool arguments, rendering empty");
            Value::Object(serde_json::Map::new())
        }
    }
}

/// Assign position-derived ids (`m0`, `m1`, ...) once a message sequence is
/// final. Source-provided ids are not used: several providers omit or reuse
/// theirs.
pub(crate) fn assign_ids(messages: &mut [ThreadMessage]) {
    for (i, message) in messages.iter_mut().enumerate() {
        message.id = format!("m{i}");
    }
}

/// Push an accumulated text block as one assistant message, if non-empty.
pub(crate) fn flush_assistant_text(
    messages: &mut Vec<ThreadMessage>,
    text: &mut String,
    inline_refs: &mut Vec<crate::model::InlineRef>,
) {
    if text.trim().is_empty() {
        text.clear();
        inline_refs.clear();
        return;
    }
    messages.push(ThreadMessage::unnumbered(MessageKind::AssistantText {
        text: std::mem::take(text),
        inline_refs: std::mem::take(inline_refs),
    }));
}
