//! Shape-based format detection for loose thread payloads.
//!
//! Rules are checked in order and the first match wins. Ordering matters:
//! several formats share a `messages` array at the root, so the formats with
//! a more specific distinguishing key must be tested first.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Provider formats this crate can normalize.
///
/// `detect` only ever returns `Copilot`, `Cursor` or `Claude`: a Codex
/// payload is a JSONL stream rather than a single document, and a Gemini
/// payload shares the bare `messages` root without `author`/`role`, so both
/// are tagged by the adapter that discovered them instead of by shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadFormat {
    /// Editor-extension tool-chat log (`requests[]` + session identifier).
    Copilot,
    /// Conversational-turn log with integer type codes, possibly wrapped in
    /// a legacy `conversations`/`items` container.
    Cursor,
    /// Role-tagged records whose assistant content is a block array.
    Claude,
    /// Terminal-agent JSONL stream.
    Codex,
    /// Tool-augmented session with thoughts and a typed tool-call list.
    Gemini,
}

impl ThreadFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Copilot => "copilot",
            Self::Cursor => "cursor",
            Self::Claude => "claude",
            Self::Codex => "codex",
            Self::Gemini => "gemini",
        }
    }
}

/// Classify a parsed payload by root shape. `None` means unrecognized; the
/// caller must surface that as a "format not supported" condition rather
/// than guessing.
pub fn detect(payload: &Value) -> Option<ThreadFormat> {
    let obj = payload.as_object()?;

    // Rule 1: a requests array plus a session/version identifier.
    if obj.get("requests").is_some_and(Value::is_array)
        && (obj.contains_key("sessionId") || obj.contains_key("version"))
    {
        return Some(ThreadFormat::Copilot);
    }

    // Rule 2: legacy tool-chat containers.
    if obj.contains_key("conversations") || obj.get("items").is_some_and(Value::is_array) {
        return Some(ThreadFormat::Cursor);
    }

    // Rule 3: a messages array whose first element is role-tagged.
    if let Some(messages) = obj.get("messages").and_then(Value::as_array)
        && let Some(first) = messages.first().and_then(Value::as_object)
        && (first.contains_key("author") || first.contains_key("role"))
    {
        return Some(ThreadFormat::Claude);
    }

    None
}
