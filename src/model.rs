//! Canonical thread model shared by all provider normalizers.
//!
//! Every normalizer produces the same [`NormalizedThread`] regardless of how
//! the source tool encoded its log. The model is plain data: no behavior
//! beyond construction helpers, safe to serialize and hand to a renderer.

use serde::{Deserialize, Serialize};

/// A fully normalized conversation thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedThread {
    /// Session identifier as recorded by the source, if any.
    pub session_id: Option<String>,
    pub title: Option<String>,
    /// Creation time in epoch milliseconds, when the source records one.
    pub created_at: Option<i64>,
    /// Human identity on the requesting side (e.g. a username).
    pub requester: Option<String>,
    /// Identity of the responding agent.
    pub responder: Option<String>,
    pub messages: Vec<ThreadMessage>,
    /// Provider-specific leftovers a renderer may want (models used,
    /// workspace, git info). Never required for rendering the messages.
    pub metadata: serde_json::Value,
}

impl NormalizedThread {
    pub fn empty() -> Self {
        Self {
            session_id: None,
            title: None,
            created_at: None,
            requester: None,
            responder: None,
            messages: Vec::new(),
            metadata: serde_json::Value::Null,
        }
    }
}

/// One renderable message within a thread.
///
/// `id` is derived from the final sequence position (`m0`, `m1`, ...) rather
/// than source-provided ids, which are absent or reused in some providers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadMessage {
    pub id: String,
    pub kind: MessageKind,
}

impl ThreadMessage {
    /// Placeholder id, replaced by [`assign_ids`](crate::normalize::assign_ids)
    /// once the message sequence is final.
    pub fn unnumbered(kind: MessageKind) -> Self {
        Self {
            id: String::new(),
            kind,
        }
    }

    /// True for anything authored on the assistant side of the conversation.
    /// Used by turn grouping: consecutive assistant messages collapse into
    /// one visual turn.
    pub fn is_assistant_side(&self) -> bool {
        !matches!(
            self.kind,
            MessageKind::User { .. } | MessageKind::OrphanToolResult { .. }
        )
    }
}

/// Closed set of message kinds the renderer understands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageKind {
    User {
        text: String,
        attachments: Vec<Attachment>,
    },
    AssistantText {
        text: String,
        /// File badges referenced inline from `text` via `[[ref:N]]`
        /// placeholder markers, in marker order.
        inline_refs: Vec<InlineRef>,
    },
    Thinking {
        text: String,
        subject: Option<String>,
    },
    ToolCall(ToolInvocation),
    Edit(EditGroup),
    Plan(PlanUpdate),
    /// Point-in-time repository snapshot emitted by the terminal agent.
    RepoSnapshot(RepoSnapshot),
    /// Tool output that arrived with no preceding assistant turn to absorb
    /// it. Kept distinct from `User` so renderers never mistake it for a
    /// typed prompt.
    OrphanToolResult { outputs: Vec<String> },
}

/// A file/image/uri the user attached to a prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub kind: AttachmentKind,
    pub name: Option<String>,
    pub path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    File,
    Image,
    Uri,
}

/// An inline file reference within assistant prose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InlineRef {
    pub name: String,
    pub path: Option<String>,
}

/// A tool invocation with its correlated output.
///
/// `result` is set exactly once by the normalizer that built the thread,
/// using whatever correlation scheme the provider encodes (explicit call id,
/// positional round index, or inline embedding). Consumers must never
/// re-correlate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Provider-native tool identifier (`run_in_terminal`, `Bash`, ...).
    pub tool_id: String,
    pub status: ToolStatus,
    pub render: ToolRender,
    pub result: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Running,
    Completed,
    Failed,
    Unknown,
}

/// How a tool invocation should be painted.
///
/// Recognized tool names map to a fixed renderer; everything else falls
/// through to `Generic`, which shows the raw arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "render", rename_all = "snake_case")]
pub enum ToolRender {
    Shell {
        command: String,
        description: Option<String>,
    },
    ReadFile {
        path: String,
    },
    /// Raw patch text from a patch-apply tool.
    Patch {
        content: String,
    },
    Mcp {
        server: String,
        tool: String,
        input: Option<String>,
    },
    Generic {
        display_args: serde_json::Value,
        description: Option<String>,
    },
}

/// A group of edits applied to one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditGroup {
    pub file_path: String,
    pub edits: Vec<Edit>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edit {
    /// Line range in the target file. Absent for string-replacement style
    /// edits, which locate themselves by `old_text`.
    pub range: Option<LineRange>,
    pub old_text: Option<String>,
    pub new_text: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRange {
    pub start_line: i64,
    pub end_line: i64,
}

/// A todo/plan list update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanUpdate {
    pub items: Vec<PlanItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanItem {
    pub step: String,
    pub status: PlanStatus,
}

/// Canonical 3-state plan status. Provider-specific enums map onto this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Pending,
    InProgress,
    Completed,
}

impl PlanStatus {
    /// Map a provider status string onto the canonical 3-state enum.
    /// Unrecognized values are treated as pending.
    pub fn from_provider(raw: &str) -> Self {
        match raw {
            "in_progress" | "in-progress" => Self::InProgress,
            "completed" | "complete" | "done" => Self::Completed,
            _ => Self::Pending,
        }
    }
}

/// Commit-like repository snapshot marker.
///
/// `untracked_files` / `untracked_dirs` are already truncated to five
/// entries plus a trailing ellipsis marker when the source listed more.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoSnapshot {
    pub commit_id: String,
    pub parent_id: Option<String>,
    pub untracked_files: Vec<String>,
    pub untracked_dirs: Vec<String>,
}

/// One entry of a grouped thread: either a standalone message (user prompt,
/// orphan tool result) or a run of consecutive assistant-side messages
/// rendered as a single visual turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TurnEntry {
    Message(ThreadMessage),
    AssistantGroup(Vec<ThreadMessage>),
}
