//! Shared-snippet store interface.
//!
//! Threads can be shared through a remote snippet service (a gist-like
//! store): one snippet holds several named files, and the thread payload is
//! the file whose name carries the thread prefix. Transport, caching and
//! auth live outside this crate; the interface here is what the core needs
//! to turn a fetched snippet into a normalized thread, keeping "not found"
//! and "corrupt payload" as distinct failure kinds.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::detect::ThreadFormat;
use crate::error::ThreadError;
use crate::model::NormalizedThread;
use crate::normalize;

/// Filename prefix marking the thread payload file within a snippet.
pub const THREAD_FILE_PREFIX: &str = "thread-";

/// Embedded share metadata key. Written by the share tooling so the viewer
/// can route a payload without shape detection.
pub const SHARE_META_KEY: &str = "__share";

/// One remote snippet: description, owner identity, and its files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedSnippet {
    pub id: String,
    pub description: Option<String>,
    pub owner: Option<String>,
    pub created_at: Option<String>,
    pub files: Vec<SharedFile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedFile {
    pub name: String,
    pub content: String,
}

/// Retrieval of shared snippets by opaque identifier.
pub trait SnippetStore {
    fn fetch(&self, id: &str) -> Result<SharedSnippet, ThreadError>;
}

/// The thread payload file within a snippet, by filename prefix.
pub fn thread_file(snippet: &SharedSnippet) -> Option<&SharedFile> {
    snippet
        .files
        .iter()
        .find(|f| f.name.starts_with(THREAD_FILE_PREFIX))
}

/// Fetch a snippet and normalize its thread payload.
pub fn load_shared_thread(
    store: &dyn SnippetStore,
    id: &str,
) -> Result<NormalizedThread, ThreadError> {
    let snippet = store.fetch(id)?;
    let Some(file) = thread_file(&snippet) else {
        return Err(ThreadError::NotFound { id: id.to_string() });
    };
    normalize_shared_file(file)
}

/// Normalize one shared thread file.
///
/// The embedded share tag routes directly to a provider when present;
/// otherwise the payload goes through shape detection. Unparseable content
/// is a corrupt payload, not a missing one.
pub fn normalize_shared_file(file: &SharedFile) -> Result<NormalizedThread, ThreadError> {
    let value: Value = serde_json::from_str(&file.content).map_err(|_| {
        ThreadError::UnrecognizedFormat {
            raw: Some(preview(&file.content)),
        }
    })?;

    let tagged = value
        .get(SHARE_META_KEY)
        .and_then(|m| m.get("ide"))
        .and_then(Value::as_str)
        .and_then(tag_format);

    match tagged {
        Some(ThreadFormat::Codex) => {
            // Shared terminal-agent payloads wrap the record stream in a
            // messages array.
            let Some(records) = value.get("messages").and_then(Value::as_array) else {
                return Err(ThreadError::malformed(
                    ThreadFormat::Codex,
                    "missing messages array",
                )
                .with_source(file.name.clone()));
            };
            normalize::codex::normalize_records(records)
                .map_err(|e| e.with_source(file.name.clone()))
        }
        Some(format) => normalize::normalize_value(format, &value)
            .map_err(|e| e.with_source(file.name.clone())),
        None => normalize::normalize_auto(&value).map_err(|e| e.with_source(file.name.clone())),
    }
}

fn tag_format(tag: &str) -> Option<ThreadFormat> {
    match tag {
        "vscode" | "copilot" => Some(ThreadFormat::Copilot),
        "cursor" => Some(ThreadFormat::Cursor),
        "claude" => Some(ThreadFormat::Claude),
        "codex" => Some(ThreadFormat::Codex),
        "gemini" => Some(ThreadFormat::Gemini),
        _ => None,
    }
}

fn preview(content: &str) -> String {
    let mut s: String = content.chars().take(256).collect();
    if content.len() > s.len() {
        s.push('…');
    }
    s
}

/// In-memory store used by tests and local tooling.
#[derive(Debug, Default)]
pub struct MemorySnippetStore {
    snippets: HashMap<String, SharedSnippet>,
}

impl MemorySnippetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, snippet: SharedSnippet) {
        self.snippets.insert(snippet.id.clone(), snippet);
    }
}

impl SnippetStore for MemorySnippetStore {
    fn fetch(&self, id: &str) -> Result<SharedSnippet, ThreadError> {
        self.snippets
            .get(id)
            .cloned()
            .ok_or_else(|| ThreadError::NotFound { id: id.to_string() })
    }
}
