//! Connector for VS Code Copilot Chat session files.
//!
//! Sessions are JSON files under the VS Code user directory:
//! - macOS: ~/Library/Application Support/Code/User
//! - Linux: ~/.config/Code/User
//! - Windows: %APPDATA%/Code/User
//!
//! Two locations inside it:
//! - `globalStorage/emptyWindowChatSessions/{uuid}.json` for sessions opened
//!   outside a workspace
//! - `workspaceStorage/{id}/chatSessions/{uuid}.json` for workspace
//!   sessions, with the workspace path recoverable from the sibling
//!   `workspace.json`

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::Value;
use walkdir::WalkDir;

use crate::connectors::{
    Connector, DetectionResult, RawPayload, ScanContext, SessionDescriptor, StorageKey,
    file_modified_since, title_preview,
};
use crate::detect::ThreadFormat;

pub struct CopilotConnector;

impl Default for CopilotConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl CopilotConnector {
    pub fn new() -> Self {
        Self
    }

    /// Get the base VS Code application support directory
    pub fn app_support_dir() -> Option<PathBuf> {
        #[cfg(target_os = "macos")]
        {
            dirs::home_dir().map(|h| h.join("Library/Application Support/Code/User"))
        }
        #[cfg(target_os = "linux")]
        {
            dirs::home_dir().map(|h| h.join(".config/Code/User"))
        }
        #[cfg(target_os = "windows")]
        {
            dirs::data_dir().map(|d| d.join("Code/User"))
        }
        #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
        {
            None
        }
    }

    /// Find all chat session JSON files, paired with their workspace path
    /// when one can be recovered.
    fn find_session_files(base: &Path) -> Vec<(PathBuf, Option<PathBuf>)> {
        let mut sessions = Vec::new();

        // globalStorage/emptyWindowChatSessions for non-workspace sessions
        let global_sessions = base.join("globalStorage/emptyWindowChatSessions");
        if global_sessions.exists() {
            for entry in WalkDir::new(&global_sessions)
                .max_depth(1)
                .into_iter()
                .flatten()
            {
                let path = entry.path();
                if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
                    sessions.push((path.to_path_buf(), None));
                }
            }
        }

        // workspaceStorage for workspace-specific sessions
        let workspace_storage = base.join("workspaceStorage");
        if workspace_storage.exists() {
            for entry in WalkDir::new(&workspace_storage)
                .max_depth(3)
                .into_iter()
                .flatten()
            {
                let path = entry.path();
                if path.is_file()
                    && path.extension().is_some_and(|ext| ext == "json")
                    && path
                        .parent()
                        .and_then(|p| p.file_name())
                        .is_some_and(|n| n == "chatSessions")
                {
                    let workspace_dir = path.parent().and_then(|p| p.parent());
                    let workspace_path =
                        workspace_dir.and_then(|dir| read_workspace_folder(&dir.join("workspace.json")));
                    sessions.push((path.to_path_buf(), workspace_path));
                }
            }
        }

        sessions
    }

    fn descriptor(
        session_path: &Path,
        workspace: Option<PathBuf>,
    ) -> Result<Option<SessionDescriptor>> {
        let content = fs::read_to_string(session_path)
            .with_context(|| format!("read {}", session_path.display()))?;
        let val: Value = serde_json::from_str(&content)
            .with_context(|| format!("parse JSON from {}", session_path.display()))?;

        let Some(requests) = val.get("requests").and_then(Value::as_array) else {
            return Ok(None);
        };

        // Substantive count: requests carrying a real user prompt. A file
        // full of empty requests is as empty as no file at all.
        let count = requests
            .iter()
            .filter(|r| {
                r.get("message")
                    .and_then(|m| m.get("text"))
                    .and_then(Value::as_str)
                    .is_some_and(|t| !t.trim().is_empty())
            })
            .count();
        if count == 0 {
            return Ok(None);
        }

        let session_id = val
            .get("sessionId")
            .and_then(Value::as_str)
            .map(String::from)
            .unwrap_or_else(|| {
                session_path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or("unknown")
                    .to_string()
            });

        let title_hint = val
            .get("customTitle")
            .and_then(Value::as_str)
            .map(String::from)
            .or_else(|| {
                requests.iter().find_map(|r| {
                    r.get("message")
                        .and_then(|m| m.get("text"))
                        .and_then(Value::as_str)
                        .filter(|t| !t.trim().is_empty())
                        .map(|t| title_preview(t, 100))
                })
            });

        let created_at = val.get("creationDate").and_then(Value::as_i64);
        let last_message_at = val
            .get("lastMessageDate")
            .and_then(Value::as_i64)
            .or(created_at);

        Ok(Some(SessionDescriptor {
            session_id,
            provider: ThreadFormat::Copilot,
            storage: StorageKey::File {
                path: session_path.to_path_buf(),
            },
            workspace_name: workspace
                .as_ref()
                .and_then(|p| p.file_name())
                .and_then(|n| n.to_str())
                .map(String::from),
            workspace_path: workspace,
            created_at,
            last_message_at,
            title_hint,
            message_count_hint: count,
            metadata: serde_json::json!({
                "version": val.get("version"),
                "requester": val.get("requesterUsername"),
                "responder": val.get("responderUsername"),
            }),
        }))
    }
}

/// Resolve the workspace folder recorded in a `workspace.json`, handling
/// the file:// URI format and percent-encoding.
fn read_workspace_folder(workspace_json: &Path) -> Option<PathBuf> {
    if !workspace_json.exists() {
        return None;
    }
    let content = fs::read_to_string(workspace_json).ok()?;
    let json: Value = serde_json::from_str(&content).ok()?;
    let folder = json.get("folder")?.as_str()?;
    let decoded = urlencoding::decode(folder).unwrap_or_default();
    let path_str = decoded.strip_prefix("file://").unwrap_or(&decoded);
    Some(PathBuf::from(path_str))
}

impl Connector for CopilotConnector {
    fn provider(&self) -> ThreadFormat {
        ThreadFormat::Copilot
    }

    fn detect(&self) -> DetectionResult {
        if let Some(base) = Self::app_support_dir() {
            let global_sessions = base.join("globalStorage/emptyWindowChatSessions");
            let has_global = global_sessions.exists()
                && fs::read_dir(&global_sessions)
                    .map(|d| d.count() > 0)
                    .unwrap_or(false);

            let workspace_storage = base.join("workspaceStorage");
            let has_workspace = workspace_storage.exists()
                && WalkDir::new(&workspace_storage)
                    .max_depth(3)
                    .into_iter()
                    .flatten()
                    .any(|e| e.path().is_dir() && e.file_name().to_str() == Some("chatSessions"));

            if has_global || has_workspace {
                return DetectionResult {
                    detected: true,
                    evidence: vec![format!("found VS Code chat storage at {}", base.display())],
                };
            }
        }
        DetectionResult::not_found()
    }

    fn list_sessions(&self, ctx: &ScanContext) -> Result<Vec<SessionDescriptor>> {
        let base = match &ctx.data_root {
            Some(root) => root.clone(),
            None => match Self::app_support_dir() {
                Some(base) => base,
                None => return Ok(Vec::new()),
            },
        };

        if !base.exists() {
            return Ok(Vec::new());
        }

        let mut descriptors = Vec::new();
        for (session_path, workspace) in Self::find_session_files(&base) {
            if !file_modified_since(&session_path, ctx.since_ts) {
                continue;
            }

            match Self::descriptor(&session_path, workspace) {
                Ok(Some(descriptor)) => descriptors.push(descriptor),
                Ok(None) => {
                    tracing::debug!(
                        path = %session_path.display(),
                        "session has no substantive messages, skipping"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        path = %session_path.display(),
                        error = %e,
                        "failed to read chat session"
                    );
                }
            }
        }

        Ok(descriptors)
    }

    fn load_raw(&self, descriptor: &SessionDescriptor) -> Result<RawPayload> {
        let StorageKey::File { path } = &descriptor.storage else {
            anyhow::bail!("unexpected storage key for a chat session file");
        };
        let content =
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let value: Value = serde_json::from_str(&content)
            .with_context(|| format!("parse JSON from {}", path.display()))?;
        Ok(RawPayload::Document(value))
    }
}
