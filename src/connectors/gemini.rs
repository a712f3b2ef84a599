//! Connector for the hashed-workspace JSON chat directory.
//!
//! Sessions live under `~/.gemini/tmp/{hash}/chats/*.json`, where `{hash}`
//! is the SHA-256 of the workspace path. The hash is one-way, so the
//! workspace is recovered by hashing candidate directories (the current
//! working directory, then children of common code roots) and comparing.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::connectors::{
    Connector, DetectionResult, RawPayload, ScanContext, SessionDescriptor, StorageKey,
    file_modified_since, parse_timestamp, title_preview,
};
use crate::detect::ThreadFormat;

pub struct GeminiConnector;

impl Default for GeminiConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl GeminiConnector {
    pub fn new() -> Self {
        Self
    }

    /// Default storage root, `~/.gemini/tmp`.
    pub fn storage_root() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".gemini/tmp"))
    }

    fn hash_path(path: &Path) -> String {
        let mut hasher = Sha256::new();
        hasher.update(path.to_string_lossy().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Recover the workspace path behind a hash directory name by probing
    /// the cwd and the children of common code roots.
    fn resolve_workspace(project_hash: &str) -> Option<PathBuf> {
        if let Ok(cwd) = std::env::current_dir()
            && Self::hash_path(&cwd) == project_hash
        {
            return Some(cwd);
        }

        let home = dirs::home_dir()?;
        let candidates = ["code", "projects", "workspace", "dev", "Documents"];
        for base in candidates {
            let base = home.join(base);
            let Ok(entries) = fs::read_dir(&base) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() && Self::hash_path(&path) == project_hash {
                    return Some(path);
                }
            }
        }
        None
    }

    fn descriptor(
        path: &Path,
        workspace_name: Option<&str>,
        workspace_path: Option<&Path>,
    ) -> Result<Option<SessionDescriptor>> {
        let content =
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let val: Value = serde_json::from_str(&content)
            .with_context(|| format!("parse JSON from {}", path.display()))?;

        let Some(messages) = val.get("messages").and_then(Value::as_array) else {
            return Ok(None);
        };
        if messages.is_empty() {
            return Ok(None);
        }

        let created_at = val.get("startTime").and_then(parse_timestamp);
        let mut last_message_at = val
            .get("lastUpdated")
            .and_then(parse_timestamp)
            .or(created_at);
        let mut title_hint = None;

        for message in messages {
            if let Some(ts) = message.get("timestamp").and_then(parse_timestamp) {
                last_message_at = Some(last_message_at.map_or(ts, |l: i64| l.max(ts)));
            }
            if title_hint.is_none()
                && message.get("type").and_then(Value::as_str) == Some("user")
                && let Some(content) = message.get("content").and_then(Value::as_str)
                && !content.trim().is_empty()
            {
                title_hint = Some(title_preview(content, 60));
            }
        }

        let session_id = val
            .get("sessionId")
            .and_then(Value::as_str)
            .map(String::from)
            .unwrap_or_else(|| {
                path.file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or("unknown")
                    .to_string()
            });

        Ok(Some(SessionDescriptor {
            session_id,
            provider: ThreadFormat::Gemini,
            storage: StorageKey::File {
                path: path.to_path_buf(),
            },
            workspace_name: workspace_name.map(String::from),
            workspace_path: workspace_path.map(Path::to_path_buf),
            created_at,
            last_message_at,
            title_hint,
            message_count_hint: messages.len(),
            metadata: Value::Null,
        }))
    }
}

impl Connector for GeminiConnector {
    fn provider(&self) -> ThreadFormat {
        ThreadFormat::Gemini
    }

    fn detect(&self) -> DetectionResult {
        if let Some(root) = Self::storage_root()
            && root.exists()
        {
            return DetectionResult {
                detected: true,
                evidence: vec![format!("found {}", root.display())],
            };
        }
        DetectionResult::not_found()
    }

    fn list_sessions(&self, ctx: &ScanContext) -> Result<Vec<SessionDescriptor>> {
        let root = match &ctx.data_root {
            Some(root) => root.clone(),
            None => match Self::storage_root() {
                Some(root) => root,
                None => return Ok(Vec::new()),
            },
        };
        if !root.exists() {
            return Ok(Vec::new());
        }

        let mut descriptors = Vec::new();
        for project_entry in fs::read_dir(&root)?.flatten() {
            let project_dir = project_entry.path();
            if !project_dir.is_dir() {
                continue;
            }
            let project_hash = project_entry.file_name().to_string_lossy().to_string();
            let workspace_path = Self::resolve_workspace(&project_hash);
            let workspace_name = workspace_path
                .as_ref()
                .and_then(|p| p.file_name())
                .and_then(|n| n.to_str())
                .map(String::from);

            let chats_dir = project_dir.join("chats");
            let Ok(chat_entries) = fs::read_dir(&chats_dir) else {
                continue;
            };
            for chat_entry in chat_entries.flatten() {
                let path = chat_entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                // logs.json is tool telemetry, not a session.
                if path.file_name().and_then(|n| n.to_str()) == Some("logs.json") {
                    continue;
                }
                if !file_modified_since(&path, ctx.since_ts) {
                    continue;
                }

                match Self::descriptor(&path, workspace_name.as_deref(), workspace_path.as_deref())
                {
                    Ok(Some(descriptor)) => descriptors.push(descriptor),
                    Ok(None) => {
                        tracing::debug!(path = %path.display(), "session is empty, skipping");
                    }
                    Err(e) => {
                        tracing::debug!(path = %path.display(), error = %e, "session parse error");
                    }
                }
            }
        }

        Ok(descriptors)
    }

    fn load_raw(&self, descriptor: &SessionDescriptor) -> Result<RawPayload> {
        let StorageKey::File { path } = &descriptor.storage else {
            anyhow::bail!("unexpected storage key for a chat file");
        };
        let content =
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let value: Value = serde_json::from_str(&content)
            .with_context(|| format!("parse JSON from {}", path.display()))?;
        Ok(RawPayload::Document(value))
    }
}
