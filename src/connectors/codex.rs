//! Connector for the terminal agent's JSONL session directory.
//!
//! Sessions live under `~/.codex/sessions`, nested by date, one `.jsonl`
//! file per session. The first `session_meta` record carries the session
//! id, working directory and git info; user messages appear both as
//! `event_msg` records and as `response_item` message records depending on
//! the agent version, so counting checks both shapes.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::Value;
use walkdir::WalkDir;

use crate::connectors::{
    Connector, DetectionResult, RawPayload, ScanContext, SessionDescriptor, StorageKey,
    file_modified_since, parse_timestamp, title_preview,
};
use crate::detect::ThreadFormat;

/// Bootstrap content marker; such records never count as conversation.
const ENVIRONMENT_CONTEXT_MARKER: &str = "<environment_context>";

pub struct CodexConnector;

impl Default for CodexConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl CodexConnector {
    pub fn new() -> Self {
        Self
    }

    /// Default sessions root, `~/.codex/sessions`.
    pub fn sessions_root() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".codex/sessions"))
    }

    fn descriptor(path: &Path) -> Result<Option<SessionDescriptor>> {
        let content =
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;

        let mut session_id = None;
        let mut workspace_path = None;
        let mut git = None;
        let mut cli_version = None;
        let mut first_user_line = None;
        let mut count = 0usize;
        let mut earliest: Option<i64> = None;
        let mut latest: Option<i64> = None;

        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let Ok(record) = serde_json::from_str::<Value>(line) else {
                continue;
            };

            if record.get("type").and_then(Value::as_str) == Some("session_meta")
                && let Some(payload) = record.get("payload")
            {
                if session_id.is_none() {
                    session_id = payload.get("id").and_then(Value::as_str).map(String::from);
                }
                if workspace_path.is_none() {
                    workspace_path = payload
                        .get("cwd")
                        .and_then(Value::as_str)
                        .filter(|c| !c.is_empty())
                        .map(PathBuf::from);
                }
                if git.is_none() {
                    git = payload.get("git").cloned().filter(|g| !g.is_null());
                }
                if cli_version.is_none() {
                    cli_version = payload
                        .get("cli_version")
                        .and_then(Value::as_str)
                        .map(String::from);
                }
            }

            if let Some(ts) = record.get("timestamp").and_then(parse_timestamp) {
                earliest = Some(earliest.map_or(ts, |e: i64| e.min(ts)));
                latest = Some(latest.map_or(ts, |l: i64| l.max(ts)));
            }

            if let Some(text) = substantive_user_text(&record) {
                count += 1;
                if first_user_line.is_none() {
                    first_user_line = Some(title_preview(&text, 60));
                }
            }
        }

        if count == 0 {
            return Ok(None);
        }

        let session_id = session_id.unwrap_or_else(|| {
            path.file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("unknown")
                .to_string()
        });

        Ok(Some(SessionDescriptor {
            session_id,
            provider: ThreadFormat::Codex,
            storage: StorageKey::File {
                path: path.to_path_buf(),
            },
            workspace_name: workspace_path
                .as_ref()
                .and_then(|p| p.file_name())
                .and_then(|n| n.to_str())
                .map(String::from),
            workspace_path,
            created_at: earliest,
            last_message_at: latest.or(earliest),
            title_hint: first_user_line,
            message_count_hint: count,
            metadata: serde_json::json!({
                "git": git,
                "cliVersion": cli_version,
            }),
        }))
    }
}

/// Substantive user text across the record shapes the agent has used:
/// `event_msg`/`user_message`, `response_item` message records, and bare
/// role-tagged message records from early versions.
fn substantive_user_text(record: &Value) -> Option<String> {
    let record_type = record.get("type").and_then(Value::as_str)?;

    let raw = match record_type {
        "event_msg" => {
            let payload = record.get("payload")?;
            if payload.get("type").and_then(Value::as_str) != Some("user_message") {
                return None;
            }
            payload.get("message")?.as_str()?.to_string()
        }
        "response_item" => {
            let payload = record.get("payload")?;
            if payload.get("type").and_then(Value::as_str) != Some("message")
                || payload.get("role").and_then(Value::as_str) != Some("user")
            {
                return None;
            }
            payload
                .get("content")?
                .as_array()?
                .iter()
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n")
        }
        "message" => {
            if record.get("role").and_then(Value::as_str) != Some("user") {
                return None;
            }
            record.get("content")?.as_str()?.to_string()
        }
        _ => return None,
    };

    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.starts_with(ENVIRONMENT_CONTEXT_MARKER) {
        return None;
    }
    Some(trimmed.to_string())
}

impl Connector for CodexConnector {
    fn provider(&self) -> ThreadFormat {
        ThreadFormat::Codex
    }

    fn detect(&self) -> DetectionResult {
        if let Some(root) = Self::sessions_root()
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
            None => match Self::sessions_root() {
                Some(root) => root,
                None => return Ok(Vec::new()),
            },
        };
        if !root.exists() {
            return Ok(Vec::new());
        }

        let mut descriptors = Vec::new();
        for entry in WalkDir::new(&root).into_iter().flatten() {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("jsonl") {
                continue;
            }
            if !file_modified_since(path, ctx.since_ts) {
                continue;
            }

            match Self::descriptor(path) {
                Ok(Some(descriptor)) => descriptors.push(descriptor),
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "session parse error");
                }
            }
        }

        Ok(descriptors)
    }

    fn load_raw(&self, descriptor: &SessionDescriptor) -> Result<RawPayload> {
        let StorageKey::File { path } = &descriptor.storage else {
            anyhow::bail!("unexpected storage key for a JSONL session");
        };
        let content =
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        Ok(RawPayload::Lines(content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_session(root: &Path, rel: &str, lines: &[&str]) -> PathBuf {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, lines.join("\n")).unwrap();
        path
    }

    #[test]
    fn list_sessions_extracts_meta_and_counts() {
        let dir = TempDir::new().unwrap();
        write_session(
            dir.path(),
            "2025/11/02/rollout-1.jsonl",
            &[
                r#"{"type":"session_meta","timestamp":"2025-11-02T08:00:00Z","payload":{"id":"sess-1","cwd":"/home/dev/proj","cli_version":"0.9.1","git":{"branch":"main"}}}"#,
                r#"{"type":"response_item","timestamp":"2025-11-02T08:00:05Z","payload":{"type":"message","role":"user","content":[{"type":"input_text","text":"add logging to the server"}]}}"#,
                r#"{"type":"response_item","timestamp":"2025-11-02T08:01:00Z","payload":{"type":"message","role":"assistant","content":[{"type":"output_text","text":"Done."}]}}"#,
            ],
        );

        let connector = CodexConnector::new();
        let sessions = connector
            .list_sessions(&ScanContext::rooted(dir.path()))
            .unwrap();

        assert_eq!(sessions.len(), 1);
        let s = &sessions[0];
        assert_eq!(s.session_id, "sess-1");
        assert_eq!(s.provider, ThreadFormat::Codex);
        assert_eq!(s.workspace_name.as_deref(), Some("proj"));
        assert_eq!(s.message_count_hint, 1);
        assert_eq!(s.title_hint.as_deref(), Some("add logging to the server"));
        assert!(s.created_at.unwrap() < s.last_message_at.unwrap());
        assert_eq!(s.metadata["cliVersion"], "0.9.1");
        assert_eq!(s.metadata["git"]["branch"], "main");
    }

    #[test]
    fn environment_context_not_substantive() {
        let dir = TempDir::new().unwrap();
        write_session(
            dir.path(),
            "a.jsonl",
            &[
                r#"{"type":"session_meta","payload":{"id":"s","cwd":"/p"}}"#,
                r#"{"type":"event_msg","payload":{"type":"user_message","message":"<environment_context>os: linux"}}"#,
            ],
        );

        let connector = CodexConnector::new();
        let sessions = connector
            .list_sessions(&ScanContext::rooted(dir.path()))
            .unwrap();
        // Only bootstrap content: the session is empty and excluded.
        assert!(sessions.is_empty());
    }

    #[test]
    fn event_msg_user_message_counts() {
        let dir = TempDir::new().unwrap();
        write_session(
            dir.path(),
            "a.jsonl",
            &[
                r#"{"type":"event_msg","payload":{"type":"user_message","message":"first ask"}}"#,
                r#"{"type":"event_msg","payload":{"type":"user_message","message":"second ask"}}"#,
            ],
        );

        let connector = CodexConnector::new();
        let sessions = connector
            .list_sessions(&ScanContext::rooted(dir.path()))
            .unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].message_count_hint, 2);
        assert_eq!(sessions[0].title_hint.as_deref(), Some("first ask"));
        // No session_meta: id falls back to the file stem.
        assert_eq!(sessions[0].session_id, "a");
    }

    #[test]
    fn truncated_lines_tolerated() {
        let dir = TempDir::new().unwrap();
        write_session(
            dir.path(),
            "a.jsonl",
            &[
                r#"{"type":"event_msg","payload":{"type":"user_message","message":"ok"}}"#,
                r#"{"type":"event_msg","payload":{"ty"#,
            ],
        );

        let connector = CodexConnector::new();
        let sessions = connector
            .list_sessions(&ScanContext::rooted(dir.path()))
            .unwrap();
        assert_eq!(sessions.len(), 1);
    }

    #[test]
    fn load_raw_returns_lines() {
        let dir = TempDir::new().unwrap();
        write_session(
            dir.path(),
            "a.jsonl",
            &[r#"{"type":"event_msg","payload":{"type":"user_message","message":"hi"}}"#],
        );

        let connector = CodexConnector::new();
        let sessions = connector
            .list_sessions(&ScanContext::rooted(dir.path()))
            .unwrap();
        match connector.load_raw(&sessions[0]).unwrap() {
            RawPayload::Lines(text) => assert!(text.contains("user_message")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn non_jsonl_files_ignored() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("notes.txt"), "not a session").unwrap();

        let connector = CodexConnector::new();
        let sessions = connector
            .list_sessions(&ScanContext::rooted(dir.path()))
            .unwrap();
        assert!(sessions.is_empty());
    }
}
