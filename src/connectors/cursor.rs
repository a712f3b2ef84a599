//! Connector for the Cursor IDE composer/chat store.
//!
//! Two storage generations coexist:
//!
//! 1. **Composer sessions** (current): per-workspace `state.vscdb` SQLite
//!    stores hold composer metadata under the `ItemTable` key
//!    `composer.composerData`; the actual message "bubbles" live in the
//!    global store's `cursorDiskKV` table keyed
//!    `bubbleId:{composerId}:{bubbleId}`, one JSON value per bubble, with
//!    the role encoded as an integer type (1 = user, 2 = assistant).
//! 2. **Chat sessions** (legacy): plain JSON files under
//!    `workspaceStorage/{id}/chatSessions/`, in the editor-extension
//!    `requests` shape.
//!
//! `load_raw` reassembles composer bubbles into the positional-array
//! document the conversational-turn normalizer consumes.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rusqlite::Connection;
use serde_json::Value;
use walkdir::WalkDir;

use crate::connectors::{
    Connector, DetectionResult, RawPayload, ScanContext, SessionDescriptor, StorageKey,
    file_modified_since,
};
use crate::detect::ThreadFormat;

mod bubble_type {
    pub const USER: i64 = 1;
    pub const ASSISTANT: i64 = 2;
}

pub struct CursorConnector;

impl Default for CursorConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl CursorConnector {
    pub fn new() -> Self {
        Self
    }

    /// Get the base Cursor application support directory
    pub fn app_support_dir() -> Option<PathBuf> {
        #[cfg(target_os = "macos")]
        {
            dirs::home_dir().map(|h| h.join("Library/Application Support/Cursor/User"))
        }
        #[cfg(target_os = "linux")]
        {
            dirs::home_dir().map(|h| h.join(".config/Cursor/User"))
        }
        #[cfg(target_os = "windows")]
        {
            dirs::data_dir().map(|d| d.join("Cursor/User"))
        }
        #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
        {
            None
        }
    }

    fn global_db_path(base: &Path) -> PathBuf {
        base.join("globalStorage/state.vscdb")
    }

    fn open_read_only(path: &Path) -> Result<Connection> {
        Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("open store {}", path.display()))
    }

    /// Composer metadata entries from a workspace store.
    fn read_composer_metadata(db_path: &Path) -> Result<Vec<Value>> {
        let conn = Self::open_read_only(db_path)?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT value FROM ItemTable WHERE key = 'composer.composerData'",
                [],
                |row| row.get(0),
            )
            .ok();
        let Some(raw) = raw else {
            return Ok(Vec::new());
        };
        let data: Value = serde_json::from_str(&raw)
            .with_context(|| format!("parse composer metadata in {}", db_path.display()))?;
        Ok(data
            .get("allComposers")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    /// Fetch one composer's bubbles from the global store, sorted by
    /// creation time (key order is insertion order, not message order).
    fn read_bubbles(global_db: &Path, composer_id: &str) -> Result<Vec<Value>> {
        let conn = Self::open_read_only(global_db)?;
        let pattern = format!("bubbleId:{composer_id}:%");
        let mut stmt = conn
            .prepare("SELECT value FROM cursorDiskKV WHERE key LIKE ?1 ORDER BY key")
            .context("prepare bubble query")?;
        let rows = stmt
            .query_map([&pattern], |row| row.get::<_, String>(0))
            .context("query bubbles")?;

        let mut bubbles: Vec<Value> = rows
            .flatten()
            .filter_map(|raw| match serde_json::from_str::<Value>(&raw) {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::trace!(error = %e, "skipping malformed bubble JSON");
                    None
                }
            })
            .collect();

        bubbles.sort_by_key(|b| {
            b.get("createdAt")
                .and_then(crate::connectors::parse_timestamp)
                .unwrap_or(0)
        });
        Ok(bubbles)
    }

    /// Substantive bubbles: user/assistant turns carrying text or a tool
    /// call. Bookkeeping rows (type 0) never count.
    fn substantive_count(bubbles: &[Value]) -> usize {
        bubbles
            .iter()
            .filter(|b| {
                let kind = b.get("type").and_then(Value::as_i64);
                if kind != Some(bubble_type::USER) && kind != Some(bubble_type::ASSISTANT) {
                    return false;
                }
                b.get("text")
                    .and_then(Value::as_str)
                    .is_some_and(|t| !t.trim().is_empty())
                    || b.get("toolFormerData").is_some()
            })
            .count()
    }

    fn composer_descriptors(
        workspace_db: &Path,
        global_db: &Path,
        workspace_name: Option<&str>,
        workspace_path: Option<&Path>,
    ) -> Result<Vec<SessionDescriptor>> {
        let composers = Self::read_composer_metadata(workspace_db)?;
        if composers.is_empty() || !global_db.exists() {
            return Ok(Vec::new());
        }

        let mut descriptors = Vec::new();
        for composer in composers {
            let Some(composer_id) = composer.get("composerId").and_then(Value::as_str) else {
                continue;
            };
            let bubbles = match Self::read_bubbles(global_db, composer_id) {
                Ok(bubbles) => bubbles,
                Err(e) => {
                    tracing::debug!(composer = composer_id, error = %e, "bubble read failed");
                    continue;
                }
            };
            let count = Self::substantive_count(&bubbles);
            if count == 0 {
                continue;
            }

            descriptors.push(SessionDescriptor {
                session_id: composer_id.to_string(),
                provider: ThreadFormat::Cursor,
                storage: StorageKey::Composer {
                    db_path: global_db.to_path_buf(),
                    composer_id: composer_id.to_string(),
                },
                workspace_name: workspace_name.map(String::from),
                workspace_path: workspace_path.map(Path::to_path_buf),
                created_at: composer.get("createdAt").and_then(Value::as_i64),
                last_message_at: composer
                    .get("lastUpdatedAt")
                    .and_then(Value::as_i64)
                    .or_else(|| composer.get("createdAt").and_then(Value::as_i64)),
                title_hint: composer.get("name").and_then(Value::as_str).map(String::from),
                message_count_hint: count,
                metadata: serde_json::json!({
                    "sessionType": "composer",
                    "contextUsagePercent": composer.get("contextUsagePercent"),
                    "filesChangedCount": composer.get("filesChangedCount"),
                }),
            });
        }
        Ok(descriptors)
    }

    /// Legacy chat-session files carry the editor-extension shape, so they
    /// surface tagged for that normalizer.
    fn chat_descriptors(
        chat_dir: &Path,
        since_ts: Option<i64>,
        workspace_name: Option<&str>,
        workspace_path: Option<&Path>,
    ) -> Vec<SessionDescriptor> {
        let Ok(entries) = fs::read_dir(chat_dir) else {
            return Vec::new();
        };

        let mut descriptors = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if !file_modified_since(&path, since_ts) {
                continue;
            }
            let Ok(content) = fs::read_to_string(&path) else {
                continue;
            };
            let Ok(val) = serde_json::from_str::<Value>(&content) else {
                continue;
            };
            let count = val
                .get("requests")
                .and_then(Value::as_array)
                .map(|r| r.len())
                .unwrap_or(0);
            if count == 0 {
                continue;
            }

            descriptors.push(SessionDescriptor {
                session_id: val
                    .get("sessionId")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string(),
                provider: ThreadFormat::Copilot,
                storage: StorageKey::File { path },
                workspace_name: workspace_name.map(String::from),
                workspace_path: workspace_path.map(Path::to_path_buf),
                created_at: val.get("creationDate").and_then(Value::as_i64),
                last_message_at: val.get("lastMessageDate").and_then(Value::as_i64),
                title_hint: val
                    .get("customTitle")
                    .and_then(Value::as_str)
                    .map(String::from),
                message_count_hint: count,
                metadata: serde_json::json!({ "sessionType": "chat" }),
            });
        }
        descriptors
    }

    /// Reassemble one composer's bubbles into the positional-array document
    /// shape the conversational-turn normalizer consumes.
    fn reassemble_composer(
        global_db: &Path,
        composer_id: &str,
        descriptor: &SessionDescriptor,
    ) -> Result<Value> {
        let bubbles = Self::read_bubbles(global_db, composer_id)?;

        let messages: Vec<Value> = bubbles
            .iter()
            .map(|bubble| {
                let mut message = serde_json::json!({
                    "type": bubble.get("type"),
                    "bubbleId": bubble.get("bubbleId"),
                    "text": bubble.get("text").and_then(Value::as_str).unwrap_or(""),
                    "createdAt": bubble.get("createdAt"),
                    "tokenCount": bubble.get("tokenCount"),
                });
                if let Some(tool_data) = bubble.get("toolFormerData") {
                    message["toolCall"] = serde_json::json!({
                        "tool": tool_data.get("name"),
                        "toolId": tool_data.get("tool"),
                        "toolIndex": tool_data.get("toolIndex"),
                        "status": tool_data.get("status"),
                        "params": lenient_json(tool_data.get("params")),
                        "result": lenient_json(tool_data.get("result")),
                        "additionalData": tool_data.get("additionalData"),
                    });
                }
                message
            })
            .collect();

        Ok(serde_json::json!({
            "composerId": composer_id,
            "metadata": {
                "name": descriptor.title_hint,
                "createdAt": descriptor.created_at,
                "lastUpdatedAt": descriptor.last_message_at,
                "workspaceName": descriptor.workspace_name,
                "workspacePath": descriptor.workspace_path,
            },
            "messages": messages,
        }))
    }

    fn workspace_info(workspace_dir: &Path) -> (Option<String>, Option<PathBuf>) {
        let workspace_json = workspace_dir.join("workspace.json");
        let Ok(content) = fs::read_to_string(&workspace_json) else {
            return (None, None);
        };
        let Ok(json) = serde_json::from_str::<Value>(&content) else {
            return (None, None);
        };
        let Some(folder) = json.get("folder").and_then(Value::as_str) else {
            return (None, None);
        };
        let decoded = urlencoding::decode(folder).unwrap_or_default();
        let path = PathBuf::from(decoded.strip_prefix("file://").unwrap_or(&decoded));
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(String::from);
        (name, Some(path))
    }
}

/// Tool params/results are stored as JSON strings; parse them, keeping the
/// raw string when it is not valid JSON.
fn lenient_json(raw: Option<&Value>) -> Value {
    match raw {
        Some(Value::String(s)) => serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.clone())),
        Some(other) => other.clone(),
        None => Value::Null,
    }
}

impl Connector for CursorConnector {
    fn provider(&self) -> ThreadFormat {
        ThreadFormat::Cursor
    }

    fn detect(&self) -> DetectionResult {
        if let Some(base) = Self::app_support_dir()
            && (Self::global_db_path(&base).exists() || base.join("workspaceStorage").exists())
        {
            return DetectionResult {
                detected: true,
                evidence: vec![format!("found Cursor storage at {}", base.display())],
            };
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
        let workspace_storage = base.join("workspaceStorage");
        if !workspace_storage.exists() {
            return Ok(Vec::new());
        }
        let global_db = Self::global_db_path(&base);

        let mut descriptors = Vec::new();
        for entry in WalkDir::new(&workspace_storage)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .flatten()
        {
            if !entry.file_type().is_dir() {
                continue;
            }
            let workspace_dir = entry.path();
            let (workspace_name, workspace_path) = Self::workspace_info(workspace_dir);

            let chat_dir = workspace_dir.join("chatSessions");
            if chat_dir.is_dir() {
                descriptors.extend(Self::chat_descriptors(
                    &chat_dir,
                    ctx.since_ts,
                    workspace_name.as_deref(),
                    workspace_path.as_deref(),
                ));
            }

            let workspace_db = workspace_dir.join("state.vscdb");
            if workspace_db.is_file() {
                match Self::composer_descriptors(
                    &workspace_db,
                    &global_db,
                    workspace_name.as_deref(),
                    workspace_path.as_deref(),
                ) {
                    Ok(found) => descriptors.extend(found),
                    Err(e) => {
                        tracing::warn!(
                            db = %workspace_db.display(),
                            error = %e,
                            "composer store read failed"
                        );
                    }
                }
            }
        }

        Ok(descriptors)
    }

    fn load_raw(&self, descriptor: &SessionDescriptor) -> Result<RawPayload> {
        match &descriptor.storage {
            StorageKey::Composer { db_path, composer_id } => {
                let value = Self::reassemble_composer(db_path, composer_id, descriptor)?;
                Ok(RawPayload::Document(value))
            }
            StorageKey::File { path } => {
                let content =
                    fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
                let value: Value = serde_json::from_str(&content)
                    .with_context(|| format!("parse JSON from {}", path.display()))?;
                Ok(RawPayload::Document(value))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn setup_workspace_db(base: &Path, workspace_id: &str, composers: &Value) {
        let dir = base.join("workspaceStorage").join(workspace_id);
        fs::create_dir_all(&dir).unwrap();
        let conn = Connection::open(dir.join("state.vscdb")).unwrap();
        conn.execute(
            "CREATE TABLE ItemTable (key TEXT PRIMARY KEY, value TEXT)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO ItemTable (key, value) VALUES ('composer.composerData', ?1)",
            [serde_json::to_string(composers).unwrap()],
        )
        .unwrap();
    }

    fn setup_global_db(base: &Path, bubbles: &[(&str, Value)]) {
        let dir = base.join("globalStorage");
        fs::create_dir_all(&dir).unwrap();
        let conn = Connection::open(dir.join("state.vscdb")).unwrap();
        conn.execute(
            "CREATE TABLE cursorDiskKV (key TEXT PRIMARY KEY, value TEXT)",
            [],
        )
        .unwrap();
        for (key, value) in bubbles {
            conn.execute(
                "INSERT INTO cursorDiskKV (key, value) VALUES (?1, ?2)",
                [key.to_string(), serde_json::to_string(value).unwrap()],
            )
            .unwrap();
        }
    }

    fn composer_meta(id: &str, name: &str) -> Value {
        json!({ "allComposers": [{
            "composerId": id,
            "name": name,
            "createdAt": 1700000000000i64,
            "lastUpdatedAt": 1700000900000i64
        }]})
    }

    #[test]
    fn composer_sessions_listed_with_counts() {
        let dir = TempDir::new().unwrap();
        setup_workspace_db(dir.path(), "ws1", &composer_meta("comp-1", "Refactor auth"));
        setup_global_db(
            dir.path(),
            &[
                (
                    "bubbleId:comp-1:b1",
                    json!({ "type": 1, "bubbleId": "b1", "text": "refactor the auth module",
                            "createdAt": "2023-11-14T22:13:20Z" }),
                ),
                (
                    "bubbleId:comp-1:b2",
                    json!({ "type": 2, "bubbleId": "b2", "text": "Starting with the session layer.",
                            "createdAt": "2023-11-14T22:13:30Z" }),
                ),
                (
                    "bubbleId:comp-1:b0",
                    json!({ "type": 0, "bubbleId": "b0", "text": "" }),
                ),
            ],
        );

        let connector = CursorConnector::new();
        let sessions = connector
            .list_sessions(&ScanContext::rooted(dir.path()))
            .unwrap();

        assert_eq!(sessions.len(), 1);
        let s = &sessions[0];
        assert_eq!(s.session_id, "comp-1");
        assert_eq!(s.provider, ThreadFormat::Cursor);
        assert_eq!(s.message_count_hint, 2);
        assert_eq!(s.title_hint.as_deref(), Some("Refactor auth"));
        assert!(matches!(&s.storage, StorageKey::Composer { .. }));
    }

    #[test]
    fn composer_without_bubbles_excluded() {
        let dir = TempDir::new().unwrap();
        setup_workspace_db(dir.path(), "ws1", &composer_meta("comp-empty", "Empty"));
        setup_global_db(dir.path(), &[]);

        let connector = CursorConnector::new();
        let sessions = connector
            .list_sessions(&ScanContext::rooted(dir.path()))
            .unwrap();
        assert!(sessions.is_empty());
    }

    #[test]
    fn load_raw_reassembles_positional_document() {
        let dir = TempDir::new().unwrap();
        setup_workspace_db(dir.path(), "ws1", &composer_meta("comp-1", "Tools"));
        setup_global_db(
            dir.path(),
            &[
                (
                    "bubbleId:comp-1:b1",
                    json!({ "type": 1, "bubbleId": "b1", "text": "run the tests",
                            "createdAt": "2023-11-14T22:13:20Z" }),
                ),
                (
                    "bubbleId:comp-1:b2",
                    json!({ "type": 2, "bubbleId": "b2", "text": "",
                            "createdAt": "2023-11-14T22:13:30Z",
                            "toolFormerData": {
                                "name": "run_terminal_command",
                                "tool": 7,
                                "status": "completed",
                                "params": "{\"command\":\"cargo test\"}",
                                "result": "{\"output\":\"ok\"}"
                            }}),
                ),
            ],
        );

        let connector = CursorConnector::new();
        let sessions = connector
            .list_sessions(&ScanContext::rooted(dir.path()))
            .unwrap();
        let RawPayload::Document(doc) = connector.load_raw(&sessions[0]).unwrap() else {
            panic!("expected document");
        };

        assert_eq!(doc["composerId"], "comp-1");
        assert_eq!(doc["metadata"]["name"], "Tools");
        let messages = doc["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["type"], 1);
        assert_eq!(messages[1]["toolCall"]["tool"], "run_terminal_command");
        // Stored JSON strings come back as parsed objects.
        assert_eq!(messages[1]["toolCall"]["params"]["command"], "cargo test");
        assert_eq!(messages[1]["toolCall"]["result"]["output"], "ok");
    }

    #[test]
    fn bubbles_sorted_by_creation_time_not_key() {
        let dir = TempDir::new().unwrap();
        setup_workspace_db(dir.path(), "ws1", &composer_meta("comp-1", "Order"));
        // Key order (b1 < b2) disagrees with creation order.
        setup_global_db(
            dir.path(),
            &[
                (
                    "bubbleId:comp-1:b1",
                    json!({ "type": 2, "bubbleId": "b1", "text": "second",
                            "createdAt": "2023-11-14T23:00:00Z" }),
                ),
                (
                    "bubbleId:comp-1:b2",
                    json!({ "type": 1, "bubbleId": "b2", "text": "first",
                            "createdAt": "2023-11-14T22:00:00Z" }),
                ),
            ],
        );

        let connector = CursorConnector::new();
        let sessions = connector
            .list_sessions(&ScanContext::rooted(dir.path()))
            .unwrap();
        let RawPayload::Document(doc) = connector.load_raw(&sessions[0]).unwrap() else {
            panic!("expected document");
        };
        let messages = doc["messages"].as_array().unwrap();
        assert_eq!(messages[0]["text"], "first");
        assert_eq!(messages[1]["text"], "second");
    }

    #[test]
    fn legacy_chat_sessions_surface_as_editor_format() {
        let dir = TempDir::new().unwrap();
        let chat_dir = dir.path().join("workspaceStorage/ws1/chatSessions");
        fs::create_dir_all(&chat_dir).unwrap();
        fs::write(
            chat_dir.join("chat1.json"),
            serde_json::to_string(&json!({
                "version": 3,
                "sessionId": "chat-1",
                "creationDate": 1700000000000i64,
                "lastMessageDate": 1700000100000i64,
                "requests": [{ "requestId": "r1", "message": { "text": "hi" } }]
            }))
            .unwrap(),
        )
        .unwrap();

        let connector = CursorConnector::new();
        let sessions = connector
            .list_sessions(&ScanContext::rooted(dir.path()))
            .unwrap();

        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].provider, ThreadFormat::Copilot);
        assert_eq!(sessions[0].session_id, "chat-1");
        assert_eq!(sessions[0].metadata["sessionType"], "chat");
    }

    #[test]
    fn malformed_bubble_json_skipped() {
        let dir = TempDir::new().unwrap();
        setup_workspace_db(dir.path(), "ws1", &composer_meta("comp-1", "Broken"));
        let global_dir = dir.path().join("globalStorage");
        fs::create_dir_all(&global_dir).unwrap();
        let conn = Connection::open(global_dir.join("state.vscdb")).unwrap();
        conn.execute(
            "CREATE TABLE cursorDiskKV (key TEXT PRIMARY KEY, value TEXT)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO cursorDiskKV (key, value) VALUES ('bubbleId:comp-1:b1', '{broken')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO cursorDiskKV (key, value) VALUES ('bubbleId:comp-1:b2', ?1)",
            [serde_json::to_string(&json!({ "type": 1, "text": "still here" })).unwrap()],
        )
        .unwrap();
        drop(conn);

        let connector = CursorConnector::new();
        let sessions = connector
            .list_sessions(&ScanContext::rooted(dir.path()))
            .unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].message_count_hint, 1);
    }
}
