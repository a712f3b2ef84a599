//! Connectors for local coding agent session stores.
//!
//! Each connector knows one tool's on-disk layout: where sessions live, how
//! to enumerate them cheaply, and how to load one raw payload for
//! normalization. Discovery does real I/O (directory walks, database
//! reads); normalization never does. A connector hands the core an
//! already-loaded [`RawPayload`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::detect::ThreadFormat;

pub mod codex;
pub mod copilot;
pub mod cursor;
pub mod gemini;

/// High-level detection status for a connector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionResult {
    pub detected: bool,
    pub evidence: Vec<String>,
}

impl DetectionResult {
    pub fn not_found() -> Self {
        Self {
            detected: false,
            evidence: Vec::new(),
        }
    }
}

/// Shared scan parameters.
#[derive(Debug, Clone, Default)]
pub struct ScanContext {
    /// Override for the store root; `None` probes the provider's default
    /// platform location.
    pub data_root: Option<PathBuf>,
    /// Only list sessions whose backing file changed at or after this epoch
    /// timestamp (seconds). Used for incremental rescans.
    pub since_ts: Option<i64>,
}

impl ScanContext {
    pub fn rooted(path: impl Into<PathBuf>) -> Self {
        Self {
            data_root: Some(path.into()),
            since_ts: None,
        }
    }
}

/// Where a discovered session's raw data lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "store", rename_all = "snake_case")]
pub enum StorageKey {
    /// A plain JSON or JSONL file.
    File { path: PathBuf },
    /// A composer row set in a SQLite store, keyed by composer id.
    Composer { db_path: PathBuf, composer_id: String },
}

impl StorageKey {
    /// Label suitable for error messages and debug output.
    pub fn label(&self) -> String {
        match self {
            Self::File { path } => path.display().to_string(),
            Self::Composer { db_path, composer_id } => {
                format!("{}#{}", db_path.display(), composer_id)
            }
        }
    }
}

/// One discoverable session, known before any parsing happens.
///
/// `message_count_hint` counts only substantive messages (real user or
/// assistant turns, not store bookkeeping). Sessions with a hint of zero
/// are excluded from listings entirely; empty sessions are noise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDescriptor {
    pub session_id: String,
    pub provider: ThreadFormat,
    pub storage: StorageKey,
    pub workspace_name: Option<String>,
    pub workspace_path: Option<PathBuf>,
    /// Epoch milliseconds.
    pub created_at: Option<i64>,
    pub last_message_at: Option<i64>,
    pub title_hint: Option<String>,
    pub message_count_hint: usize,
    pub metadata: Value,
}

/// Raw provider-native payload as loaded from a store. The per-provider
/// normalizer owns any further JSON/JSONL parsing.
#[derive(Debug, Clone, PartialEq)]
pub enum RawPayload {
    /// A single parsed JSON document.
    Document(Value),
    /// Newline-delimited JSON text, parsed line by line downstream.
    Lines(String),
}

pub trait Connector {
    fn provider(&self) -> ThreadFormat;
    /// Cheap probe: does this tool's store exist on this machine at all?
    fn detect(&self) -> DetectionResult;
    fn list_sessions(&self, ctx: &ScanContext) -> anyhow::Result<Vec<SessionDescriptor>>;
    fn load_raw(&self, descriptor: &SessionDescriptor) -> anyhow::Result<RawPayload>;
}

/// List sessions across several connectors, scanning stores concurrently.
///
/// Each connector owns its own filesystem/database handles for the duration
/// of its scan, so there is no shared mutable state to guard. A connector
/// that errors is logged and skipped: one broken store must not hide the
/// others. Results are sorted newest-first.
pub fn list_all_sessions(
    scans: Vec<(&(dyn Connector + Sync), ScanContext)>,
) -> Vec<SessionDescriptor> {
    let mut sessions: Vec<SessionDescriptor> = std::thread::scope(|scope| {
        let handles: Vec<_> = scans
            .into_iter()
            .map(|(connector, ctx)| {
                scope.spawn(move || match connector.list_sessions(&ctx) {
                    Ok(found) => found,
                    Err(e) => {
                        tracing::warn!(
                            provider = connector.provider().as_str(),
                            error = %e,
                            "session scan failed"
                        );
                        Vec::new()
                    }
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|h| h.join().unwrap_or_default())
            .collect()
    });

    sessions.sort_by(|a, b| {
        b.last_message_at
            .unwrap_or(0)
            .cmp(&a.last_message_at.unwrap_or(0))
    });
    sessions
}

/// True when the file's mtime is at or after `since_ts` (epoch seconds), or
/// when no stamp / no mtime is available (err on re-listing).
pub fn file_modified_since(path: &Path, since_ts: Option<i64>) -> bool {
    let Some(since) = since_ts else {
        return true;
    };
    let Ok(metadata) = std::fs::metadata(path) else {
        return true;
    };
    let Ok(modified) = metadata.modified() else {
        return true;
    };
    match modified.duration_since(std::time::UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_secs() as i64 >= since,
        Err(_) => true,
    }
}

/// Parse the timestamp shapes that show up across session logs: RFC 3339
/// strings, epoch milliseconds, or epoch seconds. Returns milliseconds.
pub fn parse_timestamp(value: &Value) -> Option<i64> {
    if let Some(raw) = value.as_str() {
        return chrono::DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|dt| dt.timestamp_millis());
    }
    let n = value.as_i64()?;
    // Heuristic: anything before ~2001 in milliseconds is a seconds stamp.
    if n < 1_000_000_000_000 {
        Some(n * 1000)
    } else {
        Some(n)
    }
}

/// First line of a message, capped for use as a session title.
pub fn title_preview(text: &str, max_chars: usize) -> String {
    text.lines()
        .next()
        .unwrap_or(text)
        .chars()
        .take(max_chars)
        .collect()
}
