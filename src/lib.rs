//! Normalize local coding agent session logs into renderable threads.
//!
//! Every supported tool stores its sessions differently (JSON documents,
//! JSONL streams, SQLite composer stores), each in its own undocumented
//! shape. This crate discovers those sessions, classifies their payloads,
//! and parses each into one canonical [`model::NormalizedThread`]: an
//! ordered sequence of user turns, assistant prose, thinking blocks, tool
//! invocations with correlated results, file edits and plan updates.
//!
//! Layering:
//! - [`connectors`]: per-tool store adapters (the only I/O in the crate)
//! - [`detect`]: shape-based format classification
//! - [`normalize`]: per-provider parsers onto the canonical model
//! - [`model`]: the canonical thread types, plain serializable data
//! - [`remote`]: shared-snippet retrieval interface

pub mod config;
pub mod connectors;
pub mod detect;
pub mod error;
pub mod logging;
pub mod model;
pub mod normalize;
pub mod remote;

use anyhow::Result;

use config::ScanConfig;
use connectors::{
    Connector, SessionDescriptor, codex::CodexConnector, copilot::CopilotConnector,
    cursor::CursorConnector, gemini::GeminiConnector,
};
pub use detect::{ThreadFormat, detect};
pub use error::ThreadError;
pub use model::NormalizedThread;
pub use normalize::{group_turns, normalize_auto};

/// Discover sessions across all local stores, honoring config overrides.
/// Stores are scanned concurrently; results come back newest-first.
pub fn discover_sessions(config: &ScanConfig) -> Vec<SessionDescriptor> {
    let copilot = CopilotConnector::new();
    let codex = CodexConnector::new();
    let cursor = CursorConnector::new();
    let gemini = GeminiConnector::new();

    connectors::list_all_sessions(vec![
        (
            &copilot as &(dyn Connector + Sync),
            config.context_for(ThreadFormat::Copilot),
        ),
        (&codex, config.context_for(ThreadFormat::Codex)),
        (&cursor, config.context_for(ThreadFormat::Cursor)),
        (&gemini, config.context_for(ThreadFormat::Gemini)),
    ])
}

/// Load one discovered session and normalize it.
pub fn load_thread(
    connector: &dyn Connector,
    descriptor: &SessionDescriptor,
) -> Result<NormalizedThread> {
    let raw = connector.load_raw(descriptor)?;
    let thread = normalize::normalize_raw(descriptor.provider, &raw)
        .map_err(|e| e.with_source(descriptor.storage.label()))?;
    Ok(thread)
}
