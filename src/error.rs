//! Error taxonomy at the normalization boundary.
//!
//! Two tiers: thread-level failures (the whole payload is unusable) are
//! typed variants here and propagate to the caller; item-level decode
//! failures (one bad tool-arguments string, one truncated JSONL line) are
//! recovered in place with an empty/placeholder value and never surface.

use crate::detect::ThreadFormat;

#[derive(Debug)]
pub enum ThreadError {
    /// No provider signature matched the payload shape. Surfaced to the
    /// user as "format not supported", never guessed around.
    UnrecognizedFormat {
        /// Compact rendering of the offending payload root, for debugging.
        raw: Option<String>,
    },

    /// The chosen normalizer found its root structure missing or wrong
    /// (e.g. no `requests` array in an editor-extension payload).
    MalformedPayload {
        format: ThreadFormat,
        detail: String,
        /// Source file or storage key, when the payload came from a store.
        source: Option<String>,
    },

    /// The store has no session/snippet for the given identifier. Distinct
    /// from `MalformedPayload`: "thread not found" vs. "thread corrupt".
    NotFound { id: String },
}

impl std::fmt::Display for ThreadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnrecognizedFormat { .. } => write!(f, "unrecognized session format"),
            Self::MalformedPayload { format, detail, .. } => {
                write!(f, "malformed {format:?} payload: {detail}")
            }
            Self::NotFound { id } => write!(f, "thread not found: {id}"),
        }
    }
}

impl std::error::Error for ThreadError {}

impl ThreadError {
    pub fn malformed(format: ThreadFormat, detail: impl Into<String>) -> Self {
        Self::MalformedPayload {
            format,
            detail: detail.into(),
            source: None,
        }
    }

    pub fn with_source(self, source_label: impl Into<String>) -> Self {
        match self {
            Self::MalformedPayload { format, detail, .. } => Self::MalformedPayload {
                format,
                detail,
                source: Some(source_label.into()),
            },
            other => other,
        }
    }

    /// Truncated single-line preview of a payload for `UnrecognizedFormat`.
    pub fn unrecognized(payload: &serde_json::Value) -> Self {
        let rendered = payload.to_string();
        let mut raw: String = rendered.chars().take(256).collect();
        if raw.len() < rendered.len() {
            raw.push('…');
        }
        Self::UnrecognizedFormat { raw: Some(raw) }
    }
}
