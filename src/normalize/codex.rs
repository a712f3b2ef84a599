//! Normalizer for the terminal-agent JSONL format.
//!
//! The payload is a newline-delimited record stream. Production logs contain
//! truncated trailing lines, so every line parses independently and invalid
//! lines are dropped rather than failing the thread.
//!
//! Correlation is id-based but asynchronous: a `function_call_output` may
//! appear anywhere later in the stream, not adjacent to its call. The
//! normalizer therefore runs two explicit passes (build the
//! `call_id -> output` map over the whole stream, then emit messages in
//! record order) instead of a streaming pass with lookahead.

use std::collections::{BTreeSet, HashMap};

use serde_json::Value;

use crate::detect::ThreadFormat;
use crate::error::ThreadError;
use crate::model::{
    MessageKind, NormalizedThread, PlanItem, PlanStatus, PlanUpdate, RepoSnapshot, ThreadMessage,
    ToolInvocation, ToolRender, ToolStatus,
};
use crate::normalize::{assign_ids, parse_args_json, truncate_listing};

/// Structural marker for non-conversational bootstrap content injected as a
/// user message. Must never reach the visible thread.
const ENVIRONMENT_CONTEXT_MARKER: &str = "<environment_context>";

pub fn normalize(jsonl: &str) -> Result<NormalizedThread, ThreadError> {
    let records = parse_lines(jsonl);
    if records.is_empty() {
        return Err(ThreadError::malformed(
            ThreadFormat::Codex,
            "no parseable records in stream",
        ));
    }
    normalize_records(&records)
}

pub fn normalize_records(records: &[Value]) -> Result<NormalizedThread, ThreadError> {
    // Pass 1: resolve every function output up front.
    let outputs = collect_outputs(records);

    let mut messages = Vec::new();
    let mut models = BTreeSet::new();
    let mut session_id = None;
    let mut created_at = None;
    let mut workspace = None;
    let mut git = None;

    // Pass 2: emit in record order.
    for record in records {
        let record_type = record.get("type").and_then(Value::as_str);
        let payload = record.get("payload").unwrap_or(&Value::Null);

        match record_type {
            Some("session_meta") => {
                session_id = payload.get("id").and_then(Value::as_str).map(String::from);
                created_at = record
                    .get("timestamp")
                    .or_else(|| payload.get("timestamp"))
                    .and_then(parse_rfc3339_millis);
                workspace = payload.get("cwd").and_then(Value::as_str).map(String::from);
                git = payload.get("git").cloned().filter(|v| !v.is_null());
            }
            Some("turn_context") => {
                if let Some(model) = payload.get("model").and_then(Value::as_str) {
                    models.insert(model.to_string());
                }
            }
            Some("response_item") => emit_response_item(payload, &outputs, &mut messages),
            // event_msg and other record types are telemetry/bookkeeping.
            _ => {}
        }
    }

    assign_ids(&mut messages);

    let title = messages.iter().find_map(|m| match &m.kind {
        MessageKind::User { text, .. } => Some(title_line(text)),
        _ => None,
    });

    Ok(NormalizedThread {
        session_id,
        title,
        created_at,
        requester: None,
        responder: None,
        messages,
        metadata: serde_json::json!({
            "format": "codex",
            "workspace": workspace,
            "git": git,
            "models": models.into_iter().collect::<Vec<_>>(),
        }),
    })
}

/// Split a JSONL stream into records, dropping lines that do not parse.
pub(crate) fn parse_lines(jsonl: &str) -> Vec<Value> {
    jsonl
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str(line) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::trace!(error = %e, "dropping unparseable record line");
                None
            }
        })
        .collect()
}

fn collect_outputs(records: &[Value]) -> HashMap<String, String> {
    let mut outputs = HashMap::new();
    for record in records {
        if record.get("type").and_then(Value::as_str) != Some("response_item") {
            continue;
        }
        let Some(payload) = record.get("payload") else {
            continue;
        };
        if payload.get("type").and_then(Value::as_str) == Some("function_call_output")
            && let Some(call_id) = payload.get("call_id").and_then(Value::as_str)
            && let Some(output) = payload.get("output").and_then(Value::as_str)
        {
            outputs.insert(call_id.to_string(), output.to_string());
        }
    }
    outputs
}

fn emit_response_item(
    payload: &Value,
    outputs: &HashMap<String, String>,
    messages: &mut Vec<ThreadMessage>,
) {
    match payload.get("type").and_then(Value::as_str) {
        Some("message") => {
            let text = payload
                .get("content")
                .and_then(Value::as_array)
                .map(|blocks| {
                    blocks
                        .iter()
                        .filter_map(|b| b.get("text").and_then(Value::as_str))
                        .filter(|t| !t.is_empty())
                        .collect::<Vec<_>>()
                        .join("\n\n")
                })
                .unwrap_or_default();
            let text = text.trim();
            if text.is_empty() {
                return;
            }

            match payload.get("role").and_then(Value::as_str) {
                Some("user") => {
                    if text.starts_with(ENVIRONMENT_CONTEXT_MARKER) {
                        return;
                    }
                    messages.push(ThreadMessage::unnumbered(MessageKind::User {
                        text: text.to_string(),
                        attachments: Vec::new(),
                    }));
                }
                Some("assistant") => {
                    messages.push(ThreadMessage::unnumbered(MessageKind::AssistantText {
                        text: text.to_string(),
                        inline_refs: Vec::new(),
                    }));
                }
                _ => {}
            }
        }
        Some("reasoning") => {
            let Some(summary) = payload.get("summary").and_then(Value::as_array) else {
                return;
            };
            for item in summary {
                if let Some(thought) = item.get("text").and_then(Value::as_str)
                    && !thought.trim().is_empty()
                {
                    messages.push(ThreadMessage::unnumbered(MessageKind::Thinking {
                        text: thought.to_string(),
                        subject: None,
                    }));
                }
            }
        }
        Some("function_call") => {
            let Some(call_id) = payload.get("call_id").and_then(Value::as_str) else {
                return;
            };
            let name = payload
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let args = parse_args_json(payload.get("arguments").and_then(Value::as_str));
            let result = outputs.get(call_id).cloned();
            emit_function_call(name, &args, result, messages);
        }
        Some("ghost_snapshot") => {
            if let Some(snapshot) = parse_snapshot(payload) {
                messages.push(ThreadMessage::unnumbered(MessageKind::RepoSnapshot(snapshot)));
            }
        }
        // function_call_output records were consumed by pass 1.
        _ => {}
    }
}

fn emit_function_call(
    name: &str,
    args: &Value,
    result: Option<String>,
    messages: &mut Vec<ThreadMessage>,
) {
    let status = if result.is_some() {
        ToolStatus::Completed
    } else {
        ToolStatus::Unknown
    };

    match name {
        "shell_command" => {
            let command = args
                .get("command")
                .and_then(Value::as_str)
                .unwrap_or("shell_command")
                .to_string();
            let description = args
                .get("description")
                .and_then(Value::as_str)
                .map(String::from)
                .or_else(|| {
                    args.get("workdir")
                        .and_then(Value::as_str)
                        .map(|w| format!("cwd: {w}"))
                });
            messages.push(ThreadMessage::unnumbered(MessageKind::ToolCall(
                ToolInvocation {
                    tool_id: name.to_string(),
                    status,
                    render: ToolRender::Shell { command, description },
                    result,
                },
            )));
        }
        "update_plan" => {
            let items = plan_items(args.get("plan"));
            if items.is_empty() {
                return;
            }
            messages.push(ThreadMessage::unnumbered(MessageKind::Plan(PlanUpdate {
                items,
            })));
        }
        _ => {
            messages.push(ThreadMessage::unnumbered(MessageKind::ToolCall(
                ToolInvocation {
                    tool_id: name.to_string(),
                    status,
                    render: ToolRender::Generic {
                        display_args: args.clone(),
                        description: None,
                    },
                    result,
                },
            )));
        }
    }
}

fn plan_items(plan: Option<&Value>) -> Vec<PlanItem> {
    plan.and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| {
                    let step = entry.get("step").and_then(Value::as_str)?;
                    if step.is_empty() {
                        return None;
                    }
                    let status = entry
                        .get("status")
                        .and_then(Value::as_str)
                        .map(PlanStatus::from_provider)
                        .unwrap_or(PlanStatus::Pending);
                    Some(PlanItem {
                        step: step.to_string(),
                        status,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_snapshot(payload: &Value) -> Option<RepoSnapshot> {
    let commit = payload.get("ghost_commit")?;
    let commit_id = commit.get("id").and_then(Value::as_str)?.to_string();
    let empty = Vec::new();
    let files = commit
        .get("preexisting_untracked_files")
        .and_then(Value::as_array)
        .unwrap_or(&empty);
    let dirs = commit
        .get("preexisting_untracked_dirs")
        .and_then(Value::as_array)
        .unwrap_or(&empty);

    Some(RepoSnapshot {
        commit_id,
        parent_id: commit.get("parent").and_then(Value::as_str).map(String::from),
        untracked_files: truncate_listing(files),
        untracked_dirs: truncate_listing(dirs),
    })
}

fn title_line(text: &str) -> String {
    text.lines().next().unwrap_or(text).chars().take(60).collect()
}

pub(crate) fn parse_rfc3339_millis(value: &Value) -> Option<i64> {
    let raw = value.as_str()?;
    chrono::DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.timestamp_millis())
}
