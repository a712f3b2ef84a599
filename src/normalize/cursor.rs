//! Normalizer for the conversational-turn format.
//!
//! Records carry an integer `type` code (0 = bookkeeping, 1 = user,
//! 2 = assistant). An assistant record holds at most one `toolCall` with its
//! result embedded inline, so no correlation pass is needed: this format
//! has no asynchronous split between call and result.
//!
//! The payload arrives either as a JSON document written by the tool itself
//! or reassembled from its SQLite composer store into the same shape.

use serde_json::Value;

use crate::detect::ThreadFormat;
use crate::error::ThreadError;
use crate::model::{
    Edit, EditGroup, MessageKind, NormalizedThread, ThreadMessage, ToolInvocation, ToolRender,
    ToolStatus,
};
use crate::normalize::assign_ids;

mod record_type {
    pub const USER: i64 = 1;
    pub const ASSISTANT: i64 = 2;
}

pub fn normalize(payload: &Value) -> Result<NormalizedThread, ThreadError> {
    let Some(records) = message_container(payload) else {
        return Err(ThreadError::malformed(
            ThreadFormat::Cursor,
            "no messages, conversations or items array",
        ));
    };

    let mut messages = Vec::new();
    for record in records {
        match record.get("type").and_then(Value::as_i64) {
            Some(record_type::USER) => {
                let text = record.get("text").and_then(Value::as_str).unwrap_or("");
                if !text.trim().is_empty() {
                    messages.push(ThreadMessage::unnumbered(MessageKind::User {
                        text: text.to_string(),
                        attachments: Vec::new(),
                    }));
                }
            }
            Some(record_type::ASSISTANT) => emit_assistant_record(record, &mut messages),
            // Type 0 and anything unrecognized is store bookkeeping.
            _ => {}
        }
    }

    assign_ids(&mut messages);

    let meta = payload.get("metadata");
    Ok(NormalizedThread {
        session_id: payload
            .get("composerId")
            .and_then(Value::as_str)
            .map(String::from),
        title: meta
            .and_then(|m| m.get("name"))
            .and_then(Value::as_str)
            .map(String::from),
        created_at: meta.and_then(|m| m.get("createdAt")).and_then(Value::as_i64),
        requester: None,
        responder: None,
        messages,
        metadata: serde_json::json!({
            "format": "cursor",
            "workspaceName": meta.and_then(|m| m.get("workspaceName")),
            "workspacePath": meta.and_then(|m| m.get("workspacePath")),
            "lastUpdatedAt": meta.and_then(|m| m.get("lastUpdatedAt")),
        }),
    })
}

/// The record list normally lives under `messages`; legacy exports wrap it
/// in a `conversations` object or a bare `items` array instead.
fn message_container(payload: &Value) -> Option<&Vec<Value>> {
    if let Some(messages) = payload.get("messages").and_then(Value::as_array) {
        return Some(messages);
    }
    if let Some(conversations) = payload.get("conversations") {
        return conversations
            .as_array()
            .or_else(|| conversations.get("messages").and_then(Value::as_array));
    }
    payload.get("items").and_then(Value::as_array)
}

fn emit_assistant_record(record: &Value, messages: &mut Vec<ThreadMessage>) {
    if let Some(text) = record.get("text").and_then(Value::as_str)
        && !text.trim().is_empty()
    {
        messages.push(ThreadMessage::unnumbered(MessageKind::AssistantText {
            text: text.to_string(),
            inline_refs: Vec::new(),
        }));
    }

    let Some(tool_call) = record.get("toolCall") else {
        return;
    };

    let tool = tool_call.get("tool").and_then(Value::as_str).unwrap_or("");
    let params = tool_call.get("params").unwrap_or(&Value::Null);
    let result = tool_call.get("result").unwrap_or(&Value::Null);
    let status = match tool_call.get("status").and_then(Value::as_str) {
        Some("completed") => ToolStatus::Completed,
        Some("error") | Some("failed") => ToolStatus::Failed,
        Some(_) => ToolStatus::Running,
        None => ToolStatus::Unknown,
    };

    match tool {
        "read_file" if params.is_object() => {
            messages.push(ThreadMessage::unnumbered(MessageKind::ToolCall(
                ToolInvocation {
                    tool_id: tool.to_string(),
                    status,
                    render: ToolRender::ReadFile {
                        path: params
                            .get("targetFile")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                    },
                    result: result
                        .get("content")
                        .and_then(Value::as_str)
                        .map(String::from),
                },
            )));
        }
        "edit_file" | "write_file" if params.is_object() => {
            let new_text = params
                .get("edit_content")
                .or_else(|| params.get("content"))
                .and_then(Value::as_str)
                .map(String::from);
            messages.push(ThreadMessage::unnumbered(MessageKind::Edit(EditGroup {
                file_path: params
                    .get("relative_workspace_path")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                edits: vec![Edit {
                    range: None,
                    old_text: None,
                    new_text,
                }],
            })));
        }
        "run_terminal_command" if params.is_object() => {
            messages.push(ThreadMessage::unnumbered(MessageKind::ToolCall(
                ToolInvocation {
                    tool_id: tool.to_string(),
                    status,
                    render: ToolRender::Shell {
                        command: params
                            .get("command")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        description: None,
                    },
                    result: result
                        .get("output")
                        .and_then(Value::as_str)
                        .map(String::from),
                },
            )));
        }
        _ => {
            messages.push(ThreadMessage::unnumbered(MessageKind::ToolCall(
                ToolInvocation {
                    tool_id: tool.to_string(),
                    status,
                    render: ToolRender::Generic {
                        display_args: params.clone(),
                        description: None,
                    },
                    result: None,
                },
            )));
        }
    }
}
