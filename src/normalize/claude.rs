//! Normalizer for the reasoning-with-thoughts format.
//!
//! Records are role-tagged, either bare (`{role, content}`) or wrapped
//! (`{message: {role, content}, timestamp}`), depending on the log version.
//! Assistant content is an array of `thinking` / `text` / `tool_use` blocks.
//!
//! Tool results arrive later in the stream as user-role records whose
//! content is a `tool_result` array. Each `tool_use` block is paired by
//! scanning forward until the first user record that is not a tool result
//! (which closes the pairing window). Absorbed results never render as user
//! turns; a result with no preceding assistant turn is an orphan and must
//! still be shown.

use std::collections::BTreeSet;

use serde_json::Value;

use crate::detect::ThreadFormat;
use crate::error::ThreadError;
use crate::model::{
    Edit, EditGroup, MessageKind, NormalizedThread, PlanItem, PlanStatus, PlanUpdate,
    ThreadMessage, ToolInvocation, ToolRender, ToolStatus,
};
use crate::normalize::{
    assign_ids, find_tool_result, flatten_result_content, is_tool_result_content,
};

pub fn normalize(payload: &Value) -> Result<NormalizedThread, ThreadError> {
    let Some(records) = payload
        .get("messages")
        .or_else(|| payload.get("requests"))
        .and_then(Value::as_array)
    else {
        return Err(ThreadError::malformed(
            ThreadFormat::Claude,
            "missing messages array",
        ));
    };

    let mut messages = Vec::new();
    let mut models = BTreeSet::new();
    // Tracks whether an assistant turn is open; a tool-result user record
    // with no open assistant turn is an orphan.
    let mut assistant_open = false;

    for (index, record) in records.iter().enumerate() {
        let message = record.get("message").unwrap_or(record);
        let role = message.get("role").and_then(Value::as_str);

        match role {
            Some("assistant") => {
                assistant_open = true;
                if let Some(model) = message.get("model").and_then(Value::as_str) {
                    models.insert(model.to_string());
                }
                emit_assistant_blocks(message, records, index, &mut messages);
            }
            Some("user") => {
                let Some(content) = message.get("content") else {
                    continue;
                };
                if is_tool_result_content(content) {
                    if !assistant_open {
                        emit_orphan_result(content, &mut messages);
                    }
                    // Absorbed results were already paired by forward scan.
                    continue;
                }

                assistant_open = false;
                let text = user_text(content);
                if !text.trim().is_empty() {
                    messages.push(ThreadMessage::unnumbered(MessageKind::User {
                        text,
                        attachments: Vec::new(),
                    }));
                }
            }
            _ => {}
        }
    }

    assign_ids(&mut messages);

    Ok(NormalizedThread {
        session_id: payload
            .get("sessionId")
            .and_then(Value::as_str)
            .map(String::from),
        title: None,
        created_at: None,
        requester: None,
        responder: None,
        messages,
        metadata: serde_json::json!({
            "format": "claude",
            "models": models.into_iter().collect::<Vec<_>>(),
        }),
    })
}

fn user_text(content: &Value) -> String {
    if let Some(s) = content.as_str() {
        return s.to_string();
    }
    flatten_result_content(content)
}

fn emit_assistant_blocks(
    message: &Value,
    records: &[Value],
    index: usize,
    messages: &mut Vec<ThreadMessage>,
) {
    let Some(blocks) = message.get("content").and_then(Value::as_array) else {
        return;
    };

    for block in blocks {
        match block.get("type").and_then(Value::as_str) {
            Some("thinking") => {
                if let Some(text) = block.get("thinking").and_then(Value::as_str)
                    && !text.trim().is_empty()
                {
                    messages.push(ThreadMessage::unnumbered(MessageKind::Thinking {
                        text: text.to_string(),
                        subject: None,
                    }));
                }
            }
            Some("text") => {
                if let Some(text) = block.get("text").and_then(Value::as_str)
                    && !text.trim().is_empty()
                {
                    messages.push(ThreadMessage::unnumbered(MessageKind::AssistantText {
                        text: text.to_string(),
                        inline_refs: Vec::new(),
                    }));
                }
            }
            Some("tool_use") => {
                // Results follow the call in later records; scan forward
                // from the record after this one.
                let result = block
                    .get("id")
                    .and_then(Value::as_str)
                    .and_then(|id| find_tool_result(id, records, index + 1));
                emit_tool_use(block, result, messages);
            }
            _ => {}
        }
    }
}

fn emit_tool_use(block: &Value, result: Option<String>, messages: &mut Vec<ThreadMessage>) {
    let name = block.get("name").and_then(Value::as_str).unwrap_or("");
    let empty = Value::Object(serde_json::Map::new());
    let input = block.get("input").unwrap_or(&empty);
    let status = if result.is_some() {
        ToolStatus::Completed
    } else {
        ToolStatus::Unknown
    };

    let has_command = input.get("command").and_then(Value::as_str).is_some();

    match name {
        "Bash" | "run_command" => {
            messages.push(shell_message(name, input, status, result));
        }
        "Read" => {
            messages.push(ThreadMessage::unnumbered(MessageKind::ToolCall(
                ToolInvocation {
                    tool_id: name.to_string(),
                    status,
                    render: ToolRender::ReadFile {
                        path: input
                            .get("file_path")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                    },
                    result,
                },
            )));
        }
        "Edit" => {
            messages.push(ThreadMessage::unnumbered(MessageKind::Edit(EditGroup {
                file_path: input
                    .get("file_path")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                edits: vec![Edit {
                    range: None,
                    old_text: input
                        .get("old_string")
                        .and_then(Value::as_str)
                        .map(String::from),
                    new_text: input
                        .get("new_string")
                        .and_then(Value::as_str)
                        .map(String::from),
                }],
            })));
        }
        "TodoWrite" => {
            let items = input
                .get("todos")
                .and_then(Value::as_array)
                .map(|todos| {
                    todos
                        .iter()
                        .filter_map(|todo| {
                            let step = todo.get("content").and_then(Value::as_str)?.to_string();
                            let status = todo
                                .get("status")
                                .and_then(Value::as_str)
                                .map(PlanStatus::from_provider)
                                .unwrap_or(PlanStatus::Pending);
                            Some(PlanItem { step, status })
                        })
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();
            if !items.is_empty() {
                messages.push(ThreadMessage::unnumbered(MessageKind::Plan(PlanUpdate {
                    items,
                })));
            }
        }
        "Grep" => {
            let pattern = input
                .get("pattern")
                .and_then(Value::as_str)
                .unwrap_or_default();
            messages.push(ThreadMessage::unnumbered(MessageKind::ToolCall(
                ToolInvocation {
                    tool_id: name.to_string(),
                    status,
                    render: ToolRender::Shell {
                        command: format!("grep {pattern}"),
                        description: None,
                    },
                    result,
                },
            )));
        }
        // Some tool versions rename the shell tool; anything carrying a
        // command argument still renders as a shell block.
        _ if has_command => {
            messages.push(shell_message(name, input, status, result));
        }
        _ => {
            messages.push(ThreadMessage::unnumbered(MessageKind::ToolCall(
                ToolInvocation {
                    tool_id: name.to_string(),
                    status,
                    render: ToolRender::Generic {
                        display_args: input.clone(),
                        description: None,
                    },
                    result,
                },
            )));
        }
    }
}

fn shell_message(
    name: &str,
    input: &Value,
    status: ToolStatus,
    result: Option<String>,
) -> ThreadMessage {
    ThreadMessage::unnumbered(MessageKind::ToolCall(ToolInvocation {
        tool_id: name.to_string(),
        status,
        render: ToolRender::Shell {
            command: input
                .get("command")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            description: input
                .get("description")
                .and_then(Value::as_str)
                .map(String::from),
        },
        result,
    }))
}

fn emit_orphan_result(content: &Value, messages: &mut Vec<ThreadMessage>) {
    let outputs = content
        .as_array()
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| entry.get("content").map(flatten_result_content))
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    if outputs.is_empty() {
        return;
    }
    messages.push(ThreadMessage::unnumbered(MessageKind::OrphanToolResult {
        outputs,
    }));
}
