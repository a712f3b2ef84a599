//! Normalizer for the editor-extension tool-chat format.
//!
//! The payload is a single JSON document with a `requests` array. Each
//! request pairs one user turn with a `response` array of heterogeneous
//! items: plain text chunks, inline file references, thinking blocks, edit
//! groups, and serialized tool invocations.
//!
//! Tool correlation is positional, not id-based: the serialized invocation
//! in `response[]` does not reliably carry a cross-reference to its round in
//! `result.metadata.toolCallRounds[]`, so a running counter of tool-shaped
//! items seen so far is used as the index into the rounds array. The counter
//! tracks tool items only, never overall item position.

use std::collections::BTreeSet;

use serde_json::Value;

use crate::detect::ThreadFormat;
use crate::error::ThreadError;
use crate::model::{
    Attachment, AttachmentKind, Edit, EditGroup, InlineRef, LineRange, MessageKind,
    NormalizedThread, PlanItem, PlanStatus, PlanUpdate, ThreadMessage, ToolInvocation, ToolRender,
    ToolStatus,
};
use crate::normalize::{assign_ids, flush_assistant_text, parse_args_json};

/// Streaming artifact the extension emits around fenced code blocks; never
/// user-visible text.
const CODE_FENCE_ARTIFACT: &str = "\n```\n";

pub fn normalize(payload: &Value) -> Result<NormalizedThread, ThreadError> {
    let Some(requests) = payload.get("requests").and_then(Value::as_array) else {
        return Err(ThreadError::malformed(
            ThreadFormat::Copilot,
            "missing requests array",
        ));
    };

    let mut messages = Vec::new();
    let mut models = BTreeSet::new();

    for request in requests {
        emit_user_message(request, &mut messages);
        emit_response_items(request, &mut messages);

        if let Some(model) = request.get("modelId").and_then(Value::as_str) {
            models.insert(model.to_string());
        }
    }

    assign_ids(&mut messages);

    Ok(NormalizedThread {
        session_id: payload
            .get("sessionId")
            .or_else(|| payload.get("initialLocation"))
            .and_then(Value::as_str)
            .map(String::from),
        title: payload
            .get("customTitle")
            .and_then(Value::as_str)
            .map(String::from),
        created_at: payload.get("creationDate").and_then(Value::as_i64),
        requester: payload
            .get("requesterUsername")
            .and_then(Value::as_str)
            .map(String::from),
        responder: payload
            .get("responderUsername")
            .and_then(Value::as_str)
            .map(String::from),
        messages,
        metadata: serde_json::json!({
            "format": "copilot",
            "version": payload.get("version"),
            "initialLocation": payload.get("initialLocation"),
            "models": models.into_iter().collect::<Vec<_>>(),
        }),
    })
}

fn emit_user_message(request: &Value, messages: &mut Vec<ThreadMessage>) {
    let text = request
        .get("message")
        .and_then(|m| m.get("text"))
        .and_then(Value::as_str)
        .unwrap_or("");
    if text.trim().is_empty() {
        return;
    }

    let attachments = request
        .get("variableData")
        .and_then(|v| v.get("variables"))
        .and_then(Value::as_array)
        .map(|vars| vars.iter().filter_map(variable_attachment).collect())
        .unwrap_or_default();

    messages.push(ThreadMessage::unnumbered(MessageKind::User {
        text: text.to_string(),
        attachments,
    }));
}

/// Prompt variables carry attached files and images; other variable kinds
/// (selections, symbols) are prompt context, not attachments.
fn variable_attachment(variable: &Value) -> Option<Attachment> {
    let kind = match variable.get("kind").and_then(Value::as_str) {
        Some("file") => AttachmentKind::File,
        Some("image") => AttachmentKind::Image,
        _ => return None,
    };
    Some(Attachment {
        kind,
        name: variable
            .get("name")
            .and_then(Value::as_str)
            .map(String::from),
        path: variable.get("value").and_then(uri_file_path),
    })
}

fn uri_file_path(uri: &Value) -> Option<String> {
    uri.get("fsPath")
        .or_else(|| uri.get("path"))
        .and_then(Value::as_str)
        .map(String::from)
}

fn emit_response_items(request: &Value, messages: &mut Vec<ThreadMessage>) {
    let Some(items) = request.get("response").and_then(Value::as_array) else {
        return;
    };

    let rounds = request
        .get("result")
        .and_then(|r| r.get("metadata"))
        .and_then(|m| m.get("toolCallRounds"))
        .and_then(Value::as_array);
    let results = request
        .get("result")
        .and_then(|r| r.get("metadata"))
        .and_then(|m| m.get("toolCallResults"));

    let mut text = String::new();
    let mut refs: Vec<InlineRef> = Vec::new();
    // Index into toolCallRounds. Advances only when a tool-shaped item is
    // seen; overall item position would drift past interleaved text.
    let mut tool_index = 0usize;

    for item in items {
        let kind = item.get("kind").and_then(Value::as_str);

        match kind {
            Some("thinking") => {
                flush_assistant_text(messages, &mut text, &mut refs);
                if let Some(value) = item.get("value").and_then(Value::as_str)
                    && !value.trim().is_empty()
                {
                    messages.push(ThreadMessage::unnumbered(MessageKind::Thinking {
                        text: value.to_string(),
                        subject: None,
                    }));
                }
            }
            Some("inlineReference") => {
                if let Some(reference) = file_inline_ref(item) {
                    // Adjacent text and references must render as one
                    // continuous paragraph: record the badge positionally
                    // and leave a marker in the accumulated text.
                    text.push_str(&format!("[[ref:{}]]", refs.len()));
                    refs.push(reference);
                }
            }
            Some("textEditGroup") => {
                flush_assistant_text(messages, &mut text, &mut refs);
                if let Some(group) = parse_edit_group(item) {
                    messages.push(ThreadMessage::unnumbered(MessageKind::Edit(group)));
                }
            }
            Some("toolInvocationSerialized") if item.get("toolId").is_some() => {
                flush_assistant_text(messages, &mut text, &mut refs);
                let round = rounds.and_then(|r| r.get(tool_index));
                tool_index += 1;
                emit_tool_item(item, round, results, messages);
            }
            // undoStop, prepareToolInvocation, mcpServersStarting and other
            // bookkeeping kinds: flush and move on.
            Some(_) => {
                flush_assistant_text(messages, &mut text, &mut refs);
            }
            None => {
                if let Some(value) = item.get("value").and_then(Value::as_str) {
                    if value != CODE_FENCE_ARTIFACT {
                        text.push_str(value);
                    }
                } else {
                    flush_assistant_text(messages, &mut text, &mut refs);
                }
            }
        }
    }

    flush_assistant_text(messages, &mut text, &mut refs);
}

fn file_inline_ref(item: &Value) -> Option<InlineRef> {
    let reference = item.get("inlineReference")?;
    let scheme = reference
        .get("location")
        .and_then(|l| l.get("uri"))
        .and_then(|u| u.get("scheme"))
        .and_then(Value::as_str);
    if scheme != Some("file") {
        return None;
    }
    Some(InlineRef {
        name: reference
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("file")
            .to_string(),
        path: uri_file_path(reference),
    })
}

/// Edit payloads nest per extension version: either a flat edit list or an
/// array of edit arrays. Flatten both.
fn parse_edit_group(item: &Value) -> Option<EditGroup> {
    let file_path = item
        .get("uri")
        .and_then(uri_file_path)
        .unwrap_or_else(|| "Unknown file".to_string());

    let mut edits = Vec::new();
    if let Some(entries) = item.get("edits").and_then(Value::as_array) {
        for entry in entries {
            if let Some(inner) = entry.as_array() {
                for edit in inner {
                    if let Some(edit) = parse_edit(edit) {
                        edits.push(edit);
                    }
                }
            } else if let Some(edit) = parse_edit(entry) {
                edits.push(edit);
            }
        }
    }

    if edits.is_empty() {
        return None;
    }
    Some(EditGroup { file_path, edits })
}

fn parse_edit(edit: &Value) -> Option<Edit> {
    let range = edit.get("range")?;
    Some(Edit {
        range: Some(LineRange {
            start_line: range.get("startLineNumber").and_then(Value::as_i64)?,
            end_line: range.get("endLineNumber").and_then(Value::as_i64)?,
        }),
        old_text: None,
        new_text: edit.get("text").and_then(Value::as_str).map(String::from),
    })
}

fn emit_tool_item(
    item: &Value,
    round: Option<&Value>,
    results: Option<&Value>,
    messages: &mut Vec<ThreadMessage>,
) {
    let tool_id = item
        .get("toolId")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let status = if item.get("isComplete").and_then(Value::as_bool) == Some(true) {
        ToolStatus::Completed
    } else {
        ToolStatus::Running
    };

    // Rounds may carry their own thinking text; it precedes the tool block.
    let round_emits_thinking = matches!(tool_id.as_str(), "run_in_terminal" | "copilot_insertEdit");
    if round_emits_thinking
        && let Some(thinking) = round
            .and_then(|r| r.get("thinking"))
            .and_then(|t| t.get("text"))
            .and_then(Value::as_str)
        && !thinking.trim().is_empty()
    {
        messages.push(ThreadMessage::unnumbered(MessageKind::Thinking {
            text: thinking.to_string(),
            subject: None,
        }));
    }

    match tool_id.as_str() {
        "run_in_terminal" => emit_shell_calls(item, &tool_id, status, round, results, messages),
        "copilot_applyPatch" => {
            let args = round_call_args(round, 0);
            let content = args
                .get("input")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            messages.push(tool_message(ToolInvocation {
                tool_id,
                status,
                render: ToolRender::Patch { content },
                result: None,
            }));
        }
        "copilot_replaceString" => {
            for call in round_calls(round) {
                let args = parse_args_json(call.get("arguments").and_then(Value::as_str));
                messages.push(ThreadMessage::unnumbered(MessageKind::Edit(EditGroup {
                    file_path: args
                        .get("filePath")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    edits: vec![Edit {
                        range: None,
                        old_text: args
                            .get("oldString")
                            .and_then(Value::as_str)
                            .map(String::from),
                        new_text: args
                            .get("newString")
                            .and_then(Value::as_str)
                            .map(String::from),
                    }],
                })));
            }
        }
        "copilot_insertEdit" => {
            for call in round_calls(round) {
                let args = parse_args_json(call.get("arguments").and_then(Value::as_str));
                messages.push(ThreadMessage::unnumbered(MessageKind::Edit(EditGroup {
                    file_path: args
                        .get("filePath")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    edits: vec![Edit {
                        range: None,
                        old_text: None,
                        new_text: args.get("code").and_then(Value::as_str).map(String::from),
                    }],
                })));
            }
        }
        "manage_todo_list" => {
            if let Some(plan) = todo_list_plan(item) {
                messages.push(ThreadMessage::unnumbered(MessageKind::Plan(plan)));
            } else {
                // Todo tool without the expected list payload: show it raw.
                messages.push(tool_message(ToolInvocation {
                    tool_id,
                    status,
                    render: ToolRender::Generic {
                        display_args: round_call_args(round, 0),
                        description: message_value(item.get("invocationMessage")),
                    },
                    result: None,
                }));
            }
        }
        "copilot_readFile" => {
            // A single read round may batch several file reads; each call is
            // its own read block, never merged.
            let calls = round_calls(round);
            if calls.is_empty() {
                let path = item
                    .get("toolSpecificData")
                    .and_then(|d| d.get("file"))
                    .and_then(|f| f.get("uri"))
                    .and_then(uri_file_path)
                    .unwrap_or_default();
                messages.push(tool_message(ToolInvocation {
                    tool_id,
                    status,
                    render: ToolRender::ReadFile { path },
                    result: None,
                }));
                return;
            }
            for call in calls {
                let args = parse_args_json(call.get("arguments").and_then(Value::as_str));
                messages.push(tool_message(ToolInvocation {
                    tool_id: tool_id.clone(),
                    status,
                    render: ToolRender::ReadFile {
                        path: args
                            .get("filePath")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                    },
                    result: call_result(results, call),
                }));
            }
        }
        "copilot_findTextInFiles" => {
            let result = item
                .get("resultDetails")
                .and_then(Value::as_array)
                .map(|details| {
                    details
                        .iter()
                        .filter_map(|d| d.get("uri").and_then(uri_file_path))
                        .collect::<Vec<_>>()
                        .join("\n")
                })
                .filter(|s| !s.is_empty());
            messages.push(tool_message(ToolInvocation {
                tool_id,
                status,
                render: ToolRender::Shell {
                    command: message_value(item.get("pastTenseMessage")).unwrap_or_default(),
                    description: None,
                },
                result,
            }));
        }
        "copilot_findFiles" => {
            messages.push(tool_message(ToolInvocation {
                tool_id,
                status,
                render: ToolRender::Shell {
                    command: message_value(item.get("pastTenseMessage"))
                        .unwrap_or_else(|| "glob search".to_string()),
                    description: None,
                },
                result: None,
            }));
        }
        _ if is_mcp_tool(item) => {
            let details = item.get("resultDetails");
            let result = details
                .and_then(|d| d.get("output"))
                .and_then(Value::as_array)
                .map(|outputs| {
                    outputs
                        .iter()
                        .filter_map(|o| o.get("value").and_then(Value::as_str))
                        .collect::<Vec<_>>()
                        .join("\n")
                })
                .filter(|s| !s.is_empty());
            messages.push(tool_message(ToolInvocation {
                tool_id: tool_id.clone(),
                status,
                render: ToolRender::Mcp {
                    server: item
                        .get("source")
                        .and_then(|s| s.get("label"))
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    tool: message_value(item.get("pastTenseMessage")).unwrap_or(tool_id),
                    input: details
                        .and_then(|d| d.get("input"))
                        .and_then(Value::as_str)
                        .map(String::from),
                },
                result,
            }));
        }
        _ => {
            let display_args = round_call_args(round, 0);
            messages.push(tool_message(ToolInvocation {
                tool_id,
                status,
                render: ToolRender::Generic {
                    display_args,
                    description: message_value(item.get("invocationMessage"))
                        .or_else(|| message_value(item.get("pastTenseMessage"))),
                },
                result: None,
            }));
        }
    }
}

fn emit_shell_calls(
    item: &Value,
    tool_id: &str,
    status: ToolStatus,
    round: Option<&Value>,
    results: Option<&Value>,
    messages: &mut Vec<ThreadMessage>,
) {
    let calls = round_calls(round);
    if calls.is_empty() {
        // No round matched; fall back to the command the invocation itself
        // recorded rather than dropping the tool call.
        let command = item
            .get("toolSpecificData")
            .and_then(|d| d.get("commandLine"))
            .and_then(|c| c.get("toolEdited").or_else(|| c.get("original")))
            .and_then(Value::as_str)
            .map(String::from)
            .or_else(|| message_value(item.get("invocationMessage")))
            .unwrap_or_default();
        messages.push(tool_message(ToolInvocation {
            tool_id: tool_id.to_string(),
            status,
            render: ToolRender::Shell {
                command,
                description: None,
            },
            result: None,
        }));
        return;
    }

    for call in calls {
        let args = parse_args_json(call.get("arguments").and_then(Value::as_str));
        messages.push(tool_message(ToolInvocation {
            tool_id: tool_id.to_string(),
            status,
            render: ToolRender::Shell {
                command: args
                    .get("command")
                    .and_then(Value::as_str)
                    .unwrap_or("Unknown command executed in terminal")
                    .to_string(),
                description: None,
            },
            result: call_result(results, call),
        }));
    }
}

fn tool_message(invocation: ToolInvocation) -> ThreadMessage {
    ThreadMessage::unnumbered(MessageKind::ToolCall(invocation))
}

fn round_calls(round: Option<&Value>) -> Vec<&Value> {
    round
        .and_then(|r| r.get("toolCalls"))
        .and_then(Value::as_array)
        .map(|calls| calls.iter().collect())
        .unwrap_or_default()
}

fn round_call_args(round: Option<&Value>, index: usize) -> Value {
    let raw = round
        .and_then(|r| r.get("toolCalls"))
        .and_then(Value::as_array)
        .and_then(|calls| calls.get(index))
        .and_then(|c| c.get("arguments"))
        .and_then(Value::as_str);
    parse_args_json(raw)
}

/// Resolve one round call's output via the per-request results map.
fn call_result(results: Option<&Value>, call: &Value) -> Option<String> {
    let id = call.get("id").and_then(Value::as_str)?;
    let content = results?.get(id)?.get("content")?.as_array()?;
    let joined = content
        .iter()
        .filter_map(|c| c.get("value").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join("\n");
    if joined.is_empty() { None } else { Some(joined) }
}

/// Invocation messages are either a bare string or `{ value }`.
fn message_value(message: Option<&Value>) -> Option<String> {
    let message = message?;
    if let Some(s) = message.as_str() {
        return Some(s.to_string());
    }
    message
        .get("value")
        .and_then(Value::as_str)
        .map(String::from)
}

fn is_mcp_tool(item: &Value) -> bool {
    item.get("source")
        .and_then(|s| s.get("type"))
        .and_then(Value::as_str)
        == Some("mcp")
}

fn todo_list_plan(item: &Value) -> Option<PlanUpdate> {
    let data = item.get("toolSpecificData")?;
    if data.get("kind").and_then(Value::as_str) != Some("todoList") {
        return None;
    }
    let items = data
        .get("todoList")?
        .as_array()?
        .iter()
        .filter_map(|todo| {
            let step = todo.get("title").and_then(Value::as_str)?.to_string();
            let status = todo
                .get("status")
                .and_then(Value::as_str)
                .map(PlanStatus::from_provider)
                .unwrap_or(PlanStatus::Pending);
            Some(PlanItem { step, status })
        })
        .collect::<Vec<_>>();
    Some(PlanUpdate { items })
}
