//! Normalizer for the tool-augmented-session format.
//!
//! Assistant records carry optional `thoughts[]` (subject + description
//! pairs) and a `toolCalls[]` array discriminated by `name`. Tool output is
//! streamed as an array of response fragments rather than one string, so
//! fragments are concatenated with newlines to form the display output.

use std::collections::BTreeSet;

use serde_json::Value;

use crate::detect::ThreadFormat;
use crate::error::ThreadError;
use crate::model::{
    Edit, EditGroup, MessageKind, NormalizedThread, PlanItem, PlanStatus, PlanUpdate,
    ThreadMessage, ToolInvocation, ToolRender, ToolStatus,
};
use crate::normalize::assign_ids;
use crate::normalize::codex::parse_rfc3339_millis;

pub fn normalize(payload: &Value) -> Result<NormalizedThread, ThreadError> {
    let Some(records) = payload.get("messages").and_then(Value::as_array) else {
        return Err(ThreadError::malformed(
            ThreadFormat::Gemini,
            "missing messages array",
        ));
    };

    let mut messages = Vec::new();
    let mut models = BTreeSet::new();

    for record in records {
        match record.get("type").and_then(Value::as_str) {
            Some("user") => {
                let text = record.get("content").and_then(Value::as_str).unwrap_or("");
                if !text.trim().is_empty() {
                    messages.push(ThreadMessage::unnumbered(MessageKind::User {
                        text: text.to_string(),
                        attachments: Vec::new(),
                    }));
                }
            }
            Some("gemini") => {
                emit_assistant_record(record, &mut messages);
                if let Some(model) = record.get("model").and_then(Value::as_str) {
                    models.insert(model.to_string());
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
        created_at: payload
            .get("startTime")
            .and_then(parse_rfc3339_millis),
        requester: None,
        responder: None,
        messages,
        metadata: serde_json::json!({
            "format": "gemini",
            "lastUpdated": payload.get("lastUpdated"),
            "models": models.into_iter().collect::<Vec<_>>(),
        }),
    })
}

fn emit_assistant_record(record: &Value, messages: &mut Vec<ThreadMessage>) {
    if let Some(thoughts) = record.get("thoughts").and_then(Value::as_array) {
        for thought in thoughts {
            let text = thought
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("");
            if text.trim().is_empty() {
                continue;
            }
            messages.push(ThreadMessage::unnumbered(MessageKind::Thinking {
                text: text.to_string(),
                subject: thought
                    .get("subject")
                    .and_then(Value::as_str)
                    .map(String::from),
            }));
        }
    }

    if let Some(content) = record.get("content").and_then(Value::as_str)
        && !content.trim().is_empty()
    {
        messages.push(ThreadMessage::unnumbered(MessageKind::AssistantText {
            text: content.to_string(),
            inline_refs: Vec::new(),
        }));
    }

    if let Some(tool_calls) = record.get("toolCalls").and_then(Value::as_array) {
        for call in tool_calls {
            emit_tool_call(call, messages);
        }
    }
}

fn emit_tool_call(call: &Value, messages: &mut Vec<ThreadMessage>) {
    let name = call.get("name").and_then(Value::as_str).unwrap_or("");
    let args = call.get("args").unwrap_or(&Value::Null);
    let status = match call.get("status").and_then(Value::as_str) {
        Some("success") | Some("completed") => ToolStatus::Completed,
        Some("error") | Some("failed") => ToolStatus::Failed,
        Some(_) => ToolStatus::Running,
        None => ToolStatus::Unknown,
    };

    match name {
        "write_file" => {
            messages.push(ThreadMessage::unnumbered(MessageKind::Edit(EditGroup {
                file_path: arg_str(args, "file_path"),
                edits: vec![Edit {
                    range: None,
                    old_text: None,
                    new_text: args.get("content").and_then(Value::as_str).map(String::from),
                }],
            })));
        }
        "replace" => {
            messages.push(ThreadMessage::unnumbered(MessageKind::Edit(EditGroup {
                file_path: arg_str(args, "file_path"),
                edits: vec![Edit {
                    range: None,
                    old_text: args
                        .get("old_string")
                        .and_then(Value::as_str)
                        .map(String::from),
                    new_text: args
                        .get("new_string")
                        .and_then(Value::as_str)
                        .map(String::from),
                }],
            })));
        }
        "read_file" => {
            messages.push(tool_message(ToolInvocation {
                tool_id: name.to_string(),
                status,
                render: ToolRender::ReadFile {
                    path: arg_str(args, "file_path"),
                },
                result: joined_result(call),
            }));
        }
        "list_directory" => {
            messages.push(tool_message(ToolInvocation {
                tool_id: name.to_string(),
                status,
                render: ToolRender::Shell {
                    command: format!("List {}", arg_str(args, "dir_path")),
                    description: None,
                },
                result: joined_result(call),
            }));
        }
        "run_shell_command" => {
            messages.push(tool_message(ToolInvocation {
                tool_id: name.to_string(),
                status,
                render: ToolRender::Shell {
                    command: arg_str(args, "command"),
                    description: args
                        .get("description")
                        .and_then(Value::as_str)
                        .map(String::from),
                },
                result: joined_result(call),
            }));
        }
        "write_todos" => {
            let items = args
                .get("todos")
                .and_then(Value::as_array)
                .map(|todos| {
                    todos
                        .iter()
                        .filter_map(|todo| {
                            let step = todo
                                .get("description")
                                .and_then(Value::as_str)?
                                .to_string();
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
        _ => {
            messages.push(tool_message(ToolInvocation {
                tool_id: if name.is_empty() {
                    call.get("displayName")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string()
                } else {
                    name.to_string()
                },
                status,
                render: ToolRender::Generic {
                    display_args: args.clone(),
                    description: call
                        .get("description")
                        .and_then(Value::as_str)
                        .map(String::from),
                },
                result: None,
            }));
        }
    }
}

fn tool_message(invocation: ToolInvocation) -> ThreadMessage {
    ThreadMessage::unnumbered(MessageKind::ToolCall(invocation))
}

fn arg_str(args: &Value, key: &str) -> String {
    args.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Join streamed result fragments into one display string. Each fragment
/// carries `functionResponse.response.output`, or `error` when the call
/// failed; either way the fragment contributes a line.
fn joined_result(call: &Value) -> Option<String> {
    let fragments = call.get("result").and_then(Value::as_array)?;
    let joined = fragments
        .iter()
        .filter_map(|fragment| {
            let response = fragment.get("functionResponse")?.get("response")?;
            response
                .get("output")
                .and_then(Value::as_str)
                .or_else(|| response.get("error").and_then(Value::as_str))
        })
        .collect::<Vec<_>>()
        .join("\n");
    if joined.is_empty() { None } else { Some(joined) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn shell_call(command: &str, fragments: &[(&str, bool)]) -> Value {
        let result: Vec<Value> = fragments
            .iter()
            .map(|(text, is_error)| {
                let key = if *is_error { "error" } else { "output" };
                json!({ "functionResponse": { "response": { key: text } } })
            })
            .collect();
        json!({
            "id": "call-1",
            "name": "run_shell_command",
            "args": { "command": command, "description": "run it" },
            "result": result,
            "status": "success"
        })
    }

    #[test]
    fn missing_messages_is_malformed() {
        assert!(matches!(
            normalize(&json!({})).unwrap_err(),
            ThreadError::MalformedPayload { .. }
        ));
    }

    #[test]
    fn thoughts_emit_thinking_with_subject() {
        let t = normalize(&json!({
            "messages": [{
                "id": "a1",
                "type": "gemini",
                "content": "Done.",
                "thoughts": [
                    { "subject": "Exploring the repo", "description": "I should list files first." }
                ],
                "model": "gemini-2.5-pro"
            }]
        }))
        .unwrap();

        assert!(matches!(
            &t.messages[0].kind,
            MessageKind::Thinking { text, subject: Some(s) }
                if text == "I should list files first." && s == "Exploring the repo"
        ));
        assert!(matches!(&t.messages[1].kind, MessageKind::AssistantText { .. }));
        assert_eq!(t.metadata["models"][0], "gemini-2.5-pro");
    }

    #[test]
    fn result_fragments_join_with_newlines() {
        let t = normalize(&json!({
            "messages": [{
                "type": "gemini",
                "content": "",
                "toolCalls": [shell_call("ls", &[("part one", false), ("part two", false)])]
            }]
        }))
        .unwrap();

        match &t.messages[0].kind {
            MessageKind::ToolCall(inv) => {
                assert_eq!(inv.result.as_deref(), Some("part one\npart two"));
                assert!(matches!(
                    &inv.render,
                    ToolRender::Shell { command, description: Some(d) }
                        if command == "ls" && d == "run it"
                ));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn error_fragments_contribute_output() {
        let t = normalize(&json!({
            "messages": [{
                "type": "gemini",
                "toolCalls": [shell_call("false", &[("command failed", true)])]
            }]
        }))
        .unwrap();

        match &t.messages[0].kind {
            MessageKind::ToolCall(inv) => {
                assert_eq!(inv.result.as_deref(), Some("command failed"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn replace_maps_old_and_new_strings() {
        let t = normalize(&json!({
            "messages": [{
                "type": "gemini",
                "toolCalls": [{
                    "name": "replace",
                    "args": { "file_path": "src/lib.rs", "old_string": "foo", "new_string": "bar" },
                    "result": []
                }]
            }]
        }))
        .unwrap();

        match &t.messages[0].kind {
            MessageKind::Edit(group) => {
                assert_eq!(group.file_path, "src/lib.rs");
                assert_eq!(group.edits[0].old_text.as_deref(), Some("foo"));
                assert_eq!(group.edits[0].new_text.as_deref(), Some("bar"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn todos_map_to_canonical_statuses() {
        let t = normalize(&json!({
            "messages": [{
                "type": "gemini",
                "toolCalls": [{
                    "name": "write_todos",
                    "args": { "todos": [
                        { "description": "survey", "status": "completed" },
                        { "description": "refactor", "status": "in_progress" },
                        { "description": "document", "status": "pending" }
                    ]},
                    "result": []
                }]
            }]
        }))
        .unwrap();

        match &t.messages[0].kind {
            MessageKind::Plan(plan) => {
                assert_eq!(plan.items.len(), 3);
                assert_eq!(plan.items[0].status, PlanStatus::Completed);
                assert_eq!(plan.items[1].status, PlanStatus::InProgress);
                assert_eq!(plan.items[2].status, PlanStatus::Pending);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn unknown_tool_uses_display_metadata() {
        let t = normalize(&json!({
            "messages": [{
                "type": "gemini",
                "toolCalls": [{
                    "name": "google_web_search",
                    "args": { "query": "rust serde" },
                    "displayName": "GoogleSearch",
                    "description": "Search the web",
                    "status": "success",
                    "result": []
                }]
            }]
        }))
        .unwrap();

        match &t.messages[0].kind {
            MessageKind::ToolCall(inv) => {
                assert_eq!(inv.tool_id, "google_web_search");
                assert_eq!(inv.status, ToolStatus::Completed);
                assert!(matches!(
                    &inv.render,
                    ToolRender::Generic { description: Some(d), .. } if d == "Search the web"
                ));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn user_and_session_fields() {
        let t = normalize(&json!({
            "sessionId": "g-1",
            "startTime": "2025-10-01T12:00:00Z",
            "messages": [
                { "id": "u1", "type": "user", "content": "make it faster" }
            ]
        }))
        .unwrap();

        assert_eq!(t.session_id.as_deref(), Some("g-1"));
        assert!(t.created_at.is_some());
        assert!(matches!(&t.messages[0].kind, MessageKind::User { text, .. } if text == "make it faster"));
    }
}
