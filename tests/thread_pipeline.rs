//! End-to-end pipeline checks across detection, normalization and grouping.

use coding_agent_threads::connectors::codex::CodexConnector;
use coding_agent_threads::connectors::copilot::CopilotConnector;
use coding_agent_threads::connectors::gemini::GeminiConnector;
use coding_agent_threads::connectors::{Connector, ScanContext, list_all_sessions};
use coding_agent_threads::model::{MessageKind, TurnEntry};
use coding_agent_threads::{ThreadError, ThreadFormat, detect, group_turns, load_thread, normalize_auto};
use serde_json::{Value, json};
use std::fs;
use tempfile::TempDir;

fn copilot_session() -> Value {
    json!({
        "version": 3,
        "sessionId": "sess-e2e",
        "creationDate": 1700000000000i64,
        "lastMessageDate": 1700000300000i64,
        "requesterUsername": "dev",
        "responderUsername": "assistant",
        "requests": [{
            "requestId": "r1",
            "message": { "text": "fix the failing test" },
            "variableData": { "variables": [
                { "kind": "file", "name": "parser.rs", "value": { "fsPath": "/app/src/parser.rs" } }
            ]},
            "response": [
                { "value": "Reproducing first." },
                { "kind": "toolInvocationSerialized", "toolId": "run_in_terminal",
                  "toolCallId": "t1", "isComplete": true }
            ],
            "result": { "metadata": {
                "toolCallRounds": [
                    { "toolCalls": [{ "id": "c1", "arguments": "{\"command\":\"cargo test parser\"}" }] }
                ],
                "toolCallResults": {
                    "c1": { "content": [{ "value": "1 test failed" }] }
                }
            }},
            "modelId": "gpt-5"
        }]
    })
}

#[test]
fn copilot_store_to_grouped_thread() {
    let dir = TempDir::new().unwrap();
    let sessions_dir = dir.path().join("globalStorage/emptyWindowChatSessions");
    fs::create_dir_all(&sessions_dir).unwrap();
    fs::write(
        sessions_dir.join("sess.json"),
        serde_json::to_string(&copilot_session()).unwrap(),
    )
    .unwrap();

    let connector = CopilotConnector::new();
    let sessions = connector
        .list_sessions(&ScanContext::rooted(dir.path()))
        .unwrap();
    assert_eq!(sessions.len(), 1);

    let thread = load_thread(&connector, &sessions[0]).unwrap();
    assert_eq!(thread.requester.as_deref(), Some("dev"));
    assert_eq!(thread.messages.len(), 3);

    // One user entry, one assistant group holding prose + tool call.
    let turns = group_turns(&thread.messages);
    assert_eq!(turns.len(), 2);
    assert!(matches!(&turns[0], TurnEntry::Message(m)
        if matches!(&m.kind, MessageKind::User { .. })));
    match &turns[1] {
        TurnEntry::AssistantGroup(group) => assert_eq!(group.len(), 2),
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn gemini_store_to_thread() {
    let dir = TempDir::new().unwrap();
    let chats = dir.path().join("hash123/chats");
    fs::create_dir_all(&chats).unwrap();
    fs::write(
        chats.join("s1.json"),
        serde_json::to_string(&json!({
            "sessionId": "g-e2e",
            "startTime": "2025-10-01T10:00:00Z",
            "messages": [
                { "id": "u1", "type": "user", "content": "list the src dir" },
                { "id": "a1", "type": "gemini", "content": "Here it is.",
                  "thoughts": [{ "subject": "Planning", "description": "One listing will do." }],
                  "toolCalls": [{
                      "id": "tc1", "name": "list_directory",
                      "args": { "dir_path": "src" },
                      "status": "success",
                      "result": [
                          { "functionResponse": { "response": { "output": "lib.rs" } } },
                          { "functionResponse": { "response": { "output": "model.rs" } } }
                      ]
                  }],
                  "model": "gemini-2.5-pro" }
            ]
        }))
        .unwrap(),
    )
    .unwrap();

    let connector = GeminiConnector::new();
    let sessions = connector
        .list_sessions(&ScanContext::rooted(dir.path()))
        .unwrap();
    let thread = load_thread(&connector, &sessions[0]).unwrap();

    assert_eq!(thread.messages.len(), 4);
    assert!(matches!(&thread.messages[1].kind, MessageKind::Thinking { subject: Some(s), .. }
        if s == "Planning"));
    match &thread.messages[3].kind {
        MessageKind::ToolCall(inv) => {
            assert_eq!(inv.result.as_deref(), Some("lib.rs\nmodel.rs"));
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn detection_routes_loose_payloads() {
    assert_eq!(detect(&copilot_session()), Some(ThreadFormat::Copilot));

    let claude_payload = json!({
        "messages": [
            { "role": "user", "content": "hi" },
            { "role": "assistant", "content": [{ "type": "text", "text": "hello" }] }
        ]
    });
    assert_eq!(detect(&claude_payload), Some(ThreadFormat::Claude));

    let thread = normalize_auto(&claude_payload).unwrap();
    assert_eq!(thread.messages.len(), 2);
}

#[test]
fn unrecognized_payload_is_typed_failure_not_crash() {
    assert_eq!(detect(&json!({})), None);
    assert!(matches!(
        normalize_auto(&json!({})).unwrap_err(),
        ThreadError::UnrecognizedFormat { .. }
    ));
    assert!(matches!(
        normalize_auto(&json!([1, 2, 3])).unwrap_err(),
        ThreadError::UnrecognizedFormat { .. }
    ));
}

#[test]
fn orphan_tool_result_survives_grouping() {
    let payload = json!({
        "messages": [
            { "role": "user",
              "content": [{ "type": "tool_result", "tool_use_id": "old", "content": "leftover output" }] },
            { "role": "user", "content": "what was that?" },
            { "role": "assistant", "content": [{ "type": "text", "text": "A stale result." }] }
        ]
    });

    let thread = normalize_auto(&payload).unwrap();
    let turns = group_turns(&thread.messages);
    assert_eq!(turns.len(), 3);
    assert!(matches!(&turns[0], TurnEntry::Message(m)
        if matches!(&m.kind, MessageKind::OrphanToolResult { .. })));
}

#[test]
fn multi_store_discovery_merges_and_sorts() {
    let codex_dir = TempDir::new().unwrap();
    fs::write(
        codex_dir.path().join("old.jsonl"),
        r#"{"type":"event_msg","timestamp":"2025-01-01T00:00:00Z","payload":{"type":"user_message","message":"older session"}}"#,
    )
    .unwrap();

    let gemini_dir = TempDir::new().unwrap();
    let chats = gemini_dir.path().join("hash/chats");
    fs::create_dir_all(&chats).unwrap();
    fs::write(
        chats.join("newer.json"),
        serde_json::to_string(&json!({
            "sessionId": "g-new",
            "lastUpdated": "2025-06-01T00:00:00Z",
            "messages": [{ "type": "user", "content": "newer session" }]
        }))
        .unwrap(),
    )
    .unwrap();

    let codex = CodexConnector::new();
    let gemini = GeminiConnector::new();
    let sessions = list_all_sessions(vec![
        (
            &codex as &(dyn Connector + Sync),
            ScanContext::rooted(codex_dir.path()),
        ),
        (&gemini, ScanContext::rooted(gemini_dir.path())),
    ]);

    assert_eq!(sessions.len(), 2);
    // Newest first.
    assert_eq!(sessions[0].session_id, "g-new");
}

#[test]
fn normalize_auto_is_idempotent_across_formats() {
    let payloads = [
        copilot_session(),
        json!({ "messages": [
            { "role": "user", "content": "q" },
            { "role": "assistant", "content": [
                { "type": "tool_use", "name": "Bash", "id": "t", "input": { "command": "ls" } }
            ]},
            { "role": "user", "content": [
                { "type": "tool_result", "tool_use_id": "t", "content": "files" }
            ]}
        ]}),
    ];
    for payload in payloads {
        assert_eq!(
            normalize_auto(&payload).unwrap(),
            normalize_auto(&payload).unwrap()
        );
    }
}
