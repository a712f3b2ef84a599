use coding_agent_threads::connectors::cursor::CursorConnector;
use coding_agent_threads::connectors::{Connector, ScanContext};
use coding_agent_threads::load_thread;
use coding_agent_threads::model::{MessageKind, ToolRender};
use rusqlite::Connection;
use serde_json::{Value, json};
use std::fs;
use std::path::Path;
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

#[test]
fn composer_store_round_trips_to_thread() {
    let dir = TempDir::new().unwrap();
    setup_workspace_db(
        dir.path(),
        "ws1",
        &json!({ "allComposers": [{
            "composerId": "comp-9",
            "name": "Speed up CI",
            "createdAt": 1700000000000i64,
            "lastUpdatedAt": 1700000600000i64
        }]}),
    );
    setup_global_db(
        dir.path(),
        &[
            (
                "bubbleId:comp-9:b1",
                json!({ "type": 1, "bubbleId": "b1", "text": "why is CI slow?",
                        "createdAt": "2023-11-14T22:13:20Z" }),
            ),
            (
                "bubbleId:comp-9:b2",
                json!({ "type": 2, "bubbleId": "b2", "text": "Checking the cache step.",
                        "createdAt": "2023-11-14T22:13:25Z" }),
            ),
            (
                "bubbleId:comp-9:b3",
                json!({ "type": 2, "bubbleId": "b3", "text": "",
                        "createdAt": "2023-11-14T22:13:30Z",
                        "toolFormerData": {
                            "name": "run_terminal_command",
                            "tool": 12,
                            "status": "completed",
                            "params": "{\"command\":\"time cargo build\"}",
                            "result": "{\"output\":\"real 4m2s\"}"
                        }}),
            ),
        ],
    );

    let connector = CursorConnector::new();
    let sessions = connector
        .list_sessions(&ScanContext::rooted(dir.path()))
        .unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].message_count_hint, 3);

    let thread = load_thread(&connector, &sessions[0]).unwrap();
    assert_eq!(thread.session_id.as_deref(), Some("comp-9"));
    assert_eq!(thread.title.as_deref(), Some("Speed up CI"));
    assert_eq!(thread.messages.len(), 3);

    assert!(matches!(
        &thread.messages[0].kind,
        MessageKind::User { text, .. } if text == "why is CI slow?"
    ));
    assert!(matches!(&thread.messages[1].kind, MessageKind::AssistantText { .. }));
    match &thread.messages[2].kind {
        MessageKind::ToolCall(inv) => {
            assert!(matches!(
                &inv.render,
                ToolRender::Shell { command, .. } if command == "time cargo build"
            ));
            assert_eq!(inv.result.as_deref(), Some("real 4m2s"));
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn empty_composer_never_listed() {
    let dir = TempDir::new().unwrap();
    setup_workspace_db(
        dir.path(),
        "ws1",
        &json!({ "allComposers": [
            { "composerId": "comp-real", "name": "Real", "createdAt": 1, "lastUpdatedAt": 2 },
            { "composerId": "comp-empty", "name": "Empty", "createdAt": 1, "lastUpdatedAt": 2 }
        ]}),
    );
    setup_global_db(
        dir.path(),
        &[(
            "bubbleId:comp-real:b1",
            json!({ "type": 1, "text": "hello" }),
        )],
    );

    let connector = CursorConnector::new();
    let sessions = connector
        .list_sessions(&ScanContext::rooted(dir.path()))
        .unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].session_id, "comp-real");
}

#[test]
fn workspace_metadata_flows_into_descriptor() {
    let dir = TempDir::new().unwrap();
    let ws_dir = dir.path().join("workspaceStorage/ws1");
    fs::create_dir_all(&ws_dir).unwrap();
    fs::write(
        ws_dir.join("workspace.json"),
        r#"{"folder":"file:///home/dev/backend"}"#,
    )
    .unwrap();
    setup_workspace_db(
        dir.path(),
        "ws1",
        &json!({ "allComposers": [{
            "composerId": "comp-1", "name": "X", "createdAt": 1, "lastUpdatedAt": 2
        }]}),
    );
    setup_global_db(
        dir.path(),
        &[("bubbleId:comp-1:b1", json!({ "type": 1, "text": "hi" }))],
    );

    let connector = CursorConnector::new();
    let sessions = connector
        .list_sessions(&ScanContext::rooted(dir.path()))
        .unwrap();
    assert_eq!(sessions[0].workspace_name.as_deref(), Some("backend"));
    assert_eq!(
        sessions[0].workspace_path.as_deref(),
        Some(Path::new("/home/dev/backend"))
    );
}
