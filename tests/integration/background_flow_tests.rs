//! Integration tests for between-turns background-task population.
//!
//! The internal post-tool hook is answered on the router's intercept
//! plane; its structured response can be the first place a tool-use
//! reveals its background nature. These tests drive the hook handler
//! directly over an echo child and check that the cache entry is flagged,
//! the map is populated, and the deferred completion then resolves.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use agent_relay::acp::schema::{SessionUpdate, ToolCallStatus};
use agent_relay::agent::options::{SpawnOptions, POST_TOOL_HOOK_ID};
use agent_relay::agent::transport::AgentTransport;
use agent_relay::agent::wire::{parse_agent_line, AgentMessage, TaskNotification};
use agent_relay::session::orchestrator::handle_post_tool_hook;
use agent_relay::session::state::{PermissionMode, SessionShared};
use agent_relay::translate::cache::ToolUsePhase;
use agent_relay::translate::Translator;
use serde_json::json;

fn echo_child_options() -> SpawnOptions {
    SpawnOptions {
        executable: "sh".to_owned(),
        base_args: vec!["-c".to_owned(), "cat".to_owned(), "relay-echo".to_owned()],
        cwd: PathBuf::from("."),
        ..SpawnOptions::default()
    }
}

fn hook_request(tool_use_id: &str, response: serde_json::Value) -> AgentMessage {
    let line = json!({
        "type": "control_request",
        "request_id": "h1",
        "request": {
            "subtype": "hook_callback",
            "callback_id": POST_TOOL_HOOK_ID,
            "tool_use_id": tool_use_id,
            "tool_response": response,
        }
    })
    .to_string();
    parse_agent_line("hook-test", &line)
        .expect("line must parse")
        .expect("line must be a known message")
}

#[cfg(unix)]
#[tokio::test]
async fn post_tool_response_reveals_background_and_feeds_the_map() {
    let spawned = AgentTransport::spawn("hook-1", &echo_child_options(), None)
        .expect("spawn must succeed");
    let shared = SessionShared::new("hook-1", PathBuf::from("."), PermissionMode::Default);

    // Announced without any background flag: the structured response is
    // the first evidence.
    shared
        .cache
        .lock()
        .expect("cache lock")
        .announce(
            "T1",
            "Task",
            json!({"description": "index the repo"}),
            ToolUsePhase::Finalised,
            None,
        );

    let AgentMessage::ControlRequest(request) = hook_request(
        "T1",
        json!({"task_id": "bg-1", "output_file": "/tmp/o.log"}),
    ) else {
        panic!("expected a control request");
    };

    assert!(
        handle_post_tool_hook(&spawned.transport, &shared, &request),
        "the internal post-tool hook must be handled on the intercept plane"
    );

    assert!(
        shared
            .cache
            .lock()
            .expect("cache lock")
            .get("T1")
            .expect("entry must survive")
            .background,
        "task fields in the response must flag the entry background"
    );
    assert_eq!(
        shared.background.lock().expect("background lock").len(),
        2,
        "both the task-id and file keys must be populated"
    );

    // The deferred completion now resolves through the translator.
    let translator = Translator::new(
        "hook-1",
        Arc::clone(&shared.cache),
        Arc::clone(&shared.background),
    );
    let update = translator
        .on_task_completion(&TaskNotification {
            task_id: Some("bg-1".to_owned()),
            agent_id: None,
            output_file: None,
            status: Some("completed".to_owned()),
            summary: Some("Indexed".to_owned()),
        })
        .expect("matching notification must emit an update");
    let SessionUpdate::ToolCallUpdate(update) = update else {
        panic!("expected a tool_call_update");
    };
    assert_eq!(update.tool_call_id, "T1");
    assert_eq!(update.status, Some(ToolCallStatus::Completed));

    spawned.transport.close(Duration::from_secs(2)).await;
}

#[cfg(unix)]
#[tokio::test]
async fn post_tool_refs_for_unknown_tool_uses_are_dropped() {
    let spawned = AgentTransport::spawn("hook-2", &echo_child_options(), None)
        .expect("spawn must succeed");
    let shared = SessionShared::new("hook-2", PathBuf::from("."), PermissionMode::Default);

    let AgentMessage::ControlRequest(request) =
        hook_request("ghost", json!({"task_id": "bg-9"}))
    else {
        panic!("expected a control request");
    };

    assert!(handle_post_tool_hook(&spawned.transport, &shared, &request));
    assert!(
        shared.background.lock().expect("background lock").is_empty(),
        "refs for a never-announced tool-use must not populate the map"
    );

    spawned.transport.close(Duration::from_secs(2)).await;
}

#[cfg(unix)]
#[tokio::test]
async fn responses_without_task_fields_change_nothing() {
    let spawned = AgentTransport::spawn("hook-3", &echo_child_options(), None)
        .expect("spawn must succeed");
    let shared = SessionShared::new("hook-3", PathBuf::from("."), PermissionMode::Default);

    shared.cache.lock().expect("cache lock").announce(
        "T2",
        "Bash",
        json!({"command": "ls"}),
        ToolUsePhase::Finalised,
        None,
    );

    let AgentMessage::ControlRequest(request) =
        hook_request("T2", json!({"stdout": "main.rs\nlib.rs"}))
    else {
        panic!("expected a control request");
    };

    assert!(handle_post_tool_hook(&spawned.transport, &shared, &request));
    assert!(
        !shared
            .cache
            .lock()
            .expect("cache lock")
            .get("T2")
            .expect("entry")
            .background,
        "a plain response must not flag the entry background"
    );
    assert!(shared.background.lock().expect("background lock").is_empty());

    spawned.transport.close(Duration::from_secs(2)).await;
}
