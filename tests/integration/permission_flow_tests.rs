//! Integration tests for the permission query handler.
//!
//! Mode fast paths answer without touching the client; everything else is
//! a `session/request_permission` round-trip through the client queue.

use std::path::PathBuf;

use agent_relay::acp::notify::ClientHandle;
use agent_relay::session::permission::{handle_can_use_tool, EDIT_TOOLS, PLAN_EXIT_TOOL};
use agent_relay::session::state::{PermissionMode, SessionShared};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

fn client_pair() -> (ClientHandle, tokio::io::DuplexStream) {
    let (writer_side, reader_side) = tokio::io::duplex(8192);
    (
        ClientHandle::start(writer_side, CancellationToken::new()),
        reader_side,
    )
}

fn shared_with_mode(mode: PermissionMode) -> std::sync::Arc<SessionShared> {
    SessionShared::new("sess-p", PathBuf::from("/work"), mode)
}

/// Answer the next permission request on `reader_side` with `option_id`.
async fn answer_permission(
    client: ClientHandle,
    reader_side: tokio::io::DuplexStream,
    option_id: &'static str,
) -> tokio::task::JoinHandle<Value> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader_side).lines();
        let request: Value =
            serde_json::from_str(&lines.next_line().await.expect("read").expect("line"))
                .expect("json");
        assert_eq!(request["method"], "session/request_permission");
        let id = request["id"].as_u64().expect("id");
        client.resolve(
            id,
            Ok(json!({ "outcome": { "outcome": "selected", "optionId": option_id } })),
        );
        request
    })
}

// ── Mode fast paths ──────────────────────────────────────────────────────────

#[tokio::test]
async fn bypass_mode_grants_without_asking() {
    let (client, _reader) = client_pair();
    let shared = shared_with_mode(PermissionMode::BypassPermissions);

    let response =
        handle_can_use_tool(&client, &shared, "Bash", &json!({"command": "ls"}))
            .await
            .expect("must grant");

    assert_eq!(response["behavior"], "allow");
    assert!(
        response["updatedPermissions"].is_array(),
        "bypass grants carry a session-scoped rule"
    );
}

#[tokio::test]
async fn accept_edits_grants_the_edit_tool_subset() {
    let (client, _reader) = client_pair();
    let shared = shared_with_mode(PermissionMode::AcceptEdits);

    for tool in EDIT_TOOLS {
        let response = handle_can_use_tool(
            &client,
            &shared,
            tool,
            &json!({"file_path": "/work/a.rs"}),
        )
        .await
        .expect("must grant");
        assert_eq!(response["behavior"], "allow", "tool {tool} must be granted");
    }
}

#[tokio::test]
async fn dont_ask_mode_denies_unmatched_tools() {
    let (client, _reader) = client_pair();
    let shared = shared_with_mode(PermissionMode::DontAsk);

    let response =
        handle_can_use_tool(&client, &shared, "Bash", &json!({"command": "ls"}))
            .await
            .expect("must answer");
    assert_eq!(response["behavior"], "deny");
}

// ── Client consult ───────────────────────────────────────────────────────────

#[tokio::test]
async fn allow_once_grants_without_a_rule() {
    let (client, reader_side) = client_pair();
    let shared = shared_with_mode(PermissionMode::Default);

    let answering = answer_permission(client.clone(), reader_side, "allow_once").await;
    let response =
        handle_can_use_tool(&client, &shared, "Bash", &json!({"command": "ls"}))
            .await
            .expect("must answer");
    answering.await.expect("answer task");

    assert_eq!(response["behavior"], "allow");
    assert!(
        response.get("updatedPermissions").is_none(),
        "allow-once must not carry a rule suggestion"
    );
}

#[tokio::test]
async fn always_allow_carries_a_rule_suggestion() {
    let (client, reader_side) = client_pair();
    let shared = shared_with_mode(PermissionMode::Default);

    let answering = answer_permission(client.clone(), reader_side, "allow_always").await;
    let response =
        handle_can_use_tool(&client, &shared, "WebFetch", &json!({"url": "https://x"}))
            .await
            .expect("must answer");
    answering.await.expect("answer task");

    assert_eq!(response["behavior"], "allow");
    assert_eq!(
        response["updatedPermissions"][0]["rules"][0]["toolName"],
        "WebFetch"
    );
}

#[tokio::test]
async fn rejection_denies() {
    let (client, reader_side) = client_pair();
    let shared = shared_with_mode(PermissionMode::Default);

    let answering = answer_permission(client.clone(), reader_side, "reject_once").await;
    let response =
        handle_can_use_tool(&client, &shared, "Bash", &json!({"command": "rm -rf"}))
            .await
            .expect("must answer");
    answering.await.expect("answer task");

    assert_eq!(response["behavior"], "deny");
}

// ── Plan exit ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn plan_exit_accept_edits_flips_the_mode() {
    let (client, reader_side) = client_pair();
    let shared = shared_with_mode(PermissionMode::Plan);

    let answering = answer_permission(client.clone(), reader_side, "accept_edits").await;
    let response = handle_can_use_tool(&client, &shared, PLAN_EXIT_TOOL, &json!({}))
        .await
        .expect("must answer");
    let request = answering.await.expect("answer task");

    assert_eq!(response["behavior"], "allow");
    assert_eq!(
        shared.mode(),
        PermissionMode::AcceptEdits,
        "accepting must flip the session mode"
    );
    // The choice set is the dedicated plan-exit one.
    let options = request["params"]["options"].as_array().expect("options");
    assert_eq!(options.len(), 3);
}

#[tokio::test]
async fn plan_exit_keep_planning_denies_and_keeps_the_mode() {
    let (client, reader_side) = client_pair();
    let shared = shared_with_mode(PermissionMode::Plan);

    let answering = answer_permission(client.clone(), reader_side, "keep_planning").await;
    let response = handle_can_use_tool(&client, &shared, PLAN_EXIT_TOOL, &json!({}))
        .await
        .expect("must answer");
    answering.await.expect("answer task");

    assert_eq!(response["behavior"], "deny");
    assert_eq!(shared.mode(), PermissionMode::Plan);
}
