//! Unit tests for the agent wire vocabulary.
//!
//! Covers:
//! - each known message type parses into its variant
//! - unknown types are skipped, malformed JSON is a fault
//! - task-notification extraction from system messages
//! - outbound constructor shapes (user message, control frames)

use agent_relay::agent::wire::{
    outbound_control_error, outbound_control_request, outbound_control_success,
    outbound_user_message, parse_agent_line, AgentMessage, ContentBlock, ContentDelta,
    StreamEvent,
};
use agent_relay::AppError;
use serde_json::json;

// ── Known message types parse ────────────────────────────────────────────────

#[test]
fn assistant_message_parses() {
    let line = r#"{"type":"assistant","message":{"role":"assistant","content":[{"type":"text","text":"hi"}]}}"#;
    let parsed = parse_agent_line("sess", line).expect("parse must succeed");

    let Some(AgentMessage::Assistant(assistant)) = parsed else {
        panic!("expected Assistant, got: {parsed:?}");
    };
    let blocks = assistant.message.content.as_blocks();
    assert!(
        matches!(&blocks[..], [ContentBlock::Text { text }] if text == "hi"),
        "content must be the single text block"
    );
}

#[test]
fn stream_event_text_delta_parses() {
    let line = r#"{"type":"stream_event","event":{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hel"}}}"#;
    let parsed = parse_agent_line("sess", line).expect("parse must succeed");

    let Some(AgentMessage::StreamEvent(event)) = parsed else {
        panic!("expected StreamEvent, got: {parsed:?}");
    };
    assert!(
        matches!(
            event.event,
            StreamEvent::ContentBlockDelta {
                index: 0,
                delta: ContentDelta::TextDelta { ref text },
            } if text == "Hel"
        ),
        "delta must carry the new text"
    );
}

#[test]
fn unknown_stream_event_type_is_tolerated() {
    let line = r#"{"type":"stream_event","event":{"type":"brand_new_event","index":3}}"#;
    let parsed = parse_agent_line("sess", line).expect("parse must succeed");

    let Some(AgentMessage::StreamEvent(event)) = parsed else {
        panic!("expected StreamEvent, got: {parsed:?}");
    };
    assert!(
        matches!(event.event, StreamEvent::Other),
        "unknown event types must fold into the catch-all"
    );
}

#[test]
fn result_message_parses_with_metadata() {
    let line = r#"{"type":"result","subtype":"success","is_error":false,"duration_ms":1200,"num_turns":2,"total_cost_usd":0.04,"result":"done"}"#;
    let parsed = parse_agent_line("sess", line).expect("parse must succeed");

    let Some(AgentMessage::Result(result)) = parsed else {
        panic!("expected Result, got: {parsed:?}");
    };
    assert_eq!(result.subtype, "success");
    assert!(!result.is_error);
    assert_eq!(result.duration_ms, Some(1200));
    assert_eq!(result.num_turns, Some(2));
    assert_eq!(result.result.as_deref(), Some("done"));
}

#[test]
fn control_request_parses_with_params() {
    let line = r#"{"type":"control_request","request_id":"r1","request":{"subtype":"can_use_tool","tool_name":"Bash","input":{"command":"ls"}}}"#;
    let parsed = parse_agent_line("sess", line).expect("parse must succeed");

    let Some(AgentMessage::ControlRequest(request)) = parsed else {
        panic!("expected ControlRequest, got: {parsed:?}");
    };
    assert_eq!(request.request_id, "r1");
    assert_eq!(request.request.subtype, "can_use_tool");
    assert_eq!(request.request.str_param("tool_name"), Some("Bash"));
}

#[test]
fn control_response_parses() {
    let line = r#"{"type":"control_response","response":{"subtype":"success","request_id":"req_0","response":{"ok":true}}}"#;
    let parsed = parse_agent_line("sess", line).expect("parse must succeed");

    let Some(AgentMessage::ControlResponse(response)) = parsed else {
        panic!("expected ControlResponse, got: {parsed:?}");
    };
    assert_eq!(response.response.subtype, "success");
    assert_eq!(response.response.request_id, "req_0");
}

// ── Task-notification extraction ─────────────────────────────────────────────

#[test]
fn task_notification_extracts_from_system_message() {
    let line = r#"{"type":"system","subtype":"task_notification","task_id":"abc","status":"completed","summary":"Done"}"#;
    let parsed = parse_agent_line("sess", line).expect("parse must succeed");

    let Some(AgentMessage::System(system)) = parsed else {
        panic!("expected System, got: {parsed:?}");
    };
    let notification = system
        .task_notification()
        .expect("subtype task_notification must extract");
    assert_eq!(notification.task_id.as_deref(), Some("abc"));
    assert_eq!(notification.status.as_deref(), Some("completed"));
    assert_eq!(notification.summary.as_deref(), Some("Done"));
}

#[test]
fn non_notification_system_message_extracts_nothing() {
    let line = r#"{"type":"system","subtype":"status","message":"thinking"}"#;
    let parsed = parse_agent_line("sess", line).expect("parse must succeed");

    let Some(AgentMessage::System(system)) = parsed else {
        panic!("expected System, got: {parsed:?}");
    };
    assert!(
        system.task_notification().is_none(),
        "only task_notification subtypes may extract"
    );
}

// ── Fault handling ───────────────────────────────────────────────────────────

#[test]
fn unknown_message_type_is_skipped() {
    let result = parse_agent_line("sess", r#"{"type":"telemetry","data":{}}"#);
    assert!(
        matches!(result, Ok(None)),
        "unknown type must be silently skipped, got: {result:?}"
    );
}

#[test]
fn empty_line_is_skipped() {
    assert!(matches!(parse_agent_line("sess", ""), Ok(None)));
    assert!(matches!(parse_agent_line("sess", "   "), Ok(None)));
}

#[test]
fn malformed_json_is_a_fault() {
    let result = parse_agent_line("sess", "not-json{{{");
    match result {
        Err(AppError::Agent(msg)) => assert!(
            msg.contains("malformed json"),
            "error must mention 'malformed json', got: {msg}"
        ),
        other => panic!("expected Err(AppError::Agent), got: {other:?}"),
    }
}

#[test]
fn missing_type_field_is_a_fault() {
    let result = parse_agent_line("sess", r#"{"subtype":"init"}"#);
    assert!(
        matches!(result, Err(AppError::Agent(_))),
        "missing `type` must be a fault, got: {result:?}"
    );
}

// ── Outbound constructors ────────────────────────────────────────────────────

#[test]
fn outbound_user_message_shape() {
    let msg = outbound_user_message("sess-1", vec![json!({"type":"text","text":"hi"})]);

    assert_eq!(msg["type"], "user");
    assert_eq!(msg["message"]["role"], "user");
    assert_eq!(msg["message"]["content"][0]["text"], "hi");
    assert_eq!(msg["session_id"], "sess-1");
    assert!(msg["parent_tool_use_id"].is_null());
}

#[test]
fn outbound_control_request_merges_subtype() {
    let msg = outbound_control_request("req_7", "set_model", json!({"model":"fast-1"}));

    assert_eq!(msg["type"], "control_request");
    assert_eq!(msg["request_id"], "req_7");
    assert_eq!(msg["request"]["subtype"], "set_model");
    assert_eq!(msg["request"]["model"], "fast-1");
}

#[test]
fn outbound_control_responses_carry_request_id() {
    let ok = outbound_control_success("r1", json!({"behavior":"allow"}));
    assert_eq!(ok["response"]["subtype"], "success");
    assert_eq!(ok["response"]["request_id"], "r1");
    assert_eq!(ok["response"]["response"]["behavior"], "allow");

    let err = outbound_control_error("r2", "no such tool");
    assert_eq!(err["response"]["subtype"], "error");
    assert_eq!(err["response"]["request_id"], "r2");
    assert_eq!(err["response"]["error"], "no such tool");
}
