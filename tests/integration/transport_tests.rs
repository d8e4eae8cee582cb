//! Integration tests for the subprocess transport and control correlator.
//!
//! Uses `sh -c cat` as a stand-in agent: everything written to its stdin
//! comes straight back on stdout, which is enough to exercise spawning,
//! NDJSON framing, write-after-death, and correlator completion.

use std::path::PathBuf;
use std::time::Duration;

use agent_relay::agent::options::SpawnOptions;
use agent_relay::agent::transport::AgentTransport;
use agent_relay::agent::wire::{AgentMessage, ControlResponsePayload};
use agent_relay::correlate::control::ControlCorrelator;
use agent_relay::router::{MessageRouter, RouterHooks};
use agent_relay::AppError;
use serde_json::json;

/// Spawn options for an echo child (`sh -c cat`); the generated framing
/// flags land in the script's unused positional parameters.
fn echo_child_options() -> SpawnOptions {
    SpawnOptions {
        executable: "sh".to_owned(),
        base_args: vec!["-c".to_owned(), "cat".to_owned(), "relay-echo".to_owned()],
        cwd: PathBuf::from("."),
        ..SpawnOptions::default()
    }
}

fn passthrough_hooks() -> RouterHooks {
    RouterHooks {
        on_task_notification: Box::new(|_| {}),
        on_control_response: Box::new(|_| {}),
        on_control_request: Box::new(|_| false),
    }
}

// ── Transport round-trip ─────────────────────────────────────────────────────

#[cfg(unix)]
#[tokio::test]
async fn written_frames_come_back_through_the_router() {
    let spawned = AgentTransport::spawn("echo-1", &echo_child_options(), None)
        .expect("spawn must succeed");
    let router = MessageRouter::spawn("echo-1".to_owned(), spawned.stdout, passthrough_hooks());

    let frame = agent_relay::agent::wire::outbound_user_message(
        "echo-1",
        vec![json!({"type": "text", "text": "ping"})],
    );
    spawned.transport.write(frame).expect("write must queue");

    let message = router.next().await.expect("echoed frame must arrive");
    let AgentMessage::User(user) = message else {
        panic!("expected the echoed user message, got {message:?}");
    };
    let blocks = user.message.content.as_blocks();
    assert_eq!(blocks.len(), 1);

    spawned.transport.close(Duration::from_secs(2)).await;
}

#[cfg(unix)]
#[tokio::test]
async fn writes_after_close_reject_immediately() {
    let spawned = AgentTransport::spawn("echo-2", &echo_child_options(), None)
        .expect("spawn must succeed");

    spawned.transport.close(Duration::from_secs(2)).await;
    assert!(spawned.transport.is_dead());

    let result = spawned.transport.write(json!({"type": "user"}));
    assert!(
        matches!(result, Err(AppError::SessionDead(_))),
        "writes after close must reject, got {result:?}"
    );
}

#[cfg(unix)]
#[tokio::test]
async fn child_eof_ends_the_router_stream() {
    // `true` exits immediately without reading stdin.
    let options = SpawnOptions {
        executable: "sh".to_owned(),
        base_args: vec!["-c".to_owned(), "true".to_owned(), "relay-exit".to_owned()],
        cwd: PathBuf::from("."),
        ..SpawnOptions::default()
    };
    let spawned =
        AgentTransport::spawn("exit-1", &options, None).expect("spawn must succeed");
    let router = MessageRouter::spawn("exit-1".to_owned(), spawned.stdout, passthrough_hooks());

    assert!(
        router.next().await.is_none(),
        "an exiting child must end the turn plane"
    );
    spawned.transport.close(Duration::from_secs(2)).await;
}

// ── Correlator ───────────────────────────────────────────────────────────────

#[cfg(unix)]
#[tokio::test]
async fn resolve_completes_a_pending_request() {
    let spawned = AgentTransport::spawn("corr-1", &echo_child_options(), None)
        .expect("spawn must succeed");
    let correlator = std::sync::Arc::new(ControlCorrelator::new("corr-1"));

    let pending = {
        let correlator = std::sync::Arc::clone(&correlator);
        let transport = spawned.transport;
        tokio::spawn(async move {
            let result = correlator
                .request(&transport, "supported_commands", json!({}))
                .await;
            transport.close(Duration::from_secs(2)).await;
            result
        })
    };

    // Ids are allocated sequentially from zero.
    tokio::time::sleep(Duration::from_millis(50)).await;
    correlator.resolve(ControlResponsePayload {
        subtype: "success".to_owned(),
        request_id: "req_0".to_owned(),
        response: Some(json!({"commands": ["/help"]})),
        error: None,
    });

    let result = pending.await.expect("join").expect("request must resolve");
    assert_eq!(result["commands"][0], "/help");
}

#[cfg(unix)]
#[tokio::test]
async fn error_responses_surface_as_agent_errors() {
    let spawned = AgentTransport::spawn("corr-2", &echo_child_options(), None)
        .expect("spawn must succeed");
    let correlator = std::sync::Arc::new(ControlCorrelator::new("corr-2"));

    let pending = {
        let correlator = std::sync::Arc::clone(&correlator);
        let transport = spawned.transport;
        tokio::spawn(async move {
            let result = correlator.request(&transport, "set_model", json!({})).await;
            transport.close(Duration::from_secs(2)).await;
            result
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    correlator.resolve(ControlResponsePayload {
        subtype: "error".to_owned(),
        request_id: "req_0".to_owned(),
        response: None,
        error: Some("unknown model".to_owned()),
    });

    let result = pending.await.expect("join");
    assert!(
        matches!(result, Err(AppError::Agent(ref msg)) if msg.contains("unknown model")),
        "agent errors must surface, got {result:?}"
    );
}

#[cfg(unix)]
#[tokio::test]
async fn mutating_requests_are_single_flight() {
    let spawned = AgentTransport::spawn("corr-3", &echo_child_options(), None)
        .expect("spawn must succeed");
    let correlator = std::sync::Arc::new(ControlCorrelator::new("corr-3"));
    let transport = std::sync::Arc::new(spawned.transport);

    // First interrupt stays pending (nothing resolves it yet).
    let first = {
        let correlator = std::sync::Arc::clone(&correlator);
        let transport = std::sync::Arc::clone(&transport);
        tokio::spawn(async move { correlator.request(&transport, "interrupt", json!({})).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    // A second interrupt while the first is outstanding is refused.
    let second = correlator.request(&transport, "interrupt", json!({})).await;
    assert!(
        matches!(second, Err(AppError::Agent(ref msg)) if msg.contains("in flight")),
        "second mutating request must be refused, got {second:?}"
    );

    correlator.resolve(ControlResponsePayload {
        subtype: "success".to_owned(),
        request_id: "req_0".to_owned(),
        response: Some(json!({})),
        error: None,
    });
    first.await.expect("join").expect("first must resolve");
    transport.close(Duration::from_secs(2)).await;
}
