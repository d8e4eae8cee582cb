//! Integration tests for the two-plane message router.
//!
//! Drives the router over an in-memory duplex stream in place of a child
//! process and checks:
//! - turn-plane FIFO ordering exactly as emitted
//! - task notifications intercepted, invisible to `next()`
//! - control responses resolved on the reader task
//! - protocol faults skipped without ending the stream
//! - EOF ends the turn plane

use std::sync::{Arc, Mutex};

use agent_relay::agent::wire::{AgentMessage, ControlResponseMessage, TaskNotification};
use agent_relay::router::{MessageRouter, RouterHooks};
use tokio::io::AsyncWriteExt;

type Intercepted = Arc<Mutex<Vec<TaskNotification>>>;
type Resolved = Arc<Mutex<Vec<String>>>;

fn test_router(
    stream: tokio::io::DuplexStream,
) -> (MessageRouter, Intercepted, Resolved) {
    let intercepted: Intercepted = Arc::new(Mutex::new(Vec::new()));
    let resolved: Resolved = Arc::new(Mutex::new(Vec::new()));

    let intercepted_hook = Arc::clone(&intercepted);
    let resolved_hook = Arc::clone(&resolved);

    let router = MessageRouter::spawn(
        "router-test".to_owned(),
        stream,
        RouterHooks {
            on_task_notification: Box::new(move |notification| {
                intercepted_hook.lock().expect("lock").push(notification);
            }),
            on_control_response: Box::new(move |response: ControlResponseMessage| {
                resolved_hook
                    .lock()
                    .expect("lock")
                    .push(response.response.request_id);
            }),
            on_control_request: Box::new(|_| false),
        },
    );

    (router, intercepted, resolved)
}

#[tokio::test]
async fn turn_plane_preserves_child_order() {
    let (mut writer, reader) = tokio::io::duplex(4096);
    let (router, _, _) = test_router(reader);

    writer
        .write_all(
            concat!(
                "{\"type\":\"stream_event\",\"event\":{\"type\":\"message_start\"}}\n",
                "{\"type\":\"assistant\",\"message\":{\"content\":[]}}\n",
                "{\"type\":\"result\",\"subtype\":\"success\"}\n",
            )
            .as_bytes(),
        )
        .await
        .expect("write");

    assert!(matches!(
        router.next().await,
        Some(AgentMessage::StreamEvent(_))
    ));
    assert!(matches!(
        router.next().await,
        Some(AgentMessage::Assistant(_))
    ));
    assert!(matches!(router.next().await, Some(AgentMessage::Result(_))));
}

#[tokio::test]
async fn task_notifications_are_intercepted_and_invisible() {
    let (mut writer, reader) = tokio::io::duplex(4096);
    let (router, intercepted, _) = test_router(reader);

    writer
        .write_all(
            concat!(
                "{\"type\":\"system\",\"subtype\":\"task_notification\",\"task_id\":\"bg-1\",\"status\":\"completed\",\"summary\":\"Done\"}\n",
                "{\"type\":\"result\",\"subtype\":\"success\"}\n",
            )
            .as_bytes(),
        )
        .await
        .expect("write");

    // The next visible message is the result; the notification went to the
    // intercept handler.
    assert!(matches!(router.next().await, Some(AgentMessage::Result(_))));

    let seen = intercepted.lock().expect("lock");
    assert_eq!(seen.len(), 1, "exactly one interception");
    assert_eq!(seen[0].task_id.as_deref(), Some("bg-1"));
}

#[tokio::test]
async fn other_system_events_stay_on_the_turn_plane() {
    let (mut writer, reader) = tokio::io::duplex(4096);
    let (router, intercepted, _) = test_router(reader);

    writer
        .write_all(b"{\"type\":\"system\",\"subtype\":\"status\",\"message\":\"busy\"}\n")
        .await
        .expect("write");

    assert!(matches!(router.next().await, Some(AgentMessage::System(_))));
    assert!(intercepted.lock().expect("lock").is_empty());
}

#[tokio::test]
async fn control_responses_resolve_on_the_reader_task() {
    let (mut writer, reader) = tokio::io::duplex(4096);
    let (router, _, resolved) = test_router(reader);

    writer
        .write_all(
            concat!(
                "{\"type\":\"control_response\",\"response\":{\"subtype\":\"success\",\"request_id\":\"req_0\",\"response\":{}}}\n",
                "{\"type\":\"result\",\"subtype\":\"success\"}\n",
            )
            .as_bytes(),
        )
        .await
        .expect("write");

    // The control response never surfaces on the turn plane.
    assert!(matches!(router.next().await, Some(AgentMessage::Result(_))));
    assert_eq!(resolved.lock().expect("lock").as_slice(), ["req_0"]);
}

#[tokio::test]
async fn protocol_faults_are_skipped_not_fatal() {
    let (mut writer, reader) = tokio::io::duplex(4096);
    let (router, _, _) = test_router(reader);

    writer
        .write_all(
            concat!(
                "this is not json\n",
                "{\"type\":\"unknown_kind\",\"x\":1}\n",
                "{\"type\":\"result\",\"subtype\":\"success\"}\n",
            )
            .as_bytes(),
        )
        .await
        .expect("write");

    // Both bad lines are dropped; the stream continues.
    assert!(matches!(router.next().await, Some(AgentMessage::Result(_))));
}

#[tokio::test]
async fn eof_ends_the_turn_plane() {
    let (mut writer, reader) = tokio::io::duplex(4096);
    let (router, _, _) = test_router(reader);

    writer
        .write_all(b"{\"type\":\"result\",\"subtype\":\"success\"}\n")
        .await
        .expect("write");
    drop(writer);

    assert!(matches!(router.next().await, Some(AgentMessage::Result(_))));
    assert!(
        router.next().await.is_none(),
        "EOF must end the sequence after the buffer drains"
    );
}

#[tokio::test]
async fn intercepted_post_tool_hook_requests_never_reach_the_turn_plane() {
    let (mut writer, reader) = tokio::io::duplex(4096);

    let handled: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let handled_hook = Arc::clone(&handled);
    let router = MessageRouter::spawn(
        "router-test".to_owned(),
        reader,
        RouterHooks {
            on_task_notification: Box::new(|_| {}),
            on_control_response: Box::new(|_| {}),
            on_control_request: Box::new(move |request| {
                if request.request.subtype == "hook_callback" {
                    handled_hook
                        .lock()
                        .expect("lock")
                        .push(request.request_id.clone());
                    return true;
                }
                false
            }),
        },
    );

    writer
        .write_all(
            concat!(
                "{\"type\":\"control_request\",\"request_id\":\"h1\",\"request\":{\"subtype\":\"hook_callback\",\"callback_id\":\"relay-post-tool\"}}\n",
                "{\"type\":\"control_request\",\"request_id\":\"p1\",\"request\":{\"subtype\":\"can_use_tool\",\"tool_name\":\"Bash\"}}\n",
            )
            .as_bytes(),
        )
        .await
        .expect("write");

    // Only the permission request surfaces; the hook was filtered.
    let Some(AgentMessage::ControlRequest(request)) = router.next().await else {
        panic!("expected the can_use_tool request");
    };
    assert_eq!(request.request_id, "p1");
    assert_eq!(handled.lock().expect("lock").as_slice(), ["h1"]);
}
