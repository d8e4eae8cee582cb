//! Message router: two-plane demultiplexer over the child's stdout.
//!
//! The child emits a single interleaved NDJSON stream. The router splits it
//! into two logical planes:
//!
//! - **Intercept plane** — messages that must be handled immediately, even
//!   between turns: deferred task-completion notifications
//!   (`system` / `task_notification`). These are dispatched synchronously to
//!   the handler installed at construction and are never observable via
//!   [`MessageRouter::next`]. Control responses are likewise resolved on the
//!   reader task, against the per-session correlator, so a mode or model
//!   change acknowledged between turns cannot strand its caller.
//! - **Turn plane** — everything else, buffered FIFO and delivered to the
//!   prompt-loop consumer via [`MessageRouter::next`].
//!
//! The single background reader task runs from construction until the child
//! stream ends or a fatal error occurs. It never blocks on the turn-plane
//! consumer (the buffer is unbounded), and intercept handlers must return
//! quickly — they run on the reader task itself.

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio::sync::{mpsc, Mutex};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::acp::codec::NdjsonCodec;
use crate::agent::wire::{
    parse_agent_line, AgentMessage, ControlRequestMessage, ControlResponseMessage,
    TaskNotification,
};

/// Synchronous handler for intercept-plane task notifications.
pub type TaskNotificationHandler = Box<dyn Fn(TaskNotification) + Send + Sync>;
/// Synchronous resolver for control responses (the correlator's completion).
pub type ControlResponseHandler = Box<dyn Fn(ControlResponseMessage) + Send + Sync>;
/// Synchronous filter for control requests the intercept plane can answer
/// without a client round-trip. Returns `true` when handled; `false` routes
/// the request to the turn plane.
pub type ControlRequestFilter = Box<dyn Fn(&ControlRequestMessage) -> bool + Send + Sync>;

/// Handlers dispatched on the reader task; none may block.
pub struct RouterHooks {
    /// Invoked for every deferred task-completion notification.
    pub on_task_notification: TaskNotificationHandler,
    /// Invoked for every control response to a bridge-to-agent request.
    pub on_control_response: ControlResponseHandler,
    /// Offered every agent-to-bridge control request first; the internal
    /// post-tool hook is answered here so its background-task bookkeeping
    /// lands even between turns.
    pub on_control_request: ControlRequestFilter,
}

/// Two-plane demultiplexer over one child's stdout.
pub struct MessageRouter {
    turn_rx: Mutex<mpsc::UnboundedReceiver<AgentMessage>>,
    cancel: CancellationToken,
}

impl MessageRouter {
    /// Construct the router and start its background reader over `stdout`.
    ///
    /// The reader parses each NDJSON line into an
    /// [`AgentMessage`], routes intercept-plane messages to `hooks`, and
    /// buffers the rest for [`MessageRouter::next`]. Malformed lines are
    /// protocol faults: logged and skipped, the stream continues.
    pub fn spawn<R>(session_id: String, stdout: R, hooks: RouterHooks) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (turn_tx, turn_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        tokio::spawn(run_reader(
            session_id,
            stdout,
            turn_tx,
            hooks,
            cancel.clone(),
        ));

        Self {
            turn_rx: Mutex::new(turn_rx),
            cancel,
        }
    }

    /// Receive the next turn-plane message.
    ///
    /// Returns a buffered message immediately, parks until the next message
    /// arrives, or returns `None` once the child stream has ended and the
    /// buffer is drained. The router is single-consumer on this plane;
    /// within it, child emission order is preserved exactly.
    pub async fn next(&self) -> Option<AgentMessage> {
        self.turn_rx.lock().await.recv().await
    }

    /// Stop the background reader.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for MessageRouter {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ── Reader task ───────────────────────────────────────────────────────────────

/// Background reader: child stdout → parse → intercept or buffer.
async fn run_reader<R>(
    session_id: String,
    stdout: R,
    turn_tx: mpsc::UnboundedSender<AgentMessage>,
    hooks: RouterHooks,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(stdout, NdjsonCodec::new());

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(session_id, "router: cancellation received, stopping reader");
                break;
            }

            item = framed.next() => {
                match item {
                    None => {
                        debug!(session_id, "router: agent stream EOF");
                        break;
                    }

                    Some(Err(err)) => {
                        // Codec-level fault (oversized line, I/O error).
                        // Oversized lines are skipped; I/O errors end the stream.
                        warn!(session_id, %err, "router: codec error");
                        if matches!(err, crate::AppError::Io(_)) {
                            break;
                        }
                    }

                    Some(Ok(line)) => {
                        match parse_agent_line(&session_id, &line) {
                            Ok(Some(message)) => {
                                if !dispatch(&session_id, message, &turn_tx, &hooks) {
                                    debug!(session_id, "router: turn consumer gone, stopping");
                                    break;
                                }
                            }
                            Ok(None) => {
                                // Empty line or unknown type — skipped.
                            }
                            Err(err) => {
                                // Parse failure on a fully terminated line is
                                // a protocol fault: log, drop, continue.
                                warn!(
                                    session_id,
                                    %err,
                                    raw_line = %line,
                                    "router: protocol fault, skipping line"
                                );
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Route one parsed message to its plane.
///
/// Returns `false` when the turn-plane consumer has disappeared.
fn dispatch(
    session_id: &str,
    message: AgentMessage,
    turn_tx: &mpsc::UnboundedSender<AgentMessage>,
    hooks: &RouterHooks,
) -> bool {
    match message {
        AgentMessage::System(ref system) => {
            if let Some(notification) = system.task_notification() {
                debug!(
                    session_id,
                    task_id = ?notification.task_id,
                    "router: intercepting task notification"
                );
                (hooks.on_task_notification)(notification);
                return true;
            }
            turn_tx.send(message).is_ok()
        }
        AgentMessage::ControlResponse(response) => {
            (hooks.on_control_response)(response);
            true
        }
        AgentMessage::ControlRequest(ref request) => {
            if (hooks.on_control_request)(request) {
                debug!(
                    session_id,
                    request_id = %request.request_id,
                    "router: control request answered on intercept plane"
                );
                return true;
            }
            turn_tx.send(message).is_ok()
        }
        other => turn_tx.send(other).is_ok(),
    }
}
