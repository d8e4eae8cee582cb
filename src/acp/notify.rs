//! Ordered outbound queue for the ACP client connection.
//!
//! Every frame to the client — responses, `session/update` notifications,
//! and bridge-to-client requests — funnels through one queue drained by a
//! single writer task, which serialises the connection and preserves
//! emission order. [`ClientHandle::flush`] parks until everything enqueued
//! before it has been written, letting an operation drain its updates
//! before returning.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::{json, Value};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::acp::schema::SessionUpdate;
use crate::{AppError, Result};

/// A JSON-RPC error payload sent to the client.
#[derive(Debug, Clone)]
pub struct RpcError {
    /// JSON-RPC error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Optional structured detail.
    pub data: Option<Value>,
}

impl RpcError {
    /// Map an application error onto the wire taxonomy.
    #[must_use]
    pub fn from_app_error(err: &AppError) -> Self {
        match err {
            AppError::AuthRequired(msg) => Self {
                code: -32000,
                message: format!("authentication required: {msg}"),
                data: Some(json!({ "authRequired": true })),
            },
            AppError::Acp(msg) => Self {
                code: -32602,
                message: msg.clone(),
                data: None,
            },
            AppError::NotFound(msg) => Self {
                code: -32602,
                message: format!("not found: {msg}"),
                data: None,
            },
            AppError::Cancelled => Self {
                code: -32800,
                message: "cancelled".to_owned(),
                data: None,
            },
            other => Self {
                code: -32603,
                message: other.to_string(),
                data: None,
            },
        }
    }

    /// The standard method-not-found error.
    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: format!("method not found: {method}"),
            data: None,
        }
    }
}

enum OutboundFrame {
    Line(Value),
    Flush(oneshot::Sender<()>),
}

type PendingClientRequests =
    Arc<Mutex<HashMap<u64, oneshot::Sender<std::result::Result<Value, RpcError>>>>>;

/// Cheap-to-clone handle for talking to the ACP client.
///
/// Carries the ordered outbound queue plus the pending table for
/// bridge-to-client requests (permission queries, fs pass-throughs). The
/// request-id namespace is independent from both agent-leg correlators.
#[derive(Clone)]
pub struct ClientHandle {
    out_tx: mpsc::UnboundedSender<OutboundFrame>,
    pending: PendingClientRequests,
    next_id: Arc<AtomicU64>,
}

impl ClientHandle {
    /// Create the handle and its writer task over `stdout`.
    pub fn start<W>(stdout: W, cancel: CancellationToken) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(stdout, out_rx, cancel));
        Self {
            out_tx,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Enqueue a `session/update` notification.
    pub fn session_update(&self, session_id: &str, update: &SessionUpdate) {
        let mut params = json!({ "sessionId": session_id });
        match serde_json::to_value(update) {
            Ok(Value::Object(update_map)) => {
                if let Some(obj) = params.as_object_mut() {
                    obj.insert("update".to_owned(), Value::Object(update_map));
                }
            }
            Ok(other) => {
                if let Some(obj) = params.as_object_mut() {
                    obj.insert("update".to_owned(), other);
                }
            }
            Err(err) => {
                warn!(%err, "failed to serialise session update");
                return;
            }
        }
        self.notify("session/update", params);
    }

    /// Enqueue an arbitrary notification.
    pub fn notify(&self, method: &str, params: Value) {
        self.enqueue(json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        }));
    }

    /// Enqueue a success response.
    pub fn respond_ok(&self, id: &Value, result: Value) {
        self.enqueue(json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": result,
        }));
    }

    /// Enqueue an error response.
    pub fn respond_err(&self, id: &Value, error: &RpcError) {
        let mut payload = json!({ "code": error.code, "message": error.message });
        if let Some(ref data) = error.data {
            if let Some(obj) = payload.as_object_mut() {
                obj.insert("data".to_owned(), data.clone());
            }
        }
        self.enqueue(json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": payload,
        }));
    }

    /// Send a bridge-to-client request and wait for the response.
    ///
    /// # Errors
    ///
    /// - [`AppError::Cancelled`] when the client answers with a cancel code.
    /// - [`AppError::Acp`] for any other error response or a closed
    ///   connection.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.lock_pending().insert(id, tx);

        self.enqueue(json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        }));

        match rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) if err.code == -32800 => Err(AppError::Cancelled),
            Ok(Err(err)) => Err(AppError::Acp(format!(
                "client request '{method}' failed: {} (code {})",
                err.message, err.code
            ))),
            Err(_) => Err(AppError::Acp(format!(
                "client connection closed during '{method}'"
            ))),
        }
    }

    /// Resolve a pending bridge-to-client request.
    ///
    /// A response with no matching request is a protocol fault: logged and
    /// dropped.
    pub fn resolve(&self, id: u64, outcome: std::result::Result<Value, RpcError>) {
        let Some(tx) = self.lock_pending().remove(&id) else {
            warn!(request_id = id, "client response with no matching request");
            return;
        };
        let _ = tx.send(outcome);
    }

    /// Wait until everything enqueued so far has been written.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.out_tx.send(OutboundFrame::Flush(tx)).is_err() {
            return;
        }
        let _ = rx.await;
    }

    fn enqueue(&self, frame: Value) {
        if self.out_tx.send(OutboundFrame::Line(frame)).is_err() {
            debug!("client writer gone, dropping outbound frame");
        }
    }

    fn lock_pending(
        &self,
    ) -> std::sync::MutexGuard<
        '_,
        HashMap<u64, oneshot::Sender<std::result::Result<Value, RpcError>>>,
    > {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Writer task ───────────────────────────────────────────────────────────────

async fn run_writer<W>(
    mut stdout: W,
    mut rx: mpsc::UnboundedReceiver<OutboundFrame>,
    cancel: CancellationToken,
) where
    W: AsyncWrite + Unpin + Send,
{
    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("client writer: cancellation received, stopping");
                break;
            }

            frame = rx.recv() => {
                match frame {
                    None => break,
                    Some(OutboundFrame::Flush(ack)) => {
                        let _ = ack.send(());
                    }
                    Some(OutboundFrame::Line(value)) => {
                        let mut bytes = match serde_json::to_vec(&value) {
                            Ok(bytes) => bytes,
                            Err(err) => {
                                warn!(%err, "client writer: serialisation failed");
                                continue;
                            }
                        };
                        bytes.push(b'\n');
                        if let Err(err) = stdout.write_all(&bytes).await {
                            warn!(%err, "client writer: write failed, stopping");
                            break;
                        }
                        if let Err(err) = stdout.flush().await {
                            warn!(%err, "client writer: flush failed, stopping");
                            break;
                        }
                    }
                }
            }
        }
    }
}
