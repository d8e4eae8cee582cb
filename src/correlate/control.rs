//! Bridge-to-agent control-request correlator.
//!
//! Allocates a unique request identifier per outbound control request,
//! installs a one-shot resolver, and completes it when the matching
//! control response arrives (on the router's reader task). The correlator
//! imposes no timeouts; cancellation is the escape hatch — dropping the
//! returned future abandons the pending entry, which is then cleaned up
//! when (if ever) the response arrives.
//!
//! Mutating requests (`interrupt`, `set_permission_mode`, `set_model`,
//! `set_max_thinking_tokens`, MCP reconfiguration) are single-flight per
//! kind: a second one while the first is outstanding is a caller error.
//!
//! The agent-to-bridge direction is the orchestrator's concern — those
//! requests arrive on the turn plane and are answered by writing a control
//! response through the transport; they never enter this table.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::agent::wire::{outbound_control_request, ControlResponsePayload};
use crate::agent::transport::AgentTransport;
use crate::{AppError, Result};

/// Control-request kinds that may have at most one instance in flight.
const SINGLE_FLIGHT_KINDS: &[&str] = &[
    "interrupt",
    "set_permission_mode",
    "set_model",
    "set_max_thinking_tokens",
    "mcp_reconnect",
    "mcp_toggle",
    "mcp_set_servers",
];

type PendingMap = HashMap<String, oneshot::Sender<std::result::Result<Value, String>>>;

/// Correlates bridge-to-agent control requests with their responses.
pub struct ControlCorrelator {
    session_id: String,
    next_id: AtomicU64,
    pending: Mutex<PendingMap>,
    in_flight_kinds: Mutex<HashSet<String>>,
}

impl ControlCorrelator {
    /// Create an empty correlator for one session.
    #[must_use]
    pub fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_owned(),
            next_id: AtomicU64::new(0),
            pending: Mutex::new(HashMap::new()),
            in_flight_kinds: Mutex::new(HashSet::new()),
        }
    }

    /// Send a control request and wait for its response.
    ///
    /// # Errors
    ///
    /// - [`AppError::Agent`] when a single-flight kind is already
    ///   outstanding, or the agent answers with an error payload.
    /// - [`AppError::SessionDead`] when the transport is dead or the
    ///   response channel is dropped (child exited mid-request).
    pub async fn request(
        &self,
        transport: &AgentTransport,
        subtype: &str,
        params: Value,
    ) -> Result<Value> {
        let _guard = self.single_flight_guard(subtype)?;

        let request_id = format!("req_{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.lock_pending();
            // Identifiers come from a process-local counter; a collision
            // here indicates a correlator bug, not a peer fault.
            if pending.insert(request_id.clone(), tx).is_some() {
                return Err(AppError::Internal(format!(
                    "duplicate control request id '{request_id}'"
                )));
            }
        }

        let frame = outbound_control_request(&request_id, subtype, params);
        if let Err(err) = transport.write(frame) {
            self.lock_pending().remove(&request_id);
            return Err(err);
        }

        debug!(
            session_id = %self.session_id,
            request_id,
            subtype,
            "control request sent"
        );

        match rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(message)) => Err(AppError::Agent(format!(
                "control request '{subtype}' failed: {message}"
            ))),
            Err(_) => Err(AppError::SessionDead(format!(
                "agent exited before answering control request '{subtype}'"
            ))),
        }
    }

    /// Send a control request without waiting for the response.
    ///
    /// The eventual response still flows through [`Self::resolve`], which
    /// logs it; used for `initialize`, whose payload nothing awaits.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::SessionDead`] when the transport is dead.
    pub fn request_detached(
        &self,
        transport: &AgentTransport,
        subtype: &str,
        params: Value,
    ) -> Result<()> {
        let request_id = format!("req_{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        transport.write(outbound_control_request(&request_id, subtype, params))?;
        debug!(
            session_id = %self.session_id,
            request_id,
            subtype,
            "detached control request sent"
        );
        Ok(())
    }

    /// Complete the pending entry matching `payload.request_id`.
    ///
    /// Runs on the router's reader task and never blocks. A response with
    /// no matching request is a protocol fault: logged and dropped.
    pub fn resolve(&self, payload: ControlResponsePayload) {
        let entry = self.lock_pending().remove(&payload.request_id);
        let Some(tx) = entry else {
            // Detached requests land here too; only warn when the agent
            // reported a failure.
            if payload.subtype == "error" {
                warn!(
                    session_id = %self.session_id,
                    request_id = %payload.request_id,
                    error = payload.error.as_deref().unwrap_or("unknown"),
                    "unmatched control error response"
                );
            } else {
                debug!(
                    session_id = %self.session_id,
                    request_id = %payload.request_id,
                    "control response with no waiter"
                );
            }
            return;
        };

        let outcome = if payload.subtype == "error" {
            Err(payload
                .error
                .unwrap_or_else(|| "unspecified agent error".to_owned()))
        } else {
            Ok(payload.response.unwrap_or(Value::Null))
        };

        // The waiter may have been cancelled; a dropped receiver is fine.
        let _ = tx.send(outcome);
    }

    /// Fail every pending request, e.g. when the child dies.
    pub fn fail_all(&self, reason: &str) {
        let mut pending = self.lock_pending();
        for (request_id, tx) in pending.drain() {
            debug!(
                session_id = %self.session_id,
                request_id,
                "failing pending control request"
            );
            let _ = tx.send(Err(reason.to_owned()));
        }
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, PendingMap> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserve single-flight kinds; released when the guard drops.
    fn single_flight_guard(&self, subtype: &str) -> Result<Option<KindGuard<'_>>> {
        if !SINGLE_FLIGHT_KINDS.contains(&subtype) {
            return Ok(None);
        }
        let mut kinds = self
            .in_flight_kinds
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !kinds.insert(subtype.to_owned()) {
            return Err(AppError::Agent(format!(
                "control request '{subtype}' already in flight"
            )));
        }
        Ok(Some(KindGuard {
            correlator: self,
            kind: subtype.to_owned(),
        }))
    }
}

/// Releases a single-flight reservation on drop.
struct KindGuard<'a> {
    correlator: &'a ControlCorrelator,
    kind: String,
}

impl Drop for KindGuard<'_> {
    fn drop(&mut self) {
        self.correlator
            .in_flight_kinds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.kind);
    }
}
