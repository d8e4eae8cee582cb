//! Permission query handling: the client-delegated oracle.
//!
//! The bridge is stateless about permission policy beyond the session's
//! current mode; the ACP client is the authority. When the child asks
//! `can_use_tool`, the handler either answers from the mode fast paths
//! (`bypassPermissions`, `acceptEdits` for the edit-tool subset) or consults
//! the client with three options. The plan-exit tool is special-cased: its
//! choices switch the session's mode.

use serde_json::{json, Value};
use tracing::{debug, info};

use crate::acp::notify::ClientHandle;
use crate::acp::schema::{
    PermissionOption, PermissionOptionKind, PermissionOutcome, RequestPermissionParams,
    RequestPermissionResult, SessionUpdate, ToolCallUpdate,
};
use crate::session::state::{PermissionMode, SessionShared};
use crate::translate::title;
use crate::{AppError, Result};

/// Tool that exits planning mode; handled by a dedicated choice set.
pub const PLAN_EXIT_TOOL: &str = "ExitPlanMode";

/// The file-mutating tools granted automatically under `acceptEdits`.
pub const EDIT_TOOLS: &[&str] = &["Write", "Edit", "MultiEdit", "NotebookEdit"];

/// Decide a `can_use_tool` query; returns the control-response payload for
/// the child.
///
/// # Errors
///
/// Returns [`AppError::Cancelled`] when the client dismisses the query
/// mid-turn — the caller lets that interrupt the turn.
pub async fn handle_can_use_tool(
    client: &ClientHandle,
    shared: &SessionShared,
    tool_name: &str,
    input: &Value,
) -> Result<Value> {
    if tool_name == PLAN_EXIT_TOOL {
        return handle_plan_exit(client, shared, input).await;
    }

    let mode = shared.mode();

    // Mode fast paths answer without a client round-trip.
    if mode == PermissionMode::BypassPermissions {
        debug!(
            session_id = %shared.session_id,
            tool_name,
            "permission granted by bypassPermissions"
        );
        return Ok(allow_response(input, Some(session_rule(tool_name))));
    }
    if mode == PermissionMode::AcceptEdits && EDIT_TOOLS.contains(&tool_name) {
        debug!(
            session_id = %shared.session_id,
            tool_name,
            "permission granted by acceptEdits"
        );
        return Ok(allow_response(input, Some(session_rule(tool_name))));
    }
    if mode == PermissionMode::DontAsk {
        return Ok(deny_response("not permitted in dontAsk mode"));
    }

    // Everything else goes to the client.
    let params = RequestPermissionParams {
        session_id: shared.session_id.clone(),
        tool_call: tool_call_summary(tool_name, input),
        options: standard_options(),
    };

    let outcome = request_outcome(client, &params).await?;

    match outcome {
        PermissionOutcome::Selected { option_id } => match option_id.as_str() {
            "allow_always" => {
                info!(
                    session_id = %shared.session_id,
                    tool_name,
                    "permission granted always"
                );
                Ok(allow_response(input, Some(session_rule(tool_name))))
            }
            "allow_once" => Ok(allow_response(input, None)),
            _ => Ok(deny_response("rejected by user")),
        },
        // A dismissed dialog is a deny; a cancelled turn interrupts it.
        PermissionOutcome::Cancelled => {
            if shared.is_cancelled() {
                Err(AppError::Cancelled)
            } else {
                Ok(deny_response("permission request cancelled"))
            }
        }
    }
}

/// Plan-exit choice set: accept edits, default approval, or keep planning.
///
/// Accepting or defaulting flips the session's mode, emits the matching
/// `current_mode_update`, and records the updated permission rule in the
/// allow response.
async fn handle_plan_exit(
    client: &ClientHandle,
    shared: &SessionShared,
    input: &Value,
) -> Result<Value> {
    let params = RequestPermissionParams {
        session_id: shared.session_id.clone(),
        tool_call: tool_call_summary(PLAN_EXIT_TOOL, input),
        options: vec![
            PermissionOption {
                option_id: "accept_edits".to_owned(),
                name: "Yes, and auto-accept edits".to_owned(),
                kind: PermissionOptionKind::AllowAlways,
            },
            PermissionOption {
                option_id: "default".to_owned(),
                name: "Yes, with manual approval".to_owned(),
                kind: PermissionOptionKind::AllowOnce,
            },
            PermissionOption {
                option_id: "keep_planning".to_owned(),
                name: "No, keep planning".to_owned(),
                kind: PermissionOptionKind::RejectOnce,
            },
        ],
    };

    let outcome = request_outcome(client, &params).await?;

    let new_mode = match outcome {
        PermissionOutcome::Selected { ref option_id } => match option_id.as_str() {
            "accept_edits" => Some(PermissionMode::AcceptEdits),
            "default" => Some(PermissionMode::Default),
            _ => None,
        },
        PermissionOutcome::Cancelled => {
            if shared.is_cancelled() {
                return Err(AppError::Cancelled);
            }
            None
        }
    };

    let Some(new_mode) = new_mode else {
        return Ok(deny_response("keep planning"));
    };

    shared.set_mode(new_mode);
    client.session_update(
        &shared.session_id,
        &SessionUpdate::CurrentModeUpdate {
            current_mode_id: new_mode.as_str().to_owned(),
        },
    );
    info!(
        session_id = %shared.session_id,
        mode = new_mode.as_str(),
        "plan exited, mode switched"
    );

    Ok(allow_response(
        input,
        Some(json!({
            "type": "setMode",
            "mode": new_mode.as_str(),
            "destination": "session",
        })),
    ))
}

// ── Response shapes to the child ─────────────────────────────────────────────

/// Build the allow payload, optionally carrying an updated permission rule.
#[must_use]
pub fn allow_response(input: &Value, updated_permission: Option<Value>) -> Value {
    let mut response = json!({
        "behavior": "allow",
        "updatedInput": input,
    });
    if let Some(rule) = updated_permission {
        if let Some(obj) = response.as_object_mut() {
            obj.insert("updatedPermissions".to_owned(), json!([rule]));
        }
    }
    response
}

/// Build the deny payload.
#[must_use]
pub fn deny_response(message: &str) -> Value {
    json!({
        "behavior": "deny",
        "message": message,
    })
}

/// Session-scoped always-allow rule for one tool.
fn session_rule(tool_name: &str) -> Value {
    json!({
        "type": "addRules",
        "rules": [{ "toolName": tool_name }],
        "behavior": "allow",
        "destination": "session",
    })
}

/// The three standard choices offered to the client.
fn standard_options() -> Vec<PermissionOption> {
    vec![
        PermissionOption {
            option_id: "allow_always".to_owned(),
            name: "Always allow".to_owned(),
            kind: PermissionOptionKind::AllowAlways,
        },
        PermissionOption {
            option_id: "allow_once".to_owned(),
            name: "Allow once".to_owned(),
            kind: PermissionOptionKind::AllowOnce,
        },
        PermissionOption {
            option_id: "reject_once".to_owned(),
            name: "Reject".to_owned(),
            kind: PermissionOptionKind::RejectOnce,
        },
    ]
}

/// Compact tool-call summary shown inside the permission dialog.
fn tool_call_summary(tool_name: &str, input: &Value) -> ToolCallUpdate {
    let mut update = ToolCallUpdate::for_id(&format!("permission:{tool_name}"));
    update.title = Some(title::tool_title(tool_name, input));
    update.kind = Some(title::tool_kind(tool_name));
    update.raw_input = Some(input.clone());
    update
}

/// Round-trip one permission request through the client.
async fn request_outcome(
    client: &ClientHandle,
    params: &RequestPermissionParams,
) -> Result<PermissionOutcome> {
    let params_value = serde_json::to_value(params)
        .map_err(|err| AppError::Internal(format!("serialise permission request: {err}")))?;

    let raw = match client.request("session/request_permission", params_value).await {
        Ok(raw) => raw,
        Err(AppError::Cancelled) => return Ok(PermissionOutcome::Cancelled),
        Err(err) => return Err(err),
    };

    let result: RequestPermissionResult = serde_json::from_value(raw)
        .map_err(|err| AppError::Acp(format!("invalid permission outcome: {err}")))?;
    Ok(result.outcome)
}
