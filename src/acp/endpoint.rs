//! Upstream ACP endpoint: the JSON-RPC read loop over the bridge's stdio.
//!
//! One JSON object per line. Inbound requests are dispatched to the
//! orchestrator on their own tasks, so a long-running `session/prompt`
//! never blocks a `session/cancel` arriving behind it. Inbound responses
//! resolve the bridge-to-client pending table. On EOF the orchestrator
//! closes every live session and the writer task is stopped.

use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::acp::codec::NdjsonCodec;
use crate::acp::notify::{ClientHandle, RpcError};
use crate::acp::schema::{InitializeParams, NewSessionParams, PromptParams, SessionRefParams};
use crate::config::RelayConfig;
use crate::session::orchestrator::Orchestrator;
use crate::{AppError, Result};

/// Serve one ACP connection over the given streams until EOF.
///
/// # Errors
///
/// Returns [`AppError::Io`] only for unrecoverable stream failures;
/// protocol faults are logged and skipped.
pub async fn serve<R, W>(config: RelayConfig, stdin: R, stdout: W) -> Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let cancel = CancellationToken::new();
    let client = ClientHandle::start(stdout, cancel.clone());
    let orchestrator = Arc::new(Orchestrator::new(config, client.clone()));

    let mut framed = FramedRead::new(stdin, NdjsonCodec::new());

    while let Some(item) = framed.next().await {
        match item {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                handle_line(&orchestrator, &client, &line);
            }
            Err(AppError::Io(err)) => {
                warn!(%err, "acp endpoint: stream error, closing");
                break;
            }
            Err(err) => {
                // Oversized line: protocol fault, skip and continue.
                warn!(%err, "acp endpoint: codec fault, skipping line");
            }
        }
    }

    info!("acp endpoint: client stream closed, shutting down");
    orchestrator.shutdown().await;
    client.flush().await;
    cancel.cancel();
    Ok(())
}

/// Parse one inbound line and route it.
fn handle_line(orchestrator: &Arc<Orchestrator>, client: &ClientHandle, line: &str) {
    let value: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(err) => {
            warn!(%err, "acp endpoint: malformed json line, skipping");
            return;
        }
    };

    let id = value.get("id").cloned();
    let method = value.get("method").and_then(Value::as_str).map(str::to_owned);

    match method {
        Some(method) => {
            let params = value.get("params").cloned().unwrap_or(Value::Null);
            let orchestrator = Arc::clone(orchestrator);
            let client = client.clone();
            // Each request runs on its own task so cancel can overtake a
            // running prompt.
            tokio::spawn(async move {
                let outcome = dispatch(&orchestrator, &method, params).await;
                if let Some(ref id) = id {
                    if !id.is_null() {
                        match outcome {
                            Ok(result) => client.respond_ok(id, result),
                            Err(err) => client.respond_err(id, &err),
                        }
                        return;
                    }
                }
                if let Err(err) = outcome {
                    debug!(method, code = err.code, error = %err.message, "notification handler failed");
                }
            });
        }
        None => {
            // No method: a response to one of our own requests.
            let Some(id) = id.as_ref().and_then(Value::as_u64) else {
                warn!("acp endpoint: frame with neither method nor known id");
                return;
            };
            if let Some(error) = value.get("error") {
                let rpc_error = RpcError {
                    code: error.get("code").and_then(Value::as_i64).unwrap_or(-32603),
                    message: error
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown error")
                        .to_owned(),
                    data: error.get("data").cloned(),
                };
                client.resolve(id, Err(rpc_error));
            } else {
                let result = value.get("result").cloned().unwrap_or(Value::Null);
                client.resolve(id, Ok(result));
            }
        }
    }
}

/// Route one request to the orchestrator.
async fn dispatch(
    orchestrator: &Arc<Orchestrator>,
    method: &str,
    params: Value,
) -> std::result::Result<Value, RpcError> {
    match method {
        "initialize" => {
            let params: InitializeParams = parse_params(params)?;
            to_result(orchestrator.initialize(params))
        }
        "authenticate" => Err(RpcError {
            code: -32000,
            message: "authentication runs through the terminal login method".to_owned(),
            data: None,
        }),
        "session/new" => {
            let params: NewSessionParams = parse_params(params)?;
            let result = orchestrator.new_session(params).await.map_err(app_error)?;
            to_result(result)
        }
        "session/fork" => {
            let params: SessionRefParams = parse_params(params)?;
            let result = orchestrator.fork_session(params).await.map_err(app_error)?;
            to_result(result)
        }
        "session/resume" | "session/load" => {
            let params: SessionRefParams = parse_params(params)?;
            let result = orchestrator
                .resume_session(params)
                .await
                .map_err(app_error)?;
            to_result(result)
        }
        "session/prompt" => {
            let params: PromptParams = parse_params(params)?;
            let result = orchestrator.prompt(params).await.map_err(app_error)?;
            to_result(result)
        }
        "session/cancel" => {
            let session_id = params
                .get("sessionId")
                .and_then(Value::as_str)
                .ok_or_else(|| invalid_params("missing sessionId"))?;
            orchestrator.cancel(session_id).await.map_err(app_error)?;
            Ok(Value::Null)
        }
        "session/set_mode" => {
            let session_id = params
                .get("sessionId")
                .and_then(Value::as_str)
                .ok_or_else(|| invalid_params("missing sessionId"))?;
            let mode_id = params
                .get("modeId")
                .and_then(Value::as_str)
                .ok_or_else(|| invalid_params("missing modeId"))?;
            orchestrator
                .set_session_mode(session_id, mode_id)
                .await
                .map_err(app_error)?;
            Ok(Value::Null)
        }
        "session/set_model" => {
            let session_id = params
                .get("sessionId")
                .and_then(Value::as_str)
                .ok_or_else(|| invalid_params("missing sessionId"))?;
            let model_id = params
                .get("modelId")
                .and_then(Value::as_str)
                .ok_or_else(|| invalid_params("missing modelId"))?;
            orchestrator
                .set_session_model(session_id, model_id)
                .await
                .map_err(app_error)?;
            Ok(Value::Null)
        }
        "fs/read_text_file" => orchestrator.read_text_file(params).await.map_err(app_error),
        "fs/write_text_file" => orchestrator
            .write_text_file(params)
            .await
            .map_err(app_error),
        other => match orchestrator.ext_method(other, params).await {
            Ok(result) => Ok(result),
            Err(AppError::NotFound(ref what)) if what.starts_with("ext method") => {
                Err(RpcError::method_not_found(other))
            }
            Err(err) => Err(app_error(err)),
        },
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn parse_params<T: serde::de::DeserializeOwned>(
    params: Value,
) -> std::result::Result<T, RpcError> {
    serde_json::from_value(params).map_err(|err| invalid_params(&err.to_string()))
}

fn to_result<T: serde::Serialize>(value: T) -> std::result::Result<Value, RpcError> {
    serde_json::to_value(value).map_err(|err| RpcError {
        code: -32603,
        message: format!("failed to serialise response: {err}"),
        data: None,
    })
}

fn invalid_params(detail: &str) -> RpcError {
    RpcError {
        code: -32602,
        message: format!("invalid params: {detail}"),
        data: None,
    }
}

fn app_error(err: AppError) -> RpcError {
    RpcError::from_app_error(&err)
}
