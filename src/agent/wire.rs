//! Agent wire vocabulary: the NDJSON message shapes spoken by the child.
//!
//! One JSON object per line flows in each direction on the child's stdio.
//! Inbound lines are parsed into [`AgentMessage`] by [`parse_agent_line`];
//! outbound objects (user messages, control requests, control responses) are
//! built by the constructors at the bottom of this module.
//!
//! # Known inbound message types
//!
//! | `type`             | Maps to                                   |
//! |--------------------|-------------------------------------------|
//! | `system`           | [`AgentMessage::System`]                  |
//! | `stream_event`     | [`AgentMessage::StreamEvent`]             |
//! | `assistant`        | [`AgentMessage::Assistant`]               |
//! | `user`             | [`AgentMessage::User`]                    |
//! | `result`           | [`AgentMessage::Result`]                  |
//! | `control_request`  | [`AgentMessage::ControlRequest`]          |
//! | `control_response` | [`AgentMessage::ControlResponse`]         |
//! | *(any other)*      | Skipped; logged at `DEBUG`                |

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::{AppError, Result};

// ── Inbound envelope ──────────────────────────────────────────────────────────

/// One parsed message from the child's stdout.
#[derive(Debug, Clone)]
pub enum AgentMessage {
    /// Out-of-band system event (`init`, `task_notification`, …).
    System(SystemMessage),
    /// Streaming partial: one block-start / delta / stop per content block.
    StreamEvent(StreamEventMessage),
    /// Finalised assistant message with complete tool-use inputs.
    Assistant(AssistantMessage),
    /// User-role message emitted by the child (tool results, echoes).
    User(UserMessage),
    /// Terminal per-turn result with metadata.
    Result(ResultMessage),
    /// Control request from the agent to the bridge (permission, hooks).
    ControlRequest(ControlRequestMessage),
    /// Control response answering a bridge-to-agent request.
    ControlResponse(ControlResponseMessage),
}

/// Parse a single NDJSON line from the child's stdout.
///
/// # Return value
///
/// - `Ok(Some(message))` — the line is a recognised, complete message.
/// - `Ok(None)` — the line is empty/whitespace or has an unknown `type`
///   (silently skipped; unknown types are logged at `DEBUG` level).
/// - `Err(AppError::Agent(...))` — the line is not valid JSON, or a known
///   type is missing a required field. Both are protocol faults on a fully
///   terminated line; callers log and continue.
///
/// # Errors
///
/// - [`AppError::Agent`]`("malformed json: …")` — not valid JSON.
/// - [`AppError::Agent`]`("invalid <type> message: …")` — recognised type
///   with a malformed payload.
pub fn parse_agent_line(session_id: &str, line: &str) -> Result<Option<AgentMessage>> {
    if line.trim().is_empty() {
        return Ok(None);
    }

    let value: Value = serde_json::from_str(line)
        .map_err(|e| AppError::Agent(format!("malformed json: {e}")))?;

    let Some(kind) = value.get("type").and_then(Value::as_str) else {
        return Err(AppError::Agent("missing required field: `type`".into()));
    };

    let parsed = match kind {
        "system" => AgentMessage::System(from_payload("system", value)?),
        "stream_event" => AgentMessage::StreamEvent(from_payload("stream_event", value)?),
        "assistant" => AgentMessage::Assistant(from_payload("assistant", value)?),
        "user" => AgentMessage::User(from_payload("user", value)?),
        "result" => AgentMessage::Result(from_payload("result", value)?),
        "control_request" => AgentMessage::ControlRequest(from_payload("control_request", value)?),
        "control_response" => {
            AgentMessage::ControlResponse(from_payload("control_response", value)?)
        }
        other => {
            debug!(
                message_type = other,
                session_id, "agent wire: skipping unknown inbound message type"
            );
            return Ok(None);
        }
    };

    Ok(Some(parsed))
}

fn from_payload<T: serde::de::DeserializeOwned>(kind: &str, value: Value) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| AppError::Agent(format!("invalid {kind} message: {e}")))
}

// ── System events ─────────────────────────────────────────────────────────────

/// Out-of-band `system` message with a free-form payload.
///
/// Known subtypes: `init`, `task_notification`, `compact_boundary`,
/// `hook_event`, `files_persisted`, `status`, `auth_status`. Unknown
/// subtypes are forwarded to the generic session-info path.
#[derive(Debug, Clone, Deserialize)]
pub struct SystemMessage {
    /// Event discriminator.
    pub subtype: String,
    /// Subtype-specific fields, kept raw.
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl SystemMessage {
    /// Interpret this event as a deferred task completion, if it is one.
    #[must_use]
    pub fn task_notification(&self) -> Option<TaskNotification> {
        if self.subtype != "task_notification" {
            return None;
        }
        serde_json::from_value(Value::Object(self.payload.clone())).ok()
    }
}

/// Deferred completion of a background tool-use, delivered asynchronously
/// (potentially between turns).
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TaskNotification {
    /// Agent-assigned task identifier.
    pub task_id: Option<String>,
    /// Alternative identifier field some agents surface.
    #[serde(alias = "agentId")]
    pub agent_id: Option<String>,
    /// Output file the background task wrote to.
    pub output_file: Option<String>,
    /// Completion status, `completed` or `failed`.
    pub status: Option<String>,
    /// Short human-readable summary of the outcome.
    pub summary: Option<String>,
}

// ── Streaming partials ────────────────────────────────────────────────────────

/// Envelope around one Anthropic-style stream event.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamEventMessage {
    /// The stream event itself.
    pub event: StreamEvent,
    /// Tool-use identifier of the parent subagent, when nested.
    #[serde(default)]
    pub parent_tool_use_id: Option<String>,
}

/// One streaming event: block lifecycle plus message bookkeeping.
///
/// Only block starts and text/thinking deltas produce client updates; the
/// rest are bookkeeping and emit nothing.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// New message opened. No emission.
    MessageStart,
    /// A content block opened at `index`.
    ContentBlockStart {
        /// Block position within the message.
        index: usize,
        /// The opening (possibly partial) block.
        content_block: ContentBlock,
    },
    /// Incremental content for the block at `index`.
    ContentBlockDelta {
        /// Block position within the message.
        index: usize,
        /// The delta payload.
        delta: ContentDelta,
    },
    /// The block at `index` closed. No emission.
    ContentBlockStop {
        /// Block position within the message.
        index: usize,
    },
    /// Message-level metadata delta. No emission.
    MessageDelta,
    /// Message closed. No emission.
    MessageStop,
    /// Forward-compatible catch-all. No emission.
    #[serde(other)]
    Other,
}

/// Delta payload inside a `content_block_delta` event.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentDelta {
    /// New visible text.
    TextDelta {
        /// The appended text.
        text: String,
    },
    /// New thinking text.
    ThinkingDelta {
        /// The appended thinking text.
        thinking: String,
    },
    /// Partial JSON for a tool-use input. No emission.
    InputJsonDelta {
        /// The appended JSON fragment.
        partial_json: String,
    },
    /// Thinking signature material. No emission.
    SignatureDelta,
    /// Citation material. No emission.
    CitationsDelta,
    /// Forward-compatible catch-all. No emission.
    #[serde(other)]
    Other,
}

// ── Content blocks ────────────────────────────────────────────────────────────

/// A typed unit inside an assistant or user message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain assistant or user text.
    Text {
        /// The text content.
        text: String,
    },
    /// Extended thinking text.
    Thinking {
        /// The thinking content.
        thinking: String,
    },
    /// A tool invocation announced by the agent.
    ToolUse {
        /// Agent-assigned opaque tool-use identifier.
        id: String,
        /// Tool name.
        name: String,
        /// Input payload; may be empty/partial during streaming.
        input: Value,
    },
    /// The result of a previously announced tool invocation.
    ToolResult {
        /// Identifier of the tool-use this result answers.
        tool_use_id: String,
        /// Result content: string, or array of content blocks.
        #[serde(default)]
        content: Option<Value>,
        /// Whether the tool failed.
        #[serde(default)]
        is_error: Option<bool>,
    },
    /// An inline image.
    Image {
        /// Image source object (base64 or URL form).
        source: Value,
    },
    /// Forward-compatible catch-all for unknown block types.
    #[serde(other)]
    Other,
}

/// Message content that may be a bare string or a list of blocks.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Bare string form.
    Text(String),
    /// Structured block list.
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    /// View the content uniformly as a block list.
    #[must_use]
    pub fn as_blocks(&self) -> Vec<ContentBlock> {
        match self {
            Self::Text(text) => vec![ContentBlock::Text { text: text.clone() }],
            Self::Blocks(blocks) => blocks.clone(),
        }
    }
}

/// Inner `message` object carried by assistant and user envelopes.
#[derive(Debug, Clone, Deserialize)]
pub struct MessagePayload {
    /// Content blocks (or bare string) of the message.
    pub content: MessageContent,
    /// Model that produced the message, when reported.
    #[serde(default)]
    pub model: Option<String>,
}

/// Finalised assistant message.
#[derive(Debug, Clone, Deserialize)]
pub struct AssistantMessage {
    /// The message payload.
    pub message: MessagePayload,
    /// Tool-use identifier of the parent subagent, when nested.
    #[serde(default)]
    pub parent_tool_use_id: Option<String>,
}

/// User-role message emitted by the child (tool results, context echoes).
#[derive(Debug, Clone, Deserialize)]
pub struct UserMessage {
    /// The message payload.
    pub message: MessagePayload,
    /// Tool-use identifier of the parent subagent, when nested.
    #[serde(default)]
    pub parent_tool_use_id: Option<String>,
}

// ── Terminal result ───────────────────────────────────────────────────────────

/// Terminal `result` message closing one turn.
#[derive(Debug, Clone, Deserialize)]
pub struct ResultMessage {
    /// Result discriminator: `success`, `error_max_turns`,
    /// `error_max_budget`, `error_max_structured_output_retries`,
    /// `error_during_execution`.
    pub subtype: String,
    /// Whether the turn failed.
    #[serde(default)]
    pub is_error: bool,
    /// Wall-clock duration of the turn in milliseconds.
    #[serde(default)]
    pub duration_ms: Option<u64>,
    /// API-time duration of the turn in milliseconds.
    #[serde(default)]
    pub duration_api_ms: Option<u64>,
    /// Number of model turns consumed.
    #[serde(default)]
    pub num_turns: Option<u32>,
    /// Total cost of the turn in USD.
    #[serde(default)]
    pub total_cost_usd: Option<f64>,
    /// Aggregate token usage.
    #[serde(default)]
    pub usage: Option<Value>,
    /// Per-model token usage.
    #[serde(default, alias = "modelUsage")]
    pub model_usage: Option<Value>,
    /// Permission denials recorded during the turn.
    #[serde(default)]
    pub permission_denials: Option<Value>,
    /// Structured output produced by the turn, if requested.
    #[serde(default)]
    pub structured_output: Option<Value>,
    /// Final result text.
    #[serde(default)]
    pub result: Option<String>,
    /// Error messages accumulated by a failed turn.
    #[serde(default)]
    pub errors: Option<Vec<String>>,
}

// ── Control plane ─────────────────────────────────────────────────────────────

/// Control request from the agent to the bridge.
#[derive(Debug, Clone, Deserialize)]
pub struct ControlRequestMessage {
    /// Correlation identifier; echoed in the control response.
    pub request_id: String,
    /// The request payload.
    pub request: ControlRequestPayload,
}

/// Payload of an agent-to-bridge control request.
#[derive(Debug, Clone, Deserialize)]
pub struct ControlRequestPayload {
    /// Request discriminator: `can_use_tool`, `hook_callback`,
    /// `read_file`, `write_file`.
    pub subtype: String,
    /// Subtype-specific fields, kept raw.
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl ControlRequestPayload {
    /// Fetch a string parameter by name.
    #[must_use]
    pub fn str_param(&self, name: &str) -> Option<&str> {
        self.params.get(name).and_then(Value::as_str)
    }
}

/// Control response answering a bridge-to-agent request.
#[derive(Debug, Clone, Deserialize)]
pub struct ControlResponseMessage {
    /// The response payload.
    pub response: ControlResponsePayload,
}

/// Payload of an agent-to-bridge control response.
#[derive(Debug, Clone, Deserialize)]
pub struct ControlResponsePayload {
    /// `success` or `error`.
    pub subtype: String,
    /// Identifier of the request being answered.
    pub request_id: String,
    /// Success payload.
    #[serde(default)]
    pub response: Option<Value>,
    /// Error description when `subtype` is `error`.
    #[serde(default)]
    pub error: Option<String>,
}

// ── Outbound constructors ─────────────────────────────────────────────────────

/// Build an outbound user message for the child's stdin.
#[must_use]
pub fn outbound_user_message(session_id: &str, content: Vec<Value>) -> Value {
    json!({
        "type": "user",
        "message": { "role": "user", "content": content },
        "parent_tool_use_id": null,
        "session_id": session_id,
    })
}

/// Build an outbound bridge-to-agent control request.
#[must_use]
pub fn outbound_control_request(request_id: &str, subtype: &str, mut params: Value) -> Value {
    let request = match params.as_object_mut() {
        Some(map) => {
            map.insert("subtype".to_owned(), Value::String(subtype.to_owned()));
            Value::Object(std::mem::take(map))
        }
        None => json!({ "subtype": subtype }),
    };
    json!({
        "type": "control_request",
        "request_id": request_id,
        "request": request,
    })
}

/// Build an outbound success response to an agent-to-bridge control request.
#[must_use]
pub fn outbound_control_success(request_id: &str, response: Value) -> Value {
    json!({
        "type": "control_response",
        "response": {
            "subtype": "success",
            "request_id": request_id,
            "response": response,
        }
    })
}

/// Build an outbound error response to an agent-to-bridge control request.
#[must_use]
pub fn outbound_control_error(request_id: &str, error: &str) -> Value {
    json!({
        "type": "control_response",
        "response": {
            "subtype": "error",
            "request_id": request_id,
            "error": error,
        }
    })
}
