//! Upstream ACP vocabulary: the JSON shapes exchanged with the editor
//! client over newline-delimited JSON-RPC.
//!
//! Field names follow the ACP convention (camelCase); update payloads are
//! discriminated by the `sessionUpdate` field. The closed set of update
//! kinds the bridge emits is exactly [`SessionUpdate`]'s variants.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Initialization ────────────────────────────────────────────────────────────

/// Capabilities advertised by the connecting client.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientCapabilities {
    /// File-system capabilities.
    #[serde(default)]
    pub fs: FsCapabilities,
    /// Whether the client hosts terminals for the agent.
    #[serde(default)]
    pub terminal: bool,
    /// Extension metadata; `terminal-auth` marks interactive-login support.
    #[serde(default, rename = "_meta")]
    pub meta: Option<Value>,
}

impl ClientCapabilities {
    /// Whether the client advertises `_meta.terminal-auth`.
    #[must_use]
    pub fn supports_terminal_auth(&self) -> bool {
        self.meta
            .as_ref()
            .and_then(|m| m.get("terminal-auth"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// Client file-system capabilities.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FsCapabilities {
    /// Client can serve file reads.
    #[serde(default)]
    pub read_text_file: bool,
    /// Client can serve file writes.
    #[serde(default)]
    pub write_text_file: bool,
}

/// `initialize` request parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Protocol version proposed by the client.
    #[serde(default)]
    pub protocol_version: u16,
    /// Client capability set.
    #[serde(default)]
    pub client_capabilities: ClientCapabilities,
}

/// `initialize` response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// Protocol version the bridge speaks.
    pub protocol_version: u16,
    /// Agent capability set.
    pub agent_capabilities: AgentCapabilities,
    /// Bridge identification.
    pub agent_info: AgentInfo,
    /// Supported authentication methods.
    pub auth_methods: Vec<AuthMethod>,
}

/// Capabilities the bridge advertises.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCapabilities {
    /// Prompt content capabilities.
    pub prompt_capabilities: PromptCapabilities,
    /// MCP transport capabilities.
    pub mcp_capabilities: McpCapabilities,
    /// Session lifecycle extensions.
    pub session_capabilities: SessionCapabilities,
}

/// What the bridge accepts inside prompts.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptCapabilities {
    /// Image prompt parts.
    pub image: bool,
    /// Embedded resource context.
    pub embedded_context: bool,
}

/// MCP transports the bridge forwards to the child.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct McpCapabilities {
    /// Streamable HTTP servers.
    pub http: bool,
    /// SSE servers.
    pub sse: bool,
}

/// Session lifecycle extensions.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCapabilities {
    /// `session/fork` is available.
    pub fork: bool,
    /// `session/resume` is available.
    pub resume: bool,
    /// `sessions/list` is available.
    pub list: bool,
}

/// Bridge identification returned from `initialize`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentInfo {
    /// Machine-readable name.
    pub name: String,
    /// Semantic version.
    pub version: String,
    /// Human-readable title.
    pub title: String,
}

/// An authentication method descriptor.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthMethod {
    /// Stable identifier.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Longer description.
    pub description: String,
    /// Exec spec for terminal-auth clients, under `_meta`.
    #[serde(rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

// ── Sessions ──────────────────────────────────────────────────────────────────

/// `session/new` request parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSessionParams {
    /// Working directory for the session.
    pub cwd: String,
    /// Client-specified MCP servers, forwarded verbatim.
    #[serde(default)]
    pub mcp_servers: Vec<Value>,
}

/// `session/fork` and `session/resume` parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRefParams {
    /// Identifier of the session being forked or resumed.
    pub session_id: String,
    /// Working directory for the session.
    pub cwd: String,
    /// Client-specified MCP servers, forwarded verbatim.
    #[serde(default)]
    pub mcp_servers: Vec<Value>,
}

/// Response to `session/new`, `session/fork`, and `session/resume`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSessionResult {
    /// Session identifier (opaque to the client).
    pub session_id: String,
    /// Current and available permission modes.
    pub modes: SessionModeState,
    /// Current and available models.
    pub models: SessionModelState,
}

/// Permission-mode state of a session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionModeState {
    /// Identifier of the active mode.
    pub current_mode_id: String,
    /// Every selectable mode.
    pub available_modes: Vec<SessionModeInfo>,
}

/// One selectable permission mode.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionModeInfo {
    /// Mode identifier.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Short description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Model state of a session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionModelState {
    /// Identifier of the active model.
    pub current_model_id: String,
    /// Every selectable model.
    pub available_models: Vec<ModelInfo>,
}

/// One selectable model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    /// Model identifier.
    pub model_id: String,
    /// Human-readable name.
    pub name: String,
    /// Short description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

// ── Prompt ────────────────────────────────────────────────────────────────────

/// `session/prompt` request parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptParams {
    /// Target session.
    pub session_id: String,
    /// Prompt content.
    #[serde(default)]
    pub prompt: Vec<AcpContentBlock>,
}

/// One prompt part or update content block on the ACP side.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AcpContentBlock {
    /// Plain text.
    Text {
        /// The text.
        text: String,
    },
    /// An image by data or by URI.
    Image {
        /// Base64 payload.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<String>,
        /// Media type of the payload.
        #[serde(default, rename = "mimeType", skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
        /// Image URI, for URL-sourced images.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        uri: Option<String>,
    },
    /// Audio content (ignored by the bridge).
    Audio {
        /// Base64 payload.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<String>,
        /// Media type of the payload.
        #[serde(default, rename = "mimeType", skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
    /// A link to a resource the agent may fetch itself.
    ResourceLink {
        /// Resource URI.
        uri: String,
        /// Display name.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    /// An embedded resource with inline content.
    Resource {
        /// The embedded payload.
        resource: EmbeddedResource,
    },
    /// Forward-compatible catch-all.
    #[serde(other)]
    Other,
}

/// Inline payload of an embedded resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddedResource {
    /// Resource URI.
    pub uri: String,
    /// Text content, when textual.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Base64 blob content, when binary. Ignored by the bridge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob: Option<String>,
    /// Media type.
    #[serde(default, rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Why a prompt turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The agent finished its turn.
    EndTurn,
    /// The client cancelled the turn.
    Cancelled,
    /// The agent hit its configured turn limit.
    MaxTurnRequests,
}

/// `session/prompt` response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptResult {
    /// Why the turn ended.
    pub stop_reason: StopReason,
    /// Result metadata: durations, usage, cost, denials.
    #[serde(rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

// ── Session updates ───────────────────────────────────────────────────────────

/// One `session/update` notification payload.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "sessionUpdate", rename_all = "snake_case")]
pub enum SessionUpdate {
    /// New streamed agent text.
    AgentMessageChunk {
        /// The chunk content.
        content: AcpContentBlock,
    },
    /// Forwarded user-plane content.
    UserMessageChunk {
        /// The chunk content.
        content: AcpContentBlock,
    },
    /// New streamed agent thinking.
    AgentThoughtChunk {
        /// The chunk content.
        content: AcpContentBlock,
    },
    /// A newly announced tool call.
    ToolCall(ToolCall),
    /// A state change for a previously announced tool call.
    ToolCallUpdate(ToolCallUpdate),
    /// A plan snapshot from the planning tool.
    Plan {
        /// Current plan entries.
        entries: Vec<PlanEntry>,
    },
    /// The session's permission mode changed.
    CurrentModeUpdate {
        /// Identifier of the new mode.
        #[serde(rename = "currentModeId")]
        current_mode_id: String,
    },
    /// The set of available slash commands changed.
    AvailableCommandsUpdate {
        /// The new command list.
        #[serde(rename = "availableCommands")]
        available_commands: Vec<Value>,
    },
    /// Free-form session information (title, model, system events).
    SessionInfoUpdate(SessionInfo),
}

/// Free-form session information payload.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    /// New session title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Extension payload for system events.
    #[serde(rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

/// Execution status of a tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    /// Announced, input may still be streaming.
    Pending,
    /// Running inside the agent.
    InProgress,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
}

/// Category of a tool call, for client-side presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    /// File read.
    Read,
    /// File creation.
    Write,
    /// File modification.
    Edit,
    /// Shell execution.
    Bash,
    /// Subagent delegation.
    Agent,
    /// Web fetch.
    Web,
    /// Content search.
    Search,
    /// Everything else.
    Other,
}

/// A newly announced tool call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    /// Tool-call identifier (the agent's tool-use id, verbatim).
    pub tool_call_id: String,
    /// Synthesized human-readable title.
    pub title: String,
    /// Presentation category.
    pub kind: ToolKind,
    /// Execution status.
    pub status: ToolCallStatus,
    /// Content preview blocks.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<ToolCallContent>,
    /// Source-file locations the call touches.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<ToolCallLocation>,
    /// The tool input as the agent sent it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_input: Option<Value>,
}

/// A state change for a previously announced tool call.
///
/// Every field except the identifier is optional; only present fields
/// change.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallUpdate {
    /// Tool-call identifier.
    pub tool_call_id: String,
    /// New title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// New category.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ToolKind>,
    /// New status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ToolCallStatus>,
    /// New content preview.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<ToolCallContent>>,
    /// New locations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locations: Option<Vec<ToolCallLocation>>,
    /// Finalised input.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_input: Option<Value>,
    /// Raw output attachment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_output: Option<Value>,
}

impl ToolCallUpdate {
    /// A bare update for `tool_call_id` with no changed fields.
    #[must_use]
    pub fn for_id(tool_call_id: &str) -> Self {
        Self {
            tool_call_id: tool_call_id.to_owned(),
            ..Self::default()
        }
    }
}

/// Content attached to a tool call.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolCallContent {
    /// A regular content block.
    Content {
        /// The block.
        content: AcpContentBlock,
    },
    /// A file diff.
    Diff {
        /// Target path.
        path: String,
        /// Previous content, when known.
        #[serde(rename = "oldText", skip_serializing_if = "Option::is_none")]
        old_text: Option<String>,
        /// New content.
        #[serde(rename = "newText")]
        new_text: String,
    },
}

/// A source location a tool call touches.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallLocation {
    /// File path.
    pub path: String,
    /// Line number, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

/// Priority of a plan entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanPriority {
    /// High priority.
    High,
    /// Medium priority.
    Medium,
    /// Low priority.
    Low,
}

/// Status of a plan entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    /// Not started.
    Pending,
    /// Being worked on.
    InProgress,
    /// Done.
    Completed,
}

/// One entry of a plan update.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlanEntry {
    /// What the step does.
    pub content: String,
    /// Step priority.
    pub priority: PlanPriority,
    /// Step status.
    pub status: PlanStatus,
}

// ── Permission requests (bridge → client) ─────────────────────────────────────

/// `session/request_permission` parameters.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPermissionParams {
    /// Session the request belongs to.
    pub session_id: String,
    /// The tool call being authorised.
    pub tool_call: ToolCallUpdate,
    /// Choices offered to the user.
    pub options: Vec<PermissionOption>,
}

/// One permission choice.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionOption {
    /// Stable identifier echoed back in the outcome.
    pub option_id: String,
    /// Button label.
    pub name: String,
    /// Choice semantics.
    pub kind: PermissionOptionKind,
}

/// Semantics of a permission choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionOptionKind {
    /// Allow this call only.
    AllowOnce,
    /// Allow this and future matching calls.
    AllowAlways,
    /// Reject this call only.
    RejectOnce,
}

/// Outcome of a permission request.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PermissionOutcome {
    /// The user picked an option.
    Selected {
        /// Identifier of the chosen option.
        #[serde(rename = "optionId")]
        option_id: String,
    },
    /// The request was dismissed or the turn cancelled.
    Cancelled,
}

/// `session/request_permission` response.
#[derive(Debug, Clone, Deserialize)]
pub struct RequestPermissionResult {
    /// What the user decided.
    pub outcome: PermissionOutcome,
}
