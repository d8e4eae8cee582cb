//! Spawn options forwarded to the agent subprocess.
//!
//! Every knob the bridge forwards to the child is enumerated here and
//! rendered to argv by [`SpawnOptions::to_args`]. The framing flags are
//! fixed: input and output are both newline-delimited JSON with verbose
//! control messages, and partial-message streaming is always on.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde_json::{json, Value};

/// System prompt forwarded to the child: a literal replacement or an
/// instruction to append to the child's preset prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemPrompt {
    /// Replace the child's system prompt wholesale.
    Literal(String),
    /// Append to the child's preset system prompt.
    AppendToPreset(String),
}

/// A hook registration forwarded to the child.
///
/// The child invokes the bridge back through a `hook_callback` control
/// request carrying the `callback_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookSpec {
    /// Lifecycle event the hook fires on (`PreToolUse`, `PostToolUse`, …).
    pub event: String,
    /// Tool-name matcher; empty matches every tool.
    pub matcher: String,
    /// Identifier echoed back by the child when the hook fires.
    pub callback_id: String,
}

/// Callback identifier of the internal pre-tool permission hook.
pub const PRE_TOOL_HOOK_ID: &str = "relay-pre-tool";
/// Callback identifier of the internal post-tool completion hook.
pub const POST_TOOL_HOOK_ID: &str = "relay-post-tool";

/// Options forwarded to the agent subprocess.
#[derive(Debug, Clone, Default)]
pub struct SpawnOptions {
    /// Agent executable; overridden by `AGENT_RELAY_EXECUTABLE`.
    pub executable: String,
    /// Extra fixed arguments placed before the option flags.
    pub base_args: Vec<String>,
    /// Working directory the child starts in.
    pub cwd: PathBuf,
    /// Model identifier.
    pub model: Option<String>,
    /// Maximum number of model turns per prompt.
    pub max_turns: Option<u32>,
    /// Maximum USD budget per prompt.
    pub max_budget_usd: Option<f64>,
    /// Maximum thinking tokens.
    pub max_thinking_tokens: Option<u32>,
    /// Model to fall back to when the primary is unavailable.
    pub fallback_model: Option<String>,
    /// System prompt handling.
    pub system_prompt: Option<SystemPrompt>,
    /// Initial permission mode.
    pub permission_mode: Option<String>,
    /// Skip the child's own permission prompts entirely.
    ///
    /// Suppressed when the bridge runs as root regardless of the caller's
    /// request; see [`SpawnOptions::effective_skip_permissions`].
    pub dangerously_skip_permissions: bool,
    /// Tool allow-list computed from client capabilities.
    pub allowed_tools: Vec<String>,
    /// Tool disallow-list computed from client capabilities.
    pub disallowed_tools: Vec<String>,
    /// Merged MCP server configurations (user + internal), keyed by name.
    pub mcp_servers: BTreeMap<String, Value>,
    /// Merged hook registrations (user hooks + two internal hooks).
    pub hooks: Vec<HookSpec>,
    /// Resume this session identifier instead of starting fresh.
    pub resume_session_id: Option<String>,
    /// Fork off the resumed session into a new identity.
    pub fork_session: bool,
    /// Prepended to the child's `PATH`; from `AGENT_RELAY_PATH`.
    pub path_prepend: Option<String>,
}

impl SpawnOptions {
    /// Internal pre/post tool hooks every session carries, ahead of any
    /// user-configured hooks.
    #[must_use]
    pub fn internal_hooks() -> Vec<HookSpec> {
        vec![
            HookSpec {
                event: "PreToolUse".to_owned(),
                matcher: String::new(),
                callback_id: PRE_TOOL_HOOK_ID.to_owned(),
            },
            HookSpec {
                event: "PostToolUse".to_owned(),
                matcher: String::new(),
                callback_id: POST_TOOL_HOOK_ID.to_owned(),
            },
        ]
    }

    /// Executable after applying the `AGENT_RELAY_EXECUTABLE` override.
    #[must_use]
    pub fn effective_executable(&self) -> String {
        std::env::var("AGENT_RELAY_EXECUTABLE")
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| self.executable.clone())
    }

    /// Whether `--dangerously-skip-permissions` is actually forwarded.
    ///
    /// The flag is never set while running as root.
    #[must_use]
    pub fn effective_skip_permissions(&self) -> bool {
        self.dangerously_skip_permissions && !running_as_root()
    }

    /// Render the child argv: fixed framing flags first, then every
    /// configured option.
    #[must_use]
    #[allow(clippy::too_many_lines)] // One flag per option; splitting obscures the wire contract.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = self.base_args.clone();

        // Fixed framing: NDJSON both ways, verbose control messages, and
        // partial-message streaming always on.
        args.extend(
            [
                "--input-format",
                "stream-json",
                "--output-format",
                "stream-json",
                "--verbose",
                "--include-partial-messages",
            ]
            .map(str::to_owned),
        );

        if let Some(ref model) = self.model {
            args.push("--model".to_owned());
            args.push(model.clone());
        }
        if let Some(max_turns) = self.max_turns {
            args.push("--max-turns".to_owned());
            args.push(max_turns.to_string());
        }
        if let Some(budget) = self.max_budget_usd {
            args.push("--max-budget-usd".to_owned());
            args.push(budget.to_string());
        }
        if let Some(tokens) = self.max_thinking_tokens {
            args.push("--max-thinking-tokens".to_owned());
            args.push(tokens.to_string());
        }
        if let Some(ref fallback) = self.fallback_model {
            args.push("--fallback-model".to_owned());
            args.push(fallback.clone());
        }
        match self.system_prompt {
            Some(SystemPrompt::Literal(ref text)) => {
                args.push("--system-prompt".to_owned());
                args.push(text.clone());
            }
            Some(SystemPrompt::AppendToPreset(ref text)) => {
                args.push("--append-system-prompt".to_owned());
                args.push(text.clone());
            }
            None => {}
        }
        if let Some(ref mode) = self.permission_mode {
            args.push("--permission-mode".to_owned());
            args.push(mode.clone());
        }
        if self.effective_skip_permissions() {
            args.push("--dangerously-skip-permissions".to_owned());
        }
        if !self.allowed_tools.is_empty() {
            args.push("--allowed-tools".to_owned());
            args.push(self.allowed_tools.join(","));
        }
        if !self.disallowed_tools.is_empty() {
            args.push("--disallowed-tools".to_owned());
            args.push(self.disallowed_tools.join(","));
        }
        if !self.mcp_servers.is_empty() {
            args.push("--mcp-config".to_owned());
            args.push(json!({ "mcpServers": self.mcp_servers }).to_string());
        }
        if !self.hooks.is_empty() {
            args.push("--hooks-config".to_owned());
            args.push(self.hooks_config().to_string());
        }
        if let Some(ref resume) = self.resume_session_id {
            args.push("--resume".to_owned());
            args.push(resume.clone());
            if self.fork_session {
                args.push("--fork-session".to_owned());
            }
        }

        args
    }

    /// Render the hook registrations grouped by lifecycle event.
    fn hooks_config(&self) -> Value {
        let mut by_event: BTreeMap<&str, Vec<Value>> = BTreeMap::new();
        for hook in &self.hooks {
            by_event.entry(hook.event.as_str()).or_default().push(json!({
                "matcher": hook.matcher,
                "hookCallbackIds": [hook.callback_id],
            }));
        }
        json!({ "hooks": by_event })
    }
}

/// Whether the current process runs with root privileges.
#[cfg(unix)]
#[must_use]
pub fn running_as_root() -> bool {
    nix::unistd::geteuid().is_root()
}

/// Root never applies off Unix.
#[cfg(not(unix))]
#[must_use]
pub fn running_as_root() -> bool {
    false
}
