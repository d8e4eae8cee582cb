//! Tool-use cache: aggregating state machine for announced tool calls.
//!
//! An entry is created when the agent announces a tool call (streaming
//! block-start or finalised assistant message), finalised when the assistant
//! message carrying the complete input arrives, consulted when the matching
//! tool-result comes back, and evicted when the tool-call update completes —
//! or, for background tool-uses, when the deferred completion notification
//! is processed.

use std::collections::HashMap;

use serde_json::Value;

/// Progress of one tool-use through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolUsePhase {
    /// Announced with empty or partial input (streaming block-start).
    Announced,
    /// Input completed by the finalised assistant message.
    Finalised,
}

/// Cached state for one announced tool-use.
#[derive(Debug, Clone)]
pub struct ToolUseEntry {
    /// Originating tool name.
    pub name: String,
    /// Latest known input payload.
    pub input: Value,
    /// Lifecycle phase.
    pub phase: ToolUsePhase,
    /// Whether the tool-use runs in background (deferred completion).
    pub background: bool,
    /// Tool-use identifier of the parent subagent, when nested.
    pub parent_tool_use_id: Option<String>,
}

/// Cache of announced tool-uses, keyed by the agent-assigned identifier.
///
/// Plain data; the owning session serialises access externally.
#[derive(Debug, Default)]
pub struct ToolUseCache {
    entries: HashMap<String, ToolUseEntry>,
}

impl ToolUseCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly announced tool-use.
    ///
    /// Returns `true` when the identifier is new — the caller then emits the
    /// one and only `tool_call` for it. Returns `false` for an identifier
    /// already present, which must never produce a second announcement.
    pub fn announce(
        &mut self,
        id: &str,
        name: &str,
        input: Value,
        phase: ToolUsePhase,
        parent_tool_use_id: Option<String>,
    ) -> bool {
        if self.entries.contains_key(id) {
            return false;
        }
        let background = input_requests_background(&input);
        self.entries.insert(
            id.to_owned(),
            ToolUseEntry {
                name: name.to_owned(),
                input,
                phase,
                background,
                parent_tool_use_id,
            },
        );
        true
    }

    /// Complete an announced entry with its finalised input.
    ///
    /// Returns the updated entry when the identifier was known; `None` for
    /// an unknown identifier (the caller announces instead).
    pub fn finalise(&mut self, id: &str, input: Value) -> Option<&ToolUseEntry> {
        let entry = self.entries.get_mut(id)?;
        entry.background = entry.background || input_requests_background(&input);
        entry.input = input;
        entry.phase = ToolUsePhase::Finalised;
        Some(entry)
    }

    /// Look up an entry without changing it.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ToolUseEntry> {
        self.entries.get(id)
    }

    /// Flag an entry as background after the fact (post-tool hook path).
    pub fn mark_background(&mut self, id: &str) {
        if let Some(entry) = self.entries.get_mut(id) {
            entry.background = true;
        }
    }

    /// Remove and return an entry.
    pub fn evict(&mut self, id: &str) -> Option<ToolUseEntry> {
        self.entries.remove(id)
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Whether a tool input asks for background execution.
fn input_requests_background(input: &Value) -> bool {
    input
        .get("run_in_background")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}
