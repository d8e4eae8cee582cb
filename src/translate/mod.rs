//! Content translation layer: agent content blocks → ACP session updates.
//!
//! Converts four categories of agent output:
//!
//! 1. **Streaming partials** — text and thinking deltas become message /
//!    thought chunks carrying only the new text; tool-use block-starts
//!    become pending `tool_call` announcements. All other stream events
//!    emit nothing.
//! 2. **Finalised assistant messages** — tool-use blocks update the cache
//!    with the complete input and emit a supplementary `tool_call_update`
//!    (never a second `tool_call`); pure text/thinking blocks are filtered
//!    out, having already been streamed. The filter is invariant —
//!    re-emission would double text at the client.
//! 3. **User-role messages from the agent** — internal echoes are dropped,
//!    `<local-command-stdout>` payloads are forwarded stripped, tool-result
//!    blocks become `tool_call_update`s and feed the background-task map.
//! 4. **Synthetic login prompts** — any content containing the literal
//!    "Please run /login" raises an authentication-required error.

pub mod cache;
pub mod title;

use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tracing::{debug, warn};

use crate::acp::schema::{
    AcpContentBlock, SessionUpdate, ToolCall, ToolCallContent, ToolCallStatus, ToolCallUpdate,
    ToolKind,
};
use crate::agent::wire::{
    AssistantMessage, ContentBlock, ContentDelta, StreamEvent, StreamEventMessage,
    TaskNotification, UserMessage,
};
use crate::correlate::background::{extract_task_refs, BackgroundTasks};
use crate::translate::cache::{ToolUseCache, ToolUsePhase};
use crate::{AppError, Result};

/// The literal phrase the child emits when interactive login is required.
const LOGIN_PHRASE: &str = "Please run /login";

const STDOUT_OPEN: &str = "<local-command-stdout>";
const STDOUT_CLOSE: &str = "</local-command-stdout>";
const STDERR_OPEN: &str = "<local-command-stderr>";

/// Shared tool-use cache handle.
pub type SharedCache = Arc<Mutex<ToolUseCache>>;
/// Shared background-task map handle.
pub type SharedBackground = Arc<Mutex<BackgroundTasks>>;

/// Translates agent output into ACP session updates for one session.
///
/// The cache and background map are shared with the router's intercept
/// handler; both are guarded by non-async mutexes held only for short,
/// await-free sections.
pub struct Translator {
    session_id: String,
    cache: SharedCache,
    background: SharedBackground,
}

impl Translator {
    /// Create a translator over the session's shared state.
    #[must_use]
    pub fn new(session_id: &str, cache: SharedCache, background: SharedBackground) -> Self {
        Self {
            session_id: session_id.to_owned(),
            cache,
            background,
        }
    }

    // ── Category 1: streaming partials ───────────────────────────────────────

    /// Translate one streaming event.
    ///
    /// # Errors
    ///
    /// Never fails today; the `Result` mirrors the other categories so the
    /// turn loop treats all translator calls uniformly.
    pub fn on_stream_event(&self, event: &StreamEventMessage) -> Result<Vec<SessionUpdate>> {
        let updates = match &event.event {
            StreamEvent::ContentBlockStart { content_block, .. } => match content_block {
                ContentBlock::Text { text } => vec![agent_chunk(text)],
                ContentBlock::Thinking { thinking } => vec![thought_chunk(thinking)],
                ContentBlock::ToolUse { id, name, input } => self.announce_tool_use(
                    id,
                    name,
                    input.clone(),
                    ToolUsePhase::Announced,
                    event.parent_tool_use_id.clone(),
                ),
                _ => Vec::new(),
            },
            StreamEvent::ContentBlockDelta { delta, .. } => match delta {
                ContentDelta::TextDelta { text } => vec![agent_chunk(text)],
                ContentDelta::ThinkingDelta { thinking } => vec![thought_chunk(thinking)],
                _ => Vec::new(),
            },
            // message_start / message_delta / message_stop /
            // content_block_stop carry no client-visible content.
            _ => Vec::new(),
        };
        Ok(updates)
    }

    // ── Category 2: finalised assistant messages ─────────────────────────────

    /// Translate a finalised assistant message.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::AuthRequired`] when the message contains the
    /// login phrase.
    pub fn on_assistant(&self, message: &AssistantMessage) -> Result<Vec<SessionUpdate>> {
        let blocks = message.message.content.as_blocks();

        for block in &blocks {
            if let ContentBlock::Text { text } = block {
                if text.contains(LOGIN_PHRASE) {
                    return Err(AppError::AuthRequired(LOGIN_PHRASE.to_owned()));
                }
            }
        }

        let mut updates = Vec::new();
        for block in blocks {
            if let ContentBlock::ToolUse { id, name, input } = block {
                if let Some(entries) = title::plan_entries(&name, &input) {
                    updates.push(SessionUpdate::Plan { entries });
                    continue;
                }

                let finalised = {
                    let mut cache = lock(&self.cache);
                    cache.finalise(&id, input.clone()).is_some()
                };

                if finalised {
                    updates.push(self.finalisation_update(&id, &name, &input));
                } else {
                    // Never streamed — this assistant message is the
                    // announcement itself.
                    updates.extend(self.announce_tool_use(
                        &id,
                        &name,
                        input,
                        ToolUsePhase::Finalised,
                        message.parent_tool_use_id.clone(),
                    ));
                }
            }
            // Text and thinking blocks were already emitted as streaming
            // chunks; finalised copies are filtered out here.
        }
        Ok(updates)
    }

    // ── Category 3: user-role messages ───────────────────────────────────────

    /// Translate a user-role message emitted by the child.
    pub fn on_user(&self, message: &UserMessage) -> Vec<SessionUpdate> {
        let blocks = message.message.content.as_blocks();

        // Local-command wrappers take precedence over the echo filter: the
        // wrapped payload is usually the message's only text block.
        if let Some(stdout_text) = find_wrapped(&blocks, STDOUT_OPEN, STDOUT_CLOSE) {
            return vec![agent_chunk(&stdout_text)];
        }
        if blocks.iter().any(|block| {
            matches!(block, ContentBlock::Text { text } if text.contains(STDERR_OPEN))
        }) {
            debug!(session_id = %self.session_id, "dropping local-command stderr payload");
            return Vec::new();
        }

        // A user message whose entire content is one text block is an
        // internal echo of the prompt.
        if let [ContentBlock::Text { .. }] = blocks.as_slice() {
            return Vec::new();
        }

        let mut updates = Vec::new();
        for block in blocks {
            match block {
                ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                } => {
                    updates.extend(self.tool_result_update(
                        &tool_use_id,
                        content.as_ref(),
                        is_error.unwrap_or(false),
                    ));
                }
                ContentBlock::Text { text } => {
                    updates.push(SessionUpdate::UserMessageChunk {
                        content: AcpContentBlock::Text { text },
                    });
                }
                ContentBlock::Image { source } => {
                    if let Some(chunk) = image_chunk(&source) {
                        updates.push(SessionUpdate::UserMessageChunk { content: chunk });
                    }
                }
                _ => {}
            }
        }
        updates
    }

    // ── Background completion (intercept plane) ──────────────────────────────

    /// Resolve a deferred task completion to its tool-call update.
    ///
    /// Looks up the task identifier first, then the output-file key. On a
    /// hit, both keys are cleared and the cache entry evicted. On a miss a
    /// warning is logged and nothing is emitted.
    #[must_use]
    pub fn on_task_completion(&self, notification: &TaskNotification) -> Option<SessionUpdate> {
        let task_id = notification
            .task_id
            .as_deref()
            .or(notification.agent_id.as_deref());

        let owner = {
            let mut background = lock(&self.background);
            background.take(task_id, notification.output_file.as_deref())
        };

        let Some(tool_use_id) = owner else {
            warn!(
                session_id = %self.session_id,
                task_id = ?task_id,
                output_file = ?notification.output_file,
                "task notification with no matching background entry"
            );
            return None;
        };

        lock(&self.cache).evict(&tool_use_id);

        let status = match notification.status.as_deref() {
            Some("failed") => ToolCallStatus::Failed,
            _ => ToolCallStatus::Completed,
        };

        let summary = notification
            .summary
            .as_deref()
            .filter(|s| !s.trim().is_empty());

        let mut update = ToolCallUpdate::for_id(&tool_use_id);
        update.status = Some(status);
        if let Some(summary) = summary {
            update.title = Some(summary.to_owned());
            update.content = Some(vec![ToolCallContent::Content {
                content: AcpContentBlock::Text {
                    text: summary.to_owned(),
                },
            }]);
        }
        Some(SessionUpdate::ToolCallUpdate(update))
    }

    // ── Private helpers ──────────────────────────────────────────────────────

    /// Announce a tool-use once; duplicates emit nothing.
    fn announce_tool_use(
        &self,
        id: &str,
        name: &str,
        input: Value,
        phase: ToolUsePhase,
        parent_tool_use_id: Option<String>,
    ) -> Vec<SessionUpdate> {
        if title::plan_entries(name, &input).is_some() || name == title::PLAN_TOOL_NAME {
            // The planning tool becomes a plan update at finalisation and
            // never announces a tool call.
            return Vec::new();
        }

        let fresh = {
            let mut cache = lock(&self.cache);
            cache.announce(id, name, input.clone(), phase, parent_tool_use_id)
        };
        if !fresh {
            debug!(
                session_id = %self.session_id,
                tool_use_id = id,
                "duplicate tool-use announcement suppressed"
            );
            return Vec::new();
        }

        let raw_input = if input.is_null()
            || input.as_object().is_some_and(serde_json::Map::is_empty)
        {
            None
        } else {
            Some(input.clone())
        };

        vec![SessionUpdate::ToolCall(ToolCall {
            tool_call_id: id.to_owned(),
            title: title::tool_title(name, &input),
            kind: streaming_kind(name),
            status: ToolCallStatus::Pending,
            content: Vec::new(),
            locations: title::tool_locations(&input),
            raw_input,
        })]
    }

    /// Supplementary update carrying the finalised title, kind, preview,
    /// and locations.
    fn finalisation_update(&self, id: &str, name: &str, input: &Value) -> SessionUpdate {
        let mut update = ToolCallUpdate::for_id(id);
        update.title = Some(title::tool_title(name, input));
        update.kind = Some(title::tool_kind(name));
        update.status = Some(ToolCallStatus::InProgress);
        update.raw_input = Some(input.clone());
        let locations = title::tool_locations(input);
        if !locations.is_empty() {
            update.locations = Some(locations);
        }
        SessionUpdate::ToolCallUpdate(update)
    }

    /// Translate one tool-result block; feeds the background map when the
    /// owning tool-use runs in background.
    fn tool_result_update(
        &self,
        tool_use_id: &str,
        content: Option<&Value>,
        is_error: bool,
    ) -> Vec<SessionUpdate> {
        let entry = {
            let cache = lock(&self.cache);
            cache.get(tool_use_id).cloned()
        };

        let Some(entry) = entry else {
            // Tool-result for an identifier never announced: protocol fault.
            warn!(
                session_id = %self.session_id,
                tool_use_id,
                "tool result for unknown tool-use id"
            );
            return Vec::new();
        };

        if entry.background {
            if let Some(content) = content {
                let refs = extract_task_refs(content);
                if !refs.is_empty() {
                    lock(&self.background).insert(&refs, tool_use_id);
                }
            }
            // Background tool-uses stay cached until the deferred
            // completion notification arrives.
        } else {
            lock(&self.cache).evict(tool_use_id);
        }

        let mut update = ToolCallUpdate::for_id(tool_use_id);
        update.status = Some(if is_error {
            ToolCallStatus::Failed
        } else {
            ToolCallStatus::Completed
        });
        update.raw_output = content.cloned();
        if let Some(preview) = content.and_then(title::content_preview) {
            update.content = Some(vec![ToolCallContent::Content {
                content: AcpContentBlock::Text { text: preview },
            }]);
        }
        vec![SessionUpdate::ToolCallUpdate(update)]
    }
}

// ── Free helpers ──────────────────────────────────────────────────────────────

/// Kind deduced for a streaming announcement, before the input is complete.
fn streaming_kind(name: &str) -> ToolKind {
    match title::tool_kind(name) {
        ToolKind::Bash => ToolKind::Bash,
        ToolKind::Agent => ToolKind::Agent,
        _ => ToolKind::Other,
    }
}

fn agent_chunk(text: &str) -> SessionUpdate {
    SessionUpdate::AgentMessageChunk {
        content: AcpContentBlock::Text {
            text: text.to_owned(),
        },
    }
}

fn thought_chunk(text: &str) -> SessionUpdate {
    SessionUpdate::AgentThoughtChunk {
        content: AcpContentBlock::Text {
            text: text.to_owned(),
        },
    }
}

/// Extract the payload between wrapper tags from the first text block that
/// carries them.
fn find_wrapped(blocks: &[ContentBlock], open: &str, close: &str) -> Option<String> {
    for block in blocks {
        if let ContentBlock::Text { text } = block {
            if let Some(start) = text.find(open) {
                let after = &text[start + open.len()..];
                let inner = after.find(close).map_or(after, |end| &after[..end]);
                return Some(inner.trim().to_owned());
            }
        }
    }
    None
}

/// Convert an agent-side image source into an ACP image block.
fn image_chunk(source: &Value) -> Option<AcpContentBlock> {
    let source_type = source.get("type").and_then(Value::as_str)?;
    match source_type {
        "base64" => Some(AcpContentBlock::Image {
            data: source
                .get("data")
                .and_then(Value::as_str)
                .map(str::to_owned),
            mime_type: source
                .get("media_type")
                .and_then(Value::as_str)
                .map(str::to_owned),
            uri: None,
        }),
        "url" => Some(AcpContentBlock::Image {
            data: None,
            mime_type: None,
            uri: source.get("url").and_then(Value::as_str).map(str::to_owned),
        }),
        _ => None,
    }
}

/// Lock a shared map, recovering from poisoning.
fn lock<T>(mutex: &Arc<Mutex<T>>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
