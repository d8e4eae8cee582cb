//! Title, kind, and location synthesis for tool calls.
//!
//! Each tool name maps to a short human-readable title template
//! (parameterised by the input) and a presentation kind from the closed
//! set. The canonical planning tool is special: its input becomes a `plan`
//! update instead of a tool call, detected by [`plan_entries`].

use serde_json::Value;

use crate::acp::schema::{PlanEntry, PlanPriority, PlanStatus, ToolCallLocation, ToolKind};

/// Name of the planning tool whose input is rendered as a plan update.
pub const PLAN_TOOL_NAME: &str = "TodoWrite";

/// Maximum length of a synthesized title before truncation.
const TITLE_MAX: usize = 64;

/// Synthesize the display title for a tool call.
///
/// Falls back to the tool name when the input carries nothing usable
/// (typical for a streaming block-start with empty input).
#[must_use]
pub fn tool_title(name: &str, input: &Value) -> String {
    let detail = match name {
        "Bash" => input.get("command").and_then(Value::as_str).map(str::to_owned),
        "Read" | "Write" | "Edit" | "MultiEdit" => file_path(input).map(|p| basename(&p)),
        "NotebookRead" | "NotebookEdit" => input
            .get("notebook_path")
            .and_then(Value::as_str)
            .map(|p| basename(p)),
        "WebFetch" => input.get("url").and_then(Value::as_str).map(str::to_owned),
        "WebSearch" => input.get("query").and_then(Value::as_str).map(str::to_owned),
        "Grep" => input
            .get("pattern")
            .and_then(Value::as_str)
            .map(|p| format!("grep {p}")),
        "Glob" => input
            .get("pattern")
            .and_then(Value::as_str)
            .map(|p| format!("glob {p}")),
        "Task" | "Agent" => input
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_owned),
        _ => None,
    };

    match detail {
        Some(text) if !text.is_empty() => truncate(&text, TITLE_MAX),
        _ => default_title(name),
    }
}

/// Deduce the presentation kind for a tool name.
#[must_use]
pub fn tool_kind(name: &str) -> ToolKind {
    match name {
        "Read" | "NotebookRead" => ToolKind::Read,
        "Write" => ToolKind::Write,
        "Edit" | "MultiEdit" | "NotebookEdit" => ToolKind::Edit,
        "Bash" | "BashOutput" | "KillShell" => ToolKind::Bash,
        "Task" | "Agent" => ToolKind::Agent,
        "WebFetch" => ToolKind::Web,
        "WebSearch" | "Grep" | "Glob" => ToolKind::Search,
        _ => ToolKind::Other,
    }
}

/// Source-file locations referenced by a tool input.
#[must_use]
pub fn tool_locations(input: &Value) -> Vec<ToolCallLocation> {
    let Some(path) = file_path(input).or_else(|| {
        input
            .get("notebook_path")
            .and_then(Value::as_str)
            .map(str::to_owned)
    }) else {
        return Vec::new();
    };

    let line = input
        .get("offset")
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok());

    vec![ToolCallLocation { path, line }]
}

/// Render a canonical planning-tool input as plan entries.
///
/// Returns `None` unless `name` is the planning tool and its input carries
/// the expected `todos` list with recognised statuses.
#[must_use]
pub fn plan_entries(name: &str, input: &Value) -> Option<Vec<PlanEntry>> {
    if name != PLAN_TOOL_NAME {
        return None;
    }
    let todos = input.get("todos")?.as_array()?;

    let mut entries = Vec::with_capacity(todos.len());
    for todo in todos {
        let content = todo
            .get("content")
            .or_else(|| todo.get("subject"))
            .and_then(Value::as_str)?
            .to_owned();
        let status = match todo.get("status").and_then(Value::as_str)? {
            "pending" => PlanStatus::Pending,
            "in_progress" => PlanStatus::InProgress,
            "completed" => PlanStatus::Completed,
            _ => return None,
        };
        let priority = match todo.get("priority").and_then(Value::as_str) {
            Some("high") => PlanPriority::High,
            Some("low") => PlanPriority::Low,
            _ => PlanPriority::Medium,
        };
        entries.push(PlanEntry {
            content,
            priority,
            status,
        });
    }
    Some(entries)
}

/// Derive a short text preview from a tool-result content value.
///
/// Picks the first text block (or the bare string), trimmed and truncated.
#[must_use]
pub fn content_preview(content: &Value) -> Option<String> {
    let text = match content {
        Value::String(text) => text.clone(),
        Value::Array(items) => items
            .iter()
            .filter(|item| item.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|item| item.get("text").and_then(Value::as_str))
            .next()?
            .to_owned(),
        _ => return None,
    };

    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(truncate(trimmed, 200))
    }
}

// ── Private helpers ───────────────────────────────────────────────────────────

fn file_path(input: &Value) -> Option<String> {
    input
        .get("file_path")
        .or_else(|| input.get("path"))
        .and_then(Value::as_str)
        .map(str::to_owned)
}

fn basename(path: &str) -> String {
    std::path::Path::new(path)
        .file_name()
        .map_or_else(|| path.to_owned(), |name| name.to_string_lossy().into_owned())
}

fn default_title(name: &str) -> String {
    if name.is_empty() {
        "Tool".to_owned()
    } else {
        name.to_owned()
    }
}

/// Truncate on a char boundary, appending an ellipsis when shortened.
fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_owned();
    }
    let mut out: String = text.chars().take(max).collect();
    out.push('…');
    out
}
