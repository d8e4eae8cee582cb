//! Background-task correlation map and field extraction.
//!
//! A background tool-use returns a task identifier immediately and delivers
//! its real completion later via a `task_notification`. This module links
//! the late notification back to the tool-call identity it belongs to.
//!
//! Two parallel mappings, both to the owning tool-use identifier: one keyed
//! by the agent-assigned task identifier, one keyed by `file:` + output-file
//! path. Whichever field the notification surfaces resolves the same owner.
//!
//! Extraction is best-effort by design: structured fields first, then a
//! regex scan of free text, then serialise-and-rescan. No cleverer parsing
//! is attempted — the upstream protocol genuinely varies here.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use tracing::debug;

/// Task-identifying fields extracted from a background tool response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskRefs {
    /// Agent-assigned task identifier.
    pub task_id: Option<String>,
    /// Output file the task writes to.
    pub output_file: Option<String>,
}

impl TaskRefs {
    /// Whether anything at all was extracted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.task_id.is_none() && self.output_file.is_none()
    }
}

/// Extract task-identifying fields from a tool response.
///
/// Rules, tried in order:
///
/// 1. Object with `task_id` (or `agentId`) and/or `output_file` fields.
/// 2. String, or array of text blocks: regex-scan the concatenated text.
/// 3. Anything else: serialise to JSON text and rescan.
#[must_use]
pub fn extract_task_refs(response: &Value) -> TaskRefs {
    if let Value::Object(map) = response {
        let task_id = map
            .get("task_id")
            .or_else(|| map.get("agentId"))
            .and_then(Value::as_str)
            .map(str::to_owned);
        let output_file = map
            .get("output_file")
            .and_then(Value::as_str)
            .map(str::to_owned);
        if task_id.is_some() || output_file.is_some() {
            return TaskRefs {
                task_id,
                output_file,
            };
        }
    }

    if let Some(text) = flatten_text(response) {
        let refs = scan_text(&text);
        if !refs.is_empty() {
            return refs;
        }
    }

    match serde_json::to_string(response) {
        Ok(serialised) => scan_text(&serialised),
        Err(_) => TaskRefs::default(),
    }
}

/// Concatenate the textual content of a string or text-block array.
fn flatten_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Array(items) => {
            let parts: Vec<&str> = items
                .iter()
                .filter(|item| {
                    item.get("type").and_then(Value::as_str) == Some("text")
                })
                .filter_map(|item| item.get("text").and_then(Value::as_str))
                .collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join("\n"))
            }
        }
        _ => None,
    }
}

/// Regex-scan free text for task-id / agent-id / output-file mentions.
fn scan_text(text: &str) -> TaskRefs {
    static TASK_ID_RE: OnceLock<Regex> = OnceLock::new();
    static AGENT_ID_RE: OnceLock<Regex> = OnceLock::new();
    static OUTPUT_FILE_RE: OnceLock<Regex> = OnceLock::new();

    let task_id_re = TASK_ID_RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)] // Pattern is a compile-time constant.
        Regex::new(r#"(?i)task[_\s-]?id[:\s]+"?([\w./-]+?)"?[\s,}]"#).unwrap()
    });
    let agent_id_re = AGENT_ID_RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)] // Pattern is a compile-time constant.
        Regex::new(r#"agentId[:\s]+"?([\w./-]+?)"?[\s,}]"#).unwrap()
    });
    let output_file_re = OUTPUT_FILE_RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)] // Pattern is a compile-time constant.
        Regex::new(r#"(?i)output[_\s-]?file[:\s]+"?([^\s"',}]+)"#).unwrap()
    });

    // Pad so a value at end-of-input still matches the delimiter class.
    let padded = format!("{text} ");

    let task_id = task_id_re
        .captures(&padded)
        .or_else(|| agent_id_re.captures(&padded))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_owned());
    let output_file = output_file_re
        .captures(&padded)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim_end_matches(['"', '\'']).to_owned());

    TaskRefs {
        task_id,
        output_file,
    }
}

// ── The map ───────────────────────────────────────────────────────────────────

/// Maps task identifiers and output-file paths to owning tool-use ids.
///
/// Callers serialise access externally (the owning session holds it behind
/// a mutex); the struct itself is plain data.
#[derive(Debug, Default)]
pub struct BackgroundTasks {
    by_key: HashMap<String, String>,
}

impl BackgroundTasks {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `refs → tool_use_id`, idempotently.
    ///
    /// Only the first population for a given tool-use wins; later
    /// notifications carrying the same fields are ignored.
    pub fn insert(&mut self, refs: &TaskRefs, tool_use_id: &str) {
        if refs.is_empty() {
            return;
        }
        if self.by_key.values().any(|owner| owner == tool_use_id) {
            debug!(tool_use_id, "background map already populated, skipping");
            return;
        }
        if let Some(ref task_id) = refs.task_id {
            self.by_key.insert(task_id.clone(), tool_use_id.to_owned());
        }
        if let Some(ref output_file) = refs.output_file {
            self.by_key
                .insert(format!("file:{output_file}"), tool_use_id.to_owned());
        }
    }

    /// Resolve a completion notification to its owning tool-use id and
    /// clear both of the owner's keys.
    ///
    /// The task identifier is consulted first, then the output-file key.
    #[must_use]
    pub fn take(&mut self, task_id: Option<&str>, output_file: Option<&str>) -> Option<String> {
        let owner = task_id
            .and_then(|id| self.by_key.get(id).cloned())
            .or_else(|| {
                output_file.and_then(|path| self.by_key.get(&format!("file:{path}")).cloned())
            })?;

        self.by_key.retain(|_, v| *v != owner);
        Some(owner)
    }

    /// Number of live keys (both keys of one task count separately).
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    /// Whether the map is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// Snapshot of the live entries, for the `tasks/list` surface.
    #[must_use]
    pub fn entries(&self) -> Vec<(String, String)> {
        self.by_key
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}
