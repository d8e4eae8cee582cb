//! Disk-backed session index, one file per working directory.
//!
//! The subprocess owns conversation persistence; the bridge only keeps a
//! light index so sessions can be listed, renamed, and deleted across
//! restarts, plus read-only access to the transcript files the agent
//! writes. Layout under the relay state directory:
//!
//! ```text
//! <state_dir>/sessions/<cwd-digest>.json           index
//! <state_dir>/sessions/<cwd-digest>/<id>.jsonl     transcript
//! <state_dir>/sessions/<cwd-digest>/<id>-subagents/<agent>.jsonl
//! ```

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::{AppError, Result};

/// One persisted session record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionIndexEntry {
    /// Session identifier.
    pub id: String,
    /// Human-readable title; null until first prompt or rename.
    #[serde(default)]
    pub title: Option<String>,
    /// Working directory the session runs in.
    pub cwd: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last activity timestamp.
    pub updated_at: DateTime<Utc>,
    /// Team this session belongs to, when it is a teammate.
    #[serde(default)]
    pub team_name: Option<String>,
}

/// Index handle for one working directory.
#[derive(Debug, Clone)]
pub struct SessionIndex {
    index_path: PathBuf,
    transcripts_dir: PathBuf,
}

impl SessionIndex {
    /// Open (lazily) the index for `cwd` under `state_dir`.
    #[must_use]
    pub fn for_cwd(state_dir: &Path, cwd: &Path) -> Self {
        let digest = cwd_digest(cwd);
        let sessions_dir = state_dir.join("sessions");
        Self {
            index_path: sessions_dir.join(format!("{digest}.json")),
            transcripts_dir: sessions_dir.join(digest),
        }
    }

    /// All persisted entries, newest-updated first.
    ///
    /// A missing index file is an empty list; a corrupt one is logged and
    /// treated as empty rather than failing the listing.
    #[must_use]
    pub fn list(&self) -> Vec<SessionIndexEntry> {
        let mut entries = self.load();
        entries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        entries
    }

    /// Insert or replace one entry.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] when the index cannot be written.
    pub fn upsert(&self, entry: SessionIndexEntry) -> Result<()> {
        let mut entries = self.load();
        entries.retain(|e| e.id != entry.id);
        entries.push(entry);
        self.save(&entries)
    }

    /// Set the title of a session, persisted or not yet.
    ///
    /// Renaming an identifier the index has never seen creates a stub entry
    /// so the title survives even when the session is persisted later.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] when the index cannot be written.
    pub fn rename(&self, id: &str, title: &str, cwd: &Path) -> Result<()> {
        let mut entries = self.load();
        let now = Utc::now();
        if let Some(entry) = entries.iter_mut().find(|e| e.id == id) {
            entry.title = Some(title.to_owned());
            entry.updated_at = now;
        } else {
            entries.push(SessionIndexEntry {
                id: id.to_owned(),
                title: Some(title.to_owned()),
                cwd: cwd.display().to_string(),
                created_at: now,
                updated_at: now,
                team_name: None,
            });
        }
        self.save(&entries)
    }

    /// Remove one entry.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] for an unknown identifier, or
    /// [`AppError::Io`] when the index cannot be written.
    pub fn delete(&self, id: &str) -> Result<()> {
        let mut entries = self.load();
        let before = entries.len();
        entries.retain(|e| e.id != id);
        if entries.len() == before {
            return Err(AppError::NotFound(format!("session '{id}'")));
        }
        self.save(&entries)
    }

    /// Read the transcript of one session, one parsed JSON value per line.
    ///
    /// A missing transcript is an empty history. Unparsable lines are
    /// skipped with a warning.
    #[must_use]
    pub fn history(&self, id: &str) -> Vec<Value> {
        self.read_jsonl(&self.transcripts_dir.join(format!("{id}.jsonl")))
    }

    /// Read the transcript of one subagent of a session.
    #[must_use]
    pub fn subagent_history(&self, id: &str, agent_id: &str) -> Vec<Value> {
        self.read_jsonl(
            &self
                .transcripts_dir
                .join(format!("{id}-subagents"))
                .join(format!("{agent_id}.jsonl")),
        )
    }

    /// Subagent identifiers recorded for one session.
    #[must_use]
    pub fn subagents(&self, id: &str) -> Vec<String> {
        let dir = self.transcripts_dir.join(format!("{id}-subagents"));
        let Ok(read_dir) = std::fs::read_dir(&dir) else {
            return Vec::new();
        };
        let mut agents: Vec<String> = read_dir
            .filter_map(std::result::Result::ok)
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                name.strip_suffix(".jsonl").map(str::to_owned)
            })
            .collect();
        agents.sort();
        agents
    }

    /// Scan non-team sessions' transcripts for team-create invocations.
    ///
    /// Returns `team name → leader session id`. This is the expensive
    /// fallback behind the orchestrator's once-per-lifetime cache.
    #[must_use]
    pub fn scan_team_leaders(&self) -> std::collections::HashMap<String, String> {
        let mut leaders = std::collections::HashMap::new();
        for entry in self.load() {
            if entry.team_name.is_some() {
                continue;
            }
            for line in self.history(&entry.id) {
                for team in team_create_names(&line) {
                    leaders.entry(team).or_insert_with(|| entry.id.clone());
                }
            }
        }
        leaders
    }

    // ── Private helpers ──────────────────────────────────────────────────────

    fn load(&self) -> Vec<SessionIndexEntry> {
        let raw = match std::fs::read_to_string(&self.index_path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(err) => {
                warn!(%err, path = %self.index_path.display(), "session index read failed");
                return Vec::new();
            }
        };
        match serde_json::from_str(&raw) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(%err, path = %self.index_path.display(), "session index corrupt, ignoring");
                Vec::new()
            }
        }
    }

    fn save(&self, entries: &[SessionIndexEntry]) -> Result<()> {
        if let Some(parent) = self.index_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|err| AppError::Io(format!("create session dir: {err}")))?;
        }
        let raw = serde_json::to_string_pretty(entries)
            .map_err(|err| AppError::Io(format!("serialise session index: {err}")))?;
        std::fs::write(&self.index_path, raw)
            .map_err(|err| AppError::Io(format!("write session index: {err}")))
    }

    fn read_jsonl(&self, path: &Path) -> Vec<Value> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(err) => {
                warn!(%err, path = %path.display(), "transcript read failed");
                return Vec::new();
            }
        };
        raw.lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(value) => Some(value),
                Err(err) => {
                    debug!(%err, "skipping unparsable transcript line");
                    None
                }
            })
            .collect()
    }
}

/// Team names created by `TeamCreate` tool-uses inside one transcript line.
fn team_create_names(line: &Value) -> Vec<String> {
    let Some(content) = line
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };

    content
        .iter()
        .filter(|block| block.get("type").and_then(Value::as_str) == Some("tool_use"))
        .filter(|block| block.get("name").and_then(Value::as_str) == Some("TeamCreate"))
        .filter_map(|block| {
            block
                .get("input")
                .and_then(|input| input.get("team_name"))
                .and_then(Value::as_str)
                .map(str::to_owned)
        })
        .collect()
}

/// Stable digest of a working directory path.
fn cwd_digest(cwd: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(cwd.display().to_string().as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}
