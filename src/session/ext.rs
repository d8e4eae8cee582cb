//! Extension-method dispatch: the `sessions/*`, `tasks/*`, and `mcp/*`
//! surface reachable beyond the core ACP methods.
//!
//! `sessions/list` merges three sources: the disk index for the working
//! directory, live in-memory sessions not yet persisted, and in-memory
//! title changes. Teammate sessions (entries carrying a team name) are
//! collapsed under their team leader; leader detection falls back to a
//! one-time cached transcript scan per orchestrator lifetime.

use std::collections::HashMap;
use std::path::PathBuf;

use serde_json::{json, Map, Value};
use tracing::debug;

use crate::session::index::SessionIndexEntry;
use crate::session::orchestrator::Orchestrator;
use crate::{AppError, Result};

impl Orchestrator {
    /// Dispatch one extension method by name.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Acp`] for malformed parameters and
    /// [`AppError::NotFound`] for unknown methods or sessions.
    pub async fn ext_method(&self, method: &str, params: Value) -> Result<Value> {
        match method {
            "sessions/list" => self.list_sessions(&params).await,
            "sessions/getHistory" => {
                let session_id = str_field(&params, "sessionId")?;
                let index = self.index_for(&cwd_from(&params));
                Ok(json!({ "entries": index.history(&session_id) }))
            }
            "sessions/getSubagentHistory" => {
                let session_id = str_field(&params, "sessionId")?;
                let agent_id = str_field(&params, "agentId")?;
                let index = self.index_for(&cwd_from(&params));
                Ok(json!({ "entries": index.subagent_history(&session_id, &agent_id) }))
            }
            "sessions/getSubagents" => {
                let session_id = str_field(&params, "sessionId")?;
                let index = self.index_for(&cwd_from(&params));
                Ok(json!({ "subagents": index.subagents(&session_id) }))
            }
            "sessions/rename" => {
                let session_id = str_field(&params, "sessionId")?;
                let title = str_field(&params, "title")?;
                self.rename_session(&session_id, &title, &params).await?;
                Ok(json!({}))
            }
            "sessions/delete" => {
                let session_id = str_field(&params, "sessionId")?;
                self.delete_session(&session_id, &params).await?;
                Ok(json!({}))
            }
            "sessions/getAvailableCommands" => {
                let session_id = str_field(&params, "sessionId")?;
                let session = self.session(&session_id).await?;
                let commands = session
                    .correlator
                    .request(&session.transport, "supported_commands", json!({}))
                    .await?;
                Ok(json!({ "commands": commands }))
            }
            "sessions/getAvailableModels" => {
                let session_id = str_field(&params, "sessionId")?;
                let session = self.session(&session_id).await?;
                let models = session
                    .correlator
                    .request(&session.transport, "supported_models", json!({}))
                    .await?;
                Ok(json!({ "models": models }))
            }
            "sessions/rewindFiles" => {
                let session_id = str_field(&params, "sessionId")?;
                let session = self.session(&session_id).await?;
                session
                    .correlator
                    .request(&session.transport, "rewind_files", params.clone())
                    .await
            }
            "sessions/getAccountInfo" => {
                let session_id = str_field(&params, "sessionId")?;
                let session = self.session(&session_id).await?;
                session
                    .correlator
                    .request(&session.transport, "account_info", json!({}))
                    .await
            }
            "sessions/autoRename" => {
                let session_id = str_field(&params, "sessionId")?;
                let title = self.auto_rename(&session_id).await?;
                Ok(json!({ "title": title }))
            }
            "sessions/setMaxThinkingTokens" => {
                let session_id = str_field(&params, "sessionId")?;
                let tokens = params
                    .get("maxThinkingTokens")
                    .and_then(Value::as_u64)
                    .and_then(|n| u32::try_from(n).ok())
                    .ok_or_else(|| AppError::Acp("missing maxThinkingTokens".into()))?;
                self.set_max_thinking_tokens(&session_id, tokens).await?;
                Ok(json!({}))
            }
            "tasks/list" => {
                let session_id = str_field(&params, "sessionId")?;
                let session = self.session(&session_id).await?;
                let entries = session
                    .shared
                    .background
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .entries();
                let tasks: Vec<Value> = entries
                    .into_iter()
                    .map(|(key, tool_call_id)| {
                        json!({ "key": key, "toolCallId": tool_call_id })
                    })
                    .collect();
                Ok(json!({ "tasks": tasks }))
            }
            "mcp/reconnect" | "mcp/toggle" | "mcp/setServers" => {
                let session_id = str_field(&params, "sessionId")?;
                let session = self.session(&session_id).await?;
                let subtype = match method {
                    "mcp/reconnect" => "mcp_reconnect",
                    "mcp/toggle" => "mcp_toggle",
                    _ => "mcp_set_servers",
                };
                session
                    .correlator
                    .request(&session.transport, subtype, params.clone())
                    .await
            }
            other => Err(AppError::NotFound(format!("ext method '{other}'"))),
        }
    }

    /// `sessions/list`: disk index + live overlay, teammates collapsed
    /// under their leaders, descending by update time.
    pub async fn list_sessions(&self, params: &Value) -> Result<Value> {
        let cwd = cwd_from(params);
        let index = self.index_for(&cwd);
        let mut entries = index.list();

        // Merge live sessions not yet persisted and overlay live titles.
        {
            let sessions = self.sessions.lock().await;
            for (id, session) in sessions.iter() {
                if session.shared.cwd != cwd {
                    continue;
                }
                if let Some(entry) = entries.iter_mut().find(|e| &e.id == id) {
                    if let Some(title) = session.shared.title() {
                        entry.title = Some(title);
                    }
                    entry.updated_at = session.shared.updated_at();
                } else {
                    entries.push(SessionIndexEntry {
                        id: id.clone(),
                        title: session.shared.title(),
                        cwd: cwd.display().to_string(),
                        created_at: session.shared.updated_at(),
                        updated_at: session.shared.updated_at(),
                        team_name: None,
                    });
                }
            }
        }

        // Leader detection: lazily built once per orchestrator lifetime.
        let leaders = self
            .leader_cache
            .get_or_init(|| async {
                debug!("building team-leader cache");
                index.scan_team_leaders()
            })
            .await;

        entries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

        // Collapse teammates into children of their leaders.
        let mut teammates_by_leader: HashMap<String, Vec<Value>> = HashMap::new();
        let mut top_level = Vec::new();
        for entry in &entries {
            if let Some(ref team) = entry.team_name {
                if let Some(leader_id) = leaders.get(team) {
                    teammates_by_leader
                        .entry(leader_id.clone())
                        .or_default()
                        .push(entry_json(entry, &[]));
                    continue;
                }
            }
            top_level.push(entry.clone());
        }

        let sessions: Vec<Value> = top_level
            .iter()
            .map(|entry| {
                let children = teammates_by_leader
                    .get(&entry.id)
                    .cloned()
                    .unwrap_or_default();
                entry_json(entry, &children)
            })
            .collect();

        Ok(json!({ "sessions": sessions }))
    }

    /// Rename a session in the index and, when live, in memory.
    async fn rename_session(&self, session_id: &str, title: &str, params: &Value) -> Result<()> {
        if let Ok(session) = self.session(session_id).await {
            self.apply_title(&session, title);
            return Ok(());
        }
        let cwd = cwd_from(params);
        self.index_for(&cwd).rename(session_id, title, &cwd)
    }

    /// Delete a session: close it when live, then drop the index entry.
    async fn delete_session(&self, session_id: &str, params: &Value) -> Result<()> {
        let live_cwd = {
            if let Ok(session) = self.session(session_id).await {
                let cwd = session.shared.cwd.clone();
                self.evict(session_id).await;
                Some(cwd)
            } else {
                None
            }
        };
        let cwd = live_cwd.unwrap_or_else(|| cwd_from(params));
        match self.index_for(&cwd).delete(session_id) {
            Ok(()) => Ok(()),
            // A live-only session may never have been persisted.
            Err(AppError::NotFound(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Ask the worker pool for a title and apply it.
    async fn auto_rename(&self, session_id: &str) -> Result<String> {
        let session = self.session(session_id).await?;
        let seed = session
            .shared
            .title()
            .unwrap_or_else(|| "untitled coding session".to_owned());

        let prompt_text = format!(
            "Generate a concise title (at most eight words) for a coding session \
             currently titled \"{seed}\". Reply with the title only."
        );
        let title = self.pool().query(&prompt_text).await?;
        let title = title.trim().trim_matches('"').to_owned();
        if title.is_empty() {
            return Err(AppError::Pool("empty title from worker".into()));
        }
        self.apply_title(&session, &title);
        Ok(title)
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn str_field(params: &Value, name: &str) -> Result<String> {
    params
        .get(name)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| AppError::Acp(format!("missing required field '{name}'")))
}

fn cwd_from(params: &Value) -> PathBuf {
    params
        .get("cwd")
        .and_then(Value::as_str)
        .map_or_else(
            || std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            PathBuf::from,
        )
}

fn entry_json(entry: &SessionIndexEntry, children: &[Value]) -> Value {
    let mut object = Map::new();
    object.insert("sessionId".to_owned(), json!(entry.id));
    object.insert("title".to_owned(), json!(entry.title));
    object.insert("cwd".to_owned(), json!(entry.cwd));
    object.insert("createdAt".to_owned(), json!(entry.created_at.to_rfc3339()));
    object.insert("updatedAt".to_owned(), json!(entry.updated_at.to_rfc3339()));
    if let Some(ref team) = entry.team_name {
        object.insert("teamName".to_owned(), json!(team));
    }
    if !children.is_empty() {
        object.insert("teammates".to_owned(), json!(children));
    }
    Value::Object(object)
}
