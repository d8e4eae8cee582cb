//! Global configuration parsing and defaults.
//!
//! Configuration comes from an optional TOML file plus a handful of
//! environment overrides consulted at spawn time (`AGENT_RELAY_EXECUTABLE`,
//! `AGENT_RELAY_PATH`, `AGENT_RELAY_STATE_DIR`). A missing config file is
//! not an error — the built-in defaults describe a stock `claude` child.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;

use crate::{AppError, Result};

/// Agent subprocess settings.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", default)]
pub struct AgentSettings {
    /// Agent executable name or path.
    pub executable: String,
    /// Fixed arguments placed before the generated option flags.
    pub base_args: Vec<String>,
    /// Default model identifier.
    pub model: Option<String>,
    /// Fallback model when the primary is unavailable.
    pub fallback_model: Option<String>,
    /// Maximum model turns per prompt.
    pub max_turns: Option<u32>,
    /// Maximum USD budget per prompt.
    pub max_budget_usd: Option<f64>,
    /// Maximum thinking tokens.
    pub max_thinking_tokens: Option<u32>,
    /// Literal system prompt; wins over the append form.
    pub system_prompt: Option<String>,
    /// Text appended to the child's preset system prompt.
    pub append_system_prompt: Option<String>,
    /// Prepended to the child's `PATH`.
    pub path_prepend: Option<String>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            executable: "claude".to_owned(),
            base_args: Vec::new(),
            model: None,
            fallback_model: None,
            max_turns: None,
            max_budget_usd: None,
            max_thinking_tokens: None,
            system_prompt: None,
            append_system_prompt: None,
            path_prepend: None,
        }
    }
}

/// Worker-pool settings for auxiliary short-lived invocations.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct PoolSettings {
    /// Workers spawned at warm-up.
    pub initial_size: usize,
    /// Soft maximum absorbing bursts.
    pub soft_cap: usize,
    /// Uses before a worker is recycled, bounding accumulated context.
    pub max_uses: u32,
    /// System prompt fixed for the whole pool.
    pub system_prompt: String,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            initial_size: 1,
            soft_cap: 3,
            max_uses: 8,
            system_prompt: "You answer one short routing or titling request per message, \
                            with no preamble."
                .to_owned(),
        }
    }
}

/// One selectable model exposed to the client.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ModelConfig {
    /// Model identifier.
    pub id: String,
    /// Human-readable name.
    pub name: String,
}

/// A user-configured hook forwarded to every child.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct HookConfig {
    /// Lifecycle event the hook fires on.
    pub event: String,
    /// Tool-name matcher; empty matches everything.
    #[serde(default)]
    pub matcher: String,
    /// Identifier echoed back by the child when the hook fires.
    pub callback_id: String,
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", default)]
pub struct RelayConfig {
    /// Agent subprocess settings.
    pub agent: AgentSettings,
    /// Worker-pool settings.
    pub pool: PoolSettings,
    /// Relay state directory; defaults to `~/.agent-relay`.
    pub state_dir: Option<PathBuf>,
    /// Models offered to the client.
    pub models: Vec<ModelConfig>,
    /// Identifier of the default model.
    pub default_model: Option<String>,
    /// User MCP server configurations, merged with internal entries.
    pub mcp_servers: BTreeMap<String, Value>,
    /// User hooks, merged after the internal pre/post tool hooks.
    pub hooks: Vec<HookConfig>,
}

impl RelayConfig {
    /// Load configuration from a TOML file.
    ///
    /// A missing file yields the defaults; any other read or parse failure
    /// is an error.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` when the file exists but cannot be read
    /// or parsed.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(err) => {
                return Err(AppError::Config(format!(
                    "cannot read config file '{}': {err}",
                    path.display()
                )));
            }
        };
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` on invalid TOML.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        Ok(config)
    }

    /// Effective state directory, honouring `AGENT_RELAY_STATE_DIR`.
    #[must_use]
    pub fn state_dir(&self) -> PathBuf {
        if let Ok(dir) = std::env::var("AGENT_RELAY_STATE_DIR") {
            if !dir.is_empty() {
                return PathBuf::from(dir);
            }
        }
        if let Some(ref dir) = self.state_dir {
            return dir.clone();
        }
        std::env::var("HOME").map_or_else(
            |_| PathBuf::from(".agent-relay"),
            |home| Path::new(&home).join(".agent-relay"),
        )
    }

    /// Identifier of the model reported as current.
    #[must_use]
    pub fn current_model_id(&self) -> String {
        self.default_model
            .clone()
            .or_else(|| self.agent.model.clone())
            .or_else(|| self.models.first().map(|m| m.id.clone()))
            .unwrap_or_else(|| "default".to_owned())
    }
}
