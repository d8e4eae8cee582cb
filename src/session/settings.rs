//! Shared per-working-directory settings with hot reload.
//!
//! Each working directory has at most one live [`SettingsEntry`], shared by
//! every session rooted there and reference-counted through [`Arc`]: the
//! first acquirer loads the rules and starts the file watcher, the last
//! release drops the entry (and with it the watcher). The global registry
//! holds only weak references, so disposal is automatic.
//!
//! The settings file is `<cwd>/.agent-relay/settings.json`:
//!
//! ```json
//! { "permissions": { "allow": ["Bash(git *)"], "deny": ["WebFetch"], "ask": [] } }
//! ```
//!
//! Rules are `Tool` or `Tool(prefix)` strings; a trailing `*` in the prefix
//! is a wildcard. The pre-tool hook consults [`SettingsEntry::decision`]
//! for its allow / deny / ask answer.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock, Weak};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{AppError, Result};

/// Relative path of the settings file under a working directory.
const SETTINGS_RELATIVE: &str = ".agent-relay/settings.json";

/// Behaviour the pre-tool hook reports back to the child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreToolBehavior {
    /// Run the tool without asking.
    Allow,
    /// Refuse the tool.
    Deny,
    /// Fall through to the interactive permission flow.
    Ask,
}

impl PreToolBehavior {
    /// Wire name of the behaviour.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
            Self::Ask => "ask",
        }
    }
}

/// Outcome of a pre-tool settings consultation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreToolDecision {
    /// What the child should do.
    pub behavior: PreToolBehavior,
    /// Name of the rule that decided, for allow/deny logging.
    pub rule_name: Option<String>,
}

/// One parsed permission rule.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ToolRule {
    /// The rule string as written, used as the rule name.
    raw: String,
    /// Tool name the rule applies to.
    tool: String,
    /// Optional argument prefix (Bash commands, file paths).
    prefix: Option<String>,
}

impl ToolRule {
    /// Parse `Tool` or `Tool(prefix)`.
    fn parse(raw: &str) -> Option<Self> {
        let raw_trimmed = raw.trim();
        if raw_trimmed.is_empty() {
            return None;
        }
        if let Some((tool, rest)) = raw_trimmed.split_once('(') {
            let prefix = rest.strip_suffix(')')?;
            Some(Self {
                raw: raw_trimmed.to_owned(),
                tool: tool.to_owned(),
                prefix: Some(prefix.trim_end_matches('*').to_owned()),
            })
        } else {
            Some(Self {
                raw: raw_trimmed.to_owned(),
                tool: raw_trimmed.to_owned(),
                prefix: None,
            })
        }
    }

    /// Whether the rule matches a tool invocation.
    fn matches(&self, tool_name: &str, input: &Value) -> bool {
        if self.tool != tool_name {
            return false;
        }
        let Some(ref prefix) = self.prefix else {
            return true;
        };
        if prefix.is_empty() {
            return true;
        }
        // The prefix is matched against the most command-like input field.
        let subject = input
            .get("command")
            .or_else(|| input.get("file_path"))
            .or_else(|| input.get("path"))
            .or_else(|| input.get("url"))
            .and_then(Value::as_str)
            .unwrap_or("");
        subject.starts_with(prefix.trim_end())
    }
}

/// Parsed rule sets from the settings file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct PermissionRules {
    allow: Vec<ToolRule>,
    deny: Vec<ToolRule>,
    ask: Vec<ToolRule>,
}

/// On-disk shape of the settings file.
#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    #[serde(default)]
    permissions: PermissionLists,
}

#[derive(Debug, Default, Deserialize)]
struct PermissionLists {
    #[serde(default)]
    allow: Vec<String>,
    #[serde(default)]
    deny: Vec<String>,
    #[serde(default)]
    ask: Vec<String>,
}

/// Live settings for one working directory.
pub struct SettingsEntry {
    cwd: PathBuf,
    rules: RwLock<PermissionRules>,
    // Kept alive for the entry's lifetime; dropping stops the OS watch.
    _watcher: Option<RecommendedWatcher>,
}

/// Reference-counted settings handle; clones share one entry per cwd.
pub type SettingsHandle = Arc<SettingsEntry>;

impl SettingsEntry {
    /// Working directory this entry belongs to.
    #[must_use]
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Decide allow / deny / ask for one tool invocation.
    ///
    /// Deny rules win, then allow, then explicit ask; an unmatched tool
    /// falls through to `ask` with no rule name.
    #[must_use]
    pub fn decision(&self, tool_name: &str, input: &Value) -> PreToolDecision {
        let rules = self.rules.read().unwrap_or_else(PoisonError::into_inner);

        if let Some(rule) = rules.deny.iter().find(|r| r.matches(tool_name, input)) {
            return PreToolDecision {
                behavior: PreToolBehavior::Deny,
                rule_name: Some(rule.raw.clone()),
            };
        }
        if let Some(rule) = rules.allow.iter().find(|r| r.matches(tool_name, input)) {
            return PreToolDecision {
                behavior: PreToolBehavior::Allow,
                rule_name: Some(rule.raw.clone()),
            };
        }
        if let Some(rule) = rules.ask.iter().find(|r| r.matches(tool_name, input)) {
            return PreToolDecision {
                behavior: PreToolBehavior::Ask,
                rule_name: Some(rule.raw.clone()),
            };
        }
        PreToolDecision {
            behavior: PreToolBehavior::Ask,
            rule_name: None,
        }
    }
}

// ── Registry ──────────────────────────────────────────────────────────────────

type Registry = Mutex<HashMap<PathBuf, Weak<SettingsEntry>>>;

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Acquire the shared settings handle for a working directory.
///
/// The first acquirer loads the rules and starts the watcher; subsequent
/// acquirers share the same entry until every handle is dropped.
///
/// # Errors
///
/// Currently infallible in practice — a missing or unparsable settings file
/// yields empty rules and a warning — but kept fallible for parity with the
/// rest of the lifecycle surface.
pub fn acquire(cwd: &Path) -> Result<SettingsHandle> {
    let mut map = registry().lock().unwrap_or_else(PoisonError::into_inner);

    if let Some(existing) = map.get(cwd).and_then(Weak::upgrade) {
        debug!(cwd = %cwd.display(), "settings: sharing existing handle");
        return Ok(existing);
    }

    let entry = Arc::new(build_entry(cwd));
    map.insert(cwd.to_path_buf(), Arc::downgrade(&entry));
    info!(cwd = %cwd.display(), "settings: handle initialised");
    Ok(entry)
}

/// Load rules and start the watcher for one working directory.
fn build_entry(cwd: &Path) -> SettingsEntry {
    let settings_path = cwd.join(SETTINGS_RELATIVE);
    let initial = load_rules(&settings_path).unwrap_or_else(|err| {
        debug!(
            %err,
            path = %settings_path.display(),
            "settings: starting with empty rules"
        );
        PermissionRules::default()
    });

    let rules = RwLock::new(initial);
    let watcher = start_watcher(cwd, &settings_path);

    SettingsEntry {
        cwd: cwd.to_path_buf(),
        rules,
        _watcher: watcher,
    }
}

/// Parse the settings file into rule sets.
fn load_rules(path: &Path) -> Result<PermissionRules> {
    let raw = std::fs::read_to_string(path)
        .map_err(|err| AppError::Config(format!("failed to read settings: {err}")))?;
    let parsed: SettingsFile = serde_json::from_str(&raw)
        .map_err(|err| AppError::Config(format!("failed to parse settings: {err}")))?;

    let compile = |rules: &[String]| rules.iter().filter_map(|r| ToolRule::parse(r)).collect();
    Ok(PermissionRules {
        allow: compile(&parsed.permissions.allow),
        deny: compile(&parsed.permissions.deny),
        ask: compile(&parsed.permissions.ask),
    })
}

/// Start the hot-reload watcher; non-fatal when the OS watch cannot be
/// created (the entry then serves its initial rules for its lifetime).
fn start_watcher(cwd: &Path, settings_path: &Path) -> Option<RecommendedWatcher> {
    // The notify callback is synchronous; it reaches the live entry through
    // the registry's weak reference, so a disposed entry is simply a no-op.
    let path_for_callback = settings_path.to_path_buf();
    let cwd_for_callback = cwd.to_path_buf();

    let watcher = notify::recommended_watcher(
        move |result: std::result::Result<Event, notify::Error>| match result {
            Ok(event) if is_settings_change(&event) => {
                match load_rules(&path_for_callback) {
                    Ok(new_rules) => {
                        if let Some(entry) = registry()
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .get(&cwd_for_callback)
                            .and_then(Weak::upgrade)
                        {
                            *entry.rules.write().unwrap_or_else(PoisonError::into_inner) =
                                new_rules;
                            info!(
                                path = %path_for_callback.display(),
                                "settings: hot-reloaded permission rules"
                            );
                        }
                    }
                    Err(err) => {
                        warn!(
                            %err,
                            path = %path_for_callback.display(),
                            "settings: reload failed — keeping previous rules"
                        );
                    }
                }
            }
            Err(err) => warn!(%err, "settings: watcher error"),
            _ => {}
        },
    );

    let mut watcher = match watcher {
        Ok(watcher) => watcher,
        Err(err) => {
            warn!(%err, cwd = %cwd.display(), "settings: watcher unavailable");
            return None;
        }
    };

    // Watch the containing directory (not the file itself) so atomic
    // rename-based writes are detected; missing directories are tolerated.
    let watch_target = settings_path
        .parent()
        .filter(|p| p.exists())
        .map_or_else(|| cwd.to_path_buf(), Path::to_path_buf);

    if let Err(err) = watcher.watch(&watch_target, RecursiveMode::NonRecursive) {
        warn!(
            %err,
            target = %watch_target.display(),
            "settings: watch failed — rules will not hot-reload"
        );
        return None;
    }

    Some(watcher)
}

/// File-system events that indicate the settings file was written or
/// replaced.
fn is_settings_change(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}
