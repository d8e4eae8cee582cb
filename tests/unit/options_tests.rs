//! Unit tests for spawn-option rendering and capability-derived tool lists.

use std::collections::BTreeMap;
use std::path::PathBuf;

use agent_relay::agent::options::{running_as_root, SpawnOptions, SystemPrompt};
use agent_relay::session::orchestrator::capability_tool_lists;
use serde_json::json;

fn base_options() -> SpawnOptions {
    SpawnOptions {
        executable: "claude".to_owned(),
        cwd: PathBuf::from("/work"),
        ..SpawnOptions::default()
    }
}

// ── Framing flags ────────────────────────────────────────────────────────────

#[test]
fn framing_flags_are_always_present() {
    let args = base_options().to_args();
    for flag in [
        "--input-format",
        "--output-format",
        "--verbose",
        "--include-partial-messages",
    ] {
        assert!(args.contains(&flag.to_owned()), "missing {flag} in {args:?}");
    }
    let position = args
        .iter()
        .position(|a| a == "--input-format")
        .expect("input format flag");
    assert_eq!(args[position + 1], "stream-json");
}

// ── Option flags ─────────────────────────────────────────────────────────────

#[test]
fn configured_options_render_their_flags() {
    let mut options = base_options();
    options.model = Some("fast-1".to_owned());
    options.max_turns = Some(9);
    options.max_budget_usd = Some(1.5);
    options.max_thinking_tokens = Some(4096);
    options.fallback_model = Some("small-1".to_owned());
    options.permission_mode = Some("plan".to_owned());

    let args = options.to_args();
    let has_pair = |flag: &str, value: &str| {
        args.iter()
            .position(|a| a == flag)
            .is_some_and(|i| args.get(i + 1).map(String::as_str) == Some(value))
    };

    assert!(has_pair("--model", "fast-1"));
    assert!(has_pair("--max-turns", "9"));
    assert!(has_pair("--max-budget-usd", "1.5"));
    assert!(has_pair("--max-thinking-tokens", "4096"));
    assert!(has_pair("--fallback-model", "small-1"));
    assert!(has_pair("--permission-mode", "plan"));
}

#[test]
fn system_prompt_forms_are_distinct_flags() {
    let mut options = base_options();
    options.system_prompt = Some(SystemPrompt::Literal("be brief".to_owned()));
    let args = options.to_args();
    assert!(args.contains(&"--system-prompt".to_owned()));
    assert!(!args.contains(&"--append-system-prompt".to_owned()));

    options.system_prompt = Some(SystemPrompt::AppendToPreset("and careful".to_owned()));
    let args = options.to_args();
    assert!(args.contains(&"--append-system-prompt".to_owned()));
    assert!(!args.contains(&"--system-prompt".to_owned()));
}

#[test]
fn tool_lists_render_comma_joined() {
    let mut options = base_options();
    options.allowed_tools = vec!["mcp__acp__read".to_owned(), "Grep".to_owned()];
    options.disallowed_tools = vec!["Read".to_owned()];

    let args = options.to_args();
    let allowed_at = args
        .iter()
        .position(|a| a == "--allowed-tools")
        .expect("allowed flag");
    assert_eq!(args[allowed_at + 1], "mcp__acp__read,Grep");
    let disallowed_at = args
        .iter()
        .position(|a| a == "--disallowed-tools")
        .expect("disallowed flag");
    assert_eq!(args[disallowed_at + 1], "Read");
}

#[test]
fn mcp_servers_render_as_one_json_argument() {
    let mut options = base_options();
    let mut servers = BTreeMap::new();
    servers.insert(
        "files".to_owned(),
        json!({"type": "stdio", "command": "files-server"}),
    );
    options.mcp_servers = servers;

    let args = options.to_args();
    let at = args
        .iter()
        .position(|a| a == "--mcp-config")
        .expect("mcp flag");
    let parsed: serde_json::Value =
        serde_json::from_str(&args[at + 1]).expect("mcp config must be valid json");
    assert_eq!(parsed["mcpServers"]["files"]["command"], "files-server");
}

#[test]
fn internal_hooks_cover_pre_and_post_tool() {
    let hooks = SpawnOptions::internal_hooks();
    assert_eq!(hooks.len(), 2);
    assert!(hooks.iter().any(|h| h.event == "PreToolUse"));
    assert!(hooks.iter().any(|h| h.event == "PostToolUse"));

    let mut options = base_options();
    options.hooks = hooks;
    let args = options.to_args();
    let at = args
        .iter()
        .position(|a| a == "--hooks-config")
        .expect("hooks flag");
    let parsed: serde_json::Value =
        serde_json::from_str(&args[at + 1]).expect("hooks config must be valid json");
    assert!(parsed["hooks"]["PreToolUse"].is_array());
    assert!(parsed["hooks"]["PostToolUse"].is_array());
}

#[test]
fn resume_and_fork_render_together() {
    let mut options = base_options();
    options.resume_session_id = Some("parent-id".to_owned());
    options.fork_session = true;

    let args = options.to_args();
    let at = args.iter().position(|a| a == "--resume").expect("resume");
    assert_eq!(args[at + 1], "parent-id");
    assert!(args.contains(&"--fork-session".to_owned()));

    // Fork without a resume hint renders neither flag.
    let mut options = base_options();
    options.fork_session = true;
    assert!(!options.to_args().contains(&"--fork-session".to_owned()));
}

#[test]
fn skip_permissions_respects_the_root_gate() {
    let mut options = base_options();
    options.dangerously_skip_permissions = true;

    let args = options.to_args();
    if running_as_root() {
        assert!(
            !args.contains(&"--dangerously-skip-permissions".to_owned()),
            "the flag must never be forwarded as root"
        );
    } else {
        assert!(args.contains(&"--dangerously-skip-permissions".to_owned()));
    }
}

// ── Capability-derived tool lists ────────────────────────────────────────────

#[test]
fn no_capabilities_means_no_restrictions() {
    let (allowed, disallowed) = capability_tool_lists(None);
    assert!(allowed.is_empty());
    assert!(disallowed.is_empty());
}

#[test]
fn fs_read_capability_redirects_reads() {
    let caps = serde_json::from_value(json!({
        "fs": { "readTextFile": true, "writeTextFile": false },
    }))
    .expect("caps must parse");
    let (allowed, disallowed) = capability_tool_lists(Some(&caps));
    assert!(allowed.contains(&"mcp__acp__read".to_owned()));
    assert!(disallowed.contains(&"Read".to_owned()));
    assert!(!disallowed.contains(&"Write".to_owned()));
}

#[test]
fn fs_write_capability_disables_native_edit_tools() {
    let caps = serde_json::from_value(json!({
        "fs": { "readTextFile": false, "writeTextFile": true },
    }))
    .expect("caps must parse");
    let (_, disallowed) = capability_tool_lists(Some(&caps));
    for tool in ["Write", "Edit", "MultiEdit", "NotebookEdit"] {
        assert!(disallowed.contains(&tool.to_owned()), "missing {tool}");
    }
}

#[test]
fn terminal_capability_redirects_shell_tools() {
    let caps = serde_json::from_value(json!({ "terminal": true })).expect("caps must parse");
    let (allowed, disallowed) = capability_tool_lists(Some(&caps));
    assert!(allowed.contains(&"mcp__acp__bash_output".to_owned()));
    assert!(allowed.contains(&"mcp__acp__kill_shell".to_owned()));
    assert!(disallowed.contains(&"Bash".to_owned()));
}
