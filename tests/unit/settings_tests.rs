//! Unit tests for the shared per-cwd settings handle.
//!
//! Covers rule parsing, decision precedence (deny > allow > ask), prefix
//! matching, and handle sharing per working directory.

use std::path::Path;

use agent_relay::session::settings::{acquire, PreToolBehavior};
use serde_json::json;
use tempfile::TempDir;

fn write_settings(dir: &Path, body: &str) {
    let settings_dir = dir.join(".agent-relay");
    std::fs::create_dir_all(&settings_dir).expect("settings dir");
    std::fs::write(settings_dir.join("settings.json"), body).expect("settings file");
}

#[test]
fn deny_rules_win_over_allow_rules() {
    let dir = TempDir::new().expect("tempdir");
    write_settings(
        dir.path(),
        r#"{"permissions":{"allow":["Bash"],"deny":["Bash(rm *)"]}}"#,
    );

    let handle = acquire(dir.path()).expect("acquire");

    let denied = handle.decision("Bash", &json!({"command": "rm -rf /tmp/x"}));
    assert_eq!(denied.behavior, PreToolBehavior::Deny);
    assert_eq!(denied.rule_name.as_deref(), Some("Bash(rm *)"));

    let allowed = handle.decision("Bash", &json!({"command": "git status"}));
    assert_eq!(allowed.behavior, PreToolBehavior::Allow);
    assert_eq!(allowed.rule_name.as_deref(), Some("Bash"));
}

#[test]
fn prefix_rules_match_on_the_command() {
    let dir = TempDir::new().expect("tempdir");
    write_settings(dir.path(), r#"{"permissions":{"allow":["Bash(git *)"]}}"#);

    let handle = acquire(dir.path()).expect("acquire");

    assert_eq!(
        handle
            .decision("Bash", &json!({"command": "git log"}))
            .behavior,
        PreToolBehavior::Allow
    );
    assert_eq!(
        handle
            .decision("Bash", &json!({"command": "cargo build"}))
            .behavior,
        PreToolBehavior::Ask
    );
}

#[test]
fn unmatched_tools_fall_through_to_ask() {
    let dir = TempDir::new().expect("tempdir");
    write_settings(dir.path(), r#"{"permissions":{"allow":["Read"]}}"#);

    let handle = acquire(dir.path()).expect("acquire");
    let decision = handle.decision("WebFetch", &json!({"url": "https://example.com"}));
    assert_eq!(decision.behavior, PreToolBehavior::Ask);
    assert!(decision.rule_name.is_none());
}

#[test]
fn explicit_ask_rules_carry_their_name() {
    let dir = TempDir::new().expect("tempdir");
    write_settings(dir.path(), r#"{"permissions":{"ask":["WebFetch"]}}"#);

    let handle = acquire(dir.path()).expect("acquire");
    let decision = handle.decision("WebFetch", &json!({"url": "https://example.com"}));
    assert_eq!(decision.behavior, PreToolBehavior::Ask);
    assert_eq!(decision.rule_name.as_deref(), Some("WebFetch"));
}

#[test]
fn missing_settings_file_yields_ask_for_everything() {
    let dir = TempDir::new().expect("tempdir");
    let handle = acquire(dir.path()).expect("acquire");
    assert_eq!(
        handle.decision("Bash", &json!({"command": "ls"})).behavior,
        PreToolBehavior::Ask
    );
}

#[test]
fn same_cwd_shares_one_handle() {
    let dir = TempDir::new().expect("tempdir");
    write_settings(dir.path(), r#"{"permissions":{"allow":["Read"]}}"#);

    let first = acquire(dir.path()).expect("first acquire");
    let second = acquire(dir.path()).expect("second acquire");
    assert!(
        std::sync::Arc::ptr_eq(&first, &second),
        "acquire for the same cwd must share one entry"
    );
}

#[test]
fn different_cwds_get_distinct_handles() {
    let a = TempDir::new().expect("tempdir a");
    let b = TempDir::new().expect("tempdir b");

    let first = acquire(a.path()).expect("acquire a");
    let second = acquire(b.path()).expect("acquire b");
    assert!(!std::sync::Arc::ptr_eq(&first, &second));
}
