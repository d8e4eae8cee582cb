//! Unit tests for the tool-use cache state machine.

use agent_relay::translate::cache::{ToolUseCache, ToolUsePhase};
use serde_json::json;

#[test]
fn announce_then_finalise_progresses_the_entry() {
    let mut cache = ToolUseCache::new();

    assert!(
        cache.announce("t1", "Bash", json!({}), ToolUsePhase::Announced, None),
        "first announcement must win"
    );
    let entry = cache.get("t1").expect("entry must exist");
    assert_eq!(entry.phase, ToolUsePhase::Announced);

    let entry = cache
        .finalise("t1", json!({"command": "ls"}))
        .expect("finalise must find the announced entry");
    assert_eq!(entry.phase, ToolUsePhase::Finalised);
    assert_eq!(entry.input["command"], "ls");
}

#[test]
fn duplicate_announcement_is_rejected() {
    let mut cache = ToolUseCache::new();
    assert!(cache.announce("t1", "Bash", json!({}), ToolUsePhase::Announced, None));
    assert!(
        !cache.announce("t1", "Bash", json!({}), ToolUsePhase::Finalised, None),
        "a second announcement for the same id must be refused"
    );
    assert_eq!(cache.len(), 1);
}

#[test]
fn finalise_unknown_id_returns_none() {
    let mut cache = ToolUseCache::new();
    assert!(cache.finalise("ghost", json!({})).is_none());
}

#[test]
fn background_flag_detected_from_input() {
    let mut cache = ToolUseCache::new();
    cache.announce(
        "t2",
        "Task",
        json!({"run_in_background": true, "description": "index repo"}),
        ToolUsePhase::Announced,
        None,
    );
    assert!(cache.get("t2").expect("entry").background);
}

#[test]
fn background_flag_survives_finalisation() {
    let mut cache = ToolUseCache::new();
    // Streaming start has empty input; the finalised message carries the flag.
    cache.announce("t3", "Task", json!({}), ToolUsePhase::Announced, None);
    assert!(!cache.get("t3").expect("entry").background);

    cache
        .finalise("t3", json!({"run_in_background": true}))
        .expect("finalise");
    assert!(cache.get("t3").expect("entry").background);
}

#[test]
fn mark_background_upgrades_an_entry() {
    let mut cache = ToolUseCache::new();
    cache.announce("t4", "Task", json!({}), ToolUsePhase::Finalised, None);
    cache.mark_background("t4");
    assert!(cache.get("t4").expect("entry").background);
}

#[test]
fn evict_removes_the_entry() {
    let mut cache = ToolUseCache::new();
    cache.announce("t5", "Read", json!({}), ToolUsePhase::Announced, None);
    assert!(cache.evict("t5").is_some());
    assert!(cache.get("t5").is_none());
    assert!(cache.is_empty());
}

#[test]
fn parent_linkage_is_retained() {
    let mut cache = ToolUseCache::new();
    cache.announce(
        "t6",
        "Bash",
        json!({}),
        ToolUsePhase::Announced,
        Some("parent-1".to_owned()),
    );
    assert_eq!(
        cache.get("t6").expect("entry").parent_tool_use_id.as_deref(),
        Some("parent-1")
    );
}
