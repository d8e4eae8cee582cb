//! Unit tests for session state: permission modes, the cancel flag, and
//! the mutable title/mode fields.

use std::path::PathBuf;

use agent_relay::session::state::{PermissionMode, SessionShared};

#[test]
fn permission_modes_round_trip_their_identifiers() {
    for mode in PermissionMode::all() {
        assert_eq!(
            PermissionMode::parse(mode.as_str()),
            Some(*mode),
            "mode {} must round-trip",
            mode.as_str()
        );
    }
    assert!(PermissionMode::parse("yolo").is_none());
}

#[test]
fn cancel_flag_is_monotonic_until_reset() {
    let shared = SessionShared::new("sess-s", PathBuf::from("/work"), PermissionMode::Default);

    assert!(!shared.is_cancelled());
    shared.cancel();
    assert!(shared.is_cancelled());
    // A second cancel does not unset anything.
    shared.cancel();
    assert!(shared.is_cancelled());

    // The next prompt resets the flag.
    shared.reset_cancelled();
    assert!(!shared.is_cancelled());
}

#[test]
fn mode_and_title_are_updatable() {
    let shared = SessionShared::new("sess-s", PathBuf::from("/work"), PermissionMode::Default);

    assert_eq!(shared.mode(), PermissionMode::Default);
    shared.set_mode(PermissionMode::Plan);
    assert_eq!(shared.mode(), PermissionMode::Plan);

    assert!(shared.title().is_none());
    shared.set_title("fix the parser");
    assert_eq!(shared.title().as_deref(), Some("fix the parser"));
}
