//! Unit tests for configuration parsing and defaults.

use std::path::PathBuf;

use agent_relay::config::RelayConfig;
use serial_test::serial;

#[test]
fn defaults_describe_a_stock_child() {
    let config = RelayConfig::default();
    assert_eq!(config.agent.executable, "claude");
    assert!(config.agent.base_args.is_empty());
    assert_eq!(config.pool.initial_size, 1);
    assert!(config.pool.soft_cap >= config.pool.initial_size);
    assert!(config.pool.max_uses > 0);
}

#[test]
fn toml_overrides_parse() {
    let config = RelayConfig::from_toml_str(
        r#"
        [agent]
        executable = "my-agent"
        model = "fast-1"
        max_turns = 12

        [pool]
        initial_size = 2
        soft_cap = 4
        max_uses = 3

        [[models]]
        id = "fast-1"
        name = "Fast"

        [[models]]
        id = "deep-1"
        name = "Deep"
        "#,
    )
    .expect("toml must parse");

    assert_eq!(config.agent.executable, "my-agent");
    assert_eq!(config.agent.max_turns, Some(12));
    assert_eq!(config.pool.soft_cap, 4);
    assert_eq!(config.models.len(), 2);
    assert_eq!(config.current_model_id(), "fast-1");
}

#[test]
fn invalid_toml_is_a_config_error() {
    let result = RelayConfig::from_toml_str("agent = [not toml");
    assert!(result.is_err());
}

#[test]
fn missing_config_file_yields_defaults() {
    let config =
        RelayConfig::load_from_path("/definitely/not/a/real/path/agent-relay.toml")
            .expect("missing file must not error");
    assert_eq!(config, RelayConfig::default());
}

#[test]
fn current_model_prefers_default_then_agent_model() {
    let mut config = RelayConfig::default();
    assert_eq!(config.current_model_id(), "default");

    config.agent.model = Some("agent-model".to_owned());
    assert_eq!(config.current_model_id(), "agent-model");

    config.default_model = Some("explicit".to_owned());
    assert_eq!(config.current_model_id(), "explicit");
}

#[test]
#[serial]
fn state_dir_env_override_wins() {
    let mut config = RelayConfig::default();
    config.state_dir = Some(PathBuf::from("/configured"));

    std::env::set_var("AGENT_RELAY_STATE_DIR", "/from-env");
    assert_eq!(config.state_dir(), PathBuf::from("/from-env"));

    std::env::remove_var("AGENT_RELAY_STATE_DIR");
    assert_eq!(config.state_dir(), PathBuf::from("/configured"));
}
