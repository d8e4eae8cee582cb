//! Unit tests for the application error taxonomy.

use agent_relay::AppError;

#[test]
fn display_prefixes_distinguish_the_kinds()  {
    assert_eq!(
        AppError::Config("bad value".into()).to_string(),
        "config: bad value"
    );
    assert_eq!(AppError::Acp("oops".into()).to_string(), "acp: oops");
    assert_eq!(AppError::Agent("oops".into()).to_string(), "agent: oops");
    assert_eq!(
        AppError::AuthRequired("Please run /login".into()).to_string(),
        "authentication required: Please run /login"
    );
    assert_eq!(
        AppError::SessionDead("gone".into()).to_string(),
        "session dead: gone"
    );
    assert_eq!(AppError::Cancelled.to_string(), "cancelled");
    assert_eq!(
        AppError::NotFound("session 'x'".into()).to_string(),
        "not found: session 'x'"
    );
    assert_eq!(AppError::Pool("spawn".into()).to_string(), "worker pool: spawn");
    assert_eq!(AppError::Io("pipe".into()).to_string(), "io: pipe");
    assert_eq!(
        AppError::Internal("invariant".into()).to_string(),
        "internal: invariant"
    );
}

#[test]
fn io_errors_convert() {
    let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
    let err: AppError = io.into();
    assert!(matches!(err, AppError::Io(ref msg) if msg.contains("pipe closed")));
}

#[test]
fn serde_errors_convert_to_agent_faults() {
    let parse_err =
        serde_json::from_str::<serde_json::Value>("{broken").expect_err("must fail");
    let err: AppError = parse_err.into();
    assert!(matches!(err, AppError::Agent(_)));
}

#[test]
fn toml_errors_convert_to_config_faults() {
    let parse_err = toml::from_str::<toml::Value>("= broken").expect_err("must fail");
    let err: AppError = parse_err.into();
    assert!(matches!(err, AppError::Config(_)));
}
