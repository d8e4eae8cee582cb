//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Upstream ACP protocol failure (malformed envelope, unknown method).
    Acp(String),
    /// Downstream agent wire failure (malformed NDJSON, unexpected message).
    Agent(String),
    /// The agent reported that interactive login is required.
    AuthRequired(String),
    /// The agent subprocess died; the session is unusable.
    SessionDead(String),
    /// The operation was cancelled by the client.
    Cancelled,
    /// Requested entity does not exist.
    NotFound(String),
    /// Worker-pool spawn or query failure.
    Pool(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// Internal failure surfaced from a turn result or invariant breach.
    Internal(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Acp(msg) => write!(f, "acp: {msg}"),
            Self::Agent(msg) => write!(f, "agent: {msg}"),
            Self::AuthRequired(msg) => write!(f, "authentication required: {msg}"),
            Self::SessionDead(msg) => write!(f, "session dead: {msg}"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Pool(msg) => write!(f, "worker pool: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Internal(msg) => write!(f, "internal: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Agent(format!("json: {err}"))
    }
}
