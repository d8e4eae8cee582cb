//! Session entity and the shared state both planes touch.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};

use crate::agent::transport::AgentTransport;
use crate::correlate::background::BackgroundTasks;
use crate::correlate::control::ControlCorrelator;
use crate::router::MessageRouter;
use crate::session::settings::SettingsHandle;
use crate::translate::cache::ToolUseCache;
use crate::translate::Translator;

/// Permission mode of a session (closed set).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionMode {
    /// Interactive permission flow for everything not covered by rules.
    Default,
    /// File edits are granted without asking; everything else as default.
    AcceptEdits,
    /// Every permission query is granted. Disabled while running as root.
    BypassPermissions,
    /// Never ask: unmatched queries are denied instead of prompted.
    DontAsk,
    /// Planning mode; the plan-exit tool gates the switch out.
    Plan,
    /// Delegate decisions to the client without local fast paths.
    Delegate,
}

impl PermissionMode {
    /// Wire identifier of the mode.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::AcceptEdits => "acceptEdits",
            Self::BypassPermissions => "bypassPermissions",
            Self::DontAsk => "dontAsk",
            Self::Plan => "plan",
            Self::Delegate => "delegate",
        }
    }

    /// Parse a wire identifier.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "default" => Some(Self::Default),
            "acceptEdits" => Some(Self::AcceptEdits),
            "bypassPermissions" => Some(Self::BypassPermissions),
            "dontAsk" => Some(Self::DontAsk),
            "plan" => Some(Self::Plan),
            "delegate" => Some(Self::Delegate),
            _ => None,
        }
    }

    /// Every selectable mode, in presentation order.
    #[must_use]
    pub fn all() -> &'static [Self] {
        &[
            Self::Default,
            Self::AcceptEdits,
            Self::BypassPermissions,
            Self::DontAsk,
            Self::Plan,
            Self::Delegate,
        ]
    }
}

/// State shared between the turn loop and the router's intercept handler.
///
/// Maps use non-async mutexes held only for short, await-free sections, so
/// the intercept path (which runs on the reader task) never blocks.
pub struct SessionShared {
    /// Session identifier.
    pub session_id: String,
    /// Working directory.
    pub cwd: PathBuf,
    /// Cancelled-flag; monotonic within a turn, reset at the next prompt.
    pub cancelled: AtomicBool,
    /// Current permission mode.
    pub mode: Mutex<PermissionMode>,
    /// Human-readable title; populated from the first prompt.
    pub title: Mutex<Option<String>>,
    /// Last-activity timestamp.
    pub updated_at: Mutex<DateTime<Utc>>,
    /// Whether the one automatic rename has been attempted.
    pub rename_attempted: AtomicBool,
    /// Tool-use cache.
    pub cache: Arc<Mutex<ToolUseCache>>,
    /// Background-task map.
    pub background: Arc<Mutex<BackgroundTasks>>,
}

impl SessionShared {
    /// Create the shared state for one session.
    #[must_use]
    pub fn new(session_id: &str, cwd: PathBuf, mode: PermissionMode) -> Arc<Self> {
        Arc::new(Self {
            session_id: session_id.to_owned(),
            cwd,
            cancelled: AtomicBool::new(false),
            mode: Mutex::new(mode),
            title: Mutex::new(None),
            updated_at: Mutex::new(Utc::now()),
            rename_attempted: AtomicBool::new(false),
            cache: Arc::new(Mutex::new(ToolUseCache::new())),
            background: Arc::new(Mutex::new(BackgroundTasks::new())),
        })
    }

    /// Whether the current turn has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Set the cancelled flag (monotonic within the turn).
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Reset the flag at the start of a new prompt.
    pub fn reset_cancelled(&self) {
        self.cancelled.store(false, Ordering::Release);
    }

    /// Current permission mode.
    #[must_use]
    pub fn mode(&self) -> PermissionMode {
        *self.mode.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Switch the permission mode.
    pub fn set_mode(&self, mode: PermissionMode) {
        *self.mode.lock().unwrap_or_else(PoisonError::into_inner) = mode;
    }

    /// Current title, if any.
    #[must_use]
    pub fn title(&self) -> Option<String> {
        self.title
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Set the title.
    pub fn set_title(&self, title: &str) {
        *self.title.lock().unwrap_or_else(PoisonError::into_inner) = Some(title.to_owned());
    }

    /// Bump the last-activity timestamp.
    pub fn touch(&self) {
        *self
            .updated_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Utc::now();
    }

    /// Last-activity timestamp.
    #[must_use]
    pub fn updated_at(&self) -> DateTime<Utc> {
        *self
            .updated_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// One live session: exclusive owner of its subprocess and router.
pub struct Session {
    /// Hot shared state.
    pub shared: Arc<SessionShared>,
    /// Subprocess write side and lifecycle.
    pub transport: Arc<AgentTransport>,
    /// Two-plane demultiplexer over the child's stdout.
    pub router: Arc<MessageRouter>,
    /// Bridge-to-agent control correlator.
    pub correlator: Arc<ControlCorrelator>,
    /// Content translation layer.
    pub translator: Arc<Translator>,
    /// Shared settings handle for the working directory.
    pub settings: SettingsHandle,
    /// Whether the initialize control request has been sent.
    pub initialized: AtomicBool,
    /// Serialises prompt turns; one turn per session at a time. Owned
    /// guards let the post-cancel drain keep the turn closed until the
    /// child's terminal result has been consumed.
    pub turn_lock: Arc<tokio::sync::Mutex<()>>,
}

impl Session {
    /// Mark the initialize request as sent; returns whether this call won.
    pub fn mark_initialized(&self) -> bool {
        !self.initialized.swap(true, Ordering::AcqRel)
    }
}
