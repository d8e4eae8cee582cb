//! Agent subprocess transport.
//!
//! Spawns the agent binary with fixed NDJSON framing flags and owns the
//! child's stdio:
//!
//! - **stdin** is fed by a push-queue: [`AgentTransport::write`] enqueues one
//!   serialised object, a dedicated writer task appends the `\n` delimiter
//!   and performs the actual I/O. The queue accepts pushes at will and
//!   preserves FIFO order.
//! - **stdout** is handed to the caller at spawn time; the message router
//!   owns the read side (see [`crate::router`]).
//! - **stderr** is drained line-by-line into the logger and an optional
//!   user callback.
//!
//! A failed write marks the transport dead; subsequent writes reject
//! immediately with [`AppError::SessionDead`]. A child that exits before
//! emitting a terminal result is surfaced the same way by the exit monitor.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::options::SpawnOptions;
use crate::{AppError, Result};

/// Callback invoked with each line the child writes to stderr.
pub type StderrCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// A freshly spawned agent: the transport plus the raw stdout for the
/// router to take ownership of.
pub struct SpawnedAgent {
    /// Write side and lifecycle handle.
    pub transport: AgentTransport,
    /// The child's stdout, to be wrapped by a message router.
    pub stdout: ChildStdout,
}

/// Write side and lifecycle handle for one agent subprocess.
pub struct AgentTransport {
    session_id: String,
    writer_tx: mpsc::UnboundedSender<serde_json::Value>,
    dead: Arc<AtomicBool>,
    child: Mutex<Option<Child>>,
    cancel: CancellationToken,
}

impl AgentTransport {
    /// Spawn the agent subprocess described by `options`.
    ///
    /// The child is launched with piped stdio and `kill_on_drop(true)` so an
    /// abandoned transport cannot leak a process. `AGENT_RELAY_PATH`, when
    /// set (or configured), is prepended to the child's `PATH`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::SessionDead`] when the OS-level spawn fails or a
    /// stdio pipe cannot be captured.
    pub fn spawn(
        session_id: &str,
        options: &SpawnOptions,
        stderr_callback: Option<StderrCallback>,
    ) -> Result<SpawnedAgent> {
        let executable = options.effective_executable();
        let mut cmd = Command::new(&executable);
        cmd.args(options.to_args())
            .current_dir(&options.cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let path_prepend = std::env::var("AGENT_RELAY_PATH")
            .ok()
            .filter(|v| !v.is_empty())
            .or_else(|| options.path_prepend.clone());
        if let Some(prefix) = path_prepend {
            let current = std::env::var("PATH").unwrap_or_default();
            cmd.env("PATH", format!("{prefix}:{current}"));
        }

        let mut child = cmd.spawn().map_err(|err| {
            AppError::SessionDead(format!("failed to spawn agent '{executable}': {err}"))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::SessionDead("failed to capture agent stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::SessionDead("failed to capture agent stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::SessionDead("failed to capture agent stderr".into()))?;

        info!(session_id, executable, "agent subprocess spawned");

        let dead = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_writer(
            session_id.to_owned(),
            stdin,
            writer_rx,
            Arc::clone(&dead),
            cancel.clone(),
        ));
        tokio::spawn(forward_stderr(
            session_id.to_owned(),
            stderr,
            stderr_callback,
            cancel.clone(),
        ));

        let transport = Self {
            session_id: session_id.to_owned(),
            writer_tx,
            dead,
            child: Mutex::new(Some(child)),
            cancel,
        };

        Ok(SpawnedAgent { transport, stdout })
    }

    /// Enqueue one object for the child's stdin.
    ///
    /// The write is asynchronous: the object is serialised and flushed by
    /// the writer task. FIFO order is preserved across calls.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::SessionDead`] once the transport is dead (a prior
    /// write failed or the child exited).
    pub fn write(&self, value: serde_json::Value) -> Result<()> {
        if self.dead.load(Ordering::Acquire) {
            return Err(AppError::SessionDead(format!(
                "agent stdin closed for session '{}'",
                self.session_id
            )));
        }
        self.writer_tx.send(value).map_err(|_| {
            AppError::SessionDead(format!(
                "agent writer gone for session '{}'",
                self.session_id
            ))
        })
    }

    /// Whether the transport has been marked dead.
    #[must_use]
    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::Acquire)
    }

    /// Mark the transport dead without touching the process.
    ///
    /// Used by the exit monitor when the child disappears on its own.
    pub fn mark_dead(&self) {
        self.dead.store(true, Ordering::Release);
    }

    /// Take the child handle for exit monitoring.
    ///
    /// The monitor owns `wait()`; the transport keeps kill authority via
    /// the returned handle being passed back into [`AgentTransport::close`].
    pub async fn take_child(&self) -> Option<Child> {
        self.child.lock().await.take()
    }

    /// Send EOF to the child's stdin and reap the process.
    ///
    /// Drops the writer channel (closing stdin), waits up to `grace` for a
    /// natural exit, then force-kills. Idempotent: closing an already-dead
    /// transport only re-runs the reap step.
    pub async fn close(&self, grace: Duration) {
        self.mark_dead();
        self.cancel.cancel();

        let child = self.child.lock().await.take();
        let Some(mut child) = child else {
            return;
        };

        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(exit)) => {
                info!(session_id = %self.session_id, ?exit, "agent exited on close");
            }
            Ok(Err(err)) => {
                warn!(session_id = %self.session_id, %err, "error waiting for agent on close");
            }
            Err(_) => {
                warn!(
                    session_id = %self.session_id,
                    "agent did not exit within grace period, forcing kill"
                );
                if let Err(err) = child.kill().await {
                    warn!(session_id = %self.session_id, %err, "failed to force-kill agent");
                }
            }
        }
    }
}

/// Spawn a background task that awaits child exit and marks the transport
/// dead when it happens.
///
/// Dropping the returned handle detaches the task; it runs until the child
/// exits or `cancel` fires.
#[must_use]
pub fn monitor_exit(
    session_id: String,
    mut child: Child,
    dead: Arc<AtomicBool>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            result = child.wait() => {
                match result {
                    Ok(status) => {
                        info!(session_id, ?status, "agent subprocess exited");
                    }
                    Err(err) => {
                        warn!(session_id, %err, "error waiting for agent subprocess");
                    }
                }
                dead.store(true, Ordering::Release);
            }
            () = cancel.cancelled() => {
                debug!(session_id, "exit monitor cancelled");
            }
        }
    })
}

impl AgentTransport {
    /// Shared dead-flag handle, for wiring up [`monitor_exit`].
    #[must_use]
    pub fn dead_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.dead)
    }

    /// Cancellation token tied to this transport's background tasks.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

// ── Writer task ───────────────────────────────────────────────────────────────

/// Serialise queued objects and write NDJSON lines to the child's stdin.
///
/// Exits when the queue closes, `cancel` fires, or a write fails (which
/// marks the transport dead).
async fn run_writer(
    session_id: String,
    stdin: tokio::process::ChildStdin,
    mut rx: mpsc::UnboundedReceiver<serde_json::Value>,
    dead: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    let mut stdin = stdin;

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(session_id, "agent writer: cancellation received, stopping");
                break;
            }

            msg = rx.recv() => {
                let Some(value) = msg else {
                    debug!(session_id, "agent writer: queue closed, stopping");
                    break;
                };

                let mut bytes = match serde_json::to_vec(&value) {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        warn!(session_id, %err, "agent writer: serialisation failed, dropping");
                        continue;
                    }
                };
                bytes.push(b'\n');

                if let Err(err) = stdin.write_all(&bytes).await {
                    warn!(session_id, %err, "agent writer: write to stdin failed");
                    dead.store(true, Ordering::Release);
                    break;
                }
            }
        }
    }
}

// ── Stderr forwarder ──────────────────────────────────────────────────────────

/// Drain the child's stderr into the logger and the optional callback.
async fn forward_stderr(
    session_id: String,
    stderr: tokio::process::ChildStderr,
    callback: Option<StderrCallback>,
    cancel: CancellationToken,
) {
    let mut lines = BufReader::new(stderr).lines();

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => break,

            line = lines.next_line() => {
                match line {
                    Ok(Some(text)) => {
                        debug!(session_id, agent_stderr = %text, "agent stderr");
                        if let Some(ref cb) = callback {
                            cb(&text);
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        warn!(session_id, %err, "agent stderr read error");
                        break;
                    }
                }
            }
        }
    }
}
