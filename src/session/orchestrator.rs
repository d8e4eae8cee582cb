//! Session orchestrator: the ACP-facing façade.
//!
//! Owns the fleet of agent sessions and exposes every upstream operation:
//! initialize, session creation (new / fork / resume), the prompt turn
//! loop, cancellation, mode and model switches, the fs pass-throughs, and
//! the extension-method dispatch table. Each session exclusively owns its
//! subprocess and router; the orchestrator wires the router's intercept
//! plane to the translator and the client connection at session creation.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Map, Value};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::acp::notify::ClientHandle;
use crate::acp::schema::{
    AgentCapabilities, AgentInfo, AuthMethod, ClientCapabilities, InitializeParams,
    InitializeResult, McpCapabilities, ModelInfo, NewSessionParams, NewSessionResult,
    PromptCapabilities, PromptParams, PromptResult, SessionCapabilities, SessionInfo,
    SessionModeInfo, SessionModeState, SessionModelState, SessionRefParams, SessionUpdate,
    StopReason,
};
use crate::agent::options::{
    HookSpec, SpawnOptions, SystemPrompt, POST_TOOL_HOOK_ID, PRE_TOOL_HOOK_ID,
};
use crate::agent::transport::{monitor_exit, AgentTransport};
use crate::agent::wire::{
    outbound_control_error, outbound_control_success, outbound_user_message, AgentMessage,
    ControlRequestMessage, ResultMessage, SystemMessage,
};
use crate::config::RelayConfig;
use crate::correlate::background::extract_task_refs;
use crate::correlate::control::ControlCorrelator;
use crate::pool::{PoolOptions, ProcessWorkerSpawner, WorkerPool};
use crate::prompt;
use crate::router::{MessageRouter, RouterHooks};
use crate::session::index::{SessionIndex, SessionIndexEntry};
use crate::session::permission::handle_can_use_tool;
use crate::session::settings;
use crate::session::state::{PermissionMode, Session, SessionShared};
use crate::translate::Translator;
use crate::{AppError, Result};

/// Login phrase scanned for in terminal results.
const LOGIN_PHRASE: &str = "Please run /login";

/// Grace period for child shutdown on close.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// System events forwarded to the client as dedicated notifications.
const FORWARDED_SYSTEM_EVENTS: &[&str] = &[
    "init",
    "compact_boundary",
    "hook_event",
    "files_persisted",
    "status",
    "auth_status",
];

/// The ACP-facing session orchestrator.
pub struct Orchestrator {
    pub(crate) config: RelayConfig,
    pub(crate) client: ClientHandle,
    pub(crate) sessions: tokio::sync::Mutex<HashMap<String, Arc<Session>>>,
    pub(crate) client_capabilities: OnceLock<ClientCapabilities>,
    pub(crate) pool: Arc<WorkerPool<ProcessWorkerSpawner>>,
    pub(crate) leader_cache: tokio::sync::OnceCell<HashMap<String, String>>,
    pub(crate) state_dir: PathBuf,
}

impl Orchestrator {
    /// Build the orchestrator over a client connection.
    #[must_use]
    pub fn new(config: RelayConfig, client: ClientHandle) -> Self {
        let state_dir = config.state_dir();

        let mut pool_options = SpawnOptions {
            executable: config.agent.executable.clone(),
            base_args: config.agent.base_args.clone(),
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            system_prompt: Some(SystemPrompt::Literal(config.pool.system_prompt.clone())),
            max_turns: Some(1),
            permission_mode: Some(PermissionMode::DontAsk.as_str().to_owned()),
            path_prepend: config.agent.path_prepend.clone(),
            ..SpawnOptions::default()
        };
        pool_options.model = config.agent.model.clone();

        let pool = WorkerPool::new(
            ProcessWorkerSpawner::new(pool_options),
            PoolOptions {
                initial_size: config.pool.initial_size,
                soft_cap: config.pool.soft_cap,
                max_uses: config.pool.max_uses,
            },
        );

        Self {
            config,
            client,
            sessions: tokio::sync::Mutex::new(HashMap::new()),
            client_capabilities: OnceLock::new(),
            pool,
            leader_cache: tokio::sync::OnceCell::new(),
            state_dir,
        }
    }

    /// The shared worker pool (auxiliary one-shot invocations).
    #[must_use]
    pub fn pool(&self) -> Arc<WorkerPool<ProcessWorkerSpawner>> {
        Arc::clone(&self.pool)
    }

    // ── initialize ───────────────────────────────────────────────────────────

    /// Handle `initialize`: store client capabilities, return ours.
    ///
    /// Pure and idempotent beyond capability storage.
    #[must_use]
    pub fn initialize(&self, params: InitializeParams) -> InitializeResult {
        let terminal_auth = params.client_capabilities.supports_terminal_auth();
        let _ = self.client_capabilities.set(params.client_capabilities);

        let auth_meta = terminal_auth.then(|| {
            json!({
                "terminal-auth": {
                    "command": self.config.agent.executable,
                    "args": ["/login"],
                }
            })
        });

        InitializeResult {
            protocol_version: 1,
            agent_capabilities: AgentCapabilities {
                prompt_capabilities: PromptCapabilities {
                    image: true,
                    embedded_context: true,
                },
                mcp_capabilities: McpCapabilities {
                    http: true,
                    sse: true,
                },
                session_capabilities: SessionCapabilities {
                    fork: true,
                    resume: true,
                    list: true,
                },
            },
            agent_info: AgentInfo {
                name: env!("CARGO_PKG_NAME").to_owned(),
                version: env!("CARGO_PKG_VERSION").to_owned(),
                title: "Agent Relay".to_owned(),
            },
            auth_methods: vec![AuthMethod {
                id: "terminal-login".to_owned(),
                name: "Log in".to_owned(),
                description: "Run the agent's interactive login in a terminal".to_owned(),
                meta: auth_meta,
            }],
        }
    }

    // ── Session creation ─────────────────────────────────────────────────────

    /// Handle `session/new`.
    ///
    /// # Errors
    ///
    /// Propagates spawn failures as [`AppError::SessionDead`].
    pub async fn new_session(&self, params: NewSessionParams) -> Result<NewSessionResult> {
        let session_id = Uuid::new_v4().to_string();
        self.create_session(&session_id, &params.cwd, None, false, params.mcp_servers)
            .await
    }

    /// Handle `session/fork`: new identifier, parent passed as resume hint.
    ///
    /// # Errors
    ///
    /// Propagates spawn failures as [`AppError::SessionDead`].
    pub async fn fork_session(&self, params: SessionRefParams) -> Result<NewSessionResult> {
        let session_id = Uuid::new_v4().to_string();
        self.create_session(
            &session_id,
            &params.cwd,
            Some(params.session_id),
            true,
            params.mcp_servers,
        )
        .await
    }

    /// Handle `session/resume`: the passed identifier is reused.
    ///
    /// # Errors
    ///
    /// Propagates spawn failures as [`AppError::SessionDead`].
    pub async fn resume_session(&self, params: SessionRefParams) -> Result<NewSessionResult> {
        let session_id = params.session_id.clone();
        self.create_session(
            &session_id,
            &params.cwd,
            Some(params.session_id),
            false,
            params.mcp_servers,
        )
        .await
    }

    #[allow(clippy::too_many_lines)] // Session wiring is inherently sequential.
    async fn create_session(
        &self,
        session_id: &str,
        cwd: &str,
        resume: Option<String>,
        fork: bool,
        client_mcp_servers: Vec<Value>,
    ) -> Result<NewSessionResult> {
        let cwd_path = PathBuf::from(cwd);
        let settings = settings::acquire(&cwd_path)?;

        let options = self.build_spawn_options(&cwd_path, resume, fork, &client_mcp_servers);
        let spawned = AgentTransport::spawn(session_id, &options, None)?;
        let transport = Arc::new(spawned.transport);

        let shared = SessionShared::new(session_id, cwd_path.clone(), PermissionMode::Default);
        let translator = Arc::new(Translator::new(
            session_id,
            Arc::clone(&shared.cache),
            Arc::clone(&shared.background),
        ));
        let correlator = Arc::new(ControlCorrelator::new(session_id));

        // Intercept plane: task completions translate straight onto the
        // client connection, control responses resolve the correlator, and
        // the internal post-tool hook is answered without a turn.
        let hooks = {
            let client = self.client.clone();
            let translator_hook = Arc::clone(&translator);
            let shared_hook = Arc::clone(&shared);
            let on_task_notification = Box::new(move |notification| {
                if let Some(update) = translator_hook.on_task_completion(&notification) {
                    client.session_update(&shared_hook.session_id, &update);
                }
            });

            let correlator_hook = Arc::clone(&correlator);
            let on_control_response =
                Box::new(move |response: crate::agent::wire::ControlResponseMessage| {
                    correlator_hook.resolve(response.response);
                });

            let transport_hook = Arc::clone(&transport);
            let shared_post = Arc::clone(&shared);
            let on_control_request = Box::new(move |request: &ControlRequestMessage| {
                handle_post_tool_hook(&transport_hook, &shared_post, request)
            });

            RouterHooks {
                on_task_notification,
                on_control_response,
                on_control_request,
            }
        };

        let router = Arc::new(MessageRouter::spawn(
            session_id.to_owned(),
            spawned.stdout,
            hooks,
        ));

        if let Some(child) = transport.take_child().await {
            drop(monitor_exit(
                session_id.to_owned(),
                child,
                transport.dead_flag(),
                transport.cancel_token(),
            ));
        }

        let session = Arc::new(Session {
            shared: Arc::clone(&shared),
            transport,
            router,
            correlator,
            translator,
            settings,
            initialized: AtomicBool::new(false),
            turn_lock: Arc::new(tokio::sync::Mutex::new(())),
        });

        self.sessions
            .lock()
            .await
            .insert(session_id.to_owned(), session);

        let index = self.index_for(&cwd_path);
        if let Err(err) = index.upsert(SessionIndexEntry {
            id: session_id.to_owned(),
            title: None,
            cwd: cwd.to_owned(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            team_name: None,
        }) {
            warn!(session_id, %err, "session index upsert failed");
        }

        info!(session_id, cwd, "session created");

        Ok(NewSessionResult {
            session_id: session_id.to_owned(),
            modes: SessionModeState {
                current_mode_id: PermissionMode::Default.as_str().to_owned(),
                available_modes: PermissionMode::all()
                    .iter()
                    .map(|mode| SessionModeInfo {
                        id: mode.as_str().to_owned(),
                        name: mode.as_str().to_owned(),
                        description: None,
                    })
                    .collect(),
            },
            models: SessionModelState {
                current_model_id: self.config.current_model_id(),
                available_models: self.available_models(),
            },
        })
    }

    /// Child options per the transport contract, derived from configuration
    /// and the stored client capabilities.
    fn build_spawn_options(
        &self,
        cwd: &Path,
        resume: Option<String>,
        fork: bool,
        client_mcp_servers: &[Value],
    ) -> SpawnOptions {
        let caps = self.client_capabilities.get();
        let (allowed_tools, disallowed_tools) = capability_tool_lists(caps);

        let mut mcp_servers: BTreeMap<String, Value> = self.config.mcp_servers.clone();
        for server in client_mcp_servers {
            if let Some(name) = server.get("name").and_then(Value::as_str) {
                mcp_servers.insert(name.to_owned(), server.clone());
            }
        }

        let mut hooks = SpawnOptions::internal_hooks();
        hooks.extend(self.config.hooks.iter().map(|hook| HookSpec {
            event: hook.event.clone(),
            matcher: hook.matcher.clone(),
            callback_id: hook.callback_id.clone(),
        }));

        let system_prompt = self
            .config
            .agent
            .system_prompt
            .clone()
            .map(SystemPrompt::Literal)
            .or_else(|| {
                self.config
                    .agent
                    .append_system_prompt
                    .clone()
                    .map(SystemPrompt::AppendToPreset)
            });

        SpawnOptions {
            executable: self.config.agent.executable.clone(),
            base_args: self.config.agent.base_args.clone(),
            cwd: cwd.to_path_buf(),
            model: self.config.agent.model.clone(),
            max_turns: self.config.agent.max_turns,
            max_budget_usd: self.config.agent.max_budget_usd,
            max_thinking_tokens: self.config.agent.max_thinking_tokens,
            fallback_model: self.config.agent.fallback_model.clone(),
            system_prompt,
            permission_mode: Some(PermissionMode::Default.as_str().to_owned()),
            dangerously_skip_permissions: false,
            allowed_tools,
            disallowed_tools,
            mcp_servers,
            hooks,
            resume_session_id: resume,
            fork_session: fork,
            path_prepend: self.config.agent.path_prepend.clone(),
        }
    }

    fn available_models(&self) -> Vec<ModelInfo> {
        if self.config.models.is_empty() {
            return vec![ModelInfo {
                model_id: self.config.current_model_id(),
                name: self.config.current_model_id(),
                description: None,
            }];
        }
        self.config
            .models
            .iter()
            .map(|model| ModelInfo {
                model_id: model.id.clone(),
                name: model.name.clone(),
                description: None,
            })
            .collect()
    }

    // ── Prompt turn ──────────────────────────────────────────────────────────

    /// Handle `session/prompt`: run one full turn.
    ///
    /// # Errors
    ///
    /// - [`AppError::SessionDead`] when the subprocess has died (the session
    ///   is evicted).
    /// - [`AppError::AuthRequired`] when the child demands a login.
    /// - [`AppError::Internal`] for an `is_error` terminal result.
    pub async fn prompt(&self, params: PromptParams) -> Result<PromptResult> {
        let session = self.session(&params.session_id).await?;
        let turn_guard = Arc::clone(&session.turn_lock).lock_owned().await;

        if session.transport.is_dead() {
            self.evict(&params.session_id).await;
            return Err(AppError::SessionDead(format!(
                "agent for session '{}' has exited",
                params.session_id
            )));
        }

        let shared = Arc::clone(&session.shared);
        shared.reset_cancelled();
        shared.touch();

        let first_prompt_text = self.ensure_title(&session, &params.prompt);

        let content = prompt::to_agent_content(&params.prompt);
        session
            .transport
            .write(outbound_user_message(&params.session_id, content))?;

        // Initialize goes out once, after the first user message; nothing
        // awaits its payload.
        if session.mark_initialized() {
            if let Err(err) = session.correlator.request_detached(
                &session.transport,
                "initialize",
                json!({ "hooks": {} }),
            ) {
                warn!(session_id = %params.session_id, %err, "initialize request failed");
            }
        }

        let outcome = self.run_turn(&session).await;
        self.client.flush().await;

        match outcome {
            Ok(result) => {
                if result.stop_reason == StopReason::EndTurn {
                    self.maybe_auto_rename(&session, first_prompt_text);
                }
                drop(turn_guard);
                Ok(result)
            }
            Err(AppError::Cancelled) => {
                // The child is still winding the turn down; drain its
                // remaining output without surfacing it.
                spawn_turn_drain(Arc::clone(&session), turn_guard);
                Ok(PromptResult {
                    stop_reason: StopReason::Cancelled,
                    meta: None,
                })
            }
            Err(AppError::SessionDead(msg)) => {
                drop(turn_guard);
                self.evict(&params.session_id).await;
                Err(AppError::SessionDead(msg))
            }
            Err(err) => {
                drop(turn_guard);
                Err(err)
            }
        }
    }

    /// The turn loop: classify each routed message until the terminal
    /// result.
    async fn run_turn(&self, session: &Arc<Session>) -> Result<PromptResult> {
        let shared = &session.shared;

        loop {
            let Some(message) = session.router.next().await else {
                session.transport.mark_dead();
                session.correlator.fail_all("agent stream ended");
                return Err(AppError::SessionDead(format!(
                    "agent stream ended for session '{}'",
                    shared.session_id
                )));
            };

            // Cancellation is observed at the classification boundary: a
            // terminal result still closes the turn, everything else stops
            // emitting immediately.
            if shared.is_cancelled() {
                match message {
                    AgentMessage::Result(result) => {
                        let _ = self.finish_turn(session, &result);
                        return Ok(PromptResult {
                            stop_reason: StopReason::Cancelled,
                            meta: None,
                        });
                    }
                    AgentMessage::ControlRequest(request) => {
                        // Unblock the child before abandoning the turn.
                        let _ = session.transport.write(outbound_control_success(
                            &request.request_id,
                            crate::session::permission::deny_response("turn cancelled"),
                        ));
                    }
                    _ => {}
                }
                return Err(AppError::Cancelled);
            }

            match message {
                AgentMessage::StreamEvent(event) => {
                    let updates = session.translator.on_stream_event(&event)?;
                    self.emit(shared, updates);
                }
                AgentMessage::Assistant(assistant) => {
                    let updates = session.translator.on_assistant(&assistant)?;
                    self.emit(shared, updates);
                }
                AgentMessage::User(user) => {
                    let updates = session.translator.on_user(&user);
                    self.emit(shared, updates);
                }
                AgentMessage::System(system) => {
                    self.forward_system_event(shared, &system);
                }
                AgentMessage::ControlRequest(request) => {
                    self.handle_control_request(session, request).await?;
                }
                AgentMessage::ControlResponse(_) => {
                    // Resolved on the reader task; a copy here means the
                    // router let one through — log and move on.
                    debug!(session_id = %shared.session_id, "stray control response on turn plane");
                }
                AgentMessage::Result(result) => {
                    return self.finish_turn(session, &result);
                }
            }
        }
    }

    /// Close out a turn from its terminal result.
    fn finish_turn(&self, session: &Arc<Session>, result: &ResultMessage) -> Result<PromptResult> {
        let shared = &session.shared;
        shared.touch();

        if result
            .result
            .as_deref()
            .is_some_and(|text| text.contains(LOGIN_PHRASE))
        {
            return Err(AppError::AuthRequired(LOGIN_PHRASE.to_owned()));
        }

        if result.is_error {
            let detail = result
                .errors
                .as_ref()
                .map(|errors| errors.join("; "))
                .or_else(|| result.result.clone())
                .unwrap_or_else(|| result.subtype.clone());
            return Err(AppError::Internal(format!(
                "turn failed ({}): {detail}",
                result.subtype
            )));
        }

        let stop_reason = match result.subtype.as_str() {
            "error_max_turns" | "error_max_budget" | "error_max_structured_output_retries" => {
                StopReason::MaxTurnRequests
            }
            _ => StopReason::EndTurn,
        };

        Ok(PromptResult {
            stop_reason,
            meta: Some(result_meta(result)),
        })
    }

    fn emit(&self, shared: &SessionShared, updates: Vec<SessionUpdate>) {
        if updates.is_empty() {
            return;
        }
        shared.touch();
        for update in updates {
            self.client.session_update(&shared.session_id, &update);
        }
    }

    /// Forward one system event as a dedicated notification.
    fn forward_system_event(&self, shared: &SessionShared, system: &SystemMessage) {
        if !FORWARDED_SYSTEM_EVENTS.contains(&system.subtype.as_str()) {
            debug!(
                session_id = %shared.session_id,
                subtype = %system.subtype,
                "dropping unmapped system event"
            );
            return;
        }

        if system.subtype == "init" {
            let commands = system
                .payload
                .get("slash_commands")
                .or_else(|| system.payload.get("commands"))
                .and_then(Value::as_array)
                .cloned();
            if let Some(commands) = commands {
                self.client.session_update(
                    &shared.session_id,
                    &SessionUpdate::AvailableCommandsUpdate {
                        available_commands: commands,
                    },
                );
            }
        }

        self.client.session_update(
            &shared.session_id,
            &SessionUpdate::SessionInfoUpdate(SessionInfo {
                title: None,
                meta: Some(json!({
                    "event": system.subtype,
                    "payload": Value::Object(system.payload.clone()),
                })),
            }),
        );
    }

    /// Answer one agent-to-bridge control request on the turn plane.
    async fn handle_control_request(
        &self,
        session: &Arc<Session>,
        request: ControlRequestMessage,
    ) -> Result<()> {
        let request_id = request.request_id.clone();
        let payload = request.request;

        match payload.subtype.as_str() {
            "can_use_tool" => {
                let tool_name = payload.str_param("tool_name").unwrap_or("").to_owned();
                let input = payload
                    .params
                    .get("input")
                    .cloned()
                    .unwrap_or(Value::Null);

                match handle_can_use_tool(&self.client, &session.shared, &tool_name, &input).await
                {
                    Ok(response) => {
                        session
                            .transport
                            .write(outbound_control_success(&request_id, response))?;
                        Ok(())
                    }
                    Err(AppError::Cancelled) => {
                        // Unblock the child, then interrupt the turn.
                        let _ = session.transport.write(outbound_control_success(
                            &request_id,
                            crate::session::permission::deny_response("turn cancelled"),
                        ));
                        Err(AppError::Cancelled)
                    }
                    Err(err) => {
                        let _ = session
                            .transport
                            .write(outbound_control_error(&request_id, &err.to_string()));
                        Err(err)
                    }
                }
            }
            "hook_callback" => {
                let response = self.handle_hook_callback(session, &payload);
                session
                    .transport
                    .write(outbound_control_success(&request_id, response))?;
                Ok(())
            }
            "read_file" => {
                let params = json!({
                    "sessionId": session.shared.session_id,
                    "path": payload.str_param("path").unwrap_or(""),
                });
                match self.client.request("fs/read_text_file", params).await {
                    Ok(result) => {
                        session
                            .transport
                            .write(outbound_control_success(&request_id, result))?;
                    }
                    Err(err) => {
                        session
                            .transport
                            .write(outbound_control_error(&request_id, &err.to_string()))?;
                    }
                }
                Ok(())
            }
            "write_file" => {
                let params = json!({
                    "sessionId": session.shared.session_id,
                    "path": payload.str_param("path").unwrap_or(""),
                    "content": payload.str_param("content").unwrap_or(""),
                });
                match self.client.request("fs/write_text_file", params).await {
                    Ok(result) => {
                        session
                            .transport
                            .write(outbound_control_success(&request_id, result))?;
                    }
                    Err(err) => {
                        session
                            .transport
                            .write(outbound_control_error(&request_id, &err.to_string()))?;
                    }
                }
                Ok(())
            }
            other => {
                warn!(
                    session_id = %session.shared.session_id,
                    subtype = other,
                    "unknown control request from agent"
                );
                session.transport.write(outbound_control_error(
                    &request_id,
                    &format!("unsupported control request '{other}'"),
                ))?;
                Ok(())
            }
        }
    }

    /// Pre-tool hook: consult shared settings for allow / deny / ask.
    ///
    /// (The post-tool hook is answered on the router's intercept plane.)
    fn handle_hook_callback(
        &self,
        session: &Arc<Session>,
        payload: &crate::agent::wire::ControlRequestPayload,
    ) -> Value {
        let callback_id = payload.str_param("callback_id").unwrap_or("");
        if callback_id != PRE_TOOL_HOOK_ID {
            debug!(
                session_id = %session.shared.session_id,
                callback_id,
                "acknowledging user hook callback"
            );
            return json!({});
        }

        let tool_name = payload.str_param("tool_name").unwrap_or("");
        let tool_input = payload
            .params
            .get("tool_input")
            .cloned()
            .unwrap_or(Value::Null);

        let decision = session.settings.decision(tool_name, &tool_input);
        if let Some(ref rule) = decision.rule_name {
            info!(
                session_id = %session.shared.session_id,
                tool_name,
                behavior = decision.behavior.as_str(),
                rule,
                "pre-tool rule applied"
            );
        }

        json!({
            "hookSpecificOutput": {
                "hookEventName": "PreToolUse",
                "permissionDecision": decision.behavior.as_str(),
                "permissionDecisionReason": decision.rule_name,
            }
        })
    }

    // ── Cancel / mode / model ────────────────────────────────────────────────

    /// Handle `session/cancel`: set the flag and interrupt the child.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] for an unknown session.
    pub async fn cancel(&self, session_id: &str) -> Result<()> {
        let session = self.session(session_id).await?;
        session.shared.cancel();
        if let Err(err) =
            session
                .correlator
                .request_detached(&session.transport, "interrupt", json!({}))
        {
            debug!(session_id, %err, "interrupt not delivered");
        }
        info!(session_id, "cancel requested");
        Ok(())
    }

    /// Handle `session/set_mode`.
    ///
    /// Honoured for every mode including `bypassPermissions` under root —
    /// root only suppresses the child-spawn skip flag, not the switch.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Acp`] for an unknown mode identifier, or the
    /// correlator's error when the child rejects the change.
    pub async fn set_session_mode(&self, session_id: &str, mode_id: &str) -> Result<()> {
        let mode = PermissionMode::parse(mode_id)
            .ok_or_else(|| AppError::Acp(format!("unknown permission mode '{mode_id}'")))?;
        let session = self.session(session_id).await?;

        session
            .correlator
            .request(
                &session.transport,
                "set_permission_mode",
                json!({ "mode": mode.as_str() }),
            )
            .await?;

        session.shared.set_mode(mode);
        self.client.session_update(
            session_id,
            &SessionUpdate::CurrentModeUpdate {
                current_mode_id: mode.as_str().to_owned(),
            },
        );
        Ok(())
    }

    /// Handle `session/set_model` (extension).
    ///
    /// # Errors
    ///
    /// Propagates the correlator's error when the child rejects the change.
    pub async fn set_session_model(&self, session_id: &str, model_id: &str) -> Result<()> {
        let session = self.session(session_id).await?;
        session
            .correlator
            .request(
                &session.transport,
                "set_model",
                json!({ "model": model_id }),
            )
            .await?;
        Ok(())
    }

    /// Thin wrapper for the thinking-token budget.
    ///
    /// # Errors
    ///
    /// Propagates the correlator's error.
    pub async fn set_max_thinking_tokens(&self, session_id: &str, tokens: u32) -> Result<()> {
        let session = self.session(session_id).await?;
        session
            .correlator
            .request(
                &session.transport,
                "set_max_thinking_tokens",
                json!({ "max_thinking_tokens": tokens }),
            )
            .await?;
        Ok(())
    }

    // ── Pass-throughs ────────────────────────────────────────────────────────

    /// `fs/read_text_file`: forwarded verbatim to the client.
    ///
    /// # Errors
    ///
    /// Propagates the client's error.
    pub async fn read_text_file(&self, params: Value) -> Result<Value> {
        self.client.request("fs/read_text_file", params).await
    }

    /// `fs/write_text_file`: forwarded verbatim to the client.
    ///
    /// # Errors
    ///
    /// Propagates the client's error.
    pub async fn write_text_file(&self, params: Value) -> Result<Value> {
        self.client.request("fs/write_text_file", params).await
    }

    // ── Titles ───────────────────────────────────────────────────────────────

    /// Populate the initial title from the first prompt; returns the prompt
    /// text for the auto-rename seed.
    fn ensure_title(
        &self,
        session: &Arc<Session>,
        parts: &[crate::acp::schema::AcpContentBlock],
    ) -> Option<String> {
        let text = prompt::prompt_text(parts);
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return None;
        }

        if session.shared.title().is_none() {
            let title: String = trimmed.chars().take(48).collect();
            self.apply_title(session, &title);
        }
        Some(trimmed.to_owned())
    }

    pub(crate) fn apply_title(&self, session: &Arc<Session>, title: &str) {
        session.shared.set_title(title);
        let index = self.index_for(&session.shared.cwd);
        if let Err(err) = index.rename(&session.shared.session_id, title, &session.shared.cwd) {
            warn!(session_id = %session.shared.session_id, %err, "title persist failed");
        }
        self.client.session_update(
            &session.shared.session_id,
            &SessionUpdate::SessionInfoUpdate(SessionInfo {
                title: Some(title.to_owned()),
                meta: None,
            }),
        );
    }

    /// One automatic rename per session, off the turn's critical path.
    fn maybe_auto_rename(&self, session: &Arc<Session>, seed: Option<String>) {
        use std::sync::atomic::Ordering;
        if session.shared.rename_attempted.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(seed) = seed else { return };

        let pool = self.pool();
        let client = self.client.clone();
        let index = self.index_for(&session.shared.cwd);
        let shared = Arc::clone(&session.shared);
        tokio::spawn(async move {
            let prompt_text = format!(
                "Generate a concise title (at most eight words) for a coding session \
                 that starts with this request. Reply with the title only.\n\n{seed}"
            );
            match pool.query(&prompt_text).await {
                Ok(title) => {
                    let title = title.trim().trim_matches('"').to_owned();
                    if title.is_empty() {
                        return;
                    }
                    shared.set_title(&title);
                    if let Err(err) = index.rename(&shared.session_id, &title, &shared.cwd) {
                        warn!(session_id = %shared.session_id, %err, "auto-rename persist failed");
                    }
                    client.session_update(
                        &shared.session_id,
                        &SessionUpdate::SessionInfoUpdate(SessionInfo {
                            title: Some(title),
                            meta: None,
                        }),
                    );
                }
                Err(err) => {
                    debug!(session_id = %shared.session_id, %err, "auto-rename skipped");
                }
            }
        });
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    pub(crate) async fn session(&self, session_id: &str) -> Result<Arc<Session>> {
        self.sessions
            .lock()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("session '{session_id}'")))
    }

    /// Remove a dead session and tear its resources down.
    pub async fn evict(&self, session_id: &str) {
        let session = self.sessions.lock().await.remove(session_id);
        if let Some(session) = session {
            session.router.shutdown();
            session.correlator.fail_all("session evicted");
            session.transport.close(CLOSE_GRACE).await;
            info!(session_id, "session evicted");
        }
    }

    /// Close every live session (upstream transport closed).
    pub async fn shutdown(&self) {
        let drained: Vec<(String, Arc<Session>)> = {
            let mut sessions = self.sessions.lock().await;
            sessions.drain().collect()
        };
        for (session_id, session) in drained {
            session.router.shutdown();
            session.correlator.fail_all("shutting down");
            session.transport.close(CLOSE_GRACE).await;
            debug!(session_id, "session closed on shutdown");
        }
        self.pool.shutdown().await;
        info!("orchestrator shut down");
    }

    pub(crate) fn index_for(&self, cwd: &Path) -> SessionIndex {
        SessionIndex::for_cwd(&self.state_dir, cwd)
    }
}

// ── Intercept-plane post-tool hook ───────────────────────────────────────────

/// Answer the internal post-tool hook on the reader task.
///
/// Records the background-task mapping from the structured response. A
/// response that names task fields for a cached tool-use marks the entry
/// background on the spot — for some tools that response is the first
/// place the background nature surfaces, potentially between turns.
/// Returns `false` for every other control request, routing it to the
/// turn plane.
pub fn handle_post_tool_hook(
    transport: &AgentTransport,
    shared: &SessionShared,
    request: &ControlRequestMessage,
) -> bool {
    if request.request.subtype != "hook_callback" {
        return false;
    }
    if request.request.str_param("callback_id") != Some(POST_TOOL_HOOK_ID) {
        return false;
    }

    let tool_use_id = request.request.str_param("tool_use_id").map(str::to_owned);
    let tool_response = request.request.params.get("tool_response").cloned();

    if let (Some(tool_use_id), Some(tool_response)) = (tool_use_id, tool_response) {
        let refs = extract_task_refs(&tool_response);
        if !refs.is_empty() {
            let known = {
                let mut cache = shared
                    .cache
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                if cache.get(&tool_use_id).is_some() {
                    cache.mark_background(&tool_use_id);
                    true
                } else {
                    false
                }
            };
            if known {
                shared
                    .background
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .insert(&refs, &tool_use_id);
            } else {
                debug!(
                    session_id = %shared.session_id,
                    tool_use_id,
                    "post-tool task fields for an unknown tool-use, dropping"
                );
            }
        }
    }

    if let Err(err) = transport.write(outbound_control_success(&request.request_id, json!({}))) {
        debug!(%err, "post-tool hook ack not delivered");
    }
    true
}

// ── Turn drain after cancellation ────────────────────────────────────────────

/// Consume the cancelled turn's remaining output so the next prompt starts
/// from a clean buffer. Control requests are answered with a deny so the
/// child never hangs; everything else is dropped.
fn spawn_turn_drain(session: Arc<Session>, turn_guard: OwnedMutexGuard<()>) {
    tokio::spawn(async move {
        loop {
            let Some(message) = session.router.next().await else {
                break;
            };
            match message {
                AgentMessage::Result(_) => break,
                AgentMessage::ControlRequest(request) => {
                    let response = if request.request.subtype == "can_use_tool" {
                        outbound_control_success(
                            &request.request_id,
                            crate::session::permission::deny_response("turn cancelled"),
                        )
                    } else {
                        outbound_control_success(&request.request_id, json!({}))
                    };
                    if session.transport.write(response).is_err() {
                        break;
                    }
                }
                _ => {}
            }
        }
        debug!(session_id = %session.shared.session_id, "cancelled turn drained");
        drop(turn_guard);
    });
}

// ── Capability-derived tool lists ────────────────────────────────────────────

/// Compute the child's tool allow/disallow lists from client capabilities.
///
/// Each capability the client takes over disables the child's native
/// counterpart and advertises the bridge-routed tool in its place.
#[must_use]
pub fn capability_tool_lists(caps: Option<&ClientCapabilities>) -> (Vec<String>, Vec<String>) {
    let Some(caps) = caps else {
        return (Vec::new(), Vec::new());
    };

    let mut allowed = Vec::new();
    let mut disallowed = Vec::new();

    if caps.fs.read_text_file {
        allowed.push("mcp__acp__read".to_owned());
        disallowed.push("Read".to_owned());
    }
    if caps.fs.write_text_file {
        allowed.push("mcp__acp__write".to_owned());
        allowed.push("mcp__acp__edit".to_owned());
        disallowed.extend(
            ["Write", "Edit", "MultiEdit", "NotebookEdit"]
                .iter()
                .map(|s| (*s).to_owned()),
        );
    }
    if caps.terminal {
        allowed.push("mcp__acp__bash_output".to_owned());
        allowed.push("mcp__acp__kill_shell".to_owned());
        disallowed.extend(
            ["Bash", "BashOutput", "KillShell"]
                .iter()
                .map(|s| (*s).to_owned()),
        );
    }

    (allowed, disallowed)
}

// ── Result metadata ──────────────────────────────────────────────────────────

/// Assemble the result-metadata block returned with the stop reason.
fn result_meta(result: &ResultMessage) -> Value {
    let mut meta = Map::new();
    if let Some(duration_ms) = result.duration_ms {
        meta.insert("durationMs".to_owned(), json!(duration_ms));
    }
    if let Some(duration_api_ms) = result.duration_api_ms {
        meta.insert("durationApiMs".to_owned(), json!(duration_api_ms));
    }
    if let Some(num_turns) = result.num_turns {
        meta.insert("numTurns".to_owned(), json!(num_turns));
    }
    if let Some(cost) = result.total_cost_usd {
        meta.insert("totalCostUsd".to_owned(), json!(cost));
    }
    if let Some(ref usage) = result.usage {
        meta.insert("usage".to_owned(), usage.clone());
    }
    if let Some(ref model_usage) = result.model_usage {
        meta.insert("modelUsage".to_owned(), model_usage.clone());
    }
    if let Some(ref denials) = result.permission_denials {
        meta.insert("permissionDenials".to_owned(), denials.clone());
    }
    if let Some(ref structured) = result.structured_output {
        meta.insert("structuredOutput".to_owned(), structured.clone());
    }
    Value::Object(meta)
}
