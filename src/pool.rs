//! Pre-warmed worker pool for auxiliary short-lived agent invocations.
//!
//! Routing decisions and title generation are one-shot prompts that would
//! otherwise pay the multi-second spawn-and-warmup cost of a fresh child.
//! The pool keeps a small fleet of warm workers: spawn at warm-up, probe
//! with a deterministic ready prompt, hand out per query, recycle after a
//! bounded number of uses so accumulated context stays small.
//!
//! The pool is an independent mini-orchestrator: it reuses the subprocess
//! transport and NDJSON framing but has no session identity and no
//! translator — each call is a one-shot round-trip. The spawner seam keeps
//! it testable without subprocesses.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::{Mutex, Notify, OnceCell};
use tracing::{debug, info, warn};

use crate::agent::options::SpawnOptions;
use crate::agent::transport::AgentTransport;
use crate::agent::wire::{outbound_user_message, AgentMessage, ContentBlock};
use crate::router::{MessageRouter, RouterHooks};
use crate::{AppError, Result};

/// Deterministic warm-up probe each fresh worker must answer.
pub const READY_PROBE: &str = "Reply with the single word: ready";

/// A long-lived auxiliary worker: one-shot prompt in, one-shot answer out.
pub trait PoolWorker: Send {
    /// Push one prompt and drain a single assistant response.
    fn query<'a>(
        &'a mut self,
        prompt: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;

    /// Close the worker, releasing its resources.
    fn close(self: Box<Self>) -> Pin<Box<dyn Future<Output = ()> + Send>>;
}

/// Factory seam for spawning workers.
pub trait WorkerSpawner: Send + Sync + 'static {
    /// Spawn one fresh (not yet warmed) worker.
    fn spawn_worker(&self)
        -> Pin<Box<dyn Future<Output = Result<Box<dyn PoolWorker>>> + Send + '_>>;
}

/// Sizing parameters of a pool.
#[derive(Debug, Clone, Copy)]
pub struct PoolOptions {
    /// Workers spawned at warm-up.
    pub initial_size: usize,
    /// Hard ceiling on simultaneous workers (soft cap for bursts).
    pub soft_cap: usize,
    /// Uses before a worker is recycled.
    pub max_uses: u32,
}

struct Slot {
    id: u64,
    worker: Option<Box<dyn PoolWorker>>,
    warmed: bool,
    busy: bool,
    uses: u32,
}

/// Pre-warmed pool of auxiliary workers.
pub struct WorkerPool<S: WorkerSpawner> {
    self_ref: std::sync::Weak<Self>,
    spawner: Arc<S>,
    options: PoolOptions,
    slots: Mutex<Vec<Slot>>,
    freed: Notify,
    warmup_once: OnceCell<()>,
    next_id: AtomicU64,
}

impl<S: WorkerSpawner> WorkerPool<S> {
    /// Create an empty, un-warmed pool.
    ///
    /// Returned behind an [`Arc`]: replacement workers are warmed on
    /// detached tasks that hold a weak reference back to the pool.
    #[must_use]
    pub fn new(spawner: S, options: PoolOptions) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            self_ref: weak.clone(),
            spawner: Arc::new(spawner),
            options,
            slots: Mutex::new(Vec::new()),
            freed: Notify::new(),
            warmup_once: OnceCell::new(),
            next_id: AtomicU64::new(0),
        })
    }

    /// Spawn and warm the initial pool.
    ///
    /// Idempotent: concurrent calls share one in-flight warm-up, and later
    /// calls return immediately.
    ///
    /// # Errors
    ///
    /// Returns the first spawn or probe failure; the pool may be partially
    /// warmed afterwards and remains usable.
    pub async fn warmup(&self) -> Result<()> {
        self.warmup_once
            .get_or_try_init(|| async {
                let warmups = (0..self.options.initial_size)
                    .map(|_| self.spawn_and_warm())
                    .collect::<Vec<_>>();
                for outcome in futures_util::future::join_all(warmups).await {
                    let (id, worker) = outcome?;
                    self.install_idle(id, worker).await;
                }
                info!(
                    size = self.options.initial_size,
                    "worker pool warmed"
                );
                Ok::<(), AppError>(())
            })
            .await
            .map(|_: &()| ())
    }

    /// Run one prompt on an idle worker.
    ///
    /// Acquires a worker (spawning an overflow worker below the soft cap,
    /// or waiting for a release at the cap), pushes the prompt, drains one
    /// response, and releases. A failing worker is evicted, a replacement
    /// is scheduled, and the original error is surfaced.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Pool`] (or the underlying transport error) when
    /// the worker fails.
    pub async fn query(&self, prompt: &str) -> Result<String> {
        self.warmup().await?;

        let (slot_id, mut worker) = self.acquire().await?;

        match worker.query(prompt).await {
            Ok(response) => {
                self.release(slot_id, worker).await;
                Ok(response)
            }
            Err(err) => {
                warn!(slot_id, %err, "pool worker failed, evicting");
                self.remove_slot(slot_id).await;
                self.schedule_replacement(Some(worker));
                self.freed.notify_one();
                Err(err)
            }
        }
    }

    /// Close every worker and drop the pool's references.
    pub async fn shutdown(&self) {
        let drained: Vec<Slot> = {
            let mut slots = self.slots.lock().await;
            slots.drain(..).collect()
        };
        for slot in drained {
            if let Some(worker) = slot.worker {
                worker.close().await;
            }
        }
        info!("worker pool shut down");
    }

    /// Number of live slots (busy and idle).
    pub async fn size(&self) -> usize {
        self.slots.lock().await.len()
    }

    // ── Acquire / release ────────────────────────────────────────────────────

    async fn acquire(&self) -> Result<(u64, Box<dyn PoolWorker>)> {
        loop {
            let overflow_id = {
                let mut slots = self.slots.lock().await;

                if let Some(slot) = slots
                    .iter_mut()
                    .find(|s| !s.busy && s.warmed && s.worker.is_some())
                {
                    slot.busy = true;
                    let worker = slot.worker.take();
                    let id = slot.id;
                    // Checked `is_some` above; the take cannot miss.
                    if let Some(worker) = worker {
                        return Ok((id, worker));
                    }
                    continue;
                }

                if slots.len() < self.options.soft_cap {
                    // Reserve an overflow slot; warmed synchronously below.
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    slots.push(Slot {
                        id,
                        worker: None,
                        warmed: false,
                        busy: true,
                        uses: 0,
                    });
                    Some(id)
                } else {
                    None
                }
            };

            match overflow_id {
                Some(id) => {
                    debug!(slot_id = id, "pool: warming overflow worker");
                    match self.warm_for_slot(id).await {
                        Ok(worker) => return Ok((id, worker)),
                        Err(err) => {
                            self.remove_slot(id).await;
                            self.freed.notify_one();
                            return Err(err);
                        }
                    }
                }
                None => {
                    // At the soft cap: park until a worker frees up.
                    self.freed.notified().await;
                }
            }
        }
    }

    async fn release(&self, slot_id: u64, worker: Box<dyn PoolWorker>) {
        let to_recycle: Option<Box<dyn PoolWorker>> = {
            let mut slots = self.slots.lock().await;
            let Some(slot) = slots.iter_mut().find(|s| s.id == slot_id) else {
                return;
            };
            slot.uses += 1;
            if slot.uses >= self.options.max_uses {
                slots.retain(|s| s.id != slot_id);
                Some(worker)
            } else {
                slot.worker = Some(worker);
                slot.busy = false;
                None
            }
        };

        if to_recycle.is_some() {
            debug!(slot_id, "pool: recycling exhausted worker");
            self.schedule_replacement(to_recycle);
        }
        self.freed.notify_one();
    }

    /// Close `old` (when given) and warm a replacement, off the caller's
    /// path: releases and evictions never wait on a fresh spawn.
    fn schedule_replacement(&self, old: Option<Box<dyn PoolWorker>>) {
        let Some(pool) = self.self_ref.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            if let Some(old) = old {
                old.close().await;
            }
            match pool.spawn_and_warm().await {
                Ok((id, worker)) => {
                    pool.install_idle(id, worker).await;
                    pool.freed.notify_one();
                }
                Err(err) => {
                    warn!(%err, "pool: replacement worker failed to warm");
                }
            }
        });
    }

    // ── Spawning ─────────────────────────────────────────────────────────────

    /// Spawn a worker and run the ready probe.
    async fn spawn_and_warm(&self) -> Result<(u64, Box<dyn PoolWorker>)> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut worker = self.spawner.spawn_worker().await?;
        let probe = worker.query(READY_PROBE).await?;
        debug!(slot_id = id, probe = %probe, "pool worker ready");
        Ok((id, worker))
    }

    /// Warm the worker reserved for an overflow slot.
    async fn warm_for_slot(&self, slot_id: u64) -> Result<Box<dyn PoolWorker>> {
        let mut worker = self.spawner.spawn_worker().await?;
        worker.query(READY_PROBE).await?;
        let mut slots = self.slots.lock().await;
        if let Some(slot) = slots.iter_mut().find(|s| s.id == slot_id) {
            slot.warmed = true;
        }
        Ok(worker)
    }

    async fn install_idle(&self, id: u64, worker: Box<dyn PoolWorker>) {
        let mut slots = self.slots.lock().await;
        slots.push(Slot {
            id,
            worker: Some(worker),
            warmed: true,
            busy: false,
            uses: 0,
        });
    }

    async fn remove_slot(&self, slot_id: u64) {
        let mut slots = self.slots.lock().await;
        slots.retain(|s| s.id != slot_id);
    }
}

// ── Production worker over the subprocess transport ───────────────────────────

/// Spawner backed by real agent subprocesses.
pub struct ProcessWorkerSpawner {
    options: SpawnOptions,
}

impl ProcessWorkerSpawner {
    /// Create a spawner from a spawn-options template (the pool's fixed
    /// system prompt is already set on it).
    #[must_use]
    pub fn new(options: SpawnOptions) -> Self {
        Self { options }
    }
}

impl WorkerSpawner for ProcessWorkerSpawner {
    fn spawn_worker(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn PoolWorker>>> + Send + '_>> {
        Box::pin(async move {
            let spawned = AgentTransport::spawn("pool-worker", &self.options, None)?;
            let router = MessageRouter::spawn(
                "pool-worker".to_owned(),
                spawned.stdout,
                RouterHooks {
                    on_task_notification: Box::new(|_| {}),
                    on_control_response: Box::new(|_| {}),
                    on_control_request: Box::new(|_| false),
                },
            );
            let worker: Box<dyn PoolWorker> = Box::new(ProcessWorker {
                transport: spawned.transport,
                router,
            });
            Ok(worker)
        })
    }
}

/// One subprocess-backed worker.
struct ProcessWorker {
    transport: AgentTransport,
    router: MessageRouter,
}

impl PoolWorker for ProcessWorker {
    fn query<'a>(
        &'a mut self,
        prompt: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        Box::pin(async move {
            let content = vec![json!({ "type": "text", "text": prompt })];
            self.transport
                .write(outbound_user_message("pool-worker", content))?;

            let mut response = String::new();
            loop {
                let Some(message) = self.router.next().await else {
                    return Err(AppError::Pool("worker stream ended mid-query".into()));
                };
                match message {
                    AgentMessage::Assistant(assistant) => {
                        for block in assistant.message.content.as_blocks() {
                            if let ContentBlock::Text { text } = block {
                                response.push_str(&text);
                            }
                        }
                    }
                    AgentMessage::Result(result) => {
                        if result.is_error {
                            let detail = result
                                .errors
                                .map(|errs| errs.join("; "))
                                .or(result.result)
                                .unwrap_or_else(|| result.subtype.clone());
                            return Err(AppError::Pool(format!("worker turn failed: {detail}")));
                        }
                        return Ok(response);
                    }
                    _ => {}
                }
            }
        })
    }

    fn close(self: Box<Self>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move {
            self.router.shutdown();
            self.transport.close(Duration::from_secs(2)).await;
        })
    }
}
