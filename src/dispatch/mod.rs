//! Event dispatch with ordered delivery, replay, and handler management.
//!
//! [`EventDispatcher`] sits between the indexing pipeline and consumer
//! code. Producers call [`EventDispatcher::dispatch`] from synchronous
//! context; events land in a FIFO queue and a single background drain
//! task delivers them to registered handlers one event at a time, so
//! handlers observe the same total order regardless of which task
//! produced the event. Handlers for one event run concurrently with
//! each other; a failing handler is logged and counted without
//! affecting its peers or the queue.
//!
//! A bounded replay buffer keeps the most recent events so
//! late-attaching consumers can catch up via
//! [`EventDispatcher::replay_to`] before switching to live delivery.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::config::ReplayConfig;
use crate::types::{EventKind, MarketEvent};
use crate::utils::error::Result;

/// How long [`EventDispatcher::wait_for_idle`] sleeps between checks.
const IDLE_POLL: Duration = Duration::from_millis(10);

/// Consumer-side event callback.
///
/// Handlers receive events by reference; anything a handler needs beyond
/// the await point must be cloned out. Returning an error marks the
/// delivery failed for metrics, nothing more: delivery to other handlers
/// and later events proceeds regardless.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &MarketEvent) -> Result<()>;
}

/// Adapter so plain async closures can act as handlers.
struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(MarketEvent) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<()>> + Send,
{
    async fn handle(&self, event: &MarketEvent) -> Result<()> {
        (self.0)(event.clone()).await
    }
}

/// Opaque token returned by registration, used to detach a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

#[derive(Clone)]
struct RegisteredHandler {
    id: HandlerId,
    handler: Arc<dyn EventHandler>,
    once: bool,
}

#[derive(Default)]
struct HandlerTable {
    by_kind: HashMap<EventKind, Vec<RegisteredHandler>>,
    wildcard: Vec<RegisteredHandler>,
}

impl HandlerTable {
    fn matching(&self, kind: EventKind) -> Vec<RegisteredHandler> {
        self.by_kind
            .get(&kind)
            .into_iter()
            .flatten()
            .chain(self.wildcard.iter())
            .cloned()
            .collect()
    }

    fn remove(&mut self, id: HandlerId) -> bool {
        let mut removed = false;
        for handlers in self.by_kind.values_mut() {
            let before = handlers.len();
            handlers.retain(|h| h.id != id);
            removed |= handlers.len() != before;
        }
        let before = self.wildcard.len();
        self.wildcard.retain(|h| h.id != id);
        removed | (self.wildcard.len() != before)
    }
}

struct ReplayEntry {
    event: MarketEvent,
    received_at: Instant,
}

/// Counters exposed through the indexer status report.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchMetrics {
    /// Events fully delivered (all matching handlers awaited).
    pub dispatched: u64,
    /// Handler invocations that returned an error.
    pub handler_errors: u64,
    /// Events queued but not yet delivered.
    pub queued: usize,
    /// Events currently held in the replay buffer.
    pub replay_buffered: usize,
    /// Registered handlers, wildcard included.
    pub handlers: usize,
}

struct DispatcherInner {
    handlers: RwLock<HandlerTable>,
    queue: Mutex<VecDeque<MarketEvent>>,
    draining: AtomicBool,
    replay: Option<Mutex<VecDeque<ReplayEntry>>>,
    replay_cfg: ReplayConfig,
    next_handler_id: AtomicU64,
    dispatched: AtomicU64,
    handler_errors: AtomicU64,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl DispatcherInner {
    fn record_replay(&self, event: &MarketEvent) {
        if let Some(buffer) = &self.replay {
            let mut buffer = buffer.lock().unwrap();
            buffer.push_back(ReplayEntry {
                event: event.clone(),
                received_at: Instant::now(),
            });
            while buffer.len() > self.replay_cfg.capacity {
                buffer.pop_front();
            }
        }
    }

    fn sweep_expired(&self, ttl: Duration) {
        if let Some(buffer) = &self.replay {
            let mut buffer = buffer.lock().unwrap();
            let now = Instant::now();
            while let Some(front) = buffer.front() {
                if now.duration_since(front.received_at) >= ttl {
                    buffer.pop_front();
                } else {
                    break;
                }
            }
        }
    }

    async fn deliver(&self, event: &MarketEvent) {
        let matching = self.handlers.read().unwrap().matching(event.kind());

        if !matching.is_empty() {
            let results = join_all(matching.iter().map(|h| h.handler.handle(event))).await;

            let mut spent = Vec::new();
            for (registered, result) in matching.iter().zip(results) {
                if let Err(err) = result {
                    self.handler_errors.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(
                        handler = registered.id.0,
                        kind = %event.kind(),
                        error = %err,
                        "Event handler failed"
                    );
                }
                if registered.once {
                    spent.push(registered.id);
                }
            }
            if !spent.is_empty() {
                let mut table = self.handlers.write().unwrap();
                for id in spent {
                    table.remove(id);
                }
            }
        }

        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }
}

impl Drop for DispatcherInner {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.lock().unwrap().take() {
            handle.abort();
        }
    }
}

/// Ordered, replay-capable event fan-out. Cheap to clone; all clones
/// share the same queue, handlers, and replay buffer.
#[derive(Clone)]
pub struct EventDispatcher {
    inner: Arc<DispatcherInner>,
}

impl EventDispatcher {
    /// Creates a dispatcher with the given replay policy.
    ///
    /// A `capacity` of zero disables the replay buffer entirely. When a
    /// TTL is set, a background sweep task is spawned; this requires a
    /// running Tokio runtime.
    #[must_use]
    pub fn new(replay_cfg: ReplayConfig) -> Self {
        let replay = (replay_cfg.capacity > 0).then(|| Mutex::new(VecDeque::new()));
        let sweep_ttl = replay.as_ref().and(replay_cfg.ttl_secs);

        let inner = Arc::new(DispatcherInner {
            handlers: RwLock::new(HandlerTable::default()),
            queue: Mutex::new(VecDeque::new()),
            draining: AtomicBool::new(false),
            replay,
            replay_cfg,
            next_handler_id: AtomicU64::new(1),
            dispatched: AtomicU64::new(0),
            handler_errors: AtomicU64::new(0),
            sweeper: Mutex::new(None),
        });

        if let Some(ttl_secs) = sweep_ttl {
            let ttl = Duration::from_secs(ttl_secs);
            let period = Duration::from_secs(inner.replay_cfg.sweep_interval_secs.max(1));
            let weak = Arc::downgrade(&inner);
            let handle = tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    let Some(inner) = weak.upgrade() else { break };
                    inner.sweep_expired(ttl);
                }
            });
            *inner.sweeper.lock().unwrap() = Some(handle);
        }

        Self { inner }
    }

    // ── Handler registration ────────────────────────────────────────────

    /// Registers a handler for one event kind. Returns the id used to
    /// detach it later.
    pub fn on(&self, kind: EventKind, handler: Arc<dyn EventHandler>) -> HandlerId {
        self.register(Some(kind), handler, false)
    }

    /// Registers a handler receiving every event kind.
    pub fn on_all(&self, handler: Arc<dyn EventHandler>) -> HandlerId {
        self.register(None, handler, false)
    }

    /// Registers a handler that detaches itself after its first delivery.
    pub fn once(&self, kind: EventKind, handler: Arc<dyn EventHandler>) -> HandlerId {
        self.register(Some(kind), handler, true)
    }

    /// Closure form of [`EventDispatcher::on`]. The closure receives an
    /// owned clone of the event.
    pub fn on_fn<F, Fut>(&self, kind: EventKind, f: F) -> HandlerId
    where
        F: Fn(MarketEvent) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        self.on(kind, Arc::new(FnHandler(f)))
    }

    /// Closure form of [`EventDispatcher::on_all`].
    pub fn on_all_fn<F, Fut>(&self, f: F) -> HandlerId
    where
        F: Fn(MarketEvent) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        self.on_all(Arc::new(FnHandler(f)))
    }

    fn register(
        &self,
        kind: Option<EventKind>,
        handler: Arc<dyn EventHandler>,
        once: bool,
    ) -> HandlerId {
        let id = HandlerId(self.inner.next_handler_id.fetch_add(1, Ordering::Relaxed));
        let registered = RegisteredHandler { id, handler, once };
        let mut table = self.inner.handlers.write().unwrap();
        match kind {
            Some(kind) => table.by_kind.entry(kind).or_default().push(registered),
            None => table.wildcard.push(registered),
        }
        id
    }

    /// Detaches a handler. Returns `false` when the id is unknown,
    /// which includes once-handlers that already fired.
    pub fn off(&self, id: HandlerId) -> bool {
        self.inner.handlers.write().unwrap().remove(id)
    }

    /// Detaches every handler for `kind`, or every handler including
    /// wildcards when `kind` is `None`.
    pub fn off_all(&self, kind: Option<EventKind>) {
        let mut table = self.inner.handlers.write().unwrap();
        match kind {
            Some(kind) => {
                table.by_kind.remove(&kind);
            }
            None => {
                table.by_kind.clear();
                table.wildcard.clear();
            }
        }
    }

    // ── Dispatch ────────────────────────────────────────────────────────

    /// Enqueues an event for ordered delivery and returns immediately.
    ///
    /// Must be called from within a Tokio runtime: the drain task that
    /// actually delivers events is spawned lazily from here.
    pub fn dispatch(&self, event: MarketEvent) {
        self.inner.record_replay(&event);
        self.inner.queue.lock().unwrap().push_back(event);
        self.try_spawn_drain();
    }

    fn try_spawn_drain(&self) {
        if self
            .inner
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                drain(inner).await;
            });
        }
    }

    /// Resolves once the queue is empty and no drain task is running.
    /// Used by shutdown to let in-flight events finish.
    pub async fn wait_for_idle(&self) {
        loop {
            let empty = self.inner.queue.lock().unwrap().is_empty();
            if empty && !self.inner.draining.load(Ordering::Acquire) {
                return;
            }
            sleep(IDLE_POLL).await;
        }
    }

    // ── Replay ──────────────────────────────────────────────────────────

    /// Returns buffered events, oldest first, optionally filtered by
    /// kind and by minimum event timestamp.
    #[must_use]
    pub fn replay_buffer(
        &self,
        kind: Option<EventKind>,
        since: Option<DateTime<Utc>>,
    ) -> Vec<MarketEvent> {
        let Some(buffer) = &self.inner.replay else {
            return Vec::new();
        };
        let ttl = self.inner.replay_cfg.ttl_secs.map(Duration::from_secs);
        let now = Instant::now();
        buffer
            .lock()
            .unwrap()
            .iter()
            .filter(|entry| match ttl {
                // The sweeper runs on an interval, so age out stale
                // entries at read time too.
                Some(ttl) => now.duration_since(entry.received_at) < ttl,
                None => true,
            })
            .filter(|entry| kind.map_or(true, |k| entry.event.kind() == k))
            .filter(|entry| since.map_or(true, |s| entry.event.timestamp >= s))
            .map(|entry| entry.event.clone())
            .collect()
    }

    /// Replays buffered events to one handler, sequentially and oldest
    /// first. Handler errors are counted and skipped. Returns how many
    /// events were offered.
    pub async fn replay_to(
        &self,
        handler: &dyn EventHandler,
        kind: Option<EventKind>,
        since: Option<DateTime<Utc>>,
    ) -> usize {
        let events = self.replay_buffer(kind, since);
        for event in &events {
            if let Err(err) = handler.handle(event).await {
                self.inner.handler_errors.fetch_add(1, Ordering::Relaxed);
                tracing::error!(kind = %event.kind(), error = %err, "Replay handler failed");
            }
        }
        events.len()
    }

    /// Snapshot of dispatch counters.
    #[must_use]
    pub fn metrics(&self) -> DispatchMetrics {
        let table = self.inner.handlers.read().unwrap();
        let handlers =
            table.by_kind.values().map(Vec::len).sum::<usize>() + table.wildcard.len();
        drop(table);
        DispatchMetrics {
            dispatched: self.inner.dispatched.load(Ordering::Relaxed),
            handler_errors: self.inner.handler_errors.load(Ordering::Relaxed),
            queued: self.inner.queue.lock().unwrap().len(),
            replay_buffered: self
                .inner
                .replay
                .as_ref()
                .map_or(0, |b| b.lock().unwrap().len()),
            handlers,
        }
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(ReplayConfig::default())
    }
}

/// Pops and delivers queued events until the queue stays empty.
///
/// Exactly one drain task runs at a time; the `draining` flag is the
/// claim. Clearing the flag and re-checking the queue closes the race
/// with a producer that enqueued between the final pop and the clear.
async fn drain(inner: Arc<DispatcherInner>) {
    loop {
        let event = inner.queue.lock().unwrap().pop_front();
        match event {
            Some(event) => inner.deliver(&event).await,
            None => {
                inner.draining.store(false, Ordering::Release);
                if inner.queue.lock().unwrap().is_empty() {
                    return;
                }
                if inner
                    .draining
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    // A racing dispatch respawned the drain already.
                    return;
                }
            }
        }
    }
}
