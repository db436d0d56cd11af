//! Main indexer orchestrator that integrates all components.
//!
//! This module provides the `MarketIndexer` struct that drives the complete
//! pipeline: snapshot sync, live WebSocket subscriptions, decoding,
//! normalization, event dispatch, and endpoint health polling.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use solana_sdk::pubkey::Pubkey;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tokio_util::sync::CancellationToken;

use crate::adapters::ProtocolAdapter;
use crate::config::IndexerConfig;
use crate::core::registry::AdapterRegistry;
use crate::core::rpc::FailoverRpcClient;
use crate::dispatch::{DispatchMetrics, EventDispatcher};
use crate::streams::{SubscriptionId, SubscriptionManager};
use crate::types::{Market, MarketEvent, MarketStatus, RawAccount, SyncSummary};
use crate::utils::error::{IndexerError, Result};

/// Lifecycle state of the indexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexerState {
    /// Not started, or fully shut down.
    Stopped,
    /// Initial snapshot sync in progress.
    Syncing,
    /// Snapshot done, live subscriptions and health poll active.
    Running,
}

impl IndexerState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            IndexerState::Stopped => "stopped",
            IndexerState::Syncing => "syncing",
            IndexerState::Running => "running",
        }
    }
}

impl std::fmt::Display for IndexerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of the most recent endpoint health probe.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HealthStatus {
    /// Slot reported by the last successful probe.
    pub last_slot: Option<u64>,
    /// Probes failed since the last success.
    pub consecutive_failures: u32,
    /// When the last probe (of either outcome) ran.
    pub checked_at: Option<DateTime<Utc>>,
}

/// Point-in-time snapshot of the indexer, serializable for health
/// endpoints and logs.
#[derive(Debug, Clone, Serialize)]
pub struct IndexerStatus {
    pub state: IndexerState,
    pub programs: Vec<String>,
    pub active_subscriptions: usize,
    pub accounts_indexed: u64,
    pub accounts_dropped: u64,
    pub decode_failures: u64,
    pub normalize_failures: u64,
    pub dispatcher: DispatchMetrics,
    pub rpc_endpoint: String,
    pub health: HealthStatus,
}

#[derive(Default)]
struct Counters {
    accounts_indexed: AtomicU64,
    accounts_dropped: AtomicU64,
    decode_failures: AtomicU64,
    normalize_failures: AtomicU64,
}

/// Shared per-account processing path, used by both the snapshot sync
/// and the live worker task.
struct Pipeline {
    registry: Arc<AdapterRegistry>,
    dispatcher: Arc<EventDispatcher>,
    counters: Counters,
    last_status: Mutex<HashMap<Pubkey, MarketStatus>>,
}

impl Pipeline {
    /// Normalizes one account and dispatches the resulting event.
    ///
    /// Failures are contained to the single account: a registry miss or
    /// a decode/normalize error is counted and logged, never propagated.
    async fn process(&self, raw: &RawAccount) {
        let Some(adapter) = self.registry.get(&raw.program_id) else {
            tracing::debug!(
                program = %raw.program_id,
                address = %raw.address,
                "No adapter registered for owner program, dropping account"
            );
            self.counters.accounts_dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };

        match adapter.normalize(raw) {
            Ok(market) => {
                self.check_transition(&market);
                self.counters.accounts_indexed.fetch_add(1, Ordering::Relaxed);
                self.dispatcher
                    .dispatch(MarketEvent::market_updated(market, raw.slot));
            }
            Err(e) => {
                self.counters.accounts_dropped.fetch_add(1, Ordering::Relaxed);
                match e {
                    IndexerError::DecodingError(_) | IndexerError::NoDecoderMatched { .. } => {
                        self.counters.decode_failures.fetch_add(1, Ordering::Relaxed);
                    }
                    _ => {
                        self.counters
                            .normalize_failures
                            .fetch_add(1, Ordering::Relaxed);
                    }
                }
                tracing::error!(
                    adapter = adapter.name(),
                    address = %raw.address,
                    error = %e,
                    "Dropping account that failed to normalize"
                );
            }
        }
    }

    /// Flags status transitions the market model does not allow, such as
    /// a settled market going active again. Observation only: the event
    /// is still dispatched, since on-chain state is authoritative.
    fn check_transition(&self, market: &Market) {
        let mut last = self.last_status.lock().unwrap();
        if let Some(prev) = last.insert(market.address, market.status) {
            if !prev.can_transition_to(market.status) {
                tracing::warn!(
                    market = %market.address,
                    from = %prev,
                    to = %market.status,
                    "Observed an illegal market status transition"
                );
            }
        }
    }
}

/// Main indexer that orchestrates the complete pipeline.
///
/// The `MarketIndexer` ties the failover RPC client, the adapter
/// registry, the WebSocket subscription manager, and the event
/// dispatcher into one lifecycle. Collaborators are injected, so tests
/// and embedders can swap any of them.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use weathervane::{
///     AdapterRegistry, EventDispatcher, IndexerConfigBuilder, MarketIndexer,
/// };
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = IndexerConfigBuilder::new()
///     .with_rpc("https://api.mainnet-beta.solana.com")
///     .program_id("11111111111111111111111111111111")
///     .build()?;
///
/// let registry = Arc::new(AdapterRegistry::new());
/// let dispatcher = Arc::new(EventDispatcher::new(config.replay));
/// let indexer = MarketIndexer::new(config, registry, dispatcher);
/// indexer.start().await?;
/// # Ok(())
/// # }
/// ```
pub struct MarketIndexer {
    config: IndexerConfig,
    rpc: Arc<FailoverRpcClient>,
    pipeline: Arc<Pipeline>,
    dispatcher: Arc<EventDispatcher>,
    state: RwLock<IndexerState>,
    health: Arc<Mutex<HealthStatus>>,
    manager: Mutex<Option<SubscriptionManager>>,
    subscriptions: Mutex<Vec<SubscriptionId>>,
    shutdown: Mutex<CancellationToken>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    // Serializes start/stop so overlapping lifecycle calls cannot
    // interleave their teardown and spawn phases.
    lifecycle: tokio::sync::Mutex<()>,
}

impl MarketIndexer {
    /// Creates an indexer over the RPC endpoints named in `config`.
    #[must_use]
    pub fn new(
        config: IndexerConfig,
        registry: Arc<AdapterRegistry>,
        dispatcher: Arc<EventDispatcher>,
    ) -> Self {
        let rpc = Arc::new(FailoverRpcClient::new(
            &config.rpc_endpoints,
            config.commitment.into(),
            config.retry,
        ));
        Self::with_rpc(config, rpc, registry, dispatcher)
    }

    /// Creates an indexer over a pre-built RPC client. This is the seam
    /// tests use to substitute mock providers.
    #[must_use]
    pub fn with_rpc(
        config: IndexerConfig,
        rpc: Arc<FailoverRpcClient>,
        registry: Arc<AdapterRegistry>,
        dispatcher: Arc<EventDispatcher>,
    ) -> Self {
        let pipeline = Arc::new(Pipeline {
            registry,
            dispatcher: Arc::clone(&dispatcher),
            counters: Counters::default(),
            last_status: Mutex::new(HashMap::new()),
        });
        Self {
            config,
            rpc,
            pipeline,
            dispatcher,
            state: RwLock::new(IndexerState::Stopped),
            health: Arc::new(Mutex::new(HealthStatus::default())),
            manager: Mutex::new(None),
            subscriptions: Mutex::new(Vec::new()),
            shutdown: Mutex::new(CancellationToken::new()),
            tasks: Mutex::new(Vec::new()),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    /// The configuration this indexer was built with.
    #[must_use]
    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> IndexerState {
        *self.state.read().unwrap()
    }

    /// Starts the indexer: snapshot sync, then live subscriptions and
    /// the health poll.
    ///
    /// Calling `start` while the indexer is already syncing or running
    /// logs a warning and returns without doing anything.
    ///
    /// # Errors
    ///
    /// Returns an error when the snapshot sync cannot complete (all RPC
    /// endpoints exhausted) or the WebSocket connection cannot be
    /// established. The indexer is returned to `Stopped` in that case.
    pub async fn start(&self) -> Result<()> {
        let _guard = self.lifecycle.lock().await;
        {
            let mut state = self.state.write().unwrap();
            if *state != IndexerState::Stopped {
                tracing::warn!(state = %*state, "start() called while indexer is active, ignoring");
                return Ok(());
            }
            *state = IndexerState::Syncing;
        }

        match self.run_startup().await {
            Ok(()) => {
                *self.state.write().unwrap() = IndexerState::Running;
                tracing::info!("Indexer running");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "Indexer startup failed, rolling back");
                self.teardown().await;
                *self.state.write().unwrap() = IndexerState::Stopped;
                Err(e)
            }
        }
    }

    /// Stops the indexer and releases its subscriptions and tasks.
    ///
    /// Idempotent: stopping a stopped indexer is a no-op. Events already
    /// handed to the dispatcher keep draining, only ingestion stops.
    pub async fn stop(&self) {
        let _guard = self.lifecycle.lock().await;
        if self.state() == IndexerState::Stopped {
            tracing::debug!("stop() called on a stopped indexer");
            return;
        }
        self.teardown().await;
        *self.state.write().unwrap() = IndexerState::Stopped;
        tracing::info!("Indexer stopped");
    }

    /// Point-in-time status snapshot.
    #[must_use]
    pub fn status(&self) -> IndexerStatus {
        let counters = &self.pipeline.counters;
        let active = self
            .manager
            .lock()
            .unwrap()
            .as_ref()
            .map_or(0, |m| m.active_subscriptions().len());
        IndexerStatus {
            state: self.state(),
            programs: self
                .config
                .program_ids
                .iter()
                .map(Pubkey::to_string)
                .collect(),
            active_subscriptions: active,
            accounts_indexed: counters.accounts_indexed.load(Ordering::Relaxed),
            accounts_dropped: counters.accounts_dropped.load(Ordering::Relaxed),
            decode_failures: counters.decode_failures.load(Ordering::Relaxed),
            normalize_failures: counters.normalize_failures.load(Ordering::Relaxed),
            dispatcher: self.dispatcher.metrics(),
            rpc_endpoint: self.rpc.current_endpoint(),
            health: self.health.lock().unwrap().clone(),
        }
    }

    async fn run_startup(&self) -> Result<()> {
        let shutdown = CancellationToken::new();
        *self.shutdown.lock().unwrap() = shutdown.clone();

        let summary = self.snapshot_sync().await?;
        tracing::info!(
            programs = summary.programs,
            indexed = summary.accounts_indexed,
            dropped = summary.accounts_dropped,
            elapsed_ms = summary.elapsed_ms,
            "Snapshot sync complete"
        );
        self.dispatcher.dispatch(MarketEvent::sync_completed(summary));

        let manager = SubscriptionManager::connect(
            self.config.ws_url(),
            self.config.commitment,
            self.config.reconnect,
        )
        .await?;

        // Update callbacks only enqueue; a dedicated worker runs the
        // pipeline so slow processing never backs up the transport.
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        for program_id in &self.config.program_ids {
            let program_id = *program_id;
            let tx = update_tx.clone();
            let dispatcher = Arc::clone(&self.dispatcher);
            let id = manager.subscribe_program(
                program_id,
                move |raw| {
                    let _ = tx.send(raw);
                },
                move |err| {
                    dispatcher.dispatch(MarketEvent::subscription_lost(
                        program_id,
                        err.to_string(),
                    ));
                },
            )?;
            self.subscriptions.lock().unwrap().push(id);
        }
        drop(update_tx);
        *self.manager.lock().unwrap() = Some(manager);

        let worker = tokio::spawn(run_worker(
            Arc::clone(&self.pipeline),
            update_rx,
            shutdown.clone(),
        ));
        let poll = tokio::spawn(run_health_poll(
            Arc::clone(&self.rpc),
            Arc::clone(&self.health),
            Duration::from_secs(self.config.poll_interval_secs.max(1)),
            shutdown,
        ));
        self.tasks.lock().unwrap().extend([worker, poll]);
        Ok(())
    }

    /// Fetches and processes every account of every configured program.
    ///
    /// Accounts run through the pipeline in batches of
    /// `sync_batch_size`; a failing account only costs itself. Snapshot
    /// markets carry [`RawAccount::SNAPSHOT_SLOT`] since
    /// `getProgramAccounts` does not attribute a slot per account.
    async fn snapshot_sync(&self) -> Result<SyncSummary> {
        let started = Instant::now();
        let counters = &self.pipeline.counters;
        let indexed_before = counters.accounts_indexed.load(Ordering::Relaxed);
        let dropped_before = counters.accounts_dropped.load(Ordering::Relaxed);
        let batch = self.config.sync_batch_size.max(1);

        for program_id in &self.config.program_ids {
            let accounts = self.rpc.get_program_accounts(program_id).await?;
            tracing::info!(
                program = %program_id,
                accounts = accounts.len(),
                "Fetched program accounts for snapshot"
            );

            for chunk in accounts.chunks(batch) {
                let work = chunk.iter().map(|(address, account)| {
                    let raw = RawAccount::from_account(
                        *address,
                        account.clone(),
                        RawAccount::SNAPSHOT_SLOT,
                    );
                    async move { self.pipeline.process(&raw).await }
                });
                join_all(work).await;
            }
        }

        let indexed = counters.accounts_indexed.load(Ordering::Relaxed) - indexed_before;
        let dropped = counters.accounts_dropped.load(Ordering::Relaxed) - dropped_before;
        Ok(SyncSummary {
            programs: self.config.program_ids.len(),
            accounts_indexed: usize::try_from(indexed).unwrap_or(usize::MAX),
            accounts_dropped: usize::try_from(dropped).unwrap_or(usize::MAX),
            elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        })
    }

    async fn teardown(&self) {
        self.shutdown.lock().unwrap().cancel();

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().unwrap().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }

        let manager = self.manager.lock().unwrap().take();
        let held: Vec<SubscriptionId> = self.subscriptions.lock().unwrap().drain(..).collect();
        if let Some(manager) = manager {
            for id in held {
                if let Err(e) = manager.unsubscribe(id) {
                    tracing::debug!(id = %id, error = %e, "Unsubscribe during shutdown failed");
                }
            }
            manager.shutdown().await;
        }
    }
}

/// Drains live account updates into the processing pipeline.
async fn run_worker(
    pipeline: Arc<Pipeline>,
    mut updates: mpsc::UnboundedReceiver<RawAccount>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            next = updates.recv() => match next {
                Some(raw) => pipeline.process(&raw).await,
                None => break,
            },
        }
    }
}

/// Probes the current RPC endpoint on a fixed interval and records the
/// outcome. Degradation is logged, not acted on; the retry/failover
/// layer handles actual traffic.
async fn run_health_poll(
    rpc: Arc<FailoverRpcClient>,
    health: Arc<Mutex<HealthStatus>>,
    period: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = interval(period);
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let checked_at = Utc::now();
                match rpc.health_check().await {
                    Ok(slot) => {
                        let mut status = health.lock().unwrap();
                        status.last_slot = Some(slot);
                        status.consecutive_failures = 0;
                        status.checked_at = Some(checked_at);
                        drop(status);
                        tracing::debug!(slot, endpoint = %rpc.current_endpoint(), "Health check passed");
                    }
                    Err(e) => {
                        let failures = {
                            let mut status = health.lock().unwrap();
                            status.consecutive_failures += 1;
                            status.checked_at = Some(checked_at);
                            status.consecutive_failures
                        };
                        tracing::warn!(
                            consecutive_failures = failures,
                            endpoint = %rpc.current_endpoint(),
                            error = %e,
                            "Health check failed"
                        );
                    }
                }
            }
        }
    }
}
