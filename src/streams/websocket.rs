//! WebSocket account and program subscriptions with auto-reconnect.
//!
//! [`SubscriptionManager`] owns a single WebSocket connection to a
//! Solana RPC node and multiplexes `accountSubscribe` and
//! `programSubscribe` streams over it. Each subscription stores its
//! target and callbacks, so after a dropped connection the manager can
//! re-establish every stream on the new socket without the caller's
//! involvement. Reconnect attempts are bounded; when the budget runs
//! out every subscription's error callback fires once and the manager
//! goes to [`ConnectionState::Failed`].
//!
//! Callbacks run on the connection task. They are expected to hand the
//! account off (send on a channel, enqueue an event) and return; slow
//! callbacks stall notification processing for every subscription.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use solana_account_decoder::UiAccount;
use solana_sdk::{account::Account, pubkey::Pubkey};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tokio_util::sync::CancellationToken;

use crate::config::{CommitmentLevel, ReconnectConfig};
use crate::types::RawAccount;
use crate::utils::error::{IndexerError, Result};
use crate::utils::retry::reconnect_backoff;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Handle for a single subscription, returned by the subscribe calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// What a subscription watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionTarget {
    /// One account address (`accountSubscribe`).
    Account(Pubkey),
    /// Every account owned by a program (`programSubscribe`).
    Program(Pubkey),
}

impl SubscriptionTarget {
    fn subscribe_method(&self) -> &'static str {
        match self {
            SubscriptionTarget::Account(_) => "accountSubscribe",
            SubscriptionTarget::Program(_) => "programSubscribe",
        }
    }

    fn unsubscribe_method(&self) -> &'static str {
        match self {
            SubscriptionTarget::Account(_) => "accountUnsubscribe",
            SubscriptionTarget::Program(_) => "programUnsubscribe",
        }
    }

    fn param(&self) -> String {
        match self {
            SubscriptionTarget::Account(address) => address.to_string(),
            SubscriptionTarget::Program(program_id) => program_id.to_string(),
        }
    }
}

/// Connection lifecycle as observed through [`SubscriptionManager::state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Socket is up and subscriptions are live.
    Connected,
    /// Socket dropped; reconnect attempt in progress.
    Reconnecting { attempt: u32 },
    /// Reconnect budget exhausted. Terminal.
    Failed,
}

#[derive(Clone)]
struct SubscriptionEntry {
    target: SubscriptionTarget,
    on_update: Arc<dyn Fn(RawAccount) + Send + Sync>,
    on_error: Arc<dyn Fn(IndexerError) + Send + Sync>,
}

/// Requests queued for the connection task.
///
/// A subscribe is resolved to a wire frame only when the task is about
/// to send it, so a request that waited out a reconnect is reconciled
/// against the new connection's resubscribe pass instead of opening a
/// second server-side stream.
enum Outbound {
    Subscribe(SubscriptionId),
    Unsubscribe { method: &'static str, server_id: u64 },
}

struct SubsInner {
    ws_url: String,
    commitment: CommitmentLevel,
    reconnect: ReconnectConfig,
    /// Local id -> subscription. Survives reconnects.
    subs: Mutex<HashMap<SubscriptionId, SubscriptionEntry>>,
    /// Server-assigned id -> local id. Cleared on every (re)connect.
    server_ids: Mutex<HashMap<u64, SubscriptionId>>,
    /// In-flight subscribe request id -> local id and target.
    pending: Mutex<HashMap<u64, (SubscriptionId, SubscriptionTarget)>>,
    next_local: AtomicU64,
    next_request: AtomicU64,
    outbound: mpsc::UnboundedSender<Outbound>,
    state_tx: watch::Sender<ConnectionState>,
    shutdown: CancellationToken,
}

// ── Wire shapes ─────────────────────────────────────────────────────────

/// Confirmation of a subscribe request: `result` is the server-side id.
#[derive(Debug, Deserialize)]
struct RpcConfirmation {
    id: u64,
    result: u64,
}

#[derive(Debug, Deserialize)]
struct RpcErrorResponse {
    id: u64,
    error: RpcErrorBody,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcNotification {
    method: String,
    params: NotificationParams,
}

#[derive(Debug, Deserialize)]
struct NotificationParams {
    subscription: u64,
    result: NotificationResult,
}

#[derive(Debug, Deserialize)]
struct NotificationResult {
    context: NotificationContext,
    value: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct NotificationContext {
    slot: u64,
}

/// `programNotification` value: the changed account plus its address.
#[derive(Debug, Deserialize)]
struct ProgramNotificationValue {
    pubkey: String,
    account: UiAccount,
}

// ── Manager ─────────────────────────────────────────────────────────────

/// Multiplexed account/program subscriptions over one WebSocket.
pub struct SubscriptionManager {
    inner: Arc<SubsInner>,
    state_rx: watch::Receiver<ConnectionState>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SubscriptionManager {
    /// Connects to `ws_url` and spawns the connection task.
    ///
    /// # Errors
    ///
    /// [`IndexerError::ConnectionError`] when the initial connection
    /// cannot be established. Later disconnects are handled by the
    /// reconnect loop instead of surfacing here.
    pub async fn connect(
        ws_url: impl Into<String>,
        commitment: CommitmentLevel,
        reconnect: ReconnectConfig,
    ) -> Result<Self> {
        let ws_url = ws_url.into();
        tracing::info!(url = %ws_url, "Connecting WebSocket");
        let (stream, _) = connect_async(&ws_url).await.map_err(|e| {
            IndexerError::ConnectionError(format!("WebSocket connect to {ws_url} failed: {e}"))
        })?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connected);

        let inner = Arc::new(SubsInner {
            ws_url,
            commitment,
            reconnect,
            subs: Mutex::new(HashMap::new()),
            server_ids: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            next_local: AtomicU64::new(1),
            next_request: AtomicU64::new(1),
            outbound: outbound_tx,
            state_tx,
            shutdown: CancellationToken::new(),
        });

        let task = tokio::spawn(run(Arc::clone(&inner), outbound_rx, stream));

        Ok(Self {
            inner,
            state_rx,
            task: Mutex::new(Some(task)),
        })
    }

    /// Subscribes to changes of a single account.
    ///
    /// `on_update` receives the raw account for every notification;
    /// `on_error` fires once if the connection is lost for good.
    ///
    /// # Errors
    ///
    /// [`IndexerError::ConnectionError`] when the connection task has
    /// already stopped.
    pub fn subscribe_account(
        &self,
        address: Pubkey,
        on_update: impl Fn(RawAccount) + Send + Sync + 'static,
        on_error: impl Fn(IndexerError) + Send + Sync + 'static,
    ) -> Result<SubscriptionId> {
        self.subscribe(SubscriptionTarget::Account(address), on_update, on_error)
    }

    /// Subscribes to changes of every account owned by `program_id`.
    ///
    /// # Errors
    ///
    /// [`IndexerError::ConnectionError`] when the connection task has
    /// already stopped.
    pub fn subscribe_program(
        &self,
        program_id: Pubkey,
        on_update: impl Fn(RawAccount) + Send + Sync + 'static,
        on_error: impl Fn(IndexerError) + Send + Sync + 'static,
    ) -> Result<SubscriptionId> {
        self.subscribe(SubscriptionTarget::Program(program_id), on_update, on_error)
    }

    fn subscribe(
        &self,
        target: SubscriptionTarget,
        on_update: impl Fn(RawAccount) + Send + Sync + 'static,
        on_error: impl Fn(IndexerError) + Send + Sync + 'static,
    ) -> Result<SubscriptionId> {
        let local = SubscriptionId(self.inner.next_local.fetch_add(1, Ordering::Relaxed));
        self.inner.subs.lock().unwrap().insert(
            local,
            SubscriptionEntry {
                target,
                on_update: Arc::new(on_update),
                on_error: Arc::new(on_error),
            },
        );

        self.inner
            .outbound
            .send(Outbound::Subscribe(local))
            .map_err(|_| {
                self.inner.subs.lock().unwrap().remove(&local);
                IndexerError::ConnectionError("connection task stopped".to_string())
            })?;
        tracing::debug!(id = %local, ?target, "Subscription requested");
        Ok(local)
    }

    /// Cancels a subscription and tells the server to stop sending.
    ///
    /// # Errors
    ///
    /// [`IndexerError::ConfigError`] when `id` does not name an active
    /// subscription, including a second unsubscribe of the same id.
    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        let entry = self
            .inner
            .subs
            .lock()
            .unwrap()
            .remove(&id)
            .ok_or_else(|| IndexerError::ConfigError(format!("unknown subscription {id}")))?;

        let server_id = {
            let mut server_ids = self.inner.server_ids.lock().unwrap();
            let found = server_ids
                .iter()
                .find(|(_, local)| **local == id)
                .map(|(server, _)| *server);
            if let Some(server) = found {
                server_ids.remove(&server);
            }
            found
        };

        // Unconfirmed subscriptions have no server id yet; the entry is
        // gone when the confirmation arrives, which stops the server
        // stream at that point.
        if let Some(server_id) = server_id {
            let _ = self.inner.outbound.send(Outbound::Unsubscribe {
                method: entry.target.unsubscribe_method(),
                server_id,
            });
        }
        tracing::debug!(id = %id, "Subscription cancelled");
        Ok(())
    }

    /// Current subscriptions, in no particular order.
    #[must_use]
    pub fn active_subscriptions(&self) -> Vec<(SubscriptionId, SubscriptionTarget)> {
        self.inner
            .subs
            .lock()
            .unwrap()
            .iter()
            .map(|(id, entry)| (*id, entry.target))
            .collect()
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// A watcher that yields every connection state change.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Closes the connection and waits for the connection task to exit.
    /// Idempotent.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let task = self.task.lock().unwrap().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl SubsInner {
    /// Builds a subscribe request for `target` and registers it as
    /// pending under a fresh request id.
    fn subscribe_message(&self, local: SubscriptionId, target: &SubscriptionTarget) -> Message {
        let request_id = self.next_request.fetch_add(1, Ordering::Relaxed);
        self.pending.lock().unwrap().insert(request_id, (local, *target));
        let body = json!({
            "jsonrpc": "2.0",
            "id": request_id,
            "method": target.subscribe_method(),
            "params": [
                target.param(),
                {
                    "encoding": "base64",
                    "commitment": self.commitment.as_str()
                }
            ]
        });
        Message::Text(body.to_string())
    }

    fn unsubscribe_message(&self, method: &str, server_id: u64) -> Message {
        let request_id = self.next_request.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": request_id,
            "method": method,
            "params": [server_id]
        });
        Message::Text(body.to_string())
    }

    /// Resolves a queued request to a wire frame for the current
    /// connection. A subscribe resolves to nothing when its id was
    /// unsubscribed in the meantime or the resubscribe pass already
    /// covers it.
    fn resolve_outbound(&self, op: Outbound) -> Option<Message> {
        match op {
            Outbound::Subscribe(local) => {
                let target = self.subs.lock().unwrap().get(&local).map(|e| e.target)?;
                let requested = self
                    .pending
                    .lock()
                    .unwrap()
                    .values()
                    .any(|(id, _)| *id == local);
                let live = self
                    .server_ids
                    .lock()
                    .unwrap()
                    .values()
                    .any(|id| *id == local);
                if requested || live {
                    return None;
                }
                Some(self.subscribe_message(local, &target))
            }
            Outbound::Unsubscribe { method, server_id } => {
                Some(self.unsubscribe_message(method, server_id))
            }
        }
    }

    fn handle_text(&self, text: &str) {
        if let Ok(notification) = serde_json::from_str::<RpcNotification>(text) {
            self.handle_notification(notification);
            return;
        }
        if let Ok(confirmation) = serde_json::from_str::<RpcConfirmation>(text) {
            let pending = self.pending.lock().unwrap().remove(&confirmation.id);
            if let Some((local, target)) = pending {
                if self.subs.lock().unwrap().contains_key(&local) {
                    self.server_ids
                        .lock()
                        .unwrap()
                        .insert(confirmation.result, local);
                    tracing::debug!(
                        id = %local,
                        server_id = confirmation.result,
                        "Subscription confirmed"
                    );
                } else {
                    // Unsubscribed while the request was in flight; the
                    // server opened a stream nobody reads, close it.
                    tracing::debug!(
                        id = %local,
                        server_id = confirmation.result,
                        "Confirmed subscription already cancelled"
                    );
                    let _ = self.outbound.send(Outbound::Unsubscribe {
                        method: target.unsubscribe_method(),
                        server_id: confirmation.result,
                    });
                }
            }
            return;
        }
        if let Ok(rejection) = serde_json::from_str::<RpcErrorResponse>(text) {
            let pending = self.pending.lock().unwrap().remove(&rejection.id);
            if let Some((local, _)) = pending {
                // The server refused the subscribe request; the entry is
                // dead, not retried.
                let entry = self.subs.lock().unwrap().remove(&local);
                tracing::error!(
                    id = %local,
                    code = rejection.error.code,
                    message = %rejection.error.message,
                    "Subscription rejected"
                );
                if let Some(entry) = entry {
                    (entry.on_error)(IndexerError::ConnectionError(format!(
                        "subscription rejected: {} (code {})",
                        rejection.error.message, rejection.error.code
                    )));
                }
            }
            return;
        }
        tracing::debug!(len = text.len(), "Ignoring unrecognized WebSocket message");
    }

    fn handle_notification(&self, notification: RpcNotification) {
        let slot = notification.params.result.context.slot;
        let local = self
            .server_ids
            .lock()
            .unwrap()
            .get(&notification.params.subscription)
            .copied();
        let Some(local) = local else {
            // Can happen briefly after unsubscribe or across reconnects.
            tracing::debug!(
                server_id = notification.params.subscription,
                "Notification for unknown subscription"
            );
            return;
        };
        let entry = self.subs.lock().unwrap().get(&local).cloned();
        let Some(entry) = entry else { return };

        match notification.method.as_str() {
            "accountNotification" => {
                let SubscriptionTarget::Account(address) = entry.target else {
                    tracing::warn!(id = %local, "accountNotification for a program subscription");
                    return;
                };
                match serde_json::from_value::<UiAccount>(notification.params.result.value) {
                    Ok(ui) => self.push_update(&entry, address, &ui, slot),
                    Err(e) => {
                        tracing::warn!(id = %local, error = %e, "Malformed account notification");
                    }
                }
            }
            "programNotification" => {
                let SubscriptionTarget::Program(_) = entry.target else {
                    tracing::warn!(id = %local, "programNotification for an account subscription");
                    return;
                };
                match serde_json::from_value::<ProgramNotificationValue>(
                    notification.params.result.value,
                ) {
                    Ok(value) => match Pubkey::from_str(&value.pubkey) {
                        Ok(address) => self.push_update(&entry, address, &value.account, slot),
                        Err(e) => {
                            tracing::warn!(id = %local, error = %e, "Bad pubkey in notification");
                        }
                    },
                    Err(e) => {
                        tracing::warn!(id = %local, error = %e, "Malformed program notification");
                    }
                }
            }
            other => {
                tracing::debug!(method = other, "Ignoring notification method");
            }
        }
    }

    fn push_update(&self, entry: &SubscriptionEntry, address: Pubkey, ui: &UiAccount, slot: u64) {
        match ui.decode::<Account>() {
            Some(account) => (entry.on_update)(RawAccount::from_account(address, account, slot)),
            None => {
                tracing::warn!(address = %address, "Undecodable account data in notification");
            }
        }
    }

    /// Notifies every subscription that the connection is gone for good.
    fn fail_all(&self, attempts: u32, last_error: &str) {
        let entries: Vec<SubscriptionEntry> =
            self.subs.lock().unwrap().values().cloned().collect();
        tracing::error!(
            attempts,
            subscriptions = entries.len(),
            last_error,
            "Reconnect budget exhausted"
        );
        for entry in entries {
            (entry.on_error)(IndexerError::SubscriptionFatal {
                attempts,
                last_error: last_error.to_string(),
            });
        }
    }
}

enum ServeOutcome {
    Shutdown,
    ConnectionLost,
}

/// Connection task: serves the current socket, reconnects on loss.
async fn run(
    inner: Arc<SubsInner>,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    first: WsStream,
) {
    let mut current = Some(first);
    loop {
        let stream = match current.take() {
            Some(stream) => stream,
            None => match reconnect(&inner).await {
                Some(stream) => stream,
                None => return,
            },
        };

        inner.state_tx.send_replace(ConnectionState::Connected);
        match serve_connection(&inner, stream, &mut outbound_rx).await {
            ServeOutcome::Shutdown => return,
            ServeOutcome::ConnectionLost => {
                tracing::warn!(url = %inner.ws_url, "WebSocket connection lost");
            }
        }
    }
}

/// Bounded reconnect loop. Returns the new socket, or `None` on
/// shutdown or after the attempt budget is spent.
async fn reconnect(inner: &Arc<SubsInner>) -> Option<WsStream> {
    let mut last_error = "connection closed".to_string();
    for attempt in 1..=inner.reconnect.max_attempts {
        inner
            .state_tx
            .send_replace(ConnectionState::Reconnecting { attempt });
        let delay = reconnect_backoff(&inner.reconnect, attempt);
        tracing::warn!(
            attempt,
            max = inner.reconnect.max_attempts,
            delay_ms = delay.as_millis() as u64,
            "Reconnecting WebSocket"
        );
        tokio::select! {
            () = inner.shutdown.cancelled() => return None,
            () = sleep(delay) => {}
        }
        match connect_async(&inner.ws_url).await {
            Ok((stream, _)) => {
                tracing::info!(url = %inner.ws_url, attempt, "WebSocket reconnected");
                return Some(stream);
            }
            Err(e) => {
                tracing::warn!(attempt, error = %e, "Reconnect attempt failed");
                last_error = e.to_string();
            }
        }
    }
    inner.state_tx.send_replace(ConnectionState::Failed);
    inner.fail_all(inner.reconnect.max_attempts, &last_error);
    None
}

/// Serves one socket until shutdown or connection loss. Re-issues every
/// stored subscription first, so streams survive reconnects.
async fn serve_connection(
    inner: &Arc<SubsInner>,
    stream: WsStream,
    outbound_rx: &mut mpsc::UnboundedReceiver<Outbound>,
) -> ServeOutcome {
    let (mut sink, mut read) = stream.split();

    // Server ids from the previous connection are meaningless now, and
    // so are requests still queued against it: `subs` is re-issued in
    // full below, and queued unsubscribes name server ids that died
    // with the socket.
    inner.server_ids.lock().unwrap().clear();
    inner.pending.lock().unwrap().clear();
    while outbound_rx.try_recv().is_ok() {}

    let targets: Vec<(SubscriptionId, SubscriptionTarget)> = {
        let subs = inner.subs.lock().unwrap();
        subs.iter().map(|(id, entry)| (*id, entry.target)).collect()
    };
    for (local, target) in targets {
        let msg = inner.subscribe_message(local, &target);
        if sink.send(msg).await.is_err() {
            return ServeOutcome::ConnectionLost;
        }
    }

    loop {
        tokio::select! {
            () = inner.shutdown.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                return ServeOutcome::Shutdown;
            }
            outbound = outbound_rx.recv() => match outbound {
                None => return ServeOutcome::Shutdown,
                Some(op) => {
                    if let Some(msg) = inner.resolve_outbound(op) {
                        if sink.send(msg).await.is_err() {
                            return ServeOutcome::ConnectionLost;
                        }
                    }
                }
            },
            incoming = read.next() => match incoming {
                None => {
                    tracing::warn!("WebSocket stream ended");
                    return ServeOutcome::ConnectionLost;
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "WebSocket receive error");
                    return ServeOutcome::ConnectionLost;
                }
                Some(Ok(Message::Text(text))) => inner.handle_text(&text),
                Some(Ok(Message::Close(_))) => {
                    tracing::warn!("WebSocket closed by server");
                    return ServeOutcome::ConnectionLost;
                }
                Some(Ok(_)) => {}
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_notification_deserialization() {
        let json_data = r#"{
            "jsonrpc": "2.0",
            "method": "accountNotification",
            "params": {
                "result": {
                    "context": { "slot": 5199307 },
                    "value": {
                        "lamports": 33594,
                        "data": ["AQID", "base64"],
                        "owner": "11111111111111111111111111111111",
                        "executable": false,
                        "rentEpoch": 635
                    }
                },
                "subscription": 23784
            }
        }"#;

        let notification: RpcNotification = serde_json::from_str(json_data).unwrap();
        assert_eq!(notification.method, "accountNotification");
        assert_eq!(notification.params.subscription, 23784);
        assert_eq!(notification.params.result.context.slot, 5199307);

        let ui: UiAccount = serde_json::from_value(notification.params.result.value).unwrap();
        let account = ui.decode::<Account>().unwrap();
        assert_eq!(account.data, vec![1, 2, 3]);
        assert_eq!(account.lamports, 33594);
    }

    #[test]
    fn test_program_notification_deserialization() {
        let json_data = r#"{
            "jsonrpc": "2.0",
            "method": "programNotification",
            "params": {
                "result": {
                    "context": { "slot": 5208469 },
                    "value": {
                        "pubkey": "11111111111111111111111111111111",
                        "account": {
                            "lamports": 33594,
                            "data": ["BAUG", "base64"],
                            "owner": "11111111111111111111111111111111",
                            "executable": false,
                            "rentEpoch": 636
                        }
                    }
                },
                "subscription": 24040
            }
        }"#;

        let notification: RpcNotification = serde_json::from_str(json_data).unwrap();
        assert_eq!(notification.method, "programNotification");

        let value: ProgramNotificationValue =
            serde_json::from_value(notification.params.result.value).unwrap();
        assert_eq!(value.pubkey, "11111111111111111111111111111111");
        let account = value.account.decode::<Account>().unwrap();
        assert_eq!(account.data, vec![4, 5, 6]);
    }

    #[test]
    fn test_confirmation_deserialization() {
        let confirmation: RpcConfirmation =
            serde_json::from_str(r#"{"jsonrpc":"2.0","result":5308752,"id":1}"#).unwrap();
        assert_eq!(confirmation.id, 1);
        assert_eq!(confirmation.result, 5308752);

        // Unsubscribe acks carry a bool result and must not parse as
        // confirmations.
        assert!(
            serde_json::from_str::<RpcConfirmation>(r#"{"jsonrpc":"2.0","result":true,"id":2}"#)
                .is_err()
        );
    }

    #[test]
    fn test_error_response_deserialization() {
        let rejection: RpcErrorResponse = serde_json::from_str(
            r#"{"jsonrpc":"2.0","error":{"code":-32602,"message":"Invalid params"},"id":3}"#,
        )
        .unwrap();
        assert_eq!(rejection.id, 3);
        assert_eq!(rejection.error.code, -32602);
        assert_eq!(rejection.error.message, "Invalid params");
    }

    fn test_inner() -> (SubsInner, mpsc::UnboundedReceiver<Outbound>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let (state_tx, _state_rx) = watch::channel(ConnectionState::Connected);
        let inner = SubsInner {
            ws_url: "ws://127.0.0.1:8900".to_string(),
            commitment: CommitmentLevel::Confirmed,
            reconnect: ReconnectConfig::default(),
            subs: Mutex::new(HashMap::new()),
            server_ids: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            next_local: AtomicU64::new(1),
            next_request: AtomicU64::new(1),
            outbound,
            state_tx,
            shutdown: CancellationToken::new(),
        };
        (inner, rx)
    }

    #[test]
    fn test_subscribe_message_shape() {
        let (inner, _rx) = test_inner();

        let program_id = Pubkey::new_unique();
        let msg = inner.subscribe_message(
            SubscriptionId(7),
            &SubscriptionTarget::Program(program_id),
        );
        let Message::Text(text) = msg else {
            panic!("expected a text frame");
        };
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["method"], "programSubscribe");
        assert_eq!(value["params"][0], program_id.to_string());
        assert_eq!(value["params"][1]["encoding"], "base64");
        assert_eq!(value["params"][1]["commitment"], "confirmed");
        assert_eq!(
            inner.pending.lock().unwrap().get(&1),
            Some(&(SubscriptionId(7), SubscriptionTarget::Program(program_id)))
        );
    }

    #[test]
    fn test_queued_subscribe_resolves_once() {
        let (inner, _rx) = test_inner();
        let local = SubscriptionId(4);
        inner.subs.lock().unwrap().insert(
            local,
            SubscriptionEntry {
                target: SubscriptionTarget::Account(Pubkey::new_unique()),
                on_update: Arc::new(|_| {}),
                on_error: Arc::new(|_| {}),
            },
        );

        // The first resolution emits the frame and marks the id pending;
        // a second request for the same id is already covered.
        assert!(inner.resolve_outbound(Outbound::Subscribe(local)).is_some());
        assert!(inner.resolve_outbound(Outbound::Subscribe(local)).is_none());

        // Ids with no stored subscription resolve to nothing at all.
        assert!(inner
            .resolve_outbound(Outbound::Subscribe(SubscriptionId(99)))
            .is_none());
    }

    #[test]
    fn test_confirmation_after_unsubscribe_stops_server_stream() {
        let (inner, mut rx) = test_inner();
        let address = Pubkey::new_unique();

        // The subscribe request went out, then the caller unsubscribed
        // before the server answered: no subs entry remains.
        let _ = inner.subscribe_message(
            SubscriptionId(7),
            &SubscriptionTarget::Account(address),
        );
        inner.handle_text(r#"{"jsonrpc":"2.0","result":55,"id":1}"#);

        assert!(inner.server_ids.lock().unwrap().is_empty());
        let op = rx.try_recv().unwrap();
        assert!(matches!(
            op,
            Outbound::Unsubscribe {
                method: "accountUnsubscribe",
                server_id: 55
            }
        ));
    }
}
