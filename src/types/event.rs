//! Typed events published by the indexer.
//!
//! Event types form a closed enum rather than free-form strings, so a
//! handler subscribed to a kind can rely on the payload shape at compile
//! time.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use solana_sdk::pubkey::Pubkey;

use crate::types::market::{pubkey_string, Market};

/// Discriminant of a [`MarketEvent`], used for handler routing and
/// replay-buffer filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A market account was decoded and normalized.
    MarketUpdated,
    /// The initial snapshot sync finished.
    SyncCompleted,
    /// A program subscription was lost after reconnect attempts ran out.
    SubscriptionLost,
}

impl EventKind {
    /// Snake-case name, matching the serialized `type` tag.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::MarketUpdated => "market_updated",
            EventKind::SyncCompleted => "sync_completed",
            EventKind::SubscriptionLost => "subscription_lost",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary payload of [`EventKind::SyncCompleted`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    /// Programs covered by the snapshot sync.
    pub programs: usize,
    /// Accounts normalized and dispatched.
    pub accounts_indexed: usize,
    /// Accounts dropped (no adapter, decode or normalize failure).
    pub accounts_dropped: usize,
    /// Wall-clock duration of the sync.
    pub elapsed_ms: u64,
}

/// Payload of [`EventKind::SubscriptionLost`].
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionLoss {
    /// Program whose subscription could not be re-established.
    #[serde(with = "pubkey_string")]
    pub program_id: Pubkey,
    /// Rendered cause of the final failure.
    pub reason: String,
}

/// Kind-tagged event payload.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum EventPayload {
    MarketUpdated(Box<Market>),
    SyncCompleted(SyncSummary),
    SubscriptionLost(SubscriptionLoss),
}

/// An event flowing through the dispatcher.
///
/// `timestamp` is assigned when the event is constructed; `slot` carries
/// chain ordering (0 on the snapshot-sync path). `signature` is set when
/// the update could be attributed to a transaction.
#[derive(Debug, Clone, Serialize)]
pub struct MarketEvent {
    #[serde(flatten)]
    pub payload: EventPayload,
    pub timestamp: DateTime<Utc>,
    pub slot: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl MarketEvent {
    /// Wraps a normalized market observed at `slot`.
    #[must_use]
    pub fn market_updated(market: Market, slot: u64) -> Self {
        Self {
            payload: EventPayload::MarketUpdated(Box::new(market)),
            timestamp: Utc::now(),
            slot,
            signature: None,
        }
    }

    /// Reports a finished snapshot sync.
    #[must_use]
    pub fn sync_completed(summary: SyncSummary) -> Self {
        Self {
            payload: EventPayload::SyncCompleted(summary),
            timestamp: Utc::now(),
            slot: 0,
            signature: None,
        }
    }

    /// Reports an exhausted reconnect loop for `program_id`.
    #[must_use]
    pub fn subscription_lost(program_id: Pubkey, reason: impl Into<String>) -> Self {
        Self {
            payload: EventPayload::SubscriptionLost(SubscriptionLoss {
                program_id,
                reason: reason.into(),
            }),
            timestamp: Utc::now(),
            slot: 0,
            signature: None,
        }
    }

    /// Attaches a transaction signature.
    #[must_use]
    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    /// The event's kind discriminant.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self.payload {
            EventPayload::MarketUpdated(_) => EventKind::MarketUpdated,
            EventPayload::SyncCompleted(_) => EventKind::SyncCompleted,
            EventPayload::SubscriptionLost(_) => EventKind::SubscriptionLost,
        }
    }

    /// The market payload, if this is a market update.
    #[must_use]
    pub fn market(&self) -> Option<&Market> {
        match &self.payload {
            EventPayload::MarketUpdated(market) => Some(market),
            _ => None,
        }
    }
}
