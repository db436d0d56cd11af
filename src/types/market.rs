//! The unified market data model every protocol adapter normalizes into.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;

/// Serde adapter rendering a [`Pubkey`] as a base58 string.
///
/// Keys stay fixed 32-byte arrays inside the pipeline; the string form
/// exists only at the JSON boundary.
pub mod pubkey_string {
    use std::str::FromStr;

    use serde::{Deserialize, Deserializer, Serializer};
    use solana_sdk::pubkey::Pubkey;

    pub fn serialize<S: Serializer>(pubkey: &Pubkey, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&pubkey.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Pubkey, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Pubkey::from_str(&raw).map_err(serde::de::Error::custom)
    }
}

/// [`pubkey_string`] for optional keys.
pub mod opt_pubkey_string {
    use std::str::FromStr;

    use serde::{Deserialize, Deserializer, Serializer};
    use solana_sdk::pubkey::Pubkey;

    pub fn serialize<S: Serializer>(
        pubkey: &Option<Pubkey>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match pubkey {
            Some(pk) => serializer.serialize_some(&pk.to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Pubkey>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        raw.map(|s| Pubkey::from_str(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

/// Lifecycle state of a market.
///
/// Transitions follow a monotone progression: once a market leaves the
/// tradeable states it never returns, and `Settled`/`Cancelled` are
/// terminal. [`MarketStatus::can_transition_to`] encodes the legal graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketStatus {
    /// Open for trading.
    Active,
    /// Temporarily locked (oracle round in flight, admin pause).
    Paused,
    /// Past its expiry timestamp, awaiting resolution.
    Expired,
    /// Resolved with a final outcome.
    Settled,
    /// Voided; stakes are refunded by the protocol.
    Cancelled,
}

impl MarketStatus {
    /// Whether a market observed in state `self` may legally be observed
    /// in state `next` afterwards. Observing the same state again is
    /// always legal.
    #[must_use]
    pub fn can_transition_to(self, next: MarketStatus) -> bool {
        use MarketStatus::{Active, Cancelled, Expired, Paused, Settled};
        if self == next {
            return true;
        }
        matches!(
            (self, next),
            (Active, Paused | Expired | Settled | Cancelled)
                | (Paused, Active | Cancelled | Expired)
                | (Expired, Settled | Cancelled)
        )
    }

    /// `Settled` and `Cancelled` accept no further transitions.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, MarketStatus::Settled | MarketStatus::Cancelled)
    }

    /// Lowercase name, matching the serialized form.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            MarketStatus::Active => "active",
            MarketStatus::Paused => "paused",
            MarketStatus::Expired => "expired",
            MarketStatus::Settled => "settled",
            MarketStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for MarketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One tradeable outcome of a market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    /// Identifier unique within the market (`"yes"`, `"no"`, or the pool
    /// index as a string for parimutuel markets).
    pub id: String,
    /// Display label.
    pub name: String,
    /// Implied probability, clamped to `[0, 1]` by the adapters.
    pub probability: f64,
    /// Cumulative stake on this outcome, in native units.
    pub volume: u64,
    /// Liquidity attributable to this outcome, in native units.
    pub liquidity: u64,
    /// Last effective price, `None` where undefined (empty pool).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_price: Option<f64>,
}

/// A normalized prediction market, protocol-independent.
///
/// Every adapter maps its decoded account layouts onto this shape;
/// downstream consumers never see protocol-specific structs. The
/// `metadata` map is the forward-compatibility boundary for fields the
/// unified model does not capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Market {
    /// Stable identifier, the base58 account address.
    pub id: String,
    /// Program that owns the market account.
    #[serde(with = "pubkey_string")]
    pub program_id: Pubkey,
    /// On-chain address of the market account.
    #[serde(with = "pubkey_string")]
    pub address: Pubkey,
    /// Human-readable market name.
    pub name: String,
    /// Longer description, possibly empty.
    pub description: String,
    /// Free-form category tag (`"weather"`, `"temperature"`, ...).
    pub category: String,
    /// Current lifecycle state.
    pub status: MarketStatus,
    /// Tradeable outcomes, at least two for a well-formed market.
    pub outcomes: Vec<Outcome>,
    /// Market creator, where the layout carries one.
    #[serde(with = "opt_pubkey_string", default)]
    pub creator: Option<Pubkey>,
    /// Authority allowed to resolve the market.
    #[serde(with = "opt_pubkey_string", default)]
    pub resolver: Option<Pubkey>,
    /// Where resolution data comes from (oracle feed, committee, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution_source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    /// Id of the winning [`Outcome`] once settled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winning_outcome_id: Option<String>,
    /// Total stake across all outcomes, in native units.
    pub total_volume: u64,
    /// Total liquidity, in native units.
    pub total_liquidity: u64,
    /// Protocol fee in basis points.
    pub fee_bps: u16,
    /// Protocol-specific extras that survive normalization.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Market {
    /// Looks up an outcome by id.
    #[must_use]
    pub fn outcome(&self, id: &str) -> Option<&Outcome> {
        self.outcomes.iter().find(|o| o.id == id)
    }

    /// The winning outcome, when resolved and present.
    #[must_use]
    pub fn winning_outcome(&self) -> Option<&Outcome> {
        self.winning_outcome_id
            .as_deref()
            .and_then(|id| self.outcome(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states_accept_nothing() {
        for next in [
            MarketStatus::Active,
            MarketStatus::Paused,
            MarketStatus::Expired,
            MarketStatus::Settled,
            MarketStatus::Cancelled,
        ] {
            if next != MarketStatus::Settled {
                assert!(!MarketStatus::Settled.can_transition_to(next));
            }
            if next != MarketStatus::Cancelled {
                assert!(!MarketStatus::Cancelled.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_active_transitions() {
        assert!(MarketStatus::Active.can_transition_to(MarketStatus::Paused));
        assert!(MarketStatus::Active.can_transition_to(MarketStatus::Expired));
        assert!(MarketStatus::Active.can_transition_to(MarketStatus::Settled));
        assert!(MarketStatus::Active.can_transition_to(MarketStatus::Cancelled));
    }

    #[test]
    fn test_paused_cannot_settle_directly() {
        assert!(MarketStatus::Paused.can_transition_to(MarketStatus::Active));
        assert!(MarketStatus::Paused.can_transition_to(MarketStatus::Expired));
        assert!(MarketStatus::Paused.can_transition_to(MarketStatus::Cancelled));
        assert!(!MarketStatus::Paused.can_transition_to(MarketStatus::Settled));
    }

    #[test]
    fn test_expired_resolves_or_cancels() {
        assert!(MarketStatus::Expired.can_transition_to(MarketStatus::Settled));
        assert!(MarketStatus::Expired.can_transition_to(MarketStatus::Cancelled));
        assert!(!MarketStatus::Expired.can_transition_to(MarketStatus::Active));
        assert!(!MarketStatus::Expired.can_transition_to(MarketStatus::Paused));
    }

    #[test]
    fn test_self_transition_is_legal() {
        assert!(MarketStatus::Settled.can_transition_to(MarketStatus::Settled));
        assert!(MarketStatus::Active.can_transition_to(MarketStatus::Active));
    }

    #[test]
    fn test_keys_serialize_as_base58() {
        let pk = Pubkey::new_unique();
        let market = Market {
            id: pk.to_string(),
            program_id: pk,
            address: pk,
            name: "NYC high above 90F on Jul 4".into(),
            description: String::new(),
            category: "weather".into(),
            status: MarketStatus::Active,
            outcomes: vec![],
            creator: Some(pk),
            resolver: None,
            resolution_source: None,
            created_at: None,
            expires_at: None,
            resolved_at: None,
            winning_outcome_id: None,
            total_volume: 0,
            total_liquidity: 0,
            fee_bps: 0,
            metadata: HashMap::new(),
        };

        let json = serde_json::to_value(&market).unwrap();
        assert_eq!(json["program_id"], serde_json::json!(pk.to_string()));
        assert_eq!(json["status"], serde_json::json!("active"));

        let back: Market = serde_json::from_value(json).unwrap();
        assert_eq!(back, market);
    }
}
