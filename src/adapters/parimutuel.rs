//! Adapter for the parimutuel pool-market program.
//!
//! Each account is one market whose outcomes are backed by stake pools.
//! Implied probability is an outcome's share of the total pool, and the
//! implied price folds the protocol fee into the parimutuel odds.

use std::collections::HashMap;

use solana_sdk::pubkey::Pubkey;

use crate::adapters::{chain_timestamp, ProtocolAdapter};
use crate::codec::{
    account_discriminator, starts_with_discriminator, AccountDecoder, ByteReader, DecodeError,
    MultiDecoder, DISCRIMINATOR_LEN,
};
use crate::types::{Market, MarketStatus, Outcome, RawAccount};
use crate::utils::error::{IndexerError, Result};

/// Sentinel in the `winning_outcome` byte for "not settled yet".
const WINNER_NONE: u8 = 255;

/// Fee denominator: `fee_bps` is in basis points.
const FEE_DENOMINATOR: u16 = 10_000;

/// One stake pool backing an outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolOutcome {
    pub label: String,
    /// Total stake on this outcome, in native units.
    pub pool: u64,
}

/// On-chain pool market layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolMarketV1 {
    pub creator: Pubkey,
    pub resolver: Pubkey,
    pub name: String,
    pub category: String,
    pub state_code: u8,
    pub fee_bps: u16,
    pub created_at: i64,
    pub expires_at: i64,
    /// Unix seconds; 0 until resolved.
    pub resolved_at: i64,
    /// Index of the winning outcome, or [`WINNER_NONE`].
    pub winning_outcome: u8,
    pub outcomes: Vec<PoolOutcome>,
}

struct PoolMarketDecoder {
    discriminator: [u8; 8],
}

impl PoolMarketDecoder {
    fn new() -> Self {
        Self {
            discriminator: account_discriminator("PoolMarketV1"),
        }
    }
}

impl AccountDecoder<PoolMarketV1> for PoolMarketDecoder {
    fn account_type(&self) -> &'static str {
        "PoolMarketV1"
    }

    fn decode(&self, data: &[u8]) -> std::result::Result<PoolMarketV1, DecodeError> {
        if !starts_with_discriminator(data, &self.discriminator) {
            return Err(DecodeError::LayoutMismatch {
                account_type: self.account_type(),
                reason: "discriminator mismatch".to_string(),
            });
        }
        let mut reader = ByteReader::new(&data[DISCRIMINATOR_LEN..]);
        Ok(PoolMarketV1 {
            creator: reader.read_pubkey()?,
            resolver: reader.read_pubkey()?,
            name: reader.read_string()?,
            category: reader.read_string()?,
            state_code: reader.read_u8()?,
            fee_bps: reader.read_u16()?,
            created_at: reader.read_i64()?,
            expires_at: reader.read_i64()?,
            resolved_at: reader.read_i64()?,
            winning_outcome: reader.read_u8()?,
            outcomes: reader.read_vec(|r| {
                Ok(PoolOutcome {
                    label: r.read_string()?,
                    pool: r.read_u64()?,
                })
            })?,
        })
    }
}

fn status_from_code(code: u8) -> Option<MarketStatus> {
    match code {
        0 => Some(MarketStatus::Active),
        1 => Some(MarketStatus::Paused),
        2 => Some(MarketStatus::Settled),
        3 => Some(MarketStatus::Cancelled),
        _ => None,
    }
}

/// Normalizes parimutuel pool markets.
pub struct ParimutuelAdapter {
    program_id: Pubkey,
    decoders: MultiDecoder<PoolMarketV1>,
}

impl ParimutuelAdapter {
    #[must_use]
    pub fn new(program_id: Pubkey) -> Self {
        Self {
            program_id,
            decoders: MultiDecoder::new().with(PoolMarketDecoder::new()),
        }
    }

    /// Decodes raw account bytes into the pool market layout.
    ///
    /// # Errors
    ///
    /// [`IndexerError::NoDecoderMatched`] when the layout does not
    /// accept the bytes, whether from a foreign discriminator or a
    /// malformed buffer.
    pub fn decode_account(&self, data: &[u8]) -> Result<PoolMarketV1> {
        Ok(self.decoders.decode(data)?.account)
    }

    fn pool_to_market(&self, raw: &RawAccount, pool: PoolMarketV1) -> Result<Market> {
        let status = status_from_code(pool.state_code).ok_or_else(|| {
            IndexerError::NormalizeError(format!(
                "pool market {} has unknown state code {}",
                raw.address, pool.state_code
            ))
        })?;

        if pool.outcomes.is_empty() {
            return Err(IndexerError::NormalizeError(format!(
                "pool market {} has no outcomes",
                raw.address
            )));
        }

        let total = pool
            .outcomes
            .iter()
            .try_fold(0u64, |acc, o| acc.checked_add(o.pool))
            .ok_or_else(|| {
                IndexerError::NormalizeError(format!(
                    "pool market {} total stake overflows",
                    raw.address
                ))
            })?;

        let winning_outcome_id = if pool.winning_outcome == WINNER_NONE {
            None
        } else {
            let index = usize::from(pool.winning_outcome);
            if index >= pool.outcomes.len() {
                return Err(IndexerError::NormalizeError(format!(
                    "pool market {} winning outcome {} out of range ({} outcomes)",
                    raw.address,
                    pool.winning_outcome,
                    pool.outcomes.len()
                )));
            }
            Some(index.to_string())
        };

        let even_split = 1.0 / pool.outcomes.len() as f64;
        let fee_factor = 1.0 - f64::from(pool.fee_bps) / f64::from(FEE_DENOMINATOR);
        let outcomes = pool
            .outcomes
            .iter()
            .enumerate()
            .map(|(index, outcome)| {
                let probability = if total == 0 {
                    even_split
                } else {
                    outcome.pool as f64 / total as f64
                };
                // Implied price is the stake share adjusted for the fee
                // the protocol takes off the pot.
                let last_price = (total > 0 && outcome.pool > 0 && pool.fee_bps < FEE_DENOMINATOR)
                    .then(|| outcome.pool as f64 / (total as f64 * fee_factor));
                Outcome {
                    id: index.to_string(),
                    name: outcome.label.clone(),
                    probability,
                    volume: outcome.pool,
                    liquidity: outcome.pool,
                    last_price,
                }
            })
            .collect();

        Ok(Market {
            id: raw.address.to_string(),
            program_id: raw.program_id,
            address: raw.address,
            name: pool.name,
            description: String::new(),
            category: pool.category,
            status,
            outcomes,
            creator: Some(pool.creator),
            resolver: Some(pool.resolver),
            resolution_source: None,
            created_at: chain_timestamp(pool.created_at),
            expires_at: chain_timestamp(pool.expires_at),
            resolved_at: chain_timestamp(pool.resolved_at),
            winning_outcome_id,
            total_volume: total,
            total_liquidity: total,
            fee_bps: pool.fee_bps,
            metadata: HashMap::new(),
        })
    }
}

impl ProtocolAdapter for ParimutuelAdapter {
    fn program_id(&self) -> Pubkey {
        self.program_id
    }

    fn name(&self) -> &'static str {
        "parimutuel"
    }

    fn normalize(&self, raw: &RawAccount) -> Result<Market> {
        let decoded = self.decoders.decode(&raw.data)?;
        self.pool_to_market(raw, decoded.account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_string(data: &mut Vec<u8>, s: &str) {
        data.extend_from_slice(&(s.len() as u32).to_le_bytes());
        data.extend_from_slice(s.as_bytes());
    }

    fn pool_bytes(
        creator: &Pubkey,
        resolver: &Pubkey,
        state_code: u8,
        fee_bps: u16,
        winning: u8,
        pools: &[(&str, u64)],
    ) -> Vec<u8> {
        let mut data = account_discriminator("PoolMarketV1").to_vec();
        data.extend_from_slice(creator.as_ref());
        data.extend_from_slice(resolver.as_ref());
        push_string(&mut data, "SEA >2in rain in Nov");
        push_string(&mut data, "precipitation");
        data.push(state_code);
        data.extend_from_slice(&fee_bps.to_le_bytes());
        data.extend_from_slice(&1_700_000_000i64.to_le_bytes());
        data.extend_from_slice(&1_760_000_000i64.to_le_bytes());
        data.extend_from_slice(&0i64.to_le_bytes());
        data.push(winning);
        data.extend_from_slice(&(pools.len() as u32).to_le_bytes());
        for (label, pool) in pools {
            push_string(&mut data, label);
            data.extend_from_slice(&pool.to_le_bytes());
        }
        data
    }

    fn raw(adapter: &ParimutuelAdapter, data: Vec<u8>) -> RawAccount {
        RawAccount {
            program_id: adapter.program_id(),
            address: Pubkey::new_unique(),
            data,
            slot: 77,
        }
    }

    #[test]
    fn test_decode_round_trip() {
        let creator = Pubkey::new_unique();
        let resolver = Pubkey::new_unique();
        let adapter = ParimutuelAdapter::new(Pubkey::new_unique());
        let data = pool_bytes(
            &creator,
            &resolver,
            0,
            250,
            WINNER_NONE,
            &[("Yes", 100), ("No", 300)],
        );

        let pool = adapter.decode_account(&data).unwrap();
        assert_eq!(pool.creator, creator);
        assert_eq!(pool.resolver, resolver);
        assert_eq!(pool.name, "SEA >2in rain in Nov");
        assert_eq!(pool.category, "precipitation");
        assert_eq!(pool.fee_bps, 250);
        assert_eq!(pool.outcomes.len(), 2);
        assert_eq!(pool.outcomes[1].pool, 300);
    }

    #[test]
    fn test_pool_shares_become_probabilities() {
        let adapter = ParimutuelAdapter::new(Pubkey::new_unique());
        let data = pool_bytes(
            &Pubkey::new_unique(),
            &Pubkey::new_unique(),
            0,
            0,
            WINNER_NONE,
            &[("Yes", 100), ("No", 300)],
        );

        let market = adapter.normalize(&raw(&adapter, data)).unwrap();
        assert!((market.outcomes[0].probability - 0.25).abs() < 1e-9);
        assert!((market.outcomes[1].probability - 0.75).abs() < 1e-9);
        assert_eq!(market.total_volume, 400);
        assert_eq!(market.total_liquidity, 400);
        assert_eq!(market.outcomes[0].id, "0");
        assert_eq!(market.outcomes[0].volume, 100);
    }

    #[test]
    fn test_zero_pools_split_evenly() {
        let adapter = ParimutuelAdapter::new(Pubkey::new_unique());
        let data = pool_bytes(
            &Pubkey::new_unique(),
            &Pubkey::new_unique(),
            0,
            100,
            WINNER_NONE,
            &[("Yes", 0), ("No", 0)],
        );

        let market = adapter.normalize(&raw(&adapter, data)).unwrap();
        assert!((market.outcomes[0].probability - 0.5).abs() < f64::EPSILON);
        assert!((market.outcomes[1].probability - 0.5).abs() < f64::EPSILON);
        // No stake means no price signal.
        assert_eq!(market.outcomes[0].last_price, None);
        assert_eq!(market.total_volume, 0);
    }

    #[test]
    fn test_fee_adjusted_price() {
        let adapter = ParimutuelAdapter::new(Pubkey::new_unique());
        // 1% fee: price_0 = 100 / (400 * 0.99)
        let data = pool_bytes(
            &Pubkey::new_unique(),
            &Pubkey::new_unique(),
            0,
            100,
            WINNER_NONE,
            &[("Yes", 100), ("No", 300)],
        );

        let market = adapter.normalize(&raw(&adapter, data)).unwrap();
        let price = market.outcomes[0].last_price.unwrap();
        assert!((price - 100.0 / 396.0).abs() < 1e-9);
    }

    #[test]
    fn test_confiscatory_fee_suppresses_price() {
        let adapter = ParimutuelAdapter::new(Pubkey::new_unique());
        let data = pool_bytes(
            &Pubkey::new_unique(),
            &Pubkey::new_unique(),
            0,
            10_000,
            WINNER_NONE,
            &[("Yes", 100), ("No", 300)],
        );

        let market = adapter.normalize(&raw(&adapter, data)).unwrap();
        assert_eq!(market.outcomes[0].last_price, None);
        assert_eq!(market.outcomes[1].last_price, None);
        // Probabilities are fee-independent.
        assert!((market.outcomes[1].probability - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_winner_sentinel_means_unsettled() {
        let adapter = ParimutuelAdapter::new(Pubkey::new_unique());
        let data = pool_bytes(
            &Pubkey::new_unique(),
            &Pubkey::new_unique(),
            2,
            0,
            WINNER_NONE,
            &[("Yes", 100), ("No", 300)],
        );

        let market = adapter.normalize(&raw(&adapter, data)).unwrap();
        assert_eq!(market.status, MarketStatus::Settled);
        assert_eq!(market.winning_outcome_id, None);
    }

    #[test]
    fn test_winner_index_maps_to_outcome_id() {
        let adapter = ParimutuelAdapter::new(Pubkey::new_unique());
        let data = pool_bytes(
            &Pubkey::new_unique(),
            &Pubkey::new_unique(),
            2,
            0,
            1,
            &[("Yes", 100), ("No", 300)],
        );

        let market = adapter.normalize(&raw(&adapter, data)).unwrap();
        assert_eq!(market.winning_outcome_id.as_deref(), Some("1"));
        assert_eq!(market.winning_outcome().unwrap().name, "No");
    }

    #[test]
    fn test_winner_out_of_range_is_error() {
        let adapter = ParimutuelAdapter::new(Pubkey::new_unique());
        let data = pool_bytes(
            &Pubkey::new_unique(),
            &Pubkey::new_unique(),
            2,
            0,
            7,
            &[("Yes", 100), ("No", 300)],
        );
        assert!(matches!(
            adapter.normalize(&raw(&adapter, data)),
            Err(IndexerError::NormalizeError(_))
        ));
    }

    #[test]
    fn test_unknown_state_code_is_error() {
        let adapter = ParimutuelAdapter::new(Pubkey::new_unique());
        let data = pool_bytes(
            &Pubkey::new_unique(),
            &Pubkey::new_unique(),
            9,
            0,
            WINNER_NONE,
            &[("Yes", 100)],
        );
        assert!(matches!(
            adapter.normalize(&raw(&adapter, data)),
            Err(IndexerError::NormalizeError(_))
        ));
    }

    #[test]
    fn test_empty_outcomes_is_error() {
        let adapter = ParimutuelAdapter::new(Pubkey::new_unique());
        let data = pool_bytes(
            &Pubkey::new_unique(),
            &Pubkey::new_unique(),
            0,
            0,
            WINNER_NONE,
            &[],
        );
        assert!(matches!(
            adapter.normalize(&raw(&adapter, data)),
            Err(IndexerError::NormalizeError(_))
        ));
    }

    #[test]
    fn test_truncated_buffer_fails_decode() {
        let adapter = ParimutuelAdapter::new(Pubkey::new_unique());
        let mut data = pool_bytes(
            &Pubkey::new_unique(),
            &Pubkey::new_unique(),
            0,
            0,
            WINNER_NONE,
            &[("Yes", 100), ("No", 300)],
        );
        data.truncate(data.len() - 4);

        // A matching tag on a short buffer must not claim the account.
        assert!(!PoolMarketDecoder::new().validate(&data));
        assert!(matches!(
            PoolMarketDecoder::new().decode(&data),
            Err(DecodeError::BufferTooShort { .. })
        ));
        assert!(matches!(
            adapter.decode_account(&data),
            Err(IndexerError::NoDecoderMatched { .. })
        ));
    }

    #[test]
    fn test_resolved_timestamp_zero_is_unset() {
        let adapter = ParimutuelAdapter::new(Pubkey::new_unique());
        let data = pool_bytes(
            &Pubkey::new_unique(),
            &Pubkey::new_unique(),
            0,
            0,
            WINNER_NONE,
            &[("Yes", 1), ("No", 1)],
        );

        let market = adapter.normalize(&raw(&adapter, data)).unwrap();
        assert_eq!(market.resolved_at, None);
        assert_eq!(market.created_at.unwrap().timestamp(), 1_700_000_000);
    }
}
