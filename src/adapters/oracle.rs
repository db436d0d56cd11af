//! Adapter for the weather oracle feed program.
//!
//! The oracle publishes one feed account per weather proposition. The
//! feed's `result` is already a probability for the "yes" side, so
//! normalization turns each feed into a binary market with Yes/No
//! outcomes and an aggregation-quality score in the metadata.

use std::collections::HashMap;

use chrono::Utc;
use serde_json::json;
use solana_sdk::pubkey::Pubkey;

use crate::adapters::{chain_timestamp, ProtocolAdapter};
use crate::codec::{
    account_discriminator, starts_with_discriminator, AccountDecoder, ByteReader, DecodeError,
    MultiDecoder, DISCRIMINATOR_LEN,
};
use crate::types::{Market, MarketStatus, Outcome, RawAccount};
use crate::utils::error::{IndexerError, Result};

/// Fixed width of the on-chain feed name field.
const FEED_NAME_LEN: usize = 32;

/// First-generation feed layout.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherFeedV1 {
    pub authority: Pubkey,
    pub name: String,
    /// Aggregated probability of the proposition, nominally in [0, 1].
    pub result: f64,
    pub std_deviation: f64,
    pub num_success: u32,
    pub num_error: u32,
    pub round_open_timestamp: i64,
    /// Unix seconds; 0 means no expiry.
    pub expires_at: i64,
    pub is_locked: bool,
}

/// Second-generation feed layout: v1 plus location, unit code, and an
/// optional resolution timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherFeedV2 {
    pub authority: Pubkey,
    pub name: String,
    pub location: String,
    pub unit: u8,
    pub result: f64,
    pub std_deviation: f64,
    pub num_success: u32,
    pub num_error: u32,
    pub round_open_timestamp: i64,
    pub expires_at: i64,
    pub is_locked: bool,
    pub resolved_at: Option<i64>,
}

/// Any feed layout the adapter understands.
#[derive(Debug, Clone, PartialEq)]
pub enum OracleFeed {
    V1(WeatherFeedV1),
    V2(WeatherFeedV2),
}

struct FeedV1Decoder {
    discriminator: [u8; 8],
}

impl FeedV1Decoder {
    fn new() -> Self {
        Self {
            discriminator: account_discriminator("WeatherFeedV1"),
        }
    }
}

impl AccountDecoder<OracleFeed> for FeedV1Decoder {
    fn account_type(&self) -> &'static str {
        "WeatherFeedV1"
    }

    fn decode(&self, data: &[u8]) -> std::result::Result<OracleFeed, DecodeError> {
        if !starts_with_discriminator(data, &self.discriminator) {
            return Err(DecodeError::LayoutMismatch {
                account_type: self.account_type(),
                reason: "discriminator mismatch".to_string(),
            });
        }
        let mut reader = ByteReader::new(&data[DISCRIMINATOR_LEN..]);
        Ok(OracleFeed::V1(WeatherFeedV1 {
            authority: reader.read_pubkey()?,
            name: reader.read_fixed_str(FEED_NAME_LEN)?,
            result: reader.read_f64()?,
            std_deviation: reader.read_f64()?,
            num_success: reader.read_u32()?,
            num_error: reader.read_u32()?,
            round_open_timestamp: reader.read_i64()?,
            expires_at: reader.read_i64()?,
            is_locked: reader.read_bool()?,
        }))
    }
}

struct FeedV2Decoder {
    discriminator: [u8; 8],
}

impl FeedV2Decoder {
    fn new() -> Self {
        Self {
            discriminator: account_discriminator("WeatherFeedV2"),
        }
    }
}

impl AccountDecoder<OracleFeed> for FeedV2Decoder {
    fn account_type(&self) -> &'static str {
        "WeatherFeedV2"
    }

    fn decode(&self, data: &[u8]) -> std::result::Result<OracleFeed, DecodeError> {
        if !starts_with_discriminator(data, &self.discriminator) {
            return Err(DecodeError::LayoutMismatch {
                account_type: self.account_type(),
                reason: "discriminator mismatch".to_string(),
            });
        }
        let mut reader = ByteReader::new(&data[DISCRIMINATOR_LEN..]);
        Ok(OracleFeed::V2(WeatherFeedV2 {
            authority: reader.read_pubkey()?,
            name: reader.read_fixed_str(FEED_NAME_LEN)?,
            location: reader.read_string()?,
            unit: reader.read_u8()?,
            result: reader.read_f64()?,
            std_deviation: reader.read_f64()?,
            num_success: reader.read_u32()?,
            num_error: reader.read_u32()?,
            round_open_timestamp: reader.read_i64()?,
            expires_at: reader.read_i64()?,
            is_locked: reader.read_bool()?,
            resolved_at: reader.read_option(ByteReader::read_i64)?,
        }))
    }
}

/// Version-independent view used by normalization.
struct FeedFields {
    authority: Pubkey,
    name: String,
    result: f64,
    std_deviation: f64,
    num_success: u32,
    num_error: u32,
    round_open_timestamp: i64,
    expires_at: i64,
    is_locked: bool,
    location: Option<String>,
    unit: Option<u8>,
    resolved_at: Option<i64>,
}

impl From<OracleFeed> for FeedFields {
    fn from(feed: OracleFeed) -> Self {
        match feed {
            OracleFeed::V1(v1) => Self {
                authority: v1.authority,
                name: v1.name,
                result: v1.result,
                std_deviation: v1.std_deviation,
                num_success: v1.num_success,
                num_error: v1.num_error,
                round_open_timestamp: v1.round_open_timestamp,
                expires_at: v1.expires_at,
                is_locked: v1.is_locked,
                location: None,
                unit: None,
                resolved_at: None,
            },
            OracleFeed::V2(v2) => Self {
                authority: v2.authority,
                name: v2.name,
                result: v2.result,
                std_deviation: v2.std_deviation,
                num_success: v2.num_success,
                num_error: v2.num_error,
                round_open_timestamp: v2.round_open_timestamp,
                expires_at: v2.expires_at,
                is_locked: v2.is_locked,
                location: Some(v2.location),
                unit: Some(v2.unit),
                resolved_at: v2.resolved_at,
            },
        }
    }
}

/// Normalizes weather oracle feeds into binary Yes/No markets.
pub struct OracleFeedAdapter {
    program_id: Pubkey,
    decoders: MultiDecoder<OracleFeed>,
}

impl OracleFeedAdapter {
    #[must_use]
    pub fn new(program_id: Pubkey) -> Self {
        Self {
            program_id,
            decoders: MultiDecoder::new()
                .with(FeedV1Decoder::new())
                .with(FeedV2Decoder::new()),
        }
    }

    /// Decodes raw account bytes into the matching feed layout.
    ///
    /// # Errors
    ///
    /// [`IndexerError::NoDecoderMatched`] when no feed layout accepts
    /// the bytes, whether from a foreign discriminator or a malformed
    /// buffer.
    pub fn decode_account(&self, data: &[u8]) -> Result<OracleFeed> {
        Ok(self.decoders.decode(data)?.account)
    }

    fn feed_to_market(&self, raw: &RawAccount, feed: FeedFields) -> Result<Market> {
        if feed.result.is_nan() {
            return Err(IndexerError::NormalizeError(format!(
                "oracle feed {} has NaN result",
                raw.address
            )));
        }
        let yes = feed.result.clamp(0.0, 1.0);

        let status = if feed.is_locked {
            MarketStatus::Paused
        } else {
            match chain_timestamp(feed.expires_at) {
                Some(expiry) if expiry <= Utc::now() => MarketStatus::Expired,
                _ => MarketStatus::Active,
            }
        };

        let rounds = feed.num_success.saturating_add(feed.num_error);
        let success_ratio = f64::from(feed.num_success) / f64::from(rounds.max(1));
        let stability = if feed.std_deviation.is_finite() {
            (1.0 - feed.std_deviation).max(0.0)
        } else {
            0.0
        };
        let confidence = (0.6 * success_ratio + 0.4 * stability).clamp(0.0, 1.0);

        let mut metadata = HashMap::new();
        metadata.insert("confidence".to_string(), json!(confidence));
        metadata.insert("std_deviation".to_string(), json!(feed.std_deviation));
        metadata.insert("rounds_success".to_string(), json!(feed.num_success));
        metadata.insert("rounds_error".to_string(), json!(feed.num_error));
        if let Some(location) = &feed.location {
            metadata.insert("location".to_string(), json!(location));
        }
        if let Some(unit) = feed.unit {
            metadata.insert("unit".to_string(), json!(unit));
        }

        Ok(Market {
            id: raw.address.to_string(),
            program_id: raw.program_id,
            address: raw.address,
            name: feed.name,
            description: String::new(),
            category: "weather".to_string(),
            status,
            outcomes: vec![
                Outcome {
                    id: "yes".to_string(),
                    name: "Yes".to_string(),
                    probability: yes,
                    volume: 0,
                    liquidity: 0,
                    last_price: None,
                },
                Outcome {
                    id: "no".to_string(),
                    name: "No".to_string(),
                    probability: 1.0 - yes,
                    volume: 0,
                    liquidity: 0,
                    last_price: None,
                },
            ],
            creator: Some(feed.authority),
            resolver: Some(feed.authority),
            resolution_source: Some(format!("oracle:{}", feed.authority)),
            created_at: chain_timestamp(feed.round_open_timestamp),
            expires_at: chain_timestamp(feed.expires_at),
            resolved_at: feed.resolved_at.and_then(chain_timestamp),
            winning_outcome_id: None,
            total_volume: 0,
            total_liquidity: 0,
            fee_bps: 0,
            metadata,
        })
    }
}

impl ProtocolAdapter for OracleFeedAdapter {
    fn program_id(&self) -> Pubkey {
        self.program_id
    }

    fn name(&self) -> &'static str {
        "oracle-feed"
    }

    fn normalize(&self, raw: &RawAccount) -> Result<Market> {
        let decoded = self.decoders.decode(&raw.data)?;
        self.feed_to_market(raw, FeedFields::from(decoded.account))
    }
}
