//! Protocol adapters: program-specific account layouts to [`Market`].
//!
//! An adapter owns the knowledge of one on-chain program: which account
//! layouts it writes and how those map onto the unified market model.
//! The indexer stays protocol-agnostic and routes each raw account to
//! the adapter registered for its owning program.

pub mod oracle;
pub mod parimutuel;

use chrono::{DateTime, Utc};
use solana_sdk::pubkey::Pubkey;

use crate::types::{Market, RawAccount};
use crate::utils::error::Result;

pub use oracle::OracleFeedAdapter;
pub use parimutuel::ParimutuelAdapter;

/// Normalizes one program's accounts into the unified market model.
///
/// `normalize` must be pure aside from logging: same bytes in, same
/// market out. Failures are per-account; the pipeline drops the account
/// and moves on.
pub trait ProtocolAdapter: Send + Sync {
    /// The program whose accounts this adapter understands.
    fn program_id(&self) -> Pubkey;

    /// Short protocol name for logs.
    fn name(&self) -> &'static str;

    /// Decodes and maps a raw account into a [`Market`].
    ///
    /// # Errors
    ///
    /// [`crate::IndexerError::DecodingError`] when no layout matches or
    /// the bytes are malformed, [`crate::IndexerError::NormalizeError`]
    /// when decoded values cannot be mapped (unknown state code, winner
    /// index out of range).
    fn normalize(&self, raw: &RawAccount) -> Result<Market>;
}

/// Maps an on-chain seconds timestamp to a UTC instant. Zero and
/// negative values mean "unset" in every layout handled here.
pub(crate) fn chain_timestamp(secs: i64) -> Option<DateTime<Utc>> {
    if secs > 0 {
        DateTime::from_timestamp(secs, 0)
    } else {
        None
    }
}
