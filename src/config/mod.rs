//! Configuration for the market indexer.
//!
//! This module provides a flexible configuration system using the builder
//! pattern, allowing the indexer to be configured with type safety and
//! discoverability. `IndexerConfigBuilder::from_env` covers the common
//! deployment path where endpoints and program ids come from the
//! environment.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;

use crate::utils::error::{IndexerError, Result};

/// Default interval between RPC health probes, in seconds.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
/// Default number of accounts processed per snapshot-sync batch.
pub const DEFAULT_SYNC_BATCH_SIZE: usize = 100;

/// Commitment level used for RPC queries and subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CommitmentLevel {
    Processed,
    #[default]
    Confirmed,
    Finalized,
}

impl CommitmentLevel {
    /// The wire name used in JSON-RPC subscription parameters.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            CommitmentLevel::Processed => "processed",
            CommitmentLevel::Confirmed => "confirmed",
            CommitmentLevel::Finalized => "finalized",
        }
    }
}

impl From<CommitmentLevel> for solana_sdk::commitment_config::CommitmentConfig {
    fn from(level: CommitmentLevel) -> Self {
        match level {
            CommitmentLevel::Processed => {
                solana_sdk::commitment_config::CommitmentConfig::processed()
            }
            CommitmentLevel::Confirmed => {
                solana_sdk::commitment_config::CommitmentConfig::confirmed()
            }
            CommitmentLevel::Finalized => {
                solana_sdk::commitment_config::CommitmentConfig::finalized()
            }
        }
    }
}

/// Retry policy for RPC operations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts per endpoint before failover kicks in (default: 3).
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds (default: 1000).
    pub initial_backoff_ms: u64,
    /// Growth factor between retries (default: 2.0).
    pub backoff_multiplier: f64,
    /// Upper bound on any single delay, in milliseconds (default: 10000).
    pub max_backoff_ms: u64,
    /// Randomize delays by ±25 % to avoid thundering herds.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 1_000,
            backoff_multiplier: 2.0,
            max_backoff_ms: 10_000,
            jitter: false,
        }
    }
}

/// Reconnect policy for the WebSocket subscription transport.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Reconnect attempts before the subscription is declared lost
    /// (default: 10).
    pub max_attempts: u32,
    /// Delay before the first reconnect, in milliseconds (default: 1000).
    pub base_delay_ms: u64,
    /// Growth factor between attempts (default: 2.0).
    pub factor: f64,
    /// Upper bound on any single delay, in milliseconds (default: 30000).
    pub max_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay_ms: 1_000,
            factor: 2.0,
            max_delay_ms: 30_000,
        }
    }
}

/// Replay-buffer policy for the event dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// Maximum buffered events; the oldest are evicted past this
    /// (default: 1000).
    pub capacity: usize,
    /// Optional maximum event age in seconds; `None` disables the sweep.
    pub ttl_secs: Option<u64>,
    /// How often expired events are swept, in seconds (default: 60).
    pub sweep_interval_secs: u64,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            capacity: 1_000,
            ttl_secs: None,
            sweep_interval_secs: 60,
        }
    }
}

/// Configuration for the market indexer.
///
/// Use [`IndexerConfigBuilder`] to construct instances of this struct.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Ordered RPC endpoints; index 0 is primary, the rest are failover
    /// targets in order.
    pub rpc_endpoints: Vec<String>,

    /// WebSocket endpoint; derived from the primary RPC endpoint when
    /// unset (see [`IndexerConfig::ws_url`]).
    pub ws_url: Option<String>,

    /// Program ids whose accounts are indexed.
    pub program_ids: Vec<Pubkey>,

    /// Commitment level for queries and subscriptions (default: Confirmed).
    pub commitment: CommitmentLevel,

    /// Interval between health probes in seconds (default: 5).
    pub poll_interval_secs: u64,

    /// Accounts per snapshot-sync batch (default: 100).
    pub sync_batch_size: usize,

    /// RPC retry policy.
    pub retry: RetryConfig,

    /// WebSocket reconnect policy.
    pub reconnect: ReconnectConfig,

    /// Dispatcher replay-buffer policy.
    pub replay: ReplayConfig,
}

impl IndexerConfig {
    /// The primary RPC endpoint.
    #[must_use]
    pub fn primary_rpc_url(&self) -> &str {
        &self.rpc_endpoints[0]
    }

    /// The WebSocket endpoint, deriving one from the primary RPC endpoint
    /// by scheme swap (`https → wss`, `http → ws`) when none was set.
    #[must_use]
    pub fn ws_url(&self) -> String {
        if let Some(url) = &self.ws_url {
            return url.clone();
        }
        let primary = self.primary_rpc_url();
        if let Some(rest) = primary.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = primary.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            primary.to_string()
        }
    }
}

/// Builder for [`IndexerConfig`].
///
/// # Example
///
/// ```
/// use weathervane::IndexerConfigBuilder;
///
/// let config = IndexerConfigBuilder::new()
///     .with_rpc("https://api.mainnet-beta.solana.com")
///     .with_rpc("https://solana-rpc.publicnode.com")
///     .program_id("11111111111111111111111111111111")
///     .build()
///     .unwrap();
/// assert_eq!(config.primary_rpc_url(), "https://api.mainnet-beta.solana.com");
/// ```
#[derive(Debug, Default)]
pub struct IndexerConfigBuilder {
    rpc_endpoints: Vec<String>,
    ws_url: Option<String>,
    program_ids: Vec<String>,
    commitment: Option<CommitmentLevel>,
    poll_interval_secs: Option<u64>,
    sync_batch_size: Option<usize>,
    retry: Option<RetryConfig>,
    reconnect: Option<ReconnectConfig>,
    replay: Option<ReplayConfig>,
}

impl IndexerConfigBuilder {
    /// Creates a new configuration builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Populates the builder from the environment.
    ///
    /// Reads `RPC_URLS` (comma-separated, ordered), `WS_URL`,
    /// `PROGRAM_IDS` (comma-separated), `COMMITMENT`, and
    /// `POLL_INTERVAL_SECS`. Unset or unparsable variables leave the
    /// builder untouched; `build()` reports what is still missing.
    #[must_use]
    pub fn from_env() -> Self {
        let mut builder = Self::new();
        if let Ok(urls) = std::env::var("RPC_URLS") {
            builder.rpc_endpoints = urls
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Ok(url) = std::env::var("WS_URL") {
            builder.ws_url = Some(url);
        }
        if let Ok(ids) = std::env::var("PROGRAM_IDS") {
            builder.program_ids = ids
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Ok(level) = std::env::var("COMMITMENT") {
            builder.commitment = match level.to_lowercase().as_str() {
                "processed" => Some(CommitmentLevel::Processed),
                "confirmed" => Some(CommitmentLevel::Confirmed),
                "finalized" => Some(CommitmentLevel::Finalized),
                _ => None,
            };
        }
        if let Ok(secs) = std::env::var("POLL_INTERVAL_SECS") {
            builder.poll_interval_secs = secs.parse().ok();
        }
        builder
    }

    /// Appends an RPC endpoint; the first call sets the primary, later
    /// calls add failover targets in order.
    ///
    /// # Example
    ///
    /// ```
    /// # use weathervane::IndexerConfigBuilder;
    /// let builder = IndexerConfigBuilder::new()
    ///     .with_rpc("https://api.mainnet-beta.solana.com")
    ///     .with_rpc("https://solana-rpc.publicnode.com");
    /// ```
    #[must_use]
    pub fn with_rpc(mut self, url: impl Into<String>) -> Self {
        self.rpc_endpoints.push(url.into());
        self
    }

    /// Replaces the endpoint list wholesale, preserving the given order.
    #[must_use]
    pub fn rpc_endpoints(mut self, urls: Vec<impl Into<String>>) -> Self {
        self.rpc_endpoints = urls.into_iter().map(Into::into).collect();
        self
    }

    /// Sets an explicit WebSocket endpoint.
    #[must_use]
    pub fn with_ws(mut self, url: impl Into<String>) -> Self {
        self.ws_url = Some(url.into());
        self
    }

    /// Adds a program id to index.
    ///
    /// # Arguments
    ///
    /// * `id` - The program id as a base58 string (parsed in `build()`)
    #[must_use]
    pub fn program_id(mut self, id: impl Into<String>) -> Self {
        self.program_ids.push(id.into());
        self
    }

    /// Sets all program ids to index.
    #[must_use]
    pub fn program_ids(mut self, ids: Vec<impl Into<String>>) -> Self {
        self.program_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the commitment level (default: Confirmed).
    #[must_use]
    pub fn with_commitment(mut self, level: CommitmentLevel) -> Self {
        self.commitment = Some(level);
        self
    }

    /// Sets the health-poll interval in seconds (default: 5).
    #[must_use]
    pub fn with_poll_interval(mut self, secs: u64) -> Self {
        self.poll_interval_secs = Some(secs);
        self
    }

    /// Sets the snapshot-sync batch size (default: 100).
    #[must_use]
    pub fn with_sync_batch_size(mut self, size: usize) -> Self {
        self.sync_batch_size = Some(size);
        self
    }

    /// Overrides the RPC retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Overrides the WebSocket reconnect policy.
    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = Some(reconnect);
        self
    }

    /// Overrides the dispatcher replay-buffer policy.
    #[must_use]
    pub fn with_replay(mut self, replay: ReplayConfig) -> Self {
        self.replay = Some(replay);
        self
    }

    /// Build the configuration.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if no RPC endpoint is set, an endpoint is
    /// not http(s), no program id is set, a program id fails to parse,
    /// or the batch size is zero.
    pub fn build(self) -> Result<IndexerConfig> {
        if self.rpc_endpoints.is_empty() {
            return Err(IndexerError::ConfigError(
                "At least one RPC endpoint is required. Use .with_rpc()".to_string(),
            ));
        }
        for url in &self.rpc_endpoints {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(IndexerError::ConfigError(format!(
                    "RPC endpoint '{url}' must be http:// or https://"
                )));
            }
        }

        if self.program_ids.is_empty() {
            return Err(IndexerError::ConfigError(
                "At least one program id is required. Use .program_id()".to_string(),
            ));
        }
        let program_ids = self
            .program_ids
            .into_iter()
            .map(|s| {
                Pubkey::from_str(&s).map_err(|e| {
                    IndexerError::ConfigError(format!("Invalid program id '{s}': {e}"))
                })
            })
            .collect::<Result<Vec<Pubkey>>>()?;

        let sync_batch_size = self.sync_batch_size.unwrap_or(DEFAULT_SYNC_BATCH_SIZE);
        if sync_batch_size == 0 {
            return Err(IndexerError::ConfigError(
                "Sync batch size must be at least 1".to_string(),
            ));
        }

        Ok(IndexerConfig {
            rpc_endpoints: self.rpc_endpoints,
            ws_url: self.ws_url,
            program_ids,
            commitment: self.commitment.unwrap_or_default(),
            poll_interval_secs: self.poll_interval_secs.unwrap_or(DEFAULT_POLL_INTERVAL_SECS),
            sync_batch_size,
            retry: self.retry.unwrap_or_default(),
            reconnect: self.reconnect.unwrap_or_default(),
            replay: self.replay.unwrap_or_default(),
        })
    }
}
