//! `Weathervane` - an on-chain account indexer for weather prediction markets.
//!
//! `Weathervane` watches Solana programs that publish weather prediction
//! markets, decodes their accounts into a protocol-independent market model,
//! and fans the resulting events out to application handlers. It speaks two
//! on-chain protocols out of the box (oracle feeds and parimutuel pools) and
//! accepts custom adapters for anything else.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use solana_sdk::pubkey::Pubkey;
//! use weathervane::{
//!     AdapterRegistry, EventDispatcher, EventKind, IndexerConfigBuilder, MarketIndexer,
//!     OracleFeedAdapter,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     dotenvy::dotenv().ok();
//!
//!     let oracle_program: Pubkey = std::env::var("ORACLE_PROGRAM_ID")?.parse()?;
//!
//!     let config = IndexerConfigBuilder::new()
//!         .with_rpc(std::env::var("RPC_URL")?)
//!         .program_id(oracle_program.to_string())
//!         .build()?;
//!
//!     let registry = Arc::new(AdapterRegistry::new());
//!     registry.register(Arc::new(OracleFeedAdapter::new(oracle_program)));
//!
//!     let dispatcher = Arc::new(EventDispatcher::new(config.replay));
//!     dispatcher.on_fn(EventKind::MarketUpdated, |event| async move {
//!         if let Some(market) = event.market() {
//!             println!("{} is now {}", market.name, market.status);
//!         }
//!         Ok(())
//!     });
//!
//!     let indexer = MarketIndexer::new(config, registry, dispatcher);
//!     indexer.start().await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     indexer.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! `Weathervane` operates on an event-driven pipeline:
//!
//! 1. **`FailoverRpcClient`** - Fetches program accounts with retry and
//!    endpoint failover
//! 2. **`SubscriptionManager`** - Streams live account updates over
//!    WebSocket, reconnecting and re-subscribing on drops
//! 3. **`AdapterRegistry`** - Routes each account to the adapter for its
//!    owner program
//! 4. **`ProtocolAdapter`** - Decodes raw account bytes and normalizes them
//!    into [`Market`] values
//! 5. **`EventDispatcher`** - Delivers [`MarketEvent`]s to handlers in
//!    order, with a bounded replay buffer for late subscribers
//!
//! # Features
//!
//! - **Unified Market Model**: One schema across oracle and parimutuel
//!   protocols
//! - **Multi-Program Support**: Index any number of programs simultaneously
//! - **Versioned Decoding**: Discriminator-dispatched account layouts per
//!   adapter
//! - **Resilience**: RPC retry with failover, WebSocket reconnect with
//!   automatic re-subscription
//! - **Ordered Delivery**: Handlers observe events in dispatch order
//!
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

// Public API exports
pub use adapters::{OracleFeedAdapter, ParimutuelAdapter, ProtocolAdapter};
pub use codec::{
    account_discriminator, AccountDecoder, ByteReader, DecodeError, Decoded, MultiDecoder,
    DISCRIMINATOR_LEN,
};
pub use config::{
    CommitmentLevel, IndexerConfig, IndexerConfigBuilder, ReconnectConfig, ReplayConfig,
    RetryConfig,
};
pub use crate::core::{
    AdapterRegistry, FailoverRpcClient, HealthStatus, IndexerState, IndexerStatus, MarketIndexer,
};
pub use dispatch::{DispatchMetrics, EventDispatcher, EventHandler, HandlerId};
pub use streams::{ConnectionState, SubscriptionId, SubscriptionManager, SubscriptionTarget};
pub use telemetry::{init_telemetry, TelemetryConfig, TelemetryGuard};
pub use types::{
    EventKind, EventPayload, Market, MarketEvent, MarketStatus, Outcome, RawAccount,
    SubscriptionLoss, SyncSummary,
};
pub use utils::error::{IndexerError, Result};

// Module declarations
pub mod adapters;
pub mod codec;
pub mod config;
pub mod core;
pub mod dispatch;
pub mod streams;
pub mod telemetry;
pub mod types;
pub mod utils;
