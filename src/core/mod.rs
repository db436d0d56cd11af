//! Core indexing machinery: RPC failover, adapter registry, and the
//! indexer orchestrator.

pub mod indexer;
pub mod registry;
pub mod rpc;

pub use indexer::{HealthStatus, IndexerState, IndexerStatus, MarketIndexer};
pub use registry::AdapterRegistry;
pub use rpc::FailoverRpcClient;
