pub mod error;
pub mod logging;
pub mod retry;
pub mod rpc;

pub use error::{IndexerError, Result};
pub use retry::{compute_backoff, is_retryable, reconnect_backoff};
pub use rpc::{HttpRpcApi, RpcApi};
