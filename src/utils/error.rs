//! Error types for indexer operations.
//!
//! This module defines a single error enumeration using `thiserror`
//! covering every failure mode of the pipeline, from configuration
//! problems to RPC transport failures and account decoding errors.
//! None of these categories is allowed to terminate the process; the
//! orchestrator drops, retries, or reports depending on the variant.

use thiserror::Error;

use crate::codec::DecodeError;

/// Custom error type for indexer operations.
///
/// Recoverable per-account failures (`DecodingError`, `NoDecoderMatched`,
/// `NormalizeError`, `UnrecognizedProgram`) drop the offending account only.
/// Transport-level failures (`RpcError`, `RpcClientError`, `ConnectionError`)
/// are candidates for retry and failover; `RpcExhausted` and
/// `SubscriptionFatal` mark the end of those loops.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// Errors raised while decoding raw account bytes.
    ///
    /// Automatically wraps [`DecodeError`] via `#[from]`, so codec
    /// failures propagate with the `?` operator.
    #[error("Decoding error: {0}")]
    DecodingError(#[from] DecodeError),

    /// No registered decoder recognized the account data.
    ///
    /// Carries the hex-encoded 8-byte discriminator for diagnostics.
    #[error("No decoder matched account data (discriminator {discriminator})")]
    NoDecoderMatched {
        /// Hex encoding of the leading discriminator bytes.
        discriminator: String,
    },

    /// No protocol adapter is registered for the owning program.
    #[error("No adapter registered for program {0}")]
    UnrecognizedProgram(solana_sdk::pubkey::Pubkey),

    /// Errors interacting with the Solana RPC.
    ///
    /// This covers network failures, timeout errors, or unexpected responses
    /// from the Solana RPC endpoint.
    #[error("RPC error: {0}")]
    RpcError(String),

    /// Errors from the Solana RPC client.
    #[error("RPC client error: {0}")]
    RpcClientError(Box<solana_client::client_error::ClientError>),

    /// Every configured endpoint failed for a retryable operation.
    ///
    /// Contains the number of attempts made and the last error message.
    #[error("RPC endpoints exhausted after {attempts} attempts: {last_error}")]
    RpcExhausted {
        /// Total number of attempts (initial call + retries + failover retry).
        attempts: u32,
        /// String representation of the last error.
        last_error: String,
    },

    /// The WebSocket reconnect loop ran out of attempts.
    #[error("Subscription reconnect failed after {attempts} attempts: {last_error}")]
    SubscriptionFatal {
        /// Number of reconnect attempts made.
        attempts: u32,
        /// String representation of the last transport error.
        last_error: String,
    },

    /// Connection error (WebSocket transport failure).
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// An adapter failed to map a decoded account onto the market model.
    #[error("Normalization error: {0}")]
    NormalizeError(String),

    /// Errors related to configuration.
    ///
    /// This includes missing environment variables, invalid configuration
    /// values, or failures in parsing configuration data.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Errors from environment variable operations.
    #[error("Environment variable error: {0}")]
    EnvVarError(#[from] std::env::VarError),

    /// Errors during Solana public key parsing.
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(#[from] solana_sdk::pubkey::ParsePubkeyError),

    /// A subscriber's event handler returned an error.
    ///
    /// Handler errors are logged and counted by the dispatcher; they never
    /// propagate to sibling handlers or to the producer.
    #[error("Handler error: {0}")]
    HandlerError(String),

    /// Generic errors for operations that don't fit other categories.
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Type alias for Results using `IndexerError`.
///
/// This provides a convenient shorthand for functions that return
/// `Result<T, IndexerError>`.
pub type Result<T> = std::result::Result<T, IndexerError>;

impl From<solana_client::client_error::ClientError> for IndexerError {
    fn from(err: solana_client::client_error::ClientError) -> Self {
        IndexerError::RpcClientError(Box::new(err))
    }
}
