//! RPC provider abstraction over the Solana JSON-RPC HTTP API.
//!
//! [`RpcApi`] is the seam between the indexer and the network: the
//! production implementation ([`HttpRpcApi`]) wraps the nonblocking
//! [`RpcClient`], while tests substitute mock providers. Endpoint
//! ordering, retries, and failover live one level up in
//! [`crate::core::rpc::FailoverRpcClient`].

use async_trait::async_trait;
use solana_account_decoder::UiAccountEncoding;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::{RpcAccountInfoConfig, RpcProgramAccountsConfig};
use solana_sdk::{account::Account, commitment_config::CommitmentConfig, pubkey::Pubkey};

use crate::utils::error::Result;

/// Minimal account-oriented view of the Solana RPC API.
///
/// Only the calls the indexing pipeline needs: program-account snapshots,
/// point lookups, and a slot probe for liveness checks.
#[async_trait]
pub trait RpcApi: Send + Sync {
    /// Fetches every account owned by `program_id` together with its address.
    async fn get_program_accounts(&self, program_id: &Pubkey) -> Result<Vec<(Pubkey, Account)>>;

    /// Fetches a single account, `None` if it does not exist.
    async fn get_account(&self, address: &Pubkey) -> Result<Option<Account>>;

    /// Fetches a batch of accounts in one call, position-aligned with `addresses`.
    async fn get_multiple_accounts(&self, addresses: &[Pubkey]) -> Result<Vec<Option<Account>>>;

    /// Returns the current slot. Used as the liveness probe during failover
    /// and by the health poll.
    async fn get_slot(&self) -> Result<u64>;

    /// The endpoint URL this provider talks to, for logs and status.
    fn endpoint(&self) -> &str;
}

/// Production [`RpcApi`] on top of the nonblocking [`RpcClient`].
pub struct HttpRpcApi {
    client: RpcClient,
    endpoint: String,
    commitment: CommitmentConfig,
}

impl HttpRpcApi {
    /// Creates a provider for `endpoint` pinned to `commitment`.
    pub fn new(endpoint: &str, commitment: CommitmentConfig) -> Self {
        Self {
            client: RpcClient::new_with_commitment(endpoint.to_string(), commitment),
            endpoint: endpoint.to_string(),
            commitment,
        }
    }
}

#[async_trait]
impl RpcApi for HttpRpcApi {
    async fn get_program_accounts(&self, program_id: &Pubkey) -> Result<Vec<(Pubkey, Account)>> {
        let config = RpcProgramAccountsConfig {
            account_config: RpcAccountInfoConfig {
                encoding: Some(UiAccountEncoding::Base64),
                commitment: Some(self.commitment),
                ..RpcAccountInfoConfig::default()
            },
            ..RpcProgramAccountsConfig::default()
        };
        let accounts = self
            .client
            .get_program_accounts_with_config(program_id, config)
            .await?;
        Ok(accounts)
    }

    async fn get_account(&self, address: &Pubkey) -> Result<Option<Account>> {
        Ok(self
            .client
            .get_account_with_commitment(address, self.commitment)
            .await?
            .value)
    }

    async fn get_multiple_accounts(&self, addresses: &[Pubkey]) -> Result<Vec<Option<Account>>> {
        Ok(self
            .client
            .get_multiple_accounts_with_commitment(addresses, self.commitment)
            .await?
            .value)
    }

    async fn get_slot(&self) -> Result<u64> {
        let slot = self.client.get_slot().await?;
        Ok(slot)
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}
