//! Multi-endpoint RPC client with bounded retry and guarded failover.
//!
//! [`FailoverRpcClient`] owns an ordered list of [`RpcApi`] providers,
//! one per configured endpoint. Operations run against the current
//! endpoint with exponential-backoff retries for retryable errors; once
//! retries are exhausted the client advances to the next live endpoint
//! (wrap-around, probed with `getSlot`) and retries the operation once
//! before surfacing [`IndexerError::RpcExhausted`]. Only one failover
//! proceeds at a time; concurrent callers wait a beat and pick up
//! whatever endpoint the winner settled on.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use solana_sdk::{account::Account, commitment_config::CommitmentConfig, pubkey::Pubkey};
use tokio::time::sleep;

use crate::config::RetryConfig;
use crate::utils::error::{IndexerError, Result};
use crate::utils::retry::{compute_backoff, is_retryable};
use crate::utils::rpc::{HttpRpcApi, RpcApi};

/// RPC client spanning an ordered endpoint list with failover.
pub struct FailoverRpcClient {
    providers: Vec<Arc<dyn RpcApi>>,
    current: AtomicUsize,
    failing_over: AtomicBool,
    retry: RetryConfig,
}

impl FailoverRpcClient {
    /// Creates a client over `endpoints` (index 0 primary), all pinned to
    /// `commitment`.
    #[must_use]
    pub fn new(endpoints: &[String], commitment: CommitmentConfig, retry: RetryConfig) -> Self {
        let providers = endpoints
            .iter()
            .map(|url| Arc::new(HttpRpcApi::new(url, commitment)) as Arc<dyn RpcApi>)
            .collect();
        Self::with_providers(providers, retry)
    }

    /// Creates a client over pre-built providers. This is the seam tests
    /// use to inject mock providers.
    ///
    /// # Panics
    ///
    /// Panics if `providers` is empty; configuration validation upstream
    /// guarantees at least one endpoint.
    #[must_use]
    pub fn with_providers(providers: Vec<Arc<dyn RpcApi>>, retry: RetryConfig) -> Self {
        assert!(!providers.is_empty(), "at least one RPC provider required");
        Self {
            providers,
            current: AtomicUsize::new(0),
            failing_over: AtomicBool::new(false),
            retry,
        }
    }

    fn current_index(&self) -> usize {
        self.current.load(Ordering::Acquire) % self.providers.len()
    }

    fn current_provider(&self) -> Arc<dyn RpcApi> {
        Arc::clone(&self.providers[self.current_index()])
    }

    /// URL of the endpoint currently in use.
    #[must_use]
    pub fn current_endpoint(&self) -> String {
        self.providers[self.current_index()].endpoint().to_string()
    }

    /// All configured endpoint URLs, in failover order.
    #[must_use]
    pub fn endpoints(&self) -> Vec<String> {
        self.providers
            .iter()
            .map(|p| p.endpoint().to_string())
            .collect()
    }

    /// Runs `op` against the current endpoint with bounded retries, then
    /// failover.
    ///
    /// Retryable errors (see [`is_retryable`]) are retried up to
    /// `retry.max_attempts` times with exponential backoff between
    /// attempts; non-retryable errors propagate immediately. When the
    /// current endpoint is exhausted the client fails over and retries
    /// the operation once against the new endpoint.
    ///
    /// # Errors
    ///
    /// [`IndexerError::RpcExhausted`] when every attempt and the
    /// post-failover retry failed, or the original error when it was not
    /// retryable.
    pub async fn execute_with_retry<T, F, Fut>(&self, op_name: &str, op: F) -> Result<T>
    where
        F: Fn(Arc<dyn RpcApi>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_err: Option<IndexerError> = None;

        for attempt in 1..=self.retry.max_attempts {
            match op(self.current_provider()).await {
                Ok(value) => return Ok(value),
                Err(err) if is_retryable(&err) => {
                    tracing::warn!(
                        op = op_name,
                        attempt,
                        max = self.retry.max_attempts,
                        endpoint = %self.current_endpoint(),
                        error = %err,
                        "Retryable RPC error"
                    );
                    last_err = Some(err);
                    if attempt < self.retry.max_attempts {
                        sleep(compute_backoff(&self.retry, attempt)).await;
                    }
                }
                Err(err) => return Err(err),
            }
        }

        let last_error = last_err
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown".to_string());

        if self.try_failover(op_name).await {
            match op(self.current_provider()).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    return Err(IndexerError::RpcExhausted {
                        attempts: self.retry.max_attempts + 1,
                        last_error: err.to_string(),
                    });
                }
            }
        }

        Err(IndexerError::RpcExhausted {
            attempts: self.retry.max_attempts,
            last_error,
        })
    }

    /// Advances to the next live endpoint, or falls through when another
    /// task is already doing so.
    ///
    /// Returns `true` when the caller should retry against the (possibly
    /// new) current endpoint.
    async fn try_failover(&self, op_name: &str) -> bool {
        if self.providers.len() <= 1 {
            return false;
        }

        if self
            .failing_over
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            // Another task holds the failover; give it a beat to settle
            // and retry on whatever endpoint it lands on.
            sleep(Duration::from_millis(self.retry.initial_backoff_ms)).await;
            return true;
        }

        let advanced = self.advance_to_live_endpoint(op_name).await;
        self.failing_over.store(false, Ordering::Release);
        advanced
    }

    /// Walks the remaining endpoints in order, settling on the first one
    /// that answers a `getSlot` probe.
    async fn advance_to_live_endpoint(&self, op_name: &str) -> bool {
        let start = self.current_index();
        for step in 1..self.providers.len() {
            let candidate = (start + step) % self.providers.len();
            let provider = Arc::clone(&self.providers[candidate]);
            match provider.get_slot().await {
                Ok(slot) => {
                    self.current.store(candidate, Ordering::Release);
                    tracing::info!(
                        op = op_name,
                        endpoint = provider.endpoint(),
                        slot,
                        "Failed over to live RPC endpoint"
                    );
                    return true;
                }
                Err(err) => {
                    tracing::warn!(
                        op = op_name,
                        endpoint = provider.endpoint(),
                        error = %err,
                        "Failover probe failed"
                    );
                }
            }
        }
        tracing::error!(op = op_name, "No live RPC endpoint found during failover");
        false
    }

    /// Fetches every account owned by `program_id`, with retry and failover.
    pub async fn get_program_accounts(&self, program_id: &Pubkey) -> Result<Vec<(Pubkey, Account)>> {
        let program_id = *program_id;
        self.execute_with_retry("getProgramAccounts", move |provider| async move {
            provider.get_program_accounts(&program_id).await
        })
        .await
    }

    /// Fetches a single account, with retry and failover.
    pub async fn get_account(&self, address: &Pubkey) -> Result<Option<Account>> {
        let address = *address;
        self.execute_with_retry("getAccountInfo", move |provider| async move {
            provider.get_account(&address).await
        })
        .await
    }

    /// Fetches a batch of accounts, with retry and failover.
    pub async fn get_multiple_accounts(&self, addresses: &[Pubkey]) -> Result<Vec<Option<Account>>> {
        self.execute_with_retry("getMultipleAccounts", move |provider| async move {
            provider.get_multiple_accounts(addresses).await
        })
        .await
    }

    /// Probes the current endpoint's slot. No retry: the health poll
    /// wants the endpoint's momentary state, not its best behavior.
    pub async fn health_check(&self) -> Result<u64> {
        self.current_provider().get_slot().await
    }
}
