//! Ledger service
//!
//! Wraps a `LedgerStore` with the caller's deadline and a bounded retry on
//! transient store conflicts.

use std::sync::Arc;
use std::time::Duration;

use crate::domain::{Account, Entry, OperationContext, TransferParams, TransferResult};
use crate::error::{AppError, AppResult};

use super::LedgerStore;

/// Retry budget for transfers aborted by a serialization failure or lock timeout
#[derive(Debug, Clone, Copy)]
pub struct TransferRetry {
    pub max_attempts: u32,
    /// Delay before attempt `n + 1` is `backoff * n`
    pub backoff: Duration,
}

impl Default for TransferRetry {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(50),
        }
    }
}

/// Account Ledger operations
#[derive(Clone)]
pub struct LedgerService {
    store: Arc<dyn LedgerStore>,
    retry: TransferRetry,
}

impl LedgerService {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            store,
            retry: TransferRetry::default(),
        }
    }

    pub fn with_retry(mut self, retry: TransferRetry) -> Self {
        self.retry = retry;
        self
    }

    // =========================================================================
    // Accounts
    // =========================================================================

    pub async fn create_account(
        &self,
        owner: &str,
        currency: &str,
        context: &OperationContext,
    ) -> AppResult<Account> {
        let account = context.run(self.store.create_account(owner, currency)).await??;
        Ok(account)
    }

    pub async fn get_account(&self, id: i64, context: &OperationContext) -> AppResult<Account> {
        let account = context.run(self.store.get_account(id)).await??;
        Ok(account)
    }

    pub async fn list_accounts(
        &self,
        owner: &str,
        limit: i64,
        offset: i64,
        context: &OperationContext,
    ) -> AppResult<Vec<Account>> {
        let accounts = context
            .run(self.store.list_accounts(owner, limit, offset))
            .await??;
        Ok(accounts)
    }

    pub async fn list_entries(
        &self,
        account_id: i64,
        context: &OperationContext,
    ) -> AppResult<Vec<Entry>> {
        let entries = context.run(self.store.list_entries(account_id)).await??;
        Ok(entries)
    }

    // =========================================================================
    // Transfer with retry
    // =========================================================================

    /// Move `params.amount` between two accounts as one atomic unit.
    ///
    /// Transient conflicts are retried up to `TransferRetry::max_attempts`
    /// times; every other failure is returned on the first attempt. The
    /// deadline covers all attempts including backoff.
    pub async fn transfer(
        &self,
        params: &TransferParams,
        context: &OperationContext,
    ) -> AppResult<TransferResult> {
        let max_attempts = self.retry.max_attempts.max(1);

        context
            .run(async {
                let mut attempt = 0;
                loop {
                    attempt += 1;
                    match self.store.transfer_tx(params).await.map_err(AppError::from) {
                        Ok(result) => return Ok(result),
                        Err(e) if e.is_retryable() && attempt < max_attempts => {
                            tracing::warn!(
                                from_account_id = params.from_account_id,
                                to_account_id = params.to_account_id,
                                "Transient conflict on transfer, retrying (attempt {}/{}): {}",
                                attempt,
                                max_attempts,
                                e
                            );
                            tokio::time::sleep(self.retry.backoff * attempt).await;
                        }
                        Err(e) => return Err(e),
                    }
                }
            })
            .await?
    }
}
