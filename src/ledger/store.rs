//! Ledger persistence port

use async_trait::async_trait;

use crate::db::StoreError;
use crate::domain::{Account, Entry, TransferParams, TransferResult};

/// Storage for accounts, transfers and entries.
///
/// `transfer_tx` must run as one transaction: both account rows locked in
/// `TransferParams::lock_order`, balances checked and updated, one transfer
/// row and two entry rows inserted, then committed. Any failure leaves no
/// trace.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Insert a zero-balance account
    async fn create_account(&self, owner: &str, currency: &str) -> Result<Account, StoreError>;

    async fn get_account(&self, id: i64) -> Result<Account, StoreError>;

    /// Accounts of `owner` ordered by ID
    async fn list_accounts(
        &self,
        owner: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Account>, StoreError>;

    async fn transfer_tx(&self, params: &TransferParams) -> Result<TransferResult, StoreError>;

    /// Entries of one account, oldest first
    async fn list_entries(&self, account_id: i64) -> Result<Vec<Entry>, StoreError>;
}
