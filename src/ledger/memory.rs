//! In-memory ledger store
//!
//! Each account lives behind its own async mutex, which plays the role of
//! the row lock. Transfers take both mutexes in ascending account ID order
//! and keep them until the transfer and its entries are recorded, so no
//! reader can observe one side of a transfer without the other.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};

use crate::db::StoreError;
use crate::domain::{
    plan_transfer, Account, DomainError, Entry, Transfer, TransferParams, TransferResult,
};

use super::LedgerStore;

type AccountCell = Arc<tokio::sync::Mutex<Account>>;

#[derive(Debug, Default)]
struct Journal {
    transfers: Vec<Transfer>,
    entries: Vec<Entry>,
}

/// Ledger store kept entirely in process memory
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    accounts: RwLock<BTreeMap<i64, AccountCell>>,
    owner_currency: Mutex<HashSet<(String, String)>>,
    journal: Mutex<Journal>,
    next_account_id: AtomicI64,
    next_transfer_id: AtomicI64,
    next_entry_id: AtomicI64,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an account with an opening balance, bypassing the ledger.
    pub fn insert_account_with_balance(
        &self,
        owner: &str,
        currency: &str,
        balance: i64,
    ) -> Result<Account, StoreError> {
        if balance < 0 {
            return Err(DomainError::InvalidArgument("opening balance must not be negative".into()).into());
        }
        if !self
            .owner_currency
            .lock()
            .insert((owner.to_string(), currency.to_string()))
        {
            return Err(StoreError::Conflict(format!(
                "account for owner {} in {} already exists",
                owner, currency
            )));
        }

        let account = Account {
            id: self.next_account_id.fetch_add(1, Ordering::SeqCst) + 1,
            owner: owner.to_string(),
            currency: currency.to_string(),
            balance,
            created_at: Utc::now(),
        };
        self.accounts
            .write()
            .insert(account.id, Arc::new(tokio::sync::Mutex::new(account.clone())));
        Ok(account)
    }

    fn cell(&self, id: i64) -> Result<AccountCell, StoreError> {
        self.accounts
            .read()
            .get(&id)
            .cloned()
            .ok_or(StoreError::Domain(DomainError::AccountNotFound(id)))
    }

    fn all_cells(&self) -> Vec<AccountCell> {
        self.accounts.read().values().cloned().collect()
    }

    fn next_entry(&self, account_id: i64, amount: i64) -> Entry {
        Entry {
            id: self.next_entry_id.fetch_add(1, Ordering::SeqCst) + 1,
            account_id,
            amount,
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn create_account(&self, owner: &str, currency: &str) -> Result<Account, StoreError> {
        self.insert_account_with_balance(owner, currency, 0)
    }

    async fn get_account(&self, id: i64) -> Result<Account, StoreError> {
        let cell = self.cell(id)?;
        let account = cell.lock().await.clone();
        Ok(account)
    }

    async fn list_accounts(
        &self,
        owner: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Account>, StoreError> {
        let mut owned = Vec::new();
        for cell in self.all_cells() {
            let account = cell.lock().await;
            if account.owner == owner {
                owned.push(account.clone());
            }
        }

        Ok(owned
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn transfer_tx(&self, params: &TransferParams) -> Result<TransferResult, StoreError> {
        let (first_id, second_id) = params.lock_order();
        if first_id == second_id {
            return Err(DomainError::SameAccountTransfer.into());
        }
        let first_cell = self.cell(first_id)?;
        let second_cell = self.cell(second_id)?;

        // Lower ID first, whatever the direction
        let mut first = first_cell.lock().await;
        let mut second = second_cell.lock().await;
        let (from, to) = if first.id == params.from_account_id {
            (&mut *first, &mut *second)
        } else {
            (&mut *second, &mut *first)
        };

        let update = plan_transfer(from, to, params)?;
        let amount = params.amount.value();

        from.balance = update.from_balance;
        to.balance = update.to_balance;

        let transfer = Transfer {
            id: self.next_transfer_id.fetch_add(1, Ordering::SeqCst) + 1,
            from_account_id: from.id,
            to_account_id: to.id,
            amount,
            created_at: Utc::now(),
        };
        let from_entry = self.next_entry(from.id, -amount);
        let to_entry = self.next_entry(to.id, amount);

        {
            let mut journal = self.journal.lock();
            journal.transfers.push(transfer.clone());
            journal.entries.push(from_entry.clone());
            journal.entries.push(to_entry.clone());
        }

        Ok(TransferResult {
            transfer,
            from_account: from.clone(),
            to_account: to.clone(),
            from_entry,
            to_entry,
        })
    }

    async fn list_entries(&self, account_id: i64) -> Result<Vec<Entry>, StoreError> {
        self.cell(account_id)?;
        Ok(self
            .journal
            .lock()
            .entries
            .iter()
            .filter(|e| e.account_id == account_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_account_starts_at_zero() {
        let store = InMemoryLedgerStore::new();
        let account = store.create_account("alice", "USD").await.unwrap();

        assert_eq!(account.balance, 0);
        assert_eq!(store.get_account(account.id).await.unwrap(), account);
    }

    #[tokio::test]
    async fn test_duplicate_owner_currency_conflicts() {
        let store = InMemoryLedgerStore::new();
        store.create_account("alice", "USD").await.unwrap();

        let err = store.create_account("alice", "USD").await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert!(store.create_account("alice", "EUR").await.is_ok());
    }

    #[tokio::test]
    async fn test_transfer_records_two_entries() {
        let store = InMemoryLedgerStore::new();
        let x = store.insert_account_with_balance("x", "USD", 100).unwrap();
        let y = store.insert_account_with_balance("y", "USD", 50).unwrap();

        let params = TransferParams::new(x.id, y.id, 30).unwrap();
        let result = store.transfer_tx(&params).await.unwrap();

        assert_eq!(result.from_account.balance, 70);
        assert_eq!(result.to_account.balance, 80);
        assert_eq!(result.from_entry.amount + result.to_entry.amount, 0);
        assert_eq!(store.list_entries(x.id).await.unwrap().len(), 1);
        assert_eq!(store.list_entries(y.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_transfer_to_missing_account() {
        let store = InMemoryLedgerStore::new();
        let x = store.insert_account_with_balance("x", "USD", 100).unwrap();

        let params = TransferParams::new(x.id, 999, 30).unwrap();
        let err = store.transfer_tx(&params).await.unwrap_err();

        assert!(matches!(err, StoreError::Domain(DomainError::AccountNotFound(999))));
        assert_eq!(store.get_account(x.id).await.unwrap().balance, 100);
    }

    #[tokio::test]
    async fn test_list_accounts_paginates_by_owner() {
        let store = InMemoryLedgerStore::new();
        store.create_account("alice", "USD").await.unwrap();
        store.create_account("bob", "USD").await.unwrap();
        store.create_account("alice", "EUR").await.unwrap();
        store.create_account("alice", "CAD").await.unwrap();

        let page = store.list_accounts("alice", 2, 0).await.unwrap();
        assert_eq!(page.len(), 2);
        assert!(page[0].id < page[1].id);

        let rest = store.list_accounts("alice", 2, 2).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].currency, "CAD");
    }
}
