//! PostgreSQL ledger store
//!
//! Row locks are taken with `SELECT ... FOR UPDATE` in ascending account ID
//! order inside a single transaction. A lock wait longer than
//! `LOCK_TIMEOUT` aborts with SQLSTATE 55P03, which surfaces as a
//! retryable `StoreError::Transient`.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};

use crate::db::StoreError;
use crate::domain::{
    plan_transfer, Account, DomainError, Entry, Transfer, TransferParams, TransferResult,
};

use super::LedgerStore;

const LOCK_TIMEOUT: &str = "SET LOCAL lock_timeout = '5s'";

const ACCOUNT_COLUMNS: &str = "id, owner, currency, balance, created_at";

/// Ledger store backed by PostgreSQL
#[derive(Debug, Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Lock and read one account row
    async fn lock_account(
        tx: &mut Transaction<'_, Postgres>,
        id: i64,
    ) -> Result<Account, StoreError> {
        let query = format!("SELECT {} FROM accounts WHERE id = $1 FOR UPDATE", ACCOUNT_COLUMNS);
        sqlx::query_as::<_, Account>(&query)
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or(StoreError::Domain(DomainError::AccountNotFound(id)))
    }

    async fn set_balance(
        tx: &mut Transaction<'_, Postgres>,
        id: i64,
        balance: i64,
    ) -> Result<Account, StoreError> {
        let query = format!(
            "UPDATE accounts SET balance = $2 WHERE id = $1 RETURNING {}",
            ACCOUNT_COLUMNS
        );
        let account = sqlx::query_as::<_, Account>(&query)
            .bind(id)
            .bind(balance)
            .fetch_one(&mut **tx)
            .await?;
        Ok(account)
    }

    async fn insert_entry(
        tx: &mut Transaction<'_, Postgres>,
        transfer_id: i64,
        account_id: i64,
        amount: i64,
    ) -> Result<Entry, StoreError> {
        let entry = sqlx::query_as::<_, Entry>(
            r#"
            INSERT INTO entries (account_id, transfer_id, amount)
            VALUES ($1, $2, $3)
            RETURNING id, account_id, amount, created_at
            "#,
        )
        .bind(account_id)
        .bind(transfer_id)
        .bind(amount)
        .fetch_one(&mut **tx)
        .await?;
        Ok(entry)
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn create_account(&self, owner: &str, currency: &str) -> Result<Account, StoreError> {
        let query = format!(
            "INSERT INTO accounts (owner, currency, balance) VALUES ($1, $2, 0) RETURNING {}",
            ACCOUNT_COLUMNS
        );
        let account = sqlx::query_as::<_, Account>(&query)
            .bind(owner)
            .bind(currency)
            .fetch_one(&self.pool)
            .await?;

        tracing::info!(account_id = account.id, owner = %owner, currency = %currency, "Account created");
        Ok(account)
    }

    async fn get_account(&self, id: i64) -> Result<Account, StoreError> {
        let query = format!("SELECT {} FROM accounts WHERE id = $1", ACCOUNT_COLUMNS);
        sqlx::query_as::<_, Account>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::Domain(DomainError::AccountNotFound(id)))
    }

    async fn list_accounts(
        &self,
        owner: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Account>, StoreError> {
        let query = format!(
            "SELECT {} FROM accounts WHERE owner = $1 ORDER BY id LIMIT $2 OFFSET $3",
            ACCOUNT_COLUMNS
        );
        let accounts = sqlx::query_as::<_, Account>(&query)
            .bind(owner)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
        Ok(accounts)
    }

    async fn transfer_tx(&self, params: &TransferParams) -> Result<TransferResult, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(LOCK_TIMEOUT).execute(&mut *tx).await?;

        // Lower ID first, whatever the direction
        let (first_id, second_id) = params.lock_order();
        let first = Self::lock_account(&mut tx, first_id).await?;
        let second = Self::lock_account(&mut tx, second_id).await?;
        let (from, to) = if first.id == params.from_account_id {
            (first, second)
        } else {
            (second, first)
        };

        let update = plan_transfer(&from, &to, params)?;
        let amount = params.amount.value();

        let from_account = Self::set_balance(&mut tx, from.id, update.from_balance).await?;
        let to_account = Self::set_balance(&mut tx, to.id, update.to_balance).await?;

        let transfer = sqlx::query_as::<_, Transfer>(
            r#"
            INSERT INTO transfers (from_account_id, to_account_id, amount)
            VALUES ($1, $2, $3)
            RETURNING id, from_account_id, to_account_id, amount, created_at
            "#,
        )
        .bind(from.id)
        .bind(to.id)
        .bind(amount)
        .fetch_one(&mut *tx)
        .await?;

        let from_entry = Self::insert_entry(&mut tx, transfer.id, from.id, -amount).await?;
        let to_entry = Self::insert_entry(&mut tx, transfer.id, to.id, amount).await?;

        tx.commit().await?;

        tracing::debug!(
            transfer_id = transfer.id,
            from_account_id = from.id,
            to_account_id = to.id,
            amount,
            "Transfer committed"
        );

        Ok(TransferResult {
            transfer,
            from_account,
            to_account,
            from_entry,
            to_entry,
        })
    }

    async fn list_entries(&self, account_id: i64) -> Result<Vec<Entry>, StoreError> {
        let entries = sqlx::query_as::<_, Entry>(
            "SELECT id, account_id, amount, created_at FROM entries WHERE account_id = $1 ORDER BY id",
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }
}
