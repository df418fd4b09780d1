//! Ledger records and transfer rules
//!
//! Accounts, transfers and entries as stored, plus the pure rules a
//! transfer must satisfy once both account rows are locked.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Amount, DomainError};

/// A balance-holding account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Account {
    pub id: i64,
    pub owner: String,
    pub currency: String,
    /// Balance in minor units, never negative
    pub balance: i64,
    pub created_at: DateTime<Utc>,
}

/// A committed movement of money between two accounts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Transfer {
    pub id: i64,
    pub from_account_id: i64,
    pub to_account_id: i64,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

/// One signed half of a transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Entry {
    pub id: i64,
    pub account_id: i64,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

/// Input to a ledger transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferParams {
    pub from_account_id: i64,
    pub to_account_id: i64,
    pub amount: Amount,
    /// When set, both accounts must hold this currency
    pub currency: Option<String>,
}

impl TransferParams {
    /// Build transfer parameters, rejecting self-transfers and non-positive amounts
    pub fn new(from_account_id: i64, to_account_id: i64, amount: i64) -> Result<Self, DomainError> {
        if from_account_id == to_account_id {
            return Err(DomainError::SameAccountTransfer);
        }
        let amount = Amount::new(amount).map_err(|e| DomainError::InvalidAmount(e.to_string()))?;

        Ok(Self {
            from_account_id,
            to_account_id,
            amount,
            currency: None,
        })
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = Some(currency.into());
        self
    }

    /// The two account IDs in the order their rows must be locked
    pub fn lock_order(&self) -> (i64, i64) {
        lock_order(self.from_account_id, self.to_account_id)
    }
}

/// Global lock order: ascending account ID, whatever the transfer direction.
pub fn lock_order(a: i64, b: i64) -> (i64, i64) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// New balances after a transfer has been checked against both locked rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceUpdate {
    pub from_balance: i64,
    pub to_balance: i64,
}

/// Check a transfer against the locked source and destination rows.
pub fn plan_transfer(
    from: &Account,
    to: &Account,
    params: &TransferParams,
) -> Result<BalanceUpdate, DomainError> {
    if from.id == to.id {
        return Err(DomainError::SameAccountTransfer);
    }

    if let Some(currency) = params.currency.as_deref() {
        for account in [from, to] {
            if account.currency != currency {
                return Err(DomainError::CurrencyMismatch {
                    account_id: account.id,
                    expected: currency.to_string(),
                    found: account.currency.clone(),
                });
            }
        }
    }
    if from.currency != to.currency {
        return Err(DomainError::CurrencyMismatch {
            account_id: to.id,
            expected: from.currency.clone(),
            found: to.currency.clone(),
        });
    }

    let amount = params.amount.value();
    if from.balance < amount {
        return Err(DomainError::insufficient_funds(from.id, amount, from.balance));
    }

    let to_balance = to
        .balance
        .checked_add(amount)
        .ok_or_else(|| DomainError::InvalidArgument(format!("balance overflow on account {}", to.id)))?;

    Ok(BalanceUpdate {
        from_balance: from.balance - amount,
        to_balance,
    })
}

/// Everything a committed transfer produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferResult {
    pub transfer: Transfer,
    pub from_account: Account,
    pub to_account: Account,
    pub from_entry: Entry,
    pub to_entry: Entry,
}
