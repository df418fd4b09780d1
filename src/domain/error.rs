//! Domain Error Types
//!
//! Pure domain errors that don't depend on infrastructure.

use thiserror::Error;

/// Domain-specific errors
///
/// These errors represent business rule violations and domain invariant failures.
/// They are independent of the web/infrastructure layer.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    /// Malformed input that no retry can fix
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Insufficient balance for debit operation
    #[error("Insufficient funds in account {account_id}: required {required}, available {available}")]
    InsufficientFunds {
        account_id: i64,
        required: i64,
        available: i64,
    },

    /// Invalid amount (zero or negative)
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Transfer to same account
    #[error("Cannot transfer to the same account")]
    SameAccountTransfer,

    /// Account currency does not match the requested currency
    #[error("Account {account_id} currency mismatch: {found} vs {expected}")]
    CurrencyMismatch {
        account_id: i64,
        expected: String,
        found: String,
    },

    /// Account not found
    #[error("Account not found: {0}")]
    AccountNotFound(i64),

    /// User not found
    #[error("User not found: {0}")]
    UserNotFound(String),
}

impl DomainError {
    /// Create an insufficient funds error
    pub fn insufficient_funds(account_id: i64, required: i64, available: i64) -> Self {
        Self::InsufficientFunds {
            account_id,
            required,
            available,
        }
    }

    /// Check if this is a client error (user's fault, never retried)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument(_)
                | Self::InsufficientFunds { .. }
                | Self::InvalidAmount(_)
                | Self::SameAccountTransfer
                | Self::CurrencyMismatch { .. }
        )
    }

    /// Check if this error means a referenced record is absent
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::AccountNotFound(_) | Self::UserNotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_funds_error() {
        let err = DomainError::insufficient_funds(7, 100, 50);

        assert!(err.is_client_error());
        assert!(!err.is_not_found());
        assert!(err.to_string().contains("100"));
        assert!(err.to_string().contains("50"));
    }

    #[test]
    fn test_not_found_errors() {
        assert!(DomainError::AccountNotFound(3).is_not_found());
        assert!(DomainError::UserNotFound("alice".into()).is_not_found());
        assert!(!DomainError::AccountNotFound(3).is_client_error());
    }
}
