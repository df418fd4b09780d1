//! Domain module
//!
//! Core domain types and business rules.

pub mod account;
pub mod amount;
pub mod context;
pub mod currency;
pub mod error;
pub mod events;
pub mod user;

pub use account::{
    lock_order, plan_transfer, Account, BalanceUpdate, Entry, Transfer, TransferParams,
    TransferResult,
};
pub use amount::{Amount, AmountError};
pub use context::{DeadlineExceeded, OperationContext};
pub use error::DomainError;
pub use events::PostCommitEvent;
pub use user::{is_reserved_username, CreateUserParams, Role, UpdateUserParams, User, VerifyEmail};
