//! Account Ledger
//!
//! Owns account balances and the atomic, deadlock-free transfer between two
//! accounts. Both store implementations lock account rows in ascending ID
//! order regardless of transfer direction.

mod memory;
mod postgres;
mod service;
mod store;

pub use memory::InMemoryLedgerStore;
pub use postgres::PgLedgerStore;
pub use service::{LedgerService, TransferRetry};
pub use store::LedgerStore;
